use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::progress::effective;
use super::simulation::RgaSimulationData;
use crate::auth::UserId;

/// Steps of the journey, declared in journey order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    ChoixAmo,
    Eligibilite,
    Diagnostic,
    Devis,
    Factures,
}

pub const STEP_ORDER: [Step; 5] = [
    Step::ChoixAmo,
    Step::Eligibilite,
    Step::Diagnostic,
    Step::Devis,
    Step::Factures,
];

impl Step {
    pub const fn ordered() -> [Self; 5] {
        STEP_ORDER
    }

    pub const fn position(self) -> usize {
        match self {
            Self::ChoixAmo => 0,
            Self::Eligibilite => 1,
            Self::Diagnostic => 2,
            Self::Devis => 3,
            Self::Factures => 4,
        }
    }

    pub const fn first() -> Self {
        STEP_ORDER[0]
    }

    pub const fn last() -> Self {
        STEP_ORDER[STEP_ORDER.len() - 1]
    }

    pub fn next(self) -> Option<Self> {
        STEP_ORDER.get(self.position() + 1).copied()
    }

    pub fn previous(self) -> Option<Self> {
        self.position()
            .checked_sub(1)
            .and_then(|index| STEP_ORDER.get(index).copied())
    }

    /// CHOIX_AMO is settled by the AMO validation workflow; every later step
    /// is decided on a case filed in Démarches Simplifiées.
    pub const fn has_dossier(self) -> bool {
        !matches!(self, Self::ChoixAmo)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::ChoixAmo => "Choix de l'AMO",
            Self::Eligibilite => "Éligibilité",
            Self::Diagnostic => "Diagnostic",
            Self::Devis => "Devis",
            Self::Factures => "Factures",
        }
    }
}

pub fn is_step_before(a: Step, b: Step) -> bool {
    a.position() < b.position()
}

pub fn is_step_after(a: Step, b: Step) -> bool {
    a.position() > b.position()
}

/// Local status of a step. Ordered so that `max` expresses the only
/// permitted direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Todo,
    EnInstruction,
    Valide,
}

impl Status {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Todo => "À faire",
            Self::EnInstruction => "En instruction",
            Self::Valide => "Validé",
        }
    }
}

/// Case status reported by Démarches Simplifiées.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DsStatus {
    EnConstruction,
    EnInstruction,
    Accepte,
    Refuse,
    ClasseSansSuite,
    NonAccessible,
}

impl DsStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::EnConstruction => "en_construction",
            Self::EnInstruction => "en_instruction",
            Self::Accepte => "accepte",
            Self::Refuse => "refuse",
            Self::ClasseSansSuite => "sans_suite",
            Self::NonAccessible => "non_accessible",
        }
    }

    pub const fn is_negative_outcome(self) -> bool {
        matches!(self, Self::Refuse | Self::ClasseSansSuite)
    }
}

/// Projects an external case status onto the local status without ever
/// moving it backwards. Refusals leave the status untouched; they are
/// reported as a blocked journey instead.
pub fn reconcile_status(local: Status, external: DsStatus) -> Status {
    match external {
        DsStatus::Accepte => Status::Valide,
        DsStatus::EnInstruction | DsStatus::EnConstruction => local.max(Status::EnInstruction),
        DsStatus::Refuse | DsStatus::ClasseSansSuite | DsStatus::NonAccessible => local,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParcoursId(pub String);

impl ParcoursId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Reference to the case filed for one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DossierDs {
    pub numero: String,
    pub ds_status: DsStatus,
    pub synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepState {
    pub status: Status,
    pub dossier: Option<DossierDs>,
}

impl Default for StepState {
    fn default() -> Self {
        Self {
            status: Status::Todo,
            dossier: None,
        }
    }
}

/// Why a parcours was erased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeletionReason {
    SentToDs,
    Expired,
    Manual,
    UserRequest,
}

impl DeletionReason {
    pub const fn label(self) -> &'static str {
        match self {
            Self::SentToDs => "sent_to_ds",
            Self::Expired => "expired",
            Self::Manual => "manual",
            Self::UserRequest => "user_request",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParcoursError {
    #[error("step {requested:?} cannot be changed while the journey is at {current:?}")]
    OutOfOrder { requested: Step, current: Step },
    #[error("step {0:?} is not filed with Démarches Simplifiées")]
    NoDossierForStep(Step),
}

/// One citizen's journey. `steps` always holds an entry for every step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcoursPrevention {
    pub id: ParcoursId,
    pub user_id: UserId,
    pub steps: BTreeMap<Step, StepState>,
    pub rga_simulation_data: Option<RgaSimulationData>,
    pub rga_simulation_data_agent: Option<RgaSimulationData>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by the repository on every write. A copy carrying an older
    /// version is refused.
    #[serde(default)]
    pub version: u64,
}

impl ParcoursPrevention {
    pub fn new(user_id: UserId, simulation: Option<RgaSimulationData>, now: DateTime<Utc>) -> Self {
        Self {
            id: ParcoursId::generate(),
            user_id,
            steps: STEP_ORDER
                .into_iter()
                .map(|step| (step, StepState::default()))
                .collect(),
            rga_simulation_data: simulation,
            rga_simulation_data_agent: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn state(&self, step: Step) -> StepState {
        self.steps.get(&step).cloned().unwrap_or_default()
    }

    pub fn status_of(&self, step: Step) -> Status {
        self.steps
            .get(&step)
            .map(|state| state.status)
            .unwrap_or(Status::Todo)
    }

    /// First step not yet validated, or the last step once everything is.
    pub fn current_step(&self) -> Step {
        STEP_ORDER
            .into_iter()
            .find(|step| self.status_of(*step) != Status::Valide)
            .unwrap_or(Step::last())
    }

    pub fn is_complete(&self) -> bool {
        STEP_ORDER
            .into_iter()
            .all(|step| self.status_of(step) == Status::Valide)
    }

    /// Agent correction when present, otherwise the citizen's own answers.
    pub fn effective_simulation(&self) -> Option<&RgaSimulationData> {
        effective(
            self.rga_simulation_data.as_ref(),
            self.rga_simulation_data_agent.as_ref(),
        )
    }

    fn ensure_current(&self, step: Step) -> Result<(), ParcoursError> {
        let current = self.current_step();
        if step == current && !self.is_complete() {
            Ok(())
        } else {
            Err(ParcoursError::OutOfOrder {
                requested: step,
                current,
            })
        }
    }

    fn state_mut(&mut self, step: Step) -> &mut StepState {
        self.steps.entry(step).or_default()
    }

    pub fn start_instruction(&mut self, step: Step, now: DateTime<Utc>) -> Result<(), ParcoursError> {
        self.ensure_current(step)?;
        let state = self.state_mut(step);
        state.status = state.status.max(Status::EnInstruction);
        self.updated_at = now;
        Ok(())
    }

    pub fn validate_step(&mut self, step: Step, now: DateTime<Utc>) -> Result<(), ParcoursError> {
        self.ensure_current(step)?;
        self.state_mut(step).status = Status::Valide;
        self.updated_at = now;
        Ok(())
    }

    /// Records the case filed for the current step and puts it in instruction.
    pub fn attach_dossier(
        &mut self,
        step: Step,
        numero: String,
        now: DateTime<Utc>,
    ) -> Result<(), ParcoursError> {
        if !step.has_dossier() {
            return Err(ParcoursError::NoDossierForStep(step));
        }
        self.ensure_current(step)?;
        let state = self.state_mut(step);
        state.dossier = Some(DossierDs {
            numero,
            ds_status: DsStatus::EnConstruction,
            synced_at: Some(now),
        });
        state.status = state.status.max(Status::EnInstruction);
        self.updated_at = now;
        Ok(())
    }

    /// Folds the latest external status into the step. Returns whether
    /// anything changed so callers can skip a write.
    pub fn apply_ds_status(&mut self, step: Step, external: DsStatus, now: DateTime<Utc>) -> bool {
        let state = self.state_mut(step);
        let Some(dossier) = state.dossier.as_mut() else {
            return false;
        };

        let previous_status = state.status;
        let previous_external = dossier.ds_status;
        if external != DsStatus::NonAccessible {
            dossier.ds_status = external;
        }
        dossier.synced_at = Some(now);
        state.status = reconcile_status(previous_status, external);

        let changed = state.status != previous_status || dossier.ds_status != previous_external;
        if changed {
            self.updated_at = now;
        }
        changed
    }

    /// Administrative override: reopens `step` and everything after it.
    pub fn rewind_to(&mut self, step: Step, now: DateTime<Utc>) {
        for later in STEP_ORDER.into_iter().filter(|s| !is_step_before(*s, step)) {
            *self.state_mut(later) = StepState::default();
        }
        self.updated_at = now;
    }

    pub fn set_agent_simulation(&mut self, data: RgaSimulationData, now: DateTime<Utc>) {
        self.rga_simulation_data_agent = Some(data);
        self.updated_at = now;
    }
}
