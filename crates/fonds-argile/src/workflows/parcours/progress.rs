use std::collections::BTreeMap;

use serde::Serialize;

use super::amo::{StatutValidationAmo, ValidationAmo};
use super::domain::{
    reconcile_status, DsStatus, ParcoursId, ParcoursPrevention, Status, Step, STEP_ORDER,
};
use super::simulation::RgaSimulationData;

/// Agent-authored data always supersedes the citizen's own answers.
pub fn effective<T>(original: Option<T>, agent_override: Option<T>) -> Option<T> {
    agent_override.or(original)
}

/// Latest case statuses fetched from Démarches Simplifiées, by step.
pub type ExternalStatuses = BTreeMap<Step, DsStatus>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockReason {
    AmoRefused,
    LogementNonEligible,
    DossierRefuse,
    DossierClasseSansSuite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulationSource {
    Citizen,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSummary {
    pub step: Step,
    pub label: &'static str,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ds_status: Option<DsStatus>,
}

/// Single "where is this citizen" answer shared by every front-end.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressView {
    pub parcours_id: ParcoursId,
    pub current_step: Step,
    pub status: Status,
    pub is_complete: bool,
    pub next_step: Option<Step>,
    pub blocked: Option<BlockReason>,
    /// Set when the external filing system could not be read and the
    /// statuses are the last ones recorded locally.
    pub stale: bool,
    pub amo_validation: Option<StatutValidationAmo>,
    pub simulation_source: Option<SimulationSource>,
    pub simulation: Option<RgaSimulationData>,
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProgressResolution {
    Found(Box<ProgressView>),
    NotFound,
}

impl ProgressResolution {
    pub fn view(&self) -> Option<&ProgressView> {
        match self {
            ProgressResolution::Found(view) => Some(view),
            ProgressResolution::NotFound => None,
        }
    }
}

fn known_ds_status(
    parcours: &ParcoursPrevention,
    external: &ExternalStatuses,
    step: Step,
) -> Option<DsStatus> {
    let stored = parcours.state(step).dossier?.ds_status;
    match external.get(&step) {
        Some(DsStatus::NonAccessible) | None => Some(stored),
        Some(fresh) => Some(*fresh),
    }
}

fn amo_block(validation: Option<&ValidationAmo>) -> Option<BlockReason> {
    match validation.map(|validation| validation.statut) {
        Some(StatutValidationAmo::AccompagnementRefuse) => Some(BlockReason::AmoRefused),
        Some(StatutValidationAmo::LogementNonEligible) => Some(BlockReason::LogementNonEligible),
        _ => None,
    }
}

pub fn resolve_progress(
    parcours: Option<&ParcoursPrevention>,
    external: &ExternalStatuses,
    latest_validation: Option<&ValidationAmo>,
    stale: bool,
) -> ProgressResolution {
    let Some(parcours) = parcours else {
        return ProgressResolution::NotFound;
    };

    let steps: Vec<StepSummary> = STEP_ORDER
        .into_iter()
        .map(|step| {
            let ds_status = known_ds_status(parcours, external, step);
            let local = parcours.status_of(step);
            let status = match external.get(&step) {
                Some(fresh) if ds_status.is_some() => reconcile_status(local, *fresh),
                _ => local,
            };
            StepSummary {
                step,
                label: step.label(),
                status,
                ds_status,
            }
        })
        .collect();

    let current = steps.iter().find(|summary| summary.status != Status::Valide);
    let (current_step, status, is_complete, blocked) = match current {
        Some(summary) => {
            let blocked = match summary.step {
                Step::ChoixAmo => amo_block(latest_validation),
                _ => match summary.ds_status {
                    Some(DsStatus::Refuse) => Some(BlockReason::DossierRefuse),
                    Some(DsStatus::ClasseSansSuite) => Some(BlockReason::DossierClasseSansSuite),
                    _ => None,
                },
            };
            (summary.step, summary.status, false, blocked)
        }
        None => (Step::last(), Status::Valide, true, None),
    };

    let simulation_source = match (
        &parcours.rga_simulation_data_agent,
        &parcours.rga_simulation_data,
    ) {
        (Some(_), _) => Some(SimulationSource::Agent),
        (None, Some(_)) => Some(SimulationSource::Citizen),
        (None, None) => None,
    };

    ProgressResolution::Found(Box::new(ProgressView {
        parcours_id: parcours.id.clone(),
        current_step,
        status,
        is_complete,
        next_step: if is_complete { None } else { current_step.next() },
        blocked,
        stale,
        amo_validation: latest_validation.map(|validation| validation.statut),
        simulation_source,
        simulation: parcours.effective_simulation().cloned(),
        steps,
    }))
}
