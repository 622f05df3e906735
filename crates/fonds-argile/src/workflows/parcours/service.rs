use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::amo::{StatutValidationAmo, ValidationAmo, ValidationRepository};
use super::domain::{DeletionReason, ParcoursError, ParcoursId, ParcoursPrevention, Status, Step};
use super::dossier::{DossierClient, DossierError, DossierSubmission};
use super::progress::{resolve_progress, ExternalStatuses, ProgressResolution};
use super::repository::{update_with, ErasureRecord, ParcoursRepository, RepositoryError};
use super::simulation::{PartialRgaSimulationData, RgaSimulationData};
use crate::auth::{has_permission, AuthUser, Permission, UserRole};

/// Error raised by the parcours service.
#[derive(Debug, thiserror::Error)]
pub enum ParcoursServiceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("parcours not found")]
    NotFound,
    #[error("{0}")]
    Conflict(String),
    #[error("not allowed to act on this parcours")]
    Forbidden,
    #[error(transparent)]
    Step(#[from] ParcoursError),
    #[error("external filing system unavailable: {0}")]
    ExternalSystemUnavailable(DossierError),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl ParcoursServiceError {
    pub const fn code(&self) -> &'static str {
        match self {
            ParcoursServiceError::InvalidInput(_) => "INVALID_INPUT",
            ParcoursServiceError::NotFound => "NOT_FOUND",
            ParcoursServiceError::Conflict(_) | ParcoursServiceError::Step(_) => "CONFLICT",
            ParcoursServiceError::Forbidden => "FORBIDDEN",
            ParcoursServiceError::ExternalSystemUnavailable(_) => "EXTERNAL_SYSTEM_UNAVAILABLE",
            ParcoursServiceError::Repository(_) => "STORAGE_UNAVAILABLE",
        }
    }
}

impl From<RepositoryError> for ParcoursServiceError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => Self::NotFound,
            RepositoryError::Conflict => Self::Conflict("parcours changed concurrently".to_string()),
            other => Self::Repository(other),
        }
    }
}

impl From<DossierError> for ParcoursServiceError {
    fn from(value: DossierError) -> Self {
        match value {
            DossierError::Rejected(reason) => Self::InvalidInput(reason),
            unavailable => Self::ExternalSystemUnavailable(unavailable),
        }
    }
}

/// A recorded LOGEMENT_ELIGIBLE decision validates CHOIX_AMO, including when
/// the parcours write that follows the decision was lost.
fn settle_choix_amo(
    parcours: &mut ParcoursPrevention,
    latest: Option<&ValidationAmo>,
    now: DateTime<Utc>,
) -> bool {
    let accepted = latest.is_some_and(|validation| validation.statut == StatutValidationAmo::LogementEligible);
    accepted
        && parcours.status_of(Step::ChoixAmo) != Status::Valide
        && parcours.validate_step(Step::ChoixAmo, now).is_ok()
}

/// Service owning the citizen journey and its reconciliation with
/// Démarches Simplifiées.
pub struct ParcoursService {
    parcours: Arc<dyn ParcoursRepository>,
    validations: Arc<dyn ValidationRepository>,
    dossiers: Arc<dyn DossierClient>,
}

impl ParcoursService {
    pub fn new(
        parcours: Arc<dyn ParcoursRepository>,
        validations: Arc<dyn ValidationRepository>,
        dossiers: Arc<dyn DossierClient>,
    ) -> Self {
        Self {
            parcours,
            validations,
            dossiers,
        }
    }

    fn require(actor: &AuthUser, permission: Permission) -> Result<(), ParcoursServiceError> {
        if has_permission(actor.role, permission) {
            Ok(())
        } else {
            Err(ParcoursServiceError::Forbidden)
        }
    }

    fn promote(partial: PartialRgaSimulationData) -> Result<RgaSimulationData, ParcoursServiceError> {
        RgaSimulationData::from_partial(partial, Utc::now())
            .map_err(|err| ParcoursServiceError::InvalidInput(err.to_string()))
    }

    async fn load(&self, id: &ParcoursId) -> Result<ParcoursPrevention, ParcoursServiceError> {
        self.parcours
            .fetch(id)
            .await?
            .ok_or(ParcoursServiceError::NotFound)
    }

    async fn modify<F>(&self, id: &ParcoursId, change: F) -> Result<ParcoursPrevention, ParcoursServiceError>
    where
        F: FnMut(&mut ParcoursPrevention) -> Result<(), ParcoursServiceError> + Send,
    {
        update_with(self.parcours.as_ref(), id, change).await
    }

    async fn load_own(&self, actor: &AuthUser) -> Result<ParcoursPrevention, ParcoursServiceError> {
        self.parcours
            .fetch_by_user(&actor.user_id)
            .await?
            .ok_or(ParcoursServiceError::NotFound)
    }

    /// Account creation without any simulation yet.
    pub async fn create_parcours(
        &self,
        actor: &AuthUser,
    ) -> Result<ParcoursPrevention, ParcoursServiceError> {
        Self::require(actor, Permission::ParcoursWriteOwn)?;
        let parcours = ParcoursPrevention::new(actor.user_id.clone(), None, Utc::now());
        let stored = self.parcours.insert(parcours).await.map_err(|err| match err {
            RepositoryError::Conflict => {
                ParcoursServiceError::Conflict("a parcours already exists for this account".to_string())
            }
            other => other.into(),
        })?;
        info!(parcours_id = %stored.id.0, "parcours created");
        Ok(stored)
    }

    /// Stores the citizen's simulation, creating the parcours on first use.
    /// Answers are frozen once the AMO has validated the logement.
    pub async fn submit_simulation(
        &self,
        actor: &AuthUser,
        partial: PartialRgaSimulationData,
    ) -> Result<ParcoursPrevention, ParcoursServiceError> {
        Self::require(actor, Permission::SimulationSubmit)?;
        let simulation = Self::promote(partial)?;
        let now = Utc::now();

        match self.parcours.fetch_by_user(&actor.user_id).await? {
            Some(existing) => {
                self.modify(&existing.id, |parcours| {
                    if parcours.status_of(Step::ChoixAmo) == Status::Valide {
                        return Err(ParcoursServiceError::Conflict(
                            "the simulation can no longer be changed".to_string(),
                        ));
                    }
                    parcours.rga_simulation_data = Some(simulation.clone());
                    parcours.updated_at = now;
                    Ok(())
                })
                .await
            }
            None => {
                let parcours = ParcoursPrevention::new(actor.user_id.clone(), Some(simulation), now);
                let stored = self.parcours.insert(parcours).await?;
                info!(parcours_id = %stored.id.0, "parcours created from simulation");
                Ok(stored)
            }
        }
    }

    /// Progress of the actor's own parcours.
    pub async fn progress_for(&self, actor: &AuthUser) -> Result<ProgressResolution, ParcoursServiceError> {
        Self::require(actor, Permission::ParcoursReadOwn)?;
        match self.parcours.fetch_by_user(&actor.user_id).await? {
            Some(parcours) => self.reconcile_and_resolve(parcours).await,
            None => Ok(ProgressResolution::NotFound),
        }
    }

    /// Progress of any parcours, for agents following a file. AMO agents
    /// only see parcours whose latest request went to their organisation.
    pub async fn progress_of(
        &self,
        actor: &AuthUser,
        id: &ParcoursId,
    ) -> Result<ProgressResolution, ParcoursServiceError> {
        Self::require(actor, Permission::DossiersView)?;
        let Some(parcours) = self.parcours.fetch(id).await? else {
            return Ok(ProgressResolution::NotFound);
        };
        if actor.role == UserRole::Amo {
            let latest = self.validations.latest_for_parcours(id).await?;
            if !latest.is_some_and(|validation| actor.belongs_to(&validation.entreprise_amo_id)) {
                return Err(ParcoursServiceError::Forbidden);
            }
        }
        self.reconcile_and_resolve(parcours).await
    }

    /// Reads the case of the current step, folds its status in and keeps
    /// going while accepted cases advance the journey. An unreachable
    /// filing system leaves the last recorded statuses in place.
    async fn reconcile_and_resolve(
        &self,
        mut parcours: ParcoursPrevention,
    ) -> Result<ProgressResolution, ParcoursServiceError> {
        let mut external = ExternalStatuses::new();
        let mut stale = false;
        let now = Utc::now();
        let latest = self.validations.latest_for_parcours(&parcours.id).await?;
        let mut changed = settle_choix_amo(&mut parcours, latest.as_ref(), now);

        while !parcours.is_complete() {
            let step = parcours.current_step();
            let Some(dossier) = parcours.state(step).dossier else {
                break;
            };
            match self.dossiers.get_case_status(&dossier.numero).await {
                Ok(status) => {
                    debug!(parcours_id = %parcours.id.0, ?step, ?status, "case status fetched");
                    external.insert(step, status);
                    changed |= parcours.apply_ds_status(step, status, now);
                    if parcours.current_step() == step {
                        break;
                    }
                }
                Err(err) => {
                    warn!(parcours_id = %parcours.id.0, ?step, %err, "falling back to local status");
                    stale = true;
                    break;
                }
            }
        }

        if changed {
            let id = parcours.id.clone();
            let stored = self
                .modify(&id, |fresh| {
                    settle_choix_amo(fresh, latest.as_ref(), now);
                    for (step, status) in &external {
                        fresh.apply_ds_status(*step, *status, now);
                    }
                    Ok(())
                })
                .await;
            parcours = match stored {
                Ok(stored) => stored,
                Err(ParcoursServiceError::NotFound) => return Ok(ProgressResolution::NotFound),
                Err(err) => return Err(err),
            };
            info!(parcours_id = %parcours.id.0, current = ?parcours.current_step(), "parcours reconciled");
        }

        Ok(resolve_progress(
            Some(&parcours),
            &external,
            latest.as_ref(),
            stale,
        ))
    }

    /// Files (or re-files) the case for the actor's current step.
    pub async fn submit_step(
        &self,
        actor: &AuthUser,
        step: Step,
        champs: Value,
    ) -> Result<ParcoursPrevention, ParcoursServiceError> {
        Self::require(actor, Permission::ParcoursWriteOwn)?;
        if !step.has_dossier() {
            return Err(ParcoursError::NoDossierForStep(step).into());
        }
        if !champs.is_object() {
            return Err(ParcoursServiceError::InvalidInput(
                "champs must be an object".to_string(),
            ));
        }

        let parcours = self.load_own(actor).await?;
        let current = parcours.current_step();
        if step != current || parcours.is_complete() {
            return Err(ParcoursError::OutOfOrder {
                requested: step,
                current,
            }
            .into());
        }
        let simulation = parcours.effective_simulation().cloned();
        if step == Step::Eligibilite && simulation.is_none() {
            return Err(ParcoursServiceError::InvalidInput(
                "a completed simulation is required for the eligibility case".to_string(),
            ));
        }

        let numero = self
            .dossiers
            .create_or_update_case(DossierSubmission {
                parcours_id: parcours.id.clone(),
                step,
                numero_existant: parcours.state(step).dossier.map(|dossier| dossier.numero),
                simulation,
                champs,
            })
            .await?;

        let now = Utc::now();
        let parcours = self
            .modify(&parcours.id, |parcours| {
                parcours.attach_dossier(step, numero.clone(), now)?;
                Ok(())
            })
            .await?;
        info!(parcours_id = %parcours.id.0, ?step, numero = %numero, "case filed");
        Ok(parcours)
    }

    /// Stores the agent-corrected simulation, which then takes precedence.
    /// AMO agents may only correct files their organisation accepted.
    pub async fn set_agent_override(
        &self,
        actor: &AuthUser,
        id: &ParcoursId,
        partial: PartialRgaSimulationData,
    ) -> Result<ParcoursPrevention, ParcoursServiceError> {
        Self::require(actor, Permission::SimulationOverride)?;
        self.load(id).await?;

        if actor.role == UserRole::Amo {
            let latest = self.validations.latest_for_parcours(id).await?;
            let accepted_by_actor = latest.is_some_and(|validation| {
                validation.statut == StatutValidationAmo::LogementEligible
                    && actor.belongs_to(&validation.entreprise_amo_id)
            });
            if !accepted_by_actor {
                return Err(ParcoursServiceError::Forbidden);
            }
        }

        let simulation = Self::promote(partial)?;
        let now = Utc::now();
        let parcours = self
            .modify(id, |parcours| {
                parcours.set_agent_simulation(simulation.clone(), now);
                Ok(())
            })
            .await?;
        info!(parcours_id = %id.0, agent = %actor.user_id.0, "agent simulation override stored");
        Ok(parcours)
    }

    /// Administrative override, the only way a journey moves backwards.
    /// Reopening CHOIX_AMO discards the accompaniment requests so the
    /// citizen can choose again.
    pub async fn admin_rewind(
        &self,
        actor: &AuthUser,
        id: &ParcoursId,
        step: Step,
    ) -> Result<ParcoursPrevention, ParcoursServiceError> {
        Self::require(actor, Permission::ParcoursRewind)?;
        self.load(id).await?;
        if step == Step::ChoixAmo {
            let removed = self.validations.delete_for_parcours(id).await?;
            info!(parcours_id = %id.0, removed, "accompaniment requests discarded");
        }
        let now = Utc::now();
        let parcours = self
            .modify(id, |parcours| {
                parcours.rewind_to(step, now);
                Ok(())
            })
            .await?;
        warn!(parcours_id = %id.0, ?step, admin = %actor.user_id.0, "parcours rewound");
        Ok(parcours)
    }

    /// RGPD erasure. Citizens may only erase their own parcours, and only as
    /// a user request.
    pub async fn erase(
        &self,
        actor: &AuthUser,
        id: &ParcoursId,
        reason: DeletionReason,
    ) -> Result<ErasureRecord, ParcoursServiceError> {
        Self::require(actor, Permission::ParcoursErase)?;
        let parcours = self.load(id).await?;
        if actor.role == UserRole::Particulier
            && (parcours.user_id != actor.user_id || reason != DeletionReason::UserRequest)
        {
            return Err(ParcoursServiceError::Forbidden);
        }

        let removed_validations = self.validations.delete_for_parcours(id).await?;
        let record = self.parcours.erase(id, reason, Utc::now()).await?;
        info!(
            parcours_id = %id.0,
            reason = reason.label(),
            removed_validations,
            "parcours erased"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::auth::UserId;
    use crate::workflows::parcours::amo::tests::common::{
        amo_agent, other_entreprise_id, pending_validation, CITIZEN,
    };
    use crate::workflows::parcours::amo::CompletedDecision;
    use crate::workflows::parcours::domain::DsStatus;
    use crate::workflows::parcours::memory::{
        InMemoryDossierClient, InMemoryParcoursRepository, InMemoryValidationRepository,
    };
    use crate::workflows::parcours::progress::{BlockReason, ProgressView, SimulationSource};
    use crate::workflows::parcours::simulation::tests::sample_simulation;
    use crate::workflows::parcours::simulation::Logement;

    struct Fixture {
        service: ParcoursService,
        parcours: Arc<InMemoryParcoursRepository>,
        validations: Arc<InMemoryValidationRepository>,
        dossiers: Arc<InMemoryDossierClient>,
    }

    fn fixture() -> Fixture {
        let parcours = Arc::new(InMemoryParcoursRepository::default());
        let validations = Arc::new(InMemoryValidationRepository::default());
        let dossiers = Arc::new(InMemoryDossierClient::default());
        Fixture {
            service: ParcoursService::new(parcours.clone(), validations.clone(), dossiers.clone()),
            parcours,
            validations,
            dossiers,
        }
    }

    fn citizen() -> AuthUser {
        AuthUser::particulier(CITIZEN)
    }

    fn admin() -> AuthUser {
        AuthUser::agent("admin-1", UserRole::Administrateur)
    }

    fn view(resolution: ProgressResolution) -> ProgressView {
        match resolution {
            ProgressResolution::Found(view) => *view,
            ProgressResolution::NotFound => panic!("expected a parcours"),
        }
    }

    /// Parcours with a stored simulation whose AMO has already accepted.
    async fn past_choix_amo(fixture: &Fixture) -> ParcoursPrevention {
        let mut parcours = fixture
            .service
            .submit_simulation(&citizen(), sample_simulation().to_partial())
            .await
            .expect("simulation stored");
        parcours.validate_step(Step::ChoixAmo, Utc::now()).unwrap();
        fixture.parcours.update(parcours).await.unwrap()
    }

    #[tokio::test]
    async fn one_parcours_per_account() {
        let fixture = fixture();
        fixture.service.create_parcours(&citizen()).await.expect("created");

        let second = fixture.service.create_parcours(&citizen()).await;
        assert!(matches!(second, Err(ParcoursServiceError::Conflict(_))));
    }

    #[tokio::test]
    async fn simulation_creates_then_updates_the_parcours() {
        let fixture = fixture();
        let created = fixture
            .service
            .submit_simulation(&citizen(), sample_simulation().to_partial())
            .await
            .unwrap();

        let mut changed = sample_simulation().to_partial();
        if let Some(logement) = changed.logement.as_mut() {
            logement.niveaux = Some(2);
        }
        let updated = fixture.service.submit_simulation(&citizen(), changed).await.unwrap();

        assert_eq!(created.id, updated.id);
        let stored = fixture.parcours.fetch(&created.id).await.unwrap().unwrap();
        assert_eq!(
            stored.rga_simulation_data.map(|data| data.logement.niveaux),
            Some(Some(2))
        );
    }

    #[tokio::test]
    async fn unusable_simulation_is_rejected() {
        let fixture = fixture();
        let mut partial = sample_simulation().to_partial();
        partial.logement = Some(Logement::default());

        let outcome = fixture.service.submit_simulation(&citizen(), partial).await;
        assert!(matches!(outcome, Err(ParcoursServiceError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn simulation_is_frozen_after_amo_acceptance() {
        let fixture = fixture();
        past_choix_amo(&fixture).await;

        let outcome = fixture
            .service
            .submit_simulation(&citizen(), sample_simulation().to_partial())
            .await;
        assert!(matches!(outcome, Err(ParcoursServiceError::Conflict(_))));
    }

    #[tokio::test]
    async fn progress_for_unknown_user_is_not_found() {
        let fixture = fixture();
        let resolution = fixture.service.progress_for(&citizen()).await.unwrap();
        assert_eq!(resolution, ProgressResolution::NotFound);
    }

    #[tokio::test]
    async fn accepted_case_is_reconciled_and_persisted() {
        let fixture = fixture();
        let parcours = past_choix_amo(&fixture).await;

        let filed = fixture
            .service
            .submit_step(&citizen(), Step::Eligibilite, json!({ "rib": "joint" }))
            .await
            .expect("case filed");
        let numero = filed.state(Step::Eligibilite).dossier.unwrap().numero;
        assert_eq!(filed.status_of(Step::Eligibilite), Status::EnInstruction);
        assert!(fixture.dossiers.submissions()[0].simulation.is_some());

        fixture.dossiers.set_status(&numero, DsStatus::Accepte);
        let view = view(fixture.service.progress_for(&citizen()).await.unwrap());
        assert_eq!(view.current_step, Step::Diagnostic);
        assert!(!view.stale);

        let stored = fixture.parcours.fetch(&parcours.id).await.unwrap().unwrap();
        assert_eq!(stored.status_of(Step::Eligibilite), Status::Valide);
        let dossier = stored.state(Step::Eligibilite).dossier.unwrap();
        assert_eq!(dossier.ds_status, DsStatus::Accepte);
    }

    #[tokio::test]
    async fn refused_case_blocks_the_journey() {
        let fixture = fixture();
        past_choix_amo(&fixture).await;
        let filed = fixture
            .service
            .submit_step(&citizen(), Step::Eligibilite, json!({}))
            .await
            .unwrap();
        let numero = filed.state(Step::Eligibilite).dossier.unwrap().numero;

        fixture.dossiers.set_status(&numero, DsStatus::Refuse);
        let view = view(fixture.service.progress_for(&citizen()).await.unwrap());
        assert_eq!(view.current_step, Step::Eligibilite);
        assert_eq!(view.status, Status::EnInstruction);
        assert_eq!(view.blocked, Some(BlockReason::DossierRefuse));
    }

    #[tokio::test]
    async fn unavailable_filing_system_falls_back_to_local_status() {
        let fixture = fixture();
        past_choix_amo(&fixture).await;
        fixture
            .service
            .submit_step(&citizen(), Step::Eligibilite, json!({}))
            .await
            .unwrap();

        fixture.dossiers.set_unavailable(true);
        let view = view(fixture.service.progress_for(&citizen()).await.unwrap());
        assert!(view.stale);
        assert_eq!(view.current_step, Step::Eligibilite);
        assert_eq!(view.status, Status::EnInstruction);
    }

    #[tokio::test]
    async fn filing_while_unavailable_reports_the_outage() {
        let fixture = fixture();
        past_choix_amo(&fixture).await;
        fixture.dossiers.set_unavailable(true);

        let outcome = fixture
            .service
            .submit_step(&citizen(), Step::Eligibilite, json!({}))
            .await;
        assert!(matches!(
            outcome,
            Err(ParcoursServiceError::ExternalSystemUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn steps_are_filed_in_order_only() {
        let fixture = fixture();
        past_choix_amo(&fixture).await;

        let ahead = fixture
            .service
            .submit_step(&citizen(), Step::Devis, json!({}))
            .await;
        assert!(matches!(
            ahead,
            Err(ParcoursServiceError::Step(ParcoursError::OutOfOrder {
                requested: Step::Devis,
                current: Step::Eligibilite
            }))
        ));

        let amo_step = fixture
            .service
            .submit_step(&citizen(), Step::ChoixAmo, json!({}))
            .await;
        assert!(matches!(
            amo_step,
            Err(ParcoursServiceError::Step(ParcoursError::NoDossierForStep(Step::ChoixAmo)))
        ));
    }

    #[tokio::test]
    async fn override_needs_the_accepting_amo_or_an_admin() {
        let fixture = fixture();
        let parcours = past_choix_amo(&fixture).await;
        let mut corrected = sample_simulation().to_partial();
        if let Some(logement) = corrected.logement.as_mut() {
            logement.annee_de_construction = Some("1962".to_string());
        }

        let outcome = fixture
            .service
            .set_agent_override(&amo_agent(), &parcours.id, corrected.clone())
            .await;
        assert!(matches!(outcome, Err(ParcoursServiceError::Forbidden)));

        let pending = fixture
            .validations
            .insert_pending(pending_validation(&parcours.id))
            .await
            .unwrap();
        fixture
            .validations
            .complete(
                &pending.id,
                CompletedDecision {
                    statut: StatutValidationAmo::LogementEligible,
                    commentaire: None,
                    decided_by: UserId("agent-indre".to_string()),
                    decided_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let updated = fixture
            .service
            .set_agent_override(&amo_agent(), &parcours.id, corrected)
            .await
            .expect("accepting AMO may correct the data");
        assert_eq!(
            updated
                .effective_simulation()
                .and_then(|data| data.logement.annee_de_construction.clone()),
            Some("1962".to_string())
        );

        let view = view(fixture.service.progress_for(&citizen()).await.unwrap());
        assert_eq!(view.simulation_source, Some(SimulationSource::Agent));

        let citizen_attempt = fixture
            .service
            .set_agent_override(&citizen(), &parcours.id, sample_simulation().to_partial())
            .await;
        assert!(matches!(citizen_attempt, Err(ParcoursServiceError::Forbidden)));

        fixture
            .service
            .set_agent_override(&admin(), &parcours.id, sample_simulation().to_partial())
            .await
            .expect("administrators may correct any file");
    }

    #[tokio::test]
    async fn rewind_is_the_only_way_back() {
        let fixture = fixture();
        let parcours = past_choix_amo(&fixture).await;

        let refused = fixture
            .service
            .admin_rewind(&citizen(), &parcours.id, Step::ChoixAmo)
            .await;
        assert!(matches!(refused, Err(ParcoursServiceError::Forbidden)));

        let rewound = fixture
            .service
            .admin_rewind(&admin(), &parcours.id, Step::ChoixAmo)
            .await
            .unwrap();
        assert_eq!(rewound.current_step(), Step::ChoixAmo);
        assert_eq!(rewound.status_of(Step::ChoixAmo), Status::Todo);
    }

    #[tokio::test]
    async fn citizens_erase_only_their_own_parcours() {
        let fixture = fixture();
        let parcours = past_choix_amo(&fixture).await;
        fixture
            .validations
            .insert_pending(pending_validation(&parcours.id))
            .await
            .unwrap();

        let stranger = AuthUser::particulier("someone-else");
        let outcome = fixture
            .service
            .erase(&stranger, &parcours.id, DeletionReason::UserRequest)
            .await;
        assert!(matches!(outcome, Err(ParcoursServiceError::Forbidden)));

        let outcome = fixture
            .service
            .erase(&citizen(), &parcours.id, DeletionReason::Expired)
            .await;
        assert!(matches!(outcome, Err(ParcoursServiceError::Forbidden)));

        let record = fixture
            .service
            .erase(&citizen(), &parcours.id, DeletionReason::UserRequest)
            .await
            .expect("own parcours erased");
        assert_eq!(record.reason, DeletionReason::UserRequest);
        assert!(fixture.parcours.fetch(&parcours.id).await.unwrap().is_none());
        assert!(fixture.validations.is_empty().unwrap());
        assert_eq!(fixture.parcours.erasures().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn administrators_record_the_deletion_reason() {
        let fixture = fixture();
        let parcours = fixture.service.create_parcours(&citizen()).await.unwrap();

        let record = fixture
            .service
            .erase(&admin(), &parcours.id, DeletionReason::SentToDs)
            .await
            .unwrap();
        assert_eq!(record.reason, DeletionReason::SentToDs);
        assert_eq!(record.user_id, UserId(CITIZEN.to_string()));
    }

    /// Lets an AMO acceptance land between the service's read and its write.
    struct AcceptingMidway {
        inner: Arc<InMemoryParcoursRepository>,
        raced: AtomicBool,
    }

    #[async_trait]
    impl ParcoursRepository for AcceptingMidway {
        async fn insert(&self, parcours: ParcoursPrevention) -> Result<ParcoursPrevention, RepositoryError> {
            self.inner.insert(parcours).await
        }

        async fn update(&self, parcours: ParcoursPrevention) -> Result<ParcoursPrevention, RepositoryError> {
            if !self.raced.swap(true, AtomicOrdering::SeqCst) {
                let mut accepted = self
                    .inner
                    .fetch(&parcours.id)
                    .await?
                    .ok_or(RepositoryError::NotFound)?;
                accepted
                    .validate_step(Step::ChoixAmo, Utc::now())
                    .map_err(|_| RepositoryError::Conflict)?;
                self.inner.update(accepted).await?;
            }
            self.inner.update(parcours).await
        }

        async fn fetch(&self, id: &ParcoursId) -> Result<Option<ParcoursPrevention>, RepositoryError> {
            self.inner.fetch(id).await
        }

        async fn fetch_by_user(
            &self,
            user_id: &UserId,
        ) -> Result<Option<ParcoursPrevention>, RepositoryError> {
            self.inner.fetch_by_user(user_id).await
        }

        async fn erase(
            &self,
            id: &ParcoursId,
            reason: DeletionReason,
            at: DateTime<Utc>,
        ) -> Result<ErasureRecord, RepositoryError> {
            self.inner.erase(id, reason, at).await
        }
    }

    #[tokio::test]
    async fn late_simulation_cannot_undo_a_concurrent_acceptance() {
        let inner = Arc::new(InMemoryParcoursRepository::default());
        let service = ParcoursService::new(
            Arc::new(AcceptingMidway {
                inner: inner.clone(),
                raced: AtomicBool::new(false),
            }),
            Arc::new(InMemoryValidationRepository::default()),
            Arc::new(InMemoryDossierClient::default()),
        );
        let seeded = inner
            .insert(ParcoursPrevention::new(
                UserId(CITIZEN.to_string()),
                Some(sample_simulation()),
                Utc::now(),
            ))
            .await
            .unwrap();

        let mut changed = sample_simulation().to_partial();
        if let Some(logement) = changed.logement.as_mut() {
            logement.niveaux = Some(3);
        }
        let outcome = service.submit_simulation(&citizen(), changed).await;
        assert!(matches!(outcome, Err(ParcoursServiceError::Conflict(_))));

        let stored = inner.fetch(&seeded.id).await.unwrap().unwrap();
        assert_eq!(stored.status_of(Step::ChoixAmo), Status::Valide);
        assert_eq!(stored.rga_simulation_data, seeded.rga_simulation_data);
    }

    #[tokio::test]
    async fn amo_agents_only_follow_files_sent_to_them() {
        let fixture = fixture();
        let parcours = fixture
            .service
            .submit_simulation(&citizen(), sample_simulation().to_partial())
            .await
            .unwrap();

        let unrelated = fixture.service.progress_of(&amo_agent(), &parcours.id).await;
        assert!(matches!(unrelated, Err(ParcoursServiceError::Forbidden)));

        fixture
            .validations
            .insert_pending(pending_validation(&parcours.id))
            .await
            .unwrap();
        let own = fixture
            .service
            .progress_of(&amo_agent(), &parcours.id)
            .await
            .expect("the requested AMO follows the file");
        assert!(matches!(own, ProgressResolution::Found(_)));

        let other = AuthUser::amo("agent-paris", other_entreprise_id());
        let foreign = fixture.service.progress_of(&other, &parcours.id).await;
        assert!(matches!(foreign, Err(ParcoursServiceError::Forbidden)));

        fixture
            .service
            .progress_of(&admin(), &parcours.id)
            .await
            .expect("administrators follow every file");
    }
}
