use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::domain::{
    normalize_comment, AmoDecision, ApplicantInfo, CompletedDecision, EntrepriseAmo,
    EntrepriseAmoId, StatutValidationAmo, ValidationAmo, ValidationAmoId, ValidationToken,
};
use super::repository::{AmoDirectory, AmoNotification, AmoNotifier, ValidationRepository};
use crate::auth::{has_permission, AuthUser, Permission, UserRole};
use crate::workflows::parcours::domain::{ParcoursId, ParcoursPrevention, Status, Step};
use crate::workflows::parcours::repository::{update_with, ParcoursRepository, RepositoryError};

/// Error raised by the AMO validation workflow.
#[derive(Debug, thiserror::Error)]
pub enum AmoValidationError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("validation request not found")]
    NotFound,
    #[error("{0}")]
    Conflict(String),
    #[error("not allowed to act on this validation request")]
    Forbidden,
    #[error(transparent)]
    Repository(RepositoryError),
}

impl AmoValidationError {
    pub const fn code(&self) -> &'static str {
        match self {
            AmoValidationError::InvalidInput(_) => "INVALID_INPUT",
            AmoValidationError::NotFound => "NOT_FOUND",
            AmoValidationError::Conflict(_) => "CONFLICT",
            AmoValidationError::Forbidden => "FORBIDDEN",
            AmoValidationError::Repository(_) => "STORAGE_UNAVAILABLE",
        }
    }
}

impl From<RepositoryError> for AmoValidationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => Self::NotFound,
            RepositoryError::Conflict => Self::Conflict("validation request changed concurrently".to_string()),
            other => Self::Repository(other),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AmoSelection {
    pub validation_id: ValidationAmoId,
    #[serde(serialize_with = "serialize_token")]
    pub token: ValidationToken,
    pub message: String,
    pub notification_sent: bool,
}

fn serialize_token<S>(token: &ValidationToken, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(token.as_str())
}

#[derive(Debug, Clone, Serialize)]
pub struct AmoDecisionOutcome {
    pub validation_id: ValidationAmoId,
    pub statut: StatutValidationAmo,
    pub message: String,
}

/// Dashboard row. The decision token is only shown to agents of the
/// organisation that owns the request.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationAmoView {
    pub validation_id: ValidationAmoId,
    pub parcours_id: ParcoursId,
    pub entreprise_amo_id: EntrepriseAmoId,
    pub statut: StatutValidationAmo,
    pub statut_label: &'static str,
    pub applicant: ApplicantInfo,
    pub commentaire: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
    pub decided_at: Option<chrono::DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl ValidationAmoView {
    fn from_record(record: ValidationAmo, show_token: bool) -> Self {
        let token = (show_token && record.accepts_decision()).then(|| record.token.as_str().to_string());
        Self {
            validation_id: record.id,
            parcours_id: record.parcours_id,
            entreprise_amo_id: record.entreprise_amo_id,
            statut: record.statut,
            statut_label: record.statut.label(),
            applicant: record.applicant,
            commentaire: record.commentaire,
            created_at: record.created_at,
            decided_at: record.decided_at,
            token,
        }
    }
}

/// Service driving accompaniment requests from selection to decision.
pub struct AmoValidationService {
    parcours: Arc<dyn ParcoursRepository>,
    validations: Arc<dyn ValidationRepository>,
    directory: Arc<dyn AmoDirectory>,
    notifier: Arc<dyn AmoNotifier>,
    link_base_url: String,
}

impl AmoValidationService {
    pub fn new(
        parcours: Arc<dyn ParcoursRepository>,
        validations: Arc<dyn ValidationRepository>,
        directory: Arc<dyn AmoDirectory>,
        notifier: Arc<dyn AmoNotifier>,
        link_base_url: impl Into<String>,
    ) -> Self {
        Self {
            parcours,
            validations,
            directory,
            notifier,
            link_base_url: link_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn modify<F>(&self, id: &ParcoursId, change: F) -> Result<ParcoursPrevention, AmoValidationError>
    where
        F: FnMut(&mut ParcoursPrevention) -> Result<(), AmoValidationError> + Send,
    {
        update_with(self.parcours.as_ref(), id, change).await
    }

    /// Citizen picks an AMO for their parcours. At most one request may be
    /// pending per parcours; the storage layer enforces it.
    pub async fn select_amo(
        &self,
        actor: &AuthUser,
        parcours_id: &ParcoursId,
        entreprise_id: &EntrepriseAmoId,
        applicant: ApplicantInfo,
    ) -> Result<AmoSelection, AmoValidationError> {
        if !has_permission(actor.role, Permission::ParcoursWriteOwn) {
            return Err(AmoValidationError::Forbidden);
        }
        applicant
            .validate()
            .map_err(|reason| AmoValidationError::InvalidInput(reason.to_string()))?;

        let parcours = self
            .parcours
            .fetch(parcours_id)
            .await?
            .ok_or(AmoValidationError::NotFound)?;
        if parcours.user_id != actor.user_id {
            return Err(AmoValidationError::Forbidden);
        }
        if parcours.status_of(Step::ChoixAmo) == Status::Valide {
            return Err(AmoValidationError::Conflict(
                "an AMO has already validated this parcours".to_string(),
            ));
        }
        if let Some(latest) = self.validations.latest_for_parcours(parcours_id).await? {
            match latest.statut {
                StatutValidationAmo::EnAttente => {
                    return Err(AmoValidationError::Conflict(
                        "a request is already pending".to_string(),
                    ))
                }
                StatutValidationAmo::LogementNonEligible => {
                    return Err(AmoValidationError::Conflict(
                        "the logement was declared not eligible".to_string(),
                    ))
                }
                StatutValidationAmo::LogementEligible | StatutValidationAmo::AccompagnementRefuse => {}
            }
        }

        let Some(simulation) = parcours.effective_simulation() else {
            return Err(AmoValidationError::InvalidInput(
                "a completed simulation is required before choosing an AMO".to_string(),
            ));
        };
        let entreprise = self
            .directory
            .fetch(entreprise_id)
            .await?
            .ok_or(AmoValidationError::NotFound)?;
        if !entreprise.covers(&simulation.logement) {
            return Err(AmoValidationError::InvalidInput(format!(
                "{} does not cover this commune",
                entreprise.nom
            )));
        }

        let now = Utc::now();
        let record = ValidationAmo::pending(parcours_id.clone(), entreprise_id.clone(), applicant, now);
        let stored = self
            .validations
            .insert_pending(record)
            .await
            .map_err(|err| match err {
                RepositoryError::Conflict => {
                    AmoValidationError::Conflict("a request is already pending".to_string())
                }
                other => AmoValidationError::Repository(other),
            })?;

        if parcours.status_of(Step::ChoixAmo) == Status::Todo {
            let started = self
                .modify(parcours_id, |parcours| {
                    if parcours.status_of(Step::ChoixAmo) == Status::Todo {
                        parcours
                            .start_instruction(Step::ChoixAmo, now)
                            .map_err(|err| AmoValidationError::Conflict(err.to_string()))?;
                    }
                    Ok(())
                })
                .await;
            if let Err(err) = started {
                warn!(parcours_id = %parcours_id.0, %err, "choix AMO step not moved to instruction");
            }
        }

        let notification_sent = self.dispatch_notification(&entreprise, &stored).await;
        info!(
            parcours_id = %parcours_id.0,
            entreprise = %entreprise_id.0,
            notification_sent,
            "accompaniment request created"
        );

        Ok(AmoSelection {
            validation_id: stored.id,
            token: stored.token,
            message: format!(
                "Votre demande d'accompagnement a été transmise à {}.",
                entreprise.nom
            ),
            notification_sent,
        })
    }

    /// Best effort: a failed e-mail never rolls back the request.
    async fn dispatch_notification(&self, entreprise: &EntrepriseAmo, record: &ValidationAmo) -> bool {
        let link = format!(
            "{}/amo/validation/{}",
            self.link_base_url,
            record.token.as_str()
        );
        let applicant = &record.applicant;
        let notification = AmoNotification {
            recipients: entreprise.emails.clone(),
            subject: format!(
                "Nouvelle demande d'accompagnement - {} {}",
                applicant.prenom, applicant.nom
            ),
            body: format!(
                "Bonjour,\n\n{} {} ({}) sollicite {} pour l'accompagner dans son parcours Fonds Prévention Argile.\n\nPour répondre à cette demande : {}\n",
                applicant.prenom, applicant.nom, applicant.email, entreprise.nom, link
            ),
        };

        match self.notifier.notify(notification).await {
            Ok(()) => true,
            Err(err) => {
                warn!(entreprise = %entreprise.id.0, %err, "AMO notification failed");
                false
            }
        }
    }

    /// AMO answer from the decision link. The token works exactly once.
    pub async fn decide_validation(
        &self,
        actor: &AuthUser,
        token: &ValidationToken,
        decision: AmoDecision,
        comment: Option<String>,
    ) -> Result<AmoDecisionOutcome, AmoValidationError> {
        let record = self
            .validations
            .fetch_by_token(token)
            .await?
            .filter(ValidationAmo::accepts_decision)
            .ok_or(AmoValidationError::NotFound)?;

        if !has_permission(actor.role, Permission::ValidationsDecide)
            || !actor.belongs_to(&record.entreprise_amo_id)
        {
            return Err(AmoValidationError::Forbidden);
        }
        let commentaire = normalize_comment(comment)
            .map_err(|reason| AmoValidationError::InvalidInput(reason.to_string()))?;

        let now = Utc::now();
        let decided = self
            .validations
            .complete(
                &record.id,
                CompletedDecision {
                    statut: decision.outcome(),
                    commentaire,
                    decided_by: actor.user_id.clone(),
                    decided_at: now,
                },
            )
            .await
            .map_err(|err| match err {
                RepositoryError::Conflict | RepositoryError::NotFound => AmoValidationError::NotFound,
                other => AmoValidationError::Repository(other),
            })?;

        // The decision is already committed. A lost parcours write is made
        // up for by the next progress read.
        if decided.statut == StatutValidationAmo::LogementEligible {
            let validated = self
                .modify(&decided.parcours_id, |parcours| {
                    if parcours.status_of(Step::ChoixAmo) != Status::Valide {
                        parcours
                            .validate_step(Step::ChoixAmo, now)
                            .map_err(|err| AmoValidationError::Conflict(err.to_string()))?;
                    }
                    Ok(())
                })
                .await;
            if let Err(err) = validated {
                warn!(parcours_id = %decided.parcours_id.0, %err, "choix AMO not validated yet");
            }
        }

        info!(
            parcours_id = %decided.parcours_id.0,
            statut = ?decided.statut,
            "accompaniment request decided"
        );

        let message = match decided.statut {
            StatutValidationAmo::LogementEligible => "L'accompagnement est confirmé, le demandeur peut poursuivre son parcours.",
            StatutValidationAmo::LogementNonEligible => "Le logement a été déclaré non éligible.",
            StatutValidationAmo::AccompagnementRefuse => "La demande d'accompagnement a été refusée.",
            StatutValidationAmo::EnAttente => "La demande reste en attente.",
        };

        Ok(AmoDecisionOutcome {
            validation_id: decided.id,
            statut: decided.statut,
            message: message.to_string(),
        })
    }

    /// Requests of one organisation, pending first then newest first.
    /// AMO agents only ever see their own organisation.
    pub async fn list_validations(
        &self,
        actor: &AuthUser,
        entreprise_id: Option<&EntrepriseAmoId>,
        statut: Option<StatutValidationAmo>,
    ) -> Result<Vec<ValidationAmoView>, AmoValidationError> {
        if !has_permission(actor.role, Permission::ValidationsView) {
            return Err(AmoValidationError::Forbidden);
        }

        let entreprise_id = match (actor.role, entreprise_id, actor.entreprise_amo_id.as_ref()) {
            (UserRole::Amo, None, Some(own)) => own.clone(),
            (UserRole::Amo, Some(requested), Some(own)) if requested == own => own.clone(),
            (UserRole::Amo, _, _) => return Err(AmoValidationError::Forbidden),
            (_, Some(requested), _) => requested.clone(),
            (_, None, _) => {
                return Err(AmoValidationError::InvalidInput(
                    "entreprise_amo_id is required".to_string(),
                ))
            }
        };

        let mut records = self.validations.list_for_entreprise(&entreprise_id).await?;
        if let Some(statut) = statut {
            records.retain(|record| record.statut == statut);
        }
        records.sort_by(|a, b| {
            b.is_active()
                .cmp(&a.is_active())
                .then_with(|| b.created_at.cmp(&a.created_at))
        });

        let show_token = actor.belongs_to(&entreprise_id);
        Ok(records
            .into_iter()
            .map(|record| ValidationAmoView::from_record(record, show_token))
            .collect())
    }

    pub async fn latest_for_parcours(
        &self,
        parcours_id: &ParcoursId,
    ) -> Result<Option<ValidationAmo>, AmoValidationError> {
        Ok(self.validations.latest_for_parcours(parcours_id).await?)
    }
}
