use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::domain::{
    CompletedDecision, EntrepriseAmo, EntrepriseAmoId, ValidationAmo, ValidationAmoId,
    ValidationToken,
};
use crate::workflows::parcours::domain::ParcoursId;
use crate::workflows::parcours::repository::RepositoryError;

/// Storage for accompaniment requests. Implementations must make both
/// conditional writes atomic with respect to concurrent callers.
#[async_trait]
pub trait ValidationRepository: Send + Sync {
    /// Fails with `RepositoryError::Conflict` when the parcours already has
    /// an `EN_ATTENTE` record.
    async fn insert_pending(&self, record: ValidationAmo) -> Result<ValidationAmo, RepositoryError>;

    async fn fetch_by_token(
        &self,
        token: &ValidationToken,
    ) -> Result<Option<ValidationAmo>, RepositoryError>;

    /// Applies the decision only if the record is still pending and its token
    /// unused; otherwise `RepositoryError::Conflict`.
    async fn complete(
        &self,
        id: &ValidationAmoId,
        decision: CompletedDecision,
    ) -> Result<ValidationAmo, RepositoryError>;

    async fn latest_for_parcours(
        &self,
        parcours_id: &ParcoursId,
    ) -> Result<Option<ValidationAmo>, RepositoryError>;

    async fn list_for_entreprise(
        &self,
        entreprise_id: &EntrepriseAmoId,
    ) -> Result<Vec<ValidationAmo>, RepositoryError>;

    async fn delete_for_parcours(&self, parcours_id: &ParcoursId) -> Result<usize, RepositoryError>;
}

/// Read access to the referential of AMO organisations.
#[async_trait]
pub trait AmoDirectory: Send + Sync {
    async fn fetch(&self, id: &EntrepriseAmoId) -> Result<Option<EntrepriseAmo>, RepositoryError>;
}

/// Outbound e-mail hook towards AMO organisations.
#[async_trait]
pub trait AmoNotifier: Send + Sync {
    async fn notify(&self, notification: AmoNotification) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmoNotification {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("e-mail transport unavailable: {0}")]
    Transport(String),
    #[error("no recipient configured for the organisation")]
    NoRecipient,
}
