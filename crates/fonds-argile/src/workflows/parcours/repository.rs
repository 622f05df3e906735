use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{DeletionReason, ParcoursId, ParcoursPrevention};
use crate::auth::UserId;

/// Storage abstraction for parcours, one per citizen.
#[async_trait]
pub trait ParcoursRepository: Send + Sync {
    /// Fails with `RepositoryError::Conflict` when the user already owns a parcours.
    async fn insert(&self, parcours: ParcoursPrevention) -> Result<ParcoursPrevention, RepositoryError>;
    /// Conditional write: fails with `RepositoryError::Conflict` unless
    /// `parcours.version` is the stored one. Returns the record as stored,
    /// with its new version.
    async fn update(&self, parcours: ParcoursPrevention) -> Result<ParcoursPrevention, RepositoryError>;
    async fn fetch(&self, id: &ParcoursId) -> Result<Option<ParcoursPrevention>, RepositoryError>;
    async fn fetch_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<ParcoursPrevention>, RepositoryError>;
    /// Hard delete, leaving only the erasure trace behind.
    async fn erase(
        &self,
        id: &ParcoursId,
        reason: DeletionReason,
        at: DateTime<Utc>,
    ) -> Result<ErasureRecord, RepositoryError>;
}

const UPDATE_ATTEMPTS: usize = 3;

/// Read-modify-write on a fresh copy of the parcours. When another writer got
/// in between, `change` is applied again to the newer record.
pub async fn update_with<F, E>(
    repository: &dyn ParcoursRepository,
    id: &ParcoursId,
    mut change: F,
) -> Result<ParcoursPrevention, E>
where
    F: FnMut(&mut ParcoursPrevention) -> Result<(), E> + Send,
    E: From<RepositoryError> + Send,
{
    for _ in 0..UPDATE_ATTEMPTS {
        let mut parcours = repository
            .fetch(id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        change(&mut parcours)?;
        match repository.update(parcours).await {
            Err(RepositoryError::Conflict) => continue,
            outcome => return Ok(outcome?),
        }
    }
    Err(RepositoryError::Conflict.into())
}

/// What remains of an erased parcours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureRecord {
    pub parcours_id: ParcoursId,
    pub user_id: UserId,
    pub reason: DeletionReason,
    pub erased_at: DateTime<Utc>,
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
