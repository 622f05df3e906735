//! In-process implementations of the storage and collaborator traits, used
//! by the development server, the demo and the tests. Each conditional write
//! runs under a single lock, which gives the same outcome as a uniqueness
//! constraint would in a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::amo::{
    AmoDirectory, AmoNotification, AmoNotifier, CompletedDecision, EntrepriseAmo, EntrepriseAmoId,
    NotificationError, ValidationAmo, ValidationAmoId, ValidationRepository, ValidationToken,
};
use super::domain::{DeletionReason, DsStatus, ParcoursId, ParcoursPrevention};
use super::dossier::{DossierClient, DossierError, DossierSubmission};
use super::repository::{ErasureRecord, ParcoursRepository, RepositoryError};
use crate::auth::UserId;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, RepositoryError> {
    mutex
        .lock()
        .map_err(|_| RepositoryError::Unavailable("in-memory store poisoned".to_string()))
}

#[derive(Default)]
pub struct InMemoryParcoursRepository {
    records: Mutex<HashMap<ParcoursId, ParcoursPrevention>>,
    erasures: Mutex<Vec<ErasureRecord>>,
    failing_updates: AtomicBool,
}

impl InMemoryParcoursRepository {
    /// Makes every `update` fail as an unreachable database would.
    pub fn set_failing_updates(&self, failing: bool) {
        self.failing_updates.store(failing, Ordering::Release);
    }

    pub fn erasures(&self) -> Result<Vec<ErasureRecord>, RepositoryError> {
        Ok(lock(&self.erasures)?.clone())
    }
}

#[async_trait]
impl ParcoursRepository for InMemoryParcoursRepository {
    async fn insert(&self, parcours: ParcoursPrevention) -> Result<ParcoursPrevention, RepositoryError> {
        let mut guard = lock(&self.records)?;
        let taken = guard.contains_key(&parcours.id)
            || guard.values().any(|existing| existing.user_id == parcours.user_id);
        if taken {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(parcours.id.clone(), parcours.clone());
        Ok(parcours)
    }

    async fn update(&self, parcours: ParcoursPrevention) -> Result<ParcoursPrevention, RepositoryError> {
        if self.failing_updates.load(Ordering::Acquire) {
            return Err(RepositoryError::Unavailable("parcours store offline".to_string()));
        }
        let mut guard = lock(&self.records)?;
        let existing = guard.get_mut(&parcours.id).ok_or(RepositoryError::NotFound)?;
        if existing.version != parcours.version {
            return Err(RepositoryError::Conflict);
        }
        let mut stored = parcours;
        stored.version += 1;
        *existing = stored.clone();
        Ok(stored)
    }

    async fn fetch(&self, id: &ParcoursId) -> Result<Option<ParcoursPrevention>, RepositoryError> {
        Ok(lock(&self.records)?.get(id).cloned())
    }

    async fn fetch_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<ParcoursPrevention>, RepositoryError> {
        Ok(lock(&self.records)?
            .values()
            .find(|parcours| &parcours.user_id == user_id)
            .cloned())
    }

    async fn erase(
        &self,
        id: &ParcoursId,
        reason: DeletionReason,
        at: DateTime<Utc>,
    ) -> Result<ErasureRecord, RepositoryError> {
        let removed = lock(&self.records)?
            .remove(id)
            .ok_or(RepositoryError::NotFound)?;
        let record = ErasureRecord {
            parcours_id: removed.id,
            user_id: removed.user_id,
            reason,
            erased_at: at,
        };
        lock(&self.erasures)?.push(record.clone());
        Ok(record)
    }
}

#[derive(Default)]
pub struct InMemoryValidationRepository {
    records: Mutex<HashMap<ValidationAmoId, ValidationAmo>>,
}

impl InMemoryValidationRepository {
    pub fn len(&self) -> Result<usize, RepositoryError> {
        Ok(lock(&self.records)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, RepositoryError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl ValidationRepository for InMemoryValidationRepository {
    async fn insert_pending(&self, record: ValidationAmo) -> Result<ValidationAmo, RepositoryError> {
        let mut guard = lock(&self.records)?;
        let already_active = guard
            .values()
            .any(|existing| existing.parcours_id == record.parcours_id && existing.is_active());
        if already_active || guard.contains_key(&record.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn fetch_by_token(
        &self,
        token: &ValidationToken,
    ) -> Result<Option<ValidationAmo>, RepositoryError> {
        Ok(lock(&self.records)?
            .values()
            .find(|record| &record.token == token)
            .cloned())
    }

    async fn complete(
        &self,
        id: &ValidationAmoId,
        decision: CompletedDecision,
    ) -> Result<ValidationAmo, RepositoryError> {
        let mut guard = lock(&self.records)?;
        let record = guard.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if !record.accepts_decision() {
            return Err(RepositoryError::Conflict);
        }
        decision.apply(record);
        Ok(record.clone())
    }

    async fn latest_for_parcours(
        &self,
        parcours_id: &ParcoursId,
    ) -> Result<Option<ValidationAmo>, RepositoryError> {
        Ok(lock(&self.records)?
            .values()
            .filter(|record| &record.parcours_id == parcours_id)
            .max_by_key(|record| record.created_at)
            .cloned())
    }

    async fn list_for_entreprise(
        &self,
        entreprise_id: &EntrepriseAmoId,
    ) -> Result<Vec<ValidationAmo>, RepositoryError> {
        Ok(lock(&self.records)?
            .values()
            .filter(|record| &record.entreprise_amo_id == entreprise_id)
            .cloned()
            .collect())
    }

    async fn delete_for_parcours(&self, parcours_id: &ParcoursId) -> Result<usize, RepositoryError> {
        let mut guard = lock(&self.records)?;
        let before = guard.len();
        guard.retain(|_, record| &record.parcours_id != parcours_id);
        Ok(before - guard.len())
    }
}

#[derive(Default)]
pub struct InMemoryAmoDirectory {
    entreprises: HashMap<EntrepriseAmoId, EntrepriseAmo>,
}

impl InMemoryAmoDirectory {
    pub fn new(entreprises: impl IntoIterator<Item = EntrepriseAmo>) -> Self {
        Self {
            entreprises: entreprises
                .into_iter()
                .map(|entreprise| (entreprise.id.clone(), entreprise))
                .collect(),
        }
    }
}

#[async_trait]
impl AmoDirectory for InMemoryAmoDirectory {
    async fn fetch(&self, id: &EntrepriseAmoId) -> Result<Option<EntrepriseAmo>, RepositoryError> {
        Ok(self.entreprises.get(id).cloned())
    }
}

/// Keeps every notification in memory; can be switched to failing mode.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<AmoNotification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.failing.store(true, Ordering::Release);
        notifier
    }

    pub fn sent(&self) -> Vec<AmoNotification> {
        self.sent
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AmoNotifier for RecordingNotifier {
    async fn notify(&self, notification: AmoNotification) -> Result<(), NotificationError> {
        if notification.recipients.is_empty() {
            return Err(NotificationError::NoRecipient);
        }
        if self.failing.load(Ordering::Acquire) {
            return Err(NotificationError::Transport("smtp relay refused".to_string()));
        }
        self.sent
            .lock()
            .map_err(|_| NotificationError::Transport("outbox poisoned".to_string()))?
            .push(notification);
        Ok(())
    }
}

/// Stand-in for Démarches Simplifiées whose case statuses are set by hand.
/// Injected wherever the real client would be.
#[derive(Default)]
pub struct InMemoryDossierClient {
    statuses: Mutex<HashMap<String, DsStatus>>,
    submissions: Mutex<Vec<DossierSubmission>>,
    sequence: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryDossierClient {
    pub fn set_status(&self, numero: &str, status: DsStatus) {
        if let Ok(mut guard) = self.statuses.lock() {
            guard.insert(numero.to_string(), status);
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    pub fn submissions(&self) -> Vec<DossierSubmission> {
        self.submissions
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn ensure_available(&self) -> Result<(), DossierError> {
        if self.unavailable.load(Ordering::Acquire) {
            Err(DossierError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DossierClient for InMemoryDossierClient {
    async fn get_case_status(&self, numero: &str) -> Result<DsStatus, DossierError> {
        self.ensure_available()?;
        let guard = self
            .statuses
            .lock()
            .map_err(|_| DossierError::Unavailable("status table poisoned".to_string()))?;
        Ok(guard.get(numero).copied().unwrap_or(DsStatus::NonAccessible))
    }

    async fn create_or_update_case(&self, submission: DossierSubmission) -> Result<String, DossierError> {
        self.ensure_available()?;
        let numero = match &submission.numero_existant {
            Some(existing) => existing.clone(),
            None => format!("{}", 20_000_000 + self.sequence.fetch_add(1, Ordering::Relaxed)),
        };
        self.statuses
            .lock()
            .map_err(|_| DossierError::Unavailable("status table poisoned".to_string()))?
            .entry(numero.clone())
            .or_insert(DsStatus::EnConstruction);
        self.submissions
            .lock()
            .map_err(|_| DossierError::Unavailable("submission log poisoned".to_string()))?
            .push(submission);
        Ok(numero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::parcours::domain::{Status, Step};
    use crate::workflows::parcours::repository::update_with;

    fn parcours() -> ParcoursPrevention {
        ParcoursPrevention::new(UserId("user-1".to_string()), None, Utc::now())
    }

    #[tokio::test]
    async fn stale_copies_are_refused() {
        let repository = InMemoryParcoursRepository::default();
        let inserted = repository.insert(parcours()).await.unwrap();

        let mut first = inserted.clone();
        first.validate_step(Step::ChoixAmo, Utc::now()).unwrap();
        let stored = repository.update(first).await.expect("fresh copy written");
        assert_eq!(stored.version, inserted.version + 1);

        let mut stale = inserted;
        stale.updated_at = Utc::now();
        assert_eq!(repository.update(stale).await, Err(RepositoryError::Conflict));

        let current = repository.fetch(&stored.id).await.unwrap().unwrap();
        assert_eq!(current.status_of(Step::ChoixAmo), Status::Valide);
    }

    #[tokio::test]
    async fn update_with_reapplies_the_change_on_the_newer_record() {
        let repository = InMemoryParcoursRepository::default();
        let inserted = repository.insert(parcours()).await.unwrap();
        let id = inserted.id.clone();

        let mut attempts = 0;
        let stored = update_with(&repository, &id, |parcours| {
            attempts += 1;
            if attempts == 1 {
                // Another writer commits between this read and the write below.
                let mut guard = lock(&repository.records)?;
                if let Some(current) = guard.get_mut(&parcours.id) {
                    current
                        .validate_step(Step::ChoixAmo, Utc::now())
                        .map_err(|_| RepositoryError::Conflict)?;
                    current.version += 1;
                }
            }
            parcours.updated_at = Utc::now();
            Ok::<(), RepositoryError>(())
        })
        .await
        .expect("second attempt succeeds");

        assert_eq!(attempts, 2);
        assert_eq!(stored.status_of(Step::ChoixAmo), Status::Valide);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn missing_parcours_is_not_found() {
        let repository = InMemoryParcoursRepository::default();
        let outcome = repository.update(parcours()).await;
        assert_eq!(outcome, Err(RepositoryError::NotFound));
    }
}
