//! Boundary towards Démarches Simplifiées, where formal applications for
//! every step after CHOIX_AMO are filed and decided.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::domain::{DsStatus, ParcoursId, Step};
use super::simulation::RgaSimulationData;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DossierError {
    #[error("filing system unavailable: {0}")]
    Unavailable(String),
    #[error("filing system rejected the submission: {0}")]
    Rejected(String),
}

/// Data sent when a step is filed or re-filed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DossierSubmission {
    pub parcours_id: ParcoursId,
    pub step: Step,
    pub numero_existant: Option<String>,
    pub simulation: Option<RgaSimulationData>,
    pub champs: Value,
}

#[async_trait]
pub trait DossierClient: Send + Sync {
    /// `DsStatus::NonAccessible` when no case matches `numero`.
    async fn get_case_status(&self, numero: &str) -> Result<DsStatus, DossierError>;

    /// Returns the case number, unchanged when `numero_existant` is set.
    async fn create_or_update_case(&self, submission: DossierSubmission) -> Result<String, DossierError>;
}
