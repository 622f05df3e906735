//! Citizen journey of the Fonds Prévention Argile: the five-step parcours,
//! its reconciliation with Démarches Simplifiées, the AMO validation
//! workflow and the encrypted simulator hand-off.

pub mod amo;
pub mod domain;
pub mod dossier;
pub mod memory;
pub mod progress;
pub mod repository;
pub mod router;
pub mod service;
pub mod simulation;

pub use domain::{
    is_step_after, is_step_before, reconcile_status, DeletionReason, DossierDs, DsStatus,
    ParcoursError, ParcoursId, ParcoursPrevention, Status, Step, StepState, STEP_ORDER,
};
pub use dossier::{DossierClient, DossierError, DossierSubmission};
pub use progress::{
    effective, resolve_progress, BlockReason, ExternalStatuses, ProgressResolution, ProgressView,
    SimulationSource, StepSummary,
};
pub use repository::{ErasureRecord, ParcoursRepository, RepositoryError};
pub use router::{parcours_router, ApiError, ParcoursApi};
pub use service::{ParcoursService, ParcoursServiceError};
