//! AMO selection and the single-use decision link sent to the chosen
//! organisation.

pub mod domain;
pub mod repository;
pub mod service;

#[cfg(test)]
pub(crate) mod tests;

pub use domain::{
    AmoDecision, ApplicantInfo, CompletedDecision, EntrepriseAmo, EntrepriseAmoId,
    StatutValidationAmo, ValidationAmo, ValidationAmoId, ValidationToken,
};
pub use repository::{
    AmoDirectory, AmoNotification, AmoNotifier, NotificationError, ValidationRepository,
};
pub use service::{
    AmoDecisionOutcome, AmoSelection, AmoValidationError, AmoValidationService, ValidationAmoView,
};
