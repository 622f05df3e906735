use std::sync::Arc;

use chrono::Utc;

use crate::auth::{AuthUser, UserId};
use crate::workflows::parcours::amo::{
    ApplicantInfo, AmoValidationService, EntrepriseAmo, EntrepriseAmoId, ValidationAmo,
};
use crate::workflows::parcours::domain::{ParcoursId, ParcoursPrevention};
use crate::workflows::parcours::memory::{
    InMemoryAmoDirectory, InMemoryParcoursRepository, InMemoryValidationRepository,
    RecordingNotifier,
};
use crate::workflows::parcours::repository::ParcoursRepository;
use crate::workflows::parcours::simulation::tests::sample_simulation;

pub(crate) const CITIZEN: &str = "citoyen-1";
pub(crate) const LINK_BASE: &str = "https://fonds-argile.test";

pub(crate) fn entreprise_id() -> EntrepriseAmoId {
    EntrepriseAmoId("amo-indre".to_string())
}

pub(crate) fn other_entreprise_id() -> EntrepriseAmoId {
    EntrepriseAmoId("amo-paris".to_string())
}

pub(crate) fn entreprises() -> Vec<EntrepriseAmo> {
    vec![
        EntrepriseAmo {
            id: entreprise_id(),
            nom: "Soliha Indre".to_string(),
            siret: "77568030900039".to_string(),
            emails: vec!["contact@soliha-indre.test".to_string()],
            departements: vec!["36".to_string()],
            communes: Vec::new(),
        },
        EntrepriseAmo {
            id: other_entreprise_id(),
            nom: "Urbanis Paris".to_string(),
            siret: "38829543600052".to_string(),
            emails: vec!["paris@urbanis.test".to_string()],
            departements: vec!["75".to_string()],
            communes: Vec::new(),
        },
    ]
}

pub(crate) fn applicant() -> ApplicantInfo {
    ApplicantInfo {
        nom: "Martin".to_string(),
        prenom: "Claire".to_string(),
        email: "claire.martin@example.test".to_string(),
        telephone: Some("0601020304".to_string()),
        adresse_logement: Some("12 rue Exemple, 36000 Châteauroux".to_string()),
    }
}

pub(crate) fn citizen() -> AuthUser {
    AuthUser::particulier(CITIZEN)
}

pub(crate) fn amo_agent() -> AuthUser {
    AuthUser::amo("agent-indre", entreprise_id())
}

pub(crate) fn pending_validation(parcours_id: &ParcoursId) -> ValidationAmo {
    ValidationAmo::pending(parcours_id.clone(), entreprise_id(), applicant(), Utc::now())
}

pub(crate) struct Harness {
    pub service: Arc<AmoValidationService>,
    pub parcours: Arc<InMemoryParcoursRepository>,
    pub validations: Arc<InMemoryValidationRepository>,
    pub notifier: Arc<RecordingNotifier>,
}

pub(crate) fn harness_with(notifier: RecordingNotifier) -> Harness {
    let parcours = Arc::new(InMemoryParcoursRepository::default());
    let validations = Arc::new(InMemoryValidationRepository::default());
    let notifier = Arc::new(notifier);
    let service = Arc::new(AmoValidationService::new(
        parcours.clone(),
        validations.clone(),
        Arc::new(InMemoryAmoDirectory::new(entreprises())),
        notifier.clone(),
        LINK_BASE,
    ));
    Harness {
        service,
        parcours,
        validations,
        notifier,
    }
}

pub(crate) fn harness() -> Harness {
    harness_with(RecordingNotifier::default())
}

/// Stores a parcours for [`CITIZEN`] with a complete simulation.
pub(crate) async fn seeded_parcours(harness: &Harness) -> ParcoursPrevention {
    let parcours = ParcoursPrevention::new(
        UserId(CITIZEN.to_string()),
        Some(sample_simulation()),
        Utc::now(),
    );
    harness
        .parcours
        .insert(parcours)
        .await
        .expect("parcours stored")
}
