use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use fonds_argile::config::AppConfig;
use fonds_argile::workflows::parcours::amo::{
    AmoNotification, AmoNotifier, AmoValidationService, EntrepriseAmo, EntrepriseAmoId,
    NotificationError,
};
use fonds_argile::workflows::parcours::memory::{
    InMemoryAmoDirectory, InMemoryDossierClient, InMemoryParcoursRepository,
    InMemoryValidationRepository,
};
use fonds_argile::workflows::parcours::simulation::RgaCipher;
use fonds_argile::workflows::parcours::{DossierClient, ParcoursApi, ParcoursService};
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Notifier used until an SMTP relay is wired in: records the dispatch in
/// the logs without the decision link.
#[derive(Default, Clone)]
pub(crate) struct LoggingNotifier;

#[async_trait]
impl AmoNotifier for LoggingNotifier {
    async fn notify(&self, notification: AmoNotification) -> Result<(), NotificationError> {
        if notification.recipients.is_empty() {
            return Err(NotificationError::NoRecipient);
        }
        info!(
            recipients = notification.recipients.len(),
            subject = %notification.subject,
            "AMO notification dispatched"
        );
        Ok(())
    }
}

/// Organisations available in development and demo runs.
pub(crate) fn seeded_directory() -> InMemoryAmoDirectory {
    InMemoryAmoDirectory::new([
        EntrepriseAmo {
            id: EntrepriseAmoId("soliha-indre".to_string()),
            nom: "Soliha Indre".to_string(),
            siret: "77568030900039".to_string(),
            emails: vec!["contact@soliha-indre.test".to_string()],
            departements: vec!["36".to_string()],
            communes: Vec::new(),
        },
        EntrepriseAmo {
            id: EntrepriseAmoId("urbanis-occitanie".to_string()),
            nom: "Urbanis Occitanie".to_string(),
            siret: "38829543600052".to_string(),
            emails: vec![
                "toulouse@urbanis.test".to_string(),
                "montauban@urbanis.test".to_string(),
            ],
            departements: vec!["31".to_string(), "82".to_string()],
            communes: vec!["32013".to_string()],
        },
    ])
}

/// In-process wiring of both services around shared storage.
pub(crate) struct Wiring {
    pub(crate) api: ParcoursApi,
    pub(crate) dossiers: Arc<InMemoryDossierClient>,
}

pub(crate) fn in_memory_wiring(
    config: &AppConfig,
    notifier: Arc<dyn AmoNotifier>,
) -> Wiring {
    let parcours = Arc::new(InMemoryParcoursRepository::default());
    let validations = Arc::new(InMemoryValidationRepository::default());
    let dossiers = Arc::new(InMemoryDossierClient::default());
    let dossier_client: Arc<dyn DossierClient> = dossiers.clone();

    let api = ParcoursApi {
        parcours: Arc::new(ParcoursService::new(
            parcours.clone(),
            validations.clone(),
            dossier_client,
        )),
        amo: Arc::new(AmoValidationService::new(
            parcours,
            validations,
            Arc::new(seeded_directory()),
            notifier,
            config.validation.link_base_url.clone(),
        )),
        cipher: Arc::new(RgaCipher::new(&config.simulation.encryption_key)),
    };

    Wiring { api, dossiers }
}
