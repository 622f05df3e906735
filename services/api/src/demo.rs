use crate::infra::in_memory_wiring;
use clap::Args;
use fonds_argile::auth::AuthUser;
use fonds_argile::config::AppConfig;
use fonds_argile::error::AppError;
use fonds_argile::workflows::parcours::amo::{AmoDecision, ApplicantInfo, EntrepriseAmoId};
use fonds_argile::workflows::parcours::memory::{InMemoryDossierClient, RecordingNotifier};
use fonds_argile::workflows::parcours::simulation::{
    Coordonnees, Logement, Menage, PartialRgaSimulationData, TypeLogement, ZoneExposition,
};
use fonds_argile::workflows::parcours::{DsStatus, ParcoursApi, ProgressResolution, Step};
use serde_json::json;
use std::sync::Arc;

type DemoResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Make the filing system unreachable once the eligibility case is filed.
    #[arg(long)]
    pub(crate) outage: bool,
    /// Have the AMO decline the accompaniment instead of accepting it.
    #[arg(long)]
    pub(crate) refuse_amo: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let notifier = Arc::new(RecordingNotifier::default());
    let wiring = in_memory_wiring(&config, notifier.clone());

    println!("Fonds Prévention Argile demo");
    if let Err(err) = scenario(&wiring.api, &wiring.dossiers, &notifier, &args).await {
        println!("  Demo interrupted: {}", err);
    }
    Ok(())
}

fn demo_answers() -> PartialRgaSimulationData {
    PartialRgaSimulationData {
        logement: Some(Logement {
            adresse: Some("12 rue Exemple, 36000 Châteauroux".to_string()),
            code_departement: Some("36".to_string()),
            commune: Some("36044".to_string()),
            commune_nom: Some("Châteauroux".to_string()),
            coordonnees: Some(Coordonnees {
                lat: 46.8103,
                lon: 1.6913,
            }),
            annee_de_construction: Some("1975".to_string()),
            niveaux: Some(1),
            zone_dexposition: Some(ZoneExposition::Fort),
            type_logement: Some(TypeLogement::Maison),
            mitoyen: Some(false),
            proprietaire_occupant: Some(true),
            ..Logement::default()
        }),
        menage: Some(Menage {
            revenu_rga: Some(31_000),
            personnes: Some(2),
        }),
        ..PartialRgaSimulationData::default()
    }
}

fn print_progress(label: &str, resolution: &ProgressResolution) {
    let Some(view) = resolution.view() else {
        println!("- {label}: no parcours");
        return;
    };
    println!(
        "- {label}: {} ({}){}{}",
        view.current_step.label(),
        view.status.label(),
        view.blocked
            .map(|reason| format!(" | blocked: {reason:?}"))
            .unwrap_or_default(),
        if view.stale { " | stale" } else { "" }
    );
}

async fn scenario(
    api: &ParcoursApi,
    dossiers: &InMemoryDossierClient,
    notifier: &RecordingNotifier,
    args: &DemoArgs,
) -> DemoResult {
    let citizen = AuthUser::particulier("demo-franceconnect-sub");
    let entreprise = EntrepriseAmoId("soliha-indre".to_string());
    let agent = AuthUser::amo("demo-agent-soliha", entreprise.clone());

    println!("\nSimulator hand-off");
    let sealed = api.cipher.encrypt(&demo_answers())?;
    println!("- Sealed payload: {} characters", sealed.encrypted.len());
    let answers = api.cipher.decrypt(&sealed.encrypted)?;
    let parcours = api.parcours.submit_simulation(&citizen, answers).await?;
    println!("- Parcours {} created", parcours.id.0);
    print_progress("Progress", &api.parcours.progress_for(&citizen).await?);

    println!("\nAMO selection");
    let applicant = ApplicantInfo {
        nom: "Martin".to_string(),
        prenom: "Claire".to_string(),
        email: "claire.martin@example.test".to_string(),
        telephone: None,
        adresse_logement: Some("12 rue Exemple, 36000 Châteauroux".to_string()),
    };
    let selection = api
        .amo
        .select_amo(&citizen, &parcours.id, &entreprise, applicant)
        .await?;
    println!("- {}", selection.message);
    for notification in notifier.sent() {
        println!(
            "- E-mail to {}: {}",
            notification.recipients.join(", "),
            notification.subject
        );
    }

    let decision = if args.refuse_amo {
        AmoDecision::RejectAccompaniment
    } else {
        AmoDecision::Accept
    };
    let outcome = api
        .amo
        .decide_validation(&agent, &selection.token, decision, None)
        .await?;
    println!("- AMO answer: {}", outcome.message);
    print_progress("Progress", &api.parcours.progress_for(&citizen).await?);
    if args.refuse_amo {
        return Ok(());
    }

    println!("\nDémarches Simplifiées cases");
    for step in [Step::Eligibilite, Step::Diagnostic, Step::Devis, Step::Factures] {
        let filed = api
            .parcours
            .submit_step(&citizen, step, json!({ "etape": step.label() }))
            .await?;
        let Some(dossier) = filed.state(step).dossier else {
            continue;
        };
        println!("- {} filed as case {}", step.label(), dossier.numero);

        dossiers.set_status(&dossier.numero, DsStatus::EnInstruction);
        print_progress("Progress", &api.parcours.progress_for(&citizen).await?);

        if args.outage && step == Step::Eligibilite {
            dossiers.set_unavailable(true);
            print_progress("During outage", &api.parcours.progress_for(&citizen).await?);
            dossiers.set_unavailable(false);
        }

        dossiers.set_status(&dossier.numero, DsStatus::Accepte);
        print_progress("Progress", &api.parcours.progress_for(&citizen).await?);
    }

    if let Some(view) = api.parcours.progress_for(&citizen).await?.view() {
        println!("\nJourney complete: {}", view.is_complete);
        for summary in &view.steps {
            println!(
                "  - {}: {}{}",
                summary.label,
                summary.status.label(),
                summary
                    .ds_status
                    .map(|status| format!(" ({})", status.label()))
                    .unwrap_or_default()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fonds_argile::config::{
        AppEnvironment, EncryptionSecret, ServerConfig, SimulationConfig, TelemetryConfig,
        ValidationConfig,
    };
    use fonds_argile::workflows::parcours::amo::StatutValidationAmo;

    fn config() -> AppConfig {
        AppConfig {
            environment: AppEnvironment::Test,
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
            },
            simulation: SimulationConfig {
                encryption_key: EncryptionSecret::new("demo-test-key"),
                generated_key: false,
            },
            validation: ValidationConfig {
                link_base_url: "http://localhost:3000".to_string(),
            },
        }
    }

    fn citizen() -> AuthUser {
        AuthUser::particulier("demo-franceconnect-sub")
    }

    #[tokio::test]
    async fn demo_journey_completes_even_through_an_outage() {
        let notifier = Arc::new(RecordingNotifier::default());
        let wiring = in_memory_wiring(&config(), notifier.clone());
        let args = DemoArgs {
            outage: true,
            refuse_amo: false,
        };

        scenario(&wiring.api, &wiring.dossiers, &notifier, &args)
            .await
            .expect("scenario runs");

        let resolution = wiring.api.parcours.progress_for(&citizen()).await.unwrap();
        let view = resolution.view().expect("parcours exists");
        assert!(view.is_complete);
        assert!(!view.stale);
        assert_eq!(notifier.sent().len(), 1);
        assert_eq!(wiring.dossiers.submissions().len(), 4);
    }

    #[tokio::test]
    async fn refused_accompaniment_stops_at_choix_amo() {
        let notifier = Arc::new(RecordingNotifier::default());
        let wiring = in_memory_wiring(&config(), notifier.clone());
        let args = DemoArgs {
            outage: false,
            refuse_amo: true,
        };

        scenario(&wiring.api, &wiring.dossiers, &notifier, &args)
            .await
            .expect("scenario runs");

        let resolution = wiring.api.parcours.progress_for(&citizen()).await.unwrap();
        let view = resolution.view().expect("parcours exists");
        assert_eq!(view.current_step, Step::ChoixAmo);
        assert_eq!(
            view.amo_validation,
            Some(StatutValidationAmo::AccompagnementRefuse)
        );
        assert!(wiring.dossiers.submissions().is_empty());
    }
}
