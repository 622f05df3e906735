//! Simulator answers and their encrypted transport between the embedded
//! widget and the main application.

pub mod cipher;
pub mod data;

pub use cipher::{EncryptedRgaData, RgaCipher, RgaCryptoError};
pub use data::{
    Coordonnees, Logement, Menage, PartialRgaSimulationData, Rga, RgaSimulationData,
    TaxeFonciere, TypeLogement, UnusableSimulation, Vous, ZoneExposition,
};

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    pub(crate) fn sample_logement() -> Logement {
        Logement {
            adresse: Some("12 rue Exemple, 36000 Châteauroux".to_string()),
            code_region: Some("24".to_string()),
            code_departement: Some("36".to_string()),
            epci: Some("243600327".to_string()),
            commune: Some("36044".to_string()),
            commune_nom: Some("Châteauroux".to_string()),
            coordonnees: Some(Coordonnees {
                lat: 46.8103,
                lon: 1.6913,
            }),
            clef_ban: Some("36044_0420_00012".to_string()),
            commune_denormandie: Some(false),
            annee_de_construction: Some("1975".to_string()),
            rnb: None,
            niveaux: Some(1),
            zone_dexposition: Some(ZoneExposition::Fort),
            type_logement: Some(TypeLogement::Maison),
            mitoyen: Some(false),
            proprietaire_occupant: Some(true),
        }
    }

    pub(crate) fn sample_simulation() -> RgaSimulationData {
        RgaSimulationData {
            logement: sample_logement(),
            taxe_fonciere: Some(TaxeFonciere {
                commune_eligible: Some(true),
            }),
            rga: Some(Rga {
                assure: Some(true),
                indemnise_indemnise_rga: Some(false),
                indemnise_montant_indemnite: None,
                sinistres: Some("saine".to_string()),
            }),
            menage: Some(Menage {
                revenu_rga: Some(31_000),
                personnes: Some(2),
            }),
            vous: Some(Vous {
                proprietaire_condition: Some(true),
                proprietaire_occupant_rga: Some(true),
            }),
            simulated_at: Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn usable_only_with_a_non_empty_logement() {
        let mut partial = PartialRgaSimulationData::default();
        assert!(!partial.is_usable());
        partial.logement = Some(Logement::default());
        assert!(!partial.is_usable());
        partial.logement = Some(Logement {
            adresse: Some("1 place de la Mairie".to_string()),
            ..Logement::default()
        });
        assert!(partial.is_usable());
    }

    #[test]
    fn promotion_requires_logement_and_stamps_time() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(
            RgaSimulationData::from_partial(PartialRgaSimulationData::default(), now),
            Err(UnusableSimulation)
        );

        let partial = PartialRgaSimulationData {
            logement: Some(sample_logement()),
            ..PartialRgaSimulationData::default()
        };
        let complete = RgaSimulationData::from_partial(partial, now).expect("usable");
        assert_eq!(complete.simulated_at, now);
        assert!(complete.menage.is_none());
    }

    #[test]
    fn departement_falls_back_to_insee_prefix() {
        let mut logement = sample_logement();
        logement.code_departement = None;
        assert_eq!(logement.departement().as_deref(), Some("36"));
        logement.commune = Some("97411".to_string());
        assert_eq!(logement.departement().as_deref(), Some("974"));
    }

    #[test]
    fn wire_names_match_the_widget() {
        let value = serde_json::to_value(sample_simulation()).unwrap();
        assert!(value.get("taxeFonciere").is_some());
        assert!(value.get("simulatedAt").is_some());
        assert_eq!(value["logement"]["type"], "maison");
        assert_eq!(value["logement"]["zone_dexposition"], "fort");
    }
}
