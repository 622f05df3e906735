use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneExposition {
    Faible,
    Moyen,
    Fort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeLogement {
    Maison,
    Appartement,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Coordonnees {
    pub lat: f64,
    pub lon: f64,
}

/// Housing answers. Every field is optional because the simulator sends
/// them progressively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Logement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adresse: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_departement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epci: Option<String>,
    /// INSEE code of the commune.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commune: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commune_nom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordonnees: Option<Coordonnees>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clef_ban: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commune_denormandie: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annee_de_construction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rnb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub niveaux: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_dexposition: Option<ZoneExposition>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_logement: Option<TypeLogement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mitoyen: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proprietaire_occupant: Option<bool>,
}

impl Logement {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Department code, falling back to the INSEE prefix (3 digits overseas).
    pub fn departement(&self) -> Option<String> {
        if let Some(code) = self.code_departement.as_deref().filter(|code| !code.is_empty()) {
            return Some(code.to_string());
        }
        let commune = self.commune.as_deref()?;
        let width = if commune.starts_with("97") { 3 } else { 2 };
        commune.get(..width).map(str::to_string)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaxeFonciere {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commune_eligible: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rga {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indemnise_indemnise_rga: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indemnise_montant_indemnite: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sinistres: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Menage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenu_rga: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personnes: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Vous {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proprietaire_condition: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proprietaire_occupant_rga: Option<bool>,
}

/// In-progress simulator answers, as exchanged with the embedded widget.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialRgaSimulationData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logement: Option<Logement>,
    #[serde(
        default,
        rename = "taxeFonciere",
        skip_serializing_if = "Option::is_none"
    )]
    pub taxe_fonciere: Option<TaxeFonciere>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rga: Option<Rga>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menage: Option<Menage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vous: Option<Vous>,
    #[serde(
        default,
        rename = "simulatedAt",
        skip_serializing_if = "Option::is_none"
    )]
    pub simulated_at: Option<DateTime<Utc>>,
}

impl PartialRgaSimulationData {
    /// Usable once the housing section carries at least one answer.
    pub fn is_usable(&self) -> bool {
        self.logement
            .as_ref()
            .is_some_and(|logement| !logement.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("simulation data has no usable logement section")]
pub struct UnusableSimulation;

/// Simulation attached to a parcours. `logement` is guaranteed non-empty;
/// the other sections are filled in as the journey goes on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RgaSimulationData {
    pub logement: Logement,
    #[serde(
        default,
        rename = "taxeFonciere",
        skip_serializing_if = "Option::is_none"
    )]
    pub taxe_fonciere: Option<TaxeFonciere>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rga: Option<Rga>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menage: Option<Menage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vous: Option<Vous>,
    #[serde(rename = "simulatedAt")]
    pub simulated_at: DateTime<Utc>,
}

impl RgaSimulationData {
    /// Promotes simulator answers, stamping `now` when the widget sent no timestamp.
    pub fn from_partial(
        partial: PartialRgaSimulationData,
        now: DateTime<Utc>,
    ) -> Result<Self, UnusableSimulation> {
        if !partial.is_usable() {
            return Err(UnusableSimulation);
        }
        let PartialRgaSimulationData {
            logement,
            taxe_fonciere,
            rga,
            menage,
            vous,
            simulated_at,
        } = partial;

        Ok(Self {
            logement: logement.ok_or(UnusableSimulation)?,
            taxe_fonciere,
            rga,
            menage,
            vous,
            simulated_at: simulated_at.unwrap_or(now),
        })
    }

    pub fn to_partial(&self) -> PartialRgaSimulationData {
        PartialRgaSimulationData {
            logement: Some(self.logement.clone()),
            taxe_fonciere: self.taxe_fonciere.clone(),
            rga: self.rga.clone(),
            menage: self.menage.clone(),
            vous: self.vous.clone(),
            simulated_at: Some(self.simulated_at),
        }
    }
}
