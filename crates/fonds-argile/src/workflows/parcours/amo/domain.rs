use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::UserId;
use crate::workflows::parcours::domain::ParcoursId;
use crate::workflows::parcours::simulation::Logement;

const TOKEN_BYTES: usize = 32;
const MAX_COMMENT_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntrepriseAmoId(pub String);

/// Accredited organisation accompanying citizens, with the territory it serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrepriseAmo {
    pub id: EntrepriseAmoId,
    pub nom: String,
    pub siret: String,
    pub emails: Vec<String>,
    /// Department codes covered in full.
    pub departements: Vec<String>,
    /// INSEE codes covered individually, outside the departments above.
    pub communes: Vec<String>,
}

impl EntrepriseAmo {
    pub fn covers(&self, logement: &Logement) -> bool {
        let by_commune = logement
            .commune
            .as_ref()
            .is_some_and(|code| self.communes.iter().any(|covered| covered == code));
        let by_departement = logement
            .departement()
            .is_some_and(|code| self.departements.iter().any(|covered| *covered == code));
        by_commune || by_departement
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationAmoId(pub String);

impl ValidationAmoId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Single-use credential carried by the link e-mailed to the AMO.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationToken(String);

impl ValidationToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(BASE64_URL.encode(bytes))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ValidationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ValidationToken(<redacted>)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatutValidationAmo {
    EnAttente,
    LogementEligible,
    LogementNonEligible,
    AccompagnementRefuse,
}

impl StatutValidationAmo {
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::EnAttente)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::EnAttente => "En attente",
            Self::LogementEligible => "Logement éligible",
            Self::LogementNonEligible => "Logement non éligible",
            Self::AccompagnementRefuse => "Accompagnement refusé",
        }
    }
}

/// What the AMO answers from the decision link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AmoDecision {
    Accept,
    RejectEligible,
    RejectAccompaniment,
}

impl AmoDecision {
    pub const fn outcome(self) -> StatutValidationAmo {
        match self {
            Self::Accept => StatutValidationAmo::LogementEligible,
            Self::RejectEligible => StatutValidationAmo::LogementNonEligible,
            Self::RejectAccompaniment => StatutValidationAmo::AccompagnementRefuse,
        }
    }
}

/// Contact details the citizen shares with the chosen AMO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicantInfo {
    pub nom: String,
    pub prenom: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telephone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adresse_logement: Option<String>,
}

impl ApplicantInfo {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.nom.trim().is_empty() || self.prenom.trim().is_empty() {
            return Err("nom and prenom are required");
        }
        let email = self.email.trim();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
            _ => Err("email is not a valid address"),
        }
    }
}

pub fn normalize_comment(comment: Option<String>) -> Result<Option<String>, &'static str> {
    let Some(comment) = comment else {
        return Ok(None);
    };
    let trimmed = comment.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_COMMENT_CHARS {
        return Err("comment is too long");
    }
    Ok(Some(trimmed.to_string()))
}

/// One accompaniment request. Immutable once `statut` is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationAmo {
    pub id: ValidationAmoId,
    pub parcours_id: ParcoursId,
    pub entreprise_amo_id: EntrepriseAmoId,
    pub statut: StatutValidationAmo,
    pub applicant: ApplicantInfo,
    pub token: ValidationToken,
    pub token_consumed: bool,
    pub commentaire: Option<String>,
    pub decided_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl ValidationAmo {
    pub fn pending(
        parcours_id: ParcoursId,
        entreprise_amo_id: EntrepriseAmoId,
        applicant: ApplicantInfo,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ValidationAmoId::generate(),
            parcours_id,
            entreprise_amo_id,
            statut: StatutValidationAmo::EnAttente,
            applicant,
            token: ValidationToken::generate(),
            token_consumed: false,
            commentaire: None,
            decided_by: None,
            created_at: now,
            decided_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.statut == StatutValidationAmo::EnAttente
    }

    /// Whether the decision link still works.
    pub fn accepts_decision(&self) -> bool {
        self.is_active() && !self.token_consumed
    }
}

/// Terminal transition applied by the storage layer in one conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedDecision {
    pub statut: StatutValidationAmo,
    pub commentaire: Option<String>,
    pub decided_by: UserId,
    pub decided_at: DateTime<Utc>,
}

impl CompletedDecision {
    pub fn apply(&self, record: &mut ValidationAmo) {
        record.statut = self.statut;
        record.commentaire = self.commentaire.clone();
        record.decided_by = Some(self.decided_by.clone());
        record.decided_at = Some(self.decided_at);
        record.token_consumed = true;
    }
}
