use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use super::amo::{
    AmoDecision, AmoValidationError, AmoValidationService, ApplicantInfo, EntrepriseAmoId,
    StatutValidationAmo, ValidationToken,
};
use super::domain::{DeletionReason, ParcoursId, Step};
use super::progress::ProgressResolution;
use super::service::{ParcoursService, ParcoursServiceError};
use super::simulation::{PartialRgaSimulationData, RgaCipher, RgaCryptoError};
use crate::auth::{AccessError, Session, UserRole};

const CITIZENS: &[UserRole] = &[UserRole::Particulier];
const AMO_AGENTS: &[UserRole] = &[UserRole::Amo];
const CASE_AGENTS: &[UserRole] = &[
    UserRole::Amo,
    UserRole::Administrateur,
    UserRole::SuperAdministrateur,
];
const ADMINS: &[UserRole] = &[UserRole::Administrateur, UserRole::SuperAdministrateur];
const ERASERS: &[UserRole] = &[
    UserRole::Particulier,
    UserRole::Administrateur,
    UserRole::SuperAdministrateur,
];

/// Shared state behind the parcours routes.
#[derive(Clone)]
pub struct ParcoursApi {
    pub parcours: Arc<ParcoursService>,
    pub amo: Arc<AmoValidationService>,
    pub cipher: Arc<RgaCipher>,
}

/// Router builder exposing the simulator hand-off, the citizen journey and
/// the AMO decision flow.
pub fn parcours_router(api: ParcoursApi) -> Router {
    Router::new()
        .route("/api/v1/simulation/encrypt", post(encrypt_handler))
        .route("/api/v1/simulation/decrypt", post(decrypt_handler))
        .route(
            "/api/v1/me/parcours",
            post(create_handler).get(own_progress_handler),
        )
        .route("/api/v1/me/parcours/simulation", put(handoff_handler))
        .route("/api/v1/me/parcours/steps/:step", post(submit_step_handler))
        .route(
            "/api/v1/parcours/:parcours_id",
            get(progress_handler).delete(erase_handler),
        )
        .route("/api/v1/parcours/:parcours_id/amo", post(select_amo_handler))
        .route(
            "/api/v1/parcours/:parcours_id/simulation-agent",
            put(agent_override_handler),
        )
        .route("/api/v1/parcours/:parcours_id/rewind", post(rewind_handler))
        .route("/api/v1/amo/validations", get(list_validations_handler))
        .route(
            "/api/v1/amo/validations/:token/decision",
            post(decision_handler),
        )
        .with_state(api)
}

/// Everything a parcours route can fail with, mapped onto one JSON shape.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Parcours(#[from] ParcoursServiceError),
    #[error(transparent)]
    Amo(#[from] AmoValidationError),
    #[error(transparent)]
    Simulation(#[from] RgaCryptoError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Access(AccessError::NotAuthenticated) => StatusCode::UNAUTHORIZED,
            ApiError::Access(AccessError::InsufficientRole { .. }) => StatusCode::FORBIDDEN,
            ApiError::Parcours(err) => match err {
                ParcoursServiceError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ParcoursServiceError::NotFound => StatusCode::NOT_FOUND,
                ParcoursServiceError::Conflict(_) | ParcoursServiceError::Step(_) => {
                    StatusCode::CONFLICT
                }
                ParcoursServiceError::Forbidden => StatusCode::FORBIDDEN,
                ParcoursServiceError::ExternalSystemUnavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                ParcoursServiceError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Amo(err) => match err {
                AmoValidationError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
                AmoValidationError::NotFound => StatusCode::NOT_FOUND,
                AmoValidationError::Conflict(_) => StatusCode::CONFLICT,
                AmoValidationError::Forbidden => StatusCode::FORBIDDEN,
                AmoValidationError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Simulation(RgaCryptoError::Encryption) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Simulation(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Access(err) => err.code(),
            ApiError::Parcours(err) => err.code(),
            ApiError::Amo(err) => err.code(),
            ApiError::Simulation(err) => err.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), error = %self, "request failed");
        }
        let body = Json(json!({ "error": self.to_string(), "code": self.code() }));
        (status, body).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

fn progress_response(resolution: ProgressResolution) -> Response {
    let status = match resolution {
        ProgressResolution::Found(_) => StatusCode::OK,
        ProgressResolution::NotFound => StatusCode::NOT_FOUND,
    };
    (status, Json(resolution)).into_response()
}

#[derive(Debug, Deserialize)]
pub(crate) struct EncryptRequest {
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DecryptRequest {
    #[serde(default)]
    encrypted: Option<Value>,
}

pub(crate) async fn encrypt_handler(
    State(api): State<ParcoursApi>,
    Json(request): Json<EncryptRequest>,
) -> ApiResult {
    let sealed = api.cipher.encrypt_value(request.data.as_ref())?;
    Ok((StatusCode::OK, Json(json!({ "success": true, "encrypted": sealed.encrypted }))).into_response())
}

pub(crate) async fn decrypt_handler(
    State(api): State<ParcoursApi>,
    Json(request): Json<DecryptRequest>,
) -> ApiResult {
    let data = api.cipher.decrypt_value(request.encrypted.as_ref())?;
    Ok((StatusCode::OK, Json(json!({ "success": true, "data": data }))).into_response())
}

pub(crate) async fn create_handler(State(api): State<ParcoursApi>, session: Session) -> ApiResult {
    let actor = session.require(CITIZENS)?;
    let parcours = api.parcours.create_parcours(actor).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "parcours_id": parcours.id,
            "current_step": parcours.current_step(),
        })),
    )
        .into_response())
}

/// Landing point of the simulator redirect: decrypts the sealed answers and
/// stores them on the citizen's parcours.
pub(crate) async fn handoff_handler(
    State(api): State<ParcoursApi>,
    session: Session,
    Json(request): Json<DecryptRequest>,
) -> ApiResult {
    let actor = session.require(CITIZENS)?;
    let data = api.cipher.decrypt_value(request.encrypted.as_ref())?;
    let parcours = api.parcours.submit_simulation(actor, data).await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "parcours_id": parcours.id,
            "current_step": parcours.current_step(),
        })),
    )
        .into_response())
}

pub(crate) async fn own_progress_handler(
    State(api): State<ParcoursApi>,
    session: Session,
) -> ApiResult {
    let actor = session.require(CITIZENS)?;
    Ok(progress_response(api.parcours.progress_for(actor).await?))
}

pub(crate) async fn progress_handler(
    State(api): State<ParcoursApi>,
    session: Session,
    Path(parcours_id): Path<String>,
) -> ApiResult {
    let actor = session.require(CASE_AGENTS)?;
    let id = ParcoursId(parcours_id);
    Ok(progress_response(api.parcours.progress_of(actor, &id).await?))
}

pub(crate) async fn submit_step_handler(
    State(api): State<ParcoursApi>,
    session: Session,
    Path(step): Path<Step>,
    Json(champs): Json<Value>,
) -> ApiResult {
    let actor = session.require(CITIZENS)?;
    let parcours = api.parcours.submit_step(actor, step, champs).await?;
    let dossier = parcours.state(step).dossier;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "parcours_id": parcours.id,
            "step": step,
            "status": parcours.status_of(step),
            "dossier": dossier,
        })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub(crate) struct SelectAmoRequest {
    entreprise_amo_id: EntrepriseAmoId,
    applicant: ApplicantInfo,
}

pub(crate) async fn select_amo_handler(
    State(api): State<ParcoursApi>,
    session: Session,
    Path(parcours_id): Path<String>,
    Json(request): Json<SelectAmoRequest>,
) -> ApiResult {
    let actor = session.require(CITIZENS)?;
    let selection = api
        .amo
        .select_amo(
            actor,
            &ParcoursId(parcours_id),
            &request.entreprise_amo_id,
            request.applicant,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(selection)).into_response())
}

#[derive(Debug, Deserialize)]
pub(crate) struct DecisionRequest {
    decision: AmoDecision,
    #[serde(default)]
    commentaire: Option<String>,
}

pub(crate) async fn decision_handler(
    State(api): State<ParcoursApi>,
    session: Session,
    Path(token): Path<String>,
    Json(request): Json<DecisionRequest>,
) -> ApiResult {
    let actor = session.require(AMO_AGENTS)?;
    let outcome = api
        .amo
        .decide_validation(
            actor,
            &ValidationToken::from_raw(token),
            request.decision,
            request.commentaire,
        )
        .await?;
    Ok((StatusCode::OK, Json(outcome)).into_response())
}

#[derive(Debug, Deserialize)]
pub(crate) struct ValidationFilter {
    #[serde(default)]
    entreprise_amo_id: Option<String>,
    #[serde(default)]
    statut: Option<StatutValidationAmo>,
}

pub(crate) async fn list_validations_handler(
    State(api): State<ParcoursApi>,
    session: Session,
    Query(filter): Query<ValidationFilter>,
) -> ApiResult {
    let actor = session.require(CASE_AGENTS)?;
    let entreprise = filter.entreprise_amo_id.map(EntrepriseAmoId);
    let rows = api
        .amo
        .list_validations(actor, entreprise.as_ref(), filter.statut)
        .await?;
    Ok((StatusCode::OK, Json(rows)).into_response())
}

pub(crate) async fn agent_override_handler(
    State(api): State<ParcoursApi>,
    session: Session,
    Path(parcours_id): Path<String>,
    Json(data): Json<PartialRgaSimulationData>,
) -> ApiResult {
    let actor = session.require(CASE_AGENTS)?;
    let parcours = api
        .parcours
        .set_agent_override(actor, &ParcoursId(parcours_id), data)
        .await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "parcours_id": parcours.id,
            "simulation": parcours.effective_simulation(),
        })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub(crate) struct RewindRequest {
    step: Step,
}

pub(crate) async fn rewind_handler(
    State(api): State<ParcoursApi>,
    session: Session,
    Path(parcours_id): Path<String>,
    Json(request): Json<RewindRequest>,
) -> ApiResult {
    let actor = session.require(ADMINS)?;
    let parcours = api
        .parcours
        .admin_rewind(actor, &ParcoursId(parcours_id), request.step)
        .await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "parcours_id": parcours.id,
            "current_step": parcours.current_step(),
        })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub(crate) struct EraseQuery {
    #[serde(default)]
    reason: Option<DeletionReason>,
}

pub(crate) async fn erase_handler(
    State(api): State<ParcoursApi>,
    session: Session,
    Path(parcours_id): Path<String>,
    Query(query): Query<EraseQuery>,
) -> ApiResult {
    let actor = session.require(ERASERS)?;
    let reason = query.reason.unwrap_or(if actor.role == UserRole::Particulier {
        DeletionReason::UserRequest
    } else {
        DeletionReason::Manual
    });
    let record = api
        .parcours
        .erase(actor, &ParcoursId(parcours_id), reason)
        .await?;
    Ok((StatusCode::OK, Json(record)).into_response())
}
