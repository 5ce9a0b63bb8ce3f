//! HTTP API over [`DocumentManager`]. Every handler answers with an
//! [`ActionResult`] body; the status code mirrors its error kind.

use axum::{
    extract::{DefaultBodyLimit, FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use doc_mirror_core::auth::TokenVerifier;
use doc_mirror_core::error::Result;
use doc_mirror_core::{
    ActionResult, DocumentId, DocumentManager, ErrorKind, MirrorError, Permission, Principal,
    Upload,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

mod extract;

pub use extract::{ApiJson, ApiPath, ApiQuery, ApiRejection, UploadBody};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<DocumentManager>,
    pub verifier: Arc<dyn TokenVerifier>,
    /// Accept `X-User-Id` when no valid bearer token is present.
    pub header_auth: bool,
}

/// The caller's session, if any. Handlers pass it straight to the manager,
/// which answers `unauthorized` when it is absent.
#[derive(Clone, Debug)]
pub struct Session(pub Option<Principal>);

impl Session {
    fn principal(&self) -> Option<&Principal> {
        self.0.as_ref()
    }
}

impl FromRequestParts<AppState> for Session {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        if let Some(auth) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            if let Some(token) = auth.strip_prefix("Bearer ") {
                return Ok(match state.verifier.verify(token).await {
                    Some(claims) => Session(Some(claims.into())),
                    None => {
                        warn!("rejected bearer token");
                        Session(None)
                    }
                });
            }
        }
        if !state.header_auth {
            return Ok(Session(None));
        }
        let Some(user_id) = headers
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return Ok(Session(None));
        };
        let role = match state.manager.store().user(user_id).await {
            Ok(record) => record.map(|u| u.role).unwrap_or_default(),
            Err(e) => {
                warn!(user = %user_id, error = %e, "role lookup failed, treating as member");
                Default::default()
            }
        };
        Ok(Session(Some(Principal {
            id: user_id.to_string(),
            role,
        })))
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::RemoteUnavailable => StatusCode::BAD_GATEWAY,
        ErrorKind::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn reply<T: Serialize>(ok: StatusCode, result: Result<T>) -> Response {
    let status = match &result {
        Ok(_) => ok,
        Err(err) => {
            match err {
                MirrorError::RemoteUnavailable(source) => {
                    warn!(error = %source, "remote store call failed")
                }
                MirrorError::Internal(source) => error!(error = %source, "local store call failed"),
                _ => {}
            }
            status_for(err.kind())
        }
    };
    (status, Json(ActionResult::from(result))).into_response()
}

#[derive(Deserialize, Default)]
struct ListQuery {
    q: Option<String>,
}

#[derive(Deserialize)]
struct FolderCreateRequest {
    name: String,
    parent_id: Option<DocumentId>,
}

#[derive(Deserialize)]
struct UploadQuery {
    #[serde(default)]
    name: String,
    parent_id: Option<DocumentId>,
}

#[derive(Deserialize)]
struct RenameRequest {
    name: String,
}

#[derive(Deserialize)]
struct MoveRequest {
    new_parent_id: Option<DocumentId>,
}

#[derive(Deserialize)]
struct ShareRequest {
    grantee_id: String,
    permission: Permission,
}

#[derive(Deserialize)]
struct TaskLinkRequest {
    task_id: String,
}

#[derive(Serialize)]
struct Revoked {
    revoked: bool,
}

async fn list_root(
    State(state): State<AppState>,
    session: Session,
    ApiQuery(q): ApiQuery<ListQuery>,
) -> Response {
    let result = state
        .manager
        .list(session.principal(), None, q.q.as_deref())
        .await;
    reply(StatusCode::OK, result)
}

async fn list_folder(
    State(state): State<AppState>,
    session: Session,
    ApiPath(id): ApiPath<DocumentId>,
    ApiQuery(q): ApiQuery<ListQuery>,
) -> Response {
    let result = state
        .manager
        .list(session.principal(), Some(id), q.q.as_deref())
        .await;
    reply(StatusCode::OK, result)
}

async fn create_folder(
    State(state): State<AppState>,
    session: Session,
    ApiJson(req): ApiJson<FolderCreateRequest>,
) -> Response {
    let result = state
        .manager
        .create_folder(session.principal(), &req.name, req.parent_id)
        .await;
    reply(StatusCode::CREATED, result)
}

async fn upload_file(
    State(state): State<AppState>,
    session: Session,
    ApiQuery(q): ApiQuery<UploadQuery>,
    headers: HeaderMap,
    UploadBody(body): UploadBody,
) -> Response {
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let upload = Upload {
        name: q.name,
        mime_type,
        bytes: body,
        parent: q.parent_id,
    };
    let result = state.manager.upload(session.principal(), upload).await;
    reply(StatusCode::CREATED, result)
}

async fn get_document(
    State(state): State<AppState>,
    session: Session,
    ApiPath(id): ApiPath<DocumentId>,
) -> Response {
    reply(StatusCode::OK, state.manager.document(session.principal(), id).await)
}

async fn delete_document(
    State(state): State<AppState>,
    session: Session,
    ApiPath(id): ApiPath<DocumentId>,
) -> Response {
    reply(StatusCode::OK, state.manager.delete(session.principal(), id).await)
}

async fn rename_document(
    State(state): State<AppState>,
    session: Session,
    ApiPath(id): ApiPath<DocumentId>,
    ApiJson(req): ApiJson<RenameRequest>,
) -> Response {
    let result = state
        .manager
        .rename(session.principal(), id, &req.name)
        .await;
    reply(StatusCode::OK, result)
}

async fn move_document(
    State(state): State<AppState>,
    session: Session,
    ApiPath(id): ApiPath<DocumentId>,
    ApiJson(req): ApiJson<MoveRequest>,
) -> Response {
    let result = state
        .manager
        .move_document(session.principal(), id, req.new_parent_id)
        .await;
    reply(StatusCode::OK, result)
}

async fn list_shares(
    State(state): State<AppState>,
    session: Session,
    ApiPath(id): ApiPath<DocumentId>,
) -> Response {
    reply(StatusCode::OK, state.manager.list_shares(session.principal(), id).await)
}

async fn share_document(
    State(state): State<AppState>,
    session: Session,
    ApiPath(id): ApiPath<DocumentId>,
    ApiJson(req): ApiJson<ShareRequest>,
) -> Response {
    let result = state
        .manager
        .grant(session.principal(), id, &req.grantee_id, req.permission)
        .await;
    reply(StatusCode::OK, result)
}

async fn unshare_document(
    State(state): State<AppState>,
    session: Session,
    ApiPath((id, grantee_id)): ApiPath<(DocumentId, String)>,
) -> Response {
    let result = state
        .manager
        .revoke(session.principal(), id, &grantee_id)
        .await
        .map(|revoked| Revoked { revoked });
    reply(StatusCode::OK, result)
}

async fn incoming_shares(State(state): State<AppState>, session: Session) -> Response {
    reply(StatusCode::OK, state.manager.shared_with_me(session.principal()).await)
}

async fn attach_task(
    State(state): State<AppState>,
    session: Session,
    ApiPath(id): ApiPath<DocumentId>,
    ApiJson(req): ApiJson<TaskLinkRequest>,
) -> Response {
    let result = state
        .manager
        .attach_to_task(session.principal(), id, &req.task_id)
        .await;
    reply(StatusCode::OK, result)
}

async fn run_audit(State(state): State<AppState>, session: Session) -> Response {
    reply(StatusCode::OK, state.manager.audit(session.principal()).await)
}

pub fn router(state: AppState) -> Router {
    let upload_limit =
        usize::try_from(state.manager.config().max_upload_bytes).unwrap_or(usize::MAX);
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/folders", get(list_root).post(create_folder))
        .route("/folders/{id}", get(list_folder))
        .route(
            "/files",
            post(upload_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/documents/{id}", get(get_document).delete(delete_document))
        .route("/documents/{id}/rename", put(rename_document))
        .route("/documents/{id}/move", put(move_document))
        .route(
            "/documents/{id}/shares",
            get(list_shares).post(share_document),
        )
        .route("/documents/{id}/shares/{grantee_id}", delete(unshare_document))
        .route("/documents/{id}/tasks", post(attach_task))
        .route("/shares/incoming", get(incoming_shares))
        .route("/admin/audit", post(run_audit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
