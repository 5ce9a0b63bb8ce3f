//! Extractors whose rejections are answered with an `ActionResult` body
//! instead of axum's plain-text messages.

use super::reply;
use axum::{
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use doc_mirror_core::MirrorError;
use serde::de::DeserializeOwned;
use tracing::debug;

/// A request that failed to parse, reported as a validation error.
#[derive(Debug)]
pub struct ApiRejection(pub MirrorError);

impl IntoResponse for ApiRejection {
    fn into_response(self) -> Response {
        reply::<()>(StatusCode::OK, Err(self.0))
    }
}

pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => {
                debug!(%rejection, "rejected request body");
                Err(ApiRejection(MirrorError::invalid(
                    "body",
                    "must be a JSON object with the required fields",
                )))
            }
        }
    }
}

/// Path parameters; the first segment is always a document id.
pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(ApiPath(value)),
            Err(rejection) => {
                debug!(%rejection, "rejected path");
                Err(ApiRejection(MirrorError::invalid("id", "is not a valid document id")))
            }
        }
    }
}

pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(ApiQuery(value)),
            Err(rejection) => {
                debug!(%rejection, "rejected query string");
                Err(ApiRejection(MirrorError::invalid(
                    "query",
                    "has a missing or malformed parameter",
                )))
            }
        }
    }
}

/// Raw upload body. Bodies over the route's limit are reported against the
/// `file` field, like every other upload size violation.
pub struct UploadBody(pub Bytes);

impl<S> FromRequest<S> for UploadBody
where
    S: Send + Sync,
{
    type Rejection = ApiRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Bytes::from_request(req, state).await {
            Ok(bytes) => Ok(UploadBody(bytes)),
            Err(rejection) => {
                debug!(%rejection, "rejected upload body");
                Err(ApiRejection(MirrorError::invalid(
                    "file",
                    "could not be read or exceeds the upload limit",
                )))
            }
        }
    }
}
