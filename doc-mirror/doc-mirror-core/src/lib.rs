pub mod auth;
pub mod authz;
pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod model;
pub mod reconcile;
pub mod remote;
pub mod sharing;
pub mod storage;

pub use config::MirrorConfig;
pub use error::{ActionResult, ErrorKind, MirrorError};
pub use lifecycle::{DocumentManager, Upload};
pub use model::{Document, DocumentId, DocumentKind, Permission, Principal, Role, Share};
