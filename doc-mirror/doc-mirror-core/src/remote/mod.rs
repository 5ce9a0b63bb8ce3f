//! Typed façade over the external object store.
//!
//! Each method is exactly one fallible remote operation. Adapters never
//! retry, cache, or batch.

use crate::error::RemoteError;
use crate::model::{Grant, ObjectMeta, Permission};
use async_trait::async_trait;
use bytes::Bytes;

pub mod http;
pub mod memory;

pub use http::HttpRemoteStore;
pub use memory::MemoryRemoteStore;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Mime type the object store uses to mark folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create_folder(&self, name: &str, parent_id: &str) -> RemoteResult<ObjectMeta>;

    /// Children of `folder_id`, optionally filtered by a name substring.
    async fn list_children(
        &self,
        folder_id: &str,
        query: Option<&str>,
    ) -> RemoteResult<Vec<ObjectMeta>>;

    async fn get_object(&self, id: &str) -> RemoteResult<ObjectMeta>;

    async fn upload_object(
        &self,
        bytes: Bytes,
        name: &str,
        mime_type: &str,
        parent_id: &str,
    ) -> RemoteResult<ObjectMeta>;

    async fn delete_object(&self, id: &str) -> RemoteResult<()>;

    /// Reparent `id`. `old_parent_id` is the parent the caller last saw; the
    /// adapter does not look it up.
    async fn move_object(
        &self,
        id: &str,
        old_parent_id: Option<&str>,
        new_parent_id: &str,
    ) -> RemoteResult<()>;

    async fn rename_object(&self, id: &str, new_name: &str) -> RemoteResult<()>;

    async fn grant_access(&self, id: &str, email: &str, level: Permission) -> RemoteResult<Grant>;

    async fn revoke_access(&self, id: &str, permission_id: &str) -> RemoteResult<()>;

    async fn list_grants(&self, id: &str) -> RemoteResult<Vec<Grant>>;
}
