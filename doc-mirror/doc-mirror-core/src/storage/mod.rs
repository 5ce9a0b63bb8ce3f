//! Local relational mirror: documents, shares, users and task links.

use crate::error::StoreError;
use crate::model::{Document, DocumentId, DocumentPatch, NewDocument, NewShare, Share, UserRecord};
use async_trait::async_trait;
use std::collections::HashMap;

pub mod memory;

pub use memory::MemoryStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Typed CRUD over the mirror tables.
///
/// Implementations enforce uniqueness of `Document.key` and of
/// `(Share.document_id, Share.grantee_id)`, and make both upserts atomic with
/// respect to concurrent callers.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    async fn document(&self, id: DocumentId) -> StoreResult<Option<Document>>;

    async fn document_by_key(&self, key: &str) -> StoreResult<Option<Document>>;

    /// Batch lookup keyed by remote id; missing keys are simply absent.
    async fn documents_by_keys(&self, keys: &[String]) -> StoreResult<HashMap<String, Document>>;

    async fn all_documents(&self) -> StoreResult<Vec<Document>>;

    /// Insert unless a row with the same key exists; either way return the
    /// row now stored for that key.
    async fn upsert_document(&self, doc: NewDocument) -> StoreResult<Document>;

    /// Returns `None` when the row no longer exists.
    async fn update_document(&self, id: DocumentId, patch: DocumentPatch) -> StoreResult<Option<Document>>;

    /// Delete the row together with its shares and task links.
    async fn delete_document(&self, id: DocumentId) -> StoreResult<bool>;

    async fn share(&self, document_id: DocumentId, grantee_id: &str) -> StoreResult<Option<Share>>;

    async fn shares_for_document(&self, document_id: DocumentId) -> StoreResult<Vec<Share>>;

    async fn shares_for_grantee(&self, grantee_id: &str) -> StoreResult<Vec<Share>>;

    /// Insert, or update permission and remote grant id of the existing row.
    async fn upsert_share(&self, share: NewShare) -> StoreResult<Share>;

    async fn delete_share(&self, document_id: DocumentId, grantee_id: &str) -> StoreResult<bool>;

    async fn user(&self, id: &str) -> StoreResult<Option<UserRecord>>;

    async fn upsert_user(&self, user: UserRecord) -> StoreResult<()>;

    async fn link_task(&self, task_id: &str, document_id: DocumentId) -> StoreResult<()>;

    async fn task_links(&self, document_id: DocumentId) -> StoreResult<Vec<String>>;
}
