//! Lazy mirror of remote folder listings into the local store.
//!
//! Listing a folder is the only way remote objects enter the mirror without
//! an explicit create or upload. Rows are inserted with an upsert on the
//! remote key, so concurrent listings of the same folder converge on one row
//! per object. Local rows whose remote object vanished are left alone here;
//! [`Reconciler::audit`] is the explicit cleanup path.

use crate::error::{MirrorError, RemoteError, Result};
use crate::events::{Event, EventBus};
use crate::model::{Document, DocumentId, MirroredEntry, NewDocument, ObjectMeta};
use crate::remote::RemoteStore;
use crate::storage::MirrorStore;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct AuditReport {
    pub checked: usize,
    pub pruned: Vec<DocumentId>,
}

pub struct Reconciler {
    remote: Arc<dyn RemoteStore>,
    store: Arc<dyn MirrorStore>,
    events: EventBus,
    concurrency: usize,
}

impl Reconciler {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        store: Arc<dyn MirrorStore>,
        events: EventBus,
        concurrency: usize,
    ) -> Self {
        Self {
            remote,
            store,
            events,
            concurrency: concurrency.max(1),
        }
    }

    /// List `folder_id` remotely and pair every child with its local row,
    /// materializing rows for children seen for the first time.
    ///
    /// A failed remote listing aborts with nothing written. A failed upsert
    /// only drops that object from the result.
    pub async fn materialize_listing(
        &self,
        folder_id: &str,
        query: Option<&str>,
        caller_id: &str,
    ) -> Result<Vec<MirroredEntry>> {
        let listed = self.remote.list_children(folder_id, query).await?;
        let keys: Vec<String> = listed.iter().map(|m| m.id.clone()).collect();
        let mut local = self.store.documents_by_keys(&keys).await?;

        let missing: Vec<ObjectMeta> = listed
            .iter()
            .filter(|m| !local.contains_key(&m.id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            debug!(folder = folder_id, count = missing.len(), "materializing remote objects");
            let materialized: Vec<Document> = stream::iter(missing)
                .map(|meta| async move { self.materialize(&meta, caller_id).await })
                .buffer_unordered(self.concurrency)
                .filter_map(|doc| async move { doc })
                .collect()
                .await;
            local.extend(materialized.into_iter().map(|d| (d.key.clone(), d)));
        }

        Ok(listed
            .into_iter()
            .filter_map(|remote| {
                local.remove(&remote.id).map(|document| MirroredEntry { document, remote })
            })
            .collect())
    }

    async fn materialize(&self, meta: &ObjectMeta, caller_id: &str) -> Option<Document> {
        match self
            .store
            .upsert_document(NewDocument::from_meta(meta, caller_id))
            .await
        {
            Ok(doc) => {
                self.events.send(Event::Materialized {
                    id: doc.id,
                    key: doc.key.clone(),
                });
                Some(doc)
            }
            Err(e) => {
                warn!(key = %meta.id, error = %e, "skipping object that could not be mirrored");
                None
            }
        }
    }

    /// Check every mirrored row against the remote store and prune rows whose
    /// object no longer exists, together with their shares and task links.
    pub async fn audit(&self) -> Result<AuditReport> {
        let documents = self.store.all_documents().await?;
        let mut report = AuditReport::default();
        for doc in documents {
            report.checked += 1;
            match self.remote.get_object(&doc.key).await {
                Ok(_) => {}
                Err(RemoteError::NotFound(_)) => {
                    if self.store.delete_document(doc.id).await? {
                        info!(id = %doc.id, key = %doc.key, "pruned dangling mirror row");
                        self.events.send(Event::Pruned {
                            id: doc.id,
                            key: doc.key.clone(),
                        });
                        report.pruned.push(doc.id);
                    }
                }
                Err(e) => return Err(MirrorError::RemoteUnavailable(e)),
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::{DocumentKind, DocumentPatch, NewShare, Share, UserRecord};
    use crate::remote::memory::{MemoryRemoteStore, RemoteOp};
    use crate::storage::{MemoryStore, StoreResult};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::{HashMap, HashSet};

    fn setup() -> (Arc<MemoryRemoteStore>, Arc<MemoryStore>, Reconciler) {
        let remote = Arc::new(MemoryRemoteStore::new("root"));
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(remote.clone(), store.clone(), EventBus::new(), 4);
        (remote, store, reconciler)
    }

    fn remote_file(id: &str, parent: &str) -> ObjectMeta {
        ObjectMeta {
            id: id.into(),
            name: format!("{}.txt", id),
            mime_type: "text/plain".into(),
            kind: DocumentKind::File,
            size_bytes: Some(3),
            web_url: None,
            parent_id: Some(parent.into()),
        }
    }

    fn ids(entries: &[MirroredEntry]) -> Vec<DocumentId> {
        entries.iter().map(|e| e.document.id).collect()
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn listing_future_can_be_spawned() {
        let (_remote, _store, reconciler) = setup();
        let listing = reconciler.materialize_listing("root", Some("q"), "alice");
        assert_send(&listing);
    }

    #[tokio::test]
    async fn listing_is_idempotent() {
        let (remote, store, reconciler) = setup();
        for i in 0..5 {
            remote.insert_object(remote_file(&format!("f{}", i), "root"));
        }
        let first = reconciler.materialize_listing("root", None, "alice").await.unwrap();
        let second = reconciler.materialize_listing("root", None, "bob").await.unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(store.all_documents().await.unwrap().len(), 5);
        // first lister owns the materialized rows
        assert!(second.iter().all(|e| e.document.owner_id == "alice"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_listings_converge_on_one_row() {
        let (remote, store, reconciler) = setup();
        remote.insert_object(remote_file("K", "root"));
        let reconciler = Arc::new(reconciler);

        let a = {
            let r = reconciler.clone();
            tokio::spawn(async move { r.materialize_listing("root", None, "alice").await })
        };
        let b = {
            let r = reconciler.clone();
            tokio::spawn(async move { r.materialize_listing("root", None, "bob").await })
        };
        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());

        assert_eq!(ids(&a), ids(&b));
        let rows: Vec<_> = store
            .all_documents()
            .await
            .unwrap()
            .into_iter()
            .filter(|d| d.key == "K")
            .collect();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn remote_failure_writes_nothing() {
        let (remote, store, reconciler) = setup();
        remote.insert_object(remote_file("a", "root"));
        remote.fail(RemoteOp::ListChildren, RemoteError::Unavailable("timeout".into()));
        let err = reconciler
            .materialize_listing("root", None, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::RemoteUnavailable(_)));
        assert!(store.all_documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dangling_rows_survive_listing() {
        let (remote, store, reconciler) = setup();
        remote.insert_object(remote_file("gone", "root"));
        remote.insert_object(remote_file("kept", "root"));
        reconciler.materialize_listing("root", None, "alice").await.unwrap();
        remote.remove_object("gone");

        let listed = reconciler.materialize_listing("root", None, "alice").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(store.document_by_key("gone").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn query_narrows_listing() {
        let (remote, store, reconciler) = setup();
        remote.insert_object(remote_file("report", "root"));
        remote.insert_object(remote_file("invoice", "root"));
        let listed = reconciler
            .materialize_listing("root", Some("REP"), "alice")
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].remote.id, "report");
        assert_eq!(store.all_documents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn audit_prunes_only_missing_objects() {
        let (remote, store, reconciler) = setup();
        let folder = remote.create_folder("Reports", "root").await.unwrap();
        remote
            .upload_object(Bytes::from_static(b"abc"), "Q1.pdf", "application/pdf", &folder.id)
            .await
            .unwrap();
        reconciler.materialize_listing("root", None, "alice").await.unwrap();
        let files = reconciler
            .materialize_listing(&folder.id, None, "alice")
            .await
            .unwrap();
        let file_id = files[0].document.id;
        store.link_task("task-9", file_id).await.unwrap();
        remote.remove_object(&files[0].remote.id);

        let report = reconciler.audit().await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.pruned, vec![file_id]);
        assert!(store.task_links(file_id).await.unwrap().is_empty());
        assert!(store.document_by_key(&folder.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn audit_aborts_when_remote_is_down() {
        let (remote, store, reconciler) = setup();
        remote.insert_object(remote_file("a", "root"));
        reconciler.materialize_listing("root", None, "alice").await.unwrap();
        remote.fail(RemoteOp::GetObject, RemoteError::Unavailable("down".into()));
        assert!(matches!(
            reconciler.audit().await,
            Err(MirrorError::RemoteUnavailable(_))
        ));
        assert_eq!(store.all_documents().await.unwrap().len(), 1);
    }

    /// Store whose upserts fail for selected keys.
    struct FlakyStore {
        inner: MemoryStore,
        failing: HashSet<String>,
    }

    #[async_trait]
    impl MirrorStore for FlakyStore {
        async fn document(&self, id: DocumentId) -> StoreResult<Option<Document>> {
            self.inner.document(id).await
        }
        async fn document_by_key(&self, key: &str) -> StoreResult<Option<Document>> {
            self.inner.document_by_key(key).await
        }
        async fn documents_by_keys(&self, keys: &[String]) -> StoreResult<HashMap<String, Document>> {
            self.inner.documents_by_keys(keys).await
        }
        async fn all_documents(&self) -> StoreResult<Vec<Document>> {
            self.inner.all_documents().await
        }
        async fn upsert_document(&self, doc: NewDocument) -> StoreResult<Document> {
            if self.failing.contains(&doc.key) {
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            self.inner.upsert_document(doc).await
        }
        async fn update_document(&self, id: DocumentId, patch: DocumentPatch) -> StoreResult<Option<Document>> {
            self.inner.update_document(id, patch).await
        }
        async fn delete_document(&self, id: DocumentId) -> StoreResult<bool> {
            self.inner.delete_document(id).await
        }
        async fn share(&self, document_id: DocumentId, grantee_id: &str) -> StoreResult<Option<Share>> {
            self.inner.share(document_id, grantee_id).await
        }
        async fn shares_for_document(&self, document_id: DocumentId) -> StoreResult<Vec<Share>> {
            self.inner.shares_for_document(document_id).await
        }
        async fn shares_for_grantee(&self, grantee_id: &str) -> StoreResult<Vec<Share>> {
            self.inner.shares_for_grantee(grantee_id).await
        }
        async fn upsert_share(&self, share: NewShare) -> StoreResult<Share> {
            self.inner.upsert_share(share).await
        }
        async fn delete_share(&self, document_id: DocumentId, grantee_id: &str) -> StoreResult<bool> {
            self.inner.delete_share(document_id, grantee_id).await
        }
        async fn user(&self, id: &str) -> StoreResult<Option<UserRecord>> {
            self.inner.user(id).await
        }
        async fn upsert_user(&self, user: UserRecord) -> StoreResult<()> {
            self.inner.upsert_user(user).await
        }
        async fn link_task(&self, task_id: &str, document_id: DocumentId) -> StoreResult<()> {
            self.inner.link_task(task_id, document_id).await
        }
        async fn task_links(&self, document_id: DocumentId) -> StoreResult<Vec<String>> {
            self.inner.task_links(document_id).await
        }
    }

    #[tokio::test]
    async fn failed_upsert_is_skipped_not_fatal() {
        let remote = Arc::new(MemoryRemoteStore::new("root"));
        for id in ["a", "b", "c"] {
            remote.insert_object(remote_file(id, "root"));
        }
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            failing: HashSet::from(["b".to_string()]),
        });
        let reconciler = Reconciler::new(remote, store.clone(), EventBus::new(), 2);

        let listed = reconciler.materialize_listing("root", None, "alice").await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|e| e.remote.id.as_str()).collect();
        assert_eq!(keys, vec!["a", "c"]);
        assert_eq!(store.all_documents().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn materialization_is_announced() {
        let (remote, _store, reconciler) = setup();
        let mut rx = reconciler.events.subscribe();
        remote.insert_object(remote_file("new", "root"));
        reconciler.materialize_listing("root", None, "alice").await.unwrap();
        match rx.try_recv().unwrap() {
            Event::Materialized { key, .. } => assert_eq!(key, "new"),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
