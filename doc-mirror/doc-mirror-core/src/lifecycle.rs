//! Externally callable document operations.
//!
//! Each operation follows the same order: session, validation, permission,
//! remote effect, local mutation. A permission failure never reaches the
//! remote store, and a remote failure never reaches the local store.

use crate::authz::require;
use crate::config::MirrorConfig;
use crate::error::{MirrorError, RemoteError, Result};
use crate::events::{Event, EventBus};
use crate::model::{
    Document, DocumentId, DocumentPatch, MirroredEntry, NewDocument, Permission, Principal, Share,
};
use crate::reconcile::{AuditReport, Reconciler};
use crate::remote::RemoteStore;
use crate::sharing::{SharePropagator, SharedDocument};
use crate::storage::MirrorStore;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Bound on the parent chain walked when checking a move for cycles.
const MAX_FOLDER_DEPTH: usize = 256;

/// File payload for [`DocumentManager::upload`].
#[derive(Clone, Debug)]
pub struct Upload {
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
    pub parent: Option<DocumentId>,
}

pub struct DocumentManager {
    config: MirrorConfig,
    remote: Arc<dyn RemoteStore>,
    store: Arc<dyn MirrorStore>,
    reconciler: Reconciler,
    sharing: SharePropagator,
    events: EventBus,
}

fn session(session: Option<&Principal>) -> Result<&Principal> {
    session.ok_or(MirrorError::Unauthorized)
}

impl DocumentManager {
    pub fn new(
        config: MirrorConfig,
        remote: Arc<dyn RemoteStore>,
        store: Arc<dyn MirrorStore>,
        events: EventBus,
    ) -> Self {
        let reconciler = Reconciler::new(
            remote.clone(),
            store.clone(),
            events.clone(),
            config.materialize_concurrency,
        );
        let sharing = SharePropagator::new(remote.clone(), store.clone(), events.clone());
        Self {
            config,
            remote,
            store,
            reconciler,
            sharing,
            events,
        }
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn MirrorStore> {
        &self.store
    }

    async fn load(&self, id: DocumentId) -> Result<Document> {
        self.store
            .document(id)
            .await?
            .ok_or_else(|| MirrorError::not_found("document"))
    }

    /// Remote key of `folder` (root when `None`) after checking `level` on it.
    async fn folder_key(
        &self,
        user: &Principal,
        folder: Option<DocumentId>,
        level: Permission,
        field: &str,
        action: &str,
    ) -> Result<String> {
        let Some(id) = folder else {
            return Ok(self.config.root_folder_key.clone());
        };
        let doc = self.load(id).await?;
        if !doc.is_folder() {
            return Err(MirrorError::invalid(field, "is not a folder"));
        }
        require(self.store.as_ref(), user, &doc, level, action).await?;
        Ok(doc.key)
    }

    fn validate_name(&self, name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MirrorError::invalid("name", "is required"));
        }
        if name.chars().count() > self.config.max_name_len {
            return Err(MirrorError::invalid(
                "name",
                format!("must be at most {} characters", self.config.max_name_len),
            ));
        }
        if name.contains('/') {
            return Err(MirrorError::invalid("name", "must not contain '/'"));
        }
        Ok(name.to_string())
    }

    /// The caller's view of `id`.
    pub async fn document(&self, session_user: Option<&Principal>, id: DocumentId) -> Result<Document> {
        let user = session(session_user)?;
        let doc = self.load(id).await?;
        require(self.store.as_ref(), user, &doc, Permission::View, "view this document").await?;
        Ok(doc)
    }

    /// List a folder (root when `None`), mirroring unseen children locally.
    pub async fn list(
        &self,
        session_user: Option<&Principal>,
        folder: Option<DocumentId>,
        query: Option<&str>,
    ) -> Result<Vec<MirroredEntry>> {
        let user = session(session_user)?;
        let key = self
            .folder_key(user, folder, Permission::View, "folder_id", "view this folder")
            .await?;
        let query = query.map(str::trim).filter(|q| !q.is_empty());
        self.reconciler.materialize_listing(&key, query, &user.id).await
    }

    pub async fn create_folder(
        &self,
        session_user: Option<&Principal>,
        name: &str,
        parent: Option<DocumentId>,
    ) -> Result<Document> {
        let user = session(session_user)?;
        let name = self.validate_name(name)?;
        let parent_key = self
            .folder_key(user, parent, Permission::Edit, "parent_id", "add items to this folder")
            .await?;
        let meta = self.remote.create_folder(&name, &parent_key).await?;
        let doc = self.record_created(NewDocument::from_meta(&meta, &user.id)).await?;
        info!(id = %doc.id, key = %doc.key, owner = %user.id, "created folder");
        Ok(doc)
    }

    pub async fn upload(&self, session_user: Option<&Principal>, upload: Upload) -> Result<Document> {
        let user = session(session_user)?;
        let name = self.validate_name(&upload.name)?;
        let mime_type = upload.mime_type.trim();
        if mime_type.is_empty() {
            return Err(MirrorError::invalid("mime_type", "is required"));
        }
        if upload.bytes.len() as u64 > self.config.max_upload_bytes {
            return Err(MirrorError::invalid(
                "file",
                format!("exceeds the {} byte limit", self.config.max_upload_bytes),
            ));
        }
        let parent_key = self
            .folder_key(user, upload.parent, Permission::Edit, "parent_id", "add items to this folder")
            .await?;
        let meta = self
            .remote
            .upload_object(upload.bytes, &name, mime_type, &parent_key)
            .await?;
        let doc = self.record_created(NewDocument::from_meta(&meta, &user.id)).await?;
        info!(id = %doc.id, key = %doc.key, owner = %user.id, size = ?doc.size_bytes, "uploaded file");
        Ok(doc)
    }

    async fn record_created(&self, new: NewDocument) -> Result<Document> {
        let key = new.key.clone();
        match self.store.upsert_document(new).await {
            Ok(doc) => {
                self.events.send(Event::Created { id: doc.id });
                Ok(doc)
            }
            Err(e) => {
                // the object exists remotely; the next listing will mirror it
                warn!(%key, error = %e, "created remotely but not recorded locally");
                Err(e.into())
            }
        }
    }

    /// Delete remotely, then locally with shares and task links.
    pub async fn delete(&self, session_user: Option<&Principal>, id: DocumentId) -> Result<()> {
        let user = session(session_user)?;
        let doc = self.load(id).await?;
        require(self.store.as_ref(), user, &doc, Permission::Edit, "delete this document").await?;

        match self.remote.delete_object(&doc.key).await {
            Ok(()) => {}
            Err(RemoteError::NotFound(_)) => {
                warn!(id = %doc.id, key = %doc.key, "remote object already gone, removing mirror row");
            }
            Err(e) => return Err(MirrorError::RemoteUnavailable(e)),
        }
        self.store.delete_document(doc.id).await?;
        let descendants = self.local_descendants(&doc.key).await?;
        for &id in &descendants {
            self.store.delete_document(id).await?;
            self.events.send(Event::Deleted { id });
        }
        info!(
            id = %doc.id,
            key = %doc.key,
            by = %user.id,
            descendants = descendants.len(),
            "deleted document"
        );
        self.events.send(Event::Deleted { id: doc.id });
        Ok(())
    }

    /// Mirror rows below `key`. The remote drops a folder's contents with
    /// it, so these rows have nothing left to point at.
    async fn local_descendants(&self, key: &str) -> Result<Vec<DocumentId>> {
        let mut children: HashMap<String, Vec<(DocumentId, String)>> = HashMap::new();
        for doc in self.store.all_documents().await? {
            if let Some(parent) = doc.parent_key {
                children.entry(parent).or_default().push((doc.id, doc.key));
            }
        }
        let mut found = Vec::new();
        let mut seen = HashSet::from([key.to_string()]);
        let mut pending = vec![key.to_string()];
        while let Some(parent) = pending.pop() {
            for (id, child_key) in children.remove(&parent).unwrap_or_default() {
                if seen.insert(child_key.clone()) {
                    found.push(id);
                    pending.push(child_key);
                }
            }
        }
        Ok(found)
    }

    pub async fn rename(
        &self,
        session_user: Option<&Principal>,
        id: DocumentId,
        name: &str,
    ) -> Result<Document> {
        let user = session(session_user)?;
        let name = self.validate_name(name)?;
        let doc = self.load(id).await?;
        require(self.store.as_ref(), user, &doc, Permission::Edit, "rename this document").await?;
        if doc.name == name {
            return Ok(doc);
        }

        self.remote.rename_object(&doc.key, &name).await?;
        let updated = self
            .store
            .update_document(
                doc.id,
                DocumentPatch {
                    name: Some(name.clone()),
                    ..Default::default()
                },
            )
            .await?
            .ok_or_else(|| MirrorError::not_found("document"))?;
        self.events.send(Event::Renamed { id: doc.id, name });
        Ok(updated)
    }

    /// Move into `new_parent` (root when `None`). Needs edit on both the
    /// document and the destination.
    pub async fn move_document(
        &self,
        session_user: Option<&Principal>,
        id: DocumentId,
        new_parent: Option<DocumentId>,
    ) -> Result<Document> {
        let user = session(session_user)?;
        let doc = self.load(id).await?;
        require(self.store.as_ref(), user, &doc, Permission::Edit, "move this document").await?;
        if new_parent == Some(doc.id) {
            return Err(MirrorError::invalid("new_parent_id", "cannot move a folder into itself"));
        }
        let dest_key = self
            .folder_key(user, new_parent, Permission::Edit, "new_parent_id", "add items to this folder")
            .await?;
        if doc.parent_key.as_deref() == Some(dest_key.as_str()) {
            return Ok(doc);
        }
        if doc.is_folder() && self.is_within(&dest_key, &doc.key).await? {
            return Err(MirrorError::invalid(
                "new_parent_id",
                "cannot move a folder into its own descendant",
            ));
        }

        self.remote
            .move_object(&doc.key, doc.parent_key.as_deref(), &dest_key)
            .await?;
        let updated = self
            .store
            .update_document(
                doc.id,
                DocumentPatch {
                    parent_key: Some(Some(dest_key.clone())),
                    ..Default::default()
                },
            )
            .await?
            .ok_or_else(|| MirrorError::not_found("document"))?;
        info!(id = %doc.id, to = %dest_key, "moved document");
        self.events.send(Event::Moved {
            id: doc.id,
            new_parent: dest_key,
        });
        Ok(updated)
    }

    /// Whether `folder_key` is `ancestor_key` or sits below it, judged by the
    /// parent links recorded in the mirror.
    async fn is_within(&self, folder_key: &str, ancestor_key: &str) -> Result<bool> {
        let mut current = Some(folder_key.to_string());
        for _ in 0..MAX_FOLDER_DEPTH {
            let Some(key) = current else { return Ok(false) };
            if key == ancestor_key {
                return Ok(true);
            }
            current = self
                .store
                .document_by_key(&key)
                .await?
                .and_then(|d| d.parent_key);
        }
        Ok(false)
    }

    pub async fn grant(
        &self,
        session_user: Option<&Principal>,
        id: DocumentId,
        grantee_id: &str,
        level: Permission,
    ) -> Result<Share> {
        let user = session(session_user)?;
        self.sharing.grant(user, id, grantee_id, level).await
    }

    pub async fn revoke(
        &self,
        session_user: Option<&Principal>,
        id: DocumentId,
        grantee_id: &str,
    ) -> Result<bool> {
        let user = session(session_user)?;
        self.sharing.revoke(user, id, grantee_id).await
    }

    pub async fn list_shares(&self, session_user: Option<&Principal>, id: DocumentId) -> Result<Vec<Share>> {
        let user = session(session_user)?;
        self.sharing.list_shares(user, id).await
    }

    pub async fn shared_with_me(&self, session_user: Option<&Principal>) -> Result<Vec<SharedDocument>> {
        let user = session(session_user)?;
        self.sharing.shared_with(user).await
    }

    /// Link a document to a task record owned by the task subsystem.
    pub async fn attach_to_task(
        &self,
        session_user: Option<&Principal>,
        id: DocumentId,
        task_id: &str,
    ) -> Result<()> {
        let user = session(session_user)?;
        let task_id = task_id.trim();
        if task_id.is_empty() {
            return Err(MirrorError::invalid("task_id", "is required"));
        }
        let doc = self.load(id).await?;
        require(self.store.as_ref(), user, &doc, Permission::View, "attach this document").await?;
        self.store.link_task(task_id, doc.id).await?;
        Ok(())
    }

    /// Prune mirror rows whose remote object is gone. Admins only.
    pub async fn audit(&self, session_user: Option<&Principal>) -> Result<AuditReport> {
        let user = session(session_user)?;
        if !user.is_admin() {
            return Err(MirrorError::forbidden("run a mirror audit"));
        }
        let report = self.reconciler.audit().await?;
        info!(checked = report.checked, pruned = report.pruned.len(), "mirror audit finished");
        Ok(report)
    }
}
