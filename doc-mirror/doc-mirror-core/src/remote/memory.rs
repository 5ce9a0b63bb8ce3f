//! In-process object store used for local runs and tests.

use super::{RemoteResult, RemoteStore, FOLDER_MIME_TYPE};
use crate::error::RemoteError;
use crate::model::{DocumentKind, Grant, ObjectMeta, Permission};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    CreateFolder,
    ListChildren,
    GetObject,
    UploadObject,
    DeleteObject,
    MoveObject,
    RenameObject,
    GrantAccess,
    RevokeAccess,
    ListGrants,
}

struct StoredObject {
    meta: ObjectMeta,
    content: Option<Bytes>,
    grants: Vec<Grant>,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<String, StoredObject>,
    failures: HashMap<RemoteOp, RemoteError>,
    calls: HashMap<RemoteOp, usize>,
}

pub struct MemoryRemoteStore {
    root_id: String,
    inner: Mutex<Inner>,
}

fn new_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

impl MemoryRemoteStore {
    pub fn new(root_id: impl Into<String>) -> Self {
        Self {
            root_id: root_id.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    /// Make every subsequent `op` fail with `err` until [`Self::recover`].
    pub fn fail(&self, op: RemoteOp, err: RemoteError) {
        self.inner.lock().failures.insert(op, err);
    }

    pub fn recover(&self, op: RemoteOp) {
        self.inner.lock().failures.remove(&op);
    }

    /// Number of attempted calls of `op`, failed ones included.
    pub fn calls(&self, op: RemoteOp) -> usize {
        self.inner.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Place an object directly, as if created by another client.
    pub fn insert_object(&self, meta: ObjectMeta) {
        self.inner.lock().objects.insert(
            meta.id.clone(),
            StoredObject {
                meta,
                content: None,
                grants: Vec::new(),
            },
        );
    }

    /// Drop an object directly, as if deleted by another client.
    pub fn remove_object(&self, id: &str) -> bool {
        self.inner.lock().objects.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().objects.contains_key(id)
    }

    pub fn content(&self, id: &str) -> Option<Bytes> {
        self.inner.lock().objects.get(id).and_then(|o| o.content.clone())
    }

    pub fn grants(&self, id: &str) -> Vec<Grant> {
        self.inner
            .lock()
            .objects
            .get(id)
            .map(|o| o.grants.clone())
            .unwrap_or_default()
    }

    /// Record the call and return the injected failure, if any.
    async fn enter(&self, op: RemoteOp) -> RemoteResult<()> {
        // give concurrent callers a chance to interleave, like a real round trip
        tokio::task::yield_now().await;
        let mut inner = self.inner.lock();
        *inner.calls.entry(op).or_default() += 1;
        match inner.failures.get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn is_folder(inner: &Inner, root_id: &str, id: &str) -> bool {
        id == root_id
            || inner
                .objects
                .get(id)
                .map_or(false, |o| o.meta.kind == DocumentKind::Folder)
    }

    fn exists(inner: &Inner, root_id: &str, id: &str) -> bool {
        id == root_id || inner.objects.contains_key(id)
    }

    fn descendants(inner: &Inner, id: &str) -> Vec<String> {
        let mut out = vec![id.to_string()];
        let mut i = 0;
        while i < out.len() {
            let current = out[i].clone();
            out.extend(
                inner
                    .objects
                    .values()
                    .filter(|o| o.meta.parent_id.as_deref() == Some(current.as_str()))
                    .map(|o| o.meta.id.clone()),
            );
            i += 1;
        }
        out
    }

    fn insert_new(
        &self,
        name: &str,
        mime_type: &str,
        kind: DocumentKind,
        parent_id: &str,
        content: Option<Bytes>,
    ) -> RemoteResult<ObjectMeta> {
        let mut inner = self.inner.lock();
        if !Self::is_folder(&inner, &self.root_id, parent_id) {
            return Err(RemoteError::NotFound(parent_id.to_string()));
        }
        let id = new_id("obj");
        let meta = ObjectMeta {
            id: id.clone(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            kind,
            size_bytes: content.as_ref().map(|c| c.len() as u64),
            web_url: Some(format!("memory://{}", id)),
            parent_id: Some(parent_id.to_string()),
        };
        inner.objects.insert(
            id,
            StoredObject {
                meta: meta.clone(),
                content,
                grants: Vec::new(),
            },
        );
        Ok(meta)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn create_folder(&self, name: &str, parent_id: &str) -> RemoteResult<ObjectMeta> {
        self.enter(RemoteOp::CreateFolder).await?;
        self.insert_new(name, FOLDER_MIME_TYPE, DocumentKind::Folder, parent_id, None)
    }

    async fn list_children(
        &self,
        folder_id: &str,
        query: Option<&str>,
    ) -> RemoteResult<Vec<ObjectMeta>> {
        self.enter(RemoteOp::ListChildren).await?;
        let inner = self.inner.lock();
        if !Self::is_folder(&inner, &self.root_id, folder_id) {
            return Err(RemoteError::NotFound(folder_id.to_string()));
        }
        let needle = query.map(|q| q.to_lowercase());
        let mut out: Vec<ObjectMeta> = inner
            .objects
            .values()
            .filter(|o| o.meta.parent_id.as_deref() == Some(folder_id))
            .filter(|o| {
                needle
                    .as_deref()
                    .map_or(true, |n| o.meta.name.to_lowercase().contains(n))
            })
            .map(|o| o.meta.clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn get_object(&self, id: &str) -> RemoteResult<ObjectMeta> {
        self.enter(RemoteOp::GetObject).await?;
        self.inner
            .lock()
            .objects
            .get(id)
            .map(|o| o.meta.clone())
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    async fn upload_object(
        &self,
        bytes: Bytes,
        name: &str,
        mime_type: &str,
        parent_id: &str,
    ) -> RemoteResult<ObjectMeta> {
        self.enter(RemoteOp::UploadObject).await?;
        self.insert_new(name, mime_type, DocumentKind::File, parent_id, Some(bytes))
    }

    async fn delete_object(&self, id: &str) -> RemoteResult<()> {
        self.enter(RemoteOp::DeleteObject).await?;
        let mut inner = self.inner.lock();
        if !inner.objects.contains_key(id) {
            return Err(RemoteError::NotFound(id.to_string()));
        }
        for victim in Self::descendants(&inner, id) {
            inner.objects.remove(&victim);
        }
        Ok(())
    }

    async fn move_object(
        &self,
        id: &str,
        _old_parent_id: Option<&str>,
        new_parent_id: &str,
    ) -> RemoteResult<()> {
        self.enter(RemoteOp::MoveObject).await?;
        let mut inner = self.inner.lock();
        if !Self::exists(&inner, &self.root_id, new_parent_id)
            || !Self::is_folder(&inner, &self.root_id, new_parent_id)
        {
            return Err(RemoteError::NotFound(new_parent_id.to_string()));
        }
        let object = inner
            .objects
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        object.meta.parent_id = Some(new_parent_id.to_string());
        Ok(())
    }

    async fn rename_object(&self, id: &str, new_name: &str) -> RemoteResult<()> {
        self.enter(RemoteOp::RenameObject).await?;
        let mut inner = self.inner.lock();
        let object = inner
            .objects
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        object.meta.name = new_name.to_string();
        Ok(())
    }

    async fn grant_access(&self, id: &str, email: &str, level: Permission) -> RemoteResult<Grant> {
        self.enter(RemoteOp::GrantAccess).await?;
        let mut inner = self.inner.lock();
        let object = inner
            .objects
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        // the store keeps one permission per email and updates it in place
        if let Some(existing) = object
            .grants
            .iter_mut()
            .find(|g| g.email.as_deref().map_or(false, |e| e.eq_ignore_ascii_case(email)))
        {
            existing.level = level;
            return Ok(existing.clone());
        }
        let grant = Grant {
            id: new_id("perm"),
            email: Some(email.to_string()),
            level,
        };
        object.grants.push(grant.clone());
        Ok(grant)
    }

    async fn revoke_access(&self, id: &str, permission_id: &str) -> RemoteResult<()> {
        self.enter(RemoteOp::RevokeAccess).await?;
        let mut inner = self.inner.lock();
        let object = inner
            .objects
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        let before = object.grants.len();
        object.grants.retain(|g| g.id != permission_id);
        if object.grants.len() == before {
            return Err(RemoteError::NotFound(permission_id.to_string()));
        }
        Ok(())
    }

    async fn list_grants(&self, id: &str) -> RemoteResult<Vec<Grant>> {
        self.enter(RemoteOp::ListGrants).await?;
        self.inner
            .lock()
            .objects
            .get(id)
            .map(|o| o.grants.clone())
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }
}
