//! Mutex-guarded mirror tables, optionally persisted as a JSON snapshot.

use super::{MirrorStore, StoreResult};
use crate::error::StoreError;
use crate::model::{Document, DocumentId, DocumentPatch, NewDocument, NewShare, Share, UserRecord};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const SNAPSHOT_FILE: &str = "mirror.json";

#[derive(Clone, Default)]
struct Tables {
    documents: HashMap<DocumentId, Document>,
    by_key: HashMap<String, DocumentId>,
    shares: HashMap<(DocumentId, String), Share>,
    users: HashMap<String, UserRecord>,
    task_links: BTreeSet<(String, DocumentId)>,
}

#[derive(Serialize, Deserialize, Default)]
struct Snapshot {
    documents: Vec<Document>,
    shares: Vec<Share>,
    users: Vec<UserRecord>,
    task_links: Vec<TaskLink>,
}

#[derive(Serialize, Deserialize)]
struct TaskLink {
    task_id: String,
    document_id: DocumentId,
}

impl Tables {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut tables = Tables::default();
        for doc in snapshot.documents {
            tables.by_key.insert(doc.key.clone(), doc.id);
            tables.documents.insert(doc.id, doc);
        }
        for share in snapshot.shares {
            tables
                .shares
                .insert((share.document_id, share.grantee_id.clone()), share);
        }
        for user in snapshot.users {
            tables.users.insert(user.id.clone(), user);
        }
        for link in snapshot.task_links {
            tables.task_links.insert((link.task_id, link.document_id));
        }
        tables
    }

    fn to_snapshot(&self) -> Snapshot {
        let mut documents: Vec<Document> = self.documents.values().cloned().collect();
        documents.sort_by_key(|d| d.created_at);
        Snapshot {
            documents,
            shares: self.shares.values().cloned().collect(),
            users: self.users.values().cloned().collect(),
            task_links: self
                .task_links
                .iter()
                .map(|(task_id, document_id)| TaskLink {
                    task_id: task_id.clone(),
                    document_id: *document_id,
                })
                .collect(),
        }
    }
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
    dir: Option<PathBuf>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Volatile store; nothing touches disk.
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            dir: None,
        }
    }

    /// Load the snapshot in `dir` (if any) and persist every mutation there.
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating data dir {}", dir.display()))?;
        let path = dir.join(SNAPSHOT_FILE);
        let snapshot = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?
        } else {
            Snapshot::default()
        };
        Ok(Self {
            tables: Mutex::new(Tables::from_snapshot(snapshot)),
            dir: Some(dir),
        })
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn persist(&self, tables: &Tables) -> StoreResult<()> {
        let Some(dir) = &self.dir else { return Ok(()) };
        let data = serde_json::to_vec_pretty(&tables.to_snapshot())
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let tmp = dir.join(format!("{}.tmp", SNAPSHOT_FILE));
        std::fs::write(&tmp, data)
            .and_then(|_| std::fs::rename(&tmp, dir.join(SNAPSHOT_FILE)))
            .map_err(|e| {
                tracing::error!(error = %e, dir = %dir.display(), "failed to persist mirror snapshot");
                StoreError::Unavailable(e.to_string())
            })
    }

    /// Apply `change` to a copy of the tables, persist the copy and only then
    /// make it visible. A failed write leaves `tables` as it was.
    fn commit<T>(&self, tables: &mut Tables, change: impl FnOnce(&mut Tables) -> T) -> StoreResult<T> {
        if self.dir.is_none() {
            return Ok(change(tables));
        }
        let mut next = tables.clone();
        let out = change(&mut next);
        self.persist(&next)?;
        *tables = next;
        Ok(out)
    }
}

#[async_trait]
impl MirrorStore for MemoryStore {
    async fn document(&self, id: DocumentId) -> StoreResult<Option<Document>> {
        Ok(self.tables.lock().documents.get(&id).cloned())
    }

    async fn document_by_key(&self, key: &str) -> StoreResult<Option<Document>> {
        let tables = self.tables.lock();
        Ok(tables
            .by_key
            .get(key)
            .and_then(|id| tables.documents.get(id))
            .cloned())
    }

    async fn documents_by_keys(&self, keys: &[String]) -> StoreResult<HashMap<String, Document>> {
        let tables = self.tables.lock();
        Ok(keys
            .iter()
            .filter_map(|k| tables.by_key.get(k).and_then(|id| tables.documents.get(id)))
            .map(|d| (d.key.clone(), d.clone()))
            .collect())
    }

    async fn all_documents(&self) -> StoreResult<Vec<Document>> {
        let mut docs: Vec<Document> = self.tables.lock().documents.values().cloned().collect();
        docs.sort_by_key(|d| d.created_at);
        Ok(docs)
    }

    async fn upsert_document(&self, doc: NewDocument) -> StoreResult<Document> {
        let mut tables = self.tables.lock();
        if let Some(existing) = tables.by_key.get(&doc.key).and_then(|id| tables.documents.get(id)) {
            return Ok(existing.clone());
        }
        let row = Document {
            id: Uuid::new_v4(),
            key: doc.key,
            name: doc.name,
            mime_type: doc.mime_type,
            kind: doc.kind,
            size_bytes: doc.size_bytes,
            remote_url: doc.remote_url,
            parent_key: doc.parent_key,
            owner_id: doc.owner_id,
            created_at: Utc::now(),
        };
        self.commit(&mut tables, |t| {
            t.by_key.insert(row.key.clone(), row.id);
            t.documents.insert(row.id, row.clone());
        })?;
        Ok(row)
    }

    async fn update_document(&self, id: DocumentId, patch: DocumentPatch) -> StoreResult<Option<Document>> {
        let mut tables = self.tables.lock();
        if !tables.documents.contains_key(&id) {
            return Ok(None);
        }
        self.commit(&mut tables, |t| {
            t.documents.get_mut(&id).map(|doc| {
                if let Some(name) = patch.name {
                    doc.name = name;
                }
                if let Some(parent_key) = patch.parent_key {
                    doc.parent_key = parent_key;
                }
                doc.clone()
            })
        })
    }

    async fn delete_document(&self, id: DocumentId) -> StoreResult<bool> {
        let mut tables = self.tables.lock();
        if !tables.documents.contains_key(&id) {
            return Ok(false);
        }
        self.commit(&mut tables, |t| {
            if let Some(doc) = t.documents.remove(&id) {
                t.by_key.remove(&doc.key);
            }
            t.shares.retain(|(doc_id, _), _| *doc_id != id);
            t.task_links.retain(|(_, doc_id)| *doc_id != id);
        })?;
        Ok(true)
    }

    async fn share(&self, document_id: DocumentId, grantee_id: &str) -> StoreResult<Option<Share>> {
        Ok(self
            .tables
            .lock()
            .shares
            .get(&(document_id, grantee_id.to_string()))
            .cloned())
    }

    async fn shares_for_document(&self, document_id: DocumentId) -> StoreResult<Vec<Share>> {
        let mut shares: Vec<Share> = self
            .tables
            .lock()
            .shares
            .values()
            .filter(|s| s.document_id == document_id)
            .cloned()
            .collect();
        shares.sort_by(|a, b| a.grantee_id.cmp(&b.grantee_id));
        Ok(shares)
    }

    async fn shares_for_grantee(&self, grantee_id: &str) -> StoreResult<Vec<Share>> {
        let mut shares: Vec<Share> = self
            .tables
            .lock()
            .shares
            .values()
            .filter(|s| s.grantee_id == grantee_id)
            .cloned()
            .collect();
        shares.sort_by_key(|s| s.created_at);
        Ok(shares)
    }

    async fn upsert_share(&self, share: NewShare) -> StoreResult<Share> {
        let mut tables = self.tables.lock();
        if !tables.documents.contains_key(&share.document_id) {
            return Err(StoreError::Conflict(format!(
                "share references missing document {}",
                share.document_id
            )));
        }
        self.commit(&mut tables, |t| {
            t.shares
                .entry((share.document_id, share.grantee_id.clone()))
                .and_modify(|existing| {
                    existing.permission = share.permission;
                    existing.granted_by_id = share.granted_by_id.clone();
                    if share.remote_grant_id.is_some() {
                        existing.remote_grant_id = share.remote_grant_id.clone();
                    }
                })
                .or_insert_with(|| Share {
                    document_id: share.document_id,
                    granted_by_id: share.granted_by_id.clone(),
                    grantee_id: share.grantee_id.clone(),
                    permission: share.permission,
                    remote_grant_id: share.remote_grant_id.clone(),
                    created_at: Utc::now(),
                })
                .clone()
        })
    }

    async fn delete_share(&self, document_id: DocumentId, grantee_id: &str) -> StoreResult<bool> {
        let mut tables = self.tables.lock();
        let key = (document_id, grantee_id.to_string());
        if !tables.shares.contains_key(&key) {
            return Ok(false);
        }
        self.commit(&mut tables, |t| t.shares.remove(&key).is_some())
    }

    async fn user(&self, id: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self.tables.lock().users.get(id).cloned())
    }

    async fn upsert_user(&self, user: UserRecord) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        self.commit(&mut tables, |t| {
            t.users.insert(user.id.clone(), user);
        })
    }

    async fn link_task(&self, task_id: &str, document_id: DocumentId) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        if !tables.documents.contains_key(&document_id) {
            return Err(StoreError::Conflict(format!(
                "task link references missing document {}",
                document_id
            )));
        }
        let link = (task_id.to_string(), document_id);
        if tables.task_links.contains(&link) {
            return Ok(());
        }
        self.commit(&mut tables, |t| {
            t.task_links.insert(link);
        })
    }

    async fn task_links(&self, document_id: DocumentId) -> StoreResult<Vec<String>> {
        Ok(self
            .tables
            .lock()
            .task_links
            .iter()
            .filter(|(_, doc_id)| *doc_id == document_id)
            .map(|(task_id, _)| task_id.clone())
            .collect())
    }
}
