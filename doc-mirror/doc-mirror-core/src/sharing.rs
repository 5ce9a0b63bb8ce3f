//! Share grants and revocations, kept in step across the remote ACL and the
//! local share table.
//!
//! Both paths write the remote side first. Local rows therefore never claim
//! access the remote store does not enforce; at worst they lag behind it.

use crate::authz::require;
use crate::error::{MirrorError, RemoteError, Result};
use crate::events::{Event, EventBus};
use crate::model::{Document, DocumentId, NewShare, Permission, Principal, Share};
use crate::remote::RemoteStore;
use crate::storage::MirrorStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An incoming share together with the document it opens.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct SharedDocument {
    pub document: Document,
    pub share: Share,
}

pub struct SharePropagator {
    remote: Arc<dyn RemoteStore>,
    store: Arc<dyn MirrorStore>,
    events: EventBus,
}

impl SharePropagator {
    pub fn new(remote: Arc<dyn RemoteStore>, store: Arc<dyn MirrorStore>, events: EventBus) -> Self {
        Self {
            remote,
            store,
            events,
        }
    }

    async fn load(&self, id: DocumentId) -> Result<Document> {
        self.store
            .document(id)
            .await?
            .ok_or_else(|| MirrorError::not_found("document"))
    }

    async fn email_of(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .user(user_id)
            .await?
            .and_then(|u| u.email)
            .filter(|e| !e.trim().is_empty()))
    }

    /// Give `grantee_id` `level` access, or change the level of an existing
    /// share. Nothing is written locally when the remote grant fails.
    pub async fn grant(
        &self,
        granter: &Principal,
        document_id: DocumentId,
        grantee_id: &str,
        level: Permission,
    ) -> Result<Share> {
        let document = self.load(document_id).await?;
        require(self.store.as_ref(), granter, &document, Permission::Edit, "share this document").await?;

        if grantee_id == document.owner_id {
            return Err(MirrorError::invalid("grantee", "already owns this document"));
        }
        if grantee_id == granter.id {
            return Err(MirrorError::invalid("grantee", "cannot share a document with yourself"));
        }
        if self.store.user(grantee_id).await?.is_none() {
            return Err(MirrorError::not_found("user"));
        }
        let email = self
            .email_of(grantee_id)
            .await?
            .ok_or_else(|| MirrorError::invalid("grantee", "has no email address"))?;

        let grant = self.remote.grant_access(&document.key, &email, level).await?;
        let share = self
            .store
            .upsert_share(NewShare {
                document_id: document.id,
                granted_by_id: granter.id.clone(),
                grantee_id: grantee_id.to_string(),
                permission: level,
                remote_grant_id: Some(grant.id),
            })
            .await?;

        info!(document = %document.id, grantee = grantee_id, level = level.as_str(), "shared document");
        self.events.send(Event::Shared {
            id: document.id,
            grantee: grantee_id.to_string(),
            permission: level,
        });
        Ok(share)
    }

    /// Withdraw any access `grantee_id` holds through sharing. Returns whether
    /// a local share row existed. A grant already missing remotely is not an
    /// error.
    pub async fn revoke(
        &self,
        revoker: &Principal,
        document_id: DocumentId,
        grantee_id: &str,
    ) -> Result<bool> {
        let document = self.load(document_id).await?;
        require(self.store.as_ref(), revoker, &document, Permission::Edit, "change sharing on this document").await?;

        let local = self.store.share(document.id, grantee_id).await?;
        let remote_id = match local.as_ref().and_then(|s| s.remote_grant_id.clone()) {
            Some(id) => Some(id),
            None => self.find_remote_grant(&document, grantee_id).await?,
        };
        if let Some(permission_id) = remote_id {
            match self.remote.revoke_access(&document.key, &permission_id).await {
                Ok(()) => {}
                Err(RemoteError::NotFound(_)) => {
                    debug!(document = %document.id, grantee = grantee_id, "remote grant already gone");
                }
                Err(e) => return Err(MirrorError::RemoteUnavailable(e)),
            }
        }

        let removed = self.store.delete_share(document.id, grantee_id).await?;
        info!(document = %document.id, grantee = grantee_id, removed, "revoked share");
        self.events.send(Event::Unshared {
            id: document.id,
            grantee: grantee_id.to_string(),
        });
        Ok(removed)
    }

    /// Scan the remote ACL for the grantee's email.
    async fn find_remote_grant(&self, document: &Document, grantee_id: &str) -> Result<Option<String>> {
        let Some(email) = self.email_of(grantee_id).await? else {
            warn!(grantee = grantee_id, "no email on record, skipping remote ACL scan");
            return Ok(None);
        };
        let grants = match self.remote.list_grants(&document.key).await {
            Ok(grants) => grants,
            Err(RemoteError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(MirrorError::RemoteUnavailable(e)),
        };
        Ok(grants
            .into_iter()
            .find(|g| g.email.as_deref().map_or(false, |e| e.eq_ignore_ascii_case(&email)))
            .map(|g| g.id))
    }

    /// Shares on a document; visible to anyone who can view it.
    pub async fn list_shares(&self, viewer: &Principal, document_id: DocumentId) -> Result<Vec<Share>> {
        let document = self.load(document_id).await?;
        require(self.store.as_ref(), viewer, &document, Permission::View, "view this document").await?;
        Ok(self.store.shares_for_document(document.id).await?)
    }

    /// Documents shared with `user`.
    pub async fn shared_with(&self, user: &Principal) -> Result<Vec<SharedDocument>> {
        let mut out = Vec::new();
        for share in self.store.shares_for_grantee(&user.id).await? {
            // a share can outlive its document briefly while a delete is in flight
            if let Some(document) = self.store.document(share.document_id).await? {
                out.push(SharedDocument { document, share });
            }
        }
        Ok(out)
    }
}
