//! Access decisions computed from already-loaded local state.
//!
//! Every operation that touches a document expresses its requirement as a
//! single [`Permission`] and asks [`can_access`]; nothing else re-derives
//! ownership or role logic.

use crate::error::{MirrorError, Result};
use crate::model::{Document, Permission, Principal, Share};
use crate::storage::MirrorStore;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "reason", content = "level")]
pub enum Reason {
    Admin,
    Owner,
    Shared(Permission),
    InsufficientShare,
    NoGrant,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Reason,
}

impl Decision {
    fn allow(reason: Reason) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    fn deny(reason: Reason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

/// Evaluate access in precedence order: admin, owner, share, deny.
///
/// `share` must be the caller's share row for `document`, if any.
pub fn decide(
    user: &Principal,
    document: &Document,
    share: Option<&Share>,
    required: Permission,
) -> Decision {
    if user.is_admin() {
        return Decision::allow(Reason::Admin);
    }
    if document.owner_id == user.id {
        return Decision::allow(Reason::Owner);
    }
    match share.filter(|s| s.document_id == document.id && s.grantee_id == user.id) {
        Some(s) if s.permission.satisfies(required) => Decision::allow(Reason::Shared(s.permission)),
        Some(_) => Decision::deny(Reason::InsufficientShare),
        None => Decision::deny(Reason::NoGrant),
    }
}

pub fn can_access(
    user: &Principal,
    document: &Document,
    share: Option<&Share>,
    required: Permission,
) -> bool {
    decide(user, document, share, required).allowed
}

/// Load the caller's share for `document` and fail with `Forbidden` unless
/// [`can_access`] allows `required`.
pub async fn require(
    store: &dyn MirrorStore,
    user: &Principal,
    document: &Document,
    required: Permission,
    action: &str,
) -> Result<Decision> {
    let share = if user.is_admin() || document.owner_id == user.id {
        None
    } else {
        store.share(document.id, &user.id).await?
    };
    let decision = decide(user, document, share.as_ref(), required);
    if decision.allowed {
        Ok(decision)
    } else {
        tracing::debug!(user = %user.id, document = %document.id, ?decision, "access denied");
        Err(MirrorError::forbidden(action))
    }
}
