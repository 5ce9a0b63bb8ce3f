//! Records kept in the local mirror and the metadata exchanged with the
//! remote object store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Local surrogate key of a mirrored document.
pub type DocumentId = Uuid;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    File,
    Folder,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::File => "file",
            DocumentKind::Folder => "folder",
        }
    }
}

/// Access level carried by a share or required by an operation.
///
/// Ordered so that `Edit` satisfies any `View` requirement.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    View,
    Edit,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::View => "view",
            Permission::Edit => "edit",
        }
    }

    pub fn satisfies(&self, required: Permission) -> bool {
        *self >= required
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    #[default]
    Member,
}

/// The authenticated caller as reported by the identity provider.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

impl Principal {
    pub fn member(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Member,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Local user row; only the parts the sharing path needs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub role: Role,
}

/// Local mirror row for one remote object.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub id: DocumentId,
    /// Remote object id, unique across the mirror.
    pub key: String,
    pub name: String,
    pub mime_type: String,
    pub kind: DocumentKind,
    pub size_bytes: Option<u64>,
    pub remote_url: Option<String>,
    pub parent_key: Option<String>,
    /// User that caused the row to be materialized.
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn is_folder(&self) -> bool {
        self.kind == DocumentKind::Folder
    }
}

/// Insert payload for [`crate::storage::MirrorStore::upsert_document`].
#[derive(Clone, Debug)]
pub struct NewDocument {
    pub key: String,
    pub name: String,
    pub mime_type: String,
    pub kind: DocumentKind,
    pub size_bytes: Option<u64>,
    pub remote_url: Option<String>,
    pub parent_key: Option<String>,
    pub owner_id: String,
}

impl NewDocument {
    pub fn from_meta(meta: &ObjectMeta, owner_id: &str) -> Self {
        Self {
            key: meta.id.clone(),
            name: meta.name.clone(),
            mime_type: meta.mime_type.clone(),
            kind: meta.kind,
            size_bytes: meta.size_bytes,
            remote_url: meta.web_url.clone(),
            parent_key: meta.parent_id.clone(),
            owner_id: owner_id.to_string(),
        }
    }
}

/// Field updates applied on rename/move. `None` leaves a field unchanged.
#[derive(Clone, Debug, Default)]
pub struct DocumentPatch {
    pub name: Option<String>,
    pub parent_key: Option<Option<String>>,
}

/// Explicit grant of access to a document for a non-owner.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Share {
    pub document_id: DocumentId,
    pub granted_by_id: String,
    pub grantee_id: String,
    pub permission: Permission,
    /// Permission id assigned by the remote store, when it reported one.
    #[serde(default)]
    pub remote_grant_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewShare {
    pub document_id: DocumentId,
    pub granted_by_id: String,
    pub grantee_id: String,
    pub permission: Permission,
    pub remote_grant_id: Option<String>,
}

/// Metadata of a remote object as reported by the object store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectMeta {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub kind: DocumentKind,
    pub size_bytes: Option<u64>,
    pub web_url: Option<String>,
    pub parent_id: Option<String>,
}

/// One entry of a remote object's ACL.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Grant {
    pub id: String,
    pub email: Option<String>,
    pub level: Permission,
}

/// A listed remote object paired with its local mirror row.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct MirroredEntry {
    pub document: Document,
    pub remote: ObjectMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_satisfies_view() {
        assert!(Permission::Edit.satisfies(Permission::View));
        assert!(Permission::Edit.satisfies(Permission::Edit));
        assert!(Permission::View.satisfies(Permission::View));
        assert!(!Permission::View.satisfies(Permission::Edit));
    }

    #[test]
    fn wire_names_are_snake_case() {
        assert_eq!(serde_json::to_string(&Permission::Edit).unwrap(), "\"edit\"");
        assert_eq!(serde_json::to_string(&DocumentKind::Folder).unwrap(), "\"folder\"");
        let role: Role = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(role, Role::Admin);
    }
}
