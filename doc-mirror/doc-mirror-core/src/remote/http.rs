//! Adapter for an object store speaking a Drive-v3-style REST API.

use super::{RemoteResult, RemoteStore, FOLDER_MIME_TYPE};
use crate::error::RemoteError;
use crate::model::{DocumentKind, Grant, ObjectMeta, Permission};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

const FILE_FIELDS: &str = "id,name,mimeType,size,webViewLink,parents";
const PAGE_SIZE: &str = "1000";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteFile {
    id: String,
    name: String,
    mime_type: String,
    /// Sent as a decimal string.
    size: Option<String>,
    web_view_link: Option<String>,
    #[serde(default)]
    parents: Vec<String>,
}

impl From<RemoteFile> for ObjectMeta {
    fn from(file: RemoteFile) -> Self {
        let kind = if file.mime_type == FOLDER_MIME_TYPE {
            DocumentKind::Folder
        } else {
            DocumentKind::File
        };
        ObjectMeta {
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            kind,
            size_bytes: file.size.and_then(|s| s.parse().ok()),
            web_url: file.web_view_link,
            parent_id: file.parents.into_iter().next(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteFile>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemotePermission {
    id: String,
    email_address: Option<String>,
    role: String,
}

impl From<RemotePermission> for Grant {
    fn from(p: RemotePermission) -> Self {
        Grant {
            id: p.id,
            email: p.email_address,
            level: match p.role.as_str() {
                "reader" | "commenter" => Permission::View,
                _ => Permission::Edit,
            },
        }
    }
}

#[derive(Deserialize)]
struct PermissionList {
    #[serde(default)]
    permissions: Vec<RemotePermission>,
}

fn role_for(level: Permission) -> &'static str {
    match level {
        Permission::View => "reader",
        Permission::Edit => "writer",
    }
}

/// Quote a value for use inside a `q` search expression.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    upload_url: String,
    token: Option<String>,
}

impl HttpRemoteStore {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            upload_url: base_url.clone(),
            base_url,
            token,
        }
    }

    /// Separate endpoint for media uploads, when the service uses one.
    pub fn with_upload_url(mut self, upload_url: impl Into<String>) -> Self {
        self.upload_url = upload_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, subject: &str) -> RemoteResult<Response> {
        let resp = builder
            .send()
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        match resp.status() {
            s if s.is_success() => Ok(resp),
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound(subject.to_string())),
            s => Err(RemoteError::Unavailable(format!("{} returned {}", subject, s))),
        }
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder, subject: &str) -> RemoteResult<T> {
        self.send(builder, subject)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Unavailable(format!("malformed response: {}", e)))
    }

    fn files_url(&self, path: &str) -> String {
        format!("{}/files{}", self.base_url, path)
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn create_folder(&self, name: &str, parent_id: &str) -> RemoteResult<ObjectMeta> {
        let req = self
            .request(Method::POST, self.files_url(""))
            .query(&[("fields", FILE_FIELDS)])
            .json(&json!({
                "name": name,
                "mimeType": FOLDER_MIME_TYPE,
                "parents": [parent_id],
            }));
        let file: RemoteFile = self.json(req, parent_id).await?;
        Ok(file.into())
    }

    async fn list_children(
        &self,
        folder_id: &str,
        query: Option<&str>,
    ) -> RemoteResult<Vec<ObjectMeta>> {
        let mut q = format!("{} in parents and trashed = false", quote(folder_id));
        if let Some(needle) = query.filter(|n| !n.is_empty()) {
            q.push_str(&format!(" and name contains {}", quote(needle)));
        }
        let fields = format!("nextPageToken,files({})", FILE_FIELDS);
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("q", q.as_str()),
                ("fields", fields.as_str()),
                ("pageSize", PAGE_SIZE),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }
            let req = self.request(Method::GET, self.files_url("")).query(&params);
            let page: FileList = self.json(req, folder_id).await?;
            out.extend(page.files.into_iter().map(ObjectMeta::from));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(out)
    }

    async fn get_object(&self, id: &str) -> RemoteResult<ObjectMeta> {
        let req = self
            .request(Method::GET, self.files_url(&format!("/{}", id)))
            .query(&[("fields", FILE_FIELDS)]);
        let file: RemoteFile = self.json(req, id).await?;
        Ok(file.into())
    }

    async fn upload_object(
        &self,
        bytes: Bytes,
        name: &str,
        mime_type: &str,
        parent_id: &str,
    ) -> RemoteResult<ObjectMeta> {
        let boundary = format!("mirror-{}", Uuid::new_v4().simple());
        let metadata = json!({ "name": name, "parents": [parent_id] }).to_string();
        let mut body = Vec::with_capacity(bytes.len() + metadata.len() + 256);
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{m}\r\n--{b}\r\nContent-Type: {t}\r\n\r\n",
                b = boundary,
                m = metadata,
                t = mime_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(&bytes);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        let req = self
            .request(Method::POST, format!("{}/files", self.upload_url))
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body);
        let file: RemoteFile = self.json(req, parent_id).await?;
        Ok(file.into())
    }

    async fn delete_object(&self, id: &str) -> RemoteResult<()> {
        let req = self.request(Method::DELETE, self.files_url(&format!("/{}", id)));
        self.send(req, id).await.map(|_| ())
    }

    async fn move_object(
        &self,
        id: &str,
        old_parent_id: Option<&str>,
        new_parent_id: &str,
    ) -> RemoteResult<()> {
        let mut params = vec![("addParents", new_parent_id)];
        if let Some(old) = old_parent_id {
            params.push(("removeParents", old));
        }
        let req = self
            .request(Method::PATCH, self.files_url(&format!("/{}", id)))
            .query(&params)
            .json(&json!({}));
        self.send(req, id).await.map(|_| ())
    }

    async fn rename_object(&self, id: &str, new_name: &str) -> RemoteResult<()> {
        let req = self
            .request(Method::PATCH, self.files_url(&format!("/{}", id)))
            .json(&json!({ "name": new_name }));
        self.send(req, id).await.map(|_| ())
    }

    async fn grant_access(&self, id: &str, email: &str, level: Permission) -> RemoteResult<Grant> {
        let req = self
            .request(Method::POST, self.files_url(&format!("/{}/permissions", id)))
            .query(&[("sendNotificationEmail", "false"), ("fields", "id,emailAddress,role")])
            .json(&json!({
                "type": "user",
                "role": role_for(level),
                "emailAddress": email,
            }));
        let permission: RemotePermission = self.json(req, id).await?;
        Ok(permission.into())
    }

    async fn revoke_access(&self, id: &str, permission_id: &str) -> RemoteResult<()> {
        let req = self.request(
            Method::DELETE,
            self.files_url(&format!("/{}/permissions/{}", id, permission_id)),
        );
        self.send(req, permission_id).await.map(|_| ())
    }

    async fn list_grants(&self, id: &str) -> RemoteResult<Vec<Grant>> {
        let req = self
            .request(Method::GET, self.files_url(&format!("/{}/permissions", id)))
            .query(&[("fields", "permissions(id,emailAddress,role)")]);
        let list: PermissionList = self.json(req, id).await?;
        Ok(list.permissions.into_iter().map(Grant::from).collect())
    }
}
