//! Process configuration: command line flags with environment fallbacks.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use doc_mirror_core::auth::{Hs256Verifier, RejectAll, TokenVerifier};
use doc_mirror_core::events::EventBus;
use doc_mirror_core::model::UserRecord;
use doc_mirror_core::remote::{HttpRemoteStore, MemoryRemoteStore, RemoteStore};
use doc_mirror_core::storage::{MemoryStore, MirrorStore};
use doc_mirror_core::{DocumentManager, MirrorConfig};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "doc-mirror")]
#[command(about = "Local mirror and access control for a remote document store")]
pub struct Cli {
    #[command(flatten)]
    pub server: ServerConfig,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Listen address
        #[arg(short, long, env = "DOC_MIRROR_ADDR", default_value = "127.0.0.1:3000")]
        addr: SocketAddr,
    },

    /// Prune mirror rows whose remote object no longer exists
    Audit,

    /// Print the effective mirror configuration
    ShowConfig,
}

#[derive(Args, Debug, Clone)]
pub struct ServerConfig {
    /// Directory holding the mirror snapshot
    #[arg(long, env = "DOC_MIRROR_DATA_DIR", default_value = "data", global = true)]
    pub data_dir: PathBuf,

    /// Base URL of the remote document service; in-memory when unset
    #[arg(long, env = "DOC_MIRROR_REMOTE_URL", global = true)]
    pub remote_url: Option<String>,

    /// Upload endpoint, when it differs from the base URL
    #[arg(long, env = "DOC_MIRROR_REMOTE_UPLOAD_URL", global = true)]
    pub remote_upload_url: Option<String>,

    #[arg(long, env = "DOC_MIRROR_REMOTE_TOKEN", hide_env_values = true, global = true)]
    pub remote_token: Option<String>,

    /// HS256 secret for bearer tokens
    #[arg(long, env = "DOC_MIRROR_JWT_SECRET", hide_env_values = true, global = true)]
    pub jwt_secret: Option<String>,

    /// Reject bearer tokens without an `exp` claim
    #[arg(long, env = "DOC_MIRROR_REQUIRE_TOKEN_EXPIRY", global = true)]
    pub require_token_expiry: bool,

    /// Trust the X-User-Id header when no bearer token is sent
    #[arg(long, env = "DOC_MIRROR_HEADER_AUTH", global = true)]
    pub header_auth: bool,

    /// JSON array of users to seed on startup
    #[arg(long, env = "DOC_MIRROR_USERS", global = true)]
    pub users: Option<PathBuf>,

    /// JSON file with mirror tunables
    #[arg(long, env = "DOC_MIRROR_CONFIG", global = true)]
    pub mirror_config: Option<PathBuf>,
}

impl ServerConfig {
    pub fn load_mirror_config(&self) -> anyhow::Result<MirrorConfig> {
        match &self.mirror_config {
            Some(path) => MirrorConfig::from_file(path)
                .with_context(|| format!("reading mirror config {}", path.display())),
            None => Ok(MirrorConfig::default()),
        }
    }

    pub fn verifier(&self) -> Arc<dyn TokenVerifier> {
        match &self.jwt_secret {
            Some(secret) => {
                let verifier = Hs256Verifier::new(secret.clone());
                if self.require_token_expiry {
                    Arc::new(verifier.require_exp())
                } else {
                    Arc::new(verifier)
                }
            }
            None => {
                if !self.header_auth {
                    warn!("no JWT secret and header auth disabled; every request is anonymous");
                }
                Arc::new(RejectAll)
            }
        }
    }

    pub fn remote(&self, mirror: &MirrorConfig) -> Arc<dyn RemoteStore> {
        match &self.remote_url {
            Some(url) => {
                let mut remote = HttpRemoteStore::new(url.clone(), self.remote_token.clone());
                if let Some(upload) = &self.remote_upload_url {
                    remote = remote.with_upload_url(upload.clone());
                }
                info!(%url, "using remote document service");
                Arc::new(remote)
            }
            None => {
                warn!("no remote URL configured; remote objects live in memory only");
                Arc::new(MemoryRemoteStore::new(mirror.root_folder_key.clone()))
            }
        }
    }

    /// Fails unless a real remote service is configured.
    pub fn require_remote(&self, action: &str) -> anyhow::Result<()> {
        if self.remote_url.is_none() {
            anyhow::bail!("{} needs --remote-url; the in-memory remote starts empty", action);
        }
        Ok(())
    }

    /// Open the local store, seed users and wire up the manager.
    ///
    /// Without a remote URL the mirror is volatile too: an empty in-memory
    /// remote next to persisted rows would make every row look dangling.
    pub async fn build_manager(&self) -> anyhow::Result<Arc<DocumentManager>> {
        let mirror = self.load_mirror_config()?;
        let store = match &self.remote_url {
            Some(_) => Arc::new(MemoryStore::open(&self.data_dir).with_context(|| {
                format!("opening mirror data in {}", self.data_dir.display())
            })?),
            None => {
                warn!(dir = %self.data_dir.display(), "no remote URL; mirror data dir is ignored");
                Arc::new(MemoryStore::new())
            }
        };
        if let Some(path) = &self.users {
            let users = load_users(path)?;
            let count = users.len();
            for user in users {
                store.upsert_user(user).await?;
            }
            info!(count, "seeded users");
        }
        let remote = self.remote(&mirror);
        Ok(Arc::new(DocumentManager::new(
            mirror,
            remote,
            store,
            EventBus::new(),
        )))
    }
}

pub fn load_users(path: &Path) -> anyhow::Result<Vec<UserRecord>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading users file {}", path.display()))?;
    Ok(serde_json::from_str(&data)?)
}
