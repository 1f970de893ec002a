pub mod agent;
pub mod config;
pub mod operations;
pub mod runner;
pub mod store;
pub mod terminal;
pub mod vault;
pub mod warehouse;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use agent::{AgentClient, AgentError, AgentProfiles, KeypairTokenIssuer, TokenSource};
use config::AppConfig;
use runner::TaskRunner;
use store::Store;
use vault::{CredentialVault, RSA_PRIVATE_KEY};
use warehouse::{SqlApiExecutor, StatementExecutor};

/// Everything a CLI command or HTTP handler needs, opened once per process.
#[derive(Clone)]
pub struct AppContext {
    pub data_dir: PathBuf,
    pub config: AppConfig,
    pub store: Store,
    pub runner: TaskRunner,
    pub profiles: AgentProfiles,
    pub vault: Arc<CredentialVault>,
    executor: Option<Arc<dyn StatementExecutor>>,
}

impl AppContext {
    pub async fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let config = AppConfig::load(&data_dir).await?;
        let store = Store::open(&data_dir).await?;
        Self::from_parts(data_dir, config, store)
    }

    pub fn from_parts(data_dir: PathBuf, config: AppConfig, store: Store) -> Result<Self> {
        let vault = Arc::new(CredentialVault::new(store.get_db())?);
        let runner = TaskRunner::new(store.clone(), config.jobs.max_concurrent_jobs);
        let profiles = AgentProfiles::new(store.clone());
        Ok(Self {
            data_dir,
            config,
            store,
            runner,
            profiles,
            vault,
            executor: None,
        })
    }

    /// Replace the warehouse executor, used by tests to avoid the network.
    pub fn with_executor(mut self, executor: Arc<dyn StatementExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    async fn private_key_pem(&self) -> Result<Option<Vec<u8>>> {
        if let Some(pem) = self.vault.get_secret(RSA_PRIVATE_KEY).await? {
            debug!("Using RSA private key from the credential vault");
            return Ok(Some(pem.into_bytes()));
        }
        match &self.config.account.private_key_path {
            Some(path) => {
                let pem = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("Cannot read private key {}", path.display()))?;
                Ok(Some(pem))
            }
            None => Ok(None),
        }
    }

    /// `None` when no private key is configured anywhere.
    pub async fn token_source(&self) -> Result<Option<Arc<dyn TokenSource>>> {
        let Some(pem) = self.private_key_pem().await? else {
            return Ok(None);
        };
        let account = &self.config.account;
        let issuer = KeypairTokenIssuer::new(
            &account.account,
            &account.user,
            &account.public_key_fingerprint,
            &pem,
        )?;
        Ok(Some(Arc::new(issuer)))
    }

    pub async fn agent_client(&self) -> Result<AgentClient> {
        let tokens = self.token_source().await?;
        Ok(AgentClient::new(&self.config.service, tokens)?)
    }

    pub async fn executor(&self) -> Result<Arc<dyn StatementExecutor>> {
        if let Some(executor) = &self.executor {
            return Ok(executor.clone());
        }
        let tokens = self
            .token_source()
            .await?
            .ok_or(AgentError::MissingCredential(RSA_PRIVATE_KEY))?;
        let executor =
            SqlApiExecutor::new(&self.config.service, &self.config.warehouse, tokens)?;
        Ok(Arc::new(executor))
    }
}
