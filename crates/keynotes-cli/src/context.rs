//! Shared setup for commands: storage, engine and password input.

use std::sync::Arc;

use anyhow::Context as _;
use keynotes_core::{env, Config, SecretString};
use keynotes_vault::{FileStorage, SettingsStore, Storage, VaultEngine, VaultError};

/// Open handles to the local vault.
pub struct App {
    pub config: Config,
    pub storage: Arc<dyn Storage>,
    pub engine: Arc<VaultEngine>,
    pub settings: SettingsStore,
}

impl App {
    /// Open the vault storage under the configured data directory.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let dir = config.data_dir()?;
        let storage: Arc<dyn Storage> = Arc::new(
            FileStorage::open(&dir)
                .await
                .with_context(|| format!("failed to open vault storage at {}", dir.display()))?,
        );
        tracing::debug!(dir = %dir.display(), "vault storage opened");

        Ok(Self {
            config: config.clone(),
            engine: Arc::new(VaultEngine::with_default_codec(storage.clone())),
            settings: SettingsStore::new(storage.clone()),
            storage,
        })
    }

    /// Unlock an existing vault, reading the master password from
    /// `KEYNOTES_PASSWORD` or a hidden prompt.
    pub async fn unlock(&self) -> anyhow::Result<SecretString> {
        if !self.engine.has_vault().await? {
            anyhow::bail!("No vault found. Run 'keynotes init' first.");
        }
        let password = read_password("Master password: ")?;
        if !self.engine.unlock(password.expose_secret()).await? {
            return Err(VaultError::WrongPassword.into());
        }
        Ok(password)
    }
}

/// Master password from the environment, or a hidden prompt.
pub fn read_password(prompt: &str) -> anyhow::Result<SecretString> {
    if let Some(password) = env::get_var(env::vars::PASSWORD) {
        return Ok(SecretString::new(password));
    }
    prompt_password(prompt)
}

/// Always prompt, ignoring the environment.
pub fn prompt_password(prompt: &str) -> anyhow::Result<SecretString> {
    let password = rpassword::prompt_password(prompt).context("failed to read password")?;
    Ok(SecretString::new(password))
}

/// New master password from the environment, or a confirmed prompt.
pub fn read_new_password(prompt: &str) -> anyhow::Result<SecretString> {
    if let Some(password) = env::get_var(env::vars::PASSWORD) {
        return Ok(SecretString::new(password));
    }
    prompt_new_password(prompt)
}

/// Prompt for a new password twice and require both to match.
pub fn prompt_new_password(prompt: &str) -> anyhow::Result<SecretString> {
    let first = prompt_password(prompt)?;
    if first.expose_secret().is_empty() {
        anyhow::bail!("Password must not be empty");
    }
    let second = prompt_password("Confirm password: ")?;
    if !first.matches(second.expose_secret()) {
        anyhow::bail!("Passwords do not match");
    }
    Ok(first)
}
