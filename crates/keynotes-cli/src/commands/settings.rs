//! App settings commands.

use clap::Args;
use keynotes_core::Config;
use keynotes_vault::AppSettings;

use crate::context::App;

/// Settings command arguments.
#[derive(Args)]
pub struct SettingsArgs {
    #[command(subcommand)]
    pub command: SettingsCommand,
}

#[derive(clap::Subcommand)]
pub enum SettingsCommand {
    /// Show current settings
    Show,

    /// Change a setting
    Set {
        /// Setting name
        #[arg(value_enum)]
        key: SettingKey,

        /// New value
        value: String,
    },
}

/// Settings that can be changed from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SettingKey {
    /// Lock after a period of inactivity (true/false)
    AutoLock,
    /// Idle minutes before auto-lock
    LockTimeout,
    /// Sync the vault with the remote service (true/false)
    SyncEnabled,
}

/// Apply `value` to `key` on `settings`.
pub fn apply(settings: &mut AppSettings, key: SettingKey, value: &str) -> anyhow::Result<()> {
    match key {
        SettingKey::AutoLock => settings.auto_lock = parse_bool(value)?,
        SettingKey::LockTimeout => {
            let minutes: u32 = value
                .parse()
                .map_err(|_| anyhow::anyhow!("lock-timeout must be a number of minutes"))?;
            if minutes == 0 {
                anyhow::bail!("lock-timeout must be at least 1 minute");
            }
            settings.lock_timeout = minutes;
        }
        SettingKey::SyncEnabled => settings.sync_enabled = parse_bool(value)?,
    }
    Ok(())
}

fn parse_bool(value: &str) -> anyhow::Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        other => anyhow::bail!("expected true or false, got '{}'", other),
    }
}

/// Run the settings command.
pub async fn run(config: &Config, args: SettingsArgs) -> anyhow::Result<()> {
    let app = App::open(config).await?;

    match args.command {
        SettingsCommand::Show => {
            let settings = app.settings.load().await?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }

        SettingsCommand::Set { key, value } => {
            let mut settings = app.settings.load().await?;
            apply(&mut settings, key, &value)?;
            app.settings.save(&settings).await?;
            println!("Set {:?} = {}", key, value);
        }
    }

    Ok(())
}
