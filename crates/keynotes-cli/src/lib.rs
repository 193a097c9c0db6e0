//! KeyNotes command-line interface.

pub mod commands;
pub mod context;

use clap::{Parser, Subcommand};
use keynotes_core::config::{LogFormat, LoggingConfig};
use keynotes_core::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// KeyNotes - encrypted notes, keys and passwords
#[derive(Parser)]
#[command(name = "keynotes")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to config file
    #[arg(short, long, env = "KEYNOTES_CONFIG")]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Create a new vault
    Init,

    /// List entries
    List(commands::vault::ListArgs),

    /// Show one entry
    Show {
        /// Entry id
        id: String,

        /// Print sensitive fields in clear text
        #[arg(long)]
        reveal: bool,
    },

    /// Add an entry
    Add(commands::vault::AddArgs),

    /// Delete an entry
    Delete {
        /// Entry id
        id: String,
    },

    /// Change the master password
    Passwd,

    /// Write the encrypted vault blob
    Export {
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<std::path::PathBuf>,
    },

    /// Replace the vault with an exported blob
    Import {
        /// File holding the exported blob
        path: std::path::PathBuf,
    },

    /// App settings
    Settings(commands::settings::SettingsArgs),

    /// Remote sync
    Sync(commands::sync::SyncArgs),

    /// Show version information
    Version,
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level; each `-v` raises the level
/// one step.
pub fn init_logging(config: &LoggingConfig, verbose: u8) {
    let level = match verbose {
        0 => config.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("keynotes={level}").into());

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

/// Run the CLI with the given arguments.
pub async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    match cli.command {
        Commands::Init => commands::vault::init(&config).await,
        Commands::List(args) => commands::vault::list(&config, args).await,
        Commands::Show { id, reveal } => commands::vault::show(&config, &id, reveal).await,
        Commands::Add(args) => commands::vault::add(&config, args).await,
        Commands::Delete { id } => commands::vault::delete(&config, &id).await,
        Commands::Passwd => commands::vault::passwd(&config).await,
        Commands::Export { output } => commands::vault::export(&config, output).await,
        Commands::Import { path } => commands::vault::import(&config, &path).await,
        Commands::Settings(args) => commands::settings::run(&config, args).await,
        Commands::Sync(args) => commands::sync::run(&config, args).await,
        Commands::Version => {
            println!("keynotes {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commands::settings::{SettingKey, SettingsCommand};
    use commands::sync::SyncCommand;
    use commands::vault::AddCommand;
    use keynotes_vault::EntryKind;

    #[test]
    fn test_parse_version() {
        let cli = Cli::try_parse_from(["keynotes", "version"]).unwrap();
        assert!(matches!(cli.command, Commands::Version));
    }

    #[test]
    fn test_parse_list_filters() {
        let cli = Cli::try_parse_from([
            "keynotes", "list", "--kind", "password", "--tag", "work", "-q", "git",
        ])
        .unwrap();
        match cli.command {
            Commands::List(args) => {
                assert_eq!(args.kind, Some(EntryKind::Password));
                assert_eq!(args.tag.as_deref(), Some("work"));
                assert_eq!(args.query.as_deref(), Some("git"));
            }
            _ => panic!("Expected List command"),
        }
    }

    #[test]
    fn test_parse_list_rejects_unknown_kind() {
        assert!(Cli::try_parse_from(["keynotes", "list", "--kind", "card"]).is_err());
    }

    #[test]
    fn test_parse_add_password() {
        let cli = Cli::try_parse_from([
            "keynotes",
            "add",
            "password",
            "GitHub",
            "--username",
            "octo",
            "--url",
            "https://github.com",
            "--tag",
            "work",
            "--tag",
            "code",
        ])
        .unwrap();
        match cli.command {
            Commands::Add(args) => {
                assert_eq!(args.common.tags, vec!["work", "code"]);
                match args.command {
                    AddCommand::Password {
                        title,
                        username,
                        url,
                        password,
                    } => {
                        assert_eq!(title, "GitHub");
                        assert_eq!(username.as_deref(), Some("octo"));
                        assert_eq!(url.as_deref(), Some("https://github.com"));
                        assert!(password.is_none());
                    }
                    _ => panic!("Expected Add Password command"),
                }
            }
            _ => panic!("Expected Add command"),
        }
    }

    #[test]
    fn test_parse_show_reveal() {
        let cli = Cli::try_parse_from(["keynotes", "show", "abc", "--reveal"]).unwrap();
        match cli.command {
            Commands::Show { id, reveal } => {
                assert_eq!(id, "abc");
                assert!(reveal);
            }
            _ => panic!("Expected Show command"),
        }
    }

    #[test]
    fn test_parse_settings_set() {
        let cli =
            Cli::try_parse_from(["keynotes", "settings", "set", "lock-timeout", "30"]).unwrap();
        match cli.command {
            Commands::Settings(args) => match args.command {
                SettingsCommand::Set { key, value } => {
                    assert_eq!(key, SettingKey::LockTimeout);
                    assert_eq!(value, "30");
                }
                _ => panic!("Expected Settings Set command"),
            },
            _ => panic!("Expected Settings command"),
        }
    }

    #[test]
    fn test_parse_sync_login() {
        let cli =
            Cli::try_parse_from(["keynotes", "sync", "login", "--code", "abc123"]).unwrap();
        match cli.command {
            Commands::Sync(args) => match args.command {
                SyncCommand::Login { code, redirect_uri } => {
                    assert_eq!(code, "abc123");
                    assert!(redirect_uri.is_none());
                }
                _ => panic!("Expected Sync Login command"),
            },
            _ => panic!("Expected Sync command"),
        }
    }

    #[test]
    fn test_parse_sync_queue_clear() {
        let cli = Cli::try_parse_from(["keynotes", "sync", "queue", "--clear"]).unwrap();
        match cli.command {
            Commands::Sync(args) => {
                assert!(matches!(args.command, SyncCommand::Queue { clear: true }));
            }
            _ => panic!("Expected Sync command"),
        }
    }

    #[test]
    fn test_parse_verbose_and_config() {
        let cli =
            Cli::try_parse_from(["keynotes", "-vv", "--config", "/tmp/k.json5", "passwd"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(
            cli.config.as_deref(),
            Some(std::path::Path::new("/tmp/k.json5"))
        );
        assert!(matches!(cli.command, Commands::Passwd));
    }
}
