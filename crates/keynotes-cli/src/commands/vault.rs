//! Vault commands: init, list, show, add, delete, passwd, export, import.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::Args;
use keynotes_core::Config;
use keynotes_vault::{Entry, EntryBody, EntryFilter, EntryKind, VaultError};

use crate::context::{
    prompt_new_password, prompt_password, read_new_password, read_password, App,
};

/// List command arguments.
#[derive(Args)]
pub struct ListArgs {
    /// Only entries of this type (note, key, password)
    #[arg(short, long)]
    pub kind: Option<EntryKind>,

    /// Only entries carrying this tag
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Case-insensitive match on title or category
    #[arg(short, long)]
    pub query: Option<String>,
}

/// Add command arguments.
#[derive(Args)]
pub struct AddArgs {
    #[command(flatten)]
    pub common: EntryMeta,

    #[command(subcommand)]
    pub command: AddCommand,
}

/// Fields shared by every entry type.
#[derive(Args)]
pub struct EntryMeta {
    /// Category
    #[arg(long, global = true)]
    pub category: Option<String>,

    /// Tag (repeatable)
    #[arg(long = "tag", global = true)]
    pub tags: Vec<String>,
}

#[derive(clap::Subcommand)]
pub enum AddCommand {
    /// A free-form note
    Note {
        title: String,

        /// Note body (read from stdin when omitted)
        #[arg(long)]
        content: Option<String>,

        /// Syntax hint for the body
        #[arg(long)]
        language: Option<String>,
    },

    /// A private key
    Key {
        title: String,

        /// File holding the private key
        #[arg(long)]
        file: PathBuf,

        /// File holding the public key
        #[arg(long)]
        public_file: Option<PathBuf>,

        /// Key algorithm, e.g. ed25519
        #[arg(long)]
        algorithm: Option<String>,

        /// Key size in bits
        #[arg(long)]
        key_size: Option<u32>,
    },

    /// A login
    Password {
        title: String,

        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        url: Option<String>,

        /// Password (prompts for hidden input when omitted)
        #[arg(long)]
        password: Option<String>,
    },
}

pub async fn init(config: &Config) -> anyhow::Result<()> {
    let app = App::open(config).await?;
    if app.engine.has_vault().await? {
        anyhow::bail!("A vault already exists in {}", config.data_dir()?.display());
    }

    let password = read_new_password("New master password: ")?;
    app.engine.unlock(password.expose_secret()).await?;
    app.engine.lock().await;

    println!("Created vault in {}", config.data_dir()?.display());
    Ok(())
}

pub async fn list(config: &Config, args: ListArgs) -> anyhow::Result<()> {
    let app = App::open(config).await?;
    app.unlock().await?;

    let filter = EntryFilter {
        kind: args.kind,
        tag: args.tag,
        query: args.query,
    };
    let entries = app.engine.find_entries(&filter).await?;
    app.engine.lock().await;

    if entries.is_empty() {
        println!("No entries.");
        return Ok(());
    }

    println!("{:<36}  {:<8}  {:<32}  {}", "ID", "TYPE", "TITLE", "UPDATED");
    println!("{}", "-".repeat(98));
    for entry in &entries {
        println!(
            "{:<36}  {:<8}  {:<32}  {}",
            entry.id,
            entry.kind().as_str(),
            truncate(&entry.title, 32),
            entry.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("\n{} entr{} total.", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
    Ok(())
}

pub async fn show(config: &Config, id: &str, reveal: bool) -> anyhow::Result<()> {
    let app = App::open(config).await?;
    app.unlock().await?;
    let entry = app.engine.get_entry(id).await?;
    app.engine.lock().await;

    let entry = entry.with_context(|| format!("No entry with id '{id}'"))?;
    print!("{}", render_entry(&entry, reveal));
    Ok(())
}

pub async fn add(config: &Config, args: AddArgs) -> anyhow::Result<()> {
    let mut entry = build_entry(args.command)?;
    entry.category = args.common.category;
    entry.tags.extend(args.common.tags);

    let app = App::open(config).await?;
    app.unlock().await?;
    let id = entry.id.clone();
    let result = app.engine.save_entry(entry).await;
    app.engine.lock().await;
    result?;

    println!("Added {id}");
    Ok(())
}

fn build_entry(command: AddCommand) -> anyhow::Result<Entry> {
    let entry = match command {
        AddCommand::Note {
            title,
            content,
            language,
        } => {
            let content = match content {
                Some(content) => content,
                None => std::io::read_to_string(std::io::stdin())
                    .context("failed to read note from stdin")?,
            };
            Entry::new(title, EntryBody::Note { content, language })
        }
        AddCommand::Key {
            title,
            file,
            public_file,
            algorithm,
            key_size,
        } => {
            let key = read_file(&file)?;
            let public_key = public_file.as_deref().map(read_file).transpose()?;
            Entry::new(
                title,
                EntryBody::Key {
                    key,
                    public_key,
                    algorithm,
                    key_size,
                    notes: None,
                },
            )
        }
        AddCommand::Password {
            title,
            username,
            url,
            password,
        } => {
            let password = match password {
                Some(password) => password,
                None => prompt_password("Entry password: ")?.expose_secret().to_string(),
            };
            Entry::password(title, username, password, url)
        }
    };
    Ok(entry)
}

fn read_file(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

pub async fn delete(config: &Config, id: &str) -> anyhow::Result<()> {
    let app = App::open(config).await?;
    app.unlock().await?;
    let existed = app.engine.get_entry(id).await?.is_some();
    let result = app.engine.delete_entry(id).await;
    app.engine.lock().await;
    result?;

    if existed {
        println!("Deleted {id}");
    } else {
        println!("No entry with id '{id}'");
    }
    Ok(())
}

pub async fn passwd(config: &Config) -> anyhow::Result<()> {
    let app = App::open(config).await?;
    if !app.engine.has_vault().await? {
        anyhow::bail!("No vault found. Run 'keynotes init' first.");
    }

    let current = read_password("Current master password: ")?;
    if !app.engine.unlock(current.expose_secret()).await? {
        return Err(VaultError::WrongPassword.into());
    }
    let new = prompt_new_password("New master password: ")?;

    let changed = app
        .engine
        .change_password(current.expose_secret(), new.expose_secret())
        .await;
    app.engine.lock().await;
    if !changed? {
        return Err(VaultError::WrongPassword.into());
    }

    println!("Master password changed.");
    Ok(())
}

pub async fn export(config: &Config, output: Option<PathBuf>) -> anyhow::Result<()> {
    let app = App::open(config).await?;
    app.unlock().await?;
    let blob = app.engine.export_vault().await;
    app.engine.lock().await;
    let blob = blob?;

    match output {
        Some(path) => {
            std::fs::write(&path, &blob)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Exported vault to {}", path.display());
        }
        None => println!("{blob}"),
    }
    Ok(())
}

pub async fn import(config: &Config, path: &Path) -> anyhow::Result<()> {
    let blob = read_file(path)?;
    let app = App::open(config).await?;

    let password = read_password("Password of the exported vault: ")?;
    if !app.engine.import_vault(blob.trim(), password.expose_secret()).await? {
        anyhow::bail!("The file could not be opened with that password");
    }

    println!("Imported vault from {}", path.display());
    Ok(())
}

/// Human-readable entry, masking sensitive fields unless `reveal`.
pub fn render_entry(entry: &Entry, reveal: bool) -> String {
    let mask = |value: &str| {
        if reveal {
            value.to_string()
        } else {
            "********".to_string()
        }
    };

    let mut out = String::new();
    let mut line = |label: &str, value: &str| {
        out.push_str(&format!("{label:<12}{value}\n"));
    };

    line("id:", &entry.id);
    line("title:", &entry.title);
    line("type:", entry.kind().as_str());
    if let Some(category) = &entry.category {
        line("category:", category);
    }
    if !entry.tags.is_empty() {
        let tags: Vec<&str> = entry.tags.iter().map(String::as_str).collect();
        line("tags:", &tags.join(", "));
    }
    line("created:", &entry.created_at.to_rfc3339());
    line("updated:", &entry.updated_at.to_rfc3339());

    match &entry.body {
        EntryBody::Note { content, language } => {
            if let Some(language) = language {
                line("language:", language);
            }
            line("content:", &mask(content));
        }
        EntryBody::Key {
            key,
            public_key,
            algorithm,
            key_size,
            notes,
        } => {
            if let Some(algorithm) = algorithm {
                line("algorithm:", algorithm);
            }
            if let Some(size) = key_size {
                line("key size:", &size.to_string());
            }
            if let Some(public_key) = public_key {
                line("public key:", public_key.trim_end());
            }
            line("key:", &mask(key));
            if let Some(notes) = notes {
                line("notes:", notes);
            }
        }
        EntryBody::Password {
            username,
            password,
            url,
            notes,
        } => {
            if let Some(username) = username {
                line("username:", username);
            }
            if let Some(url) = url {
                line("url:", url);
            }
            line("password:", &mask(password));
            if let Some(notes) = notes {
                line("notes:", notes);
            }
        }
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
