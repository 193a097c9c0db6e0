//! Vault entries and the envelope that holds them.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::Codec;
use crate::error::{Result, VaultError};

/// Kind of a vault entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Note,
    Key,
    Password,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Key => "key",
            Self::Password => "password",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntryKind {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "note" => Ok(Self::Note),
            "key" => Ok(Self::Key),
            "password" => Ok(Self::Password),
            other => Err(VaultError::InvalidEntry(format!(
                "unknown entry type '{other}'"
            ))),
        }
    }
}

/// Kind-specific payload of an entry.
///
/// Serialized inline with the entry, discriminated by a `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntryBody {
    Note {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    Key {
        /// Private key material.
        key: String,
        #[serde(rename = "publicKey", default, skip_serializing_if = "Option::is_none")]
        public_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        algorithm: Option<String>,
        #[serde(rename = "keySize", default, skip_serializing_if = "Option::is_none")]
        key_size: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
    Password {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        password: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
}

impl EntryBody {
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Note { .. } => EntryKind::Note,
            Self::Key { .. } => EntryKind::Key,
            Self::Password { .. } => EntryKind::Password,
        }
    }

    /// The sensitive fields of this body, in a fixed order.
    fn secret_fields_mut(&mut self) -> Vec<&mut String> {
        match self {
            Self::Note { content, .. } => vec![content],
            Self::Key {
                key, public_key, ..
            } => {
                let mut fields = vec![key];
                if let Some(public_key) = public_key {
                    fields.push(public_key);
                }
                fields
            }
            Self::Password { password, .. } => vec![password],
        }
    }
}

/// A single vault item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Whether the sensitive fields currently hold ciphertext.
    #[serde(default)]
    pub encrypted: bool,
    #[serde(flatten)]
    pub body: EntryBody,
}

impl Entry {
    /// Create a plaintext entry with a fresh id and timestamps.
    pub fn new(title: impl Into<String>, body: EntryBody) -> Self {
        let now = Utc::now();
        Self {
            id: keynotes_core::id::uuid(),
            title: title.into(),
            category: None,
            tags: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            encrypted: false,
            body,
        }
    }

    pub fn note(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            title,
            EntryBody::Note {
                content: content.into(),
                language: None,
            },
        )
    }

    pub fn key(title: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(
            title,
            EntryBody::Key {
                key: key.into(),
                public_key: None,
                algorithm: None,
                key_size: None,
                notes: None,
            },
        )
    }

    pub fn password(
        title: impl Into<String>,
        username: Option<String>,
        password: impl Into<String>,
        url: Option<String>,
    ) -> Self {
        Self::new(
            title,
            EntryBody::Password {
                username,
                password: password.into(),
                url,
                notes: None,
            },
        )
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn kind(&self) -> EntryKind {
        self.body.kind()
    }

    /// Bump `updated_at` to now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Return a copy whose sensitive fields are encrypted under `password`.
    ///
    /// An entry that is already encrypted is first decrypted with the same
    /// password, so the result never carries doubly-encrypted fields.
    pub fn seal(&self, codec: &dyn Codec, password: &str) -> Result<Entry> {
        let mut sealed = self.open(codec, password)?;
        for field in sealed.body.secret_fields_mut() {
            *field = codec.encrypt(field, password)?;
        }
        sealed.encrypted = true;
        Ok(sealed)
    }

    /// Return a plaintext copy of this entry.
    pub fn open(&self, codec: &dyn Codec, password: &str) -> Result<Entry> {
        let mut opened = self.clone();
        if !opened.encrypted {
            return Ok(opened);
        }
        for field in opened.body.secret_fields_mut() {
            *field = codec.decrypt(field, password)?;
        }
        opened.encrypted = false;
        Ok(opened)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(VaultError::InvalidEntry("entry id is empty".to_string()));
        }
        Ok(())
    }
}

/// Query over decrypted entries.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub kind: Option<EntryKind>,
    pub tag: Option<String>,
    /// Case-insensitive substring of title or category.
    pub query: Option<String>,
}

impl EntryFilter {
    pub fn matches(&self, entry: &Entry) -> bool {
        if let Some(kind) = self.kind {
            if entry.kind() != kind {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !entry.tags.contains(tag) {
                return false;
            }
        }
        if let Some(query) = &self.query {
            let needle = query.to_lowercase();
            let in_title = entry.title.to_lowercase().contains(&needle);
            let in_category = entry
                .category
                .as_deref()
                .is_some_and(|c| c.to_lowercase().contains(&needle));
            if !in_title && !in_category {
                return false;
            }
        }
        true
    }

    /// Filter `entries`, keeping their order.
    pub fn apply(&self, entries: Vec<Entry>) -> Vec<Entry> {
        entries.into_iter().filter(|e| self.matches(e)).collect()
    }
}

/// Persisted container for all entries.
///
/// Serialized to JSON and then encrypted as a whole under the master
/// password to form the stored vault blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub password_hash: String,
    pub entries: Vec<Entry>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Envelope {
    pub const CURRENT_VERSION: u32 = 1;

    /// Create an empty envelope.
    pub fn new(password_hash: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            password_hash: password_hash.into(),
            entries: Vec::new(),
            version: Self::CURRENT_VERSION,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check structural invariants: supported version, non-empty and unique ids.
    pub fn validate(&self) -> Result<()> {
        if self.version == 0 || self.version > Self::CURRENT_VERSION {
            return Err(VaultError::InvalidEnvelope(format!(
                "unsupported version {}",
                self.version
            )));
        }

        let mut seen = HashSet::with_capacity(self.entries.len());
        for entry in &self.entries {
            entry.validate()?;
            if !seen.insert(entry.id.as_str()) {
                return Err(VaultError::InvalidEnvelope(format!(
                    "duplicate entry id '{}'",
                    entry.id
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Replace the entry with the same id, or append it.
    pub fn upsert(&mut self, entry: Entry) {
        match self.entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Remove an entry. Returns whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
