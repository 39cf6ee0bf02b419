//! Plaintext vault document model.
//!
//! The document is the unit of encryption: every mutation produces a new
//! full document state, which is re-encrypted and pushed as one opaque
//! envelope. The backend never performs partial mutations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use zkvault_common::{Error, Result};

/// Current document format version.
pub const DOCUMENT_VERSION: u32 = 1;

/// Opaque, globally-unique entry identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Generate a fresh unique id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque, globally-unique folder identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderId(Uuid);

impl FolderId {
    /// Generate a fresh unique id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for FolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of secret an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Login,
    Card,
    Note,
    Identity,
}

/// A free-form labelled field attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomField {
    pub label: String,
    pub value: String,
    /// Concealed fields are treated like passwords by the UI layer.
    pub concealed: bool,
}

/// One vault entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: EntryId,
    pub kind: EntryKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
    #[serde(default)]
    pub favorite: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<FolderId>,
}

/// A folder grouping entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied content for creating or replacing an entry.
///
/// Identity and timestamps are owned by the document; drafts carry only
/// user-editable fields.
#[derive(Debug, Clone, Default)]
pub struct EntryDraft {
    pub kind: Option<EntryKind>,
    pub name: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub url: Option<String>,
    pub notes: Option<String>,
    pub custom_fields: Vec<CustomField>,
    pub favorite: bool,
    pub folder_id: Option<FolderId>,
}

impl EntryDraft {
    /// Convenience constructor for a login entry.
    pub fn login(name: impl Into<String>) -> Self {
        Self {
            kind: Some(EntryKind::Login),
            name: name.into(),
            ..Self::default()
        }
    }
}

/// The versioned plaintext vault document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultDocument {
    pub version: u32,
    pub entries: Vec<Entry>,
    pub folders: Vec<Folder>,
    pub last_modified: DateTime<Utc>,
}

impl VaultDocument {
    /// Create an empty document, as produced at vault setup.
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            version: DOCUMENT_VERSION,
            entries: Vec::new(),
            folders: Vec::new(),
            last_modified: now,
        }
    }

    /// Add a new entry from a draft.
    ///
    /// # Postconditions
    /// - The entry id is freshly generated and unique
    /// - `last_modified` is updated
    pub fn add_entry(&mut self, draft: EntryDraft, now: DateTime<Utc>) -> EntryId {
        let id = EntryId::generate();
        self.entries.push(Entry {
            id: id.clone(),
            kind: draft.kind.unwrap_or(EntryKind::Login),
            name: draft.name,
            username: draft.username,
            password: draft.password,
            url: draft.url,
            notes: draft.notes,
            custom_fields: draft.custom_fields,
            favorite: draft.favorite,
            created_at: now,
            updated_at: now,
            folder_id: draft.folder_id,
        });
        self.last_modified = now;
        id
    }

    /// Replace the editable fields of an existing entry.
    ///
    /// # Errors
    /// - [`Error::NotFound`] if no entry has the given id
    pub fn update_entry(&mut self, id: &EntryId, draft: EntryDraft, now: DateTime<Utc>) -> Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| &entry.id == id)
            .ok_or_else(|| Error::NotFound(format!("Entry {}", id)))?;

        if let Some(kind) = draft.kind {
            entry.kind = kind;
        }
        entry.name = draft.name;
        entry.username = draft.username;
        entry.password = draft.password;
        entry.url = draft.url;
        entry.notes = draft.notes;
        entry.custom_fields = draft.custom_fields;
        entry.favorite = draft.favorite;
        entry.folder_id = draft.folder_id;
        entry.updated_at = now;
        self.last_modified = now;
        Ok(())
    }

    /// Remove an entry.
    ///
    /// # Errors
    /// - [`Error::NotFound`] if no entry has the given id
    pub fn delete_entry(&mut self, id: &EntryId, now: DateTime<Utc>) -> Result<()> {
        let before = self.entries.len();
        self.entries.retain(|entry| &entry.id != id);
        if self.entries.len() == before {
            return Err(Error::NotFound(format!("Entry {}", id)));
        }
        self.last_modified = now;
        Ok(())
    }

    /// Look up an entry by id.
    pub fn entry(&self, id: &EntryId) -> Option<&Entry> {
        self.entries.iter().find(|entry| &entry.id == id)
    }

    /// Add a folder.
    pub fn add_folder(&mut self, name: impl Into<String>, now: DateTime<Utc>) -> FolderId {
        let id = FolderId::generate();
        self.folders.push(Folder {
            id: id.clone(),
            name: name.into(),
            created_at: now,
        });
        self.last_modified = now;
        id
    }

    /// Remove a folder, detaching any entries that referenced it.
    ///
    /// # Errors
    /// - [`Error::NotFound`] if no folder has the given id
    pub fn delete_folder(&mut self, id: &FolderId, now: DateTime<Utc>) -> Result<()> {
        let before = self.folders.len();
        self.folders.retain(|folder| &folder.id != id);
        if self.folders.len() == before {
            return Err(Error::NotFound(format!("Folder {}", id)));
        }
        for entry in &mut self.entries {
            if entry.folder_id.as_ref() == Some(id) {
                entry.folder_id = None;
            }
        }
        self.last_modified = now;
        Ok(())
    }

    /// Serialize to the canonical byte form used for encryption.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from the canonical byte form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}
