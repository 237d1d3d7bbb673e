//! Purpose: Define the Snippet record plus its create/update input shapes.
//! Exports: `Snippet`, `SnippetDraft`, `SnippetPatch`, `new_record_id`.
//! Role: Field-level normalization lives here so the store and both clients
//! share one set of merge semantics.
//! Invariants: `name` is never empty after a successful normalize/apply.
//! Invariants: A patch only overwrites fields that were present in the input;
//! `description` distinguishes absent from present-but-null/empty.

use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;

use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_LANGUAGE: &str = "javascript";

const RECORD_ID_BYTES: usize = 12;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    pub id: String,
    pub name: String,
    pub language: String,
    pub code: String,
    pub description: String,
    pub tags: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Create-request body. Everything except `name` falls back to a default.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SnippetDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl SnippetDraft {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Validate and fill defaults. Fails with `Validation` when `name` is
    /// missing or empty after trimming.
    pub fn normalize(self) -> Result<NormalizedDraft, Error> {
        let name = self
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                Error::new(ErrorKind::Validation)
                    .with_message("name is required")
                    .with_field("name")
            })?
            .to_string();

        let language = self
            .language
            .as_deref()
            .map(str::trim)
            .filter(|language| !language.is_empty())
            .unwrap_or(DEFAULT_LANGUAGE)
            .to_string();

        Ok(NormalizedDraft {
            name,
            language,
            code: self.code.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            tags: self.tags.unwrap_or_default(),
        })
    }
}

/// A draft that passed validation; ready for the store to stamp id and times.
#[derive(Clone, Debug)]
pub struct NormalizedDraft {
    pub name: String,
    pub language: String,
    pub code: String,
    pub description: String,
    pub tags: Vec<String>,
}

impl NormalizedDraft {
    pub fn into_snippet(self, id: String, at: OffsetDateTime) -> Snippet {
        Snippet {
            id,
            name: self.name,
            language: self.language,
            code: self.code,
            description: self.description,
            tags: self.tags,
            created_at: at,
            updated_at: at,
        }
    }
}

/// Update-request body. Absent fields leave the record unchanged; a present
/// `description` overwrites even when null or empty.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SnippetPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "some_if_present"
    )]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl SnippetPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.language.is_none()
            && self.code.is_none()
            && self.description.is_none()
            && self.tags.is_none()
    }

    /// Merge supplied fields into `snippet`. The caller refreshes
    /// `updated_at` after a successful apply.
    pub fn apply(&self, snippet: &mut Snippet) -> Result<(), Error> {
        if let Some(name) = &self.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::new(ErrorKind::Validation)
                    .with_message("name must not be empty")
                    .with_field("name"));
            }
            snippet.name = name.to_string();
        }
        if let Some(language) = &self.language {
            let language = language.trim();
            if language.is_empty() {
                return Err(Error::new(ErrorKind::Validation)
                    .with_message("language must not be empty when supplied")
                    .with_field("language"));
            }
            snippet.language = language.to_string();
        }
        if let Some(code) = &self.code {
            snippet.code = code.clone();
        }
        if let Some(description) = &self.description {
            snippet.description = description.clone().unwrap_or_default();
        }
        if let Some(tags) = &self.tags {
            snippet.tags = tags.clone();
        }
        Ok(())
    }
}

// Present-but-null must survive deserialization as `Some(None)`.
fn some_if_present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Opaque 24-hex-char record identifier.
pub fn new_record_id() -> Result<String, Error> {
    let mut bytes = [0u8; RECORD_ID_BYTES];
    getrandom::fill(&mut bytes).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message(format!("failed to generate record id: {err}"))
    })?;
    let mut id = String::with_capacity(RECORD_ID_BYTES * 2);
    for byte in bytes {
        use std::fmt::Write;
        let _ = write!(id, "{byte:02x}");
    }
    Ok(id)
}

pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Next `updated_at` value: strictly after `prev` even when the clock has
/// not advanced past it.
pub fn next_update_time(prev: OffsetDateTime) -> OffsetDateTime {
    let now = now();
    if now > prev {
        now
    } else {
        prev + time::Duration::NANOSECOND
    }
}
