//! Purpose: Evaluate list filters and sorts over snippet records.
//! Exports: `ListQuery`, `Sort`, `SortField`, `SortOrder`.
//! Role: One definition of match/sort semantics shared by store and server.
//! Invariants: Free-text search is plain case-insensitive substring match
//! OR-ed over name, language, description, and each tag.
//! Invariants: Default sort is (createdAt, descending).

use crate::core::error::{Error, ErrorKind};
use crate::core::record::Snippet;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
    Name,
    Language,
}

impl SortField {
    pub fn parse(value: &str) -> Result<Self, Error> {
        match value {
            "createdAt" => Ok(Self::CreatedAt),
            "updatedAt" => Ok(Self::UpdatedAt),
            "name" => Ok(Self::Name),
            "language" => Ok(Self::Language),
            other => Err(Error::new(ErrorKind::Validation)
                .with_message(format!("unknown sort field: {other}"))
                .with_field("sortBy")
                .with_hint("Use createdAt, updatedAt, name, or language.")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreatedAt => "createdAt",
            Self::UpdatedAt => "updatedAt",
            Self::Name => "name",
            Self::Language => "language",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(value: &str) -> Result<Self, Error> {
        match value {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(Error::new(ErrorKind::Validation)
                .with_message(format!("unknown sort order: {other}"))
                .with_field("order")
                .with_hint("Use asc or desc.")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Sort {
    pub field: SortField,
    pub order: SortOrder,
}

impl Default for Sort {
    fn default() -> Self {
        Self {
            field: SortField::CreatedAt,
            order: SortOrder::Desc,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ListQuery {
    pub search: Option<String>,
    pub language: Option<String>,
    pub sort: Sort,
}

impl ListQuery {
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_sort(mut self, field: SortField, order: SortOrder) -> Self {
        self.sort = Sort { field, order };
        self
    }

    pub fn matches(&self, snippet: &Snippet) -> bool {
        if let Some(search) = &self.search {
            let term = search.to_lowercase();
            let hit = contains_ci(&snippet.name, &term)
                || contains_ci(&snippet.language, &term)
                || contains_ci(&snippet.description, &term)
                || snippet.tags.iter().any(|tag| contains_ci(tag, &term));
            if !hit {
                return false;
            }
        }
        if let Some(language) = &self.language {
            if !contains_ci(&snippet.language, &language.to_lowercase()) {
                return false;
            }
        }
        true
    }

    pub fn sort(&self, snippets: &mut [Snippet]) {
        let Sort { field, order } = self.sort;
        snippets.sort_by(|a, b| {
            let ordering = match field {
                SortField::CreatedAt => a.created_at.cmp(&b.created_at),
                SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                SortField::Name => a.name.cmp(&b.name),
                SortField::Language => a.language.cmp(&b.language),
            };
            match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });
    }
}

fn contains_ci(haystack: &str, lowered_needle: &str) -> bool {
    if lowered_needle.is_empty() {
        return true;
    }
    haystack.to_lowercase().contains(lowered_needle)
}
