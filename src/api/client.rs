//! Purpose: Define the local mutation surface over the durable snippet store.
//! Exports: `LocalClient` and the snippet CRUD/list/distinct operations.
//! Role: Stable boundary for the CLI and server; validates input and
//! normalizes every failure into the `ErrorKind` taxonomy.
//! Invariants: The contract of each mutation ends at durable commit.
//! Broadcasting the change to other sessions is the caller's follow-up over
//! the realtime channel, never a side effect or precondition here.
#![allow(clippy::result_large_err)]

use std::path::{Path, PathBuf};

use crate::core::error::Error;
use crate::core::query::ListQuery;
use crate::core::record::{Snippet, SnippetDraft, SnippetPatch};
use crate::core::store::{Durability, Store};
use crate::data_paths::default_data_dir;

pub type ApiResult<T> = Result<T, Error>;

#[derive(Clone, Debug)]
pub struct LocalClient {
    data_dir: PathBuf,
    durability: Durability,
}

impl LocalClient {
    pub fn new() -> Self {
        Self {
            data_dir: default_data_dir(),
            durability: Durability::default(),
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn list_snippets(&self, query: &ListQuery) -> ApiResult<Vec<Snippet>> {
        self.store()?.list(query)
    }

    pub fn get_snippet(&self, id: &str) -> ApiResult<Snippet> {
        self.store()?.get(id)
    }

    pub fn create_snippet(&self, draft: SnippetDraft) -> ApiResult<Snippet> {
        self.store()?.create(draft)
    }

    pub fn update_snippet(&self, id: &str, patch: &SnippetPatch) -> ApiResult<Snippet> {
        self.store()?.update(id, patch)
    }

    pub fn delete_snippet(&self, id: &str) -> ApiResult<()> {
        self.store()?.delete(id)
    }

    pub fn distinct_languages(&self) -> ApiResult<Vec<String>> {
        self.store()?.distinct_languages()
    }

    fn store(&self) -> ApiResult<Store> {
        Ok(Store::open_or_create(&self.data_dir)?.with_durability(self.durability))
    }
}

impl Default for LocalClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::LocalClient;
    use crate::core::error::ErrorKind;
    use crate::core::query::ListQuery;
    use crate::core::record::{SnippetDraft, SnippetPatch};

    #[test]
    fn crud_round_trip_through_the_client() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = LocalClient::new().with_data_dir(dir.path());

        let created = client
            .create_snippet(SnippetDraft {
                name: Some("loop".to_string()),
                language: Some("go".to_string()),
                code: Some("for {}".to_string()),
                ..SnippetDraft::default()
            })
            .expect("create");
        assert_eq!(created.language, "go");
        assert!(created.tags.is_empty());

        let patch = SnippetPatch {
            description: Some(Some("simple loop".to_string())),
            ..SnippetPatch::default()
        };
        let updated = client.update_snippet(&created.id, &patch).expect("update");
        assert_eq!(updated.name, "loop");
        assert_eq!(updated.description, "simple loop");

        client.delete_snippet(&created.id).expect("delete");
        let err = client.get_snippet(&created.id).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        assert!(client
            .list_snippets(&ListQuery::default())
            .expect("list")
            .is_empty());
    }

    #[test]
    fn create_without_name_never_touches_the_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = LocalClient::new().with_data_dir(dir.path());

        let err = client
            .create_snippet(SnippetDraft::default())
            .expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(client
            .list_snippets(&ListQuery::default())
            .expect("list")
            .is_empty());
    }
}
