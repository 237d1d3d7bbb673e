// Durable snippet collection: one JSON document per data dir, fs2-locked,
// committed by atomic rename.
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};
use crate::core::query::ListQuery;
use crate::core::record::{self, Snippet, SnippetDraft, SnippetPatch, new_record_id};

const STORE_FILE: &str = "snippets.json";
const LOCK_FILE: &str = "snippets.lock";
const VERSION: u32 = 1;

/// Commit durability. `Fast` relies on the atomic rename alone; `Flush`
/// fsyncs the new document before the rename.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Durability {
    #[default]
    Fast,
    Flush,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreDoc {
    version: u32,
    snippets: Vec<Snippet>,
}

impl StoreDoc {
    fn empty() -> Self {
        Self {
            version: VERSION,
            snippets: Vec::new(),
        }
    }
}

pub struct Store {
    data_path: PathBuf,
    lock_path: PathBuf,
    durability: Durability,
}

impl Store {
    /// Open the store under `dir`, creating the directory and an empty
    /// document when absent.
    pub fn open_or_create(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to create data directory")
                .with_path(dir)
                .with_source(err)
        })?;

        let store = Self {
            data_path: dir.join(STORE_FILE),
            lock_path: dir.join(LOCK_FILE),
            durability: Durability::default(),
        };

        if !store.data_path.exists() {
            let _lock = store.lock_exclusive()?;
            // Another process may have won the race while we waited.
            if !store.data_path.exists() {
                store.write_doc(&StoreDoc::empty())?;
            }
        }

        Ok(store)
    }

    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn list(&self, query: &ListQuery) -> Result<Vec<Snippet>, Error> {
        let _lock = self.lock_shared()?;
        let doc = self.read_doc()?;
        let mut snippets: Vec<Snippet> = doc
            .snippets
            .into_iter()
            .filter(|snippet| query.matches(snippet))
            .collect();
        query.sort(&mut snippets);
        Ok(snippets)
    }

    pub fn get(&self, id: &str) -> Result<Snippet, Error> {
        let _lock = self.lock_shared()?;
        let doc = self.read_doc()?;
        doc.snippets
            .into_iter()
            .find(|snippet| snippet.id == id)
            .ok_or_else(|| not_found(id))
    }

    pub fn create(&self, draft: SnippetDraft) -> Result<Snippet, Error> {
        let normalized = draft.normalize()?;
        let _lock = self.lock_exclusive()?;
        let mut doc = self.read_doc()?;

        let id = new_record_id()?;
        if doc.snippets.iter().any(|snippet| snippet.id == id) {
            return Err(Error::new(ErrorKind::Duplicate)
                .with_message("duplicate value for field: id")
                .with_field("id"));
        }

        let snippet = normalized.into_snippet(id, record::now());
        doc.snippets.push(snippet.clone());
        self.write_doc(&doc)?;
        Ok(snippet)
    }

    pub fn update(&self, id: &str, patch: &SnippetPatch) -> Result<Snippet, Error> {
        let _lock = self.lock_exclusive()?;
        let mut doc = self.read_doc()?;
        let snippet = doc
            .snippets
            .iter_mut()
            .find(|snippet| snippet.id == id)
            .ok_or_else(|| not_found(id))?;

        patch.apply(snippet)?;
        snippet.updated_at = record::next_update_time(snippet.updated_at);
        let updated = snippet.clone();
        self.write_doc(&doc)?;
        Ok(updated)
    }

    pub fn delete(&self, id: &str) -> Result<(), Error> {
        let _lock = self.lock_exclusive()?;
        let mut doc = self.read_doc()?;
        let position = doc
            .snippets
            .iter()
            .position(|snippet| snippet.id == id)
            .ok_or_else(|| not_found(id))?;
        doc.snippets.remove(position);
        self.write_doc(&doc)
    }

    pub fn distinct_languages(&self) -> Result<Vec<String>, Error> {
        let _lock = self.lock_shared()?;
        let doc = self.read_doc()?;
        let mut languages: Vec<String> = doc
            .snippets
            .into_iter()
            .map(|snippet| snippet.language)
            .collect();
        languages.sort();
        languages.dedup();
        Ok(languages)
    }

    fn read_doc(&self) -> Result<StoreDoc, Error> {
        let bytes = fs::read(&self.data_path).map_err(|err| {
            Error::new(io_error_kind(&err))
                .with_message("failed to read store file")
                .with_path(&self.data_path)
                .with_source(err)
        })?;
        let doc: StoreDoc = serde_json::from_slice(&bytes).map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message("store file is not valid JSON")
                .with_path(&self.data_path)
                .with_source(err)
        })?;
        if doc.version != VERSION {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("unsupported store version")
                .with_path(&self.data_path));
        }
        Ok(doc)
    }

    // Callers must hold the exclusive lock.
    fn write_doc(&self, doc: &StoreDoc) -> Result<(), Error> {
        let tmp_path = self.data_path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(doc).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode store document")
                .with_source(err)
        })?;

        let mut file = File::create(&tmp_path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to create temp store file")
                .with_path(&tmp_path)
                .with_source(err)
        })?;
        file.write_all(&bytes).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write store document")
                .with_path(&tmp_path)
                .with_source(err)
        })?;
        if self.durability == Durability::Flush {
            file.sync_all().map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to flush store document")
                    .with_path(&tmp_path)
                    .with_source(err)
            })?;
        }
        drop(file);

        fs::rename(&tmp_path, &self.data_path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to commit store document")
                .with_path(&self.data_path)
                .with_source(err)
        })
    }

    fn lock_exclusive(&self) -> Result<StoreLock, Error> {
        let file = self.open_lock_file()?;
        FileExt::lock_exclusive(&file).map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_message("failed to lock store")
                .with_path(&self.lock_path)
                .with_source(err)
        })?;
        Ok(StoreLock { file })
    }

    fn lock_shared(&self) -> Result<StoreLock, Error> {
        let file = self.open_lock_file()?;
        FileExt::lock_shared(&file).map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_message("failed to lock store")
                .with_path(&self.lock_path)
                .with_source(err)
        })?;
        Ok(StoreLock { file })
    }

    fn open_lock_file(&self) -> Result<File, Error> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to open store lock file")
                    .with_path(&self.lock_path)
                    .with_source(err)
            })
    }
}

struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn not_found(id: &str) -> Error {
    Error::new(ErrorKind::NotFound).with_message(format!("snippet not found: {id}"))
}

fn io_error_kind(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        _ => ErrorKind::Io,
    }
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        _ => ErrorKind::Io,
    }
}
