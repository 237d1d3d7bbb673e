//! Purpose: Define the stable public API boundary for snipstore.
//! Exports: Record types, query types, clients, realtime events, and relay.
//! Role: Public, additive-only surface; hides internal storage modules.
//! Invariants: This module is the only public path to storage primitives.

mod client;
pub mod events;
pub mod relay;
mod remote;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::query::{ListQuery, Sort, SortField, SortOrder};
pub use crate::core::record::{
    DEFAULT_LANGUAGE, Snippet, SnippetDraft, SnippetPatch, new_record_id,
};
pub use crate::core::store::{Durability, Store};
pub use crate::data_paths::default_data_dir;
pub use client::{ApiResult, LocalClient};
pub use events::{ClientEvent, ServerEvent};
pub use relay::{Relay, SessionId, SessionRegistry};
pub use remote::RemoteClient;
