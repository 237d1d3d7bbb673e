//! Purpose: Define the realtime wire events exchanged over a session.
//! Exports: `ClientEvent`, `ServerEvent`.
//! Role: Stable JSON envelopes (`{"event": ..., "data": ...}`) shared by the
//! server, the relay, and any WebSocket client.
//! Invariants: Event names are kebab-case and additive-only.
//! Invariants: Delete events carry the bare record id, not a full record.

use serde::{Deserialize, Serialize};

use crate::core::record::Snippet;

/// Inbound events a session emits after observing its own successful HTTP
/// commit. The server relays these; it never synthesizes them from the
/// write path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    CreateSnippet(Snippet),
    UpdateSnippet(Snippet),
    DeleteSnippet(String),
}

impl ClientEvent {
    /// The event every *other* session should observe for this mutation.
    pub fn into_broadcast(self) -> ServerEvent {
        match self {
            ClientEvent::CreateSnippet(snippet) => ServerEvent::SnippetCreated(snippet),
            ClientEvent::UpdateSnippet(snippet) => ServerEvent::SnippetUpdated(snippet),
            ClientEvent::DeleteSnippet(id) => ServerEvent::SnippetDeleted(id),
        }
    }
}

/// Outbound events delivered to sessions. `UserCount` is a presence signal
/// sent to every session, including the one that just joined or left.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    SnippetCreated(Snippet),
    SnippetUpdated(Snippet),
    SnippetDeleted(String),
    UserCount(usize),
}
