//! Purpose: Provide an HTTP client for the snipstore REST surface.
//! Exports: `RemoteClient`.
//! Role: Mirrors `LocalClient` operation-for-operation against a running
//! server; used by the CLI's `--remote` mode and the integration tests.
//! Invariants: Requests and responses follow the `{success, message, count,
//! data}` envelope; HTTP statuses map back onto the `ErrorKind` taxonomy.
#![allow(clippy::result_large_err)]

use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::client::ApiResult;
use crate::core::error::{Error, ErrorKind};
use crate::core::query::ListQuery;
use crate::core::record::{Snippet, SnippetDraft, SnippetPatch};

#[derive(Clone)]
pub struct RemoteClient {
    base_url: Url,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    count: Option<u64>,
    #[serde(default)]
    data: Option<T>,
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>) -> ApiResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            base_url,
            agent: ureq::AgentBuilder::new().build(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn list_snippets(&self, query: &ListQuery) -> ApiResult<Vec<Snippet>> {
        let mut url = self.endpoint(&["snippets"])?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(search) = &query.search {
                pairs.append_pair("search", search);
            }
            if let Some(language) = &query.language {
                pairs.append_pair("language", language);
            }
            pairs.append_pair("sortBy", query.sort.field.as_str());
            pairs.append_pair("order", query.sort.order.as_str());
        }
        let envelope: Envelope<Vec<Snippet>> = self.request("GET", &url, None)?;
        require_data(envelope)
    }

    pub fn get_snippet(&self, id: &str) -> ApiResult<Snippet> {
        let url = self.endpoint(&["snippets", id])?;
        let envelope: Envelope<Snippet> = self.request("GET", &url, None)?;
        require_data(envelope)
    }

    pub fn create_snippet(&self, draft: &SnippetDraft) -> ApiResult<Snippet> {
        let url = self.endpoint(&["snippets"])?;
        let body = encode_body(draft)?;
        let envelope: Envelope<Snippet> = self.request("POST", &url, Some(&body))?;
        require_data(envelope)
    }

    pub fn update_snippet(&self, id: &str, patch: &SnippetPatch) -> ApiResult<Snippet> {
        let url = self.endpoint(&["snippets", id])?;
        let body = encode_body(patch)?;
        let envelope: Envelope<Snippet> = self.request("PUT", &url, Some(&body))?;
        require_data(envelope)
    }

    pub fn delete_snippet(&self, id: &str) -> ApiResult<()> {
        let url = self.endpoint(&["snippets", id])?;
        let _envelope: Envelope<serde_json::Value> = self.request("DELETE", &url, None)?;
        Ok(())
    }

    pub fn snippets_by_language(&self, language: &str) -> ApiResult<Vec<Snippet>> {
        let url = self.endpoint(&["snippets", "language", language])?;
        let envelope: Envelope<Vec<Snippet>> = self.request("GET", &url, None)?;
        require_data(envelope)
    }

    pub fn distinct_languages(&self) -> ApiResult<Vec<String>> {
        let url = self.endpoint(&["snippets", "languages", "all"])?;
        let envelope: Envelope<Vec<String>> = self.request("GET", &url, None)?;
        require_data(envelope)
    }

    fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                Error::new(ErrorKind::Validation).with_message("remote URL cannot carry a path")
            })?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        url: &Url,
        body: Option<&str>,
    ) -> ApiResult<Envelope<T>> {
        let request = self
            .agent
            .request_url(method, url)
            .set("content-type", "application/json");
        let result = match body {
            Some(body) => request.send_string(body),
            None => request.call(),
        };
        match result {
            Ok(response) => decode_envelope(response),
            Err(ureq::Error::Status(status, response)) => {
                Err(error_from_status(status, response))
            }
            Err(err @ ureq::Error::Transport(_)) => Err(Error::new(ErrorKind::Io)
                .with_message("failed to reach server")
                .with_hint("Check the --remote URL and that the server is running.")
                .with_source(err)),
        }
    }
}

fn encode_body<T: serde::Serialize>(body: &T) -> ApiResult<String> {
    serde_json::to_string(body).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode request body")
            .with_source(err)
    })
}

fn decode_envelope<T: DeserializeOwned>(response: ureq::Response) -> ApiResult<Envelope<T>> {
    let text = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read server response")
            .with_source(err)
    })?;
    let envelope: Envelope<T> = serde_json::from_str(&text).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("server returned an unexpected response body")
            .with_source(err)
    })?;
    if !envelope.success {
        return Err(Error::new(ErrorKind::Internal).with_message(
            envelope
                .message
                .unwrap_or_else(|| "server reported failure".to_string()),
        ));
    }
    Ok(envelope)
}

fn require_data<T>(envelope: Envelope<T>) -> ApiResult<T> {
    envelope.data.ok_or_else(|| {
        Error::new(ErrorKind::Internal).with_message("server response is missing data")
    })
}

fn error_from_status(status: u16, response: ureq::Response) -> Error {
    let kind = match status {
        400 => ErrorKind::Validation,
        401 => ErrorKind::Auth,
        404 => ErrorKind::NotFound,
        409 => ErrorKind::Duplicate,
        423 => ErrorKind::Busy,
        _ => ErrorKind::Internal,
    };
    let message = response
        .into_string()
        .ok()
        .and_then(|text| serde_json::from_str::<Envelope<serde_json::Value>>(&text).ok())
        .and_then(|envelope| envelope.message)
        .unwrap_or_else(|| format!("server returned status {status}"));
    Error::new(kind).with_message(message)
}

fn normalize_base_url(base_url: String) -> ApiResult<Url> {
    let url = Url::parse(base_url.trim_end_matches('/')).map_err(|err| {
        Error::new(ErrorKind::Validation)
            .with_message("invalid remote URL")
            .with_hint("Use a base URL like http://127.0.0.1:5000.")
            .with_source(err)
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::new(ErrorKind::Validation)
            .with_message("remote URL must be http or https"));
    }
    Ok(url)
}
