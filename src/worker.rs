use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, ORIGIN, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::state::{Role, Turn};

/// Events sent from the background worker to the UI event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// One non-empty line of the response body.
    Chunk(String),
    /// The request is over. Always the last event, also after `Failed`.
    Done,
    /// The request failed; carries the error text.
    Failed(String),
}

/// Body of one completion request. Built once, never modified.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    prompt: String,
    #[serde(rename = "userId")]
    session_tag: String,
    network: bool,
}

impl StreamRequest {
    pub fn new(prompt: impl Into<String>, session_tag: impl Into<String>, network: bool) -> Self {
        Self {
            prompt: prompt.into(),
            session_tag: session_tag.into(),
            network,
        }
    }

    /// Builds the request from the conversation so far.
    ///
    /// Only the latest user turn is sent; earlier history never reaches the
    /// endpoint. Returns `None` when there is no user turn.
    pub fn from_turns(turns: &[Turn], session_tag: &str, network: bool) -> Option<Self> {
        turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| Self::new(t.content.clone(), session_tag, network))
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn session_tag(&self) -> &str {
        &self.session_tag
    }

    pub fn network(&self) -> bool {
        self.network
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Anything that can go wrong between sending the request and reading the
/// last byte. The view treats all of these the same way.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("could not encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{}", describe(.0))]
    Request(#[source] reqwest::Error),

    #[error("server returned {0}")]
    Status(StatusCode),

    #[error("failed reading response: {}", describe(.0))]
    Read(#[source] reqwest::Error),

    #[error("response is not valid UTF-8: {0}")]
    Decode(#[from] std::str::Utf8Error),
}

/// Flattens an error and its sources into one line, skipping sources whose
/// text the outer message already contains.
fn describe(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[derive(Clone)]
pub struct CompletionClient {
    client: Client,
    endpoint: String,
    origin: String,
    user_agent: String,
}

impl CompletionClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            endpoint: config.endpoint.clone(),
            origin: config.origin.clone(),
            user_agent: config.user_agent.clone(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sends `request` and forwards every non-empty response line as a
    /// `Chunk`. `\n`, `\r` and `\r\n` all end a line. Returns the number of
    /// chunks sent.
    pub async fn stream(
        &self,
        request: &StreamRequest,
        events: &mpsc::UnboundedSender<StreamEvent>,
    ) -> Result<usize, StreamError> {
        let body = request.to_json()?;

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(ORIGIN, &self.origin)
            .header(USER_AGENT, &self.user_agent)
            .body(body)
            .send()
            .await
            .map_err(StreamError::Request)?;

        let status = response.status();
        debug!(%status, "completion response");
        if !status.is_success() {
            return Err(StreamError::Status(status));
        }

        let mut byte_stream = response.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();
        let mut chunks = 0;

        while let Some(bytes) = byte_stream.next().await {
            let bytes = bytes.map_err(StreamError::Read)?;
            // Bytes already in `pending` hold no line break
            let mut scanned = pending.len();
            pending.extend_from_slice(&bytes);

            let mut start = 0;
            while let Some(offset) = pending[scanned..].iter().position(|b| is_line_break(*b)) {
                let end = scanned + offset;
                chunks += emit_line(&pending[start..end], events)?;
                start = end + 1;
                scanned = start;
            }
            pending.drain(..start);
        }

        // Body ended without a trailing newline
        if !pending.is_empty() {
            chunks += emit_line(&pending, events)?;
        }

        Ok(chunks)
    }
}

// A `\r\n` pair yields an empty line in between, which is skipped
fn is_line_break(b: u8) -> bool {
    b == b'\n' || b == b'\r'
}

/// Decodes one line and sends it unless it is empty. Returns how many
/// chunks were sent (0 or 1).
fn emit_line(raw: &[u8], events: &mpsc::UnboundedSender<StreamEvent>) -> Result<usize, StreamError> {
    if raw.is_empty() {
        return Ok(0);
    }

    let line = std::str::from_utf8(raw)?;
    // A closed receiver means the view is gone; keep draining quietly.
    let _ = events.send(StreamEvent::Chunk(line.to_string()));
    Ok(1)
}

/// Performs one request and reports it on `events`, ending with `Done`
/// whatever happens.
pub async fn run(
    client: CompletionClient,
    request: StreamRequest,
    events: mpsc::UnboundedSender<StreamEvent>,
) {
    info!(
        endpoint = client.endpoint(),
        session = request.session_tag(),
        network = request.network(),
        prompt_len = request.prompt().len(),
        "starting completion request"
    );

    match client.stream(&request, &events).await {
        Ok(chunks) => {
            info!(chunks, "completion stream finished");
        }
        Err(e) => {
            warn!(error = %e, "completion request failed");
            let _ = events.send(StreamEvent::Failed(e.to_string()));
        }
    }

    let _ = events.send(StreamEvent::Done);
}

/// Starts [`run`] on a background task.
pub fn spawn(
    client: CompletionClient,
    request: StreamRequest,
    events: mpsc::UnboundedSender<StreamEvent>,
) -> JoinHandle<()> {
    tokio::spawn(run(client, request, events))
}
