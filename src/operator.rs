use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::message::Message;
use crate::tui::AppEvent;

/// Operator invoked remotely to record a query vote.
pub const VOTE_OPERATOR: &str = "record_query_vote";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Upvote,
    Downvote,
}

/// One streamed payload from the ask operator.
///
/// Any of `message`/`outputs`/`data` may be present; `done` marks the end
/// of the invocation. `data.overwrite_last` requests update-in-place of the
/// newest incoming message instead of an append.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShowMessagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_to: Option<String>,
    #[serde(default)]
    pub done: bool,
}

impl ShowMessagePayload {
    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }

    /// True when the payload carries anything worth displaying.
    pub fn has_content(&self) -> bool {
        self.message.is_some() || self.outputs.is_some() || self.data.is_some()
    }

    pub fn overwrite_last(&self) -> bool {
        self.data
            .as_ref()
            .and_then(|d| d.get("overwrite_last"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Outbound ask request: the typed message plus accumulated history,
/// stamped with an invocation id (for abort) and a generation (so late
/// results from a cancelled turn can be dropped).
#[derive(Debug, Clone, Serialize)]
pub struct AskRequest {
    pub invocation_id: String,
    #[serde(skip)]
    pub generation: u64,
    pub query: String,
    pub history: Vec<Message>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoteRequest {
    pub query_id: String,
    pub vote: Vote,
}

/// Completions delivered back into the event loop by runtime tasks.
#[derive(Debug)]
pub enum OperatorEvent {
    Payload {
        generation: u64,
        payload: ShowMessagePayload,
    },
    Failed {
        generation: u64,
        error: String,
    },
    VoteRecorded {
        query_id: String,
        vote: Vote,
    },
    VoteFailed {
        query_id: String,
        error: String,
    },
}

/// The host operator runtime, injected so the panel never instantiates it.
///
/// Implementations deliver results asynchronously through the event channel;
/// nothing here blocks the event loop.
pub trait OperatorRuntime: Send + Sync {
    fn ask(&self, request: AskRequest, events: UnboundedSender<AppEvent>);
    fn vote(&self, request: VoteRequest, events: UnboundedSender<AppEvent>);
    fn abort(&self, invocation_id: &str);
}

#[derive(Serialize)]
struct ExecuteRequest {
    operator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    invocation_id: Option<String>,
    params: Value,
}

#[derive(Serialize)]
struct AbortRequest {
    invocation_id: String,
}

/// HTTP-backed runtime: executes named operators against an operator server
/// and streams back newline-delimited JSON payloads.
#[derive(Clone)]
pub struct HttpOperatorRuntime {
    client: Client,
    base_url: String,
    ask_operator: String,
}

impl HttpOperatorRuntime {
    pub fn new(base_url: &str, ask_operator: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            ask_operator: ask_operator.to_string(),
        }
    }

    async fn run_ask(&self, request: AskRequest, events: UnboundedSender<AppEvent>) -> Result<()> {
        let url = format!("{}/operators/execute", self.base_url);
        let generation = request.generation;

        let body = ExecuteRequest {
            operator: self.ask_operator.clone(),
            invocation_id: Some(request.invocation_id.clone()),
            params: serde_json::json!({
                "query": request.query,
                "history": request.history,
            }),
        };

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "operator request failed with status: {}",
                response.status()
            ));
        }

        let mut stream = response.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();
        let mut saw_done = false;

        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
            for line in drain_lines(&mut buf) {
                if let Some(payload) = parse_payload_line(&line) {
                    saw_done |= payload.done;
                    let _ = events.send(AppEvent::Operator(OperatorEvent::Payload {
                        generation,
                        payload,
                    }));
                }
            }
        }

        // Trailing unterminated line, if any.
        if let Ok(rest) = String::from_utf8(std::mem::take(&mut buf)) {
            if let Some(payload) = parse_payload_line(&rest) {
                saw_done |= payload.done;
                let _ = events.send(AppEvent::Operator(OperatorEvent::Payload {
                    generation,
                    payload,
                }));
            }
        }

        // The server normally terminates with done=true; synthesize one if
        // the stream ended without it so the session flags always clear.
        if !saw_done {
            debug!(generation, "ask stream ended without done; synthesizing");
            let _ = events.send(AppEvent::Operator(OperatorEvent::Payload {
                generation,
                payload: ShowMessagePayload::done(),
            }));
        }

        Ok(())
    }

    async fn run_vote(&self, request: VoteRequest) -> Result<()> {
        let url = format!("{}/operators/execute", self.base_url);
        let body = ExecuteRequest {
            operator: VOTE_OPERATOR.to_string(),
            invocation_id: None,
            params: serde_json::to_value(&request)?,
        };

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "vote request failed with status: {}",
                response.status()
            ));
        }
        Ok(())
    }

    async fn run_abort(&self, invocation_id: String) -> Result<()> {
        let url = format!("{}/operators/abort", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&AbortRequest { invocation_id })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "abort request failed with status: {}",
                response.status()
            ));
        }
        Ok(())
    }
}

impl OperatorRuntime for HttpOperatorRuntime {
    fn ask(&self, request: AskRequest, events: UnboundedSender<AppEvent>) {
        let runtime = self.clone();
        tokio::spawn(async move {
            let generation = request.generation;
            if let Err(e) = runtime.run_ask(request, events.clone()).await {
                let _ = events.send(AppEvent::Operator(OperatorEvent::Failed {
                    generation,
                    error: e.to_string(),
                }));
            }
        });
    }

    fn vote(&self, request: VoteRequest, events: UnboundedSender<AppEvent>) {
        let runtime = self.clone();
        tokio::spawn(async move {
            let event = match runtime.run_vote(request.clone()).await {
                Ok(()) => OperatorEvent::VoteRecorded {
                    query_id: request.query_id,
                    vote: request.vote,
                },
                Err(e) => OperatorEvent::VoteFailed {
                    query_id: request.query_id,
                    error: e.to_string(),
                },
            };
            let _ = events.send(AppEvent::Operator(event));
        });
    }

    fn abort(&self, invocation_id: &str) {
        let runtime = self.clone();
        let invocation_id = invocation_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = runtime.run_abort(invocation_id).await {
                warn!("abort request failed: {}", e);
            }
        });
    }
}

/// Pull complete newline-terminated lines out of the stream buffer.
fn drain_lines(buf: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let raw: Vec<u8> = buf.drain(..=pos).collect();
        match String::from_utf8(raw) {
            Ok(line) => lines.push(line),
            Err(e) => warn!("dropping non-utf8 payload line: {}", e),
        }
    }
    lines
}

/// Parse one payload line. Blank lines and malformed JSON are skipped; the
/// runtime is trusted but a bad line must not take the panel down.
fn parse_payload_line(line: &str) -> Option<ShowMessagePayload> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!("skipping malformed payload line: {}", e);
            None
        }
    }
}
