//! Defines the contract between the agent engine and its collaborators: the
//! model client that streams assistant output, the tools the assistant may
//! invoke, and the approver consulted for permission escalations.

use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use futures::Stream;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;

/// A structured tool invocation parsed out of the assistant's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlates the call with its result within one assistant turn.
    pub id: String,
    pub name: String,
    /// Raw JSON arguments as emitted by the model; tools parse these
    /// themselves against their declared schema.
    pub input_json: String,
}

/// Uniform result envelope returned by every tool handler.
///
/// Errors are reported as results, not raised: a failed handler sets
/// `is_error` and puts the message in `content` so the model can recover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(call: &ToolCall, message: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            content: message.into(),
            is_error: true,
        }
    }
}

/// One contiguous run of assistant output. A turn is terminal when the model
/// finished without requesting tool calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// An entry in the conversation log.
///
/// Tool-result turns appear immediately after the assistant turn that
/// requested them, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnRecord {
    User { text: String },
    Assistant(AssistantTurn),
    ToolResults { results: Vec<ToolResult> },
}

/// Events produced by the model client while streaming one assistant turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    TextDelta(String),
    ToolCall(ToolCall),
    TurnEnd,
}

/// Transport-level failure from the model client.
#[derive(Debug, thiserror::Error)]
#[error("model stream error: {0}")]
pub struct ModelStreamError(pub String);

/// The request handed to the model client for one turn: the full history so
/// far plus the tool descriptors the model may call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub history: Vec<TurnRecord>,
    pub tools: Vec<ToolDescriptor>,
}

/// Wire-shaped description of a tool: name, human description, and a
/// JSON-schema value for its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub required: Vec<String>,
}

/// Stream of model events for a single turn. The client feeds the channel
/// from its own reader task; the engine drains it cooperatively.
pub struct ModelStream {
    rx_event: mpsc::Receiver<Result<ModelEvent, ModelStreamError>>,
}

impl ModelStream {
    pub fn new(rx_event: mpsc::Receiver<Result<ModelEvent, ModelStreamError>>) -> Self {
        Self { rx_event }
    }

    /// Convenience constructor for clients (and tests) that want to push
    /// events from a spawned task.
    pub fn channel(buffer: usize) -> (mpsc::Sender<Result<ModelEvent, ModelStreamError>>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::new(rx))
    }
}

impl Stream for ModelStream {
    type Item = Result<ModelEvent, ModelStreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx_event.poll_recv(cx)
    }
}

/// The LLM wire protocol, treated as a black box. Implementations stream
/// assistant text deltas and structured tool-call requests.
pub trait ModelClient: Send + Sync {
    fn send(&self, request: ModelRequest) -> ModelStream;
}

/// Outcome of asking the user (or an unattended policy) about a denied
/// operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Deny,
    /// Approve and install a grant so the session is not asked again for
    /// the same target.
    ApproveAndRemember,
}

/// The kind of capability an approval request is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    Read,
    Write,
    Shell,
}

/// Collaborator that resolves permission escalations. The call is blocking;
/// the authorizer makes at most one per decision.
pub trait Approver: Send + Sync {
    fn ask(&self, kind: ApprovalKind, tool: &str, target: &str, reason: &str) -> ReviewDecision;
}
