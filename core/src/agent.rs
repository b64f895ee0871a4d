use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use quill_protocol::AssistantTurn;
use quill_protocol::ModelClient;
use quill_protocol::ModelEvent;
use quill_protocol::ModelRequest;
use quill_protocol::ToolCall;
use quill_protocol::ToolResult;
use quill_protocol::TurnRecord;

use crate::error::QuillErr;
use crate::tools::ToolRegistry;

/// Events produced while processing one user message. The sequence ends
/// with exactly one of `DoneSuccess`, `Error`, or `Canceled`.
#[derive(Debug)]
pub enum AgentEvent {
    AssistantDelta(String),
    AssistantTurnComplete(AssistantTurn),
    ToolCallRequested(ToolCall),
    ToolCallResult(ToolResult),
    DoneSuccess(AssistantTurn),
    Error(QuillErr),
    Canceled,
}

/// The conversation engine: streams assistant output, dispatches tool calls
/// sequentially in emission order, and loops until the model completes a
/// turn without requesting further calls.
pub struct Agent {
    system_prompt: String,
    tools: ToolRegistry,
    history: Vec<TurnRecord>,
    client: Arc<dyn ModelClient>,
}

impl Agent {
    pub fn new(system_prompt: String, client: Arc<dyn ModelClient>, tools: ToolRegistry) -> Self {
        Self {
            system_prompt,
            tools,
            history: Vec::new(),
            client,
        }
    }

    pub fn history(&self) -> &[TurnRecord] {
        &self.history
    }

    /// Appends the user message and drives the conversation loop as a lazy
    /// event stream. Tool handlers run on the loop itself, one at a time,
    /// each with a child token of `cancel`.
    ///
    /// On cancellation the engine cancels the current model-stream read and
    /// the running handler, emits `Canceled`, and stops; the user message
    /// stays in the history while any turn without its results is
    /// discarded.
    pub fn send_user_message(
        &mut self,
        cancel: CancellationToken,
        text: String,
    ) -> impl Stream<Item = AgentEvent> + '_ {
        stream! {
            self.history.push(TurnRecord::User { text });
            let descriptors = match self.tools.descriptors() {
                Ok(descriptors) => descriptors,
                Err(err) => {
                    yield AgentEvent::Error(err);
                    return;
                }
            };

            loop {
                if cancel.is_cancelled() {
                    yield AgentEvent::Canceled;
                    return;
                }

                let request = ModelRequest {
                    system_prompt: self.system_prompt.clone(),
                    history: self.history.clone(),
                    tools: descriptors.clone(),
                };
                let mut model_stream = self.client.send(request);
                let mut turn = AssistantTurn::default();

                // Drain one assistant turn. Selections resolve to a value
                // first so every yield happens at the top level of the
                // generator.
                loop {
                    let step = tokio::select! {
                        _ = cancel.cancelled() => None,
                        event = model_stream.next() => Some(event),
                    };
                    let Some(event) = step else {
                        yield AgentEvent::Canceled;
                        return;
                    };
                    match event {
                        Some(Ok(ModelEvent::TextDelta(delta))) => {
                            turn.text.push_str(&delta);
                            yield AgentEvent::AssistantDelta(delta);
                        }
                        Some(Ok(ModelEvent::ToolCall(call))) => {
                            debug!("tool call requested: {} ({})", call.name, call.id);
                            turn.tool_calls.push(call.clone());
                            yield AgentEvent::ToolCallRequested(call);
                        }
                        Some(Ok(ModelEvent::TurnEnd)) => break,
                        Some(Err(err)) => {
                            yield AgentEvent::Error(QuillErr::Stream(err.to_string()));
                            return;
                        }
                        None => {
                            yield AgentEvent::Error(QuillErr::Stream(
                                "stream disconnected before end of turn".to_string(),
                            ));
                            return;
                        }
                    }
                }

                yield AgentEvent::AssistantTurnComplete(turn.clone());

                if turn.tool_calls.is_empty() {
                    self.history.push(TurnRecord::Assistant(turn.clone()));
                    yield AgentEvent::DoneSuccess(turn);
                    return;
                }

                // Execute the requested calls sequentially. The turn and its
                // results enter the history together so a cancellation can
                // never leave an assistant turn without the results that
                // must follow it.
                let mut results = Vec::new();
                for call in &turn.tool_calls {
                    let result = match self.tools.lookup(&call.name) {
                        Some(tool) => {
                            let child = cancel.child_token();
                            let fut = tool.run(child.clone(), call.clone());
                            tokio::pin!(fut);
                            loop {
                                tokio::select! {
                                    result = &mut fut => break result,
                                    _ = cancel.cancelled(), if !child.is_cancelled() => {
                                        // Tell the handler to wind down, then
                                        // keep waiting for it to return.
                                        child.cancel();
                                    }
                                }
                            }
                        }
                        None => {
                            warn!("model requested unknown tool: {}", call.name);
                            ToolResult::error(call, format!("unknown tool: {}", call.name))
                        }
                    };
                    if cancel.is_cancelled() {
                        yield AgentEvent::Canceled;
                        return;
                    }
                    yield AgentEvent::ToolCallResult(result.clone());
                    results.push(result);
                }

                self.history.push(TurnRecord::Assistant(turn));
                self.history.push(TurnRecord::ToolResults { results });
            }
        }
    }
}
