//! The agent runtime boundary.
//!
//! The coordinator drives a [`Conversation`] with `RuntimeEvent`s but does
//! not care how they are produced. [`AgentRuntime`] is that seam: one
//! submitted interaction per call, events delivered over a channel so the
//! coordinator keeps servicing the socket while inference streams.
//!
//! [`Conversation`]: cadence_core::conversation::Conversation

use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionMessageToolCallChunk,
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionToolType, CreateChatCompletionRequestArgs, FunctionCall,
    },
};
use async_trait::async_trait;
use cadence_core::conversation::RuntimeEvent;
use cadence_core::event::{AgentInfo, Role};
use cadence_core::tool::{GeminiFunctionCall, Vendor, VendorToolCall};
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One finalized transcript entry, replayed on the next submission.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

/// Accumulator for one tool call streamed as chunk fragments. The model
/// splits `arguments` across many chunks, all sharing an index.
#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl PendingToolCall {
    fn absorb(&mut self, chunk: &ChatCompletionMessageToolCallChunk) {
        if let Some(id) = &chunk.id {
            self.id.push_str(id);
        }
        if let Some(function) = &chunk.function {
            if let Some(name) = &function.name {
                self.name.push_str(name);
            }
            if let Some(arguments) = &function.arguments {
                self.arguments.push_str(arguments);
            }
        }
    }
}

/// Finalizes accumulated chunks into vendor-native terminal tool calls,
/// in stream index order.
fn assemble_tool_calls(
    vendor: Vendor,
    pending: BTreeMap<u32, PendingToolCall>,
) -> Vec<VendorToolCall> {
    pending
        .into_values()
        .map(|call| match vendor {
            Vendor::OpenAi => VendorToolCall::OpenAi(ChatCompletionMessageToolCall {
                id: call.id,
                r#type: ChatCompletionToolType::Function,
                function: FunctionCall {
                    name: call.name,
                    arguments: call.arguments,
                },
            }),
            Vendor::Gemini => {
                // The compatible endpoint streams arguments as a JSON string;
                // Gemini's native shape carries the parsed object.
                let args = serde_json::from_str(&call.arguments)
                    .unwrap_or(Value::String(call.arguments));
                VendorToolCall::Gemini(GeminiFunctionCall {
                    id: (!call.id.is_empty()).then_some(call.id),
                    name: call.name,
                    args,
                })
            }
        })
        .collect()
}

/// Produces one interaction's worth of [`RuntimeEvent`]s per submission.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// The agents selectable on a connection, advertised during init.
    fn agents(&self) -> Vec<AgentInfo>;

    /// Runs one interaction for `agent_key` against the accumulated history,
    /// streaming events into `events`. Must bracket its output with
    /// `InteractionStarted` / `InteractionEnded` and report failures as
    /// `Failed` rather than silently going quiet.
    async fn submit(
        &self,
        agent_key: &str,
        history: &[HistoryEntry],
        events: mpsc::Sender<RuntimeEvent>,
    ) -> Result<()>;
}

/// An [`AgentRuntime`] over any OpenAI-compatible chat completion endpoint.
///
/// Tool payloads are tagged with the configured vendor and passed through in
/// the endpoint's native shape; nothing here rewrites them.
pub struct ChatRuntime {
    client: Client<OpenAIConfig>,
    model: String,
    vendor: Vendor,
    agents: Vec<AgentInfo>,
}

impl ChatRuntime {
    pub fn new(config: OpenAIConfig, model: String, vendor: Vendor, agents: Vec<AgentInfo>) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            vendor,
            agents,
        }
    }

    fn build_messages(
        &self,
        agent_key: &str,
        history: &[HistoryEntry],
    ) -> Result<Vec<ChatCompletionRequestMessage>> {
        let system = self
            .agents
            .iter()
            .find(|a| a.key == agent_key)
            .and_then(|a| a.description.clone())
            .unwrap_or_else(|| "You are a helpful assistant.".to_string());

        let mut messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()?
                .into(),
        ];
        for entry in history {
            match entry.role {
                Role::User => messages.push(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(entry.content.clone())
                        .build()?
                        .into(),
                ),
                Role::Assistant => messages.push(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(entry.content.clone())
                        .build()?
                        .into(),
                ),
                // Reasoning content is never replayed to the model.
                Role::Thought => {}
            }
        }
        Ok(messages)
    }
}

#[async_trait]
impl AgentRuntime for ChatRuntime {
    fn agents(&self) -> Vec<AgentInfo> {
        self.agents.clone()
    }

    async fn submit(
        &self,
        agent_key: &str,
        history: &[HistoryEntry],
        events: mpsc::Sender<RuntimeEvent>,
    ) -> Result<()> {
        let messages = self.build_messages(agent_key, history)?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .stream(true)
            .build()
            .context("Failed to build chat completion request")?;

        events.send(RuntimeEvent::InteractionStarted).await.ok();

        match self.client.chat().create_stream(request).await {
            Ok(mut stream) => {
                let mut stop_reason: Option<String> = None;
                let mut pending: BTreeMap<u32, PendingToolCall> = BTreeMap::new();
                while let Some(result) = stream.next().await {
                    match result {
                        Ok(response) => {
                            let Some(choice) = response.choices.first() else {
                                continue;
                            };
                            if let Some(content) = &choice.delta.content {
                                if !content.is_empty()
                                    && events
                                        .send(RuntimeEvent::TextDelta(content.clone()))
                                        .await
                                        .is_err()
                                {
                                    // Receiver gone; the connection closed.
                                    debug!("Event channel closed mid-stream, abandoning");
                                    return Ok(());
                                }
                            }
                            if let Some(chunks) = &choice.delta.tool_calls {
                                for chunk in chunks {
                                    let partial = serde_json::to_value(chunk)
                                        .context("Failed to serialize tool call chunk")?;
                                    events
                                        .send(RuntimeEvent::ToolSelectDelta {
                                            vendor: self.vendor,
                                            partial,
                                        })
                                        .await
                                        .ok();
                                    pending.entry(chunk.index as u32).or_default().absorb(chunk);
                                }
                            }
                            if let Some(reason) = &choice.finish_reason {
                                stop_reason = Some(format!("{:?}", reason).to_lowercase());
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Chat completion stream failed");
                            events.send(RuntimeEvent::Failed(e.to_string())).await.ok();
                            break;
                        }
                    }
                }
                // The partials end in the assembled terminal call; tool
                // execution itself stays external, so no result follows here.
                for call in assemble_tool_calls(self.vendor, pending) {
                    events.send(RuntimeEvent::ToolCall(call)).await.ok();
                }
                events
                    .send(RuntimeEvent::Completed { stop_reason })
                    .await
                    .ok();
            }
            Err(e) => {
                warn!(error = %e, "Failed to open chat completion stream");
                events.send(RuntimeEvent::Failed(e.to_string())).await.ok();
            }
        }

        events.send(RuntimeEvent::InteractionEnded).await.ok();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::types::FunctionCallStream;
    use serde_json::json;

    fn chunk(
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> ChatCompletionMessageToolCallChunk {
        ChatCompletionMessageToolCallChunk {
            index: index as _,
            id: id.map(str::to_string),
            r#type: id.map(|_| ChatCompletionToolType::Function),
            function: Some(FunctionCallStream {
                name: name.map(str::to_string),
                arguments: arguments.map(str::to_string),
            }),
        }
    }

    fn absorb_all(chunks: &[ChatCompletionMessageToolCallChunk]) -> BTreeMap<u32, PendingToolCall> {
        let mut pending: BTreeMap<u32, PendingToolCall> = BTreeMap::new();
        for c in chunks {
            pending.entry(c.index as u32).or_default().absorb(c);
        }
        pending
    }

    #[test]
    fn split_argument_fragments_assemble_into_one_terminal_call() {
        let pending = absorb_all(&[
            chunk(0, Some("call_1"), Some("lookup_weather"), Some("")),
            chunk(0, None, None, Some("{\"city\":")),
            chunk(0, None, None, Some("\"Reykjavik\"}")),
        ]);

        let calls = assemble_tool_calls(Vendor::OpenAi, pending);
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            VendorToolCall::OpenAi(call) => {
                assert_eq!(call.id, "call_1");
                assert_eq!(call.function.name, "lookup_weather");
                assert_eq!(call.function.arguments, "{\"city\":\"Reykjavik\"}");
            }
            other => panic!("expected an openai call, got {:?}", other.vendor()),
        }
    }

    #[test]
    fn parallel_calls_assemble_in_index_order() {
        let pending = absorb_all(&[
            chunk(1, Some("call_b"), Some("second"), Some("{}")),
            chunk(0, Some("call_a"), Some("first"), Some("{}")),
        ]);

        let calls = assemble_tool_calls(Vendor::OpenAi, pending);
        let names: Vec<&str> = calls.iter().map(|c| c.tool_name()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn gemini_assembly_parses_the_argument_object() {
        let pending = absorb_all(&[chunk(
            0,
            Some("fc_1"),
            Some("lookup_weather"),
            Some("{\"city\":\"Reykjavik\"}"),
        )]);

        let calls = assemble_tool_calls(Vendor::Gemini, pending);
        match &calls[0] {
            VendorToolCall::Gemini(call) => {
                assert_eq!(call.id.as_deref(), Some("fc_1"));
                assert_eq!(call.args, json!({ "city": "Reykjavik" }));
            }
            other => panic!("expected a gemini call, got {:?}", other.vendor()),
        }
    }

    #[test]
    fn thought_history_is_not_replayed() {
        let runtime = ChatRuntime::new(
            OpenAIConfig::new().with_api_key("test-key"),
            "gpt-4o".to_string(),
            Vendor::OpenAi,
            vec![AgentInfo {
                key: "prime".to_string(),
                name: "Prime".to_string(),
                description: Some("Be helpful.".to_string()),
            }],
        );
        let history = vec![
            HistoryEntry {
                role: Role::User,
                content: "hi".to_string(),
            },
            HistoryEntry {
                role: Role::Thought,
                content: "private reasoning".to_string(),
            },
            HistoryEntry {
                role: Role::Assistant,
                content: "hello".to_string(),
            },
        ];

        let messages = runtime.build_messages("prime", &history).unwrap();
        // System prompt plus the user and assistant entries only.
        assert_eq!(messages.len(), 3);
    }
}
