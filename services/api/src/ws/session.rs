//! The connection coordinator: one task per WebSocket connection, sole owner
//! of that connection's protocol state.
//!
//! All mutation of the [`Conversation`] happens on this task. Client frames
//! and runtime events are interleaved through one `select!` loop, so a
//! context push can never race a pop and the turn gate is checked on the
//! same task that dispatches input.

use super::protocol::{self, ClientMessage};
use crate::runtime::HistoryEntry;
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use cadence_core::conversation::{Conversation, ConversationConfig, Output, RuntimeEvent};
use cadence_core::error::ProtocolError;
use cadence_core::event::Event;
use cadence_core::turn::TurnState;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, info, instrument, warn};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Entry point for a new connection: performs the init handshake, then runs
/// the coordinator loop until the client disconnects.
#[instrument(name = "ws_connection", skip_all, fields(user_session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("New WebSocket connection. Awaiting init...");
    let (mut socket_tx, mut socket_rx) = socket.split();

    let agents = state.runtime.agents();
    if agents.is_empty() {
        error!("No agents configured; refusing connection.");
        return;
    }

    // The first frame must be `init`; anything else is a handshake failure.
    let agent_key = match await_init(&mut socket_rx, &agents).await {
        Ok(Some(key)) => key,
        Ok(None) => {
            info!("Client disconnected before init.");
            return;
        }
        Err(e) => {
            let _ = send_event(&mut socket_tx, &Event::error(&e)).await;
            warn!(error = %e, "Handshake failed, closing connection.");
            return;
        }
    };

    let mut conversation = Conversation::new(
        &agent_key,
        ConversationConfig {
            max_subsession_depth: state.config.max_subsession_depth,
        },
    );
    tracing::Span::current().record(
        "user_session_id",
        conversation.user_session_id().to_string(),
    );
    info!(%agent_key, "Connection initialized");

    // Advertise the agents and hand the client the first turn.
    if send_event(&mut socket_tx, &Event::AgentList { agents: agents.clone() })
        .await
        .is_err()
        || send_event(&mut socket_tx, &Event::TurnStart).await.is_err()
    {
        error!("Failed to complete handshake writes.");
        return;
    }

    if let Err(e) = run_connection(state, socket_tx, socket_rx, &mut conversation, agent_key).await {
        error!(error = ?e, "Connection loop terminated with error.");
    }

    // A disconnect mid-subsession is a protocol violation by the producer;
    // report it rather than silently dropping the open contexts.
    if let Err(e) = conversation.close() {
        error!(error = %e, "Connection closed with unbalanced subsessions.");
    }
    info!("Connection finished.");
}

/// Reads frames until the init message arrives, resolving the agent key.
/// `Ok(None)` means the client went away first.
async fn await_init(
    socket_rx: &mut SplitStream<WebSocket>,
    agents: &[cadence_core::event::AgentInfo],
) -> Result<Option<String>, ProtocolError> {
    loop {
        let Some(Ok(ws_msg)) = socket_rx.next().await else {
            return Ok(None);
        };
        let text = match ws_msg {
            Message::Text(text) => text,
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => return Ok(None),
            Message::Binary(_) => {
                return Err(ProtocolError::MalformedPayload(
                    "binary frame before init".to_string(),
                ));
            }
        };
        return match protocol::decode(&text)? {
            ClientMessage::Init { agent_key } => {
                let key = agent_key.unwrap_or_else(|| agents[0].key.clone());
                if !agents.iter().any(|a| a.key == key) {
                    return Err(ProtocolError::MalformedPayload(format!(
                        "unknown agent key '{}'",
                        key
                    )));
                }
                Ok(Some(key))
            }
            other => Err(ProtocolError::Violation(format!(
                "first message must be `init`, got `{}`",
                other.kind()
            ))),
        };
    }
}

/// The coordinator loop for an initialized connection.
async fn run_connection(
    state: Arc<AppState>,
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut socket_rx: SplitStream<WebSocket>,
    conversation: &mut Conversation,
    mut agent_key: String,
) -> Result<()> {
    let root_id = conversation.user_session_id();
    let mut history: Vec<HistoryEntry> = Vec::new();
    let mut runtime_rx: Option<mpsc::Receiver<RuntimeEvent>> = None;
    let mut runtime_task: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            // Frames from the external client.
            msg_result = socket_rx.next() => {
                let Some(msg_result) = msg_result else { break };
                match msg_result {
                    Ok(Message::Text(text)) => {
                        match protocol::decode(&text) {
                            Ok(ClientMessage::Input { text, attachments }) => {
                                if !attachments.is_empty() {
                                    warn!(count = attachments.len(), "Ignoring unsupported attachments");
                                }
                                match conversation.accept_input(&text) {
                                    Ok(outputs) => {
                                        dispatch(&state, &mut socket_tx, root_id, &mut history, outputs).await?;
                                        let (tx, rx) = mpsc::channel(64);
                                        runtime_rx = Some(rx);
                                        let runtime = state.runtime.clone();
                                        let key = agent_key.clone();
                                        let snapshot = history.clone();
                                        runtime_task = Some(tokio::spawn(async move {
                                            if let Err(e) = runtime.submit(&key, &snapshot, tx.clone()).await {
                                                error!(error = ?e, "Runtime submission failed");
                                                let _ = tx.send(RuntimeEvent::Failed(e.to_string())).await;
                                                let _ = tx.send(RuntimeEvent::InteractionEnded).await;
                                            }
                                        }));
                                    }
                                    // Out-of-turn input is rejected and dropped, never queued.
                                    Err(e) => send_event(&mut socket_tx, &Event::error(&e)).await?,
                                }
                            }
                            Ok(ClientMessage::SelectAgent { agent_key: key }) => {
                                if conversation.turn_state() != TurnState::AwaitingUserInput {
                                    send_event(&mut socket_tx, &Event::error(&ProtocolError::OutOfTurn)).await?;
                                } else if !state.runtime.agents().iter().any(|a| a.key == key) {
                                    let e = ProtocolError::MalformedPayload(format!("unknown agent key '{}'", key));
                                    send_event(&mut socket_tx, &Event::error(&e)).await?;
                                } else {
                                    info!(from = %agent_key, to = %key, "Agent switched");
                                    agent_key = key;
                                }
                            }
                            Ok(ClientMessage::ListAgents) => {
                                send_event(&mut socket_tx, &Event::AgentList { agents: state.runtime.agents() }).await?;
                            }
                            Ok(ClientMessage::Init { .. }) => {
                                let e = ProtocolError::Violation("duplicate init".to_string());
                                send_event(&mut socket_tx, &Event::error(&e)).await?;
                                break;
                            }
                            // Unknown kinds and bad bodies are reported and skipped.
                            Err(e) => send_event(&mut socket_tx, &Event::error(&e)).await?,
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!("Client sent close frame.");
                        break;
                    }
                    Ok(Message::Binary(_)) => warn!("Ignoring unexpected binary frame."),
                    Ok(Message::Ping(_) | Message::Pong(_)) => {}
                    Err(e) => {
                        error!(error = ?e, "Error receiving from client WebSocket");
                        break;
                    }
                }
            },

            // Events from the in-flight interaction.
            event = async {
                match runtime_rx.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => None,
                }
            }, if runtime_rx.is_some() => {
                match event {
                    Some(event) => {
                        match conversation.apply(event) {
                            Ok(outputs) => dispatch(&state, &mut socket_tx, root_id, &mut history, outputs).await?,
                            Err(e) if e.is_fatal() => {
                                error!(error = %e, "Fatal protocol violation from runtime");
                                send_event(&mut socket_tx, &Event::error(&e)).await?;
                                break;
                            }
                            Err(e) => {
                                warn!(error = %e, "Recoverable runtime event error");
                                send_event(&mut socket_tx, &Event::error(&e)).await?;
                            }
                        }
                    }
                    None => {
                        // The producer is done and every buffer has flushed;
                        // only now does the turn return to the client.
                        runtime_rx = None;
                        runtime_task = None;
                        match conversation.resume_turn() {
                            Ok(event) => send_event(&mut socket_tx, &event).await?,
                            Err(e) => {
                                // The runtime died without a terminal event.
                                warn!(error = %e, "Runtime ended without interaction_end, forcing turn resume");
                                send_event(&mut socket_tx, &Event::error(&e)).await?;
                                let event = conversation.force_resume_turn();
                                send_event(&mut socket_tx, &event).await?;
                            }
                        }
                    }
                }
            },

            else => break,
        }
    }

    if let Some(handle) = runtime_task.take() {
        handle.abort();
    }
    info!("WebSocket connection closed.");
    Ok(())
}

/// Routes one batch of conversation outputs: wire events to the socket,
/// flushes and the engagement hook to the speech sink. Root-stamped history
/// entries are also folded into the replay history for the next submission.
async fn dispatch(
    state: &Arc<AppState>,
    socket_tx: &mut SplitSink<WebSocket, Message>,
    root_id: uuid::Uuid,
    history: &mut Vec<HistoryEntry>,
    outputs: Vec<Output>,
) -> Result<()> {
    for output in outputs {
        match output {
            Output::Wire(event) => {
                if let Event::HistoryDelta { stamp, content } = &event {
                    if stamp.session_id == root_id {
                        history.push(HistoryEntry {
                            role: stamp.role,
                            content: content.clone(),
                        });
                    }
                }
                send_event(socket_tx, &event).await?;
            }
            Output::Flush(text) => state.speech.on_flush(&text),
            Output::ThinkingStarted => state.speech.on_thinking_started(),
        }
    }
    Ok(())
}

/// Serializes and writes one event to the client socket.
async fn send_event(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    event: &Event,
) -> Result<()> {
    let serialized = serde_json::to_string(event)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
