//! Main Entrypoint for the Cadence API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the agent runtime for the configured provider.
//! 3. Wiring the speech side-channel consumer.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use cadence_api::{
    config::{Config, Provider},
    router::create_router,
    runtime::{AgentRuntime, ChatRuntime},
    speech::{ChannelSpeechSink, SpeechSignal, SpeechSink},
    state::AppState,
};
use cadence_core::{event::AgentInfo, tool::Vendor};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// The agents advertised on every connection.
///
/// TODO: load these from a manifest file once agent definitions stabilize.
fn builtin_agents() -> Vec<AgentInfo> {
    vec![
        AgentInfo {
            key: "prime".to_string(),
            name: "Prime Agent".to_string(),
            description: Some(
                "You are a capable general-purpose assistant. Answer directly and \
                 delegate specialized work when appropriate."
                    .to_string(),
            ),
        },
        AgentInfo {
            key: "reviewer".to_string(),
            name: "Reviewer".to_string(),
            description: Some(
                "You are a meticulous reviewer. Examine the material you are given \
                 and report concrete, actionable findings."
                    .to_string(),
            ),
        },
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize the Agent Runtime ---
    let runtime: Arc<dyn AgentRuntime> = match &config.provider {
        Provider::OpenAI => {
            info!("Using OpenAI provider.");
            let api_key = config
                .openai_api_key
                .as_ref()
                .context("OPENAI_API_KEY missing after validation")?;
            let openai_config = OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base("https://api.openai.com/v1/");
            Arc::new(ChatRuntime::new(
                openai_config,
                config.chat_model.clone(),
                Vendor::OpenAi,
                builtin_agents(),
            ))
        }
        Provider::Gemini => {
            info!("Using Gemini provider.");
            let api_key = config
                .gemini_api_key
                .as_ref()
                .context("GEMINI_API_KEY missing after validation")?;
            let openai_config = OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base("https://generativelanguage.googleapis.com/v1beta/openai");
            Arc::new(ChatRuntime::new(
                openai_config,
                config.chat_model.clone(),
                Vendor::Gemini,
                builtin_agents(),
            ))
        }
    };

    // --- 4. Wire the Speech Side-Channel ---
    // A real deployment points this at a TTS/avatar pipeline; by default the
    // signals are drained and logged so the channel never fills.
    let (speech_sink, mut speech_rx) = ChannelSpeechSink::new(64);
    let speech: Arc<dyn SpeechSink> = Arc::new(speech_sink);
    tokio::spawn(async move {
        while let Some(signal) = speech_rx.recv().await {
            match signal {
                SpeechSignal::Utterance(text) => {
                    debug!(len = text.len(), "Speech utterance flushed")
                }
                SpeechSignal::ThinkingStarted => debug!("Speech consumer: thinking started"),
            }
        }
    });

    let app_state = Arc::new(AppState {
        runtime,
        speech,
        config: Arc::new(config.clone()),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.chat_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
