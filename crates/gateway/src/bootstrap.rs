//! AppState construction and background-task spawning extracted from `main.rs`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use lx_contextpack::ContextAssembler;
use lx_domain::config::{Config, ConfigSeverity};
use lx_providers::{LlmProvider, OpenAiCompatProvider};
use lx_retrieval::create_retriever;
use lx_store::{ConversationStore, JournalStore};

use crate::auth::Authenticator;
use crate::runtime::{ChatLockMap, TurnOrchestrator, TurnTuning};
use crate::state::AppState;
use crate::ws::{spawn_sweeper, ConnectionRegistry};

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub async fn build_app_state(
    config: Arc<Config>,
    shutdown: CancellationToken,
) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Conversation store ───────────────────────────────────────────
    let journal = JournalStore::open(&config.store)
        .await
        .context("opening conversation store")?;
    let store: Arc<dyn ConversationStore> = Arc::new(journal);
    tracing::info!(state_dir = %config.store.state_dir.display(), "conversation store ready");

    // ── LLM provider ─────────────────────────────────────────────────
    let provider: Arc<dyn LlmProvider> = Arc::new(
        OpenAiCompatProvider::from_config(&config.llm).context("initializing LLM provider")?,
    );
    tracing::info!(
        provider = provider.provider_id(),
        model = provider.default_model(),
        "LLM provider ready"
    );

    // ── Retrieval ────────────────────────────────────────────────────
    let retriever = create_retriever(&config.retrieval).context("creating retrieval client")?;
    if config.retrieval.enabled {
        tracing::info!(
            url = %config.retrieval.base_url,
            top_k = config.retrieval.top_k,
            "retrieval client ready"
        );
    } else {
        tracing::info!("retrieval disabled, answers use history only");
    }

    // ── Turn orchestrator ────────────────────────────────────────────
    let assembler = ContextAssembler::new(
        config.chat.history_window,
        config.retrieval.max_snippet_chars,
        config.retrieval.max_reference_chars,
    );
    let chat_locks = Arc::new(ChatLockMap::new());
    let orchestrator = Arc::new(TurnOrchestrator::new(
        store.clone(),
        provider,
        retriever,
        assembler,
        TurnTuning::from_config(&config),
        chat_locks.clone(),
    ));
    tracing::info!(
        history_window = config.chat.history_window,
        checkpoint_interval_ms = config.chat.checkpoint_interval_ms,
        "turn orchestrator ready"
    );

    // ── Auth ─────────────────────────────────────────────────────────
    let auth = Arc::new(Authenticator::from_config(&config.auth));
    if !auth.is_dev() {
        tracing::info!(env = %config.auth.secret_env, "bearer-token auth enabled");
    }

    let connections = Arc::new(ConnectionRegistry::new(shutdown.clone()));

    Ok(AppState {
        config,
        store,
        orchestrator,
        chat_locks,
        auth,
        connections,
        shutdown,
    })
}

/// Spawn the long-running background tokio tasks (idle websocket sweep,
/// turn-lock pruning). Both stop when `state.shutdown` is cancelled.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Idle websocket sweeper ───────────────────────────────────────
    spawn_sweeper(
        state.connections.clone(),
        Duration::from_secs(state.config.chat.ws_sweep_interval_secs.max(1)),
        Duration::from_secs(state.config.chat.ws_idle_timeout_secs),
        state.shutdown.clone(),
    );

    // ── Periodic turn-lock pruning ───────────────────────────────────
    {
        let chat_locks = state.chat_locks.clone();
        let shutdown = state.shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = interval.tick() => chat_locks.prune_idle(),
                    () = shutdown.cancelled() => break,
                }
            }
        });
    }
}
