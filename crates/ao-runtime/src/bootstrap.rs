//! Config loading, tracing/OTel init, and `AppState` construction.
//!
//! This is the shared boot path for every CLI command (`serve`, `run`):
//! validate config, initialize providers/tools/sessions, hand back a
//! fully-wired [`AppState`].

use std::sync::Arc;

use ao_domain::config::{Config, ConfigSeverity};
use ao_providers::{LlmProvider, MockProvider, ProviderRegistry};
use ao_session::SessionRegistry;
use ao_tools::{ProcessManager, ToolRegistry};
use anyhow::Context;
use tracing_subscriber::EnvFilter;

use crate::interrupt::InterruptRegistry;
use crate::memory_extractor::{MemoryExtractor, NullMemorySink};
use crate::state::AppState;

/// Load `config.toml` (or `ao-runtime`'s compiled-in defaults if absent),
/// returning the parsed [`Config`].
pub fn load_config(path: &str) -> anyhow::Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(raw) => toml::from_str(&raw).with_context(|| format!("parsing {path}")),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path, "config file not found, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(e).with_context(|| format!("reading {path}")),
    }
}

/// Initialize structured JSON tracing. `observability.otlp_endpoint` is
/// validated but not wired to an exporter here — forwarding `tracing`
/// spans to a collector is left to whatever subscriber layer a deployer
/// adds around this one, per the crate's observability-sink boundary.
pub fn init_tracing(config: &Config) {
    if let Some(endpoint) = &config.observability.otlp_endpoint {
        tracing::debug!(endpoint, "otlp_endpoint configured; wire a subscriber layer to use it");
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ao_runtime=debug")))
        .json()
        .init();
}

/// Validate config, construct every subsystem, return a wired [`AppState`].
pub async fn build_app_state(config: Config) -> anyhow::Result<AppState> {
    let config = Arc::new(config);

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
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    let llm = Arc::new(ProviderRegistry::from_config(&config.llm).context("initializing LLM providers")?);
    if llm.is_empty() {
        tracing::info!("no LLM providers initialized — configure providers in config.llm to enable phases");
    } else {
        tracing::info!(providers = llm.len(), roles = llm.list_roles().len(), "LLM provider registry ready");
    }

    let mut tool_registry = ToolRegistry::new();
    let process_manager = Arc::new(ProcessManager::new(config.tools.exec.clone()));
    ao_tools::register_builtin_tools(&mut tool_registry, process_manager, config.workspace.path.clone())
        .context("registering built-in tools")?;
    let tools = Arc::new(tool_registry);
    tracing::info!(tools = tools.definitions().len(), "tool registry ready");

    let sessions = Arc::new(SessionRegistry::new(config.sessions.idle_minutes, config.sessions.max_resident));
    tracing::info!(
        idle_minutes = ?config.sessions.idle_minutes,
        max_resident = config.sessions.max_resident,
        "session registry ready"
    );

    let interrupts = Arc::new(InterruptRegistry::new());

    // No dedicated "memory" role configured falls back to "default"; with
    // no providers at all, extraction still runs but yields nothing (an
    // unconfigured MockProvider returns empty content for every call).
    let memory_provider: Arc<dyn LlmProvider> = llm
        .for_role("memory")
        .or_else(|| llm.for_role("default"))
        .unwrap_or_else(|| Arc::new(MockProvider::new("memory-unconfigured")));
    let memory_extractor = Arc::new(MemoryExtractor::new(memory_provider, Arc::new(NullMemorySink)));

    Ok(AppState {
        config,
        llm,
        tools,
        sessions,
        interrupts,
        memory_extractor,
    })
}

/// Spawn the background tasks that keep the process healthy: periodic
/// idle-session eviction.
pub fn spawn_background_tasks(state: &AppState) {
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let evicted = sessions.evict_idle(chrono::Utc::now());
            if evicted > 0 {
                tracing::info!(evicted, "evicted idle sessions");
            }
        }
    });
    tracing::info!("background tasks spawned");
}
