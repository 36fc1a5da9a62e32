use std::sync::Arc;

use anyhow::Context;
use secrecy::SecretString;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use hook_relay::channels::{
    CursorPoller, FileCursorStore, GmailHistoryClient, PushIngest, spawn_gmail_poller,
};
use hook_relay::config::{RelayConfig, RulesFile};
use hook_relay::gateway::GatewayClient;
use hook_relay::pipeline::dedup::{DEFAULT_DEDUP_TTL, spawn_sweeper};
use hook_relay::pipeline::{Deduplicator, Dispatcher, Pipeline};
use hook_relay::webhook::{AppState, relay_routes};

/// Console logging, plus a daily-rolling file when `log_dir` is set.
fn init_tracing(config: &RelayConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_target(false);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "hook-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(file)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(console).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env().context("invalid configuration")?;
    let _log_guard = init_tracing(&config);

    let rules = RulesFile::load(&config.rules_path)
        .with_context(|| format!("failed to load rules from {}", config.rules_path.display()))?;

    eprintln!("📮 Hook Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Listening: http://0.0.0.0:{}", config.port);
    eprintln!("   Rules: {}", config.rules_path.display());
    eprintln!("   State: {}", config.state_dir.display());
    if config.gateway.is_configured() {
        eprintln!("   Gateway: {} (agent {})", config.gateway.url, config.gateway.agent_id);
    } else {
        eprintln!("   Gateway: not configured, actions will be skipped");
    }

    // ── Pipeline ────────────────────────────────────────────────────
    let dedup = Arc::new(Deduplicator::new(DEFAULT_DEDUP_TTL));
    let _sweeper = spawn_sweeper(Arc::clone(&dedup));

    let gateway = Arc::new(GatewayClient::new(config.gateway.clone()));
    let pipeline = Pipeline::new(dedup, Dispatcher::new(gateway));

    // ── Gmail pollers ───────────────────────────────────────────────
    let store = Arc::new(FileCursorStore::new(&config.state_dir));
    let mut pollers = Vec::new();
    for account in &rules.gmail.accounts {
        let token_var = account.token_var();
        let Some(token) = std::env::var(&token_var).ok().filter(|t| !t.is_empty()) else {
            tracing::warn!(
                account = %account.email,
                var = %token_var,
                "No Gmail access token, poller disabled"
            );
            continue;
        };

        let source = Arc::new(GmailHistoryClient::new(
            account.email.clone(),
            SecretString::from(token),
        ));
        let poller = CursorPoller::new(
            account.email.clone(),
            source,
            store.clone(),
            pipeline.clone(),
            account.rules.clone(),
        );
        let interval = rules.gmail.interval_for(account, config.poll_interval);
        pollers.push(spawn_gmail_poller(poller, interval));
    }
    eprintln!("   Gmail accounts: {}", pollers.len());

    // ── Webhook server ──────────────────────────────────────────────
    let ingest = PushIngest::new(
        pipeline,
        rules.trello.clone(),
        rules.github.rules.clone(),
        config.github_notify_mode,
    );
    let app = relay_routes(AppState::new(ingest, &config));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "Relay server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown requested");
        })
        .await
        .context("server error")?;

    // Let in-flight poll ticks finish.
    let (handles, signals): (Vec<_>, Vec<_>) = pollers.into_iter().unzip();
    for signal in &signals {
        signal.trigger();
    }
    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Gmail poller task failed");
        }
    }

    Ok(())
}
