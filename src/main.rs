//! CLI entry point: loads configuration and the account pool, wires up
//! the executor, and serves the dialect-translating proxy.
//!
//! Adapted from the desktop app's `commands::proxy::start_proxy_service`
//! (config load -> token manager seed -> Axum server start), minus the
//! Tauri app-state plumbing: this binary has no GUI to report back to.

use antigravity_bridge::account::AccountStore;
use antigravity_bridge::config::ProxyConfig;
use antigravity_bridge::executor::Executor;
use antigravity_bridge::load_balancer::{LoadBalancer, Strategy};
use antigravity_bridge::model_router::ModelRouter;
use antigravity_bridge::observation::TracingSink;
use antigravity_bridge::server::{build_router, serve, AppState};
use antigravity_bridge::signature_cache::SignatureCache;
use antigravity_bridge::upstream::UpstreamClient;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    antigravity_bridge::logging::init_logger();

    let config = match ProxyConfig::load(antigravity_bridge::config::default_data_dir()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let accounts = Arc::new(AccountStore::new(config.data_dir.clone()));
    let strategy = if config.load_balancer_strategy == "fill_first" {
        Strategy::FillFirst
    } else {
        Strategy::RoundRobin
    };
    let load_balancer = Arc::new(LoadBalancer::new(strategy));

    match accounts.load_all_from_disk() {
        Ok(loaded) => {
            let ids: Vec<String> = loaded.iter().map(|a| a.id.clone()).collect();
            tracing::info!("loaded {} account(s) from disk", ids.len());
            load_balancer.set_accounts(ids);
        }
        Err(e) => {
            tracing::warn!("failed to load accounts from disk: {e}");
        }
    }

    let model_router = Arc::new(ModelRouter::from_tables(
        config.anthropic_mapping.clone(),
        config.openai_mapping.clone(),
        config.custom_mapping.clone(),
    ));

    let signature_cache = Arc::new(SignatureCache::new());
    signature_cache.spawn_janitor();

    let upstream = Arc::new(UpstreamClient::new(Some(&config.upstream_proxy)));
    let config = Arc::new(config);

    let executor = Arc::new(Executor::new(
        config.clone(),
        accounts,
        load_balancer,
        model_router,
        signature_cache,
        upstream,
        Arc::new(TracingSink),
    ));

    let host = config.get_bind_address().to_string();
    let port = config.port;
    tracing::info!("antigravity-bridge listening on {host}:{port}, api_key={}", config.api_key);

    let app = build_router(AppState {
        config: config.clone(),
        executor,
    });

    if let Err(e) = serve(app, &host, port).await {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}
