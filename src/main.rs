use std::sync::Arc;

use chat_relay::bus::BroadcastBus;
use chat_relay::config::RelayConfig;
use chat_relay::distribution::{DistributionFanout, HttpWebhookTransport, WebhookTransport};
use chat_relay::mutes::{
    MuteCache, MuteCoordinator, NotificationRelayBackend, PartnerRelayBackend, StoreMuteBackend,
};
use chat_relay::names::{HttpNameResolver, NameResolver};
use chat_relay::notify::BusNotifier;
use chat_relay::pipeline::AdmissionPipeline;
use chat_relay::registry::{self, TenantRegistry};
use chat_relay::routes::{ChatRouteState, chat_routes};
use chat_relay::store::{LibSqlStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Arc::new(RelayConfig::from_env());

    eprintln!("💬 chat-relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api/chat", config.listen_port);
    eprintln!("   Database: {}", config.db_path);
    eprintln!("   Name service: {}", config.name_service_url);

    let store: Arc<dyn Store> = Arc::new(
        LibSqlStore::new_local(std::path::Path::new(&config.db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", config.db_path, e);
                std::process::exit(1);
            }),
    );

    let registry = Arc::new(TenantRegistry::new());
    if let Err(e) = registry.refresh_from(store.as_ref()).await {
        eprintln!("   Warning: Initial tenant load failed: {e}");
    }
    if registry.is_ready().await {
        let tenant_count = registry.all().await.len();
        eprintln!("   Tenants: {tenant_count} loaded");
    } else {
        eprintln!("   Tenants: none yet (register via /api/chat/internal/tenant)");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let _refresh_handle = registry::spawn_refresh_task(
        registry.clone(),
        Arc::clone(&store),
        config.refresh_interval,
        shutdown_rx,
    );

    let bus = Arc::new(BroadcastBus::new());
    let cache = Arc::new(MuteCache::new(Arc::clone(&store)));
    let names: Arc<dyn NameResolver> =
        Arc::new(HttpNameResolver::new(config.name_service_url.clone()));
    let transport: Arc<dyn WebhookTransport> =
        Arc::new(HttpWebhookTransport::new(config.webhook_timeout));

    let authority = Arc::new(StoreMuteBackend::new(
        Arc::clone(&store),
        registry.clone(),
        cache.clone(),
        config.clone(),
    ));
    let coordinator = Arc::new(MuteCoordinator::new(
        authority,
        vec![
            Arc::new(PartnerRelayBackend::new(
                registry.clone(),
                Arc::clone(&transport),
                config.partner_marker.clone(),
            )) as Arc<dyn chat_relay::mutes::MuteBackend>,
            Arc::new(NotificationRelayBackend::new(
                Arc::new(BusNotifier::new(bus.clone())),
                Arc::clone(&names),
                config.notify_topic.clone(),
            )),
        ],
    ));

    let fanout = Arc::new(DistributionFanout::new(
        bus,
        registry.clone(),
        transport,
        config.chat_topic.clone(),
        config.partner_marker.clone(),
    ));
    let pipeline = Arc::new(AdmissionPipeline::new(
        Arc::clone(&store),
        registry.clone(),
        cache.clone(),
        names,
        coordinator.clone(),
        fanout,
        config.clone(),
    ));

    let app = chat_routes(ChatRouteState {
        pipeline,
        coordinator,
        cache,
        registry,
        store,
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.listen_port))
        .await
        .expect("Failed to bind API port");
    tracing::info!(port = config.listen_port, "Chat relay started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
            shutdown_tx.send(true).ok();
        })
        .await?;

    Ok(())
}
