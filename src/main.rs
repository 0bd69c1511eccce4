use std::sync::Arc;

use tower_http::{cors::CorsLayer, trace::TraceLayer};

use restbase::config::config;
use restbase::pipeline::{self, AppState};
use restbase::resource::ResourceRegistry;
use restbase::schema::SchemaRegistry;
use restbase::store::{MemoryKv, PgBackend, PgMasterStore};
use restbase::tenant::{ConnectionDescriptor, TenantRouter, MASTER};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "restbase=info,tower_http=info".into()),
        )
        .init();

    let config = config();

    let backend = Arc::new(PgBackend::new(10));
    let kv: Arc<dyn restbase::store::KvStore> = Arc::new(MemoryKv::new());
    let master = Arc::new(PgMasterStore::for_backend(
        &backend,
        ConnectionDescriptor::fixed(MASTER),
    ));
    let router = Arc::new(TenantRouter::new(master, kv.clone()));

    // Schemas and resources are declared by the deployment; the core ships
    // with none registered.
    let schemas = Arc::new(SchemaRegistry::new());
    let resources = Arc::new(ResourceRegistry::default());

    let state = AppState {
        resources,
        schemas,
        router,
        backend,
        kv,
    };

    let app = pipeline::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
