use std::sync::Arc;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use backend::api;
use backend::app_state::AppState;
use backend::catalog::load_catalog;
use backend::config::Config;
use backend::observability::{OpenSearchTraceSource, TraceSource};
use backend::storage::{MemoryStorage, OpenSearchStorage, Storage};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn load_env_file() {
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            tracing::warn!(error = %e, "Could not determine current directory for .env lookup");
            return;
        }
    };

    let mut current = cwd.clone();
    loop {
        let candidate = current.join(".env");
        if candidate.exists() {
            match dotenvy::from_path(&candidate) {
                Ok(_) => {
                    tracing::info!(path = %candidate.display(), "Loaded environment from .env");
                }
                Err(e) => {
                    tracing::warn!(
                        path = %candidate.display(),
                        error = %e,
                        "Failed to load .env file"
                    );
                }
            }
            return;
        }

        if !current.pop() {
            break;
        }
    }

    tracing::info!(
        cwd = %cwd.display(),
        "No .env file found in current directory or ancestors; using process environment only"
    );
}

fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let allowed_origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).with_context(|| format!("Invalid CORS origin '{origin}'"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        .max_age(std::time::Duration::from_secs(3600)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "backend=debug,agent_health=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    load_env_file();
    let config = Config::from_env().context("Invalid configuration")?;
    let catalog = load_catalog(config.catalog_path.as_deref());
    tracing::info!(
        agents = catalog.agents.len(),
        models = catalog.models.len(),
        "Agent catalog ready"
    );

    let storage: Arc<dyn Storage> = match &config.storage {
        Some(storage_config) => {
            tracing::info!(
                endpoint = %storage_config.cluster.endpoint,
                index_prefix = %storage_config.index_prefix,
                "Using OpenSearch storage"
            );
            Arc::new(OpenSearchStorage::new(storage_config.clone())?)
        }
        None => {
            tracing::warn!("OPENSEARCH_STORAGE_ENDPOINT not set; results are kept in memory");
            Arc::new(MemoryStorage::new())
        }
    };

    let trace_source: Option<Arc<dyn TraceSource>> = match &config.observability {
        Some(observability) => {
            tracing::info!(
                endpoint = %observability.cluster.endpoint,
                index = %observability.traces_index,
                "Trace polling enabled"
            );
            Some(Arc::new(OpenSearchTraceSource::new(observability.clone())?))
        }
        None => {
            tracing::warn!("OPENSEARCH_LOGS_ENDPOINT not set; trace metrics are disabled");
            None
        }
    };

    let cors = cors_layer(&config.cors_origins)?;
    let bind_addr = config.bind_addr();
    let app_state = AppState::new(config, catalog, storage, trace_source)?;

    let app = api::router()
        .with_state(api::ApiState { app_state })
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    tracing::info!("Agent Health backend listening on http://{bind_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
