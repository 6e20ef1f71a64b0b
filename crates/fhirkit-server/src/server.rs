use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use fhirkit_bundle::{BundleHandler, RequestDispatcher};
use fhirkit_db_memory::InMemoryStorage;
use fhirkit_search::{SearchBundleFactory, SearchResourceHandler, StorageSearchService};
use fhirkit_storage::DynStorage;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::executor::StorageDispatcher;
use crate::routing::RouteTable;
use crate::{config::AppConfig, handlers, middleware as app_middleware};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub storage: DynStorage,
    pub search: Arc<SearchResourceHandler>,
    pub bundles: Arc<BundleHandler>,
}

impl AppState {
    pub fn new(cfg: &AppConfig, storage: DynStorage) -> Self {
        let search = search_handler(cfg, storage.clone());
        let dispatcher = Arc::new(StorageDispatcher::new(
            storage.clone(),
            search.clone(),
            cfg.auth.policy.build(),
        ));
        Self::with_dispatcher(cfg, storage, search, dispatcher)
    }

    /// Like [`AppState::new`] with a caller-supplied entry dispatcher.
    pub fn with_dispatcher(
        cfg: &AppConfig,
        storage: DynStorage,
        search: Arc<SearchResourceHandler>,
        dispatcher: Arc<dyn RequestDispatcher>,
    ) -> Self {
        let bundles = Arc::new(BundleHandler::new(
            Arc::new(RouteTable::from_config(&cfg.routing)),
            dispatcher,
            storage.clone(),
            cfg.bundle.to_bundle_config(),
        ));
        Self {
            config: Arc::new(cfg.clone()),
            storage,
            search,
            bundles,
        }
    }
}

/// Search handler over `storage` with searchset links rooted at the FHIR base url.
pub fn search_handler(cfg: &AppConfig, storage: DynStorage) -> Arc<SearchResourceHandler> {
    let service = Arc::new(StorageSearchService::new(
        storage,
        cfg.search.to_search_config(),
    ));
    let factory = Arc::new(SearchBundleFactory::new(cfg.fhir_base_url()));
    Arc::new(SearchResourceHandler::new(service, factory))
}

pub struct FhirkitServer {
    addr: SocketAddr,
    app: Router,
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;
    Router::new()
        // Health and info endpoints
        .route("/healthz", get(handlers::healthz))
        .route("/metadata", get(handlers::metadata))
        // FHIR REST surface
        .route("/fhir", post(handlers::process_bundle))
        .route("/fhir/metadata", get(handlers::metadata))
        .route("/fhir/{resource_type}", get(handlers::search_resource))
        .route("/fhir/{resource_type}/{id}", get(handlers::read_resource))
        .with_state(state)
        // Middleware stack (order: request id -> content negotiation -> compression/cors/trace -> body limit)
        .layer(middleware::from_fn(app_middleware::content_negotiation))
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .headers()
                        .get(app_middleware::REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    storage: Option<DynStorage>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            storage: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub fn with_storage(mut self, storage: DynStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn build(self) -> FhirkitServer {
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(InMemoryStorage::new()));
        tracing::info!(
            policy = self.config.auth.policy.build().name(),
            resource_types = self.config.routing.resource_types.len(),
            max_entries = self.config.bundle.max_entries,
            "fhirkit server configured"
        );
        let app = build_app(AppState::new(&self.config, storage));

        FhirkitServer {
            addr: self.addr,
            app,
        }
    }
}

impl FhirkitServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
