pub mod api;
pub mod config;
pub mod services;
pub mod utils;

use crate::config::PipelineConfig;
use crate::services::ephemeral::EphemeralStore;
use crate::services::pipeline::PipelineService;
use crate::services::scanner::VirusScanner;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::convert::convert_file,
        api::handlers::local::fetch_local,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            services::pipeline::PipelineReport,
            services::pipeline::PipelineStatus,
            services::pipeline::ScanDisposition,
            services::classifier::FileCategory,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "pipeline", description = "Scan-first preview pipeline"),
        (name = "local-store", description = "Ephemeral local test store"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<PipelineService>,
    pub local_store: Arc<EphemeralStore>,
    pub scanner: Arc<dyn VirusScanner>,
    pub config: PipelineConfig,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/convert",
            post(api::handlers::convert::convert_file).layer(
                // Multipart framing adds a little overhead on top of the file.
                axum::extract::DefaultBodyLimit::max(
                    state.config.max_file_size + 10 * 1024 * 1024,
                ),
            ),
        )
        .route("/local/:kind/:key", get(api::handlers::local::fetch_local))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
