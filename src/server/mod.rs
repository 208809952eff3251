mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::state::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::health_handler,
        api::status_handler,
        api::encode_album_handler,
        api::encode_incremental_handler,
        api::remove_handler,
        api::search_handler,
        api::detect_handler,
        api::clear_cache_handler,
        api::metrics_handler,
    ),
    components(schemas(
        types::SearchForm,
        types::SearchResponse,
        types::MatchDetailResponse,
        types::DetectForm,
        types::EncodeRequest,
        types::PhotoSchema,
        types::RemoveRequest,
    ))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health_handler))
        .route("/encoding-status/{collection}", get(api::status_handler))
        .route("/encode-album", post(api::encode_album_handler))
        .route("/encode-incremental", post(api::encode_incremental_handler))
        .route("/remove-photos", post(api::remove_handler))
        .route("/search", post(api::search_handler))
        .route("/detect", post(api::detect_handler))
        .route("/clear-cache/{collection}", delete(api::clear_cache_handler))
        .route("/metrics", get(api::metrics_handler))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::disable())
        // 上传限制：10M
        .layer(RequestBodyLimitLayer::new(1024 * 1024 * 10))
        .with_state(state)
}
