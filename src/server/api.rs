use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum_typed_multipart::{TypedMultipart, TypedMultipartError};
use indicatif::ProgressBar;
use log::info;
use serde_json::{Value, json};

use super::error::{Result, invalid_request};
use super::state::AppState;
use super::types::*;
use crate::ingest::IngestionResult;
use crate::metrics;
use crate::service::{DetectResult, HealthReport};
use crate::status::IngestionStatus;
use crate::updater::RemoveResult;
use crate::utils::round_to;

/// 服务状态
#[utoipa::path(get, path = "/health")]
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(state.service.health())
}

/// 查询相册编码进度
#[utoipa::path(
    get,
    path = "/encoding-status/{collection}",
    params(("collection" = String, Path, description = "相册 ID"))
)]
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
) -> Result<Json<IngestionStatus>> {
    Ok(Json(state.service.get_status(&collection).await?))
}

/// 重新编码整个相册
#[utoipa::path(post, path = "/encode-album", request_body = EncodeRequest)]
pub async fn encode_album_handler(
    State(state): State<Arc<AppState>>,
    data: std::result::Result<Json<EncodeRequest>, JsonRejection>,
) -> Result<Json<IngestionResult>> {
    let Json(data) = data.map_err(invalid_request)?;
    info!("收到相册 {} 的编码请求: {} 张图片", data.collection_id, data.photos.len());
    let pb = ProgressBar::hidden();
    let result = state.service.ingest_full(&data.collection_id, data.photos, &pb).await?;
    Ok(Json(result))
}

/// 编码新图片并追加到相册
#[utoipa::path(post, path = "/encode-incremental", request_body = EncodeRequest)]
pub async fn encode_incremental_handler(
    State(state): State<Arc<AppState>>,
    data: std::result::Result<Json<EncodeRequest>, JsonRejection>,
) -> Result<Json<IngestionResult>> {
    let Json(data) = data.map_err(invalid_request)?;
    info!("收到相册 {} 的增量编码请求: {} 张图片", data.collection_id, data.photos.len());
    let pb = ProgressBar::hidden();
    let result = state.service.ingest_incremental(&data.collection_id, data.photos, &pb).await?;
    Ok(Json(result))
}

/// 删除图片的人脸特征
#[utoipa::path(post, path = "/remove-photos", request_body = RemoveRequest)]
pub async fn remove_handler(
    State(state): State<Arc<AppState>>,
    data: std::result::Result<Json<RemoveRequest>, JsonRejection>,
) -> Result<Json<RemoveResult>> {
    let Json(data) = data.map_err(invalid_request)?;
    Ok(Json(state.service.remove_items(&data.collection_id, &data.item_ids).await?))
}

/// 在相册中搜索一张图片中的人脸
#[utoipa::path(
    post,
    path = "/search",
    request_body(content = SearchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = SearchResponse),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    data: std::result::Result<TypedMultipart<SearchRequest>, TypedMultipartError>,
) -> Result<Json<SearchResponse>> {
    let TypedMultipart(data) = data.map_err(invalid_request)?;
    let threshold = data.threshold.unwrap_or(state.service.search_options().threshold);
    let match_all = data.match_all_faces.unwrap_or(false);

    let result = state
        .service
        .search(&data.collection_id, data.file.to_vec(), Some(threshold), match_all)
        .await?;

    Ok(Json(SearchResponse {
        total_matches: result.matched_item_ids.len(),
        matched_item_ids: result.matched_item_ids.into_iter().collect(),
        match_details: result
            .match_details
            .into_iter()
            .map(|d| MatchDetailResponse { item_id: d.item_id, similarity: round3(d.similarity) })
            .collect(),
        max_similarity: round3(result.max_similarity),
        threshold_used: threshold,
        faces_detected: result.faces_detected,
        face_bboxes: result.face_bboxes,
        search_method: result.search_method.to_string(),
        search_time_ms: round_to(result.elapsed as f64 * 1000., 1),
    }))
}

/// 检测图片中的人脸
#[utoipa::path(
    post,
    path = "/detect",
    request_body(content = DetectForm, content_type = "multipart/form-data")
)]
pub async fn detect_handler(
    State(state): State<Arc<AppState>>,
    data: std::result::Result<TypedMultipart<DetectRequest>, TypedMultipartError>,
) -> Result<Json<DetectResult>> {
    let TypedMultipart(data) = data.map_err(invalid_request)?;
    Ok(Json(state.service.detect_faces(data.file.to_vec()).await?))
}

/// 清除相册的内存缓存
#[utoipa::path(
    delete,
    path = "/clear-cache/{collection}",
    params(("collection" = String, Path, description = "相册 ID"))
)]
pub async fn clear_cache_handler(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
) -> Json<Value> {
    let cleared = state.service.evict_cache(&collection);
    Json(json!({
        "success": true,
        "cleared": cleared,
        "message": format!("已清除相册 {collection} 的缓存"),
    }))
}

/// prometheus 指标
#[utoipa::path(get, path = "/metrics")]
pub async fn metrics_handler() -> Result<String> {
    Ok(metrics::encode_text()?)
}

fn round3(v: f32) -> f32 {
    round_to(v as f64, 3) as f32
}
