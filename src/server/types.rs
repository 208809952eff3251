use axum::body::Bytes;
use axum_typed_multipart::TryFromMultipart;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::ingest::PhotoRef;

/// 搜索请求参数
#[derive(TryFromMultipart)]
pub struct SearchRequest {
    pub collection_id: String,
    pub file: Bytes,
    pub threshold: Option<f32>,
    pub match_all_faces: Option<bool>,
}

/// 搜索表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchForm {
    /// 相册 ID
    pub collection_id: String,
    /// 查询图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
    /// 相似度阈值，默认 0.4
    pub threshold: Option<f32>,
    /// 是否使用图片中的全部人脸
    pub match_all_faces: Option<bool>,
}

/// 搜索响应
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponse {
    /// 匹配的图片 ID
    pub matched_item_ids: Vec<String>,
    pub total_matches: usize,
    /// 每条匹配的相似度，保留三位小数
    pub match_details: Vec<MatchDetailResponse>,
    pub max_similarity: f32,
    pub threshold_used: f32,
    pub faces_detected: usize,
    /// 参与搜索的人脸框 `[x1, y1, x2, y2]`
    #[schema(value_type = Vec<Vec<f32>>)]
    pub face_bboxes: Vec<[f32; 4]>,
    /// accelerated 或 brute_force
    pub search_method: String,
    pub search_time_ms: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MatchDetailResponse {
    pub item_id: String,
    pub similarity: f32,
}

/// 人脸检测请求参数
#[derive(TryFromMultipart)]
pub struct DetectRequest {
    pub file: Bytes,
}

/// 人脸检测表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct DetectForm {
    /// 图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
}

/// 编码相册的参数
#[derive(Debug, Deserialize, ToSchema)]
pub struct EncodeRequest {
    /// 相册 ID
    #[serde(alias = "album_id")]
    pub collection_id: String,
    /// 图片列表
    #[serde(default)]
    #[schema(value_type = Vec<PhotoSchema>)]
    pub photos: Vec<PhotoRef>,
}

/// 相册中的一张图片（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct PhotoSchema {
    pub id: String,
    pub url: Option<String>,
}

/// 删除图片的参数
#[derive(Debug, Deserialize, ToSchema)]
pub struct RemoveRequest {
    /// 相册 ID
    #[serde(alias = "album_id")]
    pub collection_id: String,
    /// 要删除的图片 ID
    #[serde(default, alias = "photo_ids")]
    pub item_ids: Vec<String>,
}
