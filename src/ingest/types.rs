use serde::{Deserialize, Serialize};

use crate::corpus::{EmbeddingRecord, string_or_number};
use crate::error::ItemError;

/// 相册中的一张图片
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRef {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl PhotoRef {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self { id: id.into(), url: Some(url.into()) }
    }
}

/// 下载阶段的输出
pub struct FetchedImage {
    /// 在批次中的位置，用于保持记录顺序
    pub index: usize,
    pub id: String,
    pub result: Result<Vec<u8>, ItemError>,
}

/// 特征提取阶段的输出
pub struct ItemOutcome {
    pub index: usize,
    pub id: String,
    pub result: Result<Vec<EmbeddingRecord>, ItemError>,
}
