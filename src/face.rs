use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use crate::config::EmbedderOptions;
use crate::corpus::BoundingBox;

/// 检测到的一张人脸
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub embedding: Vec<f32>,
    pub bbox: BoundingBox,
    #[serde(default)]
    pub confidence: f32,
}

impl DetectedFace {
    pub fn area(&self) -> f32 {
        let [x1, y1, x2, y2] = self.bbox;
        (x2 - x1) * (y2 - y1)
    }
}

/// 返回面积最大的人脸
pub fn largest_face(faces: &[DetectedFace]) -> Option<&DetectedFace> {
    faces.iter().max_by(|a, b| a.area().total_cmp(&b.area()))
}

/// 人脸检测与特征提取
///
/// 会在多个工作线程中同时调用，实现需要保证线程安全
pub trait FaceEmbedder: Send + Sync {
    /// 从图片数据中检测所有人脸
    fn detect(&self, image: &[u8]) -> Result<Vec<DetectedFace>>;
}

/// 通过 HTTP 调用外部推理服务
///
/// 请求体为原始图片数据，响应为 `[{"embedding": [...], "bbox": [...], "confidence": 0.9}]`
pub struct RemoteEmbedder {
    client: reqwest::Client,
    url: String,
    handle: Handle,
}

impl RemoteEmbedder {
    /// 需要在 tokio 运行时中创建，`detect` 会在工作线程中借用该运行时发送请求
    pub fn new(opts: &EmbedderOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(opts.embedder_timeout))
            .build()
            .context("无法创建 HTTP 客户端")?;
        Ok(Self { client, url: opts.embedder_url.clone(), handle: Handle::current() })
    }

    async fn request(&self, image: Vec<u8>) -> Result<Vec<DetectedFace>> {
        let faces = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<DetectedFace>>()
            .await?;
        Ok(faces)
    }
}

impl FaceEmbedder for RemoteEmbedder {
    /// 不能在异步上下文中直接调用，应当放在 `spawn_blocking` 或线程池中
    fn detect(&self, image: &[u8]) -> Result<Vec<DetectedFace>> {
        self.handle.block_on(self.request(image.to_vec()))
    }
}
