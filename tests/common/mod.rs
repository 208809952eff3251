#![allow(unused)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use facesearch::FaceService;
use facesearch::config::{DataDir, PipelineOptions, SearchOptions};
use facesearch::face::{DetectedFace, FaceEmbedder};
use facesearch::fetch::ImageFetcher;
use facesearch::ingest::PhotoRef;
use tempfile::TempDir;

/// 图片内容就是 JSON 编码的人脸列表
pub struct FakeEmbedder;

impl FaceEmbedder for FakeEmbedder {
    fn detect(&self, image: &[u8]) -> Result<Vec<DetectedFace>> {
        if image == b"broken" {
            bail!("模型推理失败");
        }
        if image == b"panic" {
            panic!("模型崩溃");
        }
        Ok(serde_json::from_slice(image)?)
    }
}

/// 从内存中返回图片，未登记的地址视为 404
#[derive(Default)]
pub struct FakeFetcher {
    images: HashMap<String, Vec<u8>>,
    delays: HashMap<String, Duration>,
}

impl FakeFetcher {
    pub fn insert(&mut self, url: &str, faces: &[DetectedFace]) {
        self.images.insert(url.to_string(), image(faces));
    }

    pub fn insert_raw(&mut self, url: &str, data: &[u8]) {
        self.images.insert(url.to_string(), data.to_vec());
    }

    /// 下载该地址前先等待一段时间，不受传入的超时限制
    pub fn delay(&mut self, url: &str, delay: Duration) {
        self.delays.insert(url.to_string(), delay);
    }
}

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<Vec<u8>> {
        if let Some(delay) = self.delays.get(url) {
            tokio::time::sleep(*delay).await;
        }
        self.images.get(url).cloned().ok_or_else(|| anyhow!("HTTP 404"))
    }
}

pub fn image(faces: &[DetectedFace]) -> Vec<u8> {
    serde_json::to_vec(faces).unwrap()
}

pub fn face(embedding: Vec<f32>, size: f32) -> DetectedFace {
    DetectedFace { embedding, bbox: [0., 0., size, size], confidence: 0.99 }
}

/// 第 i 维为 1 的单位向量
pub fn unit(dim: usize, i: usize) -> Vec<f32> {
    let mut v = vec![0.; dim];
    v[i] = 1.;
    v
}

pub fn photo(id: &str) -> PhotoRef {
    PhotoRef::new(id, format!("http://img/{id}.jpg"))
}

pub fn url(id: &str) -> String {
    format!("http://img/{id}.jpg")
}

pub struct TestService {
    pub dir: TempDir,
    pub service: FaceService,
}

pub fn service(fetcher: FakeFetcher, batch_size: usize, brute_force: bool) -> TestService {
    let pipeline = PipelineOptions { batch_size, workers: 2, fetch_timeout: 5 };
    service_with(fetcher, pipeline, brute_force)
}

pub fn service_with(
    fetcher: FakeFetcher,
    pipeline: PipelineOptions,
    brute_force: bool,
) -> TestService {
    let dir = TempDir::new().unwrap();
    let search = SearchOptions { brute_force, ..Default::default() };
    let service = FaceService::new(
        &DataDir::from(dir.path()),
        Arc::new(fetcher),
        Arc::new(FakeEmbedder),
        pipeline,
        search,
    )
    .unwrap();
    TestService { dir, service }
}
