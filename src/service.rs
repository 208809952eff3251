use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Result, bail};
use indicatif::ProgressBar;
use serde::Serialize;

use crate::config::{DataDir, PipelineOptions, SearchOptions};
use crate::corpus::{BoundingBox, CorpusStore};
use crate::error::FaceError;
use crate::face::FaceEmbedder;
use crate::fetch::ImageFetcher;
use crate::index::IndexManager;
use crate::ingest::{BatchPipeline, IngestMode, IngestionResult, PhotoRef};
use crate::search::{SearchEngine, SearchResult};
use crate::status::{IngestionStatus, StatusTracker};
use crate::updater::{IncrementalUpdater, RemoveResult};
use crate::utils::is_valid_collection_id;

/// 检测到的一张人脸（不含特征向量）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceSummary {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub area: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectResult {
    pub face_count: usize,
    pub has_face: bool,
    /// 按面积从大到小排序
    pub faces: Vec<FaceSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub accelerated: bool,
    pub workers: usize,
    pub batch_size: usize,
    pub cached_collections: Vec<String>,
}

/// 对外提供的全部操作
pub struct FaceService {
    store: Arc<CorpusStore>,
    status: Arc<StatusTracker>,
    pipeline: BatchPipeline,
    engine: SearchEngine,
    updater: IncrementalUpdater,
    embedder: Arc<dyn FaceEmbedder>,
    manager: IndexManager,
    search_opts: SearchOptions,
}

impl FaceService {
    pub fn new(
        data_dir: &DataDir,
        fetcher: Arc<dyn ImageFetcher>,
        embedder: Arc<dyn FaceEmbedder>,
        pipeline_opts: PipelineOptions,
        search_opts: SearchOptions,
    ) -> Result<Self> {
        let store = Arc::new(CorpusStore::open(data_dir.encodings())?);
        let status = Arc::new(StatusTracker::open(data_dir.status(), store.clone())?);
        let manager = IndexManager::new(!search_opts.brute_force);
        let pipeline = BatchPipeline::new(
            store.clone(),
            status.clone(),
            manager.clone(),
            fetcher,
            embedder.clone(),
            pipeline_opts,
        )?;
        let engine =
            SearchEngine::new(store.clone(), embedder.clone(), manager.clone(), search_opts.top_k);
        Ok(Self {
            updater: IncrementalUpdater::new(store.clone()),
            store,
            status,
            pipeline,
            engine,
            embedder,
            manager,
            search_opts,
        })
    }

    /// 重新编码整个相册
    pub async fn ingest_full(
        &self,
        collection_id: &str,
        photos: Vec<PhotoRef>,
        pb: &ProgressBar,
    ) -> Result<IngestionResult> {
        self.pipeline.ingest(collection_id, photos, IngestMode::Full, pb).await
    }

    /// 只编码新图片并追加到相册
    pub async fn ingest_incremental(
        &self,
        collection_id: &str,
        photos: Vec<PhotoRef>,
        pb: &ProgressBar,
    ) -> Result<IngestionResult> {
        self.pipeline.ingest(collection_id, photos, IngestMode::Incremental, pb).await
    }

    pub async fn remove_items(
        &self,
        collection_id: &str,
        item_ids: &[String],
    ) -> Result<RemoveResult> {
        if item_ids.is_empty() {
            bail!(FaceError::InvalidRequest("图片 ID 列表为空".to_string()));
        }
        let item_ids = item_ids.iter().cloned().collect::<HashSet<_>>();
        self.updater.remove(collection_id, &item_ids).await
    }

    /// `threshold` 为空时使用默认阈值
    pub async fn search(
        &self,
        collection_id: &str,
        image: Vec<u8>,
        threshold: Option<f32>,
        match_all_faces: bool,
    ) -> Result<SearchResult> {
        if image.is_empty() {
            bail!(FaceError::InvalidRequest("图片为空".to_string()));
        }
        let threshold = threshold.unwrap_or(self.search_opts.threshold);
        self.engine.search(collection_id, image, threshold, match_all_faces).await
    }

    pub async fn detect_faces(&self, image: Vec<u8>) -> Result<DetectResult> {
        if image.is_empty() {
            bail!(FaceError::InvalidRequest("图片为空".to_string()));
        }
        let embedder = self.embedder.clone();
        let faces = tokio::task::spawn_blocking(move || embedder.detect(&image)).await??;
        let mut faces = faces
            .iter()
            .map(|face| FaceSummary {
                bbox: face.bbox,
                confidence: face.confidence,
                area: face.area(),
            })
            .collect::<Vec<_>>();
        faces.sort_by(|a, b| b.area.total_cmp(&a.area));
        Ok(DetectResult { face_count: faces.len(), has_face: !faces.is_empty(), faces })
    }

    pub async fn get_status(&self, collection_id: &str) -> Result<IngestionStatus> {
        if !is_valid_collection_id(collection_id) {
            bail!(FaceError::InvalidRequest(format!("相册 ID 不合法: {collection_id:?}")));
        }
        self.status.get(collection_id).await
    }

    /// 清除相册的内存缓存和索引，返回缓存是否存在
    pub fn evict_cache(&self, collection_id: &str) -> bool {
        self.store.evict(collection_id)
    }

    pub fn health(&self) -> HealthReport {
        let opts = self.pipeline.options();
        HealthReport {
            status: "ok",
            service: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            accelerated: self.manager.accelerated(),
            workers: opts.workers,
            batch_size: opts.batch_size,
            cached_collections: self.store.cached(),
        }
    }

    pub fn search_options(&self) -> &SearchOptions {
        &self.search_opts
    }
}
