use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, bail};
use log::debug;
use serde::Serialize;

use crate::corpus::{BoundingBox, CorpusStore, Snapshot};
use crate::error::FaceError;
use crate::face::{FaceEmbedder, largest_face};
use crate::index::{IndexManager, SearchMethod};
use crate::metrics;
use crate::utils::is_valid_collection_id;

/// 一条超过阈值的匹配
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchDetail {
    pub item_id: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// 相似度超过阈值的图片 ID（去重）
    pub matched_item_ids: BTreeSet<String>,
    /// 每张查询人脸的每条匹配，同一张图片可能出现多次
    pub match_details: Vec<MatchDetail>,
    /// 整个语料库中的最高相似度，与阈值无关
    pub max_similarity: f32,
    pub faces_detected: usize,
    /// 参与搜索的查询人脸框
    pub face_bboxes: Vec<BoundingBox>,
    pub search_method: SearchMethod,
    /// 搜索耗时，单位为秒
    pub elapsed: f32,
}

/// 在相册中搜索人脸
#[derive(Clone)]
pub struct SearchEngine {
    store: Arc<CorpusStore>,
    embedder: Arc<dyn FaceEmbedder>,
    manager: IndexManager,
    top_k: usize,
}

impl SearchEngine {
    pub fn new(
        store: Arc<CorpusStore>,
        embedder: Arc<dyn FaceEmbedder>,
        manager: IndexManager,
        top_k: usize,
    ) -> Self {
        Self { store, embedder, manager, top_k: top_k.max(1) }
    }

    /// 检测查询图片中的人脸并在相册中搜索
    ///
    /// 默认只使用面积最大的人脸，`match_all` 为 true 时使用全部人脸并合并结果
    pub async fn search(
        &self,
        collection_id: &str,
        image: Vec<u8>,
        threshold: f32,
        match_all: bool,
    ) -> Result<SearchResult> {
        let start = Instant::now();
        let snapshot = self.snapshot(collection_id).await?;

        let embedder = self.embedder.clone();
        let faces = tokio::task::spawn_blocking(move || embedder.detect(&image)).await??;
        if faces.is_empty() {
            bail!(FaceError::NoFaceDetected);
        }
        let faces_detected = faces.len();

        let queries = if match_all {
            faces
        } else {
            largest_face(&faces).into_iter().cloned().collect()
        };
        let face_bboxes = queries.iter().map(|face| face.bbox).collect::<Vec<_>>();
        let embeddings = queries.into_iter().map(|face| face.embedding).collect::<Vec<_>>();

        let mut result = self.run(snapshot, embeddings, threshold).await?;
        result.faces_detected = faces_detected;
        result.face_bboxes = face_bboxes;
        result.elapsed = start.elapsed().as_secs_f32();
        record_metrics(&result);
        debug!(
            "相册 {collection_id} 搜索完成: {} 张人脸，命中 {} 张图片，最高相似度 {:.3}，{}，耗时 {:.3}s",
            result.faces_detected,
            result.matched_item_ids.len(),
            result.max_similarity,
            result.search_method,
            result.elapsed
        );
        Ok(result)
    }

    /// 直接使用特征向量搜索，跳过人脸检测
    pub async fn search_embeddings(
        &self,
        collection_id: &str,
        queries: Vec<Vec<f32>>,
        threshold: f32,
    ) -> Result<SearchResult> {
        let start = Instant::now();
        if queries.is_empty() {
            bail!(FaceError::NoFaceDetected);
        }
        let snapshot = self.snapshot(collection_id).await?;
        let faces_detected = queries.len();
        let mut result = self.run(snapshot, queries, threshold).await?;
        result.faces_detected = faces_detected;
        result.elapsed = start.elapsed().as_secs_f32();
        record_metrics(&result);
        Ok(result)
    }

    async fn snapshot(&self, collection_id: &str) -> Result<Arc<Snapshot>> {
        if !is_valid_collection_id(collection_id) {
            bail!(FaceError::InvalidRequest(format!("相册 ID 不合法: {collection_id:?}")));
        }
        match self.store.load(collection_id).await? {
            Some(snapshot) => Ok(snapshot),
            None => bail!(FaceError::CorpusNotReady(collection_id.to_string())),
        }
    }

    /// 构建索引和逐条计算都是 CPU 密集的操作，放到阻塞线程中执行
    async fn run(
        &self,
        snapshot: Arc<Snapshot>,
        queries: Vec<Vec<f32>>,
        threshold: f32,
    ) -> Result<SearchResult> {
        let manager = self.manager.clone();
        let top_k = self.top_k;
        tokio::task::spawn_blocking(move || {
            search_snapshot(&snapshot, &manager, top_k, &queries, threshold)
        })
        .await?
    }
}

/// 在一个语料库快照上搜索全部查询向量
///
/// 相似度严格大于 `threshold` 才算匹配；`max_similarity` 在阈值过滤前统计，空语料库时为 0
pub fn search_snapshot(
    snapshot: &Snapshot,
    manager: &IndexManager,
    top_k: usize,
    queries: &[Vec<f32>],
    threshold: f32,
) -> Result<SearchResult> {
    let corpus = snapshot.corpus();
    let strategy = snapshot.strategy(manager);
    let method = strategy.method();

    if let Some(expected) = corpus.dimension() {
        if let Some(q) = queries.iter().find(|q| q.len() != expected) {
            bail!(FaceError::DimensionMismatch { expected, actual: q.len() });
        }
    }

    // 暴力扫描本身就要计算全部记录，直接取全部结果
    let k = match method {
        SearchMethod::Accelerated => top_k.min(corpus.len()),
        SearchMethod::BruteForce => corpus.len(),
    };

    let mut matched_item_ids = BTreeSet::new();
    let mut match_details = vec![];
    let mut max_similarity: Option<f32> = None;

    if k > 0 {
        for query in queries {
            for neighbor in strategy.search(query, k)? {
                max_similarity = Some(match max_similarity {
                    Some(max) => max.max(neighbor.similarity),
                    None => neighbor.similarity,
                });
                if neighbor.similarity > threshold {
                    let item_id = &corpus.records[neighbor.slot].item_id;
                    matched_item_ids.insert(item_id.clone());
                    match_details.push(MatchDetail {
                        item_id: item_id.clone(),
                        similarity: neighbor.similarity,
                    });
                }
            }
        }
    }

    Ok(SearchResult {
        matched_item_ids,
        match_details,
        max_similarity: max_similarity.unwrap_or(0.),
        faces_detected: queries.len(),
        face_bboxes: vec![],
        search_method: method,
        elapsed: 0.,
    })
}

fn record_metrics(result: &SearchResult) {
    let method = result.search_method.as_str();
    metrics::inc_search_count(method, !result.matched_item_ids.is_empty());
    metrics::inc_search_duration(method, result.elapsed);
    metrics::inc_search_max_similarity(method, result.max_similarity);
}
