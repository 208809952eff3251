mod tasks;
mod types;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use indicatif::ProgressBar;
use log::{debug, error, info, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;

pub use self::tasks::extract;
use self::tasks::*;
pub use self::types::*;
use crate::config::PipelineOptions;
use crate::corpus::{Corpus, CorpusStore, EmbeddingRecord};
use crate::error::{FaceError, ItemError};
use crate::face::FaceEmbedder;
use crate::fetch::ImageFetcher;
use crate::index::IndexManager;
use crate::metrics;
use crate::status::{IngestionState, IngestionStatus, StatusTracker};
use crate::updater::IncrementalUpdater;
use crate::utils::{is_valid_collection_id, round_to};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// 重新编码整个相册，替换原有的人脸特征
    Full,
    /// 只编码新图片，追加到原有的人脸特征之后
    Incremental,
}

/// 一次编码任务的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionResult {
    pub collection_id: String,
    pub mode: IngestMode,
    /// 成功提取到人脸的图片数量
    pub processed: usize,
    /// 下载失败、提取失败或没有人脸的图片数量
    pub failed: usize,
    /// 本次新增的人脸数量
    pub faces_added: usize,
    /// 完成后相册的人脸总数
    pub total_faces: usize,
    pub elapsed_seconds: f64,
}

/// 单个批次的处理结果
#[derive(Default)]
struct BatchOutcome {
    processed: usize,
    failed: usize,
    records: Vec<EmbeddingRecord>,
}

/// 分批下载图片并提取人脸特征
pub struct BatchPipeline {
    store: Arc<CorpusStore>,
    status: Arc<StatusTracker>,
    updater: IncrementalUpdater,
    manager: IndexManager,
    fetcher: Arc<dyn ImageFetcher>,
    embedder: Arc<dyn FaceEmbedder>,
    pool: Arc<ThreadPool>,
    opts: PipelineOptions,
}

impl BatchPipeline {
    pub fn new(
        store: Arc<CorpusStore>,
        status: Arc<StatusTracker>,
        manager: IndexManager,
        fetcher: Arc<dyn ImageFetcher>,
        embedder: Arc<dyn FaceEmbedder>,
        opts: PipelineOptions,
    ) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(opts.workers.max(1))
            .thread_name(|i| format!("embed-{i}"))
            .build()
            .context("无法创建特征提取线程池")?;
        Ok(Self {
            updater: IncrementalUpdater::new(store.clone()),
            store,
            status,
            manager,
            fetcher,
            embedder,
            pool: Arc::new(pool),
            opts,
        })
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.opts
    }

    /// 编码相册图片
    ///
    /// 任务期间持有相册写锁；单张图片或单个批次的失败只计入失败数量，不会中断任务。
    /// 只有全部批次完成后才会写入语料库文件。
    pub async fn ingest(
        &self,
        collection_id: &str,
        photos: Vec<PhotoRef>,
        mode: IngestMode,
        pb: &ProgressBar,
    ) -> Result<IngestionResult> {
        if !is_valid_collection_id(collection_id) {
            bail!(FaceError::InvalidRequest(format!("相册 ID 不合法: {collection_id:?}")));
        }
        if photos.is_empty() {
            bail!(FaceError::InvalidRequest("图片列表为空".to_string()));
        }

        let _guard = self.store.lock(collection_id).await;
        let start = Instant::now();
        let total = photos.len();

        info!(
            "开始编码相册 {collection_id}: {total} 张图片，模式 {mode:?}，线程数 {}",
            self.pool.current_num_threads()
        );
        self.report(IngestionStatus::new(collection_id, IngestionState::Encoding, 0, total, 0))
            .await;

        pb.set_length(total as u64);
        let (processed, failed, records) = self.run(collection_id, photos, pb).await;
        let faces_added = records.len();

        let persisted = match mode {
            IngestMode::Full => self.store.save(Corpus::new(collection_id, records)).await,
            IngestMode::Incremental => self.updater.append(collection_id, &records).await,
        };
        let snapshot = match persisted {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("保存相册 {collection_id} 失败: {e:?}");
                let status =
                    IngestionStatus::new(collection_id, IngestionState::Failed, total, total, 0)
                        .with_error(e.to_string());
                self.report(status).await;
                return Err(e);
            }
        };
        let total_faces = snapshot.corpus().len();

        // 全量编码后立即构建索引，增量合并的索引在下一次搜索时构建
        if mode == IngestMode::Full {
            let manager = self.manager.clone();
            let snapshot = snapshot.clone();
            tokio::task::spawn_blocking(move || {
                snapshot.strategy(&manager);
            })
            .await?;
        }

        self.report(IngestionStatus::new(
            collection_id,
            IngestionState::Completed,
            total,
            total,
            total_faces,
        ))
        .await;

        let elapsed = start.elapsed().as_secs_f64();
        info!(
            "相册 {collection_id} 编码完成: 成功 {processed} 张，失败 {failed} 张，新增 {faces_added} 张人脸，共 {total_faces} 张，耗时 {elapsed:.1}s"
        );

        Ok(IngestionResult {
            collection_id: collection_id.to_string(),
            mode,
            processed,
            failed,
            faces_added,
            total_faces,
            elapsed_seconds: round_to(elapsed, 1),
        })
    }

    /// 依次处理每个批次，返回 (成功数, 失败数, 人脸记录)
    async fn run(
        &self,
        collection_id: &str,
        photos: Vec<PhotoRef>,
        pb: &ProgressBar,
    ) -> (usize, usize, Vec<EmbeddingRecord>) {
        let total = photos.len();
        let batch_size = self.opts.batch_size.max(1);
        let total_batches = total.div_ceil(batch_size);

        let mut processed = 0;
        let mut failed = 0;
        let mut records = vec![];

        for (i, batch) in photos.chunks(batch_size).enumerate() {
            let batch_num = i + 1;
            let batch_len = batch.len();
            debug!("批次 {batch_num}/{total_batches}: 下载 {batch_len} 张图片");

            match self.run_batch(batch.to_vec(), pb).await {
                Ok(outcome) => {
                    processed += outcome.processed;
                    failed += outcome.failed;
                    records.extend(outcome.records);
                }
                Err(e) => {
                    warn!("相册 {collection_id} 批次 {batch_num}/{total_batches} 处理失败: {e:?}");
                    metrics::inc_ingest_items("failed", batch_len);
                    failed += batch_len;
                }
            }

            let done = i * batch_size + batch_len;
            pb.set_position(done as u64);
            pb.set_message(format!("批次 {batch_num}/{total_batches}"));
            info!("批次 {batch_num}/{total_batches} 完成: 共 {} 张人脸", records.len());

            let status = IngestionStatus::new(
                collection_id,
                IngestionState::Encoding,
                done,
                total,
                records.len(),
            )
            .with_batch(format!("Batch {batch_num}/{total_batches}"));
            self.report(status).await;
        }

        (processed, failed, records)
    }

    /// 处理一个批次：下载阶段和提取阶段通过有界队列连接
    async fn run_batch(&self, batch: Vec<PhotoRef>, pb: &ProgressBar) -> Result<BatchOutcome> {
        let (t1, rx) =
            task_fetch(batch, self.fetcher.clone(), self.opts.fetch_timeout(), self.opts.workers);
        let (t2, mut rx) = task_embed(rx, self.embedder.clone(), self.pool.clone());

        let mut outcomes = vec![];
        while let Some(outcome) = rx.recv().await {
            pb.inc(1);
            outcomes.push(outcome);
        }

        // 任一阶段 panic 时整个批次视为失败
        let (r1, r2) = tokio::join!(t1, t2);
        r1.context("下载任务异常退出")?;
        r2.context("特征提取任务异常退出")?;

        outcomes.sort_unstable_by_key(|outcome| outcome.index);

        let mut batch = BatchOutcome::default();
        for outcome in outcomes {
            match outcome.result {
                Ok(records) => {
                    debug!("图片 {}: {} 张人脸", outcome.id, records.len());
                    metrics::inc_ingest_items("processed", 1);
                    batch.processed += 1;
                    batch.records.extend(records);
                }
                Err(ItemError::NoFace) => {
                    debug!("图片 {}: 没有检测到人脸", outcome.id);
                    metrics::inc_ingest_items("no_face", 1);
                    batch.failed += 1;
                }
                Err(e) => {
                    warn!("图片 {}: {e}", outcome.id);
                    metrics::inc_ingest_items("failed", 1);
                    batch.failed += 1;
                }
            }
        }
        Ok(batch)
    }

    /// 状态写入失败不影响任务本身
    async fn report(&self, status: IngestionStatus) {
        if let Err(e) = self.status.update(&status).await {
            warn!("更新相册 {} 状态失败: {e:?}", status.collection_id);
        }
    }
}
