use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::corpus::CorpusStore;
use crate::utils::round_to;

/// 编码任务状态
///
/// `not_started → encoding → completed | failed`，新任务可以从终态重新进入 `encoding`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionState {
    NotStarted,
    Encoding,
    Completed,
    Failed,
}

impl IngestionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(&self, next: IngestionState) -> bool {
        use IngestionState::*;
        match (*self, next) {
            (_, NotStarted) => false,
            (NotStarted, _) => true,
            (Encoding, _) => true,
            (Completed | Failed, Encoding) => true,
            (Completed | Failed, _) => false,
        }
    }
}

/// 相册编码进度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionStatus {
    pub collection_id: String,
    pub state: IngestionState,
    pub processed: usize,
    pub total: usize,
    pub faces: usize,
    pub progress_percent: f64,
    pub current_batch: Option<String>,
    pub error: Option<String>,
    pub updated_at: Option<DateTime<Local>>,
}

impl IngestionStatus {
    pub fn new(
        collection_id: impl Into<String>,
        state: IngestionState,
        processed: usize,
        total: usize,
        faces: usize,
    ) -> Self {
        Self {
            collection_id: collection_id.into(),
            state,
            processed,
            total,
            faces,
            progress_percent: progress_percent(processed, total),
            current_batch: None,
            error: None,
            updated_at: Some(Local::now()),
        }
    }

    pub fn with_batch(mut self, label: impl Into<String>) -> Self {
        self.current_batch = Some(label.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    fn not_started(collection_id: &str) -> Self {
        Self { updated_at: None, ..Self::new(collection_id, IngestionState::NotStarted, 0, 0, 0) }
    }

    /// 没有状态文件但存在语料库，例如由外部脚本生成的编码文件
    fn completed_from_corpus(collection_id: &str, faces: usize) -> Self {
        Self {
            progress_percent: 100.,
            updated_at: None,
            ..Self::new(collection_id, IngestionState::Completed, 0, 0, faces)
        }
    }
}

pub fn progress_percent(processed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.;
    }
    round_to(processed as f64 / total as f64 * 100., 1)
}

/// 记录每个相册最近一次编码任务的进度，文件为 `<dir>/<collection>.json`
pub struct StatusTracker {
    dir: PathBuf,
    store: Arc<CorpusStore>,
}

impl StatusTracker {
    pub fn open(dir: impl AsRef<Path>, store: Arc<CorpusStore>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("无法创建目录 {}", dir.display()))?;
        Ok(Self { dir, store })
    }

    pub fn path(&self, collection_id: &str) -> PathBuf {
        self.dir.join(format!("{collection_id}.json"))
    }

    async fn read(&self, collection_id: &str) -> Result<Option<IngestionStatus>> {
        let path = self.path(collection_id);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(
                serde_json::from_slice(&data)
                    .with_context(|| format!("解析 {} 失败", path.display()))?,
            )),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("读取 {} 失败", path.display())),
        }
    }

    /// 写入新的状态，调用者应当持有该相册的写锁
    pub async fn update(&self, status: &IngestionStatus) -> Result<()> {
        if let Some(prev) = self.read(&status.collection_id).await.ok().flatten() {
            if !prev.state.can_transition_to(status.state) {
                bail!(
                    "相册 {} 的状态不能从 {:?} 变为 {:?}",
                    status.collection_id,
                    prev.state,
                    status.state
                );
            }
        } else if status.state == IngestionState::NotStarted {
            bail!("不能写入 not_started 状态");
        }

        let path = self.path(&status.collection_id);
        let mut tmp_file = path.clone();
        tmp_file.set_extension("json.tmp");
        tokio::fs::write(&tmp_file, serde_json::to_vec(status)?).await?;
        tokio::fs::rename(&tmp_file, &path).await?;
        Ok(())
    }

    /// 获取相册状态，没有状态文件时根据语料库推断
    pub async fn get(&self, collection_id: &str) -> Result<IngestionStatus> {
        if let Some(status) = self.read(collection_id).await? {
            return Ok(status);
        }
        match self.store.load(collection_id).await? {
            Some(snapshot) => {
                Ok(IngestionStatus::completed_from_corpus(collection_id, snapshot.corpus().len()))
            }
            None => Ok(IngestionStatus::not_started(collection_id)),
        }
    }
}
