use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Result, bail};
use log::info;
use serde::Serialize;

use crate::corpus::{Corpus, CorpusStore, EmbeddingRecord, Snapshot};
use crate::error::FaceError;
use crate::utils::is_valid_collection_id;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoveResult {
    /// 删除的人脸记录数量
    pub removed: usize,
    /// 剩余的人脸记录数量
    pub remaining: usize,
}

/// 在已有语料库上追加或删除记录
///
/// 每次修改都会生成新的快照，旧索引随旧快照一起失效，下次搜索时基于新快照重新构建
#[derive(Clone)]
pub struct IncrementalUpdater {
    store: Arc<CorpusStore>,
}

impl IncrementalUpdater {
    pub fn new(store: Arc<CorpusStore>) -> Self {
        Self { store }
    }

    /// 将新记录追加到相册语料库，相册不存在时视为空语料库
    pub async fn merge(
        &self,
        collection_id: &str,
        records: &[EmbeddingRecord],
    ) -> Result<Arc<Corpus>> {
        check_collection_id(collection_id)?;
        let _guard = self.store.lock(collection_id).await;
        let snapshot = self.append(collection_id, records).await?;
        Ok(snapshot.corpus().clone())
    }

    /// 与 `merge` 相同，但调用者需要自己持有写锁
    pub(crate) async fn append(
        &self,
        collection_id: &str,
        records: &[EmbeddingRecord],
    ) -> Result<Arc<Snapshot>> {
        let corpus = match self.store.load(collection_id).await? {
            Some(snapshot) => snapshot.corpus().merged(records),
            None => Corpus::new(collection_id, records.to_vec()),
        };
        let snapshot = self.store.save(corpus).await?;
        info!(
            "相册 {collection_id} 新增 {} 张人脸，共 {} 张",
            records.len(),
            snapshot.corpus().len()
        );
        Ok(snapshot)
    }

    /// 删除指定图片的全部人脸记录
    ///
    /// 删除会改变后续记录的位置，因此索引必须整体重建
    pub async fn remove(
        &self,
        collection_id: &str,
        item_ids: &HashSet<String>,
    ) -> Result<RemoveResult> {
        check_collection_id(collection_id)?;
        let _guard = self.store.lock(collection_id).await;

        let Some(snapshot) = self.store.load(collection_id).await? else {
            return Ok(RemoveResult { removed: 0, remaining: 0 });
        };
        let (corpus, removed) = snapshot.corpus().without_items(item_ids);
        if removed == 0 {
            return Ok(RemoveResult { removed, remaining: corpus.len() });
        }

        let remaining = corpus.len();
        self.store.save(corpus).await?;
        info!(
            "相册 {collection_id} 删除 {} 张图片的 {removed} 张人脸，剩余 {remaining} 张",
            item_ids.len()
        );
        Ok(RemoveResult { removed, remaining })
    }
}

fn check_collection_id(collection_id: &str) -> Result<()> {
    if !is_valid_collection_id(collection_id) {
        bail!(FaceError::InvalidRequest(format!("相册 ID 不合法: {collection_id:?}")));
    }
    Ok(())
}
