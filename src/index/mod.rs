mod brute;
#[cfg(feature = "accelerated")]
mod accelerated;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use log::{debug, warn};
use serde::Serialize;

pub use self::brute::BruteForceSearch;
#[cfg(feature = "accelerated")]
pub use self::accelerated::AcceleratedIndexSearch;
use crate::corpus::Corpus;

/// 一次近邻搜索命中的位置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// 记录在语料库中的位置
    pub slot: usize,
    /// 余弦相似度
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    Accelerated,
    BruteForce,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accelerated => "accelerated",
            Self::BruteForce => "brute_force",
        }
    }
}

impl fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 基于某个语料库快照的相似度搜索策略
pub trait SearchStrategy: Send + Sync {
    fn method(&self) -> SearchMethod;

    /// 构建时的记录数量
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 搜索与 query 最相似的至多 k 条记录，按相似度降序返回
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;
}

/// 负责从语料库快照构建搜索结构
#[derive(Debug, Clone)]
pub struct IndexManager {
    accelerated: bool,
}

impl IndexManager {
    /// `accelerated` 为 false 时始终使用暴力扫描
    pub fn new(accelerated: bool) -> Self {
        Self { accelerated: accelerated && Self::backend_available() }
    }

    /// 是否编译了加速索引后端
    pub fn backend_available() -> bool {
        cfg!(feature = "accelerated")
    }

    pub fn accelerated(&self) -> bool {
        self.accelerated
    }

    /// 为语料库选择搜索策略，加速索引不可用时退化为暴力扫描
    pub fn build(&self, corpus: &Arc<Corpus>) -> Arc<dyn SearchStrategy> {
        if self.accelerated {
            if let Some(index) = self.build_accelerated(corpus) {
                return index;
            }
        }
        debug!("相册 {} 使用暴力扫描，共 {} 条记录", corpus.collection_id, corpus.len());
        Arc::new(BruteForceSearch::new(corpus.clone()))
    }

    #[cfg(feature = "accelerated")]
    fn build_accelerated(&self, corpus: &Corpus) -> Option<Arc<dyn SearchStrategy>> {
        let dim = corpus.dimension()?;
        if dim == 0 {
            return None;
        }
        if let Some(r) = corpus.records.iter().find(|r| r.vector.len() != dim) {
            warn!(
                "相册 {} 中存在维度不一致的向量 ({} != {})，无法构建索引",
                corpus.collection_id,
                r.vector.len(),
                dim
            );
            return None;
        }
        match AcceleratedIndexSearch::build(&corpus.records, dim) {
            Ok(index) => {
                debug!("相册 {} 索引构建完成，共 {} 条记录", corpus.collection_id, index.len());
                Some(Arc::new(index))
            }
            Err(e) => {
                warn!("相册 {} 索引构建失败: {e}", corpus.collection_id);
                None
            }
        }
    }

    #[cfg(not(feature = "accelerated"))]
    fn build_accelerated(&self, _corpus: &Corpus) -> Option<Arc<dyn SearchStrategy>> {
        None
    }
}
