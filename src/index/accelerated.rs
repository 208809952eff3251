use anyhow::Result;
use rayon::prelude::*;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use super::{Neighbor, SearchMethod, SearchStrategy};
use crate::corpus::EmbeddingRecord;
use crate::utils::l2_normalize;

/// 内积索引，向量在加入前归一化，因此内积即余弦相似度
///
/// 查询走穷举搜索，结果与暴力扫描一致；HNSW 图只在构建时生成
pub struct AcceleratedIndexSearch {
    index: Index,
    dimensions: usize,
}

impl AcceleratedIndexSearch {
    fn new(dimensions: usize) -> Result<Self> {
        let options = IndexOptions {
            dimensions,
            metric: MetricKind::IP,
            quantization: ScalarKind::F32,
            connectivity: 32,
            expansion_add: 128,
            expansion_search: 128,
            ..Default::default()
        };
        let index = Index::new(&options)?;
        Ok(Self { index, dimensions })
    }

    /// 使用语料库记录构建索引，索引 key 即记录位置
    pub fn build(records: &[EmbeddingRecord], dimensions: usize) -> Result<Self> {
        let s = Self::new(dimensions)?;
        s.index.reserve(records.len())?;
        records.par_iter().enumerate().try_for_each(|(slot, record)| -> Result<()> {
            let v = l2_normalize(&record.vector);
            s.index.add(slot as u64, v.as_slice())?;
            Ok(())
        })?;
        Ok(s)
    }
}

impl SearchStrategy for AcceleratedIndexSearch {
    fn method(&self) -> SearchMethod {
        SearchMethod::Accelerated
    }

    fn len(&self) -> usize {
        self.index.size()
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimensions {
            anyhow::bail!("查询向量维度 {} 与索引维度 {} 不一致", query.len(), self.dimensions);
        }
        let q = l2_normalize(query);
        // 近似搜索在大语料库上会漏掉真正的最近邻
        let m = self.index.exact_search(q.as_slice(), k)?;
        // IP 距离为 1 - 内积
        let neighbors = m
            .keys
            .into_iter()
            .zip(m.distances)
            .map(|(key, distance)| Neighbor { slot: key as usize, similarity: 1. - distance })
            .collect();
        Ok(neighbors)
    }
}
