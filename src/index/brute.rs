use std::sync::Arc;

use anyhow::Result;

use super::{Neighbor, SearchMethod, SearchStrategy};
use crate::corpus::Corpus;
use crate::utils::cosine_similarity;

/// 逐条计算余弦相似度，不需要预处理
pub struct BruteForceSearch {
    corpus: Arc<Corpus>,
}

impl BruteForceSearch {
    pub fn new(corpus: Arc<Corpus>) -> Self {
        Self { corpus }
    }
}

impl SearchStrategy for BruteForceSearch {
    fn method(&self) -> SearchMethod {
        SearchMethod::BruteForce
    }

    fn len(&self) -> usize {
        self.corpus.len()
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        let mut neighbors = self
            .corpus
            .records
            .iter()
            .enumerate()
            .map(|(slot, record)| Neighbor {
                slot,
                similarity: cosine_similarity(query, &record.vector),
            })
            .collect::<Vec<_>>();
        neighbors.sort_unstable_by(|a, b| b.similarity.total_cmp(&a.similarity));
        neighbors.truncate(k);
        Ok(neighbors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::EmbeddingRecord;

    #[test]
    fn sorted_by_similarity() {
        let corpus = Corpus::new(
            "c",
            vec![
                EmbeddingRecord::new("a", vec![0., 1.], None),
                EmbeddingRecord::new("b", vec![1., 0.], None),
                EmbeddingRecord::new("c", vec![1., 1.], None),
            ],
        );
        let search = BruteForceSearch::new(Arc::new(corpus));
        let r = search.search(&[2., 0.], 3).unwrap();
        assert_eq!(r.iter().map(|n| n.slot).collect::<Vec<_>>(), [1, 2, 0]);
        assert!((r[0].similarity - 1.).abs() < 1e-6);
        assert!((r[1].similarity - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!(r[2].similarity.abs() < 1e-6);

        let r = search.search(&[2., 0.], 1).unwrap();
        assert_eq!(r.len(), 1);
    }
}
