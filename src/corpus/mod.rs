mod store;

use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize};

pub use self::store::*;

/// 人脸框，格式为 `[x1, y1, x2, y2]`
pub type BoundingBox = [f32; 4];

/// 一张人脸的特征记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// 所属图片 ID，同一张图片的多张人脸共享同一个 ID
    #[serde(alias = "photo_id", deserialize_with = "string_or_number")]
    pub item_id: String,
    /// 人脸特征向量
    #[serde(alias = "embedding")]
    pub vector: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

impl EmbeddingRecord {
    pub fn new(item_id: impl Into<String>, vector: Vec<f32>, bbox: Option<BoundingBox>) -> Self {
        Self { item_id: item_id.into(), vector, bbox }
    }
}

/// 一个相册的全部人脸特征
///
/// 记录顺序即插入顺序，索引中的第 i 个位置对应 `records[i]`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Corpus {
    pub collection_id: String,
    pub records: Vec<EmbeddingRecord>,
}

impl Corpus {
    pub fn new(collection_id: impl Into<String>, records: Vec<EmbeddingRecord>) -> Self {
        Self { collection_id: collection_id.into(), records }
    }

    pub fn empty(collection_id: impl Into<String>) -> Self {
        Self::new(collection_id, vec![])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 向量维度，以第一条记录为准
    pub fn dimension(&self) -> Option<usize> {
        self.records.first().map(|r| r.vector.len())
    }

    /// 追加新记录，返回新的语料库
    pub fn merged(&self, new_records: &[EmbeddingRecord]) -> Self {
        let mut records = Vec::with_capacity(self.records.len() + new_records.len());
        records.extend_from_slice(&self.records);
        records.extend_from_slice(new_records);
        Self::new(self.collection_id.clone(), records)
    }

    /// 过滤掉指定图片的记录，返回新的语料库和删除的记录数量
    pub fn without_items(&self, item_ids: &HashSet<String>) -> (Self, usize) {
        let records = self
            .records
            .iter()
            .filter(|r| !item_ids.contains(&r.item_id))
            .cloned()
            .collect::<Vec<_>>();
        let removed = self.records.len() - records.len();
        (Self::new(self.collection_id.clone(), records), removed)
    }
}

/// 旧版编码文件中的图片 ID 可能是数字
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Int(i64),
        Uint(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Str(s) => s,
        Id::Int(n) => n.to_string(),
        Id::Uint(n) => n.to_string(),
    })
}
