use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use anyhow::{Context, Result};
use log::{debug, info};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Corpus, EmbeddingRecord};
use crate::index::{IndexManager, SearchStrategy};

/// 语料库快照以及基于它构建的搜索结构
///
/// 快照本身不可变，任何修改都会生成新的快照，因此索引只会对应唯一的语料库版本
pub struct Snapshot {
    corpus: Arc<Corpus>,
    strategy: OnceLock<Arc<dyn SearchStrategy>>,
}

impl Snapshot {
    fn new(corpus: Corpus) -> Self {
        Self { corpus: Arc::new(corpus), strategy: OnceLock::new() }
    }

    pub fn corpus(&self) -> &Arc<Corpus> {
        &self.corpus
    }

    /// 获取搜索策略，第一次调用时构建
    pub fn strategy(&self, manager: &IndexManager) -> Arc<dyn SearchStrategy> {
        self.strategy.get_or_init(|| manager.build(&self.corpus)).clone()
    }

    /// 是否已经构建过搜索结构
    pub fn is_indexed(&self) -> bool {
        self.strategy.get().is_some()
    }
}

#[derive(Default)]
struct CollectionSlot {
    /// 同一相册同一时间只允许一个写者
    writer: Arc<Mutex<()>>,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    /// 每次保存或清除缓存都会加一
    generation: AtomicU64,
}

impl CollectionSlot {
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn replace(&self, snapshot: Option<Arc<Snapshot>>) -> Option<Arc<Snapshot>> {
        let mut lock = self.snapshot.write().expect("failed to acquire rw lock");
        self.generation.fetch_add(1, Ordering::AcqRel);
        std::mem::replace(&mut *lock, snapshot)
    }

    /// 把从文件读到的语料库放入缓存
    ///
    /// 读取期间有过保存或清除时返回 `None`，此时读到的内容可能已经过期
    fn publish(&self, generation: u64, corpus: Corpus) -> Option<Arc<Snapshot>> {
        let mut lock = self.snapshot.write().expect("failed to acquire rw lock");
        if let Some(snapshot) = lock.as_ref() {
            return Some(snapshot.clone());
        }
        if self.generation() != generation {
            return None;
        }
        let snapshot = Arc::new(Snapshot::new(corpus));
        *lock = Some(snapshot.clone());
        Some(snapshot)
    }
}

/// 按相册保存人脸特征，文件为 `<dir>/<collection>.json`
pub struct CorpusStore {
    dir: PathBuf,
    slots: RwLock<HashMap<String, Arc<CollectionSlot>>>,
}

impl CorpusStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("无法创建目录 {}", dir.display()))?;
        Ok(Self { dir, slots: RwLock::new(HashMap::new()) })
    }

    pub fn path(&self, collection_id: &str) -> PathBuf {
        self.dir.join(format!("{collection_id}.json"))
    }

    fn slot(&self, collection_id: &str) -> Arc<CollectionSlot> {
        if let Some(slot) = self.slots.read().expect("failed to acquire rw lock").get(collection_id)
        {
            return slot.clone();
        }
        self.slots
            .write()
            .expect("failed to acquire rw lock")
            .entry(collection_id.to_owned())
            .or_default()
            .clone()
    }

    /// 获取相册的写锁，持有期间其他写者（入库、合并、删除）会等待
    pub async fn lock(&self, collection_id: &str) -> OwnedMutexGuard<()> {
        self.slot(collection_id).writer.clone().lock_owned().await
    }

    /// 只查询内存缓存，不读取文件
    pub fn get_cached(&self, collection_id: &str) -> Option<Arc<Snapshot>> {
        let slots = self.slots.read().expect("failed to acquire rw lock");
        let slot = slots.get(collection_id)?;
        slot.snapshot.read().expect("failed to acquire rw lock").clone()
    }

    /// 加载相册语料库，优先使用缓存
    ///
    /// 相册从未编码过时返回 `None`，这与空语料库不同
    pub async fn load(&self, collection_id: &str) -> Result<Option<Arc<Snapshot>>> {
        if let Some(snapshot) = self.get_cached(collection_id) {
            return Ok(Some(snapshot));
        }

        let slot = self.slot(collection_id);
        loop {
            let generation = slot.generation();
            let Some(records) = self.read_records(collection_id).await? else {
                return Ok(None);
            };
            match slot.publish(generation, Corpus::new(collection_id, records)) {
                Some(snapshot) => return Ok(Some(snapshot)),
                None => debug!("相册 {} 在读取期间被修改，重新读取", collection_id),
            }
        }
    }

    async fn read_records(&self, collection_id: &str) -> Result<Option<Vec<EmbeddingRecord>>> {
        let path = self.path(collection_id);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("读取 {} 失败", path.display())),
        };
        let records: Vec<EmbeddingRecord> = serde_json::from_slice(&data)
            .with_context(|| format!("解析 {} 失败", path.display()))?;
        debug!("从 {} 加载 {} 条人脸记录", path.display(), records.len());
        Ok(Some(records))
    }

    /// 覆盖保存相册语料库，并替换缓存中的快照
    ///
    /// 调用者应当持有该相册的写锁
    pub async fn save(&self, corpus: Corpus) -> Result<Arc<Snapshot>> {
        let path = self.path(&corpus.collection_id);
        let mut tmp_file = path.clone();
        tmp_file.set_extension("json.tmp");

        let data = serde_json::to_vec(&corpus.records)?;
        tokio::fs::write(&tmp_file, &data)
            .await
            .with_context(|| format!("写入 {} 失败", tmp_file.display()))?;
        tokio::fs::rename(&tmp_file, &path).await?;
        debug!("保存 {} 条人脸记录到 {}", corpus.len(), path.display());

        let slot = self.slot(&corpus.collection_id);
        let snapshot = Arc::new(Snapshot::new(corpus));
        slot.replace(Some(snapshot.clone()));
        Ok(snapshot)
    }

    /// 清除相册的内存缓存，下次访问时重新读取文件
    pub fn evict(&self, collection_id: &str) -> bool {
        let slots = self.slots.read().expect("failed to acquire rw lock");
        let evicted = match slots.get(collection_id) {
            Some(slot) => slot.replace(None).is_some(),
            None => false,
        };
        if evicted {
            info!("已清除相册 {} 的缓存", collection_id);
        }
        evicted
    }

    /// 当前缓存中的相册
    pub fn cached(&self) -> Vec<String> {
        let slots = self.slots.read().expect("failed to acquire rw lock");
        let mut ids = slots
            .iter()
            .filter(|(_, slot)| slot.snapshot.read().expect("failed to acquire rw lock").is_some())
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn records() -> Vec<EmbeddingRecord> {
        vec![
            EmbeddingRecord::new("p1", vec![1., 0., 0.], Some([0., 0., 10., 10.])),
            EmbeddingRecord::new("p2", vec![0., 1., 0.], None),
        ]
    }

    #[tokio::test]
    async fn absent_and_empty_are_different() {
        let dir = TempDir::new().unwrap();
        let store = CorpusStore::open(dir.path()).unwrap();
        assert!(store.load("none").await.unwrap().is_none());

        store.save(Corpus::empty("empty")).await.unwrap();
        store.evict("empty");
        let snapshot = store.load("empty").await.unwrap().unwrap();
        assert!(snapshot.corpus().is_empty());
    }

    #[tokio::test]
    async fn load_is_cached() {
        let dir = TempDir::new().unwrap();
        let store = CorpusStore::open(dir.path()).unwrap();
        store.save(Corpus::new("c", records())).await.unwrap();
        store.evict("c");
        assert!(store.get_cached("c").is_none());

        let first = store.load("c").await.unwrap().unwrap();
        assert_eq!(first.corpus().records, records());

        // 删除文件后仍然能从缓存读取
        std::fs::remove_file(store.path("c")).unwrap();
        let second = store.load("c").await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.cached(), vec!["c".to_string()]);
    }

    #[tokio::test]
    async fn save_replaces_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = CorpusStore::open(dir.path()).unwrap();
        let old = store.save(Corpus::new("c", records())).await.unwrap();
        let new = store.save(Corpus::new("c", records()[..1].to_vec())).await.unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        // 旧快照不受影响
        assert_eq!(old.corpus().len(), 2);
        assert_eq!(store.load("c").await.unwrap().unwrap().corpus().len(), 1);
    }

    #[tokio::test]
    async fn stale_read_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let store = CorpusStore::open(dir.path()).unwrap();
        store.save(Corpus::new("c", records())).await.unwrap();
        store.evict("c");

        // 读取旧文件之后、放入缓存之前，另一个写者保存并清除了缓存
        let slot = store.slot("c");
        let generation = slot.generation();
        let stale = store.read_records("c").await.unwrap().unwrap();
        store.save(Corpus::new("c", records()[..1].to_vec())).await.unwrap();
        store.evict("c");

        assert!(slot.publish(generation, Corpus::new("c", stale)).is_none());
        assert!(store.get_cached("c").is_none());
        assert_eq!(store.load("c").await.unwrap().unwrap().corpus().len(), 1);
    }

    #[tokio::test]
    async fn evict_unknown() {
        let dir = TempDir::new().unwrap();
        let store = CorpusStore::open(dir.path()).unwrap();
        assert!(!store.evict("nothing"));
    }
}
