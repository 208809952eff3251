use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rayon::ThreadPool;
use tokio::sync::mpsc::{Receiver, channel};
use tokio::task::{JoinHandle, spawn_blocking};

use super::types::*;
use crate::corpus::EmbeddingRecord;
use crate::error::ItemError;
use crate::face::FaceEmbedder;
use crate::fetch::ImageFetcher;

/// 并发下载一个批次的全部图片
///
/// 每张图片独立超时，下载失败的图片同样会发送到下游，由下游计入失败数量
pub fn task_fetch(
    batch: Vec<PhotoRef>,
    fetcher: Arc<dyn ImageFetcher>,
    timeout: Duration,
    queue_size: usize,
) -> (JoinHandle<()>, Receiver<FetchedImage>) {
    let (tx, rx) = channel(queue_size.max(1));
    let t = tokio::spawn(async move {
        let concurrency = batch.len().max(1);
        futures::stream::iter(batch.into_iter().enumerate())
            .for_each_concurrent(concurrency, |(index, photo)| {
                let tx = &tx;
                let fetcher = &fetcher;
                async move {
                    let result = match photo.url.as_deref().filter(|url| !url.is_empty()) {
                        None => Err(ItemError::Fetch("缺少图片地址".to_string())),
                        Some(url) => {
                            match tokio::time::timeout(timeout, fetcher.fetch(url, timeout)).await {
                                Ok(Ok(data)) => Ok(data),
                                Ok(Err(e)) => Err(ItemError::Fetch(e.to_string())),
                                Err(_) => Err(ItemError::Fetch("下载超时".to_string())),
                            }
                        }
                    };
                    // NOTE: 接收端关闭说明批次已经出错，剩余结果直接丢弃
                    let _ = tx.send(FetchedImage { index, id: photo.id, result }).await;
                }
            })
            .await;
    });
    (t, rx)
}

/// 在线程池中提取人脸特征
///
/// 每次最多取出线程数量的图片，等待计算完成后再取下一批，避免同时持有过多解码后的图片
pub fn task_embed(
    mut lrx: Receiver<FetchedImage>,
    embedder: Arc<dyn FaceEmbedder>,
    pool: Arc<ThreadPool>,
) -> (JoinHandle<()>, Receiver<ItemOutcome>) {
    let workers = pool.current_num_threads().max(1);
    let (tx, rx) = channel(workers);
    let t = spawn_blocking(move || {
        let mut buffer = vec![];
        let tx = &tx;
        let embedder = &embedder;
        while lrx.blocking_recv_many(&mut buffer, workers) != 0 {
            pool.scope(|s| {
                for data in buffer.drain(..) {
                    s.spawn(move |_| {
                        let result = data
                            .result
                            .and_then(|bytes| extract(embedder.as_ref(), &data.id, &bytes));
                        let _ = tx.blocking_send(ItemOutcome {
                            index: data.index,
                            id: data.id,
                            result,
                        });
                    });
                }
            });
        }
    });
    (t, rx)
}

/// 提取一张图片中的所有人脸，没有人脸时返回 `ItemError::NoFace`
pub fn extract(
    embedder: &dyn FaceEmbedder,
    item_id: &str,
    image: &[u8],
) -> Result<Vec<EmbeddingRecord>, ItemError> {
    let faces = embedder.detect(image).map_err(|e| ItemError::Extraction(e.to_string()))?;
    if faces.is_empty() {
        return Err(ItemError::NoFace);
    }
    Ok(faces
        .into_iter()
        .map(|face| EmbeddingRecord::new(item_id, face.embedding, Some(face.bbox)))
        .collect())
}
