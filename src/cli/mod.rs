mod detect;
mod ingest;
mod remove;
mod search;
pub mod server;
mod status;

use std::sync::Arc;

pub use detect::*;
pub use ingest::*;
pub use remove::*;
pub use search::*;
pub use server::*;
pub use status::*;

use crate::config::{EmbedderOptions, Opts, PipelineOptions, SearchOptions};
use crate::face::{FaceEmbedder, RemoteEmbedder};
use crate::fetch::HttpFetcher;
use crate::service::FaceService;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 使用 HTTP 下载器和远程特征提取服务创建服务实例
fn open_service(
    opts: &Opts,
    embedder: &EmbedderOptions,
    pipeline: PipelineOptions,
    search: SearchOptions,
) -> anyhow::Result<FaceService> {
    let embedder: Arc<dyn FaceEmbedder> = Arc::new(RemoteEmbedder::new(embedder)?);
    FaceService::new(&opts.data_dir, Arc::new(HttpFetcher::new()?), embedder, pipeline, search)
}
