use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use indicatif::ProgressBar;
use log::info;

use crate::cli::{SubCommandExtend, open_service};
use crate::config::{EmbedderOptions, Opts, PipelineOptions, SearchOptions};
use crate::ingest::PhotoRef;
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct IngestCommand {
    #[command(flatten)]
    pub pipeline: PipelineOptions,
    #[command(flatten)]
    pub embedder: EmbedderOptions,
    /// 相册 ID
    pub collection_id: String,
    /// 图片列表文件，格式为 `[{"id": "...", "url": "..."}]`
    pub photos: PathBuf,
    /// 只编码列表中的图片并追加到已有相册，而不是重新编码整个相册
    #[arg(long)]
    pub incremental: bool,
    /// 不构建加速索引
    #[arg(long)]
    pub brute_force: bool,
}

impl SubCommandExtend for IngestCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let data = tokio::fs::read(&self.photos)
            .await
            .with_context(|| format!("读取 {} 失败", self.photos.display()))?;
        let photos: Vec<PhotoRef> = serde_json::from_slice(&data)
            .with_context(|| format!("解析 {} 失败", self.photos.display()))?;

        let search = SearchOptions { brute_force: self.brute_force, ..Default::default() };
        let service = open_service(opts, &self.embedder, self.pipeline.clone(), search)?;

        let pb = ProgressBar::no_length().with_style(pb_style());
        let result = if self.incremental {
            service.ingest_incremental(&self.collection_id, photos, &pb).await?
        } else {
            service.ingest_full(&self.collection_id, photos, &pb).await?
        };
        pb.finish_and_clear();

        info!(
            "成功 {} 张，失败 {} 张，新增 {} 张人脸，共 {} 张",
            result.processed, result.failed, result.faces_added, result.total_faces
        );
        println!("{}", serde_json::to_string_pretty(&result)?);
        Ok(())
    }
}
