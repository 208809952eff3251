use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use crate::cli::{SubCommandExtend, open_service};
use crate::config::{EmbedderOptions, Opts, PipelineOptions, SearchOptions};

#[derive(Parser, Debug, Clone)]
pub struct DetectCommand {
    #[command(flatten)]
    pub embedder: EmbedderOptions,
    /// 图片路径
    pub image: PathBuf,
}

impl SubCommandExtend for DetectCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let image = tokio::fs::read(&self.image)
            .await
            .with_context(|| format!("读取 {} 失败", self.image.display()))?;
        let service = open_service(
            opts,
            &self.embedder,
            PipelineOptions::default(),
            SearchOptions::default(),
        )?;
        let result = service.detect_faces(image).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        Ok(())
    }
}
