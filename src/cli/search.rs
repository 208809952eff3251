use std::convert::Infallible;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use crate::cli::{SubCommandExtend, open_service};
use crate::config::{EmbedderOptions, Opts, PipelineOptions, SearchOptions};
use crate::search::SearchResult;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub search: SearchOptions,
    #[command(flatten)]
    pub embedder: EmbedderOptions,
    /// 相册 ID
    pub collection_id: String,
    /// 被搜索的图片路径
    pub image: PathBuf,
    /// 使用图片中的全部人脸搜索，而不是只用最大的一张
    #[arg(long)]
    pub all_faces: bool,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let image = tokio::fs::read(&self.image)
            .await
            .with_context(|| format!("读取 {} 失败", self.image.display()))?;

        let service =
            open_service(opts, &self.embedder, PipelineOptions::default(), self.search.clone())?;
        let result = service
            .search(&self.collection_id, image, Some(self.search.threshold), self.all_faces)
            .await?;

        print_result(&result, self)
    }
}

fn print_result(result: &SearchResult, opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for detail in &result.match_details {
                println!("{:.3}\t{}", detail.similarity, detail.item_id);
            }
            println!(
                "# faces: {}, max: {:.3}, method: {}, time: {:.3}s",
                result.faces_detected, result.max_similarity, result.search_method, result.elapsed
            );
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone)]
pub enum OutputFormat {
    Json,
    Table,
}

impl FromStr for OutputFormat {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            _ => Ok(Self::Table),
        }
    }
}
