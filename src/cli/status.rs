use std::sync::Arc;

use anyhow::bail;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::corpus::CorpusStore;
use crate::status::StatusTracker;
use crate::utils::is_valid_collection_id;

#[derive(Parser, Debug, Clone)]
pub struct StatusCommand {
    /// 相册 ID
    pub collection_id: String,
}

impl SubCommandExtend for StatusCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        if !is_valid_collection_id(&self.collection_id) {
            bail!("相册 ID 不合法: {:?}", self.collection_id);
        }
        let store = Arc::new(CorpusStore::open(opts.data_dir.encodings())?);
        let tracker = StatusTracker::open(opts.data_dir.status(), store)?;
        let status = tracker.get(&self.collection_id).await?;
        println!("{}", serde_json::to_string_pretty(&status)?);
        Ok(())
    }
}
