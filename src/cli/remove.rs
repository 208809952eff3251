use std::collections::HashSet;
use std::sync::Arc;

use anyhow::bail;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::corpus::CorpusStore;
use crate::updater::IncrementalUpdater;

#[derive(Parser, Debug, Clone)]
pub struct RemoveCommand {
    /// 相册 ID
    pub collection_id: String,
    /// 要删除的图片 ID
    #[arg(required = true)]
    pub item_ids: Vec<String>,
}

impl SubCommandExtend for RemoveCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        if self.item_ids.is_empty() {
            bail!("图片 ID 列表为空");
        }
        let store = Arc::new(CorpusStore::open(opts.data_dir.encodings())?);
        let updater = IncrementalUpdater::new(store);
        let item_ids = self.item_ids.iter().cloned().collect::<HashSet<_>>();
        let result = updater.remove(&self.collection_id, &item_ids).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        Ok(())
    }
}
