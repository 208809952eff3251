use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;

/// 下载图片
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("无法创建 HTTP 客户端")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        let response = self.client.get(url).timeout(timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {}", status.as_u16());
        }
        Ok(response.bytes().await?.to_vec())
    }
}
