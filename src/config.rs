use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;

static DATA_DIR: LazyLock<DataDir> = LazyLock::new(|| {
    let proj_dirs =
        ProjectDirs::from("", "facesearch", "facesearch").expect("failed to get project dir");
    DataDir { path: proj_dirs.data_dir().to_path_buf() }
});

fn default_data_dir() -> &'static str {
    DATA_DIR.path().to_str().unwrap()
}

#[derive(Parser, Debug, Clone)]
pub struct PipelineOptions {
    /// 每批处理的图片数量，同一时间只有一批图片在内存中
    #[arg(long, value_name = "SIZE", env = "BATCH_SIZE", default_value_t = 10)]
    pub batch_size: usize,
    /// 提取人脸特征的工作线程数量
    #[arg(long, value_name = "N", env = "MAX_WORKERS", default_value_t = 4)]
    pub workers: usize,
    /// 单张图片的下载超时，单位为秒
    #[arg(long, value_name = "SECONDS", default_value_t = 15)]
    pub fetch_timeout: u64,
}

impl PipelineOptions {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self { batch_size: 10, workers: 4, fetch_timeout: 15 }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 相似度阈值，相似度严格大于该值才视为匹配
    #[arg(long, value_name = "THRESHOLD", default_value_t = 0.4)]
    pub threshold: f32,
    /// 使用索引搜索时，每张人脸最多取回的近邻数量
    #[arg(long, value_name = "K", default_value_t = 100)]
    pub top_k: usize,
    /// 不构建加速索引，始终逐条计算相似度
    #[arg(long)]
    pub brute_force: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { threshold: 0.4, top_k: 100, brute_force: false }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct EmbedderOptions {
    /// 人脸特征提取服务地址
    #[arg(long, value_name = "URL", env = "EMBEDDER_URL", default_value = "http://127.0.0.1:5002/embed")]
    pub embedder_url: String,
    /// 特征提取请求超时，单位为秒
    #[arg(long, value_name = "SECONDS", default_value_t = 60)]
    pub embedder_timeout: u64,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "facesearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 数据目录，保存人脸特征和编码进度
    #[arg(short, long, env = "FACESEARCH_DATA_DIR", default_value = default_data_dir())]
    pub data_dir: DataDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 下载相册图片并提取人脸特征
    Ingest(IngestCommand),
    /// 在相册中搜索人脸
    Search(SearchCommand),
    /// 检测图片中的人脸
    Detect(DetectCommand),
    /// 从相册中删除图片的人脸特征
    Remove(RemoveCommand),
    /// 查看相册编码进度
    Status(StatusCommand),
    /// 启动 HTTP 服务
    Server(ServerCommand),
}

#[derive(Debug, Clone)]
pub struct DataDir {
    path: PathBuf,
}

impl DataDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 人脸特征文件所在目录
    pub fn encodings(&self) -> PathBuf {
        self.path.join("encodings")
    }

    /// 编码进度文件所在目录
    pub fn status(&self) -> PathBuf {
        self.path.join("status")
    }
}

impl FromStr for DataDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

impl From<&Path> for DataDir {
    fn from(path: &Path) -> Self {
        Self { path: path.to_path_buf() }
    }
}
