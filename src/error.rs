use thiserror::Error;

/// 请求级错误，会直接返回给调用者
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FaceError {
    /// 缺少必要字段或字段不合法
    #[error("请求参数错误: {0}")]
    InvalidRequest(String),
    /// 相册还没有完成编码
    #[error("相册 {0} 尚未处理，请先同步相册")]
    CorpusNotReady(String),
    /// 查询图片中没有检测到人脸
    #[error("图片中没有检测到人脸")]
    NoFaceDetected,
    /// 查询向量与语料库维度不一致
    #[error("向量维度不一致: 期望 {expected}，实际 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// 单张图片的处理失败，只计入失败数量，不会中断批次
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ItemError {
    #[error("下载失败: {0}")]
    Fetch(String),
    #[error("没有检测到人脸")]
    NoFace,
    #[error("特征提取失败: {0}")]
    Extraction(String),
}
