use std::sync::Arc;

use crate::service::FaceService;

/// 应用状态
pub struct AppState {
    /// 编码、搜索和状态查询
    pub service: FaceService,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(service: FaceService) -> Arc<Self> {
        Arc::new(AppState { service })
    }
}
