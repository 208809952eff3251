use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;
use serde_json::json;

use crate::error::FaceError;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// API错误类型
pub struct AppError(pub anyhow::Error);

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self.0.downcast_ref::<FaceError>() {
            Some(FaceError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            Some(FaceError::CorpusNotReady(_)) => StatusCode::NOT_FOUND,
            Some(FaceError::NoFaceDetected) => StatusCode::BAD_REQUEST,
            Some(FaceError::DimensionMismatch { .. }) => StatusCode::BAD_REQUEST,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("请求处理失败: {:?}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// 请求体无法解析（缺少字段、格式错误）时按参数错误返回
pub fn invalid_request(rejection: impl std::fmt::Display) -> AppError {
    AppError(FaceError::InvalidRequest(rejection.to_string()).into())
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
