use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// BI 接口对外的错误分类
#[derive(Debug, Error)]
pub enum BiError {
    /// 未知表/列、缺少 visual、过滤器结构不合法：不会发出任何查询
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// 存储引擎拒绝了拼装好的 SQL；`detail` 只在允许暴露错误细节时填写
    #[error("query execution failed")]
    Execution {
        query: String,
        detail: Option<String>,
    },

    /// 批量替换失败，事务已整体回滚
    #[error("transaction rolled back: {0}")]
    Transaction(#[source] sqlx::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl BiError {
    pub fn status(&self) -> StatusCode {
        match self {
            BiError::Validation(_) => StatusCode::BAD_REQUEST,
            BiError::NotFound(_) => StatusCode::NOT_FOUND,
            BiError::Execution { .. } | BiError::Transaction(_) | BiError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for BiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            BiError::Validation(msg) | BiError::NotFound(msg) => json!({ "message": msg }),
            BiError::Execution { query, detail } => {
                let message = match detail {
                    Some(d) => format!("Database error while executing the query: {}", d),
                    None => "Database error while executing the query.".to_string(),
                };
                json!({ "message": message, "query": query })
            }
            BiError::Transaction(e) => {
                error!("事务回滚: {}", e);
                json!({ "message": "Database error, no changes were applied." })
            }
            BiError::Database(e) => {
                error!("数据库错误: {}", e);
                json!({ "message": "Database error." })
            }
        };
        (status, Json(body)).into_response()
    }
}
