pub mod relationships;
pub mod tables;
pub mod visual;

use axum::{
    routing::{get, post},
    Router,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::ax_state::AppState;
use crate::error::BiError;

pub fn router(state: Arc<AppState>) -> Router {
    let bi = Router::new()
        .route("/tables", get(tables::list_tables).post(tables::save_tables))
        .route("/tables/positions", post(tables::save_table_positions))
        .route("/table-schema/{table}", get(tables::table_schema))
        .route(
            "/column-distinct-values/{table}/{column}",
            get(tables::column_distinct_values),
        )
        .route(
            "/relationships",
            get(relationships::list_relationships).post(relationships::save_relationships),
        )
        .route("/visual-data", post(visual::visual_data));

    Router::new().nest("/api/bi", bi).with_state(state)
}

/// 请求体结构不合法统一按 400 返回（axum 默认是 422）
pub(crate) fn parse_body<T: DeserializeOwned>(body: Value) -> Result<T, BiError> {
    serde_json::from_value(body).map_err(|e| BiError::Validation(format!("Malformed request body: {}", e)))
}
