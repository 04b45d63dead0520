use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::api::parse_body;
use crate::ax_state::AppState;
use crate::core::catalog::SchemaCatalog;
use crate::error::BiError;
use crate::infra::db;
use crate::models::schema::{Relationship, SaveRelationshipsRequest};

pub async fn list_relationships(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Relationship>>, BiError> {
    Ok(Json(db::fetch_relationships(&state.db).await?))
}

/// 关系集合整体替换；任一端点不在库里就整批拒绝，什么都不写
pub async fn save_relationships(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, BiError> {
    let payload: SaveRelationshipsRequest = parse_body(body)?;
    let catalog = SchemaCatalog::load(&state.db).await?;
    for rel in &payload.relationships {
        catalog.qualified(&rel.from_table, &rel.from_column)?;
        catalog.qualified(&rel.to_table, &rel.to_column)?;
    }

    db::replace_relationships(&state.db, &payload.relationships)
        .await
        .map_err(BiError::Transaction)?;
    info!("表关系已更新，共 {} 条", payload.relationships.len());
    Ok(Json(json!({ "message": "Relationships saved." })))
}
