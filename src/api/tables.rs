use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::api::parse_body;
use crate::ax_state::AppState;
use crate::core::assembler::CompiledQuery;
use crate::core::catalog::SchemaCatalog;
use crate::core::sql::SqlValue;
use crate::error::BiError;
use crate::infra::db;
use crate::models::schema::{
    BiTable, DistinctValuesQuery, DistinctValuesResponse, SavePositionsRequest, SaveTablesRequest,
    TableSchemaResponse,
};

/// 下拉选项的去重值上限
const DISTINCT_VALUES_CAP: u32 = 200;

/// BI 可用表清单（含关系画布坐标）
pub async fn list_tables(State(state): State<Arc<AppState>>) -> Result<Json<Vec<BiTable>>, BiError> {
    let rows = db::fetch_bi_tables(&state.db).await?;
    Ok(Json(rows.into_iter().map(BiTable::from).collect()))
}

/// 整体替换 BI 可用表清单：校验 -> 开启事务 -> 清空 -> 批量插入 -> 提交
pub async fn save_tables(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, BiError> {
    let payload: SaveTablesRequest = parse_body(body)?;
    let catalog = SchemaCatalog::load(&state.db).await?;
    let names = payload
        .tabelas
        .iter()
        .map(|t| catalog.table(&t.name).map(|name| name.as_str().to_string()))
        .collect::<Result<Vec<_>, _>>()?;

    db::replace_bi_tables(&state.db, &names)
        .await
        .map_err(BiError::Transaction)?;
    info!("BI 表清单已更新，共 {} 张", names.len());
    Ok(Json(json!({ "message": "BI data model updated." })))
}

pub async fn save_table_positions(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, BiError> {
    let payload: SavePositionsRequest = parse_body(body)?;
    db::save_table_positions(&state.db, &payload.positions)
        .await
        .map_err(BiError::Transaction)?;
    Ok(Json(json!({ "message": "Positions saved." })))
}

pub async fn table_schema(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
) -> Result<Json<TableSchemaResponse>, BiError> {
    let catalog = SchemaCatalog::load(&state.db).await?;
    let columns = catalog
        .columns_of(&table)
        .ok_or_else(|| BiError::NotFound(format!("Table '{}' not found.", table)))?;
    Ok(Json(TableSchemaResponse {
        columns: columns.to_vec(),
    }))
}

/// 某列的去重值，可选子串过滤，最多 200 个
pub async fn column_distinct_values(
    State(state): State<Arc<AppState>>,
    Path((table, column)): Path<(String, String)>,
    Query(query): Query<DistinctValuesQuery>,
) -> Result<Json<DistinctValuesResponse>, BiError> {
    let catalog = SchemaCatalog::load(&state.db).await?;
    let column = catalog.qualified(&table, &column)?;

    let mut sql = format!("SELECT DISTINCT {} AS \"value\" FROM {}", column.column, column.table);
    let mut params = Vec::new();
    if let Some(search) = query.search.filter(|s| !s.is_empty()) {
        sql.push_str(&format!(" WHERE {} LIKE ?", column.column));
        params.push(SqlValue::Text(format!("%{}%", search)));
    }
    sql.push_str(&format!(" ORDER BY 1 ASC LIMIT {}", DISTINCT_VALUES_CAP));

    let rows = db::fetch_json(&state.db, &CompiledQuery { sql, params }).await?;
    let values = rows
        .into_iter()
        .map(|mut row| row.get_mut("value").map(Value::take).unwrap_or(Value::Null))
        .collect();
    Ok(Json(DistinctValuesResponse { values }))
}
