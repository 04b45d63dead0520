use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::collections::BTreeMap;

/// 用户维护的表间关系：`from_table.from_column = to_table.to_column`
#[derive(Debug, Serialize, Deserialize, FromRow, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub id: i64,
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewRelationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveRelationshipsRequest {
    #[serde(default)]
    pub relationships: Vec<NewRelationship>,
}

/// `bi_tables` 的一行
#[derive(Debug, FromRow)]
pub struct BiTableRow {
    pub id: i64,
    pub table_name: String,
    pub coords: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BiTable {
    pub key: i64,
    pub name: String,
    pub display_name: String,
    pub coords: Option<Value>,
}

impl From<BiTableRow> for BiTable {
    fn from(row: BiTableRow) -> Self {
        let coords = row
            .coords
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());
        Self {
            key: row.id,
            display_name: row.table_name.clone(),
            name: row.table_name,
            coords,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeclaredTable {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveTablesRequest {
    #[serde(default, alias = "tables")]
    pub tabelas: Vec<DeclaredTable>,
}

#[derive(Debug, Deserialize)]
pub struct SavePositionsRequest {
    #[serde(default)]
    pub positions: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

#[derive(Debug, Serialize)]
pub struct TableSchemaResponse {
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Deserialize)]
pub struct DistinctValuesQuery {
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DistinctValuesResponse {
    pub values: Vec<Value>,
}
