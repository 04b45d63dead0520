use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::info;

use crate::config::AppConfig;
use crate::core::assembler::CompiledQuery;
use crate::core::sql::SqlValue;
use crate::infra::utils::sqlite_row_to_json;
use crate::models::schema::{BiTableRow, NewRelationship, Relationship};

const BOOTSTRAP: [&str; 2] = [
    "CREATE TABLE IF NOT EXISTS bi_tables (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        table_name TEXT NOT NULL UNIQUE,
        coords TEXT
    )",
    "CREATE TABLE IF NOT EXISTS bi_relationships (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_table TEXT NOT NULL,
        from_column TEXT NOT NULL,
        to_table TEXT NOT NULL,
        to_column TEXT NOT NULL
    )",
];

pub async fn init_db(config: &AppConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;
    bootstrap(&pool).await?;
    info!("数据库连接池已就绪 (max_connections={})", config.max_connections);
    Ok(pool)
}

/// 建立 BI 元数据表（幂等）
pub async fn bootstrap(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for ddl in BOOTSTRAP {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

pub async fn fetch_relationships(pool: &SqlitePool) -> Result<Vec<Relationship>, sqlx::Error> {
    sqlx::query_as::<_, Relationship>(
        "SELECT id, from_table, from_column, to_table, to_column FROM bi_relationships ORDER BY id",
    )
    .fetch_all(pool)
    .await
}

/// 整体替换关系集合：删除全部 + 批量插入，同一事务内完成
pub async fn replace_relationships(
    pool: &SqlitePool,
    relationships: &[NewRelationship],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM bi_relationships").execute(&mut *tx).await?;
    for rel in relationships {
        sqlx::query(
            "INSERT INTO bi_relationships (from_table, from_column, to_table, to_column) VALUES (?, ?, ?, ?)",
        )
        .bind(&rel.from_table)
        .bind(&rel.from_column)
        .bind(&rel.to_table)
        .bind(&rel.to_column)
        .execute(&mut *tx)
        .await?;
    }
    // 出错时 tx 被丢弃即回滚
    tx.commit().await
}

pub async fn fetch_bi_tables(pool: &SqlitePool) -> Result<Vec<BiTableRow>, sqlx::Error> {
    sqlx::query_as::<_, BiTableRow>("SELECT id, table_name, coords FROM bi_tables ORDER BY table_name ASC")
        .fetch_all(pool)
        .await
}

/// 替换 BI 可用表清单
pub async fn replace_bi_tables(pool: &SqlitePool, names: &[String]) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM bi_tables").execute(&mut *tx).await?;
    for name in names {
        sqlx::query("INSERT INTO bi_tables (table_name) VALUES (?)")
            .bind(name)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await
}

pub async fn save_table_positions(
    pool: &SqlitePool,
    positions: &BTreeMap<String, Value>,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for (table, coords) in positions {
        sqlx::query("UPDATE bi_tables SET coords = ? WHERE table_name = ?")
            .bind(coords.to_string())
            .bind(table)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Integer(i) => query.bind(*i),
        SqlValue::Real(f) => query.bind(*f),
        SqlValue::Text(s) => query.bind(s.clone()),
    }
}

/// 按位置绑定全部参数执行，每行转成 JSON 对象
pub async fn fetch_json(pool: &SqlitePool, compiled: &CompiledQuery) -> Result<Vec<Value>, sqlx::Error> {
    let query = compiled
        .params
        .iter()
        .fold(sqlx::query(&compiled.sql), bind_value);
    let rows = query.fetch_all(pool).await?;
    Ok(rows.iter().map(sqlite_row_to_json).collect())
}

/// 单连接内存库：连接一旦回收数据就没了，所以关掉空闲回收
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    bootstrap(&pool).await.unwrap();
    pool
}
