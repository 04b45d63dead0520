use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use crate::core::sql::{ColumnName, QualifiedColumn, TableName};
use crate::error::BiError;
use crate::models::schema::ColumnInfo;

/// 编译时刻的实时表结构快照。每次编译重新读取，不做跨请求缓存。
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    tables: BTreeMap<String, Vec<ColumnInfo>>,
}

impl SchemaCatalog {
    /// 探测存储引擎里的所有表及其列
    pub async fn load(pool: &SqlitePool) -> Result<Self, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT m.name AS table_name, p.name AS column_name, p.type AS column_type
             FROM sqlite_master m JOIN pragma_table_info(m.name) p
             WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%'
             ORDER BY m.name, p.cid",
        )
        .fetch_all(pool)
        .await?;

        let mut tables: BTreeMap<String, Vec<ColumnInfo>> = BTreeMap::new();
        for row in rows {
            let table: String = row.try_get("table_name")?;
            let column: String = row.try_get("column_name")?;
            let data_type: Option<String> = row.try_get("column_type")?;
            tables.entry(table).or_default().push(ColumnInfo {
                name: column,
                data_type: data_type.unwrap_or_default(),
            });
        }
        Ok(Self { tables })
    }

    #[cfg(test)]
    pub fn from_tables<I, T, C>(tables: I) -> Self
    where
        I: IntoIterator<Item = (T, Vec<C>)>,
        T: Into<String>,
        C: Into<String>,
    {
        let tables = tables
            .into_iter()
            .map(|(t, cols)| {
                let cols = cols
                    .into_iter()
                    .map(|c| ColumnInfo {
                        name: c.into(),
                        data_type: String::new(),
                    })
                    .collect();
                (t.into(), cols)
            })
            .collect();
        Self { tables }
    }

    pub fn list_tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn columns_of(&self, table: &str) -> Option<&[ColumnInfo]> {
        self.tables.get(table).map(Vec::as_slice)
    }

    pub fn contains_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn table(&self, name: &str) -> Result<TableName, BiError> {
        if self.contains_table(name) {
            Ok(TableName::from_catalog(name))
        } else {
            Err(BiError::Validation(format!("Unknown table '{}'.", name)))
        }
    }

    pub fn column(&self, table: &TableName, name: &str) -> Result<QualifiedColumn, BiError> {
        let known = self
            .columns_of(table.as_str())
            .is_some_and(|cols| cols.iter().any(|c| c.name == name));
        if !known {
            return Err(BiError::Validation(format!(
                "Unknown column '{}' in table '{}'.",
                name,
                table.as_str()
            )));
        }
        Ok(QualifiedColumn {
            table: table.clone(),
            column: ColumnName::from_catalog(name),
        })
    }

    /// 表名和列名一起校验
    pub fn qualified(&self, table: &str, column: &str) -> Result<QualifiedColumn, BiError> {
        let table = self.table(table)?;
        self.column(&table, column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::db::test_pool;

    #[test]
    fn validates_tables_and_columns() {
        let catalog = SchemaCatalog::from_tables([("contrato", vec!["estado", "nome_cc"])]);
        assert!(catalog.qualified("contrato", "estado").is_ok());
        assert!(matches!(
            catalog.qualified("contrato", "estado; DROP TABLE x"),
            Err(BiError::Validation(_))
        ));
        assert!(matches!(
            catalog.qualified("\"contrato\"", "estado"),
            Err(BiError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn load_reflects_live_schema() {
        let pool = test_pool().await;
        sqlx::query("CREATE TABLE equipamentos (equipamento TEXT, ano INTEGER)")
            .execute(&pool)
            .await
            .unwrap();

        let catalog = SchemaCatalog::load(&pool).await.unwrap();
        let cols = catalog.columns_of("equipamentos").unwrap();
        assert_eq!(cols[0].name, "equipamento");
        assert_eq!(cols[1].data_type, "INTEGER");
        assert!(catalog.list_tables().any(|t| t == "bi_relationships"));
        assert!(!catalog.list_tables().any(|t| t.starts_with("sqlite_")));

        // 结构变化后重新加载立即可见
        sqlx::query("ALTER TABLE equipamentos ADD COLUMN frota TEXT")
            .execute(&pool)
            .await
            .unwrap();
        let catalog = SchemaCatalog::load(&pool).await.unwrap();
        assert!(catalog.qualified("equipamentos", "frota").is_ok());
    }
}
