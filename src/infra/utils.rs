use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{json, Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

/// SQLite 行转 JSON 对象。
/// SQLite 是动态类型，按单元格的运行时类型解码；声明类型只用来识别布尔和日期。
pub fn sqlite_row_to_json(row: &SqliteRow) -> Value {
    let mut map = Map::new();

    for col in row.columns() {
        let idx = col.ordinal();
        let declared = col.type_info().name().to_ascii_uppercase(); // 建表时的声明类型，表达式列为 "NULL"

        let runtime = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => None,
            Ok(raw) => Some(raw.type_info().name().to_string()),
            Err(_) => None,
        };

        let val = match runtime.as_deref() {
            None => Value::Null,
            Some("INTEGER") if declared == "BOOLEAN" => match row.try_get::<Option<bool>, _>(idx) {
                Ok(v) => json!(v),
                Err(_) => json!(row.try_get::<Option<i64>, _>(idx).unwrap_or(None)),
            },
            Some("INTEGER") => json!(row.try_get::<Option<i64>, _>(idx).unwrap_or(None)),
            Some("REAL") => json!(row.try_get::<Option<f64>, _>(idx).unwrap_or(None)),
            Some("BLOB") => {
                let v: Option<Vec<u8>> = row.try_get(idx).unwrap_or(None);
                json!(v.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
            }
            Some(_) => text_cell(row, idx, &declared),
        };

        map.insert(col.name().to_string(), val);
    }

    Value::Object(map)
}

/// 文本单元格；日期类列尽量规范化，解析不了就原样返回
fn text_cell(row: &SqliteRow, idx: usize, declared: &str) -> Value {
    let normalized = match declared {
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(idx)
            .ok()
            .flatten()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(idx)
            .ok()
            .flatten()
            .map(|d| d.to_string()),
        _ => None,
    };
    match normalized {
        Some(v) => Value::String(v),
        None => json!(row.try_get::<Option<String>, _>(idx).unwrap_or(None)),
    }
}
