//! 查询构建的最小积木：经目录校验的标识符、绑定参数、带参数的 SQL 片段。
//!
//! 任何进入 SQL 文本的表名/列名都必须是 `TableName` / `ColumnName`，
//! 它们只能由 `SchemaCatalog` 构造；用户提供的值一律走 `SqlValue` 绑定。

use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::error::BiError;

/// 双引号标识符，内部的 `"` 需要成对转义
pub fn quote_ident(raw: &str) -> String {
    format!("\"{}\"", raw.replace('"', "\"\""))
}

/// `?, ?, ?`
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableName(String);

impl TableName {
    /// 仅供目录（及测试）使用：调用方必须已确认表存在
    pub(crate) fn from_catalog(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&quote_ident(&self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnName(String);

impl ColumnName {
    pub(crate) fn from_catalog(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ColumnName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&quote_ident(&self.0))
    }
}

/// `"table"."column"`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedColumn {
    pub table: TableName,
    pub column: ColumnName,
}

impl fmt::Display for QualifiedColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// 输出列别名（显示名）。唯一不经目录校验的标识符，只做转义和控制字符拦截。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias(String);

impl Alias {
    pub fn new(raw: &str) -> Result<Self, BiError> {
        if raw.is_empty() || raw.chars().any(char::is_control) {
            return Err(BiError::Validation(format!(
                "invalid display name {:?}",
                raw
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&quote_ident(&self.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Sum,
    Avg,
    Count,
    CountDistinct,
    Min,
    Max,
}

impl AggregateFn {
    pub fn apply(self, column: &QualifiedColumn) -> String {
        match self {
            AggregateFn::Sum => format!("SUM({})", column),
            AggregateFn::Avg => format!("AVG({})", column),
            AggregateFn::Count => format!("COUNT({})", column),
            AggregateFn::CountDistinct => format!("COUNT(DISTINCT {})", column),
            AggregateFn::Min => format!("MIN({})", column),
            AggregateFn::Max => format!("MAX({})", column),
        }
    }
}

/// 列引用：裸列或聚合后的列
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnExpr {
    Bare(QualifiedColumn),
    Aggregate(AggregateFn, QualifiedColumn),
}

impl ColumnExpr {
    pub fn column(&self) -> &QualifiedColumn {
        match self {
            ColumnExpr::Bare(c) | ColumnExpr::Aggregate(_, c) => c,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, ColumnExpr::Aggregate(..))
    }
}

impl fmt::Display for ColumnExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnExpr::Bare(c) => write!(f, "{}", c),
            ColumnExpr::Aggregate(func, c) => f.write_str(&func.apply(c)),
        }
    }
}

/// 位置绑定参数
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    /// JSON 标量直接映射；数组和对象无法绑定
    pub fn from_json(value: &Value) -> Result<Self, BiError> {
        match value {
            Value::Null => Ok(SqlValue::Null),
            Value::Bool(b) => Ok(SqlValue::Bool(*b)),
            Value::Number(n) => Ok(match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
            }),
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            other => Err(BiError::Validation(format!(
                "filter value must be a scalar, got {}",
                other
            ))),
        }
    }

    /// 比较运算先尝试数值化，失败则原样绑定
    pub fn numeric_or_raw(value: &Value) -> Result<Self, BiError> {
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match parsed {
            Some(f) if f.is_finite() => Ok(number(f)),
            _ => Self::from_json(value),
        }
    }
}

fn number(f: f64) -> SqlValue {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        SqlValue::Integer(f as i64)
    } else {
        SqlValue::Real(f)
    }
}

/// 值的文本形式，用于拼 LIKE 模式
pub fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 一段布尔条件及其按出现顺序排列的参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Fragment {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// AND 连接，参数顺序与占位符顺序一致
    pub fn conjunction(parts: impl IntoIterator<Item = Fragment>) -> Fragment {
        let mut sql = Vec::new();
        let mut params = Vec::new();
        for part in parts.into_iter().filter(|p| !p.is_empty()) {
            sql.push(part.sql);
            params.extend(part.params);
        }
        Fragment {
            sql: sql.join(" AND "),
            params,
        }
    }
}
