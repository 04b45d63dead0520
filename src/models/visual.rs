//! `/visual-data` 请求体：可视化组件的字段选择与过滤器。
//!
//! 前端会在字段和过滤器上挂很多 UI 状态（id、标签、isImplicit…），这里一律忽略；
//! 只有带 `tableName` 的对象才算字段/过滤器。

use serde::de::{DeserializeOwned, Deserializer, Error as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::sql::AggregateFn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Aggregation {
    #[default]
    #[serde(alias = "")]
    None,
    Sum,
    Average,
    Count,
    #[serde(alias = "countd")]
    CountDistinct,
    Min,
    Max,
    /// 与 min 等价：按存储值取最小，不是时间意义上的“第一个”
    First,
    /// 与 max 等价
    Last,
}

impl Aggregation {
    pub fn function(self) -> Option<AggregateFn> {
        match self {
            Aggregation::None => None,
            Aggregation::Sum => Some(AggregateFn::Sum),
            Aggregation::Average => Some(AggregateFn::Avg),
            Aggregation::Count => Some(AggregateFn::Count),
            Aggregation::CountDistinct => Some(AggregateFn::CountDistinct),
            Aggregation::Min | Aggregation::First => Some(AggregateFn::Min),
            Aggregation::Max | Aggregation::Last => Some(AggregateFn::Max),
        }
    }
}

/// 图表选中的一个输出列
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub table_name: String,
    pub column_name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub aggregation: Option<Aggregation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    pub table_name: String,
    #[serde(default)]
    pub column_name: Option<String>,
    /// 聚合过滤器的 columnName 是展示标签，真实列名在这里
    #[serde(default)]
    pub original_column: Option<String>,
    #[serde(default)]
    pub is_aggregated: Option<bool>,
    #[serde(default)]
    pub aggregation: Option<Aggregation>,
    #[serde(default)]
    pub filter_config: Option<FilterConfig>,
}

impl FilterSpec {
    pub fn aggregated(&self) -> bool {
        self.is_aggregated.unwrap_or(false)
    }

    pub fn is_top_n(&self) -> bool {
        matches!(self.filter_config, Some(FilterConfig::TopN { .. }))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum FilterConfig {
    #[serde(rename = "basic", alias = "basica")]
    Basic {
        #[serde(default, rename = "selectedValues")]
        selected_values: Vec<Value>,
    },
    #[serde(rename = "advanced", alias = "avancada")]
    Advanced {
        #[serde(default, rename = "advancedFilters")]
        advanced_filters: Vec<AdvancedCondition>,
    },
    #[serde(rename = "topN", alias = "top_n")]
    TopN {
        #[serde(default, rename = "topN")]
        top_n: TopNConfig,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AdvancedCondition {
    pub condition: Condition,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Condition {
    #[serde(rename = "contains", alias = "contem")]
    Contains,
    #[serde(rename = "notContains", alias = "nao_contem")]
    NotContains,
    #[serde(rename = "equals", alias = "igual")]
    Equals,
    #[serde(rename = "notEquals", alias = "diferente")]
    NotEquals,
    #[serde(rename = "isNull", alias = "nulo")]
    IsNull,
    #[serde(rename = "isNotNull", alias = "nao_nulo")]
    IsNotNull,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<=")]
    LessOrEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Superior,
    Inferior,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopNConfig {
    #[serde(default)]
    pub direction: Direction,
    /// 数字或数字字符串
    #[serde(default = "default_top_n")]
    pub value: Value,
}

impl Default for TopNConfig {
    fn default() -> Self {
        Self {
            direction: Direction::default(),
            value: default_top_n(),
        }
    }
}

fn default_top_n() -> Value {
    Value::from(10)
}

/// 可视化组件配置。各数据槽位可以是单个字段、字段数组，或者与查询无关的 UI 状态
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualSpec {
    #[serde(default, deserialize_with = "field_slot")]
    pub value: Vec<FieldSpec>,
    #[serde(default, deserialize_with = "field_slot")]
    pub values: Vec<FieldSpec>,
    #[serde(default, deserialize_with = "field_slot")]
    pub x_axis: Vec<FieldSpec>,
    #[serde(default, deserialize_with = "field_slot")]
    pub y_axis: Vec<FieldSpec>,
    #[serde(default, deserialize_with = "field_slot")]
    pub legend: Vec<FieldSpec>,
    #[serde(default, deserialize_with = "field_slot")]
    pub min_value: Vec<FieldSpec>,
    #[serde(default, deserialize_with = "field_slot")]
    pub max_value: Vec<FieldSpec>,
    #[serde(default, deserialize_with = "field_slot")]
    pub columns: Vec<FieldSpec>,
    #[serde(default, deserialize_with = "field_slot")]
    pub rows: Vec<FieldSpec>,
    #[serde(default, deserialize_with = "field_slot")]
    pub column_values: Vec<FieldSpec>,
    #[serde(default, deserialize_with = "filter_list")]
    pub filters: Vec<FilterSpec>,
}

impl VisualSpec {
    /// 固定槽位顺序，决定 SELECT 列顺序和锚点表
    pub fn data_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        [
            &self.value,
            &self.values,
            &self.x_axis,
            &self.y_axis,
            &self.legend,
            &self.min_value,
            &self.max_value,
            &self.columns,
            &self.rows,
            &self.column_values,
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualDataRequest {
    #[serde(default)]
    pub visual: Option<VisualSpec>,
    #[serde(default, deserialize_with = "filter_list")]
    pub page_filters: Vec<FilterSpec>,
}

#[derive(Debug, Serialize)]
pub struct VisualDataResponse {
    pub data: Vec<Value>,
    pub query: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

fn field_slot<'de, D>(deserializer: D) -> Result<Vec<FieldSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    let items = match raw {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => Vec::new(),
    };
    table_bound(items).map_err(D::Error::custom)
}

fn filter_list<'de, D>(deserializer: D) -> Result<Vec<FilterSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => table_bound(items).map_err(D::Error::custom),
        _ => Ok(Vec::new()),
    }
}

fn table_bound<T: DeserializeOwned>(items: Vec<Value>) -> Result<Vec<T>, serde_json::Error> {
    items
        .into_iter()
        .filter(|item| item.get("tableName").is_some_and(|t| !t.is_null()))
        .map(serde_json::from_value)
        .collect()
}
