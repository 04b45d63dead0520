use tracing::warn;

use crate::core::catalog::SchemaCatalog;
use crate::core::sql::{placeholders, text_of, AggregateFn, ColumnExpr, Fragment, SqlValue};
use crate::error::BiError;
use crate::models::visual::{AdvancedCondition, Condition, Direction, FilterConfig, FilterSpec};

/// 经目录校验后的过滤器
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFilter {
    pub target: ColumnExpr,
    pub kind: FilterKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterKind {
    Basic(Vec<SqlValue>),
    Advanced(Vec<AdvancedCondition>),
    TopN(TopN),
}

/// Top-N 不是谓词：它改写整条查询的 ORDER BY / LIMIT
#[derive(Debug, Clone, PartialEq)]
pub struct TopN {
    pub order_by: ColumnExpr,
    pub direction: Direction,
    pub limit: i64,
}

impl TopN {
    pub fn sort_keyword(&self) -> &'static str {
        match self.direction {
            Direction::Superior => "DESC",
            Direction::Inferior => "ASC",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledFilters {
    pub where_clause: Fragment,
    pub having_clause: Fragment,
    pub top_n: Option<TopN>,
    pub warnings: Vec<String>,
}

impl ResolvedFilter {
    pub fn is_aggregated(&self) -> bool {
        self.target.is_aggregate()
    }
}

/// 校验并解析一个过滤器；没有 filterConfig 的过滤器不产生任何效果，返回 None
pub fn resolve_filter(catalog: &SchemaCatalog, spec: &FilterSpec) -> Result<Option<ResolvedFilter>, BiError> {
    let Some(config) = &spec.filter_config else {
        return Ok(None);
    };

    let candidates = if spec.aggregated() || spec.is_top_n() {
        [&spec.original_column, &spec.column_name]
    } else {
        [&spec.column_name, &spec.original_column]
    };
    let column_name = candidates.into_iter().flatten().next().ok_or_else(|| {
        BiError::Validation(format!(
            "Filter on table '{}' has no column.",
            spec.table_name
        ))
    })?;
    let column = catalog.qualified(&spec.table_name, column_name)?;

    // 聚合过滤器和 Top-N 缺省按 COUNT 聚合
    let aggregate = || {
        let func = spec
            .aggregation
            .and_then(|a| a.function())
            .unwrap_or(AggregateFn::Count);
        ColumnExpr::Aggregate(func, column.clone())
    };

    let resolved = match config {
        FilterConfig::TopN { top_n } => ResolvedFilter {
            target: aggregate(),
            kind: FilterKind::TopN(TopN {
                order_by: aggregate(),
                direction: top_n.direction,
                limit: parse_limit(&top_n.value)?,
            }),
        },
        FilterConfig::Basic { selected_values } => ResolvedFilter {
            target: if spec.aggregated() { aggregate() } else { ColumnExpr::Bare(column.clone()) },
            kind: FilterKind::Basic(
                selected_values
                    .iter()
                    .map(SqlValue::from_json)
                    .collect::<Result<_, _>>()?,
            ),
        },
        FilterConfig::Advanced { advanced_filters } => ResolvedFilter {
            target: if spec.aggregated() { aggregate() } else { ColumnExpr::Bare(column.clone()) },
            kind: FilterKind::Advanced(advanced_filters.clone()),
        },
    };
    Ok(Some(resolved))
}

fn parse_limit(value: &serde_json::Value) -> Result<i64, BiError> {
    let limit = match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match limit {
        Some(n) if n >= 0 => Ok(n),
        _ => Err(BiError::Validation(format!("Invalid top N value {}.", value))),
    }
}

/// 编译全部过滤器：非聚合进 WHERE，聚合进 HAVING，第一个 Top-N 交给组装器
pub fn compile_filters(filters: &[ResolvedFilter]) -> Result<CompiledFilters, BiError> {
    let mut where_parts = Vec::new();
    let mut having_parts = Vec::new();
    let mut top_n: Option<TopN> = None;
    let mut warnings = Vec::new();

    for filter in filters {
        match &filter.kind {
            FilterKind::TopN(t) => {
                if top_n.is_some() {
                    warn!("同一查询出现多个 Top-N 过滤器，忽略: {}", t.order_by);
                    warnings.push(format!("Extra top N filter on {} ignored.", t.order_by));
                } else {
                    top_n = Some(t.clone());
                }
            }
            kind => {
                let fragment = compile_predicate(&filter.target, kind)?;
                if filter.is_aggregated() {
                    having_parts.push(fragment);
                } else {
                    where_parts.push(fragment);
                }
            }
        }
    }

    Ok(CompiledFilters {
        where_clause: Fragment::conjunction(where_parts),
        having_clause: Fragment::conjunction(having_parts),
        top_n,
        warnings,
    })
}

fn compile_predicate(target: &ColumnExpr, kind: &FilterKind) -> Result<Fragment, BiError> {
    match kind {
        FilterKind::Basic(values) if values.is_empty() => Ok(Fragment::default()),
        FilterKind::Basic(values) => Ok(Fragment::new(
            format!("{} IN ({})", target, placeholders(values.len())),
            values.clone(),
        )),
        FilterKind::Advanced(conditions) => {
            let parts = conditions
                .iter()
                .map(|c| compile_condition(target, c))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Fragment::conjunction(parts))
        }
        FilterKind::TopN(_) => Ok(Fragment::default()),
    }
}

fn compile_condition(target: &ColumnExpr, cond: &AdvancedCondition) -> Result<Fragment, BiError> {
    let like = || SqlValue::Text(format!("%{}%", text_of(&cond.value)));
    let numeric = || SqlValue::numeric_or_raw(&cond.value);

    let fragment = match cond.condition {
        Condition::Contains => Fragment::new(format!("{} LIKE ?", target), vec![like()]),
        Condition::NotContains => Fragment::new(
            format!("({0} NOT LIKE ? OR {0} IS NULL)", target),
            vec![like()],
        ),
        Condition::Equals => Fragment::new(format!("{} = ?", target), vec![numeric()?]),
        Condition::NotEquals => Fragment::new(
            format!("({0} != ? OR {0} IS NULL)", target),
            vec![numeric()?],
        ),
        Condition::IsNull => Fragment::new(format!("{} IS NULL", target), Vec::new()),
        Condition::IsNotNull => Fragment::new(format!("{} IS NOT NULL", target), Vec::new()),
        Condition::Greater => Fragment::new(format!("{} > ?", target), vec![numeric()?]),
        Condition::Less => Fragment::new(format!("{} < ?", target), vec![numeric()?]),
        Condition::GreaterOrEqual => Fragment::new(format!("{} >= ?", target), vec![numeric()?]),
        Condition::LessOrEqual => Fragment::new(format!("{} <= ?", target), vec![numeric()?]),
    };
    Ok(fragment)
}
