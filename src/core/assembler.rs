//! 查询组装：字段 + JOIN + WHERE/HAVING + Top-N → 一条参数化 SQL。

use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::core::catalog::SchemaCatalog;
use crate::core::filter::{compile_filters, resolve_filter, ResolvedFilter, TopN};
use crate::core::join_path::{JoinClause, RelationshipGraph};
use crate::core::sql::{Alias, ColumnExpr, Fragment, QualifiedColumn, SqlValue, TableName};
use crate::error::BiError;
use crate::models::schema::Relationship;
use crate::models::visual::{FieldSpec, FilterSpec, VisualSpec};

/// 没有 Top-N 时的结果行数上限
pub const DEFAULT_ROW_CAP: u32 = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: ColumnExpr,
    pub alias: Alias,
}

/// 单次请求内的查询计划，用完即弃
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub anchor: TableName,
    pub required_tables: BTreeSet<TableName>,
    pub joins: Vec<JoinClause>,
    pub select: Vec<SelectItem>,
    pub group_by: Vec<QualifiedColumn>,
    pub aggregated: bool,
    pub where_clause: Fragment,
    pub having_clause: Fragment,
    pub top_n: Option<TopN>,
    pub warnings: Vec<String>,
}

/// 拼好的 SQL 与按占位符顺序排列的参数
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

#[derive(Debug)]
pub enum PlanOutcome {
    /// 无需查询，附带诊断信息
    Empty(&'static str),
    Ready(QueryPlan),
}

fn resolve_field(catalog: &SchemaCatalog, field: &FieldSpec) -> Result<SelectItem, BiError> {
    let column = catalog.qualified(&field.table_name, &field.column_name)?;
    let alias = match field.display_name.as_deref() {
        Some(name) if !name.is_empty() => Alias::new(name)?,
        _ => Alias::new(&field.column_name)?,
    };
    let expr = match field.aggregation.and_then(|a| a.function()) {
        Some(func) => ColumnExpr::Aggregate(func, column),
        None => ColumnExpr::Bare(column),
    };
    Ok(SelectItem { expr, alias })
}

/// 校验 visual，推导 JOIN，编译过滤器，产出查询计划
pub fn plan_visual(
    catalog: &SchemaCatalog,
    relationships: &[Relationship],
    visual: &VisualSpec,
    page_filters: &[FilterSpec],
) -> Result<PlanOutcome, BiError> {
    let filter_specs: Vec<&FilterSpec> = page_filters.iter().chain(visual.filters.iter()).collect();
    if visual.data_fields().next().is_none() && filter_specs.is_empty() {
        return Ok(PlanOutcome::Empty("No tables required."));
    }

    // 先整体校验，任何未知标识符都直接拒绝
    let fields = visual
        .data_fields()
        .map(|f| resolve_field(catalog, f))
        .collect::<Result<Vec<_>, _>>()?;
    let mut filters = Vec::new();
    let mut filter_tables = Vec::new();
    for spec in &filter_specs {
        filter_tables.push(catalog.table(&spec.table_name)?);
        if let Some(f) = resolve_filter(catalog, spec)? {
            filters.push(f);
        }
    }

    let Some(anchor) = fields.first().map(|f| f.expr.column().table.clone()) else {
        return Ok(PlanOutcome::Empty("No columns selected."));
    };

    let mut required_tables: BTreeSet<TableName> =
        fields.iter().map(|f| f.expr.column().table.clone()).collect();
    required_tables.extend(filter_tables);

    let (graph, mut warnings) = RelationshipGraph::build(catalog, relationships);
    let path = graph.resolve(&anchor, &required_tables);
    debug!(
        "锚点 {}，需求表 {} 张，JOIN {} 个",
        anchor.as_str(),
        required_tables.len(),
        path.joins.len()
    );

    // 无法连通的表：依赖它的字段和过滤器一并丢弃
    let unreachable: BTreeSet<&TableName> = path.unreachable.iter().collect();
    for table in &unreachable {
        warn!("表 {} 无法与锚点表 {} 连通，相关字段与过滤器已忽略", table.as_str(), anchor.as_str());
        warnings.push(format!(
            "Table '{}' could not be joined to '{}' and was left out.",
            table.as_str(),
            anchor.as_str()
        ));
    }
    let reachable = |c: &QualifiedColumn| !unreachable.contains(&c.table);
    let fields: Vec<SelectItem> = fields.into_iter().filter(|f| reachable(f.expr.column())).collect();
    let filters: Vec<ResolvedFilter> = filters.into_iter().filter(|f| reachable(f.target.column())).collect();

    let compiled = compile_filters(&filters)?;
    warnings.extend(compiled.warnings);

    let aggregated = fields.iter().any(|f| f.expr.is_aggregate());
    let mut group_by: Vec<QualifiedColumn> = Vec::new();
    for field in fields.iter().filter(|f| !f.expr.is_aggregate()) {
        let column = field.expr.column();
        if !group_by.contains(column) {
            group_by.push(column.clone());
        }
    }

    Ok(PlanOutcome::Ready(QueryPlan {
        anchor,
        required_tables,
        joins: path.joins,
        select: fields,
        group_by,
        aggregated,
        where_clause: compiled.where_clause,
        having_clause: compiled.having_clause,
        top_n: compiled.top_n,
        warnings,
    }))
}

impl QueryPlan {
    /// 参数顺序：WHERE 参数、HAVING 参数、最后是 Top-N 的 LIMIT
    pub fn to_sql(&self) -> CompiledQuery {
        let select = self
            .select
            .iter()
            .map(|s| format!("{} AS {}", s.expr, s.alias))
            .collect::<Vec<_>>()
            .join(", ");

        let mut parts = vec![format!("SELECT {}", select), format!("FROM {}", self.anchor)];
        parts.extend(self.joins.iter().map(ToString::to_string));

        let mut params = Vec::new();
        if !self.where_clause.is_empty() {
            parts.push(format!("WHERE {}", self.where_clause.sql));
            params.extend(self.where_clause.params.iter().cloned());
        }
        if self.aggregated && !self.group_by.is_empty() {
            let cols: Vec<String> = self.group_by.iter().map(ToString::to_string).collect();
            parts.push(format!("GROUP BY {}", cols.join(", ")));
        }
        if !self.having_clause.is_empty() {
            parts.push(format!("HAVING {}", self.having_clause.sql));
            params.extend(self.having_clause.params.iter().cloned());
        }

        match &self.top_n {
            Some(top_n) => {
                // 按聚合表达式本身排序，不用别名
                parts.push(format!("ORDER BY {} {} LIMIT ?", top_n.order_by, top_n.sort_keyword()));
                params.push(SqlValue::Integer(top_n.limit));
            }
            None => parts.push(format!("LIMIT {}", DEFAULT_ROW_CAP)),
        }

        CompiledQuery {
            sql: parts.join(" "),
            params,
        }
    }
}
