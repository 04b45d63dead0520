//! 表关系图与 JOIN 路径推导。
//!
//! 每条关系是一条无向边（可以双向行走），边上记录等值谓词。
//! 从锚点表做多目标 BFS，找到每张需要的表后沿父链回溯到已连通的表，
//! 按根到叶的顺序生成 LEFT JOIN。

use petgraph::graph::{EdgeIndex, NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use tracing::{debug, warn};

use crate::core::catalog::SchemaCatalog;
use crate::core::sql::{QualifiedColumn, TableName};
use crate::models::schema::Relationship;

/// `left = right`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPredicate {
    pub left: QualifiedColumn,
    pub right: QualifiedColumn,
}

impl JoinPredicate {
    fn mirrored(&self) -> Self {
        Self {
            left: self.right.clone(),
            right: self.left.clone(),
        }
    }
}

impl fmt::Display for JoinPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.left, self.right)
    }
}

/// 结构化的 JOIN 记录，渲染时才变成 SQL 文本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinClause {
    pub table: TableName,
    pub on: JoinPredicate,
}

impl fmt::Display for JoinClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LEFT JOIN {} ON {}", self.table, self.on)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinPath {
    pub joins: Vec<JoinClause>,
    /// 从锚点无法到达的需求表
    pub unreachable: Vec<TableName>,
}

#[derive(Debug, Default)]
pub struct RelationshipGraph {
    graph: UnGraph<TableName, JoinPredicate>,
    nodes: HashMap<TableName, NodeIndex>,
}

impl RelationshipGraph {
    /// 用目录校验过的关系建图；引用已不存在的表/列的关系被跳过并返回说明
    pub fn build(catalog: &SchemaCatalog, relationships: &[Relationship]) -> (Self, Vec<String>) {
        let mut graph = Self::default();
        let mut skipped = Vec::new();
        for rel in relationships {
            let from = catalog.qualified(&rel.from_table, &rel.from_column);
            let to = catalog.qualified(&rel.to_table, &rel.to_column);
            match (from, to) {
                (Ok(left), Ok(right)) => graph.add_edge(JoinPredicate { left, right }),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("跳过失效的表关系 id={}: {}", rel.id, e);
                    skipped.push(format!("Relationship {} ignored: {}", rel.id, e));
                }
            }
        }
        (graph, skipped)
    }

    pub fn add_edge(&mut self, predicate: JoinPredicate) {
        let a = self.node(&predicate.left.table);
        let b = self.node(&predicate.right.table);
        self.graph.add_edge(a, b, predicate);
    }

    fn node(&mut self, table: &TableName) -> NodeIndex {
        if let Some(idx) = self.nodes.get(table) {
            return *idx;
        }
        let idx = self.graph.add_node(table.clone());
        self.nodes.insert(table.clone(), idx);
        idx
    }

    #[cfg(test)]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// 按插入顺序返回 `node` 的邻居及走过去用的谓词（方向已对齐为 node → 邻居）
    fn neighbors(&self, node: NodeIndex) -> Vec<(NodeIndex, JoinPredicate)> {
        let mut edges: Vec<(EdgeIndex, NodeIndex, JoinPredicate)> = self
            .graph
            .edges(node)
            .map(|e| {
                let other = if e.source() == node { e.target() } else { e.source() };
                let weight = e.weight();
                let predicate = if weight.left.table == self.graph[node] {
                    weight.clone()
                } else {
                    weight.mirrored()
                };
                (e.id(), other, predicate)
            })
            .collect();
        edges.sort_by_key(|(id, _, _)| *id);
        edges.into_iter().map(|(_, n, p)| (n, p)).collect()
    }

    /// 多目标 BFS。锚点不在需求集合里时不生成任何 JOIN。
    pub fn resolve(&self, anchor: &TableName, required: &BTreeSet<TableName>) -> JoinPath {
        if !required.contains(anchor) {
            warn!("锚点表 {} 不在需求表集合中，不生成 JOIN", anchor.as_str());
            return JoinPath::default();
        }
        let mut to_reach: BTreeSet<&TableName> = required.iter().filter(|t| *t != anchor).collect();
        if to_reach.is_empty() {
            return JoinPath::default();
        }

        let mut joins = Vec::new();
        if let Some(&start) = self.nodes.get(anchor) {
            let mut connected: HashSet<NodeIndex> = HashSet::from([start]);
            let mut parents: HashMap<NodeIndex, Option<(NodeIndex, JoinPredicate)>> =
                HashMap::from([(start, None)]);
            let mut queue = VecDeque::from([start]);

            while !to_reach.is_empty() {
                let Some(current) = queue.pop_front() else { break };
                for (next, predicate) in self.neighbors(current) {
                    if parents.contains_key(&next) {
                        continue;
                    }
                    parents.insert(next, Some((current, predicate)));
                    queue.push_back(next);

                    if !to_reach.contains(&self.graph[next]) {
                        continue;
                    }
                    // 回溯到已连通的表为止，路径上的表全部标记为已连通
                    let mut chain = Vec::new();
                    let mut step = next;
                    while !connected.contains(&step) {
                        let Some(Some((parent, on))) = parents.get(&step) else { break };
                        chain.push(JoinClause {
                            table: self.graph[step].clone(),
                            on: on.clone(),
                        });
                        connected.insert(step);
                        to_reach.remove(&self.graph[step]);
                        step = *parent;
                    }
                    chain.reverse();
                    debug!("连通 {}，新增 {} 个 JOIN", self.graph[next].as_str(), chain.len());
                    joins.extend(chain);
                }
            }
        }

        let unreachable: Vec<TableName> = to_reach.into_iter().cloned().collect();
        if !unreachable.is_empty() {
            let names: Vec<&str> = unreachable.iter().map(TableName::as_str).collect();
            warn!("无法连通全部需求表，缺少: {:?}", names);
        }
        JoinPath { joins, unreachable }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(name: &str) -> TableName {
        TableName::from_catalog(name)
    }

    fn rel(id: i64, a: &str, ca: &str, b: &str, cb: &str) -> Relationship {
        Relationship {
            id,
            from_table: a.into(),
            from_column: ca.into(),
            to_table: b.into(),
            to_column: cb.into(),
        }
    }

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::from_tables([
            ("equipamentos", vec!["equipamento", "modelo"]),
            ("controle_pneus", vec!["equipamento", "medicao", "pneu"]),
            ("modelos", vec!["modelo", "fabricante"]),
            ("fabricantes", vec!["fabricante"]),
            ("pneus", vec!["pneu"]),
            ("isolada", vec!["id"]),
        ])
    }

    fn required(names: &[&str]) -> BTreeSet<TableName> {
        names.iter().map(|n| t(n)).collect()
    }

    fn rendered(path: &JoinPath) -> Vec<String> {
        path.joins.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn single_edge_join() {
        let (graph, skipped) = RelationshipGraph::build(
            &catalog(),
            &[rel(1, "equipamentos", "equipamento", "controle_pneus", "equipamento")],
        );
        assert!(skipped.is_empty());
        let path = graph.resolve(&t("equipamentos"), &required(&["equipamentos", "controle_pneus"]));
        assert_eq!(
            rendered(&path),
            vec![
                "LEFT JOIN \"controle_pneus\" ON \"equipamentos\".\"equipamento\" = \"controle_pneus\".\"equipamento\""
            ]
        );
        assert!(path.unreachable.is_empty());
    }

    #[test]
    fn edges_are_walkable_in_reverse() {
        let (graph, _) = RelationshipGraph::build(
            &catalog(),
            &[rel(1, "equipamentos", "equipamento", "controle_pneus", "equipamento")],
        );
        let path = graph.resolve(&t("controle_pneus"), &required(&["equipamentos", "controle_pneus"]));
        assert_eq!(
            rendered(&path),
            vec![
                "LEFT JOIN \"equipamentos\" ON \"controle_pneus\".\"equipamento\" = \"equipamentos\".\"equipamento\""
            ]
        );
    }

    #[test]
    fn only_anchor_required_yields_no_joins() {
        let (graph, _) = RelationshipGraph::build(
            &catalog(),
            &[rel(1, "equipamentos", "equipamento", "controle_pneus", "equipamento")],
        );
        assert_eq!(graph.resolve(&t("equipamentos"), &required(&["equipamentos"])), JoinPath::default());
    }

    #[test]
    fn anchor_outside_required_set_yields_no_joins() {
        let (graph, _) = RelationshipGraph::build(
            &catalog(),
            &[rel(1, "equipamentos", "equipamento", "controle_pneus", "equipamento")],
        );
        let path = graph.resolve(&t("equipamentos"), &required(&["controle_pneus", "pneus"]));
        assert!(path.joins.is_empty());
        assert!(path.unreachable.is_empty());
    }

    #[test]
    fn shared_prefix_is_joined_once() {
        // equipamentos - modelos - fabricantes, 两个目标共享 modelos
        let (graph, _) = RelationshipGraph::build(
            &catalog(),
            &[
                rel(1, "equipamentos", "modelo", "modelos", "modelo"),
                rel(2, "modelos", "fabricante", "fabricantes", "fabricante"),
            ],
        );
        let path = graph.resolve(
            &t("equipamentos"),
            &required(&["equipamentos", "modelos", "fabricantes"]),
        );
        assert_eq!(
            rendered(&path),
            vec![
                "LEFT JOIN \"modelos\" ON \"equipamentos\".\"modelo\" = \"modelos\".\"modelo\"",
                "LEFT JOIN \"fabricantes\" ON \"modelos\".\"fabricante\" = \"fabricantes\".\"fabricante\"",
            ]
        );
    }

    #[test]
    fn intermediate_tables_are_joined_root_first() {
        let (graph, _) = RelationshipGraph::build(
            &catalog(),
            &[
                rel(1, "equipamentos", "modelo", "modelos", "modelo"),
                rel(2, "modelos", "fabricante", "fabricantes", "fabricante"),
            ],
        );
        let path = graph.resolve(&t("equipamentos"), &required(&["equipamentos", "fabricantes"]));
        let tables: Vec<&str> = path.joins.iter().map(|j| j.table.as_str()).collect();
        assert_eq!(tables, vec!["modelos", "fabricantes"]);
    }

    #[test]
    fn picks_shortest_path_and_never_joins_a_table_twice() {
        // 两条路到 pneus：直达（1 跳）与经由 controle_pneus（2 跳）
        let (graph, _) = RelationshipGraph::build(
            &catalog(),
            &[
                rel(1, "equipamentos", "equipamento", "controle_pneus", "equipamento"),
                rel(2, "controle_pneus", "pneu", "pneus", "pneu"),
                rel(3, "equipamentos", "equipamento", "pneus", "pneu"),
            ],
        );
        let path = graph.resolve(
            &t("equipamentos"),
            &required(&["equipamentos", "controle_pneus", "pneus"]),
        );
        let tables: Vec<&str> = path.joins.iter().map(|j| j.table.as_str()).collect();
        assert_eq!(tables, vec!["controle_pneus", "pneus"]);
        assert_eq!(
            path.joins[1].on.to_string(),
            "\"equipamentos\".\"equipamento\" = \"pneus\".\"pneu\""
        );
    }

    #[test]
    fn unreachable_tables_are_reported_not_fatal() {
        let (graph, _) = RelationshipGraph::build(
            &catalog(),
            &[rel(1, "equipamentos", "equipamento", "controle_pneus", "equipamento")],
        );
        let path = graph.resolve(
            &t("equipamentos"),
            &required(&["equipamentos", "controle_pneus", "isolada"]),
        );
        assert_eq!(path.joins.len(), 1);
        assert_eq!(path.unreachable, vec![t("isolada")]);
    }

    #[test]
    fn anchor_without_relationships_leaves_everything_unreachable() {
        let graph = RelationshipGraph::default();
        let path = graph.resolve(&t("isolada"), &required(&["isolada", "pneus"]));
        assert!(path.joins.is_empty());
        assert_eq!(path.unreachable, vec![t("pneus")]);
    }

    #[test]
    fn stale_relationships_are_skipped() {
        let (graph, skipped) = RelationshipGraph::build(
            &catalog(),
            &[
                rel(1, "equipamentos", "equipamento", "controle_pneus", "equipamento"),
                rel(2, "equipamentos", "apagada", "pneus", "pneu"),
                rel(3, "tabela_removida", "x", "pneus", "pneu"),
            ],
        );
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(skipped.len(), 2);
    }

    #[test]
    fn parallel_edges_prefer_first_loaded_relationship() {
        let (graph, _) = RelationshipGraph::build(
            &catalog(),
            &[
                rel(1, "controle_pneus", "pneu", "pneus", "pneu"),
                rel(2, "controle_pneus", "medicao", "pneus", "pneu"),
            ],
        );
        let path = graph.resolve(&t("pneus"), &required(&["pneus", "controle_pneus"]));
        assert_eq!(
            rendered(&path),
            vec!["LEFT JOIN \"controle_pneus\" ON \"pneus\".\"pneu\" = \"controle_pneus\".\"pneu\""]
        );
    }
}
