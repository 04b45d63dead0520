use axum::{extract::State, Json};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::api::parse_body;
use crate::ax_state::AppState;
use crate::core::assembler::{plan_visual, PlanOutcome};
use crate::core::catalog::SchemaCatalog;
use crate::error::BiError;
use crate::infra::db;
use crate::models::visual::{VisualDataRequest, VisualDataResponse};

/// 编译并执行一个可视化组件的查询。
///
/// 表结构和关系图每次请求都重新读取，请求之间不共享编译状态。
#[instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
pub async fn visual_data(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<VisualDataResponse>, BiError> {
    let request: VisualDataRequest = parse_body(body)?;
    let Some(visual) = request.visual else {
        return Err(BiError::Validation("Visual configuration is required.".into()));
    };

    let catalog = SchemaCatalog::load(&state.db).await?;
    let relationships = db::fetch_relationships(&state.db).await?;
    debug!(
        "表结构 {} 张表，关系 {} 条",
        catalog.list_tables().count(),
        relationships.len()
    );

    let plan = match plan_visual(&catalog, &relationships, &visual, &request.page_filters)? {
        PlanOutcome::Empty(reason) => {
            info!("无需查询: {}", reason);
            return Ok(Json(VisualDataResponse {
                data: Vec::new(),
                query: reason.to_string(),
                warnings: Vec::new(),
            }));
        }
        PlanOutcome::Ready(plan) => plan,
    };
    for w in &plan.warnings {
        warn!("{}", w);
    }

    let compiled = plan.to_sql();
    info!(sql = %compiled.sql, params = ?compiled.params, "执行 BI 查询");

    match db::fetch_json(&state.db, &compiled).await {
        Ok(data) => {
            info!("查询完成，返回 {} 行", data.len());
            Ok(Json(VisualDataResponse {
                data,
                query: compiled.sql,
                warnings: plan.warnings,
            }))
        }
        Err(e) => {
            error!(sql = %compiled.sql, params = ?compiled.params, "BI 查询执行失败: {}", e);
            Err(BiError::Execution {
                query: compiled.sql,
                detail: state.config.expose_error_details.then(|| e.to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::api::router;
    use crate::api::test_support::{send, test_state};
    use crate::ax_state::AppState;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::Arc;

    async fn with_tire_relationship() -> Arc<AppState> {
        let state = test_state().await;
        sqlx::query(
            "INSERT INTO bi_relationships (from_table, from_column, to_table, to_column) \
             VALUES ('equipamentos', 'equipamento', 'controle_pneus', 'equipamento')",
        )
        .execute(&state.db)
        .await
        .unwrap();
        state
    }

    #[tokio::test]
    async fn joined_aggregate_with_page_filter() {
        let app = router(with_tire_relationship().await);
        let (status, body) = send(
            &app,
            "POST",
            "/api/bi/visual-data",
            Some(json!({
                "visual": {
                    "xAxis": {"tableName": "equipamentos", "columnName": "equipamento"},
                    "yAxis": [{"tableName": "controle_pneus", "columnName": "medicao", "aggregation": "sum", "displayName": "Total"}],
                    "title": "Sulco por equipamento"
                },
                "pageFilters": [{
                    "tableName": "equipamentos",
                    "columnName": "frota",
                    "filterConfig": {"type": "basica", "selectedValues": ["A"]}
                }]
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["query"],
            "SELECT \"equipamentos\".\"equipamento\" AS \"equipamento\", SUM(\"controle_pneus\".\"medicao\") AS \"Total\" \
             FROM \"equipamentos\" \
             LEFT JOIN \"controle_pneus\" ON \"equipamentos\".\"equipamento\" = \"controle_pneus\".\"equipamento\" \
             WHERE \"equipamentos\".\"frota\" IN (?) \
             GROUP BY \"equipamentos\".\"equipamento\" LIMIT 1000"
        );
        let mut rows = body["data"].as_array().unwrap().clone();
        rows.sort_by_key(|r| r["equipamento"].as_str().unwrap_or_default().to_string());
        assert_eq!(
            rows,
            vec![
                json!({"equipamento": "CB-01", "Total": 24.0}),
                json!({"equipamento": "CB-02", "Total": 7.0}),
            ]
        );
        assert!(body.get("warnings").is_none());
    }

    #[tokio::test]
    async fn top_n_orders_and_limits() {
        let app = router(test_state().await);
        let (status, body) = send(
            &app,
            "POST",
            "/api/bi/visual-data",
            Some(json!({
                "visual": {
                    "rows": [{"tableName": "contrato", "columnName": "estado"}],
                    "values": [{"tableName": "contrato", "columnName": "valor", "aggregation": "sum"}],
                    "filters": [{
                        "tableName": "contrato",
                        "columnName": "valor",
                        "aggregation": "sum",
                        "filterConfig": {"type": "top_n", "topN": {"direction": "superior", "value": 2}}
                    }]
                }
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["query"].as_str().unwrap().ends_with("ORDER BY SUM(\"contrato\".\"valor\") DESC LIMIT ?"));
        assert_eq!(
            body["data"],
            json!([
                {"valor": 130.0, "estado": "SP"},
                {"valor": 50.0, "estado": "RJ"}
            ])
        );
    }

    #[tokio::test]
    async fn unreachable_table_is_reported() {
        let app = router(test_state().await);
        let (status, body) = send(
            &app,
            "POST",
            "/api/bi/visual-data",
            Some(json!({
                "visual": {
                    "xAxis": {"tableName": "equipamentos", "columnName": "frota"},
                    "legend": {"tableName": "contrato", "columnName": "estado"}
                }
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(!body["query"].as_str().unwrap().contains("contrato"));
        assert_eq!(body["warnings"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_visual_answers_without_query() {
        let app = router(test_state().await);
        let (status, body) = send(&app, "POST", "/api/bi/visual-data", Some(json!({"visual": {}}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"data": [], "query": "No tables required."}));
    }

    #[tokio::test]
    async fn missing_visual_or_unknown_column_is_bad_request() {
        let app = router(test_state().await);
        let (status, body) = send(&app, "POST", "/api/bi/visual-data", Some(json!({"pageFilters": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Visual configuration is required.");

        let (status, _) = send(
            &app,
            "POST",
            "/api/bi/visual-data",
            Some(json!({"visual": {"value": {"tableName": "contrato", "columnName": "valor; DROP TABLE contrato"}}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = send(&app, "GET", "/api/bi/column-distinct-values/contrato/estado", None).await;
        assert_eq!(body["values"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn execution_failure_returns_attempted_query() {
        let state = test_state().await;
        // SUM 对整数溢出会直接报错
        sqlx::query("CREATE TABLE odometro (equipamento TEXT, km INTEGER)")
            .execute(&state.db)
            .await
            .unwrap();
        sqlx::query("INSERT INTO odometro VALUES ('CB-01', 9223372036854775807), ('CB-01', 10)")
            .execute(&state.db)
            .await
            .unwrap();
        let app = router(state);

        let (status, body) = send(
            &app,
            "POST",
            "/api/bi/visual-data",
            Some(json!({
                "visual": {"value": {"tableName": "odometro", "columnName": "km", "aggregation": "sum"}}
            })),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["query"],
            "SELECT SUM(\"odometro\".\"km\") AS \"km\" FROM \"odometro\" LIMIT 1000"
        );
        assert_eq!(body["message"], "Database error while executing the query.");
    }
}
