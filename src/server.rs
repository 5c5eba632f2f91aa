//! HTTP boundary (spec §6). One route, `POST /plans/generate`,
//! generalizing the teacher's single `POST /v1/schedule/solve`, plus
//! the ambient `/healthz` probe and a request-logging middleware in
//! the teacher's own `info!`-per-request style.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::config::AppConfig;
use crate::domain::loader::InMemoryRepository;
use crate::domain::rules::RuleOverrides;
use crate::domain::types::{PlanningPeriodId, TenantId, VersionId};
use crate::engine::CpSatEngine;
use crate::error::PlannerError;
use crate::orchestrator::{
    GenerateInput, GenerateResponse, InMemoryBasePlanRepository, InMemoryPlanSink,
    InMemoryRuleProfileRepository, PlannerService, SearchParams,
};

pub type AppState = Arc<PlannerService<CpSatEngine>>;

#[derive(Debug, Deserialize)]
pub struct GenerateQuery {
    pub account_id: TenantId,
    pub planning_period_id: PlanningPeriodId,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub name: String,
    pub rule_profile_id: Option<i64>,
    pub override_rules: Option<RuleOverrides>,
    pub version_id: Option<VersionId>,
    pub comment: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    pub params: SearchParams,
}

async fn generate_handler(
    State(service): State<AppState>,
    Query(query): Query<GenerateQuery>,
    Json(body): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, PlannerError> {
    let input = GenerateInput {
        tenant_id: query.account_id,
        planning_period_id: query.planning_period_id,
        name: body.name,
        rule_profile_id: body.rule_profile_id,
        override_rules: body.override_rules,
        version_id: body.version_id,
        comment: body.comment,
        dry_run: body.dry_run,
        params: body.params,
    };
    let response = tokio::task::spawn_blocking(move || service.generate(input))
        .await
        .map_err(|e| PlannerError::SolverInternal(e.to_string()))??;
    Ok(Json(response))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn log_requests(req: Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(req).await;
    log::info!(
        "request | method={} path={} status={} latency_ms={}",
        method,
        path,
        response.status(),
        start.elapsed().as_millis()
    );
    response
}

pub fn build_router(service: PlannerService<CpSatEngine>) -> Router {
    Router::new()
        .route("/plans/generate", post(generate_handler))
        .route("/healthz", get(healthz))
        .with_state(Arc::new(service))
        .layer(middleware::from_fn(log_requests))
}

/// Wires an in-memory-backed service for the standalone binary. A real
/// deployment constructs `PlannerService` with database-backed
/// repositories instead; this crate ships only the in-memory fakes.
pub async fn run_server() {
    let config = AppConfig::from_env();
    let bind_addr = config.bind_addr.clone();
    let pool_teacher_display_name = config.pool_teacher_display_name.clone();

    let service = PlannerService::<CpSatEngine>::new(
        Box::new(InMemoryRepository::new(pool_teacher_display_name)),
        Box::new(InMemoryRuleProfileRepository::default()),
        Box::new(InMemoryBasePlanRepository::default()),
        Box::new(InMemoryPlanSink::default()),
        config,
    );
    let app = build_router(service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await.unwrap();
    log::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}
