//! Error taxonomy for the planner pipeline.
//!
//! Each variant maps to a stable German-language message (the historical
//! boundary contract) and a fixed HTTP status when surfaced over axum.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("Keine Requirements in der DB – bitte zuerst Bedarf anlegen.")]
    InputMissing,

    #[error("{0}")]
    BasePlanOverflow(String),

    #[error("{0}")]
    ConfigInvalid(String),

    #[error("{0}")]
    AccessForbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Keine Lösung gefunden.")]
    SolverInfeasible,

    #[error("Interner Solver-Fehler: {0}")]
    SolverInternal(String),
}

impl PlannerError {
    fn status(&self) -> StatusCode {
        match self {
            PlannerError::InputMissing => StatusCode::BAD_REQUEST,
            PlannerError::BasePlanOverflow(_) => StatusCode::BAD_REQUEST,
            PlannerError::ConfigInvalid(_) => StatusCode::BAD_REQUEST,
            PlannerError::AccessForbidden(_) => StatusCode::FORBIDDEN,
            PlannerError::NotFound(_) => StatusCode::NOT_FOUND,
            PlannerError::SolverInfeasible => StatusCode::UNPROCESSABLE_ENTITY,
            PlannerError::SolverInternal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for PlannerError {
    fn into_response(self) -> Response {
        let status = self.status();
        log::warn!("request failed | status={} detail={}", status, self);
        let body = axum::Json(ErrorBody {
            detail: self.to_string(),
        });
        (status, body).into_response()
    }
}
