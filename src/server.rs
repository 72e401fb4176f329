use axum::{
    extract::rejection::JsonRejection,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use log::{error, info};
use serde_json::json;

use crate::data::SolveRequest;
use crate::error::TimetableError;
use crate::solver;

impl IntoResponse for TimetableError {
    fn into_response(self) -> Response {
        let status = match &self {
            TimetableError::Input(_) => StatusCode::BAD_REQUEST,
            TimetableError::FeasibilityMismatch { .. }
            | TimetableError::UnmatchedFixedAssignment { .. }
            | TimetableError::FixedConflictsWithUnavailability { .. }
            | TimetableError::UnsynchronizableLab { .. }
            | TimetableError::RoomClash { .. }
            | TimetableError::SolverInfeasible => StatusCode::UNPROCESSABLE_ENTITY,
            TimetableError::SolverInvalidModel(_) | TimetableError::OutputWrite(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            TimetableError::SolverUnknown(_) => StatusCode::GATEWAY_TIMEOUT,
        };
        let body = json!({ "error": self.kind(), "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

async fn solve_handler(payload: Result<Json<SolveRequest>, JsonRejection>) -> Result<Response, TimetableError> {
    let Json(request) = payload.map_err(|rejection| TimetableError::Input(rejection.body_text()))?;
    // the solver blocks for up to its time budget
    let response = tokio::task::spawn_blocking(move || solver::solve(&request))
        .await
        .map_err(|e| {
            error!("Solver task failed: {e}");
            TimetableError::SolverUnknown(format!("solver task failed: {e}"))
        })??;
    let body = serde_json::to_vec(&response).map_err(|e| TimetableError::OutputWrite(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

pub fn app() -> Router {
    Router::new().route("/v1/timetable/solve", post(solve_handler))
}

pub async fn run_server(addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server running at http://{}", listener.local_addr()?);
    axum::serve(listener, app()).await
}
