use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{BedId, ResultId, TaskId};
use super::error::AllocationError;
use super::orchestrator::NewTask;
use super::repository::RepositoryError;
use super::review::ResultQuery;
use super::service::AllocationService;

type SharedService = Arc<AllocationService>;

/// Router builder exposing the allocation task and review endpoints.
pub fn allocation_router(service: SharedService) -> Router {
    Router::new()
        .route("/api/v1/allocation/algorithms", get(algorithms_handler))
        .route(
            "/api/v1/allocation/tasks",
            post(create_task_handler).get(list_tasks_handler),
        )
        .route("/api/v1/allocation/tasks/:task_id", get(task_handler))
        .route("/api/v1/allocation/tasks/:task_id/preview", post(preview_handler))
        .route("/api/v1/allocation/tasks/:task_id/execute", put(execute_handler))
        .route("/api/v1/allocation/tasks/:task_id/progress", get(progress_handler))
        .route("/api/v1/allocation/tasks/:task_id/cancel", put(cancel_handler))
        .route("/api/v1/allocation/tasks/:task_id/results", get(results_handler))
        .route(
            "/api/v1/allocation/tasks/:task_id/results/confirm",
            put(confirm_handler),
        )
        .route(
            "/api/v1/allocation/tasks/:task_id/results/confirm-all",
            put(confirm_all_handler),
        )
        .route(
            "/api/v1/allocation/tasks/:task_id/results/reject",
            put(reject_handler),
        )
        .route(
            "/api/v1/allocation/tasks/:task_id/problem-list",
            get(problem_list_handler),
        )
        .route(
            "/api/v1/allocation/results/:result_id/adjust",
            put(adjust_handler),
        )
        .with_state(service)
}

/// Maps engine failures onto status codes with a `{"error": ...}` body.
pub(crate) fn error_response(error: AllocationError) -> Response {
    let status = match &error {
        error if error.is_not_found() => StatusCode::NOT_FOUND,
        AllocationError::Constraint(violation) => {
            let payload = json!({
                "error": error.to_string(),
                "violation": violation.kind(),
            });
            return (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response();
        }
        AllocationError::ConfigDisabled(_)
        | AllocationError::UnknownAlgorithm(_)
        | AllocationError::ResultNotInTask(_)
        | AllocationError::PlanRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AllocationError::InvalidTaskTransition { .. }
        | AllocationError::InvalidReviewTransition { .. }
        | AllocationError::ExclusiveConfigBusy(_)
        | AllocationError::Interrupted(_)
        | AllocationError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let payload = json!({
        "error": error.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}

fn respond<T: serde::Serialize>(
    status: StatusCode,
    outcome: Result<T, AllocationError>,
) -> Response {
    match outcome {
        Ok(body) => (status, axum::Json(body)).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PopulationHint {
    #[serde(default = "default_population")]
    population: usize,
}

fn default_population() -> usize {
    1000
}

#[derive(Debug, Deserialize)]
pub(crate) struct ThresholdQuery {
    threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResultSelection {
    result_ids: Vec<ResultId>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AdjustRequest {
    bed_id: BedId,
    #[serde(default)]
    reason: Option<String>,
}

pub(crate) async fn algorithms_handler(
    State(service): State<SharedService>,
    Query(hint): Query<PopulationHint>,
) -> Response {
    let options = service.list_algorithms(hint.population);
    (StatusCode::OK, axum::Json(options)).into_response()
}

pub(crate) async fn create_task_handler(
    State(service): State<SharedService>,
    axum::Json(request): axum::Json<NewTask>,
) -> Response {
    respond(StatusCode::CREATED, service.create_task(request))
}

pub(crate) async fn list_tasks_handler(State(service): State<SharedService>) -> Response {
    respond(StatusCode::OK, service.list_tasks())
}

pub(crate) async fn task_handler(
    State(service): State<SharedService>,
    Path(task_id): Path<String>,
) -> Response {
    respond(StatusCode::OK, service.get_task(&TaskId(task_id)))
}

pub(crate) async fn preview_handler(
    State(service): State<SharedService>,
    Path(task_id): Path<String>,
) -> Response {
    respond(StatusCode::OK, service.preview_task(&TaskId(task_id)).await)
}

pub(crate) async fn execute_handler(
    State(service): State<SharedService>,
    Path(task_id): Path<String>,
) -> Response {
    respond(
        StatusCode::ACCEPTED,
        service.execute_task(&TaskId(task_id)).await,
    )
}

pub(crate) async fn progress_handler(
    State(service): State<SharedService>,
    Path(task_id): Path<String>,
) -> Response {
    respond(StatusCode::OK, service.get_task_progress(&TaskId(task_id)))
}

pub(crate) async fn cancel_handler(
    State(service): State<SharedService>,
    Path(task_id): Path<String>,
) -> Response {
    respond(StatusCode::ACCEPTED, service.cancel_task(&TaskId(task_id)))
}

pub(crate) async fn results_handler(
    State(service): State<SharedService>,
    Path(task_id): Path<String>,
    Query(query): Query<ResultQuery>,
) -> Response {
    respond(StatusCode::OK, service.get_results(&TaskId(task_id), &query))
}

pub(crate) async fn confirm_handler(
    State(service): State<SharedService>,
    Path(task_id): Path<String>,
    axum::Json(selection): axum::Json<ResultSelection>,
) -> Response {
    respond(
        StatusCode::OK,
        service.confirm_results(&TaskId(task_id), &selection.result_ids),
    )
}

pub(crate) async fn confirm_all_handler(
    State(service): State<SharedService>,
    Path(task_id): Path<String>,
) -> Response {
    let outcome = service
        .confirm_all_results(&TaskId(task_id))
        .map(|confirmed| json!({ "confirmed": confirmed }));
    respond(StatusCode::OK, outcome)
}

pub(crate) async fn reject_handler(
    State(service): State<SharedService>,
    Path(task_id): Path<String>,
    axum::Json(selection): axum::Json<ResultSelection>,
) -> Response {
    respond(
        StatusCode::OK,
        service.reject_results(&TaskId(task_id), &selection.result_ids, selection.reason),
    )
}

pub(crate) async fn adjust_handler(
    State(service): State<SharedService>,
    Path(result_id): Path<String>,
    axum::Json(request): axum::Json<AdjustRequest>,
) -> Response {
    respond(
        StatusCode::OK,
        service.adjust_result(&ResultId(result_id), &request.bed_id, request.reason),
    )
}

pub(crate) async fn problem_list_handler(
    State(service): State<SharedService>,
    Path(task_id): Path<String>,
    Query(query): Query<ThresholdQuery>,
) -> Response {
    respond(
        StatusCode::OK,
        service.get_problem_list(&TaskId(task_id), query.threshold),
    )
}
