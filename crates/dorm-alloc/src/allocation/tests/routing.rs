use super::common::*;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use crate::allocation::router::{progress_handler, task_handler};
use crate::allocation::{
    allocation_router, AllocationService, AllocationStores, EngineSettings, Gender,
    GenderEligibility, InMemoryStore, TaskId,
};

fn reviewed_router() -> (Arc<InMemoryStore>, axum::Router, TaskId) {
    let students = vec![
        night_owl("s-1", Gender::Female),
        early_bird("s-2", Gender::Female),
        night_owl("s-3", Gender::Female),
    ];
    let store = seeded_store(
        students,
        double_rooms(2, GenderEligibility::Mixed),
        vec![config(CONFIG, "cluster")],
    );
    let task_id = seed_completed_task(
        &store,
        "task-a",
        &[("s-1", "room-1-a", 40.0), ("s-2", "room-1-b", 85.0)],
    );
    let router = allocation_router(Arc::new(build_service(&store)));
    (store, router, task_id)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_vec(&body).expect("serialize body"),
        ))
        .expect("request")
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

#[tokio::test]
async fn post_tasks_creates_a_draft() {
    let store = seeded_store(Vec::new(), Vec::new(), vec![config(CONFIG, "greedy")]);
    let router = allocation_router(Arc::new(build_service(&store)));

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/allocation/tasks",
            json!({ "config_id": CONFIG, "name": "Spring intake" }),
        ))
        .await
        .expect("router dispatch");

    assert_status(&response, StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload.get("status"), Some(&json!("draft")));
    assert_eq!(payload.get("name"), Some(&json!("Spring intake")));
    assert!(payload.get("id").and_then(Value::as_str).is_some());
}

#[tokio::test]
async fn post_tasks_with_unknown_config_is_not_found() {
    let store = seeded_store(Vec::new(), Vec::new(), Vec::new());
    let router = allocation_router(Arc::new(build_service(&store)));

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/allocation/tasks",
            json!({ "config_id": "missing", "name": "Nobody" }),
        ))
        .await
        .expect("router dispatch");

    assert_status(&response, StatusCode::NOT_FOUND);
    let payload = read_json_body(response).await;
    assert!(payload.get("error").and_then(Value::as_str).is_some());
}

#[tokio::test]
async fn algorithms_lists_the_catalogue() {
    let store = seeded_store(Vec::new(), Vec::new(), Vec::new());
    let router = allocation_router(Arc::new(build_service(&store)));

    let response = router
        .oneshot(empty_request(
            "GET",
            "/api/v1/allocation/algorithms?population=250",
        ))
        .await
        .expect("router dispatch");

    assert_status(&response, StatusCode::OK);
    let payload = read_json_body(response).await;
    let codes: Vec<&str> = payload
        .as_array()
        .expect("array payload")
        .iter()
        .filter_map(|option| option.get("code").and_then(Value::as_str))
        .collect();
    assert_eq!(codes, vec!["cluster", "annealing", "greedy"]);
}

#[tokio::test]
async fn task_handler_returns_not_found_for_unknown_ids() {
    let store = seeded_store(Vec::new(), Vec::new(), Vec::new());
    let service = Arc::new(build_service(&store));

    let response = task_handler(State(service.clone()), Path("task-missing".to_string())).await;
    assert_status(&response, StatusCode::NOT_FOUND);

    let response = progress_handler(State(service), Path("task-missing".to_string())).await;
    assert_status(&response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn progress_handler_reports_finished_tasks() {
    let (store, _, task_id) = reviewed_router();
    let service = Arc::new(build_service(&store));

    let response = progress_handler(State(service), Path(task_id.0.clone())).await;

    assert_status(&response, StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload.get("percent"), Some(&json!(100)));
    assert_eq!(payload.get("status"), Some(&json!("completed")));
}

#[tokio::test]
async fn executing_a_completed_task_conflicts() {
    let (_, router, task_id) = reviewed_router();

    let response = router
        .oneshot(empty_request(
            "PUT",
            &format!("/api/v1/allocation/tasks/{}/execute", task_id.0),
        ))
        .await
        .expect("router dispatch");

    assert_status(&response, StatusCode::CONFLICT);
}

#[tokio::test]
async fn execute_route_accepts_and_runs_the_task() {
    let store = seeded_store(
        vec![night_owl("s-1", Gender::Male), night_owl("s-2", Gender::Male)],
        double_rooms(1, GenderEligibility::Male),
        vec![config(CONFIG, "greedy")],
    );
    let service = Arc::new(build_service(&store));
    let task = service.create_task(new_task(CONFIG)).expect("create");
    let router = allocation_router(service.clone());

    let response = router
        .oneshot(empty_request(
            "PUT",
            &format!("/api/v1/allocation/tasks/{}/execute", task.id.0),
        ))
        .await
        .expect("router dispatch");

    assert_status(&response, StatusCode::ACCEPTED);
    let finished = service
        .wait_for_completion(&task.id)
        .await
        .expect("wait for task");
    assert_eq!(finished.progress, 100);
}

#[tokio::test]
async fn problem_list_honours_the_threshold_query() {
    let (_, router, task_id) = reviewed_router();

    let default_threshold = router
        .clone()
        .oneshot(empty_request(
            "GET",
            &format!("/api/v1/allocation/tasks/{}/problem-list", task_id.0),
        ))
        .await
        .expect("router dispatch");
    let strict = router
        .oneshot(empty_request(
            "GET",
            &format!(
                "/api/v1/allocation/tasks/{}/problem-list?threshold=90",
                task_id.0
            ),
        ))
        .await
        .expect("router dispatch");

    assert_status(&default_threshold, StatusCode::OK);
    assert_status(&strict, StatusCode::OK);
    let default_rows = read_json_body(default_threshold).await;
    let strict_rows = read_json_body(strict).await;
    assert_eq!(default_rows.as_array().map(Vec::len), Some(1));
    assert_eq!(strict_rows.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn results_route_filters_by_review_status() {
    let (_, router, task_id) = reviewed_router();

    let confirm = router
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/api/v1/allocation/tasks/{}/results/confirm", task_id.0),
            json!({ "result_ids": [result_id(&task_id, 2).0] }),
        ))
        .await
        .expect("router dispatch");
    assert_status(&confirm, StatusCode::OK);

    let response = router
        .oneshot(empty_request(
            "GET",
            &format!(
                "/api/v1/allocation/tasks/{}/results?review_status=pending",
                task_id.0
            ),
        ))
        .await
        .expect("router dispatch");

    assert_status(&response, StatusCode::OK);
    let payload = read_json_body(response).await;
    let rows = payload.as_array().expect("array payload");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("student_id"), Some(&json!("s-1")));
}

#[tokio::test]
async fn confirm_all_reports_the_count() {
    let (_, router, task_id) = reviewed_router();

    let response = router
        .oneshot(empty_request(
            "PUT",
            &format!("/api/v1/allocation/tasks/{}/results/confirm-all", task_id.0),
        ))
        .await
        .expect("router dispatch");

    assert_status(&response, StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload, json!({ "confirmed": 2 }));
}

#[tokio::test]
async fn rejecting_a_confirmed_result_conflicts() {
    let (_, router, task_id) = reviewed_router();
    let ids = json!({ "result_ids": [result_id(&task_id, 1).0] });

    let confirm = router
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/api/v1/allocation/tasks/{}/results/confirm", task_id.0),
            ids.clone(),
        ))
        .await
        .expect("router dispatch");
    let reject = router
        .oneshot(json_request(
            "PUT",
            &format!("/api/v1/allocation/tasks/{}/results/reject", task_id.0),
            json!({ "result_ids": ids["result_ids"], "reason": "late request" }),
        ))
        .await
        .expect("router dispatch");

    assert_status(&confirm, StatusCode::OK);
    assert_status(&reject, StatusCode::CONFLICT);
}

#[tokio::test]
async fn adjusting_onto_an_occupied_bed_reports_the_violation() {
    let (_, router, task_id) = reviewed_router();

    let response = router
        .oneshot(json_request(
            "PUT",
            &format!(
                "/api/v1/allocation/results/{}/adjust",
                result_id(&task_id, 1).0
            ),
            json!({ "bed_id": "room-1-b", "reason": "swap" }),
        ))
        .await
        .expect("router dispatch");

    assert_status(&response, StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload.get("violation"), Some(&json!("capacity_exceeded")));
}

#[tokio::test]
async fn adjust_route_moves_the_student() {
    let (store, router, task_id) = reviewed_router();

    let response = router
        .oneshot(json_request(
            "PUT",
            &format!(
                "/api/v1/allocation/results/{}/adjust",
                result_id(&task_id, 1).0
            ),
            json!({ "bed_id": "room-2-a" }),
        ))
        .await
        .expect("router dispatch");

    assert_status(&response, StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload.get("bed_id"), Some(&json!("room-2-a")));
    assert_eq!(payload.get("adjusted"), Some(&json!(true)));
    assert_eq!(bed_status(&store, "room-1-a"), crate::allocation::BedStatus::Free);
}

#[tokio::test]
async fn repository_outages_surface_as_internal_errors() {
    let store = seeded_store(Vec::new(), Vec::new(), Vec::new());
    let mut stores = AllocationStores::shared(store);
    stores.configs = Arc::new(UnavailableConfigs);
    let service = AllocationService::with_default_strategies(stores, EngineSettings::default());
    let router = allocation_router(Arc::new(service));

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/allocation/tasks",
            json!({ "config_id": CONFIG, "name": "Outage" }),
        ))
        .await
        .expect("router dispatch");

    assert_status(&response, StatusCode::INTERNAL_SERVER_ERROR);
}
