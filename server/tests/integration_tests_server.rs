use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use common::{Task, TaskStats};
use http_body_util::BodyExt; // For `collect`
use serde_json::{Value, json};
use server::AppState;
use server::database::{SqliteTaskStore, create_schema};
use server::routes::create_router;
use server::store::TaskStore;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tower::ServiceExt; // For `oneshot`

/// Helper function to set up a fresh, in-memory database for each test.
/// A single connection keeps every request on the same in-memory database.
async fn setup_test_db_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to connect to in-memory SQLite");

    create_schema(&pool)
        .await
        .expect("Failed to create tasks table in test DB");

    pool
}

async fn setup_app(evaluate_on_list: bool) -> (Router, SqliteTaskStore) {
    let store = SqliteTaskStore::new(setup_test_db_pool().await);
    let app = create_router(AppState::new(store.clone(), evaluate_on_list));
    (app, store)
}

fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_create_and_list_tasks() {
    let (app, _) = setup_app(false).await;

    let create_payload = json!({
        "title": "Count the safe",
        "description": "End of day",
        "priority": "urgent",
        "tags": ["cash", "closing"],
        "due_date": Utc::now().to_rfc3339()
    });
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/tasks", &create_payload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let created_task: Task = body_json(response).await;
    assert_eq!(created_task.title, "Count the safe");
    assert_eq!(created_task.tags.len(), 2);

    let response = app.oneshot(empty_request("GET", "/api/tasks")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let tasks: Vec<Task> = body_json(response).await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, created_task.id);
}

#[tokio::test]
async fn test_list_filters() {
    let (app, _) = setup_app(false).await;
    for (title, priority) in [("Mop floor", "low"), ("Fix till", "urgent")] {
        let payload = json!({
            "title": title,
            "priority": priority,
            "due_date": Utc::now().to_rfc3339()
        });
        app.clone()
            .oneshot(json_request("POST", "/api/tasks", &payload))
            .await
            .unwrap();
    }

    let response = app
        .oneshot(empty_request("GET", "/api/tasks?priority=urgent&completed=false"))
        .await
        .unwrap();

    let tasks: Vec<Task> = body_json(response).await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Fix till");
}

#[tokio::test]
async fn test_create_task_rejects_invalid_payloads() {
    let (app, _) = setup_app(false).await;

    let empty_title = json!({ "title": "", "due_date": Utc::now().to_rfc3339() });
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/tasks", &empty_title))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error_response: Value = body_json(response).await;
    assert_eq!(error_response["error"], "Task title cannot be empty.");

    let zero_interval = json!({
        "title": "Restock napkins",
        "due_date": Utc::now().to_rfc3339(),
        "recurring": { "type": "weekly", "interval": 0 }
    });
    let response = app
        .oneshot(json_request("POST", "/api/tasks", &zero_interval))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_task() {
    let (app, _) = setup_app(false).await;
    let payload = json!({ "title": "A task to be deleted", "due_date": Utc::now().to_rfc3339() });
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/tasks", &payload))
        .await
        .unwrap();
    let created_task: Task = body_json(response).await;

    let uri = format!("/api/tasks/{}", created_task.id);
    let response = app.clone().oneshot(empty_request("DELETE", &uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.clone().oneshot(empty_request("DELETE", &uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.oneshot(empty_request("GET", "/api/tasks")).await.unwrap();
    let tasks: Vec<Task> = body_json(response).await;
    assert!(tasks.is_empty());
}

#[tokio::test]
async fn test_completion_round_trip() {
    let (app, _) = setup_app(false).await;
    let payload = json!({
        "title": "Reconcile card terminal",
        "due_date": Utc::now().to_rfc3339()
    });
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/tasks", &payload))
        .await
        .unwrap();
    let created_task: Task = body_json(response).await;
    let uri = format!("/api/tasks/{}/completion", created_task.id);

    let response = app
        .clone()
        .oneshot(json_request("PATCH", &uri, &json!({ "completed": true })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let done: Task = body_json(response).await;
    assert!(done.completed);
    assert!(done.completed_at.is_some());

    let response = app
        .oneshot(json_request("PATCH", &uri, &json!({ "completed": false })))
        .await
        .unwrap();
    let reopened: Task = body_json(response).await;
    assert!(!reopened.completed);
    assert_eq!(reopened.completed_at, None);
}

#[tokio::test]
async fn test_completing_twice_keeps_completed_at() {
    let (app, _) = setup_app(false).await;
    let payload = json!({ "title": "Empty the tip jar", "due_date": Utc::now().to_rfc3339() });
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/tasks", &payload))
        .await
        .unwrap();
    let created_task: Task = body_json(response).await;
    let uri = format!("/api/tasks/{}/completion", created_task.id);

    let response = app
        .clone()
        .oneshot(json_request("PATCH", &uri, &json!({ "completed": true })))
        .await
        .unwrap();
    let first: Task = body_json(response).await;
    assert!(first.completed_at.is_some());

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let response = app
        .oneshot(json_request("PATCH", &uri, &json!({ "completed": true })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let second: Task = body_json(response).await;
    assert!(second.completed);
    assert_eq!(second.completed_at, first.completed_at);
}

#[tokio::test]
async fn test_client_template_id_is_ignored() {
    let (app, _) = setup_app(false).await;
    let payload = json!({
        "title": "Wipe down menus",
        "due_date": Utc::now().to_rfc3339(),
        "recurring": {
            "type": "daily",
            "interval": 1,
            "last_generated": (Utc::now() - Duration::days(2)).to_rfc3339()
        },
        "template_id": 999
    });
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/tasks", &payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let template: Task = body_json(response).await;
    assert_eq!(template.template_id, None);
    assert!(template.is_template());

    let response = app
        .oneshot(empty_request("POST", "/api/tasks/recurrence/evaluate"))
        .await
        .unwrap();
    let report: Value = body_json(response).await;
    assert_eq!(report["created"].as_array().unwrap().len(), 1);
    assert_eq!(report["created"][0]["template_id"], template.id);
}

#[tokio::test]
async fn test_evaluate_endpoint_generates_once() {
    let (app, store) = setup_app(false).await;
    let payload = json!({
        "title": "Check fridge temperatures",
        "category": "daily",
        "priority": "high",
        "due_date": Utc::now().to_rfc3339(),
        "recurring": { "type": "daily", "interval": 1 }
    });
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/tasks", &payload))
        .await
        .unwrap();
    let template: Task = body_json(response).await;

    // Put the watermark two days in the past so an occurrence is due now.
    let two_days_ago = Utc::now() - Duration::days(2);
    assert!(
        store
            .update_task_watermark(template.id, two_days_ago)
            .await
            .unwrap()
    );

    let response = app
        .clone()
        .oneshot(empty_request("POST", "/api/tasks/recurrence/evaluate"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report: Value = body_json(response).await;
    assert_eq!(report["templates_due"], 1);
    assert_eq!(report["created"].as_array().unwrap().len(), 1);
    assert_eq!(report["created"][0]["template_id"], template.id);
    assert_eq!(report["created"][0]["priority"], "high");

    let response = app
        .clone()
        .oneshot(empty_request("POST", "/api/tasks/recurrence/evaluate"))
        .await
        .unwrap();
    let report: Value = body_json(response).await;
    assert_eq!(report["created"].as_array().unwrap().len(), 0);

    let tasks = store.list_tasks().await.unwrap();
    assert_eq!(tasks.len(), 2);
}

#[tokio::test]
async fn test_listing_triggers_evaluation_when_enabled() {
    let (app, store) = setup_app(true).await;
    let payload = json!({
        "title": "Weekly supplier order",
        "due_date": Utc::now().to_rfc3339(),
        "recurring": { "type": "weekly", "interval": 1 }
    });
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/tasks", &payload))
        .await
        .unwrap();
    let template: Task = body_json(response).await;
    store
        .update_task_watermark(template.id, Utc::now() - Duration::days(8))
        .await
        .unwrap();

    let response = app.clone().oneshot(empty_request("GET", "/api/tasks")).await.unwrap();
    let tasks: Vec<Task> = body_json(response).await;
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().any(|t| t.template_id == Some(template.id)));

    // A second page load does not generate again.
    let response = app.oneshot(empty_request("GET", "/api/tasks")).await.unwrap();
    let tasks: Vec<Task> = body_json(response).await;
    assert_eq!(tasks.len(), 2);
}

#[tokio::test]
async fn test_get_task_and_stats() {
    let (app, _) = setup_app(false).await;
    let payload = json!({
        "title": "Monthly deep clean",
        "priority": "low",
        "due_date": (Utc::now() - Duration::days(1)).to_rfc3339(),
        "recurring": { "type": "monthly", "interval": 1 }
    });
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/tasks", &payload))
        .await
        .unwrap();
    let template: Task = body_json(response).await;

    let response = app
        .clone()
        .oneshot(empty_request("GET", &format!("/api/tasks/{}", template.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let view: Value = body_json(response).await;
    assert_eq!(view["title"], "Monthly deep clean");
    assert!(view["next_due"].is_string());

    let response = app.oneshot(empty_request("GET", "/api/tasks/stats")).await.unwrap();
    let stats: TaskStats = body_json(response).await;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.overdue, 1);
    assert_eq!(stats.recurring_templates, 1);
}
