use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use futures::StreamExt;
use serde_json::Value;
use streamchat::chat::{COMMUNICATION_ERROR_MESSAGE, ChatController};
use streamchat::events::TurnOutcome;
use streamchat::generation::{
    GenerationClient, GenerationError, GenerationSettings, OllamaClient,
};

type Seen = Arc<Mutex<Vec<Value>>>;

/// Mock `/api/generate` that picks its reply from the prompt.
async fn generate(State(seen): State<Seen>, Json(body): Json<Value>) -> impl IntoResponse {
    let prompt = body["prompt"].as_str().unwrap_or_default().to_string();
    seen.lock().unwrap().push(body);

    match prompt.as_str() {
        "fail" => (StatusCode::INTERNAL_SERVER_ERROR, String::new()),
        "raw" => (StatusCode::OK, "oops".to_string()),
        "mixed" => (
            StatusCode::OK,
            "{\"response\":\"a\"}\noops\n\n{\"response\":\"b\"}\n".to_string(),
        ),
        "error" => (
            StatusCode::OK,
            "{\"response\":\"par\",\"done\":false}\n{\"error\":\"model not found\"}\n".to_string(),
        ),
        _ => (
            StatusCode::OK,
            [
                r#"{"model":"m","response":"Hel","done":false}"#,
                r#"{"model":"m","response":"lo","done":false}"#,
                r#"{"model":"m","response":"","done":true}"#,
            ]
            .join("\n")
                + "\n",
        ),
    }
}

async fn spawn_mock() -> (SocketAddr, Seen) {
    let seen: Seen = Arc::default();
    let app = Router::new()
        .route("/api/generate", post(generate))
        .with_state(Arc::clone(&seen));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, seen)
}

fn client_for(addr: SocketAddr) -> OllamaClient {
    OllamaClient::new(GenerationSettings {
        base_url: format!("http://{addr}"),
        model: "tiny".to_string(),
        ..GenerationSettings::default()
    })
    .unwrap()
}

async fn collect(client: &OllamaClient, prompt: &str) -> Vec<Result<String, GenerationError>> {
    client.generate(prompt).await.unwrap().collect().await
}

#[tokio::test]
async fn test_streams_response_fields() {
    let (addr, seen) = spawn_mock().await;
    let client = client_for(addr);

    let items = collect(&client, "hi").await;
    let text: Vec<_> = items.into_iter().map(Result::unwrap).collect();
    assert_eq!(text.concat(), "Hello");

    let requests = seen.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["prompt"], "hi");
    assert_eq!(requests[0]["model"], "tiny");
    assert_eq!(requests[0]["stream"], true);
    assert_eq!(requests[0]["options"]["top_k"], 40);
}

#[tokio::test]
async fn test_unterminated_non_json_passes_through() {
    let (addr, _) = spawn_mock().await;
    let client = client_for(addr);

    let items = collect(&client, "raw").await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].as_ref().unwrap(), "oops");
}

#[tokio::test]
async fn test_error_status() {
    let (addr, _) = spawn_mock().await;
    let client = client_for(addr);

    match client.generate("fail").await {
        Err(GenerationError::Status { status }) => assert_eq!(status, 500),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected a status error"),
    }
}

#[tokio::test]
async fn test_in_band_error_ends_stream() {
    let (addr, _) = spawn_mock().await;
    let client = client_for(addr);

    let items = collect(&client, "error").await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), "par");
    assert!(matches!(&items[1], Err(GenerationError::Server(m)) if m == "model not found"));
}

#[tokio::test]
async fn test_controller_end_to_end() {
    let (addr, _) = spawn_mock().await;
    let controller = ChatController::new(Arc::new(client_for(addr)), 20);

    controller.set_input("hi");
    assert_eq!(controller.submit().await, Ok(TurnOutcome::Completed));

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.turns[0].assistant, "Hello");
    assert!(!snapshot.processing);
}

#[tokio::test]
async fn test_controller_reports_server_failure() {
    let (addr, _) = spawn_mock().await;
    let controller = ChatController::new(Arc::new(client_for(addr)), 20);

    controller.set_input("fail");
    assert_eq!(controller.submit().await, Ok(TurnOutcome::Failed));
    assert_eq!(
        controller.snapshot().turns[0].assistant,
        COMMUNICATION_ERROR_MESSAGE
    );
}

#[tokio::test]
async fn test_controller_reports_unreachable_server() {
    // Bind then drop to get a port nothing listens on.
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let controller = ChatController::new(Arc::new(client_for(addr)), 20);

    controller.set_input("hi");
    assert_eq!(controller.submit().await, Ok(TurnOutcome::Failed));

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.turns.len(), 1);
    assert_eq!(snapshot.turns[0].assistant, COMMUNICATION_ERROR_MESSAGE);
    assert!(!snapshot.processing);
}

#[tokio::test]
async fn test_controller_appends_malformed_lines_verbatim() {
    let (addr, _) = spawn_mock().await;
    let controller = ChatController::new(Arc::new(client_for(addr)), 20);

    controller.set_input("mixed");
    assert_eq!(controller.submit().await, Ok(TurnOutcome::Completed));
    assert_eq!(controller.snapshot().turns[0].assistant, "aoops\nb");
}

#[tokio::test]
async fn test_controller_reports_timeout() {
    // Accepts connections and never answers.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let client = OllamaClient::new(GenerationSettings {
        base_url: format!("http://{addr}"),
        connect_timeout_secs: 1,
        timeout_secs: 1,
        ..GenerationSettings::default()
    })
    .unwrap();
    let controller = ChatController::new(Arc::new(client), 20);

    controller.set_input("hi");
    let outcome = tokio::time::timeout(std::time::Duration::from_secs(10), controller.submit())
        .await
        .expect("request timeout fires first");
    assert_eq!(outcome, Ok(TurnOutcome::Failed));

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.turns[0].assistant, COMMUNICATION_ERROR_MESSAGE);
    assert!(!snapshot.processing);
}
