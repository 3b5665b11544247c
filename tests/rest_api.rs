//! REST control-plane integration tests. Spawn the server and call endpoints with reqwest.

use firm_formation_engine::api;
use firm_formation_engine::ExperimentConfig;
use std::net::SocketAddr;

fn test_config() -> ExperimentConfig {
    ExperimentConfig { participants: 3, formation_seconds: 3600, num_rounds: 2, ..Default::default() }
}

async fn spawn_app() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::create_router(test_config());
    let handle = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    (addr, handle)
}

#[tokio::test]
async fn health_returns_ok() {
    let (addr, _handle) = spawn_app().await;
    let url = format!("http://{}/health", addr);
    let client = reqwest::Client::new();
    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn state_without_round_returns_404() {
    let (addr, _handle) = spawn_app().await;
    let client = reqwest::Client::new();
    let response = client.get(format!("http://{}/state", addr)).send().await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn start_round_then_state_shows_every_agent_autarkic() {
    let (addr, _handle) = spawn_app().await;
    let client = reqwest::Client::new();
    let response = client.post(format!("http://{}/rounds", addr)).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["round"], serde_json::json!(1));
    assert_eq!(json["deadline_secs"], serde_json::json!(3600));

    let state: serde_json::Value = client
        .get(format!("http://{}/state", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(state["all_ids"], serde_json::json!([1, 2, 3]));
    assert_eq!(state["firms"].as_array().map(|f| f.len()), Some(3));
    assert_eq!(state["employer"]["2"], serde_json::Value::Null);
}

#[tokio::test]
async fn start_round_with_custom_roster() {
    let (addr, _handle) = spawn_app().await;
    let client = reqwest::Client::new();
    let body = serde_json::json!({ "roster": [7, 4] });
    let response = client.post(format!("http://{}/rounds", addr)).json(&body).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let state: serde_json::Value = client
        .get(format!("http://{}/state", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(state["all_ids"], serde_json::json!([4, 7]));
}

#[tokio::test]
async fn duplicate_roster_returns_400() {
    let (addr, _handle) = spawn_app().await;
    let client = reqwest::Client::new();
    let body = serde_json::json!({ "roster": [1, 1] });
    let response = client.post(format!("http://{}/rounds", addr)).json(&body).send().await.unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn roster_with_agent_zero_returns_400() {
    let (addr, _handle) = spawn_app().await;
    let client = reqwest::Client::new();
    let body = serde_json::json!({ "roster": [0, 1, 2] });
    let response = client.post(format!("http://{}/rounds", addr)).json(&body).send().await.unwrap();
    assert_eq!(response.status(), 400);
    let state = client.get(format!("http://{}/state", addr)).send().await.unwrap();
    assert_eq!(state.status(), 404);
}

#[tokio::test]
async fn starting_twice_returns_409() {
    let (addr, _handle) = spawn_app().await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/rounds", addr);
    assert_eq!(client.post(&url).send().await.unwrap().status(), 200);
    assert_eq!(client.post(&url).send().await.unwrap().status(), 409);
}

#[tokio::test]
async fn finalize_settle_and_history_round_trip() {
    let (addr, _handle) = spawn_app().await;
    let client = reqwest::Client::new();
    let _ = client.post(format!("http://{}/rounds", addr)).send().await.unwrap();

    let settle_early = client
        .post(format!("http://{}/rounds/settle", addr))
        .json(&serde_json::json!({ "efforts": {} }))
        .send()
        .await
        .unwrap();
    assert_eq!(settle_early.status(), 409);

    let response = client.post(format!("http://{}/rounds/finalize", addr)).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let finalized: serde_json::Value = response.json().await.unwrap();
    assert_eq!(finalized["partition"]["firms"].as_array().map(|f| f.len()), Some(3));
    assert_eq!(finalized["terminations"], serde_json::json!([]));

    let again = client.post(format!("http://{}/rounds/finalize", addr)).send().await.unwrap();
    assert_eq!(again.status(), 409);

    let settled = client
        .post(format!("http://{}/rounds/settle", addr))
        .json(&serde_json::json!({ "efforts": { "1": "3" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(settled.status(), 200);
    let json: serde_json::Value = settled.json().await.unwrap();
    assert_eq!(json["relay"].as_array().map(|r| r.len()), Some(3));

    let history: serde_json::Value = client
        .get(format!("http://{}/history", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let row = &history["rounds"]["1"]["entries"]["1"];
    assert_eq!(row["firm_size"], serde_json::json!(1));
    assert_eq!(row["was_terminated"], serde_json::json!(false));
}

#[tokio::test]
async fn effort_above_endowment_returns_400_and_round_stays_open() {
    let (addr, _handle) = spawn_app().await;
    let client = reqwest::Client::new();
    let _ = client.post(format!("http://{}/rounds", addr)).send().await.unwrap();
    let _ = client.post(format!("http://{}/rounds/finalize", addr)).send().await.unwrap();

    let url = format!("http://{}/rounds/settle", addr);
    let bad = client.post(&url).json(&serde_json::json!({ "efforts": { "2": "9" } })).send().await.unwrap();
    assert_eq!(bad.status(), 400);
    let good = client.post(&url).json(&serde_json::json!({ "efforts": {} })).send().await.unwrap();
    assert_eq!(good.status(), 200);
}

#[tokio::test]
async fn round_limit_returns_409() {
    let (addr, _handle) = spawn_app().await;
    let client = reqwest::Client::new();
    for _ in 0..2 {
        assert_eq!(client.post(format!("http://{}/rounds", addr)).send().await.unwrap().status(), 200);
        let _ = client.post(format!("http://{}/rounds/finalize", addr)).send().await.unwrap();
        let _ = client
            .post(format!("http://{}/rounds/settle", addr))
            .json(&serde_json::json!({ "efforts": {} }))
            .send()
            .await
            .unwrap();
    }
    let response = client.post(format!("http://{}/rounds", addr)).send().await.unwrap();
    assert_eq!(response.status(), 409);
}
