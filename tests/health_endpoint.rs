//! Black-box HTTP check against a running relay fabric's `/health` route —
//! the one piece of this system an operator can poll with a plain GET
//! instead of dialing a websocket and running the `identify` handshake.

use tabrelay::relay::config::RelayConfig;
use tabrelay::relay::server::RelayServerImpl;
use tabrelay::time_provider::test_time_provider;
use test_log::test;
use tokio_util::sync::CancellationToken;

#[test(tokio::test)]
async fn health_endpoint_reports_ok_over_http() {
    let server = RelayServerImpl::new(RelayConfig::testing(), test_time_provider());
    let listener = server.bind().await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let shutdown = CancellationToken::new();
    let server_for_task = server.clone();
    let shutdown_for_task = shutdown.clone();
    tokio::spawn(async move {
        let _ = server_for_task.serve(listener, shutdown_for_task).await;
    });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{port}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 0);

    shutdown.cancel();
}
