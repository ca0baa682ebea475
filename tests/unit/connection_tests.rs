//! JSON-RPC multiplexer over in-process duplex pipes.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use flowgentic::acp::connection::{BoxFuture, PeerHandler, RpcConnection};
use flowgentic::acp::protocol::RpcError;
use flowgentic::AppError;

/// Echoes `ping` requests, fails `fail`, hangs `hang`, records
/// notifications.
#[derive(Default)]
struct EchoHandler {
    notifications: Mutex<Vec<(String, Value)>>,
}

impl PeerHandler for EchoHandler {
    fn on_request(
        &self,
        method: String,
        params: Value,
    ) -> BoxFuture<'_, std::result::Result<Value, RpcError>> {
        Box::pin(async move {
            match method.as_str() {
                "ping" => Ok(params),
                "fail" => Err(RpcError::new(-32000, "boom")),
                "hang" => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                other => Err(RpcError::method_not_found(other)),
            }
        })
    }

    fn on_notification(&self, method: String, params: Value) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.notifications.lock().await.push((method, params));
        })
    }
}

/// Connect two `RpcConnection`s back to back over duplex pipes.
fn connected(
    server: Arc<EchoHandler>,
    server_cancel: &CancellationToken,
) -> (RpcConnection, RpcConnection) {
    let (client_writer, server_reader) = tokio::io::duplex(64 * 1024);
    let (server_writer, client_reader) = tokio::io::duplex(64 * 1024);

    let client_cancel = CancellationToken::new();
    let client = RpcConnection::spawn(
        "client".to_owned(),
        client_reader,
        client_writer,
        Arc::new(EchoHandler::default()),
        &client_cancel,
    );
    let server_conn = RpcConnection::spawn(
        "server".to_owned(),
        server_reader,
        server_writer,
        server,
        server_cancel,
    );
    (client, server_conn)
}

#[tokio::test]
async fn requests_are_matched_to_responses_by_id() {
    let server = Arc::new(EchoHandler::default());
    let cancel = CancellationToken::new();
    let (client, _server_conn) = connected(server, &cancel);

    let result = timeout(
        Duration::from_secs(5),
        client.request("ping", json!({ "n": 1 })),
    )
    .await
    .expect("no timeout")
    .expect("response");
    assert_eq!(result, json!({ "n": 1 }));
}

#[tokio::test]
async fn concurrent_requests_multiplex_over_one_stream() {
    let server = Arc::new(EchoHandler::default());
    let cancel = CancellationToken::new();
    let (client, _server_conn) = connected(server, &cancel);

    let first = client.request("ping", json!({ "n": 1 }));
    let second = client.request("ping", json!({ "n": 2 }));
    let (a, b) = tokio::join!(first, second);
    assert_eq!(a.expect("first"), json!({ "n": 1 }));
    assert_eq!(b.expect("second"), json!({ "n": 2 }));
}

#[tokio::test]
async fn peer_errors_surface_as_rpc_errors() {
    let server = Arc::new(EchoHandler::default());
    let cancel = CancellationToken::new();
    let (client, _server_conn) = connected(server, &cancel);

    let err = client
        .request("fail", json!({}))
        .await
        .expect_err("peer error");
    assert!(matches!(err, AppError::Rpc(ref msg) if msg.contains("boom")), "got {err:?}");
}

#[tokio::test]
async fn notifications_arrive_in_order() {
    let server = Arc::new(EchoHandler::default());
    let cancel = CancellationToken::new();
    let (client, _server_conn) = connected(Arc::clone(&server), &cancel);

    for n in 0..5 {
        client
            .notify("note", json!({ "n": n }))
            .await
            .expect("notify");
    }
    // A request acts as a barrier: notifications are handled inline before
    // the response is produced.
    client.request("ping", json!({})).await.expect("ping");

    let seen = server.notifications.lock().await;
    let order: Vec<i64> = seen
        .iter()
        .map(|(_, params)| params.get("n").and_then(Value::as_i64).expect("n"))
        .collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn peer_shutdown_fails_outstanding_requests() {
    let server = Arc::new(EchoHandler::default());
    let cancel = CancellationToken::new();
    let (client, _server_conn) = connected(server, &cancel);

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.request("hang", json!({})).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    cancel.cancel();

    let err = timeout(Duration::from_secs(5), pending)
        .await
        .expect("no timeout")
        .expect("join")
        .expect_err("request must fail");
    assert!(matches!(err, AppError::PeerClosed(_)), "got {err:?}");
}
