//! Integration tests for the TCP request/reply transport.

use std::sync::Arc;
use std::time::Duration;

use common::{PaymentMode, ProductItem, ReceiptId, UserId};
use futures_util::{SinkExt, StreamExt};
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use services::{
    FrameCodec, ProductService, ReceiptService, RpcProductService, RpcReceiptService,
    RpcTransport, RpcUserService, ServiceError, TcpTransport, UserService,
};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

const TIMEOUT: Duration = Duration::from_secs(2);

/// Spawns a fake service that answers each request with `reply(pattern, data)`.
///
/// Returning `None` leaves the request unanswered.
async fn spawn_server<F>(reply: F) -> String
where
    F: Fn(&str, &Value) -> Option<Vec<Value>> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let reply = Arc::new(reply);

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            let reply = reply.clone();
            tokio::spawn(async move {
                let mut framed = Framed::new(socket, FrameCodec);
                while let Some(Ok(frame)) = framed.next().await {
                    let request: Value = serde_json::from_str(&frame).unwrap();
                    let id = request["id"].clone();
                    let pattern = request["pattern"].as_str().unwrap().to_string();
                    let Some(frames) = reply(&pattern, &request["data"]) else {
                        continue;
                    };
                    for mut frame in frames {
                        frame["id"] = id.clone();
                        framed.send(frame.to_string()).await.unwrap();
                    }
                }
            });
        }
    });

    addr
}

fn transport(addr: &str) -> Arc<dyn RpcTransport> {
    Arc::new(TcpTransport::new("test", addr))
}

#[tokio::test]
async fn test_receipt_delete_round_trip() {
    let addr = spawn_server(|pattern, data| {
        assert_eq!(pattern, "receipt.delete");
        assert_eq!(data["receiptId"], "r-1");
        Some(vec![json!({ "response": true, "isDisposed": true })])
    })
    .await;

    let client = RpcReceiptService::new(transport(&addr), TIMEOUT);
    assert!(client.delete(&ReceiptId::new("r-1")).await.unwrap());
}

#[tokio::test]
async fn test_fault_reply_maps_to_fault_error() {
    let addr = spawn_server(|_, _| {
        Some(vec![json!({
            "err": { "code": 400, "message": "Insufficient product", "location": "ProductService" },
            "isDisposed": true
        })])
    })
    .await;

    let client = RpcProductService::new(transport(&addr), TIMEOUT);
    let err = client
        .update_quantity(&[ProductItem::new("1", 9)], PaymentMode::Checkout)
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some(400));
    assert!(err.to_string().contains("Insufficient product"));
}

#[tokio::test]
async fn test_response_and_dispose_in_separate_frames() {
    let addr = spawn_server(|_, data| {
        Some(vec![
            json!({ "response": { "id": data["id"], "refundBalance": "110.01" }, "isDisposed": false }),
            json!({ "isDisposed": true }),
        ])
    })
    .await;

    let client = RpcUserService::new(transport(&addr), TIMEOUT);
    let user = client
        .update_balance(&UserId::new("user-1"), dec!(100.01), PaymentMode::Refund)
        .await
        .unwrap();

    assert_eq!(user.id.as_str(), "user-1");
    assert_eq!(user.refund_balance, Some(dec!(110.01)));
}

#[tokio::test]
async fn test_void_inventory_reply_is_empty() {
    let addr = spawn_server(|_, _| Some(vec![json!({ "isDisposed": true })])).await;

    let client = RpcProductService::new(transport(&addr), TIMEOUT);
    let rows = client
        .update_quantity(&[ProductItem::new("1", 1)], PaymentMode::Refund)
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_timeout_then_reconnect() {
    let addr = spawn_server(|pattern, _| {
        if pattern == "slow" {
            None
        } else {
            Some(vec![json!({ "response": "pong", "isDisposed": true })])
        }
    })
    .await;

    let client = TcpTransport::new("test", addr);
    let err = client
        .send("slow", json!({}), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Timeout { .. }));

    let reply = client.send("ping", json!({}), TIMEOUT).await.unwrap();
    assert_eq!(reply, json!("pong"));
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let client = TcpTransport::new("test", addr);
    let err = client.send("ping", json!({}), TIMEOUT).await.unwrap_err();
    assert!(err.is_transport());
}
