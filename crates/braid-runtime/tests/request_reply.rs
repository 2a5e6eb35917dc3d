//! Broker request/reply: correlation, streaming completion, expiry.

use braid_runtime::config::{load_documents, BrokerSection};
use braid_runtime::messaging::Messaging;
use braid_runtime::Connector;
use braid_expression::Expression;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

const APP_CONFIG: &str = r"
apps:
  - name: caller
    broker:
      broker_type: dev
      broker_url: rr-broker
      request_reply_enabled: true
      request_expiry_ms: 500
    components:
      - name: unused
        component_module: pass_through
";

async fn start_connector() -> Connector {
    let config = load_documents(&[("test", APP_CONFIG)]).expect("config");
    let mut connector = Connector::new(config).expect("build");
    connector.start().await.expect("start");
    connector
}

/// Stands in for the remote service: consumes requests from
/// `service-queue` and replies per `make_replies` on the caller's
/// reply topic.
async fn spawn_responder(
    connector: &Connector,
    make_replies: impl Fn(&Value) -> Vec<Value> + Send + 'static,
) -> Arc<dyn Messaging> {
    let section = BrokerSection {
        broker_url: "rr-broker".to_string(),
        ..Default::default()
    };
    let client = connector
        .services()
        .messaging
        .build(&section)
        .expect("client");
    client.connect().await.expect("connect");
    client.bind_queue("service-queue", true).await.expect("bind");
    client
        .subscribe("service/>", "service-queue")
        .await
        .expect("subscribe");

    let responder = client.clone();
    tokio::spawn(async move {
        loop {
            let Ok(received) = responder
                .receive("service-queue", Duration::from_millis(100))
                .await
            else {
                break;
            };
            let Some(request) = received else { continue };
            let _ = responder.ack(&request.receipt).await;

            let Some(reply_topic) = request
                .user_properties
                .get("reply_topic")
                .and_then(Value::as_str)
                .map(String::from)
            else {
                continue;
            };
            let payload: Value = serde_json::from_slice(&request.payload).unwrap_or(Value::Null);
            for reply in make_replies(&payload) {
                let bytes = serde_json::to_vec(&reply).unwrap_or_default();
                let _ = responder.send(&reply_topic, bytes, &Map::new()).await;
            }
        }
    });
    client
}

#[tokio::test]
async fn single_request_returns_the_reply() {
    let connector = start_connector().await;
    let _responder = spawn_responder(&connector, |request| {
        vec![json!({"echo": request.clone()})]
    })
    .await;

    let controller = connector
        .app("caller")
        .expect("app")
        .request_response()
        .expect("controller");

    let reply = controller
        .request("service/echo", &json!({"n": 5}), Map::new(), None, None)
        .await
        .expect("reply");
    assert_eq!(reply.payload().to_value(), json!({"echo": {"n": 5}}));

    let mut connector = connector;
    connector.stop().await;
}

#[tokio::test]
async fn streaming_request_yields_chunks_until_last() {
    let connector = start_connector().await;
    let _responder = spawn_responder(&connector, |_request| {
        vec![
            json!({"chunk": 1, "streaming": {"last_message": false}}),
            json!({"chunk": 2, "streaming": {"last_message": false}}),
            json!({"chunk": 3, "streaming": {"last_message": true}}),
        ]
    })
    .await;

    let controller = connector
        .app("caller")
        .expect("app")
        .request_response()
        .expect("controller");

    let complete = Expression::parse("input.payload:streaming.last_message").expect("parse");
    let mut stream = controller
        .request_stream(
            "service/stream",
            &json!({"q": "x"}),
            Map::new(),
            None,
            complete,
            None,
        )
        .await
        .expect("stream");

    let mut chunks = Vec::new();
    while let Some(item) = stream.next().await {
        let (reply, is_last) = item.expect("chunk");
        chunks.push((reply.payload().to_value()["chunk"].clone(), is_last));
    }

    assert_eq!(
        chunks,
        vec![
            (json!(1), false),
            (json!(2), false),
            (json!(3), true),
        ]
    );

    let mut connector = connector;
    connector.stop().await;
}

#[tokio::test]
async fn request_times_out_without_a_reply() {
    let connector = start_connector().await;
    // No responder.

    let controller = connector
        .app("caller")
        .expect("app")
        .request_response()
        .expect("controller");

    let started = tokio::time::Instant::now();
    let result = controller
        .request(
            "service/void",
            &json!({}),
            Map::new(),
            None,
            Some(Duration::from_millis(200)),
        )
        .await;

    match result {
        Err(braid_component::ComponentError::RequestTimeout(ms)) => assert_eq!(ms, 200),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_millis(200));

    let mut connector = connector;
    connector.stop().await;
}

#[tokio::test]
async fn late_replies_after_completion_are_dropped() {
    let connector = start_connector().await;
    let _responder = spawn_responder(&connector, |_request| {
        // Two replies to a non-streaming request: the second must be
        // dropped silently.
        vec![json!({"first": true}), json!({"second": true})]
    })
    .await;

    let controller = connector
        .app("caller")
        .expect("app")
        .request_response()
        .expect("controller");

    let reply = controller
        .request("service/dup", &json!({}), Map::new(), None, None)
        .await
        .expect("reply");
    assert_eq!(reply.payload().to_value(), json!({"first": true}));

    // A second request still works; the stray reply went nowhere.
    let reply = controller
        .request("service/dup", &json!({}), Map::new(), None, None)
        .await
        .expect("reply");
    assert_eq!(reply.payload().to_value(), json!({"first": true}));

    let mut connector = connector;
    connector.stop().await;
}
