use courier::{
    Bound, ErrorKind, Map, Mediator, MemoryTransport, Message, Result, Service, SubscribeOptions,
    TopicPattern, testing::RecordingSink, topic::matches,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

mod common;
use common::connected;

type Seen = Arc<Mutex<Vec<&'static str>>>;

#[test]
fn test_topic_wildcards() {
    assert!(matches("orders.created", "orders.created"));
    assert!(matches("orders.*", "orders.created"));
    assert!(!matches("orders.*", "orders.created.eu"));
    assert!(matches("orders.>", "orders.created.eu"));
    assert!(!matches("orders.>", "orders"));
    assert!(matches("*.created", "users.created"));
    assert!(!matches("orders.created", "orders.updated"));
}

#[test]
fn test_invalid_patterns_are_rejected() {
    assert!(TopicPattern::parse("orders.>.eu").is_err());
    assert!(TopicPattern::parse("orders..created").is_err());
    assert!(TopicPattern::parse("").is_err());
    assert!(TopicPattern::parse("orders.>").unwrap().matches("orders.a.b"));
}

async fn specific(_message: Message<Map>) -> Result<&'static str> {
    Ok("specific")
}

async fn wildcard(_message: Message<Map>) -> Result<&'static str> {
    Ok("wildcard")
}

#[tokio::test]
async fn test_reply_dispatch_is_first_fit() {
    let sink = RecordingSink::new();
    let mediator = connected(&sink).await;
    let service = Service::builder("router")
        .reply("orders.created", specific)
        .unwrap()
        .reply("orders.*", wildcard)
        .unwrap()
        .build();
    mediator.subscribe(service).await.unwrap();

    let first = mediator
        .dispatch(json!({"name": "orders.created", "source": "tests"}))
        .await
        .unwrap();
    assert_eq!(first, json!("specific"));

    let second = mediator
        .dispatch(json!({"name": "orders.updated", "source": "tests"}))
        .await
        .unwrap();
    assert_eq!(second, json!("wildcard"));

    let err = mediator
        .dispatch(json!({"name": "users.created", "source": "tests"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingSubscriber);
}

#[tokio::test]
async fn test_broadcast_reaches_every_listener() {
    async fn exact(_message: Message<Map>, Bound(seen): Bound<Seen>) -> Result<()> {
        seen.lock().unwrap().push("exact");
        Ok(())
    }

    async fn tail(_message: Message<Map>, Bound(seen): Bound<Seen>) -> Result<()> {
        seen.lock().unwrap().push("tail");
        Ok(())
    }

    async fn other(_message: Message<Map>, Bound(seen): Bound<Seen>) -> Result<()> {
        seen.lock().unwrap().push("other");
        Ok(())
    }

    let seen: Seen = Arc::default();
    let mediator = Mediator::builder(MemoryTransport::new())
        .bindings(courier::Bindings::new().provide(seen.clone()))
        .build();
    mediator.connect().await.unwrap();
    let service = Service::builder("audit")
        .on("orders.created", SubscribeOptions::new(), exact)
        .unwrap()
        .on("orders.>", SubscribeOptions::new(), tail)
        .unwrap()
        .on("users.>", SubscribeOptions::new(), other)
        .unwrap()
        .build();
    mediator.subscribe(service).await.unwrap();

    let ran = mediator
        .broadcast(json!({"name": "orders.created", "source": "tests"}))
        .await
        .unwrap();
    assert_eq!(ran, 2);
    let mut seen = seen.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, vec!["exact", "tail"]);
}

#[tokio::test]
async fn test_custom_message_argument_name() {
    async fn named(event: Message<Map>) -> Result<Value> {
        Ok(event.payload().get("n").cloned().unwrap_or(Value::Null))
    }

    let sink = RecordingSink::new();
    let mediator = connected(&sink).await;
    let service = Service::builder("named")
        .on("numbers.*", SubscribeOptions::new().arg("event"), named)
        .unwrap()
        .reply("numbers.echo", named)
        .unwrap()
        .build();
    let subscriber = service.subscribers()[0].clone();
    assert_eq!(subscriber.arg(), "event");
    mediator.subscribe(service).await.unwrap();

    let echoed = mediator
        .dispatch(json!({"name": "numbers.echo", "source": "tests", "payload": {"n": 7}}))
        .await
        .unwrap();
    assert_eq!(echoed, json!(7));
}

#[tokio::test]
async fn test_message_without_name_is_rejected() {
    let sink = RecordingSink::new();
    let mediator = connected(&sink).await;

    let err = mediator.dispatch(json!({"source": "tests"})).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingField);
    assert_eq!(err.field(), Some("name"));
}
