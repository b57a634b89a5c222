#![allow(dead_code)]

use courier::{
    Error, Id, Mediator, MediatorConfig, MemoryTransport, Message, Object, Result, Service,
    testing::RecordingSink,
};
use serde::Serialize;
use std::time::Duration;

// ============================================================================
// Test Payloads
// ============================================================================

#[derive(Clone, Debug, Serialize, Object)]
pub struct Greet {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Object)]
pub struct Greeting {
    pub text: String,
}

#[derive(Clone, Debug, Serialize, Object)]
pub struct PlaceOrder {
    pub id: Id,
    pub quantity: u32,
    #[object(default)]
    pub tags: Vec<String>,
}

// ============================================================================
// Test Handlers
// ============================================================================

pub async fn greet(message: Message<Greet>) -> Result<Greeting> {
    Ok(Greeting {
        text: format!("hello {}", message.payload().name),
    })
}

pub async fn refuse(_message: Message<Greet>) -> Result<()> {
    Err(Error::forbidden().with_debug("reason", "closed"))
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn fast_config() -> MediatorConfig {
    MediatorConfig::default()
        .request_timeout(Duration::from_millis(200))
        .nak_delay(Duration::from_millis(10))
}

/// A connected mediator over a fresh memory transport, reporting to `sink`.
pub async fn connected(sink: &RecordingSink) -> Mediator<MemoryTransport> {
    let mediator = Mediator::builder(MemoryTransport::new())
        .config(fast_config())
        .sink(sink.clone())
        .build();
    mediator.connect().await.unwrap();
    mediator
}

pub fn greeter() -> Service {
    Service::builder("greeter")
        .reply("greet.hello", greet)
        .unwrap()
        .build()
}

pub fn message<P>(name: &str, payload: P) -> Message<P> {
    Message::new(name, "tests", payload)
}
