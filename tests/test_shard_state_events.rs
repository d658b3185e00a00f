//! Exercises session-state tracking (`seq`, `session_id`, connection
//! status) and dispatch delivery against a live gateway.
//!
//! Requires a `RELAY_GATEWAY_TOKEN` environment variable and a
//! `RELAY_GATEWAY_URL` pointing at a reachable gateway; ignored by
//! default since it depends on external state.

use relay_gateway::{
    config::{DispatchSink, GatewayConfig, ShardId},
    Shard,
};
use serde_json::Value;
use std::{
    env,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug)]
struct ChannelDispatchSink(Mutex<UnboundedSender<(String, Value)>>);

impl DispatchSink for ChannelDispatchSink {
    fn dispatch(&self, event_name: &str, payload: &Value) {
        let _ = self
            .0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .send((event_name.to_owned(), payload.clone()));
    }
}

fn shard() -> (Arc<Shard>, UnboundedReceiver<(String, Value)>) {
    let token = env::var("RELAY_GATEWAY_TOKEN").expect("RELAY_GATEWAY_TOKEN must be set");
    let url = env::var("RELAY_GATEWAY_URL").expect("RELAY_GATEWAY_URL must be set");

    let (tx, rx) = mpsc::unbounded_channel();
    let config = GatewayConfig::builder(token, ShardId::ONE)
        .url(url)
        .dispatch_sink(Arc::new(ChannelDispatchSink(Mutex::new(tx))))
        .build();

    (Arc::new(Shard::new(config)), rx)
}

#[ignore]
#[tokio::test]
async fn test_shard_state_events() {
    let (shard, mut events) = shard();

    let runner = tokio::spawn({
        let shard = shard.clone();
        async move { shard.run().await }
    });

    assert!(shard.session_id().is_none());
    assert!(shard.seq().is_none());

    let (event_name, _payload) = tokio::time::timeout(Duration::from_secs(30), events.recv())
        .await
        .expect("ready should arrive within 30 seconds")
        .expect("dispatch channel should not close before ready");

    assert_eq!(event_name, "READY");
    assert!(shard.is_connected());
    assert!(shard.session_id().is_some());

    // A sequence number accompanies every dispatch, including READY.
    assert!(shard.seq().is_some());

    shard.close();
    let error = runner.await.expect("run task should not panic");
    assert!(matches!(
        error.kind(),
        relay_gateway::GatewayErrorType::ClientClosed
    ));
    assert!(!shard.is_connected());
}
