//! Exercises the outbound rate limiter against a live gateway.
//!
//! Requires a `RELAY_GATEWAY_TOKEN` environment variable and a
//! `RELAY_GATEWAY_URL` pointing at a reachable gateway; ignored by
//! default since it depends on external state.

use relay_gateway::{
    command::UpdateStatus,
    config::{GatewayConfig, ShardId},
    Shard,
};
use std::{env, sync::Arc, time::Duration};

fn shard() -> Arc<Shard> {
    let token = env::var("RELAY_GATEWAY_TOKEN").expect("RELAY_GATEWAY_TOKEN must be set");
    let url = env::var("RELAY_GATEWAY_URL").expect("RELAY_GATEWAY_URL must be set");

    let config = GatewayConfig::builder(token, ShardId::ONE).url(url).build();

    Arc::new(Shard::new(config))
}

#[ignore]
#[tokio::test]
async fn test_shard_command_ratelimit() {
    let shard = shard();

    let runner = tokio::spawn({
        let shard = shard.clone();
        async move { shard.run().await }
    });

    while !shard.is_connected() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let status = UpdateStatus {
        idle: None,
        status: "online".to_owned(),
        game: None,
        afk: false,
    };

    // `Shard::command` only enqueues onto the channel the poll loop
    // drains; it never blocks on the wire-level limiter itself, even
    // past the 120-per-60s budget.
    let start = tokio::time::Instant::now();

    for _ in 0..200 {
        shard.command(&status).expect("queuing never blocks on the rate limiter");
    }

    assert!(start.elapsed() < Duration::from_millis(50));

    shard.close();
    let error = runner.await.expect("run task should not panic");
    assert!(matches!(
        error.kind(),
        relay_gateway::GatewayErrorType::ClientClosed
    ));
}
