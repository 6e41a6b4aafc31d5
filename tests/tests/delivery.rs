//! Delivery semantics through the full pipeline: per-reaction ordering in
//! sync mode, retry behavior on transient failures, and no-op change
//! suppression.


use anyhow::Result;
use common::*;
use rudder::{ChangeEvent, ChannelSource, ContinuousQuery, ErrorKind, RetryConfig, RudderEngine};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn sync_reaction_sees_changes_in_arrival_order() -> Result<()> {
    init_tracing();
    let source = ChannelSource::new("S1", "orders");
    let query = ContinuousQuery::new("q1", "all orders", "MATCH (o:Order)");
    let engine = RudderEngine::with(vec![Arc::new(source.clone())], vec![query], vec![sync_reaction("r1", ["q1"])]);
    let provider = Arc::new(TestReactionProvider::new());
    let mut rx = provider.prepare("r1", 0, ErrorKind::Other);
    engine.register_provider(provider);
    engine.start().await?;

    for n in 0..20 {
        source.push(ChangeEvent::insert("Order", n.to_string(), attrs(json!({"n": n})), "S1"))?;
    }

    for n in 0..20 {
        match recv_timeout(&mut rx).await {
            Recorded::Added { data, .. } => assert_eq!(data, attrs(json!({"n": n}))),
            other => panic!("expected Added, got {other:?}"),
        }
    }

    engine.stop().await?;
    Ok(())
}

#[tokio::test]
async fn transient_failures_are_retried_through_the_pipeline() -> Result<()> {
    init_tracing();
    let source = ChannelSource::new("S1", "orders");
    let query = ContinuousQuery::new("q1", "all orders", "MATCH (o:Order)");

    let mut config = sync_reaction("r1", ["q1"]);
    config.retry = RetryConfig {
        enabled: true,
        max_attempts: 3,
        initial_backoff_ms: 10,
        max_backoff_ms: 40,
        ..RetryConfig::default()
    };

    let engine = RudderEngine::with(vec![Arc::new(source.clone())], vec![query], vec![config]);
    let provider = Arc::new(TestReactionProvider::new());
    let mut rx = provider.prepare("r1", 2, ErrorKind::Io); // first two invocations fail, retryably
    engine.register_provider(provider);
    engine.start().await?;

    source.push(ChangeEvent::insert("Order", "1", attrs(json!({"id": 1})), "S1"))?;

    // the same change is seen three times: two failures, then the success
    for _ in 0..3 {
        assert!(matches!(recv_timeout(&mut rx).await, Recorded::Added { .. }));
    }

    let reaction = engine.registry().get("r1").expect("r1 exists");
    wait_until(|| reaction.stats().total_processed == 1).await;
    assert_eq!(reaction.stats().total_errors, 2);
    assert!(reaction.health().healthy);

    engine.stop().await?;
    Ok(())
}

#[tokio::test]
async fn identical_payloads_do_not_produce_duplicate_deliveries() -> Result<()> {
    init_tracing();
    let source = ChannelSource::new("S1", "orders");
    let query = ContinuousQuery::new("q1", "all orders", "MATCH (o:Order)");
    let engine = RudderEngine::with(vec![Arc::new(source.clone())], vec![query], vec![sync_reaction("r1", ["q1"])]);
    let provider = Arc::new(TestReactionProvider::new());
    let mut rx = provider.prepare("r1", 0, ErrorKind::Other);
    engine.register_provider(provider);
    engine.start().await?;

    source.push(ChangeEvent::insert("Order", "1", attrs(json!({"id": 1})), "S1"))?;
    source.push(ChangeEvent::insert("Order", "1", attrs(json!({"id": 1})), "S1"))?; // identical, no-op
    source.push(ChangeEvent::insert("Order", "2", attrs(json!({"id": 2})), "S1"))?;

    assert_eq!(
        recv_timeout(&mut rx).await,
        Recorded::Added { query_id: "q1".to_string(), data: attrs(json!({"id": 1})) }
    );
    assert_eq!(
        recv_timeout(&mut rx).await,
        Recorded::Added { query_id: "q1".to_string(), data: attrs(json!({"id": 2})) },
        "the duplicate insert is suppressed"
    );

    engine.stop().await?;
    Ok(())
}

#[tokio::test]
async fn one_reaction_can_consume_multiple_queries() -> Result<()> {
    init_tracing();
    let source = ChannelSource::new("S1", "everything");
    let orders = ContinuousQuery::new("q-orders", "orders", "MATCH (o:Order)");
    let customers = ContinuousQuery::new("q-customers", "customers", "MATCH (c:Customer)");

    let engine = RudderEngine::with(
        vec![Arc::new(source.clone())],
        vec![orders, customers],
        vec![sync_reaction("r1", ["q-orders", "q-customers"])],
    );
    let provider = Arc::new(TestReactionProvider::new());
    let mut rx = provider.prepare("r1", 0, ErrorKind::Other);
    engine.register_provider(provider);
    engine.start().await?;

    source.push(ChangeEvent::insert("Customer", "1", attrs(json!({"name": "ada"})), "S1"))?;

    match recv_timeout(&mut rx).await {
        Recorded::Added { query_id, .. } => assert_eq!(query_id, "q-customers"),
        other => panic!("expected Added, got {other:?}"),
    }

    engine.stop().await?;
    Ok(())
}
