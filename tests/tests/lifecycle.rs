//! Engine lifecycle: state machine transitions, dynamic registration while
//! running, and failure isolation between sources.


use anyhow::Result;
use common::*;
use rudder::{
    ChangeEvent, ChannelSource, ContinuousQuery, EngineError, EngineStatus, ErrorKind, RudderEngine, Source,
    SourceError, SourceStatus,
};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn status_walks_the_state_machine() -> Result<()> {
    init_tracing();
    let engine = RudderEngine::new();
    assert_eq!(engine.status(), EngineStatus::Created);

    engine.start().await?;
    assert_eq!(engine.status(), EngineStatus::Running);

    engine.stop().await?;
    assert_eq!(engine.status(), EngineStatus::Stopped);

    engine.start().await?;
    assert_eq!(engine.status(), EngineStatus::Running);
    engine.stop().await?;
    Ok(())
}

#[tokio::test]
async fn double_start_is_an_invalid_state() -> Result<()> {
    let engine = RudderEngine::new();
    engine.start().await?;
    assert!(matches!(engine.start().await, Err(EngineError::InvalidState { .. })));
    engine.stop().await?;
    Ok(())
}

#[tokio::test]
async fn unknown_reaction_kind_fails_the_start() -> Result<()> {
    let engine = RudderEngine::new();
    engine.add_reaction(sync_reaction("r1", ["q1"])).await?; // provider never registered
    assert!(matches!(engine.start().await, Err(EngineError::UnknownReactionKind(_))));
    assert_eq!(engine.status(), EngineStatus::Error);
    Ok(())
}

#[tokio::test]
async fn source_added_while_running_is_wired_immediately() -> Result<()> {
    init_tracing();
    let query = ContinuousQuery::new("q1", "all orders", "MATCH (o:Order)");
    let engine = RudderEngine::with(vec![], vec![query], vec![sync_reaction("r1", ["q1"])]);
    let provider = Arc::new(TestReactionProvider::new());
    let mut rx = provider.prepare("r1", 0, ErrorKind::Other);
    engine.register_provider(provider);
    engine.start().await?;

    let source = ChannelSource::new("S9", "late source");
    engine.add_source(Arc::new(source.clone()));
    assert_eq!(engine.sources().len(), 1);

    source.push(ChangeEvent::insert("Order", "1", attrs(json!({"id": 1})), "S9"))?;
    assert!(matches!(recv_timeout(&mut rx).await, Recorded::Added { .. }));

    engine.stop().await?;
    Ok(())
}

#[tokio::test]
async fn query_and_reaction_added_while_running_are_wired_immediately() -> Result<()> {
    init_tracing();
    let source = ChannelSource::new("S1", "orders");
    let engine = RudderEngine::with(vec![Arc::new(source.clone())], vec![], vec![]);
    let provider = Arc::new(TestReactionProvider::new());
    let mut rx = provider.prepare("r1", 0, ErrorKind::Other);
    engine.register_provider(provider);
    engine.start().await?;

    engine.add_query(ContinuousQuery::new("q1", "all orders", "MATCH (o:Order)"));
    engine.add_reaction(sync_reaction("r1", ["q1"])).await?;

    source.push(ChangeEvent::insert("Order", "1", attrs(json!({"id": 1})), "S1"))?;
    assert!(matches!(recv_timeout(&mut rx).await, Recorded::Added { .. }));

    assert_eq!(engine.queries().len(), 1);
    assert_eq!(engine.reactions().len(), 1);
    engine.stop().await?;
    Ok(())
}

#[tokio::test]
async fn one_failing_source_leaves_the_rest_serving() -> Result<()> {
    init_tracing();
    let bad = ChannelSource::new("S1", "bad source");
    let good = ChannelSource::new("S2", "good source");
    let query = ContinuousQuery::new("q1", "all orders", "MATCH (o:Order)");

    let engine = RudderEngine::with(
        vec![Arc::new(bad.clone()), Arc::new(good.clone())],
        vec![query],
        vec![sync_reaction("r1", ["q1"])],
    );
    let provider = Arc::new(TestReactionProvider::new());
    let mut rx = provider.prepare("r1", 0, ErrorKind::Other);
    engine.register_provider(provider);
    engine.start().await?;

    bad.fail(SourceError::Stream("connection reset".to_string()));
    assert_eq!(bad.status(), SourceStatus::Error);

    good.push(ChangeEvent::insert("Order", "1", attrs(json!({"id": 1})), "S2"))?;
    assert!(matches!(recv_timeout(&mut rx).await, Recorded::Added { .. }));
    assert_eq!(engine.status(), EngineStatus::Running);

    engine.stop().await?;
    Ok(())
}

#[tokio::test]
async fn stop_prevents_further_deliveries() -> Result<()> {
    init_tracing();
    let source = ChannelSource::new("S1", "orders");
    let query = ContinuousQuery::new("q1", "all orders", "MATCH (o:Order)");
    let engine = RudderEngine::with(vec![Arc::new(source.clone())], vec![query], vec![sync_reaction("r1", ["q1"])]);
    let provider = Arc::new(TestReactionProvider::new());
    let mut rx = provider.prepare("r1", 0, ErrorKind::Other);
    engine.register_provider(provider);
    engine.start().await?;

    source.push(ChangeEvent::insert("Order", "1", attrs(json!({"id": 1})), "S1"))?;
    assert!(matches!(recv_timeout(&mut rx).await, Recorded::Added { .. }));

    engine.stop().await?;
    assert!(source.push(ChangeEvent::insert("Order", "2", attrs(json!({"id": 2})), "S1")).is_err());
    assert!(rx.try_recv().is_err());
    Ok(())
}
