//! End-to-end delivery scenarios through a running engine: channel source →
//! change bus → query executor → result bus → dispatcher → reaction.


use anyhow::Result;
use common::*;
use rudder::{ChangeEvent, ChannelSource, ContinuousQuery, ErrorKind, RudderEngine};
use serde_json::json;
use std::sync::Arc;

const READY_ORDERS: &str = "MATCH (o:Order) WHERE o.status = 'READY' RETURN o";

struct Pipeline {
    engine: RudderEngine,
    source: ChannelSource,
}

/// Engine with one source S1, one query q1 over it, and one serialized
/// recording reaction r1.
async fn ready_orders_pipeline() -> Result<(Pipeline, tokio::sync::mpsc::UnboundedReceiver<Recorded>)> {
    init_tracing();
    let source = ChannelSource::new("S1", "orders");
    let query = ContinuousQuery::new("q1", "ready orders", READY_ORDERS).with_source_ids(["S1"]);

    let engine = RudderEngine::with(vec![Arc::new(source.clone())], vec![query], vec![sync_reaction("r1", ["q1"])]);
    let provider = Arc::new(TestReactionProvider::new());
    let rx = provider.prepare("r1", 0, ErrorKind::Other);
    engine.register_provider(provider);

    engine.start().await?;
    Ok((Pipeline { engine, source }, rx))
}

#[tokio::test]
async fn matching_insert_is_delivered_as_added() -> Result<()> {
    let (pipeline, mut rx) = ready_orders_pipeline().await?;

    pipeline.source.push(ChangeEvent::insert("Order", "1", attrs(json!({"id": 1, "status": "READY"})), "S1"))?;

    assert_eq!(
        recv_timeout(&mut rx).await,
        Recorded::Added { query_id: "q1".to_string(), data: attrs(json!({"id": 1, "status": "READY"})) }
    );
    pipeline.engine.stop().await?;
    Ok(())
}

#[tokio::test]
async fn data_change_is_delivered_as_updated() -> Result<()> {
    let (pipeline, mut rx) = ready_orders_pipeline().await?;

    pipeline.source.push(ChangeEvent::insert("Order", "1", attrs(json!({"id": 1, "status": "READY"})), "S1"))?;
    pipeline.source.push(ChangeEvent::update(
        "Order",
        "1",
        attrs(json!({"id": 1, "status": "READY"})),
        attrs(json!({"id": 1, "status": "READY", "total": 10})),
        "S1",
    ))?;

    assert_eq!(
        recv_timeout(&mut rx).await,
        Recorded::Added { query_id: "q1".to_string(), data: attrs(json!({"id": 1, "status": "READY"})) }
    );
    assert_eq!(
        recv_timeout(&mut rx).await,
        Recorded::Updated {
            query_id: "q1".to_string(),
            before: attrs(json!({"id": 1, "status": "READY"})),
            after: attrs(json!({"id": 1, "status": "READY", "total": 10})),
        }
    );
    pipeline.engine.stop().await?;
    Ok(())
}

#[tokio::test]
async fn leaving_the_filter_is_delivered_as_removed() -> Result<()> {
    let (pipeline, mut rx) = ready_orders_pipeline().await?;

    pipeline.source.push(ChangeEvent::insert("Order", "1", attrs(json!({"id": 1, "status": "READY"})), "S1"))?;
    pipeline.source.push(ChangeEvent::update(
        "Order",
        "1",
        attrs(json!({"id": 1, "status": "READY"})),
        attrs(json!({"id": 1, "status": "PENDING"})),
        "S1",
    ))?;

    assert!(matches!(recv_timeout(&mut rx).await, Recorded::Added { .. }));
    assert_eq!(
        recv_timeout(&mut rx).await,
        Recorded::Removed { query_id: "q1".to_string(), data: attrs(json!({"id": 1, "status": "READY"})) }
    );
    pipeline.engine.stop().await?;
    Ok(())
}

#[tokio::test]
async fn delete_is_delivered_as_removed() -> Result<()> {
    let (pipeline, mut rx) = ready_orders_pipeline().await?;

    pipeline.source.push(ChangeEvent::insert("Order", "1", attrs(json!({"id": 1, "status": "READY"})), "S1"))?;
    pipeline.source.push(ChangeEvent::delete("Order", "1", attrs(json!({"id": 1, "status": "READY"})), "S1"))?;

    assert!(matches!(recv_timeout(&mut rx).await, Recorded::Added { .. }));
    assert_eq!(
        recv_timeout(&mut rx).await,
        Recorded::Removed { query_id: "q1".to_string(), data: attrs(json!({"id": 1, "status": "READY"})) }
    );
    pipeline.engine.stop().await?;
    Ok(())
}

#[tokio::test]
async fn events_from_other_sources_are_filtered_out() -> Result<()> {
    init_tracing();
    let s1 = ChannelSource::new("S1", "orders");
    let s2 = ChannelSource::new("S2", "other orders");
    let query = ContinuousQuery::new("q1", "ready orders", READY_ORDERS).with_source_ids(["S1"]);

    let engine = RudderEngine::with(
        vec![Arc::new(s1.clone()), Arc::new(s2.clone())],
        vec![query],
        vec![sync_reaction("r1", ["q1"])],
    );
    let provider = Arc::new(TestReactionProvider::new());
    let mut rx = provider.prepare("r1", 0, ErrorKind::Other);
    engine.register_provider(provider);
    engine.start().await?;

    // a perfectly matching event from the wrong source, then one from S1
    s2.push(ChangeEvent::insert("Order", "1", attrs(json!({"id": 1, "status": "READY"})), "S2"))?;
    s1.push(ChangeEvent::insert("Order", "2", attrs(json!({"id": 2, "status": "READY"})), "S1"))?;

    assert_eq!(
        recv_timeout(&mut rx).await,
        Recorded::Added { query_id: "q1".to_string(), data: attrs(json!({"id": 2, "status": "READY"})) },
        "only the S1 event produces a delivery"
    );
    assert!(rx.try_recv().is_err(), "the S2 event must not produce a delivery");

    engine.stop().await?;
    Ok(())
}

#[tokio::test]
async fn failing_reaction_does_not_starve_its_peer() -> Result<()> {
    init_tracing();
    let source = ChannelSource::new("S1", "orders");
    let query = ContinuousQuery::new("q1", "ready orders", READY_ORDERS).with_source_ids(["S1"]);

    let engine = RudderEngine::with(
        vec![Arc::new(source.clone())],
        vec![query],
        vec![sync_reaction("r1", ["q1"]), sync_reaction("r2", ["q1"])],
    );
    let provider = Arc::new(TestReactionProvider::new());
    let _rx1 = provider.prepare("r1", u64::MAX, ErrorKind::Other); // r1 always fails, non-retryable
    let mut rx2 = provider.prepare("r2", 0, ErrorKind::Other);
    engine.register_provider(provider);
    engine.start().await?;

    source.push(ChangeEvent::insert("Order", "1", attrs(json!({"id": 1, "status": "READY"})), "S1"))?;

    assert!(matches!(recv_timeout(&mut rx2).await, Recorded::Added { .. }));

    let registry = engine.registry();
    let r1 = registry.get("r1").expect("r1 exists");
    let r2 = registry.get("r2").expect("r2 exists");
    wait_until(|| r1.stats().total_errors == 1).await;
    assert_eq!(r1.stats().total_processed, 0);
    assert_eq!(r2.stats().total_processed, 1);
    assert_eq!(engine.status(), rudder::EngineStatus::Running, "no error escapes to the engine");

    engine.stop().await?;
    Ok(())
}

#[tokio::test]
async fn snapshot_rows_bootstrap_the_view() -> Result<()> {
    init_tracing();
    let source = ChannelSource::new("S1", "orders");
    source.add_snapshot_row("Order", "1", attrs(json!({"id": 1, "status": "READY"})));
    source.add_snapshot_row("Order", "2", attrs(json!({"id": 2, "status": "PENDING"})));

    let query = ContinuousQuery::new("q1", "ready orders", READY_ORDERS).with_source_ids(["S1"]);
    let engine = RudderEngine::with(vec![Arc::new(source.clone())], vec![query], vec![sync_reaction("r1", ["q1"])]);
    let provider = Arc::new(TestReactionProvider::new());
    let mut rx = provider.prepare("r1", 0, ErrorKind::Other);
    engine.register_provider(provider);
    engine.start().await?;

    assert_eq!(
        recv_timeout(&mut rx).await,
        Recorded::Added { query_id: "q1".to_string(), data: attrs(json!({"id": 1, "status": "READY"})) },
        "only the matching snapshot row is added"
    );
    let queries = engine.queries();
    wait_until(|| queries[0].len() == 1).await;

    engine.stop().await?;
    Ok(())
}
