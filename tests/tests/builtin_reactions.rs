//! Smoke coverage of the built-in reaction kinds wired through the facade.


use anyhow::Result;
use common::*;
use rudder::{register_builtin_providers, ChangeEvent, ChannelSource, ContinuousQuery, ReactionConfig, RudderEngine};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn debug_reaction_processes_changes_end_to_end() -> Result<()> {
    init_tracing();
    let source = ChannelSource::new("S1", "orders");
    let query = ContinuousQuery::new("q1", "all orders", "MATCH (o:Order)");
    let reaction = ReactionConfig::new("r1", "log changes", "debug")
        .with_queries(["q1"])
        .with_property("verbose", json!(true));

    let engine = RudderEngine::with(vec![Arc::new(source.clone())], vec![query], vec![reaction]);
    register_builtin_providers(&engine);
    engine.start().await?;

    source.push(ChangeEvent::insert("Order", "1", attrs(json!({"id": 1})), "S1"))?;
    source.push(ChangeEvent::delete("Order", "1", attrs(json!({"id": 1})), "S1"))?;

    let r1 = engine.registry().get("r1").expect("r1 exists");
    wait_until(|| r1.stats().total_processed == 2).await;

    let stats = r1.stats();
    assert_eq!(stats.added, 1);
    assert_eq!(stats.removed, 1);
    assert_eq!(stats.total_errors, 0);
    assert!(r1.health().healthy);
    assert!(stats.last_processed_at.is_some());

    engine.stop().await?;
    assert_eq!(r1.health().status, "STOPPED");
    Ok(())
}

#[tokio::test]
async fn http_reaction_config_is_validated_at_create_time() -> Result<()> {
    init_tracing();
    let engine = RudderEngine::new();
    register_builtin_providers(&engine);

    let bad = ReactionConfig::new("hook", "webhook", "http").with_queries(["q1"]); // no webhookUrl
    engine.add_reaction(bad).await?; // deferred wiring: the error surfaces at start
    let err = engine.start().await.unwrap_err();
    assert!(matches!(err, rudder::EngineError::InvalidReactionConfig(_)));
    Ok(())
}

#[tokio::test]
async fn provider_schemas_describe_the_builtin_kinds() {
    let engine = RudderEngine::new();
    register_builtin_providers(&engine);

    let mut kinds = engine.registry().provider_kinds();
    kinds.sort();
    assert_eq!(kinds, vec!["debug".to_string(), "http".to_string()]);

    let schemas = engine.registry().schemas();
    let http = schemas.iter().find(|s| s.kind == "http").expect("http schema");
    let url = http.properties.iter().find(|p| p.name == "webhookUrl").expect("webhookUrl property");
    assert!(url.required);
}
