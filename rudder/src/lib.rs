//! Rudder: reactive continuous queries over change-data-capture streams.
//!
//! Sources emit entity mutations, continuous queries keep materialized views
//! current and emit incremental deltas, reactions turn deltas into side
//! effects. This facade re-exports the core surface and, with the
//! `reactions` feature (default), the built-in reaction kinds.

pub use rudder_core::*;
pub use rudderql;

#[cfg(feature = "reactions")]
pub use rudder_reaction_debug::DebugReactionProvider;
#[cfg(feature = "reactions")]
pub use rudder_reaction_http::HttpReactionProvider;

/// Register the built-in reaction providers (`debug`, `http`) on an engine.
#[cfg(feature = "reactions")]
pub fn register_builtin_providers(engine: &RudderEngine) {
    use std::sync::Arc;
    engine.register_provider(Arc::new(DebugReactionProvider));
    engine.register_provider(Arc::new(HttpReactionProvider));
    tracing::debug!("registered built-in reaction providers");
}
