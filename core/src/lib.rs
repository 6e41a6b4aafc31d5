//! Rudder core: a reactive continuous-query engine. Sources feed entity
//! mutations onto a change bus, per-query executors maintain materialized
//! views and emit incremental deltas, and a dispatcher fans those deltas out
//! to subscribed reactions with retry, batching, and health accounting.

pub mod bus;
pub mod changes;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod query;
pub mod reaction;
pub mod registry;
pub mod result;
pub mod source;

pub use bus::{BusSubscription, EventBus};
pub use changes::{Attributes, ChangeEvent, ChangeKind};
pub use dispatcher::ChangeDispatcher;
pub use engine::{EngineStatus, RudderEngine};
pub use error::{EngineError, ErrorKind, ReactionError, SourceError};
pub use matcher::QueryMatcher;
pub use query::{ContinuousQuery, QueryExecutor};
pub use reaction::{
    ExecutionConfig, ExecutionMode, Reaction, ReactionBase, ReactionConfig, ReactionHandler, ReactionHealth,
    ReactionStats, RetryConfig,
};
pub use registry::{ConfigSchema, PropertyKind, PropertySchema, ReactionProvider, ReactionRegistry, ValidationReport};
pub use result::{QueryResult, ResultMetadata, ResultUpdate, UpdateKind};
pub use source::{ChangeStream, ChannelSource, Source, SourceStatus};

pub use rudderql;
