//! Runtime for Conduit.
//!
//! This crate provides the subscription execution runtime:
//! - `result`: Result tree, operation results and their builder
//! - `context`: Pooled per-operation execution state
//! - `pool`: Operation context pooling
//! - `executor`: Query execution against resolvers
//! - `subscription`: Subscribe, per-event execution and result enumeration
//! - `source_stream`: Source stream abstraction and channel-backed streams
//! - `pubsub`: In-memory topic hub
//! - `instrumentation`: Diagnostic events
//! - `error_handler`: Client-facing error shaping

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod error_handler;
pub mod executor;
pub mod instrumentation;
pub mod operation;
pub mod pool;
pub mod pubsub;
pub mod request;
pub mod resolver;
pub mod result;
pub mod services;
pub mod source_stream;
pub mod subscription;

pub use context::{OperationContext, RootValue, ScopedContextData, EVENT_MESSAGE};
pub use dispatcher::{BatchDispatcher, BatchJob, NoopBatchDispatcher, QueuedBatchDispatcher};
pub use error::ExecutionError;
pub use error_handler::{DefaultErrorHandler, ErrorHandler, ErrorHandlerOptions};
pub use executor::{QueryExecutor, ResolverExecutor, ResolverExecutorConfig};
pub use instrumentation::{DiagnosticEvents, NoopDiagnosticEvents, TracingDiagnosticEvents};
pub use operation::{Argument, ArgumentValue, Arguments, Operation, OperationKind, Selection, Variables};
pub use pool::{OperationContextPool, PoolConfig, PoolStats};
pub use pubsub::{PubSub, PubSubResolver, PubSubSourceStream};
pub use request::{RequestContext, RootValueFactory};
pub use resolver::{
    AsyncFnResolver, DefaultResolver, FnResolver, FnSubscribeResolver, Resolver, ResolverArgs,
    ResolverContext, ResolverError, ResolverInfo, ResolverMap, ResolverResult, SubscribeResolver,
};
pub use result::{
    BuilderError, NullIgnoreCondition, OperationResult, OperationResultBuilder, ResultError,
    ResultTree,
};
pub use services::{ServiceProvider, ServiceScope, Services};
pub use source_stream::{ChannelSourceStream, EventStream, SourceStream};
pub use subscription::{
    Subscription, SubscriptionEnumerable, SubscriptionEnumerator, SubscriptionExecutor,
};
