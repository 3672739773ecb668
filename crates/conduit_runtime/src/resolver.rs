//! Resolvers.
//!
//! Field resolvers produce values for selected fields. Subscribe resolvers
//! create the source stream of a subscription root field.

use crate::context::{RootValue, ScopedContextData, EVENT_MESSAGE};
use crate::dispatcher::BatchDispatcher;
use crate::operation::Arguments;
use crate::services::Services;
use crate::source_stream::SourceStream;
use async_trait::async_trait;
use conduit_core::{codes, GraphqlError, Path};
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Arguments passed to a resolver.
#[derive(Debug, Clone, Default)]
pub struct ResolverArgs {
    args: Arguments,
}

impl ResolverArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// Gets an argument as a specific type.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.args
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Gets a required argument.
    pub fn require<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T, ResolverError> {
        let value = self
            .args
            .get(name)
            .ok_or_else(|| ResolverError::MissingArgument(name.to_string()))?;
        serde_json::from_value(value.clone())
            .map_err(|e| ResolverError::ArgumentParse(name.to_string(), e.to_string()))
    }

    pub fn all(&self) -> &Arguments {
        &self.args
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.args.insert(name.into(), value);
    }
}

impl From<Arguments> for ResolverArgs {
    fn from(args: Arguments) -> Self {
        Self { args }
    }
}

/// Info about the field being resolved.
#[derive(Debug, Clone)]
pub struct ResolverInfo {
    pub field_name: String,
    pub response_name: String,
    pub parent_type: String,
    pub return_type: String,
    pub path: Path,
}

impl ResolverInfo {
    pub fn new(field_name: impl Into<String>, parent_type: impl Into<String>) -> Self {
        let field_name = field_name.into();
        Self {
            response_name: field_name.clone(),
            path: Path::root().append_field(field_name.clone()),
            field_name,
            parent_type: parent_type.into(),
            return_type: String::new(),
        }
    }

    #[must_use]
    pub fn with_return_type(mut self, ty: impl Into<String>) -> Self {
        self.return_type = ty.into();
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: Path) -> Self {
        self.path = path;
        self
    }

    #[must_use]
    pub fn with_response_name(mut self, name: impl Into<String>) -> Self {
        self.response_name = name.into();
        self
    }
}

/// Errors returned by resolvers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolverError {
    #[error("field not found: {0}")]
    FieldNotFound(String),

    #[error("missing required argument: {0}")]
    MissingArgument(String),

    #[error("failed to parse argument '{0}': {1}")]
    ArgumentParse(String, String),

    #[error("{0}")]
    Custom(String),
}

impl ResolverError {
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    /// Converts the error into a field error at `path`.
    pub fn into_graphql_error(self, path: Path) -> GraphqlError {
        GraphqlError::from_error(&self)
            .with_path(path)
            .with_code(codes::RESOLVER_ERROR)
    }
}

/// Context handed to resolvers.
///
/// Subscribe resolvers get it mutably: they may change the scoped context
/// data (the final map is kept for every event) and report errors.
#[derive(Clone)]
pub struct ResolverContext {
    root_value: Option<RootValue>,
    scoped: ScopedContextData,
    services: Services,
    dispatcher: Arc<dyn BatchDispatcher>,
    reported: Vec<GraphqlError>,
}

impl ResolverContext {
    pub fn new(
        services: Services,
        dispatcher: Arc<dyn BatchDispatcher>,
        root_value: Option<RootValue>,
        scoped: ScopedContextData,
    ) -> Self {
        Self {
            root_value,
            scoped,
            services,
            dispatcher,
            reported: Vec::new(),
        }
    }

    pub fn root_value(&self) -> Option<&RootValue> {
        self.root_value.as_ref()
    }

    /// The root value downcast to `T`.
    pub fn root_value_as<T: 'static>(&self) -> Option<&T> {
        self.root_value.as_ref()?.downcast_ref()
    }

    pub fn scoped_context_data(&self) -> &ScopedContextData {
        &self.scoped
    }

    pub fn set_scoped_context_data(&mut self, key: impl Into<String>, value: Value) {
        self.scoped.insert(key.into(), value);
    }

    pub fn remove_scoped_context_data(&mut self, key: &str) -> Option<Value> {
        self.scoped.remove(key)
    }

    /// The subscription event being processed, if any.
    pub fn event_message(&self) -> Option<&Value> {
        self.scoped.get(EVENT_MESSAGE)
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn dispatcher(&self) -> &Arc<dyn BatchDispatcher> {
        &self.dispatcher
    }

    /// Records an error without failing the resolver.
    pub fn report_error(&mut self, error: GraphqlError) {
        self.reported.push(error);
    }

    pub fn reported_errors(&self) -> &[GraphqlError] {
        &self.reported
    }

    /// Splits the context into its scoped data and reported errors.
    pub fn into_parts(self) -> (ScopedContextData, Vec<GraphqlError>) {
        (self.scoped, self.reported)
    }
}

impl fmt::Debug for ResolverContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverContext")
            .field("has_root_value", &self.root_value.is_some())
            .field("scoped", &self.scoped)
            .field("services", &self.services)
            .field("reported", &self.reported)
            .finish()
    }
}

/// Result type for resolvers.
pub type ResolverResult = Result<Value, ResolverError>;

/// Future type for async resolvers.
pub type ResolverFuture<'a> = Pin<Box<dyn Future<Output = ResolverResult> + Send + 'a>>;

/// Trait for field resolvers.
pub trait Resolver: Send + Sync {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a ResolverContext,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a>;
}

pub type BoxedResolver = Box<dyn Resolver>;

/// A sync resolver function.
pub type SyncResolverFn = Arc<
    dyn Fn(&Value, &ResolverArgs, &ResolverContext, &ResolverInfo) -> ResolverResult + Send + Sync,
>;

/// Wraps a sync function as a [`Resolver`].
pub struct FnResolver {
    func: SyncResolverFn,
}

impl FnResolver {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value, &ResolverArgs, &ResolverContext, &ResolverInfo) -> ResolverResult
            + Send
            + Sync
            + 'static,
    {
        Self { func: Arc::new(f) }
    }
}

impl Resolver for FnResolver {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a ResolverContext,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        let result = (self.func)(parent, args, ctx, info);
        Box::pin(async move { result })
    }
}

/// An async resolver function.
pub type AsyncResolverFn = Arc<
    dyn Fn(Value, ResolverArgs, ResolverContext, ResolverInfo) -> ResolverFuture<'static>
        + Send
        + Sync,
>;

/// Wraps an async function as a [`Resolver`].
pub struct AsyncFnResolver {
    func: AsyncResolverFn,
}

impl AsyncFnResolver {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value, ResolverArgs, ResolverContext, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolverResult> + Send + 'static,
    {
        Self {
            func: Arc::new(move |parent, args, ctx, info| Box::pin(f(parent, args, ctx, info))),
        }
    }
}

impl Resolver for AsyncFnResolver {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a ResolverContext,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        (self.func)(parent.clone(), args.clone(), ctx.clone(), info.clone())
    }
}

/// Reads the field from the parent object, also trying the snake_case
/// spelling of the field name.
pub struct DefaultResolver;

impl Resolver for DefaultResolver {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        _args: &'a ResolverArgs,
        _ctx: &'a ResolverContext,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        let field_name = &info.field_name;
        let result = match parent {
            Value::Object(map) => Ok(map
                .get(field_name)
                .or_else(|| map.get(&to_snake_case(field_name)))
                .cloned()
                .unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            _ => Err(ResolverError::FieldNotFound(field_name.clone())),
        };
        Box::pin(async move { result })
    }
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(c.to_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}

/// Resolvers keyed by type and field.
pub struct ResolverMap {
    resolvers: FxHashMap<String, BoxedResolver>,
    default_resolver: Option<BoxedResolver>,
}

impl Default for ResolverMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverMap {
    /// Creates a map that falls back to [`DefaultResolver`].
    pub fn new() -> Self {
        Self {
            resolvers: FxHashMap::default(),
            default_resolver: Some(Box::new(DefaultResolver)),
        }
    }

    pub fn register<R: Resolver + 'static>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        resolver: R,
    ) {
        let key = format!("{}.{}", type_name.into(), field_name.into());
        self.resolvers.insert(key, Box::new(resolver));
    }

    pub fn register_fn<F>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        f: F,
    ) where
        F: Fn(&Value, &ResolverArgs, &ResolverContext, &ResolverInfo) -> ResolverResult
            + Send
            + Sync
            + 'static,
    {
        self.register(type_name, field_name, FnResolver::new(f));
    }

    pub fn register_async<F, Fut>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        f: F,
    ) where
        F: Fn(Value, ResolverArgs, ResolverContext, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolverResult> + Send + 'static,
    {
        self.register(type_name, field_name, AsyncFnResolver::new(f));
    }

    /// The registered resolver, or the default one.
    pub fn get(&self, type_name: &str, field_name: &str) -> Option<&dyn Resolver> {
        self.get_registered(type_name, field_name)
            .or(self.default_resolver.as_deref())
    }

    /// The registered resolver, ignoring the default.
    pub fn get_registered(&self, type_name: &str, field_name: &str) -> Option<&dyn Resolver> {
        self.resolvers
            .get(&format!("{type_name}.{field_name}"))
            .map(|r| r.as_ref())
    }

    pub fn set_default<R: Resolver + 'static>(&mut self, resolver: R) {
        self.default_resolver = Some(Box::new(resolver));
    }

    pub fn remove_default(&mut self) {
        self.default_resolver = None;
    }
}

impl fmt::Debug for ResolverMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverMap")
            .field("resolver_count", &self.resolvers.len())
            .field("has_default", &self.default_resolver.is_some())
            .finish()
    }
}

/// Creates the source stream of a subscription root field.
#[async_trait]
pub trait SubscribeResolver: Send + Sync {
    async fn subscribe(
        &self,
        args: &ResolverArgs,
        ctx: &mut ResolverContext,
        info: &ResolverInfo,
    ) -> Result<Arc<dyn SourceStream>, ResolverError>;
}

/// A sync subscribe function.
pub type SubscribeFn = Arc<
    dyn Fn(&ResolverArgs, &mut ResolverContext, &ResolverInfo) -> Result<Arc<dyn SourceStream>, ResolverError>
        + Send
        + Sync,
>;

/// Wraps a sync function as a [`SubscribeResolver`].
pub struct FnSubscribeResolver {
    func: SubscribeFn,
}

impl FnSubscribeResolver {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ResolverArgs, &mut ResolverContext, &ResolverInfo) -> Result<Arc<dyn SourceStream>, ResolverError>
            + Send
            + Sync
            + 'static,
    {
        Self { func: Arc::new(f) }
    }
}

#[async_trait]
impl SubscribeResolver for FnSubscribeResolver {
    async fn subscribe(
        &self,
        args: &ResolverArgs,
        ctx: &mut ResolverContext,
        info: &ResolverInfo,
    ) -> Result<Arc<dyn SourceStream>, ResolverError> {
        (self.func)(args, ctx, info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::NoopBatchDispatcher;
    use serde_json::json;

    fn ctx() -> ResolverContext {
        ResolverContext::new(
            Services::new(),
            Arc::new(NoopBatchDispatcher),
            None,
            ScopedContextData::new(),
        )
    }

    #[test]
    fn test_resolver_args() {
        let mut args = ResolverArgs::new();
        args.set("id", json!(123));
        args.set("name", json!("test"));

        assert_eq!(args.get_as::<i64>("id"), Some(123));
        assert_eq!(args.get_as::<String>("name"), Some("test".to_string()));
        assert_eq!(args.get_as::<i64>("missing"), None);
        assert_eq!(
            args.require::<i64>("missing"),
            Err(ResolverError::MissingArgument("missing".into()))
        );
    }

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("firstName"), "first_name");
        assert_eq!(to_snake_case("id"), "id");
    }

    #[test]
    fn test_scoped_context_data() {
        let mut ctx = ctx();
        assert!(ctx.event_message().is_none());
        ctx.set_scoped_context_data(EVENT_MESSAGE, json!({"n": 1}));
        ctx.report_error(GraphqlError::new("oops"));

        let snapshot = ctx.scoped_context_data().clone();
        ctx.set_scoped_context_data("extra", json!(true));
        assert!(!snapshot.contains_key("extra"));

        let (scoped, errors) = ctx.into_parts();
        assert_eq!(scoped.get(EVENT_MESSAGE), Some(&json!({"n": 1})));
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn test_default_resolver() {
        let parent = json!({"name": "Alice", "created_at": 3});
        let args = ResolverArgs::new();
        let ctx = ctx();

        let info = ResolverInfo::new("name", "User");
        let result = DefaultResolver.resolve(&parent, &args, &ctx, &info).await;
        assert_eq!(result.unwrap(), json!("Alice"));

        let info = ResolverInfo::new("createdAt", "User");
        let result = DefaultResolver.resolve(&parent, &args, &ctx, &info).await;
        assert_eq!(result.unwrap(), json!(3));

        let info = ResolverInfo::new("name", "User");
        let result = DefaultResolver.resolve(&json!(1), &args, &ctx, &info).await;
        assert_eq!(result, Err(ResolverError::FieldNotFound("name".into())));
    }

    #[tokio::test]
    async fn test_resolver_map() {
        let mut map = ResolverMap::new();
        map.register_fn("Message", "upper", |parent, _args, _ctx, _info| {
            let text = parent["text"].as_str().unwrap_or_default();
            Ok(json!(text.to_uppercase()))
        });
        map.register_async("Message", "echo", |_parent, args, _ctx, _info| async move {
            Ok(args.get("value").cloned().unwrap_or(Value::Null))
        });

        let parent = json!({"text": "hi"});
        let mut args = ResolverArgs::new();
        args.set("value", json!(7));
        let ctx = ctx();

        let upper = map.get("Message", "upper").unwrap();
        let info = ResolverInfo::new("upper", "Message");
        assert_eq!(upper.resolve(&parent, &args, &ctx, &info).await.unwrap(), json!("HI"));

        let echo = map.get("Message", "echo").unwrap();
        let info = ResolverInfo::new("echo", "Message");
        assert_eq!(echo.resolve(&parent, &args, &ctx, &info).await.unwrap(), json!(7));

        assert!(map.get_registered("Message", "text").is_none());
        assert!(map.get("Message", "text").is_some());
        map.remove_default();
        assert!(map.get("Message", "text").is_none());
    }

    #[test]
    fn test_resolver_error_to_graphql() {
        let error = ResolverError::custom("boom").into_graphql_error(Path::from_iter(["onMessage"]));
        assert_eq!(error.message, "boom");
        assert_eq!(error.code.as_deref(), Some(codes::RESOLVER_ERROR));
        assert_eq!(error.path, Some(Path::from_iter(["onMessage"])));
    }
}
