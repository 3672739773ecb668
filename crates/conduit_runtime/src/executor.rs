//! Query execution.

use crate::context::{OperationContext, ScopedContextData};
use crate::error::ExecutionError;
use crate::operation::{Selection, Variables};
use crate::resolver::{ResolverArgs, ResolverContext, ResolverInfo, ResolverMap};
use crate::result::{NodeId, NullIgnoreCondition, OperationResult, ResultTree};
use async_trait::async_trait;
use conduit_core::{codes, GraphqlError, Path};
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Executes one operation on an initialized operation context.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Runs the operation and freezes its result.
    ///
    /// `scoped` is the context data visible to every resolver of this run.
    async fn execute(
        &self,
        ctx: &mut OperationContext,
        scoped: ScopedContextData,
    ) -> Result<OperationResult, ExecutionError>;
}

/// Executor configuration.
#[derive(Debug, Clone, Default)]
pub struct ResolverExecutorConfig {
    /// Which nulls are left out of the written data.
    pub null_ignore_condition: NullIgnoreCondition,
}

/// Executes selections against a [`ResolverMap`].
///
/// Root fields without a registered resolver resolve to the current
/// subscription event. Fields are resolved one after another; batched work
/// is dispatched once all fields are written.
#[derive(Debug)]
pub struct ResolverExecutor {
    resolvers: Arc<ResolverMap>,
    config: ResolverExecutorConfig,
}

impl ResolverExecutor {
    pub fn new(resolvers: impl Into<Arc<ResolverMap>>) -> Self {
        Self::with_config(resolvers, ResolverExecutorConfig::default())
    }

    pub fn with_config(resolvers: impl Into<Arc<ResolverMap>>, config: ResolverExecutorConfig) -> Self {
        Self {
            resolvers: resolvers.into(),
            config,
        }
    }

    pub fn config(&self) -> &ResolverExecutorConfig {
        &self.config
    }
}

#[async_trait]
impl QueryExecutor for ResolverExecutor {
    async fn execute(
        &self,
        ctx: &mut OperationContext,
        scoped: ScopedContextData,
    ) -> Result<OperationResult, ExecutionError> {
        let operation = Arc::clone(ctx.operation()?);
        let dispatcher = Arc::clone(ctx.dispatcher()?);
        let resolver_ctx = ResolverContext::new(
            ctx.services()?.clone(),
            Arc::clone(&dispatcher),
            ctx.root_value()?.cloned(),
            scoped,
        );
        let event = resolver_ctx.event_message().cloned().unwrap_or(Value::Null);

        let mut execution = Execution {
            resolvers: &self.resolvers,
            resolver_ctx,
            variables: ctx.variables()?.clone(),
            errors: Vec::new(),
        };

        let tree = ctx.result_tree_mut();
        let root = tree.rent_object(operation.selections.len());
        for (index, selection) in operation.selections.iter().enumerate() {
            let path = Path::root().append_field(selection.response_name.as_str());
            let value = if self
                .resolvers
                .get_registered(&operation.root_type, &selection.field_name)
                .is_some()
            {
                execution
                    .resolve_field(&operation.root_type, selection, &event, &path)
                    .await
            } else {
                event.clone()
            };
            execution
                .complete(tree, root, index, selection, value, &path)
                .await?;
        }

        dispatcher.dispatch().await;

        let data = tree
            .to_map(root, self.config.null_ignore_condition)
            .map_err(|e| ExecutionError::Resolver(format!("failed to write result: {e}")))?;

        debug!(
            operation = %operation.display_name(),
            errors = execution.errors.len(),
            "operation executed"
        );

        let mut result = ctx.take_result();
        result.add_errors(execution.errors).set_data(data);
        Ok(result.build())
    }
}

struct Execution<'a> {
    resolvers: &'a ResolverMap,
    resolver_ctx: ResolverContext,
    variables: Variables,
    errors: Vec<GraphqlError>,
}

impl Execution<'_> {
    /// Runs the resolver of one field. Failures are recorded and resolve
    /// to null.
    async fn resolve_field(
        &mut self,
        type_name: &str,
        selection: &Selection,
        parent: &Value,
        path: &Path,
    ) -> Value {
        let args = match selection.coerce_arguments(&self.variables, path) {
            Ok(args) => ResolverArgs::from(args),
            Err(errors) => {
                self.errors.extend(errors);
                return Value::Null;
            }
        };
        let Some(resolver) = self.resolvers.get(type_name, &selection.field_name) else {
            return Value::Null;
        };

        let info = ResolverInfo::new(selection.field_name.as_str(), type_name)
            .with_response_name(selection.response_name.as_str())
            .with_return_type(selection.return_type.as_str())
            .with_path(path.clone());

        let resolved = resolver.resolve(parent, &args, &self.resolver_ctx, &info).await;
        match resolved {
            Ok(value) => value,
            Err(error) => {
                self.errors.push(error.into_graphql_error(path.clone()));
                Value::Null
            }
        }
    }

    fn resolve_fields<'b>(
        &'b mut self,
        tree: &'b mut ResultTree,
        node: NodeId,
        type_name: &'b str,
        selections: &'b [Selection],
        parent: &'b Value,
        path: &'b Path,
    ) -> BoxFuture<'b, Result<(), ExecutionError>> {
        Box::pin(async move {
            for (index, selection) in selections.iter().enumerate() {
                let field_path = path.append_field(selection.response_name.as_str());
                let value = self
                    .resolve_field(type_name, selection, parent, &field_path)
                    .await;
                self.complete(tree, node, index, selection, value, &field_path)
                    .await?;
            }
            Ok(())
        })
    }

    /// Writes a resolved value into slot `index` of `parent`.
    fn complete<'b>(
        &'b mut self,
        tree: &'b mut ResultTree,
        parent: NodeId,
        index: usize,
        selection: &'b Selection,
        value: Value,
        path: &'b Path,
    ) -> BoxFuture<'b, Result<(), ExecutionError>> {
        Box::pin(async move {
            let name = selection.response_name.as_str();
            let nullable = !selection.non_null;
            let children = &selection.selections;

            match value {
                Value::Null => {
                    tree.set_field(parent, index, name, Value::Null, nullable)?;
                    if !nullable {
                        self.errors.push(
                            GraphqlError::new(format!(
                                "Cannot return null for non-nullable field `{}`.",
                                selection.field_name
                            ))
                            .with_path(path.clone())
                            .with_code(codes::NON_NULL_VIOLATION),
                        );
                        tree.propagate_null(parent)?;
                    }
                }
                Value::Object(_) if !children.is_empty() => {
                    let child = tree.rent_object(children.len());
                    tree.set_field(parent, index, name, child, nullable)?;
                    self.resolve_fields(tree, child, &selection.return_type, children, &value, path)
                        .await?;
                }
                Value::Array(items) if !children.is_empty() => {
                    let list = tree.rent_list(items.len());
                    tree.set_field(parent, index, name, list, nullable)?;
                    for (i, item) in items.iter().enumerate() {
                        if item.is_object() {
                            let child = tree.rent_object(children.len());
                            tree.push(list, child)?;
                            let item_path = path.append_index(i);
                            self.resolve_fields(
                                tree,
                                child,
                                &selection.return_type,
                                children,
                                item,
                                &item_path,
                            )
                            .await?;
                        } else {
                            tree.push(list, item.clone())?;
                        }
                    }
                }
                value => tree.set_field(parent, index, name, value, nullable)?,
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EVENT_MESSAGE;
    use crate::dispatcher::QueuedBatchDispatcher;
    use crate::operation::{Argument, Operation};
    use crate::request::RequestContext;
    use crate::resolver::ResolverError;
    use crate::services::{ServiceProvider, Services};
    use serde_json::json;

    fn context(operation: Operation) -> OperationContext {
        let request = RequestContext::new(operation, ServiceProvider::default());
        let mut ctx = OperationContext::new();
        ctx.initialize(&request, Services::new(), Arc::new(QueuedBatchDispatcher::new()), None);
        ctx
    }

    fn event(payload: Value) -> ScopedContextData {
        let mut scoped = ScopedContextData::new();
        scoped.insert(EVENT_MESSAGE.to_string(), payload);
        scoped
    }

    fn message_selection() -> Selection {
        Selection::new("onMessage")
            .with_return_type("Message")
            .with_selection(Selection::new("id").non_null())
            .with_selection(Selection::new("text"))
    }

    #[tokio::test]
    async fn test_root_field_resolves_to_event() {
        let executor = ResolverExecutor::new(ResolverMap::new());
        let mut ctx = context(Operation::subscription("op", message_selection()));

        let result = executor
            .execute(&mut ctx, event(json!({"id": "1", "text": "hi", "secret": true})))
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(result.data()).unwrap(),
            json!({"onMessage": {"id": "1", "text": "hi"}})
        );
        assert!(result.errors().is_none());
    }

    #[tokio::test]
    async fn test_registered_resolvers() {
        let mut resolvers = ResolverMap::new();
        resolvers.register_fn("Message", "text", |parent, _args, _ctx, _info| {
            let text = parent["text"].as_str().unwrap_or_default();
            Ok(json!(text.to_uppercase()))
        });
        let executor = ResolverExecutor::new(resolvers);
        let mut ctx = context(Operation::subscription("op", message_selection()));

        let result = executor
            .execute(&mut ctx, event(json!({"id": "1", "text": "hi"})))
            .await
            .unwrap();
        assert_eq!(result.data().unwrap()["onMessage"]["text"], json!("HI"));
    }

    #[tokio::test]
    async fn test_non_null_propagates_to_nullable_parent() {
        let executor = ResolverExecutor::new(ResolverMap::new());
        let mut ctx = context(Operation::subscription("op", message_selection()));

        let result = executor
            .execute(&mut ctx, event(json!({"text": "no id"})))
            .await
            .unwrap();

        assert_eq!(result.data().unwrap()["onMessage"], Value::Null);
        let errors = result.errors().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code.as_deref(), Some(codes::NON_NULL_VIOLATION));
        assert_eq!(errors[0].path, Some(Path::from_iter(["onMessage", "id"])));
    }

    #[tokio::test]
    async fn test_non_null_root_nulls_data() {
        let executor = ResolverExecutor::new(ResolverMap::new());
        let mut ctx = context(Operation::subscription("op", Selection::new("onMessage").non_null()));

        let result = executor.execute(&mut ctx, ScopedContextData::new()).await.unwrap();
        assert!(result.is_data_set());
        assert!(result.data().is_none());
    }

    #[tokio::test]
    async fn test_resolver_errors_and_lists() {
        let mut resolvers = ResolverMap::new();
        resolvers.register_fn("Subscription", "feed", |_parent, args, _ctx, _info| {
            let count: usize = args.require("count")?;
            Ok(Value::Array((0..count).map(|i| json!({"n": i})).collect()))
        });
        resolvers.register_fn("Item", "broken", |_parent, _args, _ctx, _info| {
            Err(ResolverError::custom("broken"))
        });
        let selection = Selection::new("feed")
            .with_return_type("Item")
            .with_argument("count", Argument::variable("count").with_default(json!(2)))
            .with_selection(Selection::new("n"))
            .with_selection(Selection::new("broken"));
        let executor = ResolverExecutor::with_config(
            resolvers,
            ResolverExecutorConfig {
                null_ignore_condition: NullIgnoreCondition::Fields,
            },
        );
        let mut ctx = context(Operation::subscription("op", selection));

        let result = executor.execute(&mut ctx, ScopedContextData::new()).await.unwrap();
        assert_eq!(
            serde_json::to_value(result.data()).unwrap(),
            json!({"feed": [{"n": 0}, {"n": 1}]})
        );
        let paths: Vec<_> = result
            .errors()
            .unwrap()
            .iter()
            .map(|e| e.path.clone().unwrap().to_string())
            .collect();
        assert_eq!(paths, vec!["/feed[0]/broken", "/feed[1]/broken"]);
    }

    #[tokio::test]
    async fn test_uninitialized_context() {
        let executor = ResolverExecutor::new(ResolverMap::new());
        let mut ctx = OperationContext::new();
        let err = executor.execute(&mut ctx, ScopedContextData::new()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::ContextNotInitialized));
    }
}
