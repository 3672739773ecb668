//! Request context.

use crate::context::RootValue;
use crate::operation::{Operation, Variables};
use crate::services::{ServiceProvider, Services};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Creates a root value from the services of a request.
pub type RootValueFactory = Arc<dyn Fn(&Services) -> Option<RootValue> + Send + Sync>;

fn next_request_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("req_{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Everything known about a request before it executes.
#[derive(Clone)]
pub struct RequestContext {
    id: String,
    operation: Arc<Operation>,
    variables: Vec<Variables>,
    services: Arc<ServiceProvider>,
    root_value: Option<RootValue>,
    root_value_factory: Option<RootValueFactory>,
}

impl RequestContext {
    pub fn new(operation: impl Into<Arc<Operation>>, services: impl Into<Arc<ServiceProvider>>) -> Self {
        Self {
            id: next_request_id(),
            operation: operation.into(),
            variables: Vec::new(),
            services: services.into(),
            root_value: None,
            root_value_factory: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Adds a variable set. Execution uses the first set.
    #[must_use]
    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables.push(variables);
        self
    }

    #[must_use]
    pub fn with_root_value(mut self, root_value: RootValue) -> Self {
        self.root_value = Some(root_value);
        self
    }

    #[must_use]
    pub fn with_root_value_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Services) -> Option<RootValue> + Send + Sync + 'static,
    {
        self.root_value_factory = Some(Arc::new(factory));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn operation(&self) -> &Arc<Operation> {
        &self.operation
    }

    /// The variable set used for execution. Empty if none was given.
    pub fn variables(&self) -> Variables {
        self.variables.first().cloned().unwrap_or_default()
    }

    pub fn variable_sets(&self) -> &[Variables] {
        &self.variables
    }

    pub fn services(&self) -> &Arc<ServiceProvider> {
        &self.services
    }

    /// The root value given with the request.
    pub fn root_value(&self) -> Option<&RootValue> {
        self.root_value.as_ref()
    }

    /// Resolves the root value: the request's own value wins, then the
    /// factory is asked.
    pub fn resolve_root_value(&self, services: &Services) -> Option<RootValue> {
        if let Some(ref value) = self.root_value {
            return Some(Arc::clone(value));
        }
        self.root_value_factory.as_ref().and_then(|factory| factory(services))
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("operation", &self.operation.id)
            .field("variable_sets", &self.variables.len())
            .field("has_root_value", &self.root_value.is_some())
            .field("has_root_value_factory", &self.root_value_factory.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Selection;
    use serde_json::json;

    fn request() -> RequestContext {
        let operation = Operation::subscription("op", Selection::new("onMessage"));
        RequestContext::new(operation, ServiceProvider::default())
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(request().id(), request().id());
        assert_eq!(request().with_id("fixed").id(), "fixed");
    }

    #[test]
    fn test_first_variable_set_is_used() {
        let mut first = Variables::new();
        first.insert("a".into(), json!(1));
        let mut second = Variables::new();
        second.insert("a".into(), json!(2));

        let request = request().with_variables(first).with_variables(second);
        assert_eq!(request.variables()["a"], json!(1));
        assert_eq!(request.variable_sets().len(), 2);
    }

    #[test]
    fn test_root_value_precedence() {
        let services = Services::new();
        let request = request().with_root_value_factory(|_| Some(Arc::new("factory") as RootValue));
        let value = request.resolve_root_value(&services).unwrap();
        assert_eq!(value.downcast_ref::<&str>(), Some(&"factory"));

        let request = request.with_root_value(Arc::new("given"));
        let value = request.resolve_root_value(&services).unwrap();
        assert_eq!(value.downcast_ref::<&str>(), Some(&"given"));
    }
}
