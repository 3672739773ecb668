//! Compiled operation descriptors.
//!
//! Parsing and validation happen before an operation reaches the runtime;
//! these types only carry what execution needs.

use crate::resolver::SubscribeResolver;
use conduit_core::{codes, GraphqlError, Path};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Variable values of one request.
pub type Variables = IndexMap<String, Value>;

/// Coerced argument values of one field.
pub type Arguments = IndexMap<String, Value>;

/// The kind of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        })
    }
}

/// An argument as written in the document.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentValue {
    /// A literal value.
    Literal(Value),
    /// A reference to a variable, with its declared default.
    Variable {
        name: String,
        default: Option<Value>,
    },
}

/// An argument of a selected field.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub value: ArgumentValue,
    /// Required arguments must resolve to a non-null value.
    pub required: bool,
}

impl Argument {
    pub fn literal(value: Value) -> Self {
        Self {
            value: ArgumentValue::Literal(value),
            required: false,
        }
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Self {
            value: ArgumentValue::Variable {
                name: name.into(),
                default: None,
            },
            required: false,
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        if let ArgumentValue::Variable { default: d, .. } = &mut self.value {
            *d = Some(default);
        }
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A selected field.
#[derive(Clone)]
pub struct Selection {
    /// The alias, or the field name when there is no alias.
    pub response_name: String,
    pub field_name: String,
    /// Name of the type the field returns.
    pub return_type: String,
    pub arguments: IndexMap<String, Argument>,
    pub non_null: bool,
    pub selections: Vec<Selection>,
    /// Creates the source stream when this is a subscription root field.
    pub subscribe: Option<Arc<dyn SubscribeResolver>>,
}

impl Selection {
    pub fn new(field_name: impl Into<String>) -> Self {
        let field_name = field_name.into();
        Self {
            response_name: field_name.clone(),
            field_name,
            return_type: String::new(),
            arguments: IndexMap::new(),
            non_null: false,
            selections: Vec::new(),
            subscribe: None,
        }
    }

    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.response_name = alias.into();
        self
    }

    #[must_use]
    pub fn with_return_type(mut self, ty: impl Into<String>) -> Self {
        self.return_type = ty.into();
        self
    }

    #[must_use]
    pub fn with_argument(mut self, name: impl Into<String>, argument: Argument) -> Self {
        self.arguments.insert(name.into(), argument);
        self
    }

    #[must_use]
    pub fn non_null(mut self) -> Self {
        self.non_null = true;
        self
    }

    #[must_use]
    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selections.push(selection);
        self
    }

    #[must_use]
    pub fn with_subscribe<R: SubscribeResolver + 'static>(mut self, resolver: R) -> Self {
        self.subscribe = Some(Arc::new(resolver));
        self
    }

    /// Coerces the field arguments against the request variables.
    ///
    /// Variables that are not provided fall back to their default. A
    /// required argument that ends up null is a coercion error.
    pub fn coerce_arguments(
        &self,
        variables: &Variables,
        path: &Path,
    ) -> Result<Arguments, Vec<GraphqlError>> {
        let mut coerced = Arguments::with_capacity(self.arguments.len());
        let mut errors = Vec::new();

        for (name, argument) in &self.arguments {
            let value = match &argument.value {
                ArgumentValue::Literal(value) => Some(value.clone()),
                ArgumentValue::Variable { name: var, default } => {
                    variables.get(var).cloned().or_else(|| default.clone())
                }
            };

            match value {
                Some(value) if !value.is_null() => {
                    coerced.insert(name.clone(), value);
                }
                _ if argument.required => {
                    errors.push(
                        GraphqlError::new(format!(
                            "The argument `{name}` of field `{}` is required and cannot be null.",
                            self.field_name
                        ))
                        .with_path(path.clone())
                        .with_code(codes::ARGUMENT_COERCION)
                        .with_extension("argument", Value::String(name.clone())),
                    );
                }
                Some(value) => {
                    coerced.insert(name.clone(), value);
                }
                None => {}
            }
        }

        if errors.is_empty() {
            Ok(coerced)
        } else {
            Err(errors)
        }
    }
}

impl fmt::Debug for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selection")
            .field("response_name", &self.response_name)
            .field("field_name", &self.field_name)
            .field("return_type", &self.return_type)
            .field("arguments", &self.arguments)
            .field("non_null", &self.non_null)
            .field("selections", &self.selections)
            .field("has_subscribe", &self.subscribe.is_some())
            .finish()
    }
}

/// A compiled operation.
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: String,
    pub name: Option<String>,
    pub kind: OperationKind,
    /// Name of the root type, e.g. `Subscription`.
    pub root_type: String,
    pub selections: Vec<Selection>,
}

impl Operation {
    pub fn new(id: impl Into<String>, kind: OperationKind) -> Self {
        let root_type = match kind {
            OperationKind::Query => "Query",
            OperationKind::Mutation => "Mutation",
            OperationKind::Subscription => "Subscription",
        };
        Self {
            id: id.into(),
            name: None,
            kind,
            root_type: root_type.to_string(),
            selections: Vec::new(),
        }
    }

    /// A subscription operation with a single root field.
    pub fn subscription(id: impl Into<String>, root: Selection) -> Self {
        Self::new(id, OperationKind::Subscription).with_selection(root)
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selections.push(selection);
        self
    }

    /// The first root selection.
    pub fn root_selection(&self) -> Option<&Selection> {
        self.selections.first()
    }

    /// Name used in logs and errors.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_literals_and_variables() {
        let selection = Selection::new("onMessage")
            .with_argument("topic", Argument::variable("topic"))
            .with_argument("limit", Argument::literal(json!(10)));

        let mut variables = Variables::new();
        variables.insert("topic".into(), json!("news"));

        let args = selection.coerce_arguments(&variables, &Path::root()).unwrap();
        assert_eq!(args["topic"], json!("news"));
        assert_eq!(args["limit"], json!(10));
    }

    #[test]
    fn test_coerce_falls_back_to_default() {
        let selection = Selection::new("onMessage")
            .with_argument("topic", Argument::variable("topic").with_default(json!("all")));

        let args = selection
            .coerce_arguments(&Variables::new(), &Path::root())
            .unwrap();
        assert_eq!(args["topic"], json!("all"));
    }

    #[test]
    fn test_coerce_missing_required() {
        let selection = Selection::new("onMessage")
            .with_argument("topic", Argument::variable("topic").required())
            .with_argument("room", Argument::literal(Value::Null).required());

        let errors = selection
            .coerce_arguments(&Variables::new(), &Path::from_iter(["onMessage"]))
            .unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].code.as_deref(), Some(codes::ARGUMENT_COERCION));
        assert_eq!(errors[0].path, Some(Path::from_iter(["onMessage"])));
    }

    #[test]
    fn test_optional_argument_omitted() {
        let selection = Selection::new("onMessage").with_argument("topic", Argument::variable("topic"));
        let args = selection
            .coerce_arguments(&Variables::new(), &Path::root())
            .unwrap();
        assert!(args.is_empty());
    }

    #[test]
    fn test_operation_root() {
        let operation = Operation::subscription("op1", Selection::new("onMessage")).with_name("OnMessage");
        assert_eq!(operation.kind, OperationKind::Subscription);
        assert_eq!(operation.root_type, "Subscription");
        assert_eq!(operation.root_selection().unwrap().field_name, "onMessage");
        assert_eq!(operation.display_name(), "OnMessage");
    }
}
