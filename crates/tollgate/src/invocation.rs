// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use serde_json::Value;

/// A single call travelling through a [`Chain`][crate::Chain].
///
/// The identity of the call (`target`, `operation`, `arguments`) is fixed at construction.
/// The attribute bag is mutable and is how interceptors pass state to each other, for example
/// the retry counter or the metrics re-entrancy depth.
///
/// An invocation is owned by exactly one thread at a time. When the dispatch stage hands a call
/// to a worker, the worker receives its own copy and the caller's copy is no longer consulted.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use tollgate::Invocation;
///
/// let mut invocation = Invocation::new("orders.place").argument(json!({ "sku": "A-1" }));
/// invocation.set_attribute("trace_id", json!("abc"));
///
/// assert_eq!(invocation.operation(), "orders.place");
/// assert_eq!(invocation.arguments().len(), 1);
/// assert_eq!(invocation.attribute("trace_id"), Some(&json!("abc")));
/// ```
#[derive(Clone)]
pub struct Invocation {
    target: Option<Arc<dyn Any + Send + Sync>>,
    operation: Cow<'static, str>,
    arguments: Vec<Value>,
    attributes: HashMap<String, Value>,
}

impl Invocation {
    /// Creates an invocation of `operation` with no target and no arguments.
    #[must_use]
    pub fn new(operation: impl Into<Cow<'static, str>>) -> Self {
        Self {
            target: None,
            operation: operation.into(),
            arguments: Vec::new(),
            attributes: HashMap::new(),
        }
    }

    /// Sets the opaque target handle the innermost [`Target`][crate::Target] can downcast.
    #[must_use]
    pub fn target<T: Any + Send + Sync>(mut self, target: Arc<T>) -> Self {
        let target: Arc<dyn Any + Send + Sync> = target;
        self.target = Some(target);
        self
    }

    /// Appends a positional argument.
    #[must_use]
    pub fn argument(mut self, argument: Value) -> Self {
        self.arguments.push(argument);
        self
    }

    /// Replaces all positional arguments.
    #[must_use]
    pub fn arguments_from(mut self, arguments: impl IntoIterator<Item = Value>) -> Self {
        self.arguments = arguments.into_iter().collect();
        self
    }

    /// Returns the target handle downcast to `T`, if present and of that type.
    #[must_use]
    pub fn target_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.target.as_deref().and_then(|target| target.downcast_ref::<T>())
    }

    /// Returns the operation signature, used as the default metrics key.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Returns the positional arguments.
    #[must_use]
    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    /// Returns an attribute value.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Sets an attribute value, returning the previous one.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.attributes.insert(key.into(), value)
    }

    /// Removes an attribute, returning its value.
    pub fn remove_attribute(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    /// Reads an unsigned counter attribute, treating a missing or non-numeric value as zero.
    #[must_use]
    pub fn counter(&self, key: &str) -> u64 {
        self.attribute(key).and_then(Value::as_u64).unwrap_or(0)
    }

    /// Stores an unsigned counter attribute.
    pub fn set_counter(&mut self, key: &str, value: u64) {
        self.attributes.insert(key.to_owned(), Value::from(value));
    }
}

impl Debug for Invocation {
    #[cfg_attr(test, mutants::skip)] // Diagnostic output only.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("operation", &self.operation)
            .field("has_target", &self.target.is_some())
            .field("arguments", &self.arguments)
            .field("attributes", &self.attributes)
            .finish()
    }
}
