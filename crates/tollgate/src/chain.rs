// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use serde_json::Value;

use crate::{Fault, Invocation};

/// A stage of a [`Chain`] that wraps the rest of the chain.
///
/// An interceptor receives the invocation together with `next`, a chain whose cursor points at
/// the following position. It can run code before and after calling
/// [`next.proceed`][Chain::proceed], call it several times, hand a clone of `next` to another
/// thread, or return its own result without calling it at all.
///
/// Closures with the signature `Fn(&mut Invocation, &Chain) -> Result<Value, Fault>` implement
/// this trait.
///
/// # Examples
///
/// ```
/// use serde_json::{Value, json};
/// use tollgate::{Chain, Execute, Fault, Interceptor, Invocation};
///
/// struct Tag;
///
/// impl Interceptor for Tag {
///     fn invoke(&self, invocation: &mut Invocation, next: &Chain) -> Result<Value, Fault> {
///         invocation.set_attribute("tagged", json!(true));
///         next.proceed(invocation)
///     }
/// }
///
/// let chain = Chain::builder()
///     .interceptor(Tag)
///     .target(Execute::new(|invocation: &mut Invocation| {
///         Ok(invocation.attribute("tagged").cloned().unwrap_or(Value::Null))
///     }));
///
/// assert_eq!(chain.execute(Invocation::new("op")), Ok(json!(true)));
/// ```
pub trait Interceptor: Send + Sync {
    /// Handles the invocation, usually by delegating to `next`.
    fn invoke(&self, invocation: &mut Invocation, next: &Chain) -> Result<Value, Fault>;
}

impl<F> Interceptor for F
where
    F: Fn(&mut Invocation, &Chain) -> Result<Value, Fault> + Send + Sync,
{
    fn invoke(&self, invocation: &mut Invocation, next: &Chain) -> Result<Value, Fault> {
        self(invocation, next)
    }
}

/// The innermost position of a [`Chain`]: the unit of work being wrapped.
pub trait Target: Send + Sync {
    /// Performs the call.
    fn invoke(&self, invocation: &mut Invocation) -> Result<Value, Fault>;
}

/// A [`Target`] backed by a closure.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use tollgate::{Execute, Invocation, Target};
///
/// let target = Execute::new(|invocation: &mut Invocation| Ok(json!(invocation.arguments().len())));
///
/// let mut invocation = Invocation::new("count").argument(json!(1));
/// assert_eq!(target.invoke(&mut invocation), Ok(json!(1)));
/// ```
#[derive(Clone)]
pub struct Execute<F>(F);

impl<F> Execute<F>
where
    F: Fn(&mut Invocation) -> Result<Value, Fault> + Send + Sync,
{
    /// Wraps `call` as a target.
    pub fn new(call: F) -> Self {
        Self(call)
    }
}

impl<F> Target for Execute<F>
where
    F: Fn(&mut Invocation) -> Result<Value, Fault> + Send + Sync,
{
    fn invoke(&self, invocation: &mut Invocation) -> Result<Value, Fault> {
        (self.0)(invocation)
    }
}

impl<F> Debug for Execute<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Execute").finish_non_exhaustive()
    }
}

/// An ordered sequence of interceptors wrapping a [`Target`], addressed by a cursor.
///
/// Walking a chain is strictly sequential: [`proceed`][Chain::proceed] runs the interceptor at
/// the cursor, handing it a chain positioned one step further, or calls the target once the
/// cursor has moved past the last interceptor. Declaration order is execution order.
///
/// Cloning a chain copies the cursor by value. A clone taken in the middle of a traversal
/// resumes at the same position, never re-running earlier interceptors, and advancing one
/// copy never moves the other. The interceptor list itself is immutable and shared.
///
/// # Examples
///
/// ```
/// use serde_json::{Value, json};
/// use tollgate::{Chain, Execute, Fault, Invocation};
///
/// let chain = Chain::builder()
///     .interceptor(|invocation: &mut Invocation, next: &Chain| -> Result<Value, Fault> {
///         let value = next.proceed(invocation)?;
///         Ok(json!(value.as_i64().unwrap_or_default() * 2))
///     })
///     .target(Execute::new(|_: &mut Invocation| Ok(json!(21))));
///
/// assert_eq!(chain.execute(Invocation::new("answer")), Ok(json!(42)));
/// ```
#[derive(Clone)]
pub struct Chain {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
    target: Arc<dyn Target>,
    cursor: usize,
}

impl Chain {
    /// Starts building a chain.
    #[must_use]
    pub fn builder() -> ChainBuilder {
        ChainBuilder::default()
    }

    /// Runs a complete external call through the chain from the current cursor.
    ///
    /// The invocation is consumed; its attributes are discarded when the call returns.
    pub fn execute(&self, mut invocation: Invocation) -> Result<Value, Fault> {
        self.proceed(&mut invocation)
    }

    /// Invokes the chain from the current cursor.
    ///
    /// Interceptors call this on the `next` chain they receive to continue the traversal.
    pub fn proceed(&self, invocation: &mut Invocation) -> Result<Value, Fault> {
        match self.interceptors.get(self.cursor) {
            Some(interceptor) => interceptor.invoke(invocation, &self.advanced()),
            None => self.target.invoke(invocation),
        }
    }

    /// Returns the position of the interceptor the next [`proceed`][Chain::proceed] call runs.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Returns the total number of interceptors, regardless of the cursor.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Returns `true` if the chain has no interceptors and calls the target directly.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Returns how many interceptors are left before the target is reached.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.interceptors.len().saturating_sub(self.cursor)
    }

    fn advanced(&self) -> Self {
        Self {
            interceptors: Arc::clone(&self.interceptors),
            target: Arc::clone(&self.target),
            cursor: self.cursor + 1,
        }
    }
}

impl Debug for Chain {
    #[cfg_attr(test, mutants::skip)] // Diagnostic output only.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("cursor", &self.cursor)
            .field("len", &self.interceptors.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Chain`], created by [`Chain::builder`].
///
/// Interceptors are added outermost first; [`target`][ChainBuilder::target] completes the chain.
#[derive(Default)]
pub struct ChainBuilder {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl ChainBuilder {
    /// Appends an interceptor after the ones already added.
    #[must_use]
    pub fn interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Appends an interceptor that is shared with other chains.
    #[must_use]
    pub fn shared_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Completes the chain with its innermost target.
    #[must_use]
    pub fn target(self, target: impl Target + 'static) -> Chain {
        Chain {
            interceptors: self.interceptors.into(),
            target: Arc::new(target),
            cursor: 0,
        }
    }
}

impl Debug for ChainBuilder {
    #[cfg_attr(test, mutants::skip)] // Diagnostic output only.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainBuilder")
            .field("len", &self.interceptors.len())
            .finish()
    }
}
