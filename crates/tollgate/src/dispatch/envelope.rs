// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crossbeam_channel::{Sender, TrySendError};
use serde_json::Value;

use crate::fault::CALL_PANICKED;
use crate::{Chain, Fault, Invocation};

/// Outcome of an asynchronously executed call, delivered on a reply channel.
///
/// `Response::Value(Value::Null)` is a successful call that returned nothing, which is distinct
/// from `Response::Fault`.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// The call returned a value.
    Value(Value),
    /// The call failed.
    Fault(Fault),
}

impl Response {
    /// Returns `true` if the call failed.
    #[must_use]
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }

    /// Converts the response back into the outcome it was captured from.
    pub fn into_outcome(self) -> Result<Value, Fault> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Fault(fault) => Err(fault),
        }
    }
}

impl From<Result<Value, Fault>> for Response {
    fn from(outcome: Result<Value, Fault>) -> Self {
        match outcome {
            Ok(value) => Self::Value(value),
            Err(fault) => Self::Fault(fault),
        }
    }
}

/// A captured call waiting in the work queue: the invocation, the rest of the chain and an
/// optional reply channel. Consumed exactly once by a worker.
pub(crate) struct Envelope {
    invocation: Invocation,
    chain: Chain,
    reply: Option<Sender<Response>>,
}

impl Envelope {
    pub(crate) fn new(invocation: Invocation, chain: Chain, reply: Option<Sender<Response>>) -> Self {
        Self { invocation, chain, reply }
    }

    /// Runs the captured chain and publishes the response without blocking.
    ///
    /// A panic inside the chain becomes a fatal [`CALL_PANICKED`] fault for this envelope only.
    /// If the caller stopped waiting, the response is dropped.
    pub(crate) fn process(self, pool: &str) {
        let Self {
            mut invocation,
            chain,
            reply,
        } = self;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| chain.proceed(&mut invocation)));
        let response = match outcome {
            Ok(outcome) => Response::from(outcome),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::event!(
                    name: "tollgate.dispatch.panicked",
                    tracing::Level::ERROR,
                    pool.name = pool,
                    invocation.operation = invocation.operation(),
                    message = %message,
                );
                Response::Fault(Fault::fatal(CALL_PANICKED, message).into())
            }
        };

        let Some(reply) = reply else {
            return;
        };

        if let Err(error) = reply.try_send(response) {
            let reason = match error {
                TrySendError::Full(_) => "reply channel full",
                TrySendError::Disconnected(_) => "caller stopped waiting",
            };
            tracing::event!(
                name: "tollgate.dispatch.dropped",
                tracing::Level::DEBUG,
                pool.name = pool,
                invocation.operation = invocation.operation(),
                reason,
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
