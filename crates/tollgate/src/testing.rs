// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::{Chain, Execute, Fault, Interceptor, Invocation, Target};

/// Records the order in which stages and targets run.
#[derive(Debug, Clone, Default)]
pub(crate) struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub(crate) fn stage(&self, name: &'static str) -> impl Interceptor + 'static {
        let events = Arc::clone(&self.events);
        move |invocation: &mut Invocation, next: &Chain| {
            events.lock().push(name.to_owned());
            next.proceed(invocation)
        }
    }

    pub(crate) fn target(&self, value: Value) -> impl Target + 'static {
        let events = Arc::clone(&self.events);
        Execute::new(move |_: &mut Invocation| {
            events.lock().push("target".to_owned());
            Ok(value.clone())
        })
    }

    pub(crate) fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock())
    }
}

/// A target that replays a scripted sequence of outcomes and counts calls.
///
/// Once the script is exhausted the last outcome is repeated.
#[derive(Debug, Clone)]
pub(crate) struct Scripted {
    outcomes: Arc<Vec<Result<Value, Fault>>>,
    calls: Arc<AtomicUsize>,
}

impl Scripted {
    pub(crate) fn new(outcomes: impl IntoIterator<Item = Result<Value, Fault>>) -> Self {
        Self {
            outcomes: Arc::new(outcomes.into_iter().collect()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Target for Scripted {
    fn invoke(&self, _invocation: &mut Invocation) -> Result<Value, Fault> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let index = call.min(self.outcomes.len().saturating_sub(1));
        self.outcomes.get(index).cloned().unwrap_or(Ok(Value::Null))
    }
}
