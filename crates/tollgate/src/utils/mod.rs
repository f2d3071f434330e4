// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[cfg(any(feature = "retry", feature = "metrics", test))]
mod define_fn_wrapper;
#[cfg(any(feature = "retry", feature = "metrics", test))]
pub(crate) use define_fn_wrapper::define_fn_wrapper;

mod millis;
pub(crate) use millis::duration_to_millis;
#[cfg(any(feature = "admission", feature = "dispatch", feature = "retry", feature = "metrics", test))]
pub(crate) use millis::positive_millis;
