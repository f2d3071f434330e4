// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

/// Interprets a configured millisecond value where zero or negative means "not set".
#[cfg_attr(
    not(any(feature = "admission", feature = "dispatch", feature = "retry", feature = "metrics", test)),
    expect(dead_code, reason = "only used by stage configurations")
)]
pub(crate) fn positive_millis(millis: i64) -> Option<Duration> {
    u64::try_from(millis).ok().filter(|millis| *millis > 0).map(Duration::from_millis)
}

/// Converts a duration to whole milliseconds, saturating at `u64::MAX`.
pub(crate) fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
