//! Lock metrics published through the `metrics` facade
//!
//! Labels carry outcomes only; lock keys are unbounded and never used as labels.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};

pub const ACQUIRE_TOTAL: &str = "keylock_acquire_total";
pub const RELEASE_TOTAL: &str = "keylock_release_total";
pub const RENEW_TOTAL: &str = "keylock_renew_total";
pub const WAIT_DURATION_SECONDS: &str = "keylock_wait_duration_seconds";

/// Register metric descriptions. Call once after installing a recorder.
pub fn describe_metrics() {
    describe_counter!(ACQUIRE_TOTAL, "Total number of lock acquire attempts");
    describe_counter!(RELEASE_TOTAL, "Total number of lock release calls");
    describe_counter!(RENEW_TOTAL, "Total number of lease renewals");
    describe_histogram!(
        WAIT_DURATION_SECONDS,
        "Time spent in blocking lock acquisition in seconds"
    );
}

pub(crate) fn record_acquire(result: &'static str) {
    counter!(ACQUIRE_TOTAL, "result" => result).increment(1);
}

pub(crate) fn record_release(result: &'static str) {
    counter!(RELEASE_TOTAL, "result" => result).increment(1);
}

pub(crate) fn record_renew(result: &'static str) {
    counter!(RENEW_TOTAL, "result" => result).increment(1);
}

pub(crate) fn record_wait(result: &'static str, waited: Duration) {
    histogram!(WAIT_DURATION_SECONDS, "result" => result).record(waited.as_secs_f64());
}
