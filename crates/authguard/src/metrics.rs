//! Metrics for the guard primitives.
//!
//! Recorded through the `metrics` facade; installing an exporter is up to the
//! host process.

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const REVOCATIONS_TOTAL: &str = "authguard_revocations_total";
    pub const REVOCATION_CHECKS_TOTAL: &str = "authguard_revocation_checks_total";
    pub const LOGIN_FAILURES_TOTAL: &str = "authguard_login_failures_total";
    pub const LOGIN_BLOCKS_TOTAL: &str = "authguard_login_blocks_total";
    pub const LOGIN_DENIALS_TOTAL: &str = "authguard_login_denials_total";
    pub const FAIL_OPEN_TOTAL: &str = "authguard_fail_open_total";
}

/// Record a revocation write.
pub fn record_revocation(success: bool) {
    let outcome = if success { "ok" } else { "error" };
    counter!(names::REVOCATIONS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a revocation lookup.
pub fn record_revocation_check(revoked: bool) {
    let result = if revoked { "revoked" } else { "valid" };
    counter!(names::REVOCATION_CHECKS_TOTAL, "result" => result).increment(1);
}

pub fn record_login_failure() {
    counter!(names::LOGIN_FAILURES_TOTAL).increment(1);
}

pub fn record_login_block() {
    counter!(names::LOGIN_BLOCKS_TOTAL).increment(1);
}

pub fn record_login_denial() {
    counter!(names::LOGIN_DENIALS_TOTAL).increment(1);
}

/// Record a storage error answered with the permissive result.
pub fn record_fail_open(component: &'static str) {
    counter!(names::FAIL_OPEN_TOTAL, "component" => component).increment(1);
}
