//! Tests for utility functions

use chrono::{Duration, TimeZone, Utc};
use prometheus_task_governor::util::{generate_id, Clock, ExecutionFilter, ManualClock, Scope};

#[test]
fn test_generated_ids_are_prefixed_and_unique() {
    let a = generate_id("exec");
    let b = generate_id("exec");
    assert!(a.starts_with("exec_"));
    assert_ne!(a, b);
}

#[test]
fn test_scope_builders() {
    let scope = Scope::organization("org_A").with_user("u1");
    assert_eq!(scope.organization.as_deref(), Some("org_A"));
    assert_eq!(scope.user.as_deref(), Some("u1"));
    assert_eq!(Scope::global(), Scope::default());
}

#[test]
fn test_execution_filter_matching() {
    let scope = Scope::organization("org_A").with_user("u1");
    assert!(ExecutionFilter::default().matches("forecast", &scope));
    assert!(ExecutionFilter::task_class("forecast").matches("forecast", &scope));
    assert!(!ExecutionFilter::task_class("parse").matches("forecast", &scope));
    assert!(ExecutionFilter::organization("org_A").matches("forecast", &scope));
    assert!(!ExecutionFilter::organization("org_A").matches("forecast", &Scope::global()));

    let by_user = ExecutionFilter {
        user: Some("u2".into()),
        ..ExecutionFilter::default()
    };
    assert!(!by_user.matches("forecast", &scope));
}

#[test]
fn test_manual_clock() {
    let start = Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 0).unwrap();
    let clock = ManualClock::new(start);
    assert_eq!(clock.now(), start);
    clock.advance(Duration::minutes(2));
    assert_eq!(clock.now(), Utc.with_ymd_and_hms(2024, 2, 1, 0, 1, 0).unwrap());
}
