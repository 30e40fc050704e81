//! Cron rule grammar and scheduler lifecycle through the public API.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use xkit::cron::{CronError, Rule, Scheduler};

fn set(values: &[u32]) -> BTreeSet<u32> {
    values.iter().copied().collect()
}

#[test]
fn test_every_twenty_seconds_rule() {
    let rule = Rule::parse("@every 20 second").unwrap();
    assert_eq!(rule.second, set(&[0, 20, 40]));
    assert!(rule.minute.is_empty());
    assert!(rule.hour.is_empty());
    assert!(rule.day_of_month.is_empty());
    assert!(rule.month.is_empty());
    assert!(rule.day_of_week.is_empty());
}

#[test]
fn test_month_name_range_rule() {
    let rule = Rule::parse("* * * * jan-mar *").unwrap();
    assert_eq!(rule.month, set(&[1, 2, 3]));
    assert!(rule.second.is_empty());
    assert!(rule.minute.is_empty());
    assert!(rule.hour.is_empty());
    assert!(rule.day_of_month.is_empty());
    assert!(rule.day_of_week.is_empty());
}

#[test]
fn test_five_field_rule_gets_zero_second() {
    let rule = Rule::parse("30 9 * * mon").unwrap();
    assert_eq!(rule.second, set(&[0]));
    assert_eq!(rule.minute, set(&[30]));
    assert_eq!(rule.hour, set(&[9]));
    assert_eq!(rule.day_of_week, set(&[1]));
}

#[test]
fn test_grammar_rejections() {
    assert!(matches!(
        Rule::parse("61 * * * * *"),
        Err(CronError::Parse(_))
    ));
    assert!(matches!(
        Rule::parse("* * * * * * *"),
        Err(CronError::Parse(_))
    ));
    assert!(matches!(
        Rule::parse("@every 75 second"),
        Err(CronError::Parse(_))
    ));
    assert!(matches!(Rule::parse("@fortnightly"), Err(CronError::Parse(_))));
}

#[test]
fn test_every_second_job_fires_repeatedly() {
    let scheduler = Scheduler::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&fired);
    let id = scheduler
        .add(
            "* * * * * *",
            move || {
                f.fetch_add(1, Ordering::SeqCst);
            },
            None,
        )
        .unwrap();
    thread::sleep(Duration::from_millis(3200));
    scheduler.del(&id);
    let count = fired.load(Ordering::SeqCst);
    assert!(count >= 2, "expected at least 2 firings, got {count}");
    // del() is synchronous; nothing fires afterwards.
    thread::sleep(Duration::from_millis(1200));
    assert_eq!(fired.load(Ordering::SeqCst), count);
    scheduler.empty();
    scheduler.wait();
}

#[test]
fn test_never_matching_job_does_not_fire() {
    let scheduler = Scheduler::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&fired);
    // Fires only at midnight on January 1st.
    scheduler
        .add(
            "0 0 0 1 1 *",
            move || {
                f.fetch_add(1, Ordering::SeqCst);
            },
            None,
        )
        .unwrap();
    thread::sleep(Duration::from_millis(2200));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    scheduler.empty();
    scheduler.wait();
}

#[test]
fn test_del_is_synchronous_and_tidies_once() {
    let scheduler = Scheduler::new();
    let tidied = Arc::new(AtomicUsize::new(0));
    let t = Arc::clone(&tidied);
    let id = scheduler
        .add(
            "* * * * * *",
            || {},
            Some(Box::new(move || {
                t.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();
    assert!(scheduler.has(&id));
    scheduler.del(&id);
    assert!(!scheduler.has(&id));
    assert_eq!(tidied.load(Ordering::SeqCst), 1);
    scheduler.empty();
    scheduler.wait();
}

#[test]
fn test_empty_cancels_all_jobs_and_wait_joins() {
    let scheduler = Scheduler::new();
    let tidied = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let t = Arc::clone(&tidied);
        scheduler
            .add(
                "* * * * * *",
                || {},
                Some(Box::new(move || {
                    t.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
    }
    assert_eq!(scheduler.len(), 3);
    scheduler.empty();
    scheduler.wait();
    assert!(scheduler.is_empty());
    assert_eq!(tidied.load(Ordering::SeqCst), 3);
    assert!(matches!(
        scheduler.add("*", || {}, None),
        Err(CronError::Stopped)
    ));
}
