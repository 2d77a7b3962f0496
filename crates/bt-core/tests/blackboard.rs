use std::sync::Arc;

use bt_core::{BbKey, Blackboard, BlackboardSchema};

const HEALTH: BbKey<u32> = BbKey::new(1);
const TARGET: BbKey<String> = BbKey::new(2);

#[test]
fn blackboard_set_get_remove() {
    let mut bb = Blackboard::new();
    assert!(!bb.contains(HEALTH));

    bb.set(HEALTH, 100);
    bb.set(TARGET, "door".to_string());

    assert_eq!(bb.get(HEALTH).copied(), Some(100));
    assert_eq!(bb.get(TARGET).map(|s| s.as_str()), Some("door"));
    assert_eq!(bb.remove(HEALTH), Some(100));
    assert_eq!(bb.get(HEALTH), None);
}

#[test]
fn mismatched_type_reads_as_missing() {
    let mut bb = Blackboard::new();
    bb.set(BbKey::<u32>::new(7), 1u32);
    assert_eq!(bb.get(BbKey::<i32>::new(7)), None);
    assert!(!bb.contains(BbKey::<i32>::new(7)));
}

#[test]
fn writes_are_reported_once_in_key_order() {
    let mut bb = Blackboard::new();
    bb.set(TARGET, "a".to_string());
    bb.set(HEALTH, 1);
    bb.set(HEALTH, 2);

    assert_eq!(bb.take_notifications(), vec![1, 2]);
    assert!(bb.take_notifications().is_empty());
}

#[test]
fn set_if_changed_skips_equal_values() {
    let mut bb = Blackboard::new();
    assert!(bb.set_if_changed(HEALTH, 5));
    bb.take_notifications();

    assert!(!bb.set_if_changed(HEALTH, 5));
    assert!(bb.take_notifications().is_empty());
}

#[test]
fn paused_notifications_are_queued_until_resume() {
    let mut bb = Blackboard::new();
    bb.pause_notifications();
    bb.set(HEALTH, 3);

    assert!(!bb.has_pending_notifications());
    assert!(bb.take_notifications().is_empty());

    bb.resume_notifications(true);
    assert_eq!(bb.take_notifications(), vec![1]);
}

#[test]
fn resume_without_sending_drops_queued_changes() {
    let mut bb = Blackboard::new();
    bb.pause_notifications();
    bb.set(HEALTH, 3);
    bb.resume_notifications(false);

    assert!(bb.take_notifications().is_empty());
}

#[test]
fn schema_compatibility_follows_parent_chain() {
    let base = Arc::new(BlackboardSchema::new("base"));
    let soldier = Arc::new(BlackboardSchema::derived("soldier", base.clone()));
    let other = BlackboardSchema::new("vehicle");

    let bb = Blackboard::with_schema(soldier.clone());
    assert!(bb.is_compatible_with(None));
    assert!(bb.is_compatible_with(Some(&base)));
    assert!(bb.is_compatible_with(Some(&soldier)));
    assert!(!bb.is_compatible_with(Some(&other)));

    let plain = Blackboard::new();
    assert!(!plain.is_compatible_with(Some(&base)));
}
