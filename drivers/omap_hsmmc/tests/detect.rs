mod common;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use common::*;
use mmc_base::{MmcHostOps, PowerMode};

#[test]
fn test_detect_irq_defers_to_work() {
    let rig = Rig::powered(true, |_| {});
    rig.host.card_detect_irq();
    rig.host.card_detect_irq();
    assert_eq!(rig.platform.detects_scheduled.load(Ordering::SeqCst), 2);
    assert!(rig.core.detects().is_empty());
}

#[test]
fn test_insertion_debounces_rescan() {
    let present = Arc::new(AtomicBool::new(true));
    let rig = Rig::powered(true, |c| c.card_detect = Some(sense(&present)));

    rig.host.run_detect_work();

    assert_eq!(rig.core.detects(), [200]);
    assert_eq!(rig.host.power_mode(), PowerMode::On);
    assert_eq!(rig.host.get_cd(), Some(true));
}

#[test]
fn test_removal_cuts_power_at_once() {
    let present = Arc::new(AtomicBool::new(true));
    let rig = Rig::powered(true, |c| c.card_detect = Some(sense(&present)));

    present.store(false, Ordering::SeqCst);
    rig.host.run_detect_work();

    assert_eq!(rig.core.detects(), [0]);
    assert_eq!(rig.host.power_mode(), PowerMode::Off);
    assert_eq!(rig.regulator.power_calls(), [(true, VDD), (false, 0)]);
    assert!(!rig.core.is_claimed());

    // Already off: nothing left to cut.
    rig.host.run_detect_work();
    assert_eq!(rig.regulator.power_calls().len(), 2);

    // Reinsertion clears the eject state.
    present.store(true, Ordering::SeqCst);
    rig.host.run_detect_work();
    rig.power_on();
    rig.host.submit(status_cmd());
    assert_eq!(rig.regs.commands().len(), 1);
}

#[test]
fn test_removal_with_failing_supply_keeps_power_state() {
    let present = Arc::new(AtomicBool::new(true));
    let rig = Rig::powered(true, |c| c.card_detect = Some(sense(&present)));
    rig.regulator.broken.store(true, Ordering::SeqCst);

    present.store(false, Ordering::SeqCst);
    rig.host.run_detect_work();

    assert_eq!(rig.core.detects(), [0]);
    assert_eq!(rig.host.power_mode(), PowerMode::On);
    assert_eq!(rig.regulator.power_calls(), [(true, VDD)]);
    assert!(!rig.core.is_claimed());
}

#[test]
fn test_cover_opening_protects_card() {
    let closed = Arc::new(AtomicBool::new(true));
    let rig = Rig::powered(true, |c| c.cover_state = Some(sense(&closed)));
    assert!(!rig.host.is_protected());

    closed.store(false, Ordering::SeqCst);
    rig.host.run_detect_work();
    assert!(rig.host.is_protected());

    closed.store(true, Ordering::SeqCst);
    rig.host.run_detect_work();
    assert!(!rig.host.is_protected());
}

#[test]
fn test_status_notify_reports_edges_only() {
    let present = Arc::new(AtomicBool::new(true));
    let rig = Rig::new(true, |c| c.status = Some(sense(&present)));

    rig.host.status_notify(true);
    assert!(rig.core.detects().is_empty());

    present.store(false, Ordering::SeqCst);
    rig.host.status_notify(false);
    rig.host.status_notify(false);
    assert_eq!(rig.core.detects(), [0]);

    present.store(true, Ordering::SeqCst);
    rig.host.status_notify(true);
    assert_eq!(rig.core.detects(), [0, 0]);
}

#[test]
fn test_status_notify_without_hook_always_rescans() {
    let rig = Rig::new(true, |_| {});
    rig.host.status_notify(true);
    rig.host.status_notify(true);
    assert_eq!(rig.core.detects(), [0, 0]);
}

#[test]
fn test_query_hooks() {
    let rig = Rig::new(true, |_| {});
    assert_eq!(rig.host.get_cd(), None);
    assert_eq!(rig.host.get_ro(), None);

    let ro = Arc::new(AtomicBool::new(true));
    let rig = Rig::new(true, |c| c.get_ro = Some(sense(&ro)));
    assert_eq!(rig.host.get_ro(), Some(true));
}
