//! Instance lifecycle tests
//!
//! Initialization, the clock wait, client open/close and teardown, all
//! against the mock controller.

mod common;

use common::*;
use sam_uhp::config::{CONTROL_PIPES_NUMBER, PIPES_NUMBER};
use sam_uhp::{DriverStatus, IoIntent, IrpRequest, IrpStatus, PipeConfig, UhpInit, UsbError, UsbSpeed};

#[test]
fn test_initialize_waits_for_clock() {
    let mut host = Host::new(MockOs::default());
    let controller = MockController {
        clock_ready: false,
        ..Default::default()
    };
    let module = host
        .initialize(0, UhpInit::new(controller, leak_registers(), UHPHS_IRQ))
        .unwrap();
    let mut stack = RecordingStack::default();

    assert_eq!(host.status(module), DriverStatus::Busy);
    assert!(host.controller(module).unwrap().clock_enabled);
    assert_eq!(host.open(0, IoIntent::SUPPORTED), Err(UsbError::NotReady));

    host.tasks(module, &mut stack);
    host.tasks(module, &mut stack);
    assert_eq!(host.status(module), DriverStatus::Busy);
    assert_eq!(host.controller(module).unwrap().ehci.init_count, 0);

    host.controller(module).unwrap().clock_ready = true;
    host.tasks(module, &mut stack);
    assert_eq!(host.status(module), DriverStatus::Busy);
    host.tasks(module, &mut stack);
    assert_eq!(host.status(module), DriverStatus::Ready);

    assert_eq!(host.controller(module).unwrap().ehci.init_count, 1);
    assert!(host.osal().is_enabled(UHPHS_IRQ));
}

#[test]
fn test_initialize_rejects_busy_and_missing_slots() {
    let mut host = Host::new(MockOs::default());
    let init = || UhpInit::new(MockController::default(), leak_registers(), UHPHS_IRQ);

    host.initialize(0, init()).unwrap();
    assert_eq!(host.initialize(0, init()).err(), Some(UsbError::AlreadyInitialized));
    assert_eq!(host.initialize(1, init()).err(), Some(UsbError::InvalidParameter));
}

#[test]
fn test_open_is_exclusive() {
    let mut h = Harness::new();

    assert_eq!(h.host.open(0, IoIntent::SUPPORTED), Err(UsbError::AlreadyOpen));
    assert_eq!(h.host.open(1, IoIntent::SUPPORTED), Err(UsbError::InvalidParameter));

    h.host.close(h.client).unwrap();
    assert_eq!(h.host.port_numbers_get(h.client), Err(UsbError::InvalidHandle));
    assert_eq!(h.host.close(h.client), Err(UsbError::InvalidHandle));

    let again = h.host.open(0, IoIntent::SUPPORTED).unwrap();
    assert_ne!(again, h.client);
    assert_eq!(h.host.port_numbers_get(again), Ok(1));
}

#[test]
fn test_open_intent_must_match() {
    let mut h = Harness::new();
    h.host.close(h.client).unwrap();

    for intent in [
        IoIntent::READWRITE,
        IoIntent::READ | IoIntent::EXCLUSIVE | IoIntent::NONBLOCKING,
        IoIntent::READWRITE | IoIntent::EXCLUSIVE,
    ] {
        assert_eq!(h.host.open(0, intent), Err(UsbError::UnsupportedIntent));
    }
    assert!(h.host.open(0, IoIntent::SUPPORTED).is_ok());
}

#[test]
fn test_events_disable_returns_prior_state() {
    let mut h = Harness::new();
    assert!(h.os().is_enabled(UHPHS_IRQ));

    assert_eq!(h.host.events_disable(h.client), Ok(true));
    assert!(!h.os().is_enabled(UHPHS_IRQ));
    assert_eq!(h.host.events_disable(h.client), Ok(false));

    h.host.events_enable(h.client, false).unwrap();
    assert!(!h.os().is_enabled(UHPHS_IRQ));
    h.host.events_enable(h.client, true).unwrap();
    assert!(h.os().is_enabled(UHPHS_IRQ));
}

#[test]
fn test_port_power_switched_on_during_setup() {
    let controller = MockController {
        power: Some(MockPower::default()),
        ..Default::default()
    };
    let mut h = Harness::with(|init| init.port_power_enable(true), controller);
    assert!(h.controller().power.as_ref().unwrap().on);
}

#[test]
fn test_port_power_failure_is_not_fatal() {
    let controller = MockController {
        power: Some(MockPower {
            fail_enable: true,
            ..Default::default()
        }),
        ..Default::default()
    };
    let mut h = Harness::with(|init| init.port_power_enable(true), controller);
    assert_eq!(h.host.status(h.module), DriverStatus::Ready);
    assert!(!h.controller().power.as_ref().unwrap().on);
}

#[test]
fn test_deinitialize_aborts_and_returns_controller() {
    let mut h = Harness::new();
    let pipe = h
        .host
        .pipe_setup(h.client, &PipeConfig::bulk(1, 0x02, 64, UsbSpeed::Full))
        .unwrap();
    for tag in 1..=2 {
        h.host
            .irp_submit(pipe, IrpRequest::new(None, 0).with_callback(record_completion, tag))
            .unwrap();
    }

    let controller = h.host.deinitialize(h.module).unwrap();

    assert_eq!(controller.ehci.submitted.len(), 1);
    assert_eq!(
        completion_order(),
        vec![(1, IrpStatus::Aborted), (2, IrpStatus::Aborted)]
    );
    assert_eq!(h.host.irps_in_use(), 0);
    assert_eq!(h.host.free_pipes(), PIPES_NUMBER - CONTROL_PIPES_NUMBER);
    assert_eq!(h.host.status(h.module), DriverStatus::Uninitialized);
    assert!(h.os().mutexes.is_empty());
    assert!(!h.os().is_enabled(UHPHS_IRQ));
    assert_eq!(h.host.pipe_info(pipe).err(), Some(UsbError::InvalidHandle));

    // the slot can be brought up again
    let module = h
        .host
        .initialize(0, UhpInit::new(controller, leak_registers(), UHPHS_IRQ))
        .unwrap();
    assert_eq!(h.host.status(module), DriverStatus::Busy);
}
