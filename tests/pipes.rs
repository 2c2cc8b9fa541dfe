//! Pipe setup, close and data toggle tests

mod common;

use common::*;
use sam_uhp::config::{CONTROL_PIPES_NUMBER, PIPES_NUMBER};
use sam_uhp::ehci::PortId;
use sam_uhp::engine::{CompletionSignal, PortEvent, TransferEvent};
use sam_uhp::{IrpRequest, IrpStatus, PipeConfig, SetupPacket, TransferType, UsbError, UsbSpeed};

#[test]
fn test_endpoint_size_limits() {
    let mut h = Harness::new();

    let small = h
        .host
        .pipe_setup(h.client, &PipeConfig::bulk(1, 0x81, 4, UsbSpeed::Full))
        .unwrap();
    assert_eq!(h.host.pipe_info(small).unwrap().endpoint_size, 8);

    assert_eq!(
        h.host.pipe_setup(h.client, &PipeConfig::control(1, 4, UsbSpeed::Full)),
        Err(UsbError::InvalidParameter)
    );
    assert_eq!(
        h.host.pipe_setup(h.client, &PipeConfig::bulk(1, 0x02, 5000, UsbSpeed::High)),
        Err(UsbError::InvalidParameter)
    );
    for speed in [UsbSpeed::Error, UsbSpeed::Super] {
        assert_eq!(
            h.host.pipe_setup(h.client, &PipeConfig::bulk(1, 0x02, 64, speed)),
            Err(UsbError::InvalidParameter)
        );
    }
}

#[test]
fn test_control_pipes_share_endpoint_zero() {
    let mut h = Harness::new();

    let a = h.host.pipe_setup(h.client, &PipeConfig::control(0, 64, UsbSpeed::Full)).unwrap();
    let b = h.host.pipe_setup(h.client, &PipeConfig::control(3, 8, UsbSpeed::Low)).unwrap();
    let bulk = h
        .host
        .pipe_setup(h.client, &PipeConfig::bulk(3, 0x81, 64, UsbSpeed::Full))
        .unwrap();
    let int = h
        .host
        .pipe_setup(h.client, &PipeConfig::interrupt(3, 0x83, 8, 10, UsbSpeed::Full))
        .unwrap();

    assert_eq!(h.host.pipe_info(a).unwrap().host_endpoint, 0);
    assert_eq!(h.host.pipe_info(b).unwrap().host_endpoint, 0);
    assert_eq!(h.host.pipe_info(bulk).unwrap().host_endpoint, CONTROL_PIPES_NUMBER as u8);
    let info = h.host.pipe_info(int).unwrap();
    assert_eq!(info.host_endpoint, CONTROL_PIPES_NUMBER as u8 + 1);
    assert_eq!(info.transfer_type, TransferType::Interrupt);
    assert_eq!(info.interval, 10);
    assert_eq!(info.queued, 0);
}

#[test]
fn test_pipe_pools_exhaust_separately() {
    let mut h = Harness::new();
    let general = PIPES_NUMBER - CONTROL_PIPES_NUMBER;

    let mut bulk = Vec::new();
    for i in 0..general {
        let config = PipeConfig::bulk(1, 0x80 | (i as u8 + 1), 64, UsbSpeed::High);
        bulk.push(h.host.pipe_setup(h.client, &config).unwrap());
    }
    assert_eq!(h.host.free_pipes(), 0);
    assert_eq!(
        h.host.pipe_setup(h.client, &PipeConfig::bulk(1, 0x02, 64, UsbSpeed::High)),
        Err(UsbError::NoResources)
    );

    // control pipes come from their own region
    for _ in 0..CONTROL_PIPES_NUMBER {
        h.host.pipe_setup(h.client, &PipeConfig::control(0, 64, UsbSpeed::High)).unwrap();
    }
    assert_eq!(
        h.host.pipe_setup(h.client, &PipeConfig::control(0, 64, UsbSpeed::High)),
        Err(UsbError::NoResources)
    );

    h.host.pipe_close(bulk[3]).unwrap();
    assert_eq!(h.host.free_pipes(), 1);
    let reused = h
        .host
        .pipe_setup(h.client, &PipeConfig::bulk(1, 0x02, 64, UsbSpeed::High))
        .unwrap();
    assert_ne!(reused, bulk[3]);
    assert_eq!(
        h.host.pipe_info(reused).unwrap().host_endpoint,
        (CONTROL_PIPES_NUMBER + 3) as u8
    );
}

#[test]
fn test_stale_pipe_handle_rejected() {
    let mut h = Harness::new();
    let pipe = h
        .host
        .pipe_setup(h.client, &PipeConfig::bulk(1, 0x02, 64, UsbSpeed::Full))
        .unwrap();
    h.host.pipe_close(pipe).unwrap();

    assert_eq!(h.host.pipe_close(pipe), Err(UsbError::InvalidHandle));
    assert_eq!(h.host.pipe_info(pipe).err(), Some(UsbError::InvalidHandle));
    assert_eq!(
        h.host.irp_submit(pipe, IrpRequest::new(None, 0)).err(),
        Some(UsbError::InvalidHandle)
    );
}

#[test]
fn test_close_aborts_every_queued_irp() {
    let mut h = Harness::new();
    let pipe = h
        .host
        .pipe_setup(h.client, &PipeConfig::bulk(1, 0x02, 64, UsbSpeed::Full))
        .unwrap();
    for tag in 1..=3 {
        h.host
            .irp_submit(pipe, IrpRequest::new(None, 0).with_callback(record_completion, tag))
            .unwrap();
    }
    assert_eq!(h.ehci().submitted.len(), 1);
    assert_eq!(h.host.pipe_info(pipe).unwrap().queued, 3);

    h.host.pipe_close(pipe).unwrap();

    assert_eq!(
        completion_order(),
        vec![(1, IrpStatus::Aborted), (2, IrpStatus::Aborted), (3, IrpStatus::Aborted)]
    );
    assert_eq!(h.host.irps_in_use(), 0);
    assert_eq!(h.host.stats().irps_aborted, 3);

    // a late engine report for the closed endpoint is dropped
    h.ehci().push_transfer(TransferEvent::complete(CONTROL_PIPES_NUMBER as u8, 0));
    h.isr();
    assert!(completions().is_empty());
}

#[test]
fn test_close_current_control_pipe_waits_for_hardware() {
    let mut h = Harness::new();
    let a = h.host.pipe_setup(h.client, &PipeConfig::control(1, 64, UsbSpeed::Full)).unwrap();
    let b = h.host.pipe_setup(h.client, &PipeConfig::control(2, 64, UsbSpeed::Full)).unwrap();
    let setup = SetupPacket::set_address(4);

    let a1 = h
        .host
        .irp_submit(a, IrpRequest::control(setup, None).with_callback(record_completion, 1))
        .unwrap();
    let b1 = h.host.irp_submit(b, IrpRequest::control(setup, None)).unwrap();
    assert_eq!(h.host.irp_status(a1), Some(IrpStatus::InProgress));
    assert_eq!(h.host.irp_status(b1), Some(IrpStatus::Pending));

    h.host.pipe_close(a).unwrap();
    assert_eq!(completion_order(), vec![(1, IrpStatus::Aborted)]);

    // endpoint 0 still carries the closed pipe's transfer
    h.host.irp_submit(b, IrpRequest::control(setup, None)).unwrap();
    h.isr();
    h.tasks();
    assert_eq!(h.host.irp_status(b1), Some(IrpStatus::Pending));
    assert_eq!(h.ehci().submitted.len(), 1);

    h.ehci().push_transfer(TransferEvent::complete(0, 0));
    h.isr();
    assert_eq!(h.host.irp_status(b1), Some(IrpStatus::InProgress));
    assert_eq!(h.ehci().submitted.len(), 2);
    assert_eq!(h.ehci().submitted[1].device_address, 2);
    assert!(completions().is_empty());
}

#[test]
fn test_control_group_continues_after_close() {
    let mut h = Harness::new();
    let a = h.host.pipe_setup(h.client, &PipeConfig::control(1, 64, UsbSpeed::Full)).unwrap();
    let b = h.host.pipe_setup(h.client, &PipeConfig::control(2, 64, UsbSpeed::Full)).unwrap();
    let c = h.host.pipe_setup(h.client, &PipeConfig::control(3, 64, UsbSpeed::Full)).unwrap();
    let setup = SetupPacket::set_address(4);

    h.host.irp_submit(c, IrpRequest::control(setup, None)).unwrap();
    let a1 = h
        .host
        .irp_submit(a, IrpRequest::control(setup, None).with_callback(record_completion, 1))
        .unwrap();
    let b1 = h
        .host
        .irp_submit(b, IrpRequest::control(setup, None).with_callback(record_completion, 2))
        .unwrap();
    assert_eq!(h.ehci().submitted[0].device_address, 3);

    // c finishes, a is next after wrapping
    h.ehci().push_transfer(TransferEvent::complete(0, 0));
    h.isr();
    assert_eq!(h.host.irp_status(a1), Some(IrpStatus::InProgress));

    h.host.pipe_close(a).unwrap();
    h.ehci().push_transfer(TransferEvent::complete(0, 0));
    h.isr();

    // the pipe after the closed one is served without another submit
    assert_eq!(h.host.irp_status(b1), Some(IrpStatus::InProgress));
    assert_eq!(h.ehci().submitted.len(), 3);
    assert_eq!(h.ehci().submitted[2].device_address, 2);

    h.ehci().push_transfer(TransferEvent::complete(0, 0));
    h.isr();
    assert_eq!(completion_order(), vec![(1, IrpStatus::Aborted), (2, IrpStatus::Completed)]);
}

#[test]
fn test_detach_ends_control_drain() {
    let mut h = Harness::new();
    let a = h.host.pipe_setup(h.client, &PipeConfig::control(1, 64, UsbSpeed::Full)).unwrap();
    let b = h.host.pipe_setup(h.client, &PipeConfig::control(2, 64, UsbSpeed::Full)).unwrap();
    let setup = SetupPacket::set_address(4);

    h.host.irp_submit(a, IrpRequest::control(setup, None)).unwrap();
    let b1 = h.host.irp_submit(b, IrpRequest::control(setup, None)).unwrap();
    h.host.pipe_close(a).unwrap();

    h.ehci().push_port(PortEvent::Disconnected(PortId::new(0).unwrap()));
    h.isr();
    assert_eq!(h.host.irp_status(b1), Some(IrpStatus::InProgress));
    assert_eq!(h.ehci().submitted.len(), 2);
}

#[test]
fn test_data_toggle_tracking_and_clear() {
    let mut h = Harness::new();
    let pipe = h
        .host
        .pipe_setup(h.client, &PipeConfig::bulk(1, 0x81, 64, UsbSpeed::Full))
        .unwrap();
    let endpoint = h.host.pipe_info(pipe).unwrap().host_endpoint;
    let buffer = leak_buffer(64);

    h.host.irp_submit(pipe, IrpRequest::new(Some(buffer), 64)).unwrap();
    assert!(!h.ehci().submitted[0].data_toggle);
    assert!(h.ehci().submitted[0].data_in);

    h.ehci().push_transfer(TransferEvent {
        endpoint,
        signal: CompletionSignal::Complete,
        bytes: 64,
        short_packet: false,
        data_toggle: Some(true),
    });
    h.isr();
    h.host.irp_submit(pipe, IrpRequest::new(Some(buffer), 64)).unwrap();
    assert!(h.ehci().submitted[1].data_toggle);

    h.ehci().push_transfer(TransferEvent::complete(endpoint, 64));
    h.isr();

    // unknown endpoints are ignored
    assert_eq!(h.host.endpoint_toggle_clear(h.client, 0x85), Ok(()));
    h.host.irp_submit(pipe, IrpRequest::new(Some(buffer), 64)).unwrap();
    assert!(h.ehci().submitted[2].data_toggle);
    h.ehci().push_transfer(TransferEvent::complete(endpoint, 64));
    h.isr();

    h.host.endpoint_toggle_clear(h.client, 0x81).unwrap();
    h.host.irp_submit(pipe, IrpRequest::new(Some(buffer), 64)).unwrap();
    assert!(!h.ehci().submitted[3].data_toggle);
}
