//! Interrupt body and transfer completion engine
//!
//! After both engines are serviced, the completion engine looks at the
//! hardware endpoint that reported last. Endpoint 0 carries the control
//! group, which is served round-robin one IRP at a time. Every other
//! endpoint belongs to exactly one pipe and finishes its IRPs in order.

use super::{instance_slot, UhpHost};
use crate::engine::{
    CompletionSignal, EngineEvents, HostController, PortEvent, TransferEngine, TransferEvent, TransferRequest,
};
use crate::error::Result;
use crate::irp::{IrpId, IrpStatus, TransferState};
use crate::osal::Osal;
use crate::pipe::PipeId;
use crate::transfer::{Direction, UsbSpeed};

/// Terminal status for a reported signal, or `None` while the IRP keeps going
fn outcome(signal: CompletionSignal, state: TransferState) -> Option<IrpStatus> {
    match (signal, state) {
        (CompletionSignal::Stall, _) => Some(IrpStatus::ErrorStall),
        (_, TransferState::CancelRequested) => Some(IrpStatus::Aborted),
        (CompletionSignal::Complete, TransferState::InProgress) => Some(IrpStatus::Completed),
        _ => None,
    }
}

impl<OS: Osal, HC: HostController> UhpHost<OS, HC> {
    pub(crate) fn service_interrupt(&mut self, index: usize) {
        let Ok(inst) = instance_slot(&mut self.instances, index) else {
            return;
        };
        inst.in_interrupt_context = true;
        let source = inst.interrupt_source;
        let reports: [EngineEvents; 2] = [inst.hc.ehci().service(), inst.hc.ohci().service()];
        self.perf.record_interrupt();

        for port in reports.iter().filter_map(|r| r.port) {
            self.port_event(index, port);
        }

        let mut transfers = reports.iter().filter_map(|r| r.transfer).peekable();
        if transfers.peek().is_none() {
            self.process_completion(index);
        }
        for event in transfers {
            self.transfer_event(index, event);
            self.process_completion(index);
        }

        self.os.interrupt_clear(source);
        if let Ok(inst) = self.instance_mut(index) {
            inst.in_interrupt_context = false;
        }
    }

    fn port_event(&mut self, index: usize, event: PortEvent) {
        let Ok(inst) = self.instance_mut(index) else { return };
        match event {
            PortEvent::Connected(port) => {
                inst.port = port;
                inst.device_attached = true;
            }
            PortEvent::Disconnected(_) => {
                inst.device_attached = false;
                inst.device_speed = UsbSpeed::Error;
                // nothing will report for a transfer to a detached device
                if let Some(from) = inst.control_group.finish_draining() {
                    self.resume_control(index, from);
                }
            }
        }
    }

    /// Latch an engine report for the completion engine
    fn transfer_event(&mut self, index: usize, event: TransferEvent) {
        let Ok(inst) = instance_slot(&mut self.instances, index) else {
            return;
        };
        inst.active_endpoint = event.endpoint;
        inst.signal = event.signal;
        inst.short_packet = event.short_packet;

        let current = if event.endpoint == 0 {
            inst.control_group.current_irp
        } else {
            let pipe = inst.endpoints.pipe(event.endpoint);
            if let (Some(pipe), Some(toggle)) = (pipe, event.data_toggle) {
                match self.pipes.get(pipe).direction() {
                    Direction::In => inst.toggle_in = toggle,
                    Direction::Out => inst.toggle_out = toggle,
                }
            }
            pipe.and_then(|p| self.pipes.get(p).active)
        };

        if let Some(irp) = current {
            let irp = self.irps.get_mut(irp);
            irp.completed_bytes = irp.completed_bytes.saturating_add(event.bytes);
        }
    }

    /// One completion engine pass for the endpoint that reported last
    pub(crate) fn process_completion(&mut self, index: usize) {
        let Ok(active) = self.instance(index).map(|inst| inst.active_endpoint) else {
            return;
        };
        if active == 0 {
            self.complete_control(index);
        } else {
            self.complete_non_control(index, active);
        }
    }

    fn complete_control(&mut self, index: usize) {
        let Ok(inst) = instance_slot(&mut self.instances, index) else {
            return;
        };
        let signal = core::mem::take(&mut inst.signal);
        inst.short_packet = false;

        // late report of a transfer whose pipe was closed
        if inst.control_group.draining {
            if signal == CompletionSignal::Idle {
                return;
            }
            if let Some(from) = inst.control_group.finish_draining() {
                self.resume_control(index, from);
            }
            return;
        }

        let (Some(pipe), Some(irp)) = (inst.control_group.current_pipe, inst.control_group.current_irp) else {
            return;
        };
        let Some(mut status) = outcome(signal, self.irps.get(irp).state) else {
            return;
        };

        if status == IrpStatus::Completed {
            inst.engine().disable_transfer_list();

            let transfer = self.irps.get_mut(irp);
            if transfer.is_in() && transfer.completed_bytes != 0 {
                let received = inst.engine().received_size() as usize;
                let staging = inst.hc.staging_buffer();
                let count = received.min(staging.len()).min(transfer.size as usize);
                let copied = match transfer.buffer {
                    // SAFETY: the engine retired the transfer, nothing else
                    // touches the client buffer until the callback returns
                    Some(buffer) => unsafe { buffer.fill_from(&staging[..count]) },
                    None => 0,
                };
                transfer.completed_bytes = copied as u32;
                if transfer.completed_bytes < transfer.size {
                    status = IrpStatus::CompletedShort;
                }
            }
        }

        inst.control_group.current_pipe = None;
        inst.control_group.current_irp = None;
        self.retire_irp(irp, status);
        self.resume_control(index, Some(pipe));
    }

    fn resume_control(&mut self, index: usize, from: Option<PipeId>) {
        if let Err(_e) = self.schedule_control(index, from) {
            #[cfg(feature = "defmt")]
            defmt::warn!("next control irp not started: {}", _e);
        }
    }

    fn complete_non_control(&mut self, index: usize, endpoint: u8) {
        let Ok(inst) = instance_slot(&mut self.instances, index) else {
            return;
        };
        let signal = core::mem::take(&mut inst.signal);
        let short_packet = core::mem::take(&mut inst.short_packet);

        let Some(pipe) = inst.endpoints.pipe(endpoint) else {
            return;
        };
        let Some(irp) = self.pipes.get(pipe).active else {
            return;
        };

        let transfer = self.irps.get(irp);
        let result = outcome(signal, transfer.state);
        if result == Some(IrpStatus::Completed) {
            inst.engine().disable_transfer_list();
        }
        let status = match result {
            Some(IrpStatus::Completed) if transfer.completed_bytes >= transfer.size => IrpStatus::Completed,
            Some(IrpStatus::Completed) if short_packet => IrpStatus::CompletedShort,
            // more data stages to go
            Some(IrpStatus::Completed) => return,
            Some(status) => status,
            None => return,
        };

        if let Some(buffer) = transfer.buffer {
            inst.hc.invalidate_dcache(&buffer);
        }
        self.pipes.get_mut(pipe).active = None;
        self.retire_irp(irp, status);

        if let Err(_e) = self.schedule_pipe(index, pipe) {
            #[cfg(feature = "defmt")]
            defmt::warn!("next irp not started: {}", _e);
        }
    }

    /// Start the next queued control IRP if slot 0 is idle
    ///
    /// The search starts after `from` and wraps, so every control pipe with
    /// work is served once before any is served twice.
    pub(crate) fn schedule_control(&mut self, index: usize, from: Option<PipeId>) -> Result<()> {
        let inst = instance_slot(&mut self.instances, index)?;
        let group = &inst.control_group;
        if group.current_irp.is_some() || group.draining || group.is_empty() {
            return Ok(());
        }
        let Some(pipe) = inst.control_group.next_with_work(&self.pipes, from) else {
            return Ok(());
        };
        match self.pipes.get(pipe).queue.head() {
            Some(irp) => self.start_irp(index, pipe, irp),
            None => Ok(()),
        }
    }

    /// Start the head of `pipe`'s queue if the pipe is idle
    pub(crate) fn schedule_pipe(&mut self, index: usize, pipe: PipeId) -> Result<()> {
        let p = self.pipes.get(pipe);
        if p.active.is_some() {
            return Ok(());
        }
        match p.queue.head() {
            Some(irp) if self.irps.get(irp).state == TransferState::Queued => self.start_irp(index, pipe, irp),
            _ => Ok(()),
        }
    }

    /// Hand an IRP to the bound engine and mark it in progress
    fn start_irp(&mut self, index: usize, pipe: PipeId, irp: IrpId) -> Result<()> {
        let inst = instance_slot(&mut self.instances, index)?;
        let p = self.pipes.get(pipe);
        let transfer = self.irps.get(irp);
        let is_control = p.is_control();
        let host_endpoint = p.host_endpoint;

        let (data_in, data_toggle) = if is_control {
            (transfer.is_in(), false)
        } else {
            match p.direction() {
                Direction::In => (true, inst.toggle_in),
                Direction::Out => (false, inst.toggle_out),
            }
        };
        let request = TransferRequest {
            host_endpoint,
            device_address: p.device_address,
            endpoint_and_direction: p.endpoint_and_direction,
            transfer_type: p.transfer_type,
            endpoint_size: p.endpoint_size,
            speed: p.speed,
            hub_address: p.hub_address,
            hub_port: p.hub_port,
            interval: p.interval,
            setup: transfer.setup.as_ref(),
            buffer: transfer.buffer.as_ref(),
            size: transfer.size,
            data_in,
            data_toggle,
        };

        inst.engine().submit(&request).map_err(|e| {
            #[cfg(feature = "defmt")]
            defmt::warn!("engine refused transfer on endpoint {=u8}: {}", host_endpoint, e);
            e
        })?;

        inst.active_endpoint = host_endpoint;
        if is_control {
            inst.control_group.current_pipe = Some(pipe);
            inst.control_group.current_irp = Some(irp);
        } else {
            self.pipes.get_mut(pipe).active = Some(irp);
        }
        self.irps.get_mut(irp).state = TransferState::InProgress;
        Ok(())
    }

    /// Unlink, free and report an IRP
    pub(crate) fn retire_irp(&mut self, irp: IrpId, status: IrpStatus) {
        if let Some(pipe) = self.irps.get(irp).pipe {
            self.pipes.get_mut(pipe).queue.remove(&mut self.irps, irp);
        }
        let (completion, callback) = self.irps.release(irp, status);
        self.perf.record_irp(status, completion.completed_bytes);
        if let Some(callback) = callback {
            callback(&completion);
        }
    }
}
