//! Client pipe and IRP operations
//!
//! Every mutation of the pools runs inside [`UhpHost::locked`], so the
//! completion engine never observes a half-linked queue.

use super::{instance_slot, ClientHandle, UhpHost};
use crate::config::{MAX_ENDPOINT_SIZE, MIN_ENDPOINT_SIZE};
use crate::dma::BoundsChecker;
use crate::engine::HostController;
use crate::error::{Result, UsbError};
use crate::irp::{IrpHandle, IrpId, IrpRequest, IrpStatus, TransferState};
use crate::osal::Osal;
use crate::pipe::{PipeConfig, PipeHandle, PipeId, PipeInfo};
use crate::transfer::{Direction, TransferType};

/// Max packet size recorded for a pipe
///
/// Non-control pipes are floored at the minimum size; anything outside the
/// supported range is rejected.
fn negotiated_endpoint_size(transfer_type: TransferType, requested: u16) -> Result<u16> {
    let size = if transfer_type == TransferType::Control {
        requested
    } else {
        requested.max(MIN_ENDPOINT_SIZE)
    };
    if !(MIN_ENDPOINT_SIZE..=MAX_ENDPOINT_SIZE).contains(&size) {
        #[cfg(feature = "defmt")]
        defmt::warn!("endpoint size {=u16} out of range", requested);
        return Err(UsbError::InvalidParameter);
    }
    Ok(size)
}

impl<OS: Osal, HC: HostController> UhpHost<OS, HC> {
    /// Open a pipe to a device endpoint
    ///
    /// Control pipes come from the reserved control region and share
    /// hardware endpoint 0; every other pipe gets its own endpoint slot.
    ///
    /// # Errors
    ///
    /// [`UsbError::NoResources`] when the pool for the pipe's kind is used
    /// up. The control region holds
    /// [`CONTROL_PIPES_NUMBER`](crate::config::CONTROL_PIPES_NUMBER) pipes, so
    /// control setup can run out as well even though every control pipe
    /// binds to endpoint 0. [`UsbError::InvalidParameter`] for an
    /// unsupported speed or endpoint size.
    pub fn pipe_setup(&mut self, client: ClientHandle, config: &PipeConfig) -> Result<PipeHandle> {
        let index = self.client_index(client)?;
        if !config.speed.is_pipe_speed() {
            #[cfg(feature = "defmt")]
            defmt::warn!("pipe speed {} not supported", config.speed);
            return Err(UsbError::InvalidParameter);
        }
        let endpoint_size = negotiated_endpoint_size(config.transfer_type, config.max_packet_size)?;

        self.locked(index, |host| host.allocate_pipe(index, config, endpoint_size))?
    }

    fn allocate_pipe(&mut self, index: usize, config: &PipeConfig, endpoint_size: u16) -> Result<PipeHandle> {
        let inst = instance_slot(&mut self.instances, index)?;
        let owner = index as u8;

        if config.transfer_type == TransferType::Control {
            let id = self.pipes.alloc_control().ok_or(UsbError::NoResources)?;
            let handle = self.pipes.claim(id, owner, config, endpoint_size, 0);
            inst.control_group.link(&mut self.pipes, id);
            return Ok(handle);
        }

        let Some(id) = self.pipes.alloc_non_control() else {
            #[cfg(feature = "defmt")]
            defmt::warn!("no free pipe");
            return Err(UsbError::NoResources);
        };
        let handle = self.pipes.claim(id, owner, config, endpoint_size, id.0);
        inst.endpoints.bind(id.0, id);
        Ok(handle)
    }

    /// Close a pipe, aborting every IRP still on it
    ///
    /// An IRP the engine is working on is aborted as well; the hardware is
    /// left to finish and its result is dropped. For a control pipe the
    /// other control pipes wait for that result, then continue in
    /// round-robin order.
    pub fn pipe_close(&mut self, pipe: PipeHandle) -> Result<()> {
        let Some(id) = self.pipes.resolve(pipe) else {
            #[cfg(feature = "defmt")]
            defmt::warn!("close of an invalid pipe");
            return Err(UsbError::InvalidHandle);
        };
        let index = self.pipes.get(id).instance as usize;
        self.locked(index, |host| host.close_pipe(index, id))
    }

    pub(crate) fn close_pipe(&mut self, index: usize, id: PipeId) {
        let (is_control, slot) = {
            let pipe = self.pipes.get(id);
            (pipe.is_control(), pipe.host_endpoint)
        };

        let mut in_flight = None;
        if let Ok(inst) = instance_slot(&mut self.instances, index) {
            if is_control {
                if inst.control_group.current_pipe == Some(id) {
                    in_flight = inst.control_group.current_irp;
                }
                inst.control_group.unlink(&mut self.pipes, id);
            } else {
                inst.endpoints.unbind(slot);
            }
        }
        if !is_control {
            in_flight = self.pipes.get_mut(id).active.take();
        }

        while let Some(irp) = self.pipes.get_mut(id).queue.pop_front(&mut self.irps) {
            if in_flight == Some(irp) {
                in_flight = None;
            }
            self.retire_irp(irp, IrpStatus::Aborted);
        }
        // cancelled while in progress, so no longer queued
        if let Some(irp) = in_flight {
            self.retire_irp(irp, IrpStatus::Aborted);
        }

        self.pipes.release(id);
    }

    /// Snapshot of a pipe's configuration
    pub fn pipe_info(&self, pipe: PipeHandle) -> Result<PipeInfo> {
        let id = self.pipes.resolve(pipe).ok_or(UsbError::InvalidHandle)?;
        let p = self.pipes.get(id);
        Ok(PipeInfo {
            device_address: p.device_address,
            endpoint_and_direction: p.endpoint_and_direction,
            transfer_type: p.transfer_type,
            endpoint_size: p.endpoint_size,
            interval: p.interval,
            speed: p.speed,
            host_endpoint: p.host_endpoint,
            queued: p.queue.len(&self.irps),
        })
    }

    /// Queue a transfer on `pipe`
    ///
    /// The IRP starts immediately when nothing else is running on its
    /// endpoint. If the engine refuses it, the IRP is dropped without a
    /// callback and the engine error is returned.
    pub fn irp_submit(&mut self, pipe: PipeHandle, request: IrpRequest) -> Result<IrpHandle> {
        let id = self.pipes.resolve(pipe).ok_or(UsbError::InvalidHandle)?;
        BoundsChecker::validate_transfer(request.buffer.as_ref(), request.size)?;

        let (index, is_control) = {
            let p = self.pipes.get(id);
            (p.instance as usize, p.is_control())
        };
        if is_control && request.setup.is_none() {
            return Err(UsbError::InvalidParameter);
        }

        self.locked(index, |host| host.enqueue_irp(index, id, &request))?
    }

    fn enqueue_irp(&mut self, index: usize, pipe: PipeId, request: &IrpRequest) -> Result<IrpHandle> {
        let irp = self.irps.alloc(request, pipe).ok_or(UsbError::NoResources)?;
        let handle = self.irps.handle(irp);
        self.pipes.get_mut(pipe).queue.push_back(&mut self.irps, irp);

        let started = if self.pipes.get(pipe).is_control() {
            self.schedule_control(index, None)
        } else {
            self.schedule_pipe(index, pipe)
        };

        if let Err(e) = started {
            self.pipes.get_mut(pipe).queue.remove(&mut self.irps, irp);
            let _ = self.irps.release(irp, IrpStatus::Aborted);
            return Err(e);
        }
        Ok(handle)
    }

    /// Cancel an IRP
    ///
    /// A queued IRP completes as aborted before this returns. An IRP the
    /// engine already owns is only marked; the completion engine aborts it
    /// on its next pass. Stale handles are ignored.
    pub fn irp_cancel(&mut self, irp: IrpHandle) {
        let Some(id) = self.irps.resolve(irp) else {
            #[cfg(feature = "defmt")]
            defmt::debug!("cancel of a finished irp");
            return;
        };
        let pipe = match self.irps.get(id).pipe {
            Some(pipe) if self.pipes.get(pipe).in_use => pipe,
            _ => {
                #[cfg(feature = "defmt")]
                defmt::debug!("cancel of an irp without pipe");
                return;
            }
        };
        let index = self.pipes.get(pipe).instance as usize;

        if self.locked(index, |host| host.cancel_irp(pipe, id)).is_err() {
            #[cfg(feature = "defmt")]
            defmt::warn!("irp cancel could not lock the instance");
        }
    }

    fn cancel_irp(&mut self, pipe: PipeId, id: IrpId) {
        self.pipes.get_mut(pipe).queue.remove(&mut self.irps, id);
        match self.irps.get(id).state {
            TransferState::InProgress => self.irps.get_mut(id).state = TransferState::CancelRequested,
            TransferState::Queued => self.retire_irp(id, IrpStatus::Aborted),
            TransferState::CancelRequested | TransferState::Free => {}
        }
    }

    /// Status of an IRP that has not finished yet
    ///
    /// `None` once the IRP completed and its handle went stale.
    pub fn irp_status(&self, irp: IrpHandle) -> Option<IrpStatus> {
        self.irps.resolve(irp).map(|id| self.irps.status(id))
    }

    /// Reset the data toggle of a non-control endpoint to DATA0
    pub fn endpoint_toggle_clear(&mut self, client: ClientHandle, endpoint_and_direction: u8) -> Result<()> {
        let index = self.client_index(client)?;
        let inst = instance_slot(&mut self.instances, index)?;
        let bound = inst
            .endpoints
            .bound()
            .any(|id| self.pipes.get(id).endpoint_and_direction == endpoint_and_direction);
        if !bound {
            #[cfg(feature = "defmt")]
            defmt::debug!("no pipe on endpoint {=u8:#x}", endpoint_and_direction);
            return Ok(());
        }
        match Direction::from_endpoint(endpoint_and_direction) {
            Direction::In => inst.toggle_in = false,
            Direction::Out => inst.toggle_out = false,
        }
        Ok(())
    }
}
