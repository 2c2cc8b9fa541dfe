//! Root hub interface
//!
//! The UHPHS root hub exposes a single port. Port numbers passed in by the
//! host stack are therefore always 0.

use super::{instance_slot, ClientHandle, HostEvent, UhpHost};
use crate::config::ROOT_HUB_PORTS;
use crate::engine::{HostController, RootHubToken};
use crate::error::{Result, UsbError};
use crate::osal::Osal;
use crate::transfer::UsbSpeed;

fn check_port(port: u8) -> Result<()> {
    if port >= ROOT_HUB_PORTS {
        #[cfg(feature = "defmt")]
        defmt::warn!("root hub port {=u8} does not exist", port);
        return Err(UsbError::InvalidParameter);
    }
    Ok(())
}

impl<OS: Osal, HC: HostController> UhpHost<OS, HC> {
    /// Store the token the host stack identifies this root hub by
    ///
    /// Attached devices are not enumerated before this is called.
    pub fn root_hub_initialize(&mut self, client: ClientHandle, token: RootHubToken) -> Result<()> {
        let index = self.client_index(client)?;
        self.instance_mut(index)?.root_hub_token = Some(token);
        Ok(())
    }

    /// Number of root hub ports
    pub fn port_numbers_get(&self, client: ClientHandle) -> Result<u8> {
        self.client_index(client)?;
        Ok(ROOT_HUB_PORTS)
    }

    /// Current the root port can source, in mA
    pub fn maximum_current_get(&self, client: ClientHandle) -> Result<u32> {
        let index = self.client_index(client)?;
        Ok(self.instance(index)?.root_hub.available_current_ma)
    }

    /// Speed the root hub runs at, i.e. the speed of the attached device
    pub fn bus_speed_get(&self, client: ClientHandle) -> Result<UsbSpeed> {
        let index = self.client_index(client)?;
        Ok(self.instance(index)?.device_speed)
    }

    /// Start reset signalling on `port`
    ///
    /// A reset requested while one is running is ignored. Progress is made
    /// by polling [`Self::port_reset_is_complete`].
    pub fn port_reset(&mut self, client: ClientHandle, port: u8) -> Result<()> {
        let index = self.client_index(client)?;
        check_port(port)?;
        let inst = self.instance_mut(index)?;
        if inst.is_resetting {
            #[cfg(feature = "defmt")]
            defmt::debug!("reset already in progress");
            return Ok(());
        }
        inst.is_resetting = true;
        inst.reset_state = super::ResetState::Start;
        self.perf.record_port_reset();
        Ok(())
    }

    /// Advance the reset sequence; true once it finished
    pub fn port_reset_is_complete(&mut self, client: ClientHandle, port: u8) -> Result<bool> {
        let index = self.client_index(client)?;
        check_port(port)?;
        self.drive_reset(index);
        Ok(!self.instance(index)?.is_resetting)
    }

    /// Speed negotiated on `port` by the last reset
    pub fn port_speed_get(&self, client: ClientHandle, port: u8) -> Result<UsbSpeed> {
        let index = self.client_index(client)?;
        check_port(port)?;
        Ok(self.instance(index)?.device_speed)
    }

    /// Suspend `port`; not supported by this root hub and always succeeds
    pub fn port_suspend(&mut self, client: ClientHandle, port: u8) -> Result<()> {
        self.client_index(client)?;
        check_port(port)
    }

    /// Resume `port`; not supported by this root hub and always succeeds
    pub fn port_resume(&mut self, client: ClientHandle, port: u8) -> Result<()> {
        self.client_index(client)?;
        check_port(port)
    }

    /// Enable or disable root hub operation on the bound engine
    pub fn operation_enable(&mut self, client: ClientHandle, enable: bool) -> Result<()> {
        let index = self.client_index(client)?;
        let inst = self.instance_mut(index)?;
        inst.engine().set_operation_enabled(enable);
        inst.operation_enabled = enable;
        Ok(())
    }

    /// Root hub operation state
    pub fn operation_is_enabled(&self, client: ClientHandle) -> Result<bool> {
        let index = self.client_index(client)?;
        Ok(self.instance(index)?.operation_enabled)
    }

    /// Poll the port power switch; a trip powers the port down and drops
    /// the device
    pub(crate) fn poll_over_current(&mut self, index: usize) {
        let Ok(inst) = instance_slot(&mut self.instances, index) else {
            return;
        };
        if !inst.root_hub.port_over_current_detect {
            return;
        }
        let tripped = match inst.hc.port_power() {
            Some(power) => {
                let tripped = power.is_over_current();
                if tripped {
                    power.disable();
                }
                tripped
            }
            None => false,
        };
        if tripped {
            inst.device_attached = false;
            inst.emit(HostEvent::OverCurrentDetected { port: 0 });
        }
    }
}
