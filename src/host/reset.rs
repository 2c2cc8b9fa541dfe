//! Root port reset and EHCI to OHCI ownership handoff
//!
//! EHCI owns the port after power-up. A reset starts on EHCI; its line state
//! and chirp outcome decide the device speed. Low and full speed devices are
//! then handed to the companion OHCI controller, high speed devices stay.
//! The handoff happens at most once per reset and only after the speed is
//! known.

use super::{ActiveEngine, UhpHost};
use crate::config::timing;
use crate::ehci::{LineState, PortSc};
use crate::engine::{HostController, TransferEngine};
use crate::ohci::FunctionalState;
use crate::osal::{DelayHandle, Osal};
use crate::transfer::UsbSpeed;

/// Port reset states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetState {
    /// No reset requested
    NoReset,
    /// Reset requested; arm the T4 settle delay
    Start,
    /// Waiting for the settle delay, then sample the line state
    StartDelayed,
    /// EHCI port reset asserted
    WaitForComplete,
    /// Port reset released; waiting for PR to read back clear
    Complete,
    /// Low speed handoff; waiting for the OHCI settle delay
    OhciResetStart,
    /// Waiting for the OHCI software reset to finish
    OhciWaitForComplete,
}

impl<OS: Osal, HC: HostController> UhpHost<OS, HC> {
    /// Advance the reset machine of instance `index` by at most one step
    pub(crate) fn drive_reset(&mut self, index: usize) {
        let Ok(state) = self.instance(index).map(|inst| inst.reset_state) else {
            return;
        };

        match state {
            ResetState::NoReset => {}
            ResetState::Start => {
                let Ok(inst) = self.instance_mut(index) else { return };
                let port = inst.port;
                inst.hc.ehci().port_reset_enable(port);
                if let Some(handle) = self.arm_delay(timing::RESET_SETTLE_MS) {
                    self.set_reset(index, ResetState::StartDelayed, Some(handle));
                }
            }
            ResetState::StartDelayed => {
                if !self.reset_delay_elapsed(index, timing::RESET_SETTLE_MS) {
                    return;
                }
                self.sample_port_speed(index);
            }
            ResetState::WaitForComplete => {
                let Ok(duration) = self.instance(index).map(|inst| inst.reset_duration_ms) else {
                    return;
                };
                if !self.reset_delay_elapsed(index, duration) {
                    return;
                }
                let Ok(inst) = self.instance_mut(index) else { return };
                inst.regs.ehci.clear_port_bits(inst.port, PortSc::PORT_RESET);
                inst.reset_state = ResetState::Complete;
            }
            ResetState::Complete => {
                let Ok(inst) = self.instance_mut(index) else { return };
                let portsc = inst.regs.ehci.port_status(inst.port);
                if portsc.contains(PortSc::PORT_RESET) {
                    return;
                }
                if portsc.contains(PortSc::PORT_ENABLED) {
                    #[cfg(feature = "defmt")]
                    defmt::debug!("high speed device connected");
                    inst.device_speed = UsbSpeed::High;
                    inst.active_engine = ActiveEngine::Ehci;
                    inst.reset_state = ResetState::NoReset;
                    inst.is_resetting = false;
                } else {
                    #[cfg(feature = "defmt")]
                    defmt::debug!("full speed device connected");
                    inst.device_speed = UsbSpeed::Full;
                    inst.active_engine = ActiveEngine::Ohci;
                    inst.regs.ehci.route_to_companion(inst.port);
                    inst.reset_state = ResetState::OhciWaitForComplete;
                    inst.regs.ohci.request_reset();
                }
            }
            ResetState::OhciResetStart => {
                if !self.reset_delay_elapsed(index, timing::LOW_SPEED_SETTLE_MS) {
                    return;
                }
                let Ok(inst) = self.instance_mut(index) else { return };
                inst.regs.ohci.hc_control.write(FunctionalState::UsbReset.bits());
                inst.reset_state = ResetState::OhciWaitForComplete;
            }
            ResetState::OhciWaitForComplete => {
                let Ok(inst) = self.instance_mut(index) else { return };
                if inst.regs.ohci.reset_in_progress() {
                    return;
                }
                inst.hc.ohci().init();
                inst.is_resetting = false;
                inst.reset_state = ResetState::NoReset;
            }
        }
    }

    /// Settle delay elapsed: low speed goes straight to OHCI, anything else
    /// gets an EHCI bus reset so the chirp can tell full from high speed
    fn sample_port_speed(&mut self, index: usize) {
        let Ok(inst) = self.instance_mut(index) else { return };
        inst.device_speed = UsbSpeed::Error;

        let portsc = inst.regs.ehci.port_status(inst.port);
        let low_speed = !portsc.contains(PortSc::PORT_ENABLED)
            && portsc.contains(PortSc::CURRENT_CONNECT_STATUS)
            && LineState::from_portsc(portsc) == LineState::KState;

        if low_speed {
            #[cfg(feature = "defmt")]
            defmt::debug!("low speed device connected");
            inst.device_speed = UsbSpeed::Low;
            inst.active_engine = ActiveEngine::Ohci;
            inst.regs.ehci.route_to_companion(inst.port);
            inst.regs.ohci.request_reset();
            inst.regs.ohci.hc_control.write(FunctionalState::UsbReset.bits());

            let timer = self.arm_delay(timing::LOW_SPEED_SETTLE_MS);
            self.set_reset(index, ResetState::OhciResetStart, timer);
            return;
        }

        let duration = inst.reset_duration_ms;
        inst.regs.ehci.set_port_bits(inst.port, PortSc::PORT_RESET);
        let timer = self.arm_delay(duration);
        self.set_reset(index, ResetState::WaitForComplete, timer);
    }

    /// Arm a reset-sequence delay; a failure is only reported
    fn arm_delay(&mut self, ms: u32) -> Option<DelayHandle> {
        match self.os.delay_ms(ms) {
            Ok(handle) => Some(handle),
            Err(_e) => {
                #[cfg(feature = "defmt")]
                defmt::error!("reset delay of {=u32} ms not armed: {}", ms, _e);
                None
            }
        }
    }

    /// Whether the current state's delay ran out
    ///
    /// A state entered without a timer arms `ms` here and keeps waiting.
    fn reset_delay_elapsed(&mut self, index: usize, ms: u32) -> bool {
        let Ok(timer) = self.instance(index).map(|inst| inst.reset_timer) else {
            return false;
        };
        let Some(handle) = timer else {
            if let Some(handle) = self.arm_delay(ms) {
                if let Ok(inst) = self.instance_mut(index) {
                    inst.reset_timer = Some(handle);
                }
            }
            return false;
        };
        if !self.os.delay_is_complete(handle) {
            return false;
        }
        if let Ok(inst) = self.instance_mut(index) {
            inst.reset_timer = None;
        }
        true
    }

    fn set_reset(&mut self, index: usize, state: ResetState, timer: Option<DelayHandle>) {
        if let Ok(inst) = self.instance_mut(index) {
            inst.reset_state = state;
            inst.reset_timer = timer;
        }
    }
}

