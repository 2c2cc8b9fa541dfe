//! Attach debounce and detach handling
//!
//! The interrupt body only records the raw connect state. A device is handed
//! to the host stack after it stayed connected for the whole debounce window;
//! an unplug inside the window leaves no trace.

use super::UhpHost;
use crate::config::timing;
use crate::engine::{HostController, HostStack};
use crate::osal::Osal;

/// Attach state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttachState {
    /// Waiting for a connect
    CheckForAttach,
    /// Connect seen; arm the debounce timer
    DetectedDebounce,
    /// Debounce timer running
    Detected,
    /// Device handed to the host stack
    Ready,
}

impl<OS: Osal, HC: HostController> UhpHost<OS, HC> {
    pub(crate) fn drive_attach<S: HostStack>(&mut self, index: usize, stack: &mut S) {
        let Ok(inst) = self.instance_mut(index) else { return };

        match inst.attach_state {
            AttachState::CheckForAttach => {
                if inst.device_attached {
                    inst.attach_state = AttachState::DetectedDebounce;
                }
            }
            AttachState::DetectedDebounce => match self.os.delay_ms(timing::ATTACH_DEBOUNCE_MS) {
                Ok(handle) => {
                    if let Ok(inst) = self.instance_mut(index) {
                        inst.attach_timer = Some(handle);
                        inst.attach_state = AttachState::Detected;
                    }
                }
                Err(_) => {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("attach debounce timer not armed");
                }
            },
            AttachState::Detected => {
                let Some(token) = inst.root_hub_token else {
                    return;
                };
                if let Some(handle) = inst.attach_timer {
                    if !self.os.delay_is_complete(handle) {
                        return;
                    }
                }
                let source = self.instance(index).map(|inst| inst.interrupt_source);
                let Ok(source) = source else { return };

                let was_enabled = self.os.interrupt_disable(source);
                if let Ok(inst) = self.instance_mut(index) {
                    inst.attach_timer = None;
                    if inst.device_attached {
                        // the root hub exposes a single port
                        inst.attached_device = Some(stack.device_enumerate(token, 0));
                        inst.attach_state = AttachState::Ready;
                    } else {
                        #[cfg(feature = "defmt")]
                        defmt::debug!("false attach ignored");
                        inst.attach_state = AttachState::CheckForAttach;
                    }
                }
                self.os.interrupt_restore(source, was_enabled);
            }
            AttachState::Ready => {
                if !inst.device_attached {
                    if let Some(device) = inst.attached_device.take() {
                        stack.device_denumerate(device);
                    }
                    inst.attach_state = AttachState::CheckForAttach;
                }
            }
        }
    }
}
