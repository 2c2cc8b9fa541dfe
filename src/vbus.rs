//! Root port power switching and over-current detection
//!
//! Boards drive VBUS through a GPIO controlled power switch with an
//! open-drain over-current flag. [`GpioPortPower`] wraps such a pair of
//! `embedded-hal` pins; the driver polls it from the task loop when the
//! instance was configured for over-current detection.

use crate::error::{Result, UsbError};
use embedded_hal::digital::{InputPin, OutputPin};

/// Consecutive over-current samples required before a fault is reported
pub const OVERCURRENT_DEBOUNCE_SAMPLES: u8 = 5;

/// Port power states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PortPowerState {
    /// Power off
    Off,
    /// Power on, no fault
    On,
    /// Power removed after an over-current fault
    OverCurrentFault,
}

/// Root port power switch
pub trait PortPower {
    /// Switch VBUS on
    fn enable(&mut self) -> Result<()>;

    /// Switch VBUS off
    fn disable(&mut self);

    /// Poll the over-current flag; true once a fault is confirmed
    fn is_over_current(&mut self) -> bool;

    /// Current power state
    fn state(&self) -> PortPowerState;
}

/// Power switch on an enable output and an active-low over-current input
pub struct GpioPortPower<EN, OC>
where
    EN: OutputPin,
    OC: InputPin,
{
    enable_pin: EN,
    oc_pin: OC,
    state: PortPowerState,
    debounce_counter: u8,
    overcurrent_events: u16,
}

impl<EN, OC> GpioPortPower<EN, OC>
where
    EN: OutputPin,
    OC: InputPin,
{
    /// Take the pins and switch VBUS off
    pub fn new(mut enable_pin: EN, oc_pin: OC) -> Self {
        let _ = enable_pin.set_low();
        Self {
            enable_pin,
            oc_pin,
            state: PortPowerState::Off,
            debounce_counter: 0,
            overcurrent_events: 0,
        }
    }

    /// Over-current faults seen since creation
    pub fn overcurrent_events(&self) -> u16 {
        self.overcurrent_events
    }

    /// Give the pins back
    pub fn release(self) -> (EN, OC) {
        (self.enable_pin, self.oc_pin)
    }

    fn sample_overcurrent(&mut self) -> bool {
        // a pin read error counts as over-current
        let detected = self.oc_pin.is_low().unwrap_or(true);
        if !detected {
            self.debounce_counter = 0;
            return false;
        }
        self.debounce_counter = self.debounce_counter.saturating_add(1);
        if self.debounce_counter >= OVERCURRENT_DEBOUNCE_SAMPLES {
            self.debounce_counter = 0;
            return true;
        }
        false
    }
}

impl<EN, OC> PortPower for GpioPortPower<EN, OC>
where
    EN: OutputPin,
    OC: InputPin,
{
    fn enable(&mut self) -> Result<()> {
        self.enable_pin.set_high().map_err(|_| UsbError::PowerFailure)?;
        self.debounce_counter = 0;
        self.state = PortPowerState::On;
        Ok(())
    }

    fn disable(&mut self) {
        let _ = self.enable_pin.set_low();
        if self.state == PortPowerState::On {
            self.state = PortPowerState::Off;
        }
    }

    fn is_over_current(&mut self) -> bool {
        if self.state != PortPowerState::On {
            return false;
        }
        if self.sample_overcurrent() {
            let _ = self.enable_pin.set_low();
            self.state = PortPowerState::OverCurrentFault;
            self.overcurrent_events = self.overcurrent_events.saturating_add(1);
            #[cfg(feature = "defmt")]
            defmt::warn!("root port over-current, VBUS switched off");
            return true;
        }
        false
    }

    fn state(&self) -> PortPowerState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use core::convert::Infallible;
    use embedded_hal::digital::ErrorType;

    struct Out<'a>(&'a Cell<bool>);

    impl ErrorType for Out<'_> {
        type Error = Infallible;
    }

    impl OutputPin for Out<'_> {
        fn set_low(&mut self) -> core::result::Result<(), Infallible> {
            self.0.set(false);
            Ok(())
        }
        fn set_high(&mut self) -> core::result::Result<(), Infallible> {
            self.0.set(true);
            Ok(())
        }
    }

    struct In<'a>(&'a Cell<bool>);

    impl ErrorType for In<'_> {
        type Error = Infallible;
    }

    impl InputPin for In<'_> {
        fn is_high(&mut self) -> core::result::Result<bool, Infallible> {
            Ok(self.0.get())
        }
        fn is_low(&mut self) -> core::result::Result<bool, Infallible> {
            Ok(!self.0.get())
        }
    }

    #[test]
    fn test_enable_disable() {
        let vbus = Cell::new(true);
        let oc = Cell::new(true);
        let mut power = GpioPortPower::new(Out(&vbus), In(&oc));
        assert!(!vbus.get());
        assert_eq!(power.state(), PortPowerState::Off);

        power.enable().unwrap();
        assert!(vbus.get());
        assert_eq!(power.state(), PortPowerState::On);
        assert!(!power.is_over_current());

        power.disable();
        assert!(!vbus.get());
        assert_eq!(power.state(), PortPowerState::Off);
    }

    #[test]
    fn test_overcurrent_is_debounced() {
        let vbus = Cell::new(false);
        let oc = Cell::new(true);
        let mut power = GpioPortPower::new(Out(&vbus), In(&oc));
        power.enable().unwrap();

        oc.set(false);
        for _ in 0..OVERCURRENT_DEBOUNCE_SAMPLES - 1 {
            assert!(!power.is_over_current());
        }
        // a clean sample restarts the count
        oc.set(true);
        assert!(!power.is_over_current());
        oc.set(false);
        for _ in 0..OVERCURRENT_DEBOUNCE_SAMPLES - 1 {
            assert!(!power.is_over_current());
        }
        assert!(power.is_over_current());
        assert!(!vbus.get());
        assert_eq!(power.state(), PortPowerState::OverCurrentFault);
        assert_eq!(power.overcurrent_events(), 1);

        // no further reports until power is re-enabled
        assert!(!power.is_over_current());
    }
}
