//! Clock tree bring-up for the USB host port
//!
//! One-shot PMC sequence run at boot: UTMI PLL (UPLL), programmable clock 0,
//! the board's peripheral clocks, the QSPI clock and finally the 48 MHz OHCI
//! clock derived from UPLL. The driver later polls [`upll_locked`] before it
//! touches the controllers.

use crate::ehci::register::{wait_for, Register};
use crate::error::Result;

/// PMC base address on SAM9X60
pub const PMC_BASE: usize = 0xFFFF_FC00;

/// Polls of a ready bit before giving up
pub const READY_POLL_LIMIT: u32 = 1_000_000;

/// Peripheral identifiers used by the default clock plan
pub mod peripheral_id {
    #![allow(missing_docs)]
    pub const PIOA: u8 = 2;
    pub const PIOB: u8 = 3;
    pub const PIOC: u8 = 4;
    pub const TC0: u8 = 17;
    pub const UHPHS: u8 = 22;
    pub const PIOD: u8 = 44;
    pub const DBGU: u8 = 47;
}

/// Power Management Controller registers
#[repr(C)]
pub struct PmcRegisters {
    /// System Clock Enable
    pub scer: Register<u32>,
    /// System Clock Disable
    pub scdr: Register<u32>,
    /// System Clock Status
    pub scsr: Register<u32>,
    /// PLL Control 0
    pub pll_ctrl0: Register<u32>,
    /// PLL Control 1
    pub pll_ctrl1: Register<u32>,
    /// PLL Spread Spectrum
    pub pll_ssr: Register<u32>,
    /// PLL Analog Control
    pub pll_acr: Register<u32>,
    /// PLL Update
    pub pll_updt: Register<u32>,
    /// Main Oscillator
    pub ckgr_mor: Register<u32>,
    /// Main Clock Frequency
    pub ckgr_mcfr: Register<u32>,
    /// Master Clock
    pub mckr: Register<u32>,
    _reserved0: [Register<u32>; 3],
    /// USB Clock
    pub usb: Register<u32>,
    _reserved1: Register<u32>,
    /// Programmable Clocks
    pub pck: [Register<u32>; 2],
    _reserved2: [Register<u32>; 6],
    /// Interrupt Enable
    pub ier: Register<u32>,
    /// Interrupt Disable
    pub idr: Register<u32>,
    /// Status
    pub sr: Register<u32>,
    /// Interrupt Mask
    pub imr: Register<u32>,
    _reserved3: [Register<u32>; 6],
    /// Peripheral Control
    pub pcr: Register<u32>,
    _reserved4: [Register<u32>; 24],
    /// PLL Interrupt Status 0
    pub pll_isr0: Register<u32>,
}

const _: () = {
    assert!(core::mem::size_of::<PmcRegisters>() == 0xF0);
};

impl PmcRegisters {
    /// Zeroed register image for simulation
    pub const fn new() -> Self {
        const ZERO: Register<u32> = Register::new(0);
        Self {
            scer: ZERO,
            scdr: ZERO,
            scsr: ZERO,
            pll_ctrl0: ZERO,
            pll_ctrl1: ZERO,
            pll_ssr: ZERO,
            pll_acr: ZERO,
            pll_updt: ZERO,
            ckgr_mor: ZERO,
            ckgr_mcfr: ZERO,
            mckr: ZERO,
            _reserved0: [ZERO; 3],
            usb: ZERO,
            _reserved1: ZERO,
            pck: [ZERO; 2],
            _reserved2: [ZERO; 6],
            ier: ZERO,
            idr: ZERO,
            sr: ZERO,
            imr: ZERO,
            _reserved3: [ZERO; 6],
            pcr: ZERO,
            _reserved4: [ZERO; 24],
            pll_isr0: ZERO,
        }
    }

    /// Map the PMC
    ///
    /// # Safety
    ///
    /// `base` must be the PMC base address and the caller must not alias it
    /// with another mapping used concurrently.
    pub unsafe fn from_base(base: usize) -> &'static Self {
        unsafe { &*(base as *const Self) }
    }
}

impl Default for PmcRegisters {
    fn default() -> Self {
        Self::new()
    }
}

/// PMC field encodings
pub mod bits {
    #![allow(missing_docs)]

    pub const SCER_QSPICLK: u32 = 1 << 5;
    pub const SCER_UHP: u32 = 1 << 6;
    pub const SCER_PCK0: u32 = 1 << 8;
    pub const SCER_PCK1: u32 = 1 << 9;

    pub const SR_PCKRDY0: u32 = 1 << 8;

    pub const PLL_ID_UPLL: u32 = 1;
    pub const UPDT_UPDATE: u32 = 1 << 8;
    pub const fn updt_stuptim(v: u32) -> u32 {
        (v & 0xFF) << 16
    }

    pub const fn acr_control(v: u32) -> u32 {
        v & 0xFF
    }
    pub const ACR_UTMIVR: u32 = 1 << 12;
    pub const ACR_UTMIBG: u32 = 1 << 13;
    pub const fn acr_lock_thr(v: u32) -> u32 {
        (v & 0x7) << 16
    }
    pub const fn acr_loop_filter(v: u32) -> u32 {
        (v & 0x3F) << 24
    }

    pub const fn ctrl1_fracr(v: u32) -> u32 {
        v & 0x3F_FFFF
    }
    pub const fn ctrl1_mul(v: u32) -> u32 {
        (v & 0xFF) << 24
    }

    pub const CTRL0_ENPLL: u32 = 1 << 28;
    pub const CTRL0_ENPLLCK: u32 = 1 << 29;
    pub const CTRL0_ENLOCK: u32 = 1 << 31;

    pub const ISR0_LOCKU: u32 = 1 << 1;

    pub const PCK_CSS_PLLA: u32 = 3;
    pub const fn pck_pres(v: u32) -> u32 {
        (v & 0xFF) << 5
    }

    pub const USB_USBS_UPLL: u32 = 1 << 0;
    pub const fn usb_usbdiv(v: u32) -> u32 {
        (v & 0xF) << 8
    }

    pub const fn pcr_pid(v: u32) -> u32 {
        v & 0x7F
    }
    pub const fn pcr_gclkcss(v: u32) -> u32 {
        (v & 0x7) << 8
    }
    pub const PCR_CMD: u32 = 1 << 12;
    pub const fn pcr_gclkdiv(v: u32) -> u32 {
        (v & 0xFF) << 20
    }
    pub const PCR_EN: u32 = 1 << 28;
    pub const PCR_GCLKEN: u32 = 1 << 29;
}

use bits::*;

/// Peripheral clock plan entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeripheralClock {
    /// Peripheral identifier
    pub id: u8,
    /// Peripheral clock enable
    pub enable: bool,
    /// Generic clock enable
    pub gclk_enable: bool,
    /// Generic clock source
    pub gclk_source: u8,
    /// Generic clock divider
    pub gclk_div: u8,
}

impl PeripheralClock {
    /// Peripheral clock only, no generic clock
    pub const fn enabled(id: u8) -> Self {
        Self {
            id,
            enable: true,
            gclk_enable: false,
            gclk_source: 0,
            gclk_div: 0,
        }
    }

    /// PCR write command for this entry
    pub const fn pcr_value(&self) -> u32 {
        PCR_CMD
            | if self.gclk_enable { PCR_GCLKEN } else { 0 }
            | if self.enable { PCR_EN } else { 0 }
            | pcr_gclkdiv(self.gclk_div as u32)
            | pcr_gclkcss(self.gclk_source as u32)
            | pcr_pid(self.id as u32)
    }
}

/// Peripheral clocks enabled by [`initialize`]
pub const DEFAULT_PERIPHERALS: [PeripheralClock; 6] = [
    PeripheralClock::enabled(peripheral_id::PIOA),
    PeripheralClock::enabled(peripheral_id::PIOB),
    PeripheralClock::enabled(peripheral_id::PIOC),
    PeripheralClock::enabled(peripheral_id::TC0),
    PeripheralClock::enabled(peripheral_id::PIOD),
    PeripheralClock::enabled(peripheral_id::DBGU),
];

/// Start the UTMI PLL and wait for lock
///
/// `delay_us` busy-waits for the given number of microseconds.
pub fn init_upll<D: FnMut(u32)>(pmc: &PmcRegisters, delay_us: &mut D) -> Result<()> {
    // Target UPLL, 150 us startup, update deferred
    pmc.pll_updt.write(updt_stuptim(0x6) | PLL_ID_UPLL);
    pmc.pll_acr
        .write(acr_loop_filter(0x1B) | acr_lock_thr(0x4) | acr_control(0x10));
    pmc.pll_ctrl1.write(ctrl1_mul(39) | ctrl1_fracr(0));

    pmc.pll_acr.set_bits(ACR_UTMIBG);
    delay_us(crate::config::timing::UTMI_STARTUP_US);
    pmc.pll_acr.set_bits(ACR_UTMIVR);
    delay_us(crate::config::timing::UTMI_STARTUP_US);

    pmc.pll_updt.set_bits(UPDT_UPDATE);
    pmc.pll_ctrl0.write(CTRL0_ENLOCK | CTRL0_ENPLL | CTRL0_ENPLLCK);

    wait_for(READY_POLL_LIMIT, || upll_locked(pmc)).map_err(|e| {
        #[cfg(feature = "defmt")]
        defmt::error!("UPLL did not lock");
        e
    })
}

/// PCK0 from PLLA, undivided
pub fn init_programmable_clock(pmc: &PmcRegisters) -> Result<()> {
    pmc.scdr.write(SCER_PCK0 | SCER_PCK1);
    pmc.pck[0].write(PCK_CSS_PLLA | pck_pres(0));
    pmc.scer.write(SCER_PCK0);
    wait_for(READY_POLL_LIMIT, || pmc.sr.is_set(SR_PCKRDY0))
}

/// Apply a peripheral clock plan
pub fn init_peripheral_clocks(pmc: &PmcRegisters, plan: &[PeripheralClock]) {
    for entry in plan {
        pmc.pcr.write(entry.pcr_value());
    }
}

/// Enable the peripheral clock of one peripheral
pub fn enable_peripheral(pmc: &PmcRegisters, id: u8) {
    pmc.pcr.write(PeripheralClock::enabled(id).pcr_value());
}

/// QSPI system clock
pub fn init_qspi_clock(pmc: &PmcRegisters) {
    pmc.scer.write(SCER_QSPICLK);
}

/// 48 MHz OHCI clock from UPLL (480 MHz / 10)
pub fn init_usb_clock(pmc: &PmcRegisters) {
    pmc.usb.write(usb_usbdiv(9) | USB_USBS_UPLL);
    pmc.scer.write(SCER_UHP);
}

/// Full boot sequence
pub fn initialize<D: FnMut(u32)>(pmc: &PmcRegisters, mut delay_us: D) -> Result<()> {
    init_upll(pmc, &mut delay_us)?;
    init_programmable_clock(pmc)?;
    init_peripheral_clocks(pmc, &DEFAULT_PERIPHERALS);
    init_qspi_clock(pmc);
    init_usb_clock(pmc);
    Ok(())
}

/// UTMI PLL lock status
#[inline]
pub fn upll_locked(pmc: &PmcRegisters) -> bool {
    pmc.pll_isr0.is_set(ISR0_LOCKU)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UsbError;

    #[test]
    fn test_register_offsets() {
        let pmc = PmcRegisters::new();
        let base = &pmc as *const _ as usize;
        assert_eq!(&pmc.usb as *const _ as usize - base, 0x38);
        assert_eq!(&pmc.pck[0] as *const _ as usize - base, 0x40);
        assert_eq!(&pmc.sr as *const _ as usize - base, 0x68);
        assert_eq!(&pmc.pcr as *const _ as usize - base, 0x88);
        assert_eq!(&pmc.pll_isr0 as *const _ as usize - base, 0xEC);
    }

    #[test]
    fn test_upll_sequence_values() {
        let pmc = PmcRegisters::new();
        pmc.pll_isr0.write(ISR0_LOCKU);
        let mut waits = 0;
        init_upll(&pmc, &mut |us| {
            assert_eq!(us, 10);
            waits += 1;
        })
        .unwrap();

        assert_eq!(waits, 2);
        assert_eq!(pmc.pll_updt.read(), (6 << 16) | UPDT_UPDATE | 1);
        assert_eq!(
            pmc.pll_acr.read(),
            (0x1B << 24) | (4 << 16) | 0x10 | ACR_UTMIBG | ACR_UTMIVR
        );
        assert_eq!(pmc.pll_ctrl1.read(), 39 << 24);
        assert_eq!(pmc.pll_ctrl0.read(), CTRL0_ENLOCK | CTRL0_ENPLL | CTRL0_ENPLLCK);
    }

    #[test]
    fn test_upll_lock_timeout() {
        let pmc = PmcRegisters::new();
        assert_eq!(init_upll(&pmc, &mut |_| {}), Err(UsbError::Timeout));
        assert!(!upll_locked(&pmc));
    }

    #[test]
    fn test_usb_clock_and_peripherals() {
        let pmc = PmcRegisters::new();
        init_usb_clock(&pmc);
        assert_eq!(pmc.usb.read(), (9 << 8) | 1);
        assert_eq!(pmc.scer.read(), SCER_UHP);

        enable_peripheral(&pmc, peripheral_id::UHPHS);
        assert_eq!(pmc.pcr.read(), PCR_CMD | PCR_EN | 22);
    }

    #[test]
    fn test_full_sequence() {
        let pmc = PmcRegisters::new();
        pmc.pll_isr0.write(ISR0_LOCKU);
        pmc.sr.write(SR_PCKRDY0);
        initialize(&pmc, |_| {}).unwrap();
        assert_eq!(pmc.pck[0].read(), PCK_CSS_PLLA);
        // last peripheral of the plan stays in PCR
        assert_eq!(pmc.pcr.read(), PCR_CMD | PCR_EN | peripheral_id::DBGU as u32);
    }
}
