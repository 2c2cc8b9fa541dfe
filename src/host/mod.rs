//! USB host port driver
//!
//! [`UhpHost`] owns every driver instance together with the pipe and IRP
//! pools they share. Each instance multiplexes the EHCI and OHCI controllers
//! of one UHPHS port behind a single pipe/IRP interface:
//!
//! - [`UhpHost::tasks`] drives the instance from a polling loop: clock wait,
//!   operation mode setup, then attach debounce and the interrupt body;
//! - [`UhpHost::tasks_isr`] is the interrupt body, also usable from the
//!   UHPHS interrupt handler;
//! - client calls (pipe setup/close, IRP submit/cancel) mutate shared state
//!   under the instance mutex with the interrupt source masked.

mod attach;
mod completion;
mod pipes;
mod reset;
mod root_hub;

pub use attach::AttachState;
pub use reset::ResetState;

use bitflags::bitflags;

use crate::config::{timing, INSTANCES_NUMBER, IRPS_NUMBER, PIPES_NUMBER, CONTROL_PIPES_NUMBER};
use crate::engine::{CompletionSignal, DeviceHandle, HostController, HostStack, RootHubToken, TransferEngine};
use crate::ehci::{EhciOperationalRegisters, PortId};
use crate::error::{Result, UsbError};
use crate::irp::IrpPool;
use crate::ohci::OhciRegisters;
use crate::osal::{DelayHandle, InterruptSource, MutexId, Osal};
use crate::perf::{PerfCounters, PerfSnapshot};
use crate::pipe::{EndpointTable, PipePool, TransferGroup};
use crate::transfer::UsbSpeed;

/// UHPHS OHCI register base on SAM9X60
pub const UHPHS_OHCI_BASE: usize = 0x0060_0000;

/// UHPHS EHCI register base on SAM9X60
pub const UHPHS_EHCI_BASE: usize = 0x0070_0000;

/// Register blocks of one UHPHS port
#[derive(Clone, Copy)]
pub struct RegisterBlocks {
    /// EHCI operational registers
    pub ehci: &'static EhciOperationalRegisters,
    /// OHCI registers
    pub ohci: &'static OhciRegisters,
}

impl RegisterBlocks {
    /// Map the controllers at explicit base addresses
    ///
    /// # Safety
    ///
    /// Both addresses must point at the matching controller and stay mapped
    /// for the life of the program.
    pub unsafe fn from_bases(ehci_base: usize, ohci_base: usize) -> Self {
        unsafe {
            Self {
                ehci: EhciOperationalRegisters::from_base(ehci_base),
                ohci: OhciRegisters::from_base(ohci_base),
            }
        }
    }

    /// Map the SAM9X60 UHPHS block
    ///
    /// # Safety
    ///
    /// Must only be called on SAM9X60 class parts.
    pub unsafe fn sam9x60() -> Self {
        unsafe { Self::from_bases(UHPHS_EHCI_BASE, UHPHS_OHCI_BASE) }
    }
}

/// Root hub port configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RootHubConfig {
    /// Current the port can source, in mA
    pub available_current_ma: u32,
    /// Port indicator LEDs present
    pub port_indication: bool,
    /// Poll the power switch for over-current
    pub port_over_current_detect: bool,
    /// Switch port power on during operation mode setup
    pub port_power_enable: bool,
}

impl Default for RootHubConfig {
    fn default() -> Self {
        Self {
            available_current_ma: 500,
            port_indication: false,
            port_over_current_detect: false,
            port_power_enable: false,
        }
    }
}

/// Instance configuration handed to [`UhpHost::initialize`]
pub struct UhpInit<HC> {
    registers: RegisterBlocks,
    interrupt_source: InterruptSource,
    root_hub: RootHubConfig,
    reset_duration_ms: u32,
    controller: HC,
}

impl<HC: HostController> UhpInit<HC> {
    /// Configuration with default root hub settings
    pub fn new(controller: HC, registers: RegisterBlocks, interrupt_source: InterruptSource) -> Self {
        Self {
            registers,
            interrupt_source,
            root_hub: RootHubConfig::default(),
            reset_duration_ms: timing::RESET_DURATION_MS,
            controller,
        }
    }

    /// Current budget of the root port in mA
    pub fn available_current(mut self, milliamps: u32) -> Self {
        self.root_hub.available_current_ma = milliamps;
        self
    }

    /// Port indicator support
    pub fn port_indication(mut self, enabled: bool) -> Self {
        self.root_hub.port_indication = enabled;
        self
    }

    /// Over-current polling
    pub fn over_current_detect(mut self, enabled: bool) -> Self {
        self.root_hub.port_over_current_detect = enabled;
        self
    }

    /// Port power switching
    pub fn port_power_enable(mut self, enabled: bool) -> Self {
        self.root_hub.port_power_enable = enabled;
        self
    }

    /// Length of the EHCI bus reset
    pub fn reset_duration_ms(mut self, ms: u32) -> Self {
        self.reset_duration_ms = ms;
        self
    }

    /// Replace the whole root hub configuration
    pub fn root_hub(mut self, config: RootHubConfig) -> Self {
        self.root_hub = config;
        self
    }
}

/// Handle returned by [`UhpHost::initialize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModuleHandle(u8);

impl ModuleHandle {
    /// Instance index
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle returned by [`UhpHost::open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClientHandle {
    index: u8,
    generation: u16,
}

bitflags! {
    /// Access requested by [`UhpHost::open`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IoIntent: u8 {
        /// Read access
        const READ = 1 << 0;
        /// Write access
        const WRITE = 1 << 1;
        /// Read and write access
        const READWRITE = Self::READ.bits() | Self::WRITE.bits();
        /// No other client may open the instance
        const EXCLUSIVE = 1 << 2;
        /// Calls never block
        const NONBLOCKING = 1 << 3;
    }
}

impl IoIntent {
    /// The only intent the driver accepts
    pub const SUPPORTED: Self = Self::EXCLUSIVE.union(Self::NONBLOCKING).union(Self::READWRITE);
}

/// Module status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverStatus {
    /// Not initialized
    Uninitialized,
    /// Initialized, waiting for the clock and mode setup
    Busy,
    /// Running; clients may open
    Ready,
    /// Mode setup failed
    Error,
}

/// Task dispatcher states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum TaskState {
    WaitForClockUsable,
    InitializeOperationMode,
    Running,
}

/// Engine that owns the port after the last reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum ActiveEngine {
    Ehci,
    Ohci,
}

/// Events reported to the client event callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostEvent {
    /// The port power switch tripped; port power is off
    OverCurrentDetected {
        /// Root hub port
        port: u8,
    },
}

/// Client event callback, called with the registered context value
pub type ClientEventCallback = fn(usize, HostEvent);

pub(crate) struct Instance<HC> {
    pub(crate) hc: HC,
    pub(crate) regs: RegisterBlocks,
    pub(crate) interrupt_source: InterruptSource,
    pub(crate) root_hub: RootHubConfig,
    pub(crate) reset_duration_ms: u32,
    pub(crate) mutex: MutexId,

    pub(crate) status: DriverStatus,
    pub(crate) task_state: TaskState,
    pub(crate) is_opened: bool,
    pub(crate) client_generation: u16,
    pub(crate) in_interrupt_context: bool,

    pub(crate) event_callback: Option<ClientEventCallback>,
    pub(crate) event_context: usize,

    pub(crate) port: PortId,
    pub(crate) device_attached: bool,
    pub(crate) attached_device: Option<DeviceHandle>,
    pub(crate) root_hub_token: Option<RootHubToken>,
    pub(crate) device_speed: UsbSpeed,
    pub(crate) active_engine: ActiveEngine,
    pub(crate) operation_enabled: bool,

    pub(crate) attach_state: AttachState,
    pub(crate) attach_timer: Option<DelayHandle>,
    pub(crate) reset_state: ResetState,
    pub(crate) reset_timer: Option<DelayHandle>,
    pub(crate) is_resetting: bool,

    pub(crate) endpoints: EndpointTable<PIPES_NUMBER>,
    pub(crate) control_group: TransferGroup,
    /// Hardware endpoint slot the completion engine services next
    pub(crate) active_endpoint: u8,
    pub(crate) signal: CompletionSignal,
    pub(crate) short_packet: bool,
    pub(crate) toggle_in: bool,
    pub(crate) toggle_out: bool,
}

impl<HC: HostController> Instance<HC> {
    fn new(init: UhpInit<HC>, mutex: MutexId) -> Self {
        Self {
            hc: init.controller,
            regs: init.registers,
            interrupt_source: init.interrupt_source,
            root_hub: init.root_hub,
            reset_duration_ms: init.reset_duration_ms,
            mutex,
            status: DriverStatus::Busy,
            task_state: TaskState::WaitForClockUsable,
            is_opened: false,
            client_generation: 0,
            in_interrupt_context: false,
            event_callback: None,
            event_context: 0,
            port: PortId::default(),
            device_attached: false,
            attached_device: None,
            root_hub_token: None,
            device_speed: UsbSpeed::Error,
            active_engine: ActiveEngine::Ehci,
            operation_enabled: false,
            attach_state: AttachState::CheckForAttach,
            attach_timer: None,
            reset_state: ResetState::NoReset,
            reset_timer: None,
            is_resetting: false,
            endpoints: EndpointTable::new(),
            control_group: TransferGroup::new(),
            active_endpoint: 0,
            signal: CompletionSignal::Idle,
            short_packet: false,
            toggle_in: false,
            toggle_out: false,
        }
    }

    /// Engine bound by the last port reset
    pub(crate) fn engine(&mut self) -> &mut dyn TransferEngine {
        match self.active_engine {
            ActiveEngine::Ehci => self.hc.ehci(),
            ActiveEngine::Ohci => self.hc.ohci(),
        }
    }

    /// Host mode setup: forget the previous device and bring up EHCI
    fn initialize_host_mode(&mut self) {
        self.device_attached = false;
        self.attached_device = None;
        self.signal = CompletionSignal::Idle;
        self.short_packet = false;
        self.toggle_in = false;
        self.toggle_out = false;
        self.port = PortId::default();
        self.active_engine = ActiveEngine::Ehci;
        self.hc.ehci().init();
        self.is_resetting = false;
        self.reset_state = ResetState::NoReset;
        self.attach_state = AttachState::CheckForAttach;
        self.operation_enabled = false;
    }

    fn emit(&self, event: HostEvent) {
        if let Some(callback) = self.event_callback {
            callback(self.event_context, event);
        }
    }
}

/// Split borrow of one instance slot, leaving the pools usable
pub(crate) fn instance_slot<HC>(instances: &mut [Option<Instance<HC>>], index: usize) -> Result<&mut Instance<HC>> {
    instances
        .get_mut(index)
        .and_then(Option::as_mut)
        .ok_or(UsbError::InvalidHandle)
}

/// USB host port driver
pub struct UhpHost<OS: Osal, HC: HostController> {
    os: OS,
    instances: [Option<Instance<HC>>; INSTANCES_NUMBER],
    pipes: PipePool<PIPES_NUMBER, CONTROL_PIPES_NUMBER>,
    irps: IrpPool<IRPS_NUMBER>,
    perf: PerfCounters,
}

impl<OS: Osal, HC: HostController> UhpHost<OS, HC> {
    /// Driver with no instance initialized
    pub fn new(os: OS) -> Self {
        Self {
            os,
            instances: core::array::from_fn(|_| None),
            pipes: PipePool::new(),
            irps: IrpPool::new(),
            perf: PerfCounters::new(),
        }
    }

    pub(crate) fn instance(&self, index: usize) -> Result<&Instance<HC>> {
        self.instances
            .get(index)
            .and_then(Option::as_ref)
            .ok_or(UsbError::InvalidHandle)
    }

    pub(crate) fn instance_mut(&mut self, index: usize) -> Result<&mut Instance<HC>> {
        instance_slot(&mut self.instances, index)
    }

    fn module_index(&self, module: ModuleHandle) -> Result<usize> {
        self.instance(module.index()).map(|_| module.index())
    }

    /// Instance index of an open client
    pub(crate) fn client_index(&self, client: ClientHandle) -> Result<usize> {
        let index = client.index as usize;
        match self.instance(index) {
            Ok(inst) if inst.is_opened && inst.client_generation == client.generation => Ok(index),
            _ => {
                #[cfg(feature = "defmt")]
                defmt::debug!("bad client or client closed");
                Err(UsbError::InvalidHandle)
            }
        }
    }

    /// Run `f` with the instance mutex held and its interrupt source masked
    ///
    /// From interrupt context neither is touched. A failed unlock is only
    /// reported; the caller still gets the result of `f`.
    pub(crate) fn locked<R>(&mut self, index: usize, f: impl FnOnce(&mut Self) -> R) -> Result<R> {
        let (mutex, source, in_isr) = {
            let inst = self.instance(index)?;
            (inst.mutex, inst.interrupt_source, inst.in_interrupt_context)
        };
        if in_isr {
            return Ok(f(self));
        }

        self.os.mutex_lock(mutex).map_err(|e| {
            #[cfg(feature = "defmt")]
            defmt::warn!("instance mutex lock failed");
            e
        })?;
        let was_enabled = self.os.interrupt_disable(source);
        let out = f(self);
        self.os.interrupt_restore(source, was_enabled);
        if self.os.mutex_unlock(mutex).is_err() {
            #[cfg(feature = "defmt")]
            defmt::error!("instance mutex unlock failed");
        }
        Ok(out)
    }

    /// Initialize instance `index`
    ///
    /// Creates the instance mutex and starts the controller clocks. The
    /// instance then waits in [`DriverStatus::Busy`] until [`Self::tasks`]
    /// sees the clock locked.
    pub fn initialize(&mut self, index: usize, init: UhpInit<HC>) -> Result<ModuleHandle> {
        let slot = self.instances.get(index).ok_or(UsbError::InvalidParameter)?;
        if slot.is_some() {
            #[cfg(feature = "defmt")]
            defmt::warn!("instance {} already in use", index);
            return Err(UsbError::AlreadyInitialized);
        }

        let mutex = self.os.mutex_create()?;
        let mut inst = Instance::new(init, mutex);
        self.os.interrupt_disable(inst.interrupt_source);
        inst.hc.enable_clock();
        self.instances[index] = Some(inst);
        Ok(ModuleHandle(index as u8))
    }

    /// Tear instance `module` down and hand its controller back
    ///
    /// Every pipe the instance still owns is closed, which aborts the IRPs
    /// queued on it.
    pub fn deinitialize(&mut self, module: ModuleHandle) -> Result<HC> {
        let index = self.module_index(module)?;
        let (source, mutex) = {
            let inst = self.instance(index)?;
            (inst.interrupt_source, inst.mutex)
        };
        self.os.interrupt_disable(source);
        self.os.interrupt_clear(source);

        let owned: heapless::Vec<_, PIPES_NUMBER> = self.pipes.owned_by(index as u8).collect();
        for pipe in owned {
            self.close_pipe(index, pipe);
        }

        if self.os.mutex_delete(mutex).is_err() {
            #[cfg(feature = "defmt")]
            defmt::warn!("instance mutex delete failed");
        }
        let inst = self.instances[index].take().ok_or(UsbError::InvalidHandle)?;
        Ok(inst.hc)
    }

    /// Status of instance `module`
    pub fn status(&self, module: ModuleHandle) -> DriverStatus {
        self.instance(module.index())
            .map_or(DriverStatus::Uninitialized, |inst| inst.status)
    }

    /// Open instance `index`
    ///
    /// Only exclusive, non-blocking, read-write access is supported and only
    /// one client may hold the instance.
    pub fn open(&mut self, index: usize, intent: IoIntent) -> Result<ClientHandle> {
        if index >= INSTANCES_NUMBER {
            return Err(UsbError::InvalidParameter);
        }
        let inst = self.instance_mut(index).map_err(|_| UsbError::NotReady)?;
        if inst.status != DriverStatus::Ready {
            return Err(UsbError::NotReady);
        }
        if intent != IoIntent::SUPPORTED {
            #[cfg(feature = "defmt")]
            defmt::warn!("unsupported io intent {=u8:#x}", intent.bits());
            return Err(UsbError::UnsupportedIntent);
        }
        if inst.is_opened {
            return Err(UsbError::AlreadyOpen);
        }
        inst.event_callback = None;
        inst.is_opened = true;
        inst.client_generation = inst.client_generation.wrapping_add(1);
        Ok(ClientHandle {
            index: index as u8,
            generation: inst.client_generation,
        })
    }

    /// Release the client; the handle goes stale
    pub fn close(&mut self, client: ClientHandle) -> Result<()> {
        let index = self.client_index(client)?;
        let inst = self.instance_mut(index)?;
        inst.is_opened = false;
        inst.event_callback = None;
        inst.client_generation = inst.client_generation.wrapping_add(1);
        Ok(())
    }

    /// Register the client event callback and its context value
    pub fn client_event_callback_set(
        &mut self,
        client: ClientHandle,
        context: usize,
        callback: ClientEventCallback,
    ) -> Result<()> {
        let index = self.client_index(client)?;
        let inst = self.instance_mut(index)?;
        inst.event_context = context;
        inst.event_callback = Some(callback);
        Ok(())
    }

    /// Mask the instance interrupt, returning its prior state
    pub fn events_disable(&mut self, client: ClientHandle) -> Result<bool> {
        let index = self.client_index(client)?;
        let source = self.instance(index)?.interrupt_source;
        Ok(self.os.interrupt_disable(source))
    }

    /// Undo [`Self::events_disable`]
    pub fn events_enable(&mut self, client: ClientHandle, was_enabled: bool) -> Result<()> {
        let index = self.client_index(client)?;
        let source = self.instance(index)?.interrupt_source;
        self.os.interrupt_restore(source, was_enabled);
        Ok(())
    }

    /// Task dispatcher; call from the main loop
    pub fn tasks<S: HostStack>(&mut self, module: ModuleHandle, stack: &mut S) {
        let Ok(index) = self.module_index(module) else {
            #[cfg(feature = "defmt")]
            defmt::debug!("tasks on uninitialized instance");
            return;
        };
        let Ok(state) = self.instance(index).map(|inst| inst.task_state) else {
            return;
        };

        match state {
            TaskState::WaitForClockUsable => {
                if let Ok(inst) = self.instance_mut(index) {
                    if inst.hc.clock_ready() {
                        inst.task_state = TaskState::InitializeOperationMode;
                    }
                }
            }
            TaskState::InitializeOperationMode => self.initialize_operation_mode(index),
            TaskState::Running => {
                self.poll_over_current(index);
                self.drive_attach(index, stack);
                self.service_interrupt(index);
            }
        }
    }

    /// Interrupt body: service both engines, then run the completion engine
    pub fn tasks_isr(&mut self, module: ModuleHandle) {
        if let Ok(index) = self.module_index(module) {
            self.service_interrupt(index);
        }
    }

    fn initialize_operation_mode(&mut self, index: usize) {
        let Ok(inst) = self.instance_mut(index) else {
            return;
        };
        inst.initialize_host_mode();
        if inst.root_hub.port_power_enable {
            if let Some(power) = inst.hc.port_power() {
                if power.enable().is_err() {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("root port power switch failed");
                }
            }
        }
        let source = inst.interrupt_source;
        inst.status = DriverStatus::Ready;
        inst.task_state = TaskState::Running;

        self.os.interrupt_clear(source);
        self.os.interrupt_enable(source);
    }

    /// Transfer statistics since boot
    pub fn stats(&self) -> PerfSnapshot {
        self.perf.snapshot()
    }

    /// Live IRPs across every instance
    pub fn irps_in_use(&self) -> usize {
        self.irps.in_use()
    }

    /// Free pipes left for bulk, interrupt and isochronous endpoints
    pub fn free_pipes(&self) -> usize {
        self.pipes.free_non_control()
    }

    /// Board controller of instance `module`
    pub fn controller(&mut self, module: ModuleHandle) -> Option<&mut HC> {
        self.instance_mut(module.index()).ok().map(|inst| &mut inst.hc)
    }

    /// OS services
    pub fn osal(&mut self) -> &mut OS {
        &mut self.os
    }
}
