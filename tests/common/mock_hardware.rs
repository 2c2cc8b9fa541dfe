//! Mock hardware for driving the host port without a UHPHS block
//!
//! Register blocks are RAM images leaked for `'static`. The transfer engines
//! replay scripted interrupt reports and record every transfer they are
//! handed. Delays only complete when the test says so.

use std::collections::{HashSet, VecDeque};

use sam_uhp::dma::{DmaBuffer, STAGING_BUFFER_SIZE};
use sam_uhp::ehci::{EhciOperationalRegisters, PortId};
use sam_uhp::engine::{
    DeviceHandle, EngineEvents, HostController, HostStack, PortEvent, RootHubToken, TransferEngine,
    TransferEvent, TransferRequest,
};
use sam_uhp::ohci::OhciRegisters;
use sam_uhp::osal::{DelayHandle, DelayService, InterruptGate, InterruptSource, MutexId, MutexService};
use sam_uhp::vbus::{PortPower, PortPowerState};
use sam_uhp::{RegisterBlocks, Result, SetupPacket, TransferType, UsbError};

/// Fresh zeroed register images
pub fn leak_registers() -> RegisterBlocks {
    RegisterBlocks {
        ehci: Box::leak(Box::new(EhciOperationalRegisters::new())),
        ohci: Box::leak(Box::new(OhciRegisters::new())),
    }
}

/// Zeroed DMA buffer of `size` bytes
pub fn leak_buffer(size: usize) -> DmaBuffer {
    DmaBuffer::from_static(Box::leak(vec![0u8; size].into_boxed_slice()))
}

/// Buffer contents
pub fn buffer_bytes(buffer: &DmaBuffer) -> Vec<u8> {
    // SAFETY: the mock engines never write client buffers
    unsafe { buffer.as_slice() }.to_vec()
}

/// OS services with manually completed delays
#[derive(Default)]
pub struct MockOs {
    next_delay: u16,
    armed: Vec<(DelayHandle, u32)>,
    completed: HashSet<u16>,
    /// Delay lengths in arming order (ms)
    pub delays: Vec<u32>,
    /// Refuse the next delay request
    pub fail_next_delay: bool,
    next_mutex: u8,
    /// Live mutexes
    pub mutexes: HashSet<u8>,
    /// Currently held mutexes
    pub held: HashSet<u8>,
    /// Report the next unlock as failed, after releasing the mutex
    pub fail_next_unlock: bool,
    /// Successful lock calls
    pub lock_count: usize,
    /// Unmasked interrupt sources
    pub enabled: HashSet<u16>,
    /// Pending clears per call
    pub clear_count: usize,
}

impl MockOs {
    /// Complete every armed delay
    pub fn complete_delays(&mut self) {
        for (handle, _) in self.armed.drain(..) {
            self.completed.insert(handle.0);
        }
    }

    /// Armed, not yet completed delays
    pub fn pending_delays(&self) -> usize {
        self.armed.len()
    }

    pub fn is_enabled(&self, source: InterruptSource) -> bool {
        self.enabled.contains(&source.0)
    }
}

impl DelayService for MockOs {
    fn delay_ms(&mut self, ms: u32) -> Result<DelayHandle> {
        if std::mem::take(&mut self.fail_next_delay) {
            return Err(UsbError::TimerUnavailable);
        }
        let handle = DelayHandle(self.next_delay);
        self.next_delay = self.next_delay.wrapping_add(1);
        self.armed.push((handle, ms));
        self.delays.push(ms);
        Ok(handle)
    }

    fn delay_us(&mut self, us: u32) -> Result<DelayHandle> {
        self.delay_ms(us.div_ceil(1000))
    }

    fn delay_is_complete(&mut self, handle: DelayHandle) -> bool {
        self.completed.remove(&handle.0)
    }
}

impl MutexService for MockOs {
    fn mutex_create(&mut self) -> Result<MutexId> {
        let id = self.next_mutex;
        self.next_mutex += 1;
        self.mutexes.insert(id);
        Ok(MutexId(id))
    }

    fn mutex_lock(&mut self, mutex: MutexId) -> Result<()> {
        if !self.mutexes.contains(&mutex.0) || !self.held.insert(mutex.0) {
            return Err(UsbError::MutexFailure);
        }
        self.lock_count += 1;
        Ok(())
    }

    fn mutex_unlock(&mut self, mutex: MutexId) -> Result<()> {
        if !self.held.remove(&mutex.0) || std::mem::take(&mut self.fail_next_unlock) {
            return Err(UsbError::MutexFailure);
        }
        Ok(())
    }

    fn mutex_delete(&mut self, mutex: MutexId) -> Result<()> {
        if !self.mutexes.remove(&mutex.0) {
            return Err(UsbError::MutexFailure);
        }
        Ok(())
    }
}

impl InterruptGate for MockOs {
    fn interrupt_enable(&mut self, source: InterruptSource) {
        self.enabled.insert(source.0);
    }

    fn interrupt_disable(&mut self, source: InterruptSource) -> bool {
        self.enabled.remove(&source.0)
    }

    fn interrupt_clear(&mut self, _source: InterruptSource) {
        self.clear_count += 1;
    }
}

/// What the engine was asked to start
#[derive(Debug, Clone, PartialEq)]
pub struct Submitted {
    pub host_endpoint: u8,
    pub device_address: u8,
    pub endpoint_and_direction: u8,
    pub transfer_type: TransferType,
    pub endpoint_size: u16,
    pub setup: Option<SetupPacket>,
    pub size: u32,
    pub data_in: bool,
    pub data_toggle: bool,
}

/// Scripted transfer engine
#[derive(Default)]
pub struct MockEngine {
    /// Reports returned by successive `service` calls
    pub script: VecDeque<EngineEvents>,
    pub submitted: Vec<Submitted>,
    pub received: u32,
    pub init_count: usize,
    pub lists_disabled: usize,
    pub operation_enabled: bool,
    pub resets_enabled: Vec<PortId>,
    /// Refuse the next submit
    pub reject_next: bool,
}

impl MockEngine {
    pub fn push_transfer(&mut self, event: TransferEvent) {
        self.script.push_back(EngineEvents {
            port: None,
            transfer: Some(event),
        });
    }

    pub fn push_port(&mut self, event: PortEvent) {
        self.script.push_back(EngineEvents {
            port: Some(event),
            transfer: None,
        });
    }
}

impl TransferEngine for MockEngine {
    fn init(&mut self) {
        self.init_count += 1;
    }

    fn service(&mut self) -> EngineEvents {
        self.script.pop_front().unwrap_or_default()
    }

    fn submit(&mut self, request: &TransferRequest<'_>) -> Result<()> {
        if std::mem::take(&mut self.reject_next) {
            return Err(UsbError::EngineRejected);
        }
        self.submitted.push(Submitted {
            host_endpoint: request.host_endpoint,
            device_address: request.device_address,
            endpoint_and_direction: request.endpoint_and_direction,
            transfer_type: request.transfer_type,
            endpoint_size: request.endpoint_size,
            setup: request.setup.copied(),
            size: request.size,
            data_in: request.data_in,
            data_toggle: request.data_toggle,
        });
        Ok(())
    }

    fn disable_transfer_list(&mut self) {
        self.lists_disabled += 1;
    }

    fn received_size(&self) -> u32 {
        self.received
    }

    fn set_operation_enabled(&mut self, enable: bool) {
        self.operation_enabled = enable;
    }

    fn port_reset_enable(&mut self, port: PortId) {
        self.resets_enabled.push(port);
    }
}

/// VBUS switch whose fault line the test flips
#[derive(Default)]
pub struct MockPower {
    pub on: bool,
    pub fault: bool,
    pub fail_enable: bool,
}

impl PortPower for MockPower {
    fn enable(&mut self) -> Result<()> {
        if self.fail_enable {
            return Err(UsbError::PowerFailure);
        }
        self.on = true;
        Ok(())
    }

    fn disable(&mut self) {
        self.on = false;
    }

    fn is_over_current(&mut self) -> bool {
        self.on && self.fault
    }

    fn state(&self) -> PortPowerState {
        match (self.on, self.fault) {
            (true, _) => PortPowerState::On,
            (false, true) => PortPowerState::OverCurrentFault,
            (false, false) => PortPowerState::Off,
        }
    }
}

/// Board glue around the two mock engines
pub struct MockController {
    pub ehci: MockEngine,
    pub ohci: MockEngine,
    pub staging: [u8; STAGING_BUFFER_SIZE],
    pub clock_enabled: bool,
    pub clock_ready: bool,
    /// Buffers invalidated, by DMA address
    pub invalidated: Vec<usize>,
    pub power: Option<MockPower>,
}

impl Default for MockController {
    fn default() -> Self {
        Self {
            ehci: MockEngine::default(),
            ohci: MockEngine::default(),
            staging: [0; STAGING_BUFFER_SIZE],
            clock_enabled: false,
            clock_ready: true,
            invalidated: Vec::new(),
            power: None,
        }
    }
}

impl HostController for MockController {
    type Ehci = MockEngine;
    type Ohci = MockEngine;

    fn ehci(&mut self) -> &mut MockEngine {
        &mut self.ehci
    }

    fn ohci(&mut self) -> &mut MockEngine {
        &mut self.ohci
    }

    fn enable_clock(&mut self) {
        self.clock_enabled = true;
    }

    fn clock_ready(&self) -> bool {
        self.clock_ready
    }

    fn staging_buffer(&self) -> &[u8] {
        &self.staging
    }

    fn invalidate_dcache(&mut self, buffer: &DmaBuffer) {
        self.invalidated.push(buffer.dma_addr());
    }

    fn port_power(&mut self) -> Option<&mut dyn PortPower> {
        self.power.as_mut().map(|p| p as &mut dyn PortPower)
    }
}

/// Host stack that records enumeration calls
#[derive(Default)]
pub struct RecordingStack {
    pub enumerated: Vec<(RootHubToken, u8)>,
    pub denumerated: Vec<DeviceHandle>,
    next_device: usize,
}

impl HostStack for RecordingStack {
    fn device_enumerate(&mut self, root_hub: RootHubToken, port: u8) -> DeviceHandle {
        self.enumerated.push((root_hub, port));
        self.next_device += 1;
        DeviceHandle(self.next_device)
    }

    fn device_denumerate(&mut self, device: DeviceHandle) {
        self.denumerated.push(device);
    }
}
