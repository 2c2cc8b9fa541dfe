//! Shared test utilities for sam-uhp tests
//!
//! Brings a mock instance up to `Ready`, opens a client and collects IRP
//! completions and client events in thread-local logs.

#![allow(dead_code)]

pub mod mock_hardware;

use std::cell::RefCell;

pub use mock_hardware::{
    buffer_bytes, leak_buffer, leak_registers, MockController, MockEngine, MockOs, MockPower, RecordingStack,
};

use sam_uhp::osal::InterruptSource;
use sam_uhp::{
    ClientHandle, DriverStatus, HostEvent, IoIntent, IrpCompletion, IrpStatus, ModuleHandle, RegisterBlocks,
    RootHubToken, UhpHost, UhpInit,
};

/// UHPHS interrupt line on SAM9X60
pub const UHPHS_IRQ: InterruptSource = InterruptSource(22);

pub type Host = UhpHost<MockOs, MockController>;

thread_local! {
    static COMPLETIONS: RefCell<Vec<IrpCompletion>> = const { RefCell::new(Vec::new()) };
    static EVENTS: RefCell<Vec<(usize, HostEvent)>> = const { RefCell::new(Vec::new()) };
}

/// IRP callback feeding [`completions`]
pub fn record_completion(completion: &IrpCompletion) {
    COMPLETIONS.with(|log| log.borrow_mut().push(*completion));
}

/// Drain the completions seen on this thread
pub fn completions() -> Vec<IrpCompletion> {
    COMPLETIONS.with(|log| std::mem::take(&mut *log.borrow_mut()))
}

/// `(user_data, status)` of the drained completions
pub fn completion_order() -> Vec<(usize, IrpStatus)> {
    completions().iter().map(|c| (c.user_data, c.status)).collect()
}

/// Client event callback feeding [`events`]
pub fn record_event(context: usize, event: HostEvent) {
    EVENTS.with(|log| log.borrow_mut().push((context, event)));
}

/// Drain the client events seen on this thread
pub fn events() -> Vec<(usize, HostEvent)> {
    EVENTS.with(|log| std::mem::take(&mut *log.borrow_mut()))
}

/// One running instance with an open client
pub struct Harness {
    pub host: Host,
    pub module: ModuleHandle,
    pub client: ClientHandle,
    pub regs: RegisterBlocks,
    pub stack: RecordingStack,
}

impl Harness {
    /// Instance 0 on default root hub settings
    pub fn new() -> Self {
        Self::with(|init| init, MockController::default())
    }

    /// Instance 0, customizing the init data
    pub fn with(
        configure: impl FnOnce(UhpInit<MockController>) -> UhpInit<MockController>,
        controller: MockController,
    ) -> Self {
        let regs = leak_registers();
        let mut host = Host::new(MockOs::default());
        let init = configure(UhpInit::new(controller, regs, UHPHS_IRQ));
        let module = host.initialize(0, init).expect("initialize");
        let mut stack = RecordingStack::default();

        // clock wait, then operation mode setup
        host.tasks(module, &mut stack);
        host.tasks(module, &mut stack);
        assert_eq!(host.status(module), DriverStatus::Ready);

        let client = host.open(0, IoIntent::SUPPORTED).expect("open");
        host.root_hub_initialize(client, RootHubToken(7)).expect("root hub");
        completions();
        events();

        Self {
            host,
            module,
            client,
            regs,
            stack,
        }
    }

    pub fn controller(&mut self) -> &mut MockController {
        self.host.controller(self.module).expect("instance")
    }

    pub fn os(&mut self) -> &mut MockOs {
        self.host.osal()
    }

    pub fn ehci(&mut self) -> &mut MockEngine {
        &mut self.controller().ehci
    }

    pub fn ohci(&mut self) -> &mut MockEngine {
        &mut self.controller().ohci
    }

    /// One task dispatcher pass
    pub fn tasks(&mut self) {
        self.host.tasks(self.module, &mut self.stack);
    }

    /// `n` task dispatcher passes
    pub fn run(&mut self, n: usize) {
        for _ in 0..n {
            self.tasks();
        }
    }

    /// One interrupt service pass
    pub fn isr(&mut self) {
        self.host.tasks_isr(self.module);
    }
}
