//! I/O Request Packets and per-pipe IRP queues
//!
//! IRPs live in a fixed [`IrpPool`] shared by every instance. Clients hold
//! generation-checked [`IrpHandle`]s; a handle goes stale as soon as the IRP
//! is finalized and its callback has run. Queues are index-linked through
//! the pool with previous/next links, so removal from any position is O(1).

use bitflags::bitflags;
use crate::dma::DmaBuffer;
use crate::pipe::PipeId;
use crate::transfer::SetupPacket;

bitflags! {
    /// IRP flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IrpFlags: u8 {
        /// Data stage runs device-to-host
        const DATA_IN = 0x80;
    }
}

/// Client visible IRP status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IrpStatus {
    /// Queued behind another IRP
    Pending,
    /// Owned by the transfer engine
    InProgress,
    /// All requested bytes moved
    Completed,
    /// Device ended the transfer early
    CompletedShort,
    /// Endpoint answered with STALL
    ErrorStall,
    /// Cancelled or pipe closed
    Aborted,
}

impl IrpStatus {
    /// True for statuses that end the IRP
    #[inline]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::InProgress)
    }
}

/// Lifecycle of an IRP slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum TransferState {
    Free,
    Queued,
    InProgress,
    /// Cancelled while owned by the engine; finalized by the completion path
    CancelRequested,
}

impl TransferState {
    fn status(self) -> IrpStatus {
        match self {
            Self::Queued | Self::Free => IrpStatus::Pending,
            Self::InProgress | Self::CancelRequested => IrpStatus::InProgress,
        }
    }
}

/// Completion callback; runs in the context that finalized the IRP
pub type IrpCallback = fn(&IrpCompletion);

/// Handle to a submitted IRP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IrpHandle {
    index: u16,
    generation: u16,
}

/// Index of an IRP slot inside the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IrpId(pub(crate) u16);

impl IrpId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Transfer request handed to `irp_submit`
#[derive(Debug, Clone, Copy)]
pub struct IrpRequest {
    /// Data buffer, `None` for zero length transfers
    pub buffer: Option<DmaBuffer>,
    /// Requested byte count
    pub size: u32,
    /// Setup packet, required on control pipes
    pub setup: Option<SetupPacket>,
    /// Direction and transfer flags
    pub flags: IrpFlags,
    /// Completion callback
    pub callback: Option<IrpCallback>,
    /// Opaque value handed back in [`IrpCompletion`]
    pub user_data: usize,
}

impl IrpRequest {
    /// Request moving `size` bytes through `buffer`
    pub fn new(buffer: Option<DmaBuffer>, size: u32) -> Self {
        Self {
            buffer,
            size,
            setup: None,
            flags: IrpFlags::empty(),
            callback: None,
            user_data: 0,
        }
    }

    /// Control request; the data direction follows the setup packet
    pub fn control(setup: SetupPacket, buffer: Option<DmaBuffer>) -> Self {
        let mut request = Self::new(buffer, setup.length as u32);
        if setup.is_in() {
            request.flags |= IrpFlags::DATA_IN;
        }
        request.setup = Some(setup);
        request
    }

    /// Attach a completion callback and its user data
    pub fn with_callback(mut self, callback: IrpCallback, user_data: usize) -> Self {
        self.callback = Some(callback);
        self.user_data = user_data;
        self
    }
}

/// Final report of an IRP, passed to its callback
#[derive(Debug, Clone, Copy)]
pub struct IrpCompletion {
    /// Handle the IRP was submitted under (already stale)
    pub irp: IrpHandle,
    /// Terminal status
    pub status: IrpStatus,
    /// Requested byte count
    pub size: u32,
    /// Bytes actually moved
    pub completed_bytes: u32,
    /// Buffer given at submission
    pub buffer: Option<DmaBuffer>,
    /// User data given at submission
    pub user_data: usize,
}

#[derive(Clone, Copy)]
pub(crate) struct Irp {
    generation: u16,
    pub(crate) state: TransferState,
    pub(crate) pipe: Option<PipeId>,
    pub(crate) buffer: Option<DmaBuffer>,
    pub(crate) size: u32,
    pub(crate) completed_bytes: u32,
    pub(crate) setup: Option<SetupPacket>,
    pub(crate) flags: IrpFlags,
    callback: Option<IrpCallback>,
    user_data: usize,
    in_queue: bool,
    prev: Option<IrpId>,
    next: Option<IrpId>,
}

impl Irp {
    const EMPTY: Self = Self {
        generation: 0,
        state: TransferState::Free,
        pipe: None,
        buffer: None,
        size: 0,
        completed_bytes: 0,
        setup: None,
        flags: IrpFlags::empty(),
        callback: None,
        user_data: 0,
        in_queue: false,
        prev: None,
        next: None,
    };

    /// Data stage runs device-to-host
    #[inline]
    pub(crate) fn is_in(&self) -> bool {
        self.flags.contains(IrpFlags::DATA_IN)
    }
}

/// Fixed pool of IRP slots
pub struct IrpPool<const N: usize> {
    irps: [Irp; N],
}

impl<const N: usize> IrpPool<N> {
    /// All slots free
    pub const fn new() -> Self {
        Self {
            irps: [Irp::EMPTY; N],
        }
    }

    /// First-fit allocation of a queued IRP bound to `pipe`
    pub(crate) fn alloc(&mut self, request: &IrpRequest, pipe: PipeId) -> Option<IrpId> {
        let index = self.irps.iter().position(|irp| irp.state == TransferState::Free)?;
        let irp = &mut self.irps[index];
        *irp = Irp {
            generation: irp.generation,
            state: TransferState::Queued,
            pipe: Some(pipe),
            buffer: request.buffer,
            size: request.size,
            completed_bytes: 0,
            setup: request.setup,
            flags: request.flags,
            callback: request.callback,
            user_data: request.user_data,
            in_queue: false,
            prev: None,
            next: None,
        };
        Some(IrpId(index as u16))
    }

    /// Map a client handle to a live slot
    pub(crate) fn resolve(&self, handle: IrpHandle) -> Option<IrpId> {
        let irp = self.irps.get(handle.index as usize)?;
        (irp.state != TransferState::Free && irp.generation == handle.generation)
            .then_some(IrpId(handle.index))
    }

    pub(crate) fn handle(&self, id: IrpId) -> IrpHandle {
        IrpHandle {
            index: id.0,
            generation: self.irps[id.index()].generation,
        }
    }

    #[inline]
    pub(crate) fn get(&self, id: IrpId) -> &Irp {
        &self.irps[id.index()]
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: IrpId) -> &mut Irp {
        &mut self.irps[id.index()]
    }

    /// Status of a live IRP
    pub(crate) fn status(&self, id: IrpId) -> IrpStatus {
        self.get(id).state.status()
    }

    /// Free the slot and hand back the completion report
    ///
    /// The slot must already be unlinked from its queue.
    pub(crate) fn release(&mut self, id: IrpId, status: IrpStatus) -> (IrpCompletion, Option<IrpCallback>) {
        let handle = self.handle(id);
        let irp = &mut self.irps[id.index()];
        debug_assert!(!irp.in_queue);
        let completion = IrpCompletion {
            irp: handle,
            status,
            size: irp.size,
            completed_bytes: irp.completed_bytes,
            buffer: irp.buffer,
            user_data: irp.user_data,
        };
        let callback = irp.callback;
        *irp = Irp {
            generation: irp.generation.wrapping_add(1),
            ..Irp::EMPTY
        };
        (completion, callback)
    }

    /// Number of live IRPs
    pub fn in_use(&self) -> usize {
        self.irps
            .iter()
            .filter(|irp| irp.state != TransferState::Free)
            .count()
    }
}

impl<const N: usize> Default for IrpPool<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Index-linked FIFO of IRPs owned by one pipe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct IrpQueue {
    head: Option<IrpId>,
    tail: Option<IrpId>,
}

impl IrpQueue {
    pub(crate) const EMPTY: Self = Self {
        head: None,
        tail: None,
    };

    #[inline]
    pub(crate) fn head(&self) -> Option<IrpId> {
        self.head
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn push_back<const N: usize>(&mut self, pool: &mut IrpPool<N>, id: IrpId) {
        {
            let irp = pool.get_mut(id);
            irp.prev = self.tail;
            irp.next = None;
            irp.in_queue = true;
        }
        match self.tail {
            Some(tail) => pool.get_mut(tail).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
    }

    /// Unlink `id`; returns false if it was not queued
    pub(crate) fn remove<const N: usize>(&mut self, pool: &mut IrpPool<N>, id: IrpId) -> bool {
        let (prev, next) = {
            let irp = pool.get_mut(id);
            if !irp.in_queue {
                return false;
            }
            irp.in_queue = false;
            (irp.prev.take(), irp.next.take())
        };
        match prev {
            Some(prev) => pool.get_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => pool.get_mut(next).prev = prev,
            None => self.tail = prev,
        }
        true
    }

    pub(crate) fn pop_front<const N: usize>(&mut self, pool: &mut IrpPool<N>) -> Option<IrpId> {
        let head = self.head?;
        self.remove(pool, head);
        Some(head)
    }

    pub(crate) fn len<const N: usize>(&self, pool: &IrpPool<N>) -> usize {
        let mut count = 0;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            count += 1;
            cursor = pool.get(id).next;
        }
        count
    }
}
