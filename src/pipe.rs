//! Pipe arena, endpoint table and control transfer group
//!
//! Pipes are drawn from one fixed [`PipePool`] shared by every instance.
//! The leading `CONTROL` entries form a reserved control region: control
//! pipes come from there and always bind hardware endpoint slot 0. Every
//! other pipe takes the first free entry of the general region and binds the
//! endpoint table slot with the same index.
//!
//! Control pipes of an instance are additionally linked into a circular
//! [`TransferGroup`] that the completion engine walks round-robin.

use crate::irp::{IrpId, IrpQueue};
use crate::transfer::{Direction, TransferType, UsbSpeed};

/// Handle to a configured pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PipeHandle {
    index: u8,
    generation: u16,
}

/// Index of a pipe inside the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PipeId(pub(crate) u8);

impl PipeId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Pipe parameters supplied by the host stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PipeConfig {
    /// Device address on the bus
    pub device_address: u8,
    /// Endpoint number, bit 7 set for IN
    pub endpoint_and_direction: u8,
    /// Address of the hub the device hangs off, 0 for the root port
    pub hub_address: u8,
    /// Hub port number
    pub hub_port: u8,
    /// Transfer type
    pub transfer_type: TransferType,
    /// Polling interval for periodic endpoints
    pub interval: u8,
    /// Maximum packet size
    pub max_packet_size: u16,
    /// Device speed
    pub speed: UsbSpeed,
}

impl PipeConfig {
    /// Default control pipe of `device_address`
    pub const fn control(device_address: u8, max_packet_size: u16, speed: UsbSpeed) -> Self {
        Self {
            device_address,
            endpoint_and_direction: 0,
            hub_address: 0,
            hub_port: 0,
            transfer_type: TransferType::Control,
            interval: 0,
            max_packet_size,
            speed,
        }
    }

    /// Bulk pipe
    pub const fn bulk(device_address: u8, endpoint: u8, max_packet_size: u16, speed: UsbSpeed) -> Self {
        Self {
            endpoint_and_direction: endpoint,
            transfer_type: TransferType::Bulk,
            ..Self::control(device_address, max_packet_size, speed)
        }
    }

    /// Interrupt pipe polled every `interval`
    pub const fn interrupt(
        device_address: u8,
        endpoint: u8,
        max_packet_size: u16,
        interval: u8,
        speed: UsbSpeed,
    ) -> Self {
        Self {
            endpoint_and_direction: endpoint,
            transfer_type: TransferType::Interrupt,
            interval,
            ..Self::control(device_address, max_packet_size, speed)
        }
    }

    /// Route through a hub port
    pub const fn via_hub(mut self, hub_address: u8, hub_port: u8) -> Self {
        self.hub_address = hub_address;
        self.hub_port = hub_port;
        self
    }
}

#[derive(Clone, Copy)]
pub(crate) struct Pipe {
    generation: u16,
    pub(crate) in_use: bool,
    pub(crate) instance: u8,
    pub(crate) device_address: u8,
    pub(crate) endpoint_and_direction: u8,
    pub(crate) transfer_type: TransferType,
    pub(crate) endpoint_size: u16,
    pub(crate) interval: u8,
    pub(crate) speed: UsbSpeed,
    pub(crate) hub_address: u8,
    pub(crate) hub_port: u8,
    /// Hardware endpoint slot, 0 for control pipes
    pub(crate) host_endpoint: u8,
    group_prev: Option<PipeId>,
    group_next: Option<PipeId>,
    pub(crate) queue: IrpQueue,
    /// IRP currently owned by the engine on a non-control pipe
    pub(crate) active: Option<IrpId>,
}

impl Pipe {
    const EMPTY: Self = Self {
        generation: 0,
        in_use: false,
        instance: 0,
        device_address: 0,
        endpoint_and_direction: 0,
        transfer_type: TransferType::Control,
        endpoint_size: 0,
        interval: 0,
        speed: UsbSpeed::Error,
        hub_address: 0,
        hub_port: 0,
        host_endpoint: 0,
        group_prev: None,
        group_next: None,
        queue: IrpQueue::EMPTY,
        active: None,
    };

    #[inline]
    pub(crate) fn is_control(&self) -> bool {
        self.transfer_type == TransferType::Control
    }

    #[inline]
    pub(crate) fn direction(&self) -> Direction {
        Direction::from_endpoint(self.endpoint_and_direction)
    }
}

/// Read-only view of a configured pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PipeInfo {
    /// Device address
    pub device_address: u8,
    /// Endpoint number and direction
    pub endpoint_and_direction: u8,
    /// Transfer type
    pub transfer_type: TransferType,
    /// Negotiated max packet size
    pub endpoint_size: u16,
    /// Polling interval
    pub interval: u8,
    /// Device speed
    pub speed: UsbSpeed,
    /// Hardware endpoint slot
    pub host_endpoint: u8,
    /// Queued IRPs
    pub queued: usize,
}

/// Fixed pool of pipes with a reserved control region
pub struct PipePool<const N: usize, const CONTROL: usize> {
    pipes: [Pipe; N],
}

impl<const N: usize, const CONTROL: usize> PipePool<N, CONTROL> {
    const REGION_CHECK: () = assert!(CONTROL >= 1 && CONTROL < N && N <= u8::MAX as usize);

    /// All pipes free
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::REGION_CHECK;
        Self {
            pipes: [Pipe::EMPTY; N],
        }
    }

    fn first_free(&self, range: core::ops::Range<usize>) -> Option<PipeId> {
        range
            .into_iter()
            .find(|&i| !self.pipes[i].in_use)
            .map(|i| PipeId(i as u8))
    }

    /// First free pipe of the control region
    pub(crate) fn alloc_control(&self) -> Option<PipeId> {
        self.first_free(0..CONTROL)
    }

    /// First free pipe of the general region
    pub(crate) fn alloc_non_control(&self) -> Option<PipeId> {
        self.first_free(CONTROL..N)
    }

    /// Populate and mark in use
    pub(crate) fn claim(
        &mut self,
        id: PipeId,
        instance: u8,
        config: &PipeConfig,
        endpoint_size: u16,
        host_endpoint: u8,
    ) -> PipeHandle {
        let pipe = &mut self.pipes[id.index()];
        *pipe = Pipe {
            generation: pipe.generation,
            in_use: true,
            instance,
            device_address: config.device_address,
            endpoint_and_direction: config.endpoint_and_direction,
            transfer_type: config.transfer_type,
            endpoint_size,
            interval: config.interval,
            speed: config.speed,
            hub_address: config.hub_address,
            hub_port: config.hub_port,
            host_endpoint,
            ..Pipe::EMPTY
        };
        PipeHandle {
            index: id.0,
            generation: pipe.generation,
        }
    }

    /// Mark free; the queue must already be drained
    pub(crate) fn release(&mut self, id: PipeId) {
        let pipe = &mut self.pipes[id.index()];
        debug_assert!(pipe.queue.is_empty());
        *pipe = Pipe {
            generation: pipe.generation.wrapping_add(1),
            ..Pipe::EMPTY
        };
    }

    /// Map a handle to an in-use pipe
    pub(crate) fn resolve(&self, handle: PipeHandle) -> Option<PipeId> {
        let pipe = self.pipes.get(handle.index as usize)?;
        (pipe.in_use && pipe.generation == handle.generation).then_some(PipeId(handle.index))
    }

    #[inline]
    pub(crate) fn get(&self, id: PipeId) -> &Pipe {
        &self.pipes[id.index()]
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: PipeId) -> &mut Pipe {
        &mut self.pipes[id.index()]
    }

    /// In-use pipes owned by `instance`
    pub(crate) fn owned_by(&self, instance: u8) -> impl Iterator<Item = PipeId> + '_ {
        self.pipes
            .iter()
            .enumerate()
            .filter(move |(_, p)| p.in_use && p.instance == instance)
            .map(|(i, _)| PipeId(i as u8))
    }

    /// Free pipes left in the general region
    pub fn free_non_control(&self) -> usize {
        self.pipes[CONTROL..].iter().filter(|p| !p.in_use).count()
    }

    /// Free pipes left in the control region
    pub fn free_control(&self) -> usize {
        self.pipes[..CONTROL].iter().filter(|p| !p.in_use).count()
    }
}

impl<const N: usize, const CONTROL: usize> Default for PipePool<N, CONTROL> {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-instance map from hardware endpoint slot to non-control pipe
pub(crate) struct EndpointTable<const N: usize> {
    slots: [Option<PipeId>; N],
}

impl<const N: usize> EndpointTable<N> {
    pub(crate) const fn new() -> Self {
        Self { slots: [None; N] }
    }

    pub(crate) fn bind(&mut self, slot: u8, pipe: PipeId) {
        debug_assert!(slot != 0, "slot 0 belongs to the control group");
        self.slots[slot as usize] = Some(pipe);
    }

    pub(crate) fn unbind(&mut self, slot: u8) {
        if let Some(entry) = self.slots.get_mut(slot as usize) {
            *entry = None;
        }
    }

    pub(crate) fn pipe(&self, slot: u8) -> Option<PipeId> {
        self.slots.get(slot as usize).copied().flatten()
    }

    pub(crate) fn bound(&self) -> impl Iterator<Item = PipeId> + '_ {
        self.slots.iter().filter_map(|s| *s)
    }
}

/// Circular group of control pipes sharing endpoint slot 0
///
/// At most one control IRP is owned by the engine at a time; it is
/// tracked together with its pipe in `current`.
#[derive(Debug, Default)]
pub(crate) struct TransferGroup {
    head: Option<PipeId>,
    n_pipes: u8,
    pub(crate) current_pipe: Option<PipeId>,
    pub(crate) current_irp: Option<IrpId>,
    /// The current pipe was closed while its transfer was on the hardware;
    /// slot 0 stays busy until that transfer reports
    pub(crate) draining: bool,
    /// Where the round-robin search continues once draining ends
    pub(crate) resume_from: Option<PipeId>,
}

impl TransferGroup {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            n_pipes: 0,
            current_pipe: None,
            current_irp: None,
            draining: false,
            resume_from: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> u8 {
        self.n_pipes
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.n_pipes == 0
    }

    /// Append at the tail of the ring
    pub(crate) fn link<const N: usize, const C: usize>(&mut self, pool: &mut PipePool<N, C>, id: PipeId) {
        match self.head {
            None => {
                let pipe = pool.get_mut(id);
                pipe.group_next = Some(id);
                pipe.group_prev = Some(id);
                self.head = Some(id);
            }
            Some(head) => {
                let tail = pool.get(head).group_prev.unwrap_or(head);
                {
                    let pipe = pool.get_mut(id);
                    pipe.group_prev = Some(tail);
                    pipe.group_next = Some(head);
                }
                pool.get_mut(tail).group_next = Some(id);
                pool.get_mut(head).group_prev = Some(id);
            }
        }
        self.n_pipes += 1;
    }

    /// Remove from the ring
    ///
    /// Removing the current pipe leaves the group draining, resuming with
    /// the pipe that followed it.
    pub(crate) fn unlink<const N: usize, const C: usize>(&mut self, pool: &mut PipePool<N, C>, id: PipeId) {
        let (prev, next) = {
            let pipe = pool.get_mut(id);
            (pipe.group_prev.take(), pipe.group_next.take())
        };
        let (Some(prev), Some(next)) = (prev, next) else {
            return;
        };
        self.n_pipes = self.n_pipes.saturating_sub(1);
        if self.n_pipes == 0 {
            self.head = None;
        } else {
            pool.get_mut(prev).group_next = Some(next);
            pool.get_mut(next).group_prev = Some(prev);
            if self.head == Some(id) {
                self.head = Some(next);
            }
        }
        if self.current_pipe == Some(id) {
            self.current_pipe = None;
            self.current_irp = None;
            self.draining = true;
            self.resume_from = (self.n_pipes != 0).then_some(prev);
        }
    }

    /// Leave the draining state, returning the resume point if it was set
    pub(crate) fn finish_draining(&mut self) -> Option<Option<PipeId>> {
        if !core::mem::take(&mut self.draining) {
            return None;
        }
        Some(self.resume_from.take())
    }

    /// Next pipe in link order, wrapping at the tail
    pub(crate) fn next_after<const N: usize, const C: usize>(&self, pool: &PipePool<N, C>, id: PipeId) -> Option<PipeId> {
        pool.get(id).group_next.or(self.head)
    }

    /// First pipe with queued IRPs, starting after `from` and wrapping
    /// around to `from` itself last
    pub(crate) fn next_with_work<const N: usize, const C: usize>(
        &self,
        pool: &PipePool<N, C>,
        from: Option<PipeId>,
    ) -> Option<PipeId> {
        let mut cursor = match from {
            Some(id) if pool.get(id).group_next.is_some() => self.next_after(pool, id),
            _ => self.head,
        };
        for _ in 0..self.n_pipes {
            let id = cursor?;
            if !pool.get(id).queue.is_empty() {
                return Some(id);
            }
            cursor = self.next_after(pool, id);
        }
        None
    }

    /// Pipes in link order starting at the head
    #[cfg(test)]
    pub(crate) fn members<const N: usize, const C: usize>(&self, pool: &PipePool<N, C>) -> heapless::Vec<PipeId, N> {
        let mut out = heapless::Vec::new();
        let mut cursor = self.head;
        for _ in 0..self.n_pipes {
            let Some(id) = cursor else { break };
            let _ = out.push(id);
            cursor = pool.get(id).group_next;
        }
        out
    }
}
