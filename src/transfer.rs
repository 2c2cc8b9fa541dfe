//! USB transfer vocabulary shared by pipes, IRPs and the transfer engines

/// USB transfer types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// Direction encoded in bit 7 of an endpoint address
    #[inline]
    pub const fn from_endpoint(endpoint_and_direction: u8) -> Self {
        if endpoint_and_direction & 0x80 != 0 {
            Self::In
        } else {
            Self::Out
        }
    }
}

/// Bus speed of the device attached to a root port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbSpeed {
    /// Speed not (yet) determined
    Error,
    /// 1.5 Mbps
    Low,
    /// 12 Mbps
    Full,
    /// 480 Mbps
    High,
    /// 5 Gbps, never negotiated by this controller
    Super,
}

impl UsbSpeed {
    /// Speeds a pipe may be configured for
    #[inline]
    pub const fn is_pipe_speed(self) -> bool {
        matches!(self, Self::Low | Self::Full | Self::High)
    }
}

/// USB setup packet for control transfers
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    /// Create GET_DESCRIPTOR request
    pub const fn get_descriptor(desc_type: u8, desc_index: u8, language_id: u16, length: u16) -> Self {
        Self {
            request_type: 0x80, // Device-to-host, standard, device
            request: 0x06,
            value: ((desc_type as u16) << 8) | (desc_index as u16),
            index: language_id,
            length,
        }
    }

    /// Create SET_ADDRESS request
    pub const fn set_address(address: u8) -> Self {
        Self {
            request_type: 0x00,
            request: 0x05,
            value: address as u16,
            index: 0,
            length: 0,
        }
    }

    /// Check if the data stage runs device-to-host
    pub const fn is_in(&self) -> bool {
        (self.request_type & 0x80) != 0
    }

    /// Wire representation (little endian)
    pub fn to_bytes(&self) -> [u8; 8] {
        let value = self.value.to_le_bytes();
        let index = self.index.to_le_bytes();
        let length = self.length.to_le_bytes();
        [
            self.request_type,
            self.request,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ]
    }
}
