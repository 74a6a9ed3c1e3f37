//! PING packet layout.
//!
//! The probe is a 16 byte little-endian structure. The device must echo it
//! back unchanged, so the same value describes both directions.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::constants::{PING_MAGIC, PING_PACKET_SIZE, PING_SEQUENCE};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PingError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Invalid length field: expected {expected}, got {actual}")]
    InvalidLength { expected: u32, actual: u32 },
}

/// PING packet (16 bytes / 0x10)
///
/// | offset | size | field |
/// |--------|------|-------|
/// | 0x00   | 4    | packet length (always 16) |
/// | 0x04   | 4    | ASCII magic tag |
/// | 0x08   | 4    | reserved |
/// | 0x0C   | 4    | sequence / flags |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PingPacket {
    pub magic: [u8; 4],
    pub reserved: u32,
    pub sequence: u32,
}

impl Default for PingPacket {
    fn default() -> Self {
        Self::new(PING_MAGIC, PING_SEQUENCE)
    }
}

impl PingPacket {
    pub const SIZE: usize = PING_PACKET_SIZE;

    pub fn new(magic: [u8; 4], sequence: u32) -> Self {
        Self {
            magic,
            reserved: 0,
            sequence,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut buf[0..4], Self::SIZE as u32);
        buf[4..8].copy_from_slice(&self.magic);
        LittleEndian::write_u32(&mut buf[8..12], self.reserved);
        LittleEndian::write_u32(&mut buf[12..16], self.sequence);
        buf
    }

    /// Parse a received packet. Only used for diagnostics; echo checks
    /// compare raw bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, PingError> {
        if data.len() < Self::SIZE {
            return Err(PingError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let length = LittleEndian::read_u32(&data[0..4]);
        if length != Self::SIZE as u32 {
            return Err(PingError::InvalidLength {
                expected: Self::SIZE as u32,
                actual: length,
            });
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&data[4..8]);
        Ok(Self {
            magic,
            reserved: LittleEndian::read_u32(&data[8..12]),
            sequence: LittleEndian::read_u32(&data[12..16]),
        })
    }

    /// Magic tag as text, with non-printable bytes escaped.
    pub fn magic_ascii(&self) -> String {
        self.magic.escape_ascii().to_string()
    }
}

impl fmt::Display for PingPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PING '{}' seq={}", self.magic_ascii(), self.sequence)
    }
}
