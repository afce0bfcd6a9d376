//! Big-endian output cursor with an offset patch table.
//!
//! Offsets that point forward into data not yet written are reserved first
//! and satisfied once the target address is known. The resolved values are
//! kept in a patch table and flushed into the buffer by [`BinaryWriter::finish`],
//! which is also the only way to get the bytes back out: a writer with an
//! unsatisfied reservation can never yield a buffer.

use glam::Vec3;
use rootcause::Report;

use crate::error::{KclError, KclResult};

/// Handle to a reserved 32-bit offset slot. Consumed when satisfied.
#[must_use = "a reserved offset must be satisfied before the writer is finished"]
#[derive(Debug)]
pub struct OffsetSlot {
    index: usize,
}

#[derive(Debug)]
struct Reservation {
    address: usize,
    value: Option<u32>,
}

#[derive(Debug, Default)]
pub struct BinaryWriter {
    buf: Vec<u8>,
    reservations: Vec<Reservation>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current write position; the writer only appends.
    pub fn tell(&self) -> usize {
        self.buf.len()
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_bytes(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bytes(&value.to_be_bytes());
    }

    pub fn write_u32s(&mut self, values: &[u32]) {
        for value in values {
            self.write_u32(*value);
        }
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_bytes(&value.to_be_bytes());
    }

    pub fn write_vec3(&mut self, value: Vec3) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
    }

    /// Reserve a 32-bit offset at the current position.
    pub fn reserve_offset(&mut self) -> OffsetSlot {
        let index = self.reservations.len();
        self.reservations.push(Reservation {
            address: self.tell(),
            value: None,
        });
        self.write_u32(0);
        OffsetSlot { index }
    }

    /// Record the final value of a reserved slot.
    pub fn satisfy_offset(&mut self, slot: OffsetSlot, value: u32) {
        self.reservations[slot.index].value = Some(value);
    }

    /// Satisfy `slot` with the current position measured from `base`.
    pub fn satisfy_here(&mut self, slot: OffsetSlot, base: usize) -> KclResult<()> {
        let value = to_offset(self.tell(), base)?;
        self.satisfy_offset(slot, value);
        Ok(())
    }

    /// Number of reservations that have not been satisfied yet.
    pub fn pending(&self) -> usize {
        self.reservations
            .iter()
            .filter(|reservation| reservation.value.is_none())
            .count()
    }

    /// Flush the patch table and return the finished buffer.
    pub fn finish(mut self) -> KclResult<Vec<u8>> {
        if let Some(first) = self
            .reservations
            .iter()
            .find(|reservation| reservation.value.is_none())
        {
            return Err(Report::new(KclError::UnsatisfiedOffsetReservation {
                pending: self.pending(),
                first_address: first.address,
            }));
        }

        for reservation in &self.reservations {
            if let Some(value) = reservation.value {
                self.buf[reservation.address..reservation.address + 4]
                    .copy_from_slice(&value.to_be_bytes());
            }
        }

        Ok(self.buf)
    }
}

/// `address - base` as a 32-bit file offset.
pub fn to_offset(address: usize, base: usize) -> KclResult<u32> {
    address
        .checked_sub(base)
        .and_then(|offset| u32::try_from(offset).ok())
        .ok_or_else(|| {
            Report::new(KclError::InvalidSectionLayout {
                detail: format!(
                    "address 0x{address:X} is not representable relative to 0x{base:X}"
                ),
            })
        })
}
