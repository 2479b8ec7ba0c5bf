// =============================================================================
// FRAME RING - SHARED SLOT REGION AND CURSOR PROTOCOL
// =============================================================================
//
// The decoder owns the write cursor and writes decoded frames into slots of a
// fixed region. The playback controller reads the slots it was told about and
// hands them back with a frame-ack. Slots between `free_cursor` and
// `write_cursor` belong to the consumer; the decoder may only write outside
// that range. `write_cursor == free_cursor` means empty, so at most
// `capacity - 1` slots are ever live.
//
// =============================================================================

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Pixel layout of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Packed 8-bit RGB.
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameShape {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl FrameShape {
    pub fn rgb(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Rgb24,
        }
    }

    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
    #[error("frame-ack starts at slot {got} but the free cursor is at {expected}")]
    AckMismatch { expected: usize, got: usize },

    #[error("frame-ack of {count} slots exceeds the {live} live slots")]
    AckOverrun { count: usize, live: usize },

    #[error("writing slot {slot} would reach the free cursor")]
    WriteOverrun { slot: usize },

    #[error("region of {total_bytes} bytes holds fewer than two {frame_bytes}-byte frames")]
    TooSmall { total_bytes: usize, frame_bytes: usize },
}

/// Fixed region of equally sized frame slots shared by decoder and controller.
#[derive(Debug)]
pub struct FrameRegion {
    shape: FrameShape,
    slots: Vec<Mutex<Vec<u8>>>,
}

impl FrameRegion {
    /// Carve `total_bytes` into as many whole frames of `shape` as fit.
    pub fn new(total_bytes: usize, shape: FrameShape) -> Result<Self, RingError> {
        let frame_bytes = shape.frame_bytes();
        let capacity = if frame_bytes == 0 { 0 } else { total_bytes / frame_bytes };
        if capacity < 2 {
            return Err(RingError::TooSmall {
                total_bytes,
                frame_bytes,
            });
        }
        let slots = (0..capacity)
            .map(|_| Mutex::new(vec![0u8; frame_bytes]))
            .collect();
        Ok(Self { shape, slots })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn frame_bytes(&self) -> usize {
        self.shape.frame_bytes()
    }

    pub fn write_slot(&self, slot: usize, data: &[u8]) {
        if let Ok(mut buf) = self.slots[slot % self.slots.len()].lock() {
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
        }
    }

    /// Copy of the bytes in `slot`.
    pub fn read_slot(&self, slot: usize) -> Option<Vec<u8>> {
        self.slots[slot % self.slots.len()]
            .lock()
            .ok()
            .map(|buf| buf.clone())
    }
}

/// Producer-side cursor bookkeeping for a [`FrameRegion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingCursors {
    capacity: usize,
    write_cursor: usize,
    free_cursor: usize,
}

impl RingCursors {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            write_cursor: 0,
            free_cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn write_cursor(&self) -> usize {
        self.write_cursor
    }

    pub fn free_cursor(&self) -> usize {
        self.free_cursor
    }

    /// Slots written but not yet acknowledged.
    pub fn live(&self) -> usize {
        (self.write_cursor + self.capacity - self.free_cursor) % self.capacity
    }

    /// Whether `extra` more slots can be written after the current cursor.
    pub fn has_room_for(&self, extra: usize) -> bool {
        self.live() + extra < self.capacity
    }

    /// Claim the next slot for writing and return its index.
    pub fn advance_write(&mut self) -> Result<usize, RingError> {
        let slot = self.write_cursor;
        let next = (slot + 1) % self.capacity;
        if next == self.free_cursor {
            return Err(RingError::WriteOverrun { slot });
        }
        self.write_cursor = next;
        Ok(slot)
    }

    /// Return `count` slots starting at `start` to the producer.
    ///
    /// Acknowledgements must arrive strictly in order.
    pub fn acknowledge(&mut self, start: usize, count: usize) -> Result<(), RingError> {
        if start != self.free_cursor {
            return Err(RingError::AckMismatch {
                expected: self.free_cursor,
                got: start,
            });
        }
        let live = self.live();
        if count > live {
            return Err(RingError::AckOverrun { count, live });
        }
        self.free_cursor = (start + count) % self.capacity;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_capacity_from_bytes() {
        let shape = FrameShape::rgb(4, 2);
        assert_eq!(shape.frame_bytes(), 24);
        let region = FrameRegion::new(24 * 5 + 23, shape).unwrap();
        assert_eq!(region.capacity(), 5);
        assert!(matches!(
            FrameRegion::new(30, shape),
            Err(RingError::TooSmall { .. })
        ));
    }

    #[test]
    fn test_region_slot_round_trip() {
        let region = FrameRegion::new(48, FrameShape::rgb(2, 2)).unwrap();
        let data: Vec<u8> = (0..12).collect();
        region.write_slot(1, &data);
        assert_eq!(region.read_slot(1).unwrap(), data);
        assert_eq!(region.read_slot(0).unwrap(), vec![0u8; 12]);
    }

    #[test]
    fn test_live_slots_never_reach_capacity() {
        let mut cursors = RingCursors::new(4);
        for expected in 0..3 {
            assert_eq!(cursors.advance_write().unwrap(), expected);
        }
        assert_eq!(cursors.live(), 3);
        assert!(!cursors.has_room_for(1));
        assert_eq!(cursors.advance_write(), Err(RingError::WriteOverrun { slot: 3 }));
        assert_eq!(cursors.live(), 3);

        cursors.acknowledge(0, 2).unwrap();
        assert_eq!(cursors.live(), 1);
        assert_eq!(cursors.advance_write().unwrap(), 3);
        assert_eq!(cursors.advance_write().unwrap(), 0);
        assert_eq!(cursors.live(), 3);
        assert!(cursors.advance_write().is_err());
    }

    #[test]
    fn test_acknowledge_must_be_in_order() {
        let mut cursors = RingCursors::new(8);
        for _ in 0..5 {
            cursors.advance_write().unwrap();
        }
        assert_eq!(
            cursors.acknowledge(2, 1),
            Err(RingError::AckMismatch { expected: 0, got: 2 })
        );
        assert_eq!(
            cursors.acknowledge(0, 6),
            Err(RingError::AckOverrun { count: 6, live: 5 })
        );
        cursors.acknowledge(0, 2).unwrap();
        cursors.acknowledge(2, 3).unwrap();
        assert_eq!(cursors.live(), 0);
        assert_eq!(cursors.free_cursor(), 5);
    }

    #[test]
    fn test_mixed_write_ack_sequences_respect_capacity() {
        let capacity = 5;
        let mut cursors = RingCursors::new(capacity);
        let mut outstanding: std::collections::VecDeque<usize> = Default::default();
        for step in 0..200usize {
            if step % 3 == 2 {
                if let Some(slot) = outstanding.pop_front() {
                    cursors.acknowledge(slot, 1).unwrap();
                }
            } else if cursors.has_room_for(1) {
                outstanding.push_back(cursors.advance_write().unwrap());
            }
            assert!(cursors.live() <= capacity - 1);
            assert_eq!(cursors.live(), outstanding.len());
        }
    }
}
