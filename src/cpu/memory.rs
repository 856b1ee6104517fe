//! MTMC-16 memory subsystem.
//!
//! 4096 bytes, byte addressable. A word is two bytes, big-endian.
//! The top kilobyte (`0x0C00..0x1000`) is reserved for the frame buffer.

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Total memory size in bytes.
pub const MEMORY_SIZE: usize = 4096;

/// First byte of display memory.
pub const FRAME_BUFFER_START: usize = 0x0C00;

/// MTMC-16 memory: 4096 bytes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    /// Create a new memory with all bytes zeroed.
    pub fn new() -> Self {
        Self {
            bytes: vec![0; MEMORY_SIZE],
        }
    }

    /// Read one byte. Addresses outside `[0, MEMORY_SIZE)` fail.
    #[inline]
    pub fn read_byte(&self, addr: i32) -> Result<u8, MemoryError> {
        let index = Self::index(addr)?;
        Ok(self.bytes[index])
    }

    /// Write one byte.
    #[inline]
    pub fn write_byte(&mut self, addr: i32, value: u8) -> Result<(), MemoryError> {
        let index = Self::index(addr)?;
        self.bytes[index] = value;
        Ok(())
    }

    /// Read a big-endian word starting at `addr`.
    pub fn read_word(&self, addr: i32) -> Result<i16, MemoryError> {
        let hi = self.read_byte(addr)?;
        let lo = self.read_byte(addr + 1)?;
        Ok(i16::from_be_bytes([hi, lo]))
    }

    /// Write a big-endian word starting at `addr`.
    ///
    /// Both bytes are range checked before either is written.
    pub fn write_word(&mut self, addr: i32, value: i16) -> Result<(), MemoryError> {
        Self::index(addr + 1)?;
        let [hi, lo] = value.to_be_bytes();
        self.write_byte(addr, hi)?;
        self.write_byte(addr + 1, lo)
    }

    fn index(addr: i32) -> Result<usize, MemoryError> {
        if addr < 0 || addr as usize >= MEMORY_SIZE {
            return Err(MemoryError::AddressOutOfRange(addr));
        }
        Ok(addr as usize)
    }

    /// Clear all memory to zeros.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    /// Copy `image` into memory starting at `start`.
    pub fn load_image(&mut self, start: usize, image: &[u8]) -> Result<(), MemoryError> {
        if start + image.len() > MEMORY_SIZE {
            return Err(MemoryError::ProgramTooLarge {
                size: image.len(),
                available: MEMORY_SIZE.saturating_sub(start),
            });
        }
        self.bytes[start..start + image.len()].copy_from_slice(image);
        Ok(())
    }

    /// Raw view of a memory range, clamped to the end of memory.
    pub fn dump(&self, start: usize, count: usize) -> &[u8] {
        let start = start.min(MEMORY_SIZE);
        let end = (start + count).min(MEMORY_SIZE);
        &self.bytes[start..end]
    }

    /// Read a NUL-terminated string starting at `addr`.
    /// Stops at the end of memory if no terminator is found.
    pub fn read_c_string(&self, addr: i32) -> Result<String, MemoryError> {
        let start = Self::index(addr)?;
        let text: String = self.bytes[start..]
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as char)
            .collect();
        Ok(text)
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Only count non-zero bytes
        let non_zero = self.bytes.iter().filter(|&&b| b != 0).count();

        f.debug_struct("Memory")
            .field("non_zero_bytes", &non_zero)
            .field("total_bytes", &MEMORY_SIZE)
            .finish()
    }
}

/// Errors that can occur during memory operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("memory address {0} out of range (0 to {})", MEMORY_SIZE - 1)]
    AddressOutOfRange(i32),

    #[error("program size {size} exceeds available space {available}")]
    ProgramTooLarge { size: usize, available: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_read_write() {
        let mut mem = Memory::new();
        mem.write_byte(10, 42).unwrap();
        assert_eq!(mem.read_byte(10).unwrap(), 42);
    }

    #[test]
    fn test_words_are_big_endian() {
        let mut mem = Memory::new();
        mem.write_word(100, 0x1234).unwrap();
        assert_eq!(mem.read_byte(100).unwrap(), 0x12);
        assert_eq!(mem.read_byte(101).unwrap(), 0x34);
        assert_eq!(mem.read_word(100).unwrap(), 0x1234);

        mem.write_word(200, -2).unwrap();
        assert_eq!(mem.dump(200, 2), &[0xFF, 0xFE]);
    }

    #[test]
    fn test_memory_bounds() {
        let mut mem = Memory::new();

        assert!(mem.read_byte(0).is_ok());
        assert!(mem.read_byte(4095).is_ok());

        assert_eq!(mem.read_byte(-1), Err(MemoryError::AddressOutOfRange(-1)));
        assert_eq!(mem.read_byte(4096), Err(MemoryError::AddressOutOfRange(4096)));
        assert!(mem.read_word(4095).is_err());

        // A straddling word write leaves the in-range byte alone
        assert!(mem.write_word(4095, 0x7777).is_err());
        assert_eq!(mem.read_byte(4095).unwrap(), 0);
    }

    #[test]
    fn test_load_image() {
        let mut mem = Memory::new();
        mem.load_image(4, &[1, 2, 3]).unwrap();

        assert_eq!(mem.dump(3, 5), &[0, 1, 2, 3, 0]);
        assert!(matches!(
            mem.load_image(4090, &[0; 10]),
            Err(MemoryError::ProgramTooLarge { size: 10, available: 6 })
        ));
    }

    #[test]
    fn test_read_c_string() {
        let mut mem = Memory::new();
        mem.load_image(50, b"hi\0there").unwrap();
        assert_eq!(mem.read_c_string(50).unwrap(), "hi");
    }
}
