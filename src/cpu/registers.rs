//! MTMC-16 register file.
//!
//! The register file is 22 signed 16-bit slots addressed by ordinal:
//! - `t0`-`t5`: temporaries
//! - `a0`-`a3`: arguments
//! - `rv`, `ra`: return value and return address
//! - `fp`, `sp`, `bp`: frame, stack and break pointers
//! - `pc`: program counter
//! - `ir`, `dr`, `cb`, `db`, `io`, `flags`: machine registers, not
//!   addressable from assembly

use serde::{Serialize, Deserialize};
use std::fmt;

/// Number of slots in the register file.
pub const REGISTER_COUNT: usize = 22;

/// Flag bit set by test instructions and ALU results.
pub const TEST_FLAG: i16 = 0b01;
/// Flag bit set when the machine faults.
pub const ERROR_FLAG: i16 = 0b10;

/// A register name. The discriminant is the register's slot in the file
/// and, for the first 16, its 4-bit encoding in instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Register {
    T0 = 0,
    T1,
    T2,
    T3,
    T4,
    T5,
    A0,
    A1,
    A2,
    A3,
    Rv,
    Ra,
    Fp,
    Sp,
    Bp,
    Pc,
    Ir,
    Dr,
    Cb,
    Db,
    Io,
    Flags,
}

impl Register {
    /// Every register in ordinal order.
    pub const ALL: [Register; REGISTER_COUNT] = [
        Register::T0, Register::T1, Register::T2, Register::T3,
        Register::T4, Register::T5, Register::A0, Register::A1,
        Register::A2, Register::A3, Register::Rv, Register::Ra,
        Register::Fp, Register::Sp, Register::Bp, Register::Pc,
        Register::Ir, Register::Dr, Register::Cb, Register::Db,
        Register::Io, Register::Flags,
    ];

    /// Slot index in the register file.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Look up a register by ordinal.
    pub fn from_index(index: u8) -> Option<Register> {
        Self::ALL.get(index as usize).copied()
    }

    /// Decode a 4-bit register field. Every nibble names a register.
    pub fn from_nibble(nibble: u16) -> Register {
        Self::ALL[(nibble & 0xF) as usize]
    }

    /// Lowercase assembly name.
    pub fn name(self) -> &'static str {
        match self {
            Register::T0 => "t0",
            Register::T1 => "t1",
            Register::T2 => "t2",
            Register::T3 => "t3",
            Register::T4 => "t4",
            Register::T5 => "t5",
            Register::A0 => "a0",
            Register::A1 => "a1",
            Register::A2 => "a2",
            Register::A3 => "a3",
            Register::Rv => "rv",
            Register::Ra => "ra",
            Register::Fp => "fp",
            Register::Sp => "sp",
            Register::Bp => "bp",
            Register::Pc => "pc",
            Register::Ir => "ir",
            Register::Dr => "dr",
            Register::Cb => "cb",
            Register::Db => "db",
            Register::Io => "io",
            Register::Flags => "flags",
        }
    }

    /// Parse a register name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Register> {
        let lower = name.to_ascii_lowercase();
        Self::ALL.iter().copied().find(|r| r.name() == lower)
    }

    /// Registers that assembly code may read: everything up to `pc`.
    pub fn is_readable(self) -> bool {
        self <= Register::Pc
    }

    /// Registers that assembly code may write: everything below `pc`.
    pub fn is_writeable(self) -> bool {
        self < Register::Pc
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The MTMC-16 register file.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    slots: [i16; REGISTER_COUNT],
}

impl Registers {
    /// Create a new register file with all values zeroed.
    pub fn new() -> Self {
        Self { slots: [0; REGISTER_COUNT] }
    }

    /// Reset all registers to zero.
    pub fn reset(&mut self) {
        self.slots = [0; REGISTER_COUNT];
    }

    #[inline]
    pub fn get(&self, reg: Register) -> i16 {
        self.slots[reg.index()]
    }

    /// Replace the full 16-bit value of a register.
    #[inline]
    pub fn set(&mut self, reg: Register, value: i16) {
        self.slots[reg.index()] = value;
    }

    /// Program counter as an unsigned address.
    pub fn pc(&self) -> u16 {
        self.get(Register::Pc) as u16
    }

    pub fn is_flag_test_set(&self) -> bool {
        self.get(Register::Flags) & TEST_FLAG != 0
    }

    pub fn set_flag_test(&mut self, value: bool) {
        self.set_flag(TEST_FLAG, value);
    }

    pub fn set_flag_error(&mut self, value: bool) {
        self.set_flag(ERROR_FLAG, value);
    }

    fn set_flag(&mut self, mask: i16, value: bool) {
        let flags = self.get(Register::Flags);
        let flags = if value { flags | mask } else { flags & !mask };
        self.set(Register::Flags, flags);
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for reg in Register::ALL {
            map.entry(&reg.name(), &self.get(reg));
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_ordinals() {
        assert_eq!(Register::T0.index(), 0);
        assert_eq!(Register::A0.index(), 6);
        assert_eq!(Register::Rv.index(), 10);
        assert_eq!(Register::Sp.index(), 13);
        assert_eq!(Register::Pc.index(), 15);
        assert_eq!(Register::Flags.index(), 21);
        for (i, reg) in Register::ALL.iter().enumerate() {
            assert_eq!(Register::from_index(i as u8), Some(*reg));
        }
        assert_eq!(Register::from_index(22), None);
    }

    #[test]
    fn test_register_names() {
        assert_eq!(Register::from_name("t3"), Some(Register::T3));
        assert_eq!(Register::from_name("SP"), Some(Register::Sp));
        assert_eq!(Register::from_name("flags"), Some(Register::Flags));
        assert_eq!(Register::from_name("t6"), None);
    }

    #[test]
    fn test_register_classes() {
        assert!(Register::Bp.is_writeable());
        assert!(!Register::Pc.is_writeable());
        assert!(Register::Pc.is_readable());
        assert!(!Register::Ir.is_readable());
        assert!(!Register::Flags.is_writeable());
    }

    #[test]
    fn test_full_width_write() {
        let mut regs = Registers::new();
        regs.set(Register::T0, -1);
        assert_eq!(regs.get(Register::T0), -1);
        regs.set(Register::T0, 0x1234);
        assert_eq!(regs.get(Register::T0), 0x1234);
    }

    #[test]
    fn test_test_flag() {
        let mut regs = Registers::new();
        assert!(!regs.is_flag_test_set());
        regs.set_flag_test(true);
        regs.set_flag_error(true);
        assert!(regs.is_flag_test_set());
        regs.set_flag_test(false);
        assert!(!regs.is_flag_test_set());
        assert_eq!(regs.get(Register::Flags), ERROR_FLAG);
    }

    #[test]
    fn test_pc_is_unsigned() {
        let mut regs = Registers::new();
        regs.set(Register::Pc, -2);
        assert_eq!(regs.pc(), 0xFFFE);
    }
}
