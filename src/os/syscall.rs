//! System call selectors.

use serde::{Serialize, Deserialize};
use std::fmt;

/// A system call understood by the operating system.
///
/// The discriminant is the 8-bit selector carried by `sys`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SysCall {
    // Console
    Exit = 0x00,
    Rint = 0x01,
    Wint = 0x02,
    Rstr = 0x03,
    Wchr = 0x04,
    Rchr = 0x05,
    Wstr = 0x06,
    Printf = 0x07,
    Atoi = 0x08,

    // Filesystem
    Rfile = 0x10,
    Wfile = 0x11,
    Cwd = 0x12,
    Chdir = 0x13,
    Dirent = 0x14,
    Dfile = 0x15,

    // Utilities
    Rnd = 0x20,
    Sleep = 0x21,
    Timer = 0x22,

    // Display
    Fbreset = 0x30,
    Fbstat = 0x31,
    Fbset = 0x32,
    Fbline = 0x33,
    Fbrect = 0x34,
    Fbflush = 0x35,
    Joystick = 0x3A,
    Scolor = 0x3B,

    Memcpy = 0x40,

    Drawimg = 0x50,
    Drawimgsz = 0x51,
    Drawimgclip = 0x52,

    Error = 0xFF,
}

impl SysCall {
    pub const ALL: [SysCall; 31] = [
        SysCall::Exit, SysCall::Rint, SysCall::Wint, SysCall::Rstr,
        SysCall::Wchr, SysCall::Rchr, SysCall::Wstr, SysCall::Printf,
        SysCall::Atoi, SysCall::Rfile, SysCall::Wfile, SysCall::Cwd,
        SysCall::Chdir, SysCall::Dirent, SysCall::Dfile, SysCall::Rnd,
        SysCall::Sleep, SysCall::Timer, SysCall::Fbreset, SysCall::Fbstat,
        SysCall::Fbset, SysCall::Fbline, SysCall::Fbrect, SysCall::Fbflush,
        SysCall::Joystick, SysCall::Scolor, SysCall::Memcpy, SysCall::Drawimg,
        SysCall::Drawimgsz, SysCall::Drawimgclip, SysCall::Error,
    ];

    pub fn selector(self) -> u8 {
        self as u8
    }

    pub fn from_selector(selector: u8) -> Option<SysCall> {
        Self::ALL.iter().copied().find(|c| c.selector() == selector)
    }

    pub fn name(self) -> &'static str {
        match self {
            SysCall::Exit => "exit",
            SysCall::Rint => "rint",
            SysCall::Wint => "wint",
            SysCall::Rstr => "rstr",
            SysCall::Wchr => "wchr",
            SysCall::Rchr => "rchr",
            SysCall::Wstr => "wstr",
            SysCall::Printf => "printf",
            SysCall::Atoi => "atoi",
            SysCall::Rfile => "rfile",
            SysCall::Wfile => "wfile",
            SysCall::Cwd => "cwd",
            SysCall::Chdir => "chdir",
            SysCall::Dirent => "dirent",
            SysCall::Dfile => "dfile",
            SysCall::Rnd => "rnd",
            SysCall::Sleep => "sleep",
            SysCall::Timer => "timer",
            SysCall::Fbreset => "fbreset",
            SysCall::Fbstat => "fbstat",
            SysCall::Fbset => "fbset",
            SysCall::Fbline => "fbline",
            SysCall::Fbrect => "fbrect",
            SysCall::Fbflush => "fbflush",
            SysCall::Joystick => "joystick",
            SysCall::Scolor => "scolor",
            SysCall::Memcpy => "memcpy",
            SysCall::Drawimg => "drawimg",
            SysCall::Drawimgsz => "drawimgsz",
            SysCall::Drawimgclip => "drawimgclip",
            SysCall::Error => "error",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<SysCall> {
        let lower = name.to_ascii_lowercase();
        Self::ALL.iter().copied().find(|c| c.name() == lower)
    }
}

impl fmt::Display for SysCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
