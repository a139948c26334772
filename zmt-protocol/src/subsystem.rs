//! MT subsystem identifiers.
//!
//! The low five bits of `cmd0` select one of these logical command groups.
//! Every dispatch table has exactly [`MAX_SUBSYSTEM`] slots.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of subsystem slots in a dispatch table.
pub const MAX_SUBSYSTEM: u8 = 22;

/// A logical MT command group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Subsystem {
    Res0 = 0,
    Sys = 1,
    Mac = 2,
    Nwk = 3,
    Af = 4,
    Zdo = 5,
    Sapi = 6,
    Util = 7,
    Dbg = 8,
    App = 9,
    Ota = 10,
    Znp = 11,
    Ubl = 13,
    AppCnf = 15,
    Protobuf = 17,
    Gp = 21,
}

impl Subsystem {
    /// All defined subsystems in id order.
    pub const ALL: [Subsystem; 16] = [
        Subsystem::Res0,
        Subsystem::Sys,
        Subsystem::Mac,
        Subsystem::Nwk,
        Subsystem::Af,
        Subsystem::Zdo,
        Subsystem::Sapi,
        Subsystem::Util,
        Subsystem::Dbg,
        Subsystem::App,
        Subsystem::Ota,
        Subsystem::Znp,
        Subsystem::Ubl,
        Subsystem::AppCnf,
        Subsystem::Protobuf,
        Subsystem::Gp,
    ];

    /// Returns the 5-bit wire id.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Looks up a subsystem by wire id. Reserved and spare ids return `None`.
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.id() == id)
    }

    /// Capability bit reported by SYS PING when this subsystem is served.
    pub fn capability(self) -> u16 {
        match self {
            Subsystem::Sys => 0x0001,
            Subsystem::Mac => 0x0002,
            Subsystem::Nwk => 0x0004,
            Subsystem::Af => 0x0008,
            Subsystem::Zdo => 0x0010,
            Subsystem::Sapi => 0x0020,
            Subsystem::Util => 0x0040,
            Subsystem::Dbg => 0x0080,
            Subsystem::App => 0x0100,
            Subsystem::Ota => 0x0200,
            Subsystem::AppCnf => 0x0800,
            Subsystem::Gp => 0x1000,
            _ => 0,
        }
    }

    /// Canonical upper-case name.
    pub fn name(self) -> &'static str {
        match self {
            Subsystem::Res0 => "RES0",
            Subsystem::Sys => "SYS",
            Subsystem::Mac => "MAC",
            Subsystem::Nwk => "NWK",
            Subsystem::Af => "AF",
            Subsystem::Zdo => "ZDO",
            Subsystem::Sapi => "SAPI",
            Subsystem::Util => "UTIL",
            Subsystem::Dbg => "DBG",
            Subsystem::App => "APP",
            Subsystem::Ota => "OTA",
            Subsystem::Znp => "ZNP",
            Subsystem::Ubl => "UBL",
            Subsystem::AppCnf => "APP_CNF",
            Subsystem::Protobuf => "PROTOBUF",
            Subsystem::Gp => "GP",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for Subsystem {
    type Error = u8;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::from_id(id).ok_or(id)
    }
}
