//! Status codes.
//!
//! [`RpcStatus`] is what the dispatch layer reports about a frame. [`Status`]
//! is the byte a collaborator hands back, passed through to the host unchanged.

use crate::error::ProtocolError;
use std::fmt;

/// Dispatch-level result of processing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RpcStatus {
    Success = 0,
    ErrSubsystem = 1,
    ErrCommandId = 2,
    ErrParameter = 3,
    ErrLength = 4,
}

impl RpcStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        self == RpcStatus::Success
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RpcStatus::Success),
            1 => Some(RpcStatus::ErrSubsystem),
            2 => Some(RpcStatus::ErrCommandId),
            3 => Some(RpcStatus::ErrParameter),
            4 => Some(RpcStatus::ErrLength),
            _ => None,
        }
    }

    /// Label used in logs and metrics.
    pub fn label(self) -> &'static str {
        match self {
            RpcStatus::Success => "success",
            RpcStatus::ErrSubsystem => "err_subsystem",
            RpcStatus::ErrCommandId => "err_command_id",
            RpcStatus::ErrParameter => "err_parameter",
            RpcStatus::ErrLength => "err_length",
        }
    }
}

impl From<&ProtocolError> for RpcStatus {
    /// A payload that cannot be read as the command's fields is a parameter
    /// error; anything wrong with the frame itself is a length error.
    fn from(err: &ProtocolError) -> Self {
        match err {
            ProtocolError::Truncated { .. } => RpcStatus::ErrParameter,
            _ => RpcStatus::ErrLength,
        }
    }
}

impl From<ProtocolError> for RpcStatus {
    fn from(err: ProtocolError) -> Self {
        RpcStatus::from(&err)
    }
}

impl fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcStatus::Success => write!(f, "SUCCESS"),
            RpcStatus::ErrSubsystem => write!(f, "ERR_SUBSYSTEM"),
            RpcStatus::ErrCommandId => write!(f, "ERR_COMMAND_ID"),
            RpcStatus::ErrParameter => write!(f, "ERR_PARAMETER"),
            RpcStatus::ErrLength => write!(f, "ERR_LENGTH"),
        }
    }
}

/// A stack status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Status(pub u8);

impl Status {
    pub const SUCCESS: Status = Status(0x00);
    pub const FAILURE: Status = Status(0x01);
    pub const INVALID_PARAMETER: Status = Status(0x02);
    pub const DECODE_ERROR: Status = Status(0x03);
    pub const MEM_ERROR: Status = Status(0x10);
    pub const BUFFER_FULL: Status = Status(0x11);
    pub const UNSUPPORTED_MODE: Status = Status(0x12);
    pub const ICALL_NO_MSG: Status = Status(0x30);
    pub const ICALL_TIMEOUT: Status = Status(0x31);
    pub const APS_DUPLICATE_ENTRY: Status = Status(0xB8);
    pub const NWK_INVALID_REQUEST: Status = Status(0xC2);
    pub const NWK_NOT_PERMITTED: Status = Status(0xC3);
    pub const AF_DUPLICATE_ENDPOINT: Status = Status(0xD0);
    pub const AF_ENDPOINT_MAX: Status = Status(0xD1);
    pub const MAC_DENIED: Status = Status(0xE2);
    pub const MAC_INVALID_PARAMETER: Status = Status(0xE8);
    pub const MAC_UNSUPPORTED_ATTRIBUTE: Status = Status(0xF4);

    pub fn code(self) -> u8 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self == Status::SUCCESS
    }

    fn name(self) -> Option<&'static str> {
        let name = match self {
            Status::SUCCESS => "SUCCESS",
            Status::FAILURE => "FAILURE",
            Status::INVALID_PARAMETER => "INVALID_PARAMETER",
            Status::DECODE_ERROR => "DECODE_ERROR",
            Status::MEM_ERROR => "MEM_ERROR",
            Status::BUFFER_FULL => "BUFFER_FULL",
            Status::UNSUPPORTED_MODE => "UNSUPPORTED_MODE",
            Status::ICALL_NO_MSG => "ICALL_NO_MSG",
            Status::ICALL_TIMEOUT => "ICALL_TIMEOUT",
            Status::APS_DUPLICATE_ENTRY => "APS_DUPLICATE_ENTRY",
            Status::NWK_INVALID_REQUEST => "NWK_INVALID_REQUEST",
            Status::NWK_NOT_PERMITTED => "NWK_NOT_PERMITTED",
            Status::AF_DUPLICATE_ENDPOINT => "AF_DUPLICATE_ENDPOINT",
            Status::AF_ENDPOINT_MAX => "AF_ENDPOINT_MAX",
            Status::MAC_DENIED => "MAC_DENIED",
            Status::MAC_INVALID_PARAMETER => "MAC_INVALID_PARAMETER",
            Status::MAC_UNSUPPORTED_ATTRIBUTE => "MAC_UNSUPPORTED_ATTRIBUTE",
            _ => return None,
        };
        Some(name)
    }
}

impl From<u8> for Status {
    fn from(code: u8) -> Self {
        Status(code)
    }
}

impl From<RpcStatus> for Status {
    fn from(status: RpcStatus) -> Self {
        Status(status.code())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({:#04x})", name, self.0),
            None => write!(f, "{:#04x}", self.0),
        }
    }
}
