//! # zmt-client
//!
//! Host-side client for the zmt MT bridge.
//!
//! This crate provides:
//! - Async TCP connection with SREQ/SRSP correlation
//! - Typed calls for the SYS, UTIL, MAC, AF and ZDO commands the bridge serves
//! - A broadcast feed of AREQ callbacks

pub mod client;
pub mod connection;
pub mod error;

pub use client::{
    AfDataRequest, Client, DeviceInfo, EndpointRegistration, NvInfo, ResetIndication, ResetKind,
    ScanParams, VersionInfo,
};
pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
