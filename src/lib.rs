//! Flow-table inspection and probe crafting for OpenFlow switches.
//!
//! Two tools share this crate:
//!
//! * `flow-predictor` dumps the flow tables of Open vSwitch bridges, parses
//!   them into [`FlowEntry`](crate::flow::FlowEntry) records and reports the
//!   rules a packet with a given source and destination would hit. With a
//!   topology file it can also look one hop ahead from a host
//!   (see [`predict`]).
//! * `packet-craft` builds a single ICMP, TCP or UDP probe, sends it on a raw
//!   socket and waits briefly for a reply (see [`craft`]).
//!
//! ## Packets
//!
//! The packet modules wrap byte buffers directly. Nothing is parsed until the
//! field accessor methods are called, and builders write fields in-place into
//! a caller-provided buffer. Fields are returned by value when they're small,
//! like an IPv4 address.
#![warn(clippy::pedantic)]
#![allow(clippy::double_must_use)]
#![allow(clippy::many_single_char_names)]
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod craft;
pub mod flow;
pub mod icmp;
pub mod interfaces;
pub mod ipv4;
pub mod matcher;
pub mod predict;
pub mod tcp;
pub mod topology;
pub mod udp;

mod checksum;

/// Utility wrapper for results in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while inspecting flows or crafting probes.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    CannotParse(&'static str),
    #[error("not enough space: {0}")]
    NotEnoughSpace(&'static str),
    #[error("io error: {0}")]
    IoError(std::io::Error),
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),
    #[error("unknown device: {0}")]
    UnknownDevice(String),
    #[error("device {0} is defined more than once")]
    DuplicateDevice(String),
    #[error("device {device} has more than one connection on port {port}")]
    DuplicatePort { device: String, port: String },
    #[error("cannot read topology file {}: {source}", .path.display())]
    Topology {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("switch {switch} reported a malformed address {text:?}")]
    MalformedFlow { switch: String, text: String },
    #[error("usage: {0}")]
    Usage(&'static str),
}

impl Error {
    /// Whether the error was caused by how the tool was invoked rather than
    /// by something that went wrong while running.
    #[must_use]
    pub fn is_usage(&self) -> bool {
        matches!(self, Error::Usage(_) | Error::InvalidAddress(_))
    }

    /// Process exit code for this error: 1 for usage errors, 2 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        if self.is_usage() {
            1
        } else {
            2
        }
    }
}

// Read all the bytes from `src` and write them into `dst`.
//
// # Errors
//
// Returns an error when [`Read`](std::io::Read) returns any error other
// than [`ErrorKind::Interrupted`](std::io::ErrorKind::Interrupted).
pub(crate) fn write_all_bytes<R: std::io::Read>(mut src: R, dst: &mut [u8]) -> Result<()> {
    let mut read = 0;
    while read < dst.len() {
        match src.read(&mut dst[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::IoError(e)),
        }
    }
    Ok(())
}

// Check if the nth bit is set
#[inline]
#[must_use]
pub(crate) fn bitset(byte: u8, n: usize) -> bool {
    byte & (1 << n) != 0
}

// Set bits of dst from src according to mask.
#[must_use]
#[inline]
pub(crate) fn setbits(a: u8, b: u8, mask: u8) -> u8 {
    (a & !mask) | (b & mask)
}

#[cfg(test)]
mod tests {
    use super::{bitset, setbits, write_all_bytes, Error};
    use std::io::Cursor;

    #[test]
    fn bitset_returns_expected_value() {
        assert!(bitset(0b0000_0100, 2));
        assert!(!bitset(0b0000_0100, 1));
    }

    #[test]
    fn setbits_returns_expected_value() {
        assert_eq!(setbits(0b0000_0000, 0b1111_1111, 0b1111_0000), 0b1111_0000);
        assert_eq!(setbits(0b1010_1010, 0b0101_0101, 0b0000_1111), 0b1010_0101);
    }

    #[test]
    fn write_all_bytes_stops_when_source_is_exhausted() -> Result<(), Box<dyn std::error::Error>> {
        let mut dst = [0xFF; 6];
        write_all_bytes(Cursor::new([1, 2, 3]), &mut dst)?;
        assert_eq!(dst, [1, 2, 3, 0xFF, 0xFF, 0xFF]);
        Ok(())
    }

    #[test]
    fn usage_errors_are_distinguished() {
        assert!(Error::Usage("x").is_usage());
        assert!(Error::InvalidAddress("10.0.0".into()).is_usage());
        assert!(!Error::UnknownDevice("h1".into()).is_usage());
        assert_eq!(Error::Usage("x").exit_code(), 1);
        assert_eq!(Error::DuplicateDevice("h1".into()).exit_code(), 2);
        let malformed = Error::MalformedFlow {
            switch: "s1".into(),
            text: "10.0.0.300".into(),
        };
        assert_eq!(malformed.exit_code(), 2);
    }
}
