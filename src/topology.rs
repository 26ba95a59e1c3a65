//! Load the adjacency of hosts and switches.
//!
//! The file format is the one printed by Mininet's `net` command: one line per
//! device, the device name first, followed by `local:remote` interface pairs.
//!
//! ```text
//! h1 h1-eth0:s1-eth1
//! s1 lo:  s1-eth1:h1-eth0 s1-eth2:s2-eth2
//! ```
//!
//! The local port id is the part of the local interface after its last `-`,
//! and the remote device is the part of the remote interface before its last
//! `-`. Pairs without a remote side (like `lo:`) describe no connection and
//! are skipped.
use crate::{Error, Result};
use log::debug;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A host or switch and the devices on the other end of its ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    name: String,
    connections: BTreeMap<String, String>,
}

impl Device {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connections: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local port id to remote device name.
    #[must_use]
    pub fn connections(&self) -> &BTreeMap<String, String> {
        &self.connections
    }

    /// The only neighbor of a device with exactly one connection, as
    /// `(port, device)`. Devices with zero or several connections have no
    /// single default next hop.
    #[must_use]
    pub fn single_connection(&self) -> Option<(&str, &str)> {
        if self.connections.len() != 1 {
            return None;
        }
        self.connections
            .iter()
            .next()
            .map(|(port, device)| (port.as_str(), device.as_str()))
    }

    fn add_connection(&mut self, port: String, device: String) -> Result<()> {
        if self.connections.contains_key(&port) {
            return Err(Error::DuplicatePort {
                device: self.name.clone(),
                port,
            });
        }
        self.connections.insert(port, device);
        Ok(())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.connections.is_empty() {
            return write!(f, "{} has no connections", self.name);
        }
        let mut first = true;
        for (port, device) in &self.connections {
            if !first {
                writeln!(f)?;
            }
            first = false;
            write!(f, "{} is connected to {device} on port {port}", self.name)?;
        }
        Ok(())
    }
}

/// All devices of a network, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    devices: Vec<Device>,
}

impl Topology {
    /// Read a topology file.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Topology`] naming the path when the file cannot be
    /// opened, or with the errors of [`Topology::parse`]. Nothing is returned for a partially read file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("loading topology from {}", path.display());
        let file = File::open(path).map_err(|source| Error::Topology {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(BufReader::new(file))
    }

    /// Parse a topology from any line-oriented reader.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DuplicateDevice`] when a device is described on two
    /// lines, with [`Error::DuplicatePort`] when a device lists the same port
    /// twice, and with [`Error::IoError`] when reading fails.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self> {
        let mut topology = Topology::default();

        for line in reader.lines() {
            let line = line.map_err(Error::IoError)?;
            let mut tokens = line.split_whitespace();
            let Some(name) = tokens.next() else {
                continue;
            };
            if topology.get(name).is_some() {
                return Err(Error::DuplicateDevice(name.to_string()));
            }

            let mut device = Device::new(name);
            for token in tokens {
                match connection(token) {
                    Some((port, remote)) => device.add_connection(port, remote)?,
                    None => debug!("{name}: skipping {token:?}, it names no remote device"),
                }
            }
            topology.devices.push(device);
        }

        Ok(topology)
    }

    /// Find a device by its exact name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|device| device.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

// Extract `(local port, remote device)` from a `local:remote` pair. A local
// side without a `-` carries no port id of its own, so the remote interface's
// suffix is used instead.
fn connection(token: &str) -> Option<(String, String)> {
    let (local, remote) = token.split_once(':')?;
    if remote.is_empty() {
        return None;
    }

    let (device, remote_port) = match remote.rsplit_once('-') {
        Some((device, port)) => (device, Some(port)),
        None => (remote, None),
    };
    let port = match local.rsplit_once('-') {
        Some((_, port)) => port,
        None => remote_port.unwrap_or(local),
    };
    if port.is_empty() || device.is_empty() {
        return None;
    }
    Some((port.to_string(), device.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{Device, Topology};
    use crate::Error;
    use std::error::Error as StdError;

    const MININET: &str = "h1 h1-eth0:s1-eth1
h2 h2-eth0:s2-eth1
s1 lo:  s1-eth1:h1-eth0 s1-eth2:s2-eth2
s2 lo:  s2-eth1:h2-eth0 s2-eth2:s1-eth2
";

    #[test]
    fn parse_skips_pairs_without_remote_side() -> Result<(), Box<dyn StdError>> {
        let topology = Topology::parse("s1 eth0: 1:h1-eth0".as_bytes())?;
        let device = topology.get("s1").ok_or("s1 missing")?;
        assert_eq!(device.connections().len(), 1);
        assert_eq!(device.connections().get("eth0").map(String::as_str), Some("h1"));
        Ok(())
    }

    #[test]
    fn parse_reads_mininet_net_output() -> Result<(), Box<dyn StdError>> {
        let topology = Topology::parse(MININET.as_bytes())?;
        assert_eq!(topology.len(), 4);

        let s1 = topology.get("s1").ok_or("s1 missing")?;
        assert_eq!(s1.connections().get("eth1").map(String::as_str), Some("h1"));
        assert_eq!(s1.connections().get("eth2").map(String::as_str), Some("s2"));
        assert_eq!(s1.single_connection(), None);

        let h1 = topology.get("h1").ok_or("h1 missing")?;
        assert_eq!(h1.single_connection(), Some(("eth0", "s1")));
        Ok(())
    }

    #[test]
    fn parse_keeps_devices_without_connections() -> Result<(), Box<dyn StdError>> {
        let topology = Topology::parse("c0\nh1 h1-eth0:s1-eth1\n\n".as_bytes())?;
        let names: Vec<_> = topology.iter().map(Device::name).collect();
        assert_eq!(names, vec!["c0", "h1"]);
        assert!(topology.get("c0").ok_or("c0 missing")?.connections().is_empty());
        Ok(())
    }

    #[test]
    fn get_requires_exact_name() -> Result<(), Box<dyn StdError>> {
        let topology = Topology::parse(MININET.as_bytes())?;
        assert!(topology.get("h").is_none());
        assert!(topology.get("s").is_none());
        Ok(())
    }

    #[test]
    fn parse_rejects_duplicate_devices() {
        let result = Topology::parse("h1 h1-eth0:s1-eth1\nh1 h1-eth1:s2-eth1".as_bytes());
        assert!(matches!(result, Err(Error::DuplicateDevice(name)) if name == "h1"));
    }

    #[test]
    fn parse_rejects_duplicate_ports() {
        let result = Topology::parse("s1 s1-eth1:h1-eth0 s1-eth1:h2-eth0".as_bytes());
        assert!(matches!(
            result,
            Err(Error::DuplicatePort { device, port }) if device == "s1" && port == "eth1"
        ));
    }

    #[test]
    fn load_fails_for_missing_file() {
        let err = Topology::load("/nonexistent/topology.txt").unwrap_err();
        assert!(matches!(&err, Error::Topology { path, .. } if path.ends_with("topology.txt")));
        assert!(err.to_string().starts_with("cannot read topology file /nonexistent/topology.txt: "));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn device_display_lists_connections() -> Result<(), Box<dyn StdError>> {
        let topology = Topology::parse(MININET.as_bytes())?;
        let s1 = topology.get("s1").ok_or("s1 missing")?;
        assert_eq!(
            s1.to_string(),
            "s1 is connected to h1 on port eth1\ns1 is connected to s2 on port eth2"
        );
        assert_eq!(Device::new("c0").to_string(), "c0 has no connections");
        Ok(())
    }
}
