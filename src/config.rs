//! Validated settings for both tools.
//!
//! The binaries turn their command-line arguments into these structs before
//! doing anything else, so every address and port combination has been
//! checked by the time a component sees it.
use crate::interfaces::discover_switches;
use crate::ipv4;
use crate::matcher::{parse_address, MatchCondition};
use crate::{Error, Result};
use log::LevelFilter;
use rand::Rng;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;

/// Destination port used for UDP probes when none is given, the first port
/// traceroute probes.
pub const DEFAULT_UDP_PORT: u16 = 33434;

/// Log level for the `-v` flag of either tool.
#[must_use]
pub fn log_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    }
}

/// Settings of the flow predictor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictConfig {
    pub switches: Option<Vec<String>>,
    pub condition: MatchCondition,
    pub topology: Option<PathBuf>,
    pub start: Option<String>,
    pub openflow: Option<String>,
    pub verbose: bool,
}

impl PredictConfig {
    /// Create a configuration matching `source` and `dest`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidAddress`] when an address is malformed.
    pub fn new(source: Option<&str>, dest: Option<&str>) -> Result<Self> {
        Ok(Self {
            switches: None,
            condition: MatchCondition::parse(source, dest)?,
            topology: None,
            start: None,
            openflow: None,
            verbose: false,
        })
    }

    /// Restrict the scan to the given switches. Each value may hold several
    /// comma-separated names. Without any names the switches are discovered
    /// from the host's interfaces.
    #[must_use]
    pub fn switches<I, S>(mut self, switches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = switches
            .into_iter()
            .flat_map(|value| {
                value
                    .as_ref()
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
            .collect();
        self.switches = (!names.is_empty()).then_some(names);
        self
    }

    /// Predict the next hop of `start` using the topology in `path`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Usage`] when only one of the two is given.
    pub fn prediction(mut self, path: Option<PathBuf>, start: Option<String>) -> Result<Self> {
        match (path, start) {
            (Some(path), Some(start)) => {
                self.topology = Some(path);
                self.start = Some(start);
                Ok(self)
            }
            (None, None) => Ok(self),
            _ => Err(Error::Usage("--topology and --from must be given together")),
        }
    }

    /// Pass `--protocols` to `ovs-ofctl`.
    #[must_use]
    pub fn openflow(mut self, version: Option<String>) -> Self {
        self.openflow = version;
        self
    }

    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// The switches to scan: the configured ones, or the ones discovered on
    /// this host.
    ///
    /// # Errors
    ///
    /// Fails when the host's interfaces cannot be listed.
    pub fn resolve_switches(&self) -> Result<Vec<String>> {
        match &self.switches {
            Some(switches) => Ok(switches.clone()),
            None => discover_switches(),
        }
    }
}

/// Transport of a crafted probe.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Icmp,
    Udp,
    #[default]
    Tcp,
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "icmp" => Ok(Protocol::Icmp),
            "udp" => Ok(Protocol::Udp),
            "tcp" => Ok(Protocol::Tcp),
            _ => Err(format!("unknown protocol {s:?}, expected icmp, udp or tcp")),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Icmp => "icmp",
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        })
    }
}

impl From<Protocol> for ipv4::Protocol {
    fn from(value: Protocol) -> Self {
        match value {
            Protocol::Icmp => ipv4::Protocol::Icmp,
            Protocol::Udp => ipv4::Protocol::Udp,
            Protocol::Tcp => ipv4::Protocol::Tcp,
        }
    }
}

/// Settings of the packet crafter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CraftConfig {
    pub source: Option<Ipv4Addr>,
    pub dest: Ipv4Addr,
    pub protocol: Protocol,
    pub dest_port: u16,
    pub source_port: u16,
    pub trace: bool,
    pub verbose: bool,
}

impl CraftConfig {
    /// Create a configuration for a probe to `dest`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidAddress`] when `dest` is malformed, and
    /// with [`Error::Usage`] when a TCP probe has no destination port.
    pub fn new(dest: &str, protocol: Protocol, dest_port: Option<u16>) -> Result<Self> {
        let dest = parse_address(dest)?;
        let dest_port = match (protocol, dest_port) {
            (_, Some(port)) => port,
            (Protocol::Tcp, None) => {
                return Err(Error::Usage("a destination port is required for tcp"))
            }
            (Protocol::Udp, None) => DEFAULT_UDP_PORT,
            (Protocol::Icmp, None) => 0,
        };

        Ok(Self {
            source: None,
            dest,
            protocol,
            dest_port,
            source_port: rand::thread_rng().gen_range(1024..=u16::MAX),
            trace: false,
            verbose: false,
        })
    }

    /// Send from `source` instead of the address the kernel would pick.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidAddress`] when `source` is malformed.
    pub fn source(mut self, source: Option<&str>) -> Result<Self> {
        self.source = source.map(parse_address).transpose()?;
        Ok(self)
    }

    /// Use a fixed source port. A random one is kept otherwise.
    #[must_use]
    pub fn source_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.source_port = port;
        }
        self
    }

    #[must_use]
    pub fn trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}
