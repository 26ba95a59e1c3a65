//! Discover the switches of an emulated network from the host's interfaces.
//!
//! Mininet creates one interface per Open vSwitch bridge (`s1`) plus one per
//! bridge port (`s1-eth1`). Loopback, the `ovs-system` datapath and anything
//! named like an Ethernet port are dropped, and the remaining names are cut at
//! their first `-`.
use crate::{Error, Result};
use std::fs;

/// Where the kernel lists network interfaces.
pub const PROC_NET_DEV: &str = "/proc/net/dev";

const EXCLUDED: [&str; 3] = ["lo", "ovs", "eth"];

/// Switch names found on this host, sorted and without duplicates.
///
/// # Errors
///
/// Fails when [`PROC_NET_DEV`] cannot be read.
pub fn discover_switches() -> Result<Vec<String>> {
    let table = fs::read_to_string(PROC_NET_DEV).map_err(Error::IoError)?;
    Ok(switches(interface_names(&table)))
}

/// Interface names listed in the text of `/proc/net/dev`.
pub fn interface_names(table: &str) -> impl Iterator<Item = &str> {
    table
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(name, _)| name.trim())
        .filter(|name| !name.is_empty())
}

/// Reduce interface names to switch names.
pub fn switches<'a, I>(interfaces: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut switches: Vec<String> = interfaces
        .into_iter()
        .filter(|name| !EXCLUDED.iter().any(|excluded| name.contains(excluded)))
        .filter_map(|name| name.split('-').next())
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect();
    switches.sort();
    switches.dedup();
    switches
}

#[cfg(test)]
mod tests {
    use super::{interface_names, switches};

    const NET_DEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:  123456     789    0    0    0     0          0         0   123456     789    0    0    0     0       0          0
  eth0: 9876543   12345    0    0    0     0          0         0  1234567    2345    0    0    0     0       0          0
ovs-system:       0       0    0    0    0     0          0         0        0       0    0    0    0     0       0          0
    s2:       0       0    0    0    0     0          0         0        0       0    0    0    0     0       0          0
    s1:       0       0    0    0    0     0          0         0        0       0    0    0    0     0       0          0
s1-eth1:    1000      10    0    0    0     0          0         0     1000      10    0    0    0     0       0          0
s2-eth1:    1000      10    0    0    0     0          0         0     1000      10    0    0    0     0       0          0
";

    #[test]
    fn interface_names_skips_header() {
        let names: Vec<_> = interface_names(NET_DEV).collect();
        assert_eq!(
            names,
            vec!["lo", "eth0", "ovs-system", "s2", "s1", "s1-eth1", "s2-eth1"]
        );
    }

    #[test]
    fn switches_are_sorted_bridges() {
        assert_eq!(switches(interface_names(NET_DEV)), vec!["s1", "s2"]);
    }

    #[test]
    fn switches_are_cut_at_first_dash_and_deduplicated() {
        let names = ["sw1-p1", "sw1-p2", "sw0", "docker0"];
        assert_eq!(switches(names), vec!["docker0", "sw0", "sw1"]);
    }
}
