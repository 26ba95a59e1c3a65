//! One-hop forwarding prediction.
//!
//! Flow tables are read through a [`FlowSource`], so the predictor can be
//! driven by `ovs-ofctl` on a live host ([`OvsOfctl`]) or by canned dumps.
use crate::flow::{parse_dump, FlowEntry};
use crate::matcher::{match_rules, MatchCondition};
use crate::topology::Topology;
use crate::{Error, Result};
use log::{debug, info, warn};
use std::process::Command;

/// Where flow-table dumps come from.
pub trait FlowSource {
    /// Return the raw dump text of one switch.
    ///
    /// # Errors
    ///
    /// Fails when the dump cannot be obtained at all. A switch with an empty
    /// table is not an error.
    fn dump_flows(&mut self, switch: &str) -> Result<String>;
}

/// Dumps flow tables by running `ovs-ofctl dump-flows <switch>`.
///
/// The command blocks until it exits, without a timeout.
#[derive(Debug, Clone)]
pub struct OvsOfctl {
    program: String,
    args: Vec<String>,
}

impl OvsOfctl {
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: "ovs-ofctl".to_string(),
            args: vec!["dump-flows".to_string()],
        }
    }

    /// Pin the OpenFlow version, e.g. `OpenFlow13`, for bridges that do not
    /// speak OpenFlow 1.0.
    #[must_use]
    pub fn protocol(mut self, version: &str) -> Self {
        self.args.insert(0, format!("--protocols={version}"));
        self
    }
}

impl Default for OvsOfctl {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowSource for OvsOfctl {
    fn dump_flows(&mut self, switch: &str) -> Result<String> {
        debug!("running {} {} {switch}", self.program, self.args.join(" "));
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(switch)
            .output()
            .map_err(Error::IoError)?;

        if !output.status.success() {
            warn!(
                "{} exited with {} for {switch}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Dump one switch and keep the rules compatible with `condition`.
///
/// Returns [`None`] when the switch reported no rules.
///
/// # Errors
///
/// Fails when the dump cannot be obtained or holds a malformed address.
pub fn scan_switch<S: FlowSource + ?Sized>(
    source: &mut S,
    switch: &str,
    condition: &MatchCondition,
) -> Result<Option<Vec<FlowEntry>>> {
    let dump = source.dump_flows(switch)?;
    let flows = parse_dump(switch, &dump);
    let matches = match_rules(flows.as_deref(), condition)?;
    Ok(matches.map(|entries| entries.into_iter().cloned().collect()))
}

/// Outcome of a one-hop prediction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prediction {
    /// The start device does not have exactly one connection, so it has no
    /// single next hop to look at.
    Unavailable { device: String, connections: usize },
    /// The next hop reported no flow rules.
    NoEntries { switch: String },
    /// Rules on the next hop compatible with the condition, in table order.
    Matches {
        switch: String,
        entries: Vec<FlowEntry>,
    },
}

/// Predict which rules apply to a packet leaving `start`, by looking at the
/// flow table of its only neighbor. Multi-hop paths are not followed.
///
/// # Errors
///
/// Fails with [`Error::UnknownDevice`] when `start` is not in the topology,
/// and with the errors of [`scan_switch`].
pub fn predict_path<S: FlowSource + ?Sized>(
    topology: &Topology,
    start: &str,
    condition: &MatchCondition,
    source: &mut S,
) -> Result<Prediction> {
    let device = topology
        .get(start)
        .ok_or_else(|| Error::UnknownDevice(start.to_string()))?;

    let Some((port, next_hop)) = device.single_connection() else {
        let connections = device.connections().len();
        warn!("prediction unavailable: {start} has {connections} connections, expected exactly one");
        return Ok(Prediction::Unavailable {
            device: start.to_string(),
            connections,
        });
    };

    info!("{start} reaches {next_hop} through port {port}");
    let prediction = match scan_switch(source, next_hop, condition)? {
        Some(entries) => Prediction::Matches {
            switch: next_hop.to_string(),
            entries,
        },
        None => Prediction::NoEntries {
            switch: next_hop.to_string(),
        },
    };
    Ok(prediction)
}

#[cfg(test)]
mod tests {
    use super::{predict_path, scan_switch, FlowSource, OvsOfctl, Prediction};
    use crate::matcher::MatchCondition;
    use crate::topology::Topology;
    use crate::{Error, Result};
    use std::collections::HashMap;
    use std::error::Error as StdError;

    const TOPOLOGY: &str = "h1 h1-eth0:s1-eth1
h2 h2-eth0:s1-eth2
s1 lo:  s1-eth1:h1-eth0 s1-eth2:h2-eth0
c0
";

    const S1: &str = "NXST_FLOW reply (xid=0x4):
 cookie=0x0, duration=3s, table=0, n_packets=0, n_bytes=0, priority=10,ip,nw_dst=10.0.0.2 actions=output:2
 cookie=0x0, duration=3s, table=0, n_packets=0, n_bytes=0, priority=10,ip,nw_dst=10.0.0.1 actions=output:1
";

    #[derive(Default)]
    struct Canned {
        dumps: HashMap<String, String>,
        requested: Vec<String>,
    }

    impl FlowSource for Canned {
        fn dump_flows(&mut self, switch: &str) -> Result<String> {
            self.requested.push(switch.to_string());
            Ok(self.dumps.get(switch).cloned().unwrap_or_default())
        }
    }

    fn canned(switch: &str, dump: &str) -> Canned {
        let mut source = Canned::default();
        source.dumps.insert(switch.to_string(), dump.to_string());
        source
    }

    #[test]
    fn predict_path_matches_rules_on_single_neighbor() -> std::result::Result<(), Box<dyn StdError>> {
        let topology = Topology::parse(TOPOLOGY.as_bytes())?;
        let condition = MatchCondition::parse(Some("10.0.0.1"), Some("10.0.0.2"))?;
        let mut source = canned("s1", S1);

        let prediction = predict_path(&topology, "h1", &condition, &mut source)?;
        let (switch, entries) = match prediction {
            Prediction::Matches { switch, entries } => (switch, entries),
            other => return Err(format!("unexpected prediction {other:?}").into()),
        };
        assert_eq!(switch, "s1");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].actions(), Some("output:2"));
        assert_eq!(source.requested, vec!["s1"]);
        Ok(())
    }

    #[test]
    fn predict_path_is_unavailable_for_several_connections() -> std::result::Result<(), Box<dyn StdError>> {
        let topology = Topology::parse(TOPOLOGY.as_bytes())?;
        let mut source = canned("s1", S1);
        let prediction = predict_path(&topology, "s1", &MatchCondition::default(), &mut source)?;
        assert_eq!(
            prediction,
            Prediction::Unavailable {
                device: "s1".to_string(),
                connections: 2
            }
        );
        assert!(source.requested.is_empty());
        Ok(())
    }

    #[test]
    fn predict_path_is_unavailable_without_connections() -> std::result::Result<(), Box<dyn StdError>> {
        let topology = Topology::parse(TOPOLOGY.as_bytes())?;
        let mut source = Canned::default();
        let prediction = predict_path(&topology, "c0", &MatchCondition::default(), &mut source)?;
        assert!(matches!(prediction, Prediction::Unavailable { connections: 0, .. }));
        Ok(())
    }

    #[test]
    fn predict_path_reports_empty_neighbor_table() -> std::result::Result<(), Box<dyn StdError>> {
        let topology = Topology::parse(TOPOLOGY.as_bytes())?;
        let mut source = canned("s1", "NXST_FLOW reply (xid=0x4):\n");
        let prediction = predict_path(&topology, "h2", &MatchCondition::default(), &mut source)?;
        assert_eq!(
            prediction,
            Prediction::NoEntries {
                switch: "s1".to_string()
            }
        );
        Ok(())
    }

    #[test]
    fn predict_path_fails_for_unknown_start() -> std::result::Result<(), Box<dyn StdError>> {
        let topology = Topology::parse(TOPOLOGY.as_bytes())?;
        let mut source = Canned::default();
        let result = predict_path(&topology, "h9", &MatchCondition::default(), &mut source);
        assert!(matches!(result, Err(Error::UnknownDevice(name)) if name == "h9"));
        Ok(())
    }

    #[test]
    fn scan_switch_distinguishes_no_table_from_no_match() -> std::result::Result<(), Box<dyn StdError>> {
        let condition = MatchCondition::parse(None, Some("10.0.0.9"))?;
        let mut source = canned("s1", S1);
        assert_eq!(scan_switch(&mut source, "s1", &condition)?, Some(vec![]));
        assert_eq!(scan_switch(&mut source, "s2", &condition)?, None);
        Ok(())
    }

    #[test]
    fn ovs_ofctl_reports_missing_program() {
        let mut source = OvsOfctl {
            program: "/nonexistent/ovs-ofctl".to_string(),
            args: vec!["dump-flows".to_string()],
        };
        assert!(matches!(source.dump_flows("s1"), Err(Error::IoError(_))));
    }

    #[test]
    fn ovs_ofctl_protocol_is_passed_first() {
        let ofctl = OvsOfctl::new().protocol("OpenFlow13");
        assert_eq!(ofctl.args, vec!["--protocols=OpenFlow13", "dump-flows"]);
    }
}
