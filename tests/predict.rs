use flowprobe::config::PredictConfig;
use flowprobe::flow::{parse_dump, write_flows};
use flowprobe::matcher::match_rules;
use flowprobe::predict::{predict_path, scan_switch, FlowSource, Prediction};
use flowprobe::topology::Topology;
use std::collections::HashMap;
use std::error::Error;

// Output of mininet's `net` for `--topo linear,2`.
const TOPOLOGY: &str = "\
h1 h1-eth0:s1-eth1
h2 h2-eth0:s2-eth1
s1 lo:  s1-eth1:h1-eth0 s1-eth2:s2-eth2
s2 lo:  s2-eth1:h2-eth0 s2-eth2:s1-eth2
";

const S1: &str = "\
NXST_FLOW reply (xid=0x4):
 cookie=0x0, duration=31.2s, table=0, n_packets=6, n_bytes=588, idle_timeout=60, idle_age=1, priority=65535,icmp,in_port=1,nw_src=10.0.0.1,nw_dst=10.0.0.2 actions=output:2
 cookie=0x0, duration=30.9s, table=0, n_packets=2, n_bytes=84, priority=100,ip,nw_dst=10.0.0.0/255.255.255.0 actions=NORMAL
 cookie=0x0, duration=30.9s, table=0, n_packets=0, n_bytes=0, priority=50,ip,nw_src=192.168.0.0/16 actions=drop
";

const S2: &str = "\
OFPST_FLOW reply (OF1.3) (xid=0x2):
 cookie=0x0, duration=12.0s, table=0, n_packets=0, n_bytes=0, priority=0 actions=CONTROLLER:65535
";

#[derive(Default)]
struct Dumps {
    tables: HashMap<&'static str, &'static str>,
}

impl FlowSource for Dumps {
    fn dump_flows(&mut self, switch: &str) -> flowprobe::Result<String> {
        Ok(self.tables.get(switch).copied().unwrap_or_default().to_string())
    }
}

fn dumps() -> Dumps {
    Dumps {
        tables: HashMap::from([("s1", S1), ("s2", S2)]),
    }
}

fn render(entries: &[flowprobe::flow::FlowEntry]) -> Result<String, Box<dyn Error>> {
    let mut out = Vec::new();
    write_flows(&mut out, entries)?;
    Ok(String::from_utf8(out)?)
}

#[test]
fn test_prediction_from_host_reads_neighbor_table() -> Result<(), Box<dyn Error>> {
    let config = PredictConfig::new(Some("10.0.0.1"), Some("10.0.0.2"))?
        .prediction(Some("topology.txt".into()), Some("h1".into()))?;
    let topology = Topology::parse(TOPOLOGY.as_bytes())?;

    let prediction = predict_path(&topology, "h1", &config.condition, &mut dumps())?;
    let Prediction::Matches { switch, entries } = prediction else {
        return Err("expected matches".into());
    };
    assert_eq!(switch, "s1");
    assert_eq!(
        render(&entries)?,
        "Switch: s1 Priority: 65535 Source: 10.0.0.1 Destination: 10.0.0.2 Action: output:2\n\
         Switch: s1 Priority: 100 Destination: 10.0.0.0/255.255.255.0 Action: NORMAL\n"
    );
    Ok(())
}

#[test]
fn test_prediction_from_switch_is_unavailable() -> Result<(), Box<dyn Error>> {
    let topology = Topology::parse(TOPOLOGY.as_bytes())?;
    let config = PredictConfig::new(None, None)?;
    let prediction = predict_path(&topology, "s1", &config.condition, &mut dumps())?;
    assert!(matches!(
        prediction,
        Prediction::Unavailable { connections: 2, .. }
    ));
    Ok(())
}

#[test]
fn test_scan_all_switches_with_open_condition() -> Result<(), Box<dyn Error>> {
    let config = PredictConfig::new(None, None)?.switches(["s1,s2", "s3"]);
    let mut source = dumps();

    let mut output = String::new();
    let mut missing = Vec::new();
    for switch in config.resolve_switches()? {
        match scan_switch(&mut source, &switch, &config.condition)? {
            Some(entries) => output.push_str(&render(&entries)?),
            None => missing.push(switch),
        }
    }

    assert_eq!(output.lines().count(), 4);
    assert!(output.ends_with("Switch: s2 Priority: 0 Action: CONTROLLER:65535\n"));
    assert_eq!(missing, vec!["s3"]);
    Ok(())
}

#[test]
fn test_source_only_condition_keeps_unconstrained_rules() -> Result<(), Box<dyn Error>> {
    let flows = parse_dump("s1", S1).ok_or("no entries")?;
    let config = PredictConfig::new(Some("192.168.4.4"), None)?;
    let matches = match_rules(Some(flows.as_slice()), &config.condition)?.ok_or("no table")?;

    let priorities: Vec<_> = matches.iter().filter_map(|entry| entry.priority()).collect();
    assert_eq!(priorities, vec!["100", "50"]);
    assert_eq!(matches[1].stats().get("n_packets").map(String::as_str), Some("0"));
    Ok(())
}
