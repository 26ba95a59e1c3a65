//! Parse the text printed by `ovs-ofctl dump-flows`.
//!
//! A dump starts with a statistics reply header and then has one indented
//! line per rule:
//!
//! ```text
//! NXST_FLOW reply (xid=0x4):
//!  cookie=0x0, duration=5s, table=0, n_packets=0, priority=100,ip,nw_src=10.0.0.0/24 actions=output:1
//! ```
//!
//! The last two whitespace-separated tokens of a rule line are the
//! comma-joined match group and the action clause. Everything before them is
//! per-rule statistics. Tokens that are not a single `key=value` pair, like
//! the `ip` shorthand above, are ignored.
use log::debug;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};

/// Match field holding the IPv4 source network.
pub const NW_SRC: &str = "nw_src";
/// Match field holding the IPv4 destination network.
pub const NW_DST: &str = "nw_dst";
/// Rule priority. Printed by `ovs-ofctl` inside the match group.
pub const PRIORITY: &str = "priority";
/// Key of the action clause.
pub const ACTIONS: &str = "actions";

// Reply headers of NXST (OpenFlow 1.0 with Nicira extensions) and OFPST
// (OpenFlow 1.1 and later) flow statistics.
const HEADER_MARKERS: [&str; 2] = ["NXST", "OFPST"];

/// One parsed rule of a switch's flow table.
///
/// Absence of a key in [`FlowEntry::fields`] means the rule does not
/// constrain that field. It is never stored as an empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowEntry {
    switch: String,
    fields: BTreeMap<String, String>,
    stats: BTreeMap<String, String>,
    actions: Option<String>,
}

impl FlowEntry {
    /// Name of the switch the rule was dumped from.
    #[must_use]
    pub fn switch(&self) -> &str {
        &self.switch
    }

    /// Match fields and priority of the rule.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Look up a single match field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Counters and timers reported with the rule, like `n_packets`.
    #[must_use]
    pub fn stats(&self) -> &BTreeMap<String, String> {
        &self.stats
    }

    /// The raw action clause, e.g. `output:1`.
    #[must_use]
    pub fn actions(&self) -> Option<&str> {
        self.actions.as_deref()
    }

    #[must_use]
    pub fn priority(&self) -> Option<&str> {
        self.field(PRIORITY)
    }

    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.field(NW_SRC)
    }

    #[must_use]
    pub fn dest(&self) -> Option<&str> {
        self.field(NW_DST)
    }
}

impl fmt::Display for FlowEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Switch: {}", self.switch)?;
        if let Some(priority) = self.priority() {
            write!(f, " Priority: {priority}")?;
        }
        match (self.source(), self.dest()) {
            (Some(source), Some(dest)) => write!(f, " Source: {source} Destination: {dest}")?,
            (Some(source), None) => write!(f, " Source: {source}")?,
            (None, Some(dest)) => write!(f, " Destination: {dest}")?,
            (None, None) => {}
        }
        if let Some(actions) = self.actions() {
            write!(f, " Action: {actions}")?;
        }
        Ok(())
    }
}

/// Parse the dump of one switch into its rules, in dump order.
///
/// Returns [`None`] when the dump holds no rule lines at all, which callers
/// treat as "no flow table available" rather than "no rule matched".
#[must_use]
pub fn parse_dump(switch: &str, dump: &str) -> Option<Vec<FlowEntry>> {
    let entries: Vec<FlowEntry> = dump
        .lines()
        .filter_map(|line| parse_line(switch, line))
        .collect();

    if entries.is_empty() {
        debug!("no flow entries in dump of {switch}");
        return None;
    }
    Some(entries)
}

fn parse_line(switch: &str, line: &str) -> Option<FlowEntry> {
    if HEADER_MARKERS.iter().any(|marker| line.contains(marker)) {
        return None;
    }

    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 2 {
        if !tokens.is_empty() {
            debug!("skipping short line in dump of {switch}: {line:?}");
        }
        return None;
    }

    let (stat_tokens, rule) = tokens.split_at(tokens.len() - 2);
    let mut entry = FlowEntry {
        switch: switch.to_string(),
        fields: BTreeMap::new(),
        stats: BTreeMap::new(),
        actions: None,
    };

    for (key, value) in stat_tokens.iter().filter_map(|token| key_value(token)) {
        entry.stats.insert(key.to_string(), value.to_string());
    }
    for (key, value) in rule[0].split(',').filter_map(key_value) {
        entry.fields.insert(key.to_string(), value.to_string());
    }
    // Actions are kept verbatim; they may nest `key=value` arguments.
    let actions = rule[1]
        .strip_prefix(ACTIONS)
        .and_then(|rest| rest.strip_prefix('='));
    match (actions, key_value(rule[1])) {
        (Some(actions), _) if !actions.is_empty() => entry.actions = Some(actions.to_string()),
        (Some(_), _) | (None, None) => {}
        (None, Some((key, value))) => {
            entry.fields.insert(key.to_string(), value.to_string());
        }
    }

    if entry.fields.is_empty() && entry.stats.is_empty() && entry.actions.is_none() {
        debug!("skipping line without key=value tokens in dump of {switch}: {line:?}");
        return None;
    }
    Some(entry)
}

// Split `key=value`, dropping the commas that separate statistics.
fn key_value(token: &str) -> Option<(&str, &str)> {
    let mut parts = token.split('=');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), None) => {
            let key = key.trim_matches(',');
            let value = value.trim_matches(',');
            (!key.is_empty() && !value.is_empty()).then_some((key, value))
        }
        _ => None,
    }
}

/// Print one line per entry.
///
/// # Errors
///
/// Fails when writing to `out` fails.
pub fn write_flows<'a, W, I>(out: &mut W, entries: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a FlowEntry>,
{
    for entry in entries {
        writeln!(out, "{entry}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{parse_dump, write_flows, FlowEntry};
    use std::error::Error;

    const DUMP: &str = "NXST_FLOW reply (xid=0x4):\n \
        cookie=0x0, duration=5s, priority=100,nw_src=10.0.0.0/24,nw_dst=10.0.0.5 actions=output:1";

    const MININET_DUMP: &str = "NXST_FLOW reply (xid=0x4):
 cookie=0x0, duration=12.3s, table=0, n_packets=4, n_bytes=392, idle_age=2, priority=200,ip,nw_dst=10.0.0.2 actions=output:2
 cookie=0x0, duration=12.3s, table=0, n_packets=0, n_bytes=0, idle_age=12, priority=100,ip,nw_src=10.0.0.1 actions=output:1
 cookie=0x0, duration=15.0s, table=0, n_packets=9, n_bytes=630, idle_age=1, priority=0 actions=NORMAL
";

    fn entry(dump: &str) -> Result<FlowEntry, Box<dyn Error>> {
        let mut entries = parse_dump("s1", dump).ok_or("no entries")?;
        Ok(entries.remove(0))
    }

    #[test]
    fn parse_dump_yields_match_fields_and_actions() -> Result<(), Box<dyn Error>> {
        let entries = parse_dump("s1", DUMP).ok_or("no entries")?;
        assert_eq!(entries.len(), 1);

        let fields: Vec<(&str, &str)> = entries[0]
            .fields()
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            fields,
            vec![("nw_dst", "10.0.0.5"), ("nw_src", "10.0.0.0/24"), ("priority", "100")]
        );
        assert_eq!(entries[0].actions(), Some("output:1"));
        assert_eq!(entries[0].switch(), "s1");
        Ok(())
    }

    #[test]
    fn parse_dump_keeps_statistics_apart() -> Result<(), Box<dyn Error>> {
        let entry = entry(DUMP)?;
        assert_eq!(entry.stats().get("cookie").map(String::as_str), Some("0x0"));
        assert_eq!(entry.stats().get("duration").map(String::as_str), Some("5s"));
        assert_eq!(entry.field("cookie"), None);
        Ok(())
    }

    #[test]
    fn parse_dump_preserves_line_order() -> Result<(), Box<dyn Error>> {
        let entries = parse_dump("s1", MININET_DUMP).ok_or("no entries")?;
        let priorities: Vec<_> = entries.iter().filter_map(FlowEntry::priority).collect();
        assert_eq!(priorities, vec!["200", "100", "0"]);
        assert_eq!(entries[2].actions(), Some("NORMAL"));
        assert_eq!(entries[2].source(), None);
        assert_eq!(entries[2].dest(), None);
        Ok(())
    }

    #[test]
    fn parse_dump_keeps_actions_with_nested_arguments() -> Result<(), Box<dyn Error>> {
        let entry = entry(" n_packets=1, priority=5,ip,nw_dst=10.0.0.1 actions=ct(commit,zone=1),output:2")?;
        assert_eq!(entry.actions(), Some("ct(commit,zone=1),output:2"));
        assert_eq!(
            entry.to_string(),
            "Switch: s1 Priority: 5 Destination: 10.0.0.1 Action: ct(commit,zone=1),output:2"
        );
        Ok(())
    }

    #[test]
    fn parse_dump_ignores_tokens_without_single_equals() -> Result<(), Box<dyn Error>> {
        let entry = entry(" n_packets=1, priority=5,ip,reg0=a=b,nw_dst=10.0.0.1 actions=drop")?;
        assert_eq!(entry.fields().len(), 2);
        assert_eq!(entry.dest(), Some("10.0.0.1"));
        assert_eq!(entry.field("ip"), None);
        assert_eq!(entry.field("reg0"), None);
        Ok(())
    }

    #[test]
    fn parse_dump_returns_none_for_empty_dump() {
        assert_eq!(parse_dump("s1", ""), None);
    }

    #[test]
    fn parse_dump_returns_none_for_headers_only() {
        assert_eq!(parse_dump("s1", "NXST_FLOW reply (xid=0x4):\n"), None);
        assert_eq!(parse_dump("s1", "OFPST_FLOW reply (OF1.3) (xid=0x2):\n"), None);
    }

    #[test]
    fn parse_dump_skips_short_and_blank_lines() -> Result<(), Box<dyn Error>> {
        let dump = format!("garbage\n\n   \n{MININET_DUMP}");
        let entries = parse_dump("s2", &dump).ok_or("no entries")?;
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|entry| entry.switch() == "s2"));
        Ok(())
    }

    #[test]
    fn parse_dump_skips_lines_without_pairs() {
        assert_eq!(parse_dump("s1", "ovs-ofctl: s9 is not a bridge or a socket"), None);
    }

    #[test]
    fn display_with_source_and_dest() -> Result<(), Box<dyn Error>> {
        let line = entry(DUMP)?.to_string();
        assert_eq!(
            line,
            "Switch: s1 Priority: 100 Source: 10.0.0.0/24 Destination: 10.0.0.5 Action: output:1"
        );
        Ok(())
    }

    #[test]
    fn display_with_dest_only() -> Result<(), Box<dyn Error>> {
        let line = entry(" n_packets=1, priority=200,ip,nw_dst=10.0.0.2 actions=output:2")?.to_string();
        assert_eq!(line, "Switch: s1 Priority: 200 Destination: 10.0.0.2 Action: output:2");
        Ok(())
    }

    #[test]
    fn display_with_source_only() -> Result<(), Box<dyn Error>> {
        let line = entry(" n_packets=1, priority=100,ip,nw_src=10.0.0.1 actions=output:1")?.to_string();
        assert_eq!(line, "Switch: s1 Priority: 100 Source: 10.0.0.1 Action: output:1");
        Ok(())
    }

    #[test]
    fn display_without_addresses() -> Result<(), Box<dyn Error>> {
        let line = entry(" n_packets=9, priority=0 actions=NORMAL")?.to_string();
        assert_eq!(line, "Switch: s1 Priority: 0 Action: NORMAL");
        Ok(())
    }

    #[test]
    fn write_flows_prints_one_line_per_entry() -> Result<(), Box<dyn Error>> {
        let entries = parse_dump("s1", MININET_DUMP).ok_or("no entries")?;
        let mut out = Vec::new();
        write_flows(&mut out, &entries)?;
        let printed = String::from_utf8(out)?;
        assert_eq!(printed.lines().count(), 3);
        assert!(printed.starts_with("Switch: s1 Priority: 200 Destination: 10.0.0.2"));
        Ok(())
    }
}
