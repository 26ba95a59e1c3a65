#![no_main]

use flowprobe::flow::parse_dump;
use flowprobe::matcher::{match_rules, MatchCondition};
use libfuzzer_sys::fuzz_target;
use std::net::Ipv4Addr;

fuzz_target!(|data: &[u8]| {
    let dump = String::from_utf8_lossy(data);
    let flows = parse_dump("s1", &dump);

    let condition = MatchCondition::new(
        Some(Ipv4Addr::new(10, 0, 0, 1)),
        Some(Ipv4Addr::new(10, 0, 0, 2)),
    );
    if let Ok(Some(matches)) = match_rules(flows.as_deref(), &condition) {
        for entry in matches {
            let _line = entry.to_string();
        }
    }
});
