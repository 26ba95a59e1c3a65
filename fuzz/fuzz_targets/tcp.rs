#![no_main]

use std::error::Error;
use std::net::Ipv4Addr;

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = fuzz_tcp(data);
});

fn fuzz_tcp(bytes: &[u8]) -> Result<(), Box<dyn Error>> {
    let segment = flowprobe::tcp::Segment::new(bytes)?;

    let _src = segment.source();
    let _dst = segment.dest();
    let _sequence = segment.sequence();
    let _acked = segment.acked();
    let _data_offset = segment.data_offset();
    let _flags = segment.flags();
    let _window = segment.window();
    let _urgent = segment.urgent();
    let _payload = segment.payload().len();
    let _valid = segment.verify_checksum(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST);

    Ok(())
}
