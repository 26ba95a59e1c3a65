use argh::FromArgs;
use flowprobe::config::{log_level, CraftConfig, Protocol};
use flowprobe::craft::send_probe;
use flowprobe::Result;
use log::debug;
use std::process::ExitCode;

/// craft a packet to test flow entries
#[derive(FromArgs, Debug)]
struct Args {
    /// destination address of the packet
    #[argh(option, short = 'd')]
    dest: String,

    /// source address of the packet (default: the address routed towards the
    /// destination)
    #[argh(option, short = 's')]
    source: Option<String>,

    /// protocol of the packet: icmp, udp or tcp
    #[argh(option, short = 'p', default = "Protocol::Tcp")]
    protocol: Protocol,

    /// destination port, required for tcp
    #[argh(option, short = 'D')]
    dport: Option<u16>,

    /// source port (default: random)
    #[argh(option, short = 'P')]
    sport: Option<u16>,

    /// capture the exchange to logs/<YYYYMMDDHHMM> with tcpdump
    #[argh(switch, short = 't')]
    trace: bool,

    /// log debug output
    #[argh(switch, short = 'v')]
    verbose: bool,
}

fn main() -> ExitCode {
    let args: Args = argh::from_env();
    pretty_env_logger::formatted_builder()
        .filter_level(log_level(args.verbose))
        .parse_default_env()
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("packet-craft: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let config = CraftConfig::new(&args.dest, args.protocol, args.dport)?
        .source(args.source.as_deref())?
        .source_port(args.sport)
        .trace(args.trace)
        .verbose(args.verbose);
    debug!("{config:?}");

    let report = send_probe(&config)?;
    println!("{report}");
    Ok(())
}
