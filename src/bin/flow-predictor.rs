use argh::FromArgs;
use flowprobe::config::{log_level, PredictConfig};
use flowprobe::flow::write_flows;
use flowprobe::predict::{predict_path, scan_switch, OvsOfctl, Prediction};
use flowprobe::topology::Topology;
use flowprobe::{Error, Result};
use log::debug;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

/// dump the flow tables of Open vSwitch bridges and show the entries a
/// packet would hit
#[derive(FromArgs, Debug)]
struct Args {
    /// switch to inspect, may be repeated or comma-separated (default: every
    /// bridge on this host)
    #[argh(option, short = 'S')]
    switch: Vec<String>,

    /// source address of the packet
    #[argh(option, short = 's')]
    source: Option<String>,

    /// destination address of the packet
    #[argh(option, short = 'd')]
    dest: Option<String>,

    /// topology file in the format of mininet's `net` command
    #[argh(option, short = 'T')]
    topology: Option<PathBuf>,

    /// device the packet leaves from, used with --topology
    #[argh(option, short = 'f')]
    from: Option<String>,

    /// openflow version passed to ovs-ofctl, e.g. OpenFlow13
    #[argh(option, short = 'O')]
    protocols: Option<String>,

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

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("flow-predictor: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = PredictConfig::new(args.source.as_deref(), args.dest.as_deref())?
        .switches(&args.switch)
        .openflow(args.protocols)
        .verbose(args.verbose)
        .prediction(args.topology, args.from)?;
    debug!("{config:?}");

    let mut ofctl = match &config.openflow {
        Some(version) => OvsOfctl::new().protocol(version),
        None => OvsOfctl::new(),
    };
    let mut out = io::stdout().lock();

    if let (Some(path), Some(start)) = (&config.topology, &config.start) {
        let topology = Topology::load(path)?;
        match predict_path(&topology, start, &config.condition, &mut ofctl)? {
            Prediction::Matches { switch, entries } => {
                writeln!(out, "Predicted entries on {switch} for packets from {start}:")
                    .map_err(Error::IoError)?;
                write_flows(&mut out, &entries).map_err(Error::IoError)?;
            }
            Prediction::NoEntries { switch } => {
                writeln!(out, "{switch} has no flow entries").map_err(Error::IoError)?;
            }
            Prediction::Unavailable {
                device,
                connections,
            } => {
                writeln!(
                    out,
                    "Prediction unavailable: {device} has {connections} connections, expected one"
                )
                .map_err(Error::IoError)?;
            }
        }
    }

    for switch in config.resolve_switches()? {
        match scan_switch(&mut ofctl, &switch, &config.condition)? {
            Some(entries) => write_flows(&mut out, &entries).map_err(Error::IoError)?,
            None => debug!("{switch} reported no flow entries"),
        }
    }
    out.flush().map_err(Error::IoError)
}
