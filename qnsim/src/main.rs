//! Open queueing network simulation application.
#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::default_trait_access,
    clippy::inline_always
)]

use std::convert::TryFrom;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use eyre::WrapErr;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

use qnsim::{
    replicate, Deadlock, Network, NetworkConfig, ServiceRecord, ShortestQueueRouting,
    TraceEntry,
};

/// Type of routing policy.
#[derive(Debug, Clone, Copy, strum::EnumString, strum::ToString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
enum RoutingOption {
    /// See [`qnsim::ProbabilisticRouting`].
    Probabilistic,
    /// See [`ShortestQueueRouting`].
    ShortestQueue,
}

/// Runs open queueing network simulation.
#[derive(Parser)]
#[clap(version, author)]
struct Opt {
    /// Path to a file containing the network configuration in JSON format.
    #[clap(long)]
    network: PathBuf,

    /// Simulation time limit.
    #[clap(long)]
    horizon: f64,

    /// Seed of the first replication; subsequent replications use consecutive seeds.
    #[clap(long, default_value = "0")]
    seed: u64,

    /// Number of independent replications.
    #[clap(short, long, default_value = "1")]
    replications: u64,

    /// Stop each replication as soon as the network deadlocks.
    #[clap(long)]
    until_deadlock: bool,

    /// Routing policy.
    #[clap(long, default_value = "probabilistic")]
    routing: RoutingOption,

    /// Write service records to this CSV file.
    #[clap(long)]
    records: Option<PathBuf>,

    /// Write times to deadlock to this CSV file.
    #[clap(long)]
    deadlocks: Option<PathBuf>,

    /// Write the event trace to this file, one JSON object per line.
    #[clap(long)]
    trace: Option<PathBuf>,

    /// Verbosity.
    #[clap(short, long, parse(from_occurrences))]
    verbose: i32,

    /// Store the logs this file.
    #[clap(long)]
    log_output: Option<PathBuf>,

    /// Do not log to the stderr.
    #[clap(long)]
    no_stderr: bool,
}

/// Result of a single replication.
struct Outcome {
    records: Vec<ServiceRecord>,
    departed: usize,
    in_network: usize,
    rejected: usize,
    deadlock: Option<Deadlock>,
    trace: Vec<TraceEntry>,
}

#[derive(Serialize)]
struct RecordRow {
    replication: usize,
    customer: usize,
    class: usize,
    node: usize,
    arrival: f64,
    wait: f64,
    service_start: f64,
    service_time: f64,
    service_end: f64,
    blocked: f64,
    exit: f64,
    destination: Option<usize>,
    queue_size_at_arrival: usize,
    queue_size_at_departure: usize,
}

impl RecordRow {
    fn new(replication: usize, record: &ServiceRecord) -> Self {
        Self {
            replication,
            customer: record.customer_id().into(),
            class: record.class().into(),
            node: record.node().into(),
            arrival: record.arrival(),
            wait: record.wait(),
            service_start: record.service_start(),
            service_time: record.service_time(),
            service_end: record.service_end(),
            blocked: record.blocked(),
            exit: record.exit(),
            destination: record.destination().map(usize::from),
            queue_size_at_arrival: record.queue_size_at_arrival(),
            queue_size_at_departure: record.queue_size_at_departure(),
        }
    }
}

#[derive(Serialize)]
struct DeadlockRow {
    replication: usize,
    state: String,
    time_to_deadlock: f64,
}

#[derive(Serialize)]
struct TraceRow<'a> {
    replication: usize,
    #[serde(flatten)]
    entry: &'a TraceEntry,
}

fn load_network(path: &Path) -> eyre::Result<Network> {
    let file = File::open(path)
        .wrap_err_with(|| format!("unable to open network config: {}", path.display()))?;
    let config: NetworkConfig =
        serde_json::from_reader(BufReader::new(file)).wrap_err("unable to parse network config")?;
    Network::try_from(config).wrap_err("invalid network config")
}

fn simulate(opt: &Opt, network: &Network) -> eyre::Result<Vec<Outcome>> {
    let seeds: Vec<u64> = (0..opt.replications).map(|r| opt.seed + r).collect();
    let pb = ProgressBar::new(opt.replications).with_style(
        ProgressStyle::default_bar().template("{msg} {wide_bar} {pos}/{len} replications"),
    );
    pb.set_message("Simulating");
    let outcomes = replicate(network, &seeds, |builder| {
        let builder = match opt.routing {
            RoutingOption::Probabilistic => builder,
            RoutingOption::ShortestQueue => {
                builder.routing(Box::new(ShortestQueueRouting::new(network)))
            }
        };
        let mut simulation = builder.trace(opt.trace.is_some()).build()?;
        let deadlock = if opt.until_deadlock {
            simulation.run_until_deadlock(opt.horizon)?
        } else {
            simulation.run_until(opt.horizon)?;
            None
        };
        pb.inc(1);
        Ok(Outcome {
            records: simulation.records().cloned().collect(),
            departed: simulation.exit().len(),
            in_network: simulation.customers_in_network(),
            rejected: simulation.arrivals().total_rejections(),
            deadlock,
            trace: simulation.trace().map(<[_]>::to_vec).unwrap_or_default(),
        })
    })
    .wrap_err("simulation failed")?;
    pb.finish();
    Ok(outcomes)
}

fn write_records(path: &Path, outcomes: &[Outcome]) -> eyre::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .wrap_err_with(|| format!("unable to create {}", path.display()))?;
    for (replication, outcome) in outcomes.iter().enumerate() {
        let mut records: Vec<_> = outcome.records.iter().collect();
        records.sort_by(|a, b| a.exit().total_cmp(&b.exit()));
        for record in records {
            writer.serialize(RecordRow::new(replication, record))?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn write_deadlocks(path: &Path, outcomes: &[Outcome]) -> eyre::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .wrap_err_with(|| format!("unable to create {}", path.display()))?;
    for (replication, outcome) in outcomes.iter().enumerate() {
        if let Some(deadlock) = &outcome.deadlock {
            for (state, time) in &deadlock.times_to_deadlock {
                writer.serialize(DeadlockRow {
                    replication,
                    state: state.to_string(),
                    time_to_deadlock: *time,
                })?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

fn write_trace(path: &Path, outcomes: &[Outcome]) -> eyre::Result<()> {
    let mut writer = BufWriter::new(
        File::create(path).wrap_err_with(|| format!("unable to create {}", path.display()))?,
    );
    for (replication, outcome) in outcomes.iter().enumerate() {
        for entry in &outcome.trace {
            serde_json::to_writer(&mut writer, &TraceRow { replication, entry })?;
            writeln!(writer)?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn print_summary(first_seed: u64, outcomes: &[Outcome]) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "replication,seed,departed,in_network,rejected,deadlock")?;
    for (seed, (replication, outcome)) in (first_seed..).zip(outcomes.iter().enumerate()) {
        writeln!(
            out,
            "{},{},{},{},{},{}",
            replication,
            seed,
            outcome.departed,
            outcome.in_network,
            outcome.rejected,
            outcome
                .deadlock
                .as_ref()
                .map_or_else(String::new, |d| d.time.to_string())
        )?;
    }
    Ok(())
}

fn run(opt: &Opt) -> eyre::Result<()> {
    let network = load_network(&opt.network)?;
    log::info!(
        "Loaded network with {} nodes and {} classes",
        network.num_nodes(),
        network.num_classes()
    );
    let outcomes = simulate(opt, &network)?;
    if let Some(path) = &opt.records {
        write_records(path, &outcomes)?;
    }
    if let Some(path) = &opt.deadlocks {
        write_deadlocks(path, &outcomes)?;
    }
    if let Some(path) = &opt.trace {
        write_trace(path, &outcomes)?;
    }
    print_summary(opt.seed, &outcomes)?;
    Ok(())
}

fn set_up_logger(opt: &Opt) -> Result<(), fern::InitError> {
    let log_level = match opt.verbose {
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        3 => log::LevelFilter::Trace,
        _ => log::LevelFilter::Warn,
    };
    let dispatch = fern::Dispatch::new()
        .format(|out, message, record| out.finish(format_args!("[{}] {}", record.level(), message)))
        .level(log_level);
    let dispatch = if let Some(path) = &opt.log_output {
        let _ = std::fs::remove_file(path);
        dispatch.chain(
            std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .append(false)
                .open(path)?,
        )
    } else {
        dispatch
    };
    let dispatch = if opt.no_stderr {
        dispatch
    } else {
        dispatch.chain(std::io::stderr())
    };
    dispatch.apply()?;
    Ok(())
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let opt = Opt::parse();
    set_up_logger(&opt)?;
    run(&opt)
}
