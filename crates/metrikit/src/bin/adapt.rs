//! Command-line driver: read a mesh and a metric, adapt, write back.

use std::path::PathBuf;
use std::thread;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use metrikit::{AdaptDriver, AdaptParams, Comm, io, migrate_to_balance, shard_to_simplices};

#[derive(Parser, Clone)]
#[command(
    name = "metrikit-adapt",
    about = "Metric-driven adaptation of tetrahedral meshes"
)]
struct Args {
    /// Input mesh (.lb8.ugrid, .b8.ugrid or .meshb)
    input: PathBuf,
    /// Output mesh
    output: PathBuf,
    /// Metric field (.solb); unit metric when omitted
    #[arg(long)]
    metric: Option<PathBuf>,
    /// Adaptation sweeps
    #[arg(long)]
    sweeps: Option<usize>,
    /// Operator thresholds as a JSON file
    #[arg(long)]
    params: Option<PathBuf>,
    /// In-process ranks
    #[arg(long, default_value_t = 1)]
    ranks: usize,
    /// Convert mixed elements to tets before adapting
    #[arg(long)]
    shard: bool,
    /// Resume from the output mesh when it already exists
    #[arg(long)]
    restart: bool,
    /// Write the interpolated metric here after adaptation
    #[arg(long)]
    metric_out: Option<PathBuf>,
}

fn run(comm: Comm, args: &Args) -> metrikit::Result<()> {
    let input = if args.restart && args.output.exists() {
        &args.output
    } else {
        &args.input
    };
    let mut grid = io::read_mesh(comm, input)?;
    if let Some(metric) = &args.metric {
        io::read_metric(&mut grid, metric)?;
    }
    if args.shard {
        shard_to_simplices(&mut grid)?;
    }
    migrate_to_balance(&mut grid)?;

    let mut params = match &args.params {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text)
                .map_err(|_| metrikit::Error::Invalid("unreadable params file"))?
        }
        None => AdaptParams::default(),
    };
    if let Some(sweeps) = args.sweeps {
        params.sweeps = sweeps;
    }

    let driver = AdaptDriver::new(params);
    let report = driver.adapt(&mut grid)?;
    if grid.comm.once() {
        info!(
            sweeps = report.sweeps.len(),
            nodes = grid.nodes.n_global(),
            "adaptation finished"
        );
    }

    migrate_to_balance(&mut grid)?;
    io::write_mesh(&mut grid, &args.output)?;
    if let Some(metric_out) = &args.metric_out {
        io::write_metric(&mut grid, metric_out)?;
    }
    Ok(())
}

fn main() -> metrikit::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();
    if args.ranks <= 1 {
        return run(Comm::solo(), &args);
    }
    let handles: Vec<_> = Comm::threads(args.ranks)
        .into_iter()
        .map(|comm| {
            let args = args.clone();
            thread::spawn(move || run(comm, &args))
        })
        .collect();
    for handle in handles {
        handle
            .join()
            .map_err(|_| metrikit::Error::Failure("worker rank panicked"))??;
    }
    Ok(())
}
