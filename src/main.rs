//! jitportal CLI
//!
//! Runs the bundled loop programs under the tracing harness and prints what
//! the compilation portal observed.

use clap::{Parser, Subcommand};
use jitportal::config::JitConfig;
use jitportal::metainterp::programs::{BranchyCounter, GreenCounter, GreenState, QuasiImmutCounter, ScaledSum};
use jitportal::metainterp::MetaInterp;
use jitportal::portal::{LoggingPortal, PortalStats, RecordingPortal};
use jitportal::{ErrorKind, Result, VERSION};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jitportal")]
#[command(author, version, about = "Quasi-immutable field versioning and JIT portal demos", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JIT parameters, e.g. `threshold=3,trace_eagerness=2` or `off`
    #[arg(long, value_name = "PARAMS", global = true)]
    jit: Option<String>,

    /// JSON file with JIT parameters (applied before --jit)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Print portal events as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Sum a quasi-immutable field that is written every iteration
    QuasiImmut {
        /// Initial value of the field
        #[arg(long, default_value_t = 100)]
        a: i64,
        /// Iterations
        #[arg(long, default_value_t = 7)]
        x: i64,
    },

    /// Compile one loop per pair of green values
    Compile {
        /// `n,m` pairs, one loop run each
        #[arg(value_name = "N,M", default_values = ["1,4", "2,4"])]
        pairs: Vec<String>,
    },

    /// Compile a loop whose branch flips, then a bridge off that branch
    Bridge {
        #[arg(long, default_value_t = 10)]
        limit: i64,
        /// First value of `i` that takes the other branch
        #[arg(long, default_value_t = 4)]
        flip: i64,
    },

    /// Rewrite a quasi-immutable field under a compiled loop
    Invalidate {
        #[arg(long, default_value_t = 12)]
        n: i64,
        #[arg(long, default_value_t = 6)]
        switch_at: i64,
    },
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if let Err(e) = run(&cli) {
        eprintln!("{}", e);
        std::process::exit(match e.kind() {
            ErrorKind::Config => 2,
            ErrorKind::Io | ErrorKind::Heap => 1,
        });
    }
}

fn setup_logging(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<JitConfig> {
    let mut config = match &cli.config {
        Some(path) => JitConfig::load(path)?,
        None => JitConfig::for_tests(),
    };
    if let Some(params) = &cli.jit {
        config.apply_params(params)?;
    }
    Ok(config)
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let recorder = Arc::new(RecordingPortal::new());
    let new_interp = || {
        let mut jit = MetaInterp::with_portal(config.clone(), recorder.clone());
        if cli.verbose > 0 {
            jit.add_portal(Arc::new(LoggingPortal));
        }
        jit
    };

    let mut stats = Vec::new();
    match &cli.command {
        Commands::QuasiImmut { a, x } => {
            let mut jit = new_interp();
            let mut program = QuasiImmutCounter::setup(jit.heap_mut(), *a)?;
            let state = jit.run(&mut program, QuasiImmutCounter::start(*x))?;
            println!("total = {}", state.total);
            stats.push(jit.stats());
        }
        Commands::Compile { pairs } => {
            let entry = GreenCounter::entry_point();
            for pair in pairs {
                let (n, m) = parse_pair(pair)?;
                let mut jit = new_interp();
                let mut program = GreenCounter::new(&entry, n, m);
                let state = jit.run(&mut program, GreenState::default())?;
                println!("({}, {}): total = {}", n, m, state.total);
                stats.push(jit.stats());
            }
        }
        Commands::Bridge { limit, flip } => {
            let mut jit = new_interp();
            let mut program = BranchyCounter::new(*limit, *flip);
            let i = jit.run(&mut program, 1)?;
            println!("i = {}", i);
            stats.push(jit.stats());
        }
        Commands::Invalidate { n, switch_at } => {
            let mut jit = new_interp();
            let mut program = ScaledSum::setup(jit.heap_mut(), 1, *n, *switch_at, 10)?;
            let state = jit.run(&mut program, GreenState::default())?;
            println!("total = {}", state.total);
            let versions = jit.versions().stats();
            println!(
                "versions: {} fields, {} allocated, {} invalidations",
                versions.tracked_fields, versions.versions_allocated, versions.invalidations
            );
            stats.push(jit.stats());
        }
    }

    if cli.json {
        print!("{}", recorder.to_json_lines()?);
    } else {
        for event in recorder.events() {
            println!("{}", event);
        }
        println!();
        println!("{}", merge_stats(stats));
        println!("jitportal {}", VERSION);
    }
    Ok(())
}

fn parse_pair(pair: &str) -> Result<(i64, i64)> {
    let bad = || jitportal::Error::invalid_param("pair", format!("expected N,M, got {:?}", pair));
    let (n, m) = pair.split_once(',').ok_or_else(bad)?;
    let n = n.trim().parse().map_err(|_| bad())?;
    let m = m.trim().parse().map_err(|_| bad())?;
    Ok((n, m))
}

fn merge_stats(all: Vec<PortalStats>) -> PortalStats {
    let mut total = PortalStats::default();
    for stats in all {
        total.merge(&stats);
    }
    total
}
