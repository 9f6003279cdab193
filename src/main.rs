//! nanofuzz CLI — generate values from a pattern schema.

use std::fs;
use std::io::{self, Read, Write};

use clap::{ArgGroup, Parser};
use log::{debug, warn};

use nanofuzz::context::{named_pool_size, DEFAULT_POOL_SIZE};
use nanofuzz::{Fuzzer, NanofuzzError};

/// Parses `-P/--pool-size`: either one of the named presets (`tiny`,
/// `small`, `normal`, `large`, `extreme`) or a raw byte count.
fn parse_pool_size(s: &str) -> Result<usize, String> {
    if let Some(bytes) = named_pool_size(s) {
        return Ok(bytes);
    }
    s.parse::<usize>()
        .map_err(|_| format!("'{s}' is not a named size (tiny/small/normal/large/extreme) or a byte count"))
}

/// Generate fuzz data from a pattern schema
#[derive(Parser, Debug)]
#[command(name = "nanofuzz")]
#[command(version)]
#[command(about = "Generate byte strings from a compact pattern schema")]
#[command(group(ArgGroup::new("source").required(true).multiple(false).args(["stdin", "pattern", "file"])))]
struct Args {
    /// Read the schema from stdin
    #[arg(short = 'i', long)]
    stdin: bool,

    /// The schema, given directly on the command line
    #[arg(short = 'p', long)]
    pattern: Option<String>,

    /// Read the schema from a file
    #[arg(short = 'f', long, value_name = "PATH")]
    file: Option<String>,

    /// Number of values to generate; -1 means run until killed
    #[arg(short = 'l', long, default_value_t = -1, allow_hyphen_values = true)]
    limit: i64,

    /// Don't append a trailing newline after each generated value
    #[arg(short = 'n', long)]
    nocrlf: bool,

    /// Maximum bytes a single generation may occupy: a named preset
    /// (tiny/small/normal/large/extreme) or a raw byte count
    #[arg(short = 'P', long = "pool-size", default_value_t = DEFAULT_POOL_SIZE, value_parser = parse_pool_size)]
    pool_size: usize,

    /// PRNG seed; omit for a time-derived seed
    #[arg(short = 's', long)]
    seed: Option<u64>,

    /// Enable verbose (debug-level) logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if let Err(e) = run(&args) {
        match e {
            NanofuzzError::Compile(trace) => {
                eprintln!("nanofuzz: schema failed to compile:");
                let mut rendered = String::new();
                let _ = trace.print(&mut rendered);
                eprint!("{rendered}");
                std::process::exit(1);
            }
            other => {
                eprintln!("nanofuzz: {other}");
                std::process::exit(1);
            }
        }
    }
}

fn run(args: &Args) -> Result<(), NanofuzzError> {
    let schema = read_schema(args)?;
    let seed = args.seed.unwrap_or_else(|| nanofuzz::prng::Prng::from_time().next_u64());
    debug!("using seed {seed}");

    let mut fuzzer = Fuzzer::new(&schema, seed, args.pool_size)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let mut i: u64 = 0;
    while args.limit < 0 || i < args.limit as u64 {
        match fuzzer.next_to_stream(&mut out) {
            Ok(_) => {
                if !args.nocrlf {
                    out.write_all(b"\n")?;
                }
            }
            Err(NanofuzzError::Generation(e)) => {
                warn!("generation {i} failed: {e}");
            }
            Err(other) => return Err(other),
        }
        i += 1;
    }
    Ok(())
}

fn read_schema(args: &Args) -> Result<Vec<u8>, NanofuzzError> {
    if let Some(path) = &args.file {
        Ok(fs::read(path)?)
    } else if let Some(pattern) = &args.pattern {
        Ok(pattern.clone().into_bytes())
    } else {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf)?;
        Ok(buf)
    }
}
