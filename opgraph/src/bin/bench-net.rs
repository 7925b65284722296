use std::{path::PathBuf, sync::Arc};

use anyhow::{Context as _, Result, bail, ensure};
use clap::Parser;
use opgraph::{
    ExecutionConfig, NetRegistry, NetSpec, TensorShape,
    ops::{ReferenceFactory, Tensor, TensorWorkspace, reference_schemas},
};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};
use utils::log_memory_usage;

/// Benchmarks a net of reference operators.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON file describing the net.
    net: PathBuf,

    /// Input tensor to fill with random values, as `name=DIMxDIMx...`. Repeat for every
    /// external input of the net.
    #[arg(short, long = "input", value_parser = parse_input)]
    inputs: Vec<(String, TensorShape)>,

    /// Number of runs before measuring
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    warmup: i32,

    /// Number of measured runs
    #[arg(short = 'n', long, default_value_t = 10, allow_negative_numbers = true)]
    iter: i32,

    /// Also time every operator on its own and report per operator type statistics
    #[arg(short, long)]
    run_individual: bool,

    /// Seed of the random input values
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Open a profiler range around every operator run. Also enabled by
    /// `OPGRAPH_PROFILER_RANGES=1`.
    #[arg(long)]
    profiler_ranges: bool,

    /// Log as JSON
    #[arg(long)]
    json: bool,
}

fn parse_input(arg: &str) -> Result<(String, TensorShape)> {
    let (name, dims) = arg
        .split_once('=')
        .with_context(|| format!("expected name=DIMxDIM..., got {arg:?}"))?;
    ensure!(!name.is_empty(), "empty input name in {arg:?}");
    let dims = dims
        .split('x')
        .map(|d| {
            d.trim()
                .parse::<usize>()
                .with_context(|| format!("invalid dimension {d:?} in {arg:?}"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((name.to_string(), TensorShape::new(dims)))
}

/// The environment sets the defaults, the command line can only turn ranges on.
fn execution_config(args: &Args) -> ExecutionConfig {
    let config = ExecutionConfig::from_env();
    config.with_profiler_ranges(config.profiler_ranges || args.profiler_ranges)
}

fn setup_logging(json: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_level(true)
        .with_target(true)
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE);
    let res = if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.compact().finish())
    };
    if let Err(e) = res {
        tracing::warn!("logging already set up: {e}");
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.json);

    let net_def = NetSpec::from_json_file(&args.net)?;
    info!(
        "Loaded net {} with {} operators from {:?}",
        net_def.name,
        net_def.ops.len(),
        args.net
    );

    let ws = TensorWorkspace::new();
    for (i, (name, shape)) in args.inputs.iter().enumerate() {
        info!("Feeding input {name} of shape {shape}");
        ws.feed(
            name.clone(),
            Tensor::random(shape.clone(), args.seed.wrapping_add(i as u64)),
        );
    }
    let missing = net_def
        .external_inputs
        .iter()
        .filter(|name| !ws.contains(name))
        .cloned()
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        bail!("missing shapes for external inputs {missing:?}, pass them with --input");
    }

    let config = execution_config(&args);
    let registry = NetRegistry::<TensorWorkspace>::with_defaults();
    let mut net = registry.create_net(Arc::new(net_def), &ws, &ReferenceFactory, config)?;
    log_memory_usage("after net creation");

    let timings = net.benchmark(
        &reference_schemas(),
        args.warmup,
        args.iter,
        args.run_individual,
    )?;
    if let Some(millis) = timings.first() {
        info!("Milliseconds per iteration: {millis}");
    }
    log_memory_usage("after benchmark");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_input() {
        let (name, shape) = parse_input("x=2x3").unwrap();
        assert_eq!(name, "x");
        assert_eq!(shape.dims(), &[2, 3]);
        assert_eq!(parse_input("b=16").unwrap().1.dims(), &[16]);
        assert!(parse_input("x").is_err());
        assert!(parse_input("=2").is_err());
        assert!(parse_input("x=2xfoo").is_err());
    }

    #[test]
    fn test_args() {
        let args = Args::try_parse_from([
            "bench-net", "net.json", "-i", "x=4x8", "--input", "w=2x8", "-w", "2", "-n", "5", "-r",
        ])
        .unwrap();
        assert_eq!(args.inputs.len(), 2);
        assert_eq!(args.warmup, 2);
        assert_eq!(args.iter, 5);
        assert!(args.run_individual);
        assert!(!args.json);
        assert!(!args.profiler_ranges);
    }

    #[test]
    fn test_profiler_ranges_flag() {
        let args = Args::try_parse_from(["bench-net", "net.json", "--profiler-ranges"]).unwrap();
        assert!(execution_config(&args).profiler_ranges);
    }
}
