use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use c2clat_core::{LatencyRun, RunConfig};
use c2clat_error::{LatencyError, Result};
use c2clat_probe::{
    ClockSource, HardwareProbe, ProbeConfig, SystemProbe, calibrate_filler, clock_overhead_ns,
};
use c2clat_report::{
    Banner, CpuLabel, LatencySummary, OutputFormat, StreamSink, analyze_file, default_plot_path,
    total_time_line, write_heatmap,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct CliOptions {
    runs: Option<u32>,
    cores: Option<usize>,
    iterations: Option<u32>,
    warmup: Option<u32>,
    streak_max: Option<u32>,
    filler: Option<u64>,
    max_rounds: Option<u64>,
    clock: ClockSource,
    no_frequency: bool,
    format: OutputFormat,
    summary: bool,
    verbose: bool,
    analyze: Option<PathBuf>,
    plot: bool,
    cpu_name: Option<String>,
    cpu_cores: Option<usize>,
    show_help: bool,
}

fn main() {
    let mut stdout = io::stdout();
    std::process::exit(run(std::env::args_os(), &mut stdout));
}

/// Parse `args` and measure or analyze. Errors are printed with the usage
/// text; the exit code is always 0.
fn run<I, W>(args: I, out: &mut W) -> i32
where
    I: IntoIterator<Item = OsString>,
    W: Write + Send,
{
    let options = match parse_args(args) {
        Ok(options) => options,
        Err(error) => {
            report_error(out, &error);
            return 0;
        }
    };

    if options.show_help {
        let _ = write_usage(out);
        return 0;
    }

    init_logging(options.verbose);

    let outcome = match options.analyze.as_deref() {
        Some(path) => analyze(&options, path, out),
        None => measure(&options, out),
    };
    if let Err(error) = outcome {
        tracing::error!(target: "c2clat.cli", error = %error, "run failed");
        report_error(out, &error);
    }
    0
}

fn report_error<W: Write>(out: &mut W, error: &LatencyError) {
    let _ = writeln!(out, "Error: {error}");
    if let Some(hint) = error.suggestion() {
        let _ = writeln!(out, "Hint: {hint}");
    }
    let _ = write_usage(out);
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run_config(options: &CliOptions) -> Result<RunConfig> {
    let mut config = match options.cores {
        Some(cores) => RunConfig::new(cores),
        None => RunConfig::from_available_parallelism()?,
    };
    if let Some(runs) = options.runs {
        config = config.with_target_samples(runs);
    }
    if let Some(iterations) = options.iterations {
        config = config.with_iterations(iterations);
    }
    if let Some(warmup) = options.warmup {
        config = config.with_warmup_iterations(warmup);
    }
    if let Some(streak_max) = options.streak_max {
        config = config.with_streak_max(streak_max);
    }
    if let Some(filler) = options.filler {
        config = config.with_filler_loop_length(filler);
    }
    if options.max_rounds.is_some() {
        config = config.with_max_rounds(options.max_rounds);
    }
    config.validate()?;
    Ok(config)
}

fn analyze<W: Write>(options: &CliOptions, log: &Path, out: &mut W) -> Result<()> {
    let summary = analyze_file(log)?;
    write!(out, "{}", summary.render(options.verbose))?;
    if options.plot {
        let cpu = CpuLabel::detect().with_overrides(options.cpu_name.clone(), options.cpu_cores);
        writeln!(out, "CPU: {cpu}")?;
        let plot_path = default_plot_path(log);
        write_heatmap(&summary, &cpu, &plot_path)?;
        writeln!(out, "Stored plot to {}", plot_path.display())?;
    }
    Ok(())
}

fn measure<W: Write + Send>(options: &CliOptions, out: &mut W) -> Result<()> {
    let config = run_config(options)?;
    let probe = SystemProbe::new(ProbeConfig {
        clock: options.clock,
        estimate_frequency: !options.no_frequency,
    })?;

    let banner = Banner {
        core_count: config.total_cores,
        iterations_per_experiment: config.iterations_per_experiment,
        samples_per_pair: config.target_samples,
        clock_name: probe.clock_name(),
        clock_period_ns: probe.timestamp_period_ns(),
        clock_overhead_ns: clock_overhead_ns(&probe),
        filler: calibrate_filler(&probe, config.filler_loop_length),
    };

    let mut sink = StreamSink::new(&mut *out, options.format);
    if options.summary {
        sink = sink.retaining();
    }
    sink.write_banner(&banner)?;

    let run = LatencyRun::new(config, probe)?;
    let report = run.run(&sink)?;

    sink.write_info(&total_time_line(report.elapsed_secs))?;
    if !report.completed {
        sink.write_info(&c2clat_report::info_line(format_args!(
            "Stopped before every pair reached the target (least: {} of {})",
            report.min_valid(),
            report.target_samples
        )))?;
    }
    sink.write_report(&report)?;
    if options.summary {
        let summary = LatencySummary::from_samples(&sink.retained());
        sink.write_summary(&summary, options.verbose)?;
    }
    sink.finish()?;
    Ok(())
}

#[allow(clippy::too_many_lines)]
fn parse_args<I>(args: I) -> Result<CliOptions>
where
    I: IntoIterator<Item = OsString>,
{
    let mut iter = args.into_iter();
    let _argv0 = iter.next();
    let mut options = CliOptions::default();

    while let Some(argument) = iter.next() {
        let arg = argument.to_string_lossy().into_owned();
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => {
                (flag.to_owned(), Some(value.to_owned()))
            }
            _ => (arg.clone(), None),
        };
        let mut value = || -> Result<String> {
            match &inline {
                Some(value) => Ok(value.clone()),
                None => iter
                    .next()
                    .map(|next| next.to_string_lossy().into_owned())
                    .ok_or_else(|| LatencyError::usage("Too few arguments")),
            }
        };

        match flag.as_str() {
            "-h" | "--help" => {
                options.show_help = true;
                return Ok(options);
            }
            "-r" | "--runs" => options.runs = Some(parse_number(&value()?, "--runs")?),
            "--cores" => options.cores = Some(parse_number(&value()?, "--cores")?),
            "--iterations" => options.iterations = Some(parse_number(&value()?, "--iterations")?),
            "--warmup" => options.warmup = Some(parse_number(&value()?, "--warmup")?),
            "--streak-max" => options.streak_max = Some(parse_number(&value()?, "--streak-max")?),
            "--filler" => options.filler = Some(parse_number(&value()?, "--filler")?),
            "--max-rounds" => options.max_rounds = Some(parse_number(&value()?, "--max-rounds")?),
            "--clock" => {
                options.clock = value()?
                    .parse()
                    .map_err(|error: LatencyError| LatencyError::usage(error.to_string()))?;
            }
            "--format" => options.format = value()?.parse()?,
            "--analyze" => options.analyze = Some(PathBuf::from(value()?)),
            "-n" | "--cpu-name" => options.cpu_name = Some(value()?),
            "-c" | "--cpu-cores" => {
                options.cpu_cores = Some(parse_number(&value()?, "--cpu-cores")?);
            }
            "--no-frequency" | "--summary" | "--plot" | "-v" | "--verbose" => {
                if inline.is_some() {
                    return Err(LatencyError::usage(format!("`{flag}` takes no value")));
                }
                match flag.as_str() {
                    "--no-frequency" => options.no_frequency = true,
                    "--summary" => options.summary = true,
                    "--plot" => options.plot = true,
                    _ => options.verbose = true,
                }
            }
            other if other.starts_with('-') => {
                return Err(LatencyError::usage(format!("unknown option `{other}`")));
            }
            other => {
                return Err(LatencyError::usage(format!("unexpected argument `{other}`")));
            }
        }
    }

    if options.analyze.is_none() {
        let plot_flag = [
            (options.plot, "--plot"),
            (options.cpu_name.is_some(), "--cpu-name"),
            (options.cpu_cores.is_some(), "--cpu-cores"),
        ]
        .into_iter()
        .find_map(|(set, flag)| set.then_some(flag));
        if let Some(flag) = plot_flag {
            return Err(LatencyError::usage(format!("`{flag}` requires `--analyze`")));
        }
    }

    Ok(options)
}

fn parse_number<T: std::str::FromStr>(value: &str, flag: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| LatencyError::usage(format!("invalid integer for `{flag}`: `{value}`")))
}

fn write_usage<W>(out: &mut W) -> io::Result<()>
where
    W: Write,
{
    writeln!(
        out,
        "Usage: c2clat [-r|--runs N] [--cores N] [--iterations N] [--warmup N]\n\
         \x20             [--streak-max N] [--filler N] [--max-rounds N]\n\
         \x20             [--clock steady|counter] [--no-frequency]\n\
         \x20             [--format text|jsonl] [--summary] [-v|--verbose]\n\
         \x20      c2clat --analyze FILE [--plot] [-n|--cpu-name NAME]\n\
         \x20             [-c|--cpu-cores N] [-v|--verbose]\n\
         \x20      c2clat -h|--help\n\
         \n\
         Measures the latency of handing a cache line between every ordered\n\
         pair of cores. Threads are not pinned; pairs are measured whenever the\n\
         scheduler happens to place threads on both cores.\n\
         \n\
         Options:\n\
         \x20 -r, --runs N          valid samples per core pair (default 300)\n\
         \x20 --cores N             worker threads (default: available parallelism)\n\
         \x20 --iterations N        timed round trips per sample (default 2000)\n\
         \x20 --warmup N            untimed round trips per sample (default 10)\n\
         \x20 --streak-max N        samples per visit to a pair (default 10)\n\
         \x20 --filler N            filler loop length for idle threads\n\
         \x20 --max-rounds N        stop after N rounds\n\
         \x20 --clock SOURCE        steady (default) or counter\n\
         \x20 --no-frequency        skip clock frequency estimates\n\
         \x20 --format FORMAT       text (default) or jsonl\n\
         \x20 --summary             print per-pair statistics after the run\n\
         \x20 --analyze FILE        summarize a captured text log, no measurement\n\
         \x20 --plot                with --analyze, draw the median heatmap to FILE.svg\n\
         \x20 -n, --cpu-name NAME   CPU name for the plot title\n\
         \x20 -c, --cpu-cores N     core count for the plot title\n\
         \x20 -v, --verbose         debug logging, detailed summary\n\
         \n\
         Logs go to stderr; RUST_LOG overrides the level."
    )
}
