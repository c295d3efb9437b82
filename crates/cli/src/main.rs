use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use env_logger::Env;
use magdyn_core::{
    io::JobConfig,
    spectrum::{self, SpectrumResult},
};

#[derive(Parser, Debug)]
#[command(name = "magdyn", about = "Magnon correlation functions and neutron weights")]
struct Cli {
    /// Path to a TOML job file
    #[arg(short, long)]
    config: PathBuf,
    /// Output file (defaults to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,
    /// Solve Q-points on a thread pool of this size (0 = rayon default)
    #[arg(short, long)]
    threads: Option<usize>,
    /// Only log warnings and errors
    #[arg(long)]
    quiet: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let default_filter = if cli.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    log::info!("[cli] loading job {}", cli.config.display());
    let config = JobConfig::load(&cli.config)?;
    let metrics_recorder = config.metrics.build_recorder()?;
    let job = config.into_job()?;

    let result = match cli.threads {
        None => spectrum::run_with_metrics(&job, metrics_recorder.as_ref())?,
        Some(0) => spectrum::run_parallel(&job, None, metrics_recorder.as_ref())?,
        Some(n) => spectrum::run_parallel(&job, Some(n), metrics_recorder.as_ref())?,
    };

    let mut writer = open_output(cli.output.as_deref())?;
    match cli.format {
        OutputFormat::Csv => emit_csv(&result, &mut writer)?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, &result)?;
            writeln!(writer)?;
        }
    }
    writer.flush()?;

    let rows: usize = result.points.iter().map(|point| point.modes.len()).sum();
    match &cli.output {
        Some(path) => log::info!("wrote {rows} modes to {}", path.display()),
        None => log::info!("wrote {rows} modes to stdout"),
    }
    Ok(())
}

fn open_output(dest: Option<&Path>) -> io::Result<Box<dyn Write>> {
    Ok(match dest {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout())),
    })
}

fn emit_csv(result: &SpectrumResult, writer: &mut dyn Write) -> io::Result<()> {
    writeln!(
        writer,
        "q_index,h,k,l,q_distance,mode,energy,weight,weight_full,s_sum_re,s_sum_im,s_perp_sum_re,s_perp_sum_im"
    )?;
    for (idx, point) in result.points.iter().enumerate() {
        let [h, k, l] = point.q;
        for (mode_idx, mode) in point.modes.iter().enumerate() {
            writeln!(
                writer,
                "{idx},{h},{k},{l},{},{mode_idx},{},{},{},{},{},{},{}",
                point.distance,
                mode.energy,
                mode.weight,
                mode.weight_full,
                mode.s_sum.re,
                mode.s_sum.im,
                mode.s_perp_sum.re,
                mode.s_perp_sum.im,
            )?;
        }
    }
    Ok(())
}
