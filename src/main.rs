use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use projection_alignment::config::{load_config_or_default, Config, ConfigFormat};
use projection_alignment::io;
use projection_alignment::logging::init_logging;
use projection_alignment::*;
use std::io::BufRead;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "align-projections")]
#[command(about = "Find the rotation-axis column and detector tilt of a tomography scan")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML or JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Score one set of parameters against the first and last projections
    Evaluate {
        /// Projection stack (.mhd file or directory of images)
        #[arg(short, long)]
        stack: PathBuf,

        #[command(flatten)]
        alignment: AlignmentArgs,

        /// Write the red/cyan overlay of the transformed pair as PNG
        #[arg(short, long)]
        preview: Option<PathBuf>,
    },

    /// Search for the best parameters; press Enter to stop early
    Optimize {
        /// Projection stack (.mhd file or directory of images)
        #[arg(short, long)]
        stack: PathBuf,

        #[command(flatten)]
        alignment: AlignmentArgs,

        /// Output file for the run report (JSON)
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// Write the overlay at the found parameters as PNG
        #[arg(short, long)]
        preview: Option<PathBuf>,
    },

    /// Transform every slice and save the aligned stack
    Apply {
        /// Projection stack (.mhd file or directory of images)
        #[arg(short, long)]
        stack: PathBuf,

        #[command(flatten)]
        alignment: AlignmentArgs,

        /// Output header, must end in .mhd
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Write a synthetic two-projection scan with a known axis
    Synth {
        /// Output header, must end in .mhd
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, default_value = "101")]
        width: usize,

        #[arg(long, default_value = "64")]
        height: usize,

        /// True centre pixel (defaults to the detector centre)
        #[arg(long)]
        center: Option<f64>,

        /// True detector angle in degrees
        #[arg(long, default_value = "0.0")]
        angle: f64,

        /// Standard deviation of added Gaussian noise
        #[arg(long, default_value = "0.0")]
        noise: f64,

        #[arg(long, default_value = "7")]
        seed: u64,
    },

    /// Write the default configuration
    InitConfig {
        #[arg(short, long, default_value = "align.toml")]
        output: PathBuf,

        #[arg(short, long, value_enum, default_value = "toml")]
        format: FormatArg,
    },
}

/// Overrides for the configured starting point and borders.
#[derive(Args, Debug, Clone, Default)]
struct AlignmentArgs {
    /// Centre pixel (column of the rotation axis)
    #[arg(long)]
    center: Option<f64>,

    /// Detector angle in degrees
    #[arg(long)]
    angle: Option<f64>,

    /// Columns cropped from the left and right edges
    #[arg(long)]
    horizontal: Option<u32>,

    /// Rows cropped from the top edge
    #[arg(long)]
    top: Option<u32>,

    /// Rows cropped from the bottom edge
    #[arg(long)]
    bottom: Option<u32>,
}

impl AlignmentArgs {
    fn apply_to(&self, config: &mut Config) {
        let alignment = &mut config.alignment;
        if let Some(center) = self.center {
            alignment.center_pixel = Some(center);
        }
        if let Some(angle) = self.angle {
            alignment.detector_angle = angle;
        }
        if let Some(h) = self.horizontal {
            alignment.horizontal_border = h;
        }
        if let Some(t) = self.top {
            alignment.top_border = t;
        }
        if let Some(b) = self.bottom {
            alignment.bottom_border = b;
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Toml,
    Json,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config_or_default(cli.config.as_deref());

    if cli.verbose > 0 {
        let level = match cli.verbose {
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        config.logging.global_level = level.to_string();
        config.logging.optimizer_level = level.to_string();
        config.logging.io_level = level.to_string();
    }
    let _log_guard = init_logging(&config.logging)?;

    match cli.command {
        Commands::Evaluate {
            stack,
            alignment,
            preview,
        } => {
            alignment.apply_to(&mut config);
            handle_evaluate(&config, &stack, preview.as_deref())?;
        }
        Commands::Optimize {
            stack,
            alignment,
            report,
            preview,
        } => {
            alignment.apply_to(&mut config);
            handle_optimize(&config, &stack, report.as_deref(), preview.as_deref())?;
        }
        Commands::Apply {
            stack,
            alignment,
            output,
        } => {
            alignment.apply_to(&mut config);
            handle_apply(&config, &stack, &output)?;
        }
        Commands::Synth {
            output,
            width,
            height,
            center,
            angle,
            noise,
            seed,
        } => {
            let center = center.unwrap_or_else(|| nominal_center(width));
            let scan = SyntheticScan::new(width, height)
                .with_truth(center, angle)
                .with_noise(noise)
                .with_seed(seed);
            handle_synth(&scan, &output)?;
        }
        Commands::InitConfig { output, format } => {
            let format = match format {
                FormatArg::Toml => ConfigFormat::Toml,
                FormatArg::Json => ConfigFormat::Json,
            };
            Config::default().save_to_file(&output, format)?;
            println!("Default configuration written to {}", output.display());
        }
    }

    Ok(())
}

fn open_session(config: &Config, stack_path: &Path) -> anyhow::Result<AlignmentSession> {
    let stack = load_stack(stack_path, config.export.spacing())
        .with_context(|| format!("Failed to load stack {}", stack_path.display()))?;
    println!(
        "Stack: {} slices of {}x{}",
        stack.len(),
        stack.width(),
        stack.height()
    );
    Ok(AlignmentSession::from_config(stack, config))
}

fn save_preview(session: &AlignmentSession, path: &Path) -> anyhow::Result<()> {
    match session.preview()? {
        Some(overlay) => {
            overlay.save(path)?;
            println!("Preview saved to {}", path.display());
        }
        None => println!("No preview available."),
    }
    Ok(())
}

fn handle_evaluate(config: &Config, stack_path: &Path, preview: Option<&Path>) -> anyhow::Result<()> {
    let session = open_session(config, stack_path)?;
    let result = session.update(session.parameters(), session.crop())?;
    println!(
        "Centre pixel {:.4}, detector angle {:.5}°: correlation {:.8}",
        result.parameters.center_pixel, result.parameters.detector_angle, result.score
    );
    if let Some(path) = preview {
        save_preview(&session, path)?;
    }
    Ok(())
}

fn handle_optimize(
    config: &Config,
    stack_path: &Path,
    report_path: Option<&Path>,
    preview: Option<&Path>,
) -> anyhow::Result<()> {
    let session = open_session(config, stack_path)?;
    let start = session.parameters();
    println!(
        "Starting from centre pixel {:.4}, detector angle {:.5}°. Press Enter to stop.",
        start.center_pixel, start.detector_angle
    );

    let handle = session.start_optimization(Some(|event: &EvaluationEvent| {
        if event.index % 25 == 0 {
            eprintln!(
                "  #{:<6} centre {:.4}  angle {:.5}°  correlation {:.8}",
                event.index,
                event.parameters.center_pixel,
                event.parameters.detector_angle,
                event.score
            );
        }
    }))?;

    let token = handle.cancellation_token();
    std::thread::spawn(move || cancel_on_enter(std::io::stdin().lock(), &token));

    match handle.join() {
        RunOutcome::Finished(report) => {
            println!(
                "{}: centre pixel {:.4}, detector angle {:.5}°, correlation {:.8} ({} evaluations, {} ms)",
                report.status.as_str(),
                report.parameters.center_pixel,
                report.parameters.detector_angle,
                report.score,
                report.total_evaluations(),
                report.elapsed_ms
            );
            if let Some(path) = report_path {
                let json = serde_json::to_string_pretty(&report)?;
                std::fs::write(path, json)?;
                println!("Report saved to {}", path.display());
            }
            if let Some(path) = preview {
                save_preview(&session, path)?;
            }
            Ok(())
        }
        RunOutcome::Aborted(err) => Err(anyhow::anyhow!("Optimization aborted: {}", err)),
    }
}

/// Cancel the run once a line is entered. Closed or empty stdin leaves it
/// running.
fn cancel_on_enter<R: BufRead>(mut input: R, token: &CancellationToken) {
    let mut line = String::new();
    if let Ok(read) = input.read_line(&mut line) {
        if read > 0 {
            token.cancel();
        }
    }
}

fn handle_apply(config: &Config, stack_path: &Path, output: &Path) -> anyhow::Result<()> {
    let session = open_session(config, stack_path)?;
    let summary = session.apply(output)?;
    println!(
        "Wrote {} slices of {}x{} to {}",
        summary.slices,
        summary.width,
        summary.height,
        summary.header_path.display()
    );
    Ok(())
}

fn handle_synth(scan: &SyntheticScan, output: &Path) -> anyhow::Result<()> {
    let stack = scan.render_stack()?;
    let summary = io::write_stack(stack.slices(), stack.spacing(), output)?;
    println!(
        "Synthetic {}x{} scan with centre pixel {:.4}, detector angle {:.5}° written to {}",
        summary.width,
        summary.height,
        scan.truth.center_pixel,
        scan.truth.detector_angle,
        summary.header_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_enter_cancels() {
        let token = CancellationToken::new();
        cancel_on_enter(Cursor::new("\n"), &token);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_closed_stdin_does_not_cancel() {
        let token = CancellationToken::new();
        cancel_on_enter(Cursor::new(""), &token);
        assert!(!token.is_cancelled());
    }
}
