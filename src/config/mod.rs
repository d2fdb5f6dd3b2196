use crate::algorithms::ConvergenceChecker;
use crate::data::{AlignmentParameters, CropBorders, ElementSpacing};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub alignment: AlignmentConfig,
    pub optimizer: OptimizerConfig,
    pub export: ExportConfig,
    pub logging: LoggingConfig,
}

/// Starting parameters and crop borders.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AlignmentConfig {
    /// `None` starts from the detector centre, `(width - 1) / 2`.
    pub center_pixel: Option<f64>,
    pub detector_angle: f64,
    pub horizontal_border: u32,
    pub top_border: u32,
    pub bottom_border: u32,
}

impl AlignmentConfig {
    pub fn parameters(&self, width: usize) -> AlignmentParameters {
        AlignmentParameters::new(
            self.center_pixel
                .unwrap_or_else(|| AlignmentParameters::nominal(width).center_pixel),
            self.detector_angle,
        )
    }

    pub fn crop(&self) -> CropBorders {
        CropBorders::new(self.horizontal_border, self.top_border, self.bottom_border)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub coarse: PhaseConfig,
    pub fine: PhaseConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            coarse: PhaseConfig::coarse(),
            fine: PhaseConfig::fine(),
        }
    }
}

/// Tolerances and caps for one Powell pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseConfig {
    /// Relative change in score below which an iteration counts as converged.
    pub relative_threshold: f64,
    /// Absolute change in score below which an iteration counts as converged.
    pub absolute_threshold: f64,
    /// Relative tolerance on the step length of each line search.
    pub line_search_relative: f64,
    /// Absolute tolerance on the step length of each line search.
    pub line_search_absolute: f64,
    pub max_evaluations: usize,
    pub max_iterations: usize,
}

impl PhaseConfig {
    pub const DEFAULT_LINE_SEARCH_RELATIVE: f64 = 1e-7;
    pub const DEFAULT_LINE_SEARCH_ABSOLUTE: f64 = 1e-11;
    pub const DEFAULT_MAX_EVALUATIONS: usize = 1_000_000;
    pub const DEFAULT_MAX_ITERATIONS: usize = 1_000_000;

    pub fn coarse() -> Self {
        Self {
            relative_threshold: 1e-4,
            absolute_threshold: 1e-4,
            line_search_relative: 1e-4,
            line_search_absolute: Self::DEFAULT_LINE_SEARCH_ABSOLUTE,
            max_evaluations: Self::DEFAULT_MAX_EVALUATIONS,
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn fine() -> Self {
        Self {
            relative_threshold: ConvergenceChecker::DEFAULT_RELATIVE_THRESHOLD,
            absolute_threshold: ConvergenceChecker::DEFAULT_ABSOLUTE_THRESHOLD,
            line_search_relative: Self::DEFAULT_LINE_SEARCH_RELATIVE,
            line_search_absolute: Self::DEFAULT_LINE_SEARCH_ABSOLUTE,
            max_evaluations: Self::DEFAULT_MAX_EVALUATIONS,
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn checker(&self) -> ConvergenceChecker {
        ConvergenceChecker::new(self.relative_threshold, self.absolute_threshold)
    }
}

/// Settings for the batch apply path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Used when the input stack carries no spacing of its own.
    pub element_spacing: [f64; 3],
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            element_spacing: [1.0, 1.0, 1.0],
        }
    }
}

impl ExportConfig {
    pub fn spacing(&self) -> ElementSpacing {
        ElementSpacing::from(self.element_spacing)
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = fs::read_to_string(path)?;

        if content.trim_start().starts_with('{') {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(toml::from_str(&content)?)
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P, format: ConfigFormat) -> crate::Result<()> {
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };

        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Some(center) = self.alignment.center_pixel {
            if !center.is_finite() {
                errors.push("alignment.center_pixel must be finite".to_string());
            }
        }
        if !self.alignment.detector_angle.is_finite() {
            errors.push("alignment.detector_angle must be finite".to_string());
        }

        for (name, phase) in [("coarse", &self.optimizer.coarse), ("fine", &self.optimizer.fine)] {
            if phase.max_evaluations == 0 {
                errors.push(format!("optimizer.{}.max_evaluations must be positive", name));
            }
            if phase.max_iterations == 0 {
                errors.push(format!("optimizer.{}.max_iterations must be positive", name));
            }
            if !(phase.line_search_relative > 0.0) && !(phase.line_search_absolute > 0.0) {
                errors.push(format!(
                    "optimizer.{} needs a positive line-search tolerance",
                    name
                ));
            }
            if phase.relative_threshold.is_nan() || phase.absolute_threshold.is_nan() {
                errors.push(format!("optimizer.{} thresholds must not be NaN", name));
            }
        }

        if self.export.element_spacing.iter().any(|s| !(*s > 0.0)) {
            errors.push("export.element_spacing must be positive".to_string());
        }

        if let Err(e) = self.logging.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ConfigFormat {
    Json,
    Toml,
}

/// Load and validate a configuration file, collecting every problem found.
pub fn load_and_validate(path: &Path) -> Result<Config, Vec<String>> {
    let config = Config::load_from_file(path)
        .map_err(|e| vec![format!("failed to load config from '{}': {:#}", path.display(), e)])?;
    config.validate()?;
    Ok(config)
}

/// Runs before logging is initialised, so problems go straight to stderr.
pub fn load_config_or_default(config_path: Option<&Path>) -> Config {
    match config_path {
        Some(path) => match load_and_validate(path) {
            Ok(config) => config,
            Err(errors) => {
                eprintln!("Configuration errors:");
                for error in errors {
                    eprintln!("  - {}", error);
                }
                eprintln!("Using default configuration instead.");
                Config::default()
            }
        },
        None => Config::default(),
    }
}
