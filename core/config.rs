use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use thiserror::Error;

// Hyperparameter and tolerance settings. Every fit takes the relevant struct
// by reference; nothing here is global. The grouped form can be stored as TOML
// so a caller can keep one file of settings next to its data.

/// Linear solve settings shared by the closed-form fitters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Relative pivot below which a Cholesky factorization is rejected.
    pub pivot_tolerance: f64,
    /// Condition number above which a fit is flagged as ill-conditioned.
    pub ill_conditioned_threshold: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            pivot_tolerance: 1e-12,
            ill_conditioned_threshold: 1e12,
        }
    }
}

/// Stopping rule for Newton-type iterations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IterationConfig {
    /// Stop once the parameter step norm falls below this value.
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Relative singular value (or absolute derivative in one dimension) treated as zero.
    pub singular_tolerance: f64,
}

impl IterationConfig {
    pub fn new(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
            ..Self::default()
        }
    }
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 50,
            singular_tolerance: 1e-14,
        }
    }
}

/// Coordinate descent settings for the LASSO.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LassoConfig {
    /// Stop once the largest coefficient change across a full cycle is below this.
    pub tolerance: f64,
    /// Maximum number of full coordinate cycles.
    pub max_iterations: usize,
    pub solver: SolverConfig,
}

impl Default for LassoConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 10_000,
            solver: SolverConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvConfig {
    pub k_folds: usize,
    /// Shuffle observations before cutting folds. `None` keeps row order.
    pub shuffle_seed: Option<u64>,
    pub solver: SolverConfig,
    pub lasso: LassoConfig,
}

impl CvConfig {
    pub fn with_folds(k_folds: usize) -> Self {
        Self {
            k_folds,
            ..Self::default()
        }
    }
}

impl Default for CvConfig {
    fn default() -> Self {
        Self {
            k_folds: 5,
            shuffle_seed: None,
            solver: SolverConfig::default(),
            lasso: LassoConfig::default(),
        }
    }
}

/// Starting point for the Poisson fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GlmStart {
    /// All coefficients start at zero, so every fitted mean starts at one.
    Zero,
    /// Ridge fit of `ln(y + 0.5)` on the design matrix with penalty `lambda`.
    RidgePilot { lambda: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlmConfig {
    pub tolerance: f64,
    pub max_iterations: usize,
    pub start: GlmStart,
    pub solver: SolverConfig,
}

impl GlmConfig {
    pub fn new(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
            ..Self::default()
        }
    }

    pub(crate) fn iteration(&self) -> IterationConfig {
        IterationConfig {
            tolerance: self.tolerance,
            max_iterations: self.max_iterations,
            singular_tolerance: self.solver.pivot_tolerance,
        }
    }
}

impl Default for GlmConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 25,
            start: GlmStart::RidgePilot { lambda: 1e-6 },
            solver: SolverConfig::default(),
        }
    }
}

/// Truncated-power splines are badly conditioned at high degree, so they are
/// solved by SVD of the column-scaled design. `solve_tolerance` is the
/// smallest accepted ratio of singular values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplineConfig {
    pub solve_tolerance: f64,
    pub ill_conditioned_threshold: f64,
}

impl Default for SplineConfig {
    fn default() -> Self {
        Self {
            solve_tolerance: 1e-14,
            ill_conditioned_threshold: 1e12,
        }
    }
}

/// All settings in one serializable document.
///
/// Nothing here is read implicitly: each fit function takes the section it
/// needs, so a caller loads the document once and passes `&config.solver` to
/// [`fit_ridge`](crate::fit_ridge) or `&config.newton` to
/// [`newton_raphson`](crate::newton_raphson).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RidgelineConfig {
    /// Settings for `fit_ridge` and `fit_ols`.
    pub solver: SolverConfig,
    /// Settings for `newton_raphson` and `newton_raphson_scalar`.
    pub newton: IterationConfig,
    pub lasso: LassoConfig,
    pub cv: CvConfig,
    pub glm: GlmConfig,
    pub spline: SplineConfig,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML config file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

impl RidgelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Saves the settings to a file in human-readable TOML.
    pub fn save(&self, path: &str) -> Result<(), ConfigError> {
        let toml_string = self.to_toml_string()?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads settings from a TOML file. Missing keys take their defaults.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        Self::from_toml_str(&toml_string)
    }
}
