//! Tuning parameters handed to the sampling engine, and the worker-count configuration of the
//! parallel entry points.
//!
//! Defaults follow the engine's own defaults. Every struct deserializes with missing fields
//! filled from [`Default`], so partial configuration files are accepted.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Step-size and metric adaptation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Adapt {
    pub engaged: bool,
    pub gamma: f64,
    pub delta: f64,
    pub kappa: f64,
    pub t0: f64,
    pub init_buffer: u32,
    pub term_buffer: u32,
    pub window: u32,
    pub save_metric: bool,
}

impl Default for Adapt {
    fn default() -> Self {
        Self {
            engaged: true,
            gamma: 0.05,
            delta: 0.8,
            kappa: 0.75,
            t0: 10.0,
            init_buffer: 75,
            term_buffer: 50,
            window: 25,
            save_metric: false,
        }
    }
}

/// Hamiltonian dynamics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hmc {
    pub int_time: f64,
    pub max_depth: u32,
    pub stepsize: f64,
    pub stepsize_jitter: f64,
}

impl Default for Hmc {
    fn default() -> Self {
        Self {
            int_time: 2.0 * std::f64::consts::PI,
            max_depth: 10,
            stepsize: 1.0,
            stepsize_jitter: 0.0,
        }
    }
}

/// Parameters of a sampling run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleParameters {
    pub num_samples: usize,
    pub num_warmup: usize,
    pub save_warmup: bool,
    pub thin: usize,
    pub adapt: Adapt,
    pub hmc: Hmc,
    pub num_chains: usize,
    pub seed: u32,
    pub id: u32,
    pub init_radius: f64,
}

impl Default for SampleParameters {
    fn default() -> Self {
        Self {
            num_samples: 1000,
            num_warmup: 1000,
            save_warmup: false,
            thin: 1,
            adapt: Adapt::default(),
            hmc: Hmc::default(),
            num_chains: 1,
            seed: 0,
            id: 1,
            init_radius: 2.0,
        }
    }
}

impl SampleParameters {
    /// Number of draws the engine reports per chain, warmup included when saved.
    pub fn num_draws(&self) -> usize {
        let thin = self.thin.max(1);
        let kept = |n: usize| n.div_ceil(thin);
        let warmup = if self.save_warmup {
            kept(self.num_warmup)
        } else {
            0
        };
        warmup + kept(self.num_samples)
    }
}

/// Parameters of a generated-quantities run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateParameters {
    pub num_chains: usize,
    pub seed: u32,
}

impl Default for GenerateParameters {
    fn default() -> Self {
        Self {
            num_chains: 1,
            seed: 0,
        }
    }
}

impl From<&SampleParameters> for GenerateParameters {
    fn from(parameters: &SampleParameters) -> Self {
        Self {
            num_chains: parameters.num_chains,
            seed: parameters.seed,
        }
    }
}

/// Worker count of the parallel entry points (batched diagnostics, replicated sampling).
///
/// Defaults to a single worker so that callers already running inside a parallel context do
/// not oversubscribe the machine. Zero lets rayon pick one worker per logical CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub num_threads: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self { num_threads: 1 }
    }
}

impl DiagnosticsConfig {
    /// Environment variable read by [`DiagnosticsConfig::from_env`].
    pub const ENV_VAR: &'static str = "STAN_NUM_THREADS";

    pub fn new(num_threads: usize) -> Self {
        Self { num_threads }
    }

    /// Reads the worker count from `STAN_NUM_THREADS`: a positive count, or `-1` for one
    /// worker per logical CPU. Unset or invalid values give the default.
    pub fn from_env() -> Self {
        match std::env::var(Self::ENV_VAR) {
            Ok(value) => Self::parse(&value).unwrap_or_else(|| {
                log::warn!(
                    "Ignoring invalid {}={value:?}, using a single worker",
                    Self::ENV_VAR
                );
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().parse::<i64>().ok()? {
            -1 => Some(Self::new(0)),
            n if n > 0 => Some(Self::new(usize::try_from(n).ok()?)),
            _ => None,
        }
    }

    /// Builds a dedicated pool with the configured number of workers.
    pub fn thread_pool(&self) -> Result<rayon::ThreadPool> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .thread_name(|i| format!("slimp-worker-{i}"))
            .build()?;
        Ok(pool)
    }
}
