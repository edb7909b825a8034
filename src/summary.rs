//! Posterior summaries and sampler-health checks built on top of [`crate::stats`].

use core::fmt;
use ndarray::{Array1, ArrayView3, Axis};
use ndarray_stats::QuantileExt;

use crate::error::{Error, Result};
use crate::stats::{effective_sample_size, split_potential_scale_reduction};

/// Summary of one parameter over all chains and draws.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterSummary {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    /// One value per requested quantile, in request order.
    pub quantiles: Vec<f64>,
    pub n_eff: f64,
    pub r_hat: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Summary {
    pub quantiles: Vec<f64>,
    pub parameters: Vec<ParameterSummary>,
}

impl Summary {
    /// Largest split R-hat, ignoring `NaN`.
    pub fn max_rhat(&self) -> Option<f64> {
        let rhat: Array1<f64> = self.parameters.iter().map(|p| p.r_hat).collect();
        let max = *rhat.max_skipnan();
        (!max.is_nan()).then_some(max)
    }

    /// Smallest effective sample size, ignoring `NaN`.
    pub fn min_ess(&self) -> Option<f64> {
        let ess: Array1<f64> = self.parameters.iter().map(|p| p.n_eff).collect();
        let min = *ess.min_skipnan();
        (!min.is_nan()).then_some(min)
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSummary> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .parameters
            .iter()
            .map(|p| p.name.len())
            .max()
            .unwrap_or(0)
            .max(4);
        write!(f, "{:width$} {:>10} {:>10}", "", "mean", "sd")?;
        for q in &self.quantiles {
            write!(f, " {:>9}%", format!("{}", q * 100.0))?;
        }
        writeln!(f, " {:>10} {:>8}", "n_eff", "R_hat")?;
        for p in &self.parameters {
            write!(f, "{:width$} {:>10.3} {:>10.3}", p.name, p.mean, p.sd)?;
            for value in &p.quantiles {
                write!(f, " {:>10.3}", value)?;
            }
            writeln!(f, " {:>10.0} {:>8.3}", p.n_eff, p.r_hat)?;
        }
        Ok(())
    }
}

/// Summarizes draws of shape `(parameters, chains, draws)`, one name per parameter.
///
/// `quantiles` are probabilities in `[0, 1]`, interpolated linearly between order statistics.
pub fn summary(draws: ArrayView3<f64>, names: &[String], quantiles: &[f64]) -> Result<Summary> {
    if names.len() != draws.len_of(Axis(0)) {
        return Err(Error::ShapeMismatch {
            what: "names",
            expected: draws.len_of(Axis(0)),
            actual: names.len(),
        });
    }
    if let Some(q) = quantiles.iter().find(|q| !(0.0..=1.0).contains(*q)) {
        return Err(Error::InvalidShape(format!("quantile {q} outside [0, 1]")));
    }

    let n_eff = effective_sample_size(draws)?;
    let r_hat = split_potential_scale_reduction(draws)?;
    let parameters = draws
        .outer_iter()
        .zip(names)
        .enumerate()
        .map(|(index, (values, name))| {
            let mut sorted: Vec<f64> = values.iter().copied().collect();
            sorted.sort_by(f64::total_cmp);
            let (mean, sd) = mean_sd(&sorted);
            ParameterSummary {
                name: name.clone(),
                mean,
                sd,
                quantiles: quantiles.iter().map(|&q| quantile(&sorted, q)).collect(),
                n_eff: n_eff[index],
                r_hat: r_hat[index],
            }
        })
        .collect();

    Ok(Summary {
        quantiles: quantiles.to_vec(),
        parameters,
    })
}

fn mean_sd(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let ss = values.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>();
    (mean, (ss / (n - 1.0)).sqrt())
}

/// Linear interpolation between the order statistics of `sorted`.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * q;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Number of draws of column `index` satisfying `predicate`, per chain.
fn count_per_chain(
    array: ArrayView3<f64>,
    index: usize,
    predicate: impl Fn(f64) -> bool,
) -> Vec<usize> {
    array
        .index_axis(Axis(0), index)
        .outer_iter()
        .map(|draws| draws.iter().filter(|&&d| predicate(d)).count())
        .collect()
}

/// Per-chain health of a NUTS run.
#[derive(Clone, Debug, PartialEq)]
pub struct HmcDiagnostics {
    /// Number of divergent transitions.
    pub divergent: Vec<usize>,
    /// Number of transitions whose tree depth reached the maximum.
    pub depth_exceeded: Vec<usize>,
    /// Mean acceptance statistic, when the engine reports it.
    pub mean_accept_stat: Option<Vec<f64>>,
}

impl HmcDiagnostics {
    pub fn total_divergent(&self) -> usize {
        self.divergent.iter().sum()
    }

    pub fn total_depth_exceeded(&self) -> usize {
        self.depth_exceeded.iter().sum()
    }
}

/// Reads the `divergent__`, `treedepth__` and `accept_stat__` columns of an output array of
/// shape `(columns, chains, draws)`.
pub fn hmc_diagnostics(
    array: ArrayView3<f64>,
    columns: &[String],
    max_depth: u32,
) -> Result<HmcDiagnostics> {
    let column = |name: &str| -> Result<usize> {
        columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| Error::UnknownName {
                namespace: "column",
                name: name.to_string(),
            })
    };
    let divergent = count_per_chain(array, column("divergent__")?, |d| d > 0.0);
    let max_depth = f64::from(max_depth);
    let depth_exceeded = count_per_chain(array, column("treedepth__")?, |d| d >= max_depth);
    let mean_accept_stat = column("accept_stat__").ok().map(|index| {
        array
            .index_axis(Axis(0), index)
            .outer_iter()
            .map(|draws| draws.mean().unwrap_or(f64::NAN))
            .collect()
    });

    if divergent.iter().any(|&d| d > 0) {
        log::warn!(
            "{} divergent transitions after warmup",
            divergent.iter().sum::<usize>()
        );
    }

    Ok(HmcDiagnostics {
        divergent,
        depth_exceeded,
        mean_accept_stat,
    })
}
