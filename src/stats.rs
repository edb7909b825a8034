//! Convergence diagnostics: effective sample size and potential scale reduction (R-hat).
//!
//! All functions take draws of shape `(parameters, chains, draws)`, the layout of the output
//! array once the chain and draw identifier columns are dropped. Each chain of a parameter is
//! read through a strided view, nothing is copied.
//!
//! The batched variants take `(batch, parameters, chains, draws)` and evaluate every batch
//! element on a dedicated pool whose size comes from [`DiagnosticsConfig`].

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView3, ArrayView4, Axis};
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};

use crate::config::DiagnosticsConfig;
use crate::error::{Error, Result};

/// Effective sample size of each parameter.
///
/// Follows Stan's estimator: the autocorrelations of all chains are combined with the between-
/// and within-chain variances, truncated with Geyer's initial positive sequence and made
/// monotone. Fewer than 4 draws per chain give `NaN`; a parameter constant over all chains and
/// draws gives the total number of draws.
///
/// # References
/// - Stan Reference Manual, Effective Sample Size
///   (https://mc-stan.org/docs/reference-manual/effective-sample-size.html)
pub fn effective_sample_size(draws: ArrayView3<f64>) -> Result<Array1<f64>> {
    per_parameter(draws, ess)
}

/// Potential scale reduction (R-hat) of each parameter, with full chains.
pub fn potential_scale_reduction(draws: ArrayView3<f64>) -> Result<Array1<f64>> {
    per_parameter(draws, rhat)
}

/// Potential scale reduction of each parameter after splitting every chain in two halves.
///
/// The middle draw is dropped when the number of draws is odd. Splitting makes the statistic
/// sensitive to chains that drift within themselves.
pub fn split_potential_scale_reduction(draws: ArrayView3<f64>) -> Result<Array1<f64>> {
    per_parameter(draws, split_rhat)
}

/// Evaluates `diagnostic` independently on every element of the batch axis.
///
/// Row `i` of the `(batch, parameters)` result is `diagnostic(draws[i])`. The first error aborts
/// the whole batch.
pub fn batched<F>(
    draws: ArrayView4<f64>,
    diagnostic: F,
    config: &DiagnosticsConfig,
) -> Result<Array2<f64>>
where
    F: Fn(ArrayView3<f64>) -> Result<Array1<f64>> + Sync,
{
    let (batch, parameters, _, _) = draws.dim();
    if batch == 0 {
        return Err(Error::InvalidShape("empty batch".to_string()));
    }
    check_shape(draws.index_axis(Axis(0), 0))?;

    let pool = config.thread_pool()?;
    let rows: Vec<Array1<f64>> = pool.install(|| {
        (0..batch)
            .into_par_iter()
            .map(|element| diagnostic(draws.index_axis(Axis(0), element)))
            .collect::<Result<Vec<_>>>()
    })?;

    let mut out = Array2::<f64>::zeros((batch, parameters));
    for (mut row, values) in out.outer_iter_mut().zip(rows) {
        row.assign(&values);
    }
    Ok(out)
}

pub fn effective_sample_size_batched(
    draws: ArrayView4<f64>,
    config: &DiagnosticsConfig,
) -> Result<Array2<f64>> {
    batched(draws, effective_sample_size, config)
}

pub fn potential_scale_reduction_batched(
    draws: ArrayView4<f64>,
    config: &DiagnosticsConfig,
) -> Result<Array2<f64>> {
    batched(draws, potential_scale_reduction, config)
}

pub fn split_potential_scale_reduction_batched(
    draws: ArrayView4<f64>,
    config: &DiagnosticsConfig,
) -> Result<Array2<f64>> {
    batched(draws, split_potential_scale_reduction, config)
}

fn check_shape(draws: ArrayView3<f64>) -> Result<()> {
    let (parameters, chains, n) = draws.dim();
    if parameters == 0 || chains == 0 || n == 0 {
        return Err(Error::InvalidShape(format!(
            "diagnostics need at least one parameter, chain and draw, got {parameters} x {chains} x {n}"
        )));
    }
    Ok(())
}

fn per_parameter(
    draws: ArrayView3<f64>,
    kernel: fn(&[ArrayView1<f64>]) -> f64,
) -> Result<Array1<f64>> {
    check_shape(draws)?;
    Ok(draws
        .outer_iter()
        .map(|parameter| {
            let chains: Vec<ArrayView1<f64>> = parameter.outer_iter().collect();
            kernel(&chains)
        })
        .collect())
}

fn is_constant(chains: &[ArrayView1<f64>]) -> bool {
    let Some(&first) = chains.first().and_then(|chain| chain.first()) else {
        return false;
    };
    chains.iter().all(|chain| chain.iter().all(|&x| x == first))
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance with `n - 1` denominator.
fn variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / (values.len() as f64 - 1.0)
}

fn rhat(chains: &[ArrayView1<f64>]) -> f64 {
    if is_constant(chains) {
        return 1.0;
    }
    let n = chains[0].len() as f64;
    let chain_means: Vec<f64> = chains.iter().map(|c| c.sum() / n).collect();
    let chain_vars: Vec<f64> = chains
        .iter()
        .zip(&chain_means)
        .map(|(c, &m)| c.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / (n - 1.0))
        .collect();

    let within = mean(&chain_vars);
    let between = if chains.len() > 1 {
        n * variance(&chain_means)
    } else {
        0.0
    };
    ((between / within + n - 1.0) / n).sqrt()
}

fn split_rhat(chains: &[ArrayView1<f64>]) -> f64 {
    let n = chains[0].len();
    let half = n / 2;
    if half == 0 {
        return f64::NAN;
    }
    let second = half + n % 2;
    let split: Vec<ArrayView1<f64>> = chains
        .iter()
        .flat_map(|&chain| {
            [
                chain.slice_move(s![..half]),
                chain.slice_move(s![second..]),
            ]
        })
        .collect();
    rhat(&split)
}

fn ess(chains: &[ArrayView1<f64>]) -> f64 {
    let m = chains.len();
    let n = chains[0].len();
    if n < 4 {
        return f64::NAN;
    }
    let total = (m * n) as f64;
    if is_constant(chains) {
        return total;
    }

    let n_f = n as f64;
    let acov: Vec<Vec<f64>> = chains.iter().map(|c| autocov(*c)).collect();
    let chain_means: Vec<f64> = chains.iter().map(|c| c.sum() / n_f).collect();
    let chain_vars: Vec<f64> = acov.iter().map(|a| a[0] * n_f / (n_f - 1.0)).collect();
    let mean_var = mean(&chain_vars);
    let mut var_plus = mean_var * (n_f - 1.0) / n_f;
    if m > 1 {
        var_plus += variance(&chain_means);
    }
    let rho_at = |lag: usize| {
        let mean_acov = acov.iter().map(|a| a[lag]).sum::<f64>() / m as f64;
        1.0 - (mean_var - mean_acov) / var_plus
    };

    let mut rho = vec![0.0; n];
    rho[0] = 1.0;
    let mut rho_even = 1.0;
    let mut rho_odd = rho_at(1);
    rho[1] = rho_odd;

    // Geyer's initial positive sequence
    let mut t = 1;
    while t < n - 4 && rho_even + rho_odd > 0.0 {
        rho_even = rho_at(t + 1);
        rho_odd = rho_at(t + 2);
        if rho_even + rho_odd >= 0.0 {
            rho[t + 1] = rho_even;
            rho[t + 2] = rho_odd;
        }
        t += 2;
    }
    let max_t = t;
    if rho_even > 0.0 {
        rho[max_t + 1] = rho_even;
    }

    // Geyer's initial monotone sequence
    let mut t = 1;
    while t + 3 <= max_t {
        if rho[t + 1] + rho[t + 2] > rho[t - 1] + rho[t] {
            let average = (rho[t - 1] + rho[t]) / 2.0;
            rho[t + 1] = average;
            rho[t + 2] = average;
        }
        t += 2;
    }

    let tau = -1.0 + 2.0 * rho[..max_t].iter().sum::<f64>() + rho[max_t + 1];
    total / tau.max(1.0 / total.log10())
}

fn autocov(chain: ArrayView1<f64>) -> Vec<f64> {
    if chain.len() <= 100 {
        autocov_bf(chain)
    } else {
        autocov_fft(chain)
    }
}

/// Autocovariance of one sequence at every lag, normalized by the sequence length.
///
/// Zero-pads to the next power of two at least `2n - 1` to avoid wrap-around; `rustfft` does
/// not normalize the inverse transform, so `1 / n_padded` is applied here.
fn autocov_fft(chain: ArrayView1<f64>) -> Vec<f64> {
    let n = chain.len();
    let mean = chain.sum() / n as f64;
    let n_padded = (2 * n - 1).next_power_of_two();

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n_padded);
    let ffti = planner.plan_fft_inverse(n_padded);

    let mut x: Vec<Complex<f64>> = chain
        .iter()
        .map(|xi| Complex::new(xi - mean, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)).take(n_padded - n))
        .collect();
    fft.process(&mut x);
    x.iter_mut().for_each(|xi| {
        let conj = xi.conj();
        *xi *= conj;
    });
    ffti.process(&mut x);
    x.iter()
        .take(n)
        .map(|xi| xi.re / n_padded as f64 / n as f64)
        .collect()
}

/// Brute force autocovariance: `out[lag] = sum_t (x_t - mean)(x_{t+lag} - mean) / n`.
fn autocov_bf(chain: ArrayView1<f64>) -> Vec<f64> {
    let n = chain.len();
    let centered = chain.to_owned() - chain.sum() / n as f64;
    (0..n)
        .map(|lag| {
            let sum_lag: f64 = (0..n - lag).map(|t| centered[t] * centered[t + lag]).sum();
            sum_lag / n as f64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2, array, Array2, Array3, Array4};
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use std::f64;

    /// Stacks per-step `(chains, parameters)` matrices into `(parameters, chains, draws)`.
    fn stack_steps(steps: &[Array2<f64>]) -> Array3<f64> {
        let (chains, parameters) = steps[0].dim();
        Array3::from_shape_fn((parameters, chains, steps.len()), |(p, c, t)| steps[t][[c, p]])
    }

    fn run_rhat_test(steps: &[Array2<f64>], expected: Array1<f64>, tol: f64) {
        let draws = stack_steps(steps);
        let rhat = potential_scale_reduction(draws.view()).unwrap();
        assert_abs_diff_eq!(rhat, expected, epsilon = tol);
    }

    #[test]
    fn test_rhat_1() {
        let data_step_0 = arr2(&[
            [0.0, 1.0, 0.0, 1.0], // chain 0
            [1.0, 2.0, 0.0, 2.0], // chain 1
            [0.0, 0.0, 0.0, 2.0], // chain 2
        ]);
        let data_step_1 = arr2(&[
            [1.0, 2.0, 2.0, 0.0], // chain 0
            [1.0, 1.0, 1.0, 1.0], // chain 1
            [0.0, 1.0, 0.0, 0.0], // chain 2
        ]);
        let expected = array![f64::consts::SQRT_2, 1.08012345, 0.89442719, 0.8660254];
        run_rhat_test(&[data_step_0, data_step_1], expected, 1e-7);
    }

    #[test]
    fn test_rhat_2() {
        let data_step_0 = arr2(&[
            [1.0, 0.0, 0.0, 1.0],
            [1.0, 0.0, 0.0, 1.0],
            [0.0, 1.0, 0.0, 2.0],
        ]);
        let data_step_1 = arr2(&[
            [1.0, 2.0, 0.0, 2.0],
            [1.0, 2.0, 0.0, 0.0],
            [2.0, 0.0, 1.0, 2.0],
        ]);
        let expected = array![f64::consts::FRAC_1_SQRT_2, 0.74535599, 1.0, 1.5];
        run_rhat_test(&[data_step_0, data_step_1], expected, 1e-7);
    }

    #[test]
    fn test_split_rhat_drops_middle_draw() {
        // Odd number of draws: the middle value must not matter.
        let a = Array3::from_shape_vec((1, 2, 5), vec![1., 2., 100., 3., 4., 2., 1., -50., 4., 3.])
            .unwrap();
        let b = Array3::from_shape_vec((1, 2, 5), vec![1., 2., 0., 3., 4., 2., 1., 0., 4., 3.])
            .unwrap();
        let split_a = split_potential_scale_reduction(a.view()).unwrap();
        let split_b = split_potential_scale_reduction(b.view()).unwrap();
        assert_eq!(split_a, split_b);

        // Equivalent to the unsplit statistic over four half-chains.
        let halves =
            Array3::from_shape_vec((1, 4, 2), vec![1., 2., 3., 4., 2., 1., 4., 3.]).unwrap();
        let unsplit = potential_scale_reduction(halves.view()).unwrap();
        assert_abs_diff_eq!(split_a[0], unsplit[0], epsilon = 1e-12);
    }

    #[test]
    fn test_split_rhat_detects_drift() {
        let n = 200;
        let drifting =
            Array3::from_shape_fn((1, 2, n), |(_, c, t)| t as f64 / n as f64 + c as f64 * 1e-3);
        let rhat = potential_scale_reduction(drifting.view()).unwrap()[0];
        let split = split_potential_scale_reduction(drifting.view()).unwrap()[0];
        assert!(rhat < 1.01, "unsplit rhat {rhat}");
        assert!(split > 1.5, "split rhat {split}");
    }

    #[test]
    fn test_constant_draws() {
        let draws = Array3::<f64>::from_elem((2, 3, 10), 0.1);
        let ess = effective_sample_size(draws.view()).unwrap();
        let rhat = potential_scale_reduction(draws.view()).unwrap();
        let split = split_potential_scale_reduction(draws.view()).unwrap();
        assert_eq!(ess, arr1(&[30.0, 30.0]));
        assert_eq!(rhat, arr1(&[1.0, 1.0]));
        assert_eq!(split, arr1(&[1.0, 1.0]));
    }

    #[test]
    fn test_single_chain_rhat_is_finite() {
        let draws = Array3::from_shape_vec((1, 1, 4), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let rhat = potential_scale_reduction(draws.view()).unwrap()[0];
        assert_abs_diff_eq!(rhat, (3.0_f64 / 4.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_single_draw_split_rhat_is_nan() {
        let draws = Array3::from_shape_vec((1, 2, 1), vec![1.0, 2.0]).unwrap();
        assert!(split_potential_scale_reduction(draws.view()).unwrap()[0].is_nan());
        assert!(effective_sample_size(draws.view()).unwrap()[0].is_nan());

        let constant = Array3::from_elem((1, 2, 1), 5.0);
        assert!(split_potential_scale_reduction(constant.view()).unwrap()[0].is_nan());
    }

    #[test]
    fn test_short_chains_give_nan_ess() {
        let draws = Array3::from_shape_vec((1, 2, 3), vec![1., 2., 3., 3., 2., 1.]).unwrap();
        assert!(effective_sample_size(draws.view()).unwrap()[0].is_nan());
    }

    #[test]
    fn test_invalid_shapes() {
        for shape in [(0, 2, 10), (1, 0, 10), (1, 2, 0)] {
            let draws = Array3::<f64>::zeros(shape);
            assert!(matches!(
                effective_sample_size(draws.view()),
                Err(Error::InvalidShape(_))
            ));
            assert!(matches!(
                potential_scale_reduction(draws.view()),
                Err(Error::InvalidShape(_))
            ));
        }
        let empty = Array4::<f64>::zeros((0, 1, 1, 10));
        assert!(matches!(
            effective_sample_size_batched(empty.view(), &DiagnosticsConfig::default()),
            Err(Error::InvalidShape(_))
        ));
    }

    #[test]
    fn test_iid_ess_close_to_sample_size() {
        let mut rng = SmallRng::seed_from_u64(42);
        let draws = Array3::from_shape_fn((3, 4, 1000), |_| rng.gen::<f64>());
        let ess = effective_sample_size(draws.view()).unwrap();
        for value in ess.iter() {
            assert!(*value > 3000.0 && *value < 5500.0, "ESS {value}");
        }
        let rhat = split_potential_scale_reduction(draws.view()).unwrap();
        for value in rhat.iter() {
            assert!((value - 1.0).abs() < 0.01, "Rhat {value}");
        }
    }

    #[test]
    fn test_autocorrelated_ess_is_small() {
        // AR(1) with coefficient 0.9: tau = (1 + 0.9) / (1 - 0.9) = 19.
        let mut rng = SmallRng::seed_from_u64(7);
        let (chains, n) = (4, 2000);
        let mut draws = Array3::<f64>::zeros((1, chains, n));
        for c in 0..chains {
            let mut x = 0.0;
            for t in 0..n {
                x = 0.9 * x + rng.gen::<f64>() - 0.5;
                draws[[0, c, t]] = x;
            }
        }
        let ess = effective_sample_size(draws.view()).unwrap()[0];
        let expected = (chains * n) as f64 / 19.0;
        assert!(ess > 0.5 * expected && ess < 2.0 * expected, "ESS {ess}");
    }

    #[test]
    fn test_strided_input() {
        let mut rng = SmallRng::seed_from_u64(3);
        let draws = Array3::from_shape_fn((2, 3, 50), |_| rng.gen::<f64>());
        let permuted = draws.clone().permuted_axes([2, 0, 1]);
        let standard = permuted.as_standard_layout().to_owned();
        let strided = standard.view().permuted_axes([1, 2, 0]);
        assert_abs_diff_eq!(
            effective_sample_size(draws.view()).unwrap(),
            effective_sample_size(strided).unwrap(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_batched_matches_single() {
        let mut rng = SmallRng::seed_from_u64(11);
        let draws = Array4::from_shape_fn((5, 3, 4, 120), |(b, _, _, _)| {
            b as f64 + rng.gen::<f64>()
        });
        let config = DiagnosticsConfig::new(3);
        let ess = effective_sample_size_batched(draws.view(), &config).unwrap();
        let rhat = potential_scale_reduction_batched(draws.view(), &config).unwrap();
        let split = split_potential_scale_reduction_batched(draws.view(), &config).unwrap();
        assert_eq!(ess.dim(), (5, 3));
        for b in 0..5 {
            let element = draws.index_axis(Axis(0), b);
            assert_eq!(ess.row(b), effective_sample_size(element).unwrap());
            assert_eq!(rhat.row(b), potential_scale_reduction(element).unwrap());
            assert_eq!(split.row(b), split_potential_scale_reduction(element).unwrap());
        }
    }

    #[test]
    fn test_batched_propagates_errors() {
        let draws = Array4::<f64>::zeros((3, 1, 2, 8));
        let failing = |element: ArrayView3<f64>| -> Result<Array1<f64>> {
            if element[[0, 0, 0]] == 0.0 {
                Err(Error::InvalidShape("rejected".to_string()))
            } else {
                Ok(Array1::zeros(1))
            }
        };
        assert!(batched(draws.view(), failing, &DiagnosticsConfig::new(2)).is_err());
    }

    fn run_autocov_test(data: ArrayView1<f64>, expected: &[f64]) {
        let bf = autocov_bf(data);
        let fft = autocov_fft(data);
        assert_eq!(bf.len(), expected.len());
        for ((b, f), e) in bf.iter().zip(&fft).zip(expected) {
            assert_abs_diff_eq!(*b, *e, epsilon = 1e-12);
            assert_abs_diff_eq!(*f, *e, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_autocov_small() {
        let data = arr1(&[1.0, 2.0, 3.0, 4.0]);
        run_autocov_test(data.view(), &[1.25, 0.3125, -0.375, -0.5625]);
    }

    #[test]
    fn test_autocov_fft_matches_bf_long() {
        let mut rng = SmallRng::seed_from_u64(5);
        let data = Array1::from_shape_fn(257, |_| rng.gen::<f64>());
        let bf = autocov_bf(data.view());
        let fft = autocov_fft(data.view());
        for (b, f) in bf.iter().zip(&fft) {
            assert_abs_diff_eq!(*b, *f, epsilon = 1e-10);
        }
    }
}
