//! Sampling and generated-quantities runs: model lookup, output allocation, one writer per
//! chain, engine call, column naming.

use ndarray::{Array1, Array3, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;

use crate::config::{DiagnosticsConfig, GenerateParameters, SampleParameters};
use crate::engine::{
    check_status, EngineLogger, Interrupt, LogForwarder, ModelRegistry, NoInterrupt,
    SamplingEngine,
};
use crate::error::{Error, Result};
use crate::summary::{hmc_diagnostics, summary, HmcDiagnostics, Summary};
use crate::var_context::VariableContext;
use crate::writer::{chain_writers, ArrayWriter, NullWriter, Writer};

/// Column of the 1-based chain identifier.
pub const CHAIN_COLUMN: &str = "chain__";
/// Column of the 0-based draw identifier.
pub const DRAW_COLUMN: &str = "draw__";
/// Number of identifier columns in front of the engine output.
pub const ID_COLUMNS: usize = 2;

/// Result of a sampling run.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOutput {
    /// Shape `(columns, chains, draws)`.
    pub array: Array3<f64>,
    /// One name per column of `array`.
    pub columns: Vec<String>,
    /// Names of the model parameters, without transformed parameters and generated quantities.
    pub parameters_columns: Vec<String>,
}

impl SampleOutput {
    pub fn num_chains(&self) -> usize {
        self.array.len_of(Axis(1))
    }

    pub fn num_draws(&self) -> usize {
        self.array.len_of(Axis(2))
    }

    fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| Error::UnknownName {
                namespace: "column",
                name: name.to_string(),
            })
    }

    /// Draws of one column, shape `(chains, draws)`.
    pub fn column(&self, name: &str) -> Result<ArrayView2<f64>> {
        Ok(self.array.index_axis(Axis(0), self.column_index(name)?))
    }

    /// Copy of the given columns, shape `(names, chains, draws)`.
    pub fn select(&self, names: &[String]) -> Result<Array3<f64>> {
        let indices = names
            .iter()
            .map(|name| self.column_index(name))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.array.select(Axis(0), &indices))
    }

    /// Draws of the model parameters, ready to be fed to [`generate_quantities`].
    pub fn parameters(&self) -> Result<Array3<f64>> {
        self.select(&self.parameters_columns)
    }

    /// Summary of every column except the identifiers.
    pub fn summary(&self, quantiles: &[f64]) -> Result<Summary> {
        let draws = self
            .array
            .slice_axis(Axis(0), (ID_COLUMNS..).into());
        summary(draws, &self.columns[ID_COLUMNS..], quantiles)
    }

    pub fn hmc_diagnostics(&self, max_depth: u32) -> Result<HmcDiagnostics> {
        hmc_diagnostics(self.array.view(), &self.columns, max_depth)
    }
}

/// Result of a generated-quantities run.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedQuantities {
    /// Shape `(columns, chains, draws)`.
    pub array: Array3<f64>,
    pub columns: Vec<String>,
}

/// Allocates the output array with the identifier columns filled in.
fn allocate(columns: usize, chains: usize, draws: usize) -> Array3<f64> {
    let mut array = Array3::zeros((columns, chains, draws));
    let draw_ids = Array1::range(0.0, draws as f64, 1.0);
    for (chain, mut view) in array.axis_iter_mut(Axis(1)).enumerate() {
        view.row_mut(0).fill((chain + 1) as f64);
        view.row_mut(1).assign(&draw_ids);
    }
    array
}

/// Column names from the names announced to the first writer, after `skip`.
fn column_names(writers: &[ArrayWriter<'_>], skip: usize, expected: usize) -> Result<Vec<String>> {
    let announced = writers.first().map(|w| w.names()).unwrap_or_default();
    let announced = announced.get(skip..).unwrap_or_default();
    if announced.len() != expected {
        return Err(Error::ShapeMismatch {
            what: "names",
            expected,
            actual: announced.len(),
        });
    }
    Ok([CHAIN_COLUMN, DRAW_COLUMN]
        .into_iter()
        .map(String::from)
        .chain(announced.iter().cloned())
        .collect())
}

fn check_chains(num_chains: usize) -> Result<()> {
    if num_chains == 0 {
        return Err(Error::InvalidShape("no chains requested".to_string()));
    }
    Ok(())
}

/// Samples from the model registered as `<name>_sampler`.
pub fn sample(
    registry: &ModelRegistry,
    engine: &dyn SamplingEngine,
    name: &str,
    data: &VariableContext,
    parameters: &SampleParameters,
) -> Result<SampleOutput> {
    sample_with(
        registry,
        engine,
        name,
        data,
        parameters,
        &NoInterrupt,
        &LogForwarder,
    )
}

/// [`sample`] with caller-provided interrupt and logger.
pub fn sample_with(
    registry: &ModelRegistry,
    engine: &dyn SamplingEngine,
    name: &str,
    data: &VariableContext,
    parameters: &SampleParameters,
    interrupt: &dyn Interrupt,
    logger: &dyn EngineLogger,
) -> Result<SampleOutput> {
    check_chains(parameters.num_chains)?;
    let model = registry.get(&format!("{name}_sampler"), data, parameters.seed, logger)?;

    let sampler_names = engine.sampler_param_names(model.as_ref());
    let model_names = model.param_names(true, true);
    let span = sampler_names.len() + model_names.len();
    let num_draws = parameters.num_draws();
    log::debug!(
        "Sampling {name}: {} chains, {num_draws} draws, {span} columns",
        parameters.num_chains
    );

    let mut array = allocate(ID_COLUMNS + span, parameters.num_chains, num_draws);
    let columns = {
        let mut writers = chain_writers(&mut array, ID_COLUMNS, 0);
        let init_contexts = vec![VariableContext::new(); parameters.num_chains];
        let mut init_sinks = vec![NullWriter; parameters.num_chains];
        let mut diagnostic_sinks = vec![NullWriter; parameters.num_chains];

        let status = engine.sample(
            model.as_ref(),
            &init_contexts,
            parameters,
            interrupt,
            logger,
            &mut init_sinks
                .iter_mut()
                .map(|w| w as &mut (dyn Writer + Send))
                .collect::<Vec<_>>(),
            &mut writers
                .iter_mut()
                .map(|w| w as &mut (dyn Writer + Send))
                .collect::<Vec<_>>(),
            &mut diagnostic_sinks
                .iter_mut()
                .map(|w| w as &mut (dyn Writer + Send))
                .collect::<Vec<_>>(),
        )?;
        check_status(status)?;
        column_names(&writers, 0, span)?
    };

    Ok(SampleOutput {
        array,
        columns,
        parameters_columns: model.param_names(false, false),
    })
}

/// Generates the quantities of the model registered as `<name>_<variant>` from parameter draws
/// of shape `(parameters, chains, draws)`.
pub fn generate_quantities(
    registry: &ModelRegistry,
    engine: &dyn SamplingEngine,
    name: &str,
    variant: &str,
    data: &VariableContext,
    draws: ArrayView3<f64>,
    parameters: &GenerateParameters,
) -> Result<GeneratedQuantities> {
    let (num_parameters, num_chains, num_draws) = draws.dim();
    check_chains(num_chains)?;
    if parameters.num_chains != num_chains {
        return Err(Error::ShapeMismatch {
            what: "chains",
            expected: parameters.num_chains,
            actual: num_chains,
        });
    }

    let logger = LogForwarder;
    let model = registry.get(&format!("{name}_{variant}"), data, parameters.seed, &logger)?;
    let model_parameters = model.param_names(false, false);
    let full = model.param_names(false, true);
    if num_parameters != model_parameters.len() {
        return Err(Error::ShapeMismatch {
            what: "draws",
            expected: model_parameters.len(),
            actual: num_parameters,
        });
    }
    let span = full.len().saturating_sub(model_parameters.len());
    let skip = model_parameters.len();

    let mut array = allocate(ID_COLUMNS + span, num_chains, num_draws);
    let columns = {
        let mut writers = chain_writers(&mut array, ID_COLUMNS, skip);
        let per_chain: Vec<_> = draws.axis_iter(Axis(1)).collect();
        let status = engine.generate(
            model.as_ref(),
            &per_chain,
            parameters.seed,
            &NoInterrupt,
            &logger,
            &mut writers
                .iter_mut()
                .map(|w| w as &mut (dyn Writer + Send))
                .collect::<Vec<_>>(),
        )?;
        check_status(status)?;
        column_names(&writers, skip, span)?
    };

    Ok(GeneratedQuantities { array, columns })
}

/// Samples `replicates` variants of one context on a dedicated pool.
///
/// Replicate `r` samples a copy of `context` modified by `update_context(&mut copy, r)`, then
/// hands its output to `update_results(&output, r)`. Replicates complete in no particular order;
/// the first error aborts the whole call.
#[allow(clippy::too_many_arguments)]
pub fn parallel_sample<U, R>(
    registry: &ModelRegistry,
    engine: &dyn SamplingEngine,
    name: &str,
    context: &VariableContext,
    parameters: &SampleParameters,
    replicates: usize,
    update_context: U,
    update_results: R,
    config: &DiagnosticsConfig,
) -> Result<()>
where
    U: Fn(&mut VariableContext, usize) -> Result<()> + Sync,
    R: Fn(&SampleOutput, usize) -> Result<()> + Sync,
{
    let pool = config.thread_pool()?;
    log::info!(
        "Sampling {replicates} replicates of {name} on {} workers",
        pool.current_num_threads()
    );
    pool.install(|| {
        (0..replicates).into_par_iter().try_for_each(|replicate| {
            let mut data = context.clone();
            update_context(&mut data, replicate)?;
            let output = sample(registry, engine, name, &data, parameters)?;
            update_results(&output, replicate)
        })
    })
}
