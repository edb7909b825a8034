//! Boundary with the external sampling engine.
//!
//! The engine itself (transition kernel, adaptation, integration) lives outside this crate. It
//! is reached through [`SamplingEngine`], builds nothing itself, and reports everything through
//! [`Writer`] sinks, an [`Interrupt`] hook and an [`EngineLogger`].

use ndarray::ArrayView2;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::SampleParameters;
use crate::error::{Error, Result};
use crate::var_context::VariableContext;
use crate::writer::Writer;

/// A model instantiated on its data.
pub trait Model: Send + Sync {
    /// Names of the constrained values of one draw: parameters, then optionally the transformed
    /// parameters, then optionally the generated quantities.
    fn param_names(&self, transformed_parameters: bool, generated_quantities: bool) -> Vec<String>;
}

/// Cooperative cancellation hook, polled by the engine between iterations.
pub trait Interrupt: Sync {
    fn interrupted(&self) -> bool;
}

/// Never interrupts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInterrupt;

impl Interrupt for NoInterrupt {
    fn interrupted(&self) -> bool {
        false
    }
}

/// Interrupt raised from another thread through [`FlagInterrupt::trigger`].
#[derive(Debug, Default)]
pub struct FlagInterrupt {
    flag: AtomicBool,
}

impl FlagInterrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl Interrupt for FlagInterrupt {
    fn interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Text sink of the engine, one method per severity.
pub trait EngineLogger: Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
    fn fatal(&self, message: &str);
}

/// Forwards engine messages to the `log` facade under the `slimp::engine` target.
///
/// The engine emits empty lines as separators; they are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogForwarder;

impl LogForwarder {
    const TARGET: &'static str = "slimp::engine";

    fn forward(level: log::Level, message: &str) {
        if !message.is_empty() {
            log::log!(target: Self::TARGET, level, "{message}");
        }
    }
}

impl EngineLogger for LogForwarder {
    fn debug(&self, message: &str) {
        Self::forward(log::Level::Debug, message);
    }

    fn info(&self, message: &str) {
        Self::forward(log::Level::Info, message);
    }

    fn warn(&self, message: &str) {
        Self::forward(log::Level::Warn, message);
    }

    fn error(&self, message: &str) {
        Self::forward(log::Level::Error, message);
    }

    fn fatal(&self, message: &str) {
        Self::forward(log::Level::Error, message);
    }
}

/// Writer sinks handed to the engine, one per chain.
pub type ChainWriters<'w, 'a> = [&'w mut (dyn Writer + Send + 'a)];

/// The external sampler.
///
/// Both runs return the engine's status code: 0 on success, anything else is an engine-level
/// failure. Errors raised by the writers are returned as they are.
pub trait SamplingEngine: Sync {
    /// Names of the per-draw values the sampler adds in front of the model values
    /// (`lp__`, `accept_stat__`, ...).
    fn sampler_param_names(&self, model: &dyn Model) -> Vec<String>;

    #[allow(clippy::too_many_arguments)]
    fn sample(
        &self,
        model: &dyn Model,
        init_contexts: &[VariableContext],
        parameters: &SampleParameters,
        interrupt: &dyn Interrupt,
        logger: &dyn EngineLogger,
        init_writers: &mut ChainWriters<'_, '_>,
        sample_writers: &mut ChainWriters<'_, '_>,
        diagnostic_writers: &mut ChainWriters<'_, '_>,
    ) -> Result<i32>;

    /// Generates quantities from existing draws. `draws[c]` holds the parameters of chain `c`
    /// with one row per parameter and one column per draw.
    fn generate(
        &self,
        model: &dyn Model,
        draws: &[ArrayView2<f64>],
        seed: u32,
        interrupt: &dyn Interrupt,
        logger: &dyn EngineLogger,
        writers: &mut ChainWriters<'_, '_>,
    ) -> Result<i32>;
}

/// Converts an engine status code into a result.
pub fn check_status(code: i32) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(Error::EngineFailure(code))
    }
}

pub type ModelFactory = Box<
    dyn Fn(&VariableContext, u32, &dyn EngineLogger) -> Result<Box<dyn Model>> + Send + Sync,
>;

/// Explicit name → constructor mapping of the available models.
#[derive(Default)]
pub struct ModelRegistry {
    factories: BTreeMap<String, ModelFactory>,
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.names())
            .finish()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `name`, replacing any previous registration.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&VariableContext, u32, &dyn EngineLogger) -> Result<Box<dyn Model>>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        if self.factories.insert(name.clone(), Box::new(factory)).is_some() {
            log::debug!("Replacing model {name}");
        }
        self
    }

    /// Instantiates the model `name` on `data`.
    pub fn get(
        &self,
        name: &str,
        data: &VariableContext,
        seed: u32,
        logger: &dyn EngineLogger,
    ) -> Result<Box<dyn Model>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))?;
        factory(data, seed, logger)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}
