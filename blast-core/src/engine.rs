//! Engine Blast
//!
//! Configuração do runtime e tabela de funções externas chamadas via `call`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::{BlastConfig, ENV_CONFIG, MAX_EXTERNAL_PARAMETERS};
use crate::error::{BlastError, BlastResult};

/// Função externa: parâmetros escalares, retorno escalar
pub type ExternalFn = Arc<dyn Fn(&[f32]) -> f32 + Send + Sync>;

/// Entrada da tabela de funções externas
#[derive(Clone)]
pub struct ExternalFunction {
    pub id: u8,
    pub name: String,
    pub parameter_count: usize,
    func: ExternalFn,
}

impl ExternalFunction {
    #[inline]
    pub fn call(&self, params: &[f32]) -> f32 {
        (self.func)(params)
    }
}

impl fmt::Debug for ExternalFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalFunction")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parameter_count", &self.parameter_count)
            .finish()
    }
}

/// Engine: configuração + funções externas
#[derive(Debug, Clone, Default)]
pub struct BlastEngine {
    config: BlastConfig,
    functions: HashMap<u8, ExternalFunction>,
}

impl BlastEngine {
    pub fn new(config: BlastConfig) -> Self {
        Self {
            config,
            functions: HashMap::new(),
        }
    }

    /// Engine com a configuração do ambiente
    pub fn from_env() -> Self {
        Self::new(ENV_CONFIG.clone())
    }

    pub fn config(&self) -> &BlastConfig {
        &self.config
    }

    /// Registra função externa sob `id`
    pub fn register(
        &mut self,
        id: u8,
        name: &str,
        parameter_count: usize,
        func: impl Fn(&[f32]) -> f32 + Send + Sync + 'static,
    ) -> BlastResult<()> {
        if parameter_count > MAX_EXTERNAL_PARAMETERS {
            return Err(BlastError::TooManyParameters {
                count: parameter_count,
                max: MAX_EXTERNAL_PARAMETERS,
                at: 0,
            });
        }
        debug!(id, name, parameter_count, "external function registered");
        self.functions.insert(
            id,
            ExternalFunction {
                id,
                name: name.to_string(),
                parameter_count,
                func: Arc::new(func),
            },
        );
        Ok(())
    }

    /// Builder-style [`register`](Self::register)
    pub fn with_function(
        mut self,
        id: u8,
        name: &str,
        parameter_count: usize,
        func: impl Fn(&[f32]) -> f32 + Send + Sync + 'static,
    ) -> BlastResult<Self> {
        self.register(id, name, parameter_count, func)?;
        Ok(self)
    }

    pub fn function(&self, id: u8) -> BlastResult<&ExternalFunction> {
        self.functions.get(&id).ok_or(BlastError::UnknownExternalFunction(id))
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }
}
