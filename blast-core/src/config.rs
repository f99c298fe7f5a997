//! Configuração do Blast
//!
//! Valores default podem ser sobrescritos por variáveis de ambiente ou por um
//! arquivo `.env` (carregado uma única vez).

use std::env;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

// Carrega .env na primeira leitura de configuração
static DOTENV_INIT: Lazy<()> = Lazy::new(|| {
    let _ = dotenv::dotenv();
});

#[inline]
fn ensure_loaded() {
    let _ = &*DOTENV_INIT;
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    ensure_loaded();
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Tamanho default da stack de um package (bytes)
pub const DEFAULT_STACK_SIZE: u16 = 64;

/// Número máximo de parâmetros de uma função externa
pub const MAX_EXTERNAL_PARAMETERS: usize = 4;

/// Configuração do runtime Blast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlastConfig {
    /// Tamanho da stack em bytes (múltiplo de 4)
    pub stack_size: u16,
    /// Loga falhas suaves (índice CDATA fora do range, etc.)
    pub trace: bool,
    /// Registros por chunk no executor paralelo
    pub ssmd_chunk: usize,
}

impl Default for BlastConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            trace: false,
            ssmd_chunk: 256,
        }
    }
}

impl BlastConfig {
    /// Lê configuração de `BLAST_STACK_SIZE`, `BLAST_TRACE` e `BLAST_SSMD_CHUNK`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            stack_size: env_or("BLAST_STACK_SIZE", defaults.stack_size) & !3,
            trace: env_or("BLAST_TRACE", defaults.trace),
            ssmd_chunk: env_or("BLAST_SSMD_CHUNK", defaults.ssmd_chunk).max(1),
        }
    }

    /// Define tamanho da stack (arredonda para baixo a múltiplo de 4)
    pub fn with_stack_size(mut self, bytes: u16) -> Self {
        self.stack_size = bytes & !3;
        self
    }

    /// Habilita trace de falhas suaves
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Define tamanho do chunk do executor paralelo
    pub fn with_ssmd_chunk(mut self, records: usize) -> Self {
        self.ssmd_chunk = records.max(1);
        self
    }
}

/// Configuração lida do ambiente (cache)
pub static ENV_CONFIG: Lazy<BlastConfig> = Lazy::new(BlastConfig::from_env);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BlastConfig::default();
        assert_eq!(config.stack_size, DEFAULT_STACK_SIZE);
        assert!(!config.trace);
    }

    #[test]
    fn test_builders_round_values() {
        let config = BlastConfig::default()
            .with_stack_size(67)
            .with_ssmd_chunk(0)
            .with_trace(true);
        assert_eq!(config.stack_size, 64);
        assert_eq!(config.ssmd_chunk, 1);
        assert!(config.trace);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = BlastConfig::default().with_trace(true);
        let json = serde_json::to_string(&config).unwrap();
        let back: BlastConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
