//! Validação checked/fast
//!
//! Os checks de consistência (tamanho de vetor, operandos constantes entre
//! registros, bounds de índice de dados, alvo de cdataref) só existem no caminho
//! `Checked`. O caminho `Fast` confia no bytecode: violações produzem resultados
//! inconsistentes (ou panic de bounds), nunca erro reportado.

/// Marcador de modo de validação (monomorfizado nos interpretadores)
pub trait Validation: Copy + Default + Send + Sync + 'static {
    /// Checks de consistência habilitados
    const CHECKED: bool;
}

/// Todos os checks ativos
#[derive(Debug, Clone, Copy, Default)]
pub struct Checked;

/// Sem checks de consistência
#[derive(Debug, Clone, Copy, Default)]
pub struct Fast;

impl Validation for Checked {
    const CHECKED: bool = true;
}

impl Validation for Fast {
    const CHECKED: bool = false;
}

/// Modo default: `Checked` em debug ou com a feature `validation`
#[cfg(any(debug_assertions, feature = "validation"))]
pub type DefaultValidation = Checked;

/// Modo default: `Fast` em release
#[cfg(not(any(debug_assertions, feature = "validation")))]
pub type DefaultValidation = Fast;
