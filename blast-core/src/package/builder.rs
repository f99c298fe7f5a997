//! Builder de packages
//!
//! Declara variáveis (nome, tipo, valores iniciais), recebe o código já emitido
//! e produz o package em qualquer modo executável.

use serde::{Deserialize, Serialize};

use crate::config::{BlastConfig, DEFAULT_STACK_SIZE};
use crate::error::{BlastError, BlastResult};
use crate::opcode::ID_BASE;

use super::metadata::{BlastDataType, pack_metadata};
use super::{BlastPackage, LanguageVersion, PackageFlags, PackageMode};

/// Número máximo de slots de dados endereçáveis por `id`
pub const MAX_DATA_SLOTS: usize = (u8::MAX - ID_BASE) as usize + 1;

/// Variável declarada no package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: String,
    /// Primeiro slot de dados
    pub slot: u8,
    pub vector_size: u8,
    pub datatype: BlastDataType,
}

impl VariableInfo {
    /// Byte `id` que referencia a variável no código
    pub fn id(&self) -> u8 {
        ID_BASE + self.slot
    }
}

/// Builder de [`BlastPackage`]
#[derive(Debug, Clone)]
pub struct BlastPackageBuilder {
    variables: Vec<VariableInfo>,
    data: Vec<f32>,
    code: Vec<u8>,
    stack_size: u16,
    language: LanguageVersion,
    flags: PackageFlags,
}

impl Default for BlastPackageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlastPackageBuilder {
    pub fn new() -> Self {
        Self {
            variables: Vec::new(),
            data: Vec::new(),
            code: Vec::new(),
            stack_size: DEFAULT_STACK_SIZE,
            language: LanguageVersion::BlastScript1,
            flags: PackageFlags::NONE,
        }
    }

    /// Builder com o tamanho de stack da configuração
    pub fn from_config(config: &BlastConfig) -> Self {
        Self::new().with_stack_size(config.stack_size)
    }

    /// Define tamanho da stack em bytes (múltiplo de 4)
    pub fn with_stack_size(mut self, bytes: u16) -> Self {
        self.stack_size = bytes & !3;
        self
    }

    pub fn with_language(mut self, language: LanguageVersion) -> Self {
        self.language = language;
        self
    }

    pub fn with_flags(mut self, flags: PackageFlags) -> Self {
        self.flags = self.flags | flags;
        self
    }

    /// Define o código
    pub fn with_code(mut self, code: impl Into<Vec<u8>>) -> Self {
        self.code = code.into();
        self
    }

    /// Substitui o código (uso com `&mut`)
    pub fn set_code(&mut self, code: impl Into<Vec<u8>>) -> &mut Self {
        self.code = code.into();
        self
    }

    /// Declara variável com valores iniciais (largura = número de valores)
    pub fn variable(
        &mut self,
        name: &str,
        datatype: BlastDataType,
        values: &[f32],
    ) -> BlastResult<u8> {
        if values.is_empty() || values.len() > 4 {
            return Err(BlastError::InvalidPackage(format!(
                "variable '{}' must have 1-4 components, got {}",
                name,
                values.len()
            )));
        }
        if self.data.len() + values.len() > MAX_DATA_SLOTS {
            return Err(BlastError::InvalidPackage(format!(
                "variable '{}' exceeds {} data slots",
                name, MAX_DATA_SLOTS
            )));
        }

        let slot = self.data.len() as u8;
        self.variables.push(VariableInfo {
            name: name.to_string(),
            slot,
            vector_size: values.len() as u8,
            datatype,
        });
        self.data.extend_from_slice(values);
        Ok(slot)
    }

    /// Declara escalar numérico
    pub fn scalar(&mut self, name: &str, value: f32) -> BlastResult<u8> {
        self.variable(name, BlastDataType::Numeric, &[value])
    }

    /// Declara vetor numérico
    pub fn vector(&mut self, name: &str, values: &[f32]) -> BlastResult<u8> {
        self.variable(name, BlastDataType::Numeric, values)
    }

    /// Declara slot Bool32 com bits crus
    pub fn bits(&mut self, name: &str, bits: u32) -> BlastResult<u8> {
        self.variable(name, BlastDataType::Bool32, &[f32::from_bits(bits)])
    }

    pub fn variables(&self) -> &[VariableInfo] {
        &self.variables
    }

    pub fn slot_of(&self, name: &str) -> Option<u8> {
        self.variables.iter().find(|v| v.name == name).map(|v| v.slot)
    }

    /// Metadata de dados seguida da metadata dos slots de stack
    fn metadata(&self) -> Vec<u8> {
        let stack_slots = (self.stack_size >> 2) as usize;
        let mut metadata = Vec::with_capacity(self.data.len() + stack_slots);
        for variable in &self.variables {
            let byte = pack_metadata(variable.datatype, variable.vector_size);
            metadata.extend(std::iter::repeat_n(byte, variable.vector_size as usize));
        }
        metadata.extend(std::iter::repeat_n(
            pack_metadata(BlastDataType::Numeric, 1),
            stack_slots,
        ));
        metadata
    }

    /// Monta o package no modo dado
    pub fn build(&self, mode: PackageMode) -> BlastResult<BlastPackage> {
        let mut code = self.code.clone();
        let mut metadata = self.metadata();
        if self.flags.contains(PackageFlags::ALIGN_4) {
            code.resize(code.len().next_multiple_of(4), 0);
            metadata.resize(metadata.len().next_multiple_of(4), 0);
        }

        let data: Vec<u8> = self.data.iter().flat_map(|v| v.to_ne_bytes()).collect();

        BlastPackage::compiler(code.len(), metadata.len(), data.len(), self.stack_size as usize)?
            .with_language(self.language)
            .with_flags(self.flags)
            .convert(mode, &code, &metadata, &data)
    }
}
