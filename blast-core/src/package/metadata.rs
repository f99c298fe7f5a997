//! Metadata de slots
//!
//! Um byte por slot endereçável (dados seguidos da stack):
//! nibble baixo = tamanho do vetor (1-4), nibble alto = tipo de dado.

use serde::{Deserialize, Serialize};

/// Tipo de dado de um slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BlastDataType {
    /// f32 numérico
    Numeric = 0,
    /// Identificador uniforme entre registros SSMD
    Id = 1,
    /// Bits crus (u32) armazenados no slot
    Bool32 = 2,
    /// Elemento de bloco CDATA
    CData = 3,
}

impl BlastDataType {
    /// Decodifica do nibble alto (valores desconhecidos caem em Numeric)
    pub fn from_nibble(nibble: u8) -> Self {
        match nibble & 0x0F {
            1 => Self::Id,
            2 => Self::Bool32,
            3 => Self::CData,
            _ => Self::Numeric,
        }
    }
}

/// Empacota tipo e tamanho do vetor em um byte
#[inline(always)]
pub const fn pack_metadata(datatype: BlastDataType, vector_size: u8) -> u8 {
    ((datatype as u8) << 4) | (vector_size & 0x0F)
}

/// Tamanho do vetor de um byte de metadata (0 é tratado como 1)
#[inline(always)]
pub fn vector_size_of(meta: u8) -> u8 {
    (meta & 0x0F).max(1)
}

/// Tipo de dado de um byte de metadata
#[inline(always)]
pub fn datatype_of(meta: u8) -> BlastDataType {
    BlastDataType::from_nibble(meta >> 4)
}

/// Define a metadata de `vector_size` slots consecutivos a partir de `slot`
pub fn set_metadata(metadata: &mut [u8], slot: usize, datatype: BlastDataType, vector_size: u8) {
    let byte = pack_metadata(datatype, vector_size);
    let end = (slot + vector_size.max(1) as usize).min(metadata.len());
    if slot < end {
        metadata[slot..end].fill(byte);
    }
}

/// Re-tipa um slot mantendo o tamanho do vetor
pub fn retag_metadata(metadata: &mut [u8], slot: usize, datatype: BlastDataType) {
    if let Some(meta) = metadata.get_mut(slot) {
        *meta = pack_metadata(datatype, vector_size_of(*meta));
    }
}
