//! Codec CDATA
//!
//! Blocos de constantes embutidos no segmento de código:
//! `[encoding tag][length: u16 BE][payload]`, alcançáveis apenas por `cdataref`.
//! Elementos multi-byte são little-endian.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{BlastError, BlastResult};
use crate::opcode::{BlastOpcode, CDATA_BASE};
use crate::validation::Validation;

/// Bytes do header de um bloco (tag + tamanho)
pub const CDATA_HEADER_SIZE: usize = 3;

/// Encodings de bloco CDATA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CDataEncoding {
    /// f32 sem conversão
    None = 0,
    U8Fp32 = 1,
    S8Fp32 = 2,
    /// Minifloat E4M3 (sinal, expoente de 4 bits com bias 7, mantissa de 3 bits,
    /// satura em ±480), não um cast de byte como `U8Fp32`/`S8Fp32`
    Fp8Fp32 = 3,
    /// Metade alta de um f32
    Fp16Fp32 = 4,
    Fp32Fp32 = 5,
    I8I32 = 6,
    I16I32 = 7,
    I32I32 = 8,
    /// Bits crus
    Bool32 = 9,
    /// Bytes genéricos
    CData = 10,
}

impl CDataEncoding {
    /// Todos os encodings, em ordem de tag
    pub const ALL: [CDataEncoding; 11] = [
        Self::None,
        Self::U8Fp32,
        Self::S8Fp32,
        Self::Fp8Fp32,
        Self::Fp16Fp32,
        Self::Fp32Fp32,
        Self::I8I32,
        Self::I16I32,
        Self::I32I32,
        Self::Bool32,
        Self::CData,
    ];

    /// Encoding de um byte de header (`0x30 + encoding`)
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag.checked_sub(CDATA_BASE)? as usize).copied()
    }

    /// Byte de header do encoding
    pub fn tag(&self) -> u8 {
        CDATA_BASE + *self as u8
    }

    /// Bytes por elemento
    pub fn byte_size(&self) -> usize {
        match self {
            Self::U8Fp32 | Self::S8Fp32 | Self::Fp8Fp32 | Self::I8I32 | Self::CData => 1,
            Self::Fp16Fp32 | Self::I16I32 => 2,
            Self::None | Self::Fp32Fp32 | Self::I32I32 | Self::Bool32 => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::U8Fp32 => "u8_fp32",
            Self::S8Fp32 => "s8_fp32",
            Self::Fp8Fp32 => "fp8_fp32",
            Self::Fp16Fp32 => "fp16_fp32",
            Self::Fp32Fp32 => "fp32_fp32",
            Self::I8I32 => "i8_i32",
            Self::I16I32 => "i16_i32",
            Self::I32I32 => "i32_i32",
            Self::Bool32 => "bool32",
            Self::CData => "cdata",
        }
    }

    /// Encoding suporta escrita de vetores (apenas os baseados em f32)
    pub fn supports_wide_write(&self) -> bool {
        matches!(self, Self::None | Self::Fp32Fp32)
    }
}

impl std::str::FromStr for CDataEncoding {
    type Err = BlastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .iter()
            .find(|e| e.name() == lower)
            .copied()
            .ok_or_else(|| BlastError::UnknownCDataEncoding(s.to_string()))
    }
}

impl std::fmt::Display for CDataEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LEITORES ESCALARES
// ═══════════════════════════════════════════════════════════════════════════════

#[inline(always)]
pub fn map_cdata_u8(byte: u8) -> f32 {
    byte as f32
}

#[inline(always)]
pub fn map_cdata_s8(byte: u8) -> f32 {
    byte as i8 as f32
}

/// Minifloat 1-4-3: sinal, expoente de 4 bits (bias 7), mantissa de 3 bits
#[inline]
pub fn map_cdata_fp8(byte: u8) -> f32 {
    let sign = if byte & 0x80 != 0 { -1.0 } else { 1.0 };
    let exponent = ((byte >> 3) & 0x0F) as i32;
    let mantissa = (byte & 0x07) as f32;
    let magnitude = if exponent == 0 {
        mantissa * (2.0f32).powi(-9)
    } else {
        (1.0 + mantissa / 8.0) * (2.0f32).powi(exponent - 7)
    };
    sign * magnitude
}

/// Os dois bytes ocupam a metade alta do f32 (metade baixa zerada)
#[inline(always)]
pub fn map_cdata_fp16(bytes: [u8; 2]) -> f32 {
    f32::from_le_bytes([0, 0, bytes[0], bytes[1]])
}

#[inline(always)]
pub fn map_cdata_f32(bytes: [u8; 4]) -> f32 {
    f32::from_le_bytes(bytes)
}

#[inline(always)]
pub fn map_cdata_i16(bytes: [u8; 2]) -> f32 {
    i16::from_le_bytes(bytes) as f32
}

#[inline(always)]
pub fn map_cdata_i32(bytes: [u8; 4]) -> f32 {
    i32::from_le_bytes(bytes) as f32
}

#[inline(always)]
pub fn map_cdata_bool32(bytes: [u8; 4]) -> f32 {
    f32::from_bits(u32::from_le_bytes(bytes))
}

/// Codifica em minifloat 1-4-3 truncando a mantissa
pub fn encode_fp8(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    let sign = if value.is_sign_negative() { 0x80 } else { 0 };
    let magnitude = value.abs();

    if magnitude >= 480.0 {
        return sign | 0x7F;
    }
    if magnitude < (2.0f32).powi(-6) {
        return sign | (magnitude * 512.0) as u8;
    }

    let bits = magnitude.to_bits();
    let exponent = ((bits >> 23) & 0xFF) as i32 - 127 + 7;
    let mantissa = ((bits >> 20) & 0x07) as u8;
    sign | ((exponent as u8) << 3) | mantissa
}

/// Codifica a metade alta de um f32 (truncamento)
#[inline(always)]
pub fn encode_fp16(value: f32) -> [u8; 2] {
    let bytes = value.to_le_bytes();
    [bytes[2], bytes[3]]
}

// ═══════════════════════════════════════════════════════════════════════════════
// BLOCOS
// ═══════════════════════════════════════════════════════════════════════════════

/// Bloco resolvido a partir de um `cdataref`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CDataRef {
    /// Posição do header
    pub offset: usize,
    /// Bytes de conteúdo
    pub length: usize,
    pub encoding: CDataEncoding,
}

impl CDataRef {
    pub fn element_count(&self) -> usize {
        cdata_element_count(self.encoding, self.length)
    }
}

/// Resolve o `cdataref` em `code_pointer`
///
/// `offset = code_pointer - delta + 1`. A validação do opcode de origem e do tag
/// de destino só acontece no modo checked.
pub fn follow_cdataref<V: Validation>(code: &[u8], code_pointer: usize) -> BlastResult<CDataRef> {
    let invalid = BlastError::InvalidCDataReference { at: code_pointer };

    let reference = code.get(code_pointer..code_pointer + 3).ok_or(BlastError::UnexpectedEndOfCode(code_pointer))?;
    if V::CHECKED && reference[0] != BlastOpcode::CDataRef as u8 {
        return Err(invalid);
    }

    let delta = u16::from_be_bytes([reference[1], reference[2]]) as usize;
    let offset = (code_pointer + 1).checked_sub(delta).ok_or(BlastError::InvalidCDataReference { at: code_pointer })?;

    let header = code.get(offset..offset + CDATA_HEADER_SIZE).ok_or(BlastError::InvalidCDataReference { at: code_pointer })?;
    let encoding = match CDataEncoding::from_tag(header[0]) {
        Some(encoding) => encoding,
        None if V::CHECKED => return Err(invalid),
        None => CDataEncoding::None,
    };
    let length = u16::from_be_bytes([header[1], header[2]]) as usize;

    if V::CHECKED && offset + CDATA_HEADER_SIZE + length > code.len() {
        return Err(invalid);
    }

    Ok(CDataRef { offset, length, encoding })
}

/// Bytes de conteúdo do bloco em `offset`
pub fn cdata_content_byte_size(code: &[u8], offset: usize) -> usize {
    match code.get(offset + 1..offset + 3) {
        Some(raw) => u16::from_be_bytes([raw[0], raw[1]]) as usize,
        None => 0,
    }
}

/// Elementos de um bloco com `byte_length` bytes de conteúdo
pub fn cdata_element_count(encoding: CDataEncoding, byte_length: usize) -> usize {
    byte_length / encoding.byte_size()
}

/// Lê o elemento `index`; None fora do conteúdo do bloco
pub fn read_cdata_element(code: &[u8], offset: usize, index: usize, byte_length: usize) -> Option<f32> {
    let encoding = CDataEncoding::from_tag(*code.get(offset)?)?;
    let size = encoding.byte_size();
    let start = index.checked_mul(size)?.checked_add(offset + CDATA_HEADER_SIZE)?;
    if start.checked_add(size)? > offset + CDATA_HEADER_SIZE + byte_length {
        return None;
    }
    let raw = code.get(start..start + size)?;

    Some(match encoding {
        CDataEncoding::U8Fp32 | CDataEncoding::CData => map_cdata_u8(raw[0]),
        CDataEncoding::S8Fp32 | CDataEncoding::I8I32 => map_cdata_s8(raw[0]),
        CDataEncoding::Fp8Fp32 => map_cdata_fp8(raw[0]),
        CDataEncoding::Fp16Fp32 => map_cdata_fp16([raw[0], raw[1]]),
        CDataEncoding::I16I32 => map_cdata_i16([raw[0], raw[1]]),
        CDataEncoding::None | CDataEncoding::Fp32Fp32 => map_cdata_f32([raw[0], raw[1], raw[2], raw[3]]),
        CDataEncoding::I32I32 => map_cdata_i32([raw[0], raw[1], raw[2], raw[3]]),
        CDataEncoding::Bool32 => map_cdata_bool32([raw[0], raw[1], raw[2], raw[3]]),
    })
}

/// Leitura indexada com falha suave: NaN fora do range (logado com `trace`)
pub fn index_cdata_f1(code: &[u8], offset: usize, index: usize, byte_length: usize, trace: bool) -> f32 {
    match read_cdata_element(code, offset, index, byte_length) {
        Some(value) => value,
        None => {
            if trace {
                warn!(offset, index, byte_length, "cdata index out of range");
            }
            f32::NAN
        }
    }
}

fn element_range(code: &[u8], offset: usize, index: usize, count: usize) -> BlastResult<(CDataEncoding, usize)> {
    let encoding = code
        .get(offset)
        .and_then(|&tag| CDataEncoding::from_tag(tag))
        .ok_or(BlastError::InvalidCDataReference { at: offset })?;
    let elements = cdata_element_count(encoding, cdata_content_byte_size(code, offset));
    if index.checked_add(count).is_none_or(|end| end > elements) {
        return Err(BlastError::DataIndexOutOfBounds {
            index,
            count: elements,
        });
    }
    Ok((encoding, offset + CDATA_HEADER_SIZE + index * encoding.byte_size()))
}

/// Escreve o elemento `index` em qualquer encoding
pub fn set_cdata_float(code: &mut [u8], offset: usize, index: usize, value: f32) -> BlastResult<()> {
    let (encoding, at) = element_range(code, offset, index, 1)?;

    match encoding {
        CDataEncoding::U8Fp32 | CDataEncoding::CData => code[at] = value as u8,
        CDataEncoding::S8Fp32 | CDataEncoding::I8I32 => code[at] = value as i8 as u8,
        CDataEncoding::Fp8Fp32 => code[at] = encode_fp8(value),
        CDataEncoding::Fp16Fp32 => code[at..at + 2].copy_from_slice(&encode_fp16(value)),
        CDataEncoding::I16I32 => code[at..at + 2].copy_from_slice(&(value as i16).to_le_bytes()),
        CDataEncoding::None | CDataEncoding::Fp32Fp32 => code[at..at + 4].copy_from_slice(&value.to_le_bytes()),
        CDataEncoding::I32I32 => code[at..at + 4].copy_from_slice(&(value as i32).to_le_bytes()),
        CDataEncoding::Bool32 => code[at..at + 4].copy_from_slice(&value.to_bits().to_le_bytes()),
    }
    Ok(())
}

/// Escreve `N` elementos consecutivos a partir de `index` (apenas encodings f32)
pub fn set_cdata_floatn<const N: usize>(
    code: &mut [u8],
    offset: usize,
    index: usize,
    values: [f32; N],
) -> BlastResult<()> {
    let (encoding, at) = element_range(code, offset, index, N)?;
    if !encoding.supports_wide_write() {
        return Err(BlastError::UnsupportedCDataEncoding {
            encoding,
            operation: "vector write",
        });
    }
    for (i, value) in values.iter().enumerate() {
        code[at + i * 4..at + i * 4 + 4].copy_from_slice(&value.to_le_bytes());
    }
    Ok(())
}

pub fn set_cdata_float2(code: &mut [u8], offset: usize, index: usize, values: [f32; 2]) -> BlastResult<()> {
    set_cdata_floatn(code, offset, index, values)
}

pub fn set_cdata_float3(code: &mut [u8], offset: usize, index: usize, values: [f32; 3]) -> BlastResult<()> {
    set_cdata_floatn(code, offset, index, values)
}

pub fn set_cdata_float4(code: &mut [u8], offset: usize, index: usize, values: [f32; 4]) -> BlastResult<()> {
    set_cdata_floatn(code, offset, index, values)
}

/// Monta um bloco completo (header + payload) a partir de valores f32
pub fn encode_cdata_block(encoding: CDataEncoding, values: &[f32]) -> BlastResult<Vec<u8>> {
    let length = values.len() * encoding.byte_size();
    let length16 = u16::try_from(length)
        .map_err(|_| BlastError::InvalidPackage(format!("cdata block of {} bytes exceeds 16 bits", length)))?;

    let mut block = Vec::with_capacity(CDATA_HEADER_SIZE + length);
    block.push(encoding.tag());
    block.extend_from_slice(&length16.to_be_bytes());
    block.resize(CDATA_HEADER_SIZE + length, 0);

    for (i, value) in values.iter().enumerate() {
        set_cdata_float(&mut block, 0, i, *value)?;
    }
    Ok(block)
}

/// Referência de 3 bytes em `site` para o bloco em `block_offset`
pub fn encode_cdataref(site: usize, block_offset: usize) -> BlastResult<[u8; 3]> {
    let delta = (site + 1)
        .checked_sub(block_offset)
        .and_then(|d| u16::try_from(d).ok())
        .ok_or(BlastError::InvalidCDataReference { at: site })?;
    let [hi, lo] = delta.to_be_bytes();
    Ok([BlastOpcode::CDataRef as u8, hi, lo])
}
