//! Formato de package Blast
//!
//! Um package possui dois buffers (código e secundário `P2`) e quatro offsets
//! `O1..O4` cujo significado depende do [`PackageMode`]. Todo acessor derivado
//! (tamanhos, posição de cada segmento) sai de [`BlastPackage::layout`], um único
//! `match` por modo.
//!
//! | Quantidade | Normal | SSMD | Entity | Compiler |
//! |---|---|---|---|---|
//! | CodeSize | O1 | O1 | O1 | O1 |
//! | MetadataSize | O2−O1 | O2−O1 | O2 | O2 |
//! | DataSize | O3−O2 | O3 | O3−O2 | O3 |
//! | StackSize | O4−O3 | O4−O3 | O4−O3 | O4−O3 |
//! | Buffer de código | O4 | O2 | O1 | — |
//! | Buffer P2 | — | O4 | O4 | — |

pub mod builder;
pub mod metadata;

pub use builder::{BlastPackageBuilder, VariableInfo};
pub use metadata::{
    BlastDataType, datatype_of, pack_metadata, retag_metadata, set_metadata, vector_size_of,
};

use std::ops::{BitOr, Range};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{BlastError, BlastResult};

// ═══════════════════════════════════════════════════════════════════════════════
// TAGS DO HEADER
// ═══════════════════════════════════════════════════════════════════════════════

/// Modo de empacotamento
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PackageMode {
    /// Código, metadata, dados e stack em um único buffer
    Normal = 0,
    /// Código+metadata no buffer de código, dados+stack em P2
    Ssmd = 1,
    /// Código sozinho, metadata+dados+stack em P2
    Entity = 2,
    /// Layout intermediário do compilador (sem buffers)
    #[default]
    Compiler = 3,
}

impl PackageMode {
    pub fn from_byte(byte: u8) -> BlastResult<Self> {
        match byte {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Ssmd),
            2 => Ok(Self::Entity),
            3 => Ok(Self::Compiler),
            _ => Err(BlastError::InvalidPackage(format!("unknown package mode {}", byte))),
        }
    }

    /// Modo pode ser executado
    pub fn is_executable(&self) -> bool {
        !matches!(self, Self::Compiler)
    }
}

impl std::str::FromStr for PackageMode {
    type Err = BlastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "ssmd" => Ok(Self::Ssmd),
            "entity" => Ok(Self::Entity),
            "compiler" => Ok(Self::Compiler),
            _ => Err(BlastError::InvalidPackage(format!("unknown package mode '{}'", s))),
        }
    }
}

/// Versão da linguagem que produziu o package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum LanguageVersion {
    #[default]
    None = 0,
    /// BlastScript, execução escalar
    BlastScript1 = 1,
    /// BlastScript, execução SSMD
    BlastSsmd1 = 2,
}

impl LanguageVersion {
    pub fn from_byte(byte: u8) -> BlastResult<Self> {
        match byte {
            0 => Ok(Self::None),
            1 => Ok(Self::BlastScript1),
            2 => Ok(Self::BlastSsmd1),
            _ => Err(BlastError::InvalidPackage(format!("unknown language version {}", byte))),
        }
    }
}

/// Flags de empacotamento
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PackageFlags(pub u8);

impl PackageFlags {
    pub const NONE: Self = Self(0);
    /// Package sem stack
    pub const NO_STACK: Self = Self(1);
    /// Segmentos alinhados a 4 bytes
    pub const ALIGN_4: Self = Self(2);

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PackageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Dono dos buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PackageAllocator {
    /// Sem buffers
    #[default]
    None = 0,
    /// Buffers próprios do package
    Owned = 1,
}

impl PackageAllocator {
    pub fn from_byte(byte: u8) -> BlastResult<Self> {
        match byte {
            0 => Ok(Self::None),
            1 => Ok(Self::Owned),
            _ => Err(BlastError::InvalidPackage(format!("unknown allocator {}", byte))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HEADER
// ═══════════════════════════════════════════════════════════════════════════════

/// Header persistido (28 bytes, little-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageHeader {
    /// Bytes do buffer de código
    pub code_len: u64,
    /// Bytes do buffer P2
    pub p2_len: u64,
    pub mode: PackageMode,
    pub language: LanguageVersion,
    pub flags: PackageFlags,
    pub allocator: PackageAllocator,
    pub offsets: [u16; 4],
}

impl PackageHeader {
    /// Tamanho do header em bytes
    pub const SIZE: usize = 28;

    /// Serializa header
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];

        bytes[0..8].copy_from_slice(&self.code_len.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.p2_len.to_le_bytes());
        bytes[16] = self.mode as u8;
        bytes[17] = self.language as u8;
        bytes[18] = self.flags.0;
        bytes[19] = self.allocator as u8;
        for (i, offset) in self.offsets.iter().enumerate() {
            bytes[20 + i * 2..22 + i * 2].copy_from_slice(&offset.to_le_bytes());
        }

        bytes
    }

    /// Deserializa header
    pub fn from_bytes(bytes: &[u8]) -> BlastResult<Self> {
        if bytes.len() < Self::SIZE {
            return Err(BlastError::InvalidPackage(format!(
                "header too short: {} bytes",
                bytes.len()
            )));
        }

        let u64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(raw)
        };
        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);

        Ok(Self {
            code_len: u64_at(0),
            p2_len: u64_at(8),
            mode: PackageMode::from_byte(bytes[16])?,
            language: LanguageVersion::from_byte(bytes[17])?,
            flags: PackageFlags(bytes[18]),
            allocator: PackageAllocator::from_byte(bytes[19])?,
            offsets: [u16_at(20), u16_at(22), u16_at(24), u16_at(26)],
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LAYOUT
// ═══════════════════════════════════════════════════════════════════════════════

/// Buffer que contém um segmento
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentBuffer {
    Code,
    Secondary,
}

/// Posição de um segmento dentro de um buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentLocation {
    pub buffer: SegmentBuffer,
    pub range: Range<usize>,
}

/// Posição dos quatro segmentos de um package executável
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageLayout {
    pub code: SegmentLocation,
    pub metadata: SegmentLocation,
    pub data: SegmentLocation,
    pub stack: SegmentLocation,
}

/// Vistas mutáveis dos segmentos
#[derive(Debug)]
pub struct Segments<'a> {
    pub code: &'a mut [u8],
    pub metadata: &'a mut [u8],
    pub data: &'a mut [u8],
    pub stack: &'a mut [u8],
}

/// Resumo serializável de um package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub mode: PackageMode,
    pub language: LanguageVersion,
    pub flags: u8,
    pub allocated: bool,
    pub offsets: [u16; 4],
    pub code_size: usize,
    pub metadata_size: usize,
    pub data_size: usize,
    pub stack_size: usize,
    pub stack_capacity: usize,
}

// Corta segmentos consecutivos de um buffer (ranges em ordem crescente)
struct Carver<'a> {
    rest: &'a mut [u8],
    base: usize,
}

impl<'a> Carver<'a> {
    fn new(buffer: &'a mut [u8]) -> Self {
        Self { rest: buffer, base: 0 }
    }

    fn take(&mut self, range: Range<usize>) -> BlastResult<&'a mut [u8]> {
        let rest = std::mem::take(&mut self.rest);
        if range.start < self.base || range.end < range.start || range.end - self.base > rest.len() {
            return Err(BlastError::InvalidPackage(format!(
                "segment {:?} outside buffer",
                range
            )));
        }
        let (_, tail) = rest.split_at_mut(range.start - self.base);
        let (segment, tail) = tail.split_at_mut(range.len());
        self.rest = tail;
        self.base = range.end;
        Ok(segment)
    }
}

fn carve<'a>(
    code: &mut Carver<'a>,
    secondary: &mut Option<Carver<'a>>,
    location: &SegmentLocation,
) -> BlastResult<&'a mut [u8]> {
    match location.buffer {
        SegmentBuffer::Code => code.take(location.range.clone()),
        SegmentBuffer::Secondary => secondary
            .as_mut()
            .ok_or(BlastError::PackageNotAllocated)?
            .take(location.range.clone()),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PACKAGE
// ═══════════════════════════════════════════════════════════════════════════════

/// Package compilado e executável
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BlastPackage {
    code: Option<Vec<u8>>,
    p2: Option<Vec<u8>>,
    mode: PackageMode,
    language: LanguageVersion,
    flags: PackageFlags,
    allocator: PackageAllocator,
    offsets: [u16; 4],
}

impl BlastPackage {
    /// Package em modo Compiler (apenas tamanhos, sem buffers)
    pub fn compiler(
        code_size: usize,
        metadata_size: usize,
        data_size: usize,
        stack_size: usize,
    ) -> BlastResult<Self> {
        let offsets = offsets_for(PackageMode::Compiler, code_size, metadata_size, data_size, stack_size)?;
        let flags = if stack_size == 0 { PackageFlags::NO_STACK } else { PackageFlags::NONE };
        Ok(Self {
            offsets,
            flags,
            ..Self::default()
        })
    }

    /// Define a versão da linguagem
    pub fn with_language(mut self, language: LanguageVersion) -> Self {
        self.language = language;
        self
    }

    /// Acrescenta flags de empacotamento
    pub fn with_flags(mut self, flags: PackageFlags) -> Self {
        self.flags = self.flags | flags;
        self
    }

    /// Package executável zerado com o layout dado
    fn allocate(
        mode: PackageMode,
        language: LanguageVersion,
        flags: PackageFlags,
        offsets: [u16; 4],
    ) -> BlastResult<Self> {
        let mut package = Self {
            code: None,
            p2: None,
            mode,
            language,
            flags,
            allocator: PackageAllocator::Owned,
            offsets,
        };
        let code_len = package.code_segment_size().ok_or(BlastError::UnsupportedPackageMode {
            mode,
            operation: "allocate",
        })?;
        package.code = Some(vec![0u8; code_len]);
        if mode != PackageMode::Normal {
            package.p2 = Some(vec![0u8; package.data_segment_size().unwrap_or(0)]);
        }
        Ok(package)
    }

    pub fn mode(&self) -> PackageMode {
        self.mode
    }

    pub fn language(&self) -> LanguageVersion {
        self.language
    }

    pub fn flags(&self) -> PackageFlags {
        self.flags
    }

    pub fn allocator(&self) -> PackageAllocator {
        self.allocator
    }

    /// Offsets crus `O1..O4`
    pub fn offsets(&self) -> [u16; 4] {
        self.offsets
    }

    #[inline]
    fn o(&self, i: usize) -> usize {
        self.offsets[i] as usize
    }

    pub fn code_size(&self) -> usize {
        self.o(0)
    }

    pub fn metadata_size(&self) -> usize {
        match self.mode {
            PackageMode::Normal | PackageMode::Ssmd => self.o(1).saturating_sub(self.o(0)),
            PackageMode::Entity | PackageMode::Compiler => self.o(1),
        }
    }

    pub fn data_size(&self) -> usize {
        match self.mode {
            PackageMode::Normal | PackageMode::Entity => self.o(2).saturating_sub(self.o(1)),
            PackageMode::Ssmd | PackageMode::Compiler => self.o(2),
        }
    }

    pub fn stack_size(&self) -> usize {
        self.o(3).saturating_sub(self.o(2))
    }

    /// Tamanho alocado do buffer de código (None em modo Compiler)
    pub fn code_segment_size(&self) -> Option<usize> {
        match self.mode {
            PackageMode::Normal => Some(self.o(3)),
            PackageMode::Ssmd => Some(self.o(1)),
            PackageMode::Entity => Some(self.o(0)),
            PackageMode::Compiler => None,
        }
    }

    /// Tamanho da região de dados alocada (None em modo Compiler)
    pub fn data_segment_size(&self) -> Option<usize> {
        match self.mode {
            PackageMode::Normal => Some(self.o(3).saturating_sub(self.o(0))),
            PackageMode::Ssmd | PackageMode::Entity => Some(self.o(3)),
            PackageMode::Compiler => None,
        }
    }

    /// Capacidade da stack em slots de 4 bytes
    pub fn stack_capacity(&self) -> usize {
        self.stack_size() >> 2
    }

    /// Número de slots de dados
    pub fn data_slots(&self) -> usize {
        self.data_size() >> 2
    }

    pub fn has_stack(&self) -> bool {
        !self.flags.contains(PackageFlags::NO_STACK)
    }

    pub fn is_allocated(&self) -> bool {
        self.allocator != PackageAllocator::None && self.code.is_some()
    }

    /// Posição de cada segmento (None em modo Compiler)
    pub fn layout(&self) -> Option<PackageLayout> {
        let [o1, o2, o3, o4] = self.offsets.map(|o| o as usize);
        let at = |buffer, range| SegmentLocation { buffer, range };
        let (c, s) = (SegmentBuffer::Code, SegmentBuffer::Secondary);

        Some(match self.mode {
            PackageMode::Normal => PackageLayout {
                code: at(c, 0..o1),
                metadata: at(c, o1..o2),
                data: at(c, o2..o3),
                stack: at(c, o3..o4),
            },
            PackageMode::Ssmd => PackageLayout {
                code: at(c, 0..o1),
                metadata: at(c, o1..o2),
                data: at(s, 0..o3),
                stack: at(s, o3..o4),
            },
            PackageMode::Entity => PackageLayout {
                code: at(c, 0..o1),
                metadata: at(s, 0..o2),
                data: at(s, o2..o3),
                stack: at(s, o3..o4),
            },
            PackageMode::Compiler => return None,
        })
    }

    fn buffer(&self, buffer: SegmentBuffer) -> Option<&[u8]> {
        match buffer {
            SegmentBuffer::Code => self.code.as_deref(),
            SegmentBuffer::Secondary => self.p2.as_deref(),
        }
    }

    fn segment(&self, select: impl Fn(&PackageLayout) -> &SegmentLocation) -> Option<&[u8]> {
        let layout = self.layout()?;
        let location = select(&layout);
        self.buffer(location.buffer)?.get(location.range.clone())
    }

    pub fn code(&self) -> Option<&[u8]> {
        self.segment(|l| &l.code)
    }

    pub fn metadata(&self) -> Option<&[u8]> {
        self.segment(|l| &l.metadata)
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.segment(|l| &l.data)
    }

    pub fn stack(&self) -> Option<&[u8]> {
        self.segment(|l| &l.stack)
    }

    /// Lê o f32 do slot de dados `slot`
    pub fn read_data(&self, slot: usize) -> Option<f32> {
        let bytes = self.data()?.get(slot * 4..slot * 4 + 4)?;
        Some(f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Escreve o f32 do slot de dados `slot`
    pub fn write_data(&mut self, slot: usize, value: f32) -> BlastResult<()> {
        let count = self.data_slots();
        let segments = self.segments_mut()?;
        let bytes = segments
            .data
            .get_mut(slot * 4..slot * 4 + 4)
            .ok_or(BlastError::DataIndexOutOfBounds { index: slot, count })?;
        bytes.copy_from_slice(&value.to_ne_bytes());
        Ok(())
    }

    /// Vistas mutáveis disjuntas dos quatro segmentos
    pub fn segments_mut(&mut self) -> BlastResult<Segments<'_>> {
        let layout = self.layout().ok_or(BlastError::UnsupportedPackageMode {
            mode: self.mode,
            operation: "segments",
        })?;
        if self.allocator == PackageAllocator::None {
            return Err(BlastError::PackageNotAllocated);
        }
        let code_buffer = self.code.as_deref_mut().ok_or(BlastError::PackageNotAllocated)?;

        let mut code = Carver::new(code_buffer);
        let mut secondary = self.p2.as_deref_mut().map(Carver::new);

        Ok(Segments {
            code: carve(&mut code, &mut secondary, &layout.code)?,
            metadata: carve(&mut code, &mut secondary, &layout.metadata)?,
            data: carve(&mut code, &mut secondary, &layout.data)?,
            stack: carve(&mut code, &mut secondary, &layout.stack)?,
        })
    }

    /// Converte um layout Compiler em package executável com os segmentos dados
    pub fn convert(
        &self,
        mode: PackageMode,
        code: &[u8],
        metadata: &[u8],
        data: &[u8],
    ) -> BlastResult<BlastPackage> {
        if self.mode != PackageMode::Compiler || !mode.is_executable() {
            error!(from = ?self.mode, to = ?mode, "unsupported package conversion");
            return Err(BlastError::UnsupportedPackageMode {
                mode: self.mode,
                operation: "convert",
            });
        }
        if code.len() != self.code_size()
            || metadata.len() != self.metadata_size()
            || data.len() != self.data_size()
        {
            return Err(BlastError::InvalidPackage(format!(
                "segment sizes {}/{}/{} do not match layout {}/{}/{}",
                code.len(),
                metadata.len(),
                data.len(),
                self.code_size(),
                self.metadata_size(),
                self.data_size()
            )));
        }

        let offsets = offsets_for(mode, code.len(), metadata.len(), data.len(), self.stack_size())?;
        let mut package = Self::allocate(mode, self.language, self.flags, offsets)?;
        {
            let segments = package.segments_mut()?;
            segments.code.copy_from_slice(code);
            segments.metadata.copy_from_slice(metadata);
            segments.data.copy_from_slice(data);
        }

        debug!(?mode, code = code.len(), data = data.len(), "package converted");
        Ok(package)
    }

    /// Cópia profunda com buffers independentes
    ///
    /// Modo Compiler ou package não alocado: loga e retorna package default.
    pub fn clone_with(&self, allocator: PackageAllocator) -> BlastPackage {
        if !self.mode.is_executable() {
            error!(mode = ?self.mode, "cannot clone package in this mode");
            return Self::default();
        }
        if !self.is_allocated() || allocator == PackageAllocator::None {
            error!("cannot clone an unallocated package");
            return Self::default();
        }

        let sized = |buffer: Option<&Vec<u8>>, size: Option<usize>| {
            buffer.map(|b| b[..size.unwrap_or(b.len()).min(b.len())].to_vec())
        };

        Self {
            code: sized(self.code.as_ref(), self.code_segment_size()),
            p2: match self.mode {
                PackageMode::Normal => None,
                _ => sized(self.p2.as_ref(), self.data_segment_size()),
            },
            mode: self.mode,
            language: self.language,
            flags: self.flags,
            allocator,
            offsets: self.offsets,
        }
    }

    /// Libera os buffers (idempotente)
    pub fn free(&mut self) {
        self.code = None;
        self.p2 = None;
        self.allocator = PackageAllocator::None;
    }

    // ═══════════════════════════════════════════════════════════════
    // REPLICAÇÃO DE DADOS
    // ═══════════════════════════════════════════════════════════════

    /// Replica metadata+dados+stack em `n` instâncias contíguas
    ///
    /// Em SSMD a metadata é copiada uma vez como prefixo e apenas dados+stack
    /// são replicados.
    pub fn clone_data(&self, n: usize) -> BlastDataBlock {
        let (Some(metadata), Some(data), Some(stack)) = (self.metadata(), self.data(), self.stack())
        else {
            error!(mode = ?self.mode, "clone_data: unsupported mode or unallocated package");
            return BlastDataBlock::default();
        };

        match self.mode {
            PackageMode::Normal | PackageMode::Entity => {
                BlastDataBlock::replicate(&[], &[metadata, data, stack], metadata.len(), n)
            }
            PackageMode::Ssmd => BlastDataBlock::replicate(metadata, &[data, stack], 0, n),
            PackageMode::Compiler => BlastDataBlock::default(),
        }
    }

    /// Replica apenas dados+stack em `n` instâncias contíguas
    pub fn clone_data_stack(&self, n: usize) -> BlastDataBlock {
        let (Some(data), Some(stack)) = (self.data(), self.stack()) else {
            error!(mode = ?self.mode, "clone_data_stack: unsupported mode or unallocated package");
            return BlastDataBlock::default();
        };
        BlastDataBlock::replicate(&[], &[data, stack], 0, n)
    }

    /// Libera um bloco de dados (idempotente)
    pub fn free_data(block: &mut BlastDataBlock) {
        *block = BlastDataBlock::default();
    }

    // ═══════════════════════════════════════════════════════════════
    // PERSISTÊNCIA
    // ═══════════════════════════════════════════════════════════════

    pub fn header(&self) -> PackageHeader {
        PackageHeader {
            code_len: self.code.as_ref().map_or(0, |b| b.len() as u64),
            p2_len: self.p2.as_ref().map_or(0, |b| b.len() as u64),
            mode: self.mode,
            language: self.language,
            flags: self.flags,
            allocator: self.allocator,
            offsets: self.offsets,
        }
    }

    /// Serializa header + buffers
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = self.header();
        let mut bytes =
            Vec::with_capacity(PackageHeader::SIZE + header.code_len as usize + header.p2_len as usize);
        bytes.extend_from_slice(&header.to_bytes());
        if let Some(code) = &self.code {
            bytes.extend_from_slice(code);
        }
        if let Some(p2) = &self.p2 {
            bytes.extend_from_slice(p2);
        }
        bytes
    }

    /// Deserializa e valida os tamanhos contra o layout
    pub fn from_bytes(bytes: &[u8]) -> BlastResult<Self> {
        let header = PackageHeader::from_bytes(bytes)?;
        let code_len = header.code_len as usize;
        let p2_len = header.p2_len as usize;
        let body = &bytes[PackageHeader::SIZE..];
        if body.len() != code_len + p2_len {
            return Err(BlastError::InvalidPackage(format!(
                "expected {} body bytes, found {}",
                code_len + p2_len,
                body.len()
            )));
        }

        let mut package = Self {
            code: None,
            p2: None,
            mode: header.mode,
            language: header.language,
            flags: header.flags,
            allocator: header.allocator,
            offsets: header.offsets,
        };

        if header.mode.is_executable() {
            if header.allocator == PackageAllocator::None {
                return Err(BlastError::PackageNotAllocated);
            }
            let expected_p2 = match header.mode {
                PackageMode::Normal => 0,
                _ => package.data_segment_size().unwrap_or(0),
            };
            if Some(code_len) != package.code_segment_size() || p2_len != expected_p2 {
                return Err(BlastError::InvalidPackage(format!(
                    "buffer sizes {}/{} do not match {:?} layout",
                    code_len, p2_len, header.mode
                )));
            }
            package.code = Some(body[..code_len].to_vec());
            if header.mode != PackageMode::Normal {
                package.p2 = Some(body[code_len..].to_vec());
            }
            // Valida ranges de todos os segmentos
            package.segments_mut()?;
        } else if code_len + p2_len != 0 {
            return Err(BlastError::InvalidPackage("compiler layout carries no buffers".into()));
        }

        Ok(package)
    }

    /// Carrega de arquivo
    pub fn load(path: &Path) -> BlastResult<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Salva em arquivo
    pub fn save(&self, path: &Path) -> BlastResult<()> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }

    pub fn info(&self) -> PackageInfo {
        PackageInfo {
            mode: self.mode,
            language: self.language,
            flags: self.flags.0,
            allocated: self.is_allocated(),
            offsets: self.offsets,
            code_size: self.code_size(),
            metadata_size: self.metadata_size(),
            data_size: self.data_size(),
            stack_size: self.stack_size(),
            stack_capacity: self.stack_capacity(),
        }
    }
}

/// Offsets `O1..O4` de um modo para os tamanhos dados
fn offsets_for(
    mode: PackageMode,
    code: usize,
    metadata: usize,
    data: usize,
    stack: usize,
) -> BlastResult<[u16; 4]> {
    let raw = match mode {
        PackageMode::Normal => [code, code + metadata, code + metadata + data, code + metadata + data + stack],
        PackageMode::Ssmd => [code, code + metadata, data, data + stack],
        PackageMode::Entity => [code, metadata, metadata + data, metadata + data + stack],
        PackageMode::Compiler => [code, metadata, data, data + stack],
    };

    let mut offsets = [0u16; 4];
    for (slot, value) in offsets.iter_mut().zip(raw) {
        *slot = u16::try_from(value).map_err(|_| {
            BlastError::InvalidPackage(format!("offset {} exceeds 16 bits in {:?} mode", value, mode))
        })?;
    }
    Ok(offsets)
}

// ═══════════════════════════════════════════════════════════════════════════════
// BLOCO DE DADOS
// ═══════════════════════════════════════════════════════════════════════════════

/// N instâncias contíguas dos dados de um package
///
/// `prefix_len` bytes de metadata compartilhada (SSMD) seguidos de `count`
/// registros de `record_size` bytes; os dados começam em `data_offset` dentro
/// de cada registro.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlastDataBlock {
    bytes: Vec<u8>,
    prefix_len: usize,
    record_size: usize,
    data_offset: usize,
    count: usize,
}

impl BlastDataBlock {
    fn replicate(prefix: &[u8], parts: &[&[u8]], data_offset: usize, n: usize) -> Self {
        let record_size: usize = parts.iter().map(|p| p.len()).sum();
        let mut bytes = Vec::with_capacity(prefix.len() + record_size * n);
        bytes.extend_from_slice(prefix);
        for _ in 0..n {
            for part in parts {
                bytes.extend_from_slice(part);
            }
        }
        Self {
            bytes,
            prefix_len: prefix.len(),
            record_size,
            data_offset,
            count: n,
        }
    }

    /// Número de registros
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn data_offset(&self) -> usize {
        self.data_offset
    }

    /// Metadata compartilhada (vazia fora de SSMD)
    pub fn prefix(&self) -> &[u8] {
        &self.bytes[..self.prefix_len]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Registro completo `index`
    pub fn record(&self, index: usize) -> Option<&[u8]> {
        if index >= self.count {
            return None;
        }
        let start = self.prefix_len + index * self.record_size;
        self.bytes.get(start..start + self.record_size)
    }

    /// Dados+stack do registro `index`
    pub fn record_data(&self, index: usize) -> Option<&[u8]> {
        self.record(index).map(|r| &r[self.data_offset..])
    }

    /// Vistas mutáveis de dados+stack de todos os registros
    pub fn records_mut(&mut self) -> Vec<&mut [u8]> {
        let data_offset = self.data_offset;
        if self.record_size == 0 {
            return (0..self.count).map(|_| <&mut [u8]>::default()).collect();
        }
        self.bytes[self.prefix_len..]
            .chunks_exact_mut(self.record_size)
            .map(|record| &mut record[data_offset..])
            .collect()
    }

    /// Lê o f32 do slot de dados `slot` do registro `record`
    pub fn read_f32(&self, record: usize, slot: usize) -> Option<f32> {
        let data = self.record_data(record)?;
        let bytes = data.get(slot * 4..slot * 4 + 4)?;
        Some(f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Escreve o f32 do slot de dados `slot` do registro `record`
    pub fn write_f32(&mut self, record: usize, slot: usize, value: f32) -> BlastResult<()> {
        let count = self.count;
        let mut records = self.records_mut();
        let target = records
            .get_mut(record)
            .ok_or(BlastError::DataIndexOutOfBounds { index: record, count })?;
        let slots = target.len() / 4;
        let bytes = target
            .get_mut(slot * 4..slot * 4 + 4)
            .ok_or(BlastError::DataIndexOutOfBounds { index: slot, count: slots })?;
        bytes.copy_from_slice(&value.to_ne_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(mode: PackageMode) -> BlastPackage {
        let compiler = BlastPackage::compiler(4, 3, 8, 4).unwrap();
        let metadata = [0x01, 0x01, 0x01];
        let mut data = Vec::new();
        data.extend_from_slice(&1.0f32.to_ne_bytes());
        data.extend_from_slice(&2.0f32.to_ne_bytes());
        compiler.convert(mode, &[0x05, 0, 0, 0], &metadata, &data).unwrap()
    }

    #[test]
    fn test_layout_sizes_per_mode() {
        for mode in [PackageMode::Normal, PackageMode::Ssmd, PackageMode::Entity] {
            let package = sample(mode);
            assert_eq!(package.code_size(), 4, "{:?}", mode);
            assert_eq!(package.metadata_size(), 3, "{:?}", mode);
            assert_eq!(package.data_size(), 8, "{:?}", mode);
            assert_eq!(package.stack_size(), 4, "{:?}", mode);
            assert_eq!(package.stack_capacity(), 1);
            assert!(package.has_stack());
        }
    }

    #[test]
    fn test_offsets_per_mode() {
        assert_eq!(sample(PackageMode::Normal).offsets(), [4, 7, 15, 19]);
        assert_eq!(sample(PackageMode::Ssmd).offsets(), [4, 7, 8, 12]);
        assert_eq!(sample(PackageMode::Entity).offsets(), [4, 3, 11, 15]);
    }

    #[test]
    fn test_segment_views_agree() {
        for mode in [PackageMode::Normal, PackageMode::Ssmd, PackageMode::Entity] {
            let mut package = sample(mode);
            assert_eq!(package.read_data(1), Some(2.0));
            let segments = package.segments_mut().unwrap();
            assert_eq!(segments.code.len(), 4);
            assert_eq!(segments.metadata.len(), 3);
            assert_eq!(segments.data.len(), 8);
            assert_eq!(segments.stack.len(), 4);
        }
    }

    #[test]
    fn test_compiler_mode_is_degenerate() {
        let mut compiler = BlastPackage::compiler(4, 3, 8, 4).unwrap();
        assert!(compiler.layout().is_none());
        assert!(!compiler.clone_with(PackageAllocator::Owned).is_allocated());
        assert!(compiler.clone_data(4).is_empty());
        assert!(matches!(
            compiler.segments_mut(),
            Err(BlastError::UnsupportedPackageMode { .. })
        ));
    }

    #[test]
    fn test_clone_is_independent() {
        let mut original = sample(PackageMode::Entity);
        let mut copy = original.clone_with(PackageAllocator::Owned);
        copy.write_data(0, 9.0).unwrap();
        assert_eq!(original.read_data(0), Some(1.0));

        original.free();
        original.free();
        assert!(!original.is_allocated());
        assert_eq!(copy.read_data(0), Some(9.0));
    }

    #[test]
    fn test_clone_data_ssmd_prefix() {
        let package = sample(PackageMode::Ssmd);
        let block = package.clone_data(3);
        assert_eq!(block.prefix(), &[0x01, 0x01, 0x01]);
        assert_eq!(block.record_size(), 12);
        assert_eq!(block.as_bytes().len(), 3 + 36);
        assert_eq!(block.read_f32(2, 1), Some(2.0));
    }

    #[test]
    fn test_clone_data_normal_replicates_metadata() {
        let package = sample(PackageMode::Normal);
        let mut block = package.clone_data(2);
        assert!(block.prefix().is_empty());
        assert_eq!(block.record_size(), 15);
        assert_eq!(block.data_offset(), 3);
        assert_eq!(block.records_mut()[1].len(), 12);

        BlastPackage::free_data(&mut block);
        BlastPackage::free_data(&mut block);
        assert!(block.is_empty());
    }

    #[test]
    fn test_header_roundtrip() {
        let package = sample(PackageMode::Ssmd);
        let bytes = package.to_bytes();
        assert_eq!(&bytes[..8], &7u64.to_le_bytes());
        let loaded = BlastPackage::from_bytes(&bytes).unwrap();
        assert_eq!(loaded, package);
    }

    #[test]
    fn test_from_bytes_rejects_truncated() {
        let mut bytes = sample(PackageMode::Normal).to_bytes();
        bytes.pop();
        assert!(matches!(
            BlastPackage::from_bytes(&bytes),
            Err(BlastError::InvalidPackage(_))
        ));
    }

    #[test]
    fn test_offsets_overflow() {
        assert!(BlastPackage::compiler(70_000, 0, 0, 0).is_err());
    }
}
