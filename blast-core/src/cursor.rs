//! Cursor sobre o segmento de código
//!
//! Toda leitura avança o ponteiro de instrução pelo tamanho do operando lido;
//! não existe incremento manual fora do cursor.

use crate::error::{BlastError, BlastResult};
use crate::opcode::BlastOpcode;

/// Cursor de leitura do código (genérico sobre o buffer para permitir escrita CDATA)
#[derive(Debug)]
pub struct CodeCursor<C> {
    code: C,
    ip: usize,
}

impl<C: AsRef<[u8]>> CodeCursor<C> {
    /// Cria cursor na posição `ip`
    pub fn new(code: C, ip: usize) -> Self {
        Self { code, ip }
    }

    /// Posição atual
    #[inline(always)]
    pub fn position(&self) -> usize {
        self.ip
    }

    /// Reposiciona o cursor (jumps)
    #[inline(always)]
    pub fn jump_to(&mut self, ip: usize) {
        self.ip = ip;
    }

    /// Código completo
    #[inline(always)]
    pub fn code(&self) -> &[u8] {
        self.code.as_ref()
    }

    /// Tamanho do código
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.code.as_ref().len()
    }

    /// Código vazio
    pub fn is_empty(&self) -> bool {
        self.code.as_ref().is_empty()
    }

    /// Chegou ao fim do código
    #[inline(always)]
    pub fn at_end(&self) -> bool {
        self.ip >= self.len()
    }

    /// Lê o byte atual sem avançar
    #[inline(always)]
    pub fn peek(&self) -> BlastResult<u8> {
        self.code
            .as_ref()
            .get(self.ip)
            .copied()
            .ok_or(BlastError::UnexpectedEndOfCode(self.ip))
    }

    /// Lê um byte e avança
    #[inline(always)]
    pub fn read_u8(&mut self) -> BlastResult<u8> {
        let byte = self.peek()?;
        self.ip += 1;
        Ok(byte)
    }

    /// Lê `N` bytes e avança
    #[inline(always)]
    pub fn read_bytes<const N: usize>(&mut self) -> BlastResult<[u8; N]> {
        let code = self.code.as_ref();
        let bytes = code
            .get(self.ip..self.ip + N)
            .ok_or(BlastError::UnexpectedEndOfCode(self.ip))?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        self.ip += N;
        Ok(out)
    }

    /// Lê u16 big-endian (offsets e deltas)
    #[inline(always)]
    pub fn read_u16_be(&mut self) -> BlastResult<u16> {
        Ok(u16::from_be_bytes(self.read_bytes::<2>()?))
    }

    /// Lê i16 big-endian (jump_long)
    #[inline(always)]
    pub fn read_i16_be(&mut self) -> BlastResult<i16> {
        Ok(i16::from_be_bytes(self.read_bytes::<2>()?))
    }

    /// Lê f32 little-endian (constant_f1)
    #[inline(always)]
    pub fn read_f32(&mut self) -> BlastResult<f32> {
        Ok(f32::from_le_bytes(self.read_bytes::<4>()?))
    }

    /// Lê float truncado de 2 bytes (constant_f1_h)
    #[inline(always)]
    pub fn read_f16(&mut self) -> BlastResult<f32> {
        Ok(crate::cdata::map_cdata_fp16(self.read_bytes::<2>()?))
    }

    /// Lê opcode e avança; `Err` para bytes que não são opcode
    #[inline(always)]
    pub fn read_opcode(&mut self) -> BlastResult<BlastOpcode> {
        let at = self.ip;
        let byte = self.read_u8()?;
        BlastOpcode::from_byte(byte).ok_or(BlastError::UnknownOpcode { opcode: byte, at })
    }

    /// Pula `n` bytes
    #[inline(always)]
    pub fn skip(&mut self, n: usize) {
        self.ip += n;
    }
}

impl<C: AsRef<[u8]> + AsMut<[u8]>> CodeCursor<C> {
    /// Código mutável (escrita em blocos CDATA)
    pub fn code_mut(&mut self) -> &mut [u8] {
        self.code.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_advance() {
        let code = [0x01u8, 0x12, 0x34, 0x00, 0x00, 0x80, 0x3F];
        let mut cursor = CodeCursor::new(&code[..], 0);
        assert_eq!(cursor.read_opcode().unwrap(), BlastOpcode::Assign);
        assert_eq!(cursor.read_u16_be().unwrap(), 0x1234);
        assert_eq!(cursor.read_f32().unwrap(), 1.0);
        assert!(cursor.at_end());
        assert!(matches!(cursor.read_u8(), Err(BlastError::UnexpectedEndOfCode(7))));
    }

    #[test]
    fn test_read_opcode_rejects_ids() {
        let code = [0x81u8];
        let mut cursor = CodeCursor::new(&code[..], 0);
        assert!(matches!(
            cursor.read_opcode(),
            Err(BlastError::UnknownOpcode { opcode: 0x81, at: 0 })
        ));
    }

    #[test]
    fn test_peek_does_not_advance() {
        let code = [0x05u8];
        let cursor = CodeCursor::new(&code[..], 0);
        assert_eq!(cursor.peek().unwrap(), 0x05);
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_code_mut() {
        let mut code = vec![0u8; 2];
        let mut cursor = CodeCursor::new(&mut code[..], 0);
        cursor.code_mut()[1] = 7;
        assert_eq!(cursor.code()[1], 7);
    }
}
