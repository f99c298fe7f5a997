//! Kernels sobre arrays contíguos
//!
//! Arrays com `W` lanes por registro (stride = W). Todos assumem
//! `acc.len() == n * W` e verificam comprimentos com `assert_eq!`.

use super::KernelOp;

// ═══════════════════════════════════════════════════════════════════════════════
// MOVIMENTAÇÃO
// ═══════════════════════════════════════════════════════════════════════════════

/// Preenche todos os registros com o mesmo vetor
#[inline]
pub fn fill_array<const W: usize>(dst: &mut [f32], lanes: [f32; W]) {
    for chunk in dst.chunks_exact_mut(W) {
        chunk.copy_from_slice(&lanes);
    }
}

/// Expande valores escalares para `W` lanes
#[inline]
pub fn expand_array<const W: usize>(dst: &mut [f32], src: &[f32]) {
    assert_eq!(dst.len(), src.len() * W);
    for (chunk, value) in dst.chunks_exact_mut(W).zip(src) {
        chunk.fill(*value);
    }
}

/// Aplica `f` a cada elemento
#[inline]
pub fn map_array(acc: &mut [f32], f: impl Fn(f32) -> f32) {
    for value in acc.iter_mut() {
        *value = f(*value);
    }
}

/// Nega cada elemento
#[inline]
pub fn negate_array(acc: &mut [f32]) {
    map_array(acc, |v| -v);
}

/// Negação lógica (zero → 1, não-zero → 0)
#[inline]
pub fn not_array(acc: &mut [f32]) {
    map_array(acc, |v| if v == 0.0 { 1.0 } else { 0.0 });
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPERADORES
// ═══════════════════════════════════════════════════════════════════════════════

/// `acc[i] = acc[i] op rhs[i]` (mesma largura)
#[inline]
pub fn op_array<O: KernelOp>(acc: &mut [f32], rhs: &[f32]) {
    assert_eq!(acc.len(), rhs.len());
    for (a, b) in acc.iter_mut().zip(rhs) {
        *a = O::apply(*a, *b);
    }
}

/// `acc[r][k] = acc[r][k] op rhs[r]` (rhs escalar por registro)
#[inline]
pub fn op_array_broadcast<const W: usize, O: KernelOp>(acc: &mut [f32], rhs: &[f32]) {
    assert_eq!(acc.len(), rhs.len() * W);
    for (chunk, b) in acc.chunks_exact_mut(W).zip(rhs) {
        for a in chunk.iter_mut() {
            *a = O::apply(*a, *b);
        }
    }
}

/// `acc[r][k] = acc[r][k] op c[k]`
#[inline]
pub fn op_array_constant<const W: usize, O: KernelOp>(acc: &mut [f32], constant: [f32; W]) {
    for chunk in acc.chunks_exact_mut(W) {
        for (a, c) in chunk.iter_mut().zip(constant) {
            *a = O::apply(*a, c);
        }
    }
}

/// `acc[r][k] = c[k] op acc[r][k]` (constante à esquerda)
#[inline]
pub fn constant_op_array<const W: usize, O: KernelOp>(constant: [f32; W], acc: &mut [f32]) {
    for chunk in acc.chunks_exact_mut(W) {
        for (a, c) in chunk.iter_mut().zip(constant) {
            *a = O::apply(c, *a);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simd::{AddOp, DivOp, SubOp};

    #[test]
    fn test_fill_and_expand() {
        let mut dst = vec![0.0; 6];
        fill_array::<3>(&mut dst, [1.0, 2.0, 3.0]);
        assert_eq!(dst, vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);

        expand_array::<3>(&mut dst, &[4.0, 5.0]);
        assert_eq!(dst, vec![4.0, 4.0, 4.0, 5.0, 5.0, 5.0]);
    }

    #[test]
    fn test_op_families() {
        let mut acc = vec![1.0, 2.0, 3.0, 4.0];
        op_array::<AddOp>(&mut acc, &[1.0, 1.0, 1.0, 1.0]);
        assert_eq!(acc, vec![2.0, 3.0, 4.0, 5.0]);

        op_array_broadcast::<2, SubOp>(&mut acc, &[2.0, 5.0]);
        assert_eq!(acc, vec![0.0, 1.0, -1.0, 0.0]);

        op_array_constant::<2, AddOp>(&mut acc, [10.0, 20.0]);
        assert_eq!(acc, vec![10.0, 21.0, 9.0, 20.0]);

        constant_op_array::<1, DivOp>([90.0], &mut acc);
        assert_eq!(acc, vec![9.0, 90.0 / 21.0, 10.0, 4.5]);
    }

    #[test]
    fn test_unary() {
        let mut acc = vec![0.0, 2.0];
        not_array(&mut acc);
        assert_eq!(acc, vec![1.0, 0.0]);
        negate_array(&mut acc);
        assert_eq!(acc, vec![-1.0, -0.0]);
    }

    #[test]
    #[should_panic]
    fn test_length_mismatch_panics() {
        let mut acc = vec![0.0; 3];
        op_array::<AddOp>(&mut acc, &[1.0]);
    }
}
