//! Kernels indexados
//!
//! Cada registro é um buffer de bytes; o operando vive em `offset` bytes dentro
//! de cada registro. Com `aligned = true` a leitura tenta reinterpretar os bytes
//! como `&[f32]` (bytemuck) e cai para `from_ne_bytes` quando o endereço do
//! registro não está alinhado. Os dois caminhos são semanticamente idênticos.

use super::KernelOp;

#[inline(always)]
fn read_f32(record: &[u8], at: usize) -> f32 {
    let b = &record[at..at + 4];
    f32::from_ne_bytes([b[0], b[1], b[2], b[3]])
}

#[inline(always)]
fn write_f32(record: &mut [u8], at: usize, value: f32) {
    record[at..at + 4].copy_from_slice(&value.to_ne_bytes());
}

/// Lê `W` lanes a partir de `offset`
#[inline(always)]
pub fn read_lanes<const W: usize>(record: &[u8], offset: usize) -> [f32; W] {
    let mut lanes = [0.0f32; W];
    for (k, lane) in lanes.iter_mut().enumerate() {
        *lane = read_f32(record, offset + k * 4);
    }
    lanes
}

/// Escreve `W` lanes a partir de `offset`
#[inline(always)]
pub fn write_lanes<const W: usize>(record: &mut [u8], offset: usize, lanes: [f32; W]) {
    for (k, lane) in lanes.iter().enumerate() {
        write_f32(record, offset + k * 4, *lane);
    }
}

/// Offset permite o caminho alinhado
#[inline(always)]
pub fn offset_is_aligned(offset: usize) -> bool {
    offset % std::mem::align_of::<f32>() == 0
}

#[inline(always)]
fn negate_if<const NEGATE: bool>(value: f32) -> f32 {
    if NEGATE { -value } else { value }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GATHER / SCATTER
// ═══════════════════════════════════════════════════════════════════════════════

/// Copia o operando de cada registro para `dst` (stride W)
pub fn load_indexed<const W: usize, R: AsRef<[u8]>>(
    dst: &mut [f32],
    records: &[R],
    offset: usize,
    aligned: bool,
) {
    assert_eq!(dst.len(), records.len() * W);
    if aligned {
        for (chunk, record) in dst.chunks_exact_mut(W).zip(records) {
            let bytes = &record.as_ref()[offset..offset + W * 4];
            match bytemuck::try_cast_slice::<u8, f32>(bytes) {
                Ok(values) => chunk.copy_from_slice(values),
                Err(_) => chunk.copy_from_slice(&read_lanes::<W>(record.as_ref(), offset)),
            }
        }
    } else {
        for (chunk, record) in dst.chunks_exact_mut(W).zip(records) {
            chunk.copy_from_slice(&read_lanes::<W>(record.as_ref(), offset));
        }
    }
}

/// Copia o escalar de cada registro para `W` lanes de `dst`
pub fn load_indexed_broadcast<const W: usize, R: AsRef<[u8]>>(dst: &mut [f32], records: &[R], offset: usize) {
    assert_eq!(dst.len(), records.len() * W);
    for (chunk, record) in dst.chunks_exact_mut(W).zip(records) {
        chunk.fill(read_f32(record.as_ref(), offset));
    }
}

/// Escreve `src` (stride W) no offset de cada registro
pub fn store_indexed<const W: usize, R: AsMut<[u8]>>(records: &mut [R], offset: usize, src: &[f32]) {
    assert_eq!(src.len(), records.len() * W);
    for (record, chunk) in records.iter_mut().zip(src.chunks_exact(W)) {
        let record = record.as_mut();
        for (k, value) in chunk.iter().enumerate() {
            write_f32(record, offset + k * 4, *value);
        }
    }
}

/// Escreve o escalar de cada registro em `W` lanes
pub fn store_indexed_broadcast<const W: usize, R: AsMut<[u8]>>(records: &mut [R], offset: usize, src: &[f32]) {
    assert_eq!(src.len(), records.len());
    for (record, value) in records.iter_mut().zip(src) {
        write_lanes::<W>(record.as_mut(), offset, [*value; W]);
    }
}

/// Escreve o mesmo vetor em todos os registros
pub fn fill_indexed<const W: usize, R: AsMut<[u8]>>(records: &mut [R], offset: usize, lanes: [f32; W]) {
    for record in records.iter_mut() {
        write_lanes::<W>(record.as_mut(), offset, lanes);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FASTLANE: ATRIBUIÇÃO DIRETA
// ═══════════════════════════════════════════════════════════════════════════════

/// Constante escalar replicada em todas as lanes de todos os registros
#[inline]
pub fn move_f1_constant_to_indexed_data_as_fn<const W: usize, R: AsMut<[u8]>>(
    records: &mut [R],
    offset: usize,
    value: f32,
) {
    fill_indexed::<W, R>(records, offset, [value; W]);
}

/// Copia `W` lanes de `src_offset` para `dst_offset` dentro de cada registro
pub fn move_indexed_data<const W: usize, const NEGATE: bool, R: AsMut<[u8]>>(
    records: &mut [R],
    dst_offset: usize,
    src_offset: usize,
) {
    for record in records.iter_mut() {
        let record = record.as_mut();
        let lanes = read_lanes::<W>(record, src_offset).map(negate_if::<NEGATE>);
        write_lanes::<W>(record, dst_offset, lanes);
    }
}

/// Copia o escalar em `src_offset` para `W` lanes em `dst_offset`
pub fn move_indexed_data_broadcast<const W: usize, const NEGATE: bool, R: AsMut<[u8]>>(
    records: &mut [R],
    dst_offset: usize,
    src_offset: usize,
) {
    for record in records.iter_mut() {
        let record = record.as_mut();
        let value = negate_if::<NEGATE>(read_f32(record, src_offset));
        write_lanes::<W>(record, dst_offset, [value; W]);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FASTLANE: ATRIBUIÇÃO COMPOSTA
// ═══════════════════════════════════════════════════════════════════════════════

/// `data[offset] = data[offset] op c` em todos os registros
pub fn op_indexed_constant<const W: usize, O: KernelOp, R: AsMut<[u8]>>(
    records: &mut [R],
    offset: usize,
    constant: [f32; W],
    aligned: bool,
) {
    if aligned {
        for record in records.iter_mut() {
            let record = record.as_mut();
            match bytemuck::try_cast_slice_mut::<u8, f32>(&mut record[offset..offset + W * 4]) {
                Ok(values) => {
                    for (v, c) in values.iter_mut().zip(constant) {
                        *v = O::apply(*v, c);
                    }
                }
                Err(_) => {
                    let mut lanes = read_lanes::<W>(record, offset);
                    for (v, c) in lanes.iter_mut().zip(constant) {
                        *v = O::apply(*v, c);
                    }
                    write_lanes::<W>(record, offset, lanes);
                }
            }
        }
    } else {
        for record in records.iter_mut() {
            let record = record.as_mut();
            for (k, c) in constant.iter().enumerate() {
                let at = offset + k * 4;
                write_f32(record, at, O::apply(read_f32(record, at), *c));
            }
        }
    }
}

/// `data[offset] = data[offset] op data[src_offset]` dentro de cada registro
///
/// Com `broadcast` o operando da direita é escalar.
pub fn op_indexed_indexed<const W: usize, O: KernelOp, R: AsMut<[u8]>>(
    records: &mut [R],
    offset: usize,
    src_offset: usize,
    broadcast: bool,
) {
    if broadcast {
        for record in records.iter_mut() {
            let record = record.as_mut();
            let b = read_f32(record, src_offset);
            for k in 0..W {
                let at = offset + k * 4;
                write_f32(record, at, O::apply(read_f32(record, at), b));
            }
        }
    } else {
        for record in records.iter_mut() {
            let record = record.as_mut();
            let rhs = read_lanes::<W>(record, src_offset);
            for (k, b) in rhs.iter().enumerate() {
                let at = offset + k * 4;
                write_f32(record, at, O::apply(read_f32(record, at), *b));
            }
        }
    }
}

/// `data[offset] = data[offset] op values[r]` com valores por registro
pub fn op_indexed_array<const W: usize, O: KernelOp, R: AsMut<[u8]>>(
    records: &mut [R],
    offset: usize,
    values: &[f32],
    broadcast: bool,
) {
    if broadcast {
        assert_eq!(values.len(), records.len());
        for (record, b) in records.iter_mut().zip(values) {
            let record = record.as_mut();
            for k in 0..W {
                let at = offset + k * 4;
                write_f32(record, at, O::apply(read_f32(record, at), *b));
            }
        }
    } else {
        assert_eq!(values.len(), records.len() * W);
        for (record, chunk) in records.iter_mut().zip(values.chunks_exact(W)) {
            let record = record.as_mut();
            for (k, b) in chunk.iter().enumerate() {
                let at = offset + k * 4;
                write_f32(record, at, O::apply(read_f32(record, at), *b));
            }
        }
    }
}

/// `acc[r] = acc[r] op data_r[offset]`
pub fn op_array_indexed<const W: usize, O: KernelOp, R: AsRef<[u8]>>(
    acc: &mut [f32],
    records: &[R],
    offset: usize,
    broadcast: bool,
    aligned: bool,
) {
    assert_eq!(acc.len(), records.len() * W);
    if broadcast {
        for (chunk, record) in acc.chunks_exact_mut(W).zip(records) {
            let b = read_f32(record.as_ref(), offset);
            for a in chunk.iter_mut() {
                *a = O::apply(*a, b);
            }
        }
    } else if aligned {
        for (chunk, record) in acc.chunks_exact_mut(W).zip(records) {
            let bytes = &record.as_ref()[offset..offset + W * 4];
            match bytemuck::try_cast_slice::<u8, f32>(bytes) {
                Ok(values) => {
                    for (a, b) in chunk.iter_mut().zip(values) {
                        *a = O::apply(*a, *b);
                    }
                }
                Err(_) => {
                    for (a, b) in chunk.iter_mut().zip(read_lanes::<W>(record.as_ref(), offset)) {
                        *a = O::apply(*a, b);
                    }
                }
            }
        }
    } else {
        for (chunk, record) in acc.chunks_exact_mut(W).zip(records) {
            for (a, b) in chunk.iter_mut().zip(read_lanes::<W>(record.as_ref(), offset)) {
                *a = O::apply(*a, b);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simd::{AddOp, DivOp, MulOp, SubOp};

    fn records(values: &[[f32; 4]]) -> Vec<Vec<u8>> {
        values
            .iter()
            .map(|r| r.iter().flat_map(|v| v.to_ne_bytes()).collect())
            .collect()
    }

    fn slot(record: &[u8], slot: usize) -> f32 {
        read_f32(record, slot * 4)
    }

    #[test]
    fn test_load_aligned_equals_unaligned() {
        let recs = records(&[[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]]);
        let mut a = vec![0.0; 4];
        let mut b = vec![0.0; 4];
        load_indexed::<2, _>(&mut a, &recs, 4, true);
        load_indexed::<2, _>(&mut b, &recs, 4, false);
        assert_eq!(a, vec![2.0, 3.0, 6.0, 7.0]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_unaligned_offset_path() {
        // offset 1 força leitura por bytes
        let mut bytes = vec![0u8; 5];
        bytes[1..5].copy_from_slice(&9.5f32.to_ne_bytes());
        let recs = vec![bytes];
        let mut dst = vec![0.0; 1];
        load_indexed::<1, _>(&mut dst, &recs, 1, true);
        assert_eq!(dst, vec![9.5]);
    }

    #[test]
    fn test_move_constant_and_indexed() {
        let mut recs = records(&[[1.0, 2.0, 0.0, 0.0], [3.0, 4.0, 0.0, 0.0]]);
        move_f1_constant_to_indexed_data_as_fn::<2, _>(&mut recs, 8, 7.0);
        assert_eq!(slot(&recs[1], 2), 7.0);
        assert_eq!(slot(&recs[1], 3), 7.0);

        move_indexed_data::<2, true, _>(&mut recs, 8, 0);
        assert_eq!((slot(&recs[0], 2), slot(&recs[0], 3)), (-1.0, -2.0));

        move_indexed_data_broadcast::<2, false, _>(&mut recs, 8, 4);
        assert_eq!((slot(&recs[1], 2), slot(&recs[1], 3)), (4.0, 4.0));
    }

    #[test]
    fn test_compound_kernels() {
        let mut recs = records(&[[1.0, 2.0, 10.0, 0.0], [3.0, 4.0, 20.0, 0.0]]);
        op_indexed_constant::<2, AddOp, _>(&mut recs, 0, [1.0, 1.0], true);
        assert_eq!((slot(&recs[0], 0), slot(&recs[0], 1)), (2.0, 3.0));

        op_indexed_constant::<1, SubOp, _>(&mut recs, 0, [2.0], false);
        assert_eq!(slot(&recs[1], 0), 2.0);

        op_indexed_indexed::<2, MulOp, _>(&mut recs, 0, 8, true);
        assert_eq!((slot(&recs[0], 0), slot(&recs[0], 1)), (0.0, 30.0));

        op_indexed_array::<1, DivOp, _>(&mut recs, 8, &[2.0, 4.0], true);
        assert_eq!((slot(&recs[0], 2), slot(&recs[1], 2)), (5.0, 5.0));
    }

    #[test]
    fn test_op_array_indexed() {
        let recs = records(&[[1.0, 2.0, 0.0, 0.0], [3.0, 4.0, 0.0, 0.0]]);
        let mut acc = vec![10.0, 10.0, 10.0, 10.0];
        op_array_indexed::<2, AddOp, _>(&mut acc, &recs, 0, false, true);
        assert_eq!(acc, vec![11.0, 12.0, 13.0, 14.0]);

        op_array_indexed::<2, SubOp, _>(&mut acc, &recs, 4, true, false);
        assert_eq!(acc, vec![9.0, 10.0, 9.0, 10.0]);
    }

    #[test]
    fn test_store_roundtrip() {
        let mut recs = records(&[[0.0; 4], [0.0; 4]]);
        store_indexed::<2, _>(&mut recs, 4, &[1.0, 2.0, 3.0, 4.0]);
        store_indexed_broadcast::<1, _>(&mut recs, 0, &[8.0, 9.0]);
        let mut dst = vec![0.0; 6];
        load_indexed::<3, _>(&mut dst, &recs, 0, false);
        assert_eq!(dst, vec![8.0, 1.0, 2.0, 9.0, 3.0, 4.0]);

        let mut wide = vec![0.0; 4];
        load_indexed_broadcast::<2, _>(&mut wide, &recs, 0);
        assert_eq!(wide, vec![8.0, 8.0, 9.0, 9.0]);
    }
}
