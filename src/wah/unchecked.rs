//! Pointer-arithmetic twins of the hot WAH kernels.
//!
//! Selected at runtime when a vector is built with `allow_unsafe`; only
//! compiled under the `unsafe-kernels` feature. Each kernel produces
//! bit-for-bit the same result as its safe counterpart in
//! [`logic`](super::logic); the property suite drives both on the same
//! adversarial inputs.
//!
//! The loops here elide bounds checks by walking raw word pointers; the
//! slice wrappers establish the bounds once up front.

use super::logic::trimmed_len;
use super::word::Word;

/// Expand a compressed source into a pre-zeroed literal destination.
pub(crate) fn decompress(dst: &mut [Word], src: &[Word], packed: bool) {
    debug_assert!(super::logic::logical_len(src, packed) <= dst.len());
    // SAFETY: the destination spans the source's logical word count, so
    // every cursor write below lands inside `dst`.
    unsafe { decompress_raw(dst.as_mut_ptr(), src.as_ptr(), src.len(), packed) }
}

/// # Safety
///
/// `src` must be valid for reading `src_len` words and `dst` for writing
/// the source's full logical word count.
unsafe fn decompress_raw(dst: *mut Word, src: *const Word, src_len: usize, packed: bool) {
    unsafe {
        let mut cursor = 0usize;
        for i in 0..src_len {
            let w = *src.add(i);
            if !w.is_compressed() {
                *dst.add(cursor) = w;
                cursor += 1;
                continue;
            }
            let count = w.fill_count() as usize;
            if w.fill_bit() {
                for offset in 0..count {
                    *dst.add(cursor + offset) = Word::ONES;
                }
            }
            cursor += count;
            if packed && w.has_packed_word() {
                *dst.add(cursor) = w.packed_word();
                cursor += 1;
            }
        }
    }
}

/// AND a literal array with another literal array, in place.
pub(crate) fn and_literal_literal(left: &mut [Word], right: &[Word]) -> usize {
    let shared = left.len().min(right.len());
    // SAFETY: `shared` bounds both arrays; the clearing loop stays inside
    // `left`.
    unsafe {
        let l: *mut u32 = bytemuck::cast_slice_mut::<Word, u32>(left).as_mut_ptr();
        let r: *const u32 = bytemuck::cast_slice::<Word, u32>(right).as_ptr();
        for i in 0..shared {
            *l.add(i) &= *r.add(i);
        }
        for i in shared..left.len() {
            *l.add(i) = 0;
        }
    }
    trimmed_len(left)
}

/// AND a literal array with a compressed stream, in place.
pub(crate) fn and_literal_compressed(left: &mut [Word], right: &[Word], packed: bool) -> usize {
    let len = left.len();
    // SAFETY: every cursor write is guarded against `len` before it
    // happens, exactly as in the safe kernel.
    unsafe {
        let l = left.as_mut_ptr();
        let mut cursor = 0usize;
        for &w in right {
            if cursor >= len {
                break;
            }
            if !w.is_compressed() {
                *l.add(cursor) =
                    Word::literal((*l.add(cursor)).literal_bits() & w.literal_bits());
                cursor += 1;
                continue;
            }
            let count = w.fill_count() as usize;
            if !w.fill_bit() {
                let end = (cursor + count).min(len);
                for i in cursor..end {
                    *l.add(i) = Word::ZERO;
                }
            }
            cursor += count;
            if packed && w.has_packed_word() {
                if cursor < len {
                    *l.add(cursor) = Word::literal(
                        (*l.add(cursor)).literal_bits() & w.packed_word().literal_bits(),
                    );
                }
                cursor += 1;
            }
        }
        if cursor < len {
            for i in cursor..len {
                *l.add(i) = Word::ZERO;
            }
        }
    }
    trimmed_len(left)
}

/// OR a literal array into another literal array, in place.
pub(crate) fn or_literal_literal(left: &mut [Word], right: &[Word]) {
    debug_assert!(left.len() >= right.len());
    // SAFETY: `left` spans at least `right.len()` words.
    unsafe {
        let l: *mut u32 = bytemuck::cast_slice_mut::<Word, u32>(left).as_mut_ptr();
        let r: *const u32 = bytemuck::cast_slice::<Word, u32>(right).as_ptr();
        for i in 0..right.len() {
            *l.add(i) |= *r.add(i);
        }
    }
}

/// OR a compressed stream into a literal array, in place.
pub(crate) fn or_literal_compressed(left: &mut [Word], right: &[Word], packed: bool) {
    debug_assert!(super::logic::logical_len(right, packed) <= left.len());
    // SAFETY: the left array spans the right operand's logical extent, so
    // the cursor never leaves it.
    unsafe {
        let l = left.as_mut_ptr();
        let mut cursor = 0usize;
        for &w in right {
            if !w.is_compressed() {
                *l.add(cursor) =
                    Word::literal((*l.add(cursor)).literal_bits() | w.literal_bits());
                cursor += 1;
                continue;
            }
            let count = w.fill_count() as usize;
            if w.fill_bit() {
                for i in cursor..cursor + count {
                    *l.add(i) = Word::ONES;
                }
            }
            cursor += count;
            if packed && w.has_packed_word() {
                *l.add(cursor) = Word::literal(
                    (*l.add(cursor)).literal_bits() | w.packed_word().literal_bits(),
                );
                cursor += 1;
            }
        }
    }
}

/// Number of set bits in the logical AND of two literal arrays.
pub(crate) fn and_population_literal_literal(left: &[Word], right: &[Word]) -> u32 {
    let shared = left.len().min(right.len());
    // SAFETY: `shared` bounds both arrays.
    unsafe {
        let l: *const u32 = bytemuck::cast_slice::<Word, u32>(left).as_ptr();
        let r: *const u32 = bytemuck::cast_slice::<Word, u32>(right).as_ptr();
        let mut population = 0u32;
        for i in 0..shared {
            population += (*l.add(i) & *r.add(i)).count_ones();
        }
        population
    }
}

/// Number of set bits in the logical AND of a literal array and a
/// compressed stream.
pub(crate) fn and_population_literal_compressed(
    left: &[Word],
    right: &[Word],
    packed: bool,
) -> u32 {
    let len = left.len();
    // SAFETY: every cursor read is guarded against `len`.
    unsafe {
        let l = left.as_ptr();
        let mut cursor = 0usize;
        let mut population = 0u32;
        for &w in right {
            if cursor >= len {
                break;
            }
            if !w.is_compressed() {
                population += ((*l.add(cursor)).literal_bits() & w.literal_bits()).count_ones();
                cursor += 1;
                continue;
            }
            let count = w.fill_count() as usize;
            if w.fill_bit() {
                let end = (cursor + count).min(len);
                for i in cursor..end {
                    population += (*l.add(i)).literal_bits().count_ones();
                }
            }
            cursor += count;
            if packed && w.has_packed_word() {
                if cursor < len {
                    population += ((*l.add(cursor)).literal_bits()
                        & w.packed_word().literal_bits())
                    .count_ones();
                }
                cursor += 1;
            }
        }
        population
    }
}

/// Whether the logical AND of two literal arrays has any set bit.
pub(crate) fn and_population_any_literal_literal(left: &[Word], right: &[Word]) -> bool {
    let shared = left.len().min(right.len());
    // SAFETY: `shared` bounds both arrays.
    unsafe {
        let l: *const u32 = bytemuck::cast_slice::<Word, u32>(left).as_ptr();
        let r: *const u32 = bytemuck::cast_slice::<Word, u32>(right).as_ptr();
        for i in 0..shared {
            if *l.add(i) & *r.add(i) != 0 {
                return true;
            }
        }
    }
    false
}

/// Whether the logical AND of a literal array and a compressed stream has
/// any set bit.
pub(crate) fn and_population_any_literal_compressed(
    left: &[Word],
    right: &[Word],
    packed: bool,
) -> bool {
    let len = left.len();
    // SAFETY: every cursor read is guarded against `len`.
    unsafe {
        let l = left.as_ptr();
        let mut cursor = 0usize;
        for &w in right {
            if cursor >= len {
                return false;
            }
            if !w.is_compressed() {
                if (*l.add(cursor)).literal_bits() & w.literal_bits() != 0 {
                    return true;
                }
                cursor += 1;
                continue;
            }
            let count = w.fill_count() as usize;
            if w.fill_bit() {
                let end = (cursor + count).min(len);
                for i in cursor..end {
                    if (*l.add(i)).literal_bits() != 0 {
                        return true;
                    }
                }
            }
            cursor += count;
            if packed && w.has_packed_word() {
                if cursor < len
                    && (*l.add(cursor)).literal_bits() & w.packed_word().literal_bits() != 0
                {
                    return true;
                }
                cursor += 1;
            }
        }
    }
    false
}
