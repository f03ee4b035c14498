//! The stateful WAH bitmap.
//!
//! A [`Vector`] is a logical bitmap indexed by non-negative bit
//! positions. Backing storage is a growable array of [`Word`];
//! `word_count_physical` counts the live words, `word_count_logical`
//! counts 31-bit logical words including run fills and packed positions.
//!
//! Two invariants hold after every mutation:
//!
//! - the last physical word is always a literal (writes land there, and
//!   appends re-establish it), and
//! - compressed vectors are forward-only: once a position is behind the
//!   tail word it can never be written again.
//!
//! The hot mutation path on compressed vectors is the zero fill: setting
//! a bit far past the tail first closes the current tail into the
//! compressed body (coalescing runs and folding lone bits into packed
//! slots where the mode allows), appends the zero gap as a run, and
//! starts a fresh literal tail.

use crate::error::{Error, Result};
use crate::wah::logic::{self, Segment, Segments};
use crate::wah::word::{Word, BITS_PER_WORD, LITERAL_MASK, MAX_FILL_COUNT};
use crate::wah::{kernels, Compression};

/// A WAH-compressed (or uncompressed) bitmap.
#[derive(Clone, Debug)]
pub struct Vector {
    compression: Compression,
    allow_unsafe: bool,
    words: Vec<Word>,
    word_count_physical: usize,
    word_count_logical: usize,
}

impl Vector {
    /// Create an empty vector: one literal zero word.
    pub fn new(compression: Compression, allow_unsafe: bool) -> Result<Vector> {
        if allow_unsafe && !cfg!(feature = "unsafe-kernels") {
            return Err(Error::unsafe_unavailable(
                "unsafe kernels requested but the unsafe-kernels feature is not compiled in",
            ));
        }
        Ok(Vector {
            compression,
            allow_unsafe,
            words: vec![Word::ZERO; 2],
            word_count_physical: 1,
            word_count_logical: 1,
        })
    }

    /// Copy another vector into the given compression mode.
    ///
    /// Same-mode copies are word-for-word identical; cross-mode copies
    /// replay the logical content through the forward write path.
    pub fn from_vector(other: &Vector, compression: Compression) -> Result<Vector> {
        let mut out = Vector::new(compression, other.allow_unsafe)?;
        if compression == other.compression {
            out.words = other.live_words().to_vec();
            if out.words.len() < 2 {
                out.words.resize(2, Word::ZERO);
            }
            out.word_count_physical = other.word_count_physical;
            out.word_count_logical = other.word_count_logical;
            return Ok(out);
        }
        let mut cursor = 0usize;
        for segment in Segments::new(other.live_words(), other.packed()) {
            match segment {
                Segment::Literal(bits) => {
                    out.set_word(cursor, Word::literal(bits))?;
                    cursor += 1;
                }
                Segment::Fill { bit, count } => {
                    if bit {
                        out.set_word(cursor, Word::fill(true, count))?;
                    }
                    cursor += count as usize;
                }
            }
        }
        Ok(out)
    }

    /// An uncompressed vector with bits `0..bit_count` all set.
    pub fn all_ones(bit_count: u32, allow_unsafe: bool) -> Result<Vector> {
        let mut out = Vector::new(Compression::None, allow_unsafe)?;
        if bit_count == 0 {
            return Ok(out);
        }
        let full = (bit_count / BITS_PER_WORD) as usize;
        let rem = bit_count % BITS_PER_WORD;
        let total = full + usize::from(rem > 0);
        out.extend_literal_to(total);
        for slot in &mut out.words[..full] {
            *slot = Word::ONES;
        }
        if rem > 0 {
            out.words[full] = Word::literal((1 << rem) - 1);
        }
        Ok(out)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The compression mode fixed at construction.
    #[inline]
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Live physical words, tail included.
    #[inline]
    pub fn live_words(&self) -> &[Word] {
        &self.words[..self.word_count_physical]
    }

    /// Number of live physical words.
    #[inline]
    pub fn word_count_physical(&self) -> usize {
        self.word_count_physical
    }

    /// Number of 31-bit logical words, fills and packed positions included.
    #[inline]
    pub fn word_count_logical(&self) -> usize {
        self.word_count_logical
    }

    /// Heap memory used by the backing array, in bytes.
    pub fn heap_size(&self) -> usize {
        self.words.len() * core::mem::size_of::<Word>()
    }

    #[inline]
    fn packed(&self) -> bool {
        self.compression.is_packed()
    }

    #[inline]
    fn compressed_mode(&self) -> bool {
        self.compression.is_compressed()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read one bit; positions past the tail read as zero.
    pub fn get_bit(&self, position: u32) -> bool {
        let lw = (position / BITS_PER_WORD) as usize;
        let bit = position % BITS_PER_WORD;
        self.get_word_logical(lw).get_bit(bit)
    }

    /// The literal form of one logical word; reads past the tail are zero.
    pub fn get_word_logical(&self, logical_pos: usize) -> Word {
        if !self.compressed_mode() {
            return if logical_pos < self.word_count_physical {
                self.words[logical_pos]
            } else {
                Word::ZERO
            };
        }
        let mut cursor = 0usize;
        for &w in self.live_words() {
            if !w.is_compressed() {
                if cursor == logical_pos {
                    return w;
                }
                cursor += 1;
                continue;
            }
            let count = w.fill_count() as usize;
            if logical_pos < cursor + count {
                return if w.fill_bit() { Word::ONES } else { Word::ZERO };
            }
            cursor += count;
            if self.packed() && w.has_packed_word() {
                if cursor == logical_pos {
                    return w.packed_word();
                }
                cursor += 1;
            }
        }
        Word::ZERO
    }

    /// Exact count of set bits.
    pub fn population(&self) -> u32 {
        logic::population(self.live_words(), self.packed())
    }

    /// Whether any bit is set.
    pub fn population_any(&self) -> bool {
        logic::population_any(self.live_words(), self.packed())
    }

    /// Lazy ordered enumeration of every position whose bit equals `value`.
    ///
    /// Enumerating zero bits of a compressed vector is unsupported: the
    /// zero tail is unbounded.
    pub fn bit_positions(&self, value: bool) -> Result<BitPositions<'_>> {
        if !value && self.compressed_mode() {
            return Err(Error::unsupported(
                "cannot enumerate zero bits of a compressed vector",
            ));
        }
        Ok(BitPositions::new(self.live_words(), self.packed(), value))
    }

    /// Infallible enumeration of the set bits.
    #[inline]
    pub(crate) fn ones(&self) -> BitPositions<'_> {
        BitPositions::new(self.live_words(), self.packed(), true)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Set or clear one bit.
    ///
    /// Compressed vectors are forward-only: positions behind the tail word
    /// fail. Zero writes at or past the tail are no-ops; one writes past
    /// the tail zero-fill the gap first.
    pub fn set_bit(&mut self, position: u32, value: bool) -> Result<()> {
        let lw = (position / BITS_PER_WORD) as usize;
        let bit = position % BITS_PER_WORD;
        if !self.compressed_mode() {
            if lw < self.word_count_physical {
                self.words[lw] = self.words[lw].with_bit(bit, value);
                return Ok(());
            }
            if !value {
                return Ok(());
            }
            self.extend_literal_to(lw + 1);
            self.words[lw] = self.words[lw].with_bit(bit, true);
            return Ok(());
        }

        let tail = self.word_count_logical - 1;
        if lw < tail {
            return Err(Error::forward_only(format!(
                "write at logical word {} behind the tail at {}",
                lw, tail
            )));
        }
        if lw == tail {
            let last = self.word_count_physical - 1;
            self.words[last] = self.words[last].with_bit(bit, value);
            return Ok(());
        }
        if !value {
            return Ok(());
        }
        self.zero_fill(lw - tail);
        let last = self.word_count_physical - 1;
        self.words[last] = self.words[last].with_bit(bit, true);
        Ok(())
    }

    /// Write one logical word.
    ///
    /// Forward-only when compressed, like [`set_bit`](Self::set_bit).
    /// Writing a compressed word appends its run and re-establishes the
    /// literal tail; an all-zero run with no packed payload is equivalent
    /// to an absent tail and is canonicalized away.
    pub fn set_word(&mut self, logical_pos: usize, w: Word) -> Result<()> {
        if !self.compressed_mode() {
            return self.set_word_literal_mode(logical_pos, w);
        }

        let tail = self.word_count_logical - 1;
        if logical_pos < tail {
            return Err(Error::forward_only(format!(
                "write at logical word {} behind the tail at {}",
                logical_pos, tail
            )));
        }
        if logical_pos > tail {
            if Self::is_zero_word(w, self.packed()) {
                return Ok(());
            }
            self.zero_fill(logical_pos - tail);
        }
        if !w.is_compressed() {
            let last = self.word_count_physical - 1;
            self.words[last] = w;
            return Ok(());
        }
        if Self::is_zero_word(w, self.packed()) {
            // A zero run with no payload is an absent tail: clear the
            // slot and leave the zero extension implicit.
            let last = self.word_count_physical - 1;
            self.words[last] = Word::ZERO;
            return Ok(());
        }

        // A run replaces the tail; push an explicit literal zero after it.
        let packed_word = self.packed() && w.has_packed_word();
        let span = w.fill_count() as usize + usize::from(packed_word);
        self.word_count_physical -= 1;
        if packed_word {
            self.push_word(w);
        } else {
            self.append_run(w.fill_bit(), w.fill_count() as usize);
        }
        self.push_word(Word::ZERO);
        self.word_count_logical += span;
        Ok(())
    }

    /// Reset to the empty state, keeping the allocation.
    pub fn clear(&mut self) {
        self.words[0] = Word::ZERO;
        self.word_count_physical = 1;
        self.word_count_logical = 1;
    }

    // =========================================================================
    // Boolean operations
    // =========================================================================

    /// AND another vector into this one.
    ///
    /// Only an uncompressed self can be intersected in place; bits are
    /// only cleared, and the trailing zero tail shrinks.
    pub fn and_in_place(&mut self, other: &Vector) -> Result<()> {
        if self.compressed_mode() {
            return Err(Error::unsupported(
                "AND in place requires an uncompressed left operand",
            ));
        }
        let live = self.word_count_physical;
        let trimmed = if !other.compressed_mode() {
            kernels::and_literal_literal(
                self.allow_unsafe,
                &mut self.words[..live],
                other.live_words(),
            )
        } else {
            kernels::and_literal_compressed(
                self.allow_unsafe,
                &mut self.words[..live],
                other.live_words(),
                other.packed(),
            )
        };
        self.word_count_physical = trimmed;
        self.word_count_logical = trimmed;
        Ok(())
    }

    /// OR another vector into this one.
    ///
    /// Only an uncompressed self can be unioned in place.
    pub fn or_in_place(&mut self, other: &Vector) -> Result<()> {
        if self.compressed_mode() {
            return Err(Error::unsupported(
                "OR in place requires an uncompressed left operand",
            ));
        }
        if other.word_count_logical > self.word_count_physical {
            self.extend_literal_to(other.word_count_logical);
        }
        let live = self.word_count_physical;
        if !other.compressed_mode() {
            kernels::or_literal_literal(
                self.allow_unsafe,
                &mut self.words[..live],
                other.live_words(),
            );
        } else {
            kernels::or_literal_compressed(
                self.allow_unsafe,
                &mut self.words[..live],
                other.live_words(),
                other.packed(),
            );
        }
        Ok(())
    }

    /// AND two vectors into a fresh vector of the requested compression.
    pub fn and_out_of_place(&self, other: &Vector, result: Compression) -> Result<Vector> {
        // The less-compressed operand drives the specialized kernels from
        // the left; AND commutes.
        let (left, right) = if compression_rank(self.compression) <= compression_rank(other.compression)
        {
            (self, other)
        } else {
            (other, self)
        };
        let mut out = Vector::new(result, self.allow_unsafe)?;
        let mut cursor = 0usize;
        let mut emit = |segment: Segment| match segment {
            Segment::Literal(bits) => {
                out.write_forward(cursor, Word::literal(bits));
                cursor += 1;
            }
            Segment::Fill { bit, count } => {
                if bit {
                    out.write_forward(cursor, Word::fill(true, count));
                }
                cursor += count as usize;
            }
        };
        match (left.compressed_mode(), right.compressed_mode()) {
            (false, false) => logic::and_out_of_place_literal_literal(
                left.live_words(),
                right.live_words(),
                &mut emit,
            ),
            (false, true) => logic::and_out_of_place_literal_compressed(
                left.live_words(),
                right.live_words(),
                right.packed(),
                &mut emit,
            ),
            (true, true) => logic::and_out_of_place_compressed_compressed(
                left.live_words(),
                left.packed(),
                right.live_words(),
                right.packed(),
                &mut emit,
            ),
            (true, false) => unreachable!("operands ordered by compression"),
        }
        Ok(out)
    }

    /// Union two or more vectors into a fresh uncompressed vector.
    pub fn or_out_of_place(inputs: &[&Vector]) -> Result<Vector> {
        if inputs.len() < 2 {
            return Err(Error::argument_required(
                "OR out of place requires at least two input vectors",
            ));
        }
        let allow_unsafe = inputs[0].allow_unsafe;
        let span = inputs
            .iter()
            .map(|v| v.word_count_logical)
            .max()
            .unwrap_or(1);
        let mut out = Vector::new(Compression::None, allow_unsafe)?;
        out.extend_literal_to(span);
        for v in inputs {
            if !v.compressed_mode() {
                kernels::or_literal_literal(allow_unsafe, &mut out.words[..span], v.live_words());
            } else {
                kernels::or_literal_compressed(
                    allow_unsafe,
                    &mut out.words[..span],
                    v.live_words(),
                    v.packed(),
                );
            }
        }
        let trimmed = logic::trimmed_len(&out.words[..span]);
        out.word_count_physical = trimmed;
        out.word_count_logical = trimmed;
        Ok(out)
    }

    /// Count the set bits of the logical AND without materializing it.
    ///
    /// Two compressed operands are unsupported; decompress one side first
    /// (catalog filters union compressed entries into an uncompressed
    /// scratch before intersecting).
    pub fn and_population(&self, other: &Vector) -> Result<u32> {
        match (self.compressed_mode(), other.compressed_mode()) {
            (false, false) => Ok(kernels::and_population_literal_literal(
                self.allow_unsafe,
                self.live_words(),
                other.live_words(),
            )),
            (false, true) => Ok(kernels::and_population_literal_compressed(
                self.allow_unsafe,
                self.live_words(),
                other.live_words(),
                other.packed(),
            )),
            (true, false) => other.and_population(self),
            (true, true) => Err(Error::unsupported(
                "AND population of two compressed vectors",
            )),
        }
    }

    /// Whether the logical AND has any set bit, short-circuiting.
    pub fn and_population_any(&self, other: &Vector) -> Result<bool> {
        match (self.compressed_mode(), other.compressed_mode()) {
            (false, false) => Ok(kernels::and_population_any_literal_literal(
                self.allow_unsafe,
                self.live_words(),
                other.live_words(),
            )),
            (false, true) => Ok(kernels::and_population_any_literal_compressed(
                self.allow_unsafe,
                self.live_words(),
                other.live_words(),
                other.packed(),
            )),
            (true, false) => other.and_population_any(self),
            (true, true) => Err(Error::unsupported(
                "AND population of two compressed vectors",
            )),
        }
    }

    /// Fully decompress into a fresh uncompressed vector.
    pub fn decompress(&self) -> Result<Vector> {
        let mut out = Vector::new(Compression::None, self.allow_unsafe)?;
        if !self.compressed_mode() {
            out.words = self.live_words().to_vec();
            if out.words.len() < 2 {
                out.words.resize(2, Word::ZERO);
            }
            out.word_count_physical = self.word_count_physical;
            out.word_count_logical = self.word_count_logical;
            return Ok(out);
        }
        let span = self.word_count_logical;
        out.extend_literal_to(span);
        kernels::decompress(
            self.allow_unsafe,
            &mut out.words[..span],
            self.live_words(),
            self.packed(),
        );
        let trimmed = logic::trimmed_len(&out.words[..span]);
        out.word_count_physical = trimmed;
        out.word_count_logical = trimmed;
        Ok(out)
    }

    // =========================================================================
    // Compaction support
    // =========================================================================

    /// Rebuild with every set bit `p` moved to `p - shifts[p]`.
    ///
    /// A negative shift deletes the bit. Returns whether any bit survived
    /// along with the rebuilt vector; callers drop entries whose vectors
    /// came back empty.
    pub fn optimize_read_phase(&self, shifts: &[i32]) -> Result<(bool, Vector)> {
        let mut out = Vector::new(self.compression, self.allow_unsafe)?;
        let mut any = false;
        for position in self.ones() {
            let shift = shifts.get(position as usize).copied().unwrap_or(0);
            if shift < 0 {
                continue;
            }
            out.set_bit(position - shift as u32, true)?;
            any = true;
        }
        Ok((any, out))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn set_word_literal_mode(&mut self, logical_pos: usize, w: Word) -> Result<()> {
        if !w.is_compressed() {
            if logical_pos < self.word_count_physical {
                self.words[logical_pos] = w;
            } else if w != Word::ZERO {
                self.extend_literal_to(logical_pos + 1);
                self.words[logical_pos] = w;
            }
            return Ok(());
        }
        // Expand a run into literal words; packed positions are not
        // recognized in this mode.
        let count = w.fill_count() as usize;
        if w.fill_bit() {
            if logical_pos + count > self.word_count_physical {
                self.extend_literal_to(logical_pos + count);
            }
            for slot in &mut self.words[logical_pos..logical_pos + count] {
                *slot = Word::ONES;
            }
        } else {
            let end = (logical_pos + count).min(self.word_count_physical);
            for slot in &mut self.words[logical_pos..end] {
                *slot = Word::ZERO;
            }
        }
        Ok(())
    }

    /// Forward write with validation already done; used by result builders
    /// whose cursors only move forward.
    fn write_forward(&mut self, logical_pos: usize, w: Word) {
        let outcome = self.set_word(logical_pos, w);
        debug_assert!(outcome.is_ok(), "builder cursor moved backwards");
    }

    fn is_zero_word(w: Word, packed: bool) -> bool {
        if !w.is_compressed() {
            return w == Word::ZERO;
        }
        !w.fill_bit() && !(packed && w.has_packed_word())
    }

    /// Append `n` logical zero words past the tail and start a fresh tail.
    fn zero_fill(&mut self, n: usize) {
        debug_assert!(n >= 1 && self.compressed_mode());
        let last = self.word_count_physical - 1;
        let tail = self.words[last];
        debug_assert!(!tail.is_compressed());
        let gap = n - 1;

        if tail.is_compressible() {
            // The tail joins the compressed body as (part of) a run.
            self.word_count_physical = last;
            self.append_run(tail.compressible_fill_bit(), 1);
            self.append_run(false, gap);
        } else if self.packed()
            && tail.literal_bits().count_ones() == 1
            && last >= 1
            && self.words[last - 1].is_compressed()
            && !self.words[last - 1].fill_bit()
            && !self.words[last - 1].has_packed_word()
        {
            // Fold a lone set bit into the preceding zero run.
            self.words[last - 1] = self.words[last - 1].pack(tail);
            self.word_count_physical = last;
            self.append_run(false, gap);
        } else {
            // An arbitrary literal stays in the body as-is.
            self.append_run(false, gap);
        }
        self.push_word(Word::ZERO);
        self.word_count_logical += n;
    }

    /// Append a fill run to the body, coalescing with a trailing packless
    /// run of the same bit and splitting on fill-count saturation.
    fn append_run(&mut self, bit: bool, count: usize) {
        let mut remaining = count;
        if remaining == 0 {
            return;
        }
        if self.word_count_physical >= 1 {
            let last = self.words[self.word_count_physical - 1];
            if last.is_compressed() && last.fill_bit() == bit && !last.has_packed_word() {
                let room = (MAX_FILL_COUNT - last.fill_count()) as usize;
                let take = remaining.min(room);
                if take > 0 {
                    self.words[self.word_count_physical - 1] =
                        last.set_fill_count(last.fill_count() + take as u32);
                    remaining -= take;
                }
            }
        }
        while remaining > 0 {
            let take = remaining.min(MAX_FILL_COUNT as usize);
            self.push_word(Word::fill(bit, take as u32));
            remaining -= take;
        }
    }

    fn push_word(&mut self, w: Word) {
        self.ensure_capacity(self.word_count_physical + 1);
        self.words[self.word_count_physical] = w;
        self.word_count_physical += 1;
    }

    /// Grow the literal region to exactly `logical` words, zeroing any
    /// slot left stale by an earlier trim.
    fn extend_literal_to(&mut self, logical: usize) {
        debug_assert!(!self.compressed_mode());
        self.ensure_capacity(logical);
        for slot in &mut self.words[self.word_count_physical..logical] {
            *slot = Word::ZERO;
        }
        self.word_count_physical = logical;
        self.word_count_logical = logical;
    }

    /// Grow the backing array to `max(needed, current * 1.1)`, minimum 2.
    fn ensure_capacity(&mut self, needed: usize) {
        if needed > self.words.len() {
            let grown = needed.max(self.words.len() + self.words.len() / 10).max(2);
            self.words.resize(grown, Word::ZERO);
        }
    }
}

fn compression_rank(compression: Compression) -> u8 {
    match compression {
        Compression::None => 0,
        Compression::Compressed => 1,
        Compression::CompressedWithPackedPosition => 2,
    }
}

/// Logical content equality, compression modes notwithstanding.
impl PartialEq for Vector {
    fn eq(&self, other: &Vector) -> bool {
        self.ones().eq(other.ones())
    }
}

impl Eq for Vector {}

/// Lazy ordered enumeration of bit positions holding a given value.
///
/// Borrows the vector's words for the lifetime of the iteration; the
/// vector must not be mutated while a stream is live (the borrow checker
/// enforces this).
#[derive(Debug)]
pub struct BitPositions<'a> {
    words: &'a [Word],
    packed: bool,
    value: bool,
    index: usize,
    mask: u32,
    word_base: u32,
    next_base: u32,
    fill_words: u32,
    pending_packed: Option<u32>,
}

impl<'a> BitPositions<'a> {
    fn new(words: &'a [Word], packed: bool, value: bool) -> Self {
        debug_assert!(value || words.iter().all(|w| !w.is_compressed()));
        BitPositions {
            words,
            packed,
            value,
            index: 0,
            mask: 0,
            word_base: 0,
            next_base: 0,
            fill_words: 0,
            pending_packed: None,
        }
    }

    #[inline]
    fn load_literal(&mut self, bits: u32) {
        self.mask = if self.value {
            bits
        } else {
            !bits & LITERAL_MASK
        };
        self.word_base = self.next_base;
        self.next_base += BITS_PER_WORD;
    }
}

impl Iterator for BitPositions<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        loop {
            if self.mask != 0 {
                let bit = self.mask.trailing_zeros();
                self.mask &= self.mask - 1;
                return Some(self.word_base + bit);
            }
            if self.fill_words > 0 {
                self.fill_words -= 1;
                self.load_literal(LITERAL_MASK);
                continue;
            }
            if let Some(bits) = self.pending_packed.take() {
                self.load_literal(bits);
                continue;
            }
            let w = *self.words.get(self.index)?;
            self.index += 1;
            if !w.is_compressed() {
                self.load_literal(w.literal_bits());
                continue;
            }
            let count = w.fill_count();
            if w.fill_bit() && self.value {
                self.fill_words = count;
            } else {
                self.next_base += BITS_PER_WORD * count;
            }
            if self.packed && w.has_packed_word() {
                self.pending_packed = Some(w.packed_word().literal_bits());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ones_of(v: &Vector) -> Vec<u32> {
        v.ones().collect()
    }

    #[test]
    fn test_new_is_single_zero_literal() {
        let v = Vector::new(Compression::Compressed, false).unwrap();
        assert_eq!(v.word_count_physical(), 1);
        assert_eq!(v.word_count_logical(), 1);
        assert_eq!(v.population(), 0);
        assert!(!v.population_any());
        assert!(!v.live_words()[0].is_compressed());
    }

    #[test]
    fn test_uncompressed_random_writes() {
        let mut v = Vector::new(Compression::None, false).unwrap();
        v.set_bit(100, true).unwrap();
        v.set_bit(3, true).unwrap();
        v.set_bit(100, false).unwrap();
        assert_eq!(ones_of(&v), vec![3]);
        assert!(v.get_bit(3));
        assert!(!v.get_bit(100));
        // Clearing past the tail is a no-op.
        v.set_bit(5000, false).unwrap();
        assert_eq!(v.word_count_logical(), 4);
    }

    #[test]
    fn test_compressed_forward_only() {
        let mut v = Vector::new(Compression::Compressed, false).unwrap();
        v.set_bit(200, true).unwrap();
        let err = v.set_bit(1, true).unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::ForwardOnlyViolation);
        // The tail word itself stays writable.
        v.set_bit(201, true).unwrap();
        v.set_bit(201, false).unwrap();
        assert_eq!(ones_of(&v), vec![200]);
    }

    #[test]
    fn test_zero_fill_coalesces_zero_runs() {
        let mut v = Vector::new(Compression::Compressed, false).unwrap();
        v.set_bit(1000, true).unwrap();
        v.set_bit(5000, true).unwrap();
        v.set_bit(90000, true).unwrap();
        assert_eq!(ones_of(&v), vec![1000, 5000, 90000]);
        // Runs dominate the storage: far fewer physical than logical words.
        assert!(v.word_count_physical() < 10);
        assert_eq!(v.word_count_logical(), 90000 / 31 + 1);
        assert!(!v.live_words()[v.word_count_physical() - 1].is_compressed());
    }

    #[test]
    fn test_zero_fill_coalesces_one_runs() {
        let mut v = Vector::new(Compression::Compressed, false).unwrap();
        // Two full words of ones back to back compress into one run.
        for pos in 0..62 {
            v.set_bit(pos, true).unwrap();
        }
        v.set_bit(200, true).unwrap();
        let runs: Vec<Word> = v
            .live_words()
            .iter()
            .copied()
            .filter(|w| w.is_compressed() && w.fill_bit())
            .collect();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].fill_count(), 2);
        assert_eq!(v.population(), 63);
    }

    #[test]
    fn test_zero_fill_packs_lone_bit() {
        let mut v = Vector::new(Compression::CompressedWithPackedPosition, false).unwrap();
        v.set_bit(0, true).unwrap();
        v.set_bit(62, true).unwrap();
        v.set_bit(93, true).unwrap();
        v.set_bit(1_000_000, true).unwrap();
        assert_eq!(v.population(), 4);
        assert_eq!(ones_of(&v), vec![0, 62, 93, 1_000_000]);
        assert!(v
            .live_words()
            .iter()
            .any(|w| w.is_compressed() && w.has_packed_word()));
        assert!(!v.live_words()[v.word_count_physical() - 1].is_compressed());
    }

    #[test]
    fn test_same_pattern_without_packing_stays_plain() {
        let mut v = Vector::new(Compression::Compressed, false).unwrap();
        v.set_bit(0, true).unwrap();
        v.set_bit(62, true).unwrap();
        v.set_bit(93, true).unwrap();
        assert_eq!(ones_of(&v), vec![0, 62, 93]);
        assert!(v.live_words().iter().all(|w| !w.is_compressed() || !w.has_packed_word()));
    }

    #[test]
    fn test_get_word_logical_reads_runs_and_packed() {
        let mut v = Vector::new(Compression::CompressedWithPackedPosition, false).unwrap();
        v.set_bit(0, true).unwrap();
        v.set_bit(93, true).unwrap();
        assert_eq!(v.get_word_logical(0).literal_bits(), 1);
        assert_eq!(v.get_word_logical(1), Word::ZERO);
        assert_eq!(v.get_word_logical(2), Word::ZERO);
        assert_eq!(v.get_word_logical(3).literal_bits(), 1);
        assert_eq!(v.get_word_logical(64), Word::ZERO);
    }

    #[test]
    fn test_set_word_compressed_appends_literal_tail() {
        let mut v = Vector::new(Compression::Compressed, false).unwrap();
        v.set_word(0, Word::literal(0b101)).unwrap();
        v.set_word(1, Word::fill(true, 3)).unwrap();
        assert!(!v.live_words()[v.word_count_physical() - 1].is_compressed());
        assert_eq!(v.word_count_logical(), 5);
        assert_eq!(v.population(), 2 + 31 * 3);
        // A zero run with no payload is canonicalized away.
        let before = v.word_count_physical();
        v.set_word(40, Word::fill(false, 7)).unwrap();
        assert_eq!(v.word_count_physical(), before);
    }

    #[test]
    fn test_and_in_place_rejected_on_compressed_self() {
        let mut a = Vector::new(Compression::Compressed, false).unwrap();
        let b = Vector::new(Compression::None, false).unwrap();
        assert_eq!(
            a.and_in_place(&b).unwrap_err().kind,
            crate::ErrorKind::UnsupportedOperation
        );
        assert_eq!(
            a.or_in_place(&b).unwrap_err().kind,
            crate::ErrorKind::UnsupportedOperation
        );
    }

    #[test]
    fn test_and_in_place_trims_zero_tail() {
        let mut a = Vector::new(Compression::None, false).unwrap();
        a.set_bit(5, true).unwrap();
        a.set_bit(400, true).unwrap();
        let mut b = Vector::new(Compression::None, false).unwrap();
        b.set_bit(5, true).unwrap();
        a.and_in_place(&b).unwrap();
        assert_eq!(ones_of(&a), vec![5]);
        assert_eq!(a.word_count_physical(), 1);
    }

    #[test]
    fn test_and_in_place_with_compressed_right() {
        let mut a = Vector::all_ones(700, false).unwrap();
        let mut b = Vector::new(Compression::CompressedWithPackedPosition, false).unwrap();
        b.set_bit(62, true).unwrap();
        b.set_bit(620, true).unwrap();
        a.and_in_place(&b).unwrap();
        assert_eq!(ones_of(&a), vec![62, 620]);
    }

    #[test]
    fn test_or_in_place_grows_left() {
        let mut a = Vector::new(Compression::None, false).unwrap();
        a.set_bit(1, true).unwrap();
        let mut b = Vector::new(Compression::Compressed, false).unwrap();
        b.set_bit(100, true).unwrap();
        b.set_bit(3100, true).unwrap();
        a.or_in_place(&b).unwrap();
        assert_eq!(ones_of(&a), vec![1, 100, 3100]);
    }

    #[test]
    fn test_and_out_of_place_matches_in_place() {
        let mut a = Vector::new(Compression::Compressed, false).unwrap();
        let mut b = Vector::new(Compression::Compressed, false).unwrap();
        for pos in [0u32, 30, 31, 62, 1000, 2000] {
            a.set_bit(pos, true).unwrap();
        }
        for pos in [30u32, 62, 999, 2000, 5000] {
            b.set_bit(pos, true).unwrap();
        }
        let c = a.and_out_of_place(&b, Compression::None).unwrap();
        assert_eq!(ones_of(&c), vec![30, 62, 2000]);
        let c2 = a
            .and_out_of_place(&b, Compression::CompressedWithPackedPosition)
            .unwrap();
        assert_eq!(ones_of(&c2), vec![30, 62, 2000]);
        assert_eq!(c, c2);
    }

    #[test]
    fn test_or_out_of_place_requires_two_inputs() {
        let a = Vector::new(Compression::None, false).unwrap();
        assert_eq!(
            Vector::or_out_of_place(&[&a]).unwrap_err().kind,
            crate::ErrorKind::ArgumentRequired
        );
    }

    #[test]
    fn test_or_out_of_place_unions() {
        let mut a = Vector::new(Compression::Compressed, false).unwrap();
        a.set_bit(10, true).unwrap();
        let mut b = Vector::new(Compression::None, false).unwrap();
        b.set_bit(20, true).unwrap();
        let mut c = Vector::new(Compression::CompressedWithPackedPosition, false).unwrap();
        c.set_bit(3000, true).unwrap();
        let u = Vector::or_out_of_place(&[&a, &b, &c]).unwrap();
        assert_eq!(u.compression(), Compression::None);
        assert_eq!(ones_of(&u), vec![10, 20, 3000]);
    }

    #[test]
    fn test_and_population_agrees_with_materialized() {
        let mut a = Vector::all_ones(2500, false).unwrap();
        a.set_bit(17, false).unwrap();
        let mut b = Vector::new(Compression::CompressedWithPackedPosition, false).unwrap();
        for pos in [17u32, 40, 1200, 2499] {
            b.set_bit(pos, true).unwrap();
        }
        let expected = a.and_out_of_place(&b, Compression::None).unwrap().population();
        assert_eq!(a.and_population(&b).unwrap(), expected);
        assert!(a.and_population_any(&b).unwrap());

        let both_compressed = Vector::new(Compression::Compressed, false).unwrap();
        let other = Vector::new(Compression::Compressed, false).unwrap();
        assert_eq!(
            both_compressed.and_population(&other).unwrap_err().kind,
            crate::ErrorKind::UnsupportedOperation
        );
    }

    #[test]
    fn test_bit_positions_false_unsupported_on_compressed() {
        let v = Vector::new(Compression::Compressed, false).unwrap();
        assert_eq!(
            v.bit_positions(false).unwrap_err().kind,
            crate::ErrorKind::UnsupportedOperation
        );
        let mut u = Vector::new(Compression::None, false).unwrap();
        u.set_bit(1, true).unwrap();
        let zeros: Vec<u32> = u.bit_positions(false).unwrap().collect();
        assert_eq!(zeros.len(), 30);
        assert!(!zeros.contains(&1));
    }

    #[test]
    fn test_decompress_round_trip() {
        let mut v = Vector::new(Compression::CompressedWithPackedPosition, false).unwrap();
        for pos in [0u32, 62, 93, 200, 6000] {
            v.set_bit(pos, true).unwrap();
        }
        let flat = v.decompress().unwrap();
        assert_eq!(flat.compression(), Compression::None);
        assert_eq!(ones_of(&flat), ones_of(&v));
        let back = Vector::from_vector(&flat, Compression::CompressedWithPackedPosition).unwrap();
        assert_eq!(back, v);
        assert_eq!(back.live_words(), v.live_words());
    }

    #[test]
    fn test_from_vector_same_mode_is_identical() {
        let mut v = Vector::new(Compression::Compressed, false).unwrap();
        for pos in [5u32, 31, 900] {
            v.set_bit(pos, true).unwrap();
        }
        let copy = Vector::from_vector(&v, Compression::Compressed).unwrap();
        assert_eq!(copy.live_words(), v.live_words());
        assert_eq!(copy.word_count_logical(), v.word_count_logical());
    }

    #[test]
    fn test_optimize_read_phase_identity_and_delete() {
        let mut v = Vector::new(Compression::Compressed, false).unwrap();
        for pos in [2u32, 40, 95] {
            v.set_bit(pos, true).unwrap();
        }
        let identity = vec![0i32; 100];
        let (alive, same) = v.optimize_read_phase(&identity).unwrap();
        assert!(alive);
        assert_eq!(same, v);
        assert_eq!(same.live_words(), v.live_words());

        // Delete position 40, shift everything above it down by one.
        let mut shifts = vec![0i32; 100];
        shifts[40] = -1;
        for shift in shifts.iter_mut().skip(41) {
            *shift = 1;
        }
        let (alive, moved) = v.optimize_read_phase(&shifts).unwrap();
        assert!(alive);
        assert_eq!(ones_of(&moved), vec![2, 94]);

        let everything: Vec<i32> = vec![-1; 100];
        let (alive, empty) = v.optimize_read_phase(&everything).unwrap();
        assert!(!alive);
        assert!(!empty.population_any());
    }

    #[test]
    fn test_all_ones_masks_partial_word() {
        let v = Vector::all_ones(33, false).unwrap();
        assert_eq!(v.population(), 33);
        assert_eq!(ones_of(&v), (0..33).collect::<Vec<u32>>());
        assert!(!v.get_bit(33));
    }

    #[test]
    fn test_clear_resets() {
        let mut v = Vector::new(Compression::Compressed, false).unwrap();
        v.set_bit(4000, true).unwrap();
        v.clear();
        assert_eq!(v.word_count_physical(), 1);
        assert_eq!(v.word_count_logical(), 1);
        assert!(!v.population_any());
        // Reuse after clear starts from position zero again.
        v.set_bit(7, true).unwrap();
        assert_eq!(ones_of(&v), vec![7]);
    }

    #[cfg(feature = "unsafe-kernels")]
    #[test]
    fn test_unsafe_vector_matches_safe() {
        let mut safe = Vector::all_ones(4096, false).unwrap();
        let mut fast = Vector::all_ones(4096, true).unwrap();
        let mut mask = Vector::new(Compression::CompressedWithPackedPosition, false).unwrap();
        for pos in [0u32, 31, 64, 1023, 4000] {
            mask.set_bit(pos, true).unwrap();
        }
        safe.and_in_place(&mask).unwrap();
        fast.and_in_place(&mask).unwrap();
        assert_eq!(safe, fast);
        assert_eq!(safe.live_words(), fast.live_words());
    }

    #[cfg(not(feature = "unsafe-kernels"))]
    #[test]
    fn test_unsafe_unavailable_without_feature() {
        let err = Vector::new(Compression::None, true).unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::UnsafeUnavailable);
    }
}
