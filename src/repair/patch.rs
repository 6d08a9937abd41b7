//! Patch container and random source for neighbour generation.

use rand::prelude::*;

/// An ordered sequence of edits applied to the original program.
///
/// Equality and hashing are order-sensitive over the edit sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Patch<E> {
    edits: Vec<E>,
}

impl<E> Default for Patch<E> {
    fn default() -> Self {
        Self { edits: Vec::new() }
    }
}

impl<E> Patch<E> {
    /// Create an empty patch (the unmodified program).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an edit.
    pub fn add(&mut self, edit: E) {
        self.edits.push(edit);
    }

    /// Remove and return the edit at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn remove(&mut self, index: usize) -> E {
        self.edits.remove(index)
    }

    /// Number of edits.
    #[inline]
    pub fn len(&self) -> usize {
        self.edits.len()
    }

    /// Whether the patch has no edits.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Edits in application order.
    pub fn edits(&self) -> &[E] {
        &self.edits
    }
}

impl<E> FromIterator<E> for Patch<E> {
    fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
        Self {
            edits: iter.into_iter().collect(),
        }
    }
}

/// Seedable random number generator threaded through the search.
pub struct SearchRng {
    rng: StdRng,
}

impl SearchRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Derive an independent stream, e.g. one per parallel epoch.
    pub fn derive(seed: u64, stream: u64) -> Self {
        Self::new(seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    /// Fair coin flip.
    pub fn coin(&mut self) -> bool {
        self.rng.gen_bool(0.5)
    }

    /// Uniform index in `0..len`. `len` must be non-zero.
    pub fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }

    /// Uniformly chosen element.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.rng)
    }

    /// Access the underlying generator.
    pub fn inner(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}
