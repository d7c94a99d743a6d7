//! Per-centroid posting lists: the inverted file itself.

use crate::error::{Error, Result};

/// One coarse centroid's posting list: three parallel arrays carrying the
/// external id, residual PQ code, and norm PQ code of every database
/// vector assigned to this centroid.
///
/// Append-only (§3 lifecycle: posting lists grow under `add_batch` and are
/// otherwise immutable). `codes` is a flat byte buffer rather than
/// `Vec<Vec<u8>>` so a scan walks one contiguous allocation.
#[derive(Debug, Clone, Default)]
pub struct PostingList {
    ids: Vec<u32>,
    codes: Vec<u8>,
    norm_codes: Vec<u8>,
}

impl PostingList {
    /// An empty posting list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vectors assigned to this centroid.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no vectors have been assigned to this centroid.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// External ids, in append order.
    #[must_use]
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    /// Flattened residual PQ codes, `len() * code_size` bytes.
    #[must_use]
    pub fn codes(&self) -> &[u8] {
        &self.codes
    }

    /// Norm PQ codes, one byte per entry.
    #[must_use]
    pub fn norm_codes(&self) -> &[u8] {
        &self.norm_codes
    }

    /// Appends one vector's id, residual code (`code_size` bytes), and
    /// norm code.
    pub fn push(&mut self, id: u32, code: &[u8], norm_code: u8) {
        self.ids.push(id);
        self.codes.extend_from_slice(code);
        self.norm_codes.push(norm_code);
    }

    /// Checks the §8 posting-list-parity invariant:
    /// `len(ids) == len(norm_codes) == len(codes) / code_size`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`] if the arrays have drifted out of sync.
    pub fn check_parity(&self, code_size: usize) -> Result<()> {
        if self.norm_codes.len() != self.ids.len() {
            return Err(Error::Invariant(format!(
                "posting list parity violated: {} ids but {} norm codes",
                self.ids.len(),
                self.norm_codes.len()
            )));
        }
        if code_size > 0 && self.codes.len() != self.ids.len() * code_size {
            return Err(Error::Invariant(format!(
                "posting list parity violated: {} ids but {} code bytes (code_size={})",
                self.ids.len(),
                self.codes.len(),
                code_size
            )));
        }
        Ok(())
    }

    /// Reconstructs a `PostingList` from its three raw parts (used by
    /// `crate::ivf::persistence` on load). Does not validate parity; call
    /// [`Self::check_parity`] after construction if needed.
    #[must_use]
    pub fn from_parts(ids: Vec<u32>, codes: Vec<u8>, norm_codes: Vec<u8>) -> Self {
        Self {
            ids,
            codes,
            norm_codes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_list_is_empty() {
        let list = PostingList::new();
        assert_eq!(list.len(), 0);
        assert!(list.is_empty());
        assert!(list.check_parity(8).is_ok());
    }

    #[test]
    fn push_keeps_parallel_arrays_in_sync() {
        let mut list = PostingList::new();
        list.push(7, &[1, 2, 3, 4], 9);
        list.push(11, &[5, 6, 7, 8], 200);

        assert_eq!(list.len(), 2);
        assert_eq!(list.ids(), &[7, 11]);
        assert_eq!(list.codes(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(list.norm_codes(), &[9, 200]);
        assert!(list.check_parity(4).is_ok());
    }

    #[test]
    fn check_parity_rejects_mismatched_code_size() {
        let mut list = PostingList::new();
        list.push(1, &[1, 2, 3, 4], 0);
        assert!(list.check_parity(5).is_err());
    }
}

#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    fn entry_strategy(code_size: usize) -> impl Strategy<Value = (u32, Vec<u8>, u8)> {
        (
            any::<u32>(),
            proptest::collection::vec(any::<u8>(), code_size),
            any::<u8>(),
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_parity_holds_after_any_sequence_of_pushes(
            code_size in 1usize..=16,
            entries in proptest::collection::vec(any::<(u32, u8)>(), 0usize..=40),
        ) {
            let mut list = PostingList::new();
            for (id, norm_code) in entries {
                let code = vec![id as u8; code_size];
                list.push(id, &code, norm_code);
            }
            prop_assert!(list.check_parity(code_size).is_ok());
            prop_assert_eq!(list.ids().len(), list.len());
            prop_assert_eq!(list.norm_codes().len(), list.len());
            prop_assert_eq!(list.codes().len(), list.len() * code_size);
        }

        #[test]
        fn prop_push_preserves_append_order(entry in entry_strategy(4)) {
            let (id, code, norm_code) = entry;
            let mut list = PostingList::new();
            list.push(id, &code, norm_code);
            list.push(id.wrapping_add(1), &code, norm_code.wrapping_add(1));

            prop_assert_eq!(list.ids()[0], id);
            prop_assert_eq!(list.ids()[1], id.wrapping_add(1));
            prop_assert_eq!(&list.codes()[0..4], &code[..]);
            prop_assert_eq!(list.norm_codes()[0], norm_code);
        }
    }
}
