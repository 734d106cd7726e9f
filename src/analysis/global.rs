//! Per-block whole-method analysis.
//!
//! A [`GlobalAnalysis`] applies a per-block transfer function to every
//! block of a method independently and stores the resulting pre- and
//! post-values keyed by block identity. It does not iterate to a fixed
//! point; callers needing fixed-point results compose local or global
//! analyses under their own driver.

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::ir::block::{BasicBlock, BlockId};
use crate::ir::method::Method;

/// A whole-method analysis producing `(pre, post)` values per block.
pub struct GlobalAnalysis<V, F>
where
    F: Fn(&BasicBlock) -> (V, V),
{
    transfer: F,
    results: FxHashMap<BlockId, (V, V)>,
}

impl<V, F> GlobalAnalysis<V, F>
where
    F: Fn(&BasicBlock) -> (V, V),
{
    /// Creates the analysis with the given per-block transfer function.
    #[must_use]
    pub fn new(transfer: F) -> Self {
        Self {
            transfer,
            results: FxHashMap::default(),
        }
    }

    /// Analyzes every block of `method` and fills the result store.
    pub fn analyze(&mut self, method: &Method) {
        for block in method.blocks() {
            let values = (self.transfer)(block);
            self.results.insert(block.id(), values);
        }
    }

    /// The pre-value of `block` (before the block executes).
    ///
    /// # Errors
    ///
    /// [`Error::UnknownKey`] if the block was not analyzed.
    pub fn initial_result(&self, block: BlockId) -> Result<&V> {
        self.results
            .get(&block)
            .map(|(pre, _)| pre)
            .ok_or_else(|| Error::UnknownKey {
                detail: format!("block B{}", block.index()),
            })
    }

    /// The post-value of `block` (after the block executes).
    ///
    /// # Errors
    ///
    /// [`Error::UnknownKey`] if the block was not analyzed.
    pub fn final_result(&self, block: BlockId) -> Result<&V> {
        self.results
            .get(&block)
            .map(|(_, post)| post)
            .ok_or_else(|| Error::UnknownKey {
                detail: format!("block B{}", block.index()),
            })
    }
}
