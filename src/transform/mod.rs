//! The transformation kit: small, composable IR rewrite helpers.
//!
//! Every helper accepts the current [`Walker`](crate::ir::Walker) and
//! returns an updated cursor addressing the instruction it logically
//! consumed; emitted instructions are inserted *before* that position.
//! The caller decides whether to advance.

pub mod byteswap;
pub mod indices;
pub mod sign;

pub use byteswap::insert_byte_swap;
pub use indices::insert_calculate_indices;
pub use sign::{insert_make_positive, insert_restore_sign, insert_sign_extension, SignSplit};
