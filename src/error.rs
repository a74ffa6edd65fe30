//! Errors surfaced by `ChainedHashMap`.

use crate::memory::AllocError;
use thiserror::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum MapError {
    /// `at`/`at_mut` on a key that is not present.
    #[error("key not found")]
    KeyNotFound,
    #[error(transparent)]
    Alloc(#[from] AllocError),
}
