//! Error types shared by every crate.

use thiserror::Error;

use crate::PaletteIndex;

/// Core error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A GPU record was shorter than its layout.
    #[error("read of {wanted} bytes at offset {offset} past end of {len}-byte record")]
    ShortRecord { wanted: usize, offset: usize, len: usize },

    /// Palette index 0 always means empty.
    #[error("palette index {0} is reserved")]
    ReservedPaletteIndex(PaletteIndex),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
