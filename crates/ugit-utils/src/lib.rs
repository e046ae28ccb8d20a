//! Foundation utilities shared across the ugit workspace.

pub mod cancel;
pub mod date;
pub mod error;
pub mod progress;

pub use bstr::{BStr, BString, ByteSlice, ByteVec};
pub use error::UtilError;

pub type Result<T> = std::result::Result<T, UtilError>;
