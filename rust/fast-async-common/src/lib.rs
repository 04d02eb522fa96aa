//! Error and result definitions relied upon by all fast-async-* crates.

pub mod error;
pub mod result;

pub use error::{Error, ErrorKind, StdErrorBoxed, StdErrorShared};
pub use result::Result;
