//! # ewfkit Core
//!
//! Shared error type, capability traits, and enums for the ewfkit project.
//!
//! The actual Expert Witness Format engine lives in `ewfkit-ewf`; this crate
//! only holds what the engine and its consumers need to agree on:
//! - **Error**: one structured error enum for the whole engine
//! - **Compressor/Decompressor**: the injected DEFLATE capability
//! - **Enums**: format family, media type, compression level, tolerance

pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used items
pub use error::{Error, IoErrorKind, IoOp, Result};
pub use traits::{Compressor, Decompressor};
pub use types::{
    AccessMode, CompressionLevel, EwfFormat, MediaFlags, MediaType, Tolerance,
};
