/// Core value types shared across the pipeline.
pub mod core;
/// Error taxonomy and result alias.
pub mod error;
/// Pixel arithmetic and stable hashing helpers.
pub mod math;
