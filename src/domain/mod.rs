//! Domain layer types and invariants.

pub mod error;
pub mod render;
pub mod storage_key;
