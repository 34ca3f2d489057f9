//! Application services: rendering, publishing and request orchestration.

pub mod error;
pub mod gateway;
pub mod render;
pub mod storage;
