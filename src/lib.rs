//! PlantUML to PNG rendering gateway.
//!
//! Diagrams posted to `/plantuml2png` are rendered by the PlantUML CLI inside
//! a per-request scratch directory, then either returned inline or uploaded
//! to S3-compatible object storage behind a public URL.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
