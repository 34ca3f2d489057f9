//! Object-storage keys for uploaded diagrams.
//!
//! Keys look like `<folder>/<YYYYMMDD-HHMMSS>-<uuid>.png`. The timestamp
//! keeps listings roughly chronological; the UUID keeps keys unique when two
//! uploads land in the same second.

use std::fmt;

use time::OffsetDateTime;
use uuid::Uuid;

use super::render::PNG_EXTENSION;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    /// Mint a fresh key under `folder` for an upload completing at `at`.
    pub fn generate(folder: &str, at: OffsetDateTime) -> Self {
        let stamp = format!(
            "{:04}{:02}{:02}-{:02}{:02}{:02}",
            at.year(),
            at.month() as u8,
            at.day(),
            at.hour(),
            at.minute(),
            at.second()
        );
        let suffix = Uuid::new_v4().simple();
        Self(format!("{folder}/{stamp}-{suffix}.{PNG_EXTENSION}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
