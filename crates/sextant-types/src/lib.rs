//! Shared primitives for the Sextant crates.
//!
//! - [`pin`]: one live store handle per database path
//! - [`time`]: timestamp formatting that sorts lexicographically in SQLite

pub mod pin;
pub mod time;

pub use pin::{PathPin, PinError};
pub use time::{format_ts, now_ts, parse_ts};
