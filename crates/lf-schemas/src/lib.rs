//! lf-schemas
//!
//! Wire-level data model for the market line feed: update containers, priced
//! lines, alternate lines, and the composite line key used to address them.
//!
//! Numeric fields stay as [`serde_json::Number`] so values are carried through
//! exactly as the upstream service sent them (no float rounding at the
//! boundary).

pub mod documents;
mod flatten;
mod key;
mod line;

pub use flatten::{flatten_odds, updates_from_selection, KeyedLines, SchemaError};
pub use key::LineKey;
pub use line::{epoch_millis, AlternateLine, MarketLine, MarketLineUpdate};
