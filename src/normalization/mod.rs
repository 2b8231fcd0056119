//! Canonicalization of raw variant display attributes into comparison keys.
//!
//! Upstream variant identifiers are not stable across catalog refreshes, so
//! variant identity is derived from what a shopper actually sees: the display
//! color and the named option properties. Two normalization strictness
//! levels exist for the properties side (see [`props`]); the stored side was
//! not always written with today's rules, and the looser key absorbs that
//! drift.

pub mod color;
pub mod props;

pub use color::color_key;
pub use props::{canonical_props, props_compare_key, strip_for_compare};
