//! Feed handling: hardened RSS/Atom extraction and the permissive
//! published-date policy.

pub mod dates;
pub mod parser;

pub use parser::{parse_feed, MAX_ELEMENT_DEPTH, MAX_FEED_BYTES};
