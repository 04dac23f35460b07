//! Entry filtering for logsieve
//!
//! This crate decides which stream entries are kept: text matchers, the
//! [`EntryFilter`] predicate, the memoizing [`BundleIdentityResolver`], and a
//! ring buffer for retained entries.

mod buffer;
pub mod bundle;
mod error;
mod filter;
mod text;

pub use buffer::{ArcStreamEntry, LogBuffer};
pub use bundle::{BundleIdentityResolver, BundleMetadata, InfoPlist};
pub use error::FilterError;
pub use filter::EntryFilter;
pub use text::{TextFilter, TextMatcher, TextMode};

// Re-export types used in our public API
pub use logsieve_types::{MessageEvent, MessageEventError, StreamEntry};
