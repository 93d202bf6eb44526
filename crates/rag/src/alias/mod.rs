//! Alias registry and automatic relationship discovery
//!
//! Discovery scans the document set for term relations (parentheticals,
//! dashes, headings, team addresses, co-occurrence) and persists them as
//! alias edges. The registry is a lock-light read view rebuilt from the
//! database; retrieval consults it for query expansion and chunk tagging.

mod discovery;
mod registry;

pub use discovery::{AliasDiscovery, DiscoveredEdge, DiscoveryReport};
pub use registry::AliasRegistry;
