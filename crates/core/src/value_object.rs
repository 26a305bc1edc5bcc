//! Value object marker.

/// Immutable values compared by their attributes, never by identity.
///
/// Snapshots embedded in purchase orders are value objects: once captured they
/// are copied around, never refreshed from the source record.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
