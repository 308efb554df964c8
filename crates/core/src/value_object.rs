//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects (a coordinate triple, a zone set, a placement snapshot) have no
/// identity and are compared by their attribute values. They are immutable: a
/// changed value is a new value.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
