//! Cache keys: what a derived value was computed from, and how.
//!
//! A key pairs a [`DependencySet`] (the entity versions the value was produced
//! from) with a [`Descriptor`] (which computation ran over them). Keys are built
//! once and never mutated; two keys are equal iff both halves are equal.

use std::fmt;

use super::versions::{EntityId, Version};

/// Ordered `(id, version)` pairs a value depends on
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DependencySet(Vec<(EntityId, Version)>);

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: EntityId, version: Version) {
        self.0.push((id, version));
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (EntityId, Version)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Does any pair reference `id`, at any version
    pub fn references(&self, id: &EntityId) -> bool {
        self.0.iter().any(|(dep, _)| dep == id)
    }
}

impl FromIterator<(EntityId, Version)> for DependencySet {
    fn from_iter<T: IntoIterator<Item = (EntityId, Version)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a DependencySet {
    type Item = &'a (EntityId, Version);
    type IntoIter = std::slice::Iter<'a, (EntityId, Version)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// One structurally comparable descriptor parameter.
///
/// Floats are stored by bit pattern so descriptors stay `Eq + Hash`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Param {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(u32),
    Str(String),
    Id(EntityId),
    List(Vec<Param>),
    Nested(Box<Descriptor>),
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Param::Bool(v)
    }
}

impl From<i32> for Param {
    fn from(v: i32) -> Self {
        Param::Int(v as i64)
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int(v)
    }
}

impl From<u32> for Param {
    fn from(v: u32) -> Self {
        Param::UInt(v as u64)
    }
}

impl From<u64> for Param {
    fn from(v: u64) -> Self {
        Param::UInt(v)
    }
}

impl From<usize> for Param {
    fn from(v: usize) -> Self {
        Param::UInt(v as u64)
    }
}

impl From<f32> for Param {
    fn from(v: f32) -> Self {
        Param::Float(v.to_bits())
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Str(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Str(v)
    }
}

impl From<EntityId> for Param {
    fn from(v: EntityId) -> Self {
        Param::Id(v)
    }
}

impl From<Descriptor> for Param {
    fn from(v: Descriptor) -> Self {
        Param::Nested(Box::new(v))
    }
}

impl<T: Into<Param>> From<Vec<T>> for Param {
    fn from(v: Vec<T>) -> Self {
        Param::List(v.into_iter().map(Into::into).collect())
    }
}

/// Tag + parameters naming a computation, e.g. `thumbnail(w, h, layer)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Descriptor {
    tag: String,
    params: Vec<Param>,
}

impl Descriptor {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            params: Vec::new(),
        }
    }

    /// Builder-style parameter append
    pub fn with(mut self, param: impl Into<Param>) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.tag, self.params)
    }
}

/// Immutable `(DependencySet, Descriptor)` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    deps: DependencySet,
    descriptor: Descriptor,
}

impl CacheKey {
    pub fn new(deps: DependencySet, descriptor: Descriptor) -> Self {
        Self { deps, descriptor }
    }

    pub fn deps(&self) -> &DependencySet {
        &self.deps
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} over {} deps", self.descriptor, self.deps.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(pairs: &[(&str, Version)]) -> DependencySet {
        pairs.iter().map(|(id, v)| (EntityId::from(*id), *v)).collect()
    }

    #[test]
    fn test_key_equality_needs_both_halves() {
        let a = CacheKey::new(deps(&[("f1", 0)]), Descriptor::new("thumbnail").with(64u32).with(36u32));
        let b = CacheKey::new(deps(&[("f1", 0)]), Descriptor::new("thumbnail").with(64u32).with(36u32));
        let other_version = CacheKey::new(deps(&[("f1", 1)]), Descriptor::new("thumbnail").with(64u32).with(36u32));
        let other_size = CacheKey::new(deps(&[("f1", 0)]), Descriptor::new("thumbnail").with(32u32).with(36u32));

        assert_eq!(a, b);
        assert_ne!(a, other_version);
        assert_ne!(a, other_size);
    }

    #[test]
    fn test_dependency_order_matters() {
        let ab = deps(&[("a", 0), ("b", 0)]);
        let ba = deps(&[("b", 0), ("a", 0)]);
        assert_ne!(ab, ba);
        assert!(ab.references(&"b".into()));
        assert!(!ab.references(&"c".into()));
    }

    #[test]
    fn test_float_params_compare_by_bits() {
        let a = Descriptor::new("mask").with(0.5f32);
        let b = Descriptor::new("mask").with(0.5f32);
        let c = Descriptor::new("mask").with(0.25f32);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
