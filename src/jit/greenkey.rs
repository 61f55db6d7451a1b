//! Specialization keys ("green keys")

use crate::quasi_immut::ObjectId;
use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// One compile-time constant of a specialization key
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum GreenValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Arc<str>),
    Ref(ObjectId),
}

impl GreenValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            GreenValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ref_id(&self) -> Option<ObjectId> {
        match self {
            GreenValue::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// Name of the variant, used to check key shapes
    pub fn kind_name(&self) -> &'static str {
        match self {
            GreenValue::Int(_) => "int",
            GreenValue::Float(_) => "float",
            GreenValue::Bool(_) => "bool",
            GreenValue::Str(_) => "str",
            GreenValue::Ref(_) => "ref",
        }
    }
}

// Floats compare by bit pattern so keys stay usable as hash map keys.
impl PartialEq for GreenValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (GreenValue::Int(a), GreenValue::Int(b)) => a == b,
            (GreenValue::Float(a), GreenValue::Float(b)) => a.to_bits() == b.to_bits(),
            (GreenValue::Bool(a), GreenValue::Bool(b)) => a == b,
            (GreenValue::Str(a), GreenValue::Str(b)) => a == b,
            (GreenValue::Ref(a), GreenValue::Ref(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for GreenValue {}

impl Hash for GreenValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            GreenValue::Int(v) => v.hash(state),
            GreenValue::Float(v) => v.to_bits().hash(state),
            GreenValue::Bool(v) => v.hash(state),
            GreenValue::Str(v) => v.hash(state),
            GreenValue::Ref(v) => v.hash(state),
        }
    }
}

impl fmt::Display for GreenValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GreenValue::Int(v) => write!(f, "{}", v),
            GreenValue::Float(v) => write!(f, "{:?}", v),
            GreenValue::Bool(v) => write!(f, "{}", v),
            GreenValue::Str(v) => write!(f, "{:?}", v),
            GreenValue::Ref(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for GreenValue {
    fn from(v: i64) -> Self {
        GreenValue::Int(v)
    }
}

impl From<i32> for GreenValue {
    fn from(v: i32) -> Self {
        GreenValue::Int(v as i64)
    }
}

impl From<f64> for GreenValue {
    fn from(v: f64) -> Self {
        GreenValue::Float(v)
    }
}

impl From<bool> for GreenValue {
    fn from(v: bool) -> Self {
        GreenValue::Bool(v)
    }
}

impl From<&str> for GreenValue {
    fn from(v: &str) -> Self {
        GreenValue::Str(Arc::from(v))
    }
}

impl From<ObjectId> for GreenValue {
    fn from(v: ObjectId) -> Self {
        GreenValue::Ref(v)
    }
}

/// Ordered, immutable tuple of green values identifying one specialization
/// of an entry point. Equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SpecializationKey(Arc<[GreenValue]>);

impl SpecializationKey {
    pub fn new<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<GreenValue>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&GreenValue> {
        self.0.get(index)
    }

    /// Integer value at `index`, if it is an integer
    pub fn get_int(&self, index: usize) -> Option<i64> {
        self.get(index).and_then(GreenValue::as_int)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GreenValue> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[GreenValue] {
        &self.0
    }
}

impl fmt::Display for SpecializationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    #[test]
    fn test_structural_equality() {
        let a = SpecializationKey::new([4i64, 1]);
        let b = SpecializationKey::new([4i64, 1]);
        let c = SpecializationKey::new([1i64, 4]);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = FxHashSet::default();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }

    #[test]
    fn test_mixed_values() {
        let key = SpecializationKey::new(vec![
            GreenValue::from("bytecode"),
            GreenValue::from(12i64),
            GreenValue::from(true),
            GreenValue::from(ObjectId(9)),
        ]);
        assert_eq!(key.len(), 4);
        assert_eq!(key.get_int(1), Some(12));
        assert_eq!(key.get_int(0), None);
        assert_eq!(key.get(3).and_then(GreenValue::as_ref_id), Some(ObjectId(9)));
        assert_eq!(key.to_string(), "(\"bytecode\", 12, true, #9)");
    }

    #[test]
    fn test_float_keys_compare_bitwise() {
        let nan = SpecializationKey::new([f64::NAN]);
        assert_eq!(nan, nan.clone());
        assert_ne!(SpecializationKey::new([0.0f64]), SpecializationKey::new([-0.0f64]));
    }

    #[test]
    fn test_different_variants_never_equal() {
        assert_ne!(GreenValue::Int(1), GreenValue::Bool(true));
        assert_ne!(GreenValue::Int(1), GreenValue::Float(1.0));
    }

    #[test]
    fn test_serialize() {
        let key = SpecializationKey::new([4i64, 2]);
        assert_eq!(serde_json::to_string(&key).unwrap(), "[4,2]");
    }
}
