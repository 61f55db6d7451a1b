//! Immutable-field declarations
//!
//! Classes list the fields compiled code may treat as constants:
//!
//! | Declaration | Meaning                                   |
//! |-------------|-------------------------------------------|
//! | `a`         | never written after construction          |
//! | `a?`        | quasi-immutable: writes invalidate        |
//! | `a[*]`      | array whose items are immutable           |
//! | `a?[*]`     | quasi-immutable array                     |

use crate::error::{Error, Result};
use bitflags::bitflags;
use regex::Regex;
use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

bitflags! {
    /// How compiled code may treat a field
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FieldFlags: u8 {
        const IMMUTABLE = 0b001;
        const QUASI_IMMUTABLE = 0b010;
        const ARRAY = 0b100;
    }
}

fn spec_regex() -> &'static Regex {
    static SPEC: OnceLock<Regex> = OnceLock::new();
    SPEC.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)(\?)?(\[\*\])?$").unwrap_or_else(|e| panic!("bad field spec regex: {e}"))
    })
}

/// One parsed declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: Arc<str>,
    pub flags: FieldFlags,
}

impl FieldSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let caps = spec_regex()
            .captures(spec.trim())
            .ok_or_else(|| Error::field_spec(spec, "expected `name`, `name?`, `name[*]` or `name?[*]`"))?;
        let mut flags = if caps.get(2).is_some() {
            FieldFlags::QUASI_IMMUTABLE
        } else {
            FieldFlags::IMMUTABLE
        };
        if caps.get(3).is_some() {
            flags |= FieldFlags::ARRAY;
        }
        Ok(Self {
            name: Arc::from(&caps[1]),
            flags,
        })
    }

    pub fn is_quasi_immutable(&self) -> bool {
        self.flags.contains(FieldFlags::QUASI_IMMUTABLE)
    }
}

/// The immutable-field declarations of one class
#[derive(Debug, Clone, Default)]
pub struct ImmutableFields {
    fields: HashMap<Arc<str>, FieldFlags>,
}

impl ImmutableFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a declaration list such as `["a?", "items[*]"]`
    pub fn parse(specs: &[&str]) -> Result<Self> {
        let mut fields = HashMap::default();
        for spec in specs {
            let parsed = FieldSpec::parse(spec)?;
            if fields.insert(parsed.name.clone(), parsed.flags).is_some() {
                return Err(Error::field_spec(*spec, "field declared twice"));
            }
        }
        Ok(Self { fields })
    }

    pub fn flags(&self, field: &str) -> FieldFlags {
        self.fields.get(field).copied().unwrap_or_else(FieldFlags::empty)
    }

    pub fn is_quasi_immutable(&self, field: &str) -> bool {
        self.flags(field).contains(FieldFlags::QUASI_IMMUTABLE)
    }

    pub fn is_immutable(&self, field: &str) -> bool {
        self.flags(field).contains(FieldFlags::IMMUTABLE)
    }

    /// Declared field names, in no particular order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|name| &**name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
