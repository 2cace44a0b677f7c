//! The closed field type system: concrete types, modifier tuples and
//! index policies.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

/// Concrete field type tag.
///
/// `Foreign`, `Object` and `Array` double as the modifier words of a
/// [`FullType`]; every other variant is a terminal type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Empty,
    Boolean,
    Integer,
    Positive,
    Floating,
    Date,
    Datetime,
    Time,
    Timedelta,
    Keyword,
    Text,
    String,
    Uuid,
    Geo,
    Script,
    Foreign,
    Object,
    Array,
}

impl FieldType {
    /// Canonical lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Empty => "empty",
            FieldType::Boolean => "boolean",
            FieldType::Integer => "integer",
            FieldType::Positive => "positive",
            FieldType::Floating => "floating",
            FieldType::Date => "date",
            FieldType::Datetime => "datetime",
            FieldType::Time => "time",
            FieldType::Timedelta => "timedelta",
            FieldType::Keyword => "keyword",
            FieldType::Text => "text",
            FieldType::String => "string",
            FieldType::Uuid => "uuid",
            FieldType::Geo => "geo",
            FieldType::Script => "script",
            FieldType::Foreign => "foreign",
            FieldType::Object => "object",
            FieldType::Array => "array",
        }
    }

    /// Single-byte marker embedded in generated terms to scope them by
    /// concrete type.
    pub const fn term_marker(self) -> u8 {
        match self {
            FieldType::Empty => b'E',
            FieldType::Boolean => b'B',
            FieldType::Integer => b'N',
            FieldType::Positive => b'P',
            FieldType::Floating => b'F',
            FieldType::Date => b'D',
            FieldType::Datetime => b'D',
            FieldType::Time => b'T',
            FieldType::Timedelta => b'Z',
            FieldType::Keyword => b'K',
            FieldType::Text => b'S',
            FieldType::String => b'S',
            FieldType::Uuid => b'U',
            FieldType::Geo => b'G',
            FieldType::Script => b'X',
            FieldType::Foreign => b'E',
            FieldType::Object => b'E',
            FieldType::Array => b'E',
        }
    }

    /// Whether values of this type carry accuracy buckets
    pub fn has_accuracy(self) -> bool {
        matches!(
            self,
            FieldType::Integer
                | FieldType::Positive
                | FieldType::Floating
                | FieldType::Date
                | FieldType::Datetime
                | FieldType::Time
                | FieldType::Timedelta
                | FieldType::Geo
        )
    }

    /// Whether this is one of the temporal types
    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            FieldType::Date | FieldType::Datetime | FieldType::Time | FieldType::Timedelta
        )
    }

    /// Whether this is a string-shaped type (keyword/text/string)
    pub fn is_stringy(self) -> bool {
        matches!(
            self,
            FieldType::Keyword | FieldType::Text | FieldType::String
        )
    }
}

impl FromStr for FieldType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "empty" => FieldType::Empty,
            "boolean" => FieldType::Boolean,
            "integer" => FieldType::Integer,
            "positive" => FieldType::Positive,
            "floating" | "float" => FieldType::Floating,
            "date" => FieldType::Date,
            "datetime" => FieldType::Datetime,
            "time" => FieldType::Time,
            "timedelta" => FieldType::Timedelta,
            "keyword" | "term" => FieldType::Keyword,
            "text" => FieldType::Text,
            "string" => FieldType::String,
            "uuid" => FieldType::Uuid,
            "geo" | "geospatial" => FieldType::Geo,
            "script" => FieldType::Script,
            "foreign" => FieldType::Foreign,
            "object" => FieldType::Object,
            "array" => FieldType::Array,
            _ => return Err(Error::client(format!("Unknown field type: {:?}", s))),
        })
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field's full type: three modifier flags plus one concrete type.
///
/// Canonical string form is `foreign/object/array/concrete` with absent
/// parts omitted; the parser accepts the modifier words in any order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FullType {
    pub foreign: bool,
    pub object: bool,
    pub array: bool,
    pub concrete: FieldType,
}

impl FullType {
    /// A plain concrete type without modifiers
    pub fn concrete(concrete: FieldType) -> Self {
        Self {
            foreign: false,
            object: false,
            array: false,
            concrete,
        }
    }

    /// Whether nothing at all has been assigned yet
    pub fn is_empty(&self) -> bool {
        !self.foreign && !self.object && !self.array && self.concrete == FieldType::Empty
    }

    /// Parse a type string such as `"array/object/integer"`.
    ///
    /// Modifier words may appear in any order; at most one concrete type
    /// is accepted and it must come last.
    pub fn parse(s: &str) -> Result<Self> {
        let mut full = FullType::default();
        let mut tokens = s.split('/').map(str::trim).peekable();
        while let Some(tok) = tokens.next() {
            let is_last = tokens.peek().is_none();
            match tok {
                "foreign" => {
                    if full.foreign {
                        return Err(Error::client(format!("Duplicate 'foreign' in type {:?}", s)));
                    }
                    full.foreign = true;
                }
                "object" => {
                    if full.object {
                        return Err(Error::client(format!("Duplicate 'object' in type {:?}", s)));
                    }
                    full.object = true;
                }
                "array" => {
                    if full.array {
                        return Err(Error::client(format!("Duplicate 'array' in type {:?}", s)));
                    }
                    full.array = true;
                }
                other => {
                    if !is_last {
                        return Err(Error::client(format!(
                            "Concrete type {:?} must come last in {:?}",
                            other, s
                        )));
                    }
                    full.concrete = other.parse()?;
                    if matches!(
                        full.concrete,
                        FieldType::Foreign | FieldType::Object | FieldType::Array
                    ) {
                        return Err(Error::client(format!(
                            "{:?} is a modifier, not a concrete type",
                            other
                        )));
                    }
                }
            }
        }
        Ok(full)
    }
}

impl fmt::Display for FullType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(4);
        if self.foreign {
            parts.push("foreign");
        }
        if self.object {
            parts.push("object");
        }
        if self.array {
            parts.push("array");
        }
        if self.concrete != FieldType::Empty || parts.is_empty() {
            parts.push(self.concrete.as_str());
        }
        f.write_str(&parts.join("/"))
    }
}

/// Index policy: which of the four axes (field/global × terms/values)
/// a field participates in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TypeIndex(u8);

impl TypeIndex {
    pub const NONE: TypeIndex = TypeIndex(0b0000);
    pub const FIELD_TERMS: TypeIndex = TypeIndex(0b0001);
    pub const FIELD_VALUES: TypeIndex = TypeIndex(0b0010);
    pub const FIELD_ALL: TypeIndex = TypeIndex(0b0011);
    pub const GLOBAL_TERMS: TypeIndex = TypeIndex(0b0100);
    pub const GLOBAL_VALUES: TypeIndex = TypeIndex(0b1000);
    pub const GLOBAL_ALL: TypeIndex = TypeIndex(0b1100);
    pub const TERMS: TypeIndex = TypeIndex(0b0101);
    pub const VALUES: TypeIndex = TypeIndex(0b1010);
    pub const ALL: TypeIndex = TypeIndex(0b1111);

    /// Whether field-scoped terms are generated
    pub fn field_terms(self) -> bool {
        self.0 & Self::FIELD_TERMS.0 != 0
    }

    /// Whether field-scoped value slots are written
    pub fn field_values(self) -> bool {
        self.0 & Self::FIELD_VALUES.0 != 0
    }

    /// Whether global (per-type) terms are generated
    pub fn global_terms(self) -> bool {
        self.0 & Self::GLOBAL_TERMS.0 != 0
    }

    /// Whether global (per-type) value slots are written
    pub fn global_values(self) -> bool {
        self.0 & Self::GLOBAL_VALUES.0 != 0
    }

    /// Whether either terms axis is active
    pub fn some_terms(self) -> bool {
        self.field_terms() || self.global_terms()
    }

    /// Parse a comma-separated list of policy atoms, any order.
    pub fn parse(s: &str) -> Result<Self> {
        let mut out = TypeIndex::NONE;
        for atom in s.split(',').map(str::trim).filter(|a| !a.is_empty()) {
            out |= match atom {
                "none" => TypeIndex::NONE,
                "field_terms" => TypeIndex::FIELD_TERMS,
                "field_values" => TypeIndex::FIELD_VALUES,
                "field" | "field_all" => TypeIndex::FIELD_ALL,
                "global_terms" => TypeIndex::GLOBAL_TERMS,
                "global_values" => TypeIndex::GLOBAL_VALUES,
                "global" | "global_all" => TypeIndex::GLOBAL_ALL,
                "terms" => TypeIndex::TERMS,
                "values" => TypeIndex::VALUES,
                "all" => TypeIndex::ALL,
                _ => {
                    return Err(Error::client(format!("Unknown index policy: {:?}", atom)));
                }
            };
        }
        Ok(out)
    }

    /// Canonical string form: a single name when one exists, otherwise a
    /// comma-separated pair.
    pub fn as_string(self) -> String {
        match self {
            TypeIndex::NONE => "none".to_string(),
            TypeIndex::FIELD_TERMS => "field_terms".to_string(),
            TypeIndex::FIELD_VALUES => "field_values".to_string(),
            TypeIndex::FIELD_ALL => "field_all".to_string(),
            TypeIndex::GLOBAL_TERMS => "global_terms".to_string(),
            TypeIndex::GLOBAL_VALUES => "global_values".to_string(),
            TypeIndex::GLOBAL_ALL => "global_all".to_string(),
            TypeIndex::TERMS => "terms".to_string(),
            TypeIndex::VALUES => "values".to_string(),
            TypeIndex::ALL => "all".to_string(),
            other => {
                // One of the six crosses: field part first, then global
                let mut parts = Vec::new();
                match other.0 & 0b0011 {
                    0b0001 => parts.push("field_terms"),
                    0b0010 => parts.push("field_values"),
                    0b0011 => parts.push("field_all"),
                    _ => {}
                }
                match other.0 & 0b1100 {
                    0b0100 => parts.push("global_terms"),
                    0b1000 => parts.push("global_values"),
                    0b1100 => parts.push("global_all"),
                    _ => {}
                }
                parts.join(",")
            }
        }
    }
}

impl BitOr for TypeIndex {
    type Output = TypeIndex;

    fn bitor(self, rhs: TypeIndex) -> TypeIndex {
        TypeIndex(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for TypeIndex {
    type Output = TypeIndex;

    fn bitand(self, rhs: TypeIndex) -> TypeIndex {
        TypeIndex(self.0 & rhs.0)
    }
}

impl BitOrAssign for TypeIndex {
    fn bitor_assign(&mut self, rhs: TypeIndex) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for TypeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_type_round_trip() {
        for s in [
            "integer",
            "array/integer",
            "object/array/integer",
            "foreign/object",
            "foreign/object/array/text",
            "empty",
        ] {
            let t = FullType::parse(s).unwrap();
            assert_eq!(t.to_string(), s, "canonical form of {:?}", s);
            assert_eq!(FullType::parse(&t.to_string()).unwrap(), t);
        }
    }

    #[test]
    fn test_full_type_permutations() {
        let canonical = FullType::parse("foreign/object/array/integer").unwrap();
        for s in [
            "array/object/foreign/integer",
            "object/foreign/array/integer",
            "array/foreign/object/integer",
        ] {
            assert_eq!(FullType::parse(s).unwrap(), canonical);
        }
    }

    #[test]
    fn test_full_type_rejects_misplaced_concrete() {
        assert!(FullType::parse("integer/array").is_err());
        assert!(FullType::parse("object/object").is_err());
    }

    #[test]
    fn test_type_index_parse_any_order() {
        assert_eq!(
            TypeIndex::parse("global_terms,field_terms").unwrap(),
            TypeIndex::TERMS
        );
        assert_eq!(
            TypeIndex::parse("field_values, global_values").unwrap(),
            TypeIndex::VALUES
        );
        assert_eq!(TypeIndex::parse("terms,values").unwrap(), TypeIndex::ALL);
        assert!(TypeIndex::parse("bogus").is_err());
    }

    #[test]
    fn test_type_index_canonical() {
        assert_eq!(TypeIndex::ALL.as_string(), "all");
        assert_eq!(
            (TypeIndex::FIELD_TERMS | TypeIndex::GLOBAL_VALUES).as_string(),
            "field_terms,global_values"
        );
        assert_eq!(
            (TypeIndex::FIELD_ALL | TypeIndex::GLOBAL_TERMS).as_string(),
            "field_all,global_terms"
        );
        // Round-trip the six crosses
        for cross in [
            TypeIndex::FIELD_TERMS | TypeIndex::GLOBAL_VALUES,
            TypeIndex::FIELD_VALUES | TypeIndex::GLOBAL_TERMS,
            TypeIndex::FIELD_ALL | TypeIndex::GLOBAL_TERMS,
            TypeIndex::FIELD_ALL | TypeIndex::GLOBAL_VALUES,
            TypeIndex::FIELD_TERMS | TypeIndex::GLOBAL_ALL,
            TypeIndex::FIELD_VALUES | TypeIndex::GLOBAL_ALL,
        ] {
            assert_eq!(TypeIndex::parse(&cross.as_string()).unwrap(), cross);
        }
    }
}
