//! Per-field specifications: the persisted, heritable configuration
//! (`RequiredSpc`) and the per-walk traversal state (`Specification`).

use fathom_core::datetime::UnitTime;
use fathom_core::{FieldType, FullType, TypeIndex, BAD_SLOT, DB_SLOT_RESERVED};
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use uuid::Uuid;
use xxhash_rust::xxh64::xxh64;

/// Default accuracy buckets for numeric types.
pub const DEF_ACC_NUMERIC: [u64; 6] = [100, 1_000, 10_000, 100_000, 1_000_000, 100_000_000];

/// Default accuracy units for `date`.
pub const DEF_ACC_DATE: [UnitTime; 5] = [
    UnitTime::Day,
    UnitTime::Month,
    UnitTime::Year,
    UnitTime::Decade,
    UnitTime::Century,
];

/// Default accuracy units for `datetime`.
pub const DEF_ACC_DATETIME: [UnitTime; 6] = [
    UnitTime::Hour,
    UnitTime::Day,
    UnitTime::Month,
    UnitTime::Year,
    UnitTime::Decade,
    UnitTime::Century,
];

/// Default accuracy units for `time` and `timedelta`.
pub const DEF_ACC_TIME: [UnitTime; 2] = [UnitTime::Minute, UnitTime::Hour];

/// Default HTM levels for `geo`.
pub const DEF_ACC_GEO: [u64; 6] = [3, 5, 8, 10, 12, 15];

/// Term prefix pair for a field path.
///
/// `field` accumulates along the resolved path; `uuid` is populated on
/// paths that go through a UUID-named dynamic segment, giving those
/// fields a second scope keyed by the concrete UUID.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Prefix {
    pub field: String,
    pub uuid: String,
}

/// Flag set of a field specification.
///
/// Heritable flags (`store`, `recurse`, `dynamic`, `strict`, the
/// detections, `partial_paths`) survive [`Specification::for_child`];
/// per-field flags reset at every path component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Flags {
    // Per-field
    pub bool_term: bool,
    pub partials: bool,
    pub is_namespace: bool,
    pub ngram: bool,
    pub cjk_ngram: bool,
    pub cjk_words: bool,
    pub static_endpoint: bool,
    // Heritable
    pub store: bool,
    pub recurse: bool,
    pub dynamic: bool,
    pub strict: bool,
    pub date_detection: bool,
    pub datetime_detection: bool,
    pub time_detection: bool,
    pub timedelta_detection: bool,
    pub numeric_detection: bool,
    pub geo_detection: bool,
    pub bool_detection: bool,
    pub text_detection: bool,
    pub uuid_detection: bool,
    pub partial_paths: bool,
    // Derived traversal bookkeeping
    pub field_found: bool,
    pub concrete: bool,
    pub complete: bool,
    pub uuid_field: bool,
    pub uuid_path: bool,
    pub has_uuid_prefix: bool,
    pub inside_namespace: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Flags {
            bool_term: false,
            partials: false,
            is_namespace: false,
            ngram: false,
            cjk_ngram: false,
            cjk_words: false,
            static_endpoint: false,
            store: true,
            recurse: true,
            dynamic: true,
            strict: false,
            date_detection: true,
            datetime_detection: true,
            time_detection: true,
            timedelta_detection: true,
            numeric_detection: true,
            geo_detection: true,
            bool_detection: true,
            text_detection: true,
            uuid_detection: true,
            partial_paths: false,
            field_found: false,
            concrete: false,
            complete: false,
            uuid_field: false,
            uuid_path: false,
            has_uuid_prefix: false,
            inside_namespace: false,
        }
    }
}

/// Stopword handling strategy for text fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StopStrategy {
    #[default]
    StopNone,
    StopAll,
    StopStemmed,
}

impl StopStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "stop_none" | "none" => StopStrategy::StopNone,
            "stop_all" | "all" => StopStrategy::StopAll,
            "stop_stemmed" | "stemmed" => StopStrategy::StopStemmed,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StopStrategy::StopNone => "stop_none",
            StopStrategy::StopAll => "stop_all",
            StopStrategy::StopStemmed => "stop_stemmed",
        }
    }
}

/// Stemming strategy for text fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StemStrategy {
    #[default]
    StemSome,
    StemNone,
    StemAll,
    StemAllZ,
}

impl StemStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "stem_some" | "some" => StemStrategy::StemSome,
            "stem_none" | "none" => StemStrategy::StemNone,
            "stem_all" | "all" => StemStrategy::StemAll,
            "stem_all_z" | "all_z" => StemStrategy::StemAllZ,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StemStrategy::StemSome => "stem_some",
            StemStrategy::StemNone => "stem_none",
            StemStrategy::StemAll => "stem_all",
            StemStrategy::StemAllZ => "stem_all_z",
        }
    }
}

/// How a UUID-named dynamic segment is indexed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UuidFieldIndex {
    /// Terms scoped by the concrete UUID prefix only
    #[default]
    UuidField,
    /// Terms scoped by the shared field prefix only
    UuidTerm,
    /// Both scopes
    Both,
}

impl UuidFieldIndex {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "uuid" | "uuid_field" => UuidFieldIndex::UuidField,
            "uuid_term" => UuidFieldIndex::UuidTerm,
            "both" => UuidFieldIndex::Both,
            _ => return None,
        })
    }
}

/// The persisted, heritable part of a field specification.
#[derive(Clone, Debug, PartialEq)]
pub struct RequiredSpc {
    pub sep_types: FullType,
    pub prefix: Prefix,
    pub slot: u32,
    pub accuracy: Vec<u64>,
    pub acc_prefix: Vec<String>,
    pub flags: Flags,
    pub language: String,
    pub stem_language: String,
    pub stop_strategy: StopStrategy,
    pub stem_strategy: StemStrategy,
    /// Geo trixel-error tolerance
    pub error: f64,
    /// For `foreign` fields, the URL of the external index
    pub endpoint: Option<String>,
}

impl Default for RequiredSpc {
    fn default() -> Self {
        RequiredSpc {
            sep_types: FullType::default(),
            prefix: Prefix::default(),
            slot: BAD_SLOT,
            accuracy: Vec::new(),
            acc_prefix: Vec::new(),
            flags: Flags::default(),
            language: "en".to_string(),
            stem_language: "en".to_string(),
            stop_strategy: StopStrategy::default(),
            stem_strategy: StemStrategy::default(),
            error: 0.3,
            endpoint: None,
        }
    }
}

impl RequiredSpc {
    /// The concrete terminal type.
    pub fn concrete_type(&self) -> FieldType {
        self.sep_types.concrete
    }

    /// Default accuracy list for a concrete type, in stored numeric
    /// form (bucket widths, `UnitTime` codes, or HTM levels).
    pub fn default_accuracy(t: FieldType) -> Vec<u64> {
        match t {
            FieldType::Integer | FieldType::Positive | FieldType::Floating => {
                DEF_ACC_NUMERIC.to_vec()
            }
            FieldType::Date => DEF_ACC_DATE.iter().map(|u| u.code()).collect(),
            FieldType::Datetime => DEF_ACC_DATETIME.iter().map(|u| u.code()).collect(),
            FieldType::Time | FieldType::Timedelta => {
                DEF_ACC_TIME.iter().map(|u| u.code()).collect()
            }
            FieldType::Geo => DEF_ACC_GEO.to_vec(),
            _ => Vec::new(),
        }
    }
}

/// Full per-walk specification: the heritable part plus per-document
/// traversal state that is never persisted.
#[derive(Clone, Debug)]
pub struct Specification {
    pub spc: RequiredSpc,
    /// Parallel per-position lists
    pub position: Vec<u32>,
    pub weight: Vec<u32>,
    pub spelling: Vec<bool>,
    pub positions: Vec<bool>,
    pub index: TypeIndex,
    pub index_uuid_field: UuidFieldIndex,
    /// Pending explicit `_value`
    pub value: Option<fathom_core::Value>,
    /// Pending cast-object value
    pub value_rec: Option<fathom_core::Value>,
    /// Current path component
    pub meta_name: String,
    /// Dotted path from the root
    pub full_meta_name: String,
    /// Prefixes of every ancestor, collected on partial-path fields
    pub partial_prefixes: Vec<Prefix>,
    /// Keys listed under `_ignore` at this level
    pub ignored: Vec<String>,
    /// Path depth (dotted components consumed so far)
    pub depth: usize,
    /// The local prefix piece the current component contributed
    pub last_local: String,
}

impl Default for Specification {
    fn default() -> Self {
        Specification {
            spc: RequiredSpc::default(),
            position: vec![0],
            weight: vec![1],
            spelling: vec![false],
            positions: vec![false],
            index: TypeIndex::ALL,
            index_uuid_field: UuidFieldIndex::default(),
            value: None,
            value_rec: None,
            meta_name: String::new(),
            full_meta_name: String::new(),
            partial_prefixes: Vec::new(),
            ignored: Vec::new(),
            depth: 0,
            last_local: String::new(),
        }
    }
}

impl Specification {
    /// Derive the specification a child path component starts from:
    /// heritable settings survive, per-field state resets.
    pub fn for_child(&self, name: &str) -> Specification {
        let mut child = self.clone();

        // Per-field flags reset
        child.spc.flags.bool_term = false;
        child.spc.flags.partials = false;
        child.spc.flags.is_namespace = false;
        child.spc.flags.ngram = false;
        child.spc.flags.cjk_ngram = false;
        child.spc.flags.cjk_words = false;
        child.spc.flags.static_endpoint = false;
        child.spc.flags.field_found = false;
        child.spc.flags.concrete = false;
        child.spc.flags.complete = false;
        child.spc.flags.uuid_field = false;

        // Per-field settings reset
        child.spc.sep_types = FullType::default();
        child.spc.slot = BAD_SLOT;
        child.spc.accuracy = Vec::new();
        child.spc.acc_prefix = Vec::new();
        child.spc.endpoint = None;
        child.value = None;
        child.value_rec = None;
        child.ignored = Vec::new();
        child.last_local = String::new();

        child.meta_name = name.to_string();
        if child.full_meta_name.is_empty() {
            child.full_meta_name = name.to_string();
        } else {
            child.full_meta_name = format!("{}.{}", child.full_meta_name, name);
        }
        child.depth += 1;
        child
    }

    /// Record the current prefix as a partial path level.
    pub fn push_partial_prefix(&mut self) {
        self.partial_prefixes.push(self.spc.prefix.clone());
    }
}

/// Deterministic term prefix for a field path.
pub fn field_prefix(full_name: &str) -> String {
    format!("F{:06x}", xxh64(full_name.as_bytes(), 0) & 0xff_ffff)
}

/// Deterministic term prefix for a concrete UUID segment, derived from
/// the canonical UUID bytes so spelling variants collapse.
pub fn uuid_prefix(uuid: &Uuid) -> String {
    format!("U{:06x}", xxh64(uuid.as_bytes(), 0) & 0xff_ffff)
}

/// Accuracy-bucket prefix for a field prefix.
pub fn acc_prefix_for(prefix: &str, acc_label: &str) -> String {
    format!("{}#{}", prefix, acc_label)
}

/// Value slot derived from a term prefix, avoiding the reserved band.
pub fn slot_for(prefix: &str) -> u32 {
    let mut slot = (xxh64(prefix.as_bytes(), 0) & 0xffff_ffff) as u32;
    if slot < DB_SLOT_RESERVED {
        slot += DB_SLOT_RESERVED;
    }
    if slot == BAD_SLOT {
        slot -= 1;
    }
    slot
}

/// Render an accuracy entry the way `_accuracy` stores it: unit names
/// for temporal types, plain numbers otherwise.
pub fn accuracy_label(t: FieldType, acc: u64) -> String {
    if t.is_temporal() {
        UnitTime::from_code(acc)
            .map(|u| u.as_str().to_string())
            .unwrap_or_else(|| acc.to_string())
    } else {
        acc.to_string()
    }
}

/// Per-type specification for the global (cross-field) index axes.
pub struct GlobalSpc {
    pub prefix: String,
    pub slot: u32,
    pub accuracy: Vec<u64>,
    pub acc_prefix: Vec<String>,
}

/// Global per-type specs, process-initialised once.
pub static GLOBAL_SPCS: Lazy<FxHashMap<FieldType, GlobalSpc>> = Lazy::new(|| {
    let mut map = FxHashMap::default();
    for t in [
        FieldType::Boolean,
        FieldType::Integer,
        FieldType::Positive,
        FieldType::Floating,
        FieldType::Date,
        FieldType::Datetime,
        FieldType::Time,
        FieldType::Timedelta,
        FieldType::Keyword,
        FieldType::Text,
        FieldType::String,
        FieldType::Uuid,
        FieldType::Geo,
    ] {
        let prefix = format!("G{}", t.term_marker() as char);
        let accuracy = RequiredSpc::default_accuracy(t);
        let acc_prefix = accuracy
            .iter()
            .map(|&a| acc_prefix_for(&prefix, &accuracy_label(t, a)))
            .collect();
        let slot = slot_for(&prefix);
        map.insert(
            t,
            GlobalSpc {
                prefix,
                slot,
                accuracy,
                acc_prefix,
            },
        );
    }
    map
});

/// Look up the global spec for a concrete type.
pub fn global_spc(t: FieldType) -> Option<&'static GlobalSpc> {
    GLOBAL_SPCS.get(&t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_child_inheritance() {
        let mut parent = Specification::default();
        parent.spc.flags.strict = true;
        parent.spc.flags.bool_term = true;
        parent.spc.flags.is_namespace = true;
        parent.spc.slot = 42;
        parent.full_meta_name = "a".to_string();

        let child = parent.for_child("b");
        assert!(child.spc.flags.strict, "heritable flag survives");
        assert!(!child.spc.flags.bool_term, "per-field flag resets");
        assert!(!child.spc.flags.is_namespace, "per-field flag resets");
        assert_eq!(child.spc.slot, BAD_SLOT, "slot resets");
        assert_eq!(child.full_meta_name, "a.b");
        assert_eq!(child.depth, parent.depth + 1);
    }

    #[test]
    fn test_prefixes_deterministic() {
        assert_eq!(field_prefix("age"), field_prefix("age"));
        assert_ne!(field_prefix("age"), field_prefix("name"));
        let u = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(uuid_prefix(&u), uuid_prefix(&u));
    }

    #[test]
    fn test_slot_avoids_reserved_band() {
        for name in ["age", "name", "created", "loc", "x", "y"] {
            let slot = slot_for(&field_prefix(name));
            assert!(slot >= DB_SLOT_RESERVED);
            assert_ne!(slot, BAD_SLOT);
        }
    }

    #[test]
    fn test_default_accuracy_tables() {
        assert_eq!(
            RequiredSpc::default_accuracy(FieldType::Positive),
            DEF_ACC_NUMERIC.to_vec()
        );
        assert_eq!(RequiredSpc::default_accuracy(FieldType::Date).len(), 5);
        assert_eq!(RequiredSpc::default_accuracy(FieldType::Datetime).len(), 6);
        assert_eq!(RequiredSpc::default_accuracy(FieldType::Geo).len(), 6);
        assert!(RequiredSpc::default_accuracy(FieldType::Text).is_empty());
    }

    #[test]
    fn test_accuracy_labels() {
        assert_eq!(accuracy_label(FieldType::Positive, 1000), "1000");
        assert_eq!(
            accuracy_label(FieldType::Date, UnitTime::Month.code()),
            "month"
        );
    }

    #[test]
    fn test_global_spcs() {
        let g = global_spc(FieldType::Positive).unwrap();
        assert_eq!(g.accuracy, DEF_ACC_NUMERIC.to_vec());
        assert_eq!(g.acc_prefix.len(), g.accuracy.len());
        assert!(global_spc(FieldType::Object).is_none());
    }
}
