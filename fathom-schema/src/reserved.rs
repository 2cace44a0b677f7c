//! Reserved keys.
//!
//! Every key starting with `_` belongs to the schema, not to the
//! document. The set is closed: unknown underscore keys are rejected
//! unless listed under `_ignore`.

/// Key of the properties tree inside the persisted schema root.
pub const RESERVED_SCHEMA: &str = "schema";

/// Schema key a UUID-named dynamic segment resolves to: all UUID keys
/// under one parent share this canonical sub-schema node.
pub const UUID_FIELD_NAME: &str = "<uuid_field>";

/// The document id field.
pub const ID_FIELD_NAME: &str = "_id";

pub const RESERVED_TYPE: &str = "_type";
pub const RESERVED_SLOT: &str = "_slot";
pub const RESERVED_PREFIX: &str = "_prefix";
pub const RESERVED_ACCURACY: &str = "_accuracy";
pub const RESERVED_ACC_PREFIX: &str = "_acc_prefix";
pub const RESERVED_INDEX: &str = "_index";
pub const RESERVED_INDEX_UUID_FIELD: &str = "_index_uuid_field";
pub const RESERVED_BOOL_TERM: &str = "_bool_term";
pub const RESERVED_VALUE: &str = "_value";
pub const RESERVED_STORE: &str = "_store";
pub const RESERVED_RECURSE: &str = "_recurse";
pub const RESERVED_DYNAMIC: &str = "_dynamic";
pub const RESERVED_STRICT: &str = "_strict";
pub const RESERVED_IGNORE: &str = "_ignore";
pub const RESERVED_POSITION: &str = "_position";
pub const RESERVED_WEIGHT: &str = "_weight";
pub const RESERVED_SPELLING: &str = "_spelling";
pub const RESERVED_POSITIONS: &str = "_positions";
pub const RESERVED_LANGUAGE: &str = "_language";
pub const RESERVED_STEM_LANGUAGE: &str = "_stem_language";
pub const RESERVED_STOP_STRATEGY: &str = "_stop_strategy";
pub const RESERVED_STEM_STRATEGY: &str = "_stem_strategy";
pub const RESERVED_PARTIALS: &str = "_partials";
pub const RESERVED_PARTIAL_PATHS: &str = "_partial_paths";
pub const RESERVED_NAMESPACE: &str = "_namespace";
pub const RESERVED_ERROR: &str = "_error";
pub const RESERVED_ENDPOINT: &str = "_endpoint";
pub const RESERVED_SCRIPT: &str = "_script";
pub const RESERVED_SCHEMA_KEY: &str = "_schema";
pub const RESERVED_SETTINGS: &str = "_settings";
pub const RESERVED_DATA: &str = "_data";
pub const RESERVED_NGRAM: &str = "_ngram";
pub const RESERVED_CJK_NGRAM: &str = "_cjk_ngram";
pub const RESERVED_CJK_WORDS: &str = "_cjk_words";
pub const RESERVED_DATE_DETECTION: &str = "_date_detection";
pub const RESERVED_DATETIME_DETECTION: &str = "_datetime_detection";
pub const RESERVED_TIME_DETECTION: &str = "_time_detection";
pub const RESERVED_TIMEDELTA_DETECTION: &str = "_timedelta_detection";
pub const RESERVED_NUMERIC_DETECTION: &str = "_numeric_detection";
pub const RESERVED_POSITIVE_DETECTION: &str = "_positive_detection";
pub const RESERVED_GEO_DETECTION: &str = "_geo_detection";
pub const RESERVED_BOOL_DETECTION: &str = "_bool_detection";
pub const RESERVED_TEXT_DETECTION: &str = "_text_detection";
pub const RESERVED_UUID_DETECTION: &str = "_uuid_detection";
pub const RESERVED_STATIC_ENDPOINT: &str = "_static_endpoint";

// Cast-object keys: a one-entry map {"_point": {...}} forces the value
// type regardless of detection.
pub const RESERVED_CAST_KEYWORD: &str = "_keyword";
pub const RESERVED_CAST_TEXT: &str = "_text";
pub const RESERVED_CAST_STRING: &str = "_string";
pub const RESERVED_CAST_INTEGER: &str = "_integer";
pub const RESERVED_CAST_POSITIVE: &str = "_positive";
pub const RESERVED_CAST_FLOAT: &str = "_float";
pub const RESERVED_CAST_BOOLEAN: &str = "_boolean";
pub const RESERVED_CAST_DATE: &str = "_date";
pub const RESERVED_CAST_DATETIME: &str = "_datetime";
pub const RESERVED_CAST_TIME: &str = "_time";
pub const RESERVED_CAST_TIMEDELTA: &str = "_timedelta";
pub const RESERVED_CAST_UUID: &str = "_uuid";
pub const RESERVED_CAST_GEO: &str = "_geo";
pub const RESERVED_CAST_POINT: &str = "_point";
pub const RESERVED_CAST_CIRCLE: &str = "_circle";
pub const RESERVED_CAST_POLYGON: &str = "_polygon";
pub const RESERVED_CAST_CHULL: &str = "_chull";
pub const RESERVED_CAST_MULTIPOINT: &str = "_multipoint";

use fathom_core::FieldType;

/// Whether `key` lives in the reserved namespace.
pub fn is_reserved(key: &str) -> bool {
    key.starts_with('_')
}

/// Whether `key` is one of the known reserved keys (cast keys
/// included).
pub fn is_known(key: &str) -> bool {
    matches!(
        key,
        ID_FIELD_NAME
            | RESERVED_TYPE
            | RESERVED_SLOT
            | RESERVED_PREFIX
            | RESERVED_ACCURACY
            | RESERVED_ACC_PREFIX
            | RESERVED_INDEX
            | RESERVED_INDEX_UUID_FIELD
            | RESERVED_BOOL_TERM
            | RESERVED_VALUE
            | RESERVED_STORE
            | RESERVED_RECURSE
            | RESERVED_DYNAMIC
            | RESERVED_STRICT
            | RESERVED_IGNORE
            | RESERVED_POSITION
            | RESERVED_WEIGHT
            | RESERVED_SPELLING
            | RESERVED_POSITIONS
            | RESERVED_LANGUAGE
            | RESERVED_STEM_LANGUAGE
            | RESERVED_STOP_STRATEGY
            | RESERVED_STEM_STRATEGY
            | RESERVED_PARTIALS
            | RESERVED_PARTIAL_PATHS
            | RESERVED_NAMESPACE
            | RESERVED_ERROR
            | RESERVED_ENDPOINT
            | RESERVED_SCRIPT
            | RESERVED_SCHEMA_KEY
            | RESERVED_SETTINGS
            | RESERVED_DATA
            | RESERVED_NGRAM
            | RESERVED_CJK_NGRAM
            | RESERVED_CJK_WORDS
            | RESERVED_DATE_DETECTION
            | RESERVED_DATETIME_DETECTION
            | RESERVED_TIME_DETECTION
            | RESERVED_TIMEDELTA_DETECTION
            | RESERVED_NUMERIC_DETECTION
            | RESERVED_POSITIVE_DETECTION
            | RESERVED_GEO_DETECTION
            | RESERVED_BOOL_DETECTION
            | RESERVED_TEXT_DETECTION
            | RESERVED_UUID_DETECTION
            | RESERVED_STATIC_ENDPOINT
    ) || cast_type(key).is_some()
}

/// The concrete type a cast-object key forces, if `key` is one.
pub fn cast_type(key: &str) -> Option<FieldType> {
    Some(match key {
        RESERVED_CAST_KEYWORD => FieldType::Keyword,
        RESERVED_CAST_TEXT => FieldType::Text,
        RESERVED_CAST_STRING => FieldType::String,
        RESERVED_CAST_INTEGER => FieldType::Integer,
        RESERVED_CAST_POSITIVE => FieldType::Positive,
        RESERVED_CAST_FLOAT => FieldType::Floating,
        RESERVED_CAST_BOOLEAN => FieldType::Boolean,
        RESERVED_CAST_DATE => FieldType::Date,
        RESERVED_CAST_DATETIME => FieldType::Datetime,
        RESERVED_CAST_TIME => FieldType::Time,
        RESERVED_CAST_TIMEDELTA => FieldType::Timedelta,
        RESERVED_CAST_UUID => FieldType::Uuid,
        RESERVED_CAST_GEO | RESERVED_CAST_POINT | RESERVED_CAST_CIRCLE
        | RESERVED_CAST_POLYGON | RESERVED_CAST_CHULL | RESERVED_CAST_MULTIPOINT => FieldType::Geo,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_keys() {
        assert!(is_known("_type"));
        assert!(is_known("_point"));
        assert!(is_known("_uuid_detection"));
        assert!(!is_known("_frobnicate"));
        assert!(is_reserved("_frobnicate"));
        assert!(!is_reserved("age"));
    }

    #[test]
    fn test_cast_types() {
        assert_eq!(cast_type("_integer"), Some(FieldType::Integer));
        assert_eq!(cast_type("_point"), Some(FieldType::Geo));
        assert_eq!(cast_type("_type"), None);
    }
}
