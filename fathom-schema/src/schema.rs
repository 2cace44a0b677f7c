//! The schema engine.
//!
//! A [`Schema`] wraps the shared, immutable properties tree plus a
//! shadow copy (`mut_schema`) that accumulates changes during a walk.
//! On success the caller publishes the shadow via
//! [`Schema::get_modified_schema`]; on error it is simply dropped and
//! the externally-visible schema is unchanged.
//!
//! Every walk runs the same three-phase dance per path component:
//! *feed* the stored specification into the traversal state, *process*
//! user-supplied reserved keys (which may only widen what is stored),
//! and *write* the resolved specification back for newly discovered
//! fields.

use crate::generate_terms::{self, prefixed};
use crate::ids::{self, ScriptHook, ShardStats};
use crate::reserved::*;
use crate::spc::{
    accuracy_label, acc_prefix_for, field_prefix, global_spc, slot_for, uuid_prefix, Specification,
    StemStrategy, StopStrategy, UuidFieldIndex,
};
use fathom_core::datetime::{Tm, UnitTime};
use fathom_core::htm::HtmRange;
use fathom_core::{
    htm, serialise, Document, Error, FieldType, FullType, Object, Query, Result, TypeIndex, Value,
    BAD_SLOT, DB_SLOT_ID, LIMIT_PARTIAL_PATHS_DEPTH,
};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Term prefix of the reserved document-id field.
const ID_PREFIX: &str = "Q";

/// What a walk is allowed to do.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Full walk: build a document, extend the schema
    Index,
    /// Reshape the schema only; no document is built
    Update,
}

/// Accumulated value-slot contents for one walk.
enum SlotAcc {
    Items(Vec<Vec<u8>>),
    Ranges(Vec<HtmRange>),
}

struct WalkCtx {
    mode: Mode,
    doc: Document,
    data: Object,
    slots: FxHashMap<u32, SlotAcc>,
}

impl WalkCtx {
    fn new(mode: Mode) -> Self {
        WalkCtx {
            mode,
            doc: Document::new(),
            data: Object::new(),
            slots: FxHashMap::default(),
        }
    }

    fn push_slot_item(&mut self, slot: u32, bytes: Vec<u8>) {
        match self
            .slots
            .entry(slot)
            .or_insert_with(|| SlotAcc::Items(Vec::new()))
        {
            SlotAcc::Items(items) => items.push(bytes),
            SlotAcc::Ranges(_) => {}
        }
    }

    fn push_slot_ranges(&mut self, slot: u32, ranges: &[HtmRange]) {
        match self
            .slots
            .entry(slot)
            .or_insert_with(|| SlotAcc::Ranges(Vec::new()))
        {
            SlotAcc::Ranges(acc) => acc.extend_from_slice(ranges),
            SlotAcc::Items(_) => {}
        }
    }
}

/// Length-prefixed list encoding for multi-valued slots.
fn string_list(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for item in items {
        out.extend_from_slice(&(item.len() as u32).to_be_bytes());
        out.extend_from_slice(item);
    }
    out
}

/// Outcome of [`Schema::index`].
#[derive(Debug)]
pub struct IndexOutcome {
    /// The reserved id term (always present on the document)
    pub term_id: Vec<u8>,
    /// The built document
    pub document: Document,
    /// Echo of the persisted stored data
    pub data: Value,
    /// The canonical document id
    pub document_id: Value,
}

/// A field resolved at query time.
#[derive(Clone, Debug)]
pub struct DataField {
    pub field_type: FieldType,
    pub prefix: String,
    pub slot: u32,
    pub accuracy: Vec<u64>,
    pub acc_prefix: Vec<String>,
    pub bool_term: bool,
    pub inside_namespace: bool,
    /// Set when the path named an accuracy bucket directly
    /// (`age_1000`, `created_month`)
    pub acc: Option<u64>,
}

/// A self-describing, dynamically-evolvable typed schema.
pub struct Schema {
    orig: Arc<Value>,
    mut_schema: Option<Value>,
}

impl Schema {
    /// An empty schema root.
    pub fn empty_root() -> Value {
        let mut root = Object::new();
        root.insert(RESERVED_SCHEMA, Value::Map(Object::new()));
        Value::Map(root)
    }

    /// Wrap a shared schema value, validating its shape.
    pub fn new(shared: Arc<Value>) -> Result<Self> {
        let root = shared
            .as_object()
            .ok_or_else(|| Error::corruption("schema root is not a map"))?;
        match root.get(RESERVED_SCHEMA) {
            Some(Value::Map(_)) => {}
            Some(_) => return Err(Error::corruption("schema properties is not a map")),
            None => return Err(Error::corruption("schema root has no properties")),
        }
        Ok(Schema {
            orig: shared,
            mut_schema: None,
        })
    }

    /// A fresh empty schema.
    pub fn new_empty() -> Self {
        Schema {
            orig: Arc::new(Self::empty_root()),
            mut_schema: None,
        }
    }

    /// The schema value readers currently see (shadow included).
    pub fn current(&self) -> &Value {
        self.mut_schema.as_ref().unwrap_or(&self.orig)
    }

    /// Commit the shadow copy, if any walk modified the schema.
    ///
    /// The caller swaps the returned value in for the published schema;
    /// dropping the `Schema` instead discards all accumulated changes.
    pub fn get_modified_schema(&mut self) -> Option<Arc<Value>> {
        self.mut_schema.take().map(Arc::new)
    }

    fn props(&self) -> &Object {
        // Shape validated on construction and preserved by writes.
        self.current()
            .as_object()
            .and_then(|root| root.get(RESERVED_SCHEMA))
            .and_then(Value::as_object)
            .expect("schema root validated on construction")
    }

    /// The schema node at `path`, if present.
    fn node(&self, path: &[String]) -> Option<&Object> {
        let mut cur = self.props();
        for key in path {
            cur = cur.get(key)?.as_object()?;
        }
        Some(cur)
    }

    /// The mutable schema node at `path`, creating the shadow copy and
    /// any missing intermediate nodes.
    fn node_mut(&mut self, path: &[String]) -> &mut Object {
        if self.mut_schema.is_none() {
            self.mut_schema = Some((*self.orig).clone());
        }
        let mut cur = self
            .mut_schema
            .as_mut()
            .unwrap()
            .as_object_mut()
            .expect("schema root validated on construction")
            .entry_or(RESERVED_SCHEMA, Value::Map(Object::new()))
            .as_object_mut()
            .expect("schema properties validated on construction");
        for key in path {
            cur = match cur.entry_or(key, Value::Map(Object::new())) {
                Value::Map(m) => m,
                other => {
                    // A concrete leaf is being widened into an object.
                    *other = Value::Map(Object::new());
                    other.as_object_mut().unwrap()
                }
            };
        }
        cur
    }

    fn write_key(&mut self, path: &[String], key: &str, value: Value) {
        self.node_mut(path).insert(key, value);
    }

    // === Feeding ===

    /// Copy a stored node's reserved keys into the traversal state
    /// without marking them as user-set.
    fn feed(&self, path: &[String], spc: &mut Specification) -> Result<()> {
        let Some(node) = self.node(path) else {
            return Ok(());
        };
        spc.spc.flags.field_found = true;
        for (key, value) in node.iter() {
            if !is_reserved(key) && key != UUID_FIELD_NAME {
                continue;
            }
            match key {
                RESERVED_TYPE => {
                    let s = value
                        .as_str()
                        .ok_or_else(|| Error::corruption("_type is not a string"))?;
                    spc.spc.sep_types = FullType::parse(s)
                        .map_err(|e| Error::corruption(format!("stored _type: {}", e)))?;
                    if spc.spc.sep_types.concrete != FieldType::Empty {
                        spc.spc.flags.concrete = true;
                    }
                }
                RESERVED_PREFIX => {
                    if let Some(s) = value.as_str() {
                        spc.last_local = s.to_string();
                    }
                }
                RESERVED_SLOT => {
                    if let Some(v) = value.as_u64() {
                        spc.spc.slot = v as u32;
                    }
                }
                RESERVED_ACCURACY => {
                    spc.spc.accuracy = parse_accuracy_list(value)?;
                }
                RESERVED_ACC_PREFIX => {
                    if let Some(items) = value.as_array() {
                        spc.spc.acc_prefix = items
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect();
                    }
                }
                RESERVED_INDEX => {
                    if let Some(s) = value.as_str() {
                        spc.index = TypeIndex::parse(s)
                            .map_err(|e| Error::corruption(format!("stored _index: {}", e)))?;
                    }
                }
                RESERVED_INDEX_UUID_FIELD => {
                    if let Some(s) = value.as_str() {
                        if let Some(p) = UuidFieldIndex::parse(s) {
                            spc.index_uuid_field = p;
                        }
                    }
                }
                RESERVED_BOOL_TERM => {
                    if let Some(b) = value.as_bool() {
                        spc.spc.flags.bool_term = b;
                    }
                }
                RESERVED_STORE => {
                    if let Some(b) = value.as_bool() {
                        // Monotone off: a stored false wins over an
                        // inherited true.
                        spc.spc.flags.store = spc.spc.flags.store && b;
                    }
                }
                RESERVED_RECURSE => {
                    if let Some(b) = value.as_bool() {
                        spc.spc.flags.recurse = b;
                    }
                }
                RESERVED_DYNAMIC => {
                    if let Some(b) = value.as_bool() {
                        spc.spc.flags.dynamic = b;
                    }
                }
                RESERVED_STRICT => {
                    if let Some(b) = value.as_bool() {
                        spc.spc.flags.strict = b;
                    }
                }
                RESERVED_NAMESPACE => {
                    if let Some(b) = value.as_bool() {
                        spc.spc.flags.is_namespace = b;
                    }
                }
                RESERVED_PARTIAL_PATHS => {
                    if let Some(b) = value.as_bool() {
                        spc.spc.flags.partial_paths = b;
                    }
                }
                RESERVED_PARTIALS => {
                    if let Some(b) = value.as_bool() {
                        spc.spc.flags.partials = b;
                    }
                }
                RESERVED_NGRAM => {
                    if let Some(b) = value.as_bool() {
                        spc.spc.flags.ngram = b;
                    }
                }
                RESERVED_CJK_NGRAM => {
                    if let Some(b) = value.as_bool() {
                        spc.spc.flags.cjk_ngram = b;
                    }
                }
                RESERVED_CJK_WORDS => {
                    if let Some(b) = value.as_bool() {
                        spc.spc.flags.cjk_words = b;
                    }
                }
                RESERVED_STATIC_ENDPOINT => {
                    if let Some(b) = value.as_bool() {
                        spc.spc.flags.static_endpoint = b;
                    }
                }
                RESERVED_LANGUAGE => {
                    if let Some(s) = value.as_str() {
                        spc.spc.language = s.to_string();
                    }
                }
                RESERVED_STEM_LANGUAGE => {
                    if let Some(s) = value.as_str() {
                        spc.spc.stem_language = s.to_string();
                    }
                }
                RESERVED_STOP_STRATEGY => {
                    if let Some(p) = value.as_str().and_then(StopStrategy::parse) {
                        spc.spc.stop_strategy = p;
                    }
                }
                RESERVED_STEM_STRATEGY => {
                    if let Some(p) = value.as_str().and_then(StemStrategy::parse) {
                        spc.spc.stem_strategy = p;
                    }
                }
                RESERVED_ERROR => {
                    if let Some(v) = value.as_f64() {
                        spc.spc.error = v;
                    }
                }
                RESERVED_ENDPOINT => {
                    if let Some(s) = value.as_str() {
                        spc.spc.endpoint = Some(s.to_string());
                        spc.spc.sep_types.foreign = true;
                    }
                }
                _ => {
                    // Detection flags
                    if let Some(b) = value.as_bool() {
                        apply_detection_flag(spc, key, b);
                    }
                }
            }
        }
        Ok(())
    }

    // === Processing user reserved keys ===

    /// Apply user-supplied reserved keys from a document object onto
    /// the traversal state, validating against stored settings.
    ///
    /// For fields not yet in the schema the keys are also written to
    /// the shadow copy.
    fn process(
        &mut self,
        path: &[String],
        spc: &mut Specification,
        obj: &Object,
        ctx: &WalkCtx,
    ) -> Result<()> {
        let field = display_path(&spc.full_meta_name);
        let is_new = !spc.spc.flags.field_found;
        let persist = is_new && !spc.spc.flags.inside_namespace;

        // _ignore applies to the remaining keys of this object
        if let Some(v) = obj.get(RESERVED_IGNORE) {
            spc.ignored = parse_ignore_list(v);
        }

        for (key, value) in obj.iter() {
            if !is_reserved(key) {
                continue;
            }
            match key {
                RESERVED_IGNORE => {}
                RESERVED_TYPE => {
                    let s = value.as_str().ok_or_else(|| {
                        Error::client(format!("{}: _type must be a string", field))
                    })?;
                    let user = FullType::parse(s)
                        .map_err(|e| Error::client(format!("{}: {}", field, e)))?;
                    let stored = spc.spc.sep_types;
                    if stored.concrete != FieldType::Empty
                        && user.concrete != FieldType::Empty
                        && stored.concrete != user.concrete
                    {
                        return Err(Error::client(format!(
                            "{}: _type cannot change from {} to {}",
                            field, stored.concrete, user.concrete
                        )));
                    }
                    // Modifiers widen, never narrow
                    spc.spc.sep_types = FullType {
                        foreign: stored.foreign || user.foreign,
                        object: stored.object || user.object,
                        array: stored.array || user.array,
                        concrete: if user.concrete != FieldType::Empty {
                            user.concrete
                        } else {
                            stored.concrete
                        },
                    };
                }
                RESERVED_SLOT => {
                    let v = value.as_u64().ok_or_else(|| {
                        Error::client(format!("{}: _slot must be a number", field))
                    })? as u32;
                    if spc.spc.slot != BAD_SLOT && spc.spc.slot != v {
                        return Err(Error::client(format!(
                            "{}: _slot is immutable ({} != {})",
                            field, spc.spc.slot, v
                        )));
                    }
                    spc.spc.slot = v;
                    if persist {
                        self.write_key(path, RESERVED_SLOT, Value::UInt(v as u64));
                    }
                }
                RESERVED_PREFIX => {
                    let s = value.as_str().ok_or_else(|| {
                        Error::client(format!("{}: _prefix must be a string", field))
                    })?;
                    if spc.spc.flags.field_found {
                        if spc.last_local != s {
                            return Err(Error::client(format!(
                                "{}: _prefix is immutable",
                                field
                            )));
                        }
                    } else {
                        // Replace the derived local piece with the
                        // user-supplied one.
                        let cut = spc.spc.prefix.field.len() - spc.last_local.len();
                        spc.spc.prefix.field.truncate(cut);
                        spc.spc.prefix.field.push_str(s);
                        spc.last_local = s.to_string();
                    }
                }
                RESERVED_ACCURACY => {
                    let user = parse_accuracy_list(value)
                        .map_err(|e| Error::client(format!("{}: {}", field, e)))?;
                    if !spc.spc.accuracy.is_empty() && spc.spc.accuracy != user {
                        return Err(Error::client(format!(
                            "{}: _accuracy is immutable",
                            field
                        )));
                    }
                    spc.spc.accuracy = user;
                }
                RESERVED_ACC_PREFIX => {
                    if let Some(items) = value.as_array() {
                        spc.spc.acc_prefix = items
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect();
                    }
                }
                RESERVED_INDEX => {
                    let s = value.as_str().ok_or_else(|| {
                        Error::client(format!("{}: _index must be a string", field))
                    })?;
                    spc.index = TypeIndex::parse(s)
                        .map_err(|e| Error::client(format!("{}: {}", field, e)))?;
                    if persist {
                        self.write_key(path, RESERVED_INDEX, Value::Str(spc.index.as_string()));
                    }
                }
                RESERVED_INDEX_UUID_FIELD => {
                    let s = value.as_str().ok_or_else(|| {
                        Error::client(format!("{}: _index_uuid_field must be a string", field))
                    })?;
                    spc.index_uuid_field = UuidFieldIndex::parse(s).ok_or_else(|| {
                        Error::client(format!("{}: unknown _index_uuid_field {:?}", field, s))
                    })?;
                }
                RESERVED_VALUE => {
                    spc.value = Some(value.clone());
                }
                RESERVED_POSITION => {
                    spc.position = parse_u32_list(value)
                        .ok_or_else(|| Error::client(format!("{}: bad _position", field)))?;
                }
                RESERVED_WEIGHT => {
                    spc.weight = parse_u32_list(value)
                        .ok_or_else(|| Error::client(format!("{}: bad _weight", field)))?;
                }
                RESERVED_SPELLING => {
                    spc.spelling = parse_bool_list(value)
                        .ok_or_else(|| Error::client(format!("{}: bad _spelling", field)))?;
                }
                RESERVED_POSITIONS => {
                    spc.positions = parse_bool_list(value)
                        .ok_or_else(|| Error::client(format!("{}: bad _positions", field)))?;
                }
                RESERVED_LANGUAGE => {
                    if let Some(s) = value.as_str() {
                        spc.spc.language = s.to_string();
                        if persist {
                            self.write_key(path, key, value.clone());
                        }
                    }
                }
                RESERVED_STEM_LANGUAGE => {
                    if let Some(s) = value.as_str() {
                        spc.spc.stem_language = s.to_string();
                        if persist {
                            self.write_key(path, key, value.clone());
                        }
                    }
                }
                RESERVED_STOP_STRATEGY => {
                    let s = value.as_str().and_then(StopStrategy::parse).ok_or_else(|| {
                        Error::client(format!("{}: bad _stop_strategy", field))
                    })?;
                    spc.spc.stop_strategy = s;
                    if persist {
                        self.write_key(path, key, Value::Str(s.as_str().to_string()));
                    }
                }
                RESERVED_STEM_STRATEGY => {
                    let s = value.as_str().and_then(StemStrategy::parse).ok_or_else(|| {
                        Error::client(format!("{}: bad _stem_strategy", field))
                    })?;
                    spc.spc.stem_strategy = s;
                    if persist {
                        self.write_key(path, key, Value::Str(s.as_str().to_string()));
                    }
                }
                RESERVED_ERROR => {
                    if let Some(v) = value.as_f64() {
                        spc.spc.error = v;
                        if persist {
                            self.write_key(path, key, value.clone());
                        }
                    }
                }
                RESERVED_ENDPOINT => {
                    let s = value.as_str().ok_or_else(|| {
                        Error::client(format!("{}: _endpoint must be a string", field))
                    })?;
                    spc.spc.endpoint = Some(s.to_string());
                    spc.spc.sep_types.foreign = true;
                    if persist && spc.spc.flags.static_endpoint {
                        self.write_key(path, key, value.clone());
                    }
                }
                RESERVED_SCRIPT | RESERVED_SETTINGS | RESERVED_DATA | RESERVED_SCHEMA_KEY
                | ID_FIELD_NAME => {
                    // Handled outside the walk (script hook, server
                    // settings, opaque payload, the id spec).
                }
                _ => {
                    if let Some(cast) = cast_type(key) {
                        spc.value_rec = Some(value.clone());
                        if spc.spc.sep_types.concrete != FieldType::Empty
                            && spc.spc.sep_types.concrete != cast
                        {
                            return Err(Error::client(format!(
                                "{}: cast {} conflicts with type {}",
                                field,
                                key,
                                spc.spc.sep_types.concrete
                            )));
                        }
                        spc.spc.sep_types.concrete = cast;
                    } else if let Some(b) = value.as_bool() {
                        if !process_bool_flag(spc, key, b) {
                            if !spc.ignored.iter().any(|k| k == key) {
                                return Err(Error::client(format!(
                                    "{}: unknown reserved key {:?}",
                                    field, key
                                )));
                            }
                            continue;
                        }
                        if persist && is_persistent_flag(key) {
                            self.write_key(path, key, Value::Bool(b));
                        }
                        // Root-level settings persist on schema writes
                        if ctx.mode == Mode::Update && path.is_empty() && is_persistent_flag(key) {
                            self.write_key(path, key, Value::Bool(b));
                        }
                    } else if !spc.ignored.iter().any(|k| k == key) {
                        return Err(Error::client(format!(
                            "{}: unknown reserved key {:?}",
                            field, key
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    // === Dynamic resolution ===

    /// Resolve one path component: feed it from the stored schema, or
    /// detect a dynamic (possibly UUID-named) field.
    fn resolve_component(
        &mut self,
        cur_path: &mut Vec<String>,
        spc: &mut Specification,
        part: &str,
    ) -> Result<()> {
        let field = display_path(&spc.full_meta_name);

        let known = self
            .node(cur_path)
            .map(|node| node.contains_key(part))
            .unwrap_or(false);

        let mut local = String::new();
        let mut uuid_local = None;

        if known {
            cur_path.push(part.to_string());
            self.feed(cur_path, spc)?;
            if spc.last_local.is_empty() {
                local = field_prefix(part);
            } else {
                local = spc.last_local.clone();
            }
        } else if serialise::possibly_uuid(part) {
            let parsed = Uuid::parse_str(part)
                .map_err(|_| Error::client(format!("{}: invalid UUID segment", field)))?;
            spc.spc.flags.uuid_field = true;
            spc.spc.flags.uuid_path = true;
            cur_path.push(UUID_FIELD_NAME.to_string());
            let had = self.node(cur_path).is_some();
            if had {
                self.feed(cur_path, spc)?;
            } else if !spc.spc.flags.dynamic {
                return Err(Error::client(format!("{}: schema is not dynamic", field)));
            }
            local = field_prefix(UUID_FIELD_NAME);
            uuid_local = Some(uuid_prefix(&parsed));
        } else if spc.spc.flags.inside_namespace {
            // Free-form path under a namespace: no schema node at all.
            cur_path.push(part.to_string());
            local = field_prefix(part);
        } else if spc.spc.flags.dynamic {
            cur_path.push(part.to_string());
            local = field_prefix(part);
        } else {
            return Err(Error::client(format!("{}: schema is not dynamic", field)));
        }

        spc.last_local = local.clone();

        // Accumulate prefixes
        if let Some(uuid_piece) = uuid_local {
            if spc.spc.flags.has_uuid_prefix {
                spc.spc.prefix.uuid.push_str(&uuid_piece);
            } else {
                spc.spc.prefix.uuid = format!("{}{}", spc.spc.prefix.field, uuid_piece);
                spc.spc.flags.has_uuid_prefix = true;
            }
            spc.spc.prefix.field.push_str(&local);
        } else {
            spc.spc.prefix.field.push_str(&local);
            if spc.spc.flags.has_uuid_prefix {
                spc.spc.prefix.uuid.push_str(&local);
            }
        }

        // A namespace node turns the whole subtree into free-form
        // prefix territory.
        if spc.spc.flags.is_namespace {
            spc.spc.flags.inside_namespace = true;
        }
        if spc.spc.flags.inside_namespace || spc.spc.flags.partial_paths {
            spc.push_partial_prefix();
        }
        Ok(())
    }

    // === Concretisation / write phase ===

    /// Ensure the field has a concrete type (guessing when detection
    /// allows it) and persist the resolved spec for new fields.
    fn concretise(
        &mut self,
        path: &[String],
        spc: &mut Specification,
        value: Option<&Value>,
    ) -> Result<()> {
        let field = display_path(&spc.full_meta_name);

        if spc.spc.sep_types.concrete == FieldType::Empty {
            if spc.spc.flags.strict {
                return Err(Error::missing_type(field));
            }
            let Some(value) = value else {
                return Err(Error::missing_type(field));
            };
            let guessed = guess_with_detection(spc, value);
            if guessed == FieldType::Empty {
                return Err(Error::missing_type(field));
            }
            spc.spc.sep_types.concrete = guessed;
        }
        let concrete = spc.spc.sep_types.concrete;

        if spc.spc.sep_types.foreign {
            // Foreign fields delegate their data elsewhere
            spc.spc.flags.complete = true;
            return Ok(());
        }

        if concrete.has_accuracy() && spc.spc.accuracy.is_empty() {
            spc.spc.accuracy = crate::spc::RequiredSpc::default_accuracy(concrete);
        }
        if concrete.has_accuracy() && spc.spc.acc_prefix.is_empty() {
            spc.spc.acc_prefix = spc
                .spc
                .accuracy
                .iter()
                .map(|&a| acc_prefix_for(&spc.spc.prefix.field, &accuracy_label(concrete, a)))
                .collect();
        }
        if spc.index.field_values() && spc.spc.slot == BAD_SLOT {
            spc.spc.slot = slot_for(&spc.spc.prefix.field);
        }

        let newly_concrete = !spc.spc.flags.concrete;
        spc.spc.flags.concrete = true;
        spc.spc.flags.complete = true;

        if spc.spc.flags.inside_namespace {
            return Ok(());
        }

        // Persist the resolved spec for fields whose stored type was
        // missing or still empty.
        if newly_concrete {
            self.write_key(
                path,
                RESERVED_TYPE,
                Value::Str(spc.spc.sep_types.to_string()),
            );
            self.write_key(path, RESERVED_PREFIX, Value::Str(spc.last_local.clone()));
            if spc.spc.slot != BAD_SLOT {
                self.write_key(path, RESERVED_SLOT, Value::UInt(spc.spc.slot as u64));
            }
            if concrete.has_accuracy() {
                self.write_key(
                    path,
                    RESERVED_ACCURACY,
                    Value::Array(
                        spc.spc
                            .accuracy
                            .iter()
                            .map(|&a| {
                                if concrete.is_temporal() {
                                    Value::Str(accuracy_label(concrete, a))
                                } else {
                                    Value::UInt(a)
                                }
                            })
                            .collect(),
                    ),
                );
                self.write_key(
                    path,
                    RESERVED_ACC_PREFIX,
                    Value::Array(
                        spc.spc
                            .acc_prefix
                            .iter()
                            .map(|p| Value::Str(p.clone()))
                            .collect(),
                    ),
                );
            }
            if spc.spc.flags.bool_term {
                self.write_key(path, RESERVED_BOOL_TERM, Value::Bool(true));
            }
        } else if spc.spc.sep_types.array || spc.spc.sep_types.object {
            // Modifier widening re-persists the type string
            self.write_key(
                path,
                RESERVED_TYPE,
                Value::Str(spc.spc.sep_types.to_string()),
            );
        }
        Ok(())
    }

    // === Item indexing ===

    /// The 16-way dispatch: emit field/global terms and values for one
    /// concrete item.
    fn index_item(
        &mut self,
        path: &[String],
        spc: &mut Specification,
        value: &Value,
        item_pos: usize,
        ctx: &mut WalkCtx,
    ) -> Result<()> {
        let field = display_path(&spc.full_meta_name);

        // Free-form namespace paths are indexed as terms only
        if spc.spc.flags.inside_namespace {
            spc.index = spc.index & TypeIndex::TERMS;
        }

        if value.is_nil() {
            // Null keeps the field discoverable through an
            // empty-marker term; value slots are skipped.
            self.concretise(path, spc, None).ok();
            if ctx.mode == Mode::Index && spc.index.field_terms() {
                let marker = prefixed(b"", &spc.spc.prefix.field, FieldType::Empty.term_marker());
                ctx.doc.add_boolean_term(marker);
            }
            return Ok(());
        }

        self.concretise(path, spc, Some(value))?;
        if ctx.mode == Mode::Update {
            return Ok(());
        }

        let concrete = spc.spc.sep_types.concrete;
        if spc.spc.sep_types.foreign {
            // The foreign index holds the data; nothing to emit here.
            return Ok(());
        }

        let marker = concrete.term_marker();
        let ranges = if concrete == FieldType::Geo {
            serialise::coerce_ranges(value).map_err(|e| e_at(e, &field))?
        } else {
            Vec::new()
        };
        let ser = if concrete == FieldType::Geo {
            serialise::ranges(&ranges)
        } else {
            serialise::serialise(concrete, value).map_err(|e| e_at(e, &field))?
        };

        let position = spc
            .position
            .get(item_pos)
            .or_else(|| spc.position.first())
            .copied()
            .unwrap_or(0)
            + item_pos as u32;
        let weight = spc
            .weight
            .get(item_pos)
            .or_else(|| spc.weight.first())
            .copied()
            .unwrap_or(1);

        // Field terms
        if spc.index.field_terms() {
            for prefix in self.field_term_prefixes(spc) {
                self.emit_terms(&prefix, marker, concrete, value, &ser, position, weight, spc, ctx)?;
            }
            // Ancestor prefixes of namespace / partial paths
            let leaf = spc.spc.prefix.field.clone();
            for partial in spc.partial_prefixes.clone() {
                if partial.field != leaf {
                    ctx.doc
                        .add_boolean_term(prefixed(&ser, &partial.field, marker));
                }
            }
        }

        // Global terms
        let gspc = global_spc(concrete);
        if spc.index.global_terms() {
            if let Some(g) = gspc {
                self.emit_terms(&g.prefix.clone(), marker, concrete, value, &ser, position, weight, spc, ctx)?;
            }
        }

        // Accuracy terms
        if concrete.has_accuracy() && spc.index.some_terms() {
            let field_side = spc.index.field_terms();
            let global_side = spc.index.global_terms() && gspc.is_some();
            let (acc, fprefix) = (spc.spc.accuracy.clone(), spc.spc.acc_prefix.clone());
            let gprefix = gspc.map(|g| g.acc_prefix.clone()).unwrap_or_default();
            self.emit_accuracy_terms(
                concrete,
                value,
                &ranges,
                &acc,
                if field_side { Some(&fprefix) } else { None },
                if global_side { Some(&gprefix) } else { None },
                &field,
                ctx,
            )?;
        }

        // Field values
        if spc.index.field_values() && spc.spc.slot != BAD_SLOT {
            if concrete == FieldType::Geo {
                ctx.push_slot_ranges(spc.spc.slot, &ranges);
            } else {
                ctx.push_slot_item(spc.spc.slot, ser.clone());
            }
        }

        // Global values
        if spc.index.global_values() {
            if let Some(g) = gspc {
                if concrete == FieldType::Geo {
                    ctx.push_slot_ranges(g.slot, &ranges);
                } else {
                    ctx.push_slot_item(g.slot, ser.clone());
                }
            }
        }

        Ok(())
    }

    /// The field-scope prefixes an item is indexed under, honouring the
    /// UUID-field policy.
    fn field_term_prefixes(&self, spc: &Specification) -> Vec<String> {
        if spc.spc.flags.has_uuid_prefix {
            match spc.index_uuid_field {
                UuidFieldIndex::UuidField => vec![spc.spc.prefix.uuid.clone()],
                UuidFieldIndex::UuidTerm => vec![spc.spc.prefix.field.clone()],
                UuidFieldIndex::Both => vec![
                    spc.spc.prefix.uuid.clone(),
                    spc.spc.prefix.field.clone(),
                ],
            }
        } else {
            vec![spc.spc.prefix.field.clone()]
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_terms(
        &mut self,
        prefix: &str,
        marker: u8,
        concrete: FieldType,
        value: &Value,
        ser: &[u8],
        position: u32,
        weight: u32,
        spc: &Specification,
        ctx: &mut WalkCtx,
    ) -> Result<()> {
        match concrete {
            FieldType::Text => {
                let text = value.as_str().unwrap_or_default();
                let use_positions = spc.positions.first().copied().unwrap_or(false);
                let mut pos = position;
                for word in crate::text::tokenize(text, !spc.spc.flags.bool_term) {
                    for form in
                        crate::text::term_forms(&word, &spc.spc.stem_language, spc.spc.stem_strategy)
                    {
                        let term = prefixed(&form, prefix, marker);
                        if use_positions {
                            ctx.doc.add_posting(term, pos, weight);
                        } else {
                            ctx.doc.add_term(term, weight);
                        }
                    }
                    pos += 1;
                }
            }
            FieldType::Keyword | FieldType::String => {
                let raw = String::from_utf8_lossy(ser).to_string();
                let word = if spc.spc.flags.bool_term {
                    raw
                } else {
                    raw.to_lowercase()
                };
                let term = prefixed(word.as_bytes(), prefix, marker);
                if spc.spc.flags.bool_term {
                    ctx.doc.add_boolean_term(term);
                } else {
                    ctx.doc.add_term(term, weight);
                }
            }
            _ => {
                let term = prefixed(ser, prefix, marker);
                if spc.spc.flags.bool_term {
                    ctx.doc.add_boolean_term(term);
                } else {
                    ctx.doc.add_term(term, weight);
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_accuracy_terms(
        &mut self,
        concrete: FieldType,
        value: &Value,
        ranges: &[HtmRange],
        accuracy: &[u64],
        field_prefixes: Option<&Vec<String>>,
        global_prefixes: Option<&Vec<String>>,
        field: &str,
        ctx: &mut WalkCtx,
    ) -> Result<()> {
        let doc = &mut ctx.doc;
        match concrete {
            FieldType::Integer | FieldType::Floating => {
                let v = match concrete {
                    FieldType::Integer => value
                        .as_i64()
                        .or_else(|| value.as_str().and_then(|s| s.parse().ok())),
                    _ => value.as_f64().map(|f| f.trunc() as i64).or_else(|| {
                        value.as_str().and_then(|s| s.parse::<f64>().ok().map(|f| f as i64))
                    }),
                }
                .ok_or_else(|| Error::serialisation(field, "not a number"))?;
                match (field_prefixes, global_prefixes) {
                    (Some(f), Some(g)) => generate_terms::integer_global(doc, accuracy, f, g, v),
                    (Some(f), None) => generate_terms::integer(doc, accuracy, f, v),
                    (None, Some(g)) => generate_terms::integer(doc, accuracy, g, v),
                    (None, None) => {}
                }
            }
            FieldType::Positive => {
                let v = value
                    .as_u64()
                    .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
                    .ok_or_else(|| Error::serialisation(field, "not a positive integer"))?;
                match (field_prefixes, global_prefixes) {
                    (Some(f), Some(g)) => generate_terms::positive_global(doc, accuracy, f, g, v),
                    (Some(f), None) => generate_terms::positive(doc, accuracy, f, v),
                    (None, Some(g)) => generate_terms::positive(doc, accuracy, g, v),
                    (None, None) => {}
                }
            }
            FieldType::Date | FieldType::Datetime => {
                let ts = serialise::coerce_timestamp(value).map_err(|e| e_at(e, field))?;
                let tm = Tm::from_timestamp(ts);
                match (field_prefixes, global_prefixes) {
                    (Some(f), Some(g)) => generate_terms::date_global(doc, accuracy, f, g, &tm),
                    (Some(f), None) => generate_terms::date(doc, accuracy, f, &tm),
                    (None, Some(g)) => generate_terms::date(doc, accuracy, g, &tm),
                    (None, None) => {}
                }
            }
            FieldType::Time | FieldType::Timedelta => {
                let secs = match concrete {
                    FieldType::Time => value
                        .as_str()
                        .map(fathom_core::datetime::parse_time)
                        .transpose()
                        .map_err(|e| e_at(e, field))?
                        .or_else(|| value.as_f64()),
                    _ => value
                        .as_str()
                        .map(fathom_core::datetime::parse_timedelta)
                        .transpose()
                        .map_err(|e| e_at(e, field))?
                        .or_else(|| value.as_f64()),
                }
                .ok_or_else(|| Error::serialisation(field, "not a time"))?;
                match (field_prefixes, global_prefixes) {
                    (Some(f), Some(g)) => generate_terms::time_global(doc, accuracy, f, g, secs),
                    (Some(f), None) => generate_terms::time(doc, accuracy, f, secs),
                    (None, Some(g)) => generate_terms::time(doc, accuracy, g, secs),
                    (None, None) => {}
                }
            }
            FieldType::Geo => match (field_prefixes, global_prefixes) {
                (Some(f), Some(g)) => generate_terms::geo_global(doc, accuracy, f, g, ranges),
                (Some(f), None) => generate_terms::geo(doc, accuracy, f, ranges),
                (None, Some(g)) => generate_terms::geo(doc, accuracy, g, ranges),
                (None, None) => {}
            },
            _ => {}
        }
        Ok(())
    }

    // === The recursive walk ===

    fn index_object(
        &mut self,
        parent_path: &[String],
        spc_parent: &Specification,
        name: &str,
        value: &Value,
        ctx: &mut WalkCtx,
    ) -> Result<()> {
        let parts: Vec<&str> = name.split('.').collect();
        if spc_parent.depth + parts.len() > LIMIT_PARTIAL_PATHS_DEPTH {
            return Err(Error::client(format!(
                "Field {:?} is nested too deeply (> {})",
                name, LIMIT_PARTIAL_PATHS_DEPTH
            )));
        }

        let mut cur_path = parent_path.to_vec();
        let mut spc = spc_parent.clone();
        for part in &parts {
            validate_field_name(part)?;
            spc = spc.for_child(part);
            self.resolve_component(&mut cur_path, &mut spc, part)?;
        }

        self.index_leaf(&cur_path, &mut spc, value, ctx)
    }

    fn index_leaf(
        &mut self,
        path: &[String],
        spc: &mut Specification,
        value: &Value,
        ctx: &mut WalkCtx,
    ) -> Result<()> {
        let field = display_path(&spc.full_meta_name);
        match value {
            Value::Map(obj) => {
                self.process(path, spc, obj, ctx)?;

                let subfields: Vec<(&str, &Value)> =
                    obj.iter().filter(|(k, _)| !is_reserved(k)).collect();

                if !subfields.is_empty() {
                    if spc.spc.sep_types.foreign {
                        return Err(Error::client(format!(
                            "{}: foreign fields cannot have nested fields",
                            field
                        )));
                    }
                    if !spc.spc.flags.recurse {
                        return Err(Error::client(format!(
                            "{}: schema does not recurse into sub-objects",
                            field
                        )));
                    }
                    // Widen to object
                    if !spc.spc.sep_types.object {
                        spc.spc.sep_types.object = true;
                        if !spc.spc.flags.inside_namespace {
                            self.write_key(
                                path,
                                RESERVED_TYPE,
                                Value::Str(spc.spc.sep_types.to_string()),
                            );
                        }
                    }
                    let parent_spc = spc.clone();
                    for (sub, sub_value) in subfields {
                        self.index_object(path, &parent_spc, sub, sub_value, ctx)?;
                    }
                }

                // Pending explicit values
                if let Some(v) = spc.value.take() {
                    self.index_leaf_value(path, spc, &v, ctx)?;
                } else if let Some(v) = spc.value_rec.take() {
                    let v = cast_payload(spc.spc.sep_types.concrete, &v)?;
                    self.index_leaf_value(path, spc, &v, ctx)?;
                } else if subfields_empty_and_no_pending(obj) {
                    // A pure reserved-key object updates the schema only
                    if ctx.mode == Mode::Update
                        && spc.spc.sep_types.concrete != FieldType::Empty
                    {
                        self.concretise(path, spc, None)?;
                    }
                }
                Ok(())
            }
            other => self.index_leaf_value(path, spc, other, ctx),
        }
    }

    /// Index a leaf value (scalar or array), with stored-data echo.
    fn index_leaf_value(
        &mut self,
        path: &[String],
        spc: &mut Specification,
        value: &Value,
        ctx: &mut WalkCtx,
    ) -> Result<()> {
        match value {
            Value::Array(items) => {
                if !spc.spc.sep_types.array {
                    spc.spc.sep_types.array = true;
                    if spc.spc.flags.field_found
                        && spc.spc.flags.concrete
                        && !spc.spc.flags.inside_namespace
                    {
                        self.write_key(
                            path,
                            RESERVED_TYPE,
                            Value::Str(spc.spc.sep_types.to_string()),
                        );
                    }
                }
                let concrete_items: Vec<&Value> =
                    items.iter().filter(|v| !v.is_nil()).collect();
                if concrete_items.is_empty() {
                    // Only nulls: keep the field discoverable
                    self.index_item(path, spc, &Value::Nil, 0, ctx)?;
                } else {
                    for (i, item) in concrete_items.iter().enumerate() {
                        self.index_item(path, spc, item, i, ctx)?;
                    }
                }
                if ctx.mode == Mode::Index && spc.spc.flags.store {
                    let canonical: Vec<Value> = items
                        .iter()
                        .map(|v| canonical_value(spc.spc.sep_types.concrete, v))
                        .collect();
                    data_insert(
                        &mut ctx.data,
                        &spc.full_meta_name,
                        Value::Array(canonical),
                    );
                }
            }
            other => {
                self.index_item(path, spc, other, 0, ctx)?;
                if ctx.mode == Mode::Index && spc.spc.flags.store && !other.is_nil() {
                    let mut stored = canonical_value(spc.spc.sep_types.concrete, other);
                    // Dynamic foreign endpoints are echoed so readers
                    // can follow them.
                    if spc.spc.sep_types.foreign && !spc.spc.flags.static_endpoint {
                        if let Some(endpoint) = &spc.spc.endpoint {
                            let mut m = Object::new();
                            m.insert(RESERVED_ENDPOINT, Value::Str(endpoint.clone()));
                            m.insert(RESERVED_VALUE, stored);
                            stored = Value::Map(m);
                        }
                    }
                    data_insert(&mut ctx.data, &spc.full_meta_name, stored);
                }
            }
        }
        Ok(())
    }

    // === Entry points ===

    /// Walk `obj`, building one Index-Backend document.
    ///
    /// Returns the reserved id term, the built document and the
    /// stored-data echo. Schema changes accumulate in the shadow copy
    /// until [`Schema::get_modified_schema`] commits them.
    pub fn index(
        &mut self,
        obj: &Object,
        document_id: Option<&Value>,
        stats: &dyn ShardStats,
        hook: Option<&dyn ScriptHook>,
    ) -> Result<IndexOutcome> {
        let mut ctx = WalkCtx::new(Mode::Index);

        // Script hook may replace the whole object; the walk then runs
        // over the replacement.
        let replaced;
        let obj = match hook {
            Some(hook) => match hook.process(&Value::Map(obj.clone()))? {
                Some(Value::Map(new_obj)) => {
                    replaced = new_obj;
                    &replaced
                }
                Some(other) => {
                    return Err(Error::client(format!(
                        "script must return an object, got {}",
                        other
                    )))
                }
                None => obj,
            },
            None => obj,
        };

        // Root specification: feed stored root settings, then apply the
        // user's per-walk overrides.
        let mut root_spc = Specification::default();
        self.feed(&[], &mut root_spc)?;
        root_spc.spc.flags.field_found = true;
        self.process(&[], &mut root_spc, obj, &ctx)?;

        // Resolve the id specification and the document id
        let (id_value, ser_id, term_id) = self.resolve_id(document_id, stats)?;
        ctx.data.insert(ID_FIELD_NAME, id_value.clone());

        for (key, value) in obj.iter() {
            if is_reserved(key) {
                if !is_known(key) && !root_spc.ignored.iter().any(|k| k == key) {
                    return Err(Error::client(format!("unknown reserved key {:?}", key)));
                }
                continue;
            }
            self.index_object(&[], &root_spc, key, value, &mut ctx)?;
        }

        // Flush accumulated value slots
        let slots = std::mem::take(&mut ctx.slots);
        for (slot, acc) in slots {
            match acc {
                SlotAcc::Items(items) => {
                    if items.len() == 1 {
                        ctx.doc.add_value(slot, items.into_iter().next().unwrap());
                    } else if !items.is_empty() {
                        ctx.doc.add_value(slot, string_list(&items));
                    }
                }
                SlotAcc::Ranges(ranges) => {
                    let merged = htm::merge_ranges(ranges);
                    ctx.doc.add_value(slot, serialise::ranges(&merged));
                }
            }
        }

        // The reserved id term is added last and always
        ctx.doc.add_boolean_term(term_id.clone());
        ctx.doc.add_value(DB_SLOT_ID, ser_id);
        let data = Value::Map(ctx.data);
        ctx.doc.set_data(data.to_json());

        Ok(IndexOutcome {
            term_id,
            document: ctx.doc,
            data,
            document_id: id_value,
        })
    }

    /// Reshape the schema in place. Only widening changes are allowed;
    /// no document is produced.
    pub fn update(&mut self, obj: &Object) -> Result<()> {
        let mut ctx = WalkCtx::new(Mode::Update);
        let mut root_spc = Specification::default();
        self.feed(&[], &mut root_spc)?;
        root_spc.spc.flags.field_found = true;
        self.process(&[], &mut root_spc, obj, &ctx)?;

        for (key, value) in obj.iter() {
            if is_reserved(key) {
                if !is_known(key) && !root_spc.ignored.iter().any(|k| k == key) {
                    return Err(Error::client(format!("unknown reserved key {:?}", key)));
                }
                continue;
            }
            self.index_object(&[], &root_spc, key, value, &mut ctx)?;
        }
        Ok(())
    }

    /// Install a schema wholesale. With `replace` the previous
    /// properties are cleared first; this is the only operation that
    /// may remove fields.
    pub fn write(&mut self, obj: &Object, replace: bool) -> Result<()> {
        if replace {
            self.mut_schema = Some(Self::empty_root());
        }
        self.update(obj)
    }

    fn resolve_id(
        &mut self,
        document_id: Option<&Value>,
        stats: &dyn ShardStats,
    ) -> Result<(Value, Vec<u8>, Vec<u8>)> {
        let mut spc = Specification::default().for_child(ID_FIELD_NAME);
        let path = vec![ID_FIELD_NAME.to_string()];
        let known = self.node(&path).is_some();
        if known {
            self.feed(&path, &mut spc)?;
        }
        spc.spc.prefix.field = ID_PREFIX.to_string();
        spc.last_local = ID_PREFIX.to_string();
        spc.spc.flags.bool_term = true;
        spc.spc.slot = DB_SLOT_ID;

        let id_value = match document_id {
            Some(v) => v.clone(),
            None => match spc.spc.sep_types.concrete {
                FieldType::Integer | FieldType::Positive => {
                    Value::UInt(ids::generate_numeric_id(stats))
                }
                FieldType::Empty | FieldType::Uuid => {
                    let marker = FieldType::Uuid.term_marker();
                    let id = ids::generate_uuid_id(stats, |candidate| {
                        let ser =
                            serialise::serialise(FieldType::Uuid, &Value::Str(candidate.into()))?;
                        Ok(prefixed(&ser, ID_PREFIX, marker))
                    })?;
                    Value::Str(id)
                }
                FieldType::Keyword | FieldType::Text | FieldType::String => {
                    let concrete = spc.spc.sep_types.concrete;
                    let marker = concrete.term_marker();
                    let id = ids::generate_uuid_id(stats, |candidate| {
                        let ser =
                            serialise::serialise(concrete, &Value::Str(candidate.into()))?;
                        Ok(prefixed(&ser, ID_PREFIX, marker))
                    })?;
                    Value::Str(id)
                }
                other => {
                    return Err(Error::client(format!(
                        "cannot generate ids of type {}",
                        other
                    )))
                }
            },
        };

        if spc.spc.sep_types.concrete == FieldType::Empty {
            let guessed = serialise::guess_type(&id_value);
            let concrete = if guessed == FieldType::Text {
                FieldType::Keyword
            } else {
                guessed
            };
            spc.spc.sep_types.concrete = concrete;
            spc.spc.flags.concrete = false;
        }
        let concrete = spc.spc.sep_types.concrete;
        let ser_id = serialise::serialise(concrete, &id_value)
            .map_err(|e| e_at(e, ID_FIELD_NAME))?;
        let term_id = prefixed(&ser_id, ID_PREFIX, concrete.term_marker());

        if !known || !spc.spc.flags.concrete {
            self.write_key(&path, RESERVED_TYPE, Value::Str(FullType::concrete(concrete).to_string()));
            self.write_key(&path, RESERVED_PREFIX, Value::Str(ID_PREFIX.to_string()));
            self.write_key(&path, RESERVED_SLOT, Value::UInt(DB_SLOT_ID as u64));
            self.write_key(&path, RESERVED_BOOL_TERM, Value::Bool(true));
        }

        let id_canonical = canonical_value(concrete, &id_value);
        Ok((id_canonical, ser_id, term_id))
    }

    // === Query-time resolution ===

    /// The reserved id term for a document id, resolved against the
    /// stored `_id` specification (guessed from the value when the
    /// schema has none yet). Read-only.
    pub fn id_term(&self, id: &Value) -> Result<Vec<u8>> {
        let path = vec![ID_FIELD_NAME.to_string()];
        let mut spc = Specification::default().for_child(ID_FIELD_NAME);
        if self.node(&path).is_some() {
            self.feed(&path, &mut spc)?;
        }
        let mut concrete = spc.spc.sep_types.concrete;
        if concrete == FieldType::Empty {
            let guessed = serialise::guess_type(id);
            concrete = if guessed == FieldType::Text {
                FieldType::Keyword
            } else {
                guessed
            };
        }
        let ser = serialise::serialise(concrete, id).map_err(|e| e_at(e, ID_FIELD_NAME))?;
        Ok(prefixed(&ser, ID_PREFIX, concrete.term_marker()))
    }

    /// Resolve a dotted field path at query time.
    ///
    /// Handles stored fields, UUID segments, accuracy-suffix fields
    /// (`age_1000`, `created_month`) and free-form namespace paths.
    pub fn get_data_field(&self, name: &str) -> Result<DataField> {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() > LIMIT_PARTIAL_PATHS_DEPTH {
            return Err(Error::client(format!(
                "Field {:?} is nested too deeply (> {})",
                name, LIMIT_PARTIAL_PATHS_DEPTH
            )));
        }

        let mut path: Vec<String> = Vec::new();
        let mut spc = Specification::default();
        self.feed(&[], &mut spc).ok();

        for (i, part) in parts.iter().enumerate() {
            let is_last = i + 1 == parts.len();
            spc = spc.for_child(part);
            let known = self
                .node(&path)
                .map(|n| n.contains_key(*part))
                .unwrap_or(false);

            if known {
                path.push(part.to_string());
                spc.last_local = String::new();
                self.feed(&path, &mut spc)?;
                let local = if spc.last_local.is_empty() {
                    field_prefix(part)
                } else {
                    spc.last_local.clone()
                };
                spc.spc.prefix.field.push_str(&local);
                if spc.spc.flags.is_namespace {
                    spc.spc.flags.inside_namespace = true;
                }
                continue;
            }

            if serialise::possibly_uuid(part) {
                let parsed = Uuid::parse_str(part)
                    .map_err(|_| Error::client(format!("{}: invalid UUID segment", name)))?;
                path.push(UUID_FIELD_NAME.to_string());
                if self.node(&path).is_some() {
                    spc.last_local = String::new();
                    self.feed(&path, &mut spc)?;
                }
                spc.spc
                    .prefix
                    .field
                    .push_str(&uuid_prefix(&parsed));
                spc.spc.flags.has_uuid_prefix = true;
                continue;
            }

            // Accuracy-suffix field: only meaningful on the last
            // segment, over a known base field.
            if is_last {
                if let Some((base, acc)) = split_accuracy_suffix(part) {
                    let base_known = self
                        .node(&path)
                        .map(|n| n.contains_key(base))
                        .unwrap_or(false);
                    if base_known {
                        path.push(base.to_string());
                        let mut base_spc = spc.clone();
                        base_spc.last_local = String::new();
                        self.feed(&path, &mut base_spc)?;
                        let idx = base_spc
                            .spc
                            .accuracy
                            .iter()
                            .position(|&a| a == acc)
                            .ok_or_else(|| {
                                Error::client(format!(
                                    "{}: accuracy {} is not configured",
                                    name, acc
                                ))
                            })?;
                        let acc_prefix =
                            base_spc.spc.acc_prefix.get(idx).cloned().unwrap_or_default();
                        return Ok(DataField {
                            field_type: base_spc.spc.sep_types.concrete,
                            prefix: acc_prefix,
                            slot: BAD_SLOT,
                            accuracy: Vec::new(),
                            acc_prefix: Vec::new(),
                            bool_term: true,
                            inside_namespace: false,
                            acc: Some(acc),
                        });
                    }
                }
            }

            // Unknown segment: free-form namespace resolution
            spc.spc.flags.inside_namespace = true;
            path.push(part.to_string());
            spc.spc.prefix.field.push_str(&field_prefix(part));
        }

        Ok(DataField {
            field_type: spc.spc.sep_types.concrete,
            prefix: spc.spc.prefix.field.clone(),
            slot: spc.spc.slot,
            accuracy: spc.spc.accuracy.clone(),
            acc_prefix: spc.spc.acc_prefix.clone(),
            bool_term: spc.spc.flags.bool_term,
            inside_namespace: spc.spc.flags.inside_namespace,
            acc: None,
        })
    }

    /// Exact-match term query for a resolved field.
    pub fn term_query(field: &DataField, value: &Value) -> Result<Query> {
        let concrete = if field.field_type == FieldType::Empty {
            serialise::guess_type(value)
        } else {
            field.field_type
        };
        let marker = concrete.term_marker();
        match concrete {
            FieldType::Text => {
                let s = value
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| value.to_string());
                Ok(Query::and(
                    crate::text::tokenize(&s, !field.bool_term)
                        .into_iter()
                        .map(|word| {
                            Query::term(prefixed(word.as_bytes(), &field.prefix, marker))
                        }),
                ))
            }
            FieldType::Keyword | FieldType::String => {
                let s = value
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| value.to_string());
                let word = if field.bool_term { s } else { s.to_lowercase() };
                Ok(Query::term(prefixed(word.as_bytes(), &field.prefix, marker)))
            }
            _ => {
                let ser = serialise::serialise(concrete, value)?;
                Ok(Query::term(prefixed(&ser, &field.prefix, marker)))
            }
        }
    }

    /// Range query for a resolved field, synthesised from its accuracy
    /// buckets.
    pub fn range_query(field: &DataField, from: &Value, to: &Value) -> Result<Query> {
        match field.field_type {
            FieldType::Integer | FieldType::Floating => {
                let lo = from
                    .as_i64()
                    .or_else(|| from.as_f64().map(|f| f as i64))
                    .ok_or_else(|| Error::client("range bound is not a number"))?;
                let hi = to
                    .as_i64()
                    .or_else(|| to.as_f64().map(|f| f as i64))
                    .ok_or_else(|| Error::client("range bound is not a number"))?;
                Ok(generate_terms::numeric(
                    lo,
                    hi,
                    &field.accuracy,
                    &field.acc_prefix,
                    1,
                ))
            }
            FieldType::Positive => {
                let lo = from
                    .as_u64()
                    .ok_or_else(|| Error::client("range bound is not a number"))?;
                let hi = to
                    .as_u64()
                    .ok_or_else(|| Error::client("range bound is not a number"))?;
                Ok(generate_terms::numeric_u64(
                    lo,
                    hi,
                    &field.accuracy,
                    &field.acc_prefix,
                    1,
                ))
            }
            FieldType::Date | FieldType::Datetime => {
                let lo = serialise::coerce_timestamp(from)?;
                let hi = serialise::coerce_timestamp(to)?;
                Ok(generate_terms::date_range(
                    lo,
                    hi,
                    &field.accuracy,
                    &field.acc_prefix,
                    1,
                ))
            }
            FieldType::Time | FieldType::Timedelta => {
                let lo = from
                    .as_f64()
                    .or_else(|| {
                        from.as_str()
                            .and_then(|s| fathom_core::datetime::parse_time(s).ok())
                    })
                    .ok_or_else(|| Error::client("range bound is not a time"))?;
                let hi = to
                    .as_f64()
                    .or_else(|| {
                        to.as_str()
                            .and_then(|s| fathom_core::datetime::parse_time(s).ok())
                    })
                    .ok_or_else(|| Error::client("range bound is not a time"))?;
                Ok(generate_terms::time_range(
                    lo,
                    hi,
                    &field.accuracy,
                    &field.acc_prefix,
                    1,
                ))
            }
            FieldType::Geo => {
                let ranges = serialise::coerce_ranges(from)?;
                Ok(generate_terms::geo_range(
                    &ranges,
                    &field.accuracy,
                    &field.acc_prefix,
                    1,
                ))
            }
            other => Err(Error::client(format!(
                "type {} does not support range queries",
                other
            ))),
        }
    }
}

fn e_at(e: Error, field: &str) -> Error {
    match e {
        Error::Serialisation { reason, .. } => Error::serialisation(field, reason),
        other => other,
    }
}

fn display_path(full_meta_name: &str) -> String {
    if full_meta_name.is_empty() {
        "<root>".to_string()
    } else {
        full_meta_name.to_string()
    }
}

fn validate_field_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::client("empty field name"));
    }
    if name.starts_with('_') {
        return Err(Error::client(format!(
            "field name {:?} is in the reserved namespace",
            name
        )));
    }
    Ok(())
}

fn subfields_empty_and_no_pending(obj: &Object) -> bool {
    obj.iter().all(|(k, _)| is_reserved(k))
}

/// Parse a stored or user `_accuracy` list into numeric form.
fn parse_accuracy_list(value: &Value) -> Result<Vec<u64>> {
    let items = value
        .as_array()
        .ok_or_else(|| Error::client("_accuracy must be an array"))?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let acc = match item {
            Value::Str(s) => s
                .parse::<UnitTime>()
                .map(|u| u.code())
                .or_else(|_| s.parse::<u64>().map_err(|_| {
                    Error::client(format!("bad accuracy entry {:?}", s))
                }))?,
            other => other
                .as_u64()
                .ok_or_else(|| Error::client(format!("bad accuracy entry {}", other)))?,
        };
        out.push(acc);
    }
    out.sort_unstable();
    out.dedup();
    Ok(out)
}

fn parse_ignore_list(value: &Value) -> Vec<String> {
    match value {
        Value::Str(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_u32_list(value: &Value) -> Option<Vec<u32>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_u64().map(|v| v as u32))
            .collect(),
        other => other.as_u64().map(|v| vec![v as u32]),
    }
}

fn parse_bool_list(value: &Value) -> Option<Vec<bool>> {
    match value {
        Value::Array(items) => items.iter().map(Value::as_bool).collect(),
        other => other.as_bool().map(|b| vec![b]),
    }
}

fn apply_detection_flag(spc: &mut Specification, key: &str, b: bool) {
    match key {
        RESERVED_DATE_DETECTION => spc.spc.flags.date_detection = b,
        RESERVED_DATETIME_DETECTION => spc.spc.flags.datetime_detection = b,
        RESERVED_TIME_DETECTION => spc.spc.flags.time_detection = b,
        RESERVED_TIMEDELTA_DETECTION => spc.spc.flags.timedelta_detection = b,
        RESERVED_NUMERIC_DETECTION | RESERVED_POSITIVE_DETECTION => {
            spc.spc.flags.numeric_detection = b
        }
        RESERVED_GEO_DETECTION => spc.spc.flags.geo_detection = b,
        RESERVED_BOOL_DETECTION => spc.spc.flags.bool_detection = b,
        RESERVED_TEXT_DETECTION => spc.spc.flags.text_detection = b,
        RESERVED_UUID_DETECTION => spc.spc.flags.uuid_detection = b,
        _ => {}
    }
}

/// Apply a user boolean flag; returns whether the key was recognised.
fn process_bool_flag(spc: &mut Specification, key: &str, b: bool) -> bool {
    match key {
        RESERVED_BOOL_TERM => spc.spc.flags.bool_term = b,
        RESERVED_PARTIALS => spc.spc.flags.partials = b,
        RESERVED_STORE => spc.spc.flags.store = b,
        RESERVED_RECURSE => spc.spc.flags.recurse = b,
        RESERVED_DYNAMIC => spc.spc.flags.dynamic = b,
        RESERVED_STRICT => spc.spc.flags.strict = b,
        RESERVED_NAMESPACE => {
            spc.spc.flags.is_namespace = b;
            if b {
                spc.spc.flags.inside_namespace = true;
                spc.push_partial_prefix();
            }
        }
        RESERVED_PARTIAL_PATHS => spc.spc.flags.partial_paths = b,
        RESERVED_NGRAM => spc.spc.flags.ngram = b,
        RESERVED_CJK_NGRAM => spc.spc.flags.cjk_ngram = b,
        RESERVED_CJK_WORDS => spc.spc.flags.cjk_words = b,
        RESERVED_STATIC_ENDPOINT => spc.spc.flags.static_endpoint = b,
        RESERVED_DATE_DETECTION
        | RESERVED_DATETIME_DETECTION
        | RESERVED_TIME_DETECTION
        | RESERVED_TIMEDELTA_DETECTION
        | RESERVED_NUMERIC_DETECTION
        | RESERVED_POSITIVE_DETECTION
        | RESERVED_GEO_DETECTION
        | RESERVED_BOOL_DETECTION
        | RESERVED_TEXT_DETECTION
        | RESERVED_UUID_DETECTION => apply_detection_flag(spc, key, b),
        _ => return false,
    }
    true
}

/// Whether a user boolean flag is persisted for new fields (and at the
/// schema root on writes).
fn is_persistent_flag(key: &str) -> bool {
    matches!(
        key,
        RESERVED_BOOL_TERM
            | RESERVED_PARTIALS
            | RESERVED_STORE
            | RESERVED_RECURSE
            | RESERVED_DYNAMIC
            | RESERVED_STRICT
            | RESERVED_NAMESPACE
            | RESERVED_PARTIAL_PATHS
            | RESERVED_NGRAM
            | RESERVED_CJK_NGRAM
            | RESERVED_CJK_WORDS
            | RESERVED_STATIC_ENDPOINT
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
    )
}

/// Guess a concrete type for an untyped value, honouring the detection
/// flags.
fn guess_with_detection(spc: &Specification, value: &Value) -> FieldType {
    let flags = &spc.spc.flags;
    match value {
        Value::Bool(_) => {
            if flags.bool_detection {
                FieldType::Boolean
            } else {
                FieldType::Empty
            }
        }
        Value::Int(_) | Value::UInt(_) | Value::Float(_) => {
            if flags.numeric_detection {
                serialise::guess_type(value)
            } else {
                FieldType::Empty
            }
        }
        Value::Str(s) => {
            let guessed = serialise::guess_serialise(s).0;
            let allowed = match guessed {
                FieldType::Uuid => flags.uuid_detection,
                FieldType::Datetime => flags.datetime_detection,
                FieldType::Date => flags.date_detection,
                FieldType::Time => flags.time_detection,
                FieldType::Timedelta => flags.timedelta_detection,
                FieldType::Geo => flags.geo_detection,
                FieldType::Boolean => flags.bool_detection,
                FieldType::Text => flags.text_detection,
                _ => true,
            };
            if allowed {
                if guessed == FieldType::Text && !flags.text_detection {
                    FieldType::Keyword
                } else {
                    guessed
                }
            } else if guessed == FieldType::Text {
                FieldType::Keyword
            } else {
                // Detection for the guessed type is off: index as the
                // plain string it arrived as.
                FieldType::Keyword
            }
        }
        Value::Bytes(_) => FieldType::String,
        _ => FieldType::Empty,
    }
}

/// Canonical stored-data form of a value under its concrete type.
fn canonical_value(concrete: FieldType, value: &Value) -> Value {
    match concrete {
        FieldType::Date | FieldType::Datetime => match serialise::coerce_timestamp(value) {
            Ok(ts) => Value::Str(Tm::from_timestamp(ts).to_iso()),
            Err(_) => value.clone(),
        },
        FieldType::Uuid => match value.as_str().and_then(|s| Uuid::parse_str(s).ok()) {
            Some(u) => Value::Str(u.to_string()),
            None => value.clone(),
        },
        _ => value.clone(),
    }
}

/// Unwrap a cast-object payload into the value to index.
fn cast_payload(concrete: FieldType, payload: &Value) -> Result<Value> {
    if concrete == FieldType::Geo {
        if let Value::Map(m) = payload {
            let lat = m.get("_latitude").and_then(Value::as_f64);
            let lng = m.get("_longitude").and_then(Value::as_f64);
            if let (Some(lat), Some(lng)) = (lat, lng) {
                return Ok(Value::Str(format!("POINT({} {})", lng, lat)));
            }
            return Err(Error::client(
                "geo cast object needs _latitude and _longitude",
            ));
        }
    }
    Ok(payload.clone())
}

/// Write a value into the stored-data echo at a dotted path.
fn data_insert(data: &mut Object, dotted: &str, value: Value) {
    let mut parts = dotted.split('.').peekable();
    let mut cur = data;
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            cur.insert(part, value);
            return;
        }
        cur = match cur.entry_or(part, Value::Map(Object::new())) {
            Value::Map(m) => m,
            other => {
                *other = Value::Map(Object::new());
                other.as_object_mut().unwrap()
            }
        };
    }
}

/// Split an accuracy-suffix field name (`age_1000`, `created_month`,
/// `loc_geo10`) into its base name and numeric accuracy.
fn split_accuracy_suffix(part: &str) -> Option<(&str, u64)> {
    let (base, suffix) = part.rsplit_once('_')?;
    if base.is_empty() {
        return None;
    }
    if let Some(level) = suffix.strip_prefix("geo") {
        return level.parse::<u64>().ok().map(|l| (base, l));
    }
    if let Ok(acc) = suffix.parse::<u64>() {
        return Some((base, acc));
    }
    if let Ok(unit) = suffix.parse::<UnitTime>() {
        return Some((base, unit.code()));
    }
    None
}
