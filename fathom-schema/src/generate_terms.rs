//! Accuracy-bucket term generation.
//!
//! At index time, every numeric/temporal/geo value emits one term per
//! configured accuracy bucket (the value floored to the bucket). At
//! query time the inverse runs: a range is covered by an OR of bucket
//! anchors at the coarsest fitting bucket, refined with an ANDed finer
//! OR when one also fits under [`MAX_TERMS`].

use fathom_core::datetime::{Tm, UnitTime};
use fathom_core::{htm, serialise, Document, FieldType, Query, MAX_TERMS};
use rustc_hash::{FxHashMap, FxHashSet};

/// Build a scoped term: prefix bytes, type marker, serialised value.
pub fn prefixed(ser: &[u8], prefix: &str, marker: u8) -> Vec<u8> {
    let mut term = Vec::with_capacity(prefix.len() + 1 + ser.len());
    term.extend_from_slice(prefix.as_bytes());
    term.push(marker);
    term.extend_from_slice(ser);
    term
}

const CTYPE_INTEGER: u8 = FieldType::Integer.term_marker();
const CTYPE_DATE: u8 = FieldType::Date.term_marker();
const CTYPE_GEO: u8 = FieldType::Geo.term_marker();

fn floor_i64(value: i64, bucket: u64) -> i64 {
    let bucket = bucket as i64;
    value - value.rem_euclid(bucket)
}

fn floor_u64(value: u64, bucket: u64) -> u64 {
    value - value % bucket
}

/// Emit field-scoped bucket terms for a signed integer.
pub fn integer(doc: &mut Document, accuracy: &[u64], acc_prefix: &[String], value: i64) {
    for (acc, prefix) in accuracy.iter().zip(acc_prefix) {
        if *acc == 0 {
            continue;
        }
        let ser = serialise::integer(floor_i64(value, *acc));
        doc.add_boolean_term(prefixed(&ser, prefix, CTYPE_INTEGER));
    }
}

/// Emit field- and global-scoped bucket terms for a signed integer.
pub fn integer_global(
    doc: &mut Document,
    accuracy: &[u64],
    acc_prefix: &[String],
    acc_global_prefix: &[String],
    value: i64,
) {
    for ((acc, prefix), gprefix) in accuracy.iter().zip(acc_prefix).zip(acc_global_prefix) {
        if *acc == 0 {
            continue;
        }
        let ser = serialise::integer(floor_i64(value, *acc));
        doc.add_boolean_term(prefixed(&ser, prefix, CTYPE_INTEGER));
        doc.add_boolean_term(prefixed(&ser, gprefix, CTYPE_INTEGER));
    }
}

/// Emit field-scoped bucket terms for an unsigned integer.
pub fn positive(doc: &mut Document, accuracy: &[u64], acc_prefix: &[String], value: u64) {
    for (acc, prefix) in accuracy.iter().zip(acc_prefix) {
        if *acc == 0 {
            continue;
        }
        let ser = serialise::positive(floor_u64(value, *acc));
        doc.add_boolean_term(prefixed(&ser, prefix, CTYPE_INTEGER));
    }
}

/// Emit field- and global-scoped bucket terms for an unsigned integer.
pub fn positive_global(
    doc: &mut Document,
    accuracy: &[u64],
    acc_prefix: &[String],
    acc_global_prefix: &[String],
    value: u64,
) {
    for ((acc, prefix), gprefix) in accuracy.iter().zip(acc_prefix).zip(acc_global_prefix) {
        if *acc == 0 {
            continue;
        }
        let ser = serialise::positive(floor_u64(value, *acc));
        doc.add_boolean_term(prefixed(&ser, prefix, CTYPE_INTEGER));
        doc.add_boolean_term(prefixed(&ser, gprefix, CTYPE_INTEGER));
    }
}

/// Emit field-scoped bucket terms for a datetime.
pub fn date(doc: &mut Document, accuracy: &[u64], acc_prefix: &[String], tm: &Tm) {
    for (acc, prefix) in accuracy.iter().zip(acc_prefix) {
        if let Some(unit) = UnitTime::from_code(*acc) {
            let ser = serialise::timestamp(unit.floor(tm).timestamp());
            doc.add_boolean_term(prefixed(&ser, prefix, CTYPE_DATE));
        }
    }
}

/// Emit field- and global-scoped bucket terms for a datetime.
pub fn date_global(
    doc: &mut Document,
    accuracy: &[u64],
    acc_prefix: &[String],
    acc_global_prefix: &[String],
    tm: &Tm,
) {
    for ((acc, prefix), gprefix) in accuracy.iter().zip(acc_prefix).zip(acc_global_prefix) {
        if let Some(unit) = UnitTime::from_code(*acc) {
            let ser = serialise::timestamp(unit.floor(tm).timestamp());
            doc.add_boolean_term(prefixed(&ser, prefix, CTYPE_DATE));
            doc.add_boolean_term(prefixed(&ser, gprefix, CTYPE_DATE));
        }
    }
}

/// Seconds per bucket for the time/timedelta units.
fn unit_seconds(code: u64) -> Option<u64> {
    match UnitTime::from_code(code)? {
        UnitTime::Second => Some(1),
        UnitTime::Minute => Some(60),
        UnitTime::Hour => Some(3600),
        _ => None,
    }
}

/// Emit field-scoped bucket terms for a time-of-day / timedelta, taken
/// as integer seconds.
pub fn time(doc: &mut Document, accuracy: &[u64], acc_prefix: &[String], seconds: f64) {
    let value = seconds.trunc() as i64;
    for (acc, prefix) in accuracy.iter().zip(acc_prefix) {
        if let Some(width) = unit_seconds(*acc) {
            let ser = serialise::integer(floor_i64(value, width));
            doc.add_boolean_term(prefixed(&ser, prefix, CTYPE_INTEGER));
        }
    }
}

/// Emit field- and global-scoped bucket terms for a time-of-day.
pub fn time_global(
    doc: &mut Document,
    accuracy: &[u64],
    acc_prefix: &[String],
    acc_global_prefix: &[String],
    seconds: f64,
) {
    let value = seconds.trunc() as i64;
    for ((acc, prefix), gprefix) in accuracy.iter().zip(acc_prefix).zip(acc_global_prefix) {
        if let Some(width) = unit_seconds(*acc) {
            let ser = serialise::integer(floor_i64(value, width));
            doc.add_boolean_term(prefixed(&ser, prefix, CTYPE_INTEGER));
            doc.add_boolean_term(prefixed(&ser, gprefix, CTYPE_INTEGER));
        }
    }
}

/// Ancestor sets per configured HTM level for a range cover.
///
/// Key is the index into `accuracy`; a level finer than a trixel
/// contributes nothing for it.
fn geo_ancestor_sets(accuracy: &[u64], ranges: &[htm::HtmRange]) -> FxHashMap<usize, FxHashSet<u64>> {
    let mut map_terms: FxHashMap<usize, FxHashSet<u64>> = FxHashMap::default();
    for id in htm::ids_from_ranges(ranges) {
        let own_level = htm::level(id);
        for (i, lvl) in accuracy.iter().enumerate() {
            let lvl = *lvl as u32;
            if lvl <= own_level {
                map_terms.entry(i).or_default().insert(htm::ancestor(id, lvl));
            }
        }
    }
    map_terms
}

/// Emit field-scoped trixel-ancestor terms for a geo cover.
pub fn geo(doc: &mut Document, accuracy: &[u64], acc_prefix: &[String], ranges: &[htm::HtmRange]) {
    for (i, terms) in geo_ancestor_sets(accuracy, ranges) {
        let prefix = &acc_prefix[i];
        for term in terms {
            doc.add_boolean_term(prefixed(&serialise::positive(term), prefix, CTYPE_GEO));
        }
    }
}

/// Emit field- and global-scoped trixel-ancestor terms for a geo cover.
pub fn geo_global(
    doc: &mut Document,
    accuracy: &[u64],
    acc_prefix: &[String],
    acc_global_prefix: &[String],
    ranges: &[htm::HtmRange],
) {
    for (i, terms) in geo_ancestor_sets(accuracy, ranges) {
        let prefix = &acc_prefix[i];
        let gprefix = &acc_global_prefix[i];
        for term in terms {
            let ser = serialise::positive(term);
            doc.add_boolean_term(prefixed(&ser, prefix, CTYPE_GEO));
            doc.add_boolean_term(prefixed(&ser, gprefix, CTYPE_GEO));
        }
    }
}

// === Query-time synthesis ===

fn or_run_i64(start: i64, end: i64, bucket: u64, prefix: &str, wqf: u32) -> Query {
    let s = floor_i64(start, bucket);
    let e = floor_i64(end, bucket);
    let count = ((e as i128 - s as i128) / bucket as i128) as usize + 1;
    if count > MAX_TERMS {
        return Query::Empty;
    }
    let mut parts = Vec::with_capacity(count);
    let mut v = s;
    loop {
        parts.push(Query::term_wqf(
            prefixed(&serialise::integer(v), prefix, CTYPE_INTEGER),
            wqf,
        ));
        if v >= e {
            break;
        }
        v += bucket as i64;
    }
    Query::or(parts)
}

fn or_run_u64(start: u64, end: u64, bucket: u64, prefix: &str, wqf: u32) -> Query {
    let s = floor_u64(start, bucket);
    let e = floor_u64(end, bucket);
    let count = ((e - s) / bucket) as usize + 1;
    if count > MAX_TERMS {
        return Query::Empty;
    }
    let mut parts = Vec::with_capacity(count);
    let mut v = s;
    loop {
        parts.push(Query::term_wqf(
            prefixed(&serialise::positive(v), prefix, CTYPE_INTEGER),
            wqf,
        ));
        if v >= e {
            break;
        }
        v += bucket;
    }
    Query::or(parts)
}

/// Range query over a signed-integer field.
///
/// The finest configured bucket that keeps the anchor count under
/// [`MAX_TERMS`] forms the refining OR; the next coarser bucket, when
/// configured, is ANDed in as the upper bound.
pub fn numeric(start: i64, end: i64, accuracy: &[u64], acc_prefix: &[String], wqf: u32) -> Query {
    if accuracy.is_empty() || end < start {
        return Query::Empty;
    }
    let span = (end as i128 - start as i128) as u128;
    let needed = accuracy
        .iter()
        .position(|&acc| acc != 0 && span / (acc as u128) < MAX_TERMS as u128);
    let Some(pos) = needed else {
        return Query::Empty;
    };
    let query_needed = or_run_i64(start, end, accuracy[pos], &acc_prefix[pos], wqf);
    let query_upper = if pos + 1 < accuracy.len() {
        or_run_i64(start, end, accuracy[pos + 1], &acc_prefix[pos + 1], wqf)
    } else {
        Query::Empty
    };
    Query::and([query_upper, query_needed])
}

/// Range query over an unsigned-integer field.
pub fn numeric_u64(
    start: u64,
    end: u64,
    accuracy: &[u64],
    acc_prefix: &[String],
    wqf: u32,
) -> Query {
    if accuracy.is_empty() || end < start {
        return Query::Empty;
    }
    let span = end - start;
    let needed = accuracy
        .iter()
        .position(|&acc| acc != 0 && span / acc < MAX_TERMS as u64);
    let Some(pos) = needed else {
        return Query::Empty;
    };
    let query_needed = or_run_u64(start, end, accuracy[pos], &acc_prefix[pos], wqf);
    let query_upper = if pos + 1 < accuracy.len() {
        or_run_u64(start, end, accuracy[pos + 1], &acc_prefix[pos + 1], wqf)
    } else {
        Query::Empty
    };
    Query::and([query_upper, query_needed])
}

/// OR of bucket anchors between two instants at one time unit.
fn unit_run(tm_s: &Tm, tm_e: &Tm, unit: UnitTime, prefix: &str, wqf: u32) -> Query {
    let mut s = unit.floor(tm_s);
    let e = unit.floor(tm_e);

    let num_unions = match unit {
        UnitTime::Millennium => ((e.year - s.year) / 1000) as usize,
        UnitTime::Century => ((e.year - s.year) / 100) as usize,
        UnitTime::Decade => ((e.year - s.year) / 10) as usize,
        UnitTime::Year => (e.year - s.year) as usize,
        UnitTime::Month => (e.mon - s.mon) as usize,
        UnitTime::Day => (e.day - s.day) as usize,
        UnitTime::Hour => (e.hour - s.hour) as usize,
        UnitTime::Minute => (e.min - s.min) as usize,
        UnitTime::Second => (e.sec - s.sec) as usize,
    };
    if num_unions >= MAX_TERMS {
        return Query::Empty;
    }

    let mut parts = Vec::with_capacity(num_unions + 1);
    loop {
        parts.push(Query::term_wqf(
            prefixed(&serialise::timestamp(s.timestamp()), prefix, CTYPE_DATE),
            wqf,
        ));
        if s == e {
            break;
        }
        match unit {
            UnitTime::Millennium => s.year += 1000,
            UnitTime::Century => s.year += 100,
            UnitTime::Decade => s.year += 10,
            UnitTime::Year => s.year += 1,
            UnitTime::Month => s.mon += 1,
            UnitTime::Day => s.day += 1,
            UnitTime::Hour => s.hour += 1,
            UnitTime::Minute => s.min += 1,
            UnitTime::Second => s.sec += 1,
        }
    }
    Query::or(parts)
}

/// The accuracy unit a date range actually needs: the coarsest unit on
/// which the two endpoints differ.
fn needed_unit(tm_s: &Tm, tm_e: &Tm) -> UnitTime {
    let diff = tm_e.year - tm_s.year;
    if diff != 0 {
        if diff >= 1000 {
            UnitTime::Millennium
        } else if diff >= 100 {
            UnitTime::Century
        } else if diff >= 10 {
            UnitTime::Decade
        } else {
            UnitTime::Year
        }
    } else if tm_e.mon != tm_s.mon {
        UnitTime::Month
    } else if tm_e.day != tm_s.day {
        UnitTime::Day
    } else if tm_e.hour != tm_s.hour {
        UnitTime::Hour
    } else if tm_e.min != tm_s.min {
        UnitTime::Minute
    } else {
        UnitTime::Second
    }
}

/// Range query over a date/datetime field.
///
/// Cascades by time unit: the run at the next configured unit above the
/// needed one bounds the range, ANDed with the run at the needed unit
/// when it is configured exactly.
pub fn date_range(
    start_ts: f64,
    end_ts: f64,
    accuracy: &[u64],
    acc_prefix: &[String],
    wqf: u32,
) -> Query {
    if accuracy.is_empty() || end_ts < start_ts {
        return Query::Empty;
    }
    let tm_s = Tm::from_timestamp(start_ts);
    let tm_e = Tm::from_timestamp(end_ts);
    let acc = needed_unit(&tm_s, &tm_e).code();

    // First configured unit strictly above the needed one.
    let mut pos = 0;
    while pos < accuracy.len() && accuracy[pos] <= acc {
        pos += 1;
    }

    let mut query_upper = Query::Empty;
    if pos < accuracy.len() {
        if let Some(unit) = UnitTime::from_code(accuracy[pos]) {
            query_upper = unit_run(&tm_s, &tm_e, unit, &acc_prefix[pos], wqf);
        }
    }

    let mut query_needed = Query::Empty;
    if pos > 0 && acc == accuracy[pos - 1] {
        let pos = pos - 1;
        if let Some(unit) = UnitTime::from_code(accuracy[pos]) {
            query_needed = unit_run(&tm_s, &tm_e, unit, &acc_prefix[pos], wqf);
        }
    }

    Query::and([query_upper, query_needed])
}

/// Range query over a time/timedelta field, in integer seconds.
pub fn time_range(
    start: f64,
    end: f64,
    accuracy: &[u64],
    acc_prefix: &[String],
    wqf: u32,
) -> Query {
    let mut widths = Vec::new();
    let mut prefixes = Vec::new();
    for (acc, prefix) in accuracy.iter().zip(acc_prefix) {
        if let Some(w) = unit_seconds(*acc) {
            widths.push(w);
            prefixes.push(prefix.clone());
        }
    }
    numeric(start.trunc() as i64, end.trunc() as i64, &widths, &prefixes, wqf)
}

/// Range query over a geo field.
///
/// Covers the shape at the coarsest populated configured level, and
/// refines with the next finer populated level when both fit under
/// [`MAX_TERMS`]. Covers coarser than every configured level match
/// nothing.
pub fn geo_range(
    ranges: &[htm::HtmRange],
    accuracy: &[u64],
    acc_prefix: &[String],
    wqf: u32,
) -> Query {
    if acc_prefix.is_empty() || ranges.is_empty() {
        return Query::Empty;
    }

    let map_terms = geo_ancestor_sets(accuracy, ranges);
    if map_terms.is_empty() {
        return Query::Empty;
    }

    let mut populated: Vec<usize> = map_terms.keys().copied().collect();
    populated.sort_unstable();

    let upper_idx = populated[0];
    let upper = &map_terms[&upper_idx];
    if upper.len() >= MAX_TERMS {
        return Query::Empty;
    }
    let or_of = |idx: usize| {
        let mut terms: Vec<u64> = map_terms[&idx].iter().copied().collect();
        terms.sort_unstable();
        Query::or(terms.into_iter().map(|t| {
            Query::term_wqf(
                prefixed(&serialise::positive(t), &acc_prefix[idx], CTYPE_GEO),
                wqf,
            )
        }))
    };

    match populated.get(1) {
        None => or_of(upper_idx),
        Some(&lower_idx) => {
            let lower = &map_terms[&lower_idx];
            if lower.len() == upper.len() {
                // Every lower term has exactly one upper ancestor; the
                // finer level alone is tighter.
                or_of(lower_idx)
            } else if lower.len() < MAX_TERMS {
                Query::and([or_of(upper_idx), or_of(lower_idx)])
            } else {
                or_of(upper_idx)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fathom_core::datetime::parse_datetime;

    fn acc_prefixes(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("F#a{}", i)).collect()
    }

    #[test]
    fn test_positive_bucket_terms() {
        let mut doc = Document::new();
        positive(&mut doc, &[100, 1000], &acc_prefixes(2), 2750);
        // floor(2750/100)*100 = 2700, floor(2750/1000)*1000 = 2000
        assert!(doc.has_term(&prefixed(&serialise::positive(2700), "F#a0", b'N')));
        assert!(doc.has_term(&prefixed(&serialise::positive(2000), "F#a1", b'N')));
        assert_eq!(doc.term_count(), 2);
    }

    #[test]
    fn test_integer_floors_negative_values_down() {
        let mut doc = Document::new();
        integer(&mut doc, &[100], &acc_prefixes(1), -150);
        assert!(doc.has_term(&prefixed(&serialise::integer(-200), "F#a0", b'N')));
    }

    #[test]
    fn test_date_bucket_terms() {
        let mut doc = Document::new();
        let tm = parse_datetime("2015-06-07T08:09:10Z").unwrap();
        let accuracy = [UnitTime::Year.code(), UnitTime::Century.code()];
        date(&mut doc, &accuracy, &acc_prefixes(2), &tm);
        let y2015 = parse_datetime("2015-01-01").unwrap().timestamp();
        let y2000 = parse_datetime("2000-01-01").unwrap().timestamp();
        assert!(doc.has_term(&prefixed(&serialise::timestamp(y2015), "F#a0", b'D')));
        assert!(doc.has_term(&prefixed(&serialise::timestamp(y2000), "F#a1", b'D')));
    }

    #[test]
    fn test_numeric_range_example() {
        // age in [250, 2750] with accuracy [100, 1000]:
        // upper OR at 1000 = {0, 1000, 2000}, needed OR at 100 = {200..2700}
        let q = numeric_u64(250, 2750, &[100, 1000], &acc_prefixes(2), 1);
        match &q {
            Query::And(parts) => {
                assert_eq!(parts.len(), 2);
                let widths: Vec<usize> = parts
                    .iter()
                    .map(|p| match p {
                        Query::Or(inner) => inner.len(),
                        Query::Term { .. } => 1,
                        _ => 0,
                    })
                    .collect();
                assert!(widths.contains(&3), "upper OR has 3 anchors: {:?}", widths);
                assert!(widths.contains(&26), "needed OR has 26 anchors: {:?}", widths);
            }
            other => panic!("expected AND, got {}", other),
        }
        assert!(q.max_or_width() <= MAX_TERMS);
    }

    #[test]
    fn test_numeric_range_respects_max_terms() {
        // span/100 = 100_000 > MAX_TERMS so only the 1_000_000 bucket fits
        let q = numeric_u64(0, 10_000_000, &[100, 1_000_000], &acc_prefixes(2), 1);
        assert!(q.max_or_width() <= MAX_TERMS);
        assert!(!q.is_empty());
    }

    #[test]
    fn test_numeric_range_empty_when_nothing_fits() {
        let q = numeric_u64(0, u64::MAX / 2, &[100], &acc_prefixes(1), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn test_date_range_same_month_days() {
        let s = parse_datetime("2015-06-07").unwrap().timestamp();
        let e = parse_datetime("2015-06-09").unwrap().timestamp();
        let accuracy = [UnitTime::Day.code(), UnitTime::Month.code()];
        let q = date_range(s, e, &accuracy, &acc_prefixes(2), 1);
        // Needed = day (3 anchors), upper = month (single anchor)
        match &q {
            Query::And(parts) => assert_eq!(parts.len(), 2),
            other => panic!("expected AND, got {}", other),
        }
        assert!(q.max_or_width() <= MAX_TERMS);
    }

    #[test]
    fn test_date_range_needs_unconfigured_unit() {
        // Endpoints differ by years but only month/day accuracy is
        // configured: no upper exists, needed is not configured either
        let s = parse_datetime("2001-01-01").unwrap().timestamp();
        let e = parse_datetime("2050-01-01").unwrap().timestamp();
        let accuracy = [UnitTime::Day.code(), UnitTime::Month.code()];
        let q = date_range(s, e, &accuracy, &acc_prefixes(2), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn test_geo_terms_and_query_align() {
        let ranges = fathom_core::htm::ewkt_ranges("POINT(2.35 48.85)").unwrap();
        let accuracy = [3u64, 8, 15];
        let mut doc = Document::new();
        geo(&mut doc, &accuracy, &acc_prefixes(3), &ranges);
        // One ancestor per configured level
        assert_eq!(doc.term_count(), 3);

        let q = geo_range(&ranges, &accuracy, &acc_prefixes(3), 1);
        assert!(!q.is_empty());
        // Every query term must be indexed
        fn terms_of(q: &Query, out: &mut Vec<Vec<u8>>) {
            match q {
                Query::Term { term, .. } => out.push(term.clone()),
                Query::And(qs) | Query::Or(qs) => {
                    for q in qs {
                        terms_of(q, out);
                    }
                }
                Query::Empty => {}
            }
        }
        let mut terms = Vec::new();
        terms_of(&q, &mut terms);
        assert!(!terms.is_empty());
        for t in terms {
            assert!(doc.has_term(&t), "query term not indexed");
        }
    }
}
