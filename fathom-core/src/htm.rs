//! Trixel id arithmetic for the Hierarchical Triangular Mesh encoding.
//!
//! A trixel id is a u64 whose bit length encodes its level: the top
//! four bits select the octant (values 8..=15) and every further bit
//! pair selects a child, so a level-`L` id is `4 + 2L` bits long.
//! Ranges are expressed at the maximum level ([`MAX_LEVEL`]) and
//! decomposed into maximal aligned trixels.
//!
//! Full geometry (arbitrary EWKT shapes to range covers) is an external
//! collaborator; only `POINT` covers are computed here so the geo path
//! is exercisable end to end.

use crate::error::{Error, Result};

/// Finest subdivision level.
pub const MAX_LEVEL: u32 = 25;

/// Bit length of a full-resolution (level-25) id.
pub const BITS_ID: u32 = 2 * MAX_LEVEL + 4;

/// An inclusive range of full-resolution trixel ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HtmRange {
    pub start: u64,
    pub end: u64,
}

fn bit_len(id: u64) -> u32 {
    64 - id.leading_zeros()
}

/// Subdivision level of an id.
pub fn level(id: u64) -> u32 {
    (bit_len(id) - 4) / 2
}

/// Left-shift that aligns `id` to the fixed full-resolution frame.
/// Always a multiple of two.
pub fn start_pos(id: u64) -> u32 {
    (BITS_ID - bit_len(id)) & !1
}

/// Ancestor of `id` at a coarser `ancestor_level`.
pub fn ancestor(id: u64, ancestor_level: u32) -> u64 {
    let own = level(id);
    debug_assert!(ancestor_level <= own);
    id >> (2 * (own - ancestor_level))
}

/// Decompose inclusive full-resolution ranges into maximal aligned
/// trixel ids.
pub fn ids_from_ranges(ranges: &[HtmRange]) -> Vec<u64> {
    let mut ids = Vec::new();
    for r in ranges {
        let mut s = r.start;
        while s <= r.end {
            // Largest even shift that keeps the block aligned and inside
            // the range (and keeps the octant prefix intact).
            let mut k = s.trailing_zeros().min(2 * MAX_LEVEL) & !1;
            while k > 0 {
                let span = 1u64 << k;
                if s.checked_add(span - 1).map(|e| e <= r.end).unwrap_or(false) {
                    break;
                }
                k -= 2;
            }
            ids.push(s >> k);
            match s.checked_add(1u64 << k) {
                Some(next) => s = next,
                None => break,
            }
        }
    }
    ids
}

/// Merge overlapping or adjacent ranges into a minimal sorted cover.
pub fn merge_ranges(mut ranges: Vec<HtmRange>) -> Vec<HtmRange> {
    if ranges.is_empty() {
        return ranges;
    }
    ranges.sort();
    let mut out: Vec<HtmRange> = Vec::with_capacity(ranges.len());
    for r in ranges {
        match out.last_mut() {
            Some(last) if r.start <= last.end.saturating_add(1) => {
                last.end = last.end.max(r.end);
            }
            _ => out.push(r),
        }
    }
    out
}

/// Full-resolution trixel containing a point.
///
/// Octant from the latitude sign and longitude quadrant, then a 25-deep
/// quadtree refinement within the octant cell.
pub fn point_trixel(lat: f64, lng: f64) -> u64 {
    let lat = lat.clamp(-90.0, 90.0);
    let mut lng = lng.rem_euclid(360.0);
    if lng >= 180.0 {
        lng -= 360.0;
    }

    let lng_quad = (((lng + 180.0) / 90.0) as u64).min(3);
    let oct = if lat >= 0.0 { 4 } else { 0 } + lng_quad;
    let mut id: u64 = 8 + oct;

    // Position within the octant cell, each axis in [0, 1).
    let mut u = ((lng + 180.0) / 90.0).fract();
    let mut v = if lat >= 0.0 { lat / 90.0 } else { (lat + 90.0) / 90.0 };
    v = v.clamp(0.0, 1.0 - f64::EPSILON);
    u = u.clamp(0.0, 1.0 - f64::EPSILON);

    for _ in 0..MAX_LEVEL {
        u *= 2.0;
        v *= 2.0;
        let ub = if u >= 1.0 { 1u64 } else { 0 };
        let vb = if v >= 1.0 { 1u64 } else { 0 };
        u -= ub as f64;
        v -= vb as f64;
        id = (id << 2) | (vb << 1) | ub;
    }
    id
}

/// Range cover of an EWKT literal.
///
/// Accepts an optional `SRID=n;` prefix. Only `POINT(lng lat)` is
/// computed locally; other geometries come from the external geometry
/// collaborator.
pub fn ewkt_ranges(ewkt: &str) -> Result<Vec<HtmRange>> {
    let body = match ewkt.split_once(';') {
        Some((srid, rest)) if srid.starts_with("SRID=") => rest,
        _ => ewkt,
    };
    let body = body.trim();
    if let Some((lat, lng)) = try_extract_point(body) {
        let id = point_trixel(lat, lng);
        return Ok(vec![HtmRange { start: id, end: id }]);
    }
    Err(Error::client(format!("Unsupported geometry: {:?}", ewkt)))
}

/// Detect a 2D `POINT` literal and extract `(lat, lng)`.
///
/// WKT uses `(lng lat)` order; rejects `POINT EMPTY` and 3D/4D forms.
fn try_extract_point(wkt: &str) -> Option<(f64, f64)> {
    let wkt = wkt.trim();
    if !wkt.starts_with("POINT") {
        return None;
    }
    if wkt.contains("EMPTY") {
        return None;
    }
    let start = wkt.find('(')?;
    let end = wkt.rfind(')')?;
    if start >= end {
        return None;
    }
    let coords = wkt[start + 1..end].trim();
    let mut parts = coords.split_whitespace();
    let lng: f64 = parts.next()?.parse().ok()?;
    let lat: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    if !lat.is_finite() || !lng.is_finite() {
        return None;
    }
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return None;
    }
    Some((lat, lng))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_and_start_pos() {
        // Level-0 ids are 8..=15 (4 bits)
        assert_eq!(level(8), 0);
        assert_eq!(start_pos(8), BITS_ID - 4);
        // One subdivision adds two bits
        let child = (8u64 << 2) | 3;
        assert_eq!(level(child), 1);
        assert_eq!(start_pos(child), BITS_ID - 6);
    }

    #[test]
    fn test_ancestor() {
        let id = point_trixel(48.85, 2.35);
        assert_eq!(level(id), MAX_LEVEL);
        let a10 = ancestor(id, 10);
        assert_eq!(level(a10), 10);
        // Ancestors nest
        assert_eq!(ancestor(a10, 3), ancestor(id, 3));
    }

    #[test]
    fn test_ids_from_ranges_single() {
        let id = point_trixel(10.0, 20.0);
        let ids = ids_from_ranges(&[HtmRange { start: id, end: id }]);
        assert_eq!(ids, vec![id]);
    }

    #[test]
    fn test_ids_from_ranges_aligned_block() {
        // A full aligned block of 4 children collapses to the parent
        let parent = point_trixel(10.0, 20.0) >> 2;
        let start = parent << 2;
        let end = start + 3;
        let ids = ids_from_ranges(&[HtmRange { start, end }]);
        assert_eq!(ids, vec![parent]);
    }

    #[test]
    fn test_merge_ranges() {
        let merged = merge_ranges(vec![
            HtmRange { start: 10, end: 20 },
            HtmRange { start: 15, end: 30 },
            HtmRange { start: 40, end: 50 },
        ]);
        assert_eq!(
            merged,
            vec![HtmRange { start: 10, end: 30 }, HtmRange { start: 40, end: 50 }]
        );
    }

    #[test]
    fn test_nearby_points_share_coarse_ancestor() {
        let a = point_trixel(48.8566, 2.3522);
        let b = point_trixel(48.8570, 2.3530);
        assert_eq!(ancestor(a, 8), ancestor(b, 8));
        let far = point_trixel(-33.86, 151.2);
        assert_ne!(ancestor(a, 3), ancestor(far, 3));
    }
}
