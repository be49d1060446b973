/// One candidate hit reduced to the offsets that matter for
/// confirmation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetHit {
    /// `query_offset - candidate_offset`. Hits from a genuine duplicate
    /// cluster around one delta; coincidental hash collisions scatter.
    pub delta: i64,
    pub query_offset: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct ConfirmParams {
    pub min_hits: usize,
    /// Fraction of hits that must fall inside the dominant delta window.
    pub density_threshold: f64,
    /// Half-width of the delta window.
    pub delta_tolerance: i64,
    /// Minimum `max - min` of the matched query offsets; a short span is
    /// rejected as coincidence.
    pub min_span: i64,
}

/// Decides whether a per-scene hit set is a real match. Returns the
/// dominant-window density as the confidence, or `None` when any gate
/// fails.
pub fn confirm_offset_hits(hits: &[OffsetHit], params: &ConfirmParams) -> Option<f64> {
    if hits.len() < params.min_hits.max(1) {
        return None;
    }

    let mut sorted: Vec<OffsetHit> = hits.to_vec();
    sorted.sort_by_key(|hit| hit.delta);

    // Widest window is [delta, delta + 2*tolerance]; slide it over the
    // sorted deltas and keep the densest placement.
    let window = params.delta_tolerance.max(0) * 2;
    let mut best_range = (0usize, 0usize);
    let mut start = 0usize;
    for end in 0..sorted.len() {
        while sorted[end].delta - sorted[start].delta > window {
            start += 1;
        }
        if end - start > best_range.1 - best_range.0 {
            best_range = (start, end);
        }
    }

    let dominant = &sorted[best_range.0..=best_range.1];
    let density = dominant.len() as f64 / sorted.len() as f64;
    if density < params.density_threshold {
        return None;
    }

    let min_offset = dominant.iter().map(|hit| hit.query_offset).min()?;
    let max_offset = dominant.iter().map(|hit| hit.query_offset).max()?;
    if max_offset - min_offset < params.min_span {
        return None;
    }

    Some(density)
}
