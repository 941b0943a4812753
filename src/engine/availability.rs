use crate::model::*;

// ── Free-slot computation ─────────────────────────────────────────

/// Free sub-intervals of `query`: the bookable base (the whole query, or each
/// day's opening window clamped to it) minus the busy spans.
pub fn free_intervals(hours: Option<OpeningHours>, query: &Span, busy: &[Span]) -> Vec<Span> {
    let base = match hours {
        Some(h) => opening_windows(h, query),
        None => vec![*query],
    };

    let mut busy = busy.to_vec();
    busy.sort_by_key(|s| s.start);
    let busy = merge_overlapping(&busy);
    subtract_intervals(&base, &busy)
}

/// Each UTC day's opening window that intersects `query`, clamped to it.
pub fn opening_windows(hours: OpeningHours, query: &Span) -> Vec<Span> {
    let mut windows = Vec::new();
    let mut day = query.start - query.start.rem_euclid(DAY_MS);
    while day < query.end {
        let open = hours.window_on_day_of(day);
        let start = open.start.max(query.start);
        let end = open.end.min(query.end);
        if start < end {
            windows.push(Span::new(start, end));
        }
        day += DAY_MS;
    }
    windows
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// Both inputs sorted by start; `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = HOUR_MS;
    const DAY: Ms = 19_700 * DAY_MS;

    // ── subtract_intervals ────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![Span::new(100, 200), Span::new(300, 400)];
        let remove = vec![Span::new(200, 300)];
        assert_eq!(subtract_intervals(&base, &remove), base);
    }

    #[test]
    fn subtract_full_overlap() {
        let base = vec![Span::new(100, 200)];
        let remove = vec![Span::new(50, 250)];
        assert!(subtract_intervals(&base, &remove).is_empty());
    }

    #[test]
    fn subtract_middle_punch() {
        let base = vec![Span::new(100, 300)];
        let remove = vec![Span::new(150, 200)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![Span::new(100, 150), Span::new(200, 300)]
        );
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = vec![Span::new(0, 1000)];
        let remove = vec![Span::new(100, 200), Span::new(400, 500), Span::new(800, 900)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![
                Span::new(0, 100),
                Span::new(200, 400),
                Span::new(500, 800),
                Span::new(900, 1000),
            ]
        );
    }

    // ── merge_overlapping ────────────────────────────────

    #[test]
    fn merge_overlapping_basic() {
        let spans = vec![Span::new(100, 300), Span::new(200, 400), Span::new(500, 600)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(100, 400), Span::new(500, 600)]);
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let spans = vec![Span::new(100, 200), Span::new(200, 300)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(100, 300)]);
    }

    // ── opening_windows ──────────────────────────────────

    #[test]
    fn opening_windows_across_days() {
        let hours = OpeningHours::new(8 * 60, 22 * 60).unwrap();
        let query = Span::new(DAY + 12 * H, DAY + DAY_MS + 10 * H);
        assert_eq!(
            opening_windows(hours, &query),
            vec![
                Span::new(DAY + 12 * H, DAY + 22 * H),
                Span::new(DAY + DAY_MS + 8 * H, DAY + DAY_MS + 10 * H),
            ]
        );
    }

    #[test]
    fn opening_windows_query_while_closed() {
        let hours = OpeningHours::new(8 * 60, 22 * 60).unwrap();
        let query = Span::new(DAY + 23 * H, DAY + DAY_MS + 7 * H);
        assert!(opening_windows(hours, &query).is_empty());
    }

    // ── free_intervals ───────────────────────────────────

    #[test]
    fn free_without_hours_is_query_minus_busy() {
        let query = Span::new(DAY + 9 * H, DAY + 17 * H);
        let busy = vec![Span::new(DAY + 12 * H, DAY + 13 * H), Span::new(DAY + 10 * H, DAY + 11 * H)];
        assert_eq!(
            free_intervals(None, &query, &busy),
            vec![
                Span::new(DAY + 9 * H, DAY + 10 * H),
                Span::new(DAY + 11 * H, DAY + 12 * H),
                Span::new(DAY + 13 * H, DAY + 17 * H),
            ]
        );
    }

    #[test]
    fn free_clamped_to_opening_hours() {
        let hours = OpeningHours::new(9 * 60, 12 * 60);
        let query = Span::new(DAY, DAY + DAY_MS);
        let busy = vec![Span::new(DAY + 9 * H, DAY + 10 * H)];
        assert_eq!(
            free_intervals(hours, &query, &busy),
            vec![Span::new(DAY + 10 * H, DAY + 12 * H)]
        );
    }

    #[test]
    fn busy_spans_past_query_edges() {
        let query = Span::new(DAY + 9 * H, DAY + 12 * H);
        let busy = vec![Span::new(DAY + 8 * H, DAY + 10 * H), Span::new(DAY + 11 * H, DAY + 14 * H)];
        assert_eq!(
            free_intervals(None, &query, &busy),
            vec![Span::new(DAY + 10 * H, DAY + 11 * H)]
        );
    }
}
