use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// True iff no booked item on the facility overlaps `window`, ignoring
    /// the items of `exclude`.
    pub async fn is_free(
        &self,
        facility: ResourceRef,
        window: TimeInterval,
        exclude: Option<ReservationId>,
    ) -> Result<bool, EngineError> {
        if facility.kind != ResourceKind::Facility {
            return Err(EngineError::ResourceNotFound(facility));
        }
        let booked = self.booked_intervals(facility, window, exclude).await?;
        Ok(booked.is_empty())
    }

    /// Units of `equipment` still free throughout `window`.
    ///
    /// Demand is the quantity-weighted sum of overlapping bookings at the
    /// busiest instant of the window. A result below zero can only come from
    /// inconsistent data; it is reported as 0 and logged.
    pub async fn available_quantity(
        &self,
        equipment: ResourceRef,
        window: TimeInterval,
        exclude: Option<ReservationId>,
    ) -> Result<i64, EngineError> {
        if equipment.kind != ResourceKind::Equipment {
            return Err(EngineError::ResourceNotFound(equipment));
        }
        let resource = self.load_resource(equipment).await?;
        let booked = self.booked_intervals(equipment, window, exclude).await?;
        let demand = clamped_demand(&booked, &window);
        Ok(remaining_units(&resource, peak_demand(&demand)))
    }

    /// Disjoint sub-spans of `window` in which at least one unit of the
    /// resource can still be booked. Inactive resources have none.
    pub async fn free_windows(
        &self,
        resource: ResourceRef,
        window: TimeInterval,
    ) -> Result<Vec<TimeInterval>, EngineError> {
        let res = self.load_resource(resource).await?;
        if !res.active {
            return Ok(Vec::new());
        }
        let booked = self.booked_intervals(resource, window, None).await?;
        let mut demand = clamped_demand(&booked, &window);
        demand.sort_by_key(|(iv, _)| iv.start);
        let busy = saturated_spans(&demand, res.quantity);
        Ok(subtract_intervals(&[window], &busy))
    }
}

/// Bookings cut down to the part that falls inside `window`.
pub(super) fn clamped_demand(booked: &[BookedInterval], window: &TimeInterval) -> Vec<(TimeInterval, u32)> {
    booked
        .iter()
        .filter_map(|b| b.interval.clamp_to(window).map(|iv| (iv, b.quantity)))
        .collect()
}

/// `quantity - demand`, clamped at zero with an anomaly report.
pub(super) fn remaining_units(resource: &Resource, demand: u64) -> i64 {
    let remaining = resource.quantity as i64 - demand as i64;
    if remaining < 0 {
        tracing::warn!(
            "{} is overbooked: demand {demand} exceeds quantity {}",
            resource.resource,
            resource.quantity
        );
        metrics::counter!(crate::observability::AVAILABILITY_ANOMALIES_TOTAL).increment(1);
        return 0;
    }
    remaining
}

// ── Interval arithmetic ───────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[TimeInterval]) -> Vec<TimeInterval> {
    let mut merged: Vec<TimeInterval> = Vec::new();
    for &iv in sorted {
        if let Some(last) = merged.last_mut()
            && iv.start <= last.end
        {
            last.end = last.end.max(iv.end);
            continue;
        }
        merged.push(iv);
    }
    merged
}

/// `base` minus `to_remove`. Both inputs sorted by start; `base` disjoint.
pub fn subtract_intervals(base: &[TimeInterval], to_remove: &[TimeInterval]) -> Vec<TimeInterval> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(TimeInterval { start: current_start, end: r.start });
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < b.end {
            result.push(TimeInterval { start: current_start, end: b.end });
        }
    }

    result
}

/// Sweep-line events, ends before starts at the same instant (half-open).
fn sweep_events(demand: &[(TimeInterval, u32)]) -> Vec<(Ms, i64)> {
    let mut events: Vec<(Ms, i64)> = Vec::with_capacity(demand.len() * 2);
    for (iv, qty) in demand {
        events.push((iv.start, *qty as i64));
        events.push((iv.end, -(*qty as i64)));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    events
}

/// Highest total quantity booked at any single instant.
pub fn peak_demand(demand: &[(TimeInterval, u32)]) -> u64 {
    let mut level: i64 = 0;
    let mut peak: i64 = 0;
    for (_, delta) in sweep_events(demand) {
        level += delta;
        peak = peak.max(level);
    }
    peak as u64
}

/// Time ranges where the quantity-weighted demand reaches `capacity`.
/// Returns sorted, merged spans.
pub fn saturated_spans(demand: &[(TimeInterval, u32)], capacity: u32) -> Vec<TimeInterval> {
    if demand.is_empty() || capacity == 0 {
        return Vec::new();
    }
    if capacity == 1 {
        let mut ivs: Vec<TimeInterval> = demand.iter().map(|(iv, _)| *iv).collect();
        ivs.sort_by_key(|iv| iv.start);
        return merge_overlapping(&ivs);
    }

    let capacity = capacity as i64;
    let mut result = Vec::new();
    let mut level: i64 = 0;
    let mut saturated_start: Option<Ms> = None;

    for (time, delta) in sweep_events(demand) {
        level += delta;
        if level >= capacity && saturated_start.is_none() {
            saturated_start = Some(time);
        } else if level < capacity
            && let Some(start) = saturated_start.take()
            && time > start
        {
            result.push(TimeInterval { start, end: time });
        }
    }

    merge_overlapping(&result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(start: Ms, end: Ms) -> TimeInterval {
        TimeInterval::new(start, end).unwrap()
    }

    // ── subtract_intervals ────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![iv(100, 200), iv(300, 400)];
        assert_eq!(subtract_intervals(&base, &[iv(200, 300)]), base);
    }

    #[test]
    fn subtract_full_overlap() {
        assert!(subtract_intervals(&[iv(100, 200)], &[iv(50, 250)]).is_empty());
    }

    #[test]
    fn subtract_partial_edges() {
        assert_eq!(subtract_intervals(&[iv(100, 200)], &[iv(50, 150)]), vec![iv(150, 200)]);
        assert_eq!(subtract_intervals(&[iv(100, 200)], &[iv(150, 250)]), vec![iv(100, 150)]);
    }

    #[test]
    fn subtract_multiple_punches() {
        let remove = vec![iv(100, 200), iv(400, 500), iv(800, 900)];
        assert_eq!(
            subtract_intervals(&[iv(0, 1000)], &remove),
            vec![iv(0, 100), iv(200, 400), iv(500, 800), iv(900, 1000)]
        );
    }

    // ── merge_overlapping ────────────────────────────────

    #[test]
    fn merge_overlapping_basic() {
        let merged = merge_overlapping(&[iv(100, 300), iv(200, 400), iv(500, 600)]);
        assert_eq!(merged, vec![iv(100, 400), iv(500, 600)]);
    }

    #[test]
    fn merge_overlapping_adjacent() {
        assert_eq!(merge_overlapping(&[iv(100, 200), iv(200, 300)]), vec![iv(100, 300)]);
    }

    // ── peak_demand ──────────────────────────────────────

    #[test]
    fn peak_counts_only_concurrent_bookings() {
        // Two bookings of 2 that never overlap each other.
        assert_eq!(peak_demand(&[(iv(0, 10), 2), (iv(20, 30), 2)]), 2);
        assert_eq!(peak_demand(&[(iv(0, 10), 2), (iv(5, 30), 2)]), 4);
    }

    #[test]
    fn peak_treats_touching_bookings_as_disjoint() {
        assert_eq!(peak_demand(&[(iv(0, 10), 3), (iv(10, 20), 3)]), 3);
    }

    #[test]
    fn peak_of_nothing_is_zero() {
        assert_eq!(peak_demand(&[]), 0);
    }

    // ── saturated_spans ──────────────────────────────────

    #[test]
    fn saturated_spans_unit_weights() {
        let sat = saturated_spans(&[(iv(0, 100), 1), (iv(50, 150), 1)], 2);
        assert_eq!(sat, vec![iv(50, 100)]);
    }

    #[test]
    fn saturated_spans_weighted() {
        // A single booking of the full quantity saturates on its own.
        assert_eq!(saturated_spans(&[(iv(0, 100), 3)], 3), vec![iv(0, 100)]);
        // 1 + 2 reaches 3 only where both overlap.
        let sat = saturated_spans(&[(iv(0, 100), 1), (iv(60, 200), 2)], 3);
        assert_eq!(sat, vec![iv(60, 100)]);
    }

    #[test]
    fn saturated_spans_capacity_one_merges() {
        let sat = saturated_spans(&[(iv(200, 300), 1), (iv(0, 100), 1), (iv(100, 150), 1)], 1);
        assert_eq!(sat, vec![iv(0, 150), iv(200, 300)]);
    }

    #[test]
    fn saturated_spans_handoff_at_same_instant() {
        let sat = saturated_spans(&[(iv(0, 50), 2), (iv(50, 100), 2)], 2);
        assert_eq!(sat, vec![iv(0, 100)]);
    }

    #[test]
    fn saturated_spans_empty() {
        assert!(saturated_spans(&[], 5).is_empty());
        assert!(saturated_spans(&[(iv(0, 10), 1)], 5).is_empty());
    }

    #[test]
    fn clamped_demand_drops_outside_parts() {
        let booked = vec![
            BookedInterval {
                interval: iv(0, 100),
                reservation_id: ulid::Ulid::new(),
                item_id: ulid::Ulid::new(),
                quantity: 2,
            },
            BookedInterval {
                interval: iv(300, 400),
                reservation_id: ulid::Ulid::new(),
                item_id: ulid::Ulid::new(),
                quantity: 1,
            },
        ];
        assert_eq!(clamped_demand(&booked, &iv(50, 200)), vec![(iv(50, 100), 2)]);
    }
}
