//! Fixed-capacity ring of consolidated rows.
//!
//! Primary data points (one per step) are folded into a row every `steps`
//! points, aligned to absolute time. Missing points count as unknown; when the
//! unknown fraction of a window exceeds `xff` the row value is unknown.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::storage::descriptor::{ArchiveDef, ConsolidationFn};

/// One consolidated row: `values[i]` belongs to data source `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// End of the consolidation window (Unix seconds).
    pub timestamp: i64,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Accumulator {
    value: Option<f64>,
    known: u32,
}

impl Accumulator {
    fn fold(&mut self, cf: ConsolidationFn, v: f64) {
        self.value = Some(match (self.value, cf) {
            (None, _) => v,
            (Some(acc), ConsolidationFn::Average) => acc + v,
            (Some(acc), ConsolidationFn::Max) => acc.max(v),
            (Some(acc), ConsolidationFn::Min) => acc.min(v),
            (Some(_), ConsolidationFn::Last) => v,
        });
        self.known += 1;
    }

    fn finish(&self, def: &ArchiveDef) -> Option<f64> {
        let unknown = def.steps.saturating_sub(self.known);
        if f64::from(unknown) / f64::from(def.steps) > def.xff {
            return None;
        }
        self.value.map(|v| match def.cf {
            ConsolidationFn::Average => v / f64::from(self.known),
            _ => v,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRobinArchive {
    def: ArchiveDef,
    rows: VecDeque<Row>,
    pending: Vec<Accumulator>,
}

impl RoundRobinArchive {
    pub fn new(def: ArchiveDef, ds_count: usize) -> Self {
        Self {
            rows: VecDeque::with_capacity(def.rows as usize),
            pending: vec![Accumulator::default(); ds_count],
            def,
        }
    }

    pub fn def(&self) -> &ArchiveDef {
        &self.def
    }

    /// Rows currently held, oldest first.
    pub fn rows(&self) -> &VecDeque<Row> {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub(crate) fn ds_count(&self) -> usize {
        self.pending.len()
    }

    /// Feeds the primary data point that ends at `pdp_end` (a multiple of `step_secs`).
    pub(crate) fn push_pdp(&mut self, pdp_end: i64, step_secs: u64, pdp: &[Option<f64>]) {
        for (acc, value) in self.pending.iter_mut().zip(pdp) {
            if let Some(v) = value {
                acc.fold(self.def.cf, *v);
            }
        }

        let pdp_index = pdp_end.div_euclid(step_secs as i64);
        if pdp_index.rem_euclid(i64::from(self.def.steps)) != 0 {
            return;
        }

        let values = self.pending.iter().map(|acc| acc.finish(&self.def)).collect();
        self.pending.fill(Accumulator::default());

        if self.rows.len() == self.def.rows as usize {
            self.rows.pop_front();
        }
        self.rows.push_back(Row {
            timestamp: pdp_end,
            values,
        });
    }

    /// Rows with `from <= timestamp <= to`.
    pub fn fetch(&self, from: i64, to: i64) -> Vec<Row> {
        self.rows
            .iter()
            .filter(|row| row.timestamp >= from && row.timestamp <= to)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(rra: &mut RoundRobinArchive, start: i64, step: u64, values: &[Option<f64>]) {
        for (i, v) in values.iter().enumerate() {
            rra.push_pdp(start + (i as i64 + 1) * step as i64, step, &[*v]);
        }
    }

    #[test]
    fn test_single_step_archive_keeps_every_point() {
        let mut rra = RoundRobinArchive::new(ArchiveDef::new(ConsolidationFn::Average, 0.5, 1, 4), 1);
        feed(&mut rra, 100, 10, &[Some(1.0), Some(2.0), Some(3.0)]);
        let rows: Vec<_> = rra.rows().iter().map(|r| (r.timestamp, r.values[0])).collect();
        assert_eq!(rows, vec![(110, Some(1.0)), (120, Some(2.0)), (130, Some(3.0))]);
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let mut rra = RoundRobinArchive::new(ArchiveDef::new(ConsolidationFn::Last, 0.5, 1, 3), 1);
        feed(&mut rra, 0, 5, &[Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(5.0)]);
        assert_eq!(rra.len(), 3);
        let ts: Vec<i64> = rra.rows().iter().map(|r| r.timestamp).collect();
        assert_eq!(ts, vec![15, 20, 25]);
        assert_eq!(rra.rows()[0].values[0], Some(3.0));
    }

    #[test]
    fn test_consolidation_functions() {
        let points = [Some(4.0), Some(1.0), Some(3.0), Some(2.0)];
        let expect = [
            (ConsolidationFn::Average, 2.5),
            (ConsolidationFn::Max, 4.0),
            (ConsolidationFn::Min, 1.0),
            (ConsolidationFn::Last, 2.0),
        ];
        for (cf, want) in expect {
            let mut rra = RoundRobinArchive::new(ArchiveDef::new(cf, 0.0, 4, 2), 1);
            feed(&mut rra, 0, 5, &points);
            assert_eq!(rra.len(), 1, "{cf}");
            assert_eq!(rra.rows()[0].values[0], Some(want), "{cf}");
            assert_eq!(rra.rows()[0].timestamp, 20);
        }
    }

    #[test]
    fn test_xff_marks_row_unknown() {
        // 2 of 4 unknown = 0.5, tolerated at xff 0.5
        let mut rra = RoundRobinArchive::new(ArchiveDef::new(ConsolidationFn::Average, 0.5, 4, 2), 1);
        feed(&mut rra, 0, 5, &[Some(2.0), None, Some(4.0), None]);
        assert_eq!(rra.rows()[0].values[0], Some(3.0));

        // 3 of 4 unknown = 0.75 > 0.5
        let mut rra = RoundRobinArchive::new(ArchiveDef::new(ConsolidationFn::Average, 0.5, 4, 2), 1);
        feed(&mut rra, 0, 5, &[Some(2.0), None, None, None]);
        assert_eq!(rra.rows()[0].values[0], None);
    }

    #[test]
    fn test_partial_first_window_counts_missing_points_as_unknown() {
        // Window boundaries at multiples of 4 steps (20s); feeding starts at 10s,
        // so the first window sees only the points ending at 15 and 20.
        let mut rra = RoundRobinArchive::new(ArchiveDef::new(ConsolidationFn::Average, 0.25, 4, 4), 1);
        feed(&mut rra, 10, 5, &[Some(1.0), Some(1.0)]);
        assert_eq!(rra.len(), 1);
        assert_eq!(rra.rows()[0].timestamp, 20);
        assert_eq!(rra.rows()[0].values[0], None);
    }

    #[test]
    fn test_fetch_window_is_inclusive() {
        let mut rra = RoundRobinArchive::new(ArchiveDef::new(ConsolidationFn::Average, 0.5, 1, 10), 1);
        feed(&mut rra, 0, 5, &[Some(1.0); 6]);
        let ts: Vec<i64> = rra.fetch(10, 20).iter().map(|r| r.timestamp).collect();
        assert_eq!(ts, vec![10, 15, 20]);
        assert!(rra.fetch(100, 200).is_empty());
    }
}
