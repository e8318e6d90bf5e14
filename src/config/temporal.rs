use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemporalError {
    #[error("temporal model must have at least one entry")]
    Empty,
    #[error("temporal keys must be strictly increasing")]
    UnsortedKeys,
    #[error("time vector needs a non-empty horizon: start {start}, end {end}")]
    EmptyHorizon { start: NaiveDateTime, end: NaiveDateTime },
}

/// Half-open interval [start, end) in UTC. Values of all time series are
/// constant within a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Period {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn duration_days(&self) -> f64 {
        (self.end - self.start).num_seconds() as f64 / 86_400.0
    }

    pub fn contains(&self, instant: NaiveDateTime) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// Strictly increasing instants partitioning the global horizon into
/// half-open periods. Built from the union of influencing time-series
/// instants and temporal-model keys, clipped to [start, end).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeVector {
    instants: Vec<NaiveDateTime>,
}

impl TimeVector {
    pub fn build(
        global_start: NaiveDateTime,
        global_end: NaiveDateTime,
        influencing_instants: impl IntoIterator<Item = NaiveDateTime>,
    ) -> Result<Self, TemporalError> {
        if global_end <= global_start {
            return Err(TemporalError::EmptyHorizon {
                start: global_start,
                end: global_end,
            });
        }
        let mut instants: Vec<NaiveDateTime> = influencing_instants
            .into_iter()
            .filter(|t| *t > global_start && *t < global_end)
            .collect();
        instants.push(global_start);
        instants.push(global_end);
        instants.sort();
        instants.dedup();
        Ok(Self { instants })
    }

    pub fn instants(&self) -> &[NaiveDateTime] {
        &self.instants
    }

    pub fn period_count(&self) -> usize {
        self.instants.len() - 1
    }

    pub fn periods(&self) -> Vec<Period> {
        self.instants
            .windows(2)
            .map(|w| Period::new(w[0], w[1]))
            .collect()
    }
}

/// Piecewise-constant function of time: date-keyed entries, each value
/// holding from its key until the next. Lookup finds the greatest key at
/// or before the queried instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalModel<T> {
    entries: Vec<(NaiveDateTime, T)>,
}

impl<T> TemporalModel<T> {
    pub fn new(entries: Vec<(NaiveDateTime, T)>) -> Result<Self, TemporalError> {
        if entries.is_empty() {
            return Err(TemporalError::Empty);
        }
        if entries.windows(2).any(|w| w[1].0 <= w[0].0) {
            return Err(TemporalError::UnsortedKeys);
        }
        Ok(Self { entries })
    }

    /// A model with one value holding over the whole horizon.
    pub fn constant(value: T) -> Self {
        Self {
            entries: vec![(NaiveDateTime::MIN, value)],
        }
    }

    pub fn at(&self, instant: NaiveDateTime) -> Option<&T> {
        self.entries
            .iter()
            .rev()
            .find(|(key, _)| *key <= instant)
            .map(|(_, value)| value)
    }

    pub fn keys(&self) -> impl Iterator<Item = NaiveDateTime> + '_ {
        self.entries.iter().map(|(key, _)| *key)
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn instant(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn time_vector_unions_and_clips() {
        let tv = TimeVector::build(
            instant(2024, 1, 1),
            instant(2026, 1, 1),
            vec![
                instant(2023, 6, 1), // before start, dropped
                instant(2024, 7, 1),
                instant(2025, 1, 1),
                instant(2024, 7, 1), // duplicate
                instant(2027, 1, 1), // after end, dropped
            ],
        )
        .unwrap();
        assert_eq!(tv.period_count(), 3);
        let periods = tv.periods();
        assert_eq!(periods[0].start, instant(2024, 1, 1));
        assert_eq!(periods[0].end, instant(2024, 7, 1));
        assert_eq!(periods[2].end, instant(2026, 1, 1));
    }

    #[test]
    fn empty_horizon_is_rejected() {
        let err = TimeVector::build(instant(2025, 1, 1), instant(2025, 1, 1), vec![]).unwrap_err();
        assert!(matches!(err, TemporalError::EmptyHorizon { .. }));
    }

    #[test]
    fn temporal_lookup_finds_greatest_key_at_or_before() {
        let model = TemporalModel::new(vec![
            (instant(2024, 1, 1), 10.0),
            (instant(2025, 1, 1), 20.0),
        ])
        .unwrap();
        assert_eq!(model.at(instant(2023, 6, 1)), None);
        assert_eq!(model.at(instant(2024, 1, 1)), Some(&10.0));
        assert_eq!(model.at(instant(2024, 12, 31)), Some(&10.0));
        assert_eq!(model.at(instant(2025, 1, 1)), Some(&20.0));
        assert_eq!(model.at(instant(2030, 1, 1)), Some(&20.0));
    }

    #[test]
    fn unsorted_keys_are_rejected() {
        let err = TemporalModel::new(vec![
            (instant(2025, 1, 1), 1.0),
            (instant(2024, 1, 1), 2.0),
        ])
        .unwrap_err();
        assert_eq!(err, TemporalError::UnsortedKeys);
    }

    #[test]
    fn period_duration_in_days() {
        let p = Period::new(instant(2024, 1, 1), instant(2024, 2, 1));
        assert_eq!(p.duration_days(), 31.0);
    }
}
