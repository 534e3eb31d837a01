use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};

use shared_models::AccuracyRecord;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeagueAccuracy {
    pub mean: f64,
    pub samples: usize,
}

/// Bounded history of prediction accuracy, capped by count and age.
#[derive(Debug)]
pub struct AccuracyHistory {
    records: RwLock<VecDeque<AccuracyRecord>>,
    max_records: usize,
    max_age: Duration,
}

impl AccuracyHistory {
    pub fn new(max_records: usize, max_age: Duration) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            max_records: max_records.max(1),
            max_age,
        }
    }

    pub fn record(&self, record: AccuracyRecord) {
        let mut records = self.records.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        records.push_back(record);
        while records.len() > self.max_records {
            records.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops records older than the age cutoff. Returns how many were removed.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = chrono::Duration::from_std(self.max_age)
            .map(|age| now - age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut records = self.records.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = records.len();
        records.retain(|record| record.timestamp >= cutoff);
        before - records.len()
    }

    pub fn league_mean(&self, league: &str) -> Option<f64> {
        self.by_league().get(league).map(|stats| stats.mean)
    }

    pub fn overall_mean(&self) -> Option<f64> {
        let records = self.records.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        if records.is_empty() {
            return None;
        }
        Some(records.iter().map(|r| r.accuracy).sum::<f64>() / records.len() as f64)
    }

    pub fn by_league(&self) -> HashMap<String, LeagueAccuracy> {
        let records = self.records.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut sums: HashMap<String, (f64, usize)> = HashMap::new();
        for record in records.iter() {
            let entry = sums.entry(record.league.clone()).or_insert((0.0, 0));
            entry.0 += record.accuracy;
            entry.1 += 1;
        }

        sums.into_iter()
            .map(|(league, (sum, samples))| {
                (
                    league,
                    LeagueAccuracy {
                        mean: sum / samples as f64,
                        samples,
                    },
                )
            })
            .collect()
    }
}
