//! Persistence and first-order transition analysis over any label sequence.
//!
//! Works for rule signals and HMM states alike; the label type only needs
//! to be comparable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One maximal run of a single label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceRecord<L> {
    /// 1-based run index in sequence order.
    pub block: usize,
    pub label: L,
    /// Number of consecutive observations in the run.
    pub duration: usize,
}

/// Split `labels` into maximal runs, in sequence order.
pub fn compute_persistence<L: Copy + PartialEq>(labels: &[L]) -> Vec<PersistenceRecord<L>> {
    let mut records: Vec<PersistenceRecord<L>> = Vec::new();

    for &label in labels {
        if let Some(run) = records.last_mut() {
            if run.label == label {
                run.duration += 1;
                continue;
            }
        }
        let block = records.len() + 1;
        records.push(PersistenceRecord {
            block,
            label,
            duration: 1,
        });
    }

    records
}

/// Index of every observation whose label differs from the previous one.
pub fn regime_changes<L: PartialEq>(labels: &[L]) -> Vec<usize> {
    labels
        .windows(2)
        .enumerate()
        .filter(|(_, w)| w[0] != w[1])
        .map(|(i, _)| i + 1)
        .collect()
}

/// Empirical first-order transition matrix.
///
/// Rows and columns cover every label observed anywhere in the sequence,
/// in ascending order. A label seen only as the final observation has no
/// successor and gets a row of zeros.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionMatrix<L> {
    pub labels: Vec<L>,
    /// `probabilities[i][j] = P(next = labels[j] | current = labels[i])`
    pub probabilities: Vec<Vec<f64>>,
    pub counts: Vec<Vec<usize>>,
}

impl<L: Copy + Ord> TransitionMatrix<L> {
    fn index_of(&self, label: L) -> Option<usize> {
        self.labels.binary_search(&label).ok()
    }

    /// `P(next = to | current = from)`, `None` for unseen labels.
    pub fn probability(&self, from: L, to: L) -> Option<f64> {
        Some(self.probabilities[self.index_of(from)?][self.index_of(to)?])
    }

    pub fn count(&self, from: L, to: L) -> Option<usize> {
        Some(self.counts[self.index_of(from)?][self.index_of(to)?])
    }

    pub fn row_sum(&self, from: L) -> Option<f64> {
        self.index_of(from)
            .map(|i| self.probabilities[i].iter().sum())
    }

    /// Diagonal of the matrix: probability of staying in each label.
    pub fn persistence_probabilities(&self) -> Vec<(L, f64)> {
        self.labels
            .iter()
            .enumerate()
            .map(|(i, &l)| (l, self.probabilities[i][i]))
            .collect()
    }
}

/// Count consecutive label pairs and normalize each row.
pub fn compute_transition_matrix<L: Copy + Ord>(labels: &[L]) -> TransitionMatrix<L> {
    let mut unique: Vec<L> = labels.to_vec();
    unique.sort();
    unique.dedup();

    let n = unique.len();
    let mut counts = vec![vec![0usize; n]; n];
    for pair in labels.windows(2) {
        // both labels come from `unique`
        if let (Ok(i), Ok(j)) = (unique.binary_search(&pair[0]), unique.binary_search(&pair[1])) {
            counts[i][j] += 1;
        }
    }

    let probabilities = counts
        .iter()
        .map(|row| {
            let total: usize = row.iter().sum();
            row.iter()
                .map(|&c| if total == 0 { 0.0 } else { c as f64 / total as f64 })
                .collect()
        })
        .collect();

    TransitionMatrix {
        labels: unique,
        probabilities,
        counts,
    }
}

/// Run statistics for one label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistenceSummary<L> {
    pub label: L,
    pub num_runs: usize,
    pub total_days: usize,
    pub mean_duration: f64,
    pub max_duration: usize,
    /// Fraction of all observations carrying this label.
    pub share_of_time: f64,
}

/// Aggregate persistence records per label, ordered by label.
pub fn summarize_persistence<L: Copy + Ord>(
    records: &[PersistenceRecord<L>],
) -> Vec<PersistenceSummary<L>> {
    let total: usize = records.iter().map(|r| r.duration).sum();
    let mut runs: BTreeMap<L, Vec<usize>> = BTreeMap::new();
    for r in records {
        runs.entry(r.label).or_default().push(r.duration);
    }

    runs.into_iter()
        .map(|(label, durations)| {
            let total_days: usize = durations.iter().sum();
            PersistenceSummary {
                label,
                num_runs: durations.len(),
                total_days,
                mean_duration: total_days as f64 / durations.len() as f64,
                max_duration: durations.iter().copied().max().unwrap_or(0),
                share_of_time: if total == 0 {
                    0.0
                } else {
                    total_days as f64 / total as f64
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_example() {
        let labels = ["A", "A", "B", "B", "B", "A"];
        let records = compute_persistence(&labels);
        assert_eq!(
            records,
            vec![
                PersistenceRecord { block: 1, label: "A", duration: 2 },
                PersistenceRecord { block: 2, label: "B", duration: 3 },
                PersistenceRecord { block: 3, label: "A", duration: 1 },
            ]
        );
        assert_eq!(compute_persistence::<u8>(&[]), vec![]);
    }

    #[test]
    fn test_transition_example() {
        let labels = ["A", "A", "B", "B", "B", "A"];
        let matrix = compute_transition_matrix(&labels);
        assert_eq!(matrix.labels, vec!["A", "B"]);
        assert_eq!(matrix.probability("A", "A"), Some(0.5));
        assert_eq!(matrix.probability("A", "B"), Some(0.5));
        assert!((matrix.probability("B", "B").unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert!((matrix.probability("B", "A").unwrap() - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(matrix.count("B", "B"), Some(2));
        assert_eq!(matrix.probability("A", "C"), None);
    }

    #[test]
    fn test_risk_signal_runs_and_transitions() {
        use crate::regime::RiskSignal::{Neutral, RiskOff, RiskOn};

        let labels = [RiskOn, RiskOn, Neutral, RiskOff, RiskOff];

        let durations: Vec<usize> = compute_persistence(&labels)
            .iter()
            .map(|r| r.duration)
            .collect();
        assert_eq!(durations, vec![2, 1, 2]);

        let matrix = compute_transition_matrix(&labels);
        assert_eq!(matrix.labels, vec![RiskOn, Neutral, RiskOff]);
        assert_eq!(matrix.probability(RiskOn, RiskOn), Some(0.5));
        assert_eq!(matrix.probability(RiskOn, Neutral), Some(0.5));
        assert_eq!(matrix.probability(RiskOn, RiskOff), Some(0.0));
        assert_eq!(matrix.probability(Neutral, RiskOff), Some(1.0));
        assert_eq!(matrix.probability(RiskOff, RiskOff), Some(1.0));
    }

    #[test]
    fn test_terminal_only_label_has_zero_row() {
        let matrix = compute_transition_matrix(&[1, 1, 2]);
        assert_eq!(matrix.row_sum(1), Some(1.0));
        assert_eq!(matrix.row_sum(2), Some(0.0));
        assert_eq!(matrix.probabilities[1], vec![0.0, 0.0]);
    }

    #[test]
    fn test_single_observation() {
        let matrix = compute_transition_matrix(&["X"]);
        assert_eq!(matrix.labels, vec!["X"]);
        assert_eq!(matrix.probabilities, vec![vec![0.0]]);
        assert!(regime_changes(&["X"]).is_empty());
    }

    #[test]
    fn test_regime_changes() {
        assert_eq!(regime_changes(&[0, 0, 1, 1, 0, 2]), vec![2, 4, 5]);
    }

    #[test]
    fn test_persistence_summary() {
        let records = compute_persistence(&['a', 'a', 'b', 'a', 'a', 'a', 'b', 'b']);
        let summary = summarize_persistence(&records);
        assert_eq!(summary.len(), 2);

        let a = &summary[0];
        assert_eq!(a.label, 'a');
        assert_eq!(a.num_runs, 2);
        assert_eq!(a.total_days, 5);
        assert_eq!(a.max_duration, 3);
        assert!((a.mean_duration - 2.5).abs() < 1e-12);
        assert!((a.share_of_time - 5.0 / 8.0).abs() < 1e-12);

        let total_runs: usize = summary.iter().map(|s| s.total_days).sum();
        assert_eq!(total_runs, 8);
    }

    #[test]
    fn test_diagonal() {
        let matrix = compute_transition_matrix(&[0, 0, 0, 1]);
        let diag = matrix.persistence_probabilities();
        assert!((diag[0].1 - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(diag[1], (1, 0.0));
    }
}
