//! Quintile scoring, K-Means segmentation and segment labelling

use std::collections::BTreeMap;

use ndarray::Array2;
use tracing::{debug, info, warn};

use crate::config::{KSelection, SegmentationConfig};
use crate::domain::{OutreachPlay, SegmentLabel};
use crate::error::QualityWarning;
use crate::model::{fit_kmeans, silhouette_sample, KMeansModel, StandardScaler};
use crate::rfm::RfmRecord;
use crate::workers::map_scoped;

/// Per-dimension scores, 1 (worst) to the quintile count (best)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfmScores {
    pub recency: u32,
    pub frequency: u32,
    pub monetary: u32,
}

impl RfmScores {
    pub fn composite(&self) -> u32 {
        self.recency + self.frequency + self.monetary
    }
}

/// Label and scores for one donor
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentAssignment {
    pub record: RfmRecord,
    /// `None` for new donors
    pub scores: Option<RfmScores>,
    /// `None` for new donors and when labels came from the score rules
    pub cluster: Option<usize>,
    pub label: SegmentLabel,
}

/// Outcome of one candidate K
#[derive(Debug, Clone, PartialEq)]
pub struct KTrial {
    pub k: usize,
    pub inertia: f64,
    pub silhouette: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterProfile {
    pub cluster: usize,
    pub size: usize,
    pub mean_recency_score: f64,
    pub mean_frequency_score: f64,
    pub mean_monetary_score: f64,
    pub mean_composite: f64,
    pub label: SegmentLabel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSummary {
    pub label: SegmentLabel,
    pub donors: usize,
    pub share: f64,
    pub mean_recency_months: Option<f64>,
    pub mean_frequency: f64,
    pub mean_monetary_cc: f64,
    pub outreach: OutreachPlay,
}

#[derive(Debug, Clone, Default)]
pub struct SegmentationResult {
    /// Sorted by donor id
    pub assignments: Vec<SegmentAssignment>,
    pub k: Option<usize>,
    pub silhouette: Option<f64>,
    pub trials: Vec<KTrial>,
    pub clusters: Vec<ClusterProfile>,
    pub summaries: Vec<SegmentSummary>,
    pub warnings: Vec<QualityWarning>,
}

impl SegmentationResult {
    pub fn assignment(&self, donor_id: &str) -> Option<&SegmentAssignment> {
        self.assignments
            .binary_search_by(|a| a.record.donor_id.as_str().cmp(donor_id))
            .ok()
            .map(|i| &self.assignments[i])
    }

    pub fn label_of(&self, donor_id: &str) -> Option<SegmentLabel> {
        self.assignment(donor_id).map(|a| a.label)
    }

    /// Smallest and largest composite score among scored donors
    pub fn composite_range(&self) -> Option<(u32, u32)> {
        let mut composites = self
            .assignments
            .iter()
            .filter_map(|a| a.scores.map(|s| s.composite()));
        let first = composites.next()?;
        Some(composites.fold((first, first), |(lo, hi), c| (lo.min(c), hi.max(c))))
    }
}

/// Interior quantile edges at `j / q`, linearly interpolated between order statistics
pub fn quantile_edges(values: &[f64], q: usize) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let last = (sorted.len() - 1) as f64;

    (1..q)
        .map(|j| {
            let pos = last * j as f64 / q as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        })
        .collect()
}

/// Zero-based bin: how many edges lie strictly below `value`
pub fn bin_index(value: f64, edges: &[f64]) -> usize {
    edges.iter().filter(|&&edge| edge < value).count()
}

/// Rank 1..=n by value, ties broken by position so equal values get distinct ranks
pub fn first_occurrence_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]).then(a.cmp(&b)));
    let mut ranks = vec![0.0; values.len()];
    for (rank, &i) in order.iter().enumerate() {
        ranks[i] = (rank + 1) as f64;
    }
    ranks
}

/// Quintile scores for records that all have a recency. Recency scores
/// inversely; frequency and monetary are binned on their ranks.
pub fn score_records(records: &[&RfmRecord], quintiles: usize) -> Vec<RfmScores> {
    let q = quintiles as u32;
    let recency: Vec<f64> = records
        .iter()
        .map(|r| r.recency_months.unwrap_or(0) as f64)
        .collect();
    let frequency = first_occurrence_ranks(&records.iter().map(|r| r.frequency as f64).collect::<Vec<_>>());
    let monetary = first_occurrence_ranks(&records.iter().map(|r| r.monetary_cc).collect::<Vec<_>>());

    let r_edges = quantile_edges(&recency, quintiles);
    let f_edges = quantile_edges(&frequency, quintiles);
    let m_edges = quantile_edges(&monetary, quintiles);

    (0..records.len())
        .map(|i| RfmScores {
            recency: q - bin_index(recency[i], &r_edges) as u32,
            frequency: bin_index(frequency[i], &f_edges) as u32 + 1,
            monetary: bin_index(monetary[i], &m_edges) as u32 + 1,
        })
        .collect()
}

/// Fixed score rules used when clustering is not possible
pub fn rule_label(scores: &RfmScores) -> SegmentLabel {
    let (r, f) = (scores.recency, scores.frequency);
    if r >= 4 && f >= 4 {
        SegmentLabel::Champions
    } else if r >= 3 && f >= 3 {
        SegmentLabel::Loyal
    } else if r >= 4 && f == 1 {
        SegmentLabel::Potential
    } else if r <= 2 && f >= 3 {
        SegmentLabel::AtRisk
    } else if r <= 2 && f <= 2 {
        SegmentLabel::Hibernating
    } else {
        SegmentLabel::Potential
    }
}

/// Clusters a cohort's RFM records into named segments
#[derive(Debug, Clone)]
pub struct SegmentationEngine {
    config: SegmentationConfig,
    seed: u64,
}

impl SegmentationEngine {
    pub fn new(config: SegmentationConfig, seed: u64) -> Self {
        Self { config, seed }
    }

    pub fn segment(&self, records: &[RfmRecord]) -> SegmentationResult {
        let mut sorted: Vec<&RfmRecord> = records.iter().collect();
        sorted.sort_by(|a, b| a.donor_id.cmp(&b.donor_id));
        let (new, engaged): (Vec<&RfmRecord>, Vec<&RfmRecord>) =
            sorted.iter().copied().partition(|r| r.is_new());

        let scores = score_records(&engaged, self.config.quintiles);
        let mut result = SegmentationResult::default();

        let required = self.config.k_min + 1;
        let labels = if engaged.len() < required {
            warn!(engaged = engaged.len(), required, "cohort too small to cluster");
            result.warnings.push(QualityWarning::CohortTooSmall {
                engaged: engaged.len(),
                required,
            });
            None
        } else {
            self.cluster(&engaged, &scores, &mut result)
        };

        let mut assignments: Vec<SegmentAssignment> = engaged
            .iter()
            .zip(&scores)
            .enumerate()
            .map(|(i, (record, score))| {
                let (cluster, label) = match &labels {
                    Some((model_labels, cluster_labels)) => {
                        let c = model_labels[i];
                        (Some(c), cluster_labels[&c])
                    }
                    None => (None, rule_label(score)),
                };
                SegmentAssignment {
                    record: (*record).clone(),
                    scores: Some(*score),
                    cluster,
                    label,
                }
            })
            .collect();
        assignments.extend(new.iter().map(|record| SegmentAssignment {
            record: (*record).clone(),
            scores: None,
            cluster: None,
            label: SegmentLabel::New,
        }));
        assignments.sort_by(|a, b| a.record.donor_id.cmp(&b.record.donor_id));

        result.summaries = summarize(&assignments);
        result.assignments = assignments;
        info!(
            donors = result.assignments.len(),
            new = new.len(),
            k = ?result.k,
            silhouette = ?result.silhouette,
            "segmentation complete"
        );
        result
    }

    /// Search K, fit the chosen model and label its clusters. `None` means
    /// every K failed and the caller should fall back to the score rules.
    #[allow(clippy::type_complexity)]
    fn cluster(
        &self,
        engaged: &[&RfmRecord],
        scores: &[RfmScores],
        result: &mut SegmentationResult,
    ) -> Option<(Vec<usize>, BTreeMap<usize, SegmentLabel>)> {
        let raw = Array2::from_shape_fn((engaged.len(), 3), |(i, j)| match j {
            0 => engaged[i].recency_months.unwrap_or(0) as f64,
            1 => engaged[i].frequency as f64,
            _ => engaged[i].monetary_cc,
        });
        let features = StandardScaler::fit(&raw).transform(&raw);
        let sample = silhouette_sample(engaged.len(), self.config.silhouette_sample, self.seed);

        let k_max = self.config.k_max.min(engaged.len() - 1);
        let ks: Vec<usize> = (self.config.k_min..=k_max).collect();
        let fits = map_scoped(&ks, self.config.parallel, |&k| {
            fit_kmeans(&features, k, &self.config, self.seed).map(|model| {
                let silhouette = model.silhouette(&features, &sample);
                (model, silhouette)
            })
        });

        let mut models: Vec<(KMeansModel, f64)> = Vec::new();
        let mut last_error = None;
        for (k, fit) in ks.iter().zip(fits) {
            match fit {
                Ok((model, silhouette)) => {
                    debug!(k, inertia = model.inertia, silhouette, "k trial");
                    result.trials.push(KTrial {
                        k: *k,
                        inertia: model.inertia,
                        silhouette,
                    });
                    models.push((model, silhouette));
                }
                Err(err) => {
                    debug!(k, error = %err, "k trial failed");
                    last_error = Some(err.to_string());
                }
            }
        }

        let Some(chosen) = self.choose_k(&result.trials) else {
            let reason = last_error.unwrap_or_else(|| "no k in range".to_string());
            warn!(reason = %reason, "clustering failed, using score rules");
            result.warnings.push(QualityWarning::ClusteringFailed { reason });
            return None;
        };
        let (model, silhouette) = models.swap_remove(chosen);
        result.k = Some(model.n_clusters);
        result.silhouette = Some(silhouette);

        if silhouette < self.config.silhouette_threshold {
            warn!(
                k = model.n_clusters,
                silhouette,
                threshold = self.config.silhouette_threshold,
                "silhouette below target"
            );
            result.warnings.push(QualityWarning::LowSilhouette {
                k: model.n_clusters,
                silhouette,
                threshold: self.config.silhouette_threshold,
            });
        }

        result.clusters = self.label_clusters(&model, scores);
        let labels = model.labels.to_vec();
        let mapping = result.clusters.iter().map(|c| (c.cluster, c.label)).collect();
        Some((labels, mapping))
    }

    /// Index into `trials` of the chosen K
    fn choose_k(&self, trials: &[KTrial]) -> Option<usize> {
        let by_silhouette = || {
            trials
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| {
                    a.silhouette
                        .total_cmp(&b.silhouette)
                        .then_with(|| b.k.cmp(&a.k))
                })
                .map(|(i, _)| i)
        };

        match self.config.k_selection {
            KSelection::Silhouette => by_silhouette(),
            KSelection::Elbow if trials.len() < 3 => by_silhouette(),
            KSelection::Elbow => (1..trials.len() - 1)
                .map(|i| {
                    let bend = trials[i - 1].inertia - 2.0 * trials[i].inertia + trials[i + 1].inertia;
                    (i, bend)
                })
                .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
                .map(|(i, _)| i),
        }
    }

    /// Rank clusters by mean composite; the top one is Champions and the rest
    /// are named by whether their mean recency and frequency scores sit at or
    /// above the scale midpoint
    fn label_clusters(&self, model: &KMeansModel, scores: &[RfmScores]) -> Vec<ClusterProfile> {
        let mut sums = vec![(0.0, 0.0, 0.0); model.n_clusters];
        for (&c, s) in model.labels.iter().zip(scores) {
            let entry = &mut sums[c];
            entry.0 += s.recency as f64;
            entry.1 += s.frequency as f64;
            entry.2 += s.monetary as f64;
        }

        let mut profiles: Vec<ClusterProfile> = model
            .cluster_sizes()
            .into_iter()
            .zip(sums)
            .enumerate()
            .filter(|(_, (size, _))| *size > 0)
            .map(|(cluster, (size, (r, f, m)))| {
                let n = size as f64;
                ClusterProfile {
                    cluster,
                    size,
                    mean_recency_score: r / n,
                    mean_frequency_score: f / n,
                    mean_monetary_score: m / n,
                    mean_composite: (r + f + m) / n,
                    label: SegmentLabel::Potential,
                }
            })
            .collect();

        profiles.sort_by(|a, b| {
            b.mean_composite
                .total_cmp(&a.mean_composite)
                .then_with(|| b.mean_recency_score.total_cmp(&a.mean_recency_score))
                .then_with(|| a.cluster.cmp(&b.cluster))
        });

        let midpoint = (self.config.quintiles as f64 + 1.0) / 2.0;
        for (rank, profile) in profiles.iter_mut().enumerate() {
            let recent = profile.mean_recency_score >= midpoint;
            let frequent = profile.mean_frequency_score >= midpoint;
            profile.label = match (rank, recent, frequent) {
                (0, _, _) => SegmentLabel::Champions,
                (_, true, true) => SegmentLabel::Loyal,
                (_, true, false) => SegmentLabel::Potential,
                (_, false, true) => SegmentLabel::AtRisk,
                (_, false, false) => SegmentLabel::Hibernating,
            };
        }
        profiles
    }
}

fn summarize(assignments: &[SegmentAssignment]) -> Vec<SegmentSummary> {
    let total = assignments.len();
    SegmentLabel::ALL
        .iter()
        .filter_map(|&label| {
            let members: Vec<&RfmRecord> = assignments
                .iter()
                .filter(|a| a.label == label)
                .map(|a| &a.record)
                .collect();
            if members.is_empty() {
                return None;
            }
            let n = members.len() as f64;
            let recencies: Vec<f64> = members
                .iter()
                .filter_map(|r| r.recency_months.map(f64::from))
                .collect();
            let mean_recency_months =
                (!recencies.is_empty()).then(|| recencies.iter().sum::<f64>() / recencies.len() as f64);

            Some(SegmentSummary {
                label,
                donors: members.len(),
                share: n / total as f64,
                mean_recency_months,
                mean_frequency: members.iter().map(|r| r.frequency as f64).sum::<f64>() / n,
                mean_monetary_cc: members.iter().map(|r| r.monetary_cc).sum::<f64>() / n,
                outreach: label.outreach(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, recency: Option<u32>, frequency: u32, monetary: f64) -> RfmRecord {
        RfmRecord {
            donor_id: id.to_string(),
            recency_months: recency,
            frequency,
            monetary_cc: monetary,
        }
    }

    /// Four well-separated behaviour groups of 15 donors each
    fn cohort() -> Vec<RfmRecord> {
        let mut records = Vec::new();
        let groups = [(1, 20, 9000.0), (2, 3, 1350.0), (24, 18, 8100.0), (30, 1, 450.0)];
        for (g, (recency, frequency, monetary)) in groups.iter().enumerate() {
            for i in 0..15u32 {
                records.push(record(
                    &format!("D{}{:02}", g, i),
                    Some(recency + i % 2),
                    frequency + i % 3,
                    monetary + (i * 10) as f64,
                ));
            }
        }
        records.push(record("N001", None, 0, 0.0));
        records
    }

    #[test]
    fn test_quantile_edges_interpolate() {
        let edges = quantile_edges(&[1.0, 2.0, 3.0, 4.0, 5.0], 4);
        assert_eq!(edges, vec![2.0, 3.0, 4.0]);
        assert_eq!(bin_index(2.0, &edges), 0);
        assert_eq!(bin_index(2.5, &edges), 1);
        assert_eq!(bin_index(9.0, &edges), 3);
    }

    #[test]
    fn test_rank_binning_keeps_ties_apart() {
        let records: Vec<RfmRecord> = (0..10)
            .map(|i| record(&format!("D{}", i), Some(i), 1, 450.0))
            .collect();
        let refs: Vec<&RfmRecord> = records.iter().collect();
        let scores = score_records(&refs, 5);

        let frequency: Vec<u32> = scores.iter().map(|s| s.frequency).collect();
        assert_eq!(frequency, vec![1, 1, 2, 2, 3, 3, 4, 4, 5, 5]);
        // most recent donors score highest
        assert_eq!(scores[0].recency, 5);
        assert_eq!(scores[9].recency, 1);
    }

    #[test]
    fn test_new_donors_are_labelled_new() {
        let engine = SegmentationEngine::new(SegmentationConfig::default(), 42);
        let result = engine.segment(&cohort());

        let new = result.assignment("N001").unwrap();
        assert_eq!(new.label, SegmentLabel::New);
        assert!(new.scores.is_none());
        assert!(result
            .assignments
            .iter()
            .filter(|a| a.label == SegmentLabel::New)
            .all(|a| a.record.frequency == 0));
    }

    #[test]
    fn test_top_cluster_is_champions() {
        let engine = SegmentationEngine::new(SegmentationConfig::default(), 42);
        let result = engine.segment(&cohort());

        assert!(result.k.is_some());
        assert!(!result.trials.is_empty());
        assert_eq!(result.clusters[0].label, SegmentLabel::Champions);
        assert_eq!(result.label_of("D000"), Some(SegmentLabel::Champions));
        assert_eq!(result.label_of("D300"), Some(SegmentLabel::Hibernating));
        for pair in result.clusters.windows(2) {
            assert!(pair[0].mean_composite >= pair[1].mean_composite);
        }
    }

    fn elbow_config(k_min: usize, k_max: usize) -> SegmentationConfig {
        SegmentationConfig {
            k_selection: KSelection::Elbow,
            k_min,
            k_max,
            parallel: false,
            ..SegmentationConfig::default()
        }
    }

    #[test]
    fn test_elbow_picks_the_knee() {
        let engine = SegmentationEngine::new(elbow_config(3, 6), 11);
        let result = engine.segment(&cohort());

        let ks: Vec<usize> = result.trials.iter().map(|t| t.k).collect();
        assert_eq!(ks, vec![3, 4, 5, 6]);
        // merging two of the four groups costs far more than splitting one
        assert!(result.trials[0].inertia > 10.0 * result.trials[1].inertia);
        assert_eq!(result.k, Some(4));

        let again = engine.segment(&cohort());
        assert_eq!(again.k, result.k);
        assert_eq!(again.trials, result.trials);
        assert_eq!(again.assignments, result.assignments);
    }

    #[test]
    fn test_elbow_with_two_trials_uses_silhouette() {
        let engine = SegmentationEngine::new(elbow_config(3, 4), 11);
        let result = engine.segment(&cohort());

        assert_eq!(result.trials.len(), 2);
        let best = result
            .trials
            .iter()
            .max_by(|a, b| a.silhouette.total_cmp(&b.silhouette))
            .unwrap();
        assert_eq!(result.k, Some(best.k));
        assert_eq!(result.silhouette, Some(best.silhouette));
    }

    #[test]
    fn test_choose_k_elbow_and_silhouette_differ() {
        let trials: Vec<KTrial> = [(2, 100.0, 0.9), (3, 40.0, 0.5), (4, 30.0, 0.4), (5, 25.0, 0.3)]
            .into_iter()
            .map(|(k, inertia, silhouette)| KTrial { k, inertia, silhouette })
            .collect();

        let elbow = SegmentationEngine::new(elbow_config(2, 5), 1);
        assert_eq!(elbow.choose_k(&trials), Some(1));

        let by_silhouette = SegmentationEngine::new(SegmentationConfig::default(), 1);
        assert_eq!(by_silhouette.choose_k(&trials), Some(0));
    }

    #[test]
    fn test_cluster_sizes_cover_engaged_donors() {
        let engine = SegmentationEngine::new(SegmentationConfig::default(), 42);
        let result = engine.segment(&cohort());

        let clustered: usize = result.clusters.iter().map(|c| c.size).sum();
        assert_eq!(clustered, 60);
        assert!(result.clusters.iter().all(|c| c.size > 0));
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let engine = SegmentationEngine::new(SegmentationConfig::default(), 9);
        let a = engine.segment(&cohort());
        let b = engine.segment(&cohort());
        assert_eq!(a.assignments, b.assignments);
        assert_eq!(a.trials, b.trials);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let engine = SegmentationEngine::new(SegmentationConfig::default(), 9);
        let mut reversed = cohort();
        reversed.reverse();
        assert_eq!(engine.segment(&cohort()).assignments, engine.segment(&reversed).assignments);
    }

    #[test]
    fn test_small_cohort_falls_back_to_rules() {
        let engine = SegmentationEngine::new(SegmentationConfig::default(), 1);
        let records = vec![
            record("A", Some(0), 12, 5400.0),
            record("B", Some(20), 1, 450.0),
            record("C", None, 0, 0.0),
        ];
        let result = engine.segment(&records);

        assert!(result.k.is_none());
        assert!(matches!(
            result.warnings[0],
            QualityWarning::CohortTooSmall { engaged: 2, required: 4 }
        ));
        assert_eq!(result.label_of("C"), Some(SegmentLabel::New));
        assert_eq!(result.assignments.len(), 3);
    }

    #[test]
    fn test_rule_labels() {
        let s = |recency, frequency| RfmScores {
            recency,
            frequency,
            monetary: 3,
        };
        assert_eq!(rule_label(&s(5, 5)), SegmentLabel::Champions);
        assert_eq!(rule_label(&s(3, 3)), SegmentLabel::Loyal);
        assert_eq!(rule_label(&s(5, 1)), SegmentLabel::Potential);
        assert_eq!(rule_label(&s(1, 4)), SegmentLabel::AtRisk);
        assert_eq!(rule_label(&s(2, 2)), SegmentLabel::Hibernating);
        assert_eq!(rule_label(&s(3, 2)), SegmentLabel::Potential);
    }

    #[test]
    fn test_summaries_cover_every_donor() {
        let engine = SegmentationEngine::new(SegmentationConfig::default(), 42);
        let result = engine.segment(&cohort());
        let total: usize = result.summaries.iter().map(|s| s.donors).sum();
        assert_eq!(total, result.assignments.len());
        let share: f64 = result.summaries.iter().map(|s| s.share).sum();
        assert!((share - 1.0).abs() < 1e-12);
    }
}
