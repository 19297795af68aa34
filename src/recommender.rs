//! Donor-to-campaign scoring and ranking

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::NaiveDate;
use tracing::debug;

use crate::config::RecommenderConfig;
use crate::domain::{AvailabilityStatus, BloodType, CampaignSpec, DonorProfile, SegmentLabel};
use crate::segmentation::{SegmentAssignment, SegmentationResult};

/// One ranked donor for one campaign, with its score broken down
#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub donor_id: String,
    pub campaign_id: String,
    pub score: f64,
    /// 1-based within the campaign
    pub rank: usize,
    pub segment: SegmentLabel,
    pub recency_months: Option<u32>,
    pub rfm: f64,
    pub availability: f64,
    pub segment_match: f64,
    pub blood_match: f64,
    pub urgency: f64,
}

#[derive(Debug, Clone)]
pub struct RecommenderScorer {
    config: RecommenderConfig,
    reference_date: NaiveDate,
}

impl RecommenderScorer {
    pub fn new(config: RecommenderConfig, reference_date: NaiveDate) -> Self {
        Self {
            config,
            reference_date,
        }
    }

    /// Availability sub-score; `None` when the donor cannot be asked at all
    pub fn availability(&self, donor: &DonorProfile) -> Option<f64> {
        match donor.availability_status {
            AvailabilityStatus::Available => Some(1.0),
            AvailabilityStatus::Deferred => match donor.deferred_until {
                Some(until) if until <= self.reference_date => Some(1.0),
                _ => None,
            },
            AvailabilityStatus::NotEligible => {
                let Some(last) = donor.last_donation_date else {
                    return Some(0.0);
                };
                let interval = self.config.min_donation_interval_days;
                let elapsed = (self.reference_date - last).num_days();
                let days_until_eligible = (interval - elapsed).max(0) as f64;
                Some((1.0 - days_until_eligible / interval as f64).clamp(0.0, 1.0))
            }
        }
    }

    pub fn segment_match(&self, label: SegmentLabel, campaign: &CampaignSpec) -> f64 {
        if campaign.target_segments.is_empty() || campaign.target_segments.contains(&label) {
            1.0
        } else {
            self.config.segment_partial_credit
        }
    }

    pub fn blood_match(&self, blood_type: BloodType, campaign: &CampaignSpec) -> f64 {
        if campaign.required_blood_types.is_empty()
            || blood_type.is_universal_donor()
            || campaign.required_blood_types.contains(&blood_type)
        {
            1.0
        } else {
            0.0
        }
    }

    /// Rank every eligible, segmented donor for one campaign
    pub fn rank(
        &self,
        campaign: &CampaignSpec,
        donors: &[DonorProfile],
        segmentation: &SegmentationResult,
    ) -> Vec<Recommendation> {
        let range = segmentation.composite_range();
        let w = &self.config.weights;
        let urgency = campaign.urgency.weight();
        let mut excluded = 0usize;
        let mut seen = HashSet::new();

        let mut ranked: Vec<Recommendation> = donors
            .iter()
            .filter_map(|donor| {
                // donors rejected during profiling have no assignment
                let assignment = segmentation.assignment(&donor.donor_id)?;
                if !seen.insert(donor.donor_id.as_str()) {
                    return None;
                }
                let Some(availability) = self.availability(donor) else {
                    excluded += 1;
                    return None;
                };
                let rfm = normalized_composite(assignment, range);
                let segment_match = self.segment_match(assignment.label, campaign);
                let blood_match = self.blood_match(donor.blood_type, campaign);
                let score = (w.rfm * rfm
                    + w.availability * availability
                    + w.segment_match * segment_match
                    + w.blood_match * blood_match
                    + w.urgency * urgency)
                    .clamp(0.0, 1.0);

                Some(Recommendation {
                    donor_id: donor.donor_id.clone(),
                    campaign_id: campaign.campaign_id.clone(),
                    score,
                    rank: 0,
                    segment: assignment.label,
                    recency_months: assignment.record.recency_months,
                    rfm,
                    availability,
                    segment_match,
                    blood_match,
                    urgency,
                })
            })
            .collect();

        ranked.sort_by(ranking_order);
        if self.config.max_per_campaign > 0 {
            ranked.truncate(self.config.max_per_campaign);
        }
        for (i, rec) in ranked.iter_mut().enumerate() {
            rec.rank = i + 1;
        }

        debug!(
            campaign = %campaign.campaign_id,
            ranked = ranked.len(),
            ineligible = excluded,
            "campaign ranked"
        );
        ranked
    }

    /// Rank donors for every campaign, in catalog order
    pub fn recommend(
        &self,
        campaigns: &[CampaignSpec],
        donors: &[DonorProfile],
        segmentation: &SegmentationResult,
    ) -> Vec<Recommendation> {
        campaigns
            .iter()
            .flat_map(|campaign| self.rank(campaign, donors, segmentation))
            .collect()
    }
}

/// Composite RFM min-max scaled over the cohort. New donors have no history and
/// score 0; a cohort whose composites are all equal scores 1.
fn normalized_composite(assignment: &SegmentAssignment, range: Option<(u32, u32)>) -> f64 {
    match (assignment.scores, range) {
        (Some(scores), Some((lo, hi))) if hi > lo => {
            (scores.composite() - lo) as f64 / (hi - lo) as f64
        }
        (Some(_), Some(_)) => 1.0,
        _ => 0.0,
    }
}

/// Score descending, then lower recency (unknown last), then donor id
fn ranking_order(a: &Recommendation, b: &Recommendation) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| match (a.recency_months, b.recency_months) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.donor_id.cmp(&b.donor_id))
}
