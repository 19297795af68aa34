//! Recency / frequency / monetary profiling of the donor registry

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};
use tracing::{debug, warn};

use crate::domain::DonorProfile;
use crate::error::ValidationError;

/// RFM metrics for one donor
#[derive(Debug, Clone, PartialEq)]
pub struct RfmRecord {
    pub donor_id: String,
    /// Whole calendar months since the last donation; `None` for donors who never gave
    pub recency_months: Option<u32>,
    pub frequency: u32,
    pub monetary_cc: f64,
}

impl RfmRecord {
    /// No donation history yet
    pub fn is_new(&self) -> bool {
        self.recency_months.is_none()
    }
}

/// Valid records plus the donors that were rejected
#[derive(Debug, Clone, Default)]
pub struct CohortProfile {
    pub records: Vec<RfmRecord>,
    pub rejected: Vec<ValidationError>,
}

#[derive(Debug, Clone, Copy)]
pub struct RfmProfiler {
    reference_date: NaiveDate,
}

impl RfmProfiler {
    pub fn new(reference_date: NaiveDate) -> Self {
        Self { reference_date }
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    pub fn profile(&self, donor: &DonorProfile) -> Result<RfmRecord, ValidationError> {
        if donor.donation_count == 0 {
            return Ok(RfmRecord {
                donor_id: donor.donor_id.clone(),
                recency_months: None,
                frequency: 0,
                monetary_cc: 0.0,
            });
        }

        let last = donor
            .last_donation_date
            .ok_or_else(|| ValidationError::MissingLastDonation {
                donor_id: donor.donor_id.clone(),
                donation_count: donor.donation_count,
            })?;
        if last > self.reference_date {
            return Err(ValidationError::DonationAfterReference {
                donor_id: donor.donor_id.clone(),
                last_donation: last,
                reference_date: self.reference_date,
            });
        }

        Ok(RfmRecord {
            donor_id: donor.donor_id.clone(),
            recency_months: Some(months_between(last, self.reference_date)),
            frequency: donor.donation_count,
            monetary_cc: donor.total_volume_cc,
        })
    }

    /// Profile a registry, dropping duplicate ids (first kept) and invalid donors
    pub fn profile_cohort(&self, donors: &[DonorProfile]) -> CohortProfile {
        let mut seen = BTreeSet::new();
        let mut cohort = CohortProfile::default();

        for donor in donors {
            if !seen.insert(donor.donor_id.as_str()) {
                warn!(donor_id = %donor.donor_id, "duplicate donor id");
                cohort
                    .rejected
                    .push(ValidationError::DuplicateDonor(donor.donor_id.clone()));
                continue;
            }
            match self.profile(donor) {
                Ok(record) => cohort.records.push(record),
                Err(err) => {
                    warn!(error = %err, "donor excluded from profiling");
                    cohort.rejected.push(err);
                }
            }
        }

        debug!(
            profiled = cohort.records.len(),
            rejected = cohort.rejected.len(),
            "cohort profiled"
        );
        cohort
    }
}

/// Whole calendar months from `from` to `to`, one less when `to` has not yet
/// reached `from`'s day of month. `from` must not be after `to`.
pub fn months_between(from: NaiveDate, to: NaiveDate) -> u32 {
    let mut months = (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32;
    if to.day() < from.day() {
        months -= 1;
    }
    months.max(0) as u32
}
