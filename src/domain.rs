//! Core record types shared by every stage of the pipeline

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use thiserror::Error;

/// Raised when a categorical cell does not name a known value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unrecognized {kind} value `{value}`")]
pub struct ParseDomainError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseDomainError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Lowercase and strip separators so "At Risk", "at_risk" and "AtRisk" compare equal
fn normalize(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Blood component tracked in the demand series
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Component {
    Rbc,
    Platelets,
    Ffp,
    Cryoprecipitate,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::Rbc,
        Component::Platelets,
        Component::Ffp,
        Component::Cryoprecipitate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Rbc => "RBC",
            Component::Platelets => "Platelets",
            Component::Ffp => "FFP",
            Component::Cryoprecipitate => "Cryoprecipitate",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Component {
    type Err = ParseDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "rbc" | "packedrbc" | "redbloodcells" | "prbc" => Ok(Component::Rbc),
            "platelets" | "plt" => Ok(Component::Platelets),
            "ffp" | "freshfrozenplasma" | "plasma" => Ok(Component::Ffp),
            "cryoprecipitate" | "cryo" => Ok(Component::Cryoprecipitate),
            _ => Err(ParseDomainError::new("component", s)),
        }
    }
}

/// ABO group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AboGroup {
    O,
    A,
    B,
    Ab,
}

/// ABO group plus Rh factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BloodType {
    pub abo: AboGroup,
    pub rh_positive: bool,
}

impl BloodType {
    pub const UNIVERSAL_DONOR: BloodType = BloodType {
        abo: AboGroup::O,
        rh_positive: false,
    };

    pub fn is_universal_donor(&self) -> bool {
        *self == Self::UNIVERSAL_DONOR
    }
}

impl fmt::Display for BloodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let abo = match self.abo {
            AboGroup::O => "O",
            AboGroup::A => "A",
            AboGroup::B => "B",
            AboGroup::Ab => "AB",
        };
        write!(f, "{}{}", abo, if self.rh_positive { '+' } else { '-' })
    }
}

impl FromStr for BloodType {
    type Err = ParseDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().to_ascii_uppercase();
        let (abo, rh) = if let Some(abo) = trimmed.strip_suffix('+') {
            (abo, true)
        } else if let Some(abo) = trimmed.strip_suffix('-') {
            (abo, false)
        } else {
            return Err(ParseDomainError::new("blood type", s));
        };

        let abo = match abo.trim() {
            "O" => AboGroup::O,
            "A" => AboGroup::A,
            "B" => AboGroup::B,
            "AB" => AboGroup::Ab,
            _ => return Err(ParseDomainError::new("blood type", s)),
        };

        Ok(BloodType {
            abo,
            rh_positive: rh,
        })
    }
}

/// Registry-reported donation eligibility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityStatus {
    Available,
    /// Inside the minimum inter-donation interval
    NotEligible,
    /// Medical or administrative deferral
    Deferred,
}

impl FromStr for AvailabilityStatus {
    type Err = ParseDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "available" | "eligible" => Ok(AvailabilityStatus::Available),
            "noteligible" | "ineligible" | "waiting" => Ok(AvailabilityStatus::NotEligible),
            "deferred" | "deferral" => Ok(AvailabilityStatus::Deferred),
            _ => Err(ParseDomainError::new("availability status", s)),
        }
    }
}

impl fmt::Display for AvailabilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AvailabilityStatus::Available => "Available",
            AvailabilityStatus::NotEligible => "Not Eligible",
            AvailabilityStatus::Deferred => "Deferred",
        })
    }
}

/// Campaign urgency tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    /// Urgency sub-score used by the recommender
    pub fn weight(&self) -> f64 {
        match self {
            Urgency::Low => 0.25,
            Urgency::Medium => 0.5,
            Urgency::High => 0.75,
            Urgency::Critical => 1.0,
        }
    }
}

impl FromStr for Urgency {
    type Err = ParseDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "low" => Ok(Urgency::Low),
            "medium" | "normal" => Ok(Urgency::Medium),
            "high" => Ok(Urgency::High),
            "critical" => Ok(Urgency::Critical),
            _ => Err(ParseDomainError::new("urgency", s)),
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Urgency::Low => "Low",
            Urgency::Medium => "Medium",
            Urgency::High => "High",
            Urgency::Critical => "Critical",
        })
    }
}

/// Behavioral donor segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SegmentLabel {
    Champions,
    Loyal,
    Potential,
    AtRisk,
    Hibernating,
    New,
}

impl SegmentLabel {
    pub const ALL: [SegmentLabel; 6] = [
        SegmentLabel::Champions,
        SegmentLabel::Loyal,
        SegmentLabel::Potential,
        SegmentLabel::AtRisk,
        SegmentLabel::Hibernating,
        SegmentLabel::New,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentLabel::Champions => "Champions",
            SegmentLabel::Loyal => "Loyal",
            SegmentLabel::Potential => "Potential",
            SegmentLabel::AtRisk => "At Risk",
            SegmentLabel::Hibernating => "Hibernating",
            SegmentLabel::New => "New",
        }
    }

    /// Outreach playbook for donors in this segment
    pub fn outreach(&self) -> OutreachPlay {
        match self {
            SegmentLabel::Champions => OutreachPlay {
                action: "Retain & Reward",
                strategy: "VIP treatment, early access to donation drives, recognition programs",
                cadence: "Monthly touchpoints",
                channel: "Personal calls, exclusive emails",
            },
            SegmentLabel::Loyal => OutreachPlay {
                action: "Upsell & Engage",
                strategy: "Encourage referrals, milestone celebrations, loyalty rewards",
                cadence: "Bi-weekly engagement",
                channel: "Email, SMS reminders",
            },
            SegmentLabel::Potential => OutreachPlay {
                action: "Nurture & Convert",
                strategy: "Education about impact, flexible scheduling, convenience focus",
                cadence: "Weekly gentle reminders",
                channel: "Email campaigns, social media",
            },
            SegmentLabel::AtRisk => OutreachPlay {
                action: "Reactivate Urgently",
                strategy: "Win-back campaigns, understand barriers, offer incentives",
                cadence: "Immediate outreach",
                channel: "Personal calls, targeted emails",
            },
            SegmentLabel::Hibernating => OutreachPlay {
                action: "Re-engage or Archive",
                strategy: "Last-chance campaigns, surveys to understand dropout reasons",
                cadence: "One-time campaign",
                channel: "Email, direct mail",
            },
            SegmentLabel::New => OutreachPlay {
                action: "Onboard & Educate",
                strategy: "Welcome series, first-donation follow-up, community building",
                cadence: "Weekly for first month",
                channel: "Email series, app notifications",
            },
        }
    }
}

impl fmt::Display for SegmentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmentLabel {
    type Err = ParseDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "champions" | "champion" => Ok(SegmentLabel::Champions),
            "loyal" => Ok(SegmentLabel::Loyal),
            "potential" => Ok(SegmentLabel::Potential),
            "atrisk" => Ok(SegmentLabel::AtRisk),
            "hibernating" => Ok(SegmentLabel::Hibernating),
            "new" => Ok(SegmentLabel::New),
            _ => Err(ParseDomainError::new("segment", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutreachPlay {
    pub action: &'static str,
    pub strategy: &'static str,
    pub cadence: &'static str,
    pub channel: &'static str,
}

/// One day of demand for one component
#[derive(Debug, Clone, PartialEq)]
pub struct DemandObservation {
    pub date: NaiveDate,
    pub component: Component,
    pub units_demanded: f64,
}

/// Donor registry entry
#[derive(Debug, Clone, PartialEq)]
pub struct DonorProfile {
    pub donor_id: String,
    pub blood_type: BloodType,
    pub last_donation_date: Option<NaiveDate>,
    pub donation_count: u32,
    pub total_volume_cc: f64,
    pub first_donation_date: Option<NaiveDate>,
    pub availability_status: AvailabilityStatus,
    /// End of an active deferral, when the registry knows it
    pub deferred_until: Option<NaiveDate>,
}

/// Campaign definition from the campaign catalog
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignSpec {
    pub campaign_id: String,
    /// Empty means every segment is targeted
    pub target_segments: BTreeSet<SegmentLabel>,
    /// Empty means any blood type
    pub required_blood_types: BTreeSet<BloodType>,
    pub urgency: Urgency,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// One day of supply and usage for one component
#[derive(Debug, Clone, PartialEq)]
pub struct SupplyRecord {
    pub date: NaiveDate,
    pub component: Component,
    pub supply_units: f64,
    pub utilized_units: f64,
    pub wasted_units: f64,
}
