//! Supply-side utilization and risk per component

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use tracing::warn;

use crate::config::InventoryConfig;
use crate::domain::{Component, DemandObservation, SupplyRecord};
use crate::error::ValidationError;

#[derive(Debug, Clone, PartialEq)]
pub struct InventoryMetrics {
    pub component: Component,
    pub days: usize,
    pub total_demand: f64,
    pub total_supply: f64,
    pub total_utilized: f64,
    pub total_wasted: f64,
    pub utilization_rate: f64,
    pub shortage_risk: f64,
    pub wastage_risk: f64,
    pub wastage_rate: f64,
    pub meets_utilization_target: bool,
}

/// Metrics per component plus the supply rows that could not be used
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InventoryReport {
    pub metrics: Vec<InventoryMetrics>,
    pub rejected: Vec<ValidationError>,
}

#[derive(Debug, Clone, Copy)]
pub struct InventoryAnalyzer {
    utilization_target: f64,
}

#[derive(Default)]
struct Totals {
    days: usize,
    demand: f64,
    supply: f64,
    utilized: f64,
    wasted: f64,
}

impl InventoryAnalyzer {
    pub fn new(config: &InventoryConfig) -> Self {
        Self {
            utilization_target: config.utilization_target,
        }
    }

    /// Totals per component over the supply days, with demand joined on (date, component).
    ///
    /// A supply day needs a demand observation for the same component. Days
    /// without one are left out of every total and reported, as are repeated
    /// (date, component) supply rows after the first.
    pub fn analyze(&self, supply: &[SupplyRecord], demand: &[DemandObservation]) -> InventoryReport {
        let demand_by_day: HashMap<(NaiveDate, Component), f64> = demand
            .iter()
            .map(|o| ((o.date, o.component), o.units_demanded))
            .collect();

        let mut seen = HashSet::new();
        let mut rejected = Vec::new();
        let mut totals: BTreeMap<Component, Totals> = BTreeMap::new();
        for record in supply {
            let key = (record.date, record.component);
            if !seen.insert(key) {
                warn!(date = %record.date, component = %record.component, "duplicate supply record");
                rejected.push(ValidationError::DuplicateSupply {
                    date: record.date,
                    component: record.component,
                });
                continue;
            }
            let Some(&units_demanded) = demand_by_day.get(&key) else {
                warn!(date = %record.date, component = %record.component, "supply day without demand");
                rejected.push(ValidationError::MissingDemandForSupply {
                    date: record.date,
                    component: record.component,
                });
                continue;
            };

            let t = totals.entry(record.component).or_default();
            t.days += 1;
            t.supply += record.supply_units;
            t.utilized += record.utilized_units;
            t.wasted += record.wasted_units;
            t.demand += units_demanded;
        }

        let metrics = totals
            .into_iter()
            .map(|(component, t)| {
                let utilization_rate = if t.supply > 0.0 {
                    (t.demand / t.supply).min(1.0)
                } else {
                    0.0
                };
                let shortage_risk = if t.demand > 0.0 {
                    ((t.demand - t.supply) / t.demand).max(0.0)
                } else {
                    0.0
                };
                let (wastage_risk, wastage_rate) = if t.supply > 0.0 {
                    (((t.supply - t.demand) / t.supply).max(0.0), t.wasted / t.supply)
                } else {
                    (0.0, 0.0)
                };

                InventoryMetrics {
                    component,
                    days: t.days,
                    total_demand: t.demand,
                    total_supply: t.supply,
                    total_utilized: t.utilized,
                    total_wasted: t.wasted,
                    utilization_rate,
                    shortage_risk,
                    wastage_risk,
                    wastage_rate,
                    meets_utilization_target: utilization_rate >= self.utilization_target,
                }
            })
            .collect();

        InventoryReport { metrics, rejected }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn supply(d: u32, component: Component, units: f64, wasted: f64) -> SupplyRecord {
        SupplyRecord {
            date: day(d),
            component,
            supply_units: units,
            utilized_units: units - wasted,
            wasted_units: wasted,
        }
    }

    fn demand(d: u32, component: Component, units: f64) -> DemandObservation {
        DemandObservation {
            date: day(d),
            component,
            units_demanded: units,
        }
    }

    #[test]
    fn test_oversupply_and_shortage() {
        let analyzer = InventoryAnalyzer::new(&InventoryConfig::default());
        let report = analyzer.analyze(
            &[
                supply(1, Component::Rbc, 110.0, 8.0),
                supply(2, Component::Rbc, 90.0, 2.0),
                supply(1, Component::Platelets, 20.0, 0.0),
            ],
            &[
                demand(1, Component::Rbc, 95.0),
                demand(2, Component::Rbc, 85.0),
                demand(3, Component::Rbc, 500.0),
                demand(1, Component::Platelets, 25.0),
            ],
        );

        assert!(report.rejected.is_empty());
        let metrics = &report.metrics;
        assert_eq!(metrics.len(), 2);
        let rbc = &metrics[0];
        assert_eq!(rbc.component, Component::Rbc);
        assert_eq!(rbc.days, 2);
        // day 3 has no supply row and is left out
        assert_eq!(rbc.total_demand, 180.0);
        assert!((rbc.utilization_rate - 0.9).abs() < 1e-12);
        assert!(!rbc.meets_utilization_target);
        assert!((rbc.wastage_risk - 0.1).abs() < 1e-12);
        assert!((rbc.wastage_rate - 0.05).abs() < 1e-12);
        assert_eq!(rbc.shortage_risk, 0.0);

        let platelets = &metrics[1];
        assert_eq!(platelets.utilization_rate, 1.0);
        assert!(platelets.meets_utilization_target);
        assert!((platelets.shortage_risk - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_zero_supply_is_not_a_division_error() {
        let analyzer = InventoryAnalyzer::new(&InventoryConfig::default());
        let report = analyzer.analyze(&[supply(1, Component::Ffp, 0.0, 0.0)], &[demand(1, Component::Ffp, 0.0)]);
        let metrics = &report.metrics;
        assert_eq!(metrics[0].days, 1);
        assert_eq!(metrics[0].utilization_rate, 0.0);
        assert_eq!(metrics[0].wastage_rate, 0.0);
        assert_eq!(metrics[0].shortage_risk, 0.0);
    }

    #[test]
    fn test_supply_day_without_demand_is_excluded_and_reported() {
        let analyzer = InventoryAnalyzer::new(&InventoryConfig::default());
        let report = analyzer.analyze(
            &[
                supply(1, Component::Ffp, 30.0, 1.0),
                supply(2, Component::Ffp, 500.0, 400.0),
            ],
            &[demand(1, Component::Ffp, 24.0)],
        );

        assert_eq!(
            report.rejected,
            vec![ValidationError::MissingDemandForSupply {
                date: day(2),
                component: Component::Ffp,
            }]
        );
        let ffp = &report.metrics[0];
        assert_eq!(ffp.days, 1);
        assert_eq!(ffp.total_supply, 30.0);
        assert_eq!(ffp.total_wasted, 1.0);
        assert!((ffp.utilization_rate - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_component_with_no_matched_days_has_no_metrics() {
        let analyzer = InventoryAnalyzer::new(&InventoryConfig::default());
        let report = analyzer.analyze(&[supply(4, Component::Cryoprecipitate, 10.0, 0.0)], &[demand(4, Component::Rbc, 10.0)]);
        assert!(report.metrics.is_empty());
        assert_eq!(report.rejected.len(), 1);
    }

    #[test]
    fn test_duplicate_supply_keeps_the_first_row() {
        let analyzer = InventoryAnalyzer::new(&InventoryConfig::default());
        let report = analyzer.analyze(
            &[
                supply(1, Component::Rbc, 100.0, 5.0),
                supply(1, Component::Rbc, 300.0, 50.0),
            ],
            &[demand(1, Component::Rbc, 90.0)],
        );

        assert_eq!(
            report.rejected,
            vec![ValidationError::DuplicateSupply {
                date: day(1),
                component: Component::Rbc,
            }]
        );
        let rbc = &report.metrics[0];
        assert_eq!(rbc.days, 1);
        assert_eq!(rbc.total_supply, 100.0);
        assert_eq!(rbc.total_wasted, 5.0);
    }
}
