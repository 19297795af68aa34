//! Calendar, lag and rolling-window features for a single component series

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate};

use crate::config::FeatureConfig;
use crate::domain::{Component, DemandObservation};

/// Pure functions of the observation date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarFeatures {
    /// Monday = 0
    pub day_of_week: u32,
    pub day_of_month: u32,
    pub month: u32,
    pub quarter: u32,
    pub week_of_year: u32,
    pub is_weekend: bool,
    pub is_holiday_season: bool,
    pub is_holiday: bool,
}

/// Mean and sample standard deviation over a trailing window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollingStats {
    pub window: usize,
    pub mean: Option<f64>,
    pub std: Option<f64>,
}

/// Featurized demand observation
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub component: Component,
    pub units_demanded: f64,
    pub calendar: CalendarFeatures,
    /// `(k, value k observations earlier)`
    pub lags: Vec<(usize, Option<f64>)>,
    /// Windows end at, and include, this observation
    pub rolling: Vec<RollingStats>,
}

impl FeatureRow {
    pub fn lag(&self, k: usize) -> Option<f64> {
        self.lags
            .iter()
            .find(|(lag, _)| *lag == k)
            .and_then(|(_, value)| *value)
    }

    pub fn rolling_mean(&self, window: usize) -> Option<f64> {
        self.rolling
            .iter()
            .find(|r| r.window == window)
            .and_then(|r| r.mean)
    }

    pub fn rolling_std(&self, window: usize) -> Option<f64> {
        self.rolling
            .iter()
            .find(|r| r.window == window)
            .and_then(|r| r.std)
    }
}

/// Builds [`FeatureRow`]s and model regressors from a per-component demand series
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    lags: Vec<usize>,
    windows: Vec<usize>,
    holiday_months: BTreeSet<u32>,
    weekend_days: BTreeSet<u32>,
    holidays: BTreeSet<NaiveDate>,
}

impl FeatureBuilder {
    pub fn new(config: &FeatureConfig) -> Self {
        let mut lags = config.lags.clone();
        lags.sort_unstable();
        lags.dedup();
        let mut windows = config.rolling_windows.clone();
        windows.sort_unstable();
        windows.dedup();

        Self {
            lags,
            windows,
            holiday_months: config.holiday_months.iter().copied().collect(),
            weekend_days: config.weekend_days.iter().copied().collect(),
            holidays: config.holidays.iter().copied().collect(),
        }
    }

    pub fn calendar(&self, date: NaiveDate) -> CalendarFeatures {
        let day_of_week = date.weekday().num_days_from_monday();
        let month = date.month();
        CalendarFeatures {
            day_of_week,
            day_of_month: date.day(),
            month,
            quarter: (month - 1) / 3 + 1,
            week_of_year: date.iso_week().week(),
            is_weekend: self.weekend_days.contains(&day_of_week),
            is_holiday_season: self.holiday_months.contains(&month),
            is_holiday: self.holidays.contains(&date),
        }
    }

    /// Featurize one component's series, which must be sorted by date.
    /// Rows without enough history carry `None` for the affected fields.
    pub fn build(&self, series: &[DemandObservation]) -> Vec<FeatureRow> {
        let values: Vec<f64> = series.iter().map(|o| o.units_demanded).collect();

        series
            .iter()
            .enumerate()
            .map(|(i, obs)| {
                let lags = self
                    .lags
                    .iter()
                    .map(|&k| (k, i.checked_sub(k).map(|j| values[j])))
                    .collect();

                let rolling = self
                    .windows
                    .iter()
                    .map(|&w| {
                        if i + 1 >= w {
                            let (mean, std) = window_stats(&values[i + 1 - w..=i]);
                            RollingStats {
                                window: w,
                                mean: Some(mean),
                                std,
                            }
                        } else {
                            RollingStats {
                                window: w,
                                mean: None,
                                std: None,
                            }
                        }
                    })
                    .collect();

                FeatureRow {
                    date: obs.date,
                    component: obs.component,
                    units_demanded: obs.units_demanded,
                    calendar: self.calendar(obs.date),
                    lags,
                    rolling,
                }
            })
            .collect()
    }

    /// Regressor vector for the observation on `date`, computed from the
    /// strictly prior values in `history`. Rolling statistics are those of the
    /// window ending at the previous observation, so the target never feeds
    /// its own inputs.
    pub fn regressors(&self, history: &[f64], date: NaiveDate) -> Vec<Option<f64>> {
        let cal = self.calendar(date);
        let flag = |b: bool| Some(if b { 1.0 } else { 0.0 });
        let n = history.len();

        let mut x = Vec::with_capacity(self.regressor_count());
        x.push(Some(cal.day_of_week as f64));
        x.push(Some(cal.month as f64));
        x.push(Some(cal.day_of_month as f64));
        x.push(Some(cal.week_of_year as f64));
        x.push(Some(cal.quarter as f64));
        x.push(flag(cal.is_weekend));
        x.push(flag(cal.is_holiday_season));
        x.push(flag(cal.is_holiday));

        for &k in &self.lags {
            x.push(n.checked_sub(k).map(|j| history[j]));
        }
        for &w in &self.windows {
            if n >= w {
                let (mean, std) = window_stats(&history[n - w..]);
                x.push(Some(mean));
                x.push(std);
            } else {
                x.push(None);
                x.push(None);
            }
        }
        x
    }

    pub fn regressor_names(&self) -> Vec<String> {
        let mut names: Vec<String> = [
            "day_of_week",
            "month",
            "day_of_month",
            "week_of_year",
            "quarter",
            "is_weekend",
            "is_holiday_season",
            "is_holiday",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        names.extend(self.lags.iter().map(|k| format!("lag_{}", k)));
        for w in &self.windows {
            names.push(format!("prev_rolling_mean_{}", w));
            names.push(format!("prev_rolling_std_{}", w));
        }
        names
    }

    pub fn regressor_count(&self) -> usize {
        8 + self.lags.len() + 2 * self.windows.len()
    }
}

/// Mean and sample standard deviation (n - 1); std is `None` for a single value
fn window_stats(values: &[f64]) -> (f64, Option<f64>) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = if values.len() > 1 {
        let ss = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
        Some((ss / (n - 1.0)).sqrt())
    } else {
        None
    };
    (mean, std)
}

/// Split a mixed table into per-component series sorted by date
pub fn split_by_component(
    observations: &[DemandObservation],
) -> BTreeMap<Component, Vec<DemandObservation>> {
    let mut series: BTreeMap<Component, Vec<DemandObservation>> = BTreeMap::new();
    for obs in observations {
        series.entry(obs.component).or_default().push(obs.clone());
    }
    for rows in series.values_mut() {
        rows.sort_by_key(|o| o.date);
    }
    series
}
