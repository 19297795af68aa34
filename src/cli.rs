//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use clap::Parser;

/// Blood bank demand forecasting and donor engagement analytics
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Daily demand table (date, component, units_demanded)
    #[arg(long, default_value = "data/blood_demand.csv")]
    pub demand: PathBuf,

    /// Donor registry table
    #[arg(long, default_value = "data/donors.csv")]
    pub donors: PathBuf,

    /// Campaign catalog table
    #[arg(long, default_value = "data/campaigns.csv")]
    pub campaigns: PathBuf,

    /// Optional supply table for inventory metrics
    #[arg(long)]
    pub supply: Option<PathBuf>,

    /// TOML configuration file; every key is optional
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory for the output tables and charts
    #[arg(short, long, default_value = "output")]
    pub output_dir: PathBuf,

    /// Analysis reference date (YYYY-MM-DD), defaults to today
    #[arg(short, long)]
    pub reference_date: Option<String>,

    /// Seed for clustering and tree models
    #[arg(short, long, default_value = "42")]
    pub seed: u64,

    /// Also render PNG charts
    #[arg(long)]
    pub plots: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// The reference date given on the command line, or today's date
    pub fn parse_reference_date(&self) -> crate::Result<NaiveDate> {
        match self.reference_date.as_deref() {
            Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .map_err(|_| anyhow::anyhow!("Invalid reference date (expected YYYY-MM-DD): {}", raw)),
            None => Ok(Local::now().date_naive()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference_date() {
        let mut args = Args::parse_from(["blood-analytics", "--reference-date", "2024-06-30", "--seed", "7"]);
        assert_eq!(args.seed, 7);
        assert_eq!(
            args.parse_reference_date().unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
        );

        args.reference_date = Some("30/06/2024".to_string());
        assert!(args.parse_reference_date().is_err());

        args.reference_date = None;
        assert_eq!(args.parse_reference_date().unwrap(), Local::now().date_naive());
    }

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["blood-analytics"]);
        assert_eq!(args.seed, 42);
        assert!(args.supply.is_none());
        assert!(!args.plots);
        assert_eq!(args.output_dir, PathBuf::from("output"));
    }
}
