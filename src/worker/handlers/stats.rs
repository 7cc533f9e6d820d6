use anyhow::bail;
use async_trait::async_trait;
use itertools::Itertools;
use serde_json::{json, Value};

use super::JobHandler;
use crate::types::{Job, Record};

/// Descriptive statistics over the `spots` of the selection.
pub struct StatsHandler;

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub mean: f64,
    pub harmonic_mean: f64,
    pub median: f64,
    pub low_median: u32,
    pub high_median: u32,
    pub mode: u32,
    /// Sample variance, undefined for fewer than two values.
    pub variance: Option<f64>,
    pub standard_deviation: Option<f64>,
}

pub fn summarize(values: &[u32]) -> Option<Summary> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / n;

    // Any zero makes the harmonic mean zero
    let harmonic_mean = if values.contains(&0) {
        0.0
    } else {
        n / values.iter().map(|&v| 1.0 / f64::from(v)).sum::<f64>()
    };

    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    let (low_median, high_median) = if sorted.len() % 2 == 0 {
        (sorted[mid - 1], sorted[mid])
    } else {
        (sorted[mid], sorted[mid])
    };
    let median = (f64::from(low_median) + f64::from(high_median)) / 2.0;

    let variance = (values.len() >= 2).then(|| {
        values
            .iter()
            .map(|&v| (f64::from(v) - mean).powi(2))
            .sum::<f64>()
            / (n - 1.0)
    });

    Some(Summary {
        mean,
        harmonic_mean,
        median,
        low_median,
        high_median,
        mode: mode(values),
        variance,
        standard_deviation: variance.map(f64::sqrt),
    })
}

// Most common value; ties go to the one seen first.
fn mode(values: &[u32]) -> u32 {
    let counts = values.iter().copied().counts();
    values.iter().copied().fold(values[0], |best, v| {
        if counts[&v] > counts[&best] {
            v
        } else {
            best
        }
    })
}

impl Summary {
    pub fn to_json(&self) -> Value {
        json!([
            {"mean": self.mean},
            {"harmonic mean": self.harmonic_mean},
            {"median": self.median},
            {"low median": self.low_median},
            {"high median": self.high_median},
            {"mode": self.mode},
            {"variance": self.variance},
            {"standard deviation": self.standard_deviation},
        ])
    }
}

#[async_trait]
impl JobHandler for StatsHandler {
    async fn handle(&self, _job: &Job, selection: &[Record]) -> anyhow::Result<Value> {
        let spots: Vec<u32> = selection.iter().map(|r| r.spots).collect();
        match summarize(&spots) {
            Some(summary) => Ok(summary.to_json()),
            None => bail!("No records matched the job's selector"),
        }
    }
}
