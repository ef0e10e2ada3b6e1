//! Canonical ordering and anomaly detection for fetched bars.

use crate::domain::Bar;
use std::collections::BTreeMap;

/// Sort ascending by time and drop repeated timestamps, keeping the last occurrence.
pub fn canonicalize(bars: Vec<Bar>) -> Vec<Bar> {
    let mut by_time = BTreeMap::new();
    for bar in bars {
        by_time.insert(bar.time, bar);
    }
    by_time.into_values().collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyReport {
    pub anomaly_type: AnomalyType,
    pub count: usize,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyType {
    /// High/low don't envelope open/close, or a price is not positive and finite.
    InsaneBar,
    /// Every bar reports zero volume (normal for most forex feeds).
    NoVolume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
}

/// Detect anomalies without rejecting anything; the caller decides what to log.
pub fn detect_anomalies(bars: &[Bar]) -> Vec<AnomalyReport> {
    let mut anomalies = Vec::new();

    let insane = bars.iter().filter(|b| !b.is_sane()).count();
    if insane > 0 {
        anomalies.push(AnomalyReport {
            anomaly_type: AnomalyType::InsaneBar,
            count: insane,
            severity: Severity::Warning,
        });
    }

    if !bars.is_empty() && bars.iter().all(|b| b.volume == 0.0) {
        anomalies.push(AnomalyReport {
            anomaly_type: AnomalyType::NoVolume,
            count: bars.len(),
            severity: Severity::Info,
        });
    }

    anomalies
}
