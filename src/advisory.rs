//! Laboratory advisory
//!
//! Compares entered lab values with adult reference ranges and reports the
//! direction each out-of-range value should move.

use crate::schema::LabPanel;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive reference range of one lab
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReferenceRange {
    pub field: &'static str,
    pub low: f64,
    pub high: f64,
}

pub const REFERENCE_RANGES: [ReferenceRange; 15] = [
    ReferenceRange { field: "WBC", low: 4.0, high: 10.0 },
    ReferenceRange { field: "RBC", low: 3.8, high: 5.2 },
    ReferenceRange { field: "Hb", low: 12.0, high: 16.0 },
    ReferenceRange { field: "PLT", low: 165.0, high: 360.0 },
    ReferenceRange { field: "Neutrophil", low: 35.0, high: 75.0 },
    ReferenceRange { field: "Lymphocyte", low: 25.0, high: 40.0 },
    ReferenceRange { field: "AST", low: 0.0, high: 35.0 },
    ReferenceRange { field: "ALT", low: 0.0, high: 40.0 },
    ReferenceRange { field: "BUN", low: 5.0, high: 19.0 },
    ReferenceRange { field: "Cr", low: 0.2, high: 1.1 },
    ReferenceRange { field: "Glucose", low: 70.0, high: 110.0 },
    ReferenceRange { field: "Total_Protein", low: 6.4, high: 8.3 },
    ReferenceRange { field: "Na", low: 136.0, high: 145.0 },
    ReferenceRange { field: "K", low: 3.5, high: 5.1 },
    ReferenceRange { field: "Cl", low: 98.0, high: 107.0 },
];

pub fn reference_range(field: &str) -> Option<&'static ReferenceRange> {
    REFERENCE_RANGES.iter().find(|r| r.field == field)
}

/// Side of the range a value falls on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Deviation {
    Low,
    High,
}

/// An entered lab value outside its reference range
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabFinding {
    pub field: &'static str,
    pub value: f64,
    pub range: ReferenceRange,
    pub deviation: Deviation,
}

impl fmt::Display for LabFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (side, action) = match self.deviation {
            Deviation::Low => ("below", "should be raised"),
            Deviation::High => ("above", "should be lowered"),
        };
        write!(
            f,
            "{} is {}, {side} the reference range {}~{}; {action}",
            self.field, self.value, self.range.low, self.range.high
        )
    }
}

/// Findings for every measured lab outside its range, in panel order
pub fn assess_labs(labs: &LabPanel) -> Vec<LabFinding> {
    labs.measured()
        .filter_map(|(field, value)| {
            let range = reference_range(field)?;
            let deviation = if value < range.low {
                Deviation::Low
            } else if value > range.high {
                Deviation::High
            } else {
                return None;
            };
            Some(LabFinding {
                field,
                value,
                range: *range,
                deviation,
            })
        })
        .collect()
}
