//! Named tempo divisions offered as multiplier choices.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Division {
    pub name: &'static str,
    pub multiplier: f64,
}

const MULTIPLIER_EPSILON: f64 = 1e-6;

pub const DEFAULT_DIVISION: &str = "Q";

pub const DIVISIONS: [Division; 12] = [
    Division { name: "WT", multiplier: 1.0 / 6.0 },
    Division { name: "W", multiplier: 1.0 / 4.0 },
    Division { name: "HT", multiplier: 1.0 / 3.0 },
    Division { name: "H", multiplier: 1.0 / 2.0 },
    Division { name: "Q", multiplier: 1.0 },
    Division { name: "QT", multiplier: 1.5 },
    Division { name: "8", multiplier: 2.0 },
    Division { name: "8T", multiplier: 3.0 },
    Division { name: "16", multiplier: 4.0 },
    Division { name: "8Q", multiplier: 5.0 },
    Division { name: "16T", multiplier: 6.0 },
    Division { name: "32", multiplier: 8.0 },
];

pub fn by_name(name: &str) -> Option<&'static Division> {
    let name = name.trim();
    DIVISIONS
        .iter()
        .find(|division| division.name.eq_ignore_ascii_case(name))
}

/// Reverse lookup used to re-select the radio from a reported multiplier.
pub fn for_multiplier(multiplier: f64) -> Option<&'static Division> {
    DIVISIONS
        .iter()
        .find(|division| (division.multiplier - multiplier).abs() < MULTIPLIER_EPSILON)
}
