use serde::Serialize;

/// Day-over-day change in percent.
///
/// A zero baseline is special-cased: `0 -> 0` is no change and `0 -> x` is
/// reported as a full 100% increase.
pub fn percent_change(yesterday: f64, today: f64) -> f64 {
    if yesterday == 0.0 {
        if today == 0.0 {
            0.0
        } else {
            100.0
        }
    } else {
        (today - yesterday) / yesterday * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeDirection {
    Increase,
    Decrease,
    Unchanged,
}

impl ChangeDirection {
    pub fn from_percent(percent: f64) -> Self {
        if percent > 0.0 {
            ChangeDirection::Increase
        } else if percent < 0.0 {
            ChangeDirection::Decrease
        } else {
            ChangeDirection::Unchanged
        }
    }
}
