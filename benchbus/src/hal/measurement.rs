use chrono::{DateTime, Utc};

/// A single reading taken from an instrument
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TestMeasurement {
    /// what was measured, e.g. `DC_VOLTAGE`
    pub parameter: String,
    /// reading in `unit`
    pub value: f64,
    /// engineering unit
    pub unit: String,
    /// lowest acceptable value
    pub min_limit: Option<f64>,
    /// highest acceptable value
    pub max_limit: Option<f64>,
    /// when the reading was taken
    pub timestamp: DateTime<Utc>,
}

impl TestMeasurement {
    /// reading taken now, without limits
    pub fn new(parameter: &str, value: f64, unit: &str) -> Self {
        Self {
            parameter: parameter.to_string(),
            value,
            unit: unit.to_string(),
            min_limit: None,
            max_limit: None,
            timestamp: Utc::now(),
        }
    }

    /// attach limits, replacing any already present
    pub fn with_limits(self, min_limit: Option<f64>, max_limit: Option<f64>) -> Self {
        Self {
            min_limit,
            max_limit,
            ..self
        }
    }

    /// true unless the value falls below `min_limit` or above `max_limit`
    pub fn within_limits(&self) -> bool {
        if matches!(self.min_limit, Some(min) if self.value < min) {
            return false;
        }
        if matches!(self.max_limit, Some(max) if self.value > max) {
            return false;
        }
        true
    }
}

impl std::fmt::Display for TestMeasurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {} {}", self.parameter, self.value, self.unit)?;
        match (self.min_limit, self.max_limit) {
            (None, None) => Ok(()),
            (min, max) => write!(
                f,
                " [{}, {}]",
                min.map_or_else(|| "-inf".to_string(), |x| x.to_string()),
                max.map_or_else(|| "+inf".to_string(), |x| x.to_string())
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_limits_always_passes() {
        assert!(TestMeasurement::new("DC_VOLTAGE", -1e9, "V").within_limits());
    }

    #[test]
    fn limits_are_inclusive() {
        let m = TestMeasurement::new("DC_VOLTAGE", 3.3, "V");
        assert!(m.clone().with_limits(Some(3.3), Some(3.3)).within_limits());
        assert!(!m.clone().with_limits(Some(3.4), None).within_limits());
        assert!(!m.clone().with_limits(None, Some(3.2)).within_limits());
        assert!(m.with_limits(None, Some(5.0)).within_limits());
    }

    #[test]
    fn displays_limits() {
        let m = TestMeasurement::new("DC_CURRENT", 0.15, "A").with_limits(Some(0.1), None);
        assert_eq!(m.to_string(), "DC_CURRENT = 0.15 A [0.1, +inf]");
    }
}
