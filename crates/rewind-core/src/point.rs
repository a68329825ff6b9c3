use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A position in the recorded execution.
///
/// Points are decimal numeric strings of arbitrary width. They are ordered
/// numerically, so `"9" < "10"`. Leading zeros are dropped on construction so
/// that equality and ordering agree.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ExecutionPoint(String);

impl ExecutionPoint {
    pub fn new(point: impl Into<String>) -> Self {
        let raw: String = point.into();
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return ExecutionPoint(raw);
        }
        let digits = raw.trim_start_matches('0');
        if digits.len() == raw.len() {
            ExecutionPoint(raw)
        } else if digits.is_empty() {
            ExecutionPoint("0".to_string())
        } else {
            ExecutionPoint(digits.to_string())
        }
    }

    /// The point at the very start of the recording.
    pub fn zero() -> Self {
        ExecutionPoint("0".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_numeric(&self) -> bool {
        !self.0.is_empty() && self.0.bytes().all(|b| b.is_ascii_digit())
    }
}

impl Default for ExecutionPoint {
    fn default() -> Self {
        Self::zero()
    }
}

impl Ord for ExecutionPoint {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_numeric(), other.is_numeric()) {
            (true, true) => self
                .0
                .len()
                .cmp(&other.0.len())
                .then_with(|| self.0.cmp(&other.0)),
            // Non-numeric points sort after every numeric one.
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for ExecutionPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ExecutionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ExecutionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExecutionPoint({})", self.0)
    }
}

impl From<&str> for ExecutionPoint {
    fn from(s: &str) -> Self {
        ExecutionPoint::new(s)
    }
}

impl From<String> for ExecutionPoint {
    fn from(s: String) -> Self {
        ExecutionPoint::new(s)
    }
}

impl From<u64> for ExecutionPoint {
    fn from(n: u64) -> Self {
        ExecutionPoint(n.to_string())
    }
}

impl Serialize for ExecutionPoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ExecutionPoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(ExecutionPoint::new(s))
    }
}

/// Whether `a` comes strictly before `b` in the recording.
pub fn point_precedes(a: &ExecutionPoint, b: &ExecutionPoint) -> bool {
    a < b
}

/// The first point in `points` strictly after `point`, given sorted input.
pub fn next_point<'a>(points: &'a [ExecutionPoint], point: &ExecutionPoint) -> Option<&'a ExecutionPoint> {
    let idx = points.partition_point(|p| p <= point);
    points.get(idx)
}

/// The last point in `points` strictly before `point`, given sorted input.
pub fn previous_point<'a>(
    points: &'a [ExecutionPoint],
    point: &ExecutionPoint,
) -> Option<&'a ExecutionPoint> {
    let idx = points.partition_point(|p| p < point);
    idx.checked_sub(1).and_then(|i| points.get(i))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_order() {
        let nine = ExecutionPoint::new("9");
        let ten = ExecutionPoint::new("10");
        assert!(nine < ten);
        assert!(point_precedes(&nine, &ten));
        assert!(!point_precedes(&ten, &nine));
    }

    #[test]
    fn test_wide_points() {
        let a = ExecutionPoint::new("1298074214633706907132624082305024");
        let b = ExecutionPoint::new("1298074214633706907132624082305025");
        let c = ExecutionPoint::new("999999999999999999999999999999999");
        assert!(a < b);
        assert!(c < a);
    }

    #[test]
    fn test_leading_zeros_normalized() {
        assert_eq!(ExecutionPoint::new("0007"), ExecutionPoint::new("7"));
        assert_eq!(ExecutionPoint::new("000"), ExecutionPoint::zero());
        assert_eq!(ExecutionPoint::new("0007").as_str(), "7");
    }

    #[test]
    fn test_next_and_previous() {
        let points: Vec<ExecutionPoint> = [1u64, 5, 20, 100].into_iter().map(Into::into).collect();
        let at = ExecutionPoint::new("5");
        assert_eq!(next_point(&points, &at), Some(&ExecutionPoint::new("20")));
        assert_eq!(previous_point(&points, &at), Some(&ExecutionPoint::new("1")));
        assert_eq!(next_point(&points, &ExecutionPoint::new("100")), None);
        assert_eq!(previous_point(&points, &ExecutionPoint::new("1")), None);
        assert_eq!(
            next_point(&points, &ExecutionPoint::new("6")),
            Some(&ExecutionPoint::new("20"))
        );
    }

    #[test]
    fn test_serde_round_trip_normalizes() {
        let point: ExecutionPoint = serde_json::from_str("\"042\"").unwrap();
        assert_eq!(point.as_str(), "42");
        assert_eq!(serde_json::to_string(&point).unwrap(), "\"42\"");
    }
}
