use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr, time::Duration};

/// A duration in Go's `time.Duration` string format, e.g. `1m30s`.
///
/// Only non-negative durations are accepted.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct GoDuration(Duration);

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum ParseError {
    #[error("invalid unit {0:?}: {EXPECTED_UNITS}")]
    InvalidUnit(String),

    #[error("missing a unit: {EXPECTED_UNITS}")]
    NoUnit,

    #[error("durations must not be negative")]
    Negative,

    #[error("invalid number: {0}")]
    NotANumber(#[from] std::num::ParseFloatError),
}

const EXPECTED_UNITS: &str = "expected one of 'ns', 'us', '\u{00b5}s', 'ms', 's', 'm', or 'h'";

// === impl GoDuration ===

impl GoDuration {
    pub const fn from_duration(duration: Duration) -> Self {
        Self(duration)
    }

    pub const fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<Duration> for GoDuration {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl From<GoDuration> for Duration {
    fn from(GoDuration(duration): GoDuration) -> Self {
        duration
    }
}

impl fmt::Display for GoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.0.as_millis();
        if ms == 0 && !self.0.is_zero() {
            return write!(f, "{}ns", self.0.as_nanos());
        }
        if ms % 1000 != 0 {
            return write!(f, "{ms}ms");
        }
        let secs = self.0.as_secs();
        match (secs / 3600, secs % 3600 / 60, secs % 60) {
            (0, 0, s) => write!(f, "{s}s"),
            (0, m, 0) => write!(f, "{m}m"),
            (0, m, s) => write!(f, "{m}m{s}s"),
            (h, 0, 0) => write!(f, "{h}h"),
            (h, m, s) => write!(f, "{h}h{m}m{s}s"),
        }
    }
}

impl FromStr for GoDuration {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('-') {
            return Err(ParseError::Negative);
        }
        let mut rest = s.trim_start_matches('+');
        if rest == "0" {
            return Ok(Self::default());
        }
        if rest.is_empty() {
            return Err(ParseError::NoUnit);
        }

        let mut total = Duration::ZERO;
        while !rest.is_empty() {
            let unit_start = rest
                .find(|c: char| c.is_alphabetic())
                .ok_or(ParseError::NoUnit)?;
            let (value, tail) = rest.split_at(unit_start);
            let value = value.parse::<f64>()?;
            let unit_end = tail
                .find(|c: char| !c.is_alphabetic())
                .unwrap_or(tail.len());
            let (unit, tail) = tail.split_at(unit_end);
            total += unit_duration(unit)?.mul_f64(value);
            rest = tail;
        }
        Ok(Self(total))
    }
}

fn unit_duration(unit: &str) -> Result<Duration, ParseError> {
    match unit {
        "ns" => Ok(Duration::from_nanos(1)),
        // U+00B5 is the micro sign and U+03BC is the Greek letter mu.
        "us" | "\u{00b5}s" | "\u{03bc}s" => Ok(Duration::from_micros(1)),
        "ms" => Ok(Duration::from_millis(1)),
        "s" => Ok(Duration::from_secs(1)),
        "m" => Ok(Duration::from_secs(60)),
        "h" => Ok(Duration::from_secs(60 * 60)),
        unit => Err(ParseError::InvalidUnit(unit.to_string())),
    }
}

impl Serialize for GoDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GoDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;
        impl de::Visitor<'_> for Visitor {
            type Value = GoDuration;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a duration such as `10s` or `1m30s`")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<GoDuration, E> {
                value.parse().map_err(de::Error::custom)
            }
        }
        deserializer.deserialize_str(Visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0", Duration::ZERO)]
    #[case("+5s", Duration::from_secs(5))]
    #[case("10s", Duration::from_secs(10))]
    #[case("1.5s", Duration::from_millis(1500))]
    #[case(".5s", Duration::from_millis(500))]
    #[case("250ms", Duration::from_millis(250))]
    #[case("12\u{00b5}s", Duration::from_micros(12))]
    #[case("3h30m", Duration::from_secs(3 * 3600 + 30 * 60))]
    #[case("10.5s4m", Duration::from_millis(250_500))]
    fn parses_go_durations(#[case] input: &str, #[case] expected: Duration) {
        assert_eq!(input.parse::<GoDuration>(), Ok(expected.into()));
    }

    #[rstest]
    #[case("", ParseError::NoUnit)]
    #[case("10", ParseError::NoUnit)]
    #[case("-5s", ParseError::Negative)]
    #[case("5d", ParseError::InvalidUnit("d".to_string()))]
    fn rejects_invalid_durations(#[case] input: &str, #[case] expected: ParseError) {
        assert_eq!(input.parse::<GoDuration>(), Err(expected));
    }

    #[test]
    fn displays_in_parseable_form() {
        for d in [
            Duration::from_secs(10),
            Duration::from_secs(90),
            Duration::from_secs(2 * 3600),
            Duration::from_millis(1500),
            Duration::from_nanos(40),
        ] {
            let shown = GoDuration::from(d).to_string();
            assert_eq!(shown.parse::<GoDuration>(), Ok(d.into()), "{shown}");
        }
    }
}
