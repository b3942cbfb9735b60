use std::fmt;
use std::str::FromStr;

use crate::error::{AvgQError, Result};

/// A position or window extent in the engine's notation
///
/// The engine accepts either raw sample counts (`533`) or a time with unit
/// suffix (`12s`, `330ms`). Conversions to sample points need the sampling
/// frequency, which is only known to the caller or the engine.
///
/// # Examples
///
/// ```rust
/// use avgq::TimeSpec;
///
/// let t: TimeSpec = "330ms".parse()?;
/// assert_eq!(t, TimeSpec::Milliseconds(330.0));
/// assert_eq!(t.to_points(100.0), 33.0);
/// assert_eq!(t.to_string(), "330ms");
///
/// let p = TimeSpec::from(512);
/// assert_eq!(p.to_string(), "512");
/// # Ok::<(), avgq::AvgQError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeSpec {
    Points(f64),
    Seconds(f64),
    Milliseconds(f64),
}

impl TimeSpec {
    /// 转换为采样点
    pub fn to_points(&self, sfreq: f64) -> f64 {
        match *self {
            TimeSpec::Points(p) => p,
            TimeSpec::Seconds(s) => s * sfreq,
            TimeSpec::Milliseconds(ms) => ms / 1000.0 * sfreq,
        }
    }

    /// 转换为秒
    pub fn to_seconds(&self, sfreq: f64) -> f64 {
        match *self {
            TimeSpec::Points(p) => p / sfreq,
            TimeSpec::Seconds(s) => s,
            TimeSpec::Milliseconds(ms) => ms / 1000.0,
        }
    }

    /// 转换为毫秒
    pub fn to_milliseconds(&self, sfreq: f64) -> f64 {
        match *self {
            TimeSpec::Points(p) => p * 1000.0 / sfreq,
            TimeSpec::Seconds(s) => s * 1000.0,
            TimeSpec::Milliseconds(ms) => ms,
        }
    }

    /// Sample index for sources that need a plain point, `None` for time units
    pub fn as_points(&self) -> Option<f64> {
        match *self {
            TimeSpec::Points(p) => Some(p),
            _ => None,
        }
    }
}

impl Default for TimeSpec {
    fn default() -> Self {
        TimeSpec::Points(0.0)
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeSpec::Points(p) => write!(f, "{}", p),
            TimeSpec::Seconds(s) => write!(f, "{}s", s),
            TimeSpec::Milliseconds(ms) => write!(f, "{}ms", ms),
        }
    }
}

impl FromStr for TimeSpec {
    type Err = AvgQError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || AvgQError::InvalidTimeSpec(s.to_string());

        // "ms" 必须先于 "s" 检查
        if let Some(value) = s.strip_suffix("ms") {
            value.trim().parse().map(TimeSpec::Milliseconds).map_err(|_| invalid())
        } else if let Some(value) = s.strip_suffix('s') {
            value.trim().parse().map(TimeSpec::Seconds).map_err(|_| invalid())
        } else {
            s.parse().map(TimeSpec::Points).map_err(|_| invalid())
        }
    }
}

impl From<i32> for TimeSpec {
    fn from(points: i32) -> Self {
        TimeSpec::Points(points as f64)
    }
}

impl From<i64> for TimeSpec {
    fn from(points: i64) -> Self {
        TimeSpec::Points(points as f64)
    }
}

impl From<usize> for TimeSpec {
    fn from(points: usize) -> Self {
        TimeSpec::Points(points as f64)
    }
}

impl From<f64> for TimeSpec {
    fn from(points: f64) -> Self {
        TimeSpec::Points(points)
    }
}

/// One event record of a trigger stream
///
/// `position` is a sample index, possibly fractional after unit conversion.
/// Negative codes mark negative flanks or response events.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub position: f64,
    pub code: i32,
    pub description: Option<String>,
}

impl Trigger {
    pub fn new(position: f64, code: i32) -> Self {
        Trigger {
            position,
            code,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl From<(f64, i32)> for Trigger {
    fn from((position, code): (f64, i32)) -> Self {
        Trigger::new(position, code)
    }
}

impl From<(f64, i32, &str)> for Trigger {
    fn from((position, code, description): (f64, i32, &str)) -> Self {
        Trigger::new(position, code).with_description(description)
    }
}

/// A point to read an epoch around: bare position or full trigger record
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerPoint {
    Bare(TimeSpec),
    Full(Trigger),
}

impl TriggerPoint {
    /// 采样点位置（时间单位的裸位置返回 None）
    pub fn position_points(&self) -> Option<f64> {
        match self {
            TriggerPoint::Bare(spec) => spec.as_points(),
            TriggerPoint::Full(trigger) => Some(trigger.position),
        }
    }
}

impl From<TimeSpec> for TriggerPoint {
    fn from(spec: TimeSpec) -> Self {
        TriggerPoint::Bare(spec)
    }
}

impl From<i32> for TriggerPoint {
    fn from(point: i32) -> Self {
        TriggerPoint::Bare(point.into())
    }
}

impl From<i64> for TriggerPoint {
    fn from(point: i64) -> Self {
        TriggerPoint::Bare(point.into())
    }
}

impl From<f64> for TriggerPoint {
    fn from(point: f64) -> Self {
        TriggerPoint::Bare(point.into())
    }
}

impl From<Trigger> for TriggerPoint {
    fn from(trigger: Trigger) -> Self {
        TriggerPoint::Full(trigger)
    }
}

impl From<(f64, i32)> for TriggerPoint {
    fn from(tuple: (f64, i32)) -> Self {
        TriggerPoint::Full(tuple.into())
    }
}

impl From<(f64, i32, &str)> for TriggerPoint {
    fn from(tuple: (f64, i32, &str)) -> Self {
        TriggerPoint::Full(tuple.into())
    }
}

/// Declared type of an engine query variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Float,
    Int,
    Str,
    List,
}

/// Looks up the declared type of a query variable
///
/// Variables missing from the table are returned as strings.
pub fn value_type(name: &str) -> ValueType {
    match name {
        "sfreq" | "z_value" => ValueType::Float,
        "nr_of_points" | "nr_of_channels" | "itemsize" | "leaveright"
        | "length_of_output_region" | "beforetrig" | "aftertrig" | "points_in_file"
        | "nroffreq" | "nrofaverages" | "accepted_epochs" | "rejected_epochs"
        | "failed_assertions" | "condition" => ValueType::Int,
        "channelnames" | "xdata" => ValueType::List,
        _ => ValueType::Str,
    }
}

impl ValueType {
    /// Converts the raw text after `name=` into a typed value
    pub fn convert(&self, name: &str, raw: &str) -> Result<QueryValue> {
        let malformed = || AvgQError::MalformedResponse(format!("{}={}", name, raw));
        match self {
            ValueType::Float => raw.trim().parse().map(QueryValue::Float).map_err(|_| malformed()),
            ValueType::Int => raw.trim().parse().map(QueryValue::Int).map_err(|_| malformed()),
            ValueType::Str => Ok(QueryValue::Str(raw.to_string())),
            ValueType::List => Ok(QueryValue::List(vec![raw.to_string()])),
        }
    }
}

/// Typed result of one engine query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Float(f64),
    Int(i64),
    Str(String),
    List(Vec<String>),
}

impl QueryValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            QueryValue::Float(v) => Some(*v),
            QueryValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            QueryValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            QueryValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            QueryValue::List(items) => Some(items),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timespec_parse_and_display() {
        assert_eq!("12s".parse::<TimeSpec>().unwrap(), TimeSpec::Seconds(12.0));
        assert_eq!("330ms".parse::<TimeSpec>().unwrap(), TimeSpec::Milliseconds(330.0));
        assert_eq!("533".parse::<TimeSpec>().unwrap(), TimeSpec::Points(533.0));
        assert_eq!(TimeSpec::Seconds(1.5).to_string(), "1.5s");
        assert_eq!(TimeSpec::Points(50.0).to_string(), "50");
        assert!("abc".parse::<TimeSpec>().is_err());
        assert!("ms".parse::<TimeSpec>().is_err());
    }

    #[test]
    fn test_timespec_conversions() {
        let sfreq = 200.0;
        assert_eq!(TimeSpec::Seconds(2.0).to_points(sfreq), 400.0);
        assert_eq!(TimeSpec::Milliseconds(500.0).to_points(sfreq), 100.0);
        assert_eq!(TimeSpec::Points(100.0).to_seconds(sfreq), 0.5);
        assert_eq!(TimeSpec::Points(100.0).to_milliseconds(sfreq), 500.0);
        assert_eq!(TimeSpec::Seconds(0.25).to_milliseconds(sfreq), 250.0);
    }

    #[test]
    fn test_value_type_table() {
        assert_eq!(value_type("sfreq"), ValueType::Float);
        assert_eq!(value_type("nr_of_points"), ValueType::Int);
        assert_eq!(value_type("channelnames"), ValueType::List);
        assert_eq!(value_type("comment"), ValueType::Str);
        assert_eq!(value_type("something_new"), ValueType::Str);
    }

    #[test]
    fn test_value_conversion() {
        assert_eq!(
            ValueType::Int.convert("nr_of_points", "250").unwrap(),
            QueryValue::Int(250)
        );
        assert_eq!(
            ValueType::Float.convert("sfreq", "100.5").unwrap().as_f64(),
            Some(100.5)
        );
        assert!(ValueType::Int.convert("nr_of_points", "many").is_err());
    }
}
