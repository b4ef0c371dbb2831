//! Extended JSON value shapes used by server topology documents
//!
//! Documents handed to the classifier are the relaxed (or canonical) extended
//! JSON rendering of the server's BSON reply. Only the BSON types that appear
//! in `isMaster` and `replSetGetStatus` replies are modelled here.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// BSON timestamp: seconds since the epoch plus an ordinal within that second
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "TimestampRepr", into = "ExtendedTimestamp")]
pub struct Timestamp {
    pub t: u32,
    pub i: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct TimestampParts {
    t: u32,
    i: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct ExtendedTimestamp {
    #[serde(rename = "$timestamp")]
    inner: TimestampParts,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TimestampRepr {
    Extended(ExtendedTimestamp),
    Plain(TimestampParts),
}

impl From<TimestampRepr> for Timestamp {
    fn from(repr: TimestampRepr) -> Self {
        let parts = match repr {
            TimestampRepr::Extended(ext) => ext.inner,
            TimestampRepr::Plain(parts) => parts,
        };
        Timestamp::new(parts.t, parts.i)
    }
}

impl From<Timestamp> for ExtendedTimestamp {
    fn from(ts: Timestamp) -> Self {
        ExtendedTimestamp {
            inner: TimestampParts { t: ts.t, i: ts.i },
        }
    }
}

impl Timestamp {
    pub fn new(t: u32, i: u32) -> Self {
        Self { t, i }
    }

    /// Zero timestamps are what the server reports before any write was applied
    pub fn is_zero(&self) -> bool {
        self.t == 0 && self.i == 0
    }

    /// Wall-clock second this timestamp was issued in
    pub fn to_datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(i64::from(self.t), 0)
            .single()
            .unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}, {})", self.t, self.i)
    }
}

/// BSON binary payload, kept in its base64 form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BinaryRepr", into = "ExtendedBinary")]
pub struct Binary {
    pub base64: String,
    pub sub_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BinaryParts {
    base64: String,
    #[serde(rename = "subType")]
    sub_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExtendedBinary {
    #[serde(rename = "$binary")]
    inner: BinaryParts,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BinaryRepr {
    Extended(ExtendedBinary),
    Legacy {
        #[serde(rename = "$binary")]
        base64: String,
        #[serde(rename = "$type")]
        sub_type: String,
    },
}

impl From<BinaryRepr> for Binary {
    fn from(repr: BinaryRepr) -> Self {
        match repr {
            BinaryRepr::Extended(ext) => Binary {
                base64: ext.inner.base64,
                sub_type: ext.inner.sub_type,
            },
            BinaryRepr::Legacy { base64, sub_type } => Binary { base64, sub_type },
        }
    }
}

impl From<Binary> for ExtendedBinary {
    fn from(bin: Binary) -> Self {
        ExtendedBinary {
            inner: BinaryParts {
                base64: bin.base64,
                sub_type: bin.sub_type,
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DateValue {
    Iso(DateTime<Utc>),
    Millis(i64),
    NumberLong {
        #[serde(rename = "$numberLong")]
        millis: String,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DateRepr {
    Extended {
        #[serde(rename = "$date")]
        date: DateValue,
    },
    Iso(DateTime<Utc>),
}

#[derive(Serialize)]
struct ExtendedDate {
    #[serde(rename = "$date")]
    date: String,
}

impl DateRepr {
    fn into_datetime(self) -> Result<DateTime<Utc>, String> {
        let millis = match self {
            DateRepr::Iso(dt) | DateRepr::Extended { date: DateValue::Iso(dt) } => return Ok(dt),
            DateRepr::Extended { date: DateValue::Millis(ms) } => ms,
            DateRepr::Extended { date: DateValue::NumberLong { millis } } => millis
                .parse::<i64>()
                .map_err(|e| format!("invalid $numberLong date {:?}: {}", millis, e))?,
        };
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| format!("date out of range: {}ms", millis))
    }
}

/// `with` adapter for optional `$date` fields
pub(crate) mod date {
    use super::*;
    use serde::de::Error as _;

    pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => ExtendedDate {
                date: dt.to_rfc3339_opts(SecondsFormat::Millis, true),
            }
            .serialize(s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<DateRepr>::deserialize(d)?
            .map(DateRepr::into_datetime)
            .transpose()
            .map_err(D::Error::custom)
    }
}

/// Any number form extended JSON produces: plain JSON numbers (relaxed) or
/// the `$numberInt` / `$numberLong` / `$numberDouble` wrappers (canonical)
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberRepr {
    Int(i64),
    Float(f64),
    Int32 {
        #[serde(rename = "$numberInt")]
        value: String,
    },
    Long {
        #[serde(rename = "$numberLong")]
        value: String,
    },
    Double {
        #[serde(rename = "$numberDouble")]
        value: String,
    },
}

impl NumberRepr {
    fn into_i64(self) -> Result<i64, String> {
        match self {
            NumberRepr::Int(v) => Ok(v),
            NumberRepr::Float(f) => float_to_i64(f),
            NumberRepr::Int32 { value } | NumberRepr::Long { value } => value
                .parse::<i64>()
                .map_err(|e| format!("invalid integer {:?}: {}", value, e)),
            NumberRepr::Double { value } => float_to_i64(parse_double(&value)?),
        }
    }

    fn into_i32(self) -> Result<i32, String> {
        let v = self.into_i64()?;
        i32::try_from(v).map_err(|_| format!("integer {} out of 32-bit range", v))
    }

    fn into_f64(self) -> Result<f64, String> {
        match self {
            NumberRepr::Int(v) => Ok(v as f64),
            NumberRepr::Float(f) => Ok(f),
            NumberRepr::Int32 { value } | NumberRepr::Long { value } => value
                .parse::<i64>()
                .map(|v| v as f64)
                .map_err(|e| format!("invalid integer {:?}: {}", value, e)),
            NumberRepr::Double { value } => parse_double(&value),
        }
    }
}

fn float_to_i64(f: f64) -> Result<i64, String> {
    if f.fract() != 0.0 || f < i64::MIN as f64 || f > i64::MAX as f64 {
        return Err(format!("{} is not an integer", f));
    }
    Ok(f as i64)
}

/// `$numberDouble` also spells the non-finite values `Infinity`, `-Infinity`, `NaN`
fn parse_double(value: &str) -> Result<f64, String> {
    value
        .parse::<f64>()
        .map_err(|e| format!("invalid double {:?}: {}", value, e))
}

/// 32-bit integer in relaxed or canonical form
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Int32(pub i32);

impl<'de> Deserialize<'de> for Int32 {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;
        NumberRepr::deserialize(d)?
            .into_i32()
            .map(Int32)
            .map_err(D::Error::custom)
    }
}

/// Double in relaxed or canonical form
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Double(pub f64);

impl<'de> Deserialize<'de> for Double {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;
        NumberRepr::deserialize(d)?
            .into_f64()
            .map(Double)
            .map_err(D::Error::custom)
    }
}

/// `with` adapter for integers that canonical extended JSON wraps as
/// `{"$numberLong": "..."}`
pub(crate) mod int64 {
    use super::*;
    use serde::de::Error as _;

    pub fn serialize<S: Serializer>(value: &i64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(*value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        NumberRepr::deserialize(d)?.into_i64().map_err(D::Error::custom)
    }
}

pub(crate) mod int32 {
    use super::*;

    pub fn serialize<S: Serializer>(value: &i32, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i32(*value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i32, D::Error> {
        Int32::deserialize(d).map(|v| v.0)
    }
}

/// Optional `int32`, null or absent meaning `None`
pub(crate) mod opt_int32 {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<i32>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => s.serialize_i32(*v),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i32>, D::Error> {
        Ok(Option::<Int32>::deserialize(d)?.map(|v| v.0))
    }
}

pub(crate) mod double {
    use super::*;

    pub fn serialize<S: Serializer>(value: &f64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(*value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Double::deserialize(d).map(|v| v.0)
    }
}
