//! The SQL value sum type
//!
//! [`Value`] is a tagged union over the SQL types the engine stores:
//! numerics, strings, booleans, date/time, intervals, binary, large-object
//! references, and (transiently) query plans for view definitions.
//!
//! Arithmetic and comparison dispatch on the tag. A type mismatch yields
//! `Null` rather than an error; the two exceptions are division by zero
//! and numeric overflow, which are real errors. Strings carry an optional
//! collation on their *column type*; comparison helpers accept it
//! explicitly so the value itself stays a plain tag.

use crate::error::{Error, Result};
use crate::traits::QueryPlanNode;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Collation strength, loosely following the UCA levels.
///
/// The engine implements two effective behaviors: `Primary`/`Secondary`
/// compare case-folded, `Tertiary`/`Identical` compare binary. Locale and
/// decomposition are carried for the front end but do not change the
/// in-core ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollationStrength {
    /// Base letters only (case-insensitive here)
    Primary,
    /// Base letters + accents (case-insensitive here)
    Secondary,
    /// Case-significant
    Tertiary,
    /// Bit-for-bit
    Identical,
}

/// Normalization decomposition applied before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Decomposition {
    /// No decomposition
    #[default]
    None,
    /// Canonical decomposition
    Canonical,
    /// Full decomposition
    Full,
}

/// String collation: `(locale, strength, decomposition)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collation {
    /// BCP-47-ish locale tag, `None` for the binary collation
    pub locale: Option<String>,
    /// Comparison strength
    pub strength: CollationStrength,
    /// Decomposition mode
    pub decomposition: Decomposition,
}

impl Collation {
    /// Case-insensitive collation with no locale.
    pub fn case_insensitive() -> Self {
        Collation {
            locale: None,
            strength: CollationStrength::Primary,
            decomposition: Decomposition::None,
        }
    }

    /// Whether this collation folds letter case.
    pub fn folds_case(&self) -> bool {
        matches!(
            self.strength,
            CollationStrength::Primary | CollationStrength::Secondary
        )
    }

    /// Compare two strings under this collation.
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        if self.folds_case() {
            a.to_lowercase().cmp(&b.to_lowercase())
        } else {
            a.cmp(b)
        }
    }
}

/// Reference to a large object stored out-of-line in the paged store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LobRef {
    /// Area holding the object bytes
    pub area: u64,
    /// Object size in bytes
    pub size: u64,
}

/// A SQL interval: year-month and day-time components kept separately, as
/// the two do not mix under a fixed calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Interval {
    /// Year-month component, in months
    pub months: i32,
    /// Day-time component, whole seconds
    pub secs: i64,
    /// Day-time component, sub-second nanoseconds
    pub nanos: i32,
}

impl Interval {
    /// Interval of whole days.
    pub fn days(days: i64) -> Self {
        Interval {
            months: 0,
            secs: days * 86_400,
            nanos: 0,
        }
    }

    /// Interval of whole months.
    pub fn months(months: i32) -> Self {
        Interval {
            months,
            secs: 0,
            nanos: 0,
        }
    }
}

/// SQL column type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlType {
    /// TRUE/FALSE
    Boolean,
    /// 64-bit signed integer
    Integer,
    /// 64-bit IEEE float
    Float,
    /// Character string with optional length limit and collation
    VarChar {
        /// Maximum length in characters, unlimited if `None`
        size: Option<u32>,
        /// Collation for comparison and uniqueness
        collation: Option<Collation>,
    },
    /// Calendar date
    Date,
    /// Time of day
    Time,
    /// Date + time of day
    Timestamp,
    /// Year-month / day-time interval
    Interval,
    /// Byte string with optional length limit
    Binary {
        /// Maximum length in bytes, unlimited if `None`
        size: Option<u32>,
    },
    /// Large object reference
    Lob,
}

impl SqlType {
    /// Unbounded string type with the binary collation.
    pub fn varchar() -> Self {
        SqlType::VarChar {
            size: None,
            collation: None,
        }
    }

    /// Collation attached to this type, if it is a string type.
    pub fn collation(&self) -> Option<&Collation> {
        match self {
            SqlType::VarChar { collation, .. } => collation.as_ref(),
            _ => None,
        }
    }

    /// Whether `value` is storable in a column of this type. `Null` is
    /// accepted by every type; nullability is a column property.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (SqlType::Boolean, Value::Boolean(_))
                | (SqlType::Integer, Value::Integer(_))
                | (SqlType::Float, Value::Float(_))
                | (SqlType::Float, Value::Integer(_))
                | (SqlType::VarChar { .. }, Value::String(_))
                | (SqlType::Date, Value::Date(_))
                | (SqlType::Time, Value::Time(_))
                | (SqlType::Timestamp, Value::Timestamp(_))
                | (SqlType::Interval, Value::Interval(_))
                | (SqlType::Binary { .. }, Value::Binary(_))
                | (SqlType::Lob, Value::Lob(_))
        )
    }
}

/// Transient query-plan value.
///
/// Views and sub-query results flow through the value system as opaque
/// plans. Plans never reach the persistent row pool: serializing one is a
/// serialization error, and comparing one is a type mismatch.
#[derive(Clone)]
pub struct PlanValue(pub Arc<dyn QueryPlanNode>);

impl fmt::Debug for PlanValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<query plan>")
    }
}

/// A SQL value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// TRUE/FALSE
    Boolean(bool),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit IEEE float
    Float(f64),
    /// Character string
    String(String),
    /// Calendar date
    Date(NaiveDate),
    /// Time of day
    Time(NaiveTime),
    /// Date + time of day
    Timestamp(NaiveDateTime),
    /// Interval
    Interval(Interval),
    /// Byte string
    Binary(Vec<u8>),
    /// Large object reference
    Lob(LobRef),
    /// Transient query plan (views, sub-queries); not serializable
    #[serde(skip)]
    Plan(PlanValue),
}

impl Value {
    /// SQL NULL check.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Human-readable tag name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Boolean(_) => "BOOLEAN",
            Value::Integer(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::String(_) => "VARCHAR",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Interval(_) => "INTERVAL",
            Value::Binary(_) => "BINARY",
            Value::Lob(_) => "LOB",
            Value::Plan(_) => "PLAN",
        }
    }

    /// SQL comparison under three-valued logic.
    ///
    /// Returns `None` when either side is `Null` or the tags are not
    /// comparable; integers and floats compare numerically across tags,
    /// strings compare under `collation` (binary when absent).
    pub fn sql_compare(&self, other: &Value, collation: Option<&Collation>) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Null, _) | (_, Null) => None,
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            (Integer(a), Integer(b)) => Some(a.cmp(b)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Integer(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Integer(b)) => a.partial_cmp(&(*b as f64)),
            (String(a), String(b)) => Some(match collation {
                Some(c) => c.compare(a, b),
                None => a.cmp(b),
            }),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (Time(a), Time(b)) => Some(a.cmp(b)),
            (Timestamp(a), Timestamp(b)) => Some(a.cmp(b)),
            (Interval(a), Interval(b)) => {
                Some((a.months, a.secs, a.nanos).cmp(&(b.months, b.secs, b.nanos)))
            }
            (Binary(a), Binary(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total canonical ordering for index keys.
    ///
    /// Unlike [`sql_compare`](Value::sql_compare) this never fails: values
    /// order by tag rank first (`Null` lowest), then within the tag.
    /// Columns are homogeneously typed, so cross-tag ranking only decides
    /// the order of degenerate mixed keys.
    pub fn index_cmp(&self, other: &Value) -> Ordering {
        use Value::*;
        fn rank(v: &Value) -> u8 {
            match v {
                Null => 0,
                Boolean(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
                Date(_) => 5,
                Time(_) => 6,
                Timestamp(_) => 7,
                Interval(_) => 8,
                Binary(_) => 9,
                Lob(_) => 10,
                Plan(_) => 11,
            }
        }
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Time(a), Time(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (Interval(a), Interval(b)) => (a.months, a.secs, a.nanos).cmp(&(b.months, b.secs, b.nanos)),
            (Binary(a), Binary(b)) => a.cmp(b),
            (Lob(a), Lob(b)) => a.cmp(b),
            (Plan(_), Plan(_)) => Ordering::Equal,
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }

    /// Fold this value into the form used as an index key under a column
    /// collation: case-folding strings for case-insensitive collations,
    /// everything else unchanged.
    pub fn collation_key(&self, collation: Option<&Collation>) -> Value {
        match (self, collation) {
            (Value::String(s), Some(c)) if c.folds_case() => Value::String(s.to_lowercase()),
            _ => self.clone(),
        }
    }

    /// Addition. `Null` on type mismatch or null input.
    pub fn add(&self, other: &Value) -> Result<Value> {
        use Value::*;
        Ok(match (self, other) {
            (Null, _) | (_, Null) => Null,
            (Integer(a), Integer(b)) => {
                Integer(a.checked_add(*b).ok_or(Error::NumericOverflow)?)
            }
            (Float(a), Float(b)) => Float(a + b),
            (Integer(a), Float(b)) => Float(*a as f64 + b),
            (Float(a), Integer(b)) => Float(a + *b as f64),
            (String(a), String(b)) => String(format!("{a}{b}")),
            (Interval(a), Interval(b)) => Interval(crate::value::Interval {
                months: a.months + b.months,
                secs: a.secs + b.secs,
                nanos: a.nanos + b.nanos,
            }),
            (Date(d), Interval(iv)) => Date(shift_date(*d, iv, 1)),
            (Timestamp(ts), Interval(iv)) => Timestamp(shift_timestamp(*ts, iv, 1)),
            _ => Null,
        })
    }

    /// Subtraction. `Null` on type mismatch or null input.
    pub fn sub(&self, other: &Value) -> Result<Value> {
        use Value::*;
        Ok(match (self, other) {
            (Null, _) | (_, Null) => Null,
            (Integer(a), Integer(b)) => {
                Integer(a.checked_sub(*b).ok_or(Error::NumericOverflow)?)
            }
            (Float(a), Float(b)) => Float(a - b),
            (Integer(a), Float(b)) => Float(*a as f64 - b),
            (Float(a), Integer(b)) => Float(a - *b as f64),
            (Interval(a), Interval(b)) => Interval(crate::value::Interval {
                months: a.months - b.months,
                secs: a.secs - b.secs,
                nanos: a.nanos - b.nanos,
            }),
            (Date(d), Interval(iv)) => Date(shift_date(*d, iv, -1)),
            (Timestamp(ts), Interval(iv)) => Timestamp(shift_timestamp(*ts, iv, -1)),
            _ => Null,
        })
    }

    /// Multiplication. `Null` on type mismatch or null input.
    pub fn mul(&self, other: &Value) -> Result<Value> {
        use Value::*;
        Ok(match (self, other) {
            (Null, _) | (_, Null) => Null,
            (Integer(a), Integer(b)) => {
                Integer(a.checked_mul(*b).ok_or(Error::NumericOverflow)?)
            }
            (Float(a), Float(b)) => Float(a * b),
            (Integer(a), Float(b)) => Float(*a as f64 * b),
            (Float(a), Integer(b)) => Float(a * *b as f64),
            _ => Null,
        })
    }

    /// Division. Division by zero is an error, not `Null`.
    pub fn div(&self, other: &Value) -> Result<Value> {
        use Value::*;
        if self.is_null() || other.is_null() {
            return Ok(Null);
        }
        let numeric_divisor = matches!(other, Integer(_) | Float(_));
        if numeric_divisor && float_of(other) == 0.0 {
            return Err(Error::DivisionByZero);
        }
        Ok(match (self, other) {
            (Integer(a), Integer(b)) => {
                Integer(a.checked_div(*b).ok_or(Error::NumericOverflow)?)
            }
            (Float(a), Float(b)) => Float(a / b),
            (Integer(a), Float(b)) => Float(*a as f64 / b),
            (Float(a), Integer(b)) => Float(a / *b as f64),
            _ => Null,
        })
    }

    /// Arithmetic negation. `Null` on non-numeric input.
    pub fn neg(&self) -> Result<Value> {
        use Value::*;
        Ok(match self {
            Null => Null,
            Integer(a) => Integer(a.checked_neg().ok_or(Error::NumericOverflow)?),
            Float(a) => Float(-a),
            _ => Null,
        })
    }
}

fn float_of(v: &Value) -> f64 {
    match v {
        Value::Integer(i) => *i as f64,
        Value::Float(f) => *f,
        _ => f64::NAN,
    }
}

fn shift_date(d: NaiveDate, iv: &Interval, sign: i64) -> NaiveDate {
    // chrono::Months is unsigned; handle the sign explicitly.
    let months = iv.months as i64 * sign;
    let with_months = if months >= 0 {
        d + chrono::Months::new(months as u32)
    } else {
        d - chrono::Months::new((-months) as u32)
    };
    with_months + chrono::Duration::seconds(iv.secs * sign)
}

fn shift_timestamp(ts: NaiveDateTime, iv: &Interval, sign: i64) -> NaiveDateTime {
    let months = iv.months as i64 * sign;
    let shifted = if months >= 0 {
        ts + chrono::Months::new(months as u32)
    } else {
        ts - chrono::Months::new((-months) as u32)
    };
    shifted
        + chrono::Duration::seconds(iv.secs * sign)
        + chrono::Duration::nanoseconds(iv.nanos as i64 * sign)
}

impl PartialEq for Value {
    /// Structural equality (distinct from SQL equality): `Null == Null`
    /// holds, plan values never compare equal.
    fn eq(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Plan(_), _) | (_, Plan(_)) => false,
            (Null, Null) => true,
            (a, b) if std::mem::discriminant(a) == std::mem::discriminant(b) => {
                a.index_cmp(b) == Ordering::Equal
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "'{s}'"),
            Value::Date(d) => write!(f, "{d}"),
            Value::Time(t) => write!(f, "{t}"),
            Value::Timestamp(ts) => write!(f, "{ts}"),
            Value::Interval(iv) => {
                write!(f, "INTERVAL {} months {} secs", iv.months, iv.secs)
            }
            Value::Binary(b) => write!(f, "x'{}'", b.len()),
            Value::Lob(l) => write!(f, "<lob {} bytes>", l.size),
            Value::Plan(_) => f.write_str("<query plan>"),
        }
    }
}
