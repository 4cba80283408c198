//! Time expression resolution
//!
//! Queries coming from text surfaces carry times as strings. A [`TimeResolver`]
//! turns them into epoch seconds before they reach the addressing resolver.
//!
//! Accepted by [`DefaultTimeResolver`]:
//! - plain numbers: `1700000000`, `1.5e9`, `-5`
//! - `now`, optionally followed by offsets: `now-7d`, `now - 1h + 30m`
//! - bare signed offsets relative to now: `-1h`, `+2w`
//! - RFC 3339 datetimes and `YYYY-MM-DD` dates (midnight UTC)

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::now_seconds;
use chrono::{DateTime, NaiveDate};
use nom::{
    branch::alt,
    bytes::complete::tag_no_case,
    character::complete::{char, multispace0},
    combinator::{all_consuming, map, opt, value},
    multi::many0,
    number::complete::double,
    sequence::{delimited, pair, preceded},
    IResult,
};

/// Converts a time expression into fractional Unix seconds
pub trait TimeResolver: Send + Sync {
    fn resolve(&self, expr: &str) -> StorageResult<f64>;
}

/// Resolver for numbers, relative expressions and calendar datetimes
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTimeResolver {
    fixed_now: Option<f64>,
}

impl DefaultTimeResolver {
    /// Resolve relative expressions against the wall clock
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative expressions against a fixed instant
    pub fn at(now: f64) -> Self {
        Self {
            fixed_now: Some(now),
        }
    }

    fn now(&self) -> f64 {
        self.fixed_now.unwrap_or_else(now_seconds)
    }
}

impl TimeResolver for DefaultTimeResolver {
    fn resolve(&self, expr: &str) -> StorageResult<f64> {
        let expr = expr.trim();

        if let Ok(t) = expr.parse::<f64>() {
            if t.is_finite() {
                return Ok(t);
            }
        }

        if let Ok((_, (has_now, offsets))) = relative(expr) {
            if has_now || !offsets.is_empty() {
                let t = self.now() + offsets.iter().sum::<f64>();
                if !t.is_finite() {
                    return Err(StorageError::Validation(format!(
                        "time expression {:?} is out of range",
                        expr
                    )));
                }
                return Ok(t);
            }
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(expr) {
            return Ok(dt.timestamp_micros() as f64 / 1_000_000.0);
        }

        if let Ok(date) = NaiveDate::parse_from_str(expr, "%Y-%m-%d") {
            if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                return Ok(midnight.and_utc().timestamp() as f64);
            }
        }

        Err(StorageError::Validation(format!(
            "unrecognized time expression '{}'",
            expr
        )))
    }
}

fn unit(input: &str) -> IResult<&str, f64> {
    alt((
        value(1.0, char('s')),
        value(60.0, char('m')),
        value(3_600.0, char('h')),
        value(86_400.0, char('d')),
        value(604_800.0, char('w')),
    ))(input)
}

/// `+30m`, `- 7d`, `-15` (seconds when no unit is given)
fn offset(input: &str) -> IResult<&str, f64> {
    let (input, sign) = alt((value(1.0, char('+')), value(-1.0, char('-'))))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, amount) = double(input)?;
    let (input, scale) = opt(unit)(input)?;
    Ok((input, sign * amount * scale.unwrap_or(1.0)))
}

fn relative(input: &str) -> IResult<&str, (bool, Vec<f64>)> {
    all_consuming(delimited(
        multispace0,
        pair(
            map(opt(tag_no_case("now")), |now| now.is_some()),
            many0(preceded(multispace0, offset)),
        ),
        multispace0,
    ))(input)
}
