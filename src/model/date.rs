//! Calendar date specs indexed by the time tree.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::schema::labels;
use crate::{Error, Result};

/// Depth of a date spec in the Year → Month → Day tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Granularity {
    Year,
    Month,
    Day,
}

impl Granularity {
    /// Label of the time-tree node at this depth.
    pub fn label(self) -> &'static str {
        match self {
            Granularity::Year => labels::YEAR,
            Granularity::Month => labels::MONTH,
            Granularity::Day => labels::DAY,
        }
    }
}

/// `year`, `month/year` or `day/month/year`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpec {
    pub year: i32,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl DateSpec {
    pub fn year(year: i32) -> Self {
        Self { year, month: None, day: None }
    }

    pub fn month(month: u32, year: i32) -> Result<Self> {
        let spec = Self { year, month: Some(month), day: None };
        spec.check()?;
        Ok(spec)
    }

    pub fn day(day: u32, month: u32, year: i32) -> Result<Self> {
        let spec = Self { year, month: Some(month), day: Some(day) };
        spec.check()?;
        Ok(spec)
    }

    pub fn granularity(&self) -> Granularity {
        match (self.month, self.day) {
            (Some(_), Some(_)) => Granularity::Day,
            (Some(_), None) => Granularity::Month,
            _ => Granularity::Year,
        }
    }

    fn check(&self) -> Result<()> {
        match (self.month, self.day) {
            (None, Some(_)) => Err(Error::BadRequest(format!("day without month in {self}"))),
            (Some(m), None) if !(1..=12).contains(&m) => {
                Err(Error::BadRequest(format!("month out of range in {self}")))
            }
            (Some(m), Some(d)) if NaiveDate::from_ymd_opt(self.year, m, d).is_none() => {
                Err(Error::BadRequest(format!("no such calendar day: {self}")))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for DateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.day, self.month) {
            (Some(d), Some(m)) => write!(f, "{d}/{m}/{}", self.year),
            (None, Some(m)) => write!(f, "{m}/{}", self.year),
            _ => write!(f, "{}", self.year),
        }
    }
}

impl FromStr for DateSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        let num = |part: &str| -> Result<u32> {
            part.trim()
                .parse::<u32>()
                .map_err(|_| Error::BadRequest(format!("malformed date component '{part}' in '{s}'")))
        };
        let year = |part: &str| -> Result<i32> {
            part.trim()
                .parse::<i32>()
                .map_err(|_| Error::BadRequest(format!("malformed year '{part}' in '{s}'")))
        };
        match parts.as_slice() {
            [y] => Ok(DateSpec::year(year(y)?)),
            [m, y] => DateSpec::month(num(m)?, year(y)?),
            [d, m, y] => DateSpec::day(num(d)?, num(m)?, year(y)?),
            _ => Err(Error::BadRequest(format!("date spec '{s}' has too many components"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_granularities() {
        assert_eq!("2001".parse::<DateSpec>().unwrap(), DateSpec::year(2001));
        let month: DateSpec = "03/2001".parse().unwrap();
        assert_eq!(month.month, Some(3));
        assert_eq!(month.granularity(), Granularity::Month);
        let day: DateSpec = "12/3/2001".parse().unwrap();
        assert_eq!(day.granularity(), Granularity::Day);
        assert_eq!(day.granularity().label(), "Day");
        assert_eq!(day.to_string(), "12/3/2001");
    }

    #[test]
    fn test_rejects_impossible_dates() {
        assert!("13/2001".parse::<DateSpec>().is_err());
        assert!("30/2/2001".parse::<DateSpec>().is_err());
        assert!("1/1/1/2001".parse::<DateSpec>().is_err());
        assert!("x/2001".parse::<DateSpec>().is_err());
        assert!("".parse::<DateSpec>().is_err());
    }

    #[test]
    fn test_leap_day() {
        assert!("29/2/2000".parse::<DateSpec>().is_ok());
        assert!("29/2/2001".parse::<DateSpec>().is_err());
    }
}
