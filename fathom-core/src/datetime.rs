//! Broken-down time, ISO-8601 parsing and the accuracy time units.

use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

/// Broken-down UTC time used by the accuracy term generator.
///
/// Fields that an accuracy bucket zeroes out are set directly; the
/// struct converts back to an epoch timestamp on demand.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tm {
    pub year: i32,
    pub mon: u32,
    pub day: u32,
    pub hour: u32,
    pub min: u32,
    pub sec: u32,
    pub fsec: f64,
}

impl Tm {
    /// January 1st of `year`, midnight
    pub fn from_year(year: i32) -> Self {
        Tm {
            year,
            mon: 1,
            day: 1,
            hour: 0,
            min: 0,
            sec: 0,
            fsec: 0.0,
        }
    }

    /// Epoch seconds (UTC), including the fractional part
    pub fn timestamp(&self) -> f64 {
        let date = NaiveDate::from_ymd_opt(self.year, self.mon, self.day)
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(self.year, 1, 1).unwrap());
        let time = NaiveTime::from_hms_opt(self.hour, self.min, self.sec)
            .unwrap_or_else(|| NaiveTime::from_hms_opt(0, 0, 0).unwrap());
        let dt = Utc.from_utc_datetime(&NaiveDateTime::new(date, time));
        dt.timestamp() as f64 + self.fsec
    }

    /// Broken-down form of an epoch timestamp
    pub fn from_timestamp(ts: f64) -> Self {
        let secs = ts.floor() as i64;
        let fsec = ts - secs as f64;
        let dt = DateTime::<Utc>::from_timestamp(secs, 0)
            .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap());
        Tm {
            year: dt.year(),
            mon: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
            min: dt.minute(),
            sec: dt.second(),
            fsec,
        }
    }

    /// ISO-8601 rendering with second precision
    pub fn to_iso(&self) -> String {
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            self.year, self.mon, self.day, self.hour, self.min, self.sec
        )
    }
}

/// Floor `year` to a multiple of `div` (10, 100 or 1000).
pub fn year_floor(year: i32, div: i32) -> i32 {
    (year / div) * div
}

/// Parse any of the accepted datetime spellings into broken-down time.
///
/// Accepts RFC 3339 (`2001-02-03T04:05:06Z`, with offset or fraction),
/// `YYYY-MM-DD HH:MM:SS`, and bare `YYYY-MM-DD`.
pub fn parse_datetime(s: &str) -> Result<Tm> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        let utc = dt.with_timezone(&Utc);
        return Ok(Tm {
            year: utc.year(),
            mon: utc.month(),
            day: utc.day(),
            hour: utc.hour(),
            min: utc.minute(),
            sec: utc.second(),
            fsec: utc.nanosecond() as f64 / 1e9,
        });
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Tm {
                year: ndt.year(),
                mon: ndt.month(),
                day: ndt.day(),
                hour: ndt.hour(),
                min: ndt.minute(),
                sec: ndt.second(),
                fsec: ndt.nanosecond() as f64 / 1e9,
            });
        }
    }
    if let Ok(nd) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(Tm {
            year: nd.year(),
            mon: nd.month(),
            day: nd.day(),
            hour: 0,
            min: 0,
            sec: 0,
            fsec: 0.0,
        });
    }
    Err(Error::client(format!("Invalid datetime: {:?}", s)))
}

/// Parse a time of day (`HH:MM:SS[.f]` or `HH:MM`) into seconds since
/// midnight.
pub fn parse_time(s: &str) -> Result<f64> {
    for fmt in ["%H:%M:%S%.f", "%H:%M"] {
        if let Ok(t) = NaiveTime::parse_from_str(s, fmt) {
            return Ok(t.num_seconds_from_midnight() as f64 + t.nanosecond() as f64 / 1e9);
        }
    }
    Err(Error::client(format!("Invalid time: {:?}", s)))
}

/// Parse a signed time delta (`+HH:MM:SS`, `-HH:MM`) into signed
/// seconds.
pub fn parse_timedelta(s: &str) -> Result<f64> {
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1.0, &s[1..]),
        Some(b'-') => (-1.0, &s[1..]),
        _ => return Err(Error::client(format!("Invalid timedelta: {:?}", s))),
    };
    Ok(sign * parse_time(rest)?)
}

/// Accuracy bucket units for temporal types, finest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u64)]
pub enum UnitTime {
    Second = 0,
    Minute = 1,
    Hour = 2,
    Day = 3,
    Month = 4,
    Year = 5,
    Decade = 6,
    Century = 7,
    Millennium = 8,
}

impl UnitTime {
    /// All units in ascending coarseness
    pub const ALL: [UnitTime; 9] = [
        UnitTime::Second,
        UnitTime::Minute,
        UnitTime::Hour,
        UnitTime::Day,
        UnitTime::Month,
        UnitTime::Year,
        UnitTime::Decade,
        UnitTime::Century,
        UnitTime::Millennium,
    ];

    /// Numeric code stored in `_accuracy` lists
    pub fn code(self) -> u64 {
        self as u64
    }

    /// Inverse of [`UnitTime::code`]
    pub fn from_code(code: u64) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Canonical name used in `_accuracy` and accuracy field suffixes
    pub fn as_str(self) -> &'static str {
        match self {
            UnitTime::Second => "second",
            UnitTime::Minute => "minute",
            UnitTime::Hour => "hour",
            UnitTime::Day => "day",
            UnitTime::Month => "month",
            UnitTime::Year => "year",
            UnitTime::Decade => "decade",
            UnitTime::Century => "century",
            UnitTime::Millennium => "millennium",
        }
    }

    /// Zero out every field finer than this unit.
    pub fn floor(self, tm: &Tm) -> Tm {
        match self {
            UnitTime::Millennium => Tm::from_year(year_floor(tm.year, 1000)),
            UnitTime::Century => Tm::from_year(year_floor(tm.year, 100)),
            UnitTime::Decade => Tm::from_year(year_floor(tm.year, 10)),
            UnitTime::Year => Tm::from_year(tm.year),
            UnitTime::Month => Tm {
                day: 1,
                hour: 0,
                min: 0,
                sec: 0,
                fsec: 0.0,
                ..*tm
            },
            UnitTime::Day => Tm {
                hour: 0,
                min: 0,
                sec: 0,
                fsec: 0.0,
                ..*tm
            },
            UnitTime::Hour => Tm {
                min: 0,
                sec: 0,
                fsec: 0.0,
                ..*tm
            },
            UnitTime::Minute => Tm {
                sec: 0,
                fsec: 0.0,
                ..*tm
            },
            UnitTime::Second => Tm { fsec: 0.0, ..*tm },
        }
    }
}

impl FromStr for UnitTime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "second" => UnitTime::Second,
            "minute" => UnitTime::Minute,
            "hour" => UnitTime::Hour,
            "day" => UnitTime::Day,
            "month" => UnitTime::Month,
            "year" => UnitTime::Year,
            "decade" => UnitTime::Decade,
            "century" => UnitTime::Century,
            "millennium" => UnitTime::Millennium,
            _ => return Err(Error::client(format!("Unknown time unit: {:?}", s))),
        })
    }
}

impl fmt::Display for UnitTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rfc3339() {
        let tm = parse_datetime("2015-06-07T08:09:10Z").unwrap();
        assert_eq!((tm.year, tm.mon, tm.day), (2015, 6, 7));
        assert_eq!((tm.hour, tm.min, tm.sec), (8, 9, 10));
    }

    #[test]
    fn test_parse_date_only() {
        let tm = parse_datetime("2015-06-07").unwrap();
        assert_eq!((tm.year, tm.mon, tm.day, tm.hour), (2015, 6, 7, 0));
    }

    #[test]
    fn test_timestamp_round_trip() {
        let tm = parse_datetime("2001-02-03T04:05:06Z").unwrap();
        let back = Tm::from_timestamp(tm.timestamp());
        assert_eq!(back, tm);
    }

    #[test]
    fn test_unit_floor() {
        let tm = parse_datetime("2015-06-07T08:09:10Z").unwrap();
        assert_eq!(UnitTime::Century.floor(&tm).year, 2000);
        assert_eq!(UnitTime::Decade.floor(&tm).year, 2010);
        let m = UnitTime::Month.floor(&tm);
        assert_eq!((m.year, m.mon, m.day, m.hour), (2015, 6, 1, 0));
        let h = UnitTime::Hour.floor(&tm);
        assert_eq!((h.hour, h.min, h.sec), (8, 0, 0));
    }

    #[test]
    fn test_parse_time_and_delta() {
        assert_eq!(parse_time("01:02:03").unwrap(), 3723.0);
        assert_eq!(parse_timedelta("-00:30:00").unwrap(), -1800.0);
        assert_eq!(parse_timedelta("+01:00:00").unwrap(), 3600.0);
        assert!(parse_timedelta("01:00:00").is_err());
    }

    #[test]
    fn test_unit_code_round_trip() {
        for u in UnitTime::ALL {
            assert_eq!(UnitTime::from_code(u.code()), Some(u));
            assert_eq!(u.as_str().parse::<UnitTime>().unwrap(), u);
        }
    }
}
