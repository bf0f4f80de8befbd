/*!
Parsers for human-readable sizes, durations, and times of day.
*/

use std::{sync::OnceLock, time::Duration};

use chrono::{NaiveTime, Weekday};
use regex::Regex;

use crate::Error;

/**
A calendar period to roll files over on.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    /**
    At the start of every hour.
    */
    Hourly,
    /**
    At midnight.
    */
    Daily,
    /**
    At midnight on Mondays.
    */
    Weekly,
    /**
    At midnight on the first day of the month.
    */
    Monthly,
    /**
    At midnight on the first of January.
    */
    Yearly,
}

/**
Parse a size like `100 MB`, `1.5 KiB`, or `10 B`.

Units are decimal (`KB`, `MB`, ...) or binary (`KiB`, `MiB`, ...). An uppercase `B` means bytes and a lowercase `b` means bits. Fractional byte counts are rounded down.

Returns `Ok(None)` if `s` doesn't look like a size at all.
*/
pub(crate) fn parse_size(s: &str) -> Result<Option<u64>, Error> {
    static SIZE: OnceLock<Regex> = OnceLock::new();

    let re = SIZE.get_or_init(|| {
        Regex::new(r"(?i)^([e+\-.\d]+)\s*([kmgtpezy])?(i)?(b)$").expect("invalid size regex")
    });

    let Some(captures) = re.captures(s.trim()) else {
        return Ok(None);
    };

    let value = parse_float(&captures[1], "size")?;

    let exponent = captures
        .get(2)
        .and_then(|unit| {
            "kmgtpezy"
                .find(unit.as_str().to_ascii_lowercase().as_str())
                .map(|i| i as i32 + 1)
        })
        .unwrap_or(0);

    let base: f64 = if captures.get(3).is_some() {
        1024.0
    } else {
        1000.0
    };

    let bits = if &captures[4] == "b" { 8.0 } else { 1.0 };

    let bytes = value * base.powi(exponent) / bits;

    if !bytes.is_finite() || bytes < 0.0 {
        return Err(Error::config(format!("invalid size: '{s}'")));
    }

    Ok(Some(bytes.floor() as u64))
}

/**
Parse a duration like `1 week`, `2 days, 6 hours`, or `30min`.

Returns `Ok(None)` if `s` doesn't look like a duration at all.
*/
pub(crate) fn parse_duration(s: &str) -> Result<Option<Duration>, Error> {
    static DURATION: OnceLock<Regex> = OnceLock::new();
    static PART: OnceLock<Regex> = OnceLock::new();

    const UNITS: [(&str, f64); 9] = [
        ("y|years?", 31_536_000.0),
        ("months?", 2_628_000.0),
        ("w|weeks?", 604_800.0),
        ("d|days?", 86_400.0),
        ("h|hours?", 3_600.0),
        ("min(?:ute)?s?", 60.0),
        ("s|sec(?:ond)?s?", 1.0),
        ("ms|milliseconds?", 0.001),
        ("us|microseconds?", 0.000_001),
    ];

    static UNIT_RES: OnceLock<Vec<(Regex, f64)>> = OnceLock::new();

    let s = s.trim();

    let duration = DURATION.get_or_init(|| {
        Regex::new(r"(?i)^(?:[e+\-.\d]+\s*[a-z]+[\s,]*)+$").expect("invalid duration regex")
    });

    if !duration.is_match(s) {
        return Ok(None);
    }

    let part = PART.get_or_init(|| {
        Regex::new(r"(?i)([e+\-.\d]+)\s*([a-z]+)").expect("invalid duration regex")
    });

    let units = UNIT_RES.get_or_init(|| {
        UNITS
            .iter()
            .map(|(unit, secs)| {
                (
                    Regex::new(&format!("(?i)^(?:{unit})$")).expect("invalid unit regex"),
                    *secs,
                )
            })
            .collect()
    });

    let mut total = 0.0;

    for captures in part.captures_iter(s) {
        let value = parse_float(&captures[1], "duration")?;
        let unit = &captures[2];

        let Some((_, secs)) = units.iter().find(|(re, _)| re.is_match(unit)) else {
            return Err(Error::config(format!(
                "invalid unit value while parsing duration: '{unit}'"
            )));
        };

        total += value * secs;
    }

    Duration::try_from_secs_f64(total)
        .map(Some)
        .map_err(|_| Error::config(format!("invalid duration: '{s}'")))
}

/**
Parse a calendar frequency like `daily`.
*/
pub(crate) fn parse_frequency(s: &str) -> Option<Frequency> {
    match s.trim().to_ascii_lowercase().as_str() {
        "hourly" => Some(Frequency::Hourly),
        "daily" => Some(Frequency::Daily),
        "weekly" => Some(Frequency::Weekly),
        "monthly" => Some(Frequency::Monthly),
        "yearly" => Some(Frequency::Yearly),
        _ => None,
    }
}

/**
Parse a weekday, a time of day, or both, like `monday`, `13:00`, `monday at 13:00`, or `every w0 at 1 pm`.

Returns `Ok(None)` if `s` doesn't look like either.
*/
pub(crate) fn parse_daytime(s: &str) -> Result<Option<(Option<Weekday>, Option<NaiveTime>)>, Error> {
    static AT: OnceLock<Regex> = OnceLock::new();

    let s = s.trim();
    let s = match s.get(..6) {
        Some(every) if every.eq_ignore_ascii_case("every ") => s[6..].trim_start(),
        _ => s,
    };

    let at = AT.get_or_init(|| Regex::new(r"(?i)^(.*?)\s+at\s+(.*)$").expect("invalid daytime regex"));

    if let Some(captures) = at.captures(s) {
        let day = parse_day(&captures[1])?;
        let time = parse_time(&captures[2])?;

        return match (day, time) {
            (Some(day), Some(time)) => Ok(Some((Some(day), Some(time)))),
            _ => Err(Error::config(format!("invalid day and time: '{s}'"))),
        };
    }

    let day = parse_day(s)?;
    let time = parse_time(s)?;

    if day.is_some() || time.is_some() {
        return Ok(Some((day, time)));
    }

    if let Some((day, time)) = s.split_once(char::is_whitespace) {
        if let (Some(day), Some(time)) = (parse_day(day)?, parse_time(time)?) {
            return Ok(Some((Some(day), Some(time))));
        }
    }

    Ok(None)
}

fn parse_day(s: &str) -> Result<Option<Weekday>, Error> {
    const DAYS: [(&str, Weekday); 7] = [
        ("monday", Weekday::Mon),
        ("tuesday", Weekday::Tue),
        ("wednesday", Weekday::Wed),
        ("thursday", Weekday::Thu),
        ("friday", Weekday::Fri),
        ("saturday", Weekday::Sat),
        ("sunday", Weekday::Sun),
    ];

    let s = s.trim().to_ascii_lowercase();

    if let Some((_, day)) = DAYS.iter().find(|(name, _)| *name == s) {
        return Ok(Some(*day));
    }

    match s.strip_prefix('w') {
        Some(n) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => {
            match n.parse::<usize>() {
                Ok(n) if n < 7 => Ok(Some(DAYS[n].1)),
                _ => Err(Error::config(format!(
                    "invalid weekday value while parsing day (expected [0-6]): '{n}'"
                ))),
            }
        }
        _ => Ok(None),
    }
}

fn parse_time(s: &str) -> Result<Option<NaiveTime>, Error> {
    let s = s.trim().to_ascii_lowercase();

    let (clock, pm) = if let Some(clock) = s.strip_suffix("am") {
        (clock.trim_end(), Some(false))
    } else if let Some(clock) = s.strip_suffix("pm") {
        (clock.trim_end(), Some(true))
    } else {
        (s.as_str(), None)
    };

    if clock.is_empty()
        || !clock
            .bytes()
            .all(|b| b.is_ascii_digit() || b == b'.' || b == b':')
    {
        return Ok(None);
    }

    let invalid = || Error::config(format!("unable to parse time: '{s}'"));

    let mut parts = clock.split(':');

    let hour: u32 = parts
        .next()
        .and_then(|hour| hour.parse().ok())
        .ok_or_else(invalid)?;

    let minute: u32 = match parts.next() {
        Some(minute) => minute.parse().map_err(|_| invalid())?,
        None => 0,
    };

    let (second, micro): (u32, u32) = match parts.next() {
        Some(second) => match second.split_once('.') {
            Some((second, fraction)) => {
                if fraction.is_empty() || fraction.len() > 6 {
                    return Err(invalid());
                }

                let micro: u32 = fraction.parse().map_err(|_| invalid())?;

                (
                    second.parse().map_err(|_| invalid())?,
                    micro * 10u32.pow(6 - fraction.len() as u32),
                )
            }
            None => (second.parse().map_err(|_| invalid())?, 0),
        },
        None => (0, 0),
    };

    if parts.next().is_some() {
        return Err(invalid());
    }

    let hour = match pm {
        Some(pm) => {
            if !(1..=12).contains(&hour) {
                return Err(invalid());
            }

            hour % 12 + if pm { 12 } else { 0 }
        }
        None => hour,
    };

    NaiveTime::from_hms_micro_opt(hour, minute, second, micro)
        .map(Some)
        .ok_or_else(invalid)
}

fn parse_float(s: &str, what: &str) -> Result<f64, Error> {
    s.parse()
        .map_err(|_| Error::config(format!("invalid float value while parsing {what}: '{s}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size() {
        for (s, expected) in [
            ("10 B", Some(10)),
            ("100 MB", Some(100_000_000)),
            ("1.5 KiB", Some(1_536)),
            ("1kb", Some(125)),
            ("2 GB", Some(2_000_000_000)),
            ("1 week", None),
            ("00:00", None),
        ] {
            assert_eq!(expected, parse_size(s).unwrap(), "{}", s);
        }

        assert!(parse_size("e.e B").unwrap_err().is_config());
    }

    #[test]
    fn duration() {
        for (s, expected) in [
            ("1 week", Some(Duration::from_secs(604_800))),
            ("2 days, 6 hours", Some(Duration::from_secs(194_400))),
            ("30min", Some(Duration::from_secs(1_800))),
            ("1.5 s", Some(Duration::from_millis(1_500))),
            ("250 ms", Some(Duration::from_millis(250))),
            ("monday", None),
            ("12:00", None),
        ] {
            assert_eq!(expected, parse_duration(s).unwrap(), "{}", s);
        }

        assert!(parse_duration("3 fortnights").unwrap_err().is_config());
        assert!(parse_duration("-1 day").unwrap_err().is_config());
    }

    #[test]
    fn frequency() {
        assert_eq!(Some(Frequency::Daily), parse_frequency(" Daily "));
        assert_eq!(None, parse_frequency("fortnightly"));
    }

    #[test]
    fn daytime() {
        let time = |h, m| Some(NaiveTime::from_hms_opt(h, m, 0).unwrap());

        for (s, expected) in [
            ("00:00", Some((None, time(0, 0)))),
            ("13:30:00", Some((None, time(13, 30)))),
            ("1 pm", Some((None, time(13, 0)))),
            ("12 am", Some((None, time(0, 0)))),
            ("monday", Some((Some(Weekday::Mon), None))),
            ("w6", Some((Some(Weekday::Sun), None))),
            ("sunday at 12:00", Some((Some(Weekday::Sun), time(12, 0)))),
            ("every monday at 00:00", Some((Some(Weekday::Mon), time(0, 0)))),
            ("friday 18:15", Some((Some(Weekday::Fri), time(18, 15)))),
            ("tomorrow", None),
        ] {
            assert_eq!(expected, parse_daytime(s).unwrap(), "{}", s);
        }

        for s in ["25:00", "w7", "someday at 12:00", "monday at noon", "13 pm"] {
            assert!(parse_daytime(s).unwrap_err().is_config(), "{}", s);
        }
    }
}
