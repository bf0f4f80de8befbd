/*!
Formatting timestamps into file names.

A format is either a sequence of `%` directives, handed to `chrono`'s strftime implementation, or a sequence of tokens:

| Token | Output |
| ----- | ------ |
| `YYYY`, `YY` | year, 2-digit year |
| `Q` | quarter |
| `MMMM`, `MMM`, `MM`, `M` | month name, abbreviated month name, zero-padded month, month |
| `DDDD`, `DDD` | zero-padded day of year, day of year |
| `DD`, `D` | zero-padded day of month, day of month |
| `dddd`, `ddd`, `d`, `E` | weekday name, abbreviated weekday name, weekday from Monday = 0, ISO weekday |
| `HH`, `H`, `hh`, `h` | 24-hour, 12-hour |
| `mm`, `m`, `ss`, `s` | minute, second |
| `S` to `SSSSSS` | fraction of a second with 1 to 6 digits |
| `A` | `AM` or `PM` |
| `Z`, `ZZ`, `zz` | offset as `+HH:MM`, offset as `+HHMM`, `UTC` or the offset |
| `X`, `x` | unix seconds, unix microseconds |

Text inside `[brackets]` is copied literally. A trailing `!UTC` converts the timestamp to UTC before formatting.
*/

use std::fmt::Write as _;

use chrono::{
    format::{Item, StrftimeItems},
    DateTime, Datelike, FixedOffset, Offset, Timelike, Utc,
};

use crate::Error;

/**
The format used for the time placeholder when no format is given, and for timestamps in renamed files.
*/
pub(crate) const DEFAULT_FILE_FORMAT: &str = "%Y-%m-%d_%H-%M-%S_%f";

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const WEEKDAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/**
A validated timestamp format.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TimeFormat {
    utc: bool,
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Strftime(String),
    Tokens(Vec<Token>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Year,
    YearShort,
    Quarter,
    MonthName,
    MonthAbbr,
    MonthPadded,
    Month,
    DayOfYearPadded,
    DayOfYear,
    DayPadded,
    Day,
    WeekdayName,
    WeekdayAbbr,
    Weekday,
    IsoWeekday,
    HourPadded,
    Hour,
    Hour12Padded,
    Hour12,
    MinutePadded,
    Minute,
    SecondPadded,
    Second,
    Fraction(usize),
    AmPm,
    Offset,
    OffsetCompact,
    ZoneName,
    UnixSeconds,
    UnixMicros,
}

impl TimeFormat {
    pub(crate) fn parse(spec: &str) -> Result<Self, Error> {
        let (spec, utc) = match spec.strip_suffix("!UTC") {
            Some(spec) => (spec, true),
            None => (spec, false),
        };

        let spec = if spec.is_empty() {
            DEFAULT_FILE_FORMAT
        } else {
            spec
        };

        let kind = if spec.contains('%') {
            Kind::Strftime(parse_strftime(spec)?)
        } else {
            Kind::Tokens(parse_tokens(spec)?)
        };

        Ok(TimeFormat { utc, kind })
    }

    pub(crate) fn default_file_format() -> Self {
        TimeFormat {
            utc: false,
            kind: Kind::Strftime(String::from("%Y-%m-%d_%H-%M-%S_%6f")),
        }
    }

    pub(crate) fn format(&self, ts: &DateTime<FixedOffset>) -> String {
        let ts = if self.utc {
            ts.with_timezone(&Utc.fix())
        } else {
            *ts
        };

        match self.kind {
            Kind::Strftime(ref spec) => ts.format(spec).to_string(),
            Kind::Tokens(ref tokens) => {
                let mut buf = String::new();

                for token in tokens {
                    format_token(&mut buf, token, &ts, self.utc);
                }

                buf
            }
        }
    }
}

// `%f` means microseconds in file name formats, rather than `chrono`'s nanoseconds
fn parse_strftime(spec: &str) -> Result<String, Error> {
    let mut translated = String::with_capacity(spec.len());

    let mut chars = spec.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            translated.push(c);
            continue;
        }

        match chars.next() {
            Some('f') => translated.push_str("%6f"),
            Some(next) => {
                translated.push('%');
                translated.push(next);
            }
            None => translated.push('%'),
        }
    }

    if StrftimeItems::new(&translated).any(|item| matches!(item, Item::Error)) {
        return Err(Error::config(format!("invalid time format: '{spec}'")));
    }

    Ok(translated)
}

fn parse_tokens(spec: &str) -> Result<Vec<Token>, Error> {
    let chars: Vec<char> = spec.chars().collect();

    let mut tokens = Vec::new();
    let mut literal = String::new();

    let run = |start: usize, c: char| chars[start..].iter().take_while(|&&n| n == c).count();

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];

        let (token, len) = match c {
            'H' | 'h' | 'm' | 's' => {
                let len = run(i, c).min(2);

                let token = match (c, len) {
                    ('H', 2) => Token::HourPadded,
                    ('H', _) => Token::Hour,
                    ('h', 2) => Token::Hour12Padded,
                    ('h', _) => Token::Hour12,
                    ('m', 2) => Token::MinutePadded,
                    ('m', _) => Token::Minute,
                    ('s', 2) => Token::SecondPadded,
                    _ => Token::Second,
                };

                (Some(token), len)
            }
            'S' => {
                let len = run(i, c);

                if len > 6 {
                    return Err(Error::config(format!(
                        "invalid time format '{spec}': more than six successive 'S' characters, nanosecond precision is not supported"
                    )));
                }

                (Some(Token::Fraction(len)), len)
            }
            'Y' => match run(i, c) {
                len if len >= 4 => (Some(Token::Year), 4),
                len if len >= 2 => (Some(Token::YearShort), 2),
                _ => (None, 1),
            },
            'M' => {
                let len = run(i, c).min(4);

                let token = match len {
                    4 => Token::MonthName,
                    3 => Token::MonthAbbr,
                    2 => Token::MonthPadded,
                    _ => Token::Month,
                };

                (Some(token), len)
            }
            'D' => {
                let len = run(i, c).min(4);

                let token = match len {
                    4 => Token::DayOfYearPadded,
                    3 => Token::DayOfYear,
                    2 => Token::DayPadded,
                    _ => Token::Day,
                };

                (Some(token), len)
            }
            'd' => match run(i, c) {
                len if len >= 4 => (Some(Token::WeekdayName), 4),
                3 => (Some(Token::WeekdayAbbr), 3),
                _ => (Some(Token::Weekday), 1),
            },
            'Z' => match run(i, c) {
                1 => (Some(Token::Offset), 1),
                _ => (Some(Token::OffsetCompact), 2),
            },
            'z' if run(i, c) >= 2 => (Some(Token::ZoneName), 2),
            'A' => (Some(Token::AmPm), 1),
            'X' => (Some(Token::UnixSeconds), 1),
            'x' => (Some(Token::UnixMicros), 1),
            'E' => (Some(Token::IsoWeekday), 1),
            'Q' => (Some(Token::Quarter), 1),
            '[' => match chars[i + 1..].iter().position(|&n| n == ']') {
                Some(end) => {
                    literal.extend(&chars[i + 1..i + 1 + end]);
                    i += end + 2;
                    continue;
                }
                None => (None, 1),
            },
            _ => (None, 1),
        };

        match token {
            Some(token) => {
                if !literal.is_empty() {
                    tokens.push(Token::Literal(std::mem::take(&mut literal)));
                }

                tokens.push(token);
            }
            None => literal.extend(&chars[i..i + len]),
        }

        i += len;
    }

    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }

    Ok(tokens)
}

fn format_token(buf: &mut String, token: &Token, ts: &DateTime<FixedOffset>, utc: bool) {
    let hour12 = (ts.hour() + 11) % 12 + 1;
    let weekday = ts.weekday().num_days_from_monday();
    let micros = ts.timestamp_subsec_micros().min(999_999);

    // Writing to a `String` is infallible
    let _ = match *token {
        Token::Literal(ref literal) => {
            buf.push_str(literal);
            Ok(())
        }
        Token::Year => write!(buf, "{:04}", ts.year()),
        Token::YearShort => write!(buf, "{:02}", ts.year().rem_euclid(100)),
        Token::Quarter => write!(buf, "{}", (ts.month() - 1) / 3 + 1),
        Token::MonthName => {
            buf.push_str(MONTH_NAMES[ts.month0() as usize]);
            Ok(())
        }
        Token::MonthAbbr => {
            buf.push_str(&MONTH_NAMES[ts.month0() as usize][..3]);
            Ok(())
        }
        Token::MonthPadded => write!(buf, "{:02}", ts.month()),
        Token::Month => write!(buf, "{}", ts.month()),
        Token::DayOfYearPadded => write!(buf, "{:03}", ts.ordinal()),
        Token::DayOfYear => write!(buf, "{}", ts.ordinal()),
        Token::DayPadded => write!(buf, "{:02}", ts.day()),
        Token::Day => write!(buf, "{}", ts.day()),
        Token::WeekdayName => {
            buf.push_str(WEEKDAY_NAMES[weekday as usize]);
            Ok(())
        }
        Token::WeekdayAbbr => {
            buf.push_str(&WEEKDAY_NAMES[weekday as usize][..3]);
            Ok(())
        }
        Token::Weekday => write!(buf, "{}", weekday),
        Token::IsoWeekday => write!(buf, "{}", weekday + 1),
        Token::HourPadded => write!(buf, "{:02}", ts.hour()),
        Token::Hour => write!(buf, "{}", ts.hour()),
        Token::Hour12Padded => write!(buf, "{:02}", hour12),
        Token::Hour12 => write!(buf, "{}", hour12),
        Token::MinutePadded => write!(buf, "{:02}", ts.minute()),
        Token::Minute => write!(buf, "{}", ts.minute()),
        Token::SecondPadded => write!(buf, "{:02}", ts.second()),
        Token::Second => write!(buf, "{}", ts.second()),
        Token::Fraction(digits) => {
            let digits = digits as u32;
            write!(
                buf,
                "{:0width$}",
                micros / 10u32.pow(6 - digits),
                width = digits as usize
            )
        }
        Token::AmPm => {
            buf.push_str(if ts.hour() < 12 { "AM" } else { "PM" });
            Ok(())
        }
        Token::Offset => write_offset(buf, ts.offset(), ":"),
        Token::OffsetCompact => write_offset(buf, ts.offset(), ""),
        Token::ZoneName => {
            // Zone abbreviations aren't available for fixed offsets
            if utc {
                buf.push_str("UTC");
                Ok(())
            } else {
                write_offset(buf, ts.offset(), ":")
            }
        }
        Token::UnixSeconds => write!(buf, "{}", ts.timestamp()),
        Token::UnixMicros => write!(buf, "{}", ts.timestamp() * 1_000_000 + micros as i64),
    };
}

fn write_offset(buf: &mut String, offset: &FixedOffset, separator: &str) -> std::fmt::Result {
    let total = offset.local_minus_utc();

    let sign = if total >= 0 { '+' } else { '-' };
    let total = total.unsigned_abs();

    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);

    write!(buf, "{sign}{hours:02}{separator}{minutes:02}")?;

    if seconds > 0 {
        write!(buf, "{separator}{seconds:02}")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    fn ts() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(9 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 7, 15, 4, 5)
            .unwrap()
            + chrono::TimeDelta::microseconds(123_456)
    }

    #[test]
    fn format_tokens() {
        for (spec, expected) in [
            ("YYYY-MM-DD", "2024-03-07"),
            ("YY M D", "24 3 7"),
            ("MMMM MMM Q", "March Mar 1"),
            ("DDDD DDD", "067 67"),
            ("dddd ddd d E", "Thursday Thu 3 4"),
            ("HH:mm:ss", "15:04:05"),
            ("hh h A", "03 3 PM"),
            ("S SS SSS SSSSSS", "1 12 123 123456"),
            ("Z ZZ", "+09:00 +0900"),
            ("X", "1709791445"),
            ("x", "1709791445123456"),
            ("[YYYY] YYYY", "YYYY 2024"),
            ("HH!UTC", "06"),
        ] {
            let format = TimeFormat::parse(spec).unwrap();

            assert_eq!(expected, format.format(&ts()), "{}", spec);
        }
    }

    #[test]
    fn format_strftime() {
        let format = TimeFormat::parse("%Y%m%d_%H.%f").unwrap();

        assert_eq!("20240307_15.123456", format.format(&ts()));
    }

    #[test]
    fn format_default() {
        let format = TimeFormat::parse("").unwrap();

        assert_eq!("2024-03-07_15-04-05_123456", format.format(&ts()));
        assert_eq!(format, TimeFormat::default_file_format());
    }

    #[test]
    fn format_invalid() {
        assert!(TimeFormat::parse("SSSSSSS").unwrap_err().is_config());
        assert!(TimeFormat::parse("%Q").unwrap_err().is_config());
    }
}
