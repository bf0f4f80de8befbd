/*!
Deciding when to roll over to a new file.
*/

use std::{fmt, str::FromStr, time::Duration};

use chrono::{
    DateTime, Datelike, Days, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike,
    Weekday,
};

use crate::{
    ctime,
    file::{Message, OpenFile},
    parse::{self, Frequency},
    Error,
};

/**
A policy for when the active log file should be rotated.

Size-based policies compare the length of the file plus the pending write against a threshold. Time-based policies keep a single boundary, anchored to the creation time of the active file the first time they're checked, and rotate when a write is timestamped at or after it.
*/
pub struct Rotation {
    kind: Kind,
}

enum Kind {
    Size(u64),
    Time {
        step: Step,
        boundary: Option<NaiveDateTime>,
    },
    Custom(Box<dyn FnMut(&Message, &OpenFile) -> bool + Send>),
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Interval(TimeDelta),
    Daily(NaiveTime),
    Weekly(Weekday, NaiveTime),
    Frequency(Frequency),
}

impl Rotation {
    /**
    Rotate when a write would grow the file beyond `max_bytes`.

    A write that brings the file to exactly `max_bytes` doesn't rotate.
    */
    pub fn size(max_bytes: u64) -> Self {
        Rotation {
            kind: Kind::Size(max_bytes),
        }
    }

    /**
    Rotate every `interval`, starting from the creation time of the file.
    */
    pub fn interval(interval: Duration) -> Self {
        let interval = TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX);

        Rotation::time(Step::Interval(interval))
    }

    /**
    Rotate every day at `at`.
    */
    pub fn daily_at(at: NaiveTime) -> Self {
        Rotation::time(Step::Daily(at))
    }

    /**
    Rotate every week on `day` at `at`.
    */
    pub fn weekly_on(day: Weekday, at: NaiveTime) -> Self {
        Rotation::time(Step::Weekly(day, at))
    }

    /**
    Rotate at the start of every calendar period.
    */
    pub fn every(frequency: Frequency) -> Self {
        Rotation::time(Step::Frequency(frequency))
    }

    /**
    Rotate whenever `should_rotate` returns `true` for a pending write.
    */
    pub fn custom(should_rotate: impl FnMut(&Message, &OpenFile) -> bool + Send + 'static) -> Self {
        Rotation {
            kind: Kind::Custom(Box::new(should_rotate)),
        }
    }

    /**
    Parse a rotation from a human-readable string.

    Strings are tried as a size (`"100 MB"`), a calendar frequency (`"daily"`), a weekday and time of day (`"00:00"`, `"monday at 12:00"`, `"w0"`), and finally a duration (`"1 week"`), in that order. A weekday without a time rotates at midnight.
    */
    pub fn parse(rotation: &str) -> Result<Self, Error> {
        if let Some(max_bytes) = parse::parse_size(rotation)? {
            return Ok(Rotation::size(max_bytes));
        }

        if let Some(frequency) = parse::parse_frequency(rotation) {
            return Ok(Rotation::every(frequency));
        }

        if let Some((day, at)) = parse::parse_daytime(rotation)? {
            match (day, at) {
                (Some(day), at) => {
                    return Ok(Rotation::weekly_on(day, at.unwrap_or(NaiveTime::MIN)))
                }
                (None, Some(at)) => return Ok(Rotation::daily_at(at)),
                (None, None) => (),
            }
        }

        if let Some(interval) = parse::parse_duration(rotation)? {
            if interval.is_zero() {
                return Err(Error::config(format!(
                    "rotation intervals must be non-zero: '{rotation}'"
                )));
            }

            return Ok(Rotation::interval(interval));
        }

        Err(Error::config(format!(
            "cannot parse rotation from: '{rotation}'"
        )))
    }

    fn time(step: Step) -> Self {
        Rotation {
            kind: Kind::Time {
                step,
                boundary: None,
            },
        }
    }

    /**
    Whether the file should be rotated before `message` is written to it.
    */
    pub(crate) fn should_rotate(&mut self, message: &Message, file: &OpenFile) -> bool {
        match self.kind {
            Kind::Size(max_bytes) => {
                file.len().saturating_add(message.text().len() as u64) > max_bytes
            }
            Kind::Time {
                step,
                ref mut boundary,
            } => {
                let at = message.time().naive_local();

                let current = *boundary.get_or_insert_with(|| {
                    let store = ctime::store();

                    let created = store
                        .get(file.path())
                        .unwrap_or_else(|_| std::time::SystemTime::now());
                    store.set(file.path(), created);

                    step.first_after(DateTime::<Local>::from(created).naive_local())
                });

                if at < current {
                    return false;
                }

                *boundary = Some(step.past(current, at));

                true
            }
            Kind::Custom(ref mut should_rotate) => should_rotate(message, file),
        }
    }
}

impl FromStr for Rotation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rotation::parse(s)
    }
}

impl fmt::Debug for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Kind::Size(max_bytes) => f.debug_tuple("Size").field(&max_bytes).finish(),
            Kind::Time { step, boundary } => f
                .debug_struct("Time")
                .field("step", &step)
                .field("boundary", &boundary)
                .finish(),
            Kind::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Step {
    /**
    The first boundary strictly after a file was `created`.
    */
    fn first_after(self, created: NaiveDateTime) -> NaiveDateTime {
        match self {
            Step::Interval(interval) => add(created, interval),
            Step::Daily(at) => {
                let boundary = created.date().and_time(at);

                if boundary <= created {
                    self.next(boundary)
                } else {
                    boundary
                }
            }
            Step::Weekly(day, at) => {
                let mut boundary = created.date().and_time(at);

                while boundary.weekday() != day || boundary <= created {
                    let next = add_days(boundary, 1);

                    if next == boundary {
                        break;
                    }

                    boundary = next;
                }

                boundary
            }
            Step::Frequency(frequency) => next_period(created, frequency),
        }
    }

    /**
    The boundary after `boundary`.
    */
    fn next(self, boundary: NaiveDateTime) -> NaiveDateTime {
        match self {
            Step::Interval(interval) => add(boundary, interval),
            Step::Daily(_) => add_days(boundary, 1),
            Step::Weekly(_, _) => add_days(boundary, 7),
            Step::Frequency(frequency) => next_period(boundary, frequency),
        }
    }

    /**
    Step `boundary` forwards until it's strictly after `at`.
    */
    fn past(self, boundary: NaiveDateTime, at: NaiveDateTime) -> NaiveDateTime {
        if let Step::Interval(interval) = self {
            let step = interval.num_microseconds().unwrap_or(i64::MAX).max(1);
            let elapsed = (at - boundary).num_microseconds().unwrap_or(i64::MAX);

            let steps = (elapsed / step).saturating_add(1);

            return add(boundary, TimeDelta::microseconds(steps.saturating_mul(step)));
        }

        let mut boundary = boundary;

        while boundary <= at {
            let next = self.next(boundary);

            if next == boundary {
                break;
            }

            boundary = next;
        }

        boundary
    }
}

fn add(at: NaiveDateTime, delta: TimeDelta) -> NaiveDateTime {
    at.checked_add_signed(delta).unwrap_or(NaiveDateTime::MAX)
}

fn add_days(at: NaiveDateTime, days: u64) -> NaiveDateTime {
    at.checked_add_days(Days::new(days))
        .unwrap_or(NaiveDateTime::MAX)
}

fn next_period(at: NaiveDateTime, frequency: Frequency) -> NaiveDateTime {
    let date = at.date();

    let next = match frequency {
        Frequency::Hourly => date
            .and_hms_opt(at.hour(), 0, 0)
            .and_then(|hour| hour.checked_add_signed(TimeDelta::hours(1))),
        Frequency::Daily => date.succ_opt().map(|date| date.and_time(NaiveTime::MIN)),
        Frequency::Weekly => date
            .checked_sub_days(Days::new(date.weekday().num_days_from_monday() as u64))
            .and_then(|monday| monday.checked_add_days(Days::new(7)))
            .map(|monday| monday.and_time(NaiveTime::MIN)),
        Frequency::Monthly => {
            let (year, month) = if date.month() == 12 {
                (date.year() + 1, 1)
            } else {
                (date.year(), date.month() + 1)
            };

            NaiveDate::from_ymd_opt(year, month, 1).map(|date| date.and_time(NaiveTime::MIN))
        }
        Frequency::Yearly => {
            NaiveDate::from_ymd_opt(date.year() + 1, 1, 1).map(|date| date.and_time(NaiveTime::MIN))
        }
    };

    next.unwrap_or(NaiveDateTime::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn hms(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn parse_variants() {
        for (s, expected) in [
            ("100 MB", "Size"),
            ("daily", "Time"),
            ("00:00", "Time"),
            ("monday at 12:00", "Time"),
            ("every w0 at 1 pm", "Time"),
            ("w0", "Time"),
            ("1 week", "Time"),
            ("2 hours, 30 min", "Time"),
        ] {
            let rotation = Rotation::parse(s).unwrap();

            assert!(format!("{rotation:?}").starts_with(expected), "{}", s);
        }

        for s in ["", "sometimes", "0 s", "monday at noon"] {
            assert!(Rotation::parse(s).unwrap_err().is_config(), "{}", s);
        }
    }

    #[test]
    fn daily_first_boundary() {
        let step = Step::Daily(hms(12, 0));

        assert_eq!(
            at("2024-03-07 12:00:00"),
            step.first_after(at("2024-03-07 09:00:00"))
        );
        assert_eq!(
            at("2024-03-08 12:00:00"),
            step.first_after(at("2024-03-07 12:00:00"))
        );
    }

    #[test]
    fn weekly_first_boundary() {
        // 2024-03-07 is a Thursday
        let step = Step::Weekly(Weekday::Mon, hms(0, 0));

        assert_eq!(
            at("2024-03-11 00:00:00"),
            step.first_after(at("2024-03-07 09:00:00"))
        );

        let step = Step::Weekly(Weekday::Thu, hms(12, 0));

        assert_eq!(
            at("2024-03-07 12:00:00"),
            step.first_after(at("2024-03-07 09:00:00"))
        );
        assert_eq!(
            at("2024-03-14 12:00:00"),
            step.first_after(at("2024-03-07 13:00:00"))
        );
    }

    #[test]
    fn weekly_boundaries_are_monotonic() {
        let step = Step::Weekly(Weekday::Mon, hms(0, 0));

        let mut boundary = step.first_after(at("2024-03-07 09:00:00"));
        let mut rotations = 0;

        // A write every 6 hours for 4 weeks
        let mut now = at("2024-03-07 09:00:00");
        for _ in 0..(4 * 7 * 4) {
            now = add(now, TimeDelta::hours(6));

            if now >= boundary {
                let next = step.past(boundary, now);

                assert!(next > boundary);
                assert!(next > now);
                assert_eq!(Weekday::Mon, next.weekday());

                boundary = next;
                rotations += 1;
            }
        }

        assert_eq!(4, rotations);
    }

    #[test]
    fn missed_boundaries_rotate_once() {
        let step = Step::Daily(hms(0, 0));

        let boundary = at("2024-03-08 00:00:00");
        let next = step.past(boundary, at("2024-03-20 13:00:00"));

        assert_eq!(at("2024-03-21 00:00:00"), next);

        let step = Step::Interval(TimeDelta::minutes(10));

        let boundary = at("2024-03-08 00:00:00");
        let next = step.past(boundary, at("2024-03-08 01:00:00"));

        assert_eq!(at("2024-03-08 01:10:00"), next);
    }

    #[test]
    fn huge_gaps_saturate() {
        let step = Step::Interval(TimeDelta::microseconds(1));

        let next = step.past(NaiveDateTime::MIN, NaiveDateTime::MAX);

        assert!(next > NaiveDateTime::MIN);
    }

    #[test]
    fn frequency_boundaries() {
        let created = at("2024-12-31 23:30:00");

        for (frequency, expected) in [
            (Frequency::Hourly, "2025-01-01 00:00:00"),
            (Frequency::Daily, "2025-01-01 00:00:00"),
            (Frequency::Weekly, "2025-01-06 00:00:00"),
            (Frequency::Monthly, "2025-01-01 00:00:00"),
            (Frequency::Yearly, "2025-01-01 00:00:00"),
        ] {
            assert_eq!(
                at(expected),
                Step::Frequency(frequency).first_after(created),
                "{:?}",
                frequency
            );
        }

        assert_eq!(
            at("2024-03-01 00:00:00"),
            Step::Frequency(Frequency::Monthly).next(at("2024-02-01 00:00:00"))
        );
    }
}
