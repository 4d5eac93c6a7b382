//! Expansion of date/hour ranges into hourly fetch partitions.
//!
//! Logs are stored in S3 under `<customer>/<YYYYMMDD>-<HH>/`, one prefix
//! per hour. This module turns a requested range into the ordered set of
//! those prefixes, paired with the local directory each one is fetched
//! into. Nothing in here performs any I/O.
use chrono::NaiveDate;

use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Default local root that partitions are fetched into.
pub const DEFAULT_ROOT: &str = "./customer_logs";

/// Date format used when rendering partition names.
const PARTITION_DATE: &str = "%Y%m%d";

/// Error raised when a range cannot be expanded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidRangeError(String);

impl InvalidRangeError {
    /// Constructs a new `InvalidRangeError` from a reason.
    pub fn new<S: Into<String>>(reason: S) -> Self {
        InvalidRangeError(reason.into())
    }
}

impl Display for InvalidRangeError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "invalid range: {}", self.0)
    }
}

impl Error for InvalidRangeError {}

/// A calendar date paired with an hour of that day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateHour {
    date: NaiveDate,
    hour: u32,
}

impl DateHour {
    /// Returns the date of this partition.
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Returns the hour of this partition, in `[0, 23]`.
    pub fn hour(&self) -> u32 {
        self.hour
    }
}

/// Renders as the partition name, `YYYYMMDD-HH`.
impl Display for DateHour {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}-{:02}", self.date.format(PARTITION_DATE), self.hour)
    }
}

/// Inclusive range of hours within a single day.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HourSpan {
    pub start: u32,
    pub end: u32,
}

impl HourSpan {
    /// The full `00`-`23` span of a day.
    pub const FULL_DAY: HourSpan = HourSpan { start: 0, end: 23 };
}

/// Everything needed to expand a range into `FetchTask` values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeSpec {
    pub customer: String,
    pub bucket: String,
    pub start: NaiveDate,
    /// When absent the range covers `start` only, restricted to `hours`.
    pub end: Option<NaiveDate>,
    /// Only honoured in single-day mode (no `end`).
    pub hours: HourSpan,
    pub root: String,
}

impl RangeSpec {
    /// Constructs a single-day `RangeSpec` covering the whole day.
    pub fn new<C, B>(customer: C, bucket: B, start: NaiveDate) -> Self
    where
        C: Into<String>,
        B: Into<String>,
    {
        Self {
            customer: customer.into(),
            bucket: bucket.into(),
            start,
            end: None,
            hours: HourSpan::FULL_DAY,
            root: DEFAULT_ROOT.to_string(),
        }
    }

    /// Extends this range through `end`, switching to multi-day mode.
    pub fn until(mut self, end: NaiveDate) -> Self {
        self.end = Some(end);
        self
    }

    /// Restricts a single-day range to the `start..=end` hours.
    pub fn hours(mut self, start: u32, end: u32) -> Self {
        self.hours = HourSpan { start, end };
        self
    }

    /// Sets the local root directory partitions are fetched into.
    pub fn root<S: Into<String>>(mut self, root: S) -> Self {
        self.root = root.into();
        self
    }

    /// Determines whether this spec is in single-day mode.
    pub fn is_single_day(&self) -> bool {
        self.end.is_none()
    }

    /// Returns the last date covered by this spec.
    pub fn end_date(&self) -> NaiveDate {
        self.end.unwrap_or(self.start)
    }

    /// Checks every bound of the spec, returning the first violation.
    pub fn validate(&self) -> Result<(), InvalidRangeError> {
        validate_segment("customer", &self.customer)?;
        validate_segment("bucket", &self.bucket)?;

        for hour in &[self.hours.start, self.hours.end] {
            if *hour > 23 {
                return Err(InvalidRangeError::new(format!(
                    "hour {} is outside of 00-23",
                    hour
                )));
            }
        }

        if self.is_single_day() && self.hours.start > self.hours.end {
            return Err(InvalidRangeError::new(format!(
                "start hour {:02} is after end hour {:02}",
                self.hours.start, self.hours.end
            )));
        }

        if self.start > self.end_date() {
            return Err(InvalidRangeError::new(format!(
                "start date {} is after end date {}",
                self.start.format(PARTITION_DATE),
                self.end_date().format(PARTITION_DATE)
            )));
        }

        Ok(())
    }
}

/// Rejects values which cannot be used verbatim as a single path segment.
fn validate_segment(label: &str, value: &str) -> Result<(), InvalidRangeError> {
    if value.is_empty() {
        return Err(InvalidRangeError::new(format!("{} must not be empty", label)));
    }

    if value == "." || value == ".." || value.contains('/') || value.contains('\\') {
        return Err(InvalidRangeError::new(format!(
            "{} '{}' is not a valid path segment",
            label, value
        )));
    }

    Ok(())
}

/// A single hourly partition to fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchTask {
    pub partition: DateHour,
    /// Prefix within the bucket, always ending in `/`.
    pub remote_prefix: String,
    /// Local directory to fetch into, always ending in `/`.
    pub local_directory: String,
}

impl FetchTask {
    fn new(customer: &str, root: &str, partition: DateHour) -> Self {
        Self {
            partition,
            remote_prefix: format!("{}/{}/", customer, partition),
            local_directory: format!("{}/{}/", root.trim_end_matches('/'), partition),
        }
    }
}

/// Lazy iterator over the `FetchTask` values of a validated `RangeSpec`.
///
/// Tasks are yielded in ascending `(date, hour)` order.
#[derive(Clone, Debug)]
pub struct Expansion {
    customer: String,
    root: String,
    end: NaiveDate,
    single: Option<HourSpan>,
    next: Option<DateHour>,
}

impl Expansion {
    /// Returns the hours to cover for the provided date.
    fn span(&self, date: NaiveDate) -> HourSpan {
        match self.single {
            Some(span) if date == self.end => span,
            _ => HourSpan::FULL_DAY,
        }
    }

    /// Computes the partition following `current`, if any.
    fn advance(&self, current: DateHour) -> Option<DateHour> {
        if current.hour < self.span(current.date).end {
            return Some(DateHour {
                hour: current.hour + 1,
                ..current
            });
        }

        if current.date >= self.end {
            return None;
        }

        let date = current.date.succ_opt()?;
        let hour = self.span(date).start;

        Some(DateHour { date, hour })
    }
}

impl Iterator for Expansion {
    type Item = FetchTask;

    fn next(&mut self) -> Option<FetchTask> {
        let current = self.next?;
        self.next = self.advance(current);
        Some(FetchTask::new(&self.customer, &self.root, current))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let current = match self.next {
            Some(current) => current,
            None => return (0, Some(0)),
        };

        let first = self.span(current.date);
        let today = (first.end - current.hour + 1) as usize;
        let later = (self.end - current.date).num_days() as usize * 24;

        (today + later, Some(today + later))
    }
}

impl ExactSizeIterator for Expansion {}

/// Expands a `RangeSpec` into its hourly `FetchTask` values.
///
/// The spec is validated in full before anything is yielded, so an error
/// is the only output of an invalid spec.
pub fn expand(spec: &RangeSpec) -> Result<Expansion, InvalidRangeError> {
    spec.validate()?;

    let single = if spec.is_single_day() {
        Some(spec.hours)
    } else {
        None
    };

    let start_hour = single.map(|span| span.start).unwrap_or(0);

    Ok(Expansion {
        customer: spec.customer.clone(),
        root: spec.root.clone(),
        end: spec.end_date(),
        single,
        next: Some(DateHour {
            date: spec.start,
            hour: start_hour,
        }),
    })
}

/// Parses a calendar date in either `YYYYMMDD` or `YYYY-MM-DD` form.
pub fn parse_date(input: &str) -> Result<NaiveDate, InvalidRangeError> {
    let input = input.trim();
    let format = if input.contains('-') {
        "%Y-%m-%d"
    } else {
        PARTITION_DATE
    };

    if format == PARTITION_DATE && (input.len() != 8 || !input.bytes().all(|b| b.is_ascii_digit())) {
        return Err(InvalidRangeError::new(format!(
            "'{}' is not a date in YYYYMMDD form",
            input
        )));
    }

    NaiveDate::parse_from_str(input, format)
        .map_err(|err| InvalidRangeError::new(format!("'{}' is not a valid date: {}", input, err)))
}

/// Parses an hour of the day, accepting an optional leading zero.
pub fn parse_hour(input: &str) -> Result<u32, InvalidRangeError> {
    let input = input.trim();

    if input.is_empty() || input.len() > 2 || !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(InvalidRangeError::new(format!("'{}' is not an hour", input)));
    }

    let hour = input
        .parse::<u32>()
        .map_err(|err| InvalidRangeError::new(format!("'{}' is not an hour: {}", input, err)))?;

    if hour > 23 {
        return Err(InvalidRangeError::new(format!(
            "hour {} is outside of 00-23",
            hour
        )));
    }

    Ok(hour)
}
