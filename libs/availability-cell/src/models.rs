use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AvailabilityError;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// No slot, and no slot plus its buffer, may be longer than a day.
pub const MINUTES_PER_DAY: u32 = 24 * 60;

// ==============================================================================
// SLOT CONFIGURATION
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl From<Weekday> for DayOfWeek {
    fn from(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Sun => DayOfWeek::Sunday,
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
        }
    }
}

/// A `[start, end)` window of clock time, both ends as `HH:MM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: String,
    pub end: String,
}

impl TimeWindow {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Window bounds as minutes from midnight.
    pub fn as_minutes(&self) -> Result<(u32, u32), AvailabilityError> {
        Ok((parse_clock(&self.start)?, parse_clock(&self.end)?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub slots: Vec<TimeWindow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecificDate {
    pub date: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub slots: Vec<TimeWindow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySettings {
    #[serde(default)]
    pub schedule: BTreeMap<DayOfWeek, DaySchedule>,
    #[serde(default)]
    pub specific_dates: Vec<SpecificDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotConfiguration {
    pub doctor_id: Uuid,
    /// Minutes per appointment slot.
    pub duration: u32,
    /// Idle minutes between consecutive slots.
    #[serde(default)]
    pub buffer_time: u32,
    #[serde(default)]
    pub max_bookings_per_day: Option<u32>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub availability: AvailabilitySettings,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl SlotConfiguration {
    /// Checks everything a stored configuration must satisfy before it is saved.
    pub fn validate(&self) -> Result<(), AvailabilityError> {
        check_slot_lengths(self.duration, self.buffer_time).map_err(invalid)?;
        self.time_zone()?;

        for (day, schedule) in &self.availability.schedule {
            validate_windows(&schedule.slots)
                .map_err(|reason| invalid(format!("{:?}: {}", day, reason)))?;
        }

        let mut seen = HashSet::new();
        for specific in &self.availability.specific_dates {
            parse_date(&specific.date)
                .map_err(|_| invalid(format!("specific date '{}' is not YYYY-MM-DD", specific.date)))?;

            if !seen.insert(specific.date.as_str()) {
                return Err(invalid(format!("specific date '{}' is listed twice", specific.date)));
            }

            validate_windows(&specific.slots)
                .map_err(|reason| invalid(format!("{}: {}", specific.date, reason)))?;
        }

        Ok(())
    }

    /// The doctor's IANA timezone; slot windows and appointment times are read on its wall clock.
    pub fn time_zone(&self) -> Result<Tz, AvailabilityError> {
        self.timezone
            .trim()
            .parse::<Tz>()
            .map_err(|_| invalid(format!("'{}' is not an IANA timezone", self.timezone)))
    }

    pub fn specific_date(&self, date: NaiveDate) -> Option<&SpecificDate> {
        let key = date.format(DATE_FORMAT).to_string();
        self.availability
            .specific_dates
            .iter()
            .find(|entry| entry.date == key)
    }

    pub fn weekly_schedule(&self, date: NaiveDate) -> Option<&DaySchedule> {
        self.availability
            .schedule
            .get(&DayOfWeek::from(date.weekday()))
    }
}

fn invalid(reason: String) -> AvailabilityError {
    AvailabilityError::InvalidConfiguration(reason)
}

pub fn check_slot_lengths(duration: u32, buffer_time: u32) -> Result<(), String> {
    if duration == 0 {
        return Err("duration must be greater than zero".to_string());
    }

    match duration.checked_add(buffer_time) {
        Some(step) if step <= MINUTES_PER_DAY => Ok(()),
        _ => Err(format!(
            "duration plus buffer_time must not exceed {} minutes",
            MINUTES_PER_DAY
        )),
    }
}

fn validate_windows(windows: &[TimeWindow]) -> Result<(), String> {
    let mut bounds = Vec::with_capacity(windows.len());
    for window in windows {
        let (start, end) = window
            .as_minutes()
            .map_err(|_| format!("window {}-{} is not HH:MM", window.start, window.end))?;
        if start >= end {
            return Err(format!("window {}-{} must start before it ends", window.start, window.end));
        }
        bounds.push((start, end));
    }

    bounds.sort_unstable();
    if bounds.windows(2).any(|pair| pair[1].0 < pair[0].1) {
        return Err("windows overlap".to_string());
    }

    Ok(())
}

/// Parses `HH:MM` (or `HH:MM:SS`, as returned by Postgres `time` columns) into minutes from midnight.
pub fn parse_clock(value: &str) -> Result<u32, AvailabilityError> {
    let time = NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| invalid(format!("'{}' is not a valid HH:MM time", value)))?;

    Ok(time.hour() * 60 + time.minute())
}

pub fn format_clock(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

pub fn parse_date(value: &str) -> Result<NaiveDate, AvailabilityError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|_| AvailabilityError::InvalidDateFormat(value.to_string()))
}

// ==============================================================================
// DATE SELECTION
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateSelector {
    Dates(Vec<String>),
    /// Inclusive on both ends.
    Range { from: String, to: String },
}

impl DateSelector {
    /// Builds a selector from query parameters. An explicit date list wins over a range.
    pub fn from_query(query: &AvailabilityQuery) -> Result<Self, AvailabilityError> {
        if let Some(dates) = query.dates.as_deref() {
            let dates: Vec<String> = dates
                .split(',')
                .map(str::trim)
                .filter(|date| !date.is_empty())
                .map(str::to_string)
                .collect();

            if !dates.is_empty() {
                return Ok(DateSelector::Dates(dates));
            }
        }

        match (query.from.as_deref(), query.to.as_deref()) {
            (Some(from), Some(to)) => Ok(DateSelector::Range {
                from: from.to_string(),
                to: to.to_string(),
            }),
            _ => Err(AvailabilityError::MissingDateSelector),
        }
    }

    /// Materializes the selector into UTC calendar days.
    pub fn resolve(&self, max_range_days: u32) -> Result<Vec<NaiveDate>, AvailabilityError> {
        match self {
            DateSelector::Dates(dates) => {
                let mut seen = HashSet::new();
                let mut days = Vec::with_capacity(dates.len());
                for date in dates {
                    let day = parse_date(date)?;
                    if seen.insert(day) {
                        days.push(day);
                    }
                }

                let (Some(first), Some(last)) = (days.iter().min(), days.iter().max()) else {
                    return Err(AvailabilityError::MissingDateSelector);
                };

                let span = (*last - *first).num_days() + 1;
                if span > i64::from(max_range_days) {
                    return Err(AvailabilityError::InvalidDateRange(format!(
                        "dates span {} days, the maximum is {}",
                        span, max_range_days
                    )));
                }

                Ok(days)
            }
            DateSelector::Range { from, to } => {
                let start = parse_date(from)?;
                let end = parse_date(to)?;

                if start >= end {
                    return Err(AvailabilityError::InvalidDateRange(format!(
                        "'from' ({}) must be before 'to' ({})",
                        from, to
                    )));
                }

                let span = (end - start).num_days() + 1;
                if span > i64::from(max_range_days) {
                    return Err(AvailabilityError::InvalidDateRange(format!(
                        "range covers {} days, the maximum is {}",
                        span, max_range_days
                    )));
                }

                Ok((0..span).map(|offset| start + Duration::days(offset)).collect())
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AvailabilityQuery {
    /// Comma-separated `YYYY-MM-DD` list.
    pub dates: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

// ==============================================================================
// AVAILABILITY RESULTS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableSlot {
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayAvailability {
    pub date: String,
    pub available_slots: Vec<AvailableSlot>,
    pub total_slots: usize,
    pub booked_slots: usize,
    pub remaining_slots: usize,
    pub daily_limit_reached: bool,
    pub max_bookings_per_day: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySummary {
    pub total_dates: usize,
    pub total_available_slots: usize,
    pub total_possible_slots: usize,
    pub total_booked_slots: usize,
    pub dates_with_availability: usize,
    pub dates_without_availability: usize,
}

impl AvailabilitySummary {
    pub fn from_days(days: &[DayAvailability]) -> Self {
        days.iter().fold(Self::default(), |mut summary, day| {
            summary.total_dates += 1;
            summary.total_available_slots += day.available_slots.len();
            summary.total_possible_slots += day.total_slots;
            summary.total_booked_slots += day.booked_slots;
            if day.available_slots.is_empty() {
                summary.dates_without_availability += 1;
            } else {
                summary.dates_with_availability += 1;
            }
            summary
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityResult {
    pub doctor_id: Uuid,
    pub timezone: String,
    pub duration: u32,
    pub buffer_time: u32,
    pub days: Vec<DayAvailability>,
    pub summary: AvailabilitySummary,
}

// ==============================================================================
// REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSlotConfigurationRequest {
    pub duration: u32,
    #[serde(default)]
    pub buffer_time: u32,
    #[serde(default)]
    pub max_bookings_per_day: Option<u32>,
    pub timezone: String,
    #[serde(default)]
    pub availability: AvailabilitySettings,
}

impl UpdateSlotConfigurationRequest {
    pub fn into_configuration(self, doctor_id: Uuid, updated_by: &str) -> SlotConfiguration {
        SlotConfiguration {
            doctor_id,
            duration: self.duration,
            buffer_time: self.buffer_time,
            max_bookings_per_day: self.max_bookings_per_day,
            timezone: self.timezone,
            availability: self.availability,
            updated_by: Some(updated_by.to_string()),
            updated_at: Some(Utc::now()),
        }
    }
}
