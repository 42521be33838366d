use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use chrono_tz::Tz;

use shared_models::Appointment;

use crate::error::AvailabilityError;
use crate::models::{
    check_slot_lengths, format_clock, AvailabilityResult, AvailabilitySummary, AvailableSlot,
    DayAvailability, SlotConfiguration, TimeWindow, DATE_FORMAT,
};

pub const NO_SLOTS_MESSAGE: &str = "No slots available for this date";

/// Per-date availability for already-resolved dates. Performs no I/O.
///
/// Appointments are placed on the doctor's wall clock: they only count towards
/// the local day they fall on, and cancelled appointments or appointments
/// belonging to another doctor are ignored.
pub fn compute_availability(
    config: &SlotConfiguration,
    dates: &[NaiveDate],
    existing_appointments: &[Appointment],
) -> Result<AvailabilityResult, AvailabilityError> {
    let tz = config
        .validate()
        .and_then(|()| config.time_zone())
        .map_err(|err| AvailabilityError::CorruptConfiguration {
            doctor_id: config.doctor_id,
            reason: err.to_string(),
        })?;

    let booked = bookings_by_day(config, tz, existing_appointments);
    let empty = DayBookings::default();

    let days = dates
        .iter()
        .map(|date| compute_day(config, *date, booked.get(date).unwrap_or(&empty)))
        .collect::<Result<Vec<_>, _>>()?;

    let summary = AvailabilitySummary::from_days(&days);

    Ok(AvailabilityResult {
        doctor_id: config.doctor_id,
        timezone: config.timezone.clone(),
        duration: config.duration,
        buffer_time: config.buffer_time,
        days,
        summary,
    })
}

/// Windows in effect for `date`: a specific-date entry wins over the weekly schedule.
pub fn resolve_base_windows(config: &SlotConfiguration, date: NaiveDate) -> &[TimeWindow] {
    if let Some(specific) = config.specific_date(date) {
        return if specific.enabled { specific.slots.as_slice() } else { &[] };
    }

    match config.weekly_schedule(date) {
        Some(day) if day.enabled => day.slots.as_slice(),
        _ => &[],
    }
}

/// Candidate slot starts in window declaration order, then generation order.
pub fn generate_candidate_slots(
    windows: &[TimeWindow],
    duration: u32,
    buffer_time: u32,
) -> Result<Vec<AvailableSlot>, AvailabilityError> {
    check_slot_lengths(duration, buffer_time).map_err(AvailabilityError::InvalidConfiguration)?;
    let step = duration + buffer_time;
    let mut slots = Vec::new();

    for window in windows {
        let (start, end) = window.as_minutes()?;
        let mut current = start;

        while let Some(slot_end) = current.checked_add(duration).filter(|slot_end| *slot_end <= end) {
            slots.push(AvailableSlot {
                start_time: format_clock(current),
                end_time: format_clock(slot_end),
            });
            current += step;
        }
    }

    Ok(slots)
}

#[derive(Default)]
struct DayBookings {
    count: usize,
    start_times: HashSet<String>,
}

fn bookings_by_day(
    config: &SlotConfiguration,
    tz: Tz,
    appointments: &[Appointment],
) -> HashMap<NaiveDate, DayBookings> {
    let mut by_day: HashMap<NaiveDate, DayBookings> = HashMap::new();

    for appointment in appointments {
        if !appointment.status.occupies_slot() {
            continue;
        }
        if appointment.doctor_id.is_some_and(|id| id != config.doctor_id) {
            continue;
        }

        let bookings = by_day.entry(appointment.local_day(&tz)).or_default();
        bookings.count += 1;
        bookings.start_times.insert(appointment.local_time_of_day(&tz));
    }

    by_day
}

fn compute_day(
    config: &SlotConfiguration,
    date: NaiveDate,
    bookings: &DayBookings,
) -> Result<DayAvailability, AvailabilityError> {
    let date_label = date.format(DATE_FORMAT).to_string();
    let windows = resolve_base_windows(config, date);

    if windows.is_empty() {
        return Ok(DayAvailability {
            date: date_label,
            available_slots: Vec::new(),
            total_slots: 0,
            booked_slots: bookings.count,
            remaining_slots: 0,
            daily_limit_reached: limit_reached(config, bookings.count),
            max_bookings_per_day: config.max_bookings_per_day,
            message: Some(NO_SLOTS_MESSAGE.to_string()),
        });
    }

    let candidates = generate_candidate_slots(windows, config.duration, config.buffer_time)?;
    let total_slots = candidates.len();
    let daily_limit_reached = limit_reached(config, bookings.count);

    let available_slots: Vec<AvailableSlot> = if daily_limit_reached {
        Vec::new()
    } else {
        candidates
            .into_iter()
            .filter(|slot| !bookings.start_times.contains(&slot.start_time))
            .collect()
    };

    Ok(DayAvailability {
        date: date_label,
        remaining_slots: available_slots.len(),
        available_slots,
        total_slots,
        booked_slots: bookings.count,
        daily_limit_reached,
        max_bookings_per_day: config.max_bookings_per_day,
        message: None,
    })
}

fn limit_reached(config: &SlotConfiguration, booked: usize) -> bool {
    config
        .max_bookings_per_day
        .is_some_and(|cap| booked >= cap as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::models::{AvailabilitySettings, DayOfWeek, DaySchedule, SpecificDate};
    use chrono::{TimeZone, Utc};
    use shared_models::{AppointmentStatus, AppointmentType};
    use uuid::Uuid;

    fn monday() -> NaiveDate {
        // 2025-01-06 is a Monday.
        NaiveDate::from_ymd_opt(2025, 1, 6).unwrap()
    }

    fn config(windows: Vec<TimeWindow>) -> SlotConfiguration {
        let mut availability = AvailabilitySettings::default();
        availability.schedule.insert(
            DayOfWeek::Monday,
            DaySchedule {
                enabled: true,
                slots: windows,
            },
        );
        SlotConfiguration {
            doctor_id: Uuid::new_v4(),
            duration: 30,
            buffer_time: 0,
            max_bookings_per_day: None,
            timezone: "UTC".to_string(),
            availability,
            updated_by: None,
            updated_at: None,
        }
    }

    fn appointment(doctor_id: Uuid, hour: u32, minute: u32) -> Appointment {
        let now = Utc::now();
        Appointment {
            id: Uuid::new_v4(),
            reference: None,
            date: Utc.with_ymd_and_hms(2025, 1, 6, hour, minute, 0).unwrap(),
            patient_id: Uuid::new_v4(),
            doctor_id: Some(doctor_id),
            status: AppointmentStatus::Booked,
            appointment_type: AppointmentType::Consultation,
            additional_info: None,
            created_by: None,
            updated_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn starts(slots: &[AvailableSlot]) -> Vec<&str> {
        slots.iter().map(|slot| slot.start_time.as_str()).collect()
    }

    #[test]
    fn steps_by_duration_plus_buffer() {
        let slots = generate_candidate_slots(&[TimeWindow::new("09:00", "10:30")], 20, 10).unwrap();
        assert_eq!(starts(&slots), vec!["09:00", "09:30", "10:00"]);
        assert_eq!(slots[2].end_time, "10:20");
    }

    #[test]
    fn slot_must_fit_before_window_end() {
        let slots = generate_candidate_slots(&[TimeWindow::new("09:00", "09:50")], 30, 0).unwrap();
        assert_eq!(starts(&slots), vec!["09:00"]);
    }

    #[test]
    fn windows_keep_declaration_order() {
        let slots = generate_candidate_slots(
            &[TimeWindow::new("14:00", "15:00"), TimeWindow::new("09:00", "10:00")],
            30,
            0,
        )
        .unwrap();
        assert_eq!(starts(&slots), vec!["14:00", "14:30", "09:00", "09:30"]);
    }

    #[test]
    fn booked_slot_is_excluded() {
        let config = config(vec![TimeWindow::new("09:00", "10:00")]);
        let result = compute_availability(&config, &[monday()], &[appointment(config.doctor_id, 9, 30)]).unwrap();

        let day = &result.days[0];
        assert_eq!(starts(&day.available_slots), vec!["09:00"]);
        assert_eq!(day.total_slots, 2);
        assert_eq!(day.booked_slots, 1);
        assert_eq!(day.remaining_slots, 1);
        assert!(!day.daily_limit_reached);
        assert!(day.message.is_none());
    }

    #[test]
    fn disabled_specific_date_overrides_enabled_weekday() {
        let mut config = config(vec![TimeWindow::new("09:00", "12:00")]);
        config.availability.specific_dates.push(SpecificDate {
            date: "2025-01-06".to_string(),
            enabled: false,
            slots: vec![TimeWindow::new("09:00", "12:00")],
        });

        let result = compute_availability(&config, &[monday()], &[]).unwrap();
        assert!(result.days[0].available_slots.is_empty());
        assert_eq!(result.days[0].message.as_deref(), Some(NO_SLOTS_MESSAGE));
    }

    #[test]
    fn enabled_specific_date_replaces_weekly_windows() {
        let mut config = config(vec![TimeWindow::new("09:00", "12:00")]);
        config.availability.specific_dates.push(SpecificDate {
            date: "2025-01-06".to_string(),
            enabled: true,
            slots: vec![TimeWindow::new("16:00", "17:00")],
        });

        let result = compute_availability(&config, &[monday()], &[]).unwrap();
        assert_eq!(starts(&result.days[0].available_slots), vec!["16:00", "16:30"]);
    }

    #[test]
    fn unconfigured_weekday_yields_message() {
        let config = config(vec![TimeWindow::new("09:00", "12:00")]);
        let tuesday = monday().succ_opt().unwrap();

        let result = compute_availability(&config, &[tuesday], &[]).unwrap();
        assert_eq!(result.days[0].total_slots, 0);
        assert_eq!(result.days[0].message.as_deref(), Some(NO_SLOTS_MESSAGE));
    }

    #[test]
    fn cap_empties_the_day() {
        let mut config = config(vec![TimeWindow::new("09:00", "12:00")]);
        config.max_bookings_per_day = Some(2);
        let appointments = vec![
            appointment(config.doctor_id, 9, 0),
            appointment(config.doctor_id, 11, 0),
        ];

        let day = &compute_availability(&config, &[monday()], &appointments).unwrap().days[0];
        assert!(day.daily_limit_reached);
        assert!(day.available_slots.is_empty());
        assert_eq!(day.total_slots, 6);
        assert_eq!(day.remaining_slots, 0);
    }

    #[test]
    fn appointments_on_other_days_do_not_exclude_slots() {
        let config = config(vec![TimeWindow::new("09:00", "10:00")]);
        let mut other_day = appointment(config.doctor_id, 9, 0);
        other_day.date = Utc.with_ymd_and_hms(2025, 1, 13, 9, 0, 0).unwrap();

        let day = &compute_availability(&config, &[monday()], &[other_day]).unwrap().days[0];
        assert_eq!(day.booked_slots, 0);
        assert_eq!(starts(&day.available_slots), vec!["09:00", "09:30"]);
    }

    #[test]
    fn cancelled_and_foreign_appointments_are_ignored() {
        let config = config(vec![TimeWindow::new("09:00", "10:00")]);
        let mut cancelled = appointment(config.doctor_id, 9, 0);
        cancelled.status = AppointmentStatus::Cancelled;
        let foreign = appointment(Uuid::new_v4(), 9, 30);

        let day = &compute_availability(&config, &[monday()], &[cancelled, foreign]).unwrap().days[0];
        assert_eq!(day.booked_slots, 0);
        assert_eq!(day.remaining_slots, 2);
    }

    #[test]
    fn summary_rolls_up_days() {
        let config = config(vec![TimeWindow::new("09:00", "10:00")]);
        let dates = [monday(), monday().succ_opt().unwrap()];

        let result = compute_availability(&config, &dates, &[appointment(config.doctor_id, 9, 0)]).unwrap();
        assert_eq!(
            result.summary,
            AvailabilitySummary {
                total_dates: 2,
                total_available_slots: 1,
                total_possible_slots: 2,
                total_booked_slots: 1,
                dates_with_availability: 1,
                dates_without_availability: 1,
            }
        );
    }

    #[test]
    fn oversized_slots_never_overflow() {
        assert_matches!(
            generate_candidate_slots(&[TimeWindow::new("09:00", "17:00")], u32::MAX, 1),
            Err(AvailabilityError::InvalidConfiguration(_))
        );

        let whole_day = generate_candidate_slots(&[TimeWindow::new("00:00", "23:59")], 1439, 1).unwrap();
        assert_eq!(starts(&whole_day), vec!["00:00"]);
    }

    #[test]
    fn corrupt_stored_configuration_is_reported_not_computed() {
        let mut config = config(vec![TimeWindow::new("09:00", "17:00")]);
        config.duration = u32::MAX;
        config.buffer_time = 1;

        assert_matches!(
            compute_availability(&config, &[monday()], &[]),
            Err(AvailabilityError::CorruptConfiguration { doctor_id, .. }) if doctor_id == config.doctor_id
        );
    }

    #[test]
    fn appointments_are_read_on_the_doctors_clock() {
        let mut config = config(vec![TimeWindow::new("09:00", "11:00")]);
        config.timezone = "Africa/Lagos".to_string();

        // 08:30 UTC is 09:30 in Lagos (UTC+1).
        let booked = appointment(config.doctor_id, 8, 30);
        let day = &compute_availability(&config, &[monday()], &[booked]).unwrap().days[0];

        assert_eq!(day.booked_slots, 1);
        assert_eq!(starts(&day.available_slots), vec!["09:00", "10:00", "10:30"]);
    }

    #[test]
    fn late_utc_appointment_lands_on_the_next_local_day() {
        let mut config = config(vec![TimeWindow::new("09:00", "10:00")]);
        config.timezone = "Asia/Tokyo".to_string();

        // Sunday 2025-01-05 23:30 UTC is Monday 08:30 in Tokyo.
        let mut sunday_night = appointment(config.doctor_id, 23, 30);
        sunday_night.date = Utc.with_ymd_and_hms(2025, 1, 5, 23, 30, 0).unwrap();

        let day = &compute_availability(&config, &[monday()], &[sunday_night]).unwrap().days[0];
        assert_eq!(day.booked_slots, 1);
        assert_eq!(day.remaining_slots, 2);
    }
}
