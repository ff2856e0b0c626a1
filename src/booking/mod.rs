use std::sync::Arc;

use chrono::{ DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc };
use log::warn;

use crate::error::CoreError;
use crate::models::core::AppointmentStatus;
use crate::storage::Storage;

const SLOT_LABEL_FORMAT: &str = "%I:%M %p";

#[derive(Clone, Debug, PartialEq)]
pub enum SlotDecision {
    Free,
    Conflict {
        alternatives: Vec<String>,
    },
}

/// Guards the shared appointment calendar: no two non-cancelled appointments
/// may sit strictly within the collision window of each other.
pub struct BookingGuard {
    storage: Arc<dyn Storage>,
    window: Duration,
    slots: Vec<(String, NaiveTime)>,
}

impl BookingGuard {
    pub fn new(storage: Arc<dyn Storage>, window_minutes: i64, slot_labels: &[String]) -> Self {
        let mut slots = Vec::new();
        for label in slot_labels {
            let label = label.trim();
            if label.is_empty() {
                continue;
            }
            match NaiveTime::parse_from_str(label, SLOT_LABEL_FORMAT) {
                Ok(time) => slots.push((label.to_string(), time)),
                Err(e) => warn!("Ignoring unparseable booking slot '{}': {}", label, e),
            }
        }
        Self {
            storage,
            window: Duration::minutes(window_minutes),
            slots,
        }
    }

    /// Admit or reject a proposed instant. Rejection is an expected, frequent
    /// outcome and therefore a normal return value. `exclude` lets a
    /// reschedule skip the appointment being moved so a no-op reschedule
    /// passes.
    pub async fn check(
        &self,
        proposed: DateTime<Utc>,
        exclude: Option<&str>
    ) -> Result<SlotDecision, CoreError> {
        let occupied = self.occupied_instants(exclude).await?;
        let collision = occupied.iter().any(|instant| self.within_window(*instant, proposed));
        if !collision {
            return Ok(SlotDecision::Free);
        }

        let alternatives = self.free_slots(proposed.date_naive(), &occupied);
        Ok(SlotDecision::Conflict { alternatives })
    }

    /// Offered slot labels for a date, minus the ones an existing appointment
    /// collides with.
    pub async fn availability(&self, date: NaiveDate) -> Result<Vec<String>, CoreError> {
        let occupied = self.occupied_instants(None).await?;
        Ok(self.free_slots(date, &occupied))
    }

    async fn occupied_instants(
        &self,
        exclude: Option<&str>
    ) -> Result<Vec<DateTime<Utc>>, CoreError> {
        let appointments = self.storage.list_appointments().await?;
        Ok(
            appointments
                .iter()
                .filter(|a| a.status != AppointmentStatus::Cancelled)
                .filter(|a| Some(a.id.as_str()) != exclude)
                .map(|a| a.datetime)
                .collect()
        )
    }

    fn within_window(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        let gap = if a > b { a - b } else { b - a };
        gap < self.window
    }

    fn free_slots(&self, date: NaiveDate, occupied: &[DateTime<Utc>]) -> Vec<String> {
        self.slots
            .iter()
            .filter(|(_, time)| {
                let instant = Utc.from_utc_datetime(&date.and_time(*time));
                !occupied.iter().any(|existing| self.within_window(*existing, instant))
            })
            .map(|(label, _)| label.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::core::Appointment;
    use crate::storage::MemoryStorage;

    fn slots() -> Vec<String> {
        vec!["8:30 AM".to_string(), "9:00 AM".to_string()]
    }

    fn instant(date: &str, h: u32, m: u32) -> DateTime<Utc> {
        let date: NaiveDate = date.parse().unwrap();
        Utc.from_utc_datetime(&date.and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap()))
    }

    async fn guard_with(appointments: &[Appointment]) -> BookingGuard {
        let storage = Arc::new(MemoryStorage::new());
        for appointment in appointments {
            storage.create_appointment(appointment).await.unwrap();
        }
        BookingGuard::new(storage, 30, &slots())
    }

    #[tokio::test]
    async fn empty_calendar_admits_any_slot() {
        let guard = guard_with(&[]).await;
        let decision = guard.check(instant("2025-06-10", 8, 30), None).await.unwrap();
        assert_eq!(decision, SlotDecision::Free);
    }

    #[tokio::test]
    async fn slot_inside_collision_window_is_rejected_with_alternatives() {
        let booked = Appointment::new(instant("2025-06-10", 8, 30), 60);
        let guard = guard_with(&[booked]).await;

        let decision = guard.check(instant("2025-06-10", 8, 45), None).await.unwrap();
        match decision {
            SlotDecision::Conflict { alternatives } => {
                assert_eq!(alternatives, vec!["9:00 AM".to_string()]);
            }
            SlotDecision::Free => panic!("expected a conflict"),
        }
    }

    #[tokio::test]
    async fn gap_of_exactly_the_window_is_admitted() {
        let booked = Appointment::new(instant("2025-06-10", 8, 30), 60);
        let guard = guard_with(&[booked]).await;

        let decision = guard.check(instant("2025-06-10", 9, 0), None).await.unwrap();
        assert_eq!(decision, SlotDecision::Free);
    }

    #[tokio::test]
    async fn cancelled_appointments_never_count_toward_occupancy() {
        let mut booked = Appointment::new(instant("2025-06-10", 8, 30), 60);
        booked.status = AppointmentStatus::Cancelled;
        let guard = guard_with(&[booked]).await;

        let decision = guard.check(instant("2025-06-10", 8, 30), None).await.unwrap();
        assert_eq!(decision, SlotDecision::Free);
        let available = guard.availability("2025-06-10".parse().unwrap()).await.unwrap();
        assert_eq!(available, slots());
    }

    #[tokio::test]
    async fn reschedule_excludes_the_appointment_being_moved() {
        let booked = Appointment::new(instant("2025-06-10", 8, 30), 60);
        let guard = guard_with(&[booked.clone()]).await;

        // A no-op reschedule of the same appointment passes; anyone else
        // proposing the same instant is rejected.
        let own = guard.check(booked.datetime, Some(&booked.id)).await.unwrap();
        assert_eq!(own, SlotDecision::Free);
        let other = guard.check(booked.datetime, None).await.unwrap();
        assert!(matches!(other, SlotDecision::Conflict { .. }));
    }

    #[tokio::test]
    async fn availability_subtracts_occupied_slots() {
        let booked = Appointment::new(instant("2025-06-10", 8, 30), 60);
        let guard = guard_with(&[booked]).await;

        let available = guard.availability("2025-06-10".parse().unwrap()).await.unwrap();
        assert_eq!(available, vec!["9:00 AM".to_string()]);
        // Another day is unaffected.
        let next_day = guard.availability("2025-06-11".parse().unwrap()).await.unwrap();
        assert_eq!(next_day, slots());
    }

    #[tokio::test]
    async fn unparseable_slot_labels_are_skipped() {
        let storage = Arc::new(MemoryStorage::new());
        let labels = vec!["8:30 AM".to_string(), "nonsense".to_string()];
        let guard = BookingGuard::new(storage, 30, &labels);
        let available = guard.availability("2025-06-10".parse().unwrap()).await.unwrap();
        assert_eq!(available, vec!["8:30 AM".to_string()]);
    }
}
