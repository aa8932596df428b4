// Property-based tests for trigger scheduling behavior

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use proptest::prelude::*;
use trigger_engine::model::{TriggerRecord, TriggerStatus};
use trigger_engine::schedule;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
}

proptest! {
    /// *For any* daily schedule and reference time, the computed next
    /// occurrence is strictly in the future relative to the reference.
    #[test]
    fn property_next_occurrence_strictly_advances(
        minute in 0u32..60,
        hour in 0u32..24,
        offset_seconds in 0i64..(86_400 * 30),
    ) {
        let expression = format!("0 {} {} * * *", minute, hour);
        let from = base_time() + Duration::seconds(offset_seconds);
        let next = schedule::next_occurrence(&expression, Tz::UTC, from).unwrap();
        prop_assert!(next > from);
    }

    /// *For any* recurring trigger, consecutive outcomes produce strictly
    /// increasing due times: a trigger can never reschedule into its past.
    #[test]
    fn property_rescheduling_keeps_advancing(
        minute in 0u32..60,
        offset_seconds in 0i64..86_400,
        succeed in any::<bool>(),
    ) {
        let expression = format!("0 {} * * * *", minute);
        let created = base_time();
        let mut record = TriggerRecord::cron(expression, Tz::UTC, created).unwrap();
        let first_due = record.next_run_at.unwrap();

        let outcome_at = first_due + Duration::seconds(offset_seconds);
        if succeed {
            record.on_success(outcome_at).unwrap();
        } else {
            record.on_error(outcome_at).unwrap();
        }

        let next_due = record.next_run_at.unwrap();
        prop_assert!(next_due > outcome_at);
        prop_assert!(next_due > first_due);
        prop_assert_eq!(record.status, TriggerStatus::Idle);
        prop_assert!(record.is_active);
    }

    /// *For any* record state, the record is due iff it is active, idle, and
    /// carries an elapsed due time.
    #[test]
    fn property_due_iff_active_idle_and_elapsed(
        active in any::<bool>(),
        status_idx in 0usize..5,
        has_due in any::<bool>(),
        due_offset in -3600i64..3600,
    ) {
        let statuses = [
            TriggerStatus::Idle,
            TriggerStatus::Ready,
            TriggerStatus::Processing,
            TriggerStatus::Success,
            TriggerStatus::Error,
        ];
        let now = base_time();
        let due_at = has_due.then(|| now + Duration::seconds(due_offset));

        let mut record = TriggerRecord::one_shot(due_at, now);
        record.is_active = active;
        record.status = statuses[status_idx];

        let expected = active
            && statuses[status_idx] == TriggerStatus::Idle
            && has_due
            && due_offset <= 0;
        prop_assert_eq!(record.is_due(now), expected);
    }

    /// *For any* completion time, a one-shot trigger retires on success and
    /// keeps its schedule state on error.
    #[test]
    fn property_one_shot_terminal_transitions(offset_seconds in 0i64..3600) {
        let now = base_time();
        let completed_at = now + Duration::seconds(offset_seconds);

        let mut succeeded = TriggerRecord::one_shot(Some(now), now);
        succeeded.on_success(completed_at).unwrap();
        prop_assert_eq!(succeeded.status, TriggerStatus::Success);
        prop_assert_eq!(succeeded.next_run_at, None);
        prop_assert!(!succeeded.is_active);
        prop_assert_eq!(succeeded.last_run_at, Some(completed_at));

        let mut failed = TriggerRecord::one_shot(Some(now), now);
        failed.on_error(completed_at).unwrap();
        prop_assert_eq!(failed.status, TriggerStatus::Error);
        prop_assert_eq!(failed.next_run_at, Some(now));
        prop_assert!(failed.is_active);
        prop_assert_eq!(failed.last_run_at, Some(completed_at));
    }
}
