use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, UtcOffset};

use crate::model::Frequency;
use crate::window::in_reminder_window;

/// Throttle state for one candidate, derived from the user's reminder history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleState {
    NoHistory,
    WithinCooldown,
    Eligible,
}

/// Why a candidate was (or was not) cleared for sending.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ThrottleDecision {
    InvalidLeadTime,
    OutsideWindow,
    UnrecognizedFrequency,
    FirstReminder,
    WithinCooldown { elapsed_days: i64, required_days: i64 },
    Eligible { elapsed_days: i64 },
}

impl ThrottleDecision {
    #[must_use]
    pub fn permits_send(self) -> bool {
        matches!(self, Self::FirstReminder | Self::Eligible { .. })
    }

    /// State machine position, `None` when the candidate never reached history evaluation.
    #[must_use]
    pub fn state(self) -> Option<ThrottleState> {
        match self {
            Self::InvalidLeadTime | Self::OutsideWindow => None,
            Self::FirstReminder => Some(ThrottleState::NoHistory),
            Self::WithinCooldown { .. } | Self::UnrecognizedFrequency => {
                Some(ThrottleState::WithinCooldown)
            }
            Self::Eligible { .. } => Some(ThrottleState::Eligible),
        }
    }
}

/// Evaluate the reminder throttle rules in order.
///
/// `last_reminder` is the user's most recent expiry reminder across all kinds;
/// elapsed time is measured in calendar days (UTC) between its date and `today`.
/// An unrecognized frequency never permits a send, not even a first reminder.
#[must_use]
pub fn evaluate_throttle(
    expiry: Date,
    last_reminder: Option<OffsetDateTime>,
    frequency: Frequency,
    lead_time_days: i64,
    today: Date,
) -> ThrottleDecision {
    if lead_time_days <= 0 {
        return ThrottleDecision::InvalidLeadTime;
    }

    if !in_reminder_window(expiry, lead_time_days, today) {
        return ThrottleDecision::OutsideWindow;
    }

    let Some(required_days) = frequency.min_elapsed_days() else {
        return ThrottleDecision::UnrecognizedFrequency;
    };

    let Some(last_reminder) = last_reminder else {
        return ThrottleDecision::FirstReminder;
    };

    let last_date = last_reminder.to_offset(UtcOffset::UTC).date();
    let elapsed_days = (today - last_date).whole_days();
    if elapsed_days >= required_days {
        ThrottleDecision::Eligible { elapsed_days }
    } else {
        ThrottleDecision::WithinCooldown { elapsed_days, required_days }
    }
}

#[must_use]
pub fn should_send(
    expiry: Date,
    last_reminder: Option<OffsetDateTime>,
    frequency: Frequency,
    lead_time_days: i64,
    today: Date,
) -> bool {
    evaluate_throttle(expiry, last_reminder, frequency, lead_time_days, today).permits_send()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use time::macros::{date, datetime};
    use time::Duration;

    use super::*;

    #[test]
    fn first_reminder_inside_window_fires() {
        let decision =
            evaluate_throttle(date!(2024 - 06 - 10), None, Frequency::Weekly, 7, date!(2024 - 06 - 05));
        assert_eq!(decision, ThrottleDecision::FirstReminder);
        assert_eq!(decision.state(), Some(ThrottleState::NoHistory));
        assert!(decision.permits_send());
    }

    #[test]
    fn seventeen_days_out_is_outside_a_seven_day_window() {
        assert!(!should_send(
            date!(2024 - 06 - 10),
            None,
            Frequency::Weekly,
            7,
            date!(2024 - 05 - 20)
        ));
    }

    #[test]
    fn weekly_cadence_waits_seven_days() {
        let last = Some(datetime!(2024-06-01 09:15 UTC));
        let expiry = date!(2024 - 06 - 20);

        let early = evaluate_throttle(expiry, last, Frequency::Weekly, 30, date!(2024 - 06 - 06));
        assert_eq!(early, ThrottleDecision::WithinCooldown { elapsed_days: 5, required_days: 7 });
        assert!(!early.permits_send());

        let due = evaluate_throttle(expiry, last, Frequency::Weekly, 30, date!(2024 - 06 - 08));
        assert_eq!(due, ThrottleDecision::Eligible { elapsed_days: 7 });
        assert!(due.permits_send());
    }

    #[test]
    fn daily_reminder_does_not_repeat_the_same_day() {
        let today = date!(2024 - 06 - 05);
        let sent_today = Some(datetime!(2024-06-05 06:00 UTC));
        assert!(!should_send(date!(2024 - 06 - 10), sent_today, Frequency::Daily, 7, today));
        assert!(should_send(
            date!(2024 - 06 - 10),
            sent_today,
            Frequency::Daily,
            7,
            today + Duration::days(1)
        ));
    }

    #[test]
    fn last_reminder_date_is_taken_in_utc() {
        // 2024-06-04 23:30 at -02:00 is already 2024-06-05 in UTC.
        let last = Some(datetime!(2024-06-04 23:30 -2));
        assert!(!should_send(
            date!(2024 - 06 - 10),
            last,
            Frequency::Daily,
            7,
            date!(2024 - 06 - 05)
        ));
    }

    #[test]
    fn non_positive_lead_time_fails_closed() {
        let today = date!(2024 - 06 - 10);
        assert_eq!(
            evaluate_throttle(today, None, Frequency::Daily, 0, today),
            ThrottleDecision::InvalidLeadTime
        );
        assert!(!should_send(today, None, Frequency::Daily, -3, today));
    }

    #[test]
    fn unrecognized_frequency_fails_closed_with_or_without_history() {
        let today = date!(2024 - 06 - 05);
        let expiry = date!(2024 - 06 - 10);
        for last in [None, Some(datetime!(2024-01-01 00:00 UTC))] {
            let decision = evaluate_throttle(expiry, last, Frequency::Unrecognized, 7, today);
            assert_eq!(decision, ThrottleDecision::UnrecognizedFrequency);
            assert!(!decision.permits_send());
        }
    }

    proptest! {
        #[test]
        fn property_frequency_thresholds(elapsed in 0_i64..=90) {
            let today = date!(2024 - 09 - 01);
            let expiry = today + Duration::days(5);
            let last = Some((today - Duration::days(elapsed)).midnight().assume_utc());

            prop_assert_eq!(should_send(expiry, last, Frequency::Daily, 10, today), elapsed >= 1);
            prop_assert_eq!(should_send(expiry, last, Frequency::Weekly, 10, today), elapsed >= 7);
            prop_assert_eq!(should_send(expiry, last, Frequency::Monthly, 10, today), elapsed >= 28);
            prop_assert!(!should_send(expiry, last, Frequency::Unrecognized, 10, today));
            prop_assert!(!should_send(expiry, None, Frequency::Unrecognized, 10, today));
        }
    }
}
