use time::Date;
use tracing::warn;

use crate::model::{ExpiryValue, TrackedRecord};

/// Result of partitioning one kind's records against its reminder window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowPartition {
    pub expiring: Vec<TrackedRecord>,
    pub paused: Vec<TrackedRecord>,
}

impl WindowPartition {
    pub fn extend(&mut self, other: Self) {
        self.expiring.extend(other.expiring);
        self.paused.extend(other.paused);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expiring.is_empty() && self.paused.is_empty()
    }
}

/// Whole days from `today` until `expiry`; negative once the date has passed.
#[must_use]
pub fn days_until(expiry: Date, today: Date) -> i64 {
    (expiry - today).whole_days()
}

/// `true` when `today` lies in `[expiry - lead_time_days, expiry]`.
#[must_use]
pub fn in_reminder_window(expiry: Date, lead_time_days: i64, today: Date) -> bool {
    (0..=lead_time_days).contains(&days_until(expiry, today))
}

/// Split active records with a usable expiry date into expiring and paused candidates.
///
/// Records without an expiry date, inactive records, and records outside
/// `0 <= days_until_expiry <= lead_time_days` are dropped. Malformed expiry
/// values are skipped with a warning.
#[must_use]
pub fn partition_expiring(
    records: Vec<TrackedRecord>,
    lead_time_days: i64,
    today: Date,
) -> WindowPartition {
    let mut partition = WindowPartition::default();

    for record in records {
        let expiry = match &record.expiry {
            ExpiryValue::Date(date) => *date,
            ExpiryValue::Unset => continue,
            ExpiryValue::Malformed(raw) => {
                warn!(
                    record_id = %record.id,
                    kind = %record.kind(),
                    raw_expiry = %raw,
                    "skipping record with unparseable expiry date"
                );
                continue;
            }
        };

        if !record.active {
            continue;
        }

        let remaining = days_until(expiry, today);
        if !(0..=lead_time_days).contains(&remaining) {
            continue;
        }

        if record.paused {
            partition.paused.push(record);
        } else {
            partition.expiring.push(record);
        }
    }

    partition
}
