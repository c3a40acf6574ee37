use std::collections::BTreeMap;

use time::{Duration, OffsetDateTime};
use tracing::warn;

use crate::model::{LicenseKind, RecordId, ReminderPolicy, TrackedRecord, UserId};
use crate::store::ReminderStore;
use crate::ReminderError;

/// Rolling window in which a paused record receives at most one pause notice.
pub const PAUSE_NOTICE_WINDOW_DAYS: i64 = 5;

/// Everything the engine needs to know about one user for a run.
#[derive(Debug, Clone, Default)]
pub struct UserRecords {
    pub policies: BTreeMap<LicenseKind, ReminderPolicy>,
    pub records_by_kind: BTreeMap<LicenseKind, Vec<TrackedRecord>>,
}

impl UserRecords {
    /// Policy for `kind` when one exists and is enabled.
    #[must_use]
    pub fn enabled_policy(&self, kind: LicenseKind) -> Option<&ReminderPolicy> {
        self.policies.get(&kind).filter(|policy| policy.enabled)
    }
}

/// Load a user's policies and records for every tracked kind.
///
/// A failure reading one kind yields an empty list for that kind; a failure
/// reading policies yields no policies, which disables every kind.
pub fn fetch_user_records<S>(store: &S, user_id: &UserId) -> UserRecords
where
    S: ReminderStore + ?Sized,
{
    let policies = match store.policies_for(user_id) {
        Ok(policies) => policies
            .into_iter()
            .filter(|policy| policy.user_id == *user_id)
            .map(|policy| (policy.kind, policy))
            .collect(),
        Err(err) => {
            warn!(user_id = %user_id, error = %err, "failed to read reminder policies; treating all kinds as disabled");
            BTreeMap::new()
        }
    };

    let mut records_by_kind = BTreeMap::new();
    for kind in LicenseKind::ALL {
        let records = match store.records_for(user_id, kind) {
            Ok(records) => records,
            Err(err) => {
                warn!(user_id = %user_id, kind = %kind, error = %err, "failed to read records; continuing without them");
                Vec::new()
            }
        };
        records_by_kind.insert(kind, records);
    }

    UserRecords { policies, records_by_kind }
}

/// `true` when a pause notice for this record was logged within the last
/// [`PAUSE_NOTICE_WINDOW_DAYS`] days.
///
/// # Errors
/// Propagates store errors from the audit lookup.
pub fn already_notified_pause<S>(
    store: &S,
    user_id: &UserId,
    record_id: &RecordId,
    now: OffsetDateTime,
) -> Result<bool, ReminderError>
where
    S: ReminderStore + ?Sized,
{
    store.pause_notice_since(user_id, record_id, now - Duration::days(PAUSE_NOTICE_WINDOW_DAYS))
}
