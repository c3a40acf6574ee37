use time::OffsetDateTime;

use crate::model::{
    LicenseKind, RecordId, ReminderAuditRecord, ReminderPolicy, Subscriber, TrackedRecord, UserId,
};
use crate::ReminderError;

/// Read/append access to the record store used by a reminder run.
///
/// Implementations convert raw rows into typed records at this boundary.
/// The engine never updates or deletes through this trait.
pub trait ReminderStore {
    /// Subscribers whose subscription status is `active`.
    ///
    /// # Errors
    /// Returns [`ReminderError::Store`] when subscribers cannot be listed.
    fn active_subscribers(&self) -> Result<Vec<Subscriber>, ReminderError>;

    /// All tracked records of one kind owned by `user_id`.
    ///
    /// # Errors
    /// Returns [`ReminderError::Store`] when the kind's table cannot be read.
    fn records_for(
        &self,
        user_id: &UserId,
        kind: LicenseKind,
    ) -> Result<Vec<TrackedRecord>, ReminderError>;

    /// Every reminder policy row stored for `user_id`.
    ///
    /// # Errors
    /// Returns [`ReminderError::Store`] when policies cannot be read.
    fn policies_for(&self, user_id: &UserId) -> Result<Vec<ReminderPolicy>, ReminderError>;

    /// Timestamp of the most recent expiry reminder sent to `user_id`, across all kinds.
    ///
    /// # Errors
    /// Returns [`ReminderError::Store`] when the audit log cannot be queried.
    fn last_reminder_for(&self, user_id: &UserId) -> Result<Option<OffsetDateTime>, ReminderError>;

    /// Whether a pause notice for this exact record was logged at or after `since`.
    ///
    /// # Errors
    /// Returns [`ReminderError::Store`] when the audit log cannot be queried.
    fn pause_notice_since(
        &self,
        user_id: &UserId,
        record_id: &RecordId,
        since: OffsetDateTime,
    ) -> Result<bool, ReminderError>;

    /// Append one audit record.
    ///
    /// # Errors
    /// Returns [`ReminderError::Store`] when the insert fails.
    fn append_audit(&mut self, entry: &ReminderAuditRecord) -> Result<(), ReminderError>;
}
