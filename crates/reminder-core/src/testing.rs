use std::cell::RefCell;
use std::collections::BTreeSet;

use time::OffsetDateTime;

use crate::mail::{Mailer, OutboundEmail};
use crate::model::{
    AuditCategory, ExpiryValue, Frequency, HolderDetails, LicenseKind, RecordDetails, RecordId,
    ReminderAuditRecord, ReminderPolicy, Subscriber, SubscriptionStatus, TrackedRecord, UserId,
};
use crate::store::ReminderStore;
use crate::ReminderError;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    pub subscribers: Vec<Subscriber>,
    pub records: Vec<TrackedRecord>,
    pub policies: Vec<ReminderPolicy>,
    pub audit: Vec<ReminderAuditRecord>,
    pub failing_kinds: BTreeSet<LicenseKind>,
    pub fail_policies: bool,
    pub fail_subscribers: bool,
    pub fail_last_reminder_for: BTreeSet<UserId>,
    pub fail_append_for: BTreeSet<RecordId>,
}

impl ReminderStore for InMemoryStore {
    fn active_subscribers(&self) -> Result<Vec<Subscriber>, ReminderError> {
        if self.fail_subscribers {
            return Err(ReminderError::Store("subscribers unavailable".to_string()));
        }
        Ok(self.subscribers.clone())
    }

    fn records_for(
        &self,
        user_id: &UserId,
        kind: LicenseKind,
    ) -> Result<Vec<TrackedRecord>, ReminderError> {
        if self.failing_kinds.contains(&kind) {
            return Err(ReminderError::Store(format!("{} table unavailable", kind.as_str())));
        }
        Ok(self
            .records
            .iter()
            .filter(|record| record.user_id == *user_id && record.kind() == kind)
            .cloned()
            .collect())
    }

    fn policies_for(&self, user_id: &UserId) -> Result<Vec<ReminderPolicy>, ReminderError> {
        if self.fail_policies {
            return Err(ReminderError::Store("policies unavailable".to_string()));
        }
        Ok(self.policies.iter().filter(|policy| policy.user_id == *user_id).cloned().collect())
    }

    fn last_reminder_for(&self, user_id: &UserId) -> Result<Option<OffsetDateTime>, ReminderError> {
        if self.fail_last_reminder_for.contains(user_id) {
            return Err(ReminderError::Store("audit log unavailable".to_string()));
        }
        Ok(self
            .audit
            .iter()
            .filter(|entry| entry.user_id == *user_id && entry.category == AuditCategory::Expiry)
            .map(|entry| entry.created_at)
            .max())
    }

    fn pause_notice_since(
        &self,
        user_id: &UserId,
        record_id: &RecordId,
        since: OffsetDateTime,
    ) -> Result<bool, ReminderError> {
        Ok(self.audit.iter().any(|entry| {
            entry.user_id == *user_id
                && entry.record_id == *record_id
                && entry.category == AuditCategory::Pause
                && entry.created_at >= since
        }))
    }

    fn append_audit(&mut self, entry: &ReminderAuditRecord) -> Result<(), ReminderError> {
        if self.fail_append_for.contains(&entry.record_id) {
            return Err(ReminderError::Store("audit insert rejected".to_string()));
        }
        self.audit.push(entry.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: RefCell<Vec<OutboundEmail>>,
    fail_for: BTreeSet<String>,
}

impl RecordingMailer {
    pub fn failing_for(address: &str) -> Self {
        Self { sent: RefCell::default(), fail_for: BTreeSet::from([address.to_string()]) }
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.borrow().clone()
    }
}

impl Mailer for RecordingMailer {
    fn deliver(&self, email: &OutboundEmail) -> Result<(), ReminderError> {
        if self.fail_for.contains(&email.to) {
            return Err(ReminderError::Delivery("connection refused".to_string()));
        }
        self.sent.borrow_mut().push(email.clone());
        Ok(())
    }
}

pub fn mk_subscriber(user: &str) -> Subscriber {
    Subscriber {
        user_id: UserId(user.to_string()),
        email: format!("{user}@example.com"),
        display_name: Some(format!("User {user}")),
        subscription_status: SubscriptionStatus::Active,
        subscription_end: None,
    }
}

pub fn mk_policy(user: &str, kind: LicenseKind, lead: i64, frequency: Frequency) -> ReminderPolicy {
    ReminderPolicy {
        user_id: UserId(user.to_string()),
        kind,
        enabled: true,
        lead_time_days: lead,
        frequency,
    }
}

pub fn mk_record(id: &str, user: &str, kind: LicenseKind, expiry: &str, paused: bool) -> TrackedRecord {
    let details = RecordDetails::from_columns(kind, |_| None);
    let details = match details {
        RecordDetails::Passport(_) => RecordDetails::Passport(HolderDetails {
            first_name: Some("Test".to_string()),
            last_name: Some("Holder".to_string()),
            document_number: Some(id.to_uppercase()),
        }),
        other => other,
    };
    TrackedRecord {
        id: RecordId(id.to_string()),
        user_id: UserId(user.to_string()),
        expiry: ExpiryValue::parse(Some(expiry)),
        active: true,
        paused,
        paused_at: None,
        details,
    }
}
