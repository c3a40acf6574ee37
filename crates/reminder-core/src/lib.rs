//! Decision engine for license renewal reminders.
//!
//! A run walks every active subscriber, keeps the records inside each enabled
//! kind's lead-time window, applies the user's reminder cadence, and sends at
//! most one email per user. Every delivered item (or failed attempt) is appended
//! to the reminder audit log, which doubles as the throttle history.

pub mod fetch;
pub mod mail;
pub mod model;
pub mod run;
pub mod store;
pub mod throttle;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ReminderError {
    #[error("store error: {0}")]
    Store(String),
    #[error("delivery error: {0}")]
    Delivery(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("template error: {0}")]
    Template(String),
}

pub use fetch::{already_notified_pause, fetch_user_records, UserRecords, PAUSE_NOTICE_WINDOW_DAYS};
pub use mail::{compose_reminder_email, Mailer, OutboundEmail, REMINDER_SUBJECT};
pub use model::{
    ActiveRule, AuditCategory, AuditId, ExpiryValue, Frequency, KindDescriptor, LicenseKind,
    RecordDetails, RecordId, ReminderAuditRecord, ReminderPolicy, StatusValue, Subscriber,
    SubscriptionStatus, TrackedRecord, UserId, MAX_LEAD_TIME_DAYS, MIN_LEAD_TIME_DAYS,
    PAUSE_COOLDOWN_DAYS,
};
pub use run::{
    plan_user_reminders, run_reminders, ReminderPlan, ReportItem, RunOptions, RunReport,
    UserOutcome, UserStatus,
};
pub use store::ReminderStore;
pub use throttle::{evaluate_throttle, should_send, ThrottleDecision, ThrottleState};
pub use window::{days_until, in_reminder_window, partition_expiring, WindowPartition};
