use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, UtcOffset};
use tracing::{debug, error, info, warn};

use crate::fetch::{already_notified_pause, fetch_user_records, UserRecords};
use crate::mail::{
    compose_reminder_email, expiry_audit_message, failure_audit_message, pause_audit_message,
    Mailer,
};
use crate::model::{
    AuditCategory, LicenseKind, RecordId, ReminderAuditRecord, Subscriber, SubscriptionStatus,
    TrackedRecord, UserId,
};
use crate::store::ReminderStore;
use crate::throttle::evaluate_throttle;
use crate::window::{days_until, partition_expiring};
use crate::ReminderError;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct RunOptions {
    /// Compose and report without delivering or appending audit records.
    pub dry_run: bool,
}

/// Records cleared for one user's email after windowing and throttling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderPlan {
    pub send: Vec<TrackedRecord>,
    pub paused: Vec<TrackedRecord>,
    pub throttled: usize,
}

/// Apply the window filter per enabled kind, then the user-global throttle.
#[must_use]
pub fn plan_user_reminders(
    mut records: UserRecords,
    last_reminder: Option<OffsetDateTime>,
    today: Date,
) -> ReminderPlan {
    let mut plan = ReminderPlan::default();

    for kind in LicenseKind::ALL {
        let Some((lead_time_days, frequency)) =
            records.enabled_policy(kind).map(|policy| (policy.lead_time_days, policy.frequency))
        else {
            debug!(kind = %kind, "kind disabled or without policy; skipping");
            continue;
        };

        let kind_records = records.records_by_kind.remove(&kind).unwrap_or_default();
        let partition = partition_expiring(kind_records, lead_time_days, today);
        plan.paused.extend(partition.paused);

        for record in partition.expiring {
            let Some(expiry) = record.expiry.date() else {
                continue;
            };
            let decision =
                evaluate_throttle(expiry, last_reminder, frequency, lead_time_days, today);
            debug!(
                record_id = %record.id,
                kind = %kind,
                state = ?decision.state(),
                ?decision,
                "throttle decision"
            );
            if decision.permits_send() {
                plan.send.push(record);
            } else {
                plan.throttled += 1;
            }
        }
    }

    plan
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ReportItem {
    pub kind: LicenseKind,
    pub record_id: RecordId,
    pub label: String,
    pub expiry_date: Option<String>,
    pub days_remaining: Option<i64>,
}

impl ReportItem {
    fn from_record(record: &TrackedRecord, today: Date) -> Self {
        let expiry = record.expiry.date();
        Self {
            kind: record.kind(),
            record_id: record.id.clone(),
            label: record.label(),
            expiry_date: expiry.map(|date| date.to_string()),
            days_remaining: expiry.map(|date| days_until(date, today)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Sent,
    DeliveryFailed,
    NothingToSend,
    DryRun,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct UserOutcome {
    pub user_id: UserId,
    pub status: UserStatus,
    pub expiring: Vec<ReportItem>,
    pub pause_notices: Vec<ReportItem>,
    pub throttled: usize,
    pub error: Option<String>,
}

impl UserOutcome {
    fn errored(user_id: &UserId, err: &ReminderError) -> Self {
        Self {
            user_id: user_id.clone(),
            status: UserStatus::Error,
            expiring: Vec::new(),
            pause_notices: Vec::new(),
            throttled: 0,
            error: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RunReport {
    #[serde(with = "time::serde::rfc3339")]
    pub as_of: OffsetDateTime,
    pub dry_run: bool,
    pub users_processed: usize,
    pub emails_sent: usize,
    pub emails_failed: usize,
    pub users_errored: usize,
    pub reminders_logged: usize,
    pub pause_notices_logged: usize,
    pub failures_logged: usize,
    /// Audit rows that could not be written after a delivery attempt.
    pub audit_write_failures: usize,
    pub outcomes: Vec<UserOutcome>,
}

impl RunReport {
    fn new(as_of: OffsetDateTime, dry_run: bool) -> Self {
        Self {
            as_of,
            dry_run,
            users_processed: 0,
            emails_sent: 0,
            emails_failed: 0,
            users_errored: 0,
            reminders_logged: 0,
            pause_notices_logged: 0,
            failures_logged: 0,
            audit_write_failures: 0,
            outcomes: Vec::new(),
        }
    }

    fn record(&mut self, outcome: UserOutcome, logged: AuditCounts) {
        self.users_processed += 1;
        match outcome.status {
            UserStatus::Sent => self.emails_sent += 1,
            UserStatus::DeliveryFailed => self.emails_failed += 1,
            UserStatus::Error => self.users_errored += 1,
            UserStatus::NothingToSend | UserStatus::DryRun => {}
        }
        self.reminders_logged += logged.reminders;
        self.pause_notices_logged += logged.pause_notices;
        self.failures_logged += logged.failures;
        self.audit_write_failures += logged.write_failures;
        self.outcomes.push(outcome);
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AuditCounts {
    reminders: usize,
    pause_notices: usize,
    failures: usize,
    write_failures: usize,
}

/// Run one reminder pass over every active subscriber, strictly one user at a time.
///
/// Per-user failures are logged and reported; the run continues with the next user.
/// `now` is normalized to UTC before any date is derived from it.
///
/// # Errors
/// Returns an error only when active subscribers cannot be listed.
pub fn run_reminders<S, M>(
    store: &mut S,
    mailer: &M,
    now: OffsetDateTime,
    options: RunOptions,
) -> Result<RunReport, ReminderError>
where
    S: ReminderStore + ?Sized,
    M: Mailer + ?Sized,
{
    let now = now.to_offset(UtcOffset::UTC);
    let subscribers = store.active_subscribers()?;
    info!(subscribers = subscribers.len(), as_of = %now, dry_run = options.dry_run, "starting reminder run");

    let mut report = RunReport::new(now, options.dry_run);
    for subscriber in subscribers {
        if subscriber.subscription_status != SubscriptionStatus::Active {
            continue;
        }

        let (outcome, logged) = match process_subscriber(store, mailer, &subscriber, now, options)
        {
            Ok(result) => result,
            Err(err) => {
                error!(user_id = %subscriber.user_id, error = %err, "reminder processing failed for user");
                (UserOutcome::errored(&subscriber.user_id, &err), AuditCounts::default())
            }
        };
        report.record(outcome, logged);
    }

    info!(
        users = report.users_processed,
        sent = report.emails_sent,
        failed = report.emails_failed,
        errored = report.users_errored,
        "reminder run complete"
    );
    Ok(report)
}

fn process_subscriber<S, M>(
    store: &mut S,
    mailer: &M,
    subscriber: &Subscriber,
    now: OffsetDateTime,
    options: RunOptions,
) -> Result<(UserOutcome, AuditCounts), ReminderError>
where
    S: ReminderStore + ?Sized,
    M: Mailer + ?Sized,
{
    let user_id = &subscriber.user_id;
    let today = now.date();

    let records = fetch_user_records(&*store, user_id);
    let last_reminder = store.last_reminder_for(user_id)?;
    let plan = plan_user_reminders(records, last_reminder, today);

    let mut pause_notices = Vec::new();
    for record in plan.paused {
        if already_notified_pause(&*store, user_id, &record.id, now)? {
            debug!(user_id = %user_id, record_id = %record.id, "pause notice already sent in window");
            continue;
        }
        pause_notices.push(record);
    }

    let mut outcome = UserOutcome {
        user_id: user_id.clone(),
        status: UserStatus::NothingToSend,
        expiring: plan.send.iter().map(|record| ReportItem::from_record(record, today)).collect(),
        pause_notices: pause_notices
            .iter()
            .map(|record| ReportItem::from_record(record, today))
            .collect(),
        throttled: plan.throttled,
        error: None,
    };
    let mut logged = AuditCounts::default();

    if plan.send.is_empty() && pause_notices.is_empty() {
        return Ok((outcome, logged));
    }

    let email = compose_reminder_email(subscriber, &plan.send, &pause_notices, today)?;
    if options.dry_run {
        outcome.status = UserStatus::DryRun;
        return Ok((outcome, logged));
    }

    match mailer.deliver(&email) {
        Ok(()) => {
            let (written, failed) =
                append_audits(store, &plan.send, AuditCategory::Expiry, now, |record| {
                    expiry_audit_message(record, today)
                });
            logged.reminders = written;
            logged.write_failures += failed;
            let (written, failed) =
                append_audits(store, &pause_notices, AuditCategory::Pause, now, pause_audit_message);
            logged.pause_notices = written;
            logged.write_failures += failed;
            info!(
                user_id = %user_id,
                expiring = plan.send.len(),
                paused = pause_notices.len(),
                audit_write_failures = logged.write_failures,
                "reminder email delivered"
            );
            outcome.status = UserStatus::Sent;
        }
        Err(err) => {
            let reason = err.to_string();
            warn!(user_id = %user_id, error = %reason, "reminder email delivery failed");
            let intended = plan.send.iter().chain(pause_notices.iter());
            let (written, failed) =
                append_audits(store, intended, AuditCategory::DeliveryFailed, now, |record| {
                    failure_audit_message(record, &reason)
                });
            logged.failures = written;
            logged.write_failures += failed;
            outcome.status = UserStatus::DeliveryFailed;
            outcome.error = Some(reason);
        }
    }

    Ok((outcome, logged))
}

/// Append one audit row per record after a delivery attempt.
///
/// The email has already gone out (or failed) by now, so a rejected insert is
/// logged and counted and the remaining rows are still attempted.
/// Returns `(written, failed)`.
fn append_audits<'a, S, I, F>(
    store: &mut S,
    records: I,
    category: AuditCategory,
    now: OffsetDateTime,
    message: F,
) -> (usize, usize)
where
    S: ReminderStore + ?Sized,
    I: IntoIterator<Item = &'a TrackedRecord>,
    F: Fn(&TrackedRecord) -> String,
{
    let mut written = 0;
    let mut failed = 0;
    for record in records {
        let entry = ReminderAuditRecord::new(record, category, message(record), now);
        match store.append_audit(&entry) {
            Ok(()) => written += 1,
            Err(err) => {
                error!(
                    user_id = %record.user_id,
                    record_id = %record.id,
                    category = category.as_str(),
                    error = %err,
                    "failed to append audit record"
                );
                failed += 1;
            }
        }
    }
    (written, failed)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;
    use time::Duration;

    use super::*;
    use crate::model::{AuditCategory, Frequency};
    use crate::testing::{mk_policy, mk_record, mk_subscriber, InMemoryStore, RecordingMailer};

    fn run(store: &mut InMemoryStore, mailer: &RecordingMailer, now: OffsetDateTime) -> RunReport {
        run_reminders(store, mailer, now, RunOptions::default())
            .unwrap_or_else(|err| panic!("run failed: {err}"))
    }

    fn categories(store: &InMemoryStore) -> Vec<(String, AuditCategory)> {
        store.audit.iter().map(|entry| (entry.record_id.0.clone(), entry.category)).collect()
    }

    #[test]
    fn eligible_records_across_kinds_are_bundled_into_one_email() {
        let now = datetime!(2024-06-05 08:00 UTC);
        let mut store = InMemoryStore::default();
        store.subscribers.push(mk_subscriber("u1"));
        store.policies.push(mk_policy("u1", LicenseKind::Passport, 7, Frequency::Weekly));
        store.policies.push(mk_policy("u1", LicenseKind::VehicleLicense, 30, Frequency::Daily));
        store.records.push(mk_record("pp", "u1", LicenseKind::Passport, "2024-06-10", false));
        store.records.push(mk_record("car", "u1", LicenseKind::VehicleLicense, "2024-06-30", false));
        store.records.push(mk_record("far", "u1", LicenseKind::Passport, "2024-09-01", false));
        let mailer = RecordingMailer::default();

        let report = run(&mut store, &mailer, now);

        assert_eq!(report.emails_sent, 1);
        assert_eq!(report.reminders_logged, 2);
        assert_eq!(mailer.sent().len(), 1);
        assert_eq!(
            categories(&store),
            vec![
                ("car".to_string(), AuditCategory::Expiry),
                ("pp".to_string(), AuditCategory::Expiry)
            ]
        );
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, UserStatus::Sent);
        assert_eq!(outcome.expiring[1].days_remaining, Some(5));
    }

    #[test]
    fn daily_reminder_is_not_repeated_the_same_day() {
        let now = datetime!(2024-06-05 08:00 UTC);
        let mut store = InMemoryStore::default();
        store.subscribers.push(mk_subscriber("u1"));
        store.policies.push(mk_policy("u1", LicenseKind::Passport, 7, Frequency::Daily));
        store.records.push(mk_record("pp", "u1", LicenseKind::Passport, "2024-06-10", false));
        let mailer = RecordingMailer::default();

        run(&mut store, &mailer, now);
        let second = run(&mut store, &mailer, now + Duration::hours(6));
        assert_eq!(second.emails_sent, 0);
        assert_eq!(second.outcomes[0].status, UserStatus::NothingToSend);
        assert_eq!(second.outcomes[0].throttled, 1);

        let next_day = run(&mut store, &mailer, now + Duration::days(1));
        assert_eq!(next_day.emails_sent, 1);
        assert_eq!(mailer.sent().len(), 2);
    }

    #[test]
    fn throttle_is_shared_across_kinds_for_a_user() {
        let now = datetime!(2024-06-05 08:00 UTC);
        let mut store = InMemoryStore::default();
        store.subscribers.push(mk_subscriber("u1"));
        store.policies.push(mk_policy("u1", LicenseKind::Passport, 7, Frequency::Weekly));
        store.policies.push(mk_policy("u1", LicenseKind::TvLicense, 30, Frequency::Weekly));
        store.records.push(mk_record("pp", "u1", LicenseKind::Passport, "2024-06-10", false));
        let mailer = RecordingMailer::default();
        run(&mut store, &mailer, now);

        store.records.push(mk_record("tv", "u1", LicenseKind::TvLicense, "2024-06-20", false));
        let report = run(&mut store, &mailer, now + Duration::days(3));
        assert_eq!(report.emails_sent, 0);
        assert_eq!(report.outcomes[0].throttled, 2);
    }

    #[test]
    fn disabled_and_missing_policies_contribute_nothing() {
        let now = datetime!(2024-06-05 08:00 UTC);
        let mut store = InMemoryStore::default();
        store.subscribers.push(mk_subscriber("u1"));
        let mut disabled = mk_policy("u1", LicenseKind::Passport, 30, Frequency::Daily);
        disabled.enabled = false;
        store.policies.push(disabled);
        store.records.push(mk_record("pp", "u1", LicenseKind::Passport, "2024-06-06", false));
        store.records.push(mk_record("fa", "u1", LicenseKind::FirearmLicense, "2024-06-06", false));
        let mailer = RecordingMailer::default();

        let report = run(&mut store, &mailer, now);
        assert_eq!(report.outcomes[0].status, UserStatus::NothingToSend);
        assert!(mailer.sent().is_empty());
        assert!(store.audit.is_empty());
    }

    #[test]
    fn paused_record_gets_one_notice_per_five_day_window() {
        let now = datetime!(2024-06-01 08:00 UTC);
        let mut store = InMemoryStore::default();
        store.subscribers.push(mk_subscriber("u1"));
        store.policies.push(mk_policy("u1", LicenseKind::Passport, 30, Frequency::Daily));
        store.records.push(mk_record("pp", "u1", LicenseKind::Passport, "2024-06-20", true));
        let mailer = RecordingMailer::default();

        let first = run(&mut store, &mailer, now);
        assert_eq!(first.pause_notices_logged, 1);
        assert!(first.outcomes[0].expiring.is_empty());
        assert_eq!(categories(&store), vec![("pp".to_string(), AuditCategory::Pause)]);

        let within = run(&mut store, &mailer, now + Duration::days(4));
        assert_eq!(within.outcomes[0].status, UserStatus::NothingToSend);
        assert_eq!(mailer.sent().len(), 1);

        let after = run(&mut store, &mailer, now + Duration::days(6));
        assert_eq!(after.pause_notices_logged, 1);
        assert_eq!(mailer.sent().len(), 2);
    }

    #[test]
    fn paused_notices_do_not_count_as_expiry_reminders() {
        let now = datetime!(2024-06-01 08:00 UTC);
        let mut store = InMemoryStore::default();
        store.subscribers.push(mk_subscriber("u1"));
        store.policies.push(mk_policy("u1", LicenseKind::Passport, 30, Frequency::Weekly));
        store.records.push(mk_record("paused", "u1", LicenseKind::Passport, "2024-06-20", true));
        let mailer = RecordingMailer::default();
        run(&mut store, &mailer, now);

        store.records.push(mk_record("live", "u1", LicenseKind::Passport, "2024-06-25", false));
        let report = run(&mut store, &mailer, now + Duration::days(1));
        assert_eq!(report.reminders_logged, 1);
    }

    #[test]
    fn delivery_failure_logs_each_intended_item_and_retries_next_run() {
        let now = datetime!(2024-06-05 08:00 UTC);
        let mut store = InMemoryStore::default();
        store.subscribers.push(mk_subscriber("u1"));
        store.policies.push(mk_policy("u1", LicenseKind::Passport, 7, Frequency::Weekly));
        store.records.push(mk_record("pp", "u1", LicenseKind::Passport, "2024-06-10", false));
        store.records.push(mk_record("pz", "u1", LicenseKind::Passport, "2024-06-09", true));
        let failing = RecordingMailer::failing_for("u1@example.com");

        let report = run(&mut store, &failing, now);
        assert_eq!(report.emails_failed, 1);
        assert_eq!(report.failures_logged, 2);
        assert_eq!(report.outcomes[0].status, UserStatus::DeliveryFailed);
        assert!(store.audit.iter().all(|entry| entry.category == AuditCategory::DeliveryFailed));

        let mailer = RecordingMailer::default();
        let retry = run(&mut store, &mailer, now + Duration::hours(1));
        assert_eq!(retry.emails_sent, 1);
        assert_eq!(retry.reminders_logged, 1);
        assert_eq!(retry.pause_notices_logged, 1);
    }

    #[test]
    fn per_user_errors_do_not_stop_the_run() {
        let now = datetime!(2024-06-05 08:00 UTC);
        let mut store = InMemoryStore::default();
        store.subscribers.push(mk_subscriber("broken"));
        store.subscribers.push(mk_subscriber("u2"));
        store.fail_last_reminder_for.insert(UserId("broken".to_string()));
        for user in ["broken", "u2"] {
            store.policies.push(mk_policy(user, LicenseKind::Passport, 7, Frequency::Weekly));
            store.records.push(mk_record(&format!("{user}-pp"), user, LicenseKind::Passport, "2024-06-10", false));
        }
        let mailer = RecordingMailer::default();

        let report = run(&mut store, &mailer, now);
        assert_eq!(report.users_processed, 2);
        assert_eq!(report.users_errored, 1);
        assert_eq!(report.emails_sent, 1);
        assert_eq!(report.outcomes[0].status, UserStatus::Error);
        assert!(report.outcomes[0].error.is_some());
        assert_eq!(report.outcomes[1].status, UserStatus::Sent);
    }

    #[test]
    fn failing_kind_read_does_not_hide_other_kinds() {
        let now = datetime!(2024-06-05 08:00 UTC);
        let mut store = InMemoryStore::default();
        store.subscribers.push(mk_subscriber("u1"));
        store.failing_kinds.insert(LicenseKind::Passport);
        store.policies.push(mk_policy("u1", LicenseKind::Passport, 7, Frequency::Weekly));
        store.policies.push(mk_policy("u1", LicenseKind::WorkContract, 7, Frequency::Weekly));
        store.records.push(mk_record("pp", "u1", LicenseKind::Passport, "2024-06-10", false));
        store.records.push(mk_record("job", "u1", LicenseKind::WorkContract, "2024-06-10", false));
        let mailer = RecordingMailer::default();

        let report = run(&mut store, &mailer, now);
        assert_eq!(categories(&store), vec![("job".to_string(), AuditCategory::Expiry)]);
        assert_eq!(report.emails_sent, 1);
    }

    #[test]
    fn policy_read_failure_disables_every_kind() {
        let now = datetime!(2024-06-05 08:00 UTC);
        let mut store = InMemoryStore::default();
        store.subscribers.push(mk_subscriber("u1"));
        store.fail_policies = true;
        store.policies.push(mk_policy("u1", LicenseKind::Passport, 7, Frequency::Weekly));
        store.records.push(mk_record("pp", "u1", LicenseKind::Passport, "2024-06-10", false));
        let mailer = RecordingMailer::default();

        let report = run(&mut store, &mailer, now);
        assert_eq!(report.outcomes[0].status, UserStatus::NothingToSend);
        assert!(mailer.sent().is_empty());
    }

    #[test]
    fn listing_subscribers_failure_is_fatal() {
        let mut store = InMemoryStore { fail_subscribers: true, ..InMemoryStore::default() };
        let mailer = RecordingMailer::default();
        let result =
            run_reminders(&mut store, &mailer, datetime!(2024-06-05 08:00 UTC), RunOptions::default());
        assert!(matches!(result, Err(ReminderError::Store(_))));
    }

    #[test]
    fn dry_run_neither_sends_nor_logs() {
        let now = datetime!(2024-06-05 08:00 UTC);
        let mut store = InMemoryStore::default();
        store.subscribers.push(mk_subscriber("u1"));
        store.policies.push(mk_policy("u1", LicenseKind::Passport, 7, Frequency::Weekly));
        store.records.push(mk_record("pp", "u1", LicenseKind::Passport, "2024-06-10", false));
        let mailer = RecordingMailer::default();

        let report = run_reminders(&mut store, &mailer, now, RunOptions { dry_run: true })
            .unwrap_or_else(|err| panic!("dry run failed: {err}"));
        assert!(report.dry_run);
        assert_eq!(report.outcomes[0].status, UserStatus::DryRun);
        assert_eq!(report.outcomes[0].expiring.len(), 1);
        assert!(mailer.sent().is_empty());
        assert!(store.audit.is_empty());
    }

    #[test]
    fn audit_write_failure_after_delivery_keeps_the_user_sent() {
        let now = datetime!(2024-06-05 08:00 UTC);
        let mut store = InMemoryStore::default();
        store.subscribers.push(mk_subscriber("u1"));
        store.policies.push(mk_policy("u1", LicenseKind::Passport, 7, Frequency::Weekly));
        for id in ["a", "b", "c"] {
            store.records.push(mk_record(id, "u1", LicenseKind::Passport, "2024-06-10", false));
        }
        store.fail_append_for.insert(RecordId("b".to_string()));
        let mailer = RecordingMailer::default();

        let report = run(&mut store, &mailer, now);
        assert_eq!(mailer.sent().len(), 1);
        assert_eq!(report.emails_sent, 1);
        assert_eq!(report.users_errored, 0);
        assert_eq!(report.reminders_logged, 2);
        assert_eq!(report.audit_write_failures, 1);
        assert_eq!(report.outcomes[0].status, UserStatus::Sent);
        assert_eq!(
            categories(&store),
            vec![("a".to_string(), AuditCategory::Expiry), ("c".to_string(), AuditCategory::Expiry)]
        );
    }

    #[test]
    fn oversized_stored_lead_time_does_not_abort_other_users() {
        let now = datetime!(2024-06-05 08:00 UTC);
        let mut store = InMemoryStore::default();
        store.subscribers.push(mk_subscriber("u1"));
        store.subscribers.push(mk_subscriber("u2"));
        store.policies.push(mk_policy("u1", LicenseKind::Passport, i64::MAX / 1000, Frequency::Weekly));
        store.policies.push(mk_policy("u2", LicenseKind::Passport, 7, Frequency::Weekly));
        store.records.push(mk_record("u1-pp", "u1", LicenseKind::Passport, "2024-06-10", false));
        store.records.push(mk_record("u2-pp", "u2", LicenseKind::Passport, "2024-06-10", false));
        let mailer = RecordingMailer::default();

        let report = run(&mut store, &mailer, now);
        assert_eq!(report.users_processed, 2);
        assert_eq!(report.emails_sent, 2);
        assert_eq!(report.outcomes[1].status, UserStatus::Sent);
    }

    #[test]
    fn non_utc_run_time_is_evaluated_on_the_utc_date() {
        // 2024-06-05 23:30 at -02:00 is 2024-06-06 01:30 UTC, one day before a daily rerun is due.
        let mut store = InMemoryStore::default();
        store.subscribers.push(mk_subscriber("u1"));
        store.policies.push(mk_policy("u1", LicenseKind::Passport, 30, Frequency::Daily));
        store.records.push(mk_record("pp", "u1", LicenseKind::Passport, "2024-06-10", false));
        let mailer = RecordingMailer::default();

        let report = run(&mut store, &mailer, datetime!(2024-06-05 23:30 -2));
        assert_eq!(report.as_of.offset(), UtcOffset::UTC);
        assert_eq!(report.outcomes[0].expiring[0].days_remaining, Some(4));

        let same_utc_day = run(&mut store, &mailer, datetime!(2024-06-06 20:00 UTC));
        assert_eq!(same_utc_day.emails_sent, 0);
    }

    #[test]
    fn inactive_subscribers_are_skipped() {
        let now = datetime!(2024-06-05 08:00 UTC);
        let mut store = InMemoryStore::default();
        let mut lapsed = mk_subscriber("u1");
        lapsed.subscription_status = SubscriptionStatus::Expired;
        store.subscribers.push(lapsed);
        store.policies.push(mk_policy("u1", LicenseKind::Passport, 7, Frequency::Weekly));
        store.records.push(mk_record("pp", "u1", LicenseKind::Passport, "2024-06-10", false));
        let mailer = RecordingMailer::default();

        let report = run(&mut store, &mailer, now);
        assert_eq!(report.users_processed, 0);
        assert!(mailer.sent().is_empty());
    }
}
