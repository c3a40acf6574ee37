use askama::Template;
use serde::{Deserialize, Serialize};
use time::{Date, Duration, UtcOffset};

use crate::model::{Subscriber, TrackedRecord, PAUSE_COOLDOWN_DAYS};
use crate::window::days_until;
use crate::ReminderError;

pub const REMINDER_SUBJECT: &str = "License Expiry Notification";

/// One multipart (plain + HTML) message addressed to a single subscriber.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct OutboundEmail {
    pub to: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// Outbound transport. Delivery is attempted once; failures are reported, not retried.
pub trait Mailer {
    /// Deliver one message.
    ///
    /// # Errors
    /// Returns [`ReminderError::Delivery`] when the transport rejects or cannot send the message.
    fn deliver(&self, email: &OutboundEmail) -> Result<(), ReminderError>;
}

impl<M: Mailer + ?Sized> Mailer for &M {
    fn deliver(&self, email: &OutboundEmail) -> Result<(), ReminderError> {
        (**self).deliver(email)
    }
}

fn remaining_phrase(expiry: Date, today: Date) -> String {
    match days_until(expiry, today) {
        0 => "expires today".to_string(),
        1 => "1 day remaining".to_string(),
        days if days > 0 => format!("{days} days remaining"),
        days => format!("expired {} days ago", -days),
    }
}

fn expiry_text(record: &TrackedRecord) -> String {
    record.expiry.date().map_or_else(|| "an unknown date".to_string(), |date| date.to_string())
}

/// One-line audit text for a delivered expiry reminder.
#[must_use]
pub fn expiry_audit_message(record: &TrackedRecord, today: Date) -> String {
    let remaining =
        record.expiry.date().map_or_else(String::new, |date| format!(" ({})", remaining_phrase(date, today)));
    format!(
        "Your {} ({}) expires on {}{remaining}.",
        record.kind().title(),
        record.label(),
        expiry_text(record)
    )
}

/// One-line audit text for a delivered pause notice.
#[must_use]
pub fn pause_audit_message(record: &TrackedRecord) -> String {
    format!(
        "Reminders are paused for your {} ({}) which expires on {}.",
        record.kind().title(),
        record.label(),
        expiry_text(record)
    )
}

/// One-line audit text for an item whose email could not be delivered.
#[must_use]
pub fn failure_audit_message(record: &TrackedRecord, error: &str) -> String {
    format!(
        "Failed to deliver notice for {} ({}) expiring on {}: {error}",
        record.kind().title(),
        record.label(),
        expiry_text(record)
    )
}

/// One bullet in the reminder email.
struct EmailLine {
    title: &'static str,
    label: String,
    expiry: String,
    note: String,
}

impl EmailLine {
    fn expiring(record: &TrackedRecord, today: Date) -> Self {
        let note = record
            .expiry
            .date()
            .map_or_else(String::new, |date| format!(" ({})", remaining_phrase(date, today)));
        Self::new(record, note)
    }

    fn paused(record: &TrackedRecord) -> Self {
        let note = resume_date(record).map_or_else(
            || format!(" (Notifications will resume after the {PAUSE_COOLDOWN_DAYS}-day pause period)"),
            |date| format!(" (Notifications will resume on {date})"),
        );
        Self::new(record, note)
    }

    fn new(record: &TrackedRecord, note: String) -> Self {
        Self { title: record.kind().title(), label: record.label(), expiry: expiry_text(record), note }
    }
}

/// Date the pause sweep clears the record's flag, when the pause time is known.
fn resume_date(record: &TrackedRecord) -> Option<Date> {
    record
        .paused_at?
        .to_offset(UtcOffset::UTC)
        .checked_add(Duration::days(PAUSE_COOLDOWN_DAYS))
        .map(|resume_at| resume_at.date())
}

#[derive(Template)]
#[template(path = "reminder_email.txt")]
struct ReminderTextBody<'a> {
    greeting_name: &'a str,
    expiring: &'a [EmailLine],
    paused: &'a [EmailLine],
}

#[derive(Template)]
#[template(path = "reminder_email.html")]
struct ReminderHtmlBody<'a> {
    greeting_name: &'a str,
    expiring: &'a [EmailLine],
    paused: &'a [EmailLine],
}

fn render_error(err: &askama::Error) -> ReminderError {
    ReminderError::Template(format!("failed to render reminder email: {err}"))
}

/// Compose the single reminder email covering expiring items and pause notices.
///
/// # Errors
/// Returns [`ReminderError::Validation`] when the subscriber has no email address
/// or there is nothing to send, and [`ReminderError::Template`] when a body fails to render.
pub fn compose_reminder_email(
    subscriber: &Subscriber,
    expiring: &[TrackedRecord],
    paused: &[TrackedRecord],
    today: Date,
) -> Result<OutboundEmail, ReminderError> {
    if subscriber.email.trim().is_empty() {
        return Err(ReminderError::Validation(format!(
            "subscriber {} has no email address",
            subscriber.user_id
        )));
    }
    if expiring.is_empty() && paused.is_empty() {
        return Err(ReminderError::Validation("reminder email has no items".to_string()));
    }

    let greeting_name = subscriber
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or("there");
    let expiring = expiring.iter().map(|record| EmailLine::expiring(record, today)).collect::<Vec<_>>();
    let paused = paused.iter().map(EmailLine::paused).collect::<Vec<_>>();

    let text_body = ReminderTextBody { greeting_name, expiring: &expiring, paused: &paused }
        .render()
        .map_err(|err| render_error(&err))?;
    let html_body = ReminderHtmlBody { greeting_name, expiring: &expiring, paused: &paused }
        .render()
        .map_err(|err| render_error(&err))?;

    Ok(OutboundEmail {
        to: subscriber.email.trim().to_string(),
        to_name: subscriber.display_name.clone(),
        subject: REMINDER_SUBJECT.to_string(),
        text_body,
        html_body,
    })
}

#[cfg(test)]
mod tests {
    use time::macros::{date, datetime};

    use super::*;
    use crate::model::{
        ExpiryValue, HolderDetails, RecordDetails, RecordId, SubscriptionStatus, UserId,
        VehicleDetails,
    };

    fn subscriber(name: Option<&str>) -> Subscriber {
        Subscriber {
            user_id: UserId("u1".to_string()),
            email: "owner@example.com".to_string(),
            display_name: name.map(str::to_string),
            subscription_status: SubscriptionStatus::Active,
            subscription_end: None,
        }
    }

    fn vehicle(expiry: Date) -> TrackedRecord {
        TrackedRecord {
            id: RecordId("veh-1".to_string()),
            user_id: UserId("u1".to_string()),
            expiry: ExpiryValue::Date(expiry),
            active: true,
            paused: false,
            paused_at: None,
            details: RecordDetails::VehicleLicense(VehicleDetails {
                make: Some("Ford".to_string()),
                model: Some("Ranger <XL>".to_string()),
                registration_number: Some("GP 1".to_string()),
            }),
        }
    }

    fn passport(expiry: Date) -> TrackedRecord {
        TrackedRecord {
            id: RecordId("pp-1".to_string()),
            user_id: UserId("u1".to_string()),
            expiry: ExpiryValue::Date(expiry),
            active: true,
            paused: true,
            paused_at: None,
            details: RecordDetails::Passport(HolderDetails {
                first_name: Some("Thandi".to_string()),
                last_name: Some("Nkosi".to_string()),
                document_number: Some("A1234567".to_string()),
            }),
        }
    }

    #[test]
    fn email_lists_expiring_and_paused_items() {
        let today = date!(2024 - 06 - 05);
        let email = compose_reminder_email(
            &subscriber(Some("Thandi")),
            &[vehicle(date!(2024 - 06 - 10))],
            &[passport(date!(2024 - 06 - 06))],
            today,
        )
        .unwrap_or_else(|err| panic!("compose failed: {err}"));

        assert_eq!(email.subject, REMINDER_SUBJECT);
        assert_eq!(email.to, "owner@example.com");
        assert!(email.text_body.starts_with("Hi Thandi,"));
        assert!(email.text_body.contains("Vehicle Registration (Ford Ranger <XL>, GP 1): expires on 2024-06-10 (5 days remaining)"));
        assert!(email.text_body.contains("Passport (Thandi Nkosi, A1234567): expires on 2024-06-06"));
        assert!(email.html_body.contains("Ford Ranger &lt;XL&gt;, GP 1"));
        assert!(!email.html_body.contains("<XL>"));
        assert!(email.html_body.contains("<strong>Vehicle Registration</strong>"));
    }

    #[test]
    fn paused_items_state_when_notifications_resume() {
        let today = date!(2024 - 06 - 05);
        let mut stamped = passport(date!(2024 - 06 - 20));
        stamped.paused_at = Some(datetime!(2024-06-03 22:00 -3));
        let mut unstamped = passport(date!(2024 - 06 - 21));
        unstamped.id = RecordId("pp-2".to_string());

        let email = compose_reminder_email(&subscriber(Some("Thandi")), &[], &[stamped, unstamped], today)
            .unwrap_or_else(|err| panic!("compose failed: {err}"));

        // 22:00 at -03:00 is already 2024-06-04 in UTC.
        assert!(email
            .text_body
            .contains("expires on 2024-06-20 (Notifications will resume on 2024-06-09)"));
        assert!(email
            .text_body
            .contains("expires on 2024-06-21 (Notifications will resume after the 5-day pause period)"));
        assert!(email.html_body.contains("Notifications will resume on 2024-06-09"));
        assert!(!email.text_body.contains("approaching their expiry date"));
    }

    #[test]
    fn greeting_falls_back_when_name_missing() {
        let email = compose_reminder_email(
            &subscriber(Some("  ")),
            &[vehicle(date!(2024 - 06 - 05))],
            &[],
            date!(2024 - 06 - 05),
        )
        .unwrap_or_else(|err| panic!("compose failed: {err}"));
        assert!(email.text_body.starts_with("Hi there,"));
        assert!(email.text_body.contains("(expires today)"));
        assert!(!email.text_body.contains("paused"));
    }

    #[test]
    fn empty_email_is_rejected() {
        let result = compose_reminder_email(&subscriber(None), &[], &[], date!(2024 - 06 - 05));
        assert!(matches!(result, Err(ReminderError::Validation(_))));
    }

    #[test]
    fn audit_messages_name_the_record() {
        let today = date!(2024 - 06 - 05);
        assert_eq!(
            expiry_audit_message(&vehicle(date!(2024 - 06 - 06)), today),
            "Your Vehicle Registration (Ford Ranger <XL>, GP 1) expires on 2024-06-06 (1 day remaining)."
        );
        assert!(pause_audit_message(&passport(today)).starts_with("Reminders are paused for your Passport"));
        assert!(failure_audit_message(&passport(today), "timeout").ends_with(": timeout"));
    }
}
