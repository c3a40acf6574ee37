use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};
use ulid::Ulid;

use crate::ReminderError;

pub const MIN_LEAD_TIME_DAYS: i64 = 1;
pub const MAX_LEAD_TIME_DAYS: i64 = 365;

/// Days a record stays paused before the sweep clears its flag.
pub const PAUSE_COOLDOWN_DAYS: i64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AuditId(pub Ulid);

impl AuditId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for AuditId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for AuditId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum LicenseKind {
    DriverLicense,
    FirearmLicense,
    PendingRenewalPermit,
    VehicleLicense,
    WorkContract,
    OtherDocument,
    Passport,
    TvLicense,
    SecurityRegistration,
    CompetencyCertificate,
}

impl LicenseKind {
    pub const ALL: [Self; 10] = [
        Self::DriverLicense,
        Self::FirearmLicense,
        Self::PendingRenewalPermit,
        Self::VehicleLicense,
        Self::WorkContract,
        Self::OtherDocument,
        Self::Passport,
        Self::TvLicense,
        Self::SecurityRegistration,
        Self::CompetencyCertificate,
    ];

    #[must_use]
    pub fn descriptor(self) -> &'static KindDescriptor {
        match self {
            Self::DriverLicense => &DRIVER_LICENSE,
            Self::FirearmLicense => &FIREARM_LICENSE,
            Self::PendingRenewalPermit => &PENDING_RENEWAL_PERMIT,
            Self::VehicleLicense => &VEHICLE_LICENSE,
            Self::WorkContract => &WORK_CONTRACT,
            Self::OtherDocument => &OTHER_DOCUMENT,
            Self::Passport => &PASSPORT,
            Self::TvLicense => &TV_LICENSE,
            Self::SecurityRegistration => &SECURITY_REGISTRATION,
            Self::CompetencyCertificate => &COMPETENCY_CERTIFICATE,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.descriptor().tag
    }

    #[must_use]
    pub fn title(self) -> &'static str {
        self.descriptor().title
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl Display for LicenseKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static per-kind storage layout and status semantics.
#[derive(Debug)]
pub struct KindDescriptor {
    pub tag: &'static str,
    pub title: &'static str,
    pub table: &'static str,
    pub expiry_column: &'static str,
    pub status_column: &'static str,
    pub active_rule: ActiveRule,
    pub detail_columns: &'static [&'static str],
}

const HOLDER_ID_COLUMNS: &[&str] = &["first_name", "last_name", "id_number"];

static DRIVER_LICENSE: KindDescriptor = KindDescriptor {
    tag: "driver-license",
    title: "Driver's License",
    table: "driver_licenses",
    expiry_column: "expiry_date",
    status_column: "status",
    active_rule: ActiveRule::StatusText(&["active", "valid"]),
    detail_columns: HOLDER_ID_COLUMNS,
};

static FIREARM_LICENSE: KindDescriptor = KindDescriptor {
    tag: "firearm-license",
    title: "Firearm License",
    table: "firearm_licenses",
    expiry_column: "expiry_date",
    status_column: "is_active",
    active_rule: ActiveRule::Flag,
    detail_columns: &["make_model", "caliber", "registration_number"],
};

static PENDING_RENEWAL_PERMIT: KindDescriptor = KindDescriptor {
    tag: "pending-renewal-permit",
    title: "Professional Driving Permit",
    table: "pending_renewal_permits",
    expiry_column: "expiry_date",
    status_column: "is_active",
    active_rule: ActiveRule::Flag,
    detail_columns: HOLDER_ID_COLUMNS,
};

static VEHICLE_LICENSE: KindDescriptor = KindDescriptor {
    tag: "vehicle-license",
    title: "Vehicle Registration",
    table: "vehicle_licenses",
    expiry_column: "expiry_date",
    status_column: "is_active",
    active_rule: ActiveRule::Flag,
    detail_columns: &["make", "model", "registration_number"],
};

static WORK_CONTRACT: KindDescriptor = KindDescriptor {
    tag: "work-contract",
    title: "Work Contract",
    table: "work_contracts",
    expiry_column: "expiry_date",
    status_column: "contract_status",
    active_rule: ActiveRule::StatusText(&["active", "ongoing"]),
    detail_columns: &["contract_name", "contract_type", "company_name"],
};

static OTHER_DOCUMENT: KindDescriptor = KindDescriptor {
    tag: "other-document",
    title: "Other Document",
    table: "other_documents",
    expiry_column: "expiry_date",
    status_column: "is_active",
    active_rule: ActiveRule::Flag,
    detail_columns: &["description", "document_type"],
};

static PASSPORT: KindDescriptor = KindDescriptor {
    tag: "passport",
    title: "Passport",
    table: "passports",
    expiry_column: "expiry_date",
    status_column: "is_active",
    active_rule: ActiveRule::Flag,
    detail_columns: &["first_name", "last_name", "passport_number"],
};

static TV_LICENSE: KindDescriptor = KindDescriptor {
    tag: "tv-license",
    title: "TV License",
    table: "tv_licenses",
    expiry_column: "expiry_date",
    status_column: "is_active",
    active_rule: ActiveRule::Flag,
    detail_columns: &["first_name", "last_name", "license_number"],
};

static SECURITY_REGISTRATION: KindDescriptor = KindDescriptor {
    tag: "security-registration",
    title: "PSIRA Registration",
    table: "security_registrations",
    expiry_column: "certificate_expiry_date",
    status_column: "reg_status",
    active_rule: ActiveRule::StatusText(&["active", "registered"]),
    detail_columns: &["psira_number", "grade", "employer"],
};

static COMPETENCY_CERTIFICATE: KindDescriptor = KindDescriptor {
    tag: "competency-certificate",
    title: "Competency Certificate",
    table: "competency_certificates",
    expiry_column: "expiry_date",
    status_column: "is_active",
    active_rule: ActiveRule::Flag,
    detail_columns: &["first_name", "last_name", "firearm_type"],
};

/// Raw status column value as read from the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusValue {
    Null,
    Bool(bool),
    Integer(i64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveRule {
    /// Boolean-like column: non-zero integers, `true`, `1`, `yes`.
    Flag,
    /// Text column whose value must be one of the listed values (case-insensitive).
    /// The first value is the canonical "active" spelling used for writes.
    StatusText(&'static [&'static str]),
}

impl ActiveRule {
    #[must_use]
    pub fn is_active(self, value: &StatusValue) -> bool {
        match (self, value) {
            (_, StatusValue::Null) => false,
            (Self::Flag, StatusValue::Bool(flag)) => *flag,
            (Self::Flag, StatusValue::Integer(number)) => *number != 0,
            (Self::Flag, StatusValue::Text(text)) => {
                matches!(text.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "t")
            }
            (Self::StatusText(values), StatusValue::Text(text)) => {
                let normalized = text.trim().to_ascii_lowercase();
                values.iter().any(|value| *value == normalized)
            }
            (Self::StatusText(_), StatusValue::Bool(_) | StatusValue::Integer(_)) => false,
        }
    }

    #[must_use]
    pub fn encode(self, active: bool) -> StatusValue {
        match self {
            Self::Flag => StatusValue::Integer(i64::from(active)),
            Self::StatusText(values) => {
                let value = if active { values.first().copied().unwrap_or("active") } else { "inactive" };
                StatusValue::Text(value.to_string())
            }
        }
    }
}

/// Parse a `YYYY-MM-DD` calendar date.
///
/// # Errors
/// Returns the underlying parse error when the input is not a calendar date.
pub fn parse_calendar_date(raw: &str) -> Result<Date, time::error::Parse> {
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryValue {
    Unset,
    Date(Date),
    Malformed(String),
}

impl ExpiryValue {
    /// Accepts calendar dates and RFC 3339 timestamps (taking the UTC date).
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return Self::Unset;
        };

        if let Ok(date) = parse_calendar_date(raw) {
            return Self::Date(date);
        }

        match OffsetDateTime::parse(raw, &Rfc3339) {
            Ok(timestamp) => Self::Date(timestamp.to_offset(UtcOffset::UTC).date()),
            Err(_) => Self::Malformed(raw.to_string()),
        }
    }

    #[must_use]
    pub fn date(&self) -> Option<Date> {
        match self {
            Self::Date(date) => Some(*date),
            Self::Unset | Self::Malformed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HolderDetails {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub document_number: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirearmDetails {
    pub make_model: Option<String>,
    pub caliber: Option<String>,
    pub registration_number: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VehicleDetails {
    pub make: Option<String>,
    pub model: Option<String>,
    pub registration_number: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractDetails {
    pub contract_name: Option<String>,
    pub contract_type: Option<String>,
    pub company_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentDetails {
    pub description: Option<String>,
    pub document_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityDetails {
    pub psira_number: Option<String>,
    pub grade: Option<String>,
    pub employer: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompetencyDetails {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub firearm_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordDetails {
    DriverLicense(HolderDetails),
    FirearmLicense(FirearmDetails),
    PendingRenewalPermit(HolderDetails),
    VehicleLicense(VehicleDetails),
    WorkContract(ContractDetails),
    OtherDocument(DocumentDetails),
    Passport(HolderDetails),
    TvLicense(HolderDetails),
    SecurityRegistration(SecurityDetails),
    CompetencyCertificate(CompetencyDetails),
}

impl RecordDetails {
    #[must_use]
    pub fn kind(&self) -> LicenseKind {
        match self {
            Self::DriverLicense(_) => LicenseKind::DriverLicense,
            Self::FirearmLicense(_) => LicenseKind::FirearmLicense,
            Self::PendingRenewalPermit(_) => LicenseKind::PendingRenewalPermit,
            Self::VehicleLicense(_) => LicenseKind::VehicleLicense,
            Self::WorkContract(_) => LicenseKind::WorkContract,
            Self::OtherDocument(_) => LicenseKind::OtherDocument,
            Self::Passport(_) => LicenseKind::Passport,
            Self::TvLicense(_) => LicenseKind::TvLicense,
            Self::SecurityRegistration(_) => LicenseKind::SecurityRegistration,
            Self::CompetencyCertificate(_) => LicenseKind::CompetencyCertificate,
        }
    }

    /// Build details for `kind` by looking up each of its detail columns.
    pub fn from_columns<F>(kind: LicenseKind, mut column: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        fn holder(mut take: impl FnMut(usize) -> Option<String>) -> HolderDetails {
            HolderDetails { first_name: take(0), last_name: take(1), document_number: take(2) }
        }

        let columns = kind.descriptor().detail_columns;
        let mut take = |index: usize| -> Option<String> {
            columns
                .get(index)
                .and_then(|name| column(name))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        match kind {
            LicenseKind::DriverLicense => Self::DriverLicense(holder(&mut take)),
            LicenseKind::PendingRenewalPermit => Self::PendingRenewalPermit(holder(&mut take)),
            LicenseKind::Passport => Self::Passport(holder(&mut take)),
            LicenseKind::TvLicense => Self::TvLicense(holder(&mut take)),
            LicenseKind::FirearmLicense => Self::FirearmLicense(FirearmDetails {
                make_model: take(0),
                caliber: take(1),
                registration_number: take(2),
            }),
            LicenseKind::VehicleLicense => Self::VehicleLicense(VehicleDetails {
                make: take(0),
                model: take(1),
                registration_number: take(2),
            }),
            LicenseKind::WorkContract => Self::WorkContract(ContractDetails {
                contract_name: take(0),
                contract_type: take(1),
                company_name: take(2),
            }),
            LicenseKind::OtherDocument => Self::OtherDocument(DocumentDetails {
                description: take(0),
                document_type: take(1),
            }),
            LicenseKind::SecurityRegistration => Self::SecurityRegistration(SecurityDetails {
                psira_number: take(0),
                grade: take(1),
                employer: take(2),
            }),
            LicenseKind::CompetencyCertificate => {
                Self::CompetencyCertificate(CompetencyDetails {
                    first_name: take(0),
                    last_name: take(1),
                    firearm_type: take(2),
                })
            }
        }
    }

    /// Values in the same order as the kind's detail columns.
    #[must_use]
    pub fn column_values(&self) -> Vec<Option<&str>> {
        match self {
            Self::DriverLicense(details)
            | Self::PendingRenewalPermit(details)
            | Self::Passport(details)
            | Self::TvLicense(details) => vec![
                details.first_name.as_deref(),
                details.last_name.as_deref(),
                details.document_number.as_deref(),
            ],
            Self::FirearmLicense(details) => vec![
                details.make_model.as_deref(),
                details.caliber.as_deref(),
                details.registration_number.as_deref(),
            ],
            Self::VehicleLicense(details) => vec![
                details.make.as_deref(),
                details.model.as_deref(),
                details.registration_number.as_deref(),
            ],
            Self::WorkContract(details) => vec![
                details.contract_name.as_deref(),
                details.contract_type.as_deref(),
                details.company_name.as_deref(),
            ],
            Self::OtherDocument(details) => {
                vec![details.description.as_deref(), details.document_type.as_deref()]
            }
            Self::SecurityRegistration(details) => vec![
                details.psira_number.as_deref(),
                details.grade.as_deref(),
                details.employer.as_deref(),
            ],
            Self::CompetencyCertificate(details) => vec![
                details.first_name.as_deref(),
                details.last_name.as_deref(),
                details.firearm_type.as_deref(),
            ],
        }
    }

    /// Short human description used in emails and audit messages.
    #[must_use]
    pub fn label(&self) -> String {
        let label = match self {
            Self::DriverLicense(details)
            | Self::PendingRenewalPermit(details)
            | Self::Passport(details)
            | Self::TvLicense(details) => join_label(&[
                full_name(details.first_name.as_deref(), details.last_name.as_deref()).as_deref(),
                details.document_number.as_deref(),
            ]),
            Self::FirearmLicense(details) => join_label(&[
                details.make_model.as_deref(),
                details.registration_number.as_deref(),
            ]),
            Self::VehicleLicense(details) => join_label(&[
                full_name(details.make.as_deref(), details.model.as_deref()).as_deref(),
                details.registration_number.as_deref(),
            ]),
            Self::WorkContract(details) => join_label(&[
                details.contract_name.as_deref(),
                details.company_name.as_deref(),
            ]),
            Self::OtherDocument(details) => join_label(&[
                details.description.as_deref(),
                details.document_type.as_deref(),
            ]),
            Self::SecurityRegistration(details) => join_label(&[
                details.psira_number.as_deref(),
                details.grade.as_deref().map(|grade| format!("Grade {grade}")).as_deref(),
            ]),
            Self::CompetencyCertificate(details) => join_label(&[
                full_name(details.first_name.as_deref(), details.last_name.as_deref()).as_deref(),
                details.firearm_type.as_deref(),
            ]),
        };

        if label.is_empty() {
            self.kind().title().to_string()
        } else {
            label
        }
    }
}

fn full_name(first: Option<&str>, last: Option<&str>) -> Option<String> {
    let joined = join_with(&[first, last], " ");
    (!joined.is_empty()).then_some(joined)
}

fn join_label(parts: &[Option<&str>]) -> String {
    join_with(parts, ", ")
}

fn join_with(parts: &[Option<&str>], separator: &str) -> String {
    parts.iter().flatten().copied().filter(|part| !part.is_empty()).collect::<Vec<_>>().join(separator)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedRecord {
    pub id: RecordId,
    pub user_id: UserId,
    pub expiry: ExpiryValue,
    pub active: bool,
    pub paused: bool,
    pub paused_at: Option<OffsetDateTime>,
    pub details: RecordDetails,
}

impl TrackedRecord {
    #[must_use]
    pub fn kind(&self) -> LicenseKind {
        self.details.kind()
    }

    #[must_use]
    pub fn label(&self) -> String {
        self.details.label()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Unrecognized,
}

impl Frequency {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" => Self::Daily,
            "weekly" => Self::Weekly,
            "monthly" => Self::Monthly,
            _ => Self::Unrecognized,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Unrecognized => "unrecognized",
        }
    }

    /// Minimum whole days between two reminders, `None` when the frequency is unknown.
    #[must_use]
    pub fn min_elapsed_days(self) -> Option<i64> {
        match self {
            Self::Daily => Some(1),
            Self::Weekly => Some(7),
            Self::Monthly => Some(28),
            Self::Unrecognized => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ReminderPolicy {
    pub user_id: UserId,
    pub kind: LicenseKind,
    pub enabled: bool,
    pub lead_time_days: i64,
    pub frequency: Frequency,
}

impl ReminderPolicy {
    /// Validate a policy before it is written.
    ///
    /// # Errors
    /// Returns [`ReminderError::Validation`] when the lead time is outside
    /// `1..=365` days or the frequency is not one of daily/weekly/monthly.
    pub fn validate(&self) -> Result<(), ReminderError> {
        if !(MIN_LEAD_TIME_DAYS..=MAX_LEAD_TIME_DAYS).contains(&self.lead_time_days) {
            return Err(ReminderError::Validation(format!(
                "lead_time_days MUST be between {MIN_LEAD_TIME_DAYS} and {MAX_LEAD_TIME_DAYS}, got {}",
                self.lead_time_days
            )));
        }

        if self.frequency == Frequency::Unrecognized {
            return Err(ReminderError::Validation(
                "frequency MUST be one of daily, weekly, monthly".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    Expired,
}

impl SubscriptionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Expired => "expired",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Subscriber {
    pub user_id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub subscription_status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub subscription_end: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Expiry,
    Pause,
    DeliveryFailed,
}

impl AuditCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Expiry => "expiry",
            Self::Pause => "pause",
            Self::DeliveryFailed => "delivery_failed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "expiry" => Some(Self::Expiry),
            "pause" => Some(Self::Pause),
            "delivery_failed" => Some(Self::DeliveryFailed),
            _ => None,
        }
    }
}

/// Append-only evidence that a reminder decision was communicated (or failed to be).
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ReminderAuditRecord {
    pub audit_id: AuditId,
    pub user_id: UserId,
    pub kind: LicenseKind,
    pub record_id: RecordId,
    pub category: AuditCategory,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub read: bool,
}

impl ReminderAuditRecord {
    #[must_use]
    pub fn new(
        record: &TrackedRecord,
        category: AuditCategory,
        message: String,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            audit_id: AuditId::new(),
            user_id: record.user_id.clone(),
            kind: record.kind(),
            record_id: record.id.clone(),
            category,
            message,
            created_at,
            read: false,
        }
    }
}
