use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use reminder_core::{
    ActiveRule, AuditCategory, AuditId, ExpiryValue, Frequency, KindDescriptor, LicenseKind,
    RecordDetails, RecordId, ReminderAuditRecord, ReminderError, ReminderPolicy, ReminderStore,
    StatusValue, Subscriber, SubscriptionStatus, TrackedRecord, UserId, MAX_LEAD_TIME_DAYS,
    MIN_LEAD_TIME_DAYS, PAUSE_COOLDOWN_DAYS,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, DatabaseName, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime, UtcOffset};
use tracing::{info, warn};
use ulid::Ulid;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SHARED_SQL: &str = r"
CREATE TABLE IF NOT EXISTS subscribers (
  user_id TEXT PRIMARY KEY,
  email TEXT NOT NULL CHECK (length(trim(email)) > 0),
  display_name TEXT,
  subscription_status TEXT NOT NULL CHECK (subscription_status IN ('active', 'inactive', 'expired')),
  subscription_end TEXT,
  updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_subscribers_status
  ON subscribers(subscription_status);

CREATE TABLE IF NOT EXISTS reminder_audit (
  audit_id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  license_kind TEXT NOT NULL,
  record_id TEXT NOT NULL,
  category TEXT NOT NULL CHECK (category IN ('expiry', 'pause', 'delivery_failed')),
  message TEXT NOT NULL,
  created_at TEXT NOT NULL,
  is_read INTEGER NOT NULL DEFAULT 0 CHECK (is_read IN (0, 1))
);

CREATE INDEX IF NOT EXISTS idx_reminder_audit_user_category_created
  ON reminder_audit(user_id, category, created_at);
";

/// Read-write handle over the reminder database.
pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PauseSweepReport {
    pub resumed: BTreeMap<LicenseKind, usize>,
    pub skipped_without_timestamp: usize,
    pub failed_kinds: Vec<LicenseKind>,
}

impl PauseSweepReport {
    #[must_use]
    pub fn total_resumed(&self) -> usize {
        self.resumed.values().sum()
    }
}

impl SqliteStore {
    /// Open a SQLite-backed reminder store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus { current_version, target_version: LATEST_SCHEMA_VERSION, pending_versions })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when any migration step fails or the database is newer than supported.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version < 1 {
            let tx = self.conn.transaction().context("failed to start migration transaction")?;
            tx.execute_batch(&migration_001_sql()).context("failed to apply migration 1")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration 1")?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Insert or update one subscriber.
    ///
    /// # Errors
    /// Returns an error when the email is empty or the write fails.
    pub fn upsert_subscriber(&mut self, subscriber: &Subscriber) -> Result<()> {
        if subscriber.email.trim().is_empty() {
            return Err(anyhow!("subscriber {} has an empty email address", subscriber.user_id));
        }

        let subscription_end = subscriber.subscription_end.map(timestamp).transpose()?;
        self.conn
            .execute(
                "INSERT INTO subscribers(
                    user_id, email, display_name, subscription_status, subscription_end, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id) DO UPDATE SET
                    email = excluded.email,
                    display_name = excluded.display_name,
                    subscription_status = excluded.subscription_status,
                    subscription_end = excluded.subscription_end,
                    updated_at = excluded.updated_at",
                params![
                    subscriber.user_id.as_str(),
                    subscriber.email.trim(),
                    subscriber.display_name,
                    subscriber.subscription_status.as_str(),
                    subscription_end,
                    now_timestamp()?,
                ],
            )
            .with_context(|| format!("failed to upsert subscriber {}", subscriber.user_id))?;
        Ok(())
    }

    /// Load one subscriber by id.
    ///
    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn get_subscriber(&self, user_id: &UserId) -> Result<Option<Subscriber>> {
        let row = self
            .conn
            .query_row(
                "SELECT user_id, email, display_name, subscription_status, subscription_end
                 FROM subscribers WHERE user_id = ?1",
                params![user_id.as_str()],
                read_subscriber_row,
            )
            .optional()
            .with_context(|| format!("failed to load subscriber {user_id}"))?;
        row.map(SubscriberRow::into_subscriber).transpose()
    }

    /// Subscribers whose status is `active`, ordered by user id.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_active_subscribers(&self) -> Result<Vec<Subscriber>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, email, display_name, subscription_status, subscription_end
             FROM subscribers
             WHERE subscription_status = 'active'
             ORDER BY user_id ASC",
        )?;
        let rows = stmt.query_map([], read_subscriber_row)?;

        let mut subscribers = Vec::new();
        for row in rows {
            subscribers.push(row?.into_subscriber()?);
        }
        Ok(subscribers)
    }

    /// Insert one tracked record into its kind's table.
    ///
    /// # Errors
    /// Returns an error when the owning subscriber does not exist or the insert fails.
    pub fn insert_record(&mut self, record: &TrackedRecord) -> Result<()> {
        let kind = record.kind();
        let descriptor = kind.descriptor();

        let mut columns = vec![
            "id",
            "user_id",
            descriptor.expiry_column,
            descriptor.status_column,
            "notifications_paused",
            "paused_at",
            "updated_at",
        ];
        let mut values = vec![
            Value::Text(record.id.0.clone()),
            Value::Text(record.user_id.0.clone()),
            expiry_to_sql(&record.expiry),
            status_to_sql(descriptor.active_rule.encode(record.active)),
            Value::Integer(i64::from(record.paused)),
            record.paused_at.map(timestamp).transpose()?.map_or(Value::Null, Value::Text),
            Value::Text(now_timestamp()?),
        ];
        for (column, value) in
            descriptor.detail_columns.iter().copied().zip(record.details.column_values())
        {
            columns.push(column);
            values.push(value.map_or(Value::Null, |text| Value::Text(text.to_string())));
        }

        let placeholders = (1..=values.len()).map(|index| format!("?{index}")).collect::<Vec<_>>();
        let sql = format!(
            "INSERT INTO {}({}) VALUES ({})",
            descriptor.table,
            columns.join(", "),
            placeholders.join(", ")
        );

        self.conn
            .execute(&sql, params_from_iter(values))
            .with_context(|| format!("failed to insert {kind} record {}", record.id))?;
        Ok(())
    }

    /// Load all records of one kind owned by `user_id`, converted to typed records.
    ///
    /// # Errors
    /// Returns an error when the kind's table cannot be read.
    pub fn list_records(&self, user_id: &UserId, kind: LicenseKind) -> Result<Vec<TrackedRecord>> {
        let descriptor = kind.descriptor();
        let detail_select =
            descriptor.detail_columns.iter().map(|column| format!(", {column}")).collect::<String>();
        let sql = format!(
            "SELECT id, user_id, {}, {}, notifications_paused, paused_at{detail_select}
             FROM {}
             WHERE user_id = ?1
             ORDER BY id ASC",
            descriptor.expiry_column, descriptor.status_column, descriptor.table
        );

        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("failed to prepare select on {}", descriptor.table))?;
        let mut rows = stmt.query(params![user_id.as_str()])?;
        let mut records = Vec::new();

        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let owner: String = row.get(1)?;
            let expiry = ExpiryValue::parse(value_text(row.get(2)?).as_deref());
            let active = descriptor.active_rule.is_active(&status_value(row.get(3)?));
            let paused = ActiveRule::Flag.is_active(&status_value(row.get(4)?));
            let paused_at_raw: Option<String> = row.get(5)?;
            let paused_at = paused_at_raw.as_deref().and_then(|raw| match parse_timestamp(raw) {
                Ok(parsed) => Some(parsed),
                Err(err) => {
                    warn!(table = descriptor.table, record_id = %id, error = %err, "ignoring unparseable paused_at");
                    None
                }
            });

            let mut detail_values = Vec::with_capacity(descriptor.detail_columns.len());
            for index in 0..descriptor.detail_columns.len() {
                detail_values.push(value_text(row.get(6 + index)?));
            }
            let details = RecordDetails::from_columns(kind, |column| {
                descriptor
                    .detail_columns
                    .iter()
                    .position(|candidate| *candidate == column)
                    .and_then(|index| detail_values.get(index).cloned().flatten())
            });

            records.push(TrackedRecord {
                id: RecordId(id),
                user_id: UserId(owner),
                expiry,
                active,
                paused,
                paused_at,
                details,
            });
        }

        Ok(records)
    }

    /// Set or clear the pause flag on one record. Setting it stamps `paused_at`.
    ///
    /// Returns `false` when no record with that id exists.
    ///
    /// # Errors
    /// Returns an error when the update fails.
    pub fn set_record_paused(
        &mut self,
        kind: LicenseKind,
        record_id: &RecordId,
        paused: bool,
        now: OffsetDateTime,
    ) -> Result<bool> {
        let descriptor = kind.descriptor();
        let stamp = timestamp(now)?;
        let sql = format!(
            "UPDATE {}
             SET notifications_paused = ?1,
                 paused_at = CASE WHEN ?1 = 1 THEN ?2 ELSE paused_at END,
                 updated_at = ?2
             WHERE id = ?3",
            descriptor.table
        );
        let changed = self
            .conn
            .execute(&sql, params![i64::from(paused), stamp, record_id.as_str()])
            .with_context(|| format!("failed to update pause flag on {kind} record {record_id}"))?;
        Ok(changed > 0)
    }

    /// Validate and store one reminder policy, replacing any previous row for the same kind.
    ///
    /// # Errors
    /// Returns an error when validation fails or the write fails.
    pub fn upsert_policy(&mut self, policy: &ReminderPolicy) -> Result<()> {
        policy.validate().map_err(|err| anyhow!("policy validation failed: {err}"))?;

        self.conn
            .execute(
                "INSERT INTO reminder_policies(
                    user_id, license_kind, enabled, lead_time_days, frequency, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id, license_kind) DO UPDATE SET
                    enabled = excluded.enabled,
                    lead_time_days = excluded.lead_time_days,
                    frequency = excluded.frequency,
                    updated_at = excluded.updated_at",
                params![
                    policy.user_id.as_str(),
                    policy.kind.as_str(),
                    i64::from(policy.enabled),
                    policy.lead_time_days,
                    policy.frequency.as_str(),
                    now_timestamp()?,
                ],
            )
            .with_context(|| {
                format!("failed to upsert {} policy for {}", policy.kind, policy.user_id)
            })?;
        Ok(())
    }

    /// Every policy row stored for `user_id`.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or carry an unknown kind.
    pub fn list_policies(&self, user_id: &UserId) -> Result<Vec<ReminderPolicy>> {
        let mut stmt = self.conn.prepare(
            "SELECT license_kind, enabled, lead_time_days, frequency
             FROM reminder_policies
             WHERE user_id = ?1
             ORDER BY license_kind ASC",
        )?;
        let mut rows = stmt.query(params![user_id.as_str()])?;
        let mut policies = Vec::new();

        while let Some(row) = rows.next()? {
            let kind_raw: String = row.get(0)?;
            let frequency_raw: String = row.get(3)?;
            policies.push(ReminderPolicy {
                user_id: user_id.clone(),
                kind: LicenseKind::parse(&kind_raw)
                    .ok_or_else(|| anyhow!("unknown license_kind: {kind_raw}"))?,
                enabled: row.get::<_, i64>(1)? != 0,
                lead_time_days: row.get(2)?,
                frequency: Frequency::parse(&frequency_raw),
            });
        }

        Ok(policies)
    }

    /// Most recent `expiry` audit timestamp for the user, across all kinds.
    ///
    /// # Errors
    /// Returns an error when the query fails or the stored timestamp is invalid.
    pub fn latest_expiry_reminder(&self, user_id: &UserId) -> Result<Option<OffsetDateTime>> {
        let raw = self
            .conn
            .query_row(
                "SELECT created_at FROM reminder_audit
                 WHERE user_id = ?1 AND category = ?2
                 ORDER BY created_at DESC
                 LIMIT 1",
                params![user_id.as_str(), AuditCategory::Expiry.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("failed to read last reminder for {user_id}"))?;
        raw.as_deref().map(parse_timestamp).transpose()
    }

    /// Whether a `pause` audit row exists for this record at or after `since`.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn has_pause_notice_since(
        &self,
        user_id: &UserId,
        record_id: &RecordId,
        since: OffsetDateTime,
    ) -> Result<bool> {
        let exists = self
            .conn
            .query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM reminder_audit
                    WHERE user_id = ?1 AND record_id = ?2 AND category = ?3 AND created_at >= ?4
                 )",
                params![
                    user_id.as_str(),
                    record_id.as_str(),
                    AuditCategory::Pause.as_str(),
                    timestamp(since)?
                ],
                |row| row.get::<_, i64>(0),
            )
            .with_context(|| format!("failed to check pause notices for record {record_id}"))?;
        Ok(exists == 1)
    }

    /// Append one audit row.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub fn insert_audit(&mut self, entry: &ReminderAuditRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO reminder_audit(
                    audit_id, user_id, license_kind, record_id, category, message, created_at, is_read
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.audit_id.to_string(),
                    entry.user_id.as_str(),
                    entry.kind.as_str(),
                    entry.record_id.as_str(),
                    entry.category.as_str(),
                    entry.message,
                    timestamp(entry.created_at)?,
                    i64::from(entry.read),
                ],
            )
            .context("failed to insert reminder audit record")?;
        Ok(())
    }

    /// Audit rows newest first, optionally for one user.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_audit(
        &self,
        user_id: Option<&UserId>,
        limit: usize,
    ) -> Result<Vec<ReminderAuditRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(
            "SELECT audit_id, user_id, license_kind, record_id, category, message, created_at, is_read
             FROM reminder_audit
             WHERE ?1 IS NULL OR user_id = ?1
             ORDER BY created_at DESC, audit_id DESC
             LIMIT ?2",
        )?;
        let mut rows = stmt.query(params![user_id.map(UserId::as_str), limit])?;
        let mut entries = Vec::new();

        while let Some(row) = rows.next()? {
            let audit_id_raw: String = row.get(0)?;
            let kind_raw: String = row.get(2)?;
            let category_raw: String = row.get(4)?;
            let created_at_raw: String = row.get(6)?;

            entries.push(ReminderAuditRecord {
                audit_id: AuditId(
                    Ulid::from_string(&audit_id_raw)
                        .with_context(|| format!("invalid ULID: {audit_id_raw}"))?,
                ),
                user_id: UserId(row.get(1)?),
                kind: LicenseKind::parse(&kind_raw)
                    .ok_or_else(|| anyhow!("unknown license_kind: {kind_raw}"))?,
                record_id: RecordId(row.get(3)?),
                category: AuditCategory::parse(&category_raw)
                    .ok_or_else(|| anyhow!("unknown audit category: {category_raw}"))?,
                message: row.get(5)?,
                created_at: parse_timestamp(&created_at_raw)?,
                read: row.get::<_, i64>(7)? != 0,
            });
        }

        Ok(entries)
    }

    /// Mark every active subscription whose end timestamp has passed as `expired`.
    ///
    /// Returns the number of subscribers updated.
    ///
    /// # Errors
    /// Returns an error when subscribers cannot be read or updated.
    pub fn expire_lapsed_subscriptions(&mut self, now: OffsetDateTime) -> Result<usize> {
        let tx = self.conn.transaction().context("failed to start transaction")?;

        let candidates = {
            let mut stmt = tx.prepare(
                "SELECT user_id, subscription_end FROM subscribers
                 WHERE subscription_status = 'active' AND subscription_end IS NOT NULL",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let stamp = timestamp(now)?;
        let mut expired = 0_usize;
        for (user_id, end_raw) in candidates {
            let ends_at = match parse_timestamp(&end_raw) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(user_id = %user_id, error = %err, "skipping subscriber with unparseable subscription_end");
                    continue;
                }
            };
            if ends_at > now {
                continue;
            }

            expired += tx
                .execute(
                    "UPDATE subscribers SET subscription_status = ?1, updated_at = ?2 WHERE user_id = ?3",
                    params![SubscriptionStatus::Expired.as_str(), stamp, user_id],
                )
                .with_context(|| format!("failed to expire subscription for {user_id}"))?;
        }

        tx.commit().context("failed to commit subscription sweep")?;
        info!(expired, "subscription sweep complete");
        Ok(expired)
    }

    /// Clear the pause flag on records paused at least [`PAUSE_COOLDOWN_DAYS`] ago.
    ///
    /// A failure on one table is logged and the sweep moves on to the next kind.
    ///
    /// # Errors
    /// Returns an error only when the sweep timestamp cannot be formatted.
    pub fn resume_paused_records(&mut self, now: OffsetDateTime) -> Result<PauseSweepReport> {
        let cutoff = now - Duration::days(PAUSE_COOLDOWN_DAYS);
        let stamp = timestamp(now)?;
        let mut report = PauseSweepReport::default();

        for kind in LicenseKind::ALL {
            match self.resume_paused_kind(kind.descriptor(), cutoff, &stamp) {
                Ok((resumed, skipped)) => {
                    report.skipped_without_timestamp += skipped;
                    if resumed > 0 {
                        report.resumed.insert(kind, resumed);
                    }
                }
                Err(err) => {
                    warn!(kind = %kind, error = %format!("{err:#}"), "pause sweep failed for kind; continuing");
                    report.failed_kinds.push(kind);
                }
            }
        }

        info!(
            resumed = report.total_resumed(),
            skipped = report.skipped_without_timestamp,
            failed = report.failed_kinds.len(),
            "pause sweep complete"
        );
        Ok(report)
    }

    fn resume_paused_kind(
        &mut self,
        descriptor: &KindDescriptor,
        cutoff: OffsetDateTime,
        stamp: &str,
    ) -> Result<(usize, usize)> {
        let tx = self.conn.transaction().context("failed to start transaction")?;

        let paused = {
            let mut stmt = tx.prepare(&format!(
                "SELECT id, paused_at FROM {} WHERE notifications_paused = 1",
                descriptor.table
            ))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut resumed = 0_usize;
        let mut skipped = 0_usize;
        for (id, paused_at_raw) in paused {
            let Some(paused_at) = paused_at_raw.as_deref().and_then(|raw| parse_timestamp(raw).ok())
            else {
                warn!(table = descriptor.table, record_id = %id, "paused record has no usable paused_at; skipping");
                skipped += 1;
                continue;
            };
            if paused_at > cutoff {
                continue;
            }

            resumed += tx.execute(
                &format!(
                    "UPDATE {} SET notifications_paused = 0, updated_at = ?1 WHERE id = ?2",
                    descriptor.table
                ),
                params![stamp, id],
            )?;
        }

        tx.commit().context("failed to commit pause sweep")?;
        Ok((resumed, skipped))
    }

    /// Write a consistent copy of the database to `out_file`.
    ///
    /// # Errors
    /// Returns an error when backup directories cannot be created or backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Run quick-check, foreign-key-check, and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }
}

impl ReminderStore for SqliteStore {
    fn active_subscribers(&self) -> Result<Vec<Subscriber>, ReminderError> {
        self.list_active_subscribers().map_err(store_error)
    }

    fn records_for(
        &self,
        user_id: &UserId,
        kind: LicenseKind,
    ) -> Result<Vec<TrackedRecord>, ReminderError> {
        self.list_records(user_id, kind).map_err(store_error)
    }

    fn policies_for(&self, user_id: &UserId) -> Result<Vec<ReminderPolicy>, ReminderError> {
        self.list_policies(user_id).map_err(store_error)
    }

    fn last_reminder_for(&self, user_id: &UserId) -> Result<Option<OffsetDateTime>, ReminderError> {
        self.latest_expiry_reminder(user_id).map_err(store_error)
    }

    fn pause_notice_since(
        &self,
        user_id: &UserId,
        record_id: &RecordId,
        since: OffsetDateTime,
    ) -> Result<bool, ReminderError> {
        self.has_pause_notice_since(user_id, record_id, since).map_err(store_error)
    }

    fn append_audit(&mut self, entry: &ReminderAuditRecord) -> Result<(), ReminderError> {
        self.insert_audit(entry).map_err(store_error)
    }
}

#[allow(clippy::needless_pass_by_value)]
fn store_error(err: anyhow::Error) -> ReminderError {
    ReminderError::Store(format!("{err:#}"))
}

struct SubscriberRow {
    user_id: String,
    email: String,
    display_name: Option<String>,
    status: String,
    subscription_end: Option<String>,
}

impl SubscriberRow {
    fn into_subscriber(self) -> Result<Subscriber> {
        Ok(Subscriber {
            subscription_status: SubscriptionStatus::parse(&self.status)
                .ok_or_else(|| anyhow!("unknown subscription_status: {}", self.status))?,
            subscription_end: self.subscription_end.as_deref().map(parse_timestamp).transpose()?,
            user_id: UserId(self.user_id),
            email: self.email,
            display_name: self.display_name,
        })
    }
}

fn read_subscriber_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SubscriberRow> {
    Ok(SubscriberRow {
        user_id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        status: row.get(3)?,
        subscription_end: row.get(4)?,
    })
}

fn migration_001_sql() -> String {
    let kinds = LicenseKind::ALL
        .iter()
        .map(|kind| format!("'{}'", kind.as_str()))
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = MIGRATION_001_SHARED_SQL.to_string();
    sql.push_str(&format!(
        r"
CREATE TABLE IF NOT EXISTS reminder_policies (
  user_id TEXT NOT NULL REFERENCES subscribers(user_id) ON DELETE CASCADE,
  license_kind TEXT NOT NULL CHECK (license_kind IN ({kinds})),
  enabled INTEGER NOT NULL CHECK (enabled IN (0, 1)),
  lead_time_days INTEGER NOT NULL
    CHECK (lead_time_days BETWEEN {MIN_LEAD_TIME_DAYS} AND {MAX_LEAD_TIME_DAYS}),
  frequency TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  PRIMARY KEY (user_id, license_kind)
);
"
    ));

    for kind in LicenseKind::ALL {
        sql.push_str(&tracked_table_sql(kind.descriptor()));
    }
    sql
}

fn tracked_table_sql(descriptor: &KindDescriptor) -> String {
    let status_type = match descriptor.active_rule {
        ActiveRule::Flag => "INTEGER",
        ActiveRule::StatusText(_) => "TEXT",
    };
    let detail_columns =
        descriptor.detail_columns.iter().map(|column| format!("  {column} TEXT,\n")).collect::<String>();

    format!(
        r"
CREATE TABLE IF NOT EXISTS {table} (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL REFERENCES subscribers(user_id) ON DELETE CASCADE,
  {expiry} TEXT,
  {status} {status_type},
  notifications_paused INTEGER NOT NULL DEFAULT 0 CHECK (notifications_paused IN (0, 1)),
  paused_at TEXT,
{detail_columns}  updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_{table}_user ON {table}(user_id);
",
        table = descriptor.table,
        expiry = descriptor.expiry_column,
        status = descriptor.status_column,
    )
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_timestamp()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn value_text(value: Value) -> Option<String> {
    match value {
        Value::Text(text) => Some(text),
        Value::Integer(number) => Some(number.to_string()),
        Value::Real(number) => Some(number.to_string()),
        Value::Null | Value::Blob(_) => None,
    }
}

fn status_value(value: Value) -> StatusValue {
    match value {
        Value::Integer(number) => StatusValue::Integer(number),
        Value::Real(number) => StatusValue::Bool(number.abs() > f64::EPSILON),
        Value::Text(text) => StatusValue::Text(text),
        Value::Null | Value::Blob(_) => StatusValue::Null,
    }
}

fn status_to_sql(value: StatusValue) -> Value {
    match value {
        StatusValue::Null => Value::Null,
        StatusValue::Bool(flag) => Value::Integer(i64::from(flag)),
        StatusValue::Integer(number) => Value::Integer(number),
        StatusValue::Text(text) => Value::Text(text),
    }
}

fn expiry_to_sql(expiry: &ExpiryValue) -> Value {
    match expiry {
        ExpiryValue::Unset => Value::Null,
        ExpiryValue::Date(date) => Value::Text(date.to_string()),
        ExpiryValue::Malformed(raw) => Value::Text(raw.clone()),
    }
}

fn now_timestamp() -> Result<String> {
    timestamp(OffsetDateTime::now_utc())
}

/// RFC 3339 in UTC at second precision, so text order matches time order.
fn timestamp(value: OffsetDateTime) -> Result<String> {
    value
        .to_offset(UtcOffset::UTC)
        .replace_nanosecond(0)
        .context("failed to truncate timestamp")?
        .format(&Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_timestamp(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}
