use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use reminder_core::model::parse_calendar_date;
use reminder_core::{
    run_reminders, ExpiryValue, Frequency, LicenseKind, RecordDetails, RecordId, ReminderPolicy,
    RunOptions, Subscriber, SubscriptionStatus, TrackedRecord, UserId,
};
use reminder_store_sqlite::SqliteStore;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::{resolve_mail_settings, FileConfig, MailOverrides};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "remind")]
#[command(about = "License renewal reminder engine")]
#[command(version)]
struct Cli {
    /// YAML config file.
    #[arg(long, env = "REMIND_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides `database` in the config file).
    #[arg(long, env = "REMIND_DB", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    /// Evaluate every active subscriber and send due reminders.
    Run(RunArgs),
    Sweep {
        #[command(subcommand)]
        command: SweepCommand,
    },
    Subscriber {
        #[command(subcommand)]
        command: SubscriberCommand,
    },
    Record {
        #[command(subcommand)]
        command: RecordCommand,
    },
    Policy {
        #[command(subcommand)]
        command: PolicyCommand,
    },
    Audit {
        #[command(subcommand)]
        command: AuditCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    Backup(DbBackupArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Evaluate as of this RFC 3339 UTC timestamp instead of now.
    #[arg(long)]
    as_of: Option<String>,
    /// Compose and report without sending or writing audit records.
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    #[command(flatten)]
    mail: MailOverrides,
}

#[derive(Debug, Subcommand)]
enum SweepCommand {
    /// Mark active subscriptions past their end timestamp as expired.
    Subscriptions(SweepArgs),
    /// Clear pause flags set more than five days ago.
    Pauses(SweepArgs),
}

#[derive(Debug, Args)]
struct SweepArgs {
    #[arg(long)]
    as_of: Option<String>,
}

#[derive(Debug, Subcommand)]
enum SubscriberCommand {
    Upsert(SubscriberUpsertArgs),
}

#[derive(Debug, Args)]
struct SubscriberUpsertArgs {
    #[arg(long)]
    user: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long, value_enum, default_value_t = SubscriptionStatusArg::Active)]
    status: SubscriptionStatusArg,
    #[arg(long)]
    ends_at: Option<String>,
}

#[derive(Debug, Subcommand)]
enum RecordCommand {
    Add(RecordAddArgs),
    Pause(RecordPauseArgs),
}

#[derive(Debug, Args)]
struct RecordAddArgs {
    #[arg(long, value_parser = parse_kind)]
    kind: LicenseKind,
    #[arg(long)]
    id: String,
    #[arg(long)]
    user: String,
    /// Expiry date as YYYY-MM-DD.
    #[arg(long)]
    expiry: Option<String>,
    #[arg(long, default_value_t = false)]
    inactive: bool,
    #[arg(long, default_value_t = false)]
    paused: bool,
    /// Detail column value, e.g. `--detail registration_number=CA123456`. Repeatable.
    #[arg(long = "detail", value_parser = parse_detail)]
    details: Vec<(String, String)>,
}

#[derive(Debug, Args)]
struct RecordPauseArgs {
    #[arg(long, value_parser = parse_kind)]
    kind: LicenseKind,
    #[arg(long)]
    id: String,
    /// Clear the pause flag instead of setting it.
    #[arg(long, default_value_t = false)]
    resume: bool,
    #[arg(long)]
    as_of: Option<String>,
}

#[derive(Debug, Subcommand)]
enum PolicyCommand {
    Set(PolicySetArgs),
}

#[derive(Debug, Args)]
struct PolicySetArgs {
    #[arg(long)]
    user: String,
    #[arg(long, value_parser = parse_kind)]
    kind: LicenseKind,
    #[arg(long, allow_hyphen_values = true)]
    lead_time_days: i64,
    #[arg(long, value_enum)]
    frequency: FrequencyArg,
    #[arg(long, default_value_t = false)]
    disabled: bool,
}

#[derive(Debug, Subcommand)]
enum AuditCommand {
    List(AuditListArgs),
}

#[derive(Debug, Args)]
struct AuditListArgs {
    #[arg(long)]
    user: Option<String>,
    #[arg(long, default_value_t = 50)]
    limit: usize,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SubscriptionStatusArg {
    Active,
    Inactive,
    Expired,
}

impl From<SubscriptionStatusArg> for SubscriptionStatus {
    fn from(value: SubscriptionStatusArg) -> Self {
        match value {
            SubscriptionStatusArg::Active => Self::Active,
            SubscriptionStatusArg::Inactive => Self::Inactive,
            SubscriptionStatusArg::Expired => Self::Expired,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FrequencyArg {
    Daily,
    Weekly,
    Monthly,
}

impl From<FrequencyArg> for Frequency {
    fn from(value: FrequencyArg) -> Self {
        match value {
            FrequencyArg::Daily => Self::Daily,
            FrequencyArg::Weekly => Self::Weekly,
            FrequencyArg::Monthly => Self::Monthly,
        }
    }
}

fn parse_kind(value: &str) -> std::result::Result<LicenseKind, String> {
    LicenseKind::parse(value).ok_or_else(|| {
        let known = LicenseKind::ALL.iter().map(|kind| kind.as_str()).collect::<Vec<_>>();
        format!("unknown license kind `{value}`; expected one of: {}", known.join(", "))
    })
}

fn parse_detail(value: &str) -> std::result::Result<(String, String), String> {
    let (column, text) =
        value.split_once('=').ok_or_else(|| format!("detail `{value}` must look like column=value"))?;
    Ok((column.trim().to_string(), text.to_string()))
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing(config_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config_filter))
        .unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let file_config = FileConfig::load(cli.config.as_deref())?;
    init_tracing(file_config.log_filter());

    let db_path = file_config.database(cli.db.as_deref());
    match cli.command {
        Command::Db { command } => {
            let mut store = SqliteStore::open(&db_path)?;
            run_db(command, &mut store)
        }
        Command::Run(args) => run_reminder_pass(&args, &file_config, &db_path),
        Command::Sweep { command } => {
            let mut store = open_migrated(&db_path)?;
            run_sweep(&command, &mut store)
        }
        Command::Subscriber { command } => {
            let mut store = open_migrated(&db_path)?;
            run_subscriber(command, &mut store)
        }
        Command::Record { command } => {
            let mut store = open_migrated(&db_path)?;
            run_record(command, &mut store)
        }
        Command::Policy { command } => {
            let mut store = open_migrated(&db_path)?;
            run_policy(&command, &mut store)
        }
        Command::Audit { command } => {
            let store = open_migrated(&db_path)?;
            run_audit(&command, &store)
        }
    }
}

fn open_migrated(db_path: &std::path::Path) -> Result<SqliteStore> {
    let mut store = SqliteStore::open(db_path)?;
    store.migrate()?;
    Ok(store)
}

fn run_db(command: DbCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => run_db_schema_version(store),
        DbCommand::Migrate(args) => run_db_migrate(&args, store),
        DbCommand::Backup(args) => run_db_backup(&args, store),
        DbCommand::IntegrityCheck => run_db_integrity_check(store),
    }
}

fn run_db_schema_version(store: &SqliteStore) -> Result<()> {
    let status = store.schema_status()?;
    emit_json(serde_json::json!({
        "current_version": status.current_version,
        "target_version": status.target_version,
        "pending_versions": status.pending_versions,
        "up_to_date": status.pending_versions.is_empty()
    }))
}

fn run_db_migrate(args: &DbMigrateArgs, store: &mut SqliteStore) -> Result<()> {
    let before = store.schema_status()?;
    if args.dry_run {
        emit_json(serde_json::json!({
            "dry_run": true,
            "current_version": before.current_version,
            "target_version": before.target_version,
            "would_apply_versions": before.pending_versions
        }))?;
        return Ok(());
    }

    store.migrate()?;
    let after = store.schema_status()?;
    emit_json(serde_json::json!({
        "dry_run": false,
        "before_version": before.current_version,
        "applied_versions": before.pending_versions,
        "after_version": after.current_version,
        "target_version": after.target_version,
        "up_to_date": after.pending_versions.is_empty()
    }))
}

fn run_db_backup(args: &DbBackupArgs, store: &SqliteStore) -> Result<()> {
    store.backup_database(&args.out)?;
    emit_json(serde_json::json!({
        "backup_written": true,
        "out": args.out.display().to_string()
    }))
}

fn run_db_integrity_check(store: &SqliteStore) -> Result<()> {
    let report = store.integrity_check()?;
    emit_json(serde_json::to_value(report)?)
}

fn run_reminder_pass(args: &RunArgs, file_config: &FileConfig, db_path: &std::path::Path) -> Result<()> {
    let now = resolve_as_of(args.as_of.as_deref())?;
    let settings = resolve_mail_settings(&file_config.mail, &args.mail);
    let mailer = settings.build_mailer().context("mail transport is not configured")?;

    let mut store = open_migrated(db_path)?;
    info!(db = %db_path.display(), transport = settings.transport.as_str(), "reminder run configured");
    let report = run_reminders(&mut store, &mailer, now, RunOptions { dry_run: args.dry_run })
        .context("reminder run aborted")?;
    emit_json(serde_json::to_value(report)?)
}

fn run_sweep(command: &SweepCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        SweepCommand::Subscriptions(args) => {
            let now = resolve_as_of(args.as_of.as_deref())?;
            let expired = store.expire_lapsed_subscriptions(now)?;
            emit_json(serde_json::json!({
                "sweep": "subscriptions",
                "as_of": rfc3339(now)?,
                "expired": expired
            }))
        }
        SweepCommand::Pauses(args) => {
            let now = resolve_as_of(args.as_of.as_deref())?;
            let report = store.resume_paused_records(now)?;
            emit_json(serde_json::json!({
                "sweep": "pauses",
                "as_of": rfc3339(now)?,
                "resumed_total": report.total_resumed(),
                "resumed": report.resumed,
                "skipped_without_timestamp": report.skipped_without_timestamp,
                "failed_kinds": report.failed_kinds
            }))
        }
    }
}

fn run_subscriber(command: SubscriberCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        SubscriberCommand::Upsert(args) => {
            let subscriber = Subscriber {
                user_id: UserId(args.user),
                email: args.email,
                display_name: args.name,
                subscription_status: args.status.into(),
                subscription_end: args.ends_at.as_deref().map(parse_rfc3339).transpose()?,
            };
            store.upsert_subscriber(&subscriber)?;
            emit_json(serde_json::to_value(&subscriber)?)
        }
    }
}

fn run_record(command: RecordCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        RecordCommand::Add(args) => run_record_add(args, store),
        RecordCommand::Pause(args) => {
            let now = resolve_as_of(args.as_of.as_deref())?;
            let record_id = RecordId(args.id);
            let updated = store.set_record_paused(args.kind, &record_id, !args.resume, now)?;
            if !updated {
                return Err(anyhow!("no {} record with id {record_id}", args.kind));
            }
            emit_json(serde_json::json!({
                "kind": args.kind,
                "record_id": record_id,
                "paused": !args.resume,
                "as_of": rfc3339(now)?
            }))
        }
    }
}

fn run_record_add(args: RecordAddArgs, store: &mut SqliteStore) -> Result<()> {
    let descriptor = args.kind.descriptor();
    let mut details = BTreeMap::new();
    for (column, value) in args.details {
        if !descriptor.detail_columns.contains(&column.as_str()) {
            return Err(anyhow!(
                "unknown detail column `{column}` for {}; expected one of: {}",
                args.kind,
                descriptor.detail_columns.join(", ")
            ));
        }
        details.insert(column, value);
    }

    let expiry = match args.expiry.as_deref() {
        Some(raw) => ExpiryValue::Date(
            parse_calendar_date(raw).with_context(|| format!("invalid expiry date: {raw}"))?,
        ),
        None => ExpiryValue::Unset,
    };
    let now = OffsetDateTime::now_utc();
    let record = TrackedRecord {
        id: RecordId(args.id),
        user_id: UserId(args.user),
        expiry,
        active: !args.inactive,
        paused: args.paused,
        paused_at: args.paused.then_some(now),
        details: RecordDetails::from_columns(args.kind, |column| details.get(column).cloned()),
    };
    store.insert_record(&record)?;

    emit_json(serde_json::json!({
        "kind": args.kind,
        "record_id": record.id,
        "user_id": record.user_id,
        "label": record.label(),
        "expiry_date": record.expiry.date().map(|date| date.to_string()),
        "active": record.active,
        "paused": record.paused
    }))
}

fn run_policy(command: &PolicyCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        PolicyCommand::Set(args) => {
            let policy = ReminderPolicy {
                user_id: UserId(args.user.clone()),
                kind: args.kind,
                enabled: !args.disabled,
                lead_time_days: args.lead_time_days,
                frequency: args.frequency.into(),
            };
            store.upsert_policy(&policy)?;
            emit_json(serde_json::to_value(&policy)?)
        }
    }
}

fn run_audit(command: &AuditCommand, store: &SqliteStore) -> Result<()> {
    match command {
        AuditCommand::List(args) => {
            let user = args.user.clone().map(UserId);
            let entries = store.list_audit(user.as_ref(), args.limit)?;
            emit_json(serde_json::json!({
                "count": entries.len(),
                "entries": entries
            }))
        }
    }
}

fn resolve_as_of(value: Option<&str>) -> Result<OffsetDateTime> {
    value.map_or_else(|| Ok(OffsetDateTime::now_utc()), parse_rfc3339)
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 UTC timestamp: {value}"))?;

    if parsed.offset() != time::UtcOffset::UTC {
        return Err(anyhow!("timestamp MUST use UTC offset Z (received: {value})"));
    }

    Ok(parsed)
}
