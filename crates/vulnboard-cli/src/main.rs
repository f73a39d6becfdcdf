use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use vulnboard_api::{dataset_fingerprint, DashboardApi, ViewRequest};
use vulnboard_core::{FilterState, VulnerabilityRecord};
use vulnboard_store_sqlite::SqliteStore;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

const SAMPLE_PACKAGES: [&str; 10] = [
    "react",
    "lodash",
    "express",
    "django",
    "spring-boot",
    "jquery",
    "bootstrap",
    "axios",
    "moment",
    "next",
];
const SAMPLE_SEVERITIES: [&str; 4] = ["Critical", "High", "Medium", "Low"];
const SAMPLE_KAI_STATUSES: [&str; 6] =
    ["valid", "invalid - norisk", "ai-invalid-norisk", "available", "investigate", "pending"];
const SAMPLE_RISK_FACTORS: [&str; 6] = [
    "Remote Code Execution",
    "DoS",
    "XSS",
    "SQL Injection",
    "Privilege Escalation",
    "Information Disclosure",
];

// Published dates are drawn from a fixed window so seeded samples are
// reproducible across runs: 2023-01-01T00:00:00Z .. 2024-12-31T23:59:59Z.
const SAMPLE_DATE_MIN: i64 = 1_672_531_200;
const SAMPLE_DATE_MAX: i64 = 1_735_689_599;

#[derive(Debug, Parser)]
#[command(name = "vb")]
#[command(about = "VulnBoard CLI")]
struct Cli {
    #[arg(long, default_value = "./vulnboard.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: Box<DbCommand>,
    },
    Feed {
        #[command(subcommand)]
        command: Box<FeedCommand>,
    },
    View(ViewArgs),
    Profile {
        #[command(subcommand)]
        command: Box<ProfileCommand>,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum FeedCommand {
    Sample(FeedSampleArgs),
    Inspect(FeedInspectArgs),
}

#[derive(Debug, Args)]
struct FeedSampleArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value_t = 50)]
    count: usize,
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Args)]
struct FeedInspectArgs {
    #[arg(long)]
    feed: PathBuf,
}

#[derive(Debug, Args)]
struct ViewArgs {
    #[arg(long)]
    feed: PathBuf,
    #[arg(long)]
    query: Option<String>,
    #[arg(long = "filter")]
    filters: Vec<String>,
    #[arg(long)]
    profile: Option<String>,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Subcommand)]
enum ProfileCommand {
    Save(ProfileSaveArgs),
    Show(ProfileNameArgs),
    List,
    Delete(ProfileNameArgs),
}

#[derive(Debug, Args)]
struct ProfileSaveArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    query: Option<String>,
    #[arg(long = "filter")]
    filters: Vec<String>,
}

#[derive(Debug, Args)]
struct ProfileNameArgs {
    #[arg(long)]
    name: String,
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

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Db { command } => {
            let mut store = SqliteStore::open(&cli.db)?;
            run_db(*command, &mut store)
        }
        Command::Feed { command } => run_feed(*command),
        Command::View(args) => run_view(&args, &cli.db),
        Command::Profile { command } => {
            let mut store = SqliteStore::open(&cli.db)?;
            store.migrate()?;
            run_profile(*command, &mut store)
        }
    }
}

fn run_db(command: DbCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = store.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty(),
                "inferred_from_legacy": status.inferred_from_legacy
            }))
        }
        DbCommand::Migrate(args) => {
            let before = store.schema_status()?;
            if args.dry_run {
                return emit_json(serde_json::json!({
                    "dry_run": true,
                    "current_version": before.current_version,
                    "target_version": before.target_version,
                    "would_apply_versions": before.pending_versions,
                    "inferred_from_legacy": before.inferred_from_legacy
                }));
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
        DbCommand::IntegrityCheck => {
            let report = store.integrity_check()?;
            emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
        }
    }
}

fn run_feed(command: FeedCommand) -> Result<()> {
    match command {
        FeedCommand::Sample(args) => run_feed_sample(&args),
        FeedCommand::Inspect(args) => {
            let api = DashboardApi::new(args.feed.clone());
            let summary = api.inspect()?;
            let mut value =
                serde_json::to_value(&summary).context("failed to serialize feed summary")?;
            if let Value::Object(object) = &mut value {
                object.insert("feed".to_string(), serde_json::json!(args.feed));
            }
            emit_json(value)
        }
    }
}

fn run_feed_sample(args: &FeedSampleArgs) -> Result<()> {
    let seed = match args.seed {
        Some(seed) => seed,
        None => rand::rngs::OsRng.next_u64(),
    };
    let mut rng = StdRng::seed_from_u64(seed);

    let records =
        (0..args.count).map(|index| sample_record(&mut rng, index)).collect::<Result<Vec<_>>>()?;

    let body =
        serde_json::to_string_pretty(&records).context("failed to serialize sample feed")?;
    if let Some(parent) = args.out.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for {}", args.out.display())
            })?;
        }
    }
    fs::write(&args.out, body)
        .with_context(|| format!("failed to write sample feed {}", args.out.display()))?;

    emit_json(serde_json::json!({
        "out": args.out,
        "count": records.len(),
        "seed": seed,
        "dataset_fingerprint": dataset_fingerprint(&records)
    }))
}

fn sample_record(rng: &mut StdRng, index: usize) -> Result<VulnerabilityRecord> {
    let severity = pick(rng, &SAMPLE_SEVERITIES);
    let cvss = match severity {
        "Critical" => 9.0 + rng.gen::<f64>(),
        "High" => 7.0 + rng.gen::<f64>() * 2.0,
        "Medium" => 4.0 + rng.gen::<f64>() * 3.0,
        _ => rng.gen::<f64>() * 4.0,
    };
    let cvss = (cvss * 10.0).round() / 10.0;

    let package_name = pick(rng, &SAMPLE_PACKAGES).to_string();
    let fixed_version = rng
        .gen_bool(0.5)
        .then(|| format!("{}.{}.0", rng.gen_range(0..6), rng.gen_range(0..10)));

    let factor_count = rng.gen_range(1..=3);
    let risk_factors =
        (0..factor_count).map(|_| pick(rng, &SAMPLE_RISK_FACTORS).to_string()).collect();

    let published_ts = rng.gen_range(SAMPLE_DATE_MIN..=SAMPLE_DATE_MAX);
    let published_date = OffsetDateTime::from_unix_timestamp(published_ts)
        .context("sample published date out of range")?
        .format(&Rfc3339)
        .context("failed to format sample published date")?;

    Ok(VulnerabilityRecord {
        cve_id: format!("CVE-{}-{}", 2020 + rng.gen_range(0..5), 1000 + index),
        package_name: package_name.clone(),
        current_version: format!("{}.{}.0", rng.gen_range(0..5), rng.gen_range(0..10)),
        fixed_version,
        severity: severity.to_string(),
        cvss,
        published_date,
        description: format!(
            "Sample security vulnerability description for {package_name}. This issue allows attackers to..."
        ),
        risk_factors,
        kai_status: pick(rng, &SAMPLE_KAI_STATUSES).to_string(),
    })
}

fn pick<'a>(rng: &mut StdRng, items: &'a [&'a str]) -> &'a str {
    items[rng.gen_range(0..items.len())]
}

fn run_view(args: &ViewArgs, db_path: &Path) -> Result<()> {
    let base_state = match &args.profile {
        Some(name) => Some(load_profile_state(db_path, name)?),
        None => None,
    };

    let api = DashboardApi::new(args.feed.clone());
    let mut result = api.view(ViewRequest {
        base_state,
        query: args.query.clone(),
        filters: args.filters.clone(),
    })?;

    // Display truncation only: stats always describe the full result set.
    if let Some(limit) = args.limit {
        result.records.truncate(limit);
    }

    emit_json(serde_json::json!({
        "feed": args.feed,
        "dataset_fingerprint": result.dataset_fingerprint,
        "source_records": result.source_records,
        "search_query": result.search_query,
        "active_filters": result.active_filters,
        "returned_records": result.records.len(),
        "records": result.records,
        "stats": result.stats
    }))
}

fn load_profile_state(db_path: &Path, name: &str) -> Result<FilterState> {
    let mut store = SqliteStore::open(db_path)?;
    store.migrate()?;
    let profile = store
        .get_profile(name)?
        .ok_or_else(|| anyhow!("filter profile not found: {name}"))?;
    Ok(profile.to_state())
}

fn run_profile(command: ProfileCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        ProfileCommand::Save(args) => {
            let state =
                FilterState::from_parts(args.query.unwrap_or_default(), args.filters);
            let profile = store.save_profile(&args.name, &state)?;
            emit_json(serde_json::to_value(&profile).context("failed to serialize profile")?)
        }
        ProfileCommand::Show(args) => {
            let profile = store
                .get_profile(&args.name)?
                .ok_or_else(|| anyhow!("filter profile not found: {}", args.name))?;
            emit_json(serde_json::to_value(&profile).context("failed to serialize profile")?)
        }
        ProfileCommand::List => {
            let profiles = store.list_profiles()?;
            emit_json(serde_json::json!({ "profiles": profiles }))
        }
        ProfileCommand::Delete(args) => {
            let deleted = store.delete_profile(&args.name)?;
            emit_json(serde_json::json!({
                "name": args.name,
                "deleted": deleted
            }))
        }
    }
}
