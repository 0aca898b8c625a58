use chrono::{Duration, NaiveDate};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use repometrics::date_util::parse_date;
use repometrics::query::period::parse_window;
use repometrics::{config_keys, ClosedCondition, DataSource, FilterSpec, Period, RepoMetrics};

#[derive(Parser)]
#[command(name = "repometrics", about = "Software-project activity metrics")]
struct Cli {
    /// Database path (default: ~/.repometrics/repometrics.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate value over the window
    Agg(MetricArgs),
    /// Time series over the window, one value per period
    Ts(MetricArgs),
    /// Compare the days before --anchor with the days before that
    Trends {
        #[command(flatten)]
        args: MetricArgs,
        /// End of the recent window, excluded (YYYY-MM-DD, default: today)
        #[arg(long)]
        anchor: Option<String>,
        /// Window length in days
        #[arg(long, default_value = "7")]
        days: u32,
    },
    /// Top items ranked by value
    List(MetricArgs),
    /// List available metrics
    Metrics {
        /// Only metrics of this data source (scm, its)
        #[arg(long)]
        source: Option<String>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show warehouse row counts
    Status,
}

#[derive(Args)]
struct MetricArgs {
    /// Metric id (see `repometrics metrics`)
    #[arg(long)]
    metric: String,
    /// Window start, included (YYYY-MM-DD)
    #[arg(long)]
    from: Option<String>,
    /// Window end, excluded (YYYY-MM-DD, default: today)
    #[arg(long)]
    to: Option<String>,
    /// Named window instead of --from/--to: 2025, 2025-Q1, 2025-03, 2025-W05, 30d
    #[arg(long, conflicts_with_all = ["from", "to"])]
    window: Option<String>,
    /// Time-series granularity: day, week, month, year
    #[arg(long)]
    period: Option<String>,
    /// Dimension filter as dim=value (repeatable), or dim=* for one result per item
    #[arg(long = "filter", value_name = "DIM=VALUE")]
    filters: Vec<String>,
    /// Extra dimension filter applied on top of --filter, as dim=value
    #[arg(long, value_name = "DIM=VALUE")]
    global: Option<String>,
    /// Drop events by this identity uuid (repeatable)
    #[arg(long = "exclude-actor", value_name = "UUID")]
    exclude_actors: Vec<String>,
    /// Drop events by members of this organization at event time (repeatable)
    #[arg(long = "exclude-org", value_name = "NAME")]
    exclude_orgs: Vec<String>,
    /// Drop events by identities flagged as bots
    #[arg(long)]
    exclude_bots: bool,
    /// Maximum number of items
    #[arg(long)]
    limit: Option<u32>,
    /// Issue field whose change marks an issue closed
    #[arg(long)]
    closed_field: Option<String>,
    /// Comma-separated values of --closed-field that mean closed
    #[arg(long)]
    closed_values: Option<String>,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

/// Default window length when neither --from nor --window is given.
const DEFAULT_WINDOW_DAYS: i64 = 90;

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Comma-separated list, trimmed, empty entries dropped.
fn split_values(s: &str) -> Vec<String> {
    s.split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn build_filter(rm: &RepoMetrics, args: &MetricArgs) -> anyhow::Result<FilterSpec> {
    let (start, end) = match &args.window {
        Some(w) => parse_window(w, today())?,
        None => {
            let end = match &args.to {
                Some(s) => parse_date(s)?,
                None => today(),
            };
            let start = match &args.from {
                Some(s) => parse_date(s)?,
                None => end
                    .checked_sub_signed(Duration::days(DEFAULT_WINDOW_DAYS))
                    .ok_or_else(|| anyhow::anyhow!("--to {end} is out of range"))?,
            };
            (start, end)
        }
    };

    let mut b = FilterSpec::builder(start, end).assignments(args.filters.as_slice())?;

    let period = match &args.period {
        Some(p) => Some(Period::parse(p)?),
        None => rm.default_period().await?,
    };
    if let Some(p) = period {
        b = b.period(p);
    }

    let limit = match args.limit {
        Some(n) => Some(n),
        None => rm.default_limit().await?,
    };
    if let Some(n) = limit {
        b = b.limit(n);
    }

    if let Some(g) = &args.global {
        let (dim, value) = repometrics::filter::parse_assignment(g)?;
        let value = value.ok_or_else(|| anyhow::anyhow!("--global needs a value, not '*'"))?;
        b = b.global_dimension(dim.name(), &value);
    }

    for uuid in &args.exclude_actors {
        b = b.exclude_actor(uuid);
    }
    if args.exclude_bots {
        for uuid in rm.bot_uuids().await? {
            b = b.exclude_actor(&uuid);
        }
    }
    for org in &args.exclude_orgs {
        b = b.exclude_organization(org);
    }

    let stored = rm.closed_condition().await?;
    if args.closed_field.is_some() || args.closed_values.is_some() || stored.is_some() {
        let base = stored.unwrap_or_default();
        b = b.closed_condition(ClosedCondition {
            field: args.closed_field.clone().unwrap_or(base.field),
            values: args
                .closed_values
                .as_deref()
                .map(split_values)
                .filter(|v| !v.is_empty())
                .unwrap_or(base.values),
        });
    }

    Ok(b.build()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => repometrics::Database::open_at(path).await?,
        None => repometrics::Database::open().await?,
    };
    let rm = RepoMetrics::new(db);

    match cli.command {
        Commands::Agg(args) => {
            let filter = build_filter(&rm, &args).await?;
            print_json(&rm.agg(&args.metric, filter).await?)?;
        }
        Commands::Ts(args) => {
            let filter = build_filter(&rm, &args).await?;
            print_json(&rm.ts(&args.metric, filter).await?)?;
        }
        Commands::Trends { args, anchor, days } => {
            let anchor = match anchor {
                Some(s) => parse_date(&s)?,
                None => today(),
            };
            let filter = build_filter(&rm, &args).await?;
            print_json(&rm.trends(&args.metric, filter, anchor, days).await?)?;
        }
        Commands::List(args) => {
            let filter = build_filter(&rm, &args).await?;
            print_json(&rm.list(&args.metric, filter).await?)?;
        }
        Commands::Metrics { source } => {
            let source = source.as_deref().map(DataSource::parse).transpose()?;
            for m in rm.metrics() {
                if source.map_or(true, |s| s == m.data_source) {
                    println!("{:<14} {:<4} {}", m.id, m.data_source.name(), m.name);
                }
            }
        }
        Commands::Config { action } => {
            handle_config(&rm, action).await?;
        }
        Commands::Status => {
            println!("Warehouse Status");
            for (table, count) in rm.status().await? {
                println!("  {table:<18} {count}");
            }
        }
    }

    Ok(())
}

async fn handle_config(rm: &RepoMetrics, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match rm.get_config(&key).await? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            rm.set_config(&key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items = rm.list_config().await?;
            if items.is_empty() {
                println!("No configuration set. Known keys: {}", config_keys::ALL.join(", "));
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}
