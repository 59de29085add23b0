use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use riskwatch::alert::{AlertStatus, AlertStore};
use riskwatch::config::{self, DEFAULT_RULE_NAME};

#[derive(Parser)]
#[command(
    name = "riskwatch",
    about = "Explainable statistical anomaly detection and risk scoring for daily business metrics",
    version,
    long_about = None
)]
struct Cli {
    /// SQLite database path
    #[arg(long, global = true, default_value = "data/riskwatch.db")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the detection pipeline for one date (idempotent)
    Run {
        /// Target date (YYYY-MM-DD)
        #[arg(long)]
        date: String,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Inspect and work alerts
    Alerts {
        #[command(subcommand)]
        action: AlertAction,
    },

    /// Manage detection rule configuration
    Rules {
        #[command(subcommand)]
        action: RuleAction,
    },

    /// Load finalized daily aggregates from the metrics job
    Metrics {
        #[command(subcommand)]
        action: MetricAction,
    },
}

#[derive(Subcommand)]
enum AlertAction {
    /// List recent alerts
    List {
        #[arg(long, default_value = "50")]
        limit: usize,

        /// Filter by status: OPEN, ACK, or RESOLVED
        #[arg(long)]
        status: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Acknowledge an alert
    Ack {
        #[arg(long)]
        id: i64,

        /// Operator recorded on the transition
        #[arg(long)]
        actor: String,
    },

    /// Resolve an alert (terminal)
    Resolve {
        #[arg(long)]
        id: i64,

        /// Operator recorded on the transition
        #[arg(long)]
        actor: String,
    },
}

#[derive(Subcommand)]
enum RuleAction {
    /// Install the active rule configuration (defaults, or from a TOML file)
    Init {
        /// TOML rule file; omit to install defaults
        #[arg(long)]
        file: Option<String>,
    },

    /// Show the active rule configuration
    Show,
}

#[derive(Subcommand)]
enum MetricAction {
    /// Load a JSON array of {metric_date, metric_name, dimensions?, value}
    Load {
        #[arg(long)]
        file: String,
    },
}

#[derive(serde::Deserialize)]
struct MetricRow {
    metric_date: NaiveDate,
    metric_name: String,
    #[serde(default = "default_dimensions")]
    dimensions: String,
    value: f64,
}

fn default_dimensions() -> String {
    "{}".to_string()
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let pool = riskwatch::storage::open_pool(&cli.db)?;

    match cli.command {
        Commands::Run { date, json } => {
            let as_of = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .with_context(|| format!("bad --date '{date}', expected YYYY-MM-DD"))?;
            let report = riskwatch::run_detection(&pool, as_of)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Run {} for {}: {} alert(s), {} of {} series failed (rules {})",
                    report.run_id,
                    report.as_of,
                    report.alerts.len(),
                    report.series_failed,
                    report.series_total,
                    report.rule_version
                );
                for alert in &report.alerts {
                    println!(
                        "  [{}] #{} {} {} risk={:.2} -- {}",
                        alert.severity,
                        alert.alert_id,
                        alert.metric_name,
                        alert.method,
                        alert.risk_score,
                        alert.message
                    );
                }
            }
        }
        Commands::Alerts { action } => {
            let store = AlertStore::new(pool);
            match action {
                AlertAction::List {
                    limit,
                    status,
                    json,
                } => {
                    let status = match status.as_deref() {
                        Some(s) => Some(
                            AlertStatus::parse(s)
                                .with_context(|| format!("unknown status '{s}'"))?,
                        ),
                        None => None,
                    };
                    let alerts = store.list_recent(limit, status)?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&alerts)?);
                    } else if alerts.is_empty() {
                        println!("No alerts found.");
                    } else {
                        println!(
                            "{:<6} | {:<10} | {:<16} | {:<12} | {:<8} | {:<8} | Message",
                            "ID", "Status", "Metric", "Method", "Severity", "Risk"
                        );
                        println!(
                            "{:-<6}-|-{:-<10}-|-{:-<16}-|-{:-<12}-|-{:-<8}-|-{:-<8}-|-{:-<30}",
                            "", "", "", "", "", "", ""
                        );
                        for a in alerts {
                            println!(
                                "{:<6} | {:<10} | {:<16} | {:<12} | {:<8} | {:<8.2} | {}",
                                a.alert_id,
                                a.status,
                                a.metric_name,
                                a.method,
                                a.severity,
                                a.risk_score,
                                a.message
                            );
                        }
                    }
                }
                AlertAction::Ack { id, actor } => {
                    let alert = store.ack(id, &actor)?;
                    println!("Alert #{} acknowledged by {}.", alert.alert_id, actor);
                }
                AlertAction::Resolve { id, actor } => {
                    let alert = store.resolve(id, &actor)?;
                    println!("Alert #{} resolved by {}.", alert.alert_id, actor);
                }
            }
        }
        Commands::Rules { action } => match action {
            RuleAction::Init { file } => {
                let rule_config = match file {
                    Some(path) => {
                        let text = std::fs::read_to_string(&path)
                            .with_context(|| format!("read rule file {path}"))?;
                        config::rule_config_from_toml(&text)?
                    }
                    None => config::RuleConfig::default(),
                };
                config::save_rule_config(&pool, DEFAULT_RULE_NAME, &rule_config)?;
                println!(
                    "Rule configuration '{}' installed (version {}).",
                    DEFAULT_RULE_NAME, rule_config.rule_version
                );
            }
            RuleAction::Show => {
                let rule_config = config::load_rule_config(&pool, DEFAULT_RULE_NAME)?;
                println!("{}", serde_json::to_string_pretty(&rule_config)?);
            }
        },
        Commands::Metrics { action } => match action {
            MetricAction::Load { file } => {
                let text = std::fs::read_to_string(&file)
                    .with_context(|| format!("read metrics file {file}"))?;
                let rows: Vec<MetricRow> =
                    serde_json::from_str(&text).context("parse metrics JSON")?;
                let count = rows.len();
                for row in rows {
                    riskwatch::storage::save_metric_point(
                        &pool,
                        row.metric_date,
                        &row.metric_name,
                        &row.dimensions,
                        row.value,
                    )?;
                }
                println!("Loaded {count} metric point(s).");
            }
        },
    }

    Ok(())
}
