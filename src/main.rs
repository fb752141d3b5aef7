//! govreg-dns - operator CLI for the DNS record sub-system

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use govreg_dns::config::Config;
use govreg_dns::dns::metrics;
use govreg_dns::summary::render_notification_body;
use govreg_dns::{AssemblyCache, BatchReport, DnsRecordService, MemoryStorage, RecordStatus, RecordSubmission};
use rolling_file::{RollingConditionBasic, RollingFileAppender};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// 日志使用本地时区时间，默认会输出 UTC
struct LocalTimer;
impl fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

#[derive(Parser, Debug)]
#[command(name = "govreg-dns")]
#[command(about = "DNS records of government domain registration requests", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "govreg.conf")]
    config: String,

    /// Print the Prometheus text exposition after the command
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a registration request for an organization
    NewRequest {
        #[arg(long)]
        site_code: String,
    },
    /// Add a requested domain to a request
    AddDomain {
        #[arg(long)]
        token: String,
        #[arg(long)]
        fqdn: String,
    },
    /// Submit a JSON array of DNS records
    Submit {
        #[arg(long)]
        token: String,
        #[arg(long)]
        file: String,
    },
    /// Show the assembled records of one requested domain
    Show {
        #[arg(long)]
        domain_id: u64,
    },
    /// Summarize a request; `--notification` prints the email body instead
    Summary {
        #[arg(long)]
        token: String,
        #[arg(long)]
        notification: bool,
    },
    /// Check that every requested domain has at least one DNS record
    Check {
        #[arg(long)]
        token: String,
    },
    /// Remove one DNS record by its dns_record id
    RemoveRecord {
        #[arg(long)]
        token: String,
        #[arg(long)]
        pointer_id: u64,
    },
}

#[derive(Serialize)]
struct OutcomeView {
    index: usize,
    request_domain_id: u64,
    kind: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dns_record_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn report_view(report: &BatchReport) -> Vec<OutcomeView> {
    report
        .outcomes
        .iter()
        .enumerate()
        .map(|(index, o)| {
            let (status, dns_record_id, error) = match &o.status {
                RecordStatus::Stored(id) => ("stored", Some(*id), None),
                RecordStatus::RolledBack => ("rolled_back", None, None),
                RecordStatus::Failed(e) => ("failed", None, Some(e.to_string())),
                RecordStatus::NotProcessed => ("not_processed", None, None),
            };
            OutcomeView {
                index,
                request_domain_id: o.request_domain_id,
                kind: o.kind.clone(),
                status,
                dns_record_id,
                error,
            }
        })
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// 手动构建 runtime，线程数与 CPU 核心数一致
fn main() -> Result<()> {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cores)
        .thread_name("govreg-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    std::fs::create_dir_all(&cfg.log_dir)
        .with_context(|| format!("cannot create log directory {}", cfg.log_dir.display()))?;

    // 本地时区 00:00 切割日志
    let file_appender = RollingFileAppender::new(
        cfg.log_dir.join("govreg-dns.log"),
        RollingConditionBasic::new().daily(),
        cfg.log_keep,
    )?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // stdout 留给 JSON 输出，终端日志走 stderr
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false).with_timer(LocalTimer))
        .with(fmt::layer().with_writer(std::io::stderr).with_timer(LocalTimer))
        .init();

    info!("Starting govreg-dns version {}", env!("CARGO_PKG_VERSION"));

    let storage = match &cfg.snapshot {
        Some(path) => MemoryStorage::open(path)
            .with_context(|| format!("cannot open snapshot {}", path.display()))?,
        None => MemoryStorage::new(),
    };
    let cache = Arc::new(AssemblyCache::new(cfg.cache_capacity, cfg.cache_ttl));
    let service = DnsRecordService::new(Arc::new(storage.clone()), cache, cfg.batch_policy);

    match args.command {
        Command::NewRequest { site_code } => {
            let request = storage.create_request(&site_code)?;
            print_json(&request)?;
        }
        Command::AddDomain { token, fqdn } => {
            let ctx = service.context(&token).await?;
            let domain = storage.add_request_domain(ctx.request_id, &fqdn)?;
            print_json(&domain)?;
        }
        Command::Submit { token, file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("cannot read batch file {}", file))?;
            let batch: Vec<RecordSubmission> = serde_json::from_str(&raw)
                .with_context(|| format!("batch file {} is not a JSON array of records", file))?;
            let report = service.submit_records(&token, &batch).await?;
            print_json(&report_view(&report))?;
            if let Some((index, _, error)) = report.failure() {
                anyhow::bail!("record #{} rejected: {}", index + 1, error);
            }
        }
        Command::Show { domain_id } => {
            let records = service.get_records_for_domain(domain_id).await?;
            print_json(&records)?;
        }
        Command::Summary { token, notification } => {
            let summary = service.summarize_request(&token).await?;
            if notification {
                print!("{}", render_notification_body(&summary));
            } else {
                print_json(&summary)?;
            }
        }
        Command::Check { token } => {
            service.ensure_dns_step_complete(&token).await?;
            println!("every requested domain has DNS records");
        }
        Command::RemoveRecord { token, pointer_id } => {
            service.delete_record(&token, pointer_id).await?;
            println!("removed dns_record {}", pointer_id);
        }
    }

    if args.metrics {
        print!("{}", metrics::gather_text());
    }

    Ok(())
}
