mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, EnvFilter};

use guard_core::{
    alert_channel, Alert, AlertDispatcher, AlertKind, DecisionEngine, FileBackend, FileRegistry,
    GuardConfig, HttpProber, MemoryBackend, Monitor, Notifier, Site, SiteRegistry, SiteStatus,
    StaticRegistry, TelegramConfig, TelegramNotifier,
};

fn version_string() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");

    if GIT_HASH.is_empty() {
        // Leak is fine — called once, lives for the program's lifetime.
        Box::leak(VERSION.to_string().into_boxed_str())
    } else {
        Box::leak(format!("{VERSION} ({GIT_HASH})").into_boxed_str())
    }
}

/// Site uptime monitor — probe HTTP(S) endpoints and alert on state changes.
#[derive(Parser)]
#[command(name = "uptimeguard", version = version_string(), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the monitor and the HTTP admin API.
    Serve {
        /// Listen address (e.g. 0.0.0.0:8080). Overrides config file.
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Path to TOML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Watch a single site from the command line (no API server).
    Watch {
        /// Site URL to probe.
        url: String,

        /// Display name; defaults to the URL.
        #[arg(long)]
        name: Option<String>,

        /// Require this keyword in the response body.
        #[arg(long)]
        keyword: Option<String>,

        /// Per-probe timeout in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Seconds between probes.
        #[arg(long, default_value_t = 10)]
        interval_secs: u64,

        /// Consecutive failures before an alert fires.
        #[arg(long, default_value_t = 3)]
        failure_threshold: u32,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { listen, config } => {
            run_serve(listen, config).await;
        }
        Commands::Watch {
            url,
            name,
            keyword,
            timeout_ms,
            interval_secs,
            failure_threshold,
        } => {
            fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
                )
                .init();
            run_watch(url, name, keyword, timeout_ms, interval_secs, failure_threshold).await;
        }
    }
}

async fn run_serve(listen_override: Option<SocketAddr>, config_path: Option<PathBuf>) {
    let app_config = if let Some(ref path) = config_path {
        match config::AppConfig::load(path) {
            Ok(c) => {
                init_tracing(&c.server.log_format);
                tracing::info!(path = %path.display(), "Loaded config file");
                c
            }
            Err(e) => {
                init_tracing("pretty");
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        }
    } else {
        init_tracing("pretty");
        config::AppConfig::default()
    };

    let listen = listen_override.unwrap_or(app_config.server.listen);

    let mut guard_config = app_config.defaults.to_guard_config();
    if let Some(threshold) = config::threshold_from_env() {
        guard_config = guard_config.with_failure_threshold(threshold);
    }

    let registry: Arc<dyn SiteRegistry> = match &app_config.sites_file {
        Some(path) => {
            tracing::info!(path = %path.display(), "Reading site list from file");
            Arc::new(FileRegistry::new(path))
        }
        None => Arc::new(StaticRegistry::new(app_config.site.clone())),
    };
    if registry.sites().is_empty() {
        tracing::warn!("No sites configured; the monitor will idle until some appear");
    }

    let shared_client = HttpProber::build_client(guard_config.request_timeout);
    let (alert_tx, alert_rx) = alert_channel();

    let telegram = app_config.telegram.clone().merged_with_env();
    let dispatcher_handle = if telegram.is_configured() {
        let notifier = TelegramNotifier::new(telegram, shared_client.clone());
        let dispatcher = AlertDispatcher::new(alert_rx, vec![Box::new(notifier)]);
        tracing::info!("Telegram notifier enabled");
        tokio::spawn(dispatcher.run())
    } else {
        tracing::info!("No notifier configured; authorized alerts are logged only");
        tokio::spawn(async move {
            let mut rx = alert_rx;
            while rx.recv().await.is_some() {}
        })
    };

    let decisions = Arc::new(DecisionEngine::new(
        Box::new(FileBackend::new(&app_config.state_file)),
        guard_config.failure_threshold,
    ));
    let removed = decisions.cleanup_expired(chrono::Duration::days(7)).await;
    if removed > 0 {
        tracing::info!(removed, "Dropped expired notification records");
    }

    let prober = Arc::new(HttpProber::with_client(
        shared_client,
        guard_config.request_timeout,
        guard_config.body_scan_limit,
    ));

    let monitor = Arc::new(Monitor::new(
        registry,
        guard_config,
        prober,
        decisions,
        Some(alert_tx.clone()),
    ));

    if let Err(e) = monitor.start().await {
        tracing::error!(error = %e, "Failed to start monitor");
        std::process::exit(1);
    }

    let state = guard_api::state::AppState::new(Arc::clone(&monitor));

    tracing::info!(%listen, "Starting UptimeGuard API server");
    if let Err(e) = guard_api::serve_with_state(listen, state, guard_api::shutdown_signal()).await {
        tracing::error!(error = %e, "Server failed");
        std::process::exit(1);
    }

    tracing::info!("Shutdown signal received, stopping monitor...");
    monitor.stop().await;

    drop(alert_tx);
    match tokio::time::timeout(Duration::from_secs(5), dispatcher_handle).await {
        Ok(_) => tracing::info!("Alert dispatcher shut down"),
        Err(_) => tracing::warn!("Alert dispatcher did not shut down in time, aborting"),
    }

    tracing::info!("Shutdown complete");
}

async fn run_watch(
    url: String,
    name: Option<String>,
    keyword: Option<String>,
    timeout_ms: Option<u64>,
    interval_secs: u64,
    failure_threshold: u32,
) {
    let site = Site {
        name: name.unwrap_or_else(|| url.clone()),
        url: url.clone(),
        keyword: keyword.clone(),
        timeout_ms,
    };

    let guard_config = GuardConfig::default()
        .with_poll_interval(Duration::from_secs(interval_secs.max(1)))
        .with_failure_threshold(failure_threshold);

    let telegram = TelegramConfig::from_env();
    let notifier = if telegram.is_configured() {
        let client = HttpProber::build_client(guard_config.request_timeout);
        Some(TelegramNotifier::new(telegram, client))
    } else {
        None
    };

    let (alert_tx, mut alert_rx) = alert_channel();
    let decisions = Arc::new(DecisionEngine::new(
        Box::new(MemoryBackend::new()),
        failure_threshold,
    ));
    let prober = Arc::new(HttpProber::from_config(&guard_config));

    let monitor = Monitor::new(
        Arc::new(StaticRegistry::new(vec![site])),
        guard_config,
        prober,
        decisions,
        Some(alert_tx),
    );

    let multi = MultiProgress::new();
    let msg_style = ProgressStyle::with_template("{wide_msg}").expect("valid template");

    multi
        .println(format!(
            "{} {}",
            style("uptimeguard").bold(),
            style(env!("CARGO_PKG_VERSION")).dim()
        ))
        .ok();
    multi
        .println(format!("  {} {}", style("url:      ").dim(), style(&url).bold()))
        .ok();
    multi
        .println(format!("  {} {}s", style("interval: ").dim(), interval_secs))
        .ok();
    multi
        .println(format!("  {} {}", style("threshold:").dim(), failure_threshold))
        .ok();
    if let Some(ref kw) = keyword {
        multi
            .println(format!("  {} {}", style("keyword:  ").dim(), kw))
            .ok();
    }
    if notifier.is_some() {
        multi
            .println(format!("  {} enabled", style("telegram: ").dim()))
            .ok();
    }
    multi.println("").ok();
    multi
        .println(format!("{}", style("Press Ctrl+C to stop").dim()))
        .ok();
    multi.println("").ok();

    monitor.start().await.expect("Failed to start monitor");

    let status_bar = multi.add(ProgressBar::new_spinner().with_style(msg_style));
    status_bar.set_message(format!(
        "{}\n  {}",
        format_separator(0),
        style("Waiting for first probe...").dim()
    ));

    let mut poll_num = 0u64;

    let shutdown = guard_api::shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(interval_secs.max(1))) => {}
            maybe_alert = alert_rx.recv() => {
                if let Some(alert) = maybe_alert {
                    print_alert(&multi, &alert);
                    if let Some(ref n) = notifier {
                        if let Err(e) = n.notify(&alert).await {
                            multi
                                .println(format!(
                                    "  {} {}",
                                    style("telegram delivery failed:").red(),
                                    e
                                ))
                                .ok();
                        }
                    }
                }
                continue;
            }
            _ = &mut shutdown => {
                status_bar.finish_and_clear();
                multi.println(format!("\n{}", style("Monitor stopped.").dim())).ok();
                monitor.stop().await;
                return;
            }
        }

        poll_num += 1;

        let statuses = monitor.status();
        let mut lines = vec![format_separator(poll_num)];

        if statuses.is_empty() {
            lines.push(format!("  {}", style("Waiting for first probe...").dim()));
        } else {
            for s in &statuses {
                let badge = match s.status {
                    SiteStatus::Up => style("UP  ").green().bold(),
                    SiteStatus::Down => style("DOWN").red().bold(),
                };
                let http = s
                    .last_result
                    .http_status
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".into());
                lines.push(format!(
                    "  {} {:<30} http={:<4} latency={:>5}ms failures={}",
                    badge, s.name, http, s.last_result.latency_ms, s.consecutive_failures,
                ));
                if let Some(reason) = &s.last_result.reason {
                    lines.push(format!("       {}", style(reason).dim()));
                }
            }
        }

        status_bar.set_message(lines.join("\n"));
    }
}

fn print_alert(multi: &MultiProgress, alert: &Alert) {
    let ts = alert.timestamp.format("%H:%M:%S");
    let kind_str = format!("{:<16}", alert.kind.to_string().to_uppercase());
    let colored_kind = match alert.kind {
        AlertKind::Failure | AlertKind::FailureUpdate => style(kind_str).red().bold(),
        AlertKind::Recovery => style(kind_str).green().bold(),
    };
    multi
        .println(format!(
            "  {}  {} {}  failures={} latency={}ms",
            style(ts).dim(),
            colored_kind,
            alert.site_url,
            alert.consecutive_failures,
            alert.latency_ms,
        ))
        .ok();
}

fn format_separator(poll_num: u64) -> String {
    let label = if poll_num == 0 {
        String::new()
    } else {
        format!(" poll {} ", poll_num)
    };
    let width = 54usize.saturating_sub(label.len());
    format!(
        "{}{}{}",
        style("──").dim(),
        style(label).dim().bold(),
        style("─".repeat(width)).dim()
    )
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format {
        "json" => {
            fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }
}
