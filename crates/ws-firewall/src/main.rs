mod cli;
mod config;
mod inspector;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
use firewall_policy::{DetectionClient, InterceptionPolicy};
use ws_proxy::{MessageInterceptor, Proxy, ProxyConfig};

use crate::cli::Cli;
use crate::inspector::FirewallInterceptor;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config, then merge CLI overrides.
    let (mut cfg, config_source) = config::load(&cli.config)?;

    if let Some(ref listen) = cli.listen {
        cfg.network.listen_addr = listen.clone();
    }
    if let Some(ref upstream) = cli.upstream {
        cfg.network.upstream_url = upstream.clone();
    }

    // 3. Init tracing-subscriber with JSON format.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    config_source.log(&cli.config);

    // 4. Resolve detector settings and secrets. Missing secrets stop startup
    //    before anything listens.
    let detector_config = cfg
        .detector
        .resolve()
        .context("invalid detector configuration")?;

    info!(
        config_file = %cli.config.display(),
        listen = %cfg.network.listen_addr,
        upstream = %cfg.network.upstream_url,
        detector = ?detector_config,
        "ws-firewall starting"
    );

    // 5. Start audit logger.
    let (audit, audit_handle) = AuditSink::start(&cfg.logging.audit_log_path)
        .await
        .context("failed to start audit logger")?;

    audit
        .log(AuditEntry::new(
            AuditEventType::ProcessStarted,
            AuditSource::new("ws-firewall"),
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "config_file": cli.config.display().to_string(),
                "failure_mode": detector_config.failure_mode,
            }),
        ))
        .await;

    // 6. Build detection client and policy.
    let client =
        DetectionClient::new(detector_config.clone()).context("failed to build detector client")?;
    info!(url = client.url(), "detector client ready");

    let policy = Arc::new(InterceptionPolicy::from_config(
        Arc::new(client),
        &detector_config,
    ));
    info!(failure_mode = ?policy.failure_mode(), "interception policy ready");

    let interceptors: Vec<Arc<dyn MessageInterceptor>> =
        vec![Arc::new(FirewallInterceptor::new(policy, audit.clone()))];

    // 7. Create WebSocket proxy.
    let listen_addr: std::net::SocketAddr = cfg
        .network
        .listen_addr
        .parse()
        .context("invalid listen address")?;

    let proxy = Proxy::new(ProxyConfig {
        listen_addr,
        upstream_url: cfg.network.upstream_url.clone(),
        interceptors,
        audit: audit.clone(),
    });

    // 8. Run until the proxy fails or a shutdown signal arrives.
    let proxy_result = tokio::select! {
        r = proxy.run() => {
            info!("WebSocket proxy exited");
            r
        }
        signal = shutdown_signal() => {
            signal?;
            Ok(())
        }
    };

    info!("ws-firewall shutting down");

    audit
        .log(AuditEntry::new(
            AuditEventType::ProcessStopped,
            AuditSource::new("ws-firewall"),
            serde_json::json!({
                "proxy_result": format!("{:?}", proxy_result),
            }),
        ))
        .await;

    // Dropping the proxy releases the last sink clones held by connections
    // that are no longer running, letting the writer flush and exit.
    drop(proxy);
    drop(audit);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), audit_handle).await;

    proxy_result
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("failed to register SIGTERM handler")?;

        tokio::select! {
            r = ctrl_c => {
                r.context("failed to listen for ctrl-c")?;
                info!("received SIGINT (ctrl-c)");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.context("failed to listen for ctrl-c")?;
        info!("received SIGINT (ctrl-c)");
    }

    Ok(())
}
