mod config;

use crate::config::{Backend, Config, DaemonConfig};
use anyhow::{bail, Context, Result};
use cotton_dnssd::global;
use cotton_dnssd::{Daemon, DaemonError, Event, Iteration, LocalDaemon};
use std::time::Duration;

fn make_daemon(config: &DaemonConfig) -> Result<Box<dyn Daemon>, DaemonError> {
    match config.backend {
        Backend::Local => {
            tracing::warn!("Local backend: nothing will reach the network");
            Ok(Box::new(LocalDaemon::new()))
        }
        #[cfg(feature = "mdns-sd")]
        Backend::MdnsSd => {
            Ok(Box::new(cotton_dnssd::MdnsSdDaemon::new(&config.mdns)?))
        }
        #[cfg(not(feature = "mdns-sd"))]
        Backend::MdnsSd => Err(DaemonError::Backend(
            "built without the mdns-sd feature".to_string(),
        )),
    }
}

fn report(configured: &str, event: &Event) {
    match event {
        Event::Renamed { to, .. } => {
            tracing::info!("'{}' is now published as '{}'", configured, to);
        }
        Event::Failed { name, error } => {
            tracing::error!("Giving up on '{}': {}", name, error);
        }
        other => tracing::debug!("{:?}", other),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new(
                        "cotton_dnssd=info,cotton_dnssd_publish=info",
                    )
                }),
        )
        .init();

    if !global::is_supported() {
        tracing::warn!("No mDNS responder is expected on this platform");
    }

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/cotton-dnssd/publish.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;
    if config.services.is_empty() {
        bail!("No services listed in {}", config_path);
    }

    let daemon_config = config.daemon.clone();
    global::init_with(config.driver.clone(), move || {
        make_daemon(&daemon_config)
    })
    .context("Failed to start discovery daemon")?;

    let mut handles = Vec::new();
    for options in &config.services {
        let configured = options.name.clone();
        let handle = global::publish(options, move |e| report(&configured, e))
            .with_context(|| format!("Failed to publish '{}'", options.name))?;
        handles.push(handle);
    }
    tracing::info!("Publishing {} service(s)", handles.len());

    let mut interval = tokio::time::interval(Duration::from_millis(
        config.daemon.poll_interval_ms.max(1),
    ));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let quit = loop {
        tokio::select! {
            _ = interval.tick() => {
                if global::poll()? == Iteration::Quit {
                    break true;
                }
            }
            r = &mut ctrl_c => {
                r.context("Failed to listen for ctrl-c")?;
                tracing::info!("Shutdown signal received");
                break false;
            }
        }
    };

    for handle in handles {
        global::remove(handle)?;
    }
    global::shutdown();

    if quit {
        bail!("A service failed and quit_on_failure is set");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
