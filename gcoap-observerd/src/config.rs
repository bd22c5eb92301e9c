use clap::Parser;
use gcoap_observer::COAP_PORT;
use std::{net::SocketAddr, path::PathBuf};

use crate::{ObserverdError, ObserverdResult};

/// CLI arguments for the gcoap observer.
#[derive(Parser, Debug, Clone)]
#[command(name = "gcoap-observer")]
#[command(about = "CoAP client to query and subscribe to Observe notifications from the RIOT gcoap example")]
#[command(version)]
pub struct Args {
    /// Host address to query, e.g. fe80::bbbb:2%tap0
    #[arg(short = 'a', long = "host", env = "GCOAP_OBSERVER_HOST")]
    pub host: String,
    /// Destination port on the host.
    #[arg(short = 'p', long = "port", default_value_t = COAP_PORT, env = "GCOAP_OBSERVER_PORT")]
    pub port: u16,
    /// Source port to send from and listen on for responses. The port
    /// after it listens for commands.
    #[arg(short = 's', long = "source-port", default_value_t = COAP_PORT, env = "GCOAP_OBSERVER_SOURCE_PORT")]
    pub source_port: u16,
    /// Directory for the rolling observer.log files.
    #[arg(long, default_value = ".", env = "GCOAP_OBSERVER_LOG_DIR")]
    pub log_dir: PathBuf,
    /// Maximum level written to the log file.
    #[arg(long, default_value = "debug", env = "GCOAP_OBSERVER_LOG_LEVEL")]
    pub log_level: tracing::Level,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    pub host: String,
    pub port: u16,
    pub source_port: u16,
    pub log_dir: PathBuf,
    pub log_level: tracing::Level,
}

impl From<Args> for ObserverConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            source_port: args.source_port,
            log_dir: args.log_dir,
            log_level: args.log_level,
        }
    }
}

impl ObserverConfig {
    pub fn validate(&self) -> ObserverdResult<()> {
        if self.host_name().is_empty() {
            return Err(ObserverdError::Config("host address must be set".to_string()));
        }
        if self.port == 0 {
            return Err(ObserverdError::Config(
                "destination port must be greater than 0".to_string(),
            ));
        }
        if self.source_port == 0 {
            return Err(ObserverdError::Config(
                "source port must be greater than 0".to_string(),
            ));
        }
        gcoap_observer::command_port(self.source_port)
            .map_err(|e| ObserverdError::Config(e.to_string()))?;
        Ok(())
    }

    /// Host text without surrounding brackets; may carry an IPv6 zone
    pub fn host_name(&self) -> &str {
        self.host.trim().trim_start_matches('[').trim_end_matches(']')
    }

    /// Resolve host and port to the destination socket address. Zone
    /// suffixes such as `%tap0` are resolved to the interface index
    pub async fn resolve(&self) -> ObserverdResult<SocketAddr> {
        let host = self.host_name();
        tokio::net::lookup_host((host, self.port))
            .await
            .map_err(|e| {
                log::error!("Lookup failed for {host:}: {e:}");
                ObserverdError::Resolve(host.to_string())
            })?
            .next()
            .ok_or_else(|| ObserverdError::Resolve(host.to_string()))
    }
}
