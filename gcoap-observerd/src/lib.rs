//! Process glue for running the gcoap observer from the command line:
//! flags, configuration checks, and the top-level run loop. Expect-style
//! test drivers start this binary, drive it through the command listener
//! port, and match on the lines it prints to stdout.

pub mod config;

use gcoap_observer::{CommandOutcome, ObserverError, ObserverService};
use thiserror::Error;

use crate::config::ObserverConfig;

pub const VERSION: &str = "0.1";

#[derive(Error, Debug)]
pub enum ObserverdError {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),
    #[error("Observer Error")]
    Observer(#[from] ObserverError),
    #[error("Configuration Error: {0}")]
    Config(String),
    #[error("Unable to resolve host {0}")]
    Resolve(String),
    #[error("Log tracer Error")]
    LogTracer(#[from] log::SetLoggerError),
    #[error("Tracing subscriber Error")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub type ObserverdResult<T> = std::result::Result<T, ObserverdError>;

/// Stdout line for a command outcome, if drivers expect one
pub fn console_line(outcome: &CommandOutcome) -> Option<&'static str> {
    match outcome {
        CommandOutcome::Ping => Some("Got ping post"),
        _ => None,
    }
}

/// Bind the observer and run it until Ctrl-C. Every inbound message is
/// printed as a `Response code: ...` line, and `/ping` as `Got ping post`.
pub async fn run(config: &ObserverConfig) -> ObserverdResult<()> {
    let dest = config.resolve().await?;
    let mut service = ObserverService::bind(dest, config.source_port).await?;

    let mut responses = service.subscribe_responses();
    tokio::spawn(async move {
        while let Some(summary) = responses.recv().await {
            println!("{summary}");
        }
    });

    let mut outcomes = service.subscribe_commands();
    tokio::spawn(async move {
        while let Some(outcome) = outcomes.recv().await {
            if let Some(line) = console_line(&outcome) {
                println!("{line}");
            }
        }
    });

    println!("Starting gcoap observer");
    service
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Unable to listen for Ctrl-C {e:}");
            }
        })
        .await?;

    Ok(())
}
