use clap::Parser;
use std::process::ExitCode;
use tracing_appender::rolling;
use tracing_log::LogTracer;
use tracing_subscriber::FmtSubscriber;

use gcoap_observerd::{
    config::{Args, ObserverConfig},
    ObserverdResult, VERSION,
};

#[actix::main]
async fn main() -> ExitCode {
    let config = ObserverConfig::from(Args::parse());
    if let Err(e) = config.validate() {
        eprintln!("{e:}");
        return ExitCode::FAILURE;
    }

    let _guard = match init_logging(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Unable to set up logging: {e:}");
            return ExitCode::FAILURE;
        }
    };

    log::info!("Running gcoap observer {VERSION} with {config:?}");

    match gcoap_observerd::run(&config).await {
        Ok(()) => {
            log::info!("gcoap observer closed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Catch-all handler for gcoap observer: {e:} ({e:?})");
            println!("\nAborting; see log for exception.");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &ObserverConfig) -> ObserverdResult<tracing_appender::non_blocking::WorkerGuard> {
    LogTracer::init()?;

    let log = rolling::daily(&config.log_dir, "observer.log");
    let (nb, guard) = tracing_appender::non_blocking(log);

    let sub = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .with_writer(nb)
        .with_ansi(false)
        .finish();

    tracing::subscriber::set_global_default(sub)?;
    Ok(guard)
}
