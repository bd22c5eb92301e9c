use clap::Parser;
use std::{path::PathBuf, process::ExitCode};
use tracing_appender::rolling;
use tracing_log::LogTracer;
use tracing_subscriber::FmtSubscriber;

use gcoap_tester::{TesterServer, COAP_PORT};

/// CLI arguments for the gcoap tester.
#[derive(Parser, Debug, Clone)]
#[command(name = "gcoap-tester")]
#[command(about = "CoAP server for testing gcoap client commands")]
#[command(version)]
struct Args {
    /// Port to listen on.
    #[arg(short = 'p', long = "port", default_value_t = COAP_PORT, env = "GCOAP_TESTER_PORT")]
    port: u16,
    /// Directory for the rolling tester.log files.
    #[arg(long, default_value = ".", env = "GCOAP_TESTER_LOG_DIR")]
    log_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = LogTracer::init() {
        eprintln!("Unable to forward log records, continuing without them {e:}");
    }
    let log = rolling::daily(&args.log_dir, "tester.log");
    let (nb, _guard) = tracing_appender::non_blocking(log);
    let sub = FmtSubscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(nb)
        .with_ansi(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(sub) {
        eprintln!("Unable to set up tracing subscriber, continuing {e:}");
    }

    log::info!("Using port {}", args.port);

    let res = async {
        let server = TesterServer::bind(args.port).await?;
        println!("Sock it to me!");
        server
            .run(async {
                tokio::signal::ctrl_c().await.ok();
            })
            .await
    }
    .await;

    match res {
        Ok(()) => {
            log::info!("gcoap tester closed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Catch-all handler for tester: {e:} ({e:?})");
            println!("\nAborting; see log for exception.");
            ExitCode::FAILURE
        }
    }
}
