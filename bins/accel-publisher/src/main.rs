mod cmd;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cmd::config::{Effective, PublisherArgs};
use cmd::error::AccelError;

#[derive(Parser)]
#[command(name = "accel-publisher", about = "Публикация показаний акселерометра в MQTT")]
struct Cli {
    #[command(flatten)]
    args: PublisherArgs,
}

#[tokio::main]
async fn main() {
    // RUST_LOG, иначе info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    if let Err(e) = start(&cli.args).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn start(args: &PublisherArgs) -> Result<(), AccelError> {
    let effective = Effective::new(args)?;
    cmd::run::run(&effective).await
}
