//! pagetrawl - scrape paginated product listings.

mod cli;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // -v is read before clap so the filter is in place for settings loading
    let default_filter = if cli::is_verbose() {
        "pagetrawl=info"
    } else {
        "pagetrawl=warn"
    };

    // Logs go to stderr; stdout carries the CLI summary
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    cli::run().await
}
