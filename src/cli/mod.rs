//! Command line interface.

mod scrape;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use pagetrawl::{OutputFormat, ScraperType, Settings};

#[derive(Parser)]
#[command(name = "pagetrawl")]
#[command(about = "Scrape paginated product listings into JSON or CSV")]
#[command(version)]
pub struct Cli {
    /// Config file path (default: ./pagetrawl.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (overrides config)
    #[arg(long, global = true, value_enum)]
    output_format: Option<OutputFormat>,

    /// Output directory (overrides config)
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Maximum pages to visit (overrides config)
    #[arg(long, global = true)]
    max_pages: Option<u32>,

    /// Show the browser window instead of running headless
    #[arg(long, global = true)]
    headed: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape any listing with your own selectors
    Custom {
        /// Listing URL to start from
        url: String,
        /// Selector matching one product container
        #[arg(short = 's', long)]
        product_selector: String,
        /// Field with fallback selectors, e.g. price:.price|.cost (repeatable)
        #[arg(short, long = "field", value_name = "NAME:SELECTORS")]
        fields: Vec<String>,
        /// Collect every match for these fields (repeatable)
        #[arg(long = "multi", value_name = "NAME")]
        multi: Vec<String>,
        /// Fetch strategy
        #[arg(long, value_enum, default_value_t = ScraperType::Static)]
        scraper_type: ScraperType,
        /// Stop after this many records
        #[arg(long)]
        max_products: Option<usize>,
        /// Minimum delay between requests in seconds
        #[arg(long)]
        min_delay: Option<f64>,
        /// Maximum delay between requests in seconds
        #[arg(long)]
        max_delay: Option<f64>,
        /// Always send the same user agent
        #[arg(long)]
        no_user_agent_rotation: bool,
        /// Output file name (default: scraped_data_<timestamp>)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Run a built-in site preset
    Example {
        /// Preset name (see --list)
        site: Option<String>,
        /// List available presets
        #[arg(short, long)]
        list: bool,
        /// Stop after this many records
        #[arg(long)]
        max_products: Option<usize>,
        /// Output file name (default: scraped_data_<timestamp>)
        #[arg(short, long)]
        output: Option<String>,
    },
}

impl Cli {
    /// Load settings and apply global flag overrides.
    fn settings(&self) -> anyhow::Result<Settings> {
        let mut settings = Settings::load(self.config.as_deref())?;
        if let Some(format) = self.output_format {
            settings.output_format = format;
        }
        if let Some(ref dir) = self.output_dir {
            settings.output_dir = dir.clone();
        }
        if let Some(max_pages) = self.max_pages {
            settings.max_pages = max_pages;
        }
        if self.headed {
            settings.headless = false;
        }
        Ok(settings)
    }
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = cli.settings()?;

    match cli.command {
        Commands::Custom {
            url,
            product_selector,
            fields,
            multi,
            scraper_type,
            max_products,
            min_delay,
            max_delay,
            no_user_agent_rotation,
            output,
        } => {
            if let Some(min) = min_delay {
                settings.min_delay = min;
            }
            if let Some(max) = max_delay {
                settings.max_delay = max;
            }
            if no_user_agent_rotation {
                settings.rotate_user_agents = false;
            }
            let args = scrape::CustomArgs {
                url,
                product_selector,
                fields,
                multi,
                scraper_type,
                max_products,
                output,
            };
            scrape::cmd_custom(settings, args).await
        }
        Commands::Example {
            site,
            list,
            max_products,
            output,
        } => {
            if list {
                scrape::cmd_list_presets();
                return Ok(());
            }
            scrape::cmd_example(settings, site.as_deref(), max_products, output.as_deref()).await
        }
    }
}
