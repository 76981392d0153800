use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;

use vast_player::parser::parse_document;
use vast_player::resolver::{
    aggregate_tracking_events, select_best_media_file, Fetch, FileOrHttpFetcher, Resolver,
    ResolverConfig,
};

/// VAST resolver and inspection tool
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a single VAST file or URL without following wrappers
    Parse {
        /// Path to the VAST file or URL
        #[arg(short, long)]
        input: String,

        /// Pretty print the output
        #[arg(short, long)]
        pretty: bool,
    },

    /// Resolve a wrapper chain into a flattened ad list
    Resolve {
        /// Path to the root VAST file or URL
        #[arg(short, long)]
        input: String,

        /// Pretty print the output
        #[arg(short, long)]
        pretty: bool,

        /// Maximum wrapper depth
        #[arg(long, default_value_t = 5)]
        max_depth: usize,

        /// Per-fetch timeout in milliseconds
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
    },

    /// Resolve a chain and report the rendition playback would select
    PickMedia {
        /// Path to the root VAST file or URL
        #[arg(short, long)]
        input: String,

        /// Target bitrate in kbps
        #[arg(short, long, default_value_t = 2500)]
        bitrate: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Parse { input, pretty } => {
            let fetcher = FileOrHttpFetcher::new()?;
            let content = fetcher.fetch(input).await?;
            let doc = parse_document(&content)?;
            if *pretty {
                println!("{:#?}", doc);
            } else {
                println!("{:?}", doc);
            }
        }
        Commands::Resolve {
            input,
            pretty,
            max_depth,
            timeout_ms,
        } => {
            let resolver = Resolver::new(
                Arc::new(FileOrHttpFetcher::new()?),
                ResolverConfig {
                    max_wrapper_depth: *max_depth,
                    timeout: Duration::from_millis(*timeout_ms),
                },
            );
            let doc = resolver.resolve(input).await?;
            if *pretty {
                println!("{:#?}", doc);
            } else {
                println!("{:?}", doc);
            }
        }
        Commands::PickMedia { input, bitrate } => {
            let resolver = Resolver::new(
                Arc::new(FileOrHttpFetcher::new()?),
                ResolverConfig::default(),
            );
            let doc = resolver.resolve(input).await?;
            let linear = doc.ads.iter().find_map(|ad| ad.first_linear());
            match linear {
                Some(linear) => match select_best_media_file(&linear.media_files, *bitrate) {
                    Some(media) => {
                        println!(
                            "{} ({}x{}, {} kbps, {})",
                            media.url,
                            media.width,
                            media.height,
                            media.bitrate.map_or("?".to_string(), |b| b.to_string()),
                            media.mime_type
                        );
                        println!(
                            "{} tracking endpoints aggregated",
                            aggregate_tracking_events(&doc.ads).len()
                        );
                    }
                    None => println!("no acceptable media file"),
                },
                None => println!("no linear creative found"),
            }
        }
    }

    Ok(())
}
