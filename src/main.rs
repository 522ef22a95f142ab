use anyhow::Result;
use clap::Parser;
use listing_builder::commands::{BuildOptions, build};
use listing_builder::listing::{ListingOverrides, SOURCE_FILENAME};
use listing_builder::reconcile::DEFAULT_CONCURRENCY;
use std::path::PathBuf;

/// listing-builder - VPM package listing builder
///
/// Builds a package listing (index.json) from a listing source: explicitly
/// declared release archives and the releases of linked GitHub repositories.
/// Every archive is downloaded once, checked against its package.json and
/// fingerprinted; archives already in the published listing are skipped.
///
/// If the GITHUB_TOKEN environment variable is set, it will be used for
/// authentication against the GitHub API and the current listing.
///
/// Examples:
///   listing-builder build --source source.json --output Website
#[derive(Parser, Debug)]
#[command(author, version = env!("LISTING_BUILDER_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// GitHub API URL (defaults to https://api.github.com)
    #[arg(
        long = "api-url",
        env = "LISTING_BUILDER_API_URL",
        value_name = "URL",
        global = true
    )]
    pub api_url: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Build the listing index and website
    Build(BuildArgs),
}

#[derive(clap::Args, Debug)]
pub struct BuildArgs {
    /// Listing source document
    #[arg(long, value_name = "PATH", default_value = SOURCE_FILENAME)]
    pub source: PathBuf,

    /// Directory the index (and website) are written to
    #[arg(long, short = 'o', value_name = "DIR")]
    pub output: PathBuf,

    /// Listing id, overriding the listing source
    #[arg(long, value_name = "ID")]
    pub listing_id: Option<String>,

    /// Listing name, overriding the listing source
    #[arg(long, value_name = "NAME")]
    pub listing_name: Option<String>,

    /// Public URL of the listing index, overriding the listing source
    #[arg(long, value_name = "URL")]
    pub listing_url: Option<String>,

    /// URL of the currently published index, used to skip known releases
    #[arg(long, value_name = "URL")]
    pub current_listing_url: Option<String>,

    /// Package manifest used when there is no listing source
    #[arg(long, value_name = "PATH")]
    pub package_manifest: Option<PathBuf>,

    /// Repository being built, "owner/name"
    #[arg(long, env = "GITHUB_REPOSITORY", value_name = "OWNER/REPO")]
    pub repository: Option<String>,

    /// Directory holding the website templates (index.html, app.js)
    #[arg(long, value_name = "DIR")]
    pub website: Option<PathBuf>,

    /// Number of archives downloaded at once
    #[arg(
        long,
        value_name = "N",
        default_value_t = DEFAULT_CONCURRENCY,
        value_parser = parse_concurrency
    )]
    pub concurrency: usize,
}

fn parse_concurrency(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

impl BuildArgs {
    fn into_options(self, api_url: Option<String>) -> BuildOptions {
        BuildOptions {
            source: self.source,
            output: self.output,
            overrides: ListingOverrides {
                id: self.listing_id,
                name: self.listing_name,
                url: self.listing_url,
            },
            current_listing_url: self.current_listing_url,
            package_manifest: self.package_manifest,
            repository: self.repository,
            website: self.website,
            api_url,
            concurrency: self.concurrency,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let runtime = listing_builder::runtime::RealRuntime;

    match cli.command {
        Commands::Build(args) => {
            let report = build(runtime, args.into_options(cli.api_url)).await?;
            println!(
                "{}: {} new, {} skipped, {} failed, {} versions in {}",
                report.listing_id,
                report.accepted,
                report.skipped,
                report.failed.len() + report.discovery_failures.len(),
                report.total,
                report.index_path.display()
            );
        }
    }
    Ok(())
}
