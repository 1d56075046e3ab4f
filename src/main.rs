use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use nufeed::config::Config;
use nufeed::feed::{
    FeedClient, ListOptions, PackageEntry, PackageIdentity, SearchFilter, SearchFilterType,
};
use nufeed::transport::{HttpTransport, Transport};
use nufeed::NuGetVersion;

/// Get the config directory path (~/.config/nufeed/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("nufeed"))
}

#[derive(Parser, Debug)]
#[command(name = "nufeed", about = "Query legacy NuGet V2 package feeds")]
struct Args {
    /// Feed URL (overrides `source` in the config file)
    #[arg(long, global = true, value_name = "URL")]
    source: Option<String>,

    /// Config file path (default: ~/.config/nufeed/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Include prerelease versions
    #[arg(long, global = true)]
    prerelease: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one search query
    Search {
        term: String,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long, default_value_t = 20)]
        take: usize,
        /// Only the latest version of each package
        #[arg(long)]
        latest: bool,
    },
    /// Stream every matching package, one entry per id
    List {
        #[arg(default_value = "")]
        term: String,
        /// Yield every version instead of the latest per id
        #[arg(long)]
        all_versions: bool,
        /// Include unlisted packages
        #[arg(long)]
        include_delisted: bool,
    },
    /// Show all versions of a package
    Find {
        id: String,
        /// Include unlisted versions
        #[arg(long)]
        include_unlisted: bool,
    },
    /// Look up one exact package version
    Get { id: String, version: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => get_config_dir()?.join("config.toml"),
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from '{}'", config_path.display()))?;

    let source = config
        .feed_source(args.source.as_deref())
        .context("Invalid feed source")?;

    let transport_options = config.transport_options();
    let http_client = reqwest::Client::builder()
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .timeout(transport_options.timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let transport: Arc<dyn Transport> =
        Arc::new(HttpTransport::new(http_client, transport_options));
    let client = FeedClient::new(transport, config.client_options());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    let printer = Printer { json: args.json };
    match args.command {
        Command::Search {
            term,
            skip,
            take,
            latest,
        } => {
            let mut filter = SearchFilter::new(args.prerelease);
            if latest {
                let caps = client.capabilities().capabilities(&source, &cancel).await?;
                filter = filter.with_filter(Some(
                    if args.prerelease && caps.supports_is_absolute_latest_version {
                        SearchFilterType::IsAbsoluteLatestVersion
                    } else {
                        SearchFilterType::IsLatestVersion
                    },
                ));
            }
            let results = client
                .engine()
                .search(&source, &term, &filter, skip, take, &cancel)
                .await
                .with_context(|| format!("Search for '{}' failed", term))?;
            printer.entries(&results)?;
        }
        Command::List {
            term,
            all_versions,
            include_delisted,
        } => {
            let mut options = ListOptions::new(term);
            options.filter = SearchFilter::new(args.prerelease).with_delisted(include_delisted);
            options.all_versions = all_versions;
            options.take = config.page_size;

            let stream = client.lister().list(source.clone(), options, cancel.clone());
            futures::pin_mut!(stream);
            while let Some(entry) = stream.try_next().await.context("Listing failed")? {
                printer.entry(&entry)?;
            }
        }
        Command::Find {
            id,
            include_unlisted,
        } => {
            let results = client
                .engine()
                .find_by_id(&source, &id, include_unlisted, args.prerelease, &cancel)
                .await
                .with_context(|| format!("Lookup of '{}' failed", id))?;
            printer.entries(&results)?;
        }
        Command::Get { id, version } => {
            let version: NuGetVersion = version
                .parse()
                .with_context(|| format!("'{}' is not a valid version", version))?;
            let identity = PackageIdentity::new(id, version);
            match client.engine().get_exact(&source, &identity, &cancel).await? {
                Some(entry) => printer.entries(std::slice::from_ref(&entry))?,
                None => anyhow::bail!("{} was not found on {}", identity, source),
            }
        }
    }

    Ok(())
}

struct Printer {
    json: bool,
}

impl Printer {
    fn entries(&self, entries: &[PackageEntry]) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(entries)?);
            return Ok(());
        }
        for entry in entries {
            self.entry(entry)?;
        }
        Ok(())
    }

    fn entry(&self, entry: &PackageEntry) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(entry)?);
            return Ok(());
        }
        let downloads = entry
            .download_count
            .map(|n| format!("  ({} downloads)", n))
            .unwrap_or_default();
        let unlisted = if entry.is_listed() { "" } else { "  [unlisted]" };
        println!("{} {}{}{}", entry.id(), entry.version(), downloads, unlisted);
        if let Some(summary) = entry.summary.as_deref().or(entry.description.as_deref()) {
            let line = summary.lines().next().unwrap_or_default().trim();
            if !line.is_empty() {
                println!("    {}", line);
            }
        }
        Ok(())
    }
}
