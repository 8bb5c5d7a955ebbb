//! CLI entry point for the report crawler.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use report_crawler::config::{self, Settings, StructuredSourceSetting};
use report_crawler::crawler::{CrawlerConfig, CrawlerService, parse_categories};
use report_crawler::handler::{EastmoneyApiSource, HandlerRegistry, TushareSource};
use report_crawler::session::{
    BrokerConfig, BrowserDriver, ChromiumDriver, LaunchProfile, SessionBroker, UnavailableDriver,
    find_chromium,
};
use report_crawler::{CacheStore, Database, SiteProfile, StorageLayout};
use serde::Serialize;
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, CacheCommand, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");
    let settings = load_settings(&args)?;
    debug!(?settings, "settings resolved");

    let site = SiteProfile::default();
    let needs_browser = !matches!(args.command, Command::Cache { .. });
    let service = build_service(&settings, site, needs_browser).await?;

    let result = run_command(&service, &args.command, &settings).await;
    if let Err(error) = service.shutdown().await {
        warn!(error = %error, "browser shutdown failed");
    }
    result
}

fn load_settings(args: &Args) -> Result<Settings> {
    let file = if let Some(path) = &args.config {
        Some(config::load_file_config(path)?)
    } else {
        let loaded = config::load_default_file_config()?;
        if loaded.loaded_from_file
            && let Some(path) = &loaded.path
        {
            debug!(path = %path.display(), "loaded config file");
        }
        loaded.config
    };

    let mut settings = Settings::from_file(file.as_ref());
    if let Some(dir) = &args.output_dir {
        settings.output_dir.clone_from(dir);
    }
    if let Some(path) = &args.cache_db {
        settings.cache_db.clone_from(path);
    }
    if let Some(workers) = args.workers {
        settings.workers = usize::from(workers);
    }
    if args.debug_dir.is_some() {
        settings.debug_dir.clone_from(&args.debug_dir);
    }
    if args.chromium.is_some() {
        settings.chromium_path.clone_from(&args.chromium);
    }
    if args.headed {
        settings.headless = false;
    }
    if let Command::Crawl(crawl) = &args.command
        && crawl.no_download
    {
        settings.download_artifacts = false;
    }
    Ok(settings)
}

async fn build_service(
    settings: &Settings,
    site: SiteProfile,
    needs_browser: bool,
) -> Result<CrawlerService> {
    let db = Database::new(&settings.cache_db)
        .await
        .with_context(|| format!("Failed to open cache '{}'", settings.cache_db.display()))?;
    let cache = CacheStore::with_ttl(db, settings.cache_ttl);
    let handlers = build_handlers(settings, &site)?;
    let broker = spawn_broker(settings, &site, needs_browser).await;

    let crawler_config = CrawlerConfig {
        workers: settings.workers,
        download_artifacts: settings.download_artifacts,
        debug_dir: settings.debug_dir.clone(),
        http_timeout: settings.http_timeout,
    };
    let service = CrawlerService::start(
        site,
        handlers,
        cache,
        broker,
        StorageLayout::new(&settings.output_dir),
        crawler_config,
    )
    .await?;
    Ok(service)
}

fn build_handlers(settings: &Settings, site: &SiteProfile) -> Result<HandlerRegistry> {
    let registry = match settings.structured_source {
        StructuredSourceSetting::None => HandlerRegistry::scraped(site),
        StructuredSourceSetting::Eastmoney => {
            HandlerRegistry::structured(Arc::new(EastmoneyApiSource::new()?))
        }
        StructuredSourceSetting::Tushare => {
            let token = settings.tushare_token.clone().with_context(|| {
                format!(
                    "structured_source = \"tushare\" needs `tushare_token` or {}",
                    config::TUSHARE_TOKEN_ENV
                )
            })?;
            HandlerRegistry::structured(Arc::new(TushareSource::new(token)?))
        }
    };
    info!(source = settings.structured_source.as_str(), "handlers registered");
    Ok(registry)
}

async fn spawn_broker(settings: &Settings, site: &SiteProfile, needs_browser: bool) -> SessionBroker {
    let broker_config =
        BrokerConfig::for_site(site).with_navigation_timeout(settings.navigation_timeout);

    let driver: Box<dyn BrowserDriver> = if needs_browser {
        match find_chromium(settings.chromium_path.as_deref()) {
            Some(executable) => {
                let profile = LaunchProfile::new(executable).headless(settings.headless);
                match ChromiumDriver::launch(&profile).await {
                    Ok(driver) => Box::new(driver),
                    Err(error) => {
                        warn!(error = %error, "browser launch failed; continuing without it");
                        Box::new(UnavailableDriver::new(error.to_string()))
                    }
                }
            }
            None => {
                warn!("no Chromium executable found; browser-backed steps will fail");
                Box::new(UnavailableDriver::new("no Chromium executable found"))
            }
        }
    } else {
        Box::new(UnavailableDriver::new("browser not started for cache commands"))
    };
    SessionBroker::spawn(driver, broker_config)
}

async fn run_command(service: &CrawlerService, command: &Command, settings: &Settings) -> Result<()> {
    match command {
        Command::Crawl(crawl) => {
            let categories = parse_categories(&crawl.types)?;
            let limit = crawl.limit.map_or(settings.default_limit, usize::from);
            let response = service.crawl_many(&categories, limit, crawl.force).await?;
            info!(
                count = response.count,
                categories = categories.len(),
                succeeded = response.stats.succeeded,
                failed = response.stats.failed,
                "crawl finished"
            );
            if !response.success {
                warn!(
                    failed = response.stats.failed,
                    skipped = response.stats.skipped,
                    "crawl finished with failures"
                );
            }
            print_json(&response)
        }
        Command::Fetch(fetch) => {
            let outcome = service
                .fetch_artifact(&fetch.url, fetch.referer.as_deref())
                .await?;
            print_json(&outcome)?;
            if !outcome.is_success() {
                bail!("Download failed: {}", outcome.status.as_str());
            }
            Ok(())
        }
        Command::Cache { command } => match command {
            CacheCommand::Status => print_json(&service.cache_status().await?),
            CacheCommand::Clear { category, limit } => {
                let removed = service
                    .clear_cache(*category, limit.map(usize::from))
                    .await?;
                info!(removed, "cache cleared");
                print_json(&serde_json::json!({ "removed": removed }))
            }
        },
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
