mod cli;

use hlsforge::{
    backup::BackupStore,
    config::{self, Config, SiteConfig},
    convert::HlsConverter,
    orchestrator::{self, BulkRun, RunSummary},
    site::{is_hls_url, WebsiteClient},
};
use hlsforge_common::SiteId;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "hlsforge=trace,hlsforge_media=trace,hlsforge_common=debug".to_string()
        } else {
            "hlsforge=info,hlsforge_media=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    if let Commands::Validate {
        config: config_path,
    } = &cli.command
    {
        let path = config_path.clone().or(cli.config.clone());
        return validate_config(path.as_deref());
    }

    let config = config::load_config_or_default(cli.config.as_deref())?;
    let dry_run = cli.dry_run;
    if dry_run {
        println!("[DRY-RUN] Nothing will be uploaded and no page will be written\n");
    }

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Convert { sources } => rt.block_on(convert_sources(&config, &sources, dry_run)),
        Commands::ConvertAll { site } => rt.block_on(convert_all(&config, site.as_deref(), dry_run)),
        Commands::List { site } => list_sources(&config, site.as_deref()),
        Commands::Scan { site } => rt.block_on(scan_sites(&config, site.as_deref())),
        Commands::Backups => list_backups(&config),
        Commands::Revert { file } => rt.block_on(revert_backup(&config, &file, dry_run)),
        Commands::Validate { .. } => Ok(()),
    }
}

fn selected_sites<'a>(config: &'a Config, host: Option<&str>) -> Result<Vec<&'a SiteConfig>> {
    match host {
        Some(host) => config
            .site(host)
            .map(|site| vec![site])
            .with_context(|| format!("Site '{}' is not configured", host)),
        None if config.sites.is_empty() => anyhow::bail!("No sites configured"),
        None => Ok(config.sites.iter().collect()),
    }
}

fn website_client(config: &Config, site_id: &str) -> Result<WebsiteClient> {
    if config.api.base_url.is_empty() {
        anyhow::bail!("api.base_url is not set (or set HLSFORGE_API_URL)");
    }
    if config.api.master_key.is_empty() {
        anyhow::bail!("api.master_key is not set (or set HLSFORGE_MASTER_KEY)");
    }
    let http = reqwest::Client::builder()
        .timeout(config.api.timeout())
        .build()
        .context("Failed to build HTTP client")?;
    let site = SiteId::parse(site_id).with_context(|| format!("Invalid site id '{}'", site_id))?;

    Ok(WebsiteClient::new(
        http,
        &config.api.base_url,
        site,
        config.api.master_key.clone(),
        config.api.master_key_header.clone(),
    ))
}

async fn convert_sources(config: &Config, sources: &[String], dry_run: bool) -> Result<()> {
    let converter = HlsConverter::from_config(config, dry_run)?;

    let mut failed = 0;
    for (i, source) in sources.iter().enumerate() {
        println!("[{}/{}] {}", i + 1, sources.len(), source);
        match converter.convert(source).await {
            Ok(published) => {
                println!("  HLS: {}", published.manifest_url);
                println!("  Segments: {}", published.urls.len());
            }
            Err(e) => {
                tracing::error!(source = %source, error = %e, "Conversion failed");
                println!("  FAILED: {}", e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} sources failed", failed, sources.len());
    }
    Ok(())
}

async fn convert_all(config: &Config, host: Option<&str>, dry_run: bool) -> Result<()> {
    let sites = selected_sites(config, host)?;
    let converter = HlsConverter::from_config(config, dry_run)?;
    let backups = BackupStore::new(config.backup_dir());

    let mut failed_sites = 0;
    for site in sites {
        println!("=== {} ===", site.host);
        let client = website_client(config, &site.id)?;
        let run = BulkRun::new(&site.host, client.site().clone(), &client, &converter, &backups)
            .dry_run(dry_run);

        match run.run(&site.sources).await {
            Ok(summary) => {
                print_summary(&summary);
                if !summary.is_clean() {
                    failed_sites += 1;
                }
            }
            Err(e) => {
                tracing::error!(site = %site.host, error = %e, "Run aborted");
                println!("  ABORTED: {}", e);
                failed_sites += 1;
            }
        }
    }

    if failed_sites > 0 {
        anyhow::bail!("{} site(s) finished with failures", failed_sites);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\nConverted {} source(s):", summary.converted.len());
    for (old, new) in &summary.converted {
        println!("  {}\n    -> {}", old, new);
    }

    if !summary.failed_sources.is_empty() {
        println!("\nFailed sources:");
        for failure in &summary.failed_sources {
            println!("  {}: {}", failure.source, failure.reason);
        }
    }

    let verb = if summary.dry_run { "Would update" } else { "Updated" };
    println!("\n{} {} page(s):", verb, summary.pages_rewritten.len());
    for page in &summary.pages_rewritten {
        println!("  {} ({})", page.title, page.id);
    }

    if !summary.page_failures.is_empty() {
        println!("\nPage failures:");
        for failure in &summary.page_failures {
            println!("  {} ({}): {}", failure.title, failure.id, failure.reason);
        }
    }

    if !summary.unreadable_pages.is_empty() {
        println!("\nUnreadable pages (not backed up, not rewritten):");
        for page in &summary.unreadable_pages {
            println!("  {} ({}): {}", page.title, page.id, page.reason);
        }
    }

    if let Some(path) = &summary.backup {
        println!("\nBackup: {}", path.display());
    }
    if let Some(hint) = summary.revert_hint() {
        println!("To revert: {}", hint);
    }
}

fn list_sources(config: &Config, host: Option<&str>) -> Result<()> {
    for site in selected_sites(config, host)? {
        println!("{} ({})", site.host, site.id);
        for source in &site.sources {
            let state = if is_hls_url(source) { "hls" } else { "pending" };
            println!("  [{}] {}", state, source);
        }
        let pending = site.sources.iter().filter(|s| !is_hls_url(s)).count();
        println!("  {} pending, {} total\n", pending, site.sources.len());
    }
    Ok(())
}

async fn scan_sites(config: &Config, host: Option<&str>) -> Result<()> {
    for site in selected_sites(config, host)? {
        let client = website_client(config, &site.id)?;
        let scan = orchestrator::scan_site(&client)
            .await
            .with_context(|| format!("Failed to scan {}", site.host))?;

        println!("{}: {} page(s)", site.host, scan.pages);
        println!("\nNeeds conversion ({}):", scan.pending.len());
        for url in &scan.pending {
            println!("  {}", url);
        }
        println!("\nAlready HLS ({}):", scan.hls.len());
        for url in &scan.hls {
            println!("  {}", url);
        }
        if !scan.unreadable.is_empty() {
            println!("\nUnreadable pages ({}):", scan.unreadable.len());
            for page in &scan.unreadable {
                println!("  {} ({}): {}", page.title, page.id, page.reason);
            }
        }
        println!();
    }
    Ok(())
}

fn list_backups(config: &Config) -> Result<()> {
    let store = BackupStore::new(config.backup_dir());
    let backups = store.list()?;
    if backups.is_empty() {
        println!("No backups found in {}", store.dir().display());
        return Ok(());
    }

    println!("Available backups:\n");
    for backup in &backups {
        let name = backup
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!("  {}", name);
        println!(
            "    {} | {} | {} page(s)",
            backup.manifest.website_host,
            backup.manifest.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            backup.manifest.pages.len()
        );
    }
    println!("\nTo revert: hlsforge revert <backup-file>");
    Ok(())
}

async fn revert_backup(config: &Config, file: &str, dry_run: bool) -> Result<()> {
    let store = BackupStore::new(config.backup_dir());
    let path = store.resolve(file);
    let manifest = store.load(&path)?;

    println!(
        "Reverting {} page(s) on {} from {}",
        manifest.pages.len(),
        manifest.website_host,
        path.display()
    );
    if dry_run {
        for page in &manifest.pages {
            println!("  [DRY-RUN] Would restore {} ({})", page.page_title, page.page_id);
        }
        return Ok(());
    }

    let client = website_client(config, &manifest.website_id)?;
    let summary = orchestrator::revert(&client, &manifest).await;

    println!("Restored {} page(s)", summary.restored.len());
    for failure in &summary.failures {
        println!("  FAILED {} ({}): {}", failure.title, failure.id, failure.reason);
    }
    if !summary.failures.is_empty() {
        anyhow::bail!("{} page(s) could not be restored", summary.failures.len());
    }
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => {
            println!("No config file specified, checking default locations");
            config::load_config_or_default(None)?
        }
    };

    println!("✓ Configuration is valid");
    println!("  API: {}", if config.api.base_url.is_empty() { "(not set)" } else { config.api.base_url.as_str() });
    println!("  Upload: {}", if config.upload.base_url.is_empty() { "(not set)" } else { config.upload.base_url.as_str() });
    println!("  Segment duration: {}s", config.conversion.segment_duration);
    println!("  Backups: {}", config.backup_dir().display());
    println!("  Sites: {}", config.sites.len());
    for site in &config.sites {
        println!("    {} ({} sources)", site.host, site.sources.len());
    }
    Ok(())
}
