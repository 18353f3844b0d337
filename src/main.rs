use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use startpage::app::App;
use startpage::config::Config;
use startpage::feed::{PageFeed, ViewFilter};
use startpage::registry::SourceAdded;
use startpage::storage::{Database, DatabaseError};

/// Get the config directory path (~/.config/startpage/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("startpage"))
}

#[derive(Parser, Debug)]
#[command(name = "startpage", about = "Start page feed aggregator")]
struct Args {
    /// Page to show or modify (defaults to the first page)
    #[arg(long, value_name = "ID")]
    page: Option<String>,

    /// Ignore cached snapshots and fetch every source
    #[arg(long)]
    refresh: bool,

    /// Create a new page
    #[arg(long, value_name = "NAME")]
    add_page: Option<String>,

    /// Add a feed source to the page
    #[arg(long, value_name = "URL")]
    add_source: Option<String>,

    /// Remove a feed source from the page
    #[arg(long, value_name = "URL")]
    remove_source: Option<String>,

    /// Only show items from this source
    #[arg(long, value_name = "NAME")]
    source: Option<String>,

    /// Only show favorite items
    #[arg(long)]
    favorites: bool,

    /// Print widgets as exportable JSON and exit
    #[arg(long)]
    export_widgets: bool,

    /// List pages and their sources and exit
    #[arg(long)]
    list_pages: bool,

    /// Delete all pages, settings, widgets and cached feeds, then exit
    #[arg(long)]
    reset: bool,

    /// Config file (defaults to ~/.config/startpage/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    // User-only access to the profile directory.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config_dir.join("data.db");
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of startpage appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    let mut app = App::new(db, config)
        .await
        .context("Failed to create application")?;

    if args.reset {
        app.reset().await?;
        println!("Cleared all start page data");
        return Ok(());
    }

    if args.export_widgets {
        println!("{}", app.export_widgets()?);
        return Ok(());
    }

    if let Some(name) = &args.add_page {
        let page = app.add_page(name).await?;
        println!("Added page '{}' ({})", page.name, page.id);
    }

    let page_id = match &args.page {
        Some(id) => id.clone(),
        None => app
            .registry()
            .pages()
            .first()
            .map(|p| p.id.clone())
            .ok_or_else(|| anyhow::anyhow!("No pages configured"))?,
    };

    if let Some(url) = &args.add_source {
        match app.add_source(&page_id, url).await? {
            SourceAdded::Added => println!("Added {url} to {page_id}"),
            SourceAdded::Duplicate => println!("{url} is already on {page_id}"),
        }
    }

    if let Some(url) = &args.remove_source {
        if app.remove_source(&page_id, url).await? {
            println!("Removed {url} from {page_id}");
        } else {
            println!("{url} is not on {page_id}");
        }
    }

    if args.list_pages {
        for page in app.registry().pages() {
            println!("{} {} ({} sources)", page.id, page.name, page.feed_sources.len());
            for url in &page.feed_sources {
                println!("    {url}");
            }
        }
        return Ok(());
    }

    let feed = app.page_feed(&page_id, args.refresh).await?;

    let mut filter = ViewFilter::default().favorites_only(args.favorites);
    if let Some(source) = &args.source {
        filter = filter.source(source.as_str());
    }

    print_feed(&app, &feed, &filter);
    Ok(())
}

fn print_feed(app: &App, feed: &PageFeed, filter: &ViewFilter) {
    let state = app.user_state().state();
    let visible = app.view(feed, filter);

    for item in &visible {
        let marker = if state.favorites.contains(&item.id) {
            '*'
        } else if state.read.contains(&item.id) {
            ' '
        } else {
            '+'
        };
        println!(
            "{marker} {}  [{}] {}",
            item.published.format("%Y-%m-%d %H:%M"),
            item.source,
            item.title
        );
        println!("    {}", item.link);
    }

    for error in &feed.errors {
        let note = if error.served_stale {
            " (showing cached items)"
        } else {
            ""
        };
        eprintln!("! {}: {}{note}", error.source_url, error.message);
    }

    tracing::info!(
        page = %feed.page_id,
        shown = visible.len(),
        total = feed.items.len(),
        cached = feed.cache_hits(),
        failed = feed.errors.len(),
        "Rendered page"
    );
}
