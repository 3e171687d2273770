//! Interactive image search
//!
//! Starts a search session and reads commands from stdin.
//!
//! # Usage
//!
//! ```bash
//! # Search with the configured initial query
//! image-search
//!
//! # Search for a specific query with an explicit key and database
//! image-search --key YOUR_KEY --db /tmp/images.db "red cars"
//! ```

use image_search::{
    Config, ImageId, ImageItem, ListItem, PageState, PaginationEngine, PixabayClient, SearchSession,
    SessionController, SessionHandle, Storage,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Default)]
struct CliArgs {
    config_path: Option<PathBuf>,
    db_path: Option<PathBuf>,
    api_key: Option<String>,
    query: Option<String>,
    write_config: bool,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                println!("image-search v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    cli.config_path = Some(PathBuf::from(&args[i]));
                }
            }
            "--db" => {
                i += 1;
                if i < args.len() {
                    cli.db_path = Some(PathBuf::from(&args[i]));
                }
            }
            "--write-config" => {
                cli.write_config = true;
            }
            "--key" => {
                i += 1;
                if i < args.len() {
                    cli.api_key = Some(args[i].clone());
                }
            }
            other if other.starts_with('-') => {
                eprintln!("Unknown argument: {}", other);
                print_help();
                std::process::exit(1);
            }
            other => {
                cli.query = Some(match cli.query.take() {
                    Some(existing) => format!("{existing} {other}"),
                    None => other.to_string(),
                });
            }
        }
        i += 1;
    }

    cli
}

fn print_help() {
    println!(
        r#"image-search - paginated image search with a local cache

USAGE:
    image-search [OPTIONS] [QUERY]

OPTIONS:
    -c, --config <PATH>   Config file (default: {})
        --db <PATH>       Cache database
        --key <KEY>       API key (also read from PIXABAY_API_KEY)
        --write-config    Write the effective config to the config path and exit
    -h, --help            Print help
    -v, --version         Print version

COMMANDS (stdin):
    n           load the next page
    r           retry after an error
    /<text>     search for <text>
    s <id>      select an image and show its details
    c           clear the selection
    p <page>    list the cached image ids of a page of the current query
    stats       show cache statistics
    q           quit"#,
        Config::default_config_path().display()
    );
}

/// Tracks what has already been printed for the current query
#[derive(Default)]
struct Renderer {
    query: Option<String>,
    printed_images: usize,
    status: Option<String>,
}

impl Renderer {
    fn render(&mut self, session: &SearchSession) {
        if self.query.as_deref() != Some(session.query.as_str()) {
            println!("== {} ==", session.query);
            self.query = Some(session.query.clone());
            self.printed_images = 0;
            self.status = None;
        }

        let images: Vec<ImageItem> = session
            .list_items()
            .into_iter()
            .filter_map(|row| match row {
                ListItem::Image(item) => Some(item),
                _ => None,
            })
            .collect();
        for item in images.iter().skip(self.printed_images) {
            println!(
                "{:>10}  {:<40}  {:>5}x{:<5}  by {}",
                item.id,
                truncate(&item.tags, 40),
                item.dimensions.width,
                item.dimensions.height,
                item.owner.username
            );
        }
        self.printed_images = images.len();

        let status = match session.pages.last() {
            Some(PageState::Loading) => Some("loading...".to_string()),
            Some(PageState::EmptyResult) => Some("no results".to_string()),
            Some(PageState::NoConnectivity) => Some("no connection ('r' to retry)".to_string()),
            Some(PageState::Error(cause)) => Some(format!("error: {cause} ('r' to retry)")),
            Some(PageState::Success(_)) if session.is_end_of_list => {
                Some(format!("end of results ({} images)", self.printed_images))
            }
            _ => None,
        };
        if status != self.status {
            if let Some(line) = &status {
                println!("-- {line}");
            }
            self.status = status;
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut short: String = text.chars().take(max.saturating_sub(3)).collect();
    short.push_str("...");
    short
}

fn print_details(item: &ImageItem) {
    println!("Image {} by {} (user {})", item.id, item.owner.username, item.owner.user_id);
    println!("  tags:      {}", item.tag_list().join(" | "));
    println!(
        "  size:      {}x{}",
        item.dimensions.width, item.dimensions.height
    );
    println!(
        "  likes: {}  comments: {}  downloads: {}  views: {}",
        item.counts.likes, item.counts.comments, item.counts.downloads, item.counts.views
    );
    println!("  preview:   {}", item.urls.thumbnail);
    if let Some(large) = &item.urls.large {
        println!("  large:     {}", large);
    }
    if let Some(avatar) = &item.urls.user_avatar {
        println!("  avatar:    {}", avatar);
    }
}

/// Returns false when the user asked to quit
async fn handle_command(
    line: &str,
    session: &SessionHandle,
    engine: &PaginationEngine,
) -> Result<bool, Box<dyn std::error::Error>> {
    let line = line.trim();
    match line {
        "" => {}
        "q" | "quit" | "exit" => return Ok(false),
        "n" => session.load_next_page().await?,
        "r" => session.retry().await?,
        "c" => session.select_item(None).await?,
        "help" => print_help(),
        "stats" => {
            let stats = engine.stats().await?;
            println!(
                "cache: {} images, {} queries, {} membership rows",
                stats.item_count, stats.query_count, stats.membership_count
            );
        }
        _ if line.starts_with('/') => session.set_query(line[1..].trim()).await?,
        _ if line.starts_with("p ") => match line[2..].trim().parse::<u32>() {
            Ok(page) => {
                let query = session.snapshot().query;
                let rows = engine.memberships(&query, page).await?;
                if rows.is_empty() {
                    println!("{:?} page {} is not cached", query, page);
                } else {
                    let ids: Vec<String> = rows.iter().map(|m| m.image_id.to_string()).collect();
                    println!("{:?} page {}: {}", query, page, ids.join(" "));
                }
            }
            Err(_) => println!("usage: p <page>"),
        },
        _ if line.starts_with("s ") => match line[2..].trim().parse::<ImageId>() {
            Ok(id) => {
                session.select_item(Some(id)).await?;
                match session.item_details(id).await? {
                    Some(item) => print_details(&item),
                    None => println!("image {} is not cached", id),
                }
            }
            Err(_) => println!("usage: s <id>"),
        },
        _ => println!("unknown command {:?} (type 'help')", line),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = parse_args();

    let config_path = cli
        .config_path
        .clone()
        .unwrap_or_else(Config::default_config_path);
    let mut config = Config::load_from_path(config_path.clone());
    if let Some(db_path) = cli.db_path {
        config.cache.db_path = db_path;
    }
    if let Some(key) = cli.api_key {
        config.api.api_key = key;
    }

    if cli.write_config {
        config.save_to_path(config_path.clone())?;
        println!("Wrote {}", config_path.display());
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.general.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Opening cache at {:?}", config.cache.db_path);
    let storage = Storage::open(&config.cache.db_path)?;
    let remote = PixabayClient::new(&config.api)?;
    let engine = Arc::new(
        PaginationEngine::new(Arc::new(remote), storage)
            .with_page_size(config.api.page_size)
            .with_max_cached_queries(config.cache.max_queries),
    );

    let session = SessionController::spawn(engine.clone());
    let query = cli.query.unwrap_or_else(|| config.general.initial_query.clone());
    session.set_query(query).await?;

    let mut updates = session.subscribe();
    let renderer = tokio::spawn(async move {
        let mut renderer = Renderer::default();
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            renderer.render(&snapshot);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => match handle_command(&line, &session, &engine).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => error!("Command failed: {}", e),
                    },
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    session.shutdown().await;
    renderer.abort();
    Ok(())
}
