use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use context_searcher::store::{PageRequest, VideoFilter};
use context_searcher::{
    Config, ContextSearchError, ElasticsearchEngine, EnglishVariety, SentenceExtractor,
    SqliteVideoStore, VideoIndexer, VideoSearcher, VideoStore,
};

#[derive(Parser)]
#[command(name = "context-searcher")]
#[command(version, about = "Phrase search over timed video subtitles")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file; the default search paths are used when omitted
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the sentences extracted from an SRT file as JSON
    Parse {
        file: PathBuf,
    },
    /// Store a video and index its subtitles
    Add {
        youtube_video_id: String,
        /// UK, US or AUS
        variety: EnglishVariety,
        /// SRT subtitle file
        file: PathBuf,
    },
    /// Replace a stored video
    Update {
        id: i64,
        youtube_video_id: String,
        variety: EnglishVariety,
        file: PathBuf,
    },
    /// Delete a video and its indexed sentences
    Remove {
        id: i64,
    },
    /// List stored videos
    List {
        #[arg(long, default_value_t = 0)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        size: usize,
        #[arg(long)]
        variety: Option<EnglishVariety>,
        #[arg(long)]
        youtube_video_id: Option<String>,
    },
    /// Store every .srt file below a directory, named after its file stem
    Import {
        dir: PathBuf,
        variety: EnglishVariety,
    },
    /// Rebuild the search index from the store and wait for it to finish
    Reindex {
        /// Seconds between status checks
        #[arg(long, default_value_t = 1)]
        poll_seconds: u64,
    },
    /// Show the status of the last full reindex
    Status,
    /// Search for a phrase
    Search {
        phrase: String,
        #[arg(long, default_value = "ALL")]
        variety: EnglishVariety,
        #[arg(long, default_value_t = 0)]
        from: usize,
        #[arg(long, default_value_t = 10)]
        size: usize,
    },
    /// Print the effective configuration
    Config {
        /// Also write it to this file
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

struct Services {
    store: Arc<dyn VideoStore>,
    indexer: VideoIndexer,
    searcher: VideoSearcher,
}

impl Services {
    fn connect(config: &Config) -> Result<Self> {
        let store: Arc<dyn VideoStore> = Arc::new(
            SqliteVideoStore::open(&config.storage.database_path).with_context(|| {
                format!("opening {}", config.storage.database_path.display())
            })?,
        );
        let engine = Arc::new(ElasticsearchEngine::new(&config.elasticsearch)?);

        Ok(Self {
            indexer: VideoIndexer::new(store.clone(), engine.clone(), &config.index),
            searcher: VideoSearcher::new(store.clone(), engine, &config.index),
            store,
        })
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load().unwrap_or_else(|e| {
            warn!("Failed to load config, using defaults: {}", e);
            Config::default()
        }),
    };
    config.validate()?;
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn read_subtitles(file: &Path) -> Result<String> {
    tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.filter_directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Parse { file } => {
            let raw = read_subtitles(&file).await?;
            let sentences = SentenceExtractor::default().extract_srt(&raw)?;
            info!("📝 Extracted {} sentences from {}", sentences.len(), file.display());
            print_json(&sentences)?;
        }

        Commands::Config { save } => {
            println!("{}", config.summary());
            if let Some(path) = save {
                config.save(path)?;
            }
        }

        command => run(command, &config).await?,
    }

    Ok(())
}

async fn run(command: Commands, config: &Config) -> Result<()> {
    let services = Services::connect(config)?;

    match command {
        Commands::Add {
            youtube_video_id,
            variety,
            file,
        } => {
            let raw = read_subtitles(&file).await?;
            let video = services.indexer.add(&youtube_video_id, variety, &raw).await?;
            info!("✅ Stored video {} as id {}", video.youtube_video_id, video.id);
        }

        Commands::Update {
            id,
            youtube_video_id,
            variety,
            file,
        } => {
            let raw = read_subtitles(&file).await?;
            services
                .indexer
                .update(id, &youtube_video_id, variety, &raw)
                .await?;
            info!("✅ Updated video {}", id);
        }

        Commands::Remove { id } => {
            services.indexer.remove(id).await?;
            info!("✅ Removed video {}", id);
        }

        Commands::List {
            page,
            size,
            variety,
            youtube_video_id,
        } => {
            let filter = VideoFilter {
                id: None,
                youtube_video_id,
                variety,
            };
            let page = services
                .store
                .find_page(&filter, PageRequest::new(page, size))
                .await?;
            info!("📚 {} videos in total", page.total);
            for video in &page.videos {
                println!("{}\t{}\t{}", video.id, video.youtube_video_id, video.variety);
            }
        }

        Commands::Import { dir, variety } => import(&services.indexer, &dir, variety).await?,

        Commands::Reindex { poll_seconds } => {
            let started = services.indexer.start_indexing().await?;
            info!("🚀 Reindex started at {}", started);

            while services.indexer.is_indexing() {
                tokio::time::sleep(Duration::from_secs(poll_seconds.max(1))).await;
            }
            print_json(&services.indexer.indexing_status().await?)?;
        }

        Commands::Status => print_json(&services.indexer.indexing_status().await?)?,

        Commands::Search {
            phrase,
            variety,
            from,
            size,
        } => {
            let page = services.searcher.search(&phrase, variety, from, size).await?;
            print_json(&page)?;
        }

        Commands::Parse { .. } | Commands::Config { .. } => {}
    }

    Ok(())
}

async fn import(indexer: &VideoIndexer, dir: &Path, variety: EnglishVariety) -> Result<()> {
    let mut imported = 0;
    let mut skipped = 0;

    let files = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("srt"))
        });

    for entry in files {
        let path = entry.path();
        let Some(youtube_video_id) = path.file_stem().and_then(|stem| stem.to_str()) else {
            warn!("⚠️ Skipping {}: file name is not valid UTF-8", path.display());
            skipped += 1;
            continue;
        };

        let raw = read_subtitles(path).await?;
        match indexer.add(youtube_video_id, variety, &raw).await {
            Ok(video) => {
                info!("➕ {} -> id {}", path.display(), video.id);
                imported += 1;
            }
            Err(e @ (ContextSearchError::AlreadyExists(_) | ContextSearchError::Parse { .. })) => {
                warn!("⚠️ Skipping {}: {}", path.display(), e);
                skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!("📥 Imported {} videos, skipped {}", imported, skipped);
    Ok(())
}
