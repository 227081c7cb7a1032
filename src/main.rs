use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rki_lexicon::database::{self, AudioLinkStore};
use rki_lexicon::{Config, Lexicon};

#[derive(Parser)]
#[command(name = "rki-lexicon", version, about = "Rakhine lexicon and audio link store")]
struct Cli {
    #[arg(
        short,
        long,
        default_value = "config.toml",
        help = "Configuration file; defaults apply when it does not exist"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Validate every record; exits with status 1 on critical findings")]
    Validate {
        #[arg(long, help = "Print findings as JSON instead of the text report")]
        json: bool,
    },
    #[command(about = "Lexicon statistics")]
    Stats,
    #[command(about = "Search entries by field")]
    Search {
        query: String,
        #[arg(long, default_value = "rakhine")]
        field: String,
        #[arg(long)]
        exact: bool,
    },
    #[command(about = "Import every audio file in a directory")]
    Import {
        dir: PathBuf,
        #[arg(long, help = "JSON list of per-file metadata, overrides import.metadata_file")]
        metadata: Option<PathBuf>,
    },
    #[command(about = "Link an audio record to an entry id")]
    Link { audio_id: i64, entry_id: String },
    #[command(about = "Recordings of one entry")]
    QueryEntry { entry_id: String },
    #[command(about = "Recordings of one dialect")]
    QueryDialect { dialect: String },
    #[command(about = "Audio store statistics")]
    AudioStats,
    #[command(about = "Report audio linked to missing entries and entries without audio")]
    Reconcile,
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::from_file(path)
    } else {
        Ok(Config::default())
    }
}

fn init_tracing(level: &str) {
    // RUST_LOG 优先于配置文件
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_lexicon(config: &Config) -> Result<Lexicon> {
    let path = &config.lexicon.data_file;
    Lexicon::load(path).with_context(|| format!("无法加载词典文件 {}", path))
}

// 刷新词条镜像，供音频查询关联
async fn sync_lexicon(store: &AudioLinkStore, config: &Config) -> Result<()> {
    if Path::new(&config.lexicon.data_file).exists() {
        let lexicon = load_lexicon(config)?;
        store.sync_entries(&lexicon).await?;
    } else {
        warn!(
            path = %config.lexicon.data_file,
            "Lexicon file missing, query results carry no entry fields"
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_tracing(&config.logging.level);

    match cli.command {
        Command::Validate { json } => {
            let lexicon = load_lexicon(&config)?;
            let report = lexicon.validation_report();
            if json {
                print_json(&report)?;
            } else {
                println!("{}", report.render());
            }
            if report.has_critical() {
                std::process::exit(1);
            }
        }
        Command::Stats => {
            let lexicon = load_lexicon(&config)?;
            print_json(&lexicon.statistics())?;
        }
        Command::Search {
            query,
            field,
            exact,
        } => {
            let lexicon = load_lexicon(&config)?;
            print_json(&lexicon.search(&query, &field, exact))?;
        }
        Command::Import { dir, metadata } => {
            let store = AudioLinkStore::new(&config).await?;
            let metadata_path = metadata
                .or_else(|| config.import.metadata_file.clone().map(PathBuf::from));
            let metadata_by_name = match metadata_path {
                Some(path) => database::load_metadata_file(&path)
                    .with_context(|| format!("无法读取元数据文件 {}", path.display()))?,
                None => HashMap::new(),
            };

            let report = store.batch_import_directory(&dir, &metadata_by_name).await?;
            info!(
                "导入完成：{}/{} 个文件成功，{} 个已关联词条",
                report.imported, report.attempted, report.linked
            );
            print_json(&report)?;
        }
        Command::Link { audio_id, entry_id } => {
            let store = AudioLinkStore::new(&config).await?;
            store.link_to_entry(audio_id, &entry_id).await?;
            info!(audio_id, entry_id = %entry_id, "Linked");
        }
        Command::QueryEntry { entry_id } => {
            let store = AudioLinkStore::new(&config).await?;
            sync_lexicon(&store, &config).await?;
            print_json(&store.query_by_entry(&entry_id).await?)?;
        }
        Command::QueryDialect { dialect } => {
            let store = AudioLinkStore::new(&config).await?;
            sync_lexicon(&store, &config).await?;
            print_json(&store.query_by_dialect(&dialect).await?)?;
        }
        Command::AudioStats => {
            let store = AudioLinkStore::new(&config).await?;
            print_json(&store.statistics().await?)?;
        }
        Command::Reconcile => {
            let store = AudioLinkStore::new(&config).await?;
            let lexicon = load_lexicon(&config)?;
            print_json(&store.reconcile(&lexicon).await?)?;
        }
    }

    Ok(())
}
