//! Media Indexer CLI
//!
//! Registers video libraries, scans them into a SQLite catalog and keeps the
//! catalog in sync while watching.

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use media_indexer::config::{DEFAULT_DB_PATH, DEFAULT_DEBOUNCE_MS, DEFAULT_WORKER_THREADS};
use media_indexer::{
    LibraryId, LibraryRegistry, LibraryService, ScanConfig, ScanCoordinator, ScanError,
    SqliteStore,
};

const ABOUT: &str = r#"
Media Indexer - 视频媒体库索引与监控

使用示例:
  media_indexer add -n Anime -p /lib/anime      添加媒体库并立即扫描
  media_indexer list                            列出所有媒体库
  media_indexer scan                            扫描所有媒体库
  media_indexer scan --id 3                     扫描指定媒体库
  media_indexer files --id 3 --json             以JSON格式列出媒体库中的文件
  media_indexer remove --id 3                   删除媒体库
  media_indexer watch                           扫描后持续监控文件变化
"#;

/// Video library indexer
#[derive(Parser)]
#[command(name = "media_indexer")]
#[command(author, version, about = ABOUT, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// 数据库文件路径
    #[arg(short = 'd', long, global = true, default_value = DEFAULT_DB_PATH)]
    db: PathBuf,

    /// 并行扫描线程数（0 = 自动检测）
    #[arg(short = 't', long, global = true, default_value_t = DEFAULT_WORKER_THREADS)]
    threads: usize,

    /// 文件变更合并等待时间（毫秒）
    #[arg(long, global = true, default_value_t = DEFAULT_DEBOUNCE_MS)]
    debounce_ms: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// 添加媒体库并扫描
    Add {
        /// 媒体库名称
        #[arg(short = 'n', long)]
        name: String,

        /// 媒体库根目录
        #[arg(short = 'p', long)]
        path: PathBuf,
    },
    /// 列出所有媒体库
    List {
        /// 以 JSON 格式输出
        #[arg(long)]
        json: bool,
    },
    /// 删除媒体库及其文件记录
    Remove {
        /// 媒体库ID
        #[arg(long)]
        id: LibraryId,
    },
    /// 扫描媒体库（不指定ID时扫描全部）
    Scan {
        /// 媒体库ID
        #[arg(long)]
        id: Option<LibraryId>,

        /// 以 JSON 格式输出扫描结果
        #[arg(long)]
        json: bool,
    },
    /// 列出媒体库中已索引的文件
    Files {
        /// 媒体库ID
        #[arg(long)]
        id: LibraryId,

        /// 以 JSON 格式输出
        #[arg(long)]
        json: bool,
    },
    /// 扫描所有媒体库并持续监控，标准输入关闭时退出
    Watch,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("{}", ABOUT);
        println!("使用 'media_indexer --help' 查看完整帮助信息");
        return ExitCode::SUCCESS;
    };

    let config = ScanConfig::builder()
        .db_path(cli.db)
        .worker_threads(cli.threads)
        .debounce_ms(cli.debounce_ms)
        .build();

    match run(command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands, config: &ScanConfig) -> Result<(), ScanError> {
    info!("Opening catalog at {}", config.db_path.display());
    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let coordinator = Arc::new(ScanCoordinator::new(store.clone(), store.clone(), config)?);
    let service = LibraryService::new(store.clone(), store.clone(), coordinator.clone());

    match command {
        Commands::Add { name, path } => {
            let root = path
                .to_str()
                .ok_or_else(|| ScanError::invalid_path(path.clone()))?;
            let library = service.add_library(&name, root)?;
            wait_for_scans(&coordinator);
            let files = service.list_files(library.id)?;
            println!(
                "Added library {} ({}) with {} files",
                library.name,
                library.id,
                files.len()
            );
        }
        Commands::List { json } => {
            let libraries = service.list_libraries()?;
            if json {
                print_json(&libraries);
            } else {
                for library in libraries {
                    println!(
                        "{:>4}  {:<6} {:<20} {}",
                        library.id,
                        library.status.as_str(),
                        library.name,
                        library.root_path
                    );
                }
            }
        }
        Commands::Remove { id } => {
            service.delete_library(id)?;
            println!("Removed library {}", id);
        }
        Commands::Scan { id, json } => {
            let libraries = match id {
                Some(id) => store.get_library(id)?.into_iter().collect(),
                None => store.list_libraries()?,
            };
            let reports: Vec<_> = libraries
                .into_iter()
                .filter_map(|library| coordinator.scan_library(library))
                .collect();
            if json {
                print_json(&reports);
            } else {
                for report in reports {
                    println!("Library {}:", report.library_id);
                    println!("  Total files: {}", report.total_files);
                    println!("  Added: {}", report.added);
                    println!("  Updated: {}", report.updated);
                    println!("  Removed: {}", report.removed);
                    println!("  Failed writes: {}", report.failed_writes);
                    println!("  Duration: {}ms", report.duration_ms);
                }
            }
        }
        Commands::Files { id, json } => {
            let files = service.list_files(id)?;
            if json {
                print_json(&files);
            } else {
                for file in files {
                    println!("{:>12}  {}", file.size, file.path);
                }
            }
        }
        Commands::Watch => {
            service.scan_all_libraries();
            wait_for_scans(&coordinator);
            info!(
                "Watching {} libraries, close stdin to stop",
                coordinator.watched_libraries().len()
            );
            for line in std::io::stdin().lock().lines() {
                if line.is_err() {
                    break;
                }
            }
        }
    }

    coordinator.shutdown();
    Ok(())
}

fn wait_for_scans(coordinator: &ScanCoordinator) {
    while coordinator.active_scans() > 0 {
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to serialize output: {}", e),
    }
}
