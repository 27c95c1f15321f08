use crate::config::EngineConfig;
use crate::core::{EngineManager, Session};
use crate::scanner::{delete_scan_info, ObjectKind, ScanMode, ScanStatus};
use crate::utils::logging::Logger;
use crate::utils::{collect_files, file_size, format_bytes};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// 等待扫描会话结束的最长时间
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "virus-scanner-session")]
#[command(author = "Security Team")]
#[command(version = "1.0.0")]
#[command(about = "基于共享引擎的并发病毒扫描工具", long_about = None)]
pub struct Command {
    #[command(subcommand)]
    pub subcommand: SubCommands,
    #[arg(short, long, global = true, help = "指定配置文件路径")]
    pub config: Option<PathBuf>,
    #[arg(short, long, global = true, help = "显示详细输出")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum SubCommands {
    #[command(name = "scan", about = "执行病毒扫描")]
    Scan(ScanArgs),
    #[command(name = "check", about = "加载并检查病毒库")]
    Check(CheckArgs),
    #[command(name = "config", about = "生成默认配置文件")]
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct ScanArgs {
    #[arg(required = true, help = "扫描路径，目录会递归扫描")]
    pub paths: Vec<PathBuf>,
    #[arg(long, short = 'm', help = "扫描模式: full(完整), light(快速)")]
    pub mode: Option<ScanMode>,
    #[arg(long, short = 'd', help = "病毒库目录")]
    pub database: Option<PathBuf>,
    #[arg(long, help = "线程数")]
    pub threads: Option<usize>,
    #[arg(long, help = "以 JSON 格式输出结果")]
    pub json: bool,
}

#[derive(Args)]
pub struct CheckArgs {
    #[arg(long, short = 'd', help = "病毒库目录")]
    pub database: Option<PathBuf>,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[arg(long, short = 'o', help = "输出文件路径")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub status: Option<ScanStatus>,
    pub threat_name: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScanSummary {
    pub mode: ScanMode,
    pub files_scanned: usize,
    pub threats_found: usize,
    pub errors: usize,
    pub bytes_scanned: u64,
    pub duration_secs: f64,
    pub results: Vec<FileReport>,
}

impl Command {
    pub fn build() -> Self {
        Command::parse()
    }

    /// 执行子命令，返回是否发现威胁
    pub fn execute(&self) -> Result<bool> {
        let config_path = self.config.clone().unwrap_or_else(EngineConfig::default_path);

        if let SubCommands::Config(args) = &self.subcommand {
            return Self::handle_config(args, &config_path);
        }

        let config = EngineConfig::load(&config_path)
            .with_context(|| format!("无法加载配置文件: {:?}", config_path))?;
        self.init_logging(&config)?;

        match &self.subcommand {
            SubCommands::Scan(args) => Self::handle_scan(args, &config),
            SubCommands::Check(args) => Self::handle_check(args, &config),
            SubCommands::Config(_) => Ok(false),
        }
    }

    fn init_logging(&self, config: &EngineConfig) -> Result<()> {
        let level = if self.verbose {
            log::LevelFilter::Debug
        } else {
            Logger::get_level_filter(&config.logging.level)
        };

        match &config.logging.log_dir {
            Some(dir) => Logger::init(dir, level),
            None => Logger::init_console(level),
        }
    }

    fn handle_scan(args: &ScanArgs, config: &EngineConfig) -> Result<bool> {
        let mode = args.mode.unwrap_or(config.scan.default_mode);
        let database = args
            .database
            .clone()
            .unwrap_or_else(|| config.database.definitions_dir.clone());
        let threads = args.threads.unwrap_or(config.scan.threads).max(1);

        let manager = EngineManager::from_config(config).with_default_mode(mode);
        manager
            .initialize(&database)
            .with_context(|| format!("无法加载病毒库: {:?}", database))?;

        let files = collect_files(&args.paths);
        if !args.json {
            println!("开始病毒扫描...");
            println!("扫描模式: {:?}", mode);
            println!("待扫描文件: {}", files.len());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .context("无法创建扫描线程池")?;

        let start_time = Instant::now();
        let results: Vec<FileReport> = pool.install(|| {
            files
                .par_iter()
                .map(|path| Self::scan_one(&manager, path))
                .collect()
        });
        let duration = start_time.elapsed();

        let summary = ScanSummary {
            mode,
            files_scanned: results.iter().filter(|r| r.status.is_some()).count(),
            threats_found: results
                .iter()
                .filter(|r| r.status == Some(ScanStatus::Infected))
                .count(),
            errors: results.iter().filter(|r| r.error.is_some()).count(),
            bytes_scanned: files.iter().map(|p| file_size(p)).sum(),
            duration_secs: duration.as_secs_f64(),
            results,
        };

        manager
            .uninitialize_after_drain(Some(SHUTDOWN_TIMEOUT))
            .context("无法卸载引擎")?;

        if args.json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            Self::print_summary(&summary);
        }

        Ok(summary.threats_found > 0)
    }

    fn scan_one(manager: &EngineManager, path: &Path) -> FileReport {
        let mut report = FileReport {
            path: path.to_path_buf(),
            status: None,
            threat_name: None,
            error: None,
        };

        let outcome = manager.create_session().and_then(|session| {
            let scanned = Self::scan_with(&session, path);
            manager.destroy_session(session)?;
            scanned
        });

        match outcome {
            Ok((status, threat_name)) => {
                report.status = Some(status);
                report.threat_name = threat_name;
            }
            Err(e) => {
                log::error!("扫描文件失败 {:?}: {}", path, e);
                report.error = Some(e.to_string());
            }
        }

        report
    }

    fn scan_with(
        session: &Session,
        path: &Path,
    ) -> Result<(ScanStatus, Option<String>), crate::core::EngineError> {
        let (status, list) = session.scan_object(path, ObjectKind::File)?;
        let threat_name = list.first().map(|info| info.threat_name.clone());
        delete_scan_info(list)?;
        Ok((status, threat_name))
    }

    fn print_summary(summary: &ScanSummary) {
        for report in &summary.results {
            if let Some(name) = &report.threat_name {
                println!("{:?}: {} 已发现", report.path, name);
            } else if let Some(error) = &report.error {
                println!("{:?}: 扫描失败 ({})", report.path, error);
            }
        }

        println!("\n扫描完成!");
        println!("扫描文件数: {}", summary.files_scanned);
        println!("发现威胁数: {}", summary.threats_found);
        println!("扫描失败数: {}", summary.errors);
        println!("扫描数据量: {}", format_bytes(summary.bytes_scanned));
        println!("扫描耗时: {:.2}秒", summary.duration_secs);
    }

    fn handle_check(args: &CheckArgs, config: &EngineConfig) -> Result<bool> {
        let database = args
            .database
            .clone()
            .unwrap_or_else(|| config.database.definitions_dir.clone());

        let manager = EngineManager::from_config(config);
        manager
            .initialize(&database)
            .with_context(|| format!("无法加载病毒库: {:?}", database))?;

        println!("病毒库信息");
        println!("================");
        println!("  病毒库目录: {:?}", database);
        println!("  签名数量: {}", manager.signature_count()?);
        println!("  默认扫描模式: {:?}", config.scan.default_mode);
        println!("  最大文件大小: {}", format_bytes(config.scan.max_file_size));

        manager.try_uninitialize()?;
        Ok(false)
    }

    fn handle_config(args: &ConfigArgs, config_path: &Path) -> Result<bool> {
        let output = args.output.clone().unwrap_or_else(|| config_path.to_path_buf());
        EngineConfig::default().save(&output)?;
        println!("默认配置已写入: {:?}", output);
        Ok(false)
    }
}
