use anyhow::Context;
use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;
use std::path::Path;

pub struct Logger;

impl Logger {
    /// 同时输出到按日期命名的日志文件和终端
    pub fn init(log_dir: &Path, level: LevelFilter) -> Result<(), anyhow::Error> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("无法创建日志目录: {:?}", log_dir))?;

        let log_file = log_dir.join(format!(
            "virus-scanner-session_{}.log",
            Local::now().format("%Y%m%d")
        ));

        Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{}][{}][{}] {}",
                    Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.target(),
                    message
                ))
            })
            .level(level)
            .chain(
                fern::log_file(&log_file)
                    .with_context(|| format!("无法创建日志文件: {:?}", log_file))?,
            )
            .chain(std::io::stdout())
            .apply()?;

        log::info!("日志系统已初始化，输出文件: {:?}", log_file);

        Ok(())
    }

    /// 只输出到终端，`RUST_LOG` 可覆盖级别
    pub fn init_console(level: LevelFilter) -> Result<(), anyhow::Error> {
        env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .try_init()?;
        Ok(())
    }

    pub fn get_level_filter(level: &str) -> LevelFilter {
        match level.to_uppercase().as_str() {
            "OFF" => LevelFilter::Off,
            "TRACE" => LevelFilter::Trace,
            "DEBUG" => LevelFilter::Debug,
            "INFO" => LevelFilter::Info,
            "WARN" => LevelFilter::Warn,
            "ERROR" => LevelFilter::Error,
            _ => LevelFilter::Info,
        }
    }
}
