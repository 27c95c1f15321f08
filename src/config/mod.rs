use crate::scanner::{ScanLimits, ScanMode};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub scan: ScanConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub definitions_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    pub default_mode: ScanMode,
    pub max_file_size: u64,
    pub max_recursion: usize,
    pub max_files: usize,
    pub threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// 为空时只输出到终端
    pub log_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let limits = ScanLimits::default();

        Self {
            database: DatabaseConfig {
                definitions_dir: PathBuf::from("/var/lib/virus-scanner/database"),
            },
            scan: ScanConfig {
                default_mode: ScanMode::Full,
                max_file_size: limits.max_file_size,
                max_recursion: limits.max_recursion,
                max_files: limits.max_files,
                threads: num_cpus::get(),
            },
            logging: LoggingConfig {
                level: "INFO".to_string(),
                log_dir: None,
            },
        }
    }
}

impl EngineConfig {
    /// 读取配置文件，文件不存在时写入默认配置
    pub fn load(path: &Path) -> Result<Self, anyhow::Error> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("无法读取配置文件: {:?}", path))?;
            let config = serde_yaml::from_str(&content)
                .with_context(|| format!("配置文件格式错误: {:?}", path))?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save(path)?;
            log::info!("已生成默认配置: {:?}", path);
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), anyhow::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content).with_context(|| format!("无法写入配置文件: {:?}", path))?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("virus-scanner")
            .join("session.yaml")
    }

    pub fn limits(&self) -> ScanLimits {
        ScanLimits {
            max_file_size: self.scan.max_file_size,
            max_recursion: self.scan.max_recursion,
            max_files: self.scan.max_files,
        }
    }
}
