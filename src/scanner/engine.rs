use crate::core::EngineFault;
use crate::scanner::database::{ExecutableKind, SignatureDatabase};
use crate::scanner::formats::{self, FormatHandler};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

bitflags! {
    /// 传给引擎的扫描选项
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ScanOptions: u32 {
        const ARCHIVE = 1 << 0;
        const MAIL = 1 << 1;
        const EXECUTABLE = 1 << 2;
        /// 内置引擎不使用，原样传给外部引擎实现
        const HTML = 1 << 3;
        /// 同上，两种模式都保留
        const ALGORITHMIC = 1 << 4;

        const STANDARD = Self::ARCHIVE.bits()
            | Self::MAIL.bits()
            | Self::EXECUTABLE.bits()
            | Self::HTML.bits()
            | Self::ALGORITHMIC.bits();
        const LIGHT = Self::STANDARD.bits()
            & !(Self::ARCHIVE.bits() | Self::MAIL.bits() | Self::EXECUTABLE.bits());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    #[default]
    Full,
    Light,
}

impl ScanMode {
    pub fn options(self) -> ScanOptions {
        match self {
            ScanMode::Full => ScanOptions::STANDARD,
            ScanMode::Light => ScanOptions::LIGHT,
        }
    }

    /// 选项接口中使用的整数标签
    pub fn tag(self) -> i32 {
        match self {
            ScanMode::Full => 0,
            ScanMode::Light => 1,
        }
    }
}

impl TryFrom<i32> for ScanMode {
    type Error = i32;

    fn try_from(tag: i32) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(ScanMode::Full),
            1 => Ok(ScanMode::Light),
            other => Err(other),
        }
    }
}

impl std::str::FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(ScanMode::Full),
            "light" | "quick" => Ok(ScanMode::Light),
            other => Err(format!("无效的扫描模式: {}", other)),
        }
    }
}

/// 单次扫描的结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    /// 病毒名保持引擎产生的窄字节编码
    Infected(Vec<u8>),
    Error(EngineFault),
}

impl Verdict {
    pub fn is_infected(&self) -> bool {
        matches!(self, Verdict::Infected(_))
    }
}

/// 扫描引擎接口。创建由 [`EngineFactory`](crate::core::EngineFactory) 完成，释放即 `Drop`。
pub trait Engine: Send + Sync {
    /// 加载病毒库文件或目录，返回新增签名数
    fn load(&mut self, path: &Path) -> Result<usize, EngineFault>;

    fn compile(&mut self) -> Result<(), EngineFault>;

    fn signature_count(&self) -> usize;

    /// 编译后只读，可被多个线程同时调用
    fn scan(&self, stream: &mut dyn Read, options: ScanOptions) -> Verdict;
}

/// 扫描限制，默认值与经典示例客户端一致
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanLimits {
    pub max_file_size: u64,
    pub max_recursion: usize,
    pub max_files: usize,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            max_recursion: 8,
            max_files: 1000,
        }
    }
}

/// 内置的特征码引擎
pub struct SignatureEngine {
    database: SignatureDatabase,
    handlers: Vec<Box<dyn FormatHandler>>,
    limits: ScanLimits,
}

impl SignatureEngine {
    pub fn new(limits: ScanLimits) -> Self {
        Self {
            database: SignatureDatabase::new(),
            handlers: formats::default_handlers(),
            limits,
        }
    }

    pub fn limits(&self) -> &ScanLimits {
        &self.limits
    }

    fn scan_buffer(&self, data: &[u8], options: ScanOptions, depth: usize, files: &mut usize) -> Verdict {
        let executable = if options.contains(ScanOptions::EXECUTABLE) {
            ExecutableKind::detect(data)
        } else {
            None
        };

        if let Some(name) = self.database.find_match(data, executable) {
            return Verdict::Infected(name.to_vec());
        }

        for handler in &self.handlers {
            if !options.contains(handler.required_option()) || !handler.matches(data) {
                continue;
            }

            if depth >= self.limits.max_recursion {
                log::debug!("已达到最大递归深度 {}，跳过 {} 内容", depth, handler.name());
                return Verdict::Clean;
            }

            let children = match handler.extract(data, &self.limits) {
                Ok(children) => children,
                Err(fault) => return Verdict::Error(fault),
            };

            for child in children {
                *files += 1;
                if *files > self.limits.max_files {
                    log::debug!("已达到最大文件数 {}，停止解包", self.limits.max_files);
                    return Verdict::Clean;
                }

                match self.scan_buffer(&child, options, depth + 1, files) {
                    Verdict::Clean => {}
                    verdict => return verdict,
                }
            }
        }

        Verdict::Clean
    }
}

impl Default for SignatureEngine {
    fn default() -> Self {
        Self::new(ScanLimits::default())
    }
}

impl Engine for SignatureEngine {
    fn load(&mut self, path: &Path) -> Result<usize, EngineFault> {
        self.database.load(path)
    }

    fn compile(&mut self) -> Result<(), EngineFault> {
        self.database.compile()
    }

    fn signature_count(&self) -> usize {
        self.database.signature_count()
    }

    fn scan(&self, stream: &mut dyn Read, options: ScanOptions) -> Verdict {
        if !self.database.is_compiled() {
            return Verdict::Error(EngineFault::NotCompiled);
        }

        let mut data = Vec::new();
        if let Err(e) = stream.take(self.limits.max_file_size).read_to_end(&mut data) {
            return Verdict::Error(EngineFault::Read(e.to_string()));
        }

        let mut files = 0;
        self.scan_buffer(&data, options, 0, &mut files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_options_drop_unpacking() {
        let light = ScanMode::Light.options();
        assert!(!light.contains(ScanOptions::ARCHIVE));
        assert!(!light.contains(ScanOptions::MAIL));
        assert!(!light.contains(ScanOptions::EXECUTABLE));
        assert!(light.contains(ScanOptions::HTML));
        assert_eq!(ScanMode::Full.options(), ScanOptions::STANDARD);
    }

    #[test]
    fn test_scan_mode_tags() {
        assert_eq!(ScanMode::try_from(0), Ok(ScanMode::Full));
        assert_eq!(ScanMode::try_from(1), Ok(ScanMode::Light));
        assert_eq!(ScanMode::try_from(7), Err(7));
        assert_eq!(ScanMode::Light.tag(), 1);
    }

    #[test]
    fn test_scan_mode_from_str() {
        assert_eq!("FULL".parse::<ScanMode>(), Ok(ScanMode::Full));
        assert_eq!("light".parse::<ScanMode>(), Ok(ScanMode::Light));
        assert!("deep".parse::<ScanMode>().is_err());
    }

    #[test]
    fn test_scan_before_compile() {
        let engine = SignatureEngine::default();
        let mut input: &[u8] = b"data";
        assert_eq!(
            engine.scan(&mut input, ScanOptions::STANDARD),
            Verdict::Error(EngineFault::NotCompiled)
        );
    }
}
