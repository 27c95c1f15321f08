//! 会话接口的错误类型
//!
//! 所有公开操作都返回显式的 `Result`，失败同时写入日志，
//! 但日志只用于诊断，调用方必须以返回值为准。

use crate::scanner::ObjectKind;
use std::path::PathBuf;
use thiserror::Error;

/// 公开会话接口返回的错误
#[derive(Debug, Error)]
pub enum EngineError {
    /// 引擎已经初始化，必须先完整卸载
    #[error("引擎已初始化")]
    AlreadyInitialized,

    #[error("引擎未初始化")]
    NotInitialized,

    /// 仍有活动会话，引擎保持不变，调用方稍后重试
    #[error("引擎仍有 {0} 个活动会话")]
    Busy(usize),

    /// 生命周期锁不可用（持锁线程崩溃导致锁中毒）
    #[error("无法获取引擎锁")]
    LockFailure,

    #[error("内存不足")]
    AllocationFailure,

    #[error("无法复制文件句柄: {0}")]
    HandleDuplication(#[source] std::io::Error),

    #[error("不支持的对象类型: {0:?}")]
    UnsupportedObjectKind(ObjectKind),

    #[error("无效的选项: {0}")]
    InvalidOption(String),

    #[error("不支持的文件格式: {0}")]
    UnsupportedFormat(String),

    #[error("无法打开扫描对象 {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 引擎自身返回的错误，原样透传
    #[error("引擎错误: {0}")]
    Engine(#[from] EngineFault),
}

impl EngineError {
    /// 只有 `Busy` 可以通过稍后重试解决
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}

/// 记录失败并原样返回错误
pub(crate) fn logged(err: EngineError) -> EngineError {
    match &err {
        EngineError::Busy(_) => log::warn!("{}", err),
        _ => log::error!("{}", err),
    }
    err
}

pub(crate) fn fail<T>(err: EngineError) -> Result<T, EngineError> {
    Err(logged(err))
}

/// 扫描引擎（外部协作者）报告的错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineFault {
    #[error("无法创建引擎: {0}")]
    CreateFailed(String),

    #[error("未找到病毒库文件: {0:?}")]
    NoDefinitions(PathBuf),

    #[error("无法加载病毒库 {path:?}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("无法编译病毒库: {0}")]
    Compile(String),

    #[error("引擎尚未编译")]
    NotCompiled,

    #[error("引擎已编译")]
    AlreadyCompiled,

    #[error("读取扫描数据失败: {0}")]
    Read(String),

    #[error("不支持的文件格式: {0}")]
    UnsupportedFormat(String),
}

/// 窄字符串转换失败，调用方自行决定回退值
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("无效的字符序列，有效长度 {valid_up_to}")]
    InvalidSequence { valid_up_to: usize },
}
