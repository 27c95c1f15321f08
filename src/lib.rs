pub mod cli;
pub mod config;
pub mod core;
pub mod scanner;
pub mod utils;


pub use crate::config::EngineConfig;
pub use crate::core::{EngineError, EngineManager, OptionId, OptionValue, Session};
pub use crate::scanner::{
    delete_scan_info, ObjectKind, ScanInfo, ScanInfoList, ScanMode, ScanStatus, SignatureEngine,
};
