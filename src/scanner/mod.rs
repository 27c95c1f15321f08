pub mod engine;
pub mod database;
pub mod dispatch;
pub mod formats;

#[cfg(test)]
mod tests;

pub use engine::{Engine, ScanLimits, ScanMode, ScanOptions, SignatureEngine, Verdict};
pub use database::{ExecutableKind, PatternToken, SignatureDatabase, SignatureTarget};
pub use dispatch::{
    delete_scan_info, narrow_to_text, ObjectKind, ScanInfo, ScanInfoList, ScanStatus,
    FALLBACK_THREAT_NAME, MAX_THREAT_NAME_LEN, OBJECT_PATH_PLACEHOLDER,
};
pub use formats::{FormatHandler, MailHandler, PstHandler, ZipHandler};
