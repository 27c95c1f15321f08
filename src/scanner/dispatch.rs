//! 单个对象的扫描流程
//!
//! 复制调用方的文件句柄，按会话的扫描模式调用引擎，并把结果写入
//! 只能容纳一条检测记录的结果列表。整个过程不持有生命周期锁。

use crate::core::error::{fail, logged};
use crate::core::{EncodingError, EngineError, EngineFault, Session};
use crate::scanner::Verdict;
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// 病毒名缓冲区的最大字节数
pub const MAX_THREAT_NAME_LEN: usize = 1024;

/// 病毒名无法转换时使用的名称
pub const FALLBACK_THREAT_NAME: &str = "INFECTED";

/// 结果中不回传对象路径
pub const OBJECT_PATH_PLACEHOLDER: &str = "<unavailable>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ObjectKind {
    File,
    Process,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(i32)]
pub enum ScanStatus {
    Clean = 0,
    Infected = 3,
}

impl ScanStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanInfo {
    pub object_kind: ObjectKind,
    pub object_path: String,
    pub status: ScanStatus,
    pub threat_name: String,
}

/// 一次扫描的检测结果，归调用方所有，交给 [`delete_scan_info`] 或直接丢弃即释放
#[derive(Debug, Serialize)]
pub struct ScanInfoList {
    entries: Vec<ScanInfo>,
}

impl ScanInfoList {
    /// 预先分配一条记录和病毒名缓冲区，在调用引擎之前完成
    fn allocate() -> Result<(Self, String), EngineError> {
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(1)
            .map_err(|_| EngineError::AllocationFailure)?;

        let mut threat_name = String::new();
        threat_name
            .try_reserve_exact(MAX_THREAT_NAME_LEN)
            .map_err(|_| EngineError::AllocationFailure)?;

        Ok((Self { entries }, threat_name))
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ScanInfo] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScanInfo> {
        self.entries.iter()
    }

    pub fn first(&self) -> Option<&ScanInfo> {
        self.entries.first()
    }
}

impl IntoIterator for ScanInfoList {
    type Item = ScanInfo;
    type IntoIter = std::vec::IntoIter<ScanInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// 释放扫描结果。列表按值传入，同一列表无法释放两次。
pub fn delete_scan_info(list: ScanInfoList) -> Result<(), EngineError> {
    log::debug!("释放扫描结果: {} 条记录", list.count());
    drop(list);
    Ok(())
}

/// 把引擎产生的窄字节病毒名转换为文本，截断到 `limit` 字节以内。
///
/// 名称在第一个 NUL 处结束；失败时由调用方决定回退值。
pub fn narrow_to_text(raw: &[u8], limit: usize) -> Result<&str, EncodingError> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let text = std::str::from_utf8(&raw[..end]).map_err(|e| EncodingError::InvalidSequence {
        valid_up_to: e.valid_up_to(),
    })?;

    let mut cut = text.len().min(limit);
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    Ok(&text[..cut])
}

/// 调用方句柄的只读副本。
///
/// 副本与原句柄共享文件偏移，因此只用定位读取并自带读取位置，从不移动共享偏移。
/// 同一句柄上的并发扫描互不干扰，离开作用域时关闭副本。
struct ScanView {
    file: File,
    position: u64,
}

impl ScanView {
    fn borrow(source: &File) -> Result<Self, EngineError> {
        let file = source.try_clone().map_err(EngineError::HandleDuplication)?;
        Ok(Self { file, position: 0 })
    }
}

impl Read for ScanView {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = read_at(&self.file, buf, self.position)?;
        self.position += n as u64;
        Ok(n)
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

// TODO: Windows 的 seek_read 会移动文件指针，改用重叠读取
#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

impl Session {
    /// 打开路径指向的文件并扫描
    pub fn scan_object<P: AsRef<Path>>(
        &self,
        path: P,
        kind: ObjectKind,
    ) -> Result<(ScanStatus, ScanInfoList), EngineError> {
        if kind != ObjectKind::File {
            return fail(EngineError::UnsupportedObjectKind(kind));
        }

        let path = path.as_ref();
        let file = File::open(path).map_err(|source| {
            logged(EngineError::Open {
                path: path.to_path_buf(),
                source,
            })
        })?;

        self.scan_object_by_handle(&file, kind)
    }

    /// 扫描调用方已打开的文件，调用结束后原句柄的偏移保持不变
    pub fn scan_object_by_handle(
        &self,
        file: &File,
        kind: ObjectKind,
    ) -> Result<(ScanStatus, ScanInfoList), EngineError> {
        if kind != ObjectKind::File {
            return fail(EngineError::UnsupportedObjectKind(kind));
        }

        let engine = self.engine()?;
        let mut view = ScanView::borrow(file).map_err(logged)?;
        let (mut list, mut threat_name) = ScanInfoList::allocate().map_err(logged)?;

        let verdict = engine.scan(&mut view, self.mode.options());
        drop(view);

        match verdict {
            Verdict::Clean => {
                log::debug!("扫描完成: 未发现威胁");
                Ok((ScanStatus::Clean, list))
            }
            Verdict::Infected(raw) => {
                match narrow_to_text(&raw, MAX_THREAT_NAME_LEN) {
                    Ok(name) => threat_name.push_str(name),
                    Err(e) => {
                        log::warn!("病毒名转换失败 ({})，使用默认名称", e);
                        threat_name.push_str(FALLBACK_THREAT_NAME);
                    }
                }
                log::warn!("发现威胁: {}", String::from_utf8_lossy(&raw));

                let info = ScanInfo {
                    object_kind: kind,
                    object_path: OBJECT_PATH_PLACEHOLDER.to_string(),
                    status: ScanStatus::Infected,
                    threat_name,
                };
                if let Some(callback) = &self.callback {
                    callback(&info);
                }
                list.entries.push(info);

                Ok((ScanStatus::Infected, list))
            }
            Verdict::Error(EngineFault::UnsupportedFormat(format)) => {
                fail(EngineError::UnsupportedFormat(format))
            }
            Verdict::Error(fault) => fail(EngineError::Engine(fault)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_narrow_to_text_plain() {
        assert_eq!(narrow_to_text(b"Eicar-Test-Signature", 1024), Ok("Eicar-Test-Signature"));
    }

    #[test]
    fn test_narrow_to_text_stops_at_nul() {
        assert_eq!(narrow_to_text(b"Win.Trojan\0garbage", 1024), Ok("Win.Trojan"));
    }

    #[test]
    fn test_narrow_to_text_invalid() {
        assert_eq!(
            narrow_to_text(b"Virus.\xe9t\xe9", 1024),
            Err(EncodingError::InvalidSequence { valid_up_to: 6 })
        );
    }

    #[test]
    fn test_narrow_to_text_truncates_on_char_boundary() {
        // "病毒" 每个字符3字节
        assert_eq!(narrow_to_text("病毒".as_bytes(), 4), Ok("病"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ScanStatus::Clean.code(), 0);
        assert_eq!(ScanStatus::Infected.code(), 3);
    }

    #[test]
    fn test_delete_empty_list() {
        let (list, _) = ScanInfoList::allocate().unwrap();
        assert!(list.is_empty());
        assert!(delete_scan_info(list).is_ok());
    }

    proptest! {
        #[test]
        fn prop_narrow_to_text_bounded(name in "\\PC{0,600}", limit in 0usize..2048) {
            let text = narrow_to_text(name.as_bytes(), limit).unwrap();
            prop_assert!(text.len() <= limit);
            prop_assert!(name.starts_with(text));
        }
    }
}
