//! 容器格式处理器
//!
//! 引擎在原始内容匹配之后，按扫描选项把可识别的容器交给对应的处理器解包，
//! 再逐个扫描解出的内容。识别但不解析的格式使用 [`PstHandler`] 这样的空处理器，
//! 它总是报告“不支持”，保证未检查过的内容不会被当作干净文件放行。

use crate::core::EngineFault;
use crate::scanner::engine::{ScanLimits, ScanOptions};
use base64::Engine as _;
use std::io::{Cursor, Read};

pub trait FormatHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// 启用该处理器所需的扫描选项
    fn required_option(&self) -> ScanOptions;

    fn matches(&self, data: &[u8]) -> bool;

    /// 解出需要继续扫描的内容
    fn extract(&self, data: &[u8], limits: &ScanLimits) -> Result<Vec<Vec<u8>>, EngineFault>;
}

pub fn default_handlers() -> Vec<Box<dyn FormatHandler>> {
    vec![
        Box::new(ZipHandler),
        Box::new(MailHandler),
        Box::new(PstHandler),
    ]
}

pub struct ZipHandler;

impl FormatHandler for ZipHandler {
    fn name(&self) -> &'static str {
        "ZIP"
    }

    fn required_option(&self) -> ScanOptions {
        ScanOptions::ARCHIVE
    }

    fn matches(&self, data: &[u8]) -> bool {
        data.starts_with(b"PK\x03\x04")
    }

    fn extract(&self, data: &[u8], limits: &ScanLimits) -> Result<Vec<Vec<u8>>, EngineFault> {
        let mut archive = zip::ZipArchive::new(Cursor::new(data))
            .map_err(|e| EngineFault::Read(format!("无法解析ZIP格式: {}", e)))?;

        let mut entries = Vec::new();
        for i in 0..archive.len().min(limits.max_files) {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| EngineFault::Read(format!("无法读取ZIP条目 {}: {}", i, e)))?;
            if entry.is_dir() {
                continue;
            }

            let name = entry.name().to_string();
            let mut content = Vec::new();
            (&mut entry)
                .take(limits.max_file_size)
                .read_to_end(&mut content)
                .map_err(|e| EngineFault::Read(format!("无法解压 {}: {}", name, e)))?;
            entries.push(content);
        }

        log::debug!("ZIP解包: {} 个条目", entries.len());
        Ok(entries)
    }
}

pub struct MailHandler;

impl MailHandler {
    const HEADER_MARKERS: &'static [&'static str] = &[
        "from ",
        "from:",
        "received:",
        "return-path:",
        "mime-version:",
        "content-type:",
    ];
}

impl FormatHandler for MailHandler {
    fn name(&self) -> &'static str {
        "MAIL"
    }

    fn required_option(&self) -> ScanOptions {
        ScanOptions::MAIL
    }

    fn matches(&self, data: &[u8]) -> bool {
        let head = &data[..data.len().min(64)];
        let head = String::from_utf8_lossy(head).to_lowercase();
        Self::HEADER_MARKERS.iter().any(|m| head.starts_with(m))
    }

    fn extract(&self, data: &[u8], _limits: &ScanLimits) -> Result<Vec<Vec<u8>>, EngineFault> {
        let text = String::from_utf8_lossy(data);
        let mut parts = Vec::new();
        let mut base64_pending = false;
        let mut in_body = false;
        let mut encoded = String::new();

        let flush = |encoded: &mut String, parts: &mut Vec<Vec<u8>>| {
            if encoded.is_empty() {
                return;
            }
            match base64::engine::general_purpose::STANDARD.decode(encoded.as_bytes()) {
                Ok(decoded) => parts.push(decoded),
                Err(e) => log::debug!("忽略无法解码的邮件附件: {}", e),
            }
            encoded.clear();
        };

        for line in text.lines() {
            let trimmed = line.trim();

            if in_body {
                if trimmed.is_empty() || trimmed.starts_with("--") {
                    flush(&mut encoded, &mut parts);
                    in_body = false;
                } else {
                    encoded.push_str(trimmed);
                }
                continue;
            }

            let lower = trimmed.to_lowercase();
            if lower.starts_with("content-transfer-encoding:") {
                base64_pending = lower.ends_with("base64");
            } else if trimmed.is_empty() && base64_pending {
                base64_pending = false;
                in_body = true;
            }
        }
        flush(&mut encoded, &mut parts);

        log::debug!("邮件解析: {} 个base64部分", parts.len());
        Ok(parts)
    }
}

/// PST 邮件存储：引擎能识别但不解析
pub struct PstHandler;

impl FormatHandler for PstHandler {
    fn name(&self) -> &'static str {
        "PST"
    }

    fn required_option(&self) -> ScanOptions {
        ScanOptions::MAIL
    }

    fn matches(&self, data: &[u8]) -> bool {
        data.starts_with(b"!BDN")
    }

    fn extract(&self, _data: &[u8], _limits: &ScanLimits) -> Result<Vec<Vec<u8>>, EngineFault> {
        log::warn!("暂不支持PST文件");
        Err(EngineFault::UnsupportedFormat(self.name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_pst_stub_always_unsupported() {
        let limits = ScanLimits::default();
        for input in [&b""[..], &b"!BDN\x00\x00"[..], &b"random bytes"[..]] {
            assert_eq!(
                PstHandler.extract(input, &limits),
                Err(EngineFault::UnsupportedFormat("PST".to_string()))
            );
        }
    }

    #[test]
    fn test_pst_magic() {
        assert!(PstHandler.matches(b"!BDN...."));
        assert!(!PstHandler.matches(b""));
        assert!(!PstHandler.matches(b"PK\x03\x04"));
    }

    #[test]
    fn test_zip_extract() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            writer
                .start_file("inner.bin", zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(b"inner payload").unwrap();
            writer.add_directory("dir/", zip::write::FileOptions::default()).unwrap();
            writer.finish().unwrap();
        }
        let data = buf.into_inner();

        assert!(ZipHandler.matches(&data));
        let entries = ZipHandler.extract(&data, &ScanLimits::default()).unwrap();
        assert_eq!(entries, vec![b"inner payload".to_vec()]);
    }

    #[test]
    fn test_zip_corrupt() {
        let result = ZipHandler.extract(b"PK\x03\x04garbage", &ScanLimits::default());
        assert!(matches!(result, Err(EngineFault::Read(_))));
    }

    #[test]
    fn test_mail_extract_base64_part() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"attachment body");
        let mail = format!(
            "From: a@example.com\r\nMIME-Version: 1.0\r\nContent-Type: multipart/mixed; boundary=\"b\"\r\n\r\n--b\r\nContent-Type: application/octet-stream\r\nContent-Transfer-Encoding: base64\r\n\r\n{}\r\n--b--\r\n",
            encoded
        );

        assert!(MailHandler.matches(mail.as_bytes()));
        let parts = MailHandler.extract(mail.as_bytes(), &ScanLimits::default()).unwrap();
        assert_eq!(parts, vec![b"attachment body".to_vec()]);
    }

    #[test]
    fn test_mail_not_matching_binary() {
        assert!(!MailHandler.matches(b"\x7fELF\x02\x01"));
    }
}
