pub mod logging;

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub fn format_bytes(size: u64) -> String {
    let units = ["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < units.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, units[unit_index])
}

/// 展开扫描目标：文件原样保留，目录递归列出其中的普通文件
pub fn collect_files(targets: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for target in targets {
        if target.is_dir() {
            for entry in WalkDir::new(target).follow_links(false).into_iter() {
                match entry {
                    Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                    Ok(_) => {}
                    Err(e) => log::warn!("访问路径错误: {}", e),
                }
            }
        } else {
            files.push(target.clone());
        }
    }

    files
}

pub fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10.00 MB");
    }

    #[test]
    fn test_collect_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.bin"), b"a").unwrap();
        std::fs::write(dir.path().join("sub").join("b.bin"), b"b").unwrap();
        let single = dir.path().join("a.bin");

        let mut files = collect_files(&[dir.path().to_path_buf(), single.clone()]);
        files.sort();
        assert_eq!(files.len(), 3);
        assert!(files.contains(&dir.path().join("sub").join("b.bin")));
        assert_eq!(files.iter().filter(|p| **p == single).count(), 2);
    }
}
