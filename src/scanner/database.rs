use crate::core::EngineFault;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 病毒库文件扩展名
pub const DEFINITION_EXTENSIONS: &[&str] = &["db", "csv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutableKind {
    Pe,
    Elf,
}

impl ExecutableKind {
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.starts_with(b"MZ") {
            Some(ExecutableKind::Pe)
        } else if data.starts_with(b"\x7fELF") {
            Some(ExecutableKind::Elf)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureTarget {
    Any,
    Executable(ExecutableKind),
}

impl SignatureTarget {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "any" | "" => Some(SignatureTarget::Any),
            "pe" => Some(SignatureTarget::Executable(ExecutableKind::Pe)),
            "elf" => Some(SignatureTarget::Executable(ExecutableKind::Elf)),
            _ => None,
        }
    }

    fn applies_to(self, executable: Option<ExecutableKind>) -> bool {
        match self {
            SignatureTarget::Any => true,
            SignatureTarget::Executable(kind) => executable == Some(kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternToken {
    Byte(u8),
    /// `??`
    AnyByte,
    /// `*`
    Gap,
}

#[derive(Debug, Clone)]
pub struct BodySignature {
    /// 窄编码病毒名，原样保存
    pub name: Vec<u8>,
    pub target: SignatureTarget,
    pub tokens: Vec<PatternToken>,
    /// 按 `*` 切分后的片段，编译时生成
    segments: Vec<Vec<PatternToken>>,
}

pub struct SignatureDatabase {
    body: Vec<BodySignature>,
    hashes: HashMap<[u8; 32], Vec<u8>>,
    anchored: HashMap<u8, Vec<usize>>,
    floating: Vec<usize>,
    /// 含 `*` 的特征码，每个缓冲区只匹配一次
    gapped: Vec<usize>,
    compiled: bool,
}

impl SignatureDatabase {
    pub fn new() -> Self {
        Self {
            body: Vec::new(),
            hashes: HashMap::new(),
            anchored: HashMap::new(),
            floating: Vec::new(),
            gapped: Vec::new(),
            compiled: false,
        }
    }

    /// 加载单个病毒库文件，或递归加载目录下的所有病毒库文件
    pub fn load(&mut self, path: &Path) -> Result<usize, EngineFault> {
        if self.compiled {
            return Err(EngineFault::AlreadyCompiled);
        }

        log::info!("正在加载病毒库: {:?}", path);

        let files: Vec<PathBuf> = if path.is_dir() {
            WalkDir::new(path)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && Self::is_definition_file(e.path()))
                .map(|e| e.path().to_path_buf())
                .collect()
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            Vec::new()
        };

        if files.is_empty() {
            return Err(EngineFault::NoDefinitions(path.to_path_buf()));
        }

        let mut loaded = 0;
        for file in &files {
            loaded += self.load_file(file)?;
        }

        log::info!("已加载 {} 条病毒特征码，来自 {} 个文件", loaded, files.len());
        Ok(loaded)
    }

    fn is_definition_file(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| DEFINITION_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false)
    }

    fn load_file(&mut self, path: &Path) -> Result<usize, EngineFault> {
        let load_err = |reason: String| EngineFault::Load {
            path: path.to_path_buf(),
            reason,
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_path(path)
            .map_err(|e| load_err(e.to_string()))?;

        let mut count = 0;
        for (index, record) in reader.byte_records().enumerate() {
            let line = index + 2;
            let record = record.map_err(|e| load_err(format!("第 {} 行: {}", line, e)))?;
            if record.len() < 4 {
                return Err(load_err(format!("第 {} 行: 字段数不足", line)));
            }

            let name = record[0].to_vec();
            if name.is_empty() {
                return Err(load_err(format!("第 {} 行: 病毒名为空", line)));
            }
            let kind = String::from_utf8_lossy(&record[1]).to_lowercase();
            let target = String::from_utf8_lossy(&record[2]);
            let pattern = String::from_utf8_lossy(&record[3]);

            match kind.as_str() {
                "hex" => {
                    let target = SignatureTarget::parse(&target)
                        .ok_or_else(|| load_err(format!("第 {} 行: 无效的目标类型 {}", line, target)))?;
                    let tokens = Self::parse_pattern(&pattern)
                        .map_err(|e| load_err(format!("第 {} 行: {}", line, e)))?;
                    self.body.push(BodySignature {
                        name,
                        target,
                        tokens,
                        segments: Vec::new(),
                    });
                }
                "sha256" => {
                    let digest: [u8; 32] = hex::decode(pattern.as_bytes())
                        .ok()
                        .and_then(|d| d.try_into().ok())
                        .ok_or_else(|| load_err(format!("第 {} 行: 无效的SHA256值", line)))?;
                    self.hashes.insert(digest, name);
                }
                other => {
                    return Err(load_err(format!("第 {} 行: 未知的特征码类型 {}", line, other)));
                }
            }
            count += 1;
        }

        log::debug!("{:?}: {} 条特征码", path, count);
        Ok(count)
    }

    pub fn parse_pattern(pattern: &str) -> Result<Vec<PatternToken>, String> {
        if !pattern.is_ascii() {
            return Err(format!("特征码包含非ASCII字符: {}", pattern));
        }

        let bytes = pattern.as_bytes();
        let mut tokens = Vec::new();
        let mut i = 0;

        while i < bytes.len() {
            if bytes[i] == b'*' {
                tokens.push(PatternToken::Gap);
                i += 1;
                continue;
            }
            if i + 1 >= bytes.len() {
                return Err(format!("特征码长度为奇数: {}", pattern));
            }
            let pair = &pattern[i..i + 2];
            if pair == "??" {
                tokens.push(PatternToken::AnyByte);
            } else {
                let byte = u8::from_str_radix(pair, 16)
                    .map_err(|_| format!("无效的十六进制: {}", pair))?;
                tokens.push(PatternToken::Byte(byte));
            }
            i += 2;
        }

        Ok(tokens)
    }

    /// 规整并索引特征码，完成后数据库只读
    pub fn compile(&mut self) -> Result<(), EngineFault> {
        if self.compiled {
            return Err(EngineFault::AlreadyCompiled);
        }

        for (idx, sig) in self.body.iter_mut().enumerate() {
            while sig.tokens.first() == Some(&PatternToken::Gap) {
                sig.tokens.remove(0);
            }
            while sig.tokens.last() == Some(&PatternToken::Gap) {
                sig.tokens.pop();
            }
            if !sig.tokens.iter().any(|t| matches!(t, PatternToken::Byte(_))) {
                return Err(EngineFault::Compile(format!(
                    "特征码 {} 不含任何确定字节",
                    String::from_utf8_lossy(&sig.name)
                )));
            }

            sig.segments = sig
                .tokens
                .split(|t| *t == PatternToken::Gap)
                .filter(|segment| !segment.is_empty())
                .map(|segment| segment.to_vec())
                .collect();

            if sig.segments.len() > 1 {
                self.gapped.push(idx);
                continue;
            }
            match sig.tokens[0] {
                PatternToken::Byte(b) => self.anchored.entry(b).or_insert_with(Vec::new).push(idx),
                _ => self.floating.push(idx),
            }
        }

        self.compiled = true;
        log::info!(
            "病毒库编译完成: {} 条内容特征码, {} 条哈希特征码",
            self.body.len(),
            self.hashes.len()
        );
        Ok(())
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    pub fn signature_count(&self) -> usize {
        self.body.len() + self.hashes.len()
    }

    /// 返回第一个命中的病毒名
    pub fn find_match(&self, data: &[u8], executable: Option<ExecutableKind>) -> Option<&[u8]> {
        if !self.hashes.is_empty() {
            let digest: [u8; 32] = Sha256::digest(data).into();
            if let Some(name) = self.hashes.get(&digest) {
                return Some(name);
            }
        }

        for start in 0..data.len() {
            let window = &data[start..];
            let candidates = self
                .anchored
                .get(&data[start])
                .into_iter()
                .flatten()
                .chain(self.floating.iter());

            for &idx in candidates {
                let sig = &self.body[idx];
                if sig.target.applies_to(executable) && Self::segment_at(&sig.tokens, window) {
                    return Some(&sig.name);
                }
            }
        }

        for &idx in &self.gapped {
            let sig = &self.body[idx];
            if sig.target.applies_to(executable) && Self::match_segments(&sig.segments, data) {
                return Some(&sig.name);
            }
        }

        None
    }

    /// 片段间的 `*` 不限长度，逐个取最左出现位置即可，线性扫描整个缓冲区
    fn match_segments(segments: &[Vec<PatternToken>], data: &[u8]) -> bool {
        let mut from = 0;
        for segment in segments {
            match Self::find_segment(segment, data, from) {
                Some(at) => from = at + segment.len(),
                None => return false,
            }
        }
        true
    }

    fn find_segment(segment: &[PatternToken], data: &[u8], from: usize) -> Option<usize> {
        let last = data.len().checked_sub(segment.len())?;
        (from..=last).find(|&at| Self::segment_at(segment, &data[at..]))
    }

    fn segment_at(segment: &[PatternToken], data: &[u8]) -> bool {
        segment.len() <= data.len()
            && segment.iter().zip(data).all(|(token, byte)| match token {
                PatternToken::Byte(b) => b == byte,
                PatternToken::AnyByte => true,
                PatternToken::Gap => false,
            })
    }
}

impl Default for SignatureDatabase {
    fn default() -> Self {
        Self::new()
    }
}
