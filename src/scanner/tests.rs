use crate::core::EngineFault;
use crate::scanner::{
    Engine, ExecutableKind, PatternToken, ScanLimits, ScanMode, ScanOptions, SignatureDatabase,
    SignatureEngine, Verdict,
};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Write};
use tempfile::TempDir;

const DEFINITIONS: &str = "name,kind,target,pattern
Test.Body.Plain,hex,any,6d616c77617265
Test.Body.Wildcard,hex,any,deadbeef??cafe
Test.Body.Gap,hex,any,aabb*ccdd
Test.Pe.Only,hex,pe,70656d61726b
";

fn engine_with(definitions: &str) -> (TempDir, SignatureEngine) {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("main.db"), definitions).unwrap();

    let mut engine = SignatureEngine::default();
    engine.load(dir.path()).unwrap();
    engine.compile().unwrap();
    (dir, engine)
}

fn scan(engine: &SignatureEngine, data: &[u8], options: ScanOptions) -> Verdict {
    let mut cursor = Cursor::new(data);
    engine.scan(&mut cursor, options)
}

#[test]
fn test_signature_database_creation() {
    let db = SignatureDatabase::new();
    assert_eq!(db.signature_count(), 0);
    assert!(!db.is_compiled());
}

#[test]
fn test_parse_pattern() {
    let tokens = SignatureDatabase::parse_pattern("4d??*5a").unwrap();
    assert_eq!(
        tokens,
        vec![
            PatternToken::Byte(0x4d),
            PatternToken::AnyByte,
            PatternToken::Gap,
            PatternToken::Byte(0x5a),
        ]
    );

    assert!(SignatureDatabase::parse_pattern("4d5").is_err());
    assert!(SignatureDatabase::parse_pattern("zz").is_err());
    assert!(SignatureDatabase::parse_pattern("病毒").is_err());
}

#[test]
fn test_pattern_matching() {
    let (_dir, engine) = engine_with(DEFINITIONS);

    assert_eq!(
        scan(&engine, b"this file contains malware inside", ScanOptions::STANDARD),
        Verdict::Infected(b"Test.Body.Plain".to_vec())
    );
    assert_eq!(
        scan(&engine, b"\x00\xde\xad\xbe\xef\x42\xca\xfe", ScanOptions::STANDARD),
        Verdict::Infected(b"Test.Body.Wildcard".to_vec())
    );
    assert_eq!(
        scan(&engine, b"\xaa\xbb some padding \xcc\xdd", ScanOptions::STANDARD),
        Verdict::Infected(b"Test.Body.Gap".to_vec())
    );
}

#[test]
fn test_pattern_not_matching() {
    let (_dir, engine) = engine_with(DEFINITIONS);

    assert_eq!(scan(&engine, b"Hello, World!", ScanOptions::STANDARD), Verdict::Clean);
    assert_eq!(scan(&engine, b"", ScanOptions::STANDARD), Verdict::Clean);
    assert_eq!(scan(&engine, b"\xcc\xdd before \xaa\xbb", ScanOptions::STANDARD), Verdict::Clean);
}

#[test]
fn test_executable_target_requires_option() {
    let (_dir, engine) = engine_with(DEFINITIONS);
    let pe = b"MZ\x90\x00 ... pemark ...";

    assert_eq!(
        scan(&engine, pe, ScanOptions::STANDARD),
        Verdict::Infected(b"Test.Pe.Only".to_vec())
    );
    assert_eq!(scan(&engine, pe, ScanMode::Light.options()), Verdict::Clean);
    assert_eq!(scan(&engine, b"plain pemark", ScanOptions::STANDARD), Verdict::Clean);
}

#[test]
fn test_executable_detection() {
    assert_eq!(ExecutableKind::detect(b"MZ\x90\x00"), Some(ExecutableKind::Pe));
    assert_eq!(ExecutableKind::detect(b"\x7fELF\x02"), Some(ExecutableKind::Elf));
    assert_eq!(ExecutableKind::detect(b"#!/bin/sh"), None);
}

#[test]
fn test_hash_signature() {
    let payload = b"exact sample content";
    let digest = hex::encode(Sha256::digest(payload));
    let definitions = format!("name,kind,target,pattern\nTest.Hash,sha256,any,{}\n", digest);
    let (_dir, engine) = engine_with(&definitions);

    assert_eq!(
        scan(&engine, payload, ScanOptions::LIGHT),
        Verdict::Infected(b"Test.Hash".to_vec())
    );
    assert_eq!(scan(&engine, b"exact sample content!", ScanOptions::LIGHT), Verdict::Clean);
}

#[test]
fn test_zip_unpacked_only_in_full_mode() {
    let (_dir, engine) = engine_with(DEFINITIONS);

    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buf);
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        writer.start_file("payload.txt", options).unwrap();
        writer.write_all(&b"hidden malware payload ".repeat(16)).unwrap();
        writer.finish().unwrap();
    }
    let archive = buf.into_inner();

    assert_eq!(
        scan(&engine, &archive, ScanMode::Full.options()),
        Verdict::Infected(b"Test.Body.Plain".to_vec())
    );
    assert_eq!(scan(&engine, &archive, ScanMode::Light.options()), Verdict::Clean);
}

#[test]
fn test_pst_fails_safe() {
    let (_dir, engine) = engine_with(DEFINITIONS);

    assert_eq!(
        scan(&engine, b"!BDN\x00\x00\x00\x00", ScanMode::Full.options()),
        Verdict::Error(EngineFault::UnsupportedFormat("PST".to_string()))
    );
    // 原始内容命中时仍然报告病毒
    assert!(scan(&engine, b"!BDN malware", ScanMode::Full.options()).is_infected());
}

#[test]
fn test_max_file_size_limit() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("main.db"), DEFINITIONS).unwrap();

    let mut engine = SignatureEngine::new(ScanLimits {
        max_file_size: 16,
        ..ScanLimits::default()
    });
    engine.load(dir.path()).unwrap();
    engine.compile().unwrap();

    let mut data = vec![b'x'; 32];
    data.extend_from_slice(b"malware");
    assert_eq!(scan(&engine, &data, ScanOptions::STANDARD), Verdict::Clean);
}

#[test]
fn test_load_errors() {
    let dir = TempDir::new().unwrap();
    let mut engine = SignatureEngine::default();
    assert!(matches!(engine.load(dir.path()), Err(EngineFault::NoDefinitions(_))));

    std::fs::write(dir.path().join("bad.db"), "name,kind,target,pattern\nBad,regex,any,00\n").unwrap();
    assert!(matches!(engine.load(dir.path()), Err(EngineFault::Load { .. })));
}

#[test]
fn test_load_ignores_other_files() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("readme.txt"), "not definitions").unwrap();
    std::fs::create_dir(dir.path().join("daily")).unwrap();
    std::fs::write(dir.path().join("daily").join("daily.csv"), DEFINITIONS).unwrap();

    let mut engine = SignatureEngine::default();
    assert_eq!(engine.load(dir.path()).unwrap(), 4);
}

#[test]
fn test_compile_rejects_wildcard_only() {
    let (dir, _) = engine_with(DEFINITIONS);
    std::fs::write(dir.path().join("main.db"), "name,kind,target,pattern\nWild,hex,any,??*??\n").unwrap();

    let mut engine = SignatureEngine::default();
    engine.load(dir.path()).unwrap();
    assert!(matches!(engine.compile(), Err(EngineFault::Compile(_))));
}

#[test]
fn test_compile_twice() {
    let (_dir, mut engine) = engine_with(DEFINITIONS);
    assert_eq!(engine.compile(), Err(EngineFault::AlreadyCompiled));
}

#[test]
fn test_gap_segments_match_in_order() {
    let (_dir, engine) = engine_with("name,kind,target,pattern\nTest.Gap.Chain,hex,any,41*42??43*44\n");

    assert_eq!(
        scan(&engine, b"..A..BxC....D..", ScanOptions::STANDARD),
        Verdict::Infected(b"Test.Gap.Chain".to_vec())
    );
    assert_eq!(scan(&engine, b"D..BxC..A", ScanOptions::STANDARD), Verdict::Clean);
    assert_eq!(scan(&engine, b"A..BC..D", ScanOptions::STANDARD), Verdict::Clean);
}

#[test]
fn test_gap_signature_scan_time_is_linear() {
    let (_dir, engine) = engine_with("name,kind,target,pattern\nTest.Gap.Many,hex,any,41*42*43*44\n");
    let data = vec![b'A'; 2 * 1024 * 1024];

    let started = std::time::Instant::now();
    assert_eq!(scan(&engine, &data, ScanOptions::STANDARD), Verdict::Clean);
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
}
