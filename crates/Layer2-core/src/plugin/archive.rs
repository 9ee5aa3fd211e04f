//! Archive - 설치 패키지(zip) 추출
//!
//! 확장 디렉토리는 평평한 구조이므로 엔트리는 파일 이름만으로 풀립니다.
//! 엔트리 하나의 실패는 기록만 하고 나머지 추출은 계속합니다.

use serde::{Deserialize, Serialize};
use sqext_foundation::{Error, Result};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 건너뛴 엔트리
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedEntry {
    pub entry: String,
    pub reason: String,
}

/// 추출된 패키지
#[derive(Debug, Clone, Default)]
pub struct StagedPackage {
    /// 추출 디렉토리
    pub root: PathBuf,

    /// 아카이브에 선언된 엔트리 목록
    pub entries: Vec<String>,

    /// 추출된 파일 (정렬)
    pub files: Vec<PathBuf>,

    /// 추출하지 못한 엔트리
    pub skipped: Vec<SkippedEntry>,
}

/// 아카이브를 `dest`에 추출 (blocking)
///
/// 아카이브 자체를 열 수 없으면 에러, 엔트리 단위 실패는 `skipped`에 기록.
pub fn extract_blocking(archive: &Path, dest: &Path) -> Result<StagedPackage> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| Error::Archive(format!("not a readable archive: {}", e)))?;

    fs::create_dir_all(dest)?;

    let mut package = StagedPackage {
        root: dest.to_path_buf(),
        entries: zip.file_names().map(str::to_string).collect(),
        ..Default::default()
    };
    package.entries.sort();

    let mut seen = HashSet::new();

    for index in 0..zip.len() {
        let mut entry = match zip.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                package.skipped.push(SkippedEntry {
                    entry: format!("#{}", index),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_string();
        let Some(file_name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n.to_os_string()))
        else {
            package.skipped.push(SkippedEntry {
                entry: name,
                reason: "unsafe path".to_string(),
            });
            continue;
        };

        if !seen.insert(file_name.clone()) {
            package.skipped.push(SkippedEntry {
                entry: name,
                reason: "duplicate file name".to_string(),
            });
            continue;
        }

        let target = dest.join(&file_name);
        let written = File::create(&target).and_then(|mut out| io::copy(&mut entry, &mut out));
        match written {
            Ok(bytes) => {
                debug!("Extracted {} ({} bytes)", name, bytes);
                package.files.push(target);
            }
            Err(e) => {
                warn!("Skipping archive entry {}: {}", name, e);
                let _ = fs::remove_file(&target);
                package.skipped.push(SkippedEntry {
                    entry: name,
                    reason: e.to_string(),
                });
            }
        }
    }

    package.files.sort();
    Ok(package)
}

/// 백그라운드 스레드에서 추출
pub async fn extract(archive: &Path, dest: &Path) -> Result<StagedPackage> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract_blocking(&archive, &dest))
        .await
        .map_err(|e| Error::Internal(format!("extraction task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::testing::write_zip;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_extract_flattens_entries() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("plugin.zip");
        write_zip(
            &archive,
            &[
                ("lib/cxx.sqm", b"{}".as_slice()),
                ("README.txt", b"hello".as_slice()),
            ],
        );

        let dest = temp.path().join("staging");
        let package = extract(&archive, &dest).await.unwrap();

        assert_eq!(package.entries, vec!["README.txt", "lib/cxx.sqm"]);
        assert_eq!(package.files.len(), 2);
        assert!(dest.join("cxx.sqm").exists());
        assert!(package.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_and_unsafe_entries_are_skipped() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("plugin.zip");
        write_zip(
            &archive,
            &[
                ("a/cxx.sqm", b"1".as_slice()),
                ("b/cxx.sqm", b"2".as_slice()),
                ("../escape.sqm", b"3".as_slice()),
                ("ok.sqm", b"4".as_slice()),
            ],
        );

        let dest = temp.path().join("staging");
        let package = extract(&archive, &dest).await.unwrap();

        assert_eq!(package.files.len(), 2);
        assert_eq!(package.skipped.len(), 2);
        assert_eq!(fs::read(dest.join("cxx.sqm")).unwrap(), b"1");
        assert!(!temp.path().join("escape.sqm").exists());
    }

    #[tokio::test]
    async fn test_corrupt_archive_is_error() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("plugin.zip");
        fs::write(&archive, b"PK\x03\x04 this is not really a zip").unwrap();

        assert!(extract(&archive, &temp.path().join("staging")).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_archive_is_error() {
        let temp = TempDir::new().unwrap();
        let err = extract(&temp.path().join("nope.zip"), temp.path())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
