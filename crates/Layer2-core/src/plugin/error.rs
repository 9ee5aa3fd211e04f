//! Plugin errors - 로드 진단 및 설치 에러

use super::module::ModuleIdentity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// LoadFailure - 파일 단위 로드 진단
// ============================================================================

/// 로드 실패 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadFailureKind {
    /// 파일을 로드할 수 없음 (손상, 형식 불일치)
    LoadFailed,

    /// 참조하는 모듈을 찾을 수 없음
    DependencyNotFound,

    /// ABI/코어 버전 불일치
    Incompatible,

    /// 등록/생성 중 panic
    Panicked,

    /// 인스턴스 생성 실패 (타입 단위)
    ConstructionFailed,

    /// 검증 워커 프로세스 비정상 종료
    WorkerCrashed,
}

impl std::fmt::Display for LoadFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoadFailed => write!(f, "load failed"),
            Self::DependencyNotFound => write!(f, "dependency not found"),
            Self::Incompatible => write!(f, "incompatible module"),
            Self::Panicked => write!(f, "panicked"),
            Self::ConstructionFailed => write!(f, "construction failed"),
            Self::WorkerCrashed => write!(f, "validation worker crashed"),
        }
    }
}

/// 파일(또는 파일 내 타입) 하나의 로드 실패
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{kind} ({}): {message}", .file.display())]
pub struct LoadFailure {
    /// 대상 파일
    pub file: PathBuf,

    /// 실패 종류
    pub kind: LoadFailureKind,

    /// 상세 메시지
    pub message: String,

    /// 타입 단위 실패인 경우 타입 이름
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

impl LoadFailure {
    pub fn new(file: impl AsRef<Path>, kind: LoadFailureKind, message: impl Into<String>) -> Self {
        Self {
            file: file.as_ref().to_path_buf(),
            kind,
            message: message.into(),
            type_name: None,
        }
    }

    pub fn load_failed(file: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::new(file, LoadFailureKind::LoadFailed, message)
    }

    pub fn dependency_not_found(file: impl AsRef<Path>, missing: &ModuleIdentity) -> Self {
        Self::new(
            file,
            LoadFailureKind::DependencyNotFound,
            format!("required module '{}' could not be resolved", missing),
        )
    }

    /// 타입 이름 설정
    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }
}

// ============================================================================
// InstallError - 설치 트랜잭션 에러
// ============================================================================

/// 설치 실패
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// 아카이브를 열거나 풀 수 없음
    #[error("Extraction failed for {}: {reason}", .archive.display())]
    ExtractionFailed { archive: PathBuf, reason: String },

    /// 어떤 계약도 만족하는 타입이 없음
    #[error(
        "No capability found in {} ({} load diagnostics)",
        .archive.display(),
        .diagnostics.len()
    )]
    NoCapabilityFound {
        archive: PathBuf,
        diagnostics: Vec<LoadFailure>,
    },

    /// 같은 모듈 식별자를 가진 파일이 둘 이상
    #[error("Duplicate module identity '{identity}' declared by {files:?}")]
    DuplicateIdentity {
        identity: ModuleIdentity,
        files: Vec<PathBuf>,
    },

    /// 디스크, 권한 등 환경 실패
    #[error(transparent)]
    Environment(#[from] sqext_foundation::Error),
}

impl From<std::io::Error> for InstallError {
    fn from(e: std::io::Error) -> Self {
        InstallError::Environment(sqext_foundation::Error::Io(e))
    }
}

impl InstallError {
    /// 수집된 로드 진단
    pub fn diagnostics(&self) -> &[LoadFailure] {
        match self {
            InstallError::NoCapabilityFound { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_failure_display() {
        let failure = LoadFailure::load_failed("/ext/broken.so", "invalid ELF header");
        let text = failure.to_string();
        assert!(text.contains("load failed"));
        assert!(text.contains("broken.so"));
        assert!(text.contains("invalid ELF header"));
    }

    #[test]
    fn test_load_failure_roundtrip_json() {
        let failure = LoadFailure::dependency_not_found(
            "/staging/a.so",
            &ModuleIdentity::new("common", "1.0"),
        )
        .with_type("CxxAnalyzer");

        let json = serde_json::to_string(&failure).unwrap();
        assert!(json.contains("dependency_not_found"));
        let back: LoadFailure = serde_json::from_str(&json).unwrap();
        assert_eq!(back, failure);
    }

    #[test]
    fn test_install_error_diagnostics() {
        let err = InstallError::NoCapabilityFound {
            archive: PathBuf::from("plugin.zip"),
            diagnostics: vec![LoadFailure::load_failed("x.so", "bad")],
        };
        assert_eq!(err.diagnostics().len(), 1);
        assert!(err.to_string().contains("No capability found"));
    }
}
