//! Error types for SQExt
//!
//! 레이어 공통 에러. 모듈 파일 단위 진단은 sqext-core의 `LoadFailure`가 담당하고,
//! 여기의 에러는 호출자에게 그대로 전파됩니다.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// SQExt 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    /// 설정 값이 잘못되었거나 설정 파일을 해석할 수 없음
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON 저장소 파일을 쓰거나 지울 수 없음
    #[error("Store file {}: {reason}", .path.display())]
    Store { path: PathBuf, reason: String },

    /// 확장 모듈 또는 검증 워커가 보고한 실패
    #[error("Module error: {0}")]
    Module(String),

    /// 설치 패키지를 열 수 없음
    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn store(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Error::Store {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
