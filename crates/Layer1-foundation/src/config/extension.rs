//! Extension Config - 확장 호스트 설정
//!
//! 확장 디렉토리, 스테이징 위치, 검증 격리 방식 등을 관리

use crate::storage::{JsonStore, STORE_DIR_NAME};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 설정 파일명
pub const EXTENSION_CONFIG_FILE: &str = "extensions.json";

/// 기본 스테이징 디렉토리 이름 (확장 디렉토리 하위)
pub const DEFAULT_STAGING_DIR: &str = ".staging";

// ============================================================================
// IsolationMode
// ============================================================================

/// 설치 검증 시 격리 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// 별도 워커 프로세스에서 검증 (크래시 격리)
    #[default]
    Process,

    /// 같은 프로세스의 독립 로드 컨텍스트에서 검증
    InProcess,
}

// ============================================================================
// ExtensionConfig
// ============================================================================

/// 확장 호스트 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionConfig {
    /// 설치된 확장 모듈 디렉토리
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_dir: Option<PathBuf>,

    /// 스테이징 디렉토리 이름
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_dir_name: Option<String>,

    /// 검증 격리 방식
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation: Option<IsolationMode>,

    /// 검증 워커 실행 파일 (없으면 현재 실행 파일)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_program: Option<PathBuf>,

    /// 추가 의존성 검색 경로
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_dirs: Vec<PathBuf>,
}

impl ExtensionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// 글로벌 + 프로젝트 병합 로드
    pub fn load() -> Result<Self> {
        let mut config = Self::new();

        // 1. 글로벌 설정
        if let Ok(global) = JsonStore::global() {
            if let Some(global_config) =
                global.load_optional::<ExtensionConfig>(EXTENSION_CONFIG_FILE)?
            {
                config.merge(global_config);
            }
        }

        // 2. 프로젝트 설정
        if let Ok(project) = JsonStore::current_project() {
            if let Some(project_config) =
                project.load_optional::<ExtensionConfig>(EXTENSION_CONFIG_FILE)?
            {
                config.merge(project_config);
            }
        }

        Ok(config)
    }

    /// 특정 저장소에서 로드
    pub fn load_from(store: &JsonStore) -> Result<Self> {
        Ok(store
            .load_optional::<ExtensionConfig>(EXTENSION_CONFIG_FILE)?
            .unwrap_or_default())
    }

    /// 글로벌 설정 저장
    pub fn save_global(&self) -> Result<()> {
        let store = JsonStore::global()?;
        store.save(EXTENSION_CONFIG_FILE, self)
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// 다른 설정과 병합 (other가 우선)
    pub fn merge(&mut self, other: ExtensionConfig) {
        if other.extension_dir.is_some() {
            self.extension_dir = other.extension_dir;
        }
        if other.staging_dir_name.is_some() {
            self.staging_dir_name = other.staging_dir_name;
        }
        if other.isolation.is_some() {
            self.isolation = other.isolation;
        }
        if other.worker_program.is_some() {
            self.worker_program = other.worker_program;
        }
        for dir in other.search_dirs {
            if !self.search_dirs.contains(&dir) {
                self.search_dirs.push(dir);
            }
        }
    }

    // ========================================================================
    // Resolved values
    // ========================================================================

    /// 확장 디렉토리 (기본: <data_dir>/sqext/extensions)
    pub fn extension_dir(&self) -> PathBuf {
        self.extension_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(STORE_DIR_NAME)
                .join("extensions")
        })
    }

    /// 스테이징 디렉토리 경로
    pub fn staging_dir(&self) -> PathBuf {
        self.extension_dir().join(
            self.staging_dir_name
                .as_deref()
                .unwrap_or(DEFAULT_STAGING_DIR),
        )
    }

    /// 격리 방식
    pub fn isolation(&self) -> IsolationMode {
        self.isolation.unwrap_or_default()
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn with_extension_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extension_dir = Some(dir.into());
        self
    }

    pub fn with_isolation(mut self, isolation: IsolationMode) -> Self {
        self.isolation = Some(isolation);
        self
    }

    pub fn with_worker_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.worker_program = Some(program.into());
        self
    }

    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dirs.push(dir.into());
        self
    }
}
