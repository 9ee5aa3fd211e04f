//! # sqext-foundation
//!
//! Foundation layer for SQExt:
//! - Error: 공통 에러 타입
//! - Storage: JsonStore (범용 JSON 파일 저장소)
//! - Config: 확장 호스트 설정 (ExtensionConfig) 및 모듈별 설정 (SettingsStore)

pub mod config;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{
    ExtensionConfig, IsolationMode, JsonSettingsStore, MemorySettingsStore, ModuleSettings,
    SettingsStore, DEFAULT_STAGING_DIR, EXTENSION_CONFIG_FILE, SETTINGS_FILE,
};

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::{JsonStore, STORE_DIR_NAME};
