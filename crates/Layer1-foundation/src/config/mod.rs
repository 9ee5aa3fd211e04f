//! Config - 통합 설정 관리
//!
//! - `extension.rs` - 확장 호스트 설정 (ExtensionConfig)
//! - `settings.rs` - 모듈별 키-값 설정 저장소 (SettingsStore)

mod extension;
mod settings;

pub use extension::{ExtensionConfig, IsolationMode, DEFAULT_STAGING_DIR, EXTENSION_CONFIG_FILE};
pub use settings::{JsonSettingsStore, MemorySettingsStore, ModuleSettings, SettingsStore, SETTINGS_FILE};
