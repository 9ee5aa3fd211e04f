//! Settings Store - 모듈별 키-값 설정
//!
//! 확장 모듈 이름을 키로 활성화 상태와 개별 설정 값을 저장합니다.
//! 플러그인 서브시스템은 이 trait만 사용합니다.

use crate::storage::JsonStore;
use crate::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 설정 파일명
pub const SETTINGS_FILE: &str = "extension-settings.json";

/// 모듈 하나의 설정
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSettings {
    /// 활성화 여부 (기록 없으면 None)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// 키-값 설정
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, String>,
}

/// 외부 키-값 설정 저장소
pub trait SettingsStore: Send + Sync {
    /// 모듈 설정 전체
    fn module_settings(&self, module: &str) -> ModuleSettings;

    /// 모듈 설정 교체
    fn put_module_settings(&self, module: &str, settings: ModuleSettings) -> Result<()>;

    /// 모듈 설정 삭제
    fn forget(&self, module: &str) -> Result<()>;

    /// 저장된 활성화 상태
    fn is_enabled(&self, module: &str) -> Option<bool> {
        self.module_settings(module).enabled
    }

    /// 활성화 상태 저장
    fn set_enabled(&self, module: &str, enabled: bool) -> Result<()> {
        let mut settings = self.module_settings(module);
        settings.enabled = Some(enabled);
        self.put_module_settings(module, settings)
    }

    /// 설정 값 조회
    fn get(&self, module: &str, key: &str) -> Option<String> {
        self.module_settings(module).values.get(key).cloned()
    }

    /// 설정 값 저장
    fn set(&self, module: &str, key: &str, value: &str) -> Result<()> {
        let mut settings = self.module_settings(module);
        settings.values.insert(key.to_string(), value.to_string());
        self.put_module_settings(module, settings)
    }
}

// ============================================================================
// MemorySettingsStore
// ============================================================================

/// 메모리 설정 저장소 (영속화 없음)
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    modules: RwLock<BTreeMap<String, ModuleSettings>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn module_settings(&self, module: &str) -> ModuleSettings {
        self.modules.read().get(module).cloned().unwrap_or_default()
    }

    fn put_module_settings(&self, module: &str, settings: ModuleSettings) -> Result<()> {
        self.modules.write().insert(module.to_string(), settings);
        Ok(())
    }

    fn forget(&self, module: &str) -> Result<()> {
        self.modules.write().remove(module);
        Ok(())
    }
}

// ============================================================================
// JsonSettingsStore
// ============================================================================

/// JSON 파일 설정 저장소
pub struct JsonSettingsStore {
    store: JsonStore,
    cache: RwLock<BTreeMap<String, ModuleSettings>>,
}

impl JsonSettingsStore {
    /// 저장소 디렉토리에서 로드 (파일이 없으면 빈 설정)
    pub fn open(store: JsonStore) -> Result<Self> {
        let modules = store
            .load_optional::<BTreeMap<String, ModuleSettings>>(SETTINGS_FILE)?
            .unwrap_or_default();
        tracing::debug!(
            "Loaded settings for {} modules from {}",
            modules.len(),
            store.file_path(SETTINGS_FILE).display()
        );

        Ok(Self {
            store,
            cache: RwLock::new(modules),
        })
    }

    fn persist(&self, modules: &BTreeMap<String, ModuleSettings>) -> Result<()> {
        self.store.save(SETTINGS_FILE, modules)
    }
}

impl SettingsStore for JsonSettingsStore {
    fn module_settings(&self, module: &str) -> ModuleSettings {
        self.cache.read().get(module).cloned().unwrap_or_default()
    }

    fn put_module_settings(&self, module: &str, settings: ModuleSettings) -> Result<()> {
        let mut cache = self.cache.write();
        cache.insert(module.to_string(), settings);
        self.persist(&cache)
    }

    fn forget(&self, module: &str) -> Result<()> {
        let mut cache = self.cache.write();
        if cache.remove(module).is_some() {
            self.persist(&cache)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store() {
        let store = MemorySettingsStore::new();
        assert_eq!(store.is_enabled("cxx"), None);

        store.set_enabled("cxx", false).unwrap();
        store.set("cxx", "sensor", "clang-tidy").unwrap();

        assert_eq!(store.is_enabled("cxx"), Some(false));
        assert_eq!(store.get("cxx", "sensor"), Some("clang-tidy".to_string()));

        store.forget("cxx").unwrap();
        assert_eq!(store.module_settings("cxx"), ModuleSettings::default());
    }

    #[test]
    fn test_json_store_persists() {
        let temp = TempDir::new().unwrap();

        {
            let settings = JsonSettingsStore::open(JsonStore::new(temp.path())).unwrap();
            settings.set_enabled("jira", true).unwrap();
            settings.set("jira", "url", "https://issues.example").unwrap();
        }

        let reopened = JsonSettingsStore::open(JsonStore::new(temp.path())).unwrap();
        assert_eq!(reopened.is_enabled("jira"), Some(true));
        assert_eq!(
            reopened.get("jira", "url"),
            Some("https://issues.example".to_string())
        );
    }
}
