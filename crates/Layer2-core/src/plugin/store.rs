//! Extension Store - 설치 기록 및 재시작 대기 마커
//!
//! 확장 디렉토리의 installed.json에 설치 기록, 삭제 대기 파일, 교체 대기 파일을
//! 저장합니다. 재시작 후 discovery가 이 마커를 보고 정리합니다.

use super::module::ModuleIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqext_foundation::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// 설치 기록 파일명
pub const INSTALLED_FILE: &str = "installed.json";

// ============================================================================
// InstalledExtension - 설치 기록
// ============================================================================

/// 카탈로그 항목 하나의 설치 기록
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledExtension {
    /// 카탈로그 이름
    pub name: String,

    pub version: String,

    /// 소속 모듈
    pub module: ModuleIdentity,

    /// 모듈 파일
    pub file: PathBuf,

    /// 설치한 아카이브
    pub source: String,

    pub installed_at: DateTime<Utc>,
}

impl InstalledExtension {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        module: ModuleIdentity,
        file: impl Into<PathBuf>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            module,
            file: file.into(),
            source: source.into(),
            installed_at: Utc::now(),
        }
    }
}

/// 재시작 후 적용할 파일 교체
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReplacement {
    /// 대기 중인 새 파일
    pub staged: PathBuf,

    /// 교체될 파일
    pub target: PathBuf,
}

/// installed.json 파일 구조
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledFile {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub extensions: Vec<InstalledExtension>,

    #[serde(default)]
    pub pending_removals: Vec<PathBuf>,

    #[serde(default)]
    pub pending_replacements: Vec<PendingReplacement>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for InstalledFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            extensions: Vec::new(),
            pending_removals: Vec::new(),
            pending_replacements: Vec::new(),
        }
    }
}

// ============================================================================
// ExtensionStore
// ============================================================================

/// installed.json 관리
pub struct ExtensionStore {
    /// 확장 디렉토리
    base_dir: PathBuf,

    cache: tokio::sync::RwLock<InstalledFile>,
}

impl ExtensionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            cache: tokio::sync::RwLock::new(InstalledFile::default()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn installed_file(&self) -> PathBuf {
        self.base_dir.join(INSTALLED_FILE)
    }

    // ========================================================================
    // 로드 / 저장
    // ========================================================================

    /// installed.json 로드 (없으면 빈 기록)
    pub async fn load(&self) -> Result<()> {
        let path = self.installed_file();

        if !path.exists() {
            debug!("{} not found at {:?}, using empty", INSTALLED_FILE, path);
            return Ok(());
        }

        let content = fs::read_to_string(&path).await?;
        let file: InstalledFile = serde_json::from_str(&content)?;

        info!(
            "Loaded {} install record(s), {} pending removal(s), {} pending replacement(s)",
            file.extensions.len(),
            file.pending_removals.len(),
            file.pending_replacements.len()
        );
        *self.cache.write().await = file;
        Ok(())
    }

    /// installed.json 저장
    pub async fn save(&self) -> Result<()> {
        let cache = self.cache.read().await;
        self.write(&cache).await
    }

    async fn write(&self, file: &InstalledFile) -> Result<()> {
        fs::create_dir_all(&self.base_dir).await?;

        let path = self.installed_file();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(file)?).await?;
        fs::rename(&tmp, &path).await?;

        debug!("Saved {} with {} record(s)", INSTALLED_FILE, file.extensions.len());
        Ok(())
    }

    // ========================================================================
    // 설치 기록
    // ========================================================================

    pub async fn list(&self) -> Vec<InstalledExtension> {
        self.cache.read().await.extensions.clone()
    }

    pub async fn get(&self, name: &str) -> Option<InstalledExtension> {
        self.cache
            .read()
            .await
            .extensions
            .iter()
            .find(|e| e.name == name)
            .cloned()
    }

    /// 모듈 식별자를 소유한 기록들
    pub async fn owners_of(&self, module: &ModuleIdentity) -> Vec<InstalledExtension> {
        self.cache
            .read()
            .await
            .extensions
            .iter()
            .filter(|e| &e.module == module)
            .cloned()
            .collect()
    }

    /// 설치 기록 (같은 이름은 교체)
    pub async fn record_install(&self, record: InstalledExtension) -> Result<()> {
        let mut cache = self.cache.write().await;

        if let Some(existing) = cache.extensions.iter_mut().find(|e| e.name == record.name) {
            debug!("Updating record: {} -> {}", record.name, record.version);
            *existing = record;
        } else {
            debug!("Recording install: {} {}", record.name, record.version);
            cache.extensions.push(record);
        }

        self.write(&cache).await
    }

    /// 설치 기록 삭제
    pub async fn record_uninstall(&self, name: &str) -> Result<Option<InstalledExtension>> {
        let mut cache = self.cache.write().await;

        let Some(pos) = cache.extensions.iter().position(|e| e.name == name) else {
            return Ok(None);
        };
        let removed = cache.extensions.remove(pos);

        self.write(&cache).await?;
        Ok(Some(removed))
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.extensions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.extensions.is_empty()
    }

    // ========================================================================
    // 삭제 대기
    // ========================================================================

    pub async fn pending_removals(&self) -> Vec<PathBuf> {
        self.cache.read().await.pending_removals.clone()
    }

    pub async fn is_pending_removal(&self, file: &Path) -> bool {
        self.cache
            .read()
            .await
            .pending_removals
            .iter()
            .any(|p| p == file)
    }

    pub async fn mark_pending_removal(&self, file: &Path) -> Result<()> {
        let mut cache = self.cache.write().await;
        if cache.pending_removals.iter().any(|p| p == file) {
            return Ok(());
        }
        cache.pending_removals.push(file.to_path_buf());
        self.write(&cache).await
    }

    pub async fn clear_pending_removal(&self, file: &Path) -> Result<()> {
        let mut cache = self.cache.write().await;
        let before = cache.pending_removals.len();
        cache.pending_removals.retain(|p| p != file);
        if cache.pending_removals.len() == before {
            return Ok(());
        }
        self.write(&cache).await
    }

    // ========================================================================
    // 교체 대기
    // ========================================================================

    pub async fn pending_replacements(&self) -> Vec<PendingReplacement> {
        self.cache.read().await.pending_replacements.clone()
    }

    /// 교체 대기 추가 (같은 대상은 최신으로 덮어씀)
    pub async fn add_pending_replacement(&self, replacement: PendingReplacement) -> Result<()> {
        let mut cache = self.cache.write().await;
        cache
            .pending_replacements
            .retain(|r| r.target != replacement.target);
        cache.pending_replacements.push(replacement);
        self.write(&cache).await
    }

    pub async fn clear_pending_replacement(&self, target: &Path) -> Result<()> {
        let mut cache = self.cache.write().await;
        cache.pending_replacements.retain(|r| r.target != target);
        self.write(&cache).await
    }
}
