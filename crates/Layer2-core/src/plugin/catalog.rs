//! Plugin Catalog - 호스트에 로드된 확장 모듈 레지스트리
//!
//! 이름 → (디스크립터, 핸들). 핸들은 계약 인스턴스와 이를 만든 모듈을 소유합니다.
//! 조회는 동시에 가능하고, 변경은 쓰기 잠금 하나로 직렬화됩니다.

use super::contracts::{
    AnalysisProvider, Capability, ContractKind, IssueTracker, MenuCommandProvider,
    SourceControlProvider,
};
use super::module::{LoadedModule, ModuleIdentity};
use serde::{Deserialize, Serialize};
use sqext_foundation::{Error, Result};
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_DISABLED: &str = "disabled";
pub const STATUS_PENDING_REMOVAL: &str = "pending removal";
pub const STATUS_PENDING_RESTART: &str = "pending restart";

/// "load error: ..." 상태 문자열
pub fn load_error_status(message: &str) -> String {
    format!("load error: {}", message)
}

// ============================================================================
// PluginDescriptor
// ============================================================================

/// 카탈로그 항목 메타데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    pub name: String,
    pub version: String,
    pub enabled: bool,

    #[serde(default)]
    pub supported_extensions: BTreeSet<String>,

    pub status: String,

    /// 이 항목이 제공하는 계약
    #[serde(default)]
    pub kinds: Vec<ContractKind>,

    /// 소속 모듈
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<ModuleIdentity>,

    /// 모듈 파일
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            enabled: true,
            supported_extensions: BTreeSet::new(),
            status: STATUS_ACTIVE.to_string(),
            kinds: Vec::new(),
            module: None,
            file: None,
        }
    }

    pub fn with_module(mut self, module: ModuleIdentity, file: impl Into<PathBuf>) -> Self {
        self.module = Some(module);
        self.file = Some(file.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self.status = enabled_status(enabled).to_string();
        self
    }

    pub fn is_pending_removal(&self) -> bool {
        self.status == STATUS_PENDING_REMOVAL
    }

    pub fn is_load_error(&self) -> bool {
        self.status.starts_with("load error")
    }
}

fn enabled_status(enabled: bool) -> &'static str {
    if enabled {
        STATUS_ACTIVE
    } else {
        STATUS_DISABLED
    }
}

// ============================================================================
// ModuleHandle
// ============================================================================

/// 카탈로그 항목 하나가 소유하는 살아있는 인스턴스들
///
/// 복제할 수 없으며 항목이 제거될 때 함께 해제됩니다.
pub struct ModuleHandle {
    // 인스턴스가 모듈보다 먼저 드롭되어야 함
    capabilities: Vec<Capability>,
    module: Arc<LoadedModule>,
}

impl ModuleHandle {
    pub fn new(module: Arc<LoadedModule>, capabilities: Vec<Capability>) -> Self {
        Self {
            capabilities,
            module,
        }
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    pub fn module(&self) -> &Arc<LoadedModule> {
        &self.module
    }

    pub fn kinds(&self) -> Vec<ContractKind> {
        let mut kinds: Vec<ContractKind> = self.capabilities.iter().map(|c| c.kind()).collect();
        kinds.sort_by_key(|k| ContractKind::PRIORITY.iter().position(|p| p == k));
        kinds.dedup();
        kinds
    }
}

impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("module", self.module.identity())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

// ============================================================================
// FileOps - 파일 삭제/교체 (잠금 시뮬레이션 가능)
// ============================================================================

/// 모듈 파일 조작
pub trait FileOps: Send + Sync {
    /// 파일 삭제 (없으면 성공)
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// `from`을 `to`로 이동 (기존 파일 교체)
    fn replace(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// 실행 중인 프로세스가 파일을 잠그고 있는지
    fn is_locked(&self, path: &Path) -> bool;
}

/// 실제 파일 시스템
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFileOps;

impl FileOps for OsFileOps {
    fn remove(&self, path: &Path) -> io::Result<()> {
        match std::fs::remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn replace(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }

    #[cfg(windows)]
    fn is_locked(&self, path: &Path) -> bool {
        path.exists()
            && std::fs::OpenOptions::new()
                .write(true)
                .open(path)
                .is_err()
    }

    #[cfg(not(windows))]
    fn is_locked(&self, _path: &Path) -> bool {
        false
    }
}

/// 파일 잠금으로 인한 실패인지
pub fn is_lock_error(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }

    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    cfg!(windows) && matches!(e.raw_os_error(), Some(32) | Some(33))
}

// ============================================================================
// Outcomes
// ============================================================================

/// 등록 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterOutcome {
    /// 새 항목
    Registered,

    /// 기존 항목 즉시 교체
    Replaced,

    /// 기존 모듈 파일이 잠겨있어 재시작 후 적용
    PendingRestart,
}

/// 제거 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalOutcome {
    Removed,
    PendingRestart,
}

// ============================================================================
// PluginCatalog
// ============================================================================

struct Entry {
    descriptor: PluginDescriptor,
    handle: Option<ModuleHandle>,
    order: u64,
    deferred: Option<PluginDescriptor>,
}

#[derive(Default)]
struct CatalogState {
    entries: HashMap<String, Entry>,
    next_order: u64,
}

impl CatalogState {
    fn insert(&mut self, descriptor: PluginDescriptor, handle: Option<ModuleHandle>) {
        let order = self.next_order;
        self.next_order += 1;
        self.entries.insert(
            descriptor.name.clone(),
            Entry {
                descriptor,
                handle,
                order,
                deferred: None,
            },
        );
    }

    fn ordered(&self) -> Vec<&Entry> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.order);
        entries
    }
}

/// 호스트 카탈로그
pub struct PluginCatalog {
    state: RwLock<CatalogState>,
    file_ops: Arc<dyn FileOps>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::with_file_ops(Arc::new(OsFileOps))
    }

    pub fn with_file_ops(file_ops: Arc<dyn FileOps>) -> Self {
        Self {
            state: RwLock::new(CatalogState::default()),
            file_ops,
        }
    }

    pub fn file_ops(&self) -> &Arc<dyn FileOps> {
        &self.file_ops
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// 항목 등록 또는 교체
    pub async fn register(
        &self,
        mut descriptor: PluginDescriptor,
        handle: ModuleHandle,
    ) -> RegisterOutcome {
        if descriptor.kinds.is_empty() {
            descriptor.kinds = handle.kinds();
        }
        descriptor.status = enabled_status(descriptor.enabled).to_string();

        let mut state = self.state.write().await;
        let name = descriptor.name.clone();

        if let Some(entry) = state.entries.get_mut(&name) {
            let live = entry.descriptor.enabled && entry.handle.is_some();
            let locked = entry
                .descriptor
                .file
                .as_deref()
                .map(|f| self.file_ops.is_locked(f))
                .unwrap_or(false);

            if live && locked {
                info!(
                    "'{}' is loaded and its file is locked, replacement deferred to restart",
                    name
                );
                entry.descriptor.status = STATUS_PENDING_RESTART.to_string();
                entry.deferred = Some(descriptor);
                return RegisterOutcome::PendingRestart;
            }

            debug!("Replacing catalog entry '{}'", name);
            entry.descriptor = descriptor;
            entry.handle = Some(handle);
            entry.deferred = None;
            return RegisterOutcome::Replaced;
        }

        debug!("Registering catalog entry '{}'", name);
        state.insert(descriptor, Some(handle));
        RegisterOutcome::Registered
    }

    /// 로드 실패만 기록하는 항목 (핸들 없음)
    pub async fn record_failure(
        &self,
        name: impl Into<String>,
        file: impl Into<PathBuf>,
        message: &str,
    ) {
        let name = name.into();
        let mut state = self.state.write().await;

        if let Some(entry) = state.entries.get_mut(&name) {
            if entry.handle.is_some() {
                warn!("Ignoring load failure for live entry '{}': {}", name, message);
                return;
            }
            entry.descriptor.status = load_error_status(message);
            return;
        }

        let mut descriptor = PluginDescriptor::new(name, "");
        descriptor.enabled = false;
        descriptor.status = load_error_status(message);
        descriptor.file = Some(file.into());
        state.insert(descriptor, None);
    }

    /// 새 모듈 파일이 재시작 후에 적용될 항목
    ///
    /// 기존 항목은 계속 동작하고 새 디스크립터는 `deferred`로 보관됩니다.
    pub async fn defer(&self, mut descriptor: PluginDescriptor) {
        descriptor.status = STATUS_PENDING_RESTART.to_string();
        let mut state = self.state.write().await;

        if let Some(entry) = state.entries.get_mut(&descriptor.name) {
            entry.descriptor.status = STATUS_PENDING_RESTART.to_string();
            entry.deferred = Some(descriptor);
            return;
        }

        state.insert(descriptor, None);
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// 계약 종류로 활성 인스턴스 조회 (등록 순서)
    pub async fn lookup(&self, kind: ContractKind) -> Vec<Capability> {
        let state = self.state.read().await;
        state
            .ordered()
            .into_iter()
            .filter(|e| e.descriptor.enabled)
            .filter_map(|e| e.handle.as_ref())
            .flat_map(|h| h.capabilities().iter())
            .filter(|c| c.kind() == kind)
            .cloned()
            .collect()
    }

    pub async fn analysis_providers(&self) -> Vec<Arc<dyn AnalysisProvider>> {
        self.lookup(ContractKind::AnalysisProvider)
            .await
            .iter()
            .filter_map(|c| c.as_analysis().cloned())
            .collect()
    }

    pub async fn menu_commands(&self) -> Vec<Arc<dyn MenuCommandProvider>> {
        self.lookup(ContractKind::MenuCommand)
            .await
            .iter()
            .filter_map(|c| c.as_menu_command().cloned())
            .collect()
    }

    pub async fn issue_trackers(&self) -> Vec<Arc<dyn IssueTracker>> {
        self.lookup(ContractKind::IssueTracker)
            .await
            .iter()
            .filter_map(|c| c.as_issue_tracker().cloned())
            .collect()
    }

    pub async fn source_control_providers(&self) -> Vec<Arc<dyn SourceControlProvider>> {
        self.lookup(ContractKind::SourceControl)
            .await
            .iter()
            .filter_map(|c| c.as_source_control().cloned())
            .collect()
    }

    /// 파일을 지원하는 첫 분석 제공자
    pub async fn analysis_for(&self, file: &Path) -> Option<Arc<dyn AnalysisProvider>> {
        self.analysis_providers()
            .await
            .into_iter()
            .find(|p| p.is_supported(file))
    }

    pub async fn get(&self, name: &str) -> Option<PluginDescriptor> {
        let state = self.state.read().await;
        state.entries.get(name).map(|e| e.descriptor.clone())
    }

    /// 재시작 후 적용될 디스크립터
    pub async fn deferred(&self, name: &str) -> Option<PluginDescriptor> {
        let state = self.state.read().await;
        state.entries.get(name).and_then(|e| e.deferred.clone())
    }

    /// 전체 디스크립터 (등록 순서)
    pub async fn list(&self) -> Vec<PluginDescriptor> {
        let state = self.state.read().await;
        state
            .ordered()
            .into_iter()
            .map(|e| e.descriptor.clone())
            .collect()
    }

    /// 핸들이 붙잡고 있는 모듈 식별자
    pub async fn loaded_modules(&self) -> Vec<ModuleIdentity> {
        let state = self.state.read().await;
        let mut identities: Vec<ModuleIdentity> = state
            .entries
            .values()
            .filter_map(|e| e.handle.as_ref())
            .map(|h| h.module().identity().clone())
            .collect();
        identities.sort();
        identities.dedup();
        identities
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.state.read().await.entries.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// 활성화 상태 변경 - 모듈은 언로드하지 않음
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<PluginDescriptor> {
        let mut state = self.state.write().await;
        let entry = state
            .entries
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("extension '{}'", name)))?;

        entry.descriptor.enabled = enabled;
        if entry.descriptor.status == STATUS_ACTIVE || entry.descriptor.status == STATUS_DISABLED {
            entry.descriptor.status = enabled_status(enabled).to_string();
        }

        info!("{} '{}'", if enabled { "Enabled" } else { "Disabled" }, name);
        Ok(entry.descriptor.clone())
    }

    /// 파일은 건드리지 않고 항목만 제거
    pub async fn forget(&self, name: &str) -> Option<PluginDescriptor> {
        let mut state = self.state.write().await;
        state.entries.remove(name).map(|e| e.descriptor)
    }

    /// 핸들 해제 후 모듈 파일 삭제
    ///
    /// 파일이 잠겨있으면 상태를 "pending removal"로 바꾸고 `PendingRestart`.
    /// 다른 항목과 공유하는 파일은 삭제하지 않습니다.
    pub async fn remove(&self, name: &str) -> Result<RemovalOutcome> {
        let mut state = self.state.write().await;

        let file = state
            .entries
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("extension '{}'", name)))?
            .descriptor
            .file
            .clone();

        let shared = file.as_ref().is_some_and(|f| {
            state
                .entries
                .iter()
                .any(|(other, e)| other != name && e.descriptor.file.as_ref() == Some(f))
        });

        let Some(entry) = state.entries.get_mut(name) else {
            return Err(Error::NotFound(format!("extension '{}'", name)));
        };
        let handle = entry.handle.take();

        let pending = match file.as_deref() {
            Some(file) if !shared => {
                if self.file_ops.is_locked(file) {
                    true
                } else {
                    match self.file_ops.remove(file) {
                        Ok(()) => false,
                        Err(e) if is_lock_error(&e) => true,
                        Err(e) => {
                            entry.handle = handle;
                            return Err(e.into());
                        }
                    }
                }
            }
            _ => false,
        };
        drop(handle);

        if pending {
            warn!("'{}' is still in use, removal deferred to restart", name);
            entry.descriptor.status = STATUS_PENDING_REMOVAL.to_string();
            return Ok(RemovalOutcome::PendingRestart);
        }

        state.entries.remove(name);
        info!("Removed '{}'", name);
        Ok(RemovalOutcome::Removed)
    }
}

impl Default for PluginCatalog {
    fn default() -> Self {
        Self::new()
    }
}
