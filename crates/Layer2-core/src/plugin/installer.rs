//! Plugin Installer - 설치/제거 트랜잭션
//!
//! 설치 단계: `Extracting → Validating → Committing → {Installed, RolledBack}`
//!
//! 1. 아카이브를 스테이징 디렉토리에 추출
//! 2. 스테이징 파일을 샌드박스에서 검증 (기본: 워커 프로세스)
//! 3. 검증 성공 시 스테이징을 지우고 아카이브를 다시 추출해서 모듈 파일만
//!    확장 디렉토리로 옮긴 뒤 호스트에 로드해서 카탈로그에 등록
//! 4. 호스트에서 아무 것도 등록되지 않으면 옮긴 파일을 되돌림
//!
//! 모든 설치/제거/활성화 변경은 뮤텍스 하나로 직렬화됩니다.

use super::archive::{self, SkippedEntry};
use super::catalog::{
    is_lock_error, FileOps, OsFileOps, PluginCatalog, PluginDescriptor, RegisterOutcome,
    RemovalOutcome,
};
use super::discovery::{
    group_capabilities, load_into_host, release_unused_modules, DiscoveryReport, PluginDiscovery,
};
use super::error::{InstallError, LoadFailure};
use super::events::{EventBus, EventType, ExtensionEvent};
use super::module::{ModuleIdentity, ModuleLoader};
use super::resolver::{find_duplicate_identities, ModuleSet};
use super::sandbox::{self, CandidateDescriptor, Isolation, ModuleRecord};
use super::store::{ExtensionStore, InstalledExtension, PendingReplacement};
use serde::{Deserialize, Serialize};
use sqext_foundation::{
    Error, ExtensionConfig, IsolationMode, MemorySettingsStore, Result, SettingsStore,
    DEFAULT_STAGING_DIR,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 재시작 대기 중인 새 파일 디렉토리
pub const PENDING_DIR: &str = ".pending";

// ============================================================================
// InstallPhase
// ============================================================================

/// 설치 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallPhase {
    Extracting,
    Validating,
    Committing,
    Installed,
    RolledBack,
}

impl std::fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Extracting => write!(f, "extracting"),
            Self::Validating => write!(f, "validating"),
            Self::Committing => write!(f, "committing"),
            Self::Installed => write!(f, "installed"),
            Self::RolledBack => write!(f, "rolled back"),
        }
    }
}

// ============================================================================
// InstallerOptions
// ============================================================================

/// 설치기 설정
pub struct InstallerOptions {
    pub extension_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub isolation: Isolation,
    pub search_dirs: Vec<PathBuf>,
    pub settings: Arc<dyn SettingsStore>,
    pub file_ops: Arc<dyn FileOps>,
}

impl InstallerOptions {
    /// 기본값: 같은 프로세스 검증, 메모리 설정 저장소
    pub fn new(extension_dir: impl Into<PathBuf>) -> Self {
        let extension_dir = extension_dir.into();
        Self {
            staging_dir: extension_dir.join(DEFAULT_STAGING_DIR),
            extension_dir,
            isolation: Isolation::InProcess,
            search_dirs: Vec::new(),
            settings: Arc::new(MemorySettingsStore::new()),
            file_ops: Arc::new(OsFileOps),
        }
    }

    /// 확장 호스트 설정에서 생성
    ///
    /// 워커 프로그램이 설정되지 않았으면 현재 실행 파일을 워커로 사용합니다.
    pub fn from_config(config: &ExtensionConfig, settings: Arc<dyn SettingsStore>) -> Result<Self> {
        let isolation = match config.isolation() {
            IsolationMode::InProcess => Isolation::InProcess,
            IsolationMode::Process => {
                let program = match &config.worker_program {
                    Some(program) => program.clone(),
                    None => std::env::current_exe().map_err(|e| {
                        Error::Config(format!("cannot locate validation worker: {}", e))
                    })?,
                };
                Isolation::process(program)
            }
        };

        Ok(Self {
            extension_dir: config.extension_dir(),
            staging_dir: config.staging_dir(),
            isolation,
            search_dirs: config.search_dirs.clone(),
            settings,
            file_ops: Arc::new(OsFileOps),
        })
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_file_ops(mut self, file_ops: Arc<dyn FileOps>) -> Self {
        self.file_ops = file_ops;
        self
    }

    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dirs.push(dir.into());
        self
    }
}

// ============================================================================
// Reports
// ============================================================================

/// 설치 결과
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReport {
    /// 등록된 디스크립터 (아카이브 순서)
    pub descriptors: Vec<PluginDescriptor>,

    /// 이름별 등록 결과
    pub outcomes: Vec<(String, RegisterOutcome)>,

    /// 검증/로드 진단 (성공한 디스크립터와 함께 보고)
    pub diagnostics: Vec<LoadFailure>,

    /// 추출하지 못한 엔트리
    pub skipped_entries: Vec<SkippedEntry>,
}

impl InstallReport {
    /// 첫 번째 디스크립터
    pub fn primary(&self) -> Option<&PluginDescriptor> {
        self.descriptors.first()
    }

    pub fn requires_restart(&self) -> bool {
        self.outcomes
            .iter()
            .any(|(_, outcome)| *outcome == RegisterOutcome::PendingRestart)
    }
}

/// 제거 결과
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalReport {
    pub outcome: RemovalOutcome,

    /// 같은 모듈 파일을 공유해서 함께 제거된 항목 포함
    pub removed: Vec<String>,
}

// ============================================================================
// PluginInstaller
// ============================================================================

/// 설치/제거 오케스트레이터
pub struct PluginInstaller {
    extension_dir: PathBuf,
    staging_dir: PathBuf,
    isolation: Isolation,
    search_dirs: Vec<PathBuf>,
    settings: Arc<dyn SettingsStore>,
    loader: Arc<dyn ModuleLoader>,
    modules: Arc<ModuleSet>,
    catalog: Arc<PluginCatalog>,
    store: Arc<ExtensionStore>,
    events: Arc<EventBus>,
    guard: Mutex<()>,
}

impl PluginInstaller {
    /// 설치기 생성 (installed.json 로드)
    pub async fn open(options: InstallerOptions, loader: Arc<dyn ModuleLoader>) -> Result<Self> {
        fs::create_dir_all(&options.extension_dir).await?;

        let store = Arc::new(ExtensionStore::new(&options.extension_dir));
        store.load().await?;

        info!(
            "Extension host ready at {} ({:?} validation)",
            options.extension_dir.display(),
            options.isolation
        );

        Ok(Self {
            extension_dir: options.extension_dir,
            staging_dir: options.staging_dir,
            isolation: options.isolation,
            search_dirs: options.search_dirs,
            settings: options.settings,
            loader,
            modules: Arc::new(ModuleSet::new()),
            catalog: Arc::new(PluginCatalog::with_file_ops(options.file_ops)),
            store,
            events: Arc::new(EventBus::new()),
            guard: Mutex::new(()),
        })
    }

    pub fn catalog(&self) -> &Arc<PluginCatalog> {
        &self.catalog
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn store(&self) -> &Arc<ExtensionStore> {
        &self.store
    }

    pub fn modules(&self) -> &Arc<ModuleSet> {
        &self.modules
    }

    pub fn extension_dir(&self) -> &Path {
        &self.extension_dir
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// 확장 디렉토리 스캔
    pub async fn discover(&self) -> Result<DiscoveryReport> {
        let _guard = self.guard.lock().await;

        let report = PluginDiscovery::new(
            &self.extension_dir,
            Arc::clone(&self.loader),
            Arc::clone(&self.modules),
            Arc::clone(&self.catalog),
            Arc::clone(&self.store),
            Arc::clone(&self.settings),
        )
        .with_search_dirs(self.search_dirs.iter().cloned())
        .scan()
        .await?;

        for descriptor in &report.registered {
            self.events
                .publish(ExtensionEvent::simple(EventType::Discovered, &descriptor.name))
                .await;
        }

        Ok(report)
    }

    // ========================================================================
    // Install
    // ========================================================================

    /// 아카이브 설치
    pub async fn install(&self, archive: &Path) -> std::result::Result<InstallReport, InstallError> {
        let _guard = self.guard.lock().await;
        info!("Installing {}", archive.display());

        match self.install_locked(archive).await {
            Ok(report) => {
                self.phase(archive, InstallPhase::Installed).await;
                for descriptor in &report.descriptors {
                    self.events
                        .publish(ExtensionEvent::new(
                            EventType::Installed,
                            &descriptor.name,
                            serde_json::json!({
                                "version": descriptor.version,
                                "archive": archive.display().to_string(),
                            }),
                        ))
                        .await;
                }
                Ok(report)
            }
            Err(e) => {
                warn!("Install of {} failed: {}", archive.display(), e);
                self.events
                    .publish(ExtensionEvent::new(
                        EventType::InstallFailed,
                        archive.display().to_string(),
                        serde_json::json!({ "reason": e.to_string() }),
                    ))
                    .await;
                Err(e)
            }
        }
    }

    async fn install_locked(
        &self,
        archive: &Path,
    ) -> std::result::Result<InstallReport, InstallError> {
        // Extracting
        self.phase(archive, InstallPhase::Extracting).await;
        let staging = self.staging_dir.join(Uuid::new_v4().to_string());

        let staged = match archive::extract(archive, &staging).await {
            Ok(staged) => staged,
            Err(e) => {
                self.roll_back(archive, &staging).await;
                return Err(InstallError::ExtractionFailed {
                    archive: archive.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };
        debug!(
            "Staged {} of {} entries into {}",
            staged.files.len(),
            staged.entries.len(),
            staging.display()
        );

        // Validating
        self.phase(archive, InstallPhase::Validating).await;
        let module_files: Vec<PathBuf> = staged
            .files
            .iter()
            .filter(|f| self.loader.accepts(f))
            .cloned()
            .collect();

        let mut search_dirs = vec![staging.clone(), self.extension_dir.clone()];
        search_dirs.extend(self.search_dirs.iter().cloned());

        let report = match sandbox::validate(
            module_files,
            search_dirs,
            &self.isolation,
            Arc::clone(&self.loader),
        )
        .await
        {
            Ok(report) => report,
            Err(e) => {
                self.roll_back(archive, &staging).await;
                return Err(e.into());
            }
        };

        if !report.has_candidates() {
            self.roll_back(archive, &staging).await;
            return Err(InstallError::NoCapabilityFound {
                archive: archive.to_path_buf(),
                diagnostics: report.errors,
            });
        }

        if let Err(e) = self.check_duplicates(&report.modules).await {
            self.roll_back(archive, &staging).await;
            return Err(e);
        }

        // Committing
        self.phase(archive, InstallPhase::Committing).await;
        self.remove_staging(&staging).await;

        let committed = self.commit(archive).await?;

        let mut search_dirs = vec![self.extension_dir.clone()];
        search_dirs.extend(self.search_dirs.iter().cloned());
        let host = match load_into_host(
            committed.ready.clone(),
            search_dirs,
            Arc::clone(&self.loader),
            Arc::clone(&self.modules),
        )
        .await
        {
            Ok(host) => host,
            Err(e) => {
                self.undo_commit(committed).await;
                release_unused_modules(&self.catalog, &self.modules).await;
                self.phase(archive, InstallPhase::RolledBack).await;
                return Err(e.into());
            }
        };

        let live: Vec<_> = host.loaded.into_iter().flat_map(group_capabilities).collect();
        let deferred: Vec<PluginDescriptor> = committed
            .deferred
            .iter()
            .flat_map(|target| deferred_descriptors(&report.candidates, target))
            .collect();

        if live.is_empty() && deferred.is_empty() {
            warn!(
                "{} passed validation but registered nothing in the host, rolling back",
                archive.display()
            );
            self.undo_commit(committed).await;
            release_unused_modules(&self.catalog, &self.modules).await;
            self.phase(archive, InstallPhase::RolledBack).await;
            return Err(InstallError::NoCapabilityFound {
                archive: archive.to_path_buf(),
                diagnostics: host.failures,
            });
        }

        let mut skipped_entries = staged.skipped;
        skipped_entries.extend(committed.skipped.iter().cloned());
        let mut result = InstallReport {
            diagnostics: host.failures,
            skipped_entries,
            ..Default::default()
        };
        self.finish_commit(committed).await;

        for (descriptor, handle) in live {
            let descriptor = descriptor.with_enabled(true);
            let outcome = self.catalog.register(descriptor.clone(), handle).await;
            self.record(archive, &descriptor, outcome, &mut result).await?;
            result.descriptors.push(descriptor);
        }

        for descriptor in deferred {
            self.catalog.defer(descriptor.clone()).await;
            self.record(archive, &descriptor, RegisterOutcome::PendingRestart, &mut result)
                .await?;
            result.descriptors.push(descriptor);
        }

        // 교체된 이전 버전 모듈
        release_unused_modules(&self.catalog, &self.modules).await;

        Ok(result)
    }

    /// 설정/설치 기록 저장
    async fn record(
        &self,
        archive: &Path,
        descriptor: &PluginDescriptor,
        outcome: RegisterOutcome,
        result: &mut InstallReport,
    ) -> Result<()> {
        self.settings.set_enabled(&descriptor.name, true)?;

        if let (Some(module), Some(file)) = (&descriptor.module, &descriptor.file) {
            self.store
                .record_install(InstalledExtension::new(
                    &descriptor.name,
                    &descriptor.version,
                    module.clone(),
                    file,
                    archive.display().to_string(),
                ))
                .await?;
        }

        info!("Installed {} {} ({:?})", descriptor.name, descriptor.version, outcome);
        result.outcomes.push((descriptor.name.clone(), outcome));
        Ok(())
    }

    /// 같은 모듈 식별자가 배치 안에서, 또는 다른 파일 이름으로 이미 설치되어 있는지
    async fn check_duplicates(
        &self,
        modules: &[ModuleRecord],
    ) -> std::result::Result<(), InstallError> {
        let records: Vec<(PathBuf, ModuleIdentity)> = modules
            .iter()
            .map(|m| (m.file.clone(), m.identity.clone()))
            .collect();

        if let Some((identity, files)) = find_duplicate_identities(&records).into_iter().next() {
            return Err(InstallError::DuplicateIdentity { identity, files });
        }

        for record in modules {
            for owner in self.store.owners_of(&record.identity).await {
                if owner.file.file_name() != record.file.file_name() {
                    return Err(InstallError::DuplicateIdentity {
                        identity: record.identity.clone(),
                        files: vec![owner.file, record.file.clone()],
                    });
                }
            }
        }

        Ok(())
    }

    /// 아카이브를 확장 디렉토리로 재추출 후 모듈 파일 이동
    ///
    /// 대상 파일이 잠겨있으면 새 파일을 `.pending/`에 두고 재시작 시 교체합니다.
    /// 덮어쓴 파일은 설치가 끝날 때까지 백업해 두고, 실패하면 되돌립니다.
    /// 모듈이 아닌 엔트리는 확장 디렉토리에 두지 않습니다.
    async fn commit(&self, archive: &Path) -> std::result::Result<Committed, InstallError> {
        let commit_dir = self
            .extension_dir
            .join(format!(".commit-{}", Uuid::new_v4()));

        let package = match archive::extract(archive, &commit_dir.join("files")).await {
            Ok(package) => package,
            Err(e) => {
                let _ = fs::remove_dir_all(&commit_dir).await;
                return Err(InstallError::ExtractionFailed {
                    archive: archive.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };

        let mut committed = Committed {
            dir: commit_dir,
            ..Default::default()
        };

        for file in package.files {
            if let Err(e) = self.commit_file(&file, &mut committed).await {
                self.undo_commit(committed).await;
                return Err(e);
            }
        }

        Ok(committed)
    }

    async fn commit_file(
        &self,
        file: &Path,
        committed: &mut Committed,
    ) -> std::result::Result<(), InstallError> {
        let Some(name) = file.file_name() else {
            return Ok(());
        };

        if !self.loader.accepts(file) {
            debug!("Not committing {}: not a module file", file.display());
            committed.skipped.push(SkippedEntry {
                entry: name.to_string_lossy().to_string(),
                reason: "not a module file".to_string(),
            });
            return Ok(());
        }

        let file_ops = self.catalog.file_ops();
        let target = self.extension_dir.join(name);
        let locked = file_ops.is_locked(&target);

        let backup = if !locked && target.exists() {
            let backup_dir = committed.dir.join("backup");
            fs::create_dir_all(&backup_dir).await?;
            let backup = backup_dir.join(name);
            fs::copy(&target, &backup).await?;
            Some(backup)
        } else {
            None
        };

        let moved = if locked {
            Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied))
        } else {
            file_ops.replace(file, &target)
        };

        match moved {
            Ok(()) => {
                debug!("Committed {}", target.display());
                committed.touched.push((target.clone(), backup));
                committed.ready.push(target.clone());
            }
            Err(e) if is_lock_error(&e) => {
                if let Some(backup) = backup {
                    let _ = fs::remove_file(backup).await;
                }
                let parked = self.extension_dir.join(PENDING_DIR).join(name);
                fs::create_dir_all(self.extension_dir.join(PENDING_DIR)).await?;
                fs::rename(file, &parked).await?;
                self.store
                    .add_pending_replacement(PendingReplacement {
                        staged: parked,
                        target: target.clone(),
                    })
                    .await?;
                warn!("{} is in use, replacement deferred to restart", target.display());
                committed.deferred.push(target.clone());
            }
            Err(e) => return Err(e.into()),
        }

        // 새로 설치한 파일이 이전 제거 요청으로 지워지지 않도록
        if self.store.is_pending_removal(&target).await {
            self.store.clear_pending_removal(&target).await?;
            committed.revived.push(target);
        }

        Ok(())
    }

    /// 커밋 확정 - 백업 삭제
    async fn finish_commit(&self, committed: Committed) {
        if let Err(e) = fs::remove_dir_all(&committed.dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to clean {}: {}", committed.dir.display(), e);
            }
        }
    }

    /// 커밋 되돌리기 - 백업 복원, 새 파일과 교체 대기 삭제
    async fn undo_commit(&self, committed: Committed) {
        let file_ops = self.catalog.file_ops();

        for (target, backup) in committed.touched.iter().rev() {
            let restored = match backup {
                Some(backup) => file_ops.replace(backup, target),
                None => file_ops.remove(target),
            };
            if let Err(e) = restored {
                warn!("Failed to restore {}: {}", target.display(), e);
            }
        }

        for target in &committed.deferred {
            let parked = self
                .extension_dir
                .join(PENDING_DIR)
                .join(target.file_name().unwrap_or_default());
            let _ = file_ops.remove(&parked);
            if let Err(e) = self.store.clear_pending_replacement(target).await {
                warn!("Failed to drop pending replacement of {}: {}", target.display(), e);
            }
        }

        for target in &committed.revived {
            if let Err(e) = self.store.mark_pending_removal(target).await {
                warn!("Failed to restore pending removal of {}: {}", target.display(), e);
            }
        }

        self.finish_commit(committed).await;
    }

    async fn roll_back(&self, archive: &Path, staging: &Path) {
        self.remove_staging(staging).await;
        self.phase(archive, InstallPhase::RolledBack).await;
    }

    /// 스테이징 디렉토리 삭제 (비어있으면 부모도)
    async fn remove_staging(&self, staging: &Path) {
        if let Err(e) = fs::remove_dir_all(staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to clean staging {}: {}", staging.display(), e);
            }
        }
        // 비어있을 때만 삭제됨
        let _ = fs::remove_dir(&self.staging_dir).await;
    }

    async fn phase(&self, archive: &Path, phase: InstallPhase) {
        debug!("{}: {}", archive.display(), phase);
        self.events
            .publish(ExtensionEvent::new(
                EventType::PhaseChanged,
                archive.display().to_string(),
                serde_json::json!({ "phase": phase }),
            ))
            .await;
    }

    // ========================================================================
    // Remove / Enable
    // ========================================================================

    /// 항목 제거 - 같은 모듈 파일을 쓰는 항목도 함께 제거
    pub async fn remove(&self, name: &str) -> Result<RemovalReport> {
        let _guard = self.guard.lock().await;

        let descriptor = self
            .catalog
            .get(name)
            .await
            .ok_or_else(|| Error::NotFound(format!("extension '{}'", name)))?;

        let mut removed = Vec::new();
        if let Some(file) = &descriptor.file {
            for sibling in self.catalog.list().await {
                if sibling.name != name && sibling.file.as_ref() == Some(file) {
                    self.catalog.remove(&sibling.name).await?;
                    self.forget_record(&sibling.name).await?;
                    removed.push(sibling.name);
                }
            }
        }

        let outcome = self.catalog.remove(name).await?;
        removed.push(name.to_string());

        match outcome {
            RemovalOutcome::Removed => {
                self.forget_record(name).await?;
                self.events
                    .publish(ExtensionEvent::simple(EventType::Removed, name))
                    .await;
            }
            RemovalOutcome::PendingRestart => {
                if let Some(file) = &descriptor.file {
                    self.store.mark_pending_removal(file).await?;
                }
                self.events
                    .publish(ExtensionEvent::simple(EventType::RemovalPending, name))
                    .await;
            }
        }

        let released = release_unused_modules(&self.catalog, &self.modules).await;
        debug!("Released {} module(s) after removing '{}'", released, name);

        Ok(RemovalReport { outcome, removed })
    }

    async fn forget_record(&self, name: &str) -> Result<()> {
        self.store.record_uninstall(name).await?;
        self.settings.forget(name)
    }

    /// 활성화 상태 변경 후 설정 저장소에 기록
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<PluginDescriptor> {
        let _guard = self.guard.lock().await;

        let descriptor = self.catalog.set_enabled(name, enabled).await?;
        self.settings.set_enabled(name, enabled)?;

        let event_type = if enabled {
            EventType::Enabled
        } else {
            EventType::Disabled
        };
        self.events
            .publish(ExtensionEvent::simple(event_type, name))
            .await;

        Ok(descriptor)
    }
}

/// 확장 디렉토리로 옮긴 파일
#[derive(Debug, Default)]
struct Committed {
    /// 재추출 디렉토리 (백업 포함)
    dir: PathBuf,

    /// 바로 로드 가능
    ready: Vec<PathBuf>,

    /// 대상이 잠겨있어 `.pending/`에 보관됨
    deferred: Vec<PathBuf>,

    /// 옮긴 대상과 덮어쓰기 전 백업
    touched: Vec<(PathBuf, Option<PathBuf>)>,

    /// 삭제 대기를 취소한 대상
    revived: Vec<PathBuf>,

    /// 모듈이 아니라서 옮기지 않은 엔트리
    skipped: Vec<SkippedEntry>,
}

/// 검증 후보에서 재시작 대기 디스크립터 생성 (이름별, 처음 나온 순서)
fn deferred_descriptors(candidates: &[CandidateDescriptor], target: &Path) -> Vec<PluginDescriptor> {
    let mut descriptors: Vec<PluginDescriptor> = Vec::new();

    for candidate in candidates
        .iter()
        .filter(|c| c.file.file_name() == target.file_name())
    {
        let index = match descriptors.iter().position(|d| d.name == candidate.name) {
            Some(index) => index,
            None => {
                descriptors.push(
                    PluginDescriptor::new(&candidate.name, &candidate.version)
                        .with_module(candidate.module.clone(), target),
                );
                descriptors.len() - 1
            }
        };

        let descriptor = &mut descriptors[index];
        descriptor
            .supported_extensions
            .extend(candidate.supported_extensions.iter().cloned());
        if !descriptor.kinds.contains(&candidate.kind) {
            descriptor.kinds.push(candidate.kind);
        }
    }

    descriptors
}
