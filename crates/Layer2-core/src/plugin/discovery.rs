//! Plugin Discovery - 시작 시 확장 디렉토리 스캔
//!
//! 확장 디렉토리의 파일은 설치 시 이미 검증되었으므로 샌드박스를 거치지 않고
//! 호스트 로드 컨텍스트에 바로 로드됩니다.
//!
//! 스캔 순서:
//! 1. 교체 대기 파일 적용
//! 2. 삭제 대기 파일 삭제 (성공하면 마커 제거)
//! 3. 아직 삭제 대기인 파일은 건너뛰고 나머지를 로드해서 카탈로그에 등록

use super::catalog::{is_lock_error, ModuleHandle, PluginCatalog, PluginDescriptor};
use super::contracts::{inspect, Capability};
use super::error::{LoadFailure, LoadFailureKind};
use super::module::{LoadedModule, ModuleLoader};
use super::resolver::{candidate_files, ModuleResolver, ModuleSet};
use super::store::ExtensionStore;
use sqext_foundation::{Error, Result, SettingsStore};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// Host load - 호스트 로드 컨텍스트에 파일 로드
// ============================================================================

/// 호스트에 로드된 파일 하나
pub(crate) struct LoadedFile {
    pub file: PathBuf,
    pub module: Arc<LoadedModule>,
    pub capabilities: Vec<Capability>,
}

#[derive(Default)]
pub(crate) struct HostLoad {
    pub loaded: Vec<LoadedFile>,
    pub failures: Vec<LoadFailure>,
}

/// 파일들을 호스트 모듈 집합에 로드하고 인스턴스 생성 (blocking)
fn load_into_host_blocking(
    files: Vec<PathBuf>,
    search_dirs: Vec<PathBuf>,
    loader: Arc<dyn ModuleLoader>,
    modules: Arc<ModuleSet>,
) -> HostLoad {
    let resolver = ModuleResolver::new(loader, modules, search_dirs);
    let mut result = HostLoad::default();

    for file in files {
        let module = match resolver.load_file(&file) {
            Ok(module) => module,
            Err(failure) => {
                warn!("{}", failure);
                result.failures.push(failure);
                continue;
            }
        };

        if module.path() != file.as_path() {
            debug!(
                "{} already loaded from {}, skipping {}",
                module.identity(),
                module.path().display(),
                file.display()
            );
            continue;
        }

        match inspect(&module) {
            Ok(inspection) => {
                result.failures.extend(inspection.failures(&file));
                result.loaded.push(LoadedFile {
                    capabilities: inspection
                        .into_capabilities()
                        .into_iter()
                        .map(|(_, capability)| capability)
                        .collect(),
                    file,
                    module,
                });
            }
            Err(failure) => {
                warn!("{}", failure);
                result.failures.push(failure);
            }
        }
    }

    result
}

pub(crate) async fn load_into_host(
    files: Vec<PathBuf>,
    search_dirs: Vec<PathBuf>,
    loader: Arc<dyn ModuleLoader>,
    modules: Arc<ModuleSet>,
) -> Result<HostLoad> {
    tokio::task::spawn_blocking(move || {
        load_into_host_blocking(files, search_dirs, loader, modules)
    })
    .await
    .map_err(|e| Error::Internal(format!("module load task failed: {}", e)))
}

/// 어떤 카탈로그 핸들도 (직접 또는 참조로) 쓰지 않는 모듈을 로드 컨텍스트에서 제거
pub(crate) async fn release_unused_modules(catalog: &PluginCatalog, modules: &ModuleSet) -> usize {
    let roots = catalog.loaded_modules().await;
    let evicted = modules.retain_reachable(&roots);
    for module in &evicted {
        debug!(
            "Released {} loaded from {}",
            module.identity(),
            module.path().display()
        );
    }
    evicted.len()
}

/// 인스턴스를 디스크립터 이름별로 묶어 카탈로그 항목 생성
pub(crate) fn group_capabilities(loaded: LoadedFile) -> Vec<(PluginDescriptor, ModuleHandle)> {
    let LoadedFile {
        file,
        module,
        capabilities,
    } = loaded;

    let mut groups: BTreeMap<String, (PluginDescriptor, Vec<Capability>)> = BTreeMap::new();
    let mut order = Vec::new();

    for capability in capabilities {
        let info = capability.info();
        let (descriptor, caps) = groups.entry(info.name.clone()).or_insert_with(|| {
            order.push(info.name.clone());
            (
                PluginDescriptor::new(&info.name, &info.version)
                    .with_module(module.identity().clone(), &file),
                Vec::new(),
            )
        });
        descriptor
            .supported_extensions
            .extend(info.supported_extensions);
        caps.push(capability);
    }

    order
        .into_iter()
        .filter_map(|name| groups.remove(&name))
        .map(|(mut descriptor, caps)| {
            let handle = ModuleHandle::new(Arc::clone(&module), caps);
            descriptor.kinds = handle.kinds();
            (descriptor, handle)
        })
        .collect()
}

// ============================================================================
// PluginDiscovery
// ============================================================================

/// 스캔 결과
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// 등록된 항목
    pub registered: Vec<PluginDescriptor>,

    /// 로드 실패
    pub failures: Vec<LoadFailure>,

    /// 이번 스캔에서 삭제된 대기 파일
    pub removed: Vec<PathBuf>,

    /// 여전히 삭제 대기 중인 파일
    pub still_pending: Vec<PathBuf>,

    /// 적용된 교체
    pub replaced: Vec<PathBuf>,
}

/// 시작 시 스캔
pub struct PluginDiscovery {
    extension_dir: PathBuf,
    search_dirs: Vec<PathBuf>,
    loader: Arc<dyn ModuleLoader>,
    modules: Arc<ModuleSet>,
    catalog: Arc<PluginCatalog>,
    store: Arc<ExtensionStore>,
    settings: Arc<dyn SettingsStore>,
}

impl PluginDiscovery {
    pub fn new(
        extension_dir: impl Into<PathBuf>,
        loader: Arc<dyn ModuleLoader>,
        modules: Arc<ModuleSet>,
        catalog: Arc<PluginCatalog>,
        store: Arc<ExtensionStore>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            extension_dir: extension_dir.into(),
            search_dirs: Vec::new(),
            loader,
            modules,
            catalog,
            store,
            settings,
        }
    }

    /// 추가 의존성 검색 경로
    pub fn with_search_dirs(mut self, dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.search_dirs.extend(dirs);
        self
    }

    pub fn extension_dir(&self) -> &Path {
        &self.extension_dir
    }

    /// 확장 디렉토리 스캔 후 카탈로그 등록
    pub async fn scan(&self) -> Result<DiscoveryReport> {
        let mut report = DiscoveryReport::default();

        self.apply_pending_replacements(&mut report).await?;
        self.apply_pending_removals(&mut report).await?;
        if !report.removed.is_empty() {
            release_unused_modules(&self.catalog, &self.modules).await;
        }

        let files: Vec<PathBuf> = candidate_files(&self.extension_dir, self.loader.as_ref())
            .into_iter()
            .filter(|f| !report.still_pending.contains(f))
            .collect();

        debug!(
            "Discovery found {} module file(s) in {}",
            files.len(),
            self.extension_dir.display()
        );

        let mut search_dirs = vec![self.extension_dir.clone()];
        search_dirs.extend(self.search_dirs.iter().cloned());

        let host = load_into_host(
            files,
            search_dirs,
            Arc::clone(&self.loader),
            Arc::clone(&self.modules),
        )
        .await?;

        for loaded in host.loaded {
            for (descriptor, handle) in group_capabilities(loaded) {
                let enabled = self.settings.is_enabled(&descriptor.name).unwrap_or(true);
                let descriptor = descriptor.with_enabled(enabled);
                self.catalog.register(descriptor.clone(), handle).await;
                report.registered.push(descriptor);
            }
        }

        for failure in &host.failures {
            if failure.kind == LoadFailureKind::ConstructionFailed {
                continue;
            }
            let name = failure
                .file
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| failure.file.display().to_string());
            self.catalog
                .record_failure(name, &failure.file, &failure.message)
                .await;
        }
        report.failures = host.failures;

        info!(
            "Discovery registered {} extension(s), {} failure(s), {} pending removal(s)",
            report.registered.len(),
            report.failures.len(),
            report.still_pending.len()
        );

        Ok(report)
    }

    async fn apply_pending_replacements(&self, report: &mut DiscoveryReport) -> Result<()> {
        let file_ops = self.catalog.file_ops();

        for replacement in self.store.pending_replacements().await {
            if !replacement.staged.exists() {
                warn!(
                    "Pending replacement {} is gone, dropping marker",
                    replacement.staged.display()
                );
                self.store
                    .clear_pending_replacement(&replacement.target)
                    .await?;
                continue;
            }

            // 교체 후에 삭제가 요청된 파일
            if self.store.is_pending_removal(&replacement.target).await {
                info!(
                    "{} is pending removal, discarding staged replacement",
                    replacement.target.display()
                );
                file_ops.remove(&replacement.staged)?;
                self.store
                    .clear_pending_replacement(&replacement.target)
                    .await?;
                continue;
            }

            match file_ops.replace(&replacement.staged, &replacement.target) {
                Ok(()) => {
                    info!("Applied pending replacement of {}", replacement.target.display());
                    self.store
                        .clear_pending_replacement(&replacement.target)
                        .await?;
                    report.replaced.push(replacement.target);
                }
                Err(e) if is_lock_error(&e) => {
                    debug!("{} still locked", replacement.target.display());
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    async fn apply_pending_removals(&self, report: &mut DiscoveryReport) -> Result<()> {
        let file_ops = self.catalog.file_ops();

        for file in self.store.pending_removals().await {
            match file_ops.remove(&file) {
                Ok(()) => {
                    info!("Deleted pending removal {}", file.display());
                    self.store.clear_pending_removal(&file).await?;
                    for record in self.store.list().await {
                        if record.file == file {
                            self.store.record_uninstall(&record.name).await?;
                            self.settings.forget(&record.name)?;
                        }
                    }
                    for descriptor in self.catalog.list().await {
                        if descriptor.file.as_deref() == Some(file.as_path()) {
                            self.catalog.forget(&descriptor.name).await;
                        }
                    }
                    report.removed.push(file);
                }
                Err(e) if is_lock_error(&e) => {
                    warn!("{} is still locked, removal stays pending", file.display());
                    report.still_pending.push(file);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::contracts::ContractKind;
    use crate::plugin::store::{InstalledExtension, PendingReplacement};
    use crate::plugin::testing::{write_module, Export, LockingFileOps, ScriptedLoader, TestModule};
    use sqext_foundation::MemorySettingsStore;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        catalog: Arc<PluginCatalog>,
        store: Arc<ExtensionStore>,
        settings: Arc<MemorySettingsStore>,
        ops: Arc<LockingFileOps>,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let ops = Arc::new(LockingFileOps::new());
            Self {
                catalog: Arc::new(PluginCatalog::with_file_ops(ops.clone())),
                store: Arc::new(ExtensionStore::new(temp.path())),
                settings: Arc::new(MemorySettingsStore::new()),
                ops,
                temp,
            }
        }

        fn dir(&self) -> &Path {
            self.temp.path()
        }

        fn discovery(&self) -> PluginDiscovery {
            PluginDiscovery::new(
                self.dir(),
                Arc::new(ScriptedLoader::new()),
                Arc::new(ModuleSet::new()),
                self.catalog.clone(),
                self.store.clone(),
                self.settings.clone(),
            )
        }
    }

    #[tokio::test]
    async fn test_scan_registers_modules() {
        let fx = Fixture::new();
        write_module(
            fx.dir(),
            "cxx.sqm",
            &TestModule::new("cxx", "2.0")
                .export(Export::analysis("CxxAnalyzer", "cxx", &["cpp"]))
                .export(Export::menu("CxxMenu", "cxx-menu")),
        );
        fx.settings.set_enabled("cxx-menu", false).unwrap();

        let report = fx.discovery().scan().await.unwrap();

        assert_eq!(report.registered.len(), 2);
        assert_eq!(fx.catalog.lookup(ContractKind::AnalysisProvider).await.len(), 1);
        // 비활성화 설정은 유지
        assert!(fx.catalog.lookup(ContractKind::MenuCommand).await.is_empty());
        assert!(!fx.catalog.get("cxx-menu").await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_scan_resolves_dependency_in_extension_dir() {
        let fx = Fixture::new();
        write_module(fx.dir(), "a-common.sqm", &TestModule::new("common", "1.0"));
        write_module(
            fx.dir(),
            "b-plugin.sqm",
            &TestModule::new("plugin", "1.0")
                .reference("common", "1.0")
                .export(Export::issue_tracker("Jira", "jira")),
        );

        let report = fx.discovery().scan().await.unwrap();
        assert!(report.failures.is_empty());
        assert_eq!(fx.catalog.issue_trackers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_records_failures() {
        let fx = Fixture::new();
        std::fs::write(fx.dir().join("broken.sqm"), b"garbage").unwrap();
        write_module(
            fx.dir(),
            "orphan.sqm",
            &TestModule::new("orphan", "1.0")
                .reference("absent", "1.0")
                .export(Export::menu("Menu", "orphan")),
        );

        let report = fx.discovery().scan().await.unwrap();

        assert_eq!(report.failures.len(), 2);
        assert!(fx.catalog.get("broken").await.unwrap().is_load_error());
        assert!(fx.catalog.get("orphan").await.unwrap().is_load_error());
        assert!(fx.catalog.lookup(ContractKind::MenuCommand).await.is_empty());
    }

    #[tokio::test]
    async fn test_pending_removal_is_deleted_on_restart() {
        let fx = Fixture::new();
        let file = write_module(
            fx.dir(),
            "cxx.sqm",
            &TestModule::new("cxx", "1.0").export(Export::analysis("A", "cxx", &["cpp"])),
        );
        fx.store
            .record_install(InstalledExtension::new(
                "cxx",
                "1.0",
                crate::plugin::module::ModuleIdentity::new("cxx", "1.0"),
                &file,
                "cxx.zip",
            ))
            .await
            .unwrap();
        fx.store.mark_pending_removal(&file).await.unwrap();

        let report = fx.discovery().scan().await.unwrap();

        assert_eq!(report.removed, vec![file.clone()]);
        assert!(!file.exists());
        assert!(!fx.catalog.contains("cxx").await);
        assert!(fx.store.pending_removals().await.is_empty());
        assert!(fx.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_still_locked_removal_is_skipped() {
        let fx = Fixture::new();
        let file = write_module(
            fx.dir(),
            "cxx.sqm",
            &TestModule::new("cxx", "1.0").export(Export::analysis("A", "cxx", &["cpp"])),
        );
        fx.store.mark_pending_removal(&file).await.unwrap();
        fx.ops.lock(&file);

        let report = fx.discovery().scan().await.unwrap();

        assert_eq!(report.still_pending, vec![file.clone()]);
        assert!(file.exists());
        assert!(fx.catalog.is_empty().await);

        fx.ops.unlock(&file);
        let report = fx.discovery().scan().await.unwrap();
        assert_eq!(report.removed, vec![file]);
    }

    #[tokio::test]
    async fn test_pending_replacement_applied() {
        let fx = Fixture::new();
        let target = write_module(
            fx.dir(),
            "git.sqm",
            &TestModule::new("git", "1.0").export(Export::source_control("Git", "git")),
        );
        let staged = write_module(
            &fx.dir().join(".pending"),
            "git.sqm",
            &TestModule::new("git", "2.0").export(Export::source_control("Git", "git")),
        );
        fx.store
            .add_pending_replacement(PendingReplacement {
                staged: staged.clone(),
                target: target.clone(),
            })
            .await
            .unwrap();

        let report = fx.discovery().scan().await.unwrap();

        assert_eq!(report.replaced, vec![target]);
        assert!(!staged.exists());
        assert_eq!(fx.catalog.get("git").await.unwrap().version, "2.0");
    }

    #[tokio::test]
    async fn test_replacement_of_file_pending_removal_is_discarded() {
        let fx = Fixture::new();
        let target = write_module(
            fx.dir(),
            "git.sqm",
            &TestModule::new("git", "1.0").export(Export::source_control("Git", "git")),
        );
        let staged = write_module(
            &fx.dir().join(".pending"),
            "git.sqm",
            &TestModule::new("git", "2.0").export(Export::source_control("Git", "git")),
        );
        fx.store
            .add_pending_replacement(PendingReplacement {
                staged: staged.clone(),
                target: target.clone(),
            })
            .await
            .unwrap();
        fx.store.mark_pending_removal(&target).await.unwrap();

        let report = fx.discovery().scan().await.unwrap();

        assert!(report.replaced.is_empty());
        assert_eq!(report.removed, vec![target.clone()]);
        assert!(!staged.exists());
        assert!(!target.exists());
        assert!(fx.store.pending_replacements().await.is_empty());
        assert!(!fx.catalog.contains("git").await);
    }

    #[tokio::test]
    async fn test_rescan_releases_removed_modules() {
        let fx = Fixture::new();
        let file = write_module(
            fx.dir(),
            "cxx.sqm",
            &TestModule::new("cxx", "1.0").export(Export::analysis("A", "cxx", &["cpp"])),
        );
        let modules = Arc::new(ModuleSet::new());
        let discovery = PluginDiscovery::new(
            fx.dir(),
            Arc::new(ScriptedLoader::new()),
            modules.clone(),
            fx.catalog.clone(),
            fx.store.clone(),
            fx.settings.clone(),
        );
        discovery.scan().await.unwrap();
        assert_eq!(modules.len(), 1);

        fx.ops.lock(&file);
        fx.catalog.remove("cxx").await.unwrap();
        fx.store.mark_pending_removal(&file).await.unwrap();
        fx.ops.unlock(&file);
        let report = discovery.scan().await.unwrap();

        assert_eq!(report.removed, vec![file]);
        assert!(modules.is_empty());
    }
}
