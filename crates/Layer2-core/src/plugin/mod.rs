//! # Plugin System
//!
//! 확장 모듈 로드, 격리 검증, 카탈로그, 설치
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     PluginInstaller                         │
//! │   Extracting → Validating → Committing → Installed          │
//! │        │             │             │                        │
//! │   ┌────┴────┐  ┌─────┴──────┐  ┌───┴──────────────────────┐ │
//! │   │ archive │  │  Sandbox   │  │      PluginCatalog       │ │
//! │   │  (zip)  │  │ (worker /  │  │  descriptor + handle     │ │
//! │   └─────────┘  │ in-process)│  │  lookup(ContractKind)    │ │
//! │                └─────┬──────┘  └───┬──────────────────────┘ │
//! │                      │             │                        │
//! │   ┌──────────────────┴─────────────┴──────────────────────┐ │
//! │   │  ModuleResolver → ModuleLoader → inspect(contracts)   │ │
//! │   └───────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 계약
//!
//! 1. **AnalysisProvider**: 언어별 분석기
//! 2. **MenuCommandProvider**: 메뉴 명령
//! 3. **IssueTracker**: 이슈 트래커 연동
//! 4. **SourceControlProvider**: 소스 관리 연동
//!
//! ## 예시
//!
//! ```ignore
//! // 네이티브 모듈 (cdylib)
//! fn register(registrar: &mut CapabilityRegistrar) {
//!     registrar.analysis("CxxAnalyzer", || Ok(CxxAnalyzer::new()));
//! }
//! sqext_core::declare_module!("cxx", "1.0.0", register);
//!
//! // 호스트
//! let installer = PluginInstaller::open(options, Arc::new(NativeModuleLoader::new())).await?;
//! installer.discover().await?;
//! installer.install(Path::new("cxx.zip")).await?;
//! let analyzers = installer.catalog().analysis_providers().await;
//! ```

mod archive;
mod catalog;
mod contracts;
mod discovery;
mod error;
mod events;
mod installer;
mod loader;
mod module;
mod resolver;
mod sandbox;
mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use archive::{SkippedEntry, StagedPackage};
pub use catalog::{
    is_lock_error, load_error_status, FileOps, ModuleHandle, OsFileOps, PluginCatalog,
    PluginDescriptor, RegisterOutcome, RemovalOutcome, STATUS_ACTIVE, STATUS_DISABLED,
    STATUS_PENDING_REMOVAL, STATUS_PENDING_RESTART,
};
pub use contracts::{
    inspect, AnalysisProvider, BlameLine, Capability, CapabilityRegistrar, Classification,
    Classified, ContractKind, Defect, Extension, ExtensionInfo, Inspection, Issue, IssueTracker,
    LocalAnalysisExtension, MenuCommandProvider, SourceControlProvider,
};
pub use discovery::{DiscoveryReport, PluginDiscovery};
pub use error::{InstallError, LoadFailure, LoadFailureKind};
pub use events::{EventBus, EventType, ExtensionEvent};
pub use installer::{
    InstallPhase, InstallReport, InstallerOptions, PluginInstaller, RemovalReport, PENDING_DIR,
};
pub use loader::NativeModuleLoader;
pub use module::{
    LoadedModule, ModuleDeclaration, ModuleIdentity, ModuleLoader, ModuleManifest, CORE_VERSION,
    DECLARATION_SYMBOL, MODULE_ABI_VERSION,
};
pub use resolver::{
    candidate_files, find_duplicate_identities, ModuleResolver, ModuleSet, Resolution,
};
pub use sandbox::{
    run_worker, validate, CandidateDescriptor, Isolation, ModuleRecord, Sandbox, SandboxReport,
    SandboxState, WORKER_COMMAND,
};
pub use store::{
    ExtensionStore, InstalledExtension, InstalledFile, PendingReplacement, INSTALLED_FILE,
};
