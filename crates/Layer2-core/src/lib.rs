//! sqext-core: Extension host runtime for SQExt
//!
//! Layer2 - 확장 모듈 로드/검증/설치 레이어
//!
//! # 주요 모듈
//!
//! - `plugin`: 계약 레지스트리, 모듈 해석기, 격리 검증(Sandbox), 카탈로그, 설치기
//!
//! # 사용 예시
//!
//! ```ignore
//! use sqext_core::{InstallerOptions, NativeModuleLoader, PluginInstaller};
//!
//! let options = InstallerOptions::from_config(&config, settings)?;
//! let installer = PluginInstaller::open(options, Arc::new(NativeModuleLoader::new())).await?;
//!
//! // 시작 시 확장 디렉토리 스캔
//! installer.discover().await?;
//!
//! // 아카이브 설치
//! let report = installer.install(Path::new("cxx-analyzer.zip")).await?;
//!
//! // 계약별 조회
//! let trackers = installer.catalog().issue_trackers().await;
//! ```

pub mod plugin;

// Re-exports: Plugin
pub use plugin::{
    AnalysisProvider, Capability, CapabilityRegistrar, ContractKind, DiscoveryReport,
    ExtensionInfo, InstallError, InstallReport, InstallerOptions, Isolation, IssueTracker,
    LoadFailure, LoadFailureKind, MenuCommandProvider, ModuleIdentity, ModuleLoader,
    NativeModuleLoader, PluginCatalog, PluginDescriptor, PluginInstaller, RemovalReport,
    SandboxReport, SourceControlProvider,
};

// Re-exports: Layer1
pub use sqext_foundation::{Error, ExtensionConfig, Result, SettingsStore};
