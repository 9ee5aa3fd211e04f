//! 테스트 지원 - 스크립트 모듈 로더와 계약 구현체
//!
//! `.sqm` 파일은 모듈 식별자, 참조, 내보낸 타입을 적은 JSON 문서입니다.
//! 동적 라이브러리를 빌드하지 않고도 로드/검증/설치 흐름 전체를 테스트할 수 있습니다.

use super::catalog::FileOps;
use super::contracts::{
    AnalysisProvider, BlameLine, CapabilityRegistrar, Defect, Extension, ExtensionInfo, Issue,
    IssueTracker, LocalAnalysisExtension, MenuCommandProvider, SourceControlProvider,
};
use super::error::LoadFailure;
use super::module::{LoadedModule, ModuleIdentity, ModuleLoader, ModuleManifest};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqext_foundation::{Error, Result};
use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const SCRIPTED_EXTENSION: &str = "sqm";

// ============================================================================
// Module documents
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Export {
    pub type_name: String,
    #[serde(default)]
    pub contract: Option<String>,
    #[serde(default)]
    pub plugin: String,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub fails: bool,
    #[serde(default)]
    pub panics: bool,
}

impl Export {
    fn new(type_name: &str, contract: Option<&str>, plugin: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            contract: contract.map(str::to_string),
            plugin: plugin.to_string(),
            extensions: Vec::new(),
            fails: false,
            panics: false,
        }
    }

    pub fn analysis(type_name: &str, plugin: &str, extensions: &[&str]) -> Self {
        let mut export = Self::new(type_name, Some("analysis"), plugin);
        export.extensions = extensions.iter().map(|e| e.to_string()).collect();
        export
    }

    pub fn menu(type_name: &str, plugin: &str) -> Self {
        Self::new(type_name, Some("menu"), plugin)
    }

    pub fn issue_tracker(type_name: &str, plugin: &str) -> Self {
        Self::new(type_name, Some("tracker"), plugin)
    }

    pub fn source_control(type_name: &str, plugin: &str) -> Self {
        Self::new(type_name, Some("scm"), plugin)
    }

    pub fn plain(type_name: &str) -> Self {
        Self::new(type_name, None, "")
    }

    pub fn failing(mut self) -> Self {
        self.fails = true;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestModule {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub exports: Vec<Export>,
    #[serde(default)]
    pub panic_on_register: bool,
}

impl TestModule {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            references: Vec::new(),
            exports: Vec::new(),
            panic_on_register: false,
        }
    }

    pub fn reference(mut self, name: &str, version: &str) -> Self {
        self.references.push(format!("{}, {}", name, version));
        self
    }

    pub fn export(mut self, export: Export) -> Self {
        self.exports.push(export);
        self
    }

    pub fn panic_on_register(mut self) -> Self {
        self.panic_on_register = true;
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap()
    }
}

pub fn write_module(dir: &Path, file_name: &str, module: &TestModule) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(file_name);
    std::fs::write(&path, module.to_bytes()).unwrap();
    path
}

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, bytes) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap();
}

/// 모듈 문서들로 아카이브 생성
pub fn write_module_zip(path: &Path, modules: &[(&str, &TestModule)]) {
    let bytes: Vec<(String, Vec<u8>)> = modules
        .iter()
        .map(|(name, module)| (name.to_string(), module.to_bytes()))
        .collect();
    let entries: Vec<(&str, &[u8])> = bytes
        .iter()
        .map(|(name, bytes)| (name.as_str(), bytes.as_slice()))
        .collect();
    write_zip(path, &entries);
}

// ============================================================================
// ScriptedLoader
// ============================================================================

#[derive(Default)]
pub struct ScriptedLoader {
    loads: Mutex<HashMap<PathBuf, usize>>,
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_count(&self, path: &Path) -> usize {
        self.loads.lock().get(path).copied().unwrap_or(0)
    }
}

impl ModuleLoader for ScriptedLoader {
    fn accepts(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some(SCRIPTED_EXTENSION)
    }

    fn load(&self, path: &Path) -> std::result::Result<LoadedModule, LoadFailure> {
        *self.loads.lock().entry(path.to_path_buf()).or_default() += 1;

        let bytes = std::fs::read(path).map_err(|e| LoadFailure::load_failed(path, e.to_string()))?;
        let doc: TestModule = serde_json::from_slice(&bytes)
            .map_err(|e| LoadFailure::load_failed(path, format!("bad module image: {}", e)))?;

        let mut manifest = ModuleManifest::new(ModuleIdentity::new(&doc.name, &doc.version));
        for reference in &doc.references {
            let identity = ModuleIdentity::parse(reference)
                .ok_or_else(|| LoadFailure::load_failed(path, "bad reference"))?;
            manifest.references.push(identity);
        }

        Ok(LoadedModule::new(manifest, path, move |registrar| {
            register_exports(&doc, registrar)
        }))
    }
}

fn register_exports(doc: &TestModule, registrar: &mut CapabilityRegistrar) {
    if doc.panic_on_register {
        panic!("module {} failed during registration", doc.name);
    }

    for export in &doc.exports {
        let mut info = ExtensionInfo::new(&export.plugin, &doc.version);
        for ext in &export.extensions {
            info = info.with_extension(ext.as_str());
        }
        let fails = export.fails;
        let panics = export.panics;
        let build = move || -> Result<ExtensionInfo> {
            if panics {
                panic!("constructor blew up");
            }
            if fails {
                return Err(Error::Module("constructor failed".to_string()));
            }
            Ok(info.clone())
        };

        match export.contract.as_deref() {
            Some("analysis") => {
                registrar.analysis(&export.type_name, move || build().map(TestAnalyzer::from_info));
            }
            Some("menu") => {
                registrar.menu_command(&export.type_name, move || build().map(TestMenu::from_info));
            }
            Some("tracker") => {
                registrar.issue_tracker(&export.type_name, move || {
                    build().map(TestTracker::from_info)
                });
            }
            Some("scm") => {
                registrar.source_control(&export.type_name, move || {
                    build().map(TestScm::from_info)
                });
            }
            _ => {
                registrar.plain(&export.type_name);
            }
        }
    }
}

// ============================================================================
// Contract implementations
// ============================================================================

pub struct TestAnalyzer {
    info: ExtensionInfo,
}

impl TestAnalyzer {
    pub fn new(name: &str, extensions: &[&str]) -> Self {
        let mut info = ExtensionInfo::new(name, "1.0");
        for ext in extensions {
            info = info.with_extension(*ext);
        }
        Self { info }
    }

    fn from_info(info: ExtensionInfo) -> Self {
        Self { info }
    }
}

impl Extension for TestAnalyzer {
    fn info(&self) -> ExtensionInfo {
        self.info.clone()
    }
}

impl AnalysisProvider for TestAnalyzer {
    fn language_key(&self) -> String {
        self.info.name.clone()
    }

    fn resource_key(&self, project_key: &str, file: &Path) -> String {
        format!("{}:{}", project_key, file.display())
    }

    fn local_extension(&self) -> Option<Box<dyn LocalAnalysisExtension>> {
        None
    }
}

pub struct TestMenu {
    info: ExtensionInfo,
    settings: Mutex<BTreeMap<String, String>>,
}

impl TestMenu {
    pub fn new(name: &str) -> Self {
        Self::from_info(ExtensionInfo::new(name, "1.0"))
    }

    fn from_info(info: ExtensionInfo) -> Self {
        Self {
            info,
            settings: Mutex::new(BTreeMap::new()),
        }
    }
}

impl Extension for TestMenu {
    fn info(&self) -> ExtensionInfo {
        self.info.clone()
    }
}

impl MenuCommandProvider for TestMenu {
    fn header(&self) -> String {
        self.info.name.clone()
    }

    fn create_surface(&self) -> Box<dyn Any + Send> {
        Box::new(self.info.name.clone())
    }

    fn update_configuration(&self, settings: &BTreeMap<String, String>) {
        *self.settings.lock() = settings.clone();
    }
}

pub struct TestTracker {
    info: ExtensionInfo,
}

impl TestTracker {
    fn from_info(info: ExtensionInfo) -> Self {
        Self { info }
    }
}

impl Extension for TestTracker {
    fn info(&self) -> ExtensionInfo {
        self.info.clone()
    }
}

#[async_trait]
impl IssueTracker for TestTracker {
    async fn attach_to_defect(&self, _defect_id: &str, _issues: &[Issue], _comment: &str) -> Result<()> {
        Ok(())
    }

    async fn create_defect(&self, issues: &[Issue], _summary: &str) -> Result<String> {
        Ok(format!("DEF-{}", issues.len()))
    }

    async fn defect(&self, id: &str) -> Result<Option<Defect>> {
        Ok(Some(Defect {
            id: id.to_string(),
            summary: String::new(),
            status: "open".to_string(),
        }))
    }

    async fn defect_for_commit(&self, _commit_message: &str) -> Result<Option<Defect>> {
        Ok(None)
    }
}

pub struct TestScm {
    info: ExtensionInfo,
}

impl TestScm {
    fn from_info(info: ExtensionInfo) -> Self {
        Self { info }
    }
}

impl Extension for TestScm {
    fn info(&self) -> ExtensionInfo {
        self.info.clone()
    }
}

impl SourceControlProvider for TestScm {
    fn blame(&self, _file: &Path) -> Result<Vec<BlameLine>> {
        Ok(Vec::new())
    }

    fn branch_name(&self, _repository: &Path) -> Option<String> {
        Some("main".to_string())
    }

    fn is_supported(&self, repository: &Path) -> bool {
        repository.join(".git").exists()
    }

    fn init(&self, _repository: &Path) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// LockingFileOps - 실행 중인 프로세스의 파일 잠금 시뮬레이션
// ============================================================================

#[derive(Default)]
pub struct LockingFileOps {
    locked: Mutex<HashSet<PathBuf>>,
}

impl LockingFileOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self, path: &Path) {
        self.locked.lock().insert(path.to_path_buf());
    }

    pub fn unlock(&self, path: &Path) {
        self.locked.lock().remove(path);
    }

    fn check(&self, path: &Path) -> io::Result<()> {
        if self.locked.lock().contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is in use", path.display()),
            ));
        }
        Ok(())
    }
}

impl FileOps for LockingFileOps {
    fn remove(&self, path: &Path) -> io::Result<()> {
        self.check(path)?;
        match std::fs::remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn replace(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.check(to)?;
        std::fs::rename(from, to)
    }

    fn is_locked(&self, path: &Path) -> bool {
        self.locked.lock().contains(path)
    }
}
