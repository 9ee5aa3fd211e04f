//! Sandbox - 설치 전 검증용 격리 로드 컨텍스트
//!
//! 샌드박스는 자체 `ModuleSet`을 가지므로 호스트에 로드된 모듈과 섞이지 않습니다.
//! 기본 격리 방식은 워커 프로세스입니다. 워커는 `sqext __validate`로 실행되어
//! 샌드박스 하나를 만들고 결과를 stdout에 JSON으로 쓴 뒤 종료합니다. 워커가
//! 죽어도 호스트에는 `WorkerCrashed` 진단만 남습니다.

use super::contracts::{inspect, ContractKind};
use super::error::{LoadFailure, LoadFailureKind};
use super::module::{ModuleIdentity, ModuleLoader};
use super::resolver::{ModuleResolver, ModuleSet};
use serde::{Deserialize, Serialize};
use sqext_foundation::{Error, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 워커 프로세스 서브커맨드
pub const WORKER_COMMAND: &str = "__validate";

// ============================================================================
// State / Report
// ============================================================================

/// 샌드박스 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Created,
    Loading,
    Validated,
    Failed,
    Disposed,
}

/// 검증에서 발견된 후보 디스크립터 (인스턴스에서 복사한 값)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateDescriptor {
    pub name: String,
    pub version: String,
    pub kind: ContractKind,
    #[serde(default)]
    pub supported_extensions: BTreeSet<String>,
    pub module: ModuleIdentity,
    pub file: PathBuf,
    pub type_name: String,
}

/// 검증한 파일과 그 파일이 선언한 모듈
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRecord {
    pub file: PathBuf,
    pub identity: ModuleIdentity,
}

/// 샌드박스 검증 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxReport {
    #[serde(default)]
    pub candidates: Vec<CandidateDescriptor>,

    #[serde(default)]
    pub errors: Vec<LoadFailure>,

    #[serde(default)]
    pub modules: Vec<ModuleRecord>,
}

impl SandboxReport {
    pub fn has_candidates(&self) -> bool {
        !self.candidates.is_empty()
    }

    /// 모든 파일에 대해 워커 비정상 종료 진단 생성
    pub fn crashed(files: &[PathBuf], message: &str) -> Self {
        Self {
            errors: files
                .iter()
                .map(|f| LoadFailure::new(f, LoadFailureKind::WorkerCrashed, message))
                .collect(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Sandbox
// ============================================================================

/// 격리 로드 컨텍스트
pub struct Sandbox {
    id: Uuid,
    files: Vec<PathBuf>,
    resolver: ModuleResolver,
    state: SandboxState,
}

impl Sandbox {
    /// 새 로드 컨텍스트 생성 - 리졸버는 이 샌드박스에만 바인딩
    pub fn create(
        files: Vec<PathBuf>,
        search_dirs: Vec<PathBuf>,
        loader: Arc<dyn ModuleLoader>,
    ) -> Self {
        let id = Uuid::new_v4();
        debug!("Sandbox {} created for {} file(s)", id, files.len());

        Self {
            id,
            files,
            resolver: ModuleResolver::new(loader, Arc::new(ModuleSet::new()), search_dirs),
            state: SandboxState::Created,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// 모든 파일 로드 후 계약 검사
    ///
    /// 파일 단위 실패는 진단으로 기록하고 나머지 파일 처리를 계속합니다.
    pub fn load_and_inspect(&mut self) -> SandboxReport {
        self.state = SandboxState::Loading;
        let mut report = SandboxReport::default();

        for file in &self.files {
            let module = match self.resolver.load_file(file) {
                Ok(module) => module,
                Err(failure) => {
                    warn!("Sandbox {}: {}", self.id, failure);
                    report.errors.push(failure);
                    continue;
                }
            };

            report.modules.push(ModuleRecord {
                file: file.clone(),
                identity: module.identity().clone(),
            });

            if module.path() != file.as_path() {
                debug!(
                    "Sandbox {}: {} already loaded from {}, skipping {}",
                    self.id,
                    module.identity(),
                    module.path().display(),
                    file.display()
                );
                continue;
            }

            let inspection = match inspect(&module) {
                Ok(inspection) => inspection,
                Err(failure) => {
                    warn!("Sandbox {}: {}", self.id, failure);
                    report.errors.push(failure);
                    continue;
                }
            };

            report.errors.extend(inspection.failures(file));
            for (type_name, capability) in inspection.capabilities() {
                let info = capability.info();
                report.candidates.push(CandidateDescriptor {
                    name: info.name,
                    version: info.version,
                    kind: capability.kind(),
                    supported_extensions: info.supported_extensions,
                    module: module.identity().clone(),
                    file: file.clone(),
                    type_name: type_name.to_string(),
                });
            }
        }

        self.state = if report.has_candidates() {
            SandboxState::Validated
        } else {
            SandboxState::Failed
        };

        info!(
            "Sandbox {} {:?}: {} candidate(s), {} error(s)",
            self.id,
            self.state,
            report.candidates.len(),
            report.errors.len()
        );

        report
    }

    /// 로드한 코드와 인스턴스 해제
    pub fn dispose(mut self) {
        self.state = SandboxState::Disposed;
        debug!(
            "Sandbox {} disposed ({} module(s) released)",
            self.id,
            self.resolver.modules().len()
        );
    }
}

/// 워커 측 진입점 - 샌드박스 하나를 만들고 검증 후 해제
pub fn run_worker(
    files: Vec<PathBuf>,
    search_dirs: Vec<PathBuf>,
    loader: Arc<dyn ModuleLoader>,
) -> SandboxReport {
    let mut sandbox = Sandbox::create(files, search_dirs, loader);
    let report = sandbox.load_and_inspect();
    sandbox.dispose();
    report
}

// ============================================================================
// Isolation
// ============================================================================

/// 검증 격리 방식
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Isolation {
    /// 같은 프로세스의 독립 로드 컨텍스트
    InProcess,

    /// 워커 프로세스 (`program [args] __validate ...`)
    Process { program: PathBuf, args: Vec<String> },
}

impl Isolation {
    pub fn process(program: impl Into<PathBuf>) -> Self {
        Isolation::Process {
            program: program.into(),
            args: Vec::new(),
        }
    }
}

/// 백그라운드에서 샌드박스 검증 실행
///
/// 워커를 시작할 수 없는 경우만 에러입니다. 워커 크래시나 잘못된 출력은
/// `WorkerCrashed` 진단을 담은 리포트로 반환됩니다.
pub async fn validate(
    files: Vec<PathBuf>,
    search_dirs: Vec<PathBuf>,
    isolation: &Isolation,
    loader: Arc<dyn ModuleLoader>,
) -> Result<SandboxReport> {
    match isolation {
        Isolation::InProcess => {
            tokio::task::spawn_blocking(move || run_worker(files, search_dirs, loader))
                .await
                .map_err(|e| Error::Internal(format!("validation task failed: {}", e)))
        }
        Isolation::Process { program, args } => {
            validate_in_worker(program, args, files, search_dirs).await
        }
    }
}

async fn validate_in_worker(
    program: &Path,
    args: &[String],
    files: Vec<PathBuf>,
    search_dirs: Vec<PathBuf>,
) -> Result<SandboxReport> {
    let mut command = tokio::process::Command::new(program);
    command.args(args).arg(WORKER_COMMAND);
    for dir in &search_dirs {
        command.arg("--search-dir").arg(dir);
    }
    command
        .arg("--")
        .args(&files)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(
        "Spawning validation worker {} for {} file(s)",
        program.display(),
        files.len()
    );

    let output = command.output().await.map_err(|e| {
        Error::Module(format!(
            "failed to start validation worker {}: {}",
            program.display(),
            e
        ))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.lines().last().unwrap_or("").trim();
        let message = format!("worker exited with {}: {}", output.status, detail);
        warn!("Validation worker crashed: {}", message);
        return Ok(SandboxReport::crashed(&files, &message));
    }

    match serde_json::from_slice::<SandboxReport>(&output.stdout) {
        Ok(report) => Ok(report),
        Err(e) => {
            let message = format!("unreadable worker report: {}", e);
            warn!("{}", message);
            Ok(SandboxReport::crashed(&files, &message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::testing::{write_module, Export, ScriptedLoader, TestModule};
    use tempfile::TempDir;

    #[test]
    fn test_load_and_inspect_collects_candidates_and_errors() {
        let temp = TempDir::new().unwrap();
        let good = write_module(
            temp.path(),
            "cxx.sqm",
            &TestModule::new("cxx", "2.0")
                .export(Export::analysis("CxxAnalyzer", "cxx", &["cpp", "h"]))
                .export(Export::menu("CxxMenu", "cxx-menu")),
        );
        let broken = temp.path().join("broken.sqm");
        std::fs::write(&broken, b"\x7fELF truncated").unwrap();

        let mut sandbox = Sandbox::create(
            vec![broken.clone(), good],
            vec![temp.path().to_path_buf()],
            Arc::new(ScriptedLoader::new()),
        );
        assert_eq!(sandbox.state(), SandboxState::Created);

        let report = sandbox.load_and_inspect();
        assert_eq!(sandbox.state(), SandboxState::Validated);
        assert_eq!(report.candidates.len(), 2);
        assert_eq!(report.candidates[0].kind, ContractKind::AnalysisProvider);
        assert_eq!(report.candidates[0].name, "cxx");
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].file, broken);
        assert_eq!(report.errors[0].kind, LoadFailureKind::LoadFailed);

        sandbox.dispose();
    }

    #[test]
    fn test_no_capability_marks_failed() {
        let temp = TempDir::new().unwrap();
        let plain = write_module(
            temp.path(),
            "helpers.sqm",
            &TestModule::new("helpers", "1.0").export(Export::plain("StringUtils")),
        );

        let mut sandbox = Sandbox::create(
            vec![plain],
            Vec::new(),
            Arc::new(ScriptedLoader::new()),
        );
        let report = sandbox.load_and_inspect();

        assert_eq!(sandbox.state(), SandboxState::Failed);
        assert!(report.candidates.is_empty());
        assert!(report.errors.is_empty());
        assert_eq!(report.modules.len(), 1);
    }

    #[test]
    fn test_sandbox_does_not_share_host_modules() {
        let temp = TempDir::new().unwrap();
        let file = write_module(
            temp.path(),
            "menu.sqm",
            &TestModule::new("menu", "1.0").export(Export::menu("Menu", "menu")),
        );
        let loader = Arc::new(ScriptedLoader::new());

        let first = run_worker(vec![file.clone()], Vec::new(), loader.clone());
        let second = run_worker(vec![file.clone()], Vec::new(), loader.clone());

        assert_eq!(first, second);
        assert_eq!(loader.load_count(&file), 2);
    }

    #[test]
    fn test_duplicate_identity_in_batch_is_recorded() {
        let temp = TempDir::new().unwrap();
        let module = TestModule::new("dup", "1.0").export(Export::menu("Menu", "dup"));
        let a = write_module(temp.path(), "a.sqm", &module);
        let b = write_module(temp.path(), "b.sqm", &module);

        let report = run_worker(vec![a, b], Vec::new(), Arc::new(ScriptedLoader::new()));

        assert_eq!(report.candidates.len(), 1);
        assert_eq!(report.modules.len(), 2);
        assert_eq!(report.modules[0].identity, report.modules[1].identity);
    }

    #[test]
    fn test_panicking_module_does_not_abort_batch() {
        let temp = TempDir::new().unwrap();
        let bad = write_module(
            temp.path(),
            "bad.sqm",
            &TestModule::new("bad", "1.0").panic_on_register(),
        );
        let good = write_module(
            temp.path(),
            "good.sqm",
            &TestModule::new("good", "1.0").export(Export::menu("Menu", "good")),
        );

        let report = run_worker(vec![bad, good], Vec::new(), Arc::new(ScriptedLoader::new()));

        assert_eq!(report.candidates.len(), 1);
        assert_eq!(report.errors[0].kind, LoadFailureKind::Panicked);
    }

    #[tokio::test]
    async fn test_validate_in_process() {
        let temp = TempDir::new().unwrap();
        let file = write_module(
            temp.path(),
            "git.sqm",
            &TestModule::new("git", "1.0").export(Export::source_control("GitProvider", "git")),
        );

        let report = validate(
            vec![file],
            Vec::new(),
            &Isolation::InProcess,
            Arc::new(ScriptedLoader::new()),
        )
        .await
        .unwrap();

        assert_eq!(report.candidates[0].kind, ContractKind::SourceControl);
    }

    #[tokio::test]
    async fn test_worker_that_cannot_start_is_module_error() {
        let err = validate(
            vec![PathBuf::from("x.sqm")],
            Vec::new(),
            &Isolation::process("/nonexistent/sqext-worker"),
            Arc::new(ScriptedLoader::new()),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Module(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crashed_worker_becomes_diagnostics() {
        let files = vec![PathBuf::from("a.sqm"), PathBuf::from("b.sqm")];
        let isolation = Isolation::Process {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), "echo 'segfault' >&2; exit 139".into()],
        };

        let report = validate(files, Vec::new(), &isolation, Arc::new(ScriptedLoader::new()))
            .await
            .unwrap();

        assert!(report.candidates.is_empty());
        assert_eq!(report.errors.len(), 2);
        assert!(report
            .errors
            .iter()
            .all(|e| e.kind == LoadFailureKind::WorkerCrashed));
        assert!(report.errors[0].message.contains("segfault"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_garbled_worker_output() {
        let isolation = Isolation::Process {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), "echo not-json".into()],
        };

        let report = validate(
            vec![PathBuf::from("a.sqm")],
            Vec::new(),
            &isolation,
            Arc::new(ScriptedLoader::new()),
        )
        .await
        .unwrap();

        assert_eq!(report.errors[0].kind, LoadFailureKind::WorkerCrashed);
    }
}
