//! Capability contracts - 확장 모듈이 구현할 수 있는 고정된 기능 계약
//!
//! 모듈은 런타임 타입 탐색 대신 진입점에서 `CapabilityRegistrar`에 계약별
//! 팩토리를 선언합니다. `inspect`는 선언된 팩토리를 한 번씩 실행해서 내보낸
//! 타입마다 분류 결과 하나를 만듭니다.

use super::error::{LoadFailure, LoadFailureKind};
use super::module::{panic_message, LoadedModule};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqext_foundation::Result;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

// ============================================================================
// ContractKind
// ============================================================================

/// 기능 계약 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    /// 언어 분석 제공자
    AnalysisProvider,

    /// 메뉴 명령 제공자
    MenuCommand,

    /// 이슈 트래커 커넥터
    IssueTracker,

    /// 소스 컨트롤 제공자
    SourceControl,
}

impl ContractKind {
    /// 분류 우선순위
    pub const PRIORITY: [ContractKind; 4] = [
        ContractKind::AnalysisProvider,
        ContractKind::MenuCommand,
        ContractKind::IssueTracker,
        ContractKind::SourceControl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AnalysisProvider => "analysis_provider",
            Self::MenuCommand => "menu_command",
            Self::IssueTracker => "issue_tracker",
            Self::SourceControl => "source_control",
        }
    }

    /// 문자열 파싱 (`analysis`, `menu` 같은 짧은 이름 포함)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "analysis_provider" | "analysis" => Some(Self::AnalysisProvider),
            "menu_command" | "menu" => Some(Self::MenuCommand),
            "issue_tracker" | "tracker" => Some(Self::IssueTracker),
            "source_control" | "scm" => Some(Self::SourceControl),
            _ => None,
        }
    }

    fn rank(&self) -> usize {
        Self::PRIORITY
            .iter()
            .position(|k| k == self)
            .unwrap_or(Self::PRIORITY.len())
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Extension - 모든 계약의 공통 기반
// ============================================================================

/// 확장 기본 정보
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionInfo {
    pub name: String,
    pub version: String,

    /// 지원 파일 확장자 (분석 제공자 외에는 비어있을 수 있음)
    #[serde(default)]
    pub supported_extensions: BTreeSet<String>,
}

impl ExtensionInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            supported_extensions: BTreeSet::new(),
        }
    }

    pub fn with_extension(mut self, ext: impl Into<String>) -> Self {
        self.supported_extensions
            .insert(ext.into().trim_start_matches('.').to_lowercase());
        self
    }
}

/// 모든 계약이 공유하는 기반 trait
pub trait Extension: Send + Sync {
    /// 디스크립터 접근자
    fn info(&self) -> ExtensionInfo;
}

// ============================================================================
// 협력자 데이터
// ============================================================================

/// 분석 이슈
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub key: String,
    pub rule: String,
    pub message: String,
    pub component: String,
    #[serde(default)]
    pub line: Option<u32>,
}

/// 이슈 트래커 결함
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Defect {
    pub id: String,
    pub summary: String,
    #[serde(default)]
    pub status: String,
}

/// blame 한 줄
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlameLine {
    pub line: u32,
    pub author: String,
    pub email: String,
    pub commit: String,
    pub summary: String,
}

/// 로컬 분석 확장 (분석 제공자가 생성)
pub trait LocalAnalysisExtension: Send + Sync {
    /// 파일 하나 분석
    fn analyse(&self, file: &Path, contents: &str) -> Result<Vec<Issue>>;
}

// ============================================================================
// Contracts
// ============================================================================

/// 분석 제공자
pub trait AnalysisProvider: Extension {
    /// 언어 키 (예: "cxx", "cs")
    fn language_key(&self) -> String;

    /// 파일 지원 여부 - 기본은 확장자 비교
    fn is_supported(&self, file: &Path) -> bool {
        file.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.info().supported_extensions.contains(&e.to_lowercase()))
            .unwrap_or(false)
    }

    /// 파일 경로 → 서버 리소스 키
    fn resource_key(&self, project_key: &str, file: &Path) -> String;

    /// 로컬 분석 확장 생성
    fn local_extension(&self) -> Option<Box<dyn LocalAnalysisExtension>>;
}

/// 메뉴 명령 제공자
pub trait MenuCommandProvider: Extension {
    /// 메뉴 헤더 텍스트
    fn header(&self) -> String;

    /// UI 표면 생성 (호스트가 다운캐스트)
    fn create_surface(&self) -> Box<dyn Any + Send>;

    /// 설정 갱신
    fn update_configuration(&self, settings: &BTreeMap<String, String>);
}

/// 이슈 트래커 커넥터
#[async_trait]
pub trait IssueTracker: Extension {
    /// 기존 결함에 이슈 첨부
    async fn attach_to_defect(&self, defect_id: &str, issues: &[Issue], comment: &str)
        -> Result<()>;

    /// 새 결함 생성, 생성된 ID 반환
    async fn create_defect(&self, issues: &[Issue], summary: &str) -> Result<String>;

    /// ID로 결함 조회
    async fn defect(&self, id: &str) -> Result<Option<Defect>>;

    /// 커밋 메시지에 언급된 결함 조회
    async fn defect_for_commit(&self, commit_message: &str) -> Result<Option<Defect>>;
}

/// 소스 컨트롤 제공자
pub trait SourceControlProvider: Extension {
    /// 줄 단위 blame
    fn blame(&self, file: &Path) -> Result<Vec<BlameLine>>;

    /// 현재 브랜치 이름
    fn branch_name(&self, repository: &Path) -> Option<String>;

    /// 저장소 지원 여부
    fn is_supported(&self, repository: &Path) -> bool;

    /// 저장소 초기화
    fn init(&self, repository: &Path) -> Result<()>;
}

// ============================================================================
// Capability - 계약 하나를 만족하는 살아있는 인스턴스
// ============================================================================

/// 계약별 인스턴스
#[derive(Clone)]
pub enum Capability {
    Analysis(Arc<dyn AnalysisProvider>),
    MenuCommand(Arc<dyn MenuCommandProvider>),
    IssueTracker(Arc<dyn IssueTracker>),
    SourceControl(Arc<dyn SourceControlProvider>),
}

impl Capability {
    pub fn kind(&self) -> ContractKind {
        match self {
            Self::Analysis(_) => ContractKind::AnalysisProvider,
            Self::MenuCommand(_) => ContractKind::MenuCommand,
            Self::IssueTracker(_) => ContractKind::IssueTracker,
            Self::SourceControl(_) => ContractKind::SourceControl,
        }
    }

    pub fn info(&self) -> ExtensionInfo {
        match self {
            Self::Analysis(c) => c.info(),
            Self::MenuCommand(c) => c.info(),
            Self::IssueTracker(c) => c.info(),
            Self::SourceControl(c) => c.info(),
        }
    }

    pub fn as_analysis(&self) -> Option<&Arc<dyn AnalysisProvider>> {
        match self {
            Self::Analysis(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_menu_command(&self) -> Option<&Arc<dyn MenuCommandProvider>> {
        match self {
            Self::MenuCommand(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_issue_tracker(&self) -> Option<&Arc<dyn IssueTracker>> {
        match self {
            Self::IssueTracker(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_source_control(&self) -> Option<&Arc<dyn SourceControlProvider>> {
        match self {
            Self::SourceControl(c) => Some(c),
            _ => None,
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.info();
        f.debug_struct("Capability")
            .field("kind", &self.kind())
            .field("name", &info.name)
            .field("version", &info.version)
            .finish()
    }
}

// ============================================================================
// CapabilityRegistrar - 모듈 진입점이 채우는 팩토리 목록
// ============================================================================

type Factory = Box<dyn Fn() -> Result<Capability> + Send + Sync>;

struct Export {
    type_name: String,
    factory: Option<(ContractKind, Factory)>,
}

/// 모듈이 내보내는 타입과 계약별 팩토리
#[derive(Default)]
pub struct CapabilityRegistrar {
    exports: Vec<Export>,
}

impl CapabilityRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn analysis<T, F>(&mut self, type_name: &str, factory: F) -> &mut Self
    where
        T: AnalysisProvider + 'static,
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        self.push(type_name, ContractKind::AnalysisProvider, move || {
            factory().map(|c| Capability::Analysis(Arc::new(c)))
        })
    }

    pub fn menu_command<T, F>(&mut self, type_name: &str, factory: F) -> &mut Self
    where
        T: MenuCommandProvider + 'static,
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        self.push(type_name, ContractKind::MenuCommand, move || {
            factory().map(|c| Capability::MenuCommand(Arc::new(c)))
        })
    }

    pub fn issue_tracker<T, F>(&mut self, type_name: &str, factory: F) -> &mut Self
    where
        T: IssueTracker + 'static,
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        self.push(type_name, ContractKind::IssueTracker, move || {
            factory().map(|c| Capability::IssueTracker(Arc::new(c)))
        })
    }

    pub fn source_control<T, F>(&mut self, type_name: &str, factory: F) -> &mut Self
    where
        T: SourceControlProvider + 'static,
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        self.push(type_name, ContractKind::SourceControl, move || {
            factory().map(|c| Capability::SourceControl(Arc::new(c)))
        })
    }

    /// 어떤 계약도 만족하지 않는 내보낸 타입
    pub fn plain(&mut self, type_name: &str) -> &mut Self {
        self.exports.push(Export {
            type_name: type_name.to_string(),
            factory: None,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.exports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }

    fn push<F>(&mut self, type_name: &str, kind: ContractKind, factory: F) -> &mut Self
    where
        F: Fn() -> Result<Capability> + Send + Sync + 'static,
    {
        self.exports.push(Export {
            type_name: type_name.to_string(),
            factory: Some((kind, Box::new(factory))),
        });
        self
    }
}

// ============================================================================
// Inspection
// ============================================================================

/// 내보낸 타입 하나의 분류 결과
pub enum Classification {
    /// 계약을 만족하고 인스턴스 생성 성공
    Capability(Capability),

    /// 어떤 계약도 만족하지 않음
    Unsupported,

    /// 계약은 만족하지만 생성 실패
    Failed(String),
}

/// 분류된 타입
pub struct Classified {
    pub type_name: String,
    pub kind: Option<ContractKind>,
    pub outcome: Classification,
}

/// 모듈 하나의 검사 결과
#[derive(Default)]
pub struct Inspection {
    pub classified: Vec<Classified>,
}

impl Inspection {
    /// 생성된 인스턴스들 (타입 이름, 인스턴스)
    pub fn capabilities(&self) -> impl Iterator<Item = (&str, &Capability)> {
        self.classified.iter().filter_map(|c| match &c.outcome {
            Classification::Capability(cap) => Some((c.type_name.as_str(), cap)),
            _ => None,
        })
    }

    /// 타입 단위 생성 실패를 진단으로 변환
    pub fn failures(&self, file: &Path) -> Vec<LoadFailure> {
        self.classified
            .iter()
            .filter_map(|c| match &c.outcome {
                Classification::Failed(message) => Some(
                    LoadFailure::new(file, LoadFailureKind::ConstructionFailed, message.clone())
                        .with_type(&c.type_name),
                ),
                _ => None,
            })
            .collect()
    }

    /// 인스턴스를 꺼내서 소유권 이전
    pub fn into_capabilities(self) -> Vec<(String, Capability)> {
        self.classified
            .into_iter()
            .filter_map(|c| match c.outcome {
                Classification::Capability(cap) => Some((c.type_name, cap)),
                _ => None,
            })
            .collect()
    }
}

/// 로드된 모듈을 계약별로 분류
///
/// 진입점 panic은 모듈 전체 실패, 팩토리 실패/panic은 해당 타입만 실패로 기록하고
/// 나머지 타입 검사는 계속합니다.
pub fn inspect(module: &LoadedModule) -> std::result::Result<Inspection, LoadFailure> {
    let mut registrar = CapabilityRegistrar::new();
    module.register(&mut registrar)?;

    let mut classified: Vec<Classified> = registrar
        .exports
        .into_iter()
        .map(classify)
        .collect();

    classified.sort_by_key(|c| c.kind.map(|k| k.rank()).unwrap_or(ContractKind::PRIORITY.len()));

    tracing::debug!(
        "Inspected {} ({} exported types)",
        module.identity(),
        classified.len()
    );

    Ok(Inspection { classified })
}

fn classify(export: Export) -> Classified {
    let Some((kind, factory)) = export.factory else {
        return Classified {
            type_name: export.type_name,
            kind: None,
            outcome: Classification::Unsupported,
        };
    };

    let outcome = match catch_unwind(AssertUnwindSafe(|| factory())) {
        Ok(Ok(capability)) => Classification::Capability(capability),
        Ok(Err(e)) => Classification::Failed(e.to_string()),
        Err(payload) => Classification::Failed(format!(
            "constructor panicked: {}",
            panic_message(payload.as_ref())
        )),
    };

    Classified {
        type_name: export.type_name,
        kind: Some(kind),
        outcome,
    }
}
