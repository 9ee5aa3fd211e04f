//! Module Resolver - 로드 중 발생하는 모듈 참조 해결
//!
//! 해결 순서:
//! 1. 현재 로드 컨텍스트(`ModuleSet`)에 이미 로드된 모듈 (식별자 정확히 일치)
//! 2. 검색 디렉토리의 후보 파일 (파일 이름 정렬 순서)
//!
//! 후보 파일 탐색 결과는 리졸버 세션 동안 캐시됩니다.

use super::error::LoadFailure;
use super::module::{LoadedModule, ModuleIdentity, ModuleLoader};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

// ============================================================================
// ModuleSet - 로드 컨텍스트 하나에 로드된 모듈들
// ============================================================================

/// 한 로드 컨텍스트의 모듈 집합 (호스트 하나, 샌드박스마다 하나)
#[derive(Debug, Default)]
pub struct ModuleSet {
    modules: RwLock<Vec<Arc<LoadedModule>>>,
}

impl ModuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 식별자로 검색
    pub fn find(&self, identity: &ModuleIdentity) -> Option<Arc<LoadedModule>> {
        self.modules
            .read()
            .iter()
            .find(|m| m.identity() == identity)
            .cloned()
    }

    /// 추가 - 같은 식별자가 이미 있으면 기존 모듈 반환
    pub fn insert(&self, module: Arc<LoadedModule>) -> Arc<LoadedModule> {
        let mut modules = self.modules.write();
        if let Some(existing) = modules.iter().find(|m| m.identity() == module.identity()) {
            return Arc::clone(existing);
        }
        modules.push(Arc::clone(&module));
        module
    }

    /// 표시 이후에 추가된 모듈 제거
    fn rollback_to(&self, mark: usize) -> usize {
        let mut modules = self.modules.write();
        let removed = modules.len().saturating_sub(mark);
        modules.truncate(mark);
        removed
    }

    /// 루트와 루트가 참조하는 모듈(재귀)만 남기고 나머지 제거
    ///
    /// 제거된 모듈을 반환합니다. 다른 곳에서 들고 있는 모듈은 마지막 참조가
    /// 사라질 때 언로드됩니다.
    pub fn retain_reachable(&self, roots: &[ModuleIdentity]) -> Vec<Arc<LoadedModule>> {
        let mut modules = self.modules.write();

        let mut reachable: HashSet<ModuleIdentity> = HashSet::new();
        let mut queue: Vec<ModuleIdentity> = roots.to_vec();
        while let Some(identity) = queue.pop() {
            if !reachable.insert(identity.clone()) {
                continue;
            }
            if let Some(module) = modules.iter().find(|m| m.identity() == &identity) {
                queue.extend(module.references().iter().cloned());
            }
        }

        let (kept, evicted): (Vec<_>, Vec<_>) = modules
            .drain(..)
            .partition(|m| reachable.contains(m.identity()));
        *modules = kept;
        evicted
    }

    pub fn modules(&self) -> Vec<Arc<LoadedModule>> {
        self.modules.read().clone()
    }

    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// 참조 해결 결과
#[derive(Debug, Clone)]
pub enum Resolution {
    /// 이미 로드된 모듈
    Loaded(Arc<LoadedModule>),

    /// 검색 디렉토리에서 새로 로드
    LoadedFromFile(Arc<LoadedModule>, PathBuf),

    /// 찾을 수 없음
    NotFound,
}

impl Resolution {
    pub fn module(&self) -> Option<&Arc<LoadedModule>> {
        match self {
            Resolution::Loaded(m) | Resolution::LoadedFromFile(m, _) => Some(m),
            Resolution::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        !matches!(self, Resolution::NotFound)
    }
}

// ============================================================================
// ModuleResolver
// ============================================================================

type Probe = Result<Arc<LoadedModule>, LoadFailure>;

/// 모듈 리졸버 - 로드 컨텍스트 하나에 바인딩
pub struct ModuleResolver {
    loader: Arc<dyn ModuleLoader>,
    modules: Arc<ModuleSet>,
    search_dirs: Vec<PathBuf>,
    probed: Mutex<HashMap<PathBuf, Probe>>,
}

impl ModuleResolver {
    pub fn new(
        loader: Arc<dyn ModuleLoader>,
        modules: Arc<ModuleSet>,
        search_dirs: Vec<PathBuf>,
    ) -> Self {
        Self {
            loader,
            modules,
            search_dirs,
            probed: Mutex::new(HashMap::new()),
        }
    }

    pub fn modules(&self) -> &Arc<ModuleSet> {
        &self.modules
    }

    pub fn loader(&self) -> &Arc<dyn ModuleLoader> {
        &self.loader
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// 모듈 참조 해결
    pub fn resolve(&self, identity: &ModuleIdentity) -> Resolution {
        if let Some(module) = self.modules.find(identity) {
            debug!("Resolved {} from loaded modules", identity);
            return Resolution::Loaded(module);
        }

        for dir in &self.search_dirs {
            for file in candidate_files(dir, self.loader.as_ref()) {
                let Ok(candidate) = self.probe(&file) else {
                    continue;
                };
                if candidate.identity() != identity {
                    continue;
                }

                match self.load_file(&file) {
                    Ok(module) => {
                        debug!("Resolved {} from {}", identity, file.display());
                        return Resolution::LoadedFromFile(module, file);
                    }
                    Err(e) => {
                        warn!("Candidate {} for {} failed: {}", file.display(), identity, e);
                    }
                }
            }
        }

        debug!("Could not resolve {}", identity);
        Resolution::NotFound
    }

    /// 파일 로드 후 참조 모듈까지 해결
    ///
    /// 같은 식별자가 이미 로드되어 있으면 기존 모듈을 반환합니다.
    /// 모듈은 참조를 해결하기 전에 모듈 집합에 추가되므로 순환 참조도 해결됩니다.
    /// 참조 하나라도 해결되지 않으면 이 호출에서 추가된 모듈은 모두 제거됩니다.
    pub fn load_file(&self, path: &Path) -> Result<Arc<LoadedModule>, LoadFailure> {
        let module = self.probe(path)?;
        if let Some(existing) = self.modules.find(module.identity()) {
            debug!(
                "{} already loaded from {}, reusing",
                module.identity(),
                existing.path().display()
            );
            return Ok(existing);
        }

        let mark = self.modules.len();
        let module = self.modules.insert(module);

        for reference in module.references() {
            if !self.resolve(reference).is_found() {
                let removed = self.modules.rollback_to(mark);
                debug!("Rolled back {} module(s) admitted for {}", removed, path.display());
                return Err(LoadFailure::dependency_not_found(path, reference));
            }
        }

        Ok(module)
    }

    /// 파일 로드 (세션 캐시)
    fn probe(&self, path: &Path) -> Probe {
        if let Some(cached) = self.probed.lock().get(path) {
            return cached.clone();
        }

        let result = self.loader.load(path).map(Arc::new);
        self.probed
            .lock()
            .insert(path.to_path_buf(), result.clone());
        result
    }
}

/// 디렉토리의 모듈 후보 파일 (파일 이름 정렬)
pub fn candidate_files(dir: &Path, loader: &dyn ModuleLoader) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && loader.accepts(p))
        .collect();
    files.sort();
    files
}

/// 같은 식별자를 선언한 파일이 둘 이상인 경우 찾기
pub fn find_duplicate_identities(
    records: &[(PathBuf, ModuleIdentity)],
) -> Vec<(ModuleIdentity, Vec<PathBuf>)> {
    let mut by_identity: BTreeMap<&ModuleIdentity, Vec<PathBuf>> = BTreeMap::new();
    for (file, identity) in records {
        let files = by_identity.entry(identity).or_default();
        if !files.contains(file) {
            files.push(file.clone());
        }
    }

    by_identity
        .into_iter()
        .filter(|(_, files)| files.len() > 1)
        .map(|(identity, files)| (identity.clone(), files))
        .collect()
}
