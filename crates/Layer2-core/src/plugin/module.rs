//! Module - 확장 모듈 식별자, 네이티브 선언(ABI), 로드된 모듈
//!
//! 네이티브 확장 모듈은 `declare_module!` 매크로로 아래와 같이 진입점을 노출합니다.
//!
//! ```ignore
//! fn register(registrar: &mut CapabilityRegistrar) {
//!     registrar.analysis("CxxAnalyzer", || Ok(CxxAnalyzer::default()));
//!     registrar.menu_command("CxxOptions", || Ok(CxxOptionsMenu::default()));
//! }
//!
//! sqext_core::declare_module!("cxx-plugin", "2.1.0", ["cxx-common, 1.4.0"], register);
//! ```

use super::contracts::CapabilityRegistrar;
use super::error::{LoadFailure, LoadFailureKind};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 네이티브 선언 구조체의 ABI 버전
pub const MODULE_ABI_VERSION: u32 = 1;

/// 모듈이 빌드될 때 사용한 코어 버전
pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 네이티브 모듈이 노출하는 선언 심볼 이름
pub const DECLARATION_SYMBOL: &str = "sqext_module_declaration";

// ============================================================================
// ModuleIdentity
// ============================================================================

/// 모듈 식별자 - "name, version" 형식, 정확히 일치해야 같은 모듈
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleIdentity {
    pub name: String,
    pub version: String,
}

impl ModuleIdentity {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// "name, version" 파싱 (버전 생략 가능)
    pub fn parse(s: &str) -> Option<Self> {
        let (name, version) = match s.split_once(',') {
            Some((name, version)) => (name.trim(), version.trim()),
            None => (s.trim(), ""),
        };

        if name.is_empty() {
            return None;
        }

        Some(Self::new(name, version))
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}, {}", self.name, self.version)
        }
    }
}

/// 모듈 매니페스트 - 식별자 + 참조하는 모듈들
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub identity: ModuleIdentity,

    #[serde(default)]
    pub references: Vec<ModuleIdentity>,
}

impl ModuleManifest {
    pub fn new(identity: ModuleIdentity) -> Self {
        Self {
            identity,
            references: Vec::new(),
        }
    }

    pub fn with_reference(mut self, reference: ModuleIdentity) -> Self {
        self.references.push(reference);
        self
    }
}

// ============================================================================
// ModuleDeclaration - 네이티브 모듈 ABI
// ============================================================================

/// 네이티브 모듈이 `sqext_module_declaration` 심볼로 노출하는 선언
///
/// `abi_version`은 항상 첫 필드여야 합니다. 로더는 이 값을 먼저 확인한 뒤에만
/// 나머지 필드를 읽습니다.
#[repr(C)]
pub struct ModuleDeclaration {
    pub abi_version: u32,
    pub core_version: &'static str,
    pub name: &'static str,
    pub version: &'static str,
    pub references: &'static [&'static str],
    pub register: fn(&mut CapabilityRegistrar),
}

/// 네이티브 모듈 선언 매크로
#[macro_export]
macro_rules! declare_module {
    ($name:expr, $version:expr, [$($reference:expr),* $(,)?], $register:path) => {
        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static sqext_module_declaration: $crate::plugin::ModuleDeclaration =
            $crate::plugin::ModuleDeclaration {
                abi_version: $crate::plugin::MODULE_ABI_VERSION,
                core_version: $crate::plugin::CORE_VERSION,
                name: $name,
                version: $version,
                references: &[$($reference),*],
                register: $register,
            };
    };
    ($name:expr, $version:expr, $register:path) => {
        $crate::declare_module!($name, $version, [], $register);
    };
}

// ============================================================================
// LoadedModule
// ============================================================================

type RegisterFn = Arc<dyn Fn(&mut CapabilityRegistrar) + Send + Sync>;

/// 로드된 모듈
///
/// 네이티브 모듈은 라이브러리 핸들을 함께 보관하므로, 이 값(및 이 값에서 만든
/// 인스턴스)이 살아있는 동안 코드가 언로드되지 않습니다.
pub struct LoadedModule {
    manifest: ModuleManifest,
    path: PathBuf,
    register: RegisterFn,
    // 필드 드롭 순서상 반드시 마지막
    _library: Option<libloading::Library>,
}

impl LoadedModule {
    /// 진입점 함수로 모듈 생성
    pub fn new<F>(manifest: ModuleManifest, path: impl Into<PathBuf>, register: F) -> Self
    where
        F: Fn(&mut CapabilityRegistrar) + Send + Sync + 'static,
    {
        Self {
            manifest,
            path: path.into(),
            register: Arc::new(register),
            _library: None,
        }
    }

    /// 네이티브 선언으로부터 생성
    ///
    /// ABI 버전과 코어 버전이 맞지 않으면 `Incompatible`.
    pub fn from_declaration(
        declaration: &ModuleDeclaration,
        path: impl AsRef<Path>,
        library: Option<libloading::Library>,
    ) -> Result<Self, LoadFailure> {
        let path = path.as_ref();

        if declaration.abi_version != MODULE_ABI_VERSION {
            return Err(LoadFailure::new(
                path,
                LoadFailureKind::Incompatible,
                format!(
                    "module ABI version {} (host expects {})",
                    declaration.abi_version, MODULE_ABI_VERSION
                ),
            ));
        }

        if declaration.core_version != CORE_VERSION {
            return Err(LoadFailure::new(
                path,
                LoadFailureKind::Incompatible,
                format!(
                    "module built against core {} (host is {})",
                    declaration.core_version, CORE_VERSION
                ),
            ));
        }

        let mut manifest =
            ModuleManifest::new(ModuleIdentity::new(declaration.name, declaration.version));
        for reference in declaration.references {
            let identity = ModuleIdentity::parse(reference).ok_or_else(|| {
                LoadFailure::load_failed(path, format!("invalid module reference '{}'", reference))
            })?;
            manifest.references.push(identity);
        }

        let register = declaration.register;
        Ok(Self {
            manifest,
            path: path.to_path_buf(),
            register: Arc::new(move |registrar: &mut CapabilityRegistrar| register(registrar)),
            _library: library,
        })
    }

    pub fn identity(&self) -> &ModuleIdentity {
        &self.manifest.identity
    }

    pub fn references(&self) -> &[ModuleIdentity] {
        &self.manifest.references
    }

    pub fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 네이티브 라이브러리로 로드된 모듈인지
    pub fn is_native(&self) -> bool {
        self._library.is_some()
    }

    /// 모듈 진입점 실행 - panic은 에러로 변환
    pub fn register(&self, registrar: &mut CapabilityRegistrar) -> Result<(), LoadFailure> {
        catch_unwind(AssertUnwindSafe(|| (self.register)(registrar))).map_err(|payload| {
            LoadFailure::new(
                &self.path,
                LoadFailureKind::Panicked,
                format!("module entry point panicked: {}", panic_message(payload.as_ref())),
            )
        })
    }
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("identity", &self.manifest.identity)
            .field("path", &self.path)
            .field("native", &self._library.is_some())
            .finish()
    }
}

// ============================================================================
// ModuleLoader
// ============================================================================

/// 모듈 파일 로더
pub trait ModuleLoader: Send + Sync {
    /// 이 로더가 처리하는 파일인지
    fn accepts(&self, path: &Path) -> bool;

    /// 파일 로드
    fn load(&self, path: &Path) -> Result<LoadedModule, LoadFailure>;
}

/// panic payload에서 메시지 추출
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_nothing(_registrar: &mut CapabilityRegistrar) {}

    fn register_panics(_registrar: &mut CapabilityRegistrar) {
        panic!("static init failed");
    }

    #[test]
    fn test_identity_parse() {
        let id = ModuleIdentity::parse("cxx-common, 1.4.0").unwrap();
        assert_eq!(id, ModuleIdentity::new("cxx-common", "1.4.0"));
        assert_eq!(id.to_string(), "cxx-common, 1.4.0");

        let bare = ModuleIdentity::parse("helpers").unwrap();
        assert_eq!(bare.version, "");
        assert_eq!(bare.to_string(), "helpers");

        assert!(ModuleIdentity::parse("  , 1.0").is_none());
    }

    #[test]
    fn test_identity_exact_match() {
        // 버전은 문자열 그대로 비교
        assert_ne!(
            ModuleIdentity::new("a", "1.0"),
            ModuleIdentity::new("a", "1.0.0")
        );
    }

    #[test]
    fn test_from_declaration() {
        let declaration = ModuleDeclaration {
            abi_version: MODULE_ABI_VERSION,
            core_version: CORE_VERSION,
            name: "cxx-plugin",
            version: "2.1.0",
            references: &["cxx-common, 1.4.0"],
            register: register_nothing,
        };

        let module = LoadedModule::from_declaration(&declaration, "/ext/cxx.so", None).unwrap();
        assert_eq!(module.identity(), &ModuleIdentity::new("cxx-plugin", "2.1.0"));
        assert_eq!(
            module.references(),
            &[ModuleIdentity::new("cxx-common", "1.4.0")]
        );
        assert!(!module.is_native());
    }

    #[test]
    fn test_declaration_abi_mismatch() {
        let declaration = ModuleDeclaration {
            abi_version: MODULE_ABI_VERSION + 1,
            core_version: CORE_VERSION,
            name: "future",
            version: "9.0",
            references: &[],
            register: register_nothing,
        };

        let err = LoadedModule::from_declaration(&declaration, "/ext/future.so", None).unwrap_err();
        assert_eq!(err.kind, LoadFailureKind::Incompatible);
    }

    #[test]
    fn test_declaration_core_mismatch() {
        let declaration = ModuleDeclaration {
            abi_version: MODULE_ABI_VERSION,
            core_version: "0.0.0-other",
            name: "old",
            version: "1.0",
            references: &[],
            register: register_nothing,
        };

        let err = LoadedModule::from_declaration(&declaration, "/ext/old.so", None).unwrap_err();
        assert_eq!(err.kind, LoadFailureKind::Incompatible);
        assert!(err.message.contains("0.0.0-other"));
    }

    #[test]
    fn test_register_panic_is_contained() {
        let declaration = ModuleDeclaration {
            abi_version: MODULE_ABI_VERSION,
            core_version: CORE_VERSION,
            name: "bad",
            version: "1.0",
            references: &[],
            register: register_panics,
        };

        let module = LoadedModule::from_declaration(&declaration, "/ext/bad.so", None).unwrap();
        let mut registrar = CapabilityRegistrar::new();
        let err = module.register(&mut registrar).unwrap_err();

        assert_eq!(err.kind, LoadFailureKind::Panicked);
        assert!(err.message.contains("static init failed"));
    }

    mod declared {
        use super::super::*;

        fn register(_registrar: &mut CapabilityRegistrar) {}

        crate::declare_module!("declared", "0.1.0", ["dep, 1.0"], register);

        #[test]
        fn test_declare_module_macro() {
            let module =
                LoadedModule::from_declaration(&sqext_module_declaration, "declared.so", None)
                    .unwrap();
            assert_eq!(module.identity().name, "declared");
            assert_eq!(module.references().len(), 1);
        }
    }
}
