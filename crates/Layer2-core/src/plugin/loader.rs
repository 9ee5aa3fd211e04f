//! Native module loader - libloading 기반 동적 라이브러리 로더

use super::error::LoadFailure;
use super::module::{LoadedModule, ModuleDeclaration, ModuleLoader, DECLARATION_SYMBOL};
use libloading::{Library, Symbol};
use std::path::Path;
use tracing::debug;

/// 플랫폼 동적 라이브러리(.so/.dylib/.dll) 로더
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeModuleLoader;

impl NativeModuleLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleLoader for NativeModuleLoader {
    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(std::env::consts::DLL_EXTENSION))
            .unwrap_or(false)
    }

    fn load(&self, path: &Path) -> Result<LoadedModule, LoadFailure> {
        debug!("Loading native module: {}", path.display());

        // Safety: 라이브러리 초기화 코드는 호스트가 통제할 수 없음. 검증은 샌드박스
        // 워커 프로세스에서 먼저 수행됨.
        let library = unsafe { Library::new(path) }
            .map_err(|e| LoadFailure::load_failed(path, e.to_string()))?;

        let declaration: *const ModuleDeclaration = unsafe {
            let symbol: Symbol<*const ModuleDeclaration> = library
                .get(DECLARATION_SYMBOL.as_bytes())
                .map_err(|e| {
                    LoadFailure::load_failed(
                        path,
                        format!("missing '{}' symbol: {}", DECLARATION_SYMBOL, e),
                    )
                })?;
            *symbol
        };

        if declaration.is_null() {
            return Err(LoadFailure::load_failed(path, "null module declaration"));
        }

        // Safety: 선언은 라이브러리 안의 static이고, 라이브러리는 LoadedModule이
        // 소유하므로 모듈이 살아있는 동안 유효함
        let declaration = unsafe { &*declaration };
        LoadedModule::from_declaration(declaration, path, Some(library))
    }
}
