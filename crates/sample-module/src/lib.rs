//! SQExt 샘플 확장 모듈
//!
//! `TODO` 주석을 이슈로 보고하는 분석 제공자와 메뉴 명령 하나를 내보냅니다.
//! 통합 테스트가 이 라이브러리를 빌드해서 실제 네이티브 로드 경로를 확인합니다.

use sqext_core::plugin::{
    AnalysisProvider, CapabilityRegistrar, Extension, ExtensionInfo, Issue,
    LocalAnalysisExtension, MenuCommandProvider,
};
use sqext_core::Result;
use std::any::Any;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

const NAME: &str = "sample";
const VERSION: &str = "1.0.0";

// ============================================================================
// Analysis
// ============================================================================

#[derive(Default)]
struct TodoAnalyzer;

impl Extension for TodoAnalyzer {
    fn info(&self) -> ExtensionInfo {
        ExtensionInfo::new(NAME, VERSION)
            .with_extension("rs")
            .with_extension("txt")
    }
}

impl AnalysisProvider for TodoAnalyzer {
    fn language_key(&self) -> String {
        "todo".to_string()
    }

    fn resource_key(&self, project_key: &str, file: &Path) -> String {
        format!("{}:{}", project_key, file.display())
    }

    fn local_extension(&self) -> Option<Box<dyn LocalAnalysisExtension>> {
        Some(Box::new(TodoScanner))
    }
}

struct TodoScanner;

impl LocalAnalysisExtension for TodoScanner {
    fn analyse(&self, file: &Path, contents: &str) -> Result<Vec<Issue>> {
        let issues = contents
            .lines()
            .enumerate()
            .filter(|(_, line)| line.contains("TODO"))
            .map(|(index, line)| Issue {
                key: format!("{}:{}", file.display(), index + 1),
                rule: "todo:open-item".to_string(),
                message: line.trim().to_string(),
                component: file.display().to_string(),
                line: Some(index as u32 + 1),
            })
            .collect();
        Ok(issues)
    }
}

// ============================================================================
// Menu
// ============================================================================

#[derive(Default)]
struct TodoMenu {
    settings: Mutex<BTreeMap<String, String>>,
}

impl Extension for TodoMenu {
    fn info(&self) -> ExtensionInfo {
        ExtensionInfo::new(NAME, VERSION)
    }
}

impl MenuCommandProvider for TodoMenu {
    fn header(&self) -> String {
        let settings = match self.settings.lock() {
            Ok(settings) => settings,
            Err(poisoned) => poisoned.into_inner(),
        };
        settings
            .get("header")
            .cloned()
            .unwrap_or_else(|| "TODO Scanner".to_string())
    }

    fn create_surface(&self) -> Box<dyn Any + Send> {
        Box::new(self.header())
    }

    fn update_configuration(&self, settings: &BTreeMap<String, String>) {
        let mut current = match self.settings.lock() {
            Ok(current) => current,
            Err(poisoned) => poisoned.into_inner(),
        };
        *current = settings.clone();
    }
}

fn register(registrar: &mut CapabilityRegistrar) {
    registrar.analysis("TodoAnalyzer", || Ok(TodoAnalyzer));
    registrar.menu_command("TodoMenu", || Ok(TodoMenu::default()));
}

sqext_core::declare_module!("sqext-sample", "1.0.0", register);
