//! Storage module for SQExt
//!
//! - `json`: JSON - 범용 파일 저장/로드 (설정, 확장 설정, 설치 기록)

mod json;

// JSON Storage (범용)
pub use json::{JsonStore, STORE_DIR_NAME};
