//! Config - 런타임 설정 관리
//!
//! - `runtime.rs` - RuntimeConfig (자동 활성화, 고정 의존성 버전, 초기 기능 플래그)

mod runtime;

pub use runtime::{RuntimeConfig, RUNTIME_CONFIG_FILE};
