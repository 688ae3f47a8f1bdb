//! 配置管理
//!
//! 配置按以下顺序加载并逐层覆盖:
//! 1. 内置默认值
//! 2. TOML配置文件（可选）
//! 3. 以 `RELAY__` 为前缀的环境变量，层级之间使用 `__` 分隔
//!    （例如 `RELAY__STREAM__MAX_ATTEMPTS=5`）

pub mod models;

pub use models::*;
