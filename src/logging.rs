//! 日志初始化
//!
//! 桥接层各组件通过 `tracing` 宏输出日志，target 按组件划分：
//! `bridge`、`registry`、`dispatch`、`driver`、`script`。

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// 初始化日志系统
///
/// 配置的级别作为默认过滤器，`RUST_LOG` 环境变量优先。
/// 重复调用是安全的，只有第一次生效。
pub fn init(config: &LoggingConfig) {
    if !config.log_to_console {
        return;
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_filter()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
    tracing::debug!(target: "bridge", "logging initialised at {}", config.level.as_filter());
}
