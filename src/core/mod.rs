//! 核心模块
//!
//! 包含桥接层的基础设施：
//! - `error` - 错误类型与脚本可见错误码
//! - `macros` - 样板代码宏

pub mod error;
#[macro_use]
pub mod macros;

// 重新导出错误类型
pub use error::{BridgeError, BridgeResult, DriverError, DriverResult};
