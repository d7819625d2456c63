//! 统一错误处理模块
//!
//! 提供桥接层范围内的统一错误类型定义
//!
//! ## 错误类型分层
//!
//! - **驱动层错误** (`DriverError`): 驱动返回的不透明错误码
//! - **桥接层错误** (`BridgeError`): 参数解析、资源分配、使能状态冲突等
//!
//! 脚本侧看不到 Rust 错误值：每个错误都映射为一个稳定的负数错误码
//! （见 [`BridgeError::code`]），作为回调的唯一参数传递。

use thiserror::Error;

/// 参数非法
pub const EINVAL: i32 = -22;
/// 设备已使能
pub const EALREADY: i32 = -114;
/// 内存不足
pub const ENOMEM: i32 = -12;
/// 资源耗尽
pub const ERESOURCE: i32 = -28;
/// 设备不存在
pub const ENODEV: i32 = -19;
/// 驱动不支持该操作
pub const ENOTSUP: i32 = -95;
/// 设备忙
pub const EBUSY: i32 = -16;

/// 驱动层错误
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    #[error("operation not supported by driver")]
    Unsupported,

    #[error("device busy")]
    Busy,

    #[error("driver rejected argument")]
    Invalid,

    #[error("driver error code {0}")]
    Code(i32),
}

impl DriverError {
    /// 脚本可见的错误码
    pub fn code(&self) -> i32 {
        match self {
            DriverError::Unsupported => ENOTSUP,
            DriverError::Busy => EBUSY,
            DriverError::Invalid => EINVAL,
            DriverError::Code(code) => *code,
        }
    }
}

/// 桥接层错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Device already enabled")]
    AlreadyEnabled,

    #[error("Out of memory: {requested} bytes requested")]
    OutOfMemory { requested: usize },

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("No such device")]
    NoSuchDevice,
}

impl BridgeError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        BridgeError::InvalidArgument(msg.into())
    }

    /// 脚本可见的错误码
    pub fn code(&self) -> i32 {
        match self {
            BridgeError::InvalidArgument(_) => EINVAL,
            BridgeError::AlreadyEnabled => EALREADY,
            BridgeError::OutOfMemory { .. } => ENOMEM,
            BridgeError::ResourceExhausted(_) => ERESOURCE,
            BridgeError::Driver(err) => err.code(),
            BridgeError::NoSuchDevice => ENODEV,
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
pub type DriverResult<T> = Result<T, DriverError>;
