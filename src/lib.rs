//! # Device Bridge
//!
//! 外设驱动与动态脚本运行时之间的桥接层。
//!
//! ## Features
//!
//! - **Device Handles**: 带代数校验的设备句柄，已销毁设备的句柄永远不会解析到新设备
//! - **Callback Registry**: 有界、引用计数的回调槽位表
//! - **Event Dispatch**: 驱动上下文投递的事件在脚本线程上路由到回调
//! - **Marshaling**: 脚本值与驱动配置、字节缓冲区之间的转换
//! - **Simulated Drivers**: 不依赖硬件的 `adc` / `gpio` / `uart` / `flash` 设备
//! - **QuickJS Adapter**: 可选的 JavaScript 绑定 (`quickjs` feature)
//!
//! ## Architecture Design
//!
//! - **State**: 设备表、回调表、挂起查询全部归 [`bridge::DeviceBridge`] 所有
//! - **Driver**: 驱动只实现 [`driver::DeviceDriver`]，通过 [`driver::EventSink`] 回报事件
//! - **Script**: 脚本运行时只看到 [`value::ScriptValue`]
//!
//! ### Example
//!
//! ```
//! use device_bridge::bridge::DeviceBridge;
//! use device_bridge::driver::sim::SimHost;
//! use device_bridge::value::ScriptValue;
//!
//! let mut bridge = DeviceBridge::with_defaults(Box::new(SimHost::new()));
//! let gpio = bridge.create_device(&[ScriptValue::from("gpio")]);
//! assert_eq!(bridge.enable(&[gpio.clone()]), ScriptValue::Bool(true));
//! assert_eq!(bridge.set(&[gpio.clone(), ScriptValue::number(1)]), ScriptValue::Bool(true));
//! assert_eq!(bridge.get(&[gpio]), ScriptValue::number(0b1111));
//! ```
//!
//! ## Modules
//!
//! - [`core`]: 错误类型与宏
//! - [`config`]: 配置系统
//! - [`driver`]: 驱动接口与模拟驱动
//! - [`bridge`]: 桥接层本体
//! - [`value`]: 脚本值模型

/// Error types and helper macros
pub mod core;
/// Configuration system
pub mod config;
/// Tracing subscriber setup
pub mod logging;
/// Values exchanged with the scripting runtime
pub mod value;
/// Driver interface and simulated drivers
pub mod driver;
/// Device handles, callbacks, event dispatch and the operation façade
pub mod bridge;
/// Language bindings for scripting
#[cfg(feature = "quickjs")]
pub mod bindings;

pub use crate::bridge::{DeviceBridge, EventCategory, Operation};
pub use crate::core::{BridgeError, BridgeResult, DriverError, DriverResult};
pub use crate::value::{DeviceHandle, ScriptFunction, ScriptValue};
