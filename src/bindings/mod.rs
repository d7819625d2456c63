//! Language Binding Layer
//!
//! 把 [`crate::bridge::DeviceBridge`] 暴露给具体的脚本运行时。
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  JS script                                   │
//! │    createDevice / dev.read / dev.listen ...  │
//! └──────────────────────┬───────────────────────┘
//!                        │ ScriptValue
//!                        v
//! ┌──────────────────────────────────────────────┐
//! │  JsDeviceRuntime (值转换 + 延迟回调队列)      │
//! └──────────────────────┬───────────────────────┘
//!                        │ Operation façade
//!                        v
//! ┌──────────────────────────────────────────────┐
//! │  DeviceBridge ──▶ DeviceDriver               │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! 桥接层回调不会直接进入 JS：它们只是把调用排入队列，适配器在释放
//! 桥接层借用之后再按顺序执行，所以 JS 回调中可以安全地再次调用设备操作。

pub mod js;

pub use js::{JsDeviceRuntime, ScriptError, ScriptResult};
