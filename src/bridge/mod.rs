//! 设备桥接层
//!
//! 把异构的外设驱动统一暴露为脚本可调用的设备句柄。
//!
//! ```text
//!  脚本调用 ──▶ ops (参数解析) ──▶ marshal / buffer ──▶ DeviceDriver
//!                                                        │
//!  脚本回调 ◀── dispatch ◀── poll_events ◀── EventSink ◀──┘ (驱动上下文)
//!                 │
//!                 └── registry (回调表)
//! ```
//!
//! 所有脚本可见的状态变更都发生在脚本线程上；驱动只持有 [`EventSink`]，
//! 它投递的事件在 [`DeviceBridge::poll_events`] 中被分发。

use crate::config::BridgeConfig;
use crate::core::error::{BridgeError, BridgeResult};
use crate::driver::{DeviceDescriptor, DriverEvent, DriverHost, EventSink, QueryToken};
use crate::value::{DeviceHandle, ScriptFunction};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::HashMap;
use std::fmt::Write as _;

pub mod buffer;
pub mod device;
pub mod dispatch;
pub mod marshal;
pub mod ops;
pub mod registry;

pub use buffer::{clamp_write, BufferManager, QueryRequest};
pub use device::EventCategory;
pub use ops::Operation;
pub use registry::{CallbackId, CallbackRegistry};

use device::DeviceTable;

/// 进行中的查询
#[derive(Debug, Clone, Copy)]
struct PendingQuery {
    device: DeviceHandle,
    /// 一次性完成回调，`NONE` 表示不需要回调
    callback: CallbackId,
}

/// 设备桥接层
pub struct DeviceBridge {
    host: Box<dyn DriverHost>,
    devices: DeviceTable,
    registry: CallbackRegistry,
    buffers: BufferManager,
    pending: HashMap<QueryToken, PendingQuery>,
    next_token: u64,
    events_tx: Sender<DriverEvent>,
    events_rx: Receiver<DriverEvent>,
}

impl DeviceBridge {
    pub fn new(host: Box<dyn DriverHost>, config: &BridgeConfig) -> Self {
        let (events_tx, events_rx) = bounded(config.events.queue_capacity.max(1));
        Self {
            host,
            devices: DeviceTable::default(),
            registry: CallbackRegistry::with_capacity(config.registry.capacity),
            buffers: BufferManager::new(&config.buffers),
            pending: HashMap::new(),
            next_token: 1,
            events_tx,
            events_rx,
        }
    }

    pub fn with_defaults(host: Box<dyn DriverHost>) -> Self {
        Self::new(host, &BridgeConfig::default())
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    pub fn buffers(&self) -> &BufferManager {
        &self.buffers
    }

    /// 当前打开的设备数
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn is_live(&self, handle: DeviceHandle) -> bool {
        self.devices.contains(handle)
    }

    /// 尚未收到响应的查询数
    pub fn pending_queries(&self) -> usize {
        self.pending.len()
    }

    /// 设备在某事件类别上注册的回调槽位
    pub fn event_callback(&self, handle: DeviceHandle, event: EventCategory) -> CallbackId {
        self.devices
            .get(handle)
            .map_or(CallbackId::NONE, |entry| entry.event_callback(event))
    }

    /// 为设备创建一个新的事件出口，供外部驱动上下文使用
    pub fn event_sink(&self, handle: DeviceHandle) -> Option<EventSink> {
        self.devices
            .contains(handle)
            .then(|| EventSink::new(handle, self.events_tx.clone()))
    }

    /// 申请设备实例并登记到设备表
    pub fn open(&mut self, type_name: &str, instance: u32) -> BridgeResult<DeviceHandle> {
        let driver = self
            .host
            .request(type_name, instance)
            .ok_or(BridgeError::NoSuchDevice)?;
        let Some(handle) = self.devices.insert(driver) else {
            tracing::warn!(target: "bridge", "device table full, cannot open {}", type_name);
            return Err(BridgeError::ResourceExhausted("device table"));
        };
        let sink = EventSink::new(handle, self.events_tx.clone());
        if let Some(entry) = self.devices.get_mut(handle) {
            entry.driver.attach(sink);
        }
        tracing::info!(target: "bridge", "opened {}:{} as {}", type_name, instance, handle);
        Ok(handle)
    }

    /// 释放设备的全部回调槽位和挂起查询，然后把设备交还驱动宿主
    pub fn close(&mut self, handle: DeviceHandle) -> BridgeResult<()> {
        let entry = self.devices.remove(handle).ok_or(BridgeError::NoSuchDevice)?;
        for id in entry.events {
            self.registry.release(id);
        }
        let registry = &mut self.registry;
        self.pending.retain(|_, query| {
            if query.device != handle {
                return true;
            }
            registry.release(query.callback);
            false
        });
        tracing::info!(target: "bridge", "closed {}", handle);
        self.host.release(entry.driver)?;
        Ok(())
    }

    /// 为设备的某个事件类别设置回调
    ///
    /// 已有回调时在同一槽位上原地替换，每个 (设备, 事件) 至多一个活动回调。
    pub fn listen_event(
        &mut self,
        handle: DeviceHandle,
        event: EventCategory,
        callback: ScriptFunction,
    ) -> BridgeResult<CallbackId> {
        let entry = self
            .devices
            .get_mut(handle)
            .ok_or(BridgeError::NoSuchDevice)?;
        let current = entry.events[event.index()];
        if self.registry.get(current).is_some() {
            self.registry.replace(current, callback)?;
            return Ok(current);
        }
        let id = self.registry.create(callback)?;
        entry.events[event.index()] = id;
        tracing::debug!(target: "bridge", "{} listening on '{}'", handle, event.name());
        Ok(id)
    }

    /// 清除事件回调，没有注册时是无操作
    pub fn ignore_event(&mut self, handle: DeviceHandle, event: EventCategory) -> BridgeResult<()> {
        let entry = self
            .devices
            .get_mut(handle)
            .ok_or(BridgeError::NoSuchDevice)?;
        let id = std::mem::take(&mut entry.events[event.index()]);
        self.registry.release(id);
        Ok(())
    }

    /// 发起查询，可选的回调在响应到达时调用一次
    pub fn start_query(
        &mut self,
        handle: DeviceHandle,
        payload: Option<Vec<u8>>,
        want: usize,
        callback: Option<ScriptFunction>,
    ) -> BridgeResult<QueryToken> {
        if !self.devices.contains(handle) {
            return Err(BridgeError::NoSuchDevice);
        }
        let callback = match callback {
            Some(f) => self.registry.create(f)?,
            None => CallbackId::NONE,
        };
        let token = QueryToken(self.next_token);
        self.next_token += 1;

        let entry = self
            .devices
            .get_mut(handle)
            .ok_or(BridgeError::NoSuchDevice)?;
        if let Err(err) = entry.driver.query(payload, want, token) {
            self.registry.release(callback);
            return Err(err.into());
        }
        self.pending.insert(
            token,
            PendingQuery {
                device: handle,
                callback,
            },
        );
        Ok(token)
    }

    /// 驱动宿主声明的设备类型
    pub fn device_list(&self) -> Vec<DeviceDescriptor> {
        self.host.descriptors()
    }

    /// 设备类型表，供控制台输出
    pub fn format_device_list(&self) -> String {
        let mut out = format!("{:>8}{:>6}{:>6}\n", "DEVICE", "CONF", "INST");
        for desc in self.device_list() {
            let _ = writeln!(out, "{:>8}{:>6}{:>6}", desc.name, desc.conf_num(), desc.inst_max);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::SimHost;

    fn bridge() -> DeviceBridge {
        DeviceBridge::with_defaults(Box::new(SimHost::new()))
    }

    fn noop() -> ScriptFunction {
        ScriptFunction::new(|_| {})
    }

    #[test]
    fn test_open_unknown_device() {
        let mut bridge = bridge();
        assert_eq!(bridge.open("lcd", 0), Err(BridgeError::NoSuchDevice));
        assert_eq!(bridge.device_count(), 0);
    }

    #[test]
    fn test_listen_replaces_in_place() {
        let mut bridge = bridge();
        let uart = bridge.open("uart", 0).unwrap();

        let first = bridge.listen_event(uart, EventCategory::Data, noop()).unwrap();
        let second = bridge.listen_event(uart, EventCategory::Data, noop()).unwrap();

        assert_eq!(first, second);
        assert_eq!(bridge.registry().active(), 1);
        assert_eq!(bridge.registry().refcount(first), 1);
    }

    #[test]
    fn test_slots_are_distinct_per_event_and_device() {
        let mut bridge = bridge();
        let a = bridge.open("uart", 0).unwrap();
        let b = bridge.open("uart", 1).unwrap();

        let ids = [
            bridge.listen_event(a, EventCategory::Data, noop()).unwrap(),
            bridge.listen_event(a, EventCategory::Error, noop()).unwrap(),
            bridge.listen_event(b, EventCategory::Data, noop()).unwrap(),
        ];

        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[0], ids[2]);
        assert_ne!(ids[1], ids[2]);
    }

    #[test]
    fn test_close_releases_everything() {
        let mut bridge = bridge();
        let uart = bridge.open("uart", 0).unwrap();
        bridge.listen_event(uart, EventCategory::Data, noop()).unwrap();
        bridge.listen_event(uart, EventCategory::Drain, noop()).unwrap();
        bridge.start_query(uart, None, 1, Some(noop())).unwrap();
        assert_eq!(bridge.registry().active(), 3);

        bridge.close(uart).unwrap();

        assert_eq!(bridge.registry().active(), 0);
        assert_eq!(bridge.pending_queries(), 0);
        assert!(!bridge.is_live(uart));
        assert_eq!(bridge.close(uart), Err(BridgeError::NoSuchDevice));
    }

    #[test]
    fn test_failed_query_releases_slot() {
        let mut bridge = bridge();
        let adc = bridge.open("adc", 0).unwrap();

        let err = bridge.start_query(adc, None, 0, Some(noop())).unwrap_err();

        assert_eq!(err, BridgeError::Driver(crate::core::error::DriverError::Unsupported));
        assert_eq!(bridge.registry().active(), 0);
        assert_eq!(bridge.pending_queries(), 0);
    }

    #[test]
    fn test_device_list_format() {
        let listing = bridge().format_device_list();
        assert!(listing.starts_with("  DEVICE  CONF  INST"));
        assert!(listing.contains("    uart     4     2"));
    }
}
