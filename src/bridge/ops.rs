//! 操作门面
//!
//! 脚本调用的统一入口。每个操作接收未类型化的参数列表，第一个参数是设备句柄，
//! 返回一个确定的脚本值：
//! - 句柄无效时返回 `undefined` 或 `false` (各操作固定其一)
//! - 参数错误、使能冲突以布尔失败报告给调用者，从不抛出
//! - 带回调的异步操作只通过回调报告完成或失败

use super::buffer::{clamp_write, BufferManager};
use super::{marshal, DeviceBridge, EventCategory};
use crate::core::error::{BridgeError, BridgeResult, DriverError};
use crate::driver::DeviceDriver;
use crate::value::{DeviceHandle, ScriptFunction, ScriptValue};

/// 设备操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Enable,
    Disable,
    IsEnabled,
    Get,
    Set,
    Read,
    Write,
    Query,
    Config,
    Listen,
    Ignore,
    Destroy,
}

impl Operation {
    pub const ALL: [Operation; 12] = [
        Operation::Enable,
        Operation::Disable,
        Operation::IsEnabled,
        Operation::Get,
        Operation::Set,
        Operation::Read,
        Operation::Write,
        Operation::Query,
        Operation::Config,
        Operation::Listen,
        Operation::Ignore,
        Operation::Destroy,
    ];

    /// 脚本侧的属性名
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Enable => "enable",
            Operation::Disable => "disable",
            Operation::IsEnabled => "isEnabled",
            Operation::Get => "get",
            Operation::Set => "set",
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Query => "query",
            Operation::Config => "config",
            Operation::Listen => "listen",
            Operation::Ignore => "ignore",
            Operation::Destroy => "destroy",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }
}

/// 聚合读取：优先组合读取，不支持时逐个偏移读取，读不到的位置填 `undefined`
pub(crate) fn aggregate_value(driver: &mut dyn DeviceDriver) -> ScriptValue {
    match driver.get(-1) {
        Ok(Some(value)) => return ScriptValue::from(value),
        Ok(None) | Err(DriverError::Unsupported) => {}
        Err(_) => return ScriptValue::Undefined,
    }
    let Some(size) = driver.size() else {
        return ScriptValue::Undefined;
    };
    let values = (0..size)
        .map(|offset| match driver.get(offset as i32) {
            Ok(Some(value)) => ScriptValue::from(value),
            _ => ScriptValue::Undefined,
        })
        .collect();
    ScriptValue::Array(values)
}

fn event_from_value(value: &ScriptValue) -> Option<EventCategory> {
    match value {
        ScriptValue::String(name) => EventCategory::from_name(name),
        ScriptValue::Number(_) => {
            let index = u8::try_from(value.as_integer()?).ok()?;
            EventCategory::from_code(index)
        }
        _ => None,
    }
}

fn clamp_offset(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

impl DeviceBridge {
    /// 校验首个参数是存活的设备句柄，返回句柄和剩余参数
    fn take_device<'a>(&self, args: &'a [ScriptValue]) -> Option<(DeviceHandle, &'a [ScriptValue])> {
        let (first, rest) = args.split_first()?;
        let handle = first.as_device()?;
        self.devices.contains(handle).then_some((handle, rest))
    }

    fn driver_mut(&mut self, handle: DeviceHandle) -> BridgeResult<&mut dyn DeviceDriver> {
        let entry = self
            .devices
            .get_mut(handle)
            .ok_or(BridgeError::NoSuchDevice)?;
        let driver: &mut dyn DeviceDriver = entry.driver.as_mut();
        Ok(driver)
    }

    /// 按操作名分发
    pub fn call(&mut self, op: Operation, args: &[ScriptValue]) -> ScriptValue {
        match op {
            Operation::Enable => self.enable(args),
            Operation::Disable => self.disable(args),
            Operation::IsEnabled => self.is_enabled(args),
            Operation::Get => self.get(args),
            Operation::Set => self.set(args),
            Operation::Read => self.read(args),
            Operation::Write => self.write(args),
            Operation::Query => self.query(args),
            Operation::Config => self.config(args),
            Operation::Listen => self.listen(args),
            Operation::Ignore => self.ignore(args),
            Operation::Destroy => self.destroy(args),
        }
    }

    /// `createDevice(typeName, [instance])`
    pub fn create_device(&mut self, args: &[ScriptValue]) -> ScriptValue {
        let Some(type_name) = args.first().and_then(ScriptValue::as_str) else {
            return ScriptValue::Undefined;
        };
        let instance = match args.get(1) {
            Some(v) if v.is_number() => match v.as_integer().and_then(|n| u32::try_from(n).ok()) {
                Some(instance) => instance,
                None => return ScriptValue::Undefined,
            },
            _ => 0,
        };
        match self.open(type_name, instance) {
            Ok(handle) => ScriptValue::Device(handle),
            Err(err) => {
                tracing::debug!(target: "bridge", "createDevice({}, {}) failed: {}", type_name, instance, err);
                ScriptValue::Undefined
            }
        }
    }

    /// 整体写入配置；设备已使能时拒绝
    pub fn configure_all(&mut self, handle: DeviceHandle, settings: &ScriptValue) -> BridgeResult<()> {
        let driver = self.driver_mut(handle)?;
        if driver.is_enabled() {
            return Err(BridgeError::AlreadyEnabled);
        }
        marshal::setup(driver, settings)
    }

    /// 写入单个配置项；设备已使能时拒绝
    pub fn configure_one(
        &mut self,
        handle: DeviceHandle,
        which: &ScriptValue,
        value: &ScriptValue,
    ) -> BridgeResult<()> {
        let driver = self.driver_mut(handle)?;
        if driver.is_enabled() {
            return Err(BridgeError::AlreadyEnabled);
        }
        let key = marshal::resolve_key(driver, which)
            .ok_or_else(|| BridgeError::invalid("unknown configuration key"))?;
        if marshal::set_property(driver, &key, value) {
            Ok(())
        } else {
            Err(BridgeError::invalid(format!("configuration '{}' rejected", key)))
        }
    }

    /// `enable(device, [settings], [callback])`
    pub fn enable(&mut self, args: &[ScriptValue]) -> ScriptValue {
        let Some((handle, rest)) = self.take_device(args) else {
            return ScriptValue::Undefined;
        };
        let settings = rest.first().filter(|v| v.is_object());
        let rest = if settings.is_some() { &rest[1..] } else { rest };
        let mut result = match settings {
            Some(settings) => self.configure_all(handle, settings),
            None => Ok(()),
        };
        if result.is_ok() {
            result = self
                .driver_mut(handle)
                .and_then(|driver| driver.enable().map_err(BridgeError::from));
        }

        if let Some(callback) = rest.first().and_then(ScriptValue::as_function) {
            let status = match &result {
                Ok(()) => ScriptValue::Undefined,
                Err(err) => ScriptValue::number(err.code()),
            };
            callback.call(&[status, args[0].clone()]);
        }
        if let Err(err) = &result {
            tracing::debug!(target: "bridge", "enable {} failed: {}", handle, err);
        }
        ScriptValue::Bool(result.is_ok())
    }

    /// `disable(device)`，返回设备是否处于禁用状态
    pub fn disable(&mut self, args: &[ScriptValue]) -> ScriptValue {
        let Some((handle, _)) = self.take_device(args) else {
            return ScriptValue::Undefined;
        };
        let Ok(driver) = self.driver_mut(handle) else {
            return ScriptValue::Undefined;
        };
        if let Err(err) = driver.disable() {
            tracing::debug!(target: "bridge", "disable {} failed: {}", handle, err);
        }
        ScriptValue::Bool(!driver.is_enabled())
    }

    /// `isEnabled(device)`
    pub fn is_enabled(&mut self, args: &[ScriptValue]) -> ScriptValue {
        let Some((handle, _)) = self.take_device(args) else {
            return ScriptValue::Undefined;
        };
        self.driver_mut(handle)
            .map_or(ScriptValue::Undefined, |driver| ScriptValue::Bool(driver.is_enabled()))
    }

    /// `get(device, [offset])`
    pub fn get(&mut self, args: &[ScriptValue]) -> ScriptValue {
        let Some((handle, rest)) = self.take_device(args) else {
            return ScriptValue::Undefined;
        };
        let offset = rest.first().and_then(ScriptValue::as_integer).unwrap_or(-1);
        self.elem(handle, offset)
    }

    /// 元素读取，负偏移为聚合读取
    pub fn elem(&mut self, handle: DeviceHandle, offset: i64) -> ScriptValue {
        let Ok(driver) = self.driver_mut(handle) else {
            return ScriptValue::Undefined;
        };
        if offset < 0 {
            return aggregate_value(driver);
        }
        match driver.get(clamp_offset(offset)) {
            Ok(Some(value)) => ScriptValue::from(value),
            _ => ScriptValue::Undefined,
        }
    }

    /// 元素写入，成功时返回写入的值
    pub fn set_elem(&mut self, handle: DeviceHandle, offset: i64, value: &ScriptValue) -> ScriptValue {
        let Some(n) = value.as_integer() else {
            return ScriptValue::Undefined;
        };
        let Ok(driver) = self.driver_mut(handle) else {
            return ScriptValue::Undefined;
        };
        match driver.set(clamp_offset(offset), n as u32) {
            Ok(count) if count > 0 => value.clone(),
            _ => ScriptValue::Undefined,
        }
    }

    /// `set(device, [offset], value)`
    pub fn set(&mut self, args: &[ScriptValue]) -> ScriptValue {
        let Some((handle, rest)) = self.take_device(args) else {
            return ScriptValue::Bool(false);
        };
        let (offset, value) = match rest {
            [] => return ScriptValue::Bool(true),
            [value] => match value.as_integer() {
                Some(value) => (-1, value),
                None => return ScriptValue::Bool(false),
            },
            [offset, value, ..] => match (offset.as_integer(), value.as_integer()) {
                (Some(offset), Some(value)) => (offset, value),
                _ => return ScriptValue::Bool(false),
            },
        };
        let Ok(driver) = self.driver_mut(handle) else {
            return ScriptValue::Bool(false);
        };
        let applied = driver.set(clamp_offset(offset), value as u32).unwrap_or(0);
        ScriptValue::Bool(applied > 0)
    }

    /// `read(device, [want], callback)`
    ///
    /// 缺省的 `want` 是已缓冲的字节数；缓冲不足时先为差额发出一次预读请求。
    pub fn read(&mut self, args: &[ScriptValue]) -> ScriptValue {
        let Some((handle, rest)) = self.take_device(args) else {
            return ScriptValue::Bool(false);
        };
        let Some(entry) = self.devices.get_mut(handle) else {
            return ScriptValue::Bool(false);
        };
        let cached = entry.driver.cached_bytes().unwrap_or(0);
        let (want, rest) = match rest.split_first() {
            Some((n, tail)) if n.is_number() => (n.as_integer().unwrap_or(0).max(0) as usize, tail),
            _ => (cached, rest),
        };
        let Some(callback) = rest.first().and_then(ScriptValue::as_function) else {
            return ScriptValue::Bool(false);
        };
        if want == 0 {
            return ScriptValue::Bool(true);
        }

        if want > cached {
            if let Err(err) = entry.driver.read_ahead(want - cached) {
                tracing::debug!(target: "bridge", "read-ahead on {} failed: {}", handle, err);
            }
        }
        match self.buffers.deliver_read_result(entry.driver.as_mut(), want) {
            Ok(ScriptValue::Buffer(data)) if data.is_empty() => {}
            Ok(data) => callback.call(&[ScriptValue::Undefined, data]),
            Err(err) => callback.call_error(err.code()),
        }
        ScriptValue::Bool(true)
    }

    /// `write(device, data, [offset], [count], [callback])`
    pub fn write(&mut self, args: &[ScriptValue]) -> ScriptValue {
        let Some((handle, rest)) = self.take_device(args) else {
            return ScriptValue::Bool(false);
        };
        let callback = rest.last().and_then(ScriptValue::as_function);
        match self.write_region(handle, rest) {
            Ok((data, written)) => {
                if let Some(callback) = callback {
                    callback.call(&[ScriptValue::Undefined, data.clone(), ScriptValue::from(written)]);
                }
                ScriptValue::Bool(true)
            }
            Err(err) => {
                if let Some(callback) = callback {
                    callback.call_error(err.code());
                }
                ScriptValue::Bool(false)
            }
        }
    }

    /// 解析写入参数并执行写入，返回原始数据参数和写入字节数
    ///
    /// 驱动写入失败时字节数为驱动的负错误码。
    fn write_region<'a>(
        &mut self,
        handle: DeviceHandle,
        args: &'a [ScriptValue],
    ) -> BridgeResult<(&'a ScriptValue, i32)> {
        let (data, rest) = args
            .split_first()
            .ok_or_else(|| BridgeError::invalid("write requires data"))?;
        let region = BufferManager::resolve_write_region(data)?;
        let (offset, count) = match rest {
            [a, b, ..] if a.is_number() && b.is_number() => {
                (a.as_integer().unwrap_or(0), b.as_integer().unwrap_or(0))
            }
            [n, ..] if n.is_number() => (0, n.as_integer().unwrap_or(0)),
            _ => (0, region.len() as i64),
        };
        let range = clamp_write(region.len(), offset, count)?;
        if range.is_empty() {
            return Ok((data, 0));
        }
        let driver = self.driver_mut(handle)?;
        let written = match driver.write(&region[range]) {
            Ok(n) => i32::try_from(n).unwrap_or(i32::MAX),
            Err(err) => err.code(),
        };
        Ok((data, written))
    }

    /// `query(device, [request | ...bytes], [want], [callback])`
    pub fn query(&mut self, args: &[ScriptValue]) -> ScriptValue {
        let Some((handle, rest)) = self.take_device(args) else {
            return ScriptValue::Undefined;
        };
        let request = match self.buffers.build_query_request(rest) {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(target: "bridge", "query on {} rejected: {}", handle, err);
                return ScriptValue::Bool(false);
            }
        };
        let callback = rest
            .get(request.consumed)
            .and_then(ScriptValue::as_function)
            .cloned();
        match self.start_query(handle, request.payload, request.want, callback) {
            Ok(_) => ScriptValue::Bool(true),
            Err(err) => {
                tracing::debug!(target: "bridge", "query on {} not started: {}", handle, err);
                ScriptValue::Bool(false)
            }
        }
    }

    /// `config(device, [key | index], [value])`
    ///
    /// 四种模式：读全部、读单项、写全部、写单项。写操作要求设备处于禁用状态。
    pub fn config(&mut self, args: &[ScriptValue]) -> ScriptValue {
        let Some((handle, rest)) = self.take_device(args) else {
            return ScriptValue::Undefined;
        };
        let (which, rest) = match rest.split_first() {
            Some((which, tail)) if which.is_number() || which.is_string() => (Some(which), tail),
            _ => (None, rest),
        };
        let result = match (which, rest.first()) {
            (Some(which), Some(value)) => self.configure_one(handle, which, value),
            (None, Some(settings)) => self.configure_all(handle, settings),
            (Some(which), None) => {
                let Ok(driver) = self.driver_mut(handle) else {
                    return ScriptValue::Undefined;
                };
                return marshal::resolve_key(driver, which)
                    .map_or(ScriptValue::Undefined, |key| {
                        marshal::get_property(driver, &key)
                    });
            }
            (None, None) => {
                return self
                    .driver_mut(handle)
                    .map_or(ScriptValue::Undefined, |driver| marshal::get_all(driver));
            }
        };
        if let Err(err) = &result {
            tracing::debug!(target: "bridge", "config on {} failed: {}", handle, err);
        }
        ScriptValue::Bool(result.is_ok())
    }

    /// `listen(device, event, callback)`
    pub fn listen(&mut self, args: &[ScriptValue]) -> ScriptValue {
        if args.len() < 3 {
            return ScriptValue::Bool(false);
        }
        let Some((handle, rest)) = self.take_device(args) else {
            return ScriptValue::Bool(false);
        };
        let (Some(event), Some(callback)) = (
            event_from_value(&rest[0]),
            rest[1].as_function().cloned(),
        ) else {
            return ScriptValue::Bool(false);
        };
        ScriptValue::Bool(self.listen_event(handle, event, callback).is_ok())
    }

    /// `ignore(device, event)`
    pub fn ignore(&mut self, args: &[ScriptValue]) -> ScriptValue {
        if args.len() < 2 {
            return ScriptValue::Undefined;
        }
        let Some((handle, rest)) = self.take_device(args) else {
            return ScriptValue::Undefined;
        };
        match event_from_value(&rest[0]) {
            Some(event) => ScriptValue::Bool(self.ignore_event(handle, event).is_ok()),
            None => ScriptValue::Bool(false),
        }
    }

    /// `destroy(device)`
    pub fn destroy(&mut self, args: &[ScriptValue]) -> ScriptValue {
        let Some((handle, _)) = self.take_device(args) else {
            return ScriptValue::Bool(false);
        };
        match self.close(handle) {
            Ok(()) => ScriptValue::Bool(true),
            Err(err) => {
                tracing::warn!(target: "bridge", "destroy {} failed: {}", handle, err);
                ScriptValue::Bool(false)
            }
        }
    }

    /// 设备的只读属性：`error`、`instance`、`type`
    pub fn property(&self, handle: DeviceHandle, name: &str) -> ScriptValue {
        let Some(entry) = self.devices.get(handle) else {
            return ScriptValue::Undefined;
        };
        match name {
            "error" => ScriptValue::number(entry.driver.error_code()),
            "instance" => ScriptValue::from(entry.driver.instance()),
            "type" => ScriptValue::from(entry.driver.descriptor().name.as_str()),
            _ => ScriptValue::Undefined,
        }
    }
}

/// 以回调形式包装的便捷构造，供宿主代码直接调用门面
pub fn callback<F>(func: F) -> ScriptValue
where
    F: Fn(&[ScriptValue]) + 'static,
{
    ScriptValue::Function(ScriptFunction::new(func))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::{SimHost, SimMonitor};
    use std::cell::RefCell;
    use std::rc::Rc;

    type Calls = Rc<RefCell<Vec<Vec<ScriptValue>>>>;

    fn setup() -> (DeviceBridge, SimMonitor) {
        let host = SimHost::new();
        let monitor = host.monitor();
        (DeviceBridge::with_defaults(Box::new(host)), monitor)
    }

    fn recorder() -> (ScriptValue, Calls) {
        let calls: Calls = Rc::default();
        let sink = Rc::clone(&calls);
        (callback(move |args| sink.borrow_mut().push(args.to_vec())), calls)
    }

    fn open(bridge: &mut DeviceBridge, name: &str) -> ScriptValue {
        bridge.create_device(&[ScriptValue::from(name)])
    }

    #[test]
    fn test_operation_names() {
        for op in Operation::ALL {
            assert_eq!(Operation::from_name(op.name()), Some(op));
        }
        assert_eq!(Operation::from_name("close"), None);
    }

    #[test]
    fn test_create_device_arguments() {
        let (mut bridge, _) = setup();

        assert!(bridge.create_device(&[]).is_undefined());
        assert!(bridge.create_device(&[ScriptValue::number(1)]).is_undefined());
        assert!(bridge
            .create_device(&[ScriptValue::from("uart"), ScriptValue::number(-1)])
            .is_undefined());
        assert!(bridge
            .create_device(&[ScriptValue::from("uart"), ScriptValue::number(1)])
            .as_device()
            .is_some());
    }

    #[test]
    fn test_invalid_handle_results() {
        let (mut bridge, _) = setup();
        let dev = open(&mut bridge, "adc");
        bridge.destroy(&[dev.clone()]);

        assert!(bridge.enable(&[dev.clone()]).is_undefined());
        assert!(bridge.get(&[dev.clone()]).is_undefined());
        assert_eq!(bridge.set(&[dev.clone(), ScriptValue::number(1)]), ScriptValue::Bool(false));
        assert_eq!(bridge.destroy(&[dev.clone()]), ScriptValue::Bool(false));
        assert!(bridge.config(&[dev]).is_undefined());
    }

    #[test]
    fn test_enable_with_settings_and_callback() {
        let (mut bridge, monitor) = setup();
        let dev = open(&mut bridge, "uart");
        let (cb, calls) = recorder();
        let mut settings = std::collections::HashMap::new();
        settings.insert("baudrate".to_string(), ScriptValue::number(115200));

        let result = bridge.enable(&[dev.clone(), ScriptValue::Object(settings.clone()), cb.clone()]);

        assert_eq!(result, ScriptValue::Bool(true));
        assert_eq!(*calls.borrow(), vec![vec![ScriptValue::Undefined, dev.clone()]]);
        assert!(monitor.state("uart", 0).unwrap().borrow().enabled);

        let again = bridge.enable(&[dev.clone(), ScriptValue::Object(settings), cb]);
        assert_eq!(again, ScriptValue::Bool(false));
        assert_eq!(
            calls.borrow()[1],
            vec![ScriptValue::number(crate::core::error::EALREADY), dev]
        );
    }

    #[test]
    fn test_enable_driver_failure() {
        let (mut bridge, monitor) = setup();
        let dev = open(&mut bridge, "gpio");
        monitor.state("gpio", 0).unwrap().borrow_mut().fail_enable = Some(DriverError::Busy);

        assert_eq!(bridge.enable(&[dev.clone()]), ScriptValue::Bool(false));
        assert_eq!(bridge.is_enabled(&[dev.clone()]), ScriptValue::Bool(false));
        assert_eq!(bridge.enable(&[dev.clone()]), ScriptValue::Bool(true));
        assert_eq!(bridge.disable(&[dev.clone()]), ScriptValue::Bool(true));
        assert_eq!(bridge.is_enabled(&[dev]), ScriptValue::Bool(false));
    }

    #[test]
    fn test_get_and_set() {
        let (mut bridge, monitor) = setup();
        let dev = open(&mut bridge, "adc");
        let state = monitor.state("adc", 0).unwrap();

        assert_eq!(bridge.set(&[dev.clone(), ScriptValue::number(7)]), ScriptValue::Bool(true));
        assert_eq!(
            bridge.set(&[dev.clone(), ScriptValue::number(2), ScriptValue::number(9)]),
            ScriptValue::Bool(true)
        );
        assert_eq!(bridge.get(&[dev.clone(), ScriptValue::number(2)]), ScriptValue::number(9));
        assert_eq!(bridge.get(&[dev.clone(), ScriptValue::number(1)]), ScriptValue::number(7));
        assert!(bridge.get(&[dev.clone(), ScriptValue::number(8)]).is_undefined());

        let ScriptValue::Array(all) = bridge.get(&[dev.clone()]) else {
            panic!("Expected Array");
        };
        assert_eq!(all.len(), 8);
        assert_eq!(all[2], ScriptValue::number(9));
        assert_eq!(state.borrow().set_calls, vec![(-1, 7), (2, 9)]);
    }

    #[test]
    fn test_malformed_set_never_reaches_driver() {
        let (mut bridge, monitor) = setup();
        let dev = open(&mut bridge, "adc");

        assert_eq!(bridge.set(&[dev.clone()]), ScriptValue::Bool(true));
        assert_eq!(bridge.set(&[dev.clone(), ScriptValue::from("x")]), ScriptValue::Bool(false));
        assert_eq!(
            bridge.set(&[dev.clone(), ScriptValue::number(1), ScriptValue::Null]),
            ScriptValue::Bool(false)
        );
        assert!(monitor.state("adc", 0).unwrap().borrow().set_calls.is_empty());
    }

    #[test]
    fn test_elem_access() {
        let (mut bridge, _) = setup();
        let handle = open(&mut bridge, "gpio").as_device().unwrap();

        assert_eq!(bridge.set_elem(handle, 1, &ScriptValue::number(1)), ScriptValue::number(1));
        assert!(bridge.set_elem(handle, 9, &ScriptValue::number(1)).is_undefined());
        assert!(bridge.set_elem(handle, 0, &ScriptValue::from("on")).is_undefined());
        assert_eq!(bridge.elem(handle, 1), ScriptValue::number(1));
        assert_eq!(bridge.elem(handle, -1), ScriptValue::number(2));
    }

    #[test]
    fn test_write_clamps_region() {
        let (mut bridge, monitor) = setup();
        let dev = open(&mut bridge, "uart");
        let (cb, calls) = recorder();
        let data = ScriptValue::Buffer((0u8..10).collect());

        let result = bridge.write(&[
            dev,
            data.clone(),
            ScriptValue::number(8),
            ScriptValue::number(5),
            cb,
        ]);

        assert_eq!(result, ScriptValue::Bool(true));
        assert_eq!(monitor.state("uart", 0).unwrap().borrow().tx, vec![8, 9]);
        assert_eq!(
            *calls.borrow(),
            vec![vec![ScriptValue::Undefined, data, ScriptValue::number(2)]]
        );
    }

    #[test]
    fn test_write_count_only_and_string_data() {
        let (mut bridge, monitor) = setup();
        let dev = open(&mut bridge, "uart");

        bridge.write(&[dev.clone(), ScriptValue::from("hello"), ScriptValue::number(3)]);
        bridge.write(&[dev, ScriptValue::from("!")]);

        assert_eq!(monitor.state("uart", 0).unwrap().borrow().tx, b"hel!".to_vec());
    }

    #[test]
    fn test_write_rejects_negative_before_driver() {
        let (mut bridge, monitor) = setup();
        let dev = open(&mut bridge, "uart");
        let (cb, calls) = recorder();

        let result = bridge.write(&[
            dev.clone(),
            ScriptValue::Buffer(vec![1, 2, 3]),
            ScriptValue::number(-1),
            ScriptValue::number(2),
            cb.clone(),
        ]);
        assert_eq!(result, ScriptValue::Bool(false));
        assert_eq!(bridge.write(&[dev, ScriptValue::number(3), cb]), ScriptValue::Bool(false));

        assert_eq!(monitor.state("uart", 0).unwrap().borrow().write_calls, 0);
        assert_eq!(
            *calls.borrow(),
            vec![
                vec![ScriptValue::number(crate::core::error::EINVAL)],
                vec![ScriptValue::number(crate::core::error::EINVAL)]
            ]
        );
    }

    #[test]
    fn test_read_with_read_ahead() {
        let (mut bridge, monitor) = setup();
        let dev = open(&mut bridge, "uart");
        let state = monitor.state("uart", 0).unwrap();
        state.borrow_mut().rx.extend([1u8, 2, 3, 4, 5]);
        state.borrow_mut().wire.extend(6u8..=25);
        let (cb, calls) = recorder();

        bridge.read(&[dev, ScriptValue::number(20), cb]);

        assert_eq!(state.borrow().read_ahead_requests, vec![15]);
        assert_eq!(
            *calls.borrow(),
            vec![vec![ScriptValue::Undefined, ScriptValue::Buffer((1u8..=20).collect())]]
        );
    }

    #[test]
    fn test_read_defaults_to_cached_and_skips_empty() {
        let (mut bridge, monitor) = setup();
        let dev = open(&mut bridge, "uart");
        let state = monitor.state("uart", 0).unwrap();
        let (cb, calls) = recorder();

        assert_eq!(bridge.read(&[dev.clone(), cb.clone()]), ScriptValue::Bool(true));
        assert_eq!(state.borrow().read_calls, 0);

        state.borrow_mut().rx.extend([7u8, 8]);
        bridge.read(&[dev.clone(), cb.clone()]);
        assert_eq!(bridge.read(&[dev, ScriptValue::number(3)]), ScriptValue::Bool(false));

        assert!(state.borrow().read_ahead_requests.is_empty());
        assert_eq!(
            *calls.borrow(),
            vec![vec![ScriptValue::Undefined, ScriptValue::Buffer(vec![7, 8])]]
        );
    }

    #[test]
    fn test_read_over_budget_reports_out_of_memory() {
        let host = SimHost::new();
        let monitor = host.monitor();
        let mut config = crate::config::BridgeConfig::default();
        config.buffers.max_buffer_bytes = 4;
        let mut bridge = DeviceBridge::new(Box::new(host), &config);
        let dev = open(&mut bridge, "uart");
        monitor.state("uart", 0).unwrap().borrow_mut().rx.extend([0u8; 8]);
        let (cb, calls) = recorder();

        bridge.read(&[dev, ScriptValue::number(8), cb]);

        assert_eq!(
            *calls.borrow(),
            vec![vec![ScriptValue::number(crate::core::error::ENOMEM)]]
        );
        assert_eq!(monitor.state("uart", 0).unwrap().borrow().rx.len(), 8);
    }

    #[test]
    fn test_query_argument_forms() {
        let (mut bridge, monitor) = setup();
        let dev = open(&mut bridge, "uart");
        let (cb, _) = recorder();

        assert_eq!(
            bridge.query(&[
                dev.clone(),
                ScriptValue::number(0xA0),
                ScriptValue::number(0x01),
                ScriptValue::number(4),
                cb.clone()
            ]),
            ScriptValue::Bool(true)
        );
        assert_eq!(bridge.query(&[dev.clone()]), ScriptValue::Bool(true));

        let state = monitor.state("uart", 0).unwrap();
        let queries = state.borrow().queries.clone();
        assert_eq!(queries[0].request, Some(vec![0xA0, 0x01]));
        assert_eq!(queries[0].want, 4);
        assert_eq!(queries[1].request, None);
        assert_eq!(bridge.registry().active(), 1);
        assert_eq!(bridge.pending_queries(), 2);
    }

    #[test]
    fn test_query_slot_exhaustion_never_starts_request() {
        let host = SimHost::new();
        let monitor = host.monitor();
        let mut config = crate::config::BridgeConfig::default();
        config.registry.capacity = 1;
        let mut bridge = DeviceBridge::new(Box::new(host), &config);
        let dev = open(&mut bridge, "uart");
        let (cb, _) = recorder();

        assert_eq!(bridge.query(&[dev.clone(), cb.clone()]), ScriptValue::Bool(true));
        assert_eq!(bridge.query(&[dev, cb]), ScriptValue::Bool(false));
        assert_eq!(monitor.state("uart", 0).unwrap().borrow().queries.len(), 1);
    }

    #[test]
    fn test_config_modes() {
        let (mut bridge, _) = setup();
        let dev = open(&mut bridge, "uart");

        assert_eq!(
            bridge.config(&[dev.clone(), ScriptValue::from("baudrate")]),
            ScriptValue::number(9600)
        );
        assert_eq!(
            bridge.config(&[dev.clone(), ScriptValue::number(2)]),
            ScriptValue::from("none")
        );
        assert_eq!(
            bridge.config(&[dev.clone(), ScriptValue::number(0), ScriptValue::number(57600)]),
            ScriptValue::Bool(true)
        );
        assert_eq!(
            bridge.config(&[dev.clone(), ScriptValue::from("bogus"), ScriptValue::number(1)]),
            ScriptValue::Bool(false)
        );
        let ScriptValue::Object(all) = bridge.config(&[dev.clone()]) else {
            panic!("Expected Object");
        };
        assert_eq!(all.get("baudrate"), Some(&ScriptValue::number(57600)));
        assert!(bridge.config(&[dev, ScriptValue::from("stopbits")]).is_undefined());
    }

    #[test]
    fn test_config_set_is_enable_gated() {
        let (mut bridge, _) = setup();
        let dev = open(&mut bridge, "uart");
        let handle = dev.as_device().unwrap();
        bridge.enable(&[dev.clone()]);

        assert_eq!(
            bridge.configure_one(handle, &ScriptValue::from("databits"), &ScriptValue::number(7)),
            Err(BridgeError::AlreadyEnabled)
        );
        assert_eq!(
            bridge.config(&[dev.clone(), ScriptValue::from("databits"), ScriptValue::number(7)]),
            ScriptValue::Bool(false)
        );
        assert!(bridge.config(&[dev, ScriptValue::from("databits")]).is_undefined());
    }

    #[test]
    fn test_listen_and_ignore_arguments() {
        let (mut bridge, _) = setup();
        let dev = open(&mut bridge, "uart");
        let (cb, _) = recorder();

        assert_eq!(bridge.listen(&[dev.clone(), ScriptValue::from("data")]), ScriptValue::Bool(false));
        assert_eq!(
            bridge.listen(&[dev.clone(), ScriptValue::from("close"), cb.clone()]),
            ScriptValue::Bool(false)
        );
        assert_eq!(
            bridge.listen(&[dev.clone(), ScriptValue::from("data"), ScriptValue::number(1)]),
            ScriptValue::Bool(false)
        );
        assert_eq!(
            bridge.listen(&[dev.clone(), ScriptValue::number(2), cb]),
            ScriptValue::Bool(true)
        );
        assert_eq!(bridge.registry().active(), 1);

        assert!(bridge.ignore(&[dev.clone()]).is_undefined());
        assert_eq!(bridge.ignore(&[dev.clone(), ScriptValue::from("nope")]), ScriptValue::Bool(false));
        assert_eq!(bridge.ignore(&[dev.clone(), ScriptValue::from("drain")]), ScriptValue::Bool(true));
        assert_eq!(bridge.registry().active(), 0);
        assert_eq!(bridge.ignore(&[dev, ScriptValue::from("drain")]), ScriptValue::Bool(true));
    }

    #[test]
    fn test_properties() {
        let (mut bridge, monitor) = setup();
        let handle = bridge
            .create_device(&[ScriptValue::from("uart"), ScriptValue::number(1)])
            .as_device()
            .unwrap();
        monitor.state("uart", 1).unwrap().borrow_mut().error = -3;

        assert_eq!(bridge.property(handle, "type"), ScriptValue::from("uart"));
        assert_eq!(bridge.property(handle, "instance"), ScriptValue::number(1));
        assert_eq!(bridge.property(handle, "error"), ScriptValue::number(-3));
        assert!(bridge.property(handle, "color").is_undefined());
    }

    #[test]
    fn test_call_by_operation() {
        let (mut bridge, _) = setup();
        let dev = open(&mut bridge, "gpio");

        let op = Operation::from_name("isEnabled").unwrap();
        assert_eq!(bridge.call(op, &[dev.clone()]), ScriptValue::Bool(false));
        assert_eq!(bridge.call(Operation::Destroy, &[dev]), ScriptValue::Bool(true));
        assert_eq!(bridge.device_count(), 0);
    }
}
