//! 内存模拟驱动
//!
//! 提供一组不依赖硬件的设备实现，用于测试和演示程序：
//! - `adc`: 聚合设备，8 个通道，不支持组合读取
//! - `gpio`: 聚合设备，4 个引脚，支持组合读取 (按位打包)
//! - `uart`: 流设备，回环模式，支持预读和查询 (回显请求)
//! - `flash`: 块设备，写入的数据在预读时重新出现在接收缓冲区
//!
//! 每个实例的状态保存在 [`SimHandle`] 中，测试通过 [`SimMonitor`]
//! 在设备交给桥接层之后继续观察和驱动它。

use super::{
    event_code, DeviceCategory, DeviceDescriptor, DeviceDriver, DriverHost, EventSink,
    PropertyDesc, PropertyKind, PropertyValue, QueryToken,
};
use crate::core::error::{DriverError, DriverResult};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

pub type SimHandle = Rc<RefCell<SimState>>;

type DeviceKey = (String, u32);

/// 模拟查询
#[derive(Debug, Clone, PartialEq)]
pub struct SimQuery {
    pub request: Option<Vec<u8>>,
    pub want: usize,
    pub token: QueryToken,
}

/// 模拟设备状态
#[derive(Debug, Default)]
pub struct SimState {
    pub enabled: bool,
    /// 聚合设备的元素
    pub values: Vec<u32>,
    /// 是否支持组合读取
    pub combined: bool,
    pub props: HashMap<String, PropertyValue>,
    /// 已缓冲、可立即读取的字节
    pub rx: VecDeque<u8>,
    /// 尚未到达的字节，预读时搬入 `rx`
    pub wire: VecDeque<u8>,
    /// 已写出的字节
    pub tx: Vec<u8>,
    /// 写入的数据回环到 `rx`
    pub loopback: bool,
    pub read_ahead_requests: Vec<usize>,
    pub read_calls: usize,
    pub write_calls: usize,
    pub set_calls: Vec<(i32, u32)>,
    pub queries: Vec<SimQuery>,
    pub fail_enable: Option<DriverError>,
    pub fail_read: Option<DriverError>,
    pub fail_query: Option<DriverError>,
    pub error: i32,
    pub released: bool,
    sink: Option<EventSink>,
}

impl SimState {
    pub fn sink(&self) -> Option<EventSink> {
        self.sink.clone()
    }

    /// 从驱动上下文投递事件
    pub fn raise(&self, code: u8) -> bool {
        self.sink.as_ref().is_some_and(|sink| sink.raise(code))
    }

    /// 模拟数据到达：写入接收缓冲区并触发 `data` 事件
    pub fn receive(&mut self, bytes: &[u8]) -> bool {
        self.rx.extend(bytes.iter().copied());
        self.raise(event_code::DATA)
    }

    /// 模拟硬件故障：记录错误码并触发 `error` 事件
    pub fn fault(&mut self, code: i32) -> bool {
        self.error = code;
        self.raise(event_code::ERROR)
    }

    /// 以回显方式完成全部挂起的查询，返回完成数量
    pub fn complete_queries(&mut self) -> usize {
        let Some(sink) = self.sink.clone() else {
            return 0;
        };
        let queries: Vec<SimQuery> = self.queries.drain(..).collect();
        for query in &queries {
            let mut response = query.request.clone().unwrap_or_default();
            if query.want > 0 {
                response.resize(query.want, 0);
            }
            sink.respond(query.token, 0, Some(response));
        }
        queries.len()
    }
}

/// 模拟驱动实例
pub struct SimDriver {
    desc: DeviceDescriptor,
    instance: u32,
    state: SimHandle,
}

impl SimDriver {
    pub fn new(desc: DeviceDescriptor, instance: u32, state: SimHandle) -> Self {
        Self {
            desc,
            instance,
            state,
        }
    }

    fn byte_oriented(&self) -> DriverResult<()> {
        if self.desc.category.is_byte_oriented() {
            Ok(())
        } else {
            Err(DriverError::Unsupported)
        }
    }
}

impl DeviceDriver for SimDriver {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.desc
    }

    fn instance(&self) -> u32 {
        self.instance
    }

    fn attach(&mut self, sink: EventSink) {
        self.state.borrow_mut().sink = Some(sink);
    }

    fn error_code(&self) -> i32 {
        self.state.borrow().error
    }

    fn enable(&mut self) -> DriverResult<()> {
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.fail_enable.take() {
            state.error = err.code();
            return Err(err);
        }
        state.enabled = true;
        Ok(())
    }

    fn disable(&mut self) -> DriverResult<()> {
        self.state.borrow_mut().enabled = false;
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.state.borrow().enabled
    }

    fn size(&self) -> Option<usize> {
        match self.desc.category {
            DeviceCategory::Map => Some(self.state.borrow().values.len()),
            _ => None,
        }
    }

    fn get(&mut self, offset: i32) -> DriverResult<Option<u32>> {
        if self.desc.category != DeviceCategory::Map {
            return Err(DriverError::Unsupported);
        }
        let state = self.state.borrow();
        if offset < 0 {
            if !state.combined {
                return Ok(None);
            }
            let packed = state
                .values
                .iter()
                .enumerate()
                .filter(|(_, v)| **v != 0)
                .fold(0u32, |acc, (i, _)| acc | (1 << i));
            return Ok(Some(packed));
        }
        Ok(state.values.get(offset as usize).copied())
    }

    fn set(&mut self, offset: i32, value: u32) -> DriverResult<usize> {
        if self.desc.category != DeviceCategory::Map {
            return Err(DriverError::Unsupported);
        }
        let mut state = self.state.borrow_mut();
        state.set_calls.push((offset, value));
        if offset == -1 {
            state.values.iter_mut().for_each(|v| *v = value);
            return Ok(state.values.len());
        }
        if offset < 0 {
            return Err(DriverError::Invalid);
        }
        match state.values.get_mut(offset as usize) {
            Some(slot) => {
                *slot = value;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn cached_bytes(&self) -> DriverResult<usize> {
        self.byte_oriented()?;
        Ok(self.state.borrow().rx.len())
    }

    fn read(&mut self, dest: &mut [u8]) -> DriverResult<usize> {
        self.byte_oriented()?;
        let mut state = self.state.borrow_mut();
        state.read_calls += 1;
        if let Some(err) = state.fail_read.take() {
            return Err(err);
        }
        let n = dest.len().min(state.rx.len());
        for (slot, byte) in dest.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn read_ahead(&mut self, n: usize) -> DriverResult<()> {
        self.byte_oriented()?;
        let mut state = self.state.borrow_mut();
        state.read_ahead_requests.push(n);
        let available = n.min(state.wire.len());
        let arrived: Vec<u8> = state.wire.drain(..available).collect();
        state.rx.extend(arrived);
        Ok(())
    }

    fn write(&mut self, src: &[u8]) -> DriverResult<usize> {
        self.byte_oriented()?;
        let mut state = self.state.borrow_mut();
        state.write_calls += 1;
        state.tx.extend_from_slice(src);
        if self.desc.category == DeviceCategory::Block {
            state.wire.extend(src.iter().copied());
        }
        if state.loopback {
            state.rx.extend(src.iter().copied());
            state.raise(event_code::DATA);
        }
        state.raise(event_code::DRAIN);
        Ok(src.len())
    }

    fn config_get(&self, key: &str) -> Option<PropertyValue> {
        self.desc.property(key)?;
        self.state.borrow().props.get(key).cloned()
    }

    fn config_set(&mut self, key: &str, value: PropertyValue, position: usize) -> DriverResult<()> {
        let kind = self.desc.property(key).ok_or(DriverError::Invalid)?.kind;
        let mut state = self.state.borrow_mut();
        let stored = match (kind, value) {
            (PropertyKind::Int, PropertyValue::Int(v)) => PropertyValue::Int(v),
            (PropertyKind::Str, PropertyValue::Str(s)) => PropertyValue::Str(s),
            (PropertyKind::Str, PropertyValue::Int(v)) => PropertyValue::Str(v.to_string()),
            (PropertyKind::IntList, PropertyValue::Int(v)) if v >= 0 => {
                let mut list = match state.props.get(key) {
                    Some(PropertyValue::List(list)) if position > 0 => list.clone(),
                    _ => Vec::new(),
                };
                list.push(v);
                PropertyValue::List(list)
            }
            _ => return Err(DriverError::Invalid),
        };
        state.props.insert(key.to_string(), stored);
        Ok(())
    }

    fn query(
        &mut self,
        request: Option<Vec<u8>>,
        want: usize,
        token: QueryToken,
    ) -> DriverResult<()> {
        if self.desc.category != DeviceCategory::Stream {
            return Err(DriverError::Unsupported);
        }
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.fail_query.take() {
            return Err(err);
        }
        state.queries.push(SimQuery {
            request,
            want,
            token,
        });
        Ok(())
    }
}

/// 对模拟设备状态的只读入口
#[derive(Clone, Default)]
pub struct SimMonitor {
    devices: Rc<RefCell<HashMap<DeviceKey, SimHandle>>>,
}

impl SimMonitor {
    pub fn state(&self, name: &str, instance: u32) -> Option<SimHandle> {
        self.devices
            .borrow()
            .get(&(name.to_string(), instance))
            .cloned()
    }
}

/// 模拟驱动宿主
pub struct SimHost {
    descriptors: Vec<DeviceDescriptor>,
    monitor: SimMonitor,
    in_use: HashSet<DeviceKey>,
}

impl Default for SimHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHost {
    /// 创建包含标准设备集合的宿主
    pub fn new() -> Self {
        Self::with_descriptors(standard_descriptors())
    }

    pub fn with_descriptors(descriptors: Vec<DeviceDescriptor>) -> Self {
        Self {
            descriptors,
            monitor: SimMonitor::default(),
            in_use: HashSet::new(),
        }
    }

    pub fn monitor(&self) -> SimMonitor {
        self.monitor.clone()
    }

    fn initial_state(desc: &DeviceDescriptor) -> SimState {
        let mut state = SimState::default();
        match desc.name.as_str() {
            "adc" => {
                state.values = vec![0; 8];
                state
                    .props
                    .insert("mode".to_string(), PropertyValue::Str("single".to_string()));
            }
            "gpio" => {
                state.values = vec![0; 4];
                state.combined = true;
            }
            "uart" => {
                state.loopback = true;
                state
                    .props
                    .insert("baudrate".to_string(), PropertyValue::Int(9600));
                state
                    .props
                    .insert("parity".to_string(), PropertyValue::Str("none".to_string()));
            }
            _ => {}
        }
        state
    }
}

impl DriverHost for SimHost {
    fn descriptors(&self) -> Vec<DeviceDescriptor> {
        self.descriptors.clone()
    }

    fn request(&mut self, type_name: &str, instance: u32) -> Option<Box<dyn DeviceDriver>> {
        let desc = self.descriptors.iter().find(|d| d.name == type_name)?.clone();
        if instance >= desc.inst_max {
            return None;
        }
        let key = (desc.name.clone(), instance);
        if !self.in_use.insert(key.clone()) {
            return None;
        }

        let state = Rc::new(RefCell::new(Self::initial_state(&desc)));
        self.monitor
            .devices
            .borrow_mut()
            .insert(key, Rc::clone(&state));
        tracing::debug!(target: "driver", "sim device {}:{} requested", desc.name, instance);
        Some(Box::new(SimDriver::new(desc, instance, state)))
    }

    fn release(&mut self, driver: Box<dyn DeviceDriver>) -> DriverResult<()> {
        let key = (driver.descriptor().name.clone(), driver.instance());
        if !self.in_use.remove(&key) {
            return Err(DriverError::Invalid);
        }
        if let Some(state) = self.monitor.state(&key.0, key.1) {
            let mut state = state.borrow_mut();
            state.released = true;
            state.enabled = false;
            state.sink = None;
        }
        tracing::debug!(target: "driver", "sim device {}:{} released", key.0, key.1);
        Ok(())
    }
}

/// 标准模拟设备集合
pub fn standard_descriptors() -> Vec<DeviceDescriptor> {
    vec![
        DeviceDescriptor {
            name: "adc".to_string(),
            category: DeviceCategory::Map,
            properties: vec![
                PropertyDesc::new("channel", PropertyKind::IntList),
                PropertyDesc::new("threshold", PropertyKind::Int),
                PropertyDesc::new("mode", PropertyKind::Str),
            ],
            inst_max: 1,
        },
        DeviceDescriptor {
            name: "gpio".to_string(),
            category: DeviceCategory::Map,
            properties: vec![
                PropertyDesc::new("pin", PropertyKind::IntList),
                PropertyDesc::new("dir", PropertyKind::Str),
            ],
            inst_max: 4,
        },
        DeviceDescriptor {
            name: "uart".to_string(),
            category: DeviceCategory::Stream,
            properties: vec![
                PropertyDesc::new("baudrate", PropertyKind::Int),
                PropertyDesc::new("databits", PropertyKind::Int),
                PropertyDesc::new("parity", PropertyKind::Str),
                PropertyDesc::new("stopbits", PropertyKind::Int),
            ],
            inst_max: 2,
        },
        DeviceDescriptor {
            name: "flash".to_string(),
            category: DeviceCategory::Block,
            properties: vec![PropertyDesc::new("sector", PropertyKind::Int)],
            inst_max: 1,
        },
    ]
}
