//! 驱动子系统接口
//!
//! 桥接层只通过这里定义的窄接口消费驱动：
//! - [`DeviceDriver`]: 单个设备实例的原语操作
//! - [`DriverHost`]: 设备的申请、释放与枚举
//! - [`EventSink`]: 驱动持有的唯一回连对象，用于从驱动上下文投递事件
//!
//! 驱动可能运行在中断/轮询上下文中，因此事件不会直接进入回调表，
//! 而是经由 channel 排队，由脚本线程在 [`DeviceBridge::poll_events`]
//! 中统一分发。
//!
//! [`DeviceBridge::poll_events`]: crate::bridge::DeviceBridge::poll_events

use crate::core::error::{DriverError, DriverResult};
use crate::value::DeviceHandle;
use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};

pub mod sim;

/// 设备类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceCategory {
    /// 聚合设备：`data` 事件上报一个组合值
    Map,
    /// 流设备：`data` 事件上报新缓冲的字节
    Stream,
    /// 块设备：与流设备相同的字节语义
    Block,
}

impl DeviceCategory {
    pub fn is_byte_oriented(&self) -> bool {
        matches!(self, DeviceCategory::Stream | DeviceCategory::Block)
    }
}

/// 配置属性的取值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    Int,
    IntList,
    Str,
}

/// 配置属性描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDesc {
    pub name: String,
    pub kind: PropertyKind,
}

impl PropertyDesc {
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// 设备描述符
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub category: DeviceCategory,
    pub properties: Vec<PropertyDesc>,
    /// 实例数上限
    pub inst_max: u32,
}

impl DeviceDescriptor {
    /// 声明的配置属性数量
    pub fn conf_num(&self) -> usize {
        self.properties.len()
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDesc> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn property_name(&self, index: usize) -> Option<&str> {
        self.properties.get(index).map(|p| p.name.as_str())
    }
}

/// 驱动侧的属性值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    Int(i64),
    List(Vec<i64>),
    Str(String),
}

/// 进行中查询的标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryToken(pub(crate) u64);

impl QueryToken {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// 事件码
pub mod event_code {
    pub const ERROR: u8 = 0;
    pub const DATA: u8 = 1;
    pub const DRAIN: u8 = 2;
    pub const READY: u8 = 3;
}

/// 驱动投递给桥接层的消息
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// 设备事件
    Event { device: DeviceHandle, code: u8 },
    /// 查询完成 (`status` 非零表示失败)
    Response {
        device: DeviceHandle,
        token: QueryToken,
        status: i32,
        response: Option<Vec<u8>>,
    },
}

/// 驱动持有的事件出口
///
/// 可以被克隆并移动到其他线程，投递永不阻塞。
#[derive(Debug, Clone)]
pub struct EventSink {
    device: DeviceHandle,
    tx: Sender<DriverEvent>,
}

impl EventSink {
    pub(crate) fn new(device: DeviceHandle, tx: Sender<DriverEvent>) -> Self {
        Self { device, tx }
    }

    pub fn device(&self) -> DeviceHandle {
        self.device
    }

    /// 投递设备事件，队列已满或桥接层已关闭时返回 `false`
    pub fn raise(&self, code: u8) -> bool {
        self.send(DriverEvent::Event {
            device: self.device,
            code,
        })
    }

    /// 投递查询结果
    pub fn respond(&self, token: QueryToken, status: i32, response: Option<Vec<u8>>) -> bool {
        self.send(DriverEvent::Response {
            device: self.device,
            token,
            status,
            response,
        })
    }

    fn send(&self, event: DriverEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::warn!(target: "driver", "event queue full, dropping {:?}", event);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// 设备驱动实例
///
/// 字节 I/O 与查询是可选能力，默认实现返回 [`DriverError::Unsupported`]。
pub trait DeviceDriver {
    fn descriptor(&self) -> &DeviceDescriptor;

    fn instance(&self) -> u32;

    /// 设备句柄创建后调用一次，驱动保存 sink 用于后续事件投递
    fn attach(&mut self, sink: EventSink);

    /// 最近一次错误码
    fn error_code(&self) -> i32;

    fn enable(&mut self) -> DriverResult<()>;

    fn disable(&mut self) -> DriverResult<()>;

    fn is_enabled(&self) -> bool;

    /// 聚合设备的元素数量
    fn size(&self) -> Option<usize> {
        None
    }

    /// 读取元素；`offset < 0` 表示组合读取。`Ok(None)` 表示没有值。
    fn get(&mut self, offset: i32) -> DriverResult<Option<u32>>;

    /// 写入元素；`offset == -1` 表示广播到全部元素。返回受影响的元素数。
    fn set(&mut self, offset: i32, value: u32) -> DriverResult<usize>;

    /// 已缓冲、可立即读取的字节数
    fn cached_bytes(&self) -> DriverResult<usize> {
        Err(DriverError::Unsupported)
    }

    fn read(&mut self, _dest: &mut [u8]) -> DriverResult<usize> {
        Err(DriverError::Unsupported)
    }

    /// 请求驱动预读 `n` 字节
    fn read_ahead(&mut self, _n: usize) -> DriverResult<()> {
        Err(DriverError::Unsupported)
    }

    fn write(&mut self, _src: &[u8]) -> DriverResult<usize> {
        Err(DriverError::Unsupported)
    }

    fn config_get(&self, key: &str) -> Option<PropertyValue>;

    /// 设置一个属性元素；`position` 是该值在数组中的下标，标量为 0
    fn config_set(&mut self, key: &str, value: PropertyValue, position: usize) -> DriverResult<()>;

    /// 发起查询，完成时通过 [`EventSink::respond`] 回报
    fn query(
        &mut self,
        _request: Option<Vec<u8>>,
        _want: usize,
        _token: QueryToken,
    ) -> DriverResult<()> {
        Err(DriverError::Unsupported)
    }
}

/// 驱动宿主：设备实例的申请与释放
pub trait DriverHost {
    fn descriptors(&self) -> Vec<DeviceDescriptor>;

    fn request(&mut self, type_name: &str, instance: u32) -> Option<Box<dyn DeviceDriver>>;

    fn release(&mut self, driver: Box<dyn DeviceDriver>) -> DriverResult<()>;
}
