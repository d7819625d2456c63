//! 脚本值模型
//!
//! 桥接层与脚本运行时之间交换的通用数据类型。脚本运行时是单线程的，
//! 所以可调用值使用 `Rc` 持有，不要求 `Send`。

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// 脚本值
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ScriptValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<ScriptValue>),
    Object(HashMap<String, ScriptValue>),
    /// 字节缓冲区
    Buffer(Vec<u8>),
    Function(ScriptFunction),
    /// 设备句柄
    Device(DeviceHandle),
}

impl ScriptValue {
    pub fn number(n: impl Into<f64>) -> Self {
        ScriptValue::Number(n.into())
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, ScriptValue::Undefined)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, ScriptValue::Number(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, ScriptValue::String(_))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, ScriptValue::Object(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, ScriptValue::Function(_))
    }

    /// 数字按整数截断，与脚本侧 `x | 0` 的取整方式一致
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ScriptValue::Number(n) if n.is_finite() => Some(n.trunc() as i64),
            ScriptValue::Number(_) => Some(0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&ScriptFunction> {
        match self {
            ScriptValue::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_device(&self) -> Option<DeviceHandle> {
        match self {
            ScriptValue::Device(handle) => Some(*handle),
            _ => None,
        }
    }

    /// 携带字节的值：缓冲区或字符串 (UTF-8 字节)
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ScriptValue::Buffer(bytes) => Some(bytes),
            ScriptValue::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// 转换为文本表示，无法转换时返回 `None`
    pub fn to_text(&self) -> Option<String> {
        match self {
            ScriptValue::String(s) => Some(s.clone()),
            ScriptValue::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(b: bool) -> Self {
        ScriptValue::Bool(b)
    }
}

impl From<f64> for ScriptValue {
    fn from(n: f64) -> Self {
        ScriptValue::Number(n)
    }
}

impl From<i32> for ScriptValue {
    fn from(n: i32) -> Self {
        ScriptValue::Number(n.into())
    }
}

impl From<u32> for ScriptValue {
    fn from(n: u32) -> Self {
        ScriptValue::Number(n.into())
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        ScriptValue::String(s.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(s: String) -> Self {
        ScriptValue::String(s)
    }
}

impl From<ScriptFunction> for ScriptValue {
    fn from(f: ScriptFunction) -> Self {
        ScriptValue::Function(f)
    }
}

impl From<DeviceHandle> for ScriptValue {
    fn from(handle: DeviceHandle) -> Self {
        ScriptValue::Device(handle)
    }
}

/// 脚本可调用值
#[derive(Clone)]
pub struct ScriptFunction(Rc<dyn Fn(&[ScriptValue])>);

impl ScriptFunction {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&[ScriptValue]) + 'static,
    {
        Self(Rc::new(func))
    }

    /// 以固定参数列表调用
    pub fn call(&self, args: &[ScriptValue]) {
        (self.0)(args)
    }

    /// 以单个错误码参数调用
    pub fn call_error(&self, code: i32) {
        self.call(&[ScriptValue::number(code)])
    }

    pub fn ptr_eq(&self, other: &ScriptFunction) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptFunction({:p})", Rc::as_ptr(&self.0))
    }
}

impl PartialEq for ScriptFunction {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

/// 设备句柄
///
/// 指向桥接层设备表中一个槽位的索引，带有代数 (generation)。
/// 槽位被复用后旧句柄的代数不再匹配，因此已销毁设备的句柄永远无法
/// 重新解析到新设备上。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    pub(crate) index: u16,
    pub(crate) generation: u16,
}

impl DeviceHandle {
    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn generation(&self) -> u16 {
        self.generation
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}.{}", self.index, self.generation)
    }
}
