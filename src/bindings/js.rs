//! JavaScript Binding Adapter using rquickjs
//!
//! 全局 API：
//! - `createDevice(type, [instance])` 返回设备对象或 `undefined`
//! - `deviceList()` 返回 `[{ name, conf, inst }]`
//! - `console.log / warn / error`、`print`
//!
//! 设备对象的方法与 [`Operation`] 一一对应，另有只读属性 `error`、
//! `instance`、`type` 以及元素访问 `elem(i)` / `setElem(i, v)`。

use crate::bridge::{DeviceBridge, Operation};
use crate::value::{DeviceHandle, ScriptFunction, ScriptValue};
use rquickjs::convert::Coerced;
use rquickjs::function::Rest;
use rquickjs::{
    Array, ArrayBuffer, Context, Ctx, FromJs, Function, IntoJs, Object, Runtime, TypedArray,
    Value,
};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::rc::Rc;
use thiserror::Error;

/// 保存 JS 回调函数的隐藏全局对象
const CALLBACK_STORE: &str = "__bridgeCallbacks";

const PRELUDE: &str = r#"
(function (global) {
    const call = global.__deviceCall;
    const cache = {};

    class Device {
        constructor(handle) {
            Object.defineProperty(this, '__handle', { value: handle });
        }
        get error() { return call('property', this, 'error'); }
        get instance() { return call('property', this, 'instance'); }
        get type() { return call('property', this, 'type'); }
        elem(index) { return call('elem', this, index); }
        setElem(index, value) { return call('setElem', this, index, value); }
        destroy() {
            const ok = call('destroy', this);
            if (ok) delete cache[this.__handle];
            return ok;
        }
    }

    ['enable', 'disable', 'isEnabled', 'get', 'set', 'read', 'write',
     'query', 'config', 'listen', 'ignore'].forEach(function (name) {
        Device.prototype[name] = function (...args) {
            return call(name, this, ...args);
        };
    });

    global.__wrapDevice = function (handle) {
        return cache[handle] || (cache[handle] = new Device(handle));
    };
})(globalThis);
"#;

/// 脚本错误
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Script runtime error: {0}")]
    Runtime(String),

    #[error("Script exception: {0}")]
    Exception(String),

    #[error("Failed to read script: {0}")]
    Io(#[from] std::io::Error),
}

pub type ScriptResult<T> = Result<T, ScriptError>;

/// 延迟执行的回调调用
#[derive(Default)]
struct CallbackQueue {
    calls: VecDeque<(String, Vec<ScriptValue>)>,
    released: Vec<String>,
    next_key: u64,
}

type SharedQueue = Rc<RefCell<CallbackQueue>>;

/// JS 回调在回调存储中的键；最后一个持有者释放时删除对应条目
struct CallbackKey {
    key: String,
    queue: SharedQueue,
}

impl CallbackKey {
    fn enqueue(&self, args: &[ScriptValue]) {
        self.queue
            .borrow_mut()
            .calls
            .push_back((self.key.clone(), args.to_vec()));
    }
}

impl Drop for CallbackKey {
    fn drop(&mut self) {
        if let Ok(mut queue) = self.queue.try_borrow_mut() {
            queue.released.push(std::mem::take(&mut self.key));
        }
    }
}

/// 绑定了设备桥接层的 JS 运行时
pub struct JsDeviceRuntime {
    runtime: Runtime,
    context: Context,
    bridge: Rc<RefCell<DeviceBridge>>,
    queue: SharedQueue,
}

impl JsDeviceRuntime {
    pub fn new(bridge: DeviceBridge) -> ScriptResult<Self> {
        let runtime = Runtime::new().map_err(|e| ScriptError::Runtime(e.to_string()))?;
        let context = Context::full(&runtime).map_err(|e| ScriptError::Runtime(e.to_string()))?;
        let bridge = Rc::new(RefCell::new(bridge));
        let queue = SharedQueue::default();

        context.with(|ctx| {
            install(&ctx, &bridge, &queue)
                .and_then(|_| ctx.eval::<(), _>(PRELUDE))
                .map_err(|e| ScriptError::Runtime(describe(&ctx, e)))
        })?;
        tracing::debug!(target: "script", "JS device runtime ready");

        Ok(Self {
            runtime,
            context,
            bridge,
            queue,
        })
    }

    /// 共享的桥接层，宿主可以借此直接检查状态
    pub fn bridge(&self) -> Rc<RefCell<DeviceBridge>> {
        Rc::clone(&self.bridge)
    }

    /// 执行脚本代码并返回其结果值
    pub fn eval(&self, source: &str) -> ScriptResult<ScriptValue> {
        self.context.with(|ctx| {
            let result = ctx
                .eval::<Value, _>(source)
                .and_then(|value| from_js(&ctx, &self.queue, value))
                .map_err(|e| ScriptError::Exception(describe(&ctx, e)));
            let flushed = flush(&ctx, &self.queue);
            let value = result?;
            flushed.map_err(|e| ScriptError::Exception(describe(&ctx, e)))?;
            Ok(value)
        })
    }

    pub fn eval_file<P: AsRef<Path>>(&self, path: P) -> ScriptResult<ScriptValue> {
        let source = std::fs::read_to_string(path.as_ref())?;
        tracing::info!(target: "script", "running {}", path.as_ref().display());
        self.eval(&source)
    }

    /// 分发已到达的驱动事件，执行排队的回调和挂起的 JS 任务
    ///
    /// 返回处理的驱动事件数。
    pub fn pump(&self) -> ScriptResult<usize> {
        let handled = self.bridge.borrow_mut().poll_events();
        self.context.with(|ctx| {
            flush(&ctx, &self.queue).map_err(|e| ScriptError::Exception(describe(&ctx, e)))
        })?;
        while self.runtime.is_job_pending() {
            if self.runtime.execute_pending_job().is_err() {
                tracing::warn!(target: "script", "pending job raised an exception");
                break;
            }
        }
        Ok(handled)
    }
}

fn install<'js>(
    ctx: &Ctx<'js>,
    bridge: &Rc<RefCell<DeviceBridge>>,
    queue: &SharedQueue,
) -> rquickjs::Result<()> {
    let global = ctx.globals();
    global.set(CALLBACK_STORE, Object::new(ctx.clone())?)?;

    let (b, q) = (Rc::clone(bridge), Rc::clone(queue));
    global.set(
        "__deviceCall",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
                let mut args = args.0.into_iter();
                let Some(name) = args.next() else {
                    return Ok(Value::new_undefined(ctx));
                };
                let name = String::from_js(&ctx, name)?;
                let values = args
                    .map(|v| from_js(&ctx, &q, v))
                    .collect::<rquickjs::Result<Vec<_>>>()?;
                let result = invoke(&mut b.borrow_mut(), &name, &values);
                drop(values);
                flush(&ctx, &q)?;
                to_js(&ctx, &result)
            },
        )?,
    )?;

    let (b, q) = (Rc::clone(bridge), Rc::clone(queue));
    global.set(
        "createDevice",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
                let values = args
                    .0
                    .into_iter()
                    .map(|v| from_js(&ctx, &q, v))
                    .collect::<rquickjs::Result<Vec<_>>>()?;
                let device = b.borrow_mut().create_device(&values);
                to_js(&ctx, &device)
            },
        )?,
    )?;

    let b = Rc::clone(bridge);
    global.set(
        "deviceList",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>| -> rquickjs::Result<Value<'js>> {
                let list = b
                    .borrow()
                    .device_list()
                    .into_iter()
                    .map(|desc| {
                        ScriptValue::Object(HashMap::from([
                            ("conf".to_string(), ScriptValue::from(desc.conf_num() as u32)),
                            ("inst".to_string(), ScriptValue::from(desc.inst_max)),
                            ("name".to_string(), ScriptValue::from(desc.name)),
                        ]))
                    })
                    .collect();
                to_js(&ctx, &ScriptValue::Array(list))
            },
        )?,
    )?;

    // ==================== Console API ====================
    let console_obj = Object::new(ctx.clone())?;
    console_obj.set(
        "log",
        Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            tracing::info!(target: "script.console", "{}", join(args));
        })?,
    )?;
    console_obj.set(
        "warn",
        Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            tracing::warn!(target: "script.console", "{}", join(args));
        })?,
    )?;
    console_obj.set(
        "error",
        Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            tracing::error!(target: "script.console", "{}", join(args));
        })?,
    )?;
    global.set("console", console_obj)?;

    global.set(
        "print",
        Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            println!("{}", join(args));
        })?,
    )?;
    Ok(())
}

fn join(args: Rest<Coerced<String>>) -> String {
    args.0.into_iter().map(|s| s.0).collect::<Vec<_>>().join(" ")
}

/// 在桥接层上执行一次设备方法调用
fn invoke(bridge: &mut DeviceBridge, name: &str, args: &[ScriptValue]) -> ScriptValue {
    if let Some(op) = Operation::from_name(name) {
        return bridge.call(op, args);
    }
    let Some(handle) = args.first().and_then(ScriptValue::as_device) else {
        return ScriptValue::Undefined;
    };
    let rest = &args[1..];
    match name {
        "property" => rest
            .first()
            .and_then(ScriptValue::as_str)
            .map_or(ScriptValue::Undefined, |prop| bridge.property(handle, prop)),
        "elem" => rest
            .first()
            .and_then(ScriptValue::as_integer)
            .map_or(ScriptValue::Undefined, |index| bridge.elem(handle, index)),
        "setElem" => match (rest.first().and_then(ScriptValue::as_integer), rest.get(1)) {
            (Some(index), Some(value)) => bridge.set_elem(handle, index, value),
            _ => ScriptValue::Undefined,
        },
        _ => ScriptValue::Undefined,
    }
}

/// 依次执行排队的回调，然后删除不再被引用的回调
fn flush<'js>(ctx: &Ctx<'js>, queue: &SharedQueue) -> rquickjs::Result<()> {
    let store: Object = ctx.globals().get(CALLBACK_STORE)?;
    loop {
        let next = queue.borrow_mut().calls.pop_front();
        let Some((key, args)) = next else {
            break;
        };
        let Some(func) = store.get::<_, Option<Function>>(key.as_str())? else {
            continue;
        };
        let js_args = args
            .iter()
            .map(|arg| to_js(ctx, arg))
            .collect::<rquickjs::Result<Vec<_>>>()?;
        if let Err(err) = func.call::<_, ()>((Rest(js_args),)) {
            tracing::warn!(target: "script", "callback failed: {}", describe(ctx, err));
        }
    }

    let released = std::mem::take(&mut queue.borrow_mut().released);
    for key in released {
        store.remove(key.as_str())?;
    }
    Ok(())
}

fn register_callback<'js>(
    ctx: &Ctx<'js>,
    queue: &SharedQueue,
    func: Function<'js>,
) -> rquickjs::Result<ScriptValue> {
    let key = {
        let mut queue = queue.borrow_mut();
        queue.next_key += 1;
        queue.next_key.to_string()
    };
    let store: Object = ctx.globals().get(CALLBACK_STORE)?;
    store.set(key.as_str(), func)?;

    let guard = CallbackKey {
        key,
        queue: Rc::clone(queue),
    };
    Ok(ScriptValue::Function(ScriptFunction::new(move |args| {
        guard.enqueue(args)
    })))
}

fn encode_handle(handle: DeviceHandle) -> f64 {
    f64::from(u32::from(handle.index) << 16 | u32::from(handle.generation))
}

fn decode_handle(raw: f64) -> Option<DeviceHandle> {
    if !(0.0..=f64::from(u32::MAX)).contains(&raw) || raw.fract() != 0.0 {
        return None;
    }
    let raw = raw as u32;
    Some(DeviceHandle {
        index: (raw >> 16) as u16,
        generation: (raw & 0xffff) as u16,
    })
}

/// JS 值 → 脚本值
fn from_js<'js>(ctx: &Ctx<'js>, queue: &SharedQueue, value: Value<'js>) -> rquickjs::Result<ScriptValue> {
    if value.is_undefined() {
        return Ok(ScriptValue::Undefined);
    }
    if value.is_null() {
        return Ok(ScriptValue::Null);
    }
    if let Some(b) = value.as_bool() {
        return Ok(ScriptValue::Bool(b));
    }
    if let Some(n) = value.as_number() {
        return Ok(ScriptValue::Number(n));
    }
    if let Some(s) = value.as_string() {
        return Ok(ScriptValue::String(s.to_string()?));
    }
    if let Some(func) = value.as_function() {
        return register_callback(ctx, queue, func.clone());
    }
    if let Some(array) = value.as_array() {
        let items = array
            .iter::<Value>()
            .map(|item| item.and_then(|v| from_js(ctx, queue, v)))
            .collect::<rquickjs::Result<Vec<_>>>()?;
        return Ok(ScriptValue::Array(items));
    }
    let Some(object) = value.as_object() else {
        return Ok(ScriptValue::Undefined);
    };

    if let Ok(buffer) = ArrayBuffer::from_js(ctx, value.clone()) {
        return Ok(ScriptValue::Buffer(buffer.as_bytes().unwrap_or_default().to_vec()));
    }
    if let Some(bytes) = view_bytes(ctx, object)? {
        return Ok(ScriptValue::Buffer(bytes));
    }
    if let Some(handle) = object
        .get::<_, Option<f64>>("__handle")?
        .and_then(decode_handle)
    {
        return Ok(ScriptValue::Device(handle));
    }

    let map = object
        .props::<String, Value>()
        .map(|entry| entry.and_then(|(k, v)| Ok((k, from_js(ctx, queue, v)?))))
        .collect::<rquickjs::Result<HashMap<_, _>>>()?;
    Ok(ScriptValue::Object(map))
}

/// 任意 ArrayBuffer 视图（各类 TypedArray、DataView）按字节取出可见区间
fn view_bytes<'js>(ctx: &Ctx<'js>, object: &Object<'js>) -> rquickjs::Result<Option<Vec<u8>>> {
    let backing: Value = object.get("buffer")?;
    let Ok(buffer) = ArrayBuffer::from_js(ctx, backing) else {
        return Ok(None);
    };
    let offset = object.get::<_, Option<f64>>("byteOffset")?;
    let length = object.get::<_, Option<f64>>("byteLength")?;
    let (Some(offset), Some(length)) = (offset, length) else {
        return Ok(None);
    };

    let bytes = buffer.as_bytes().unwrap_or_default();
    let start = (offset as usize).min(bytes.len());
    let end = start.saturating_add(length as usize).min(bytes.len());
    Ok(Some(bytes[start..end].to_vec()))
}

/// 脚本值 → JS 值
fn to_js<'js>(ctx: &Ctx<'js>, value: &ScriptValue) -> rquickjs::Result<Value<'js>> {
    match value {
        ScriptValue::Undefined | ScriptValue::Function(_) => Ok(Value::new_undefined(ctx.clone())),
        ScriptValue::Null => Ok(Value::new_null(ctx.clone())),
        ScriptValue::Bool(b) => Ok(Value::new_bool(ctx.clone(), *b)),
        ScriptValue::Number(n) => Ok(Value::new_number(ctx.clone(), *n)),
        ScriptValue::String(s) => s.as_str().into_js(ctx),
        ScriptValue::Array(items) => {
            let array = Array::new(ctx.clone())?;
            for (i, item) in items.iter().enumerate() {
                array.set(i, to_js(ctx, item)?)?;
            }
            Ok(array.into_value())
        }
        ScriptValue::Object(map) => {
            let object = Object::new(ctx.clone())?;
            for (key, item) in map {
                object.set(key.as_str(), to_js(ctx, item)?)?;
            }
            Ok(object.into_value())
        }
        ScriptValue::Buffer(bytes) => TypedArray::<u8>::new(ctx.clone(), bytes.clone())?.into_js(ctx),
        ScriptValue::Device(handle) => {
            let wrap: Function = ctx.globals().get("__wrapDevice")?;
            wrap.call((encode_handle(*handle),))
        }
    }
}

/// 取出异常的描述文本
fn describe(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
    if !matches!(err, rquickjs::Error::Exception) {
        return err.to_string();
    }
    let thrown = ctx.catch();
    if let Some(exception) = thrown.as_exception() {
        return exception.to_string();
    }
    match thrown.as_string().map(|s| s.to_string()) {
        Some(Ok(text)) => text,
        _ => format!("{:?}", thrown),
    }
}
