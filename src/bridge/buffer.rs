//! 缓冲区管理
//!
//! 在驱动字节 I/O 与脚本可见的缓冲区值之间搬运数据：
//! - 预算内分配：超过配置上限或分配失败都报告为资源错误，
//!   并且不会产生部分填充的脚本缓冲区
//! - 查询请求的打包
//! - 写入区间的边界计算 (纯函数，便于单独验证)

use crate::config::BufferConfig;
use crate::core::error::{BridgeError, BridgeResult};
use crate::driver::DeviceDriver;
use crate::value::ScriptValue;
use std::ops::Range;

/// 解析后的查询参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    /// 请求负载，`None` 表示无负载查询
    pub payload: Option<Vec<u8>>,
    /// 期望的响应长度，0 表示不限
    pub want: usize,
    /// 消耗掉的参数个数
    pub consumed: usize,
}

/// 缓冲区管理器
#[derive(Debug, Clone)]
pub struct BufferManager {
    max_buffer_bytes: usize,
    max_query_bytes: usize,
}

impl BufferManager {
    pub fn new(config: &BufferConfig) -> Self {
        Self {
            max_buffer_bytes: config.max_buffer_bytes,
            max_query_bytes: config.max_query_bytes,
        }
    }

    /// 分配 `n` 字节的零填充缓冲区
    pub fn allocate(&self, n: usize) -> BridgeResult<Vec<u8>> {
        Self::allocate_within(n, self.max_buffer_bytes)
    }

    fn allocate_within(n: usize, limit: usize) -> BridgeResult<Vec<u8>> {
        if n > limit {
            return Err(BridgeError::OutOfMemory { requested: n });
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(n)
            .map_err(|_| BridgeError::OutOfMemory { requested: n })?;
        buf.resize(n, 0);
        Ok(buf)
    }

    /// 解析写入数据的字节区间，只接受携带字节的值
    pub fn resolve_write_region(value: &ScriptValue) -> BridgeResult<&[u8]> {
        value
            .as_bytes()
            .ok_or_else(|| BridgeError::invalid("write data must be a buffer or string"))
    }

    /// 从参数序列构造查询请求
    ///
    /// 第一个参数携带字节时直接作为请求负载；否则取开头连续的数字参数，
    /// 最后一个保留作为期望长度，其余按顺序打包为字节。
    pub fn build_query_request(&self, args: &[ScriptValue]) -> BridgeResult<QueryRequest> {
        let mut consumed = 0;
        let payload = match args.first().and_then(ScriptValue::as_bytes) {
            Some(bytes) => {
                let mut buf = Self::allocate_within(bytes.len(), self.max_query_bytes)?;
                buf.copy_from_slice(bytes);
                consumed += 1;
                Some(buf)
            }
            None => {
                let run = args.iter().take_while(|v| v.is_number()).count();
                let size = run.saturating_sub(1);
                if size > 0 {
                    let mut buf = Self::allocate_within(size, self.max_query_bytes)?;
                    for (slot, value) in buf.iter_mut().zip(&args[..size]) {
                        *slot = value.as_integer().unwrap_or(0) as u8;
                    }
                    consumed += size;
                    Some(buf)
                } else {
                    None
                }
            }
        };

        let want = match args.get(consumed).and_then(ScriptValue::as_integer) {
            Some(n) => {
                consumed += 1;
                n.max(0) as usize
            }
            None => 0,
        };

        Ok(QueryRequest {
            payload,
            want,
            consumed,
        })
    }

    /// 从驱动读取 `n` 字节到新的缓冲区值
    ///
    /// 缓冲区只在驱动读取成功后才成为脚本值；实际读到的字节数少于 `n` 时截断。
    pub fn deliver_read_result(
        &self,
        driver: &mut dyn DeviceDriver,
        n: usize,
    ) -> BridgeResult<ScriptValue> {
        let mut buf = self.allocate(n)?;
        let read = driver.read(&mut buf)?;
        buf.truncate(read);
        Ok(ScriptValue::Buffer(buf))
    }

    /// 把驱动的查询响应转换为脚本值
    ///
    /// 空响应得到 `undefined` 而不是空缓冲区。
    pub fn drain_response(&self, response: Option<Vec<u8>>) -> BridgeResult<ScriptValue> {
        match response {
            Some(bytes) if !bytes.is_empty() => {
                let mut buf = self
                    .allocate(bytes.len())
                    .map_err(|_| BridgeError::ResourceExhausted("response buffer"))?;
                buf.copy_from_slice(&bytes);
                Ok(ScriptValue::Buffer(buf))
            }
            _ => Ok(ScriptValue::Undefined),
        }
    }
}

/// 计算写入区间
///
/// 负的偏移或长度是参数错误；区间被截断在 `[0, len)` 之内，
/// 偏移越界或长度为零时得到空区间。
pub fn clamp_write(len: usize, offset: i64, count: i64) -> BridgeResult<Range<usize>> {
    if offset < 0 || count < 0 {
        return Err(BridgeError::invalid("negative write offset or count"));
    }
    let offset = usize::try_from(offset).unwrap_or(usize::MAX);
    let count = usize::try_from(count).unwrap_or(usize::MAX);
    if count == 0 || offset >= len {
        return Ok(0..0);
    }
    let end = offset + count.min(len - offset);
    Ok(offset..end)
}
