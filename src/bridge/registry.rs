//! 回调表
//!
//! 引用计数的脚本回调存储，以小整数 id 索引 (1..=capacity，0 表示空)。
//!
//! 槽位生命周期：`Empty → Registered(refcount=1) → [原地替换] → Released → Empty`。
//! 只有脚本线程会创建、替换或释放槽位；驱动上下文的事件先排队，
//! 再由脚本线程查表分发，所以表本身不需要加锁。

use crate::core::error::{BridgeError, BridgeResult};
use crate::value::ScriptFunction;

/// 回调槽位 id，0 表示空
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CallbackId(u8);

impl CallbackId {
    pub const NONE: CallbackId = CallbackId(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    pub fn raw(&self) -> u8 {
        self.0
    }

    fn slot(&self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }
}

#[derive(Debug)]
struct Slot {
    callback: ScriptFunction,
    refcount: u32,
}

/// 回调表
#[derive(Debug)]
pub struct CallbackRegistry {
    slots: Vec<Option<Slot>>,
}

impl CallbackRegistry {
    /// 创建指定容量的回调表，容量被限制在 `u8` 的取值范围内
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(u8::MAX as usize);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// 当前占用的槽位数
    pub fn active(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// 在第一个空槽位创建回调，引用计数为 1
    pub fn create(&mut self, callback: ScriptFunction) -> BridgeResult<CallbackId> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(BridgeError::ResourceExhausted("callback slots"))?;
        self.slots[index] = Some(Slot {
            callback,
            refcount: 1,
        });
        let id = CallbackId(index as u8 + 1);
        tracing::trace!(target: "registry", "created callback slot {}", id.0);
        Ok(id)
    }

    /// 原地替换槽位中的回调，id 与引用计数保持不变
    pub fn replace(&mut self, id: CallbackId, callback: ScriptFunction) -> BridgeResult<()> {
        let slot = self
            .slot_mut(id)
            .ok_or_else(|| BridgeError::invalid(format!("stale callback slot {}", id.0)))?;
        slot.callback = callback;
        Ok(())
    }

    /// 增加引用计数
    ///
    /// 留给多个持有者共享同一槽位的场景；桥接层自身每个槽位只有一个持有者，计数不会超过 1。
    pub fn retain(&mut self, id: CallbackId) -> bool {
        match self.slot_mut(id) {
            Some(slot) => {
                slot.refcount += 1;
                true
            }
            None => false,
        }
    }

    /// 减少引用计数，归零时释放槽位。返回槽位是否因此被释放。
    ///
    /// 释放空 id 或已释放的槽位是无操作。
    pub fn release(&mut self, id: CallbackId) -> bool {
        let Some(index) = id.slot() else {
            return false;
        };
        let Some(Some(slot)) = self.slots.get_mut(index) else {
            return false;
        };
        slot.refcount -= 1;
        if slot.refcount > 0 {
            return false;
        }
        self.slots[index] = None;
        tracing::trace!(target: "registry", "released callback slot {}", id.0);
        true
    }

    pub fn get(&self, id: CallbackId) -> Option<&ScriptFunction> {
        let index = id.slot()?;
        self.slots.get(index)?.as_ref().map(|slot| &slot.callback)
    }

    pub fn refcount(&self, id: CallbackId) -> u32 {
        id.slot()
            .and_then(|index| self.slots.get(index))
            .and_then(Option::as_ref)
            .map_or(0, |slot| slot.refcount)
    }

    fn slot_mut(&mut self, id: CallbackId) -> Option<&mut Slot> {
        let index = id.slot()?;
        self.slots.get_mut(index)?.as_mut()
    }
}
