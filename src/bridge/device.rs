//! 设备表
//!
//! 脚本持有的设备句柄只是表中的下标加代数；解析句柄时同时检查两者，
//! 相当于对外部句柄做一次能力校验。

use super::registry::CallbackId;
use crate::driver::DeviceDriver;
use crate::value::DeviceHandle;

/// 事件类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Error,
    Data,
    Drain,
    Ready,
}

impl EventCategory {
    pub const COUNT: usize = 4;

    pub const ALL: [EventCategory; EventCategory::COUNT] = [
        EventCategory::Error,
        EventCategory::Data,
        EventCategory::Drain,
        EventCategory::Ready,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EventCategory::Error => "error",
            EventCategory::Data => "data",
            EventCategory::Drain => "drain",
            EventCategory::Ready => "ready",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.name() == name)
    }

    /// 驱动事件码，与 [`crate::driver::event_code`] 一致
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// 设备表项
pub(crate) struct DeviceEntry {
    pub(crate) driver: Box<dyn DeviceDriver>,
    /// 每个事件类别一个回调槽位
    pub(crate) events: [CallbackId; EventCategory::COUNT],
}

impl DeviceEntry {
    pub(crate) fn event_callback(&self, event: EventCategory) -> CallbackId {
        self.events[event.index()]
    }
}

struct TableSlot {
    generation: u16,
    entry: Option<DeviceEntry>,
}

/// 设备表
#[derive(Default)]
pub(crate) struct DeviceTable {
    slots: Vec<TableSlot>,
}

impl DeviceTable {
    /// 插入设备，优先复用空槽位
    ///
    /// 代数用尽（`u16::MAX`）的槽位不再复用，旧句柄因此永远不会解析到新设备。
    pub(crate) fn insert(&mut self, driver: Box<dyn DeviceDriver>) -> Option<DeviceHandle> {
        let entry = DeviceEntry {
            driver,
            events: [CallbackId::NONE; EventCategory::COUNT],
        };
        let reusable = self
            .slots
            .iter()
            .position(|s| s.entry.is_none() && s.generation < u16::MAX);
        if let Some(index) = reusable {
            let slot = &mut self.slots[index];
            slot.generation += 1;
            slot.entry = Some(entry);
            return Some(DeviceHandle {
                index: index as u16,
                generation: slot.generation,
            });
        }
        let index = u16::try_from(self.slots.len()).ok()?;
        self.slots.push(TableSlot {
            generation: 1,
            entry: Some(entry),
        });
        Some(DeviceHandle {
            index,
            generation: 1,
        })
    }

    pub(crate) fn get(&self, handle: DeviceHandle) -> Option<&DeviceEntry> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    pub(crate) fn get_mut(&mut self, handle: DeviceHandle) -> Option<&mut DeviceEntry> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    pub(crate) fn remove(&mut self, handle: DeviceHandle) -> Option<DeviceEntry> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.take()
    }

    pub(crate) fn contains(&self, handle: DeviceHandle) -> bool {
        self.get(handle).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::SimHost;
    use crate::driver::DriverHost;

    #[test]
    fn test_event_names_and_codes() {
        assert_eq!(EventCategory::from_name("drain"), Some(EventCategory::Drain));
        assert_eq!(EventCategory::from_name("close"), None);
        assert_eq!(EventCategory::from_code(1), Some(EventCategory::Data));
        assert_eq!(EventCategory::from_code(4), None);
        assert_eq!(EventCategory::Ready.index(), 3);
    }

    #[test]
    fn test_stale_handle_does_not_resolve() {
        let mut host = SimHost::new();
        let mut table = DeviceTable::default();

        let first = table.insert(host.request("gpio", 0).unwrap()).unwrap();
        assert!(table.remove(first).is_some());
        let second = table.insert(host.request("gpio", 1).unwrap()).unwrap();

        assert_eq!(first.index(), second.index());
        assert!(!table.contains(first));
        assert!(table.contains(second));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_exhausted_generation_retires_slot() {
        let mut host = SimHost::new();
        let mut table = DeviceTable::default();

        let first = table.insert(host.request("gpio", 0).unwrap()).unwrap();
        table.remove(first);
        table.slots[first.index() as usize].generation = u16::MAX - 1;

        let last = table.insert(host.request("gpio", 1).unwrap()).unwrap();
        assert_eq!(last.index(), first.index());
        assert_eq!(last.generation(), u16::MAX);
        table.remove(last);

        let next = table.insert(host.request("gpio", 2).unwrap()).unwrap();
        assert_ne!(next.index(), last.index());
        assert_eq!(next.generation(), 1);
        assert!(!table.contains(last));
        assert!(table.contains(next));
    }
}
