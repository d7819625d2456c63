//! 事件分发
//!
//! 驱动投递的事件码在这里被路由到对应的回调，并按设备类别合成回调参数。
//! 没有注册回调的事件被静默丢弃，未知事件码被忽略。

use super::{ops, DeviceBridge, EventCategory};
use crate::driver::{DeviceCategory, DriverEvent, QueryToken};
use crate::value::{DeviceHandle, ScriptValue};

impl DeviceBridge {
    /// 分发调用时已在队列中的全部驱动事件，返回处理的数量
    ///
    /// 分发过程中新产生的事件留到下一次调用。
    pub fn poll_events(&mut self) -> usize {
        let queued = self.events_rx.len();
        let mut handled = 0;
        for _ in 0..queued {
            let Ok(event) = self.events_rx.try_recv() else {
                break;
            };
            match event {
                DriverEvent::Event { device, code } => self.dispatch_event(device, code),
                DriverEvent::Response {
                    device,
                    token,
                    status,
                    response,
                } => self.complete_query(device, token, status, response),
            }
            handled += 1;
        }
        handled
    }

    /// 把一个设备事件路由到已注册的回调
    pub fn dispatch_event(&mut self, handle: DeviceHandle, code: u8) {
        let Some(event) = EventCategory::from_code(code) else {
            tracing::trace!(target: "dispatch", "ignoring unknown event code {} for {}", code, handle);
            return;
        };
        let Some(entry) = self.devices.get_mut(handle) else {
            tracing::trace!(target: "dispatch", "dropped '{}' for closed {}", event.name(), handle);
            return;
        };
        let Some(callback) = self.registry.get(entry.event_callback(event)).cloned() else {
            tracing::trace!(target: "dispatch", "dropped '{}' for {}: no listener", event.name(), handle);
            return;
        };

        match event {
            EventCategory::Error => callback.call_error(entry.driver.error_code()),
            EventCategory::Data => match entry.driver.descriptor().category {
                DeviceCategory::Map => {
                    let value = ops::aggregate_value(entry.driver.as_mut());
                    callback.call(&[value]);
                }
                DeviceCategory::Stream | DeviceCategory::Block => {
                    let cached = entry.driver.cached_bytes().unwrap_or(0);
                    if cached == 0 {
                        return;
                    }
                    match self.buffers.deliver_read_result(entry.driver.as_mut(), cached) {
                        Ok(data) => callback.call(&[data]),
                        Err(err) => callback.call_error(err.code()),
                    }
                }
            },
            EventCategory::Drain => callback.call(&[]),
            // 保留，目前不做处理
            EventCategory::Ready => {}
        }
    }

    /// 处理查询响应：调用一次性回调并立即释放其槽位
    pub(crate) fn complete_query(
        &mut self,
        handle: DeviceHandle,
        token: QueryToken,
        status: i32,
        response: Option<Vec<u8>>,
    ) {
        let Some(pending) = self.pending.remove(&token) else {
            tracing::trace!(target: "dispatch", "dropped response {} for {}", token.raw(), handle);
            return;
        };
        let Some(callback) = self.registry.get(pending.callback).cloned() else {
            return;
        };

        let args = if status != 0 {
            vec![ScriptValue::number(status)]
        } else {
            match self.buffers.drain_response(response) {
                Ok(data) => vec![ScriptValue::Undefined, data],
                Err(err) => {
                    tracing::warn!(target: "dispatch", "response for {} dropped: {}", handle, err);
                    vec![ScriptValue::number(err.code())]
                }
            }
        };
        callback.call(&args);
        self.registry.release(pending.callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::event_code;
    use crate::driver::sim::{SimHost, SimMonitor};
    use crate::value::ScriptFunction;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Calls = Rc<RefCell<Vec<Vec<ScriptValue>>>>;

    fn setup() -> (DeviceBridge, SimMonitor) {
        let host = SimHost::new();
        let monitor = host.monitor();
        (DeviceBridge::with_defaults(Box::new(host)), monitor)
    }

    fn recorder() -> (ScriptFunction, Calls) {
        let calls: Calls = Rc::default();
        let sink = Rc::clone(&calls);
        (
            ScriptFunction::new(move |args| sink.borrow_mut().push(args.to_vec())),
            calls,
        )
    }

    #[test]
    fn test_error_event_carries_device_code() {
        let (mut bridge, monitor) = setup();
        let uart = bridge.open("uart", 0).unwrap();
        let (cb, calls) = recorder();
        bridge.listen_event(uart, EventCategory::Error, cb).unwrap();

        monitor.state("uart", 0).unwrap().borrow_mut().fault(-5);
        assert_eq!(bridge.poll_events(), 1);

        assert_eq!(*calls.borrow(), vec![vec![ScriptValue::number(-5)]]);
    }

    #[test]
    fn test_map_data_falls_back_to_per_offset() {
        let (mut bridge, monitor) = setup();
        let adc = bridge.open("adc", 0).unwrap();
        let (cb, calls) = recorder();
        bridge.listen_event(adc, EventCategory::Data, cb).unwrap();

        let state = monitor.state("adc", 0).unwrap();
        state.borrow_mut().values = vec![3, 4];
        state.borrow().raise(event_code::DATA);
        bridge.poll_events();

        assert_eq!(
            *calls.borrow(),
            vec![vec![ScriptValue::Array(vec![
                ScriptValue::number(3),
                ScriptValue::number(4)
            ])]]
        );
    }

    #[test]
    fn test_map_data_prefers_combined_read() {
        let (mut bridge, monitor) = setup();
        let gpio = bridge.open("gpio", 0).unwrap();
        let (cb, calls) = recorder();
        bridge.listen_event(gpio, EventCategory::Data, cb).unwrap();

        let state = monitor.state("gpio", 0).unwrap();
        state.borrow_mut().values = vec![0, 1, 1, 0];
        state.borrow().raise(event_code::DATA);
        bridge.poll_events();

        assert_eq!(*calls.borrow(), vec![vec![ScriptValue::number(6)]]);
    }

    #[test]
    fn test_stream_data_drains_buffered_bytes() {
        let (mut bridge, monitor) = setup();
        let uart = bridge.open("uart", 0).unwrap();
        let (cb, calls) = recorder();
        bridge.listen_event(uart, EventCategory::Data, cb).unwrap();

        let state = monitor.state("uart", 0).unwrap();
        state.borrow_mut().receive(b"hi");
        bridge.poll_events();

        assert_eq!(*calls.borrow(), vec![vec![ScriptValue::Buffer(b"hi".to_vec())]]);
        assert!(state.borrow().rx.is_empty());
    }

    #[test]
    fn test_stream_data_read_failure_reports_error() {
        let (mut bridge, monitor) = setup();
        let uart = bridge.open("uart", 0).unwrap();
        let (cb, calls) = recorder();
        bridge.listen_event(uart, EventCategory::Data, cb).unwrap();

        let state = monitor.state("uart", 0).unwrap();
        state.borrow_mut().fail_read = Some(crate::core::error::DriverError::Code(-7));
        state.borrow_mut().receive(b"x");
        bridge.poll_events();

        assert_eq!(*calls.borrow(), vec![vec![ScriptValue::number(-7)]]);
    }

    #[test]
    fn test_drain_and_ready() {
        let (mut bridge, monitor) = setup();
        let uart = bridge.open("uart", 0).unwrap();
        let (drain, drain_calls) = recorder();
        let (ready, ready_calls) = recorder();
        bridge.listen_event(uart, EventCategory::Drain, drain).unwrap();
        bridge.listen_event(uart, EventCategory::Ready, ready).unwrap();

        let state = monitor.state("uart", 0).unwrap();
        state.borrow().raise(event_code::DRAIN);
        state.borrow().raise(event_code::READY);
        state.borrow().raise(42);
        assert_eq!(bridge.poll_events(), 3);

        assert_eq!(*drain_calls.borrow(), vec![Vec::<ScriptValue>::new()]);
        assert!(ready_calls.borrow().is_empty());
    }

    #[test]
    fn test_events_without_listener_are_dropped() {
        let (mut bridge, monitor) = setup();
        let uart = bridge.open("uart", 0).unwrap();

        monitor.state("uart", 0).unwrap().borrow_mut().fault(-1);
        assert_eq!(bridge.poll_events(), 1);
        assert_eq!(bridge.event_callback(uart, EventCategory::Error), crate::bridge::CallbackId::NONE);
    }

    #[test]
    fn test_query_response_after_close_is_dropped() {
        let (mut bridge, monitor) = setup();
        let uart = bridge.open("uart", 0).unwrap();
        let (cb, calls) = recorder();
        let token = bridge.start_query(uart, Some(vec![7]), 1, Some(cb)).unwrap();
        let sink = monitor.state("uart", 0).unwrap().borrow().sink().unwrap();

        bridge.close(uart).unwrap();
        assert_eq!(bridge.pending_queries(), 0);
        assert_eq!(bridge.registry().active(), 0);

        assert!(sink.respond(token, 0, Some(vec![7])));
        assert_eq!(bridge.poll_events(), 1);
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn test_query_callback_fires_once() {
        let (mut bridge, monitor) = setup();
        let uart = bridge.open("uart", 0).unwrap();
        let (cb, calls) = recorder();
        bridge.start_query(uart, Some(vec![1, 2]), 3, Some(cb)).unwrap();
        assert_eq!(bridge.registry().active(), 1);

        let state = monitor.state("uart", 0).unwrap();
        assert_eq!(state.borrow_mut().complete_queries(), 1);
        bridge.poll_events();

        assert_eq!(
            *calls.borrow(),
            vec![vec![ScriptValue::Undefined, ScriptValue::Buffer(vec![1, 2, 0])]]
        );
        assert_eq!(bridge.registry().active(), 0);
        assert_eq!(bridge.pending_queries(), 0);
    }

    #[test]
    fn test_query_error_status() {
        let (mut bridge, monitor) = setup();
        let uart = bridge.open("uart", 0).unwrap();
        let (cb, calls) = recorder();
        let token = bridge.start_query(uart, None, 0, Some(cb)).unwrap();

        let sink = monitor.state("uart", 0).unwrap().borrow().sink().unwrap();
        sink.respond(token, -110, None);
        sink.respond(token, 0, None);
        bridge.poll_events();

        assert_eq!(*calls.borrow(), vec![vec![ScriptValue::number(-110)]]);
    }

    #[test]
    fn test_empty_response_is_undefined() {
        let (mut bridge, monitor) = setup();
        let uart = bridge.open("uart", 0).unwrap();
        let (cb, calls) = recorder();
        let token = bridge.start_query(uart, None, 0, Some(cb)).unwrap();

        let sink = monitor.state("uart", 0).unwrap().borrow().sink().unwrap();
        sink.respond(token, 0, Some(Vec::new()));
        bridge.poll_events();

        assert_eq!(
            *calls.borrow(),
            vec![vec![ScriptValue::Undefined, ScriptValue::Undefined]]
        );
    }

    #[test]
    fn test_event_after_close_never_dispatches() {
        let (mut bridge, monitor) = setup();
        let uart = bridge.open("uart", 0).unwrap();
        let (cb, calls) = recorder();
        bridge.listen_event(uart, EventCategory::Drain, cb).unwrap();
        let sink = monitor.state("uart", 0).unwrap().borrow().sink().unwrap();

        bridge.close(uart).unwrap();
        let other = bridge.open("uart", 0).unwrap();
        let (cb2, calls2) = recorder();
        bridge.listen_event(other, EventCategory::Drain, cb2).unwrap();

        sink.raise(event_code::DRAIN);
        bridge.poll_events();

        assert!(calls.borrow().is_empty());
        assert!(calls2.borrow().is_empty());
    }
}
