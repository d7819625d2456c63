//! 配置编组
//!
//! 脚本侧键值映射 ⇄ 驱动属性设置。写入是宽松合并：每个键独立应用，
//! 驱动拒绝或无法转换的值被跳过，不会让整个映射失败。

use crate::core::error::{BridgeError, BridgeResult};
use crate::driver::{DeviceDriver, PropertyValue};
use crate::value::ScriptValue;
use std::collections::HashMap;

/// 把设置映射应用到设备
///
/// 映射的键按其暴露的顺序处理，顺序不影响结果。
pub fn setup(driver: &mut dyn DeviceDriver, settings: &ScriptValue) -> BridgeResult<()> {
    let ScriptValue::Object(map) = settings else {
        return Err(BridgeError::invalid("settings must be an object"));
    };
    for (key, value) in map {
        if !set_property(driver, key, value) {
            tracing::debug!(target: "bridge", "setting '{}' not applied", key);
        }
    }
    Ok(())
}

/// 设置单个属性，返回是否被完整应用
///
/// - 数字：一次整数设置
/// - 数组：逐个元素设置，驱动拒绝时停止；非数字元素被跳过
/// - 其他可转换为文本的值：一次字符串设置
/// - 无法转换的值：跳过
pub fn set_property(driver: &mut dyn DeviceDriver, key: &str, value: &ScriptValue) -> bool {
    match value {
        ScriptValue::Number(_) => {
            let n = value.as_integer().unwrap_or(0);
            driver.config_set(key, PropertyValue::Int(n), 0).is_ok()
        }
        ScriptValue::Array(items) => {
            let mut position = 0;
            for n in items.iter().filter_map(ScriptValue::as_integer) {
                if driver.config_set(key, PropertyValue::Int(n), position).is_err() {
                    return false;
                }
                position += 1;
            }
            true
        }
        other => match other.to_text() {
            Some(text) => driver.config_set(key, PropertyValue::Str(text), 0).is_ok(),
            None => false,
        },
    }
}

/// 把驱动属性值转换为脚本值
pub fn property_to_value(value: PropertyValue) -> ScriptValue {
    match value {
        PropertyValue::Int(n) => ScriptValue::Number(n as f64),
        PropertyValue::Str(s) => ScriptValue::String(s),
        PropertyValue::List(list) => {
            ScriptValue::Array(list.into_iter().map(|n| ScriptValue::Number(n as f64)).collect())
        }
    }
}

/// 解析属性选择参数：字符串是属性名，数字是声明顺序中的下标
pub fn resolve_key(driver: &dyn DeviceDriver, which: &ScriptValue) -> Option<String> {
    match which {
        ScriptValue::String(name) => Some(name.clone()),
        ScriptValue::Number(_) => {
            let index = usize::try_from(which.as_integer()?).ok()?;
            driver.descriptor().property_name(index).map(str::to_string)
        }
        _ => None,
    }
}

/// 读取单个属性，没有值时为 `undefined`
pub fn get_property(driver: &dyn DeviceDriver, key: &str) -> ScriptValue {
    driver
        .config_get(key)
        .map_or(ScriptValue::Undefined, property_to_value)
}

/// 读取全部已声明且有值的属性
pub fn get_all(driver: &dyn DeviceDriver) -> ScriptValue {
    let map: HashMap<String, ScriptValue> = driver
        .descriptor()
        .properties
        .iter()
        .filter_map(|prop| {
            driver
                .config_get(&prop.name)
                .map(|value| (prop.name.clone(), property_to_value(value)))
        })
        .collect();
    ScriptValue::Object(map)
}
