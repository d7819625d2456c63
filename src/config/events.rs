use super::{ConfigError, ConfigResult};
use crate::impl_default;
use serde::{Deserialize, Serialize};

/// 回调表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// 回调槽位数量，槽位 id 为 1..=capacity
    pub capacity: usize,
}

impl_default!(RegistryConfig { capacity: 32 });

impl RegistryConfig {
    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.capacity == 0 || self.capacity > u8::MAX as usize {
            return Err(ConfigError::ValidationError(
                "Invalid callback capacity".to_string(),
            ));
        }
        Ok(())
    }
}

/// 驱动事件队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// 队列容量，队列满时驱动投递的事件被丢弃
    pub queue_capacity: usize,
}

impl_default!(EventConfig { queue_capacity: 64 });

impl EventConfig {
    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
