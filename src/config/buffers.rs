use super::{ConfigError, ConfigResult};
use crate::impl_default;
use serde::{Deserialize, Serialize};

/// 缓冲区配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// 单个脚本可见缓冲区的最大字节数
    pub max_buffer_bytes: usize,

    /// 单个查询请求缓冲区的最大字节数
    pub max_query_bytes: usize,
}

impl_default!(BufferConfig {
    max_buffer_bytes: 4096,
    max_query_bytes: 256,
});

impl BufferConfig {
    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_buffer_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "max_buffer_bytes must be positive".to_string(),
            ));
        }
        if self.max_query_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "max_query_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
