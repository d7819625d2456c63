//! 核心宏定义
//!
//! 提供统一的宏来减少配置类型的样板代码

/// 为结构体实现Default trait的宏
///
/// 使用示例:
/// ```rust
/// use device_bridge::impl_default;
///
/// struct Limits {
///     slots: usize,
///     label: String,
/// }
///
/// impl_default!(Limits {
///     slots: 32,
///     label: String::new(),
/// });
/// ```
#[macro_export]
macro_rules! impl_default {
    ($struct_name:ident {
        $($field:ident: $value:expr),* $(,)?
    }) => {
        impl Default for $struct_name {
            fn default() -> Self {
                Self {
                    $($field: $value),*
                }
            }
        }
    };
}
