use std::sync::PoisonError;

/// GFX 层的错误类型
///
/// 所有错误都是致命的：调用方不应该重试，只能中止当前帧或当前加载步骤。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GfxError {
    /// 描述符或 scratch 容量不足，需要在启动时调整配置
    #[error("configuration exhausted: {0}")]
    ConfigurationExhaustion(String),

    /// 设备或驱动失败，包括提交失败
    #[error("device lost: {0}")]
    DeviceLost(String),

    /// pipeline、binding layout 等对象构建失败
    #[error("construction failure: {0}")]
    ConstructionFailure(String),

    /// API 使用错误，例如在绑定 pipeline 之前 dispatch
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

pub type GfxResult<T> = Result<T, GfxError>;

impl GfxError {
    #[inline]
    pub fn exhausted(msg: impl Into<String>) -> Self {
        Self::ConfigurationExhaustion(msg.into())
    }

    #[inline]
    pub fn device_lost(msg: impl Into<String>) -> Self {
        Self::DeviceLost(msg.into())
    }

    #[inline]
    pub fn construction(msg: impl Into<String>) -> Self {
        Self::ConstructionFailure(msg.into())
    }

    #[inline]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }
}

/// 某个线程持锁时 panic，锁内的数据已经不可信
impl<T> From<PoisonError<T>> for GfxError {
    fn from(_: PoisonError<T>) -> Self {
        Self::InvalidOperation("lock poisoned by a panicking thread".to_string())
    }
}
