use thiserror::Error;

/// Relay错误类型定义
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("议题未找到: {id}")]
    IssueNotFound { id: i64 },

    #[error("集成未找到: {id}")]
    IntegrationNotFound { id: i64 },

    #[error("集成已禁用: {id}")]
    IntegrationDisabled { id: i64 },

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("消息格式错误: {0}")]
    MalformedMessage(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("议题处理失败: {message}")]
    Processor { message: String, retryable: bool },

    #[error("任务尚未就绪: {0}")]
    TaskNotReady(String),

    #[error("处理过程中发生panic: {0}")]
    Panic(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    /// 创建可重试的处理器错误
    pub fn processor<S: Into<String>>(message: S) -> Self {
        Self::Processor {
            message: message.into(),
            retryable: true,
        }
    }

    /// 创建不可重试的处理器错误
    pub fn terminal_processor<S: Into<String>>(message: S) -> Self {
        Self::Processor {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn message_queue<S: Into<String>>(message: S) -> Self {
        Self::MessageQueue(message.into())
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedMessage(message.into())
    }

    /// 消息级别的重试是否有意义
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Processor { retryable, .. } => *retryable,
            Self::Validation(_)
            | Self::MalformedMessage(_)
            | Self::IntegrationNotFound { .. }
            | Self::IntegrationDisabled { .. }
            | Self::Configuration(_) => false,
            _ => true,
        }
    }

    /// 基础设施错误: 事务或存储失败，消息保持未确认以等待重新投递
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::DatabaseOperation(_)
                | Self::MessageQueue(_)
                | Self::Serialization(_)
        )
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processor_error_carries_retryable_flag() {
        assert!(RelayError::processor("llm timeout").is_retryable());
        assert!(!RelayError::terminal_processor("bad input").is_retryable());
        assert!(!RelayError::processor("x").is_infrastructure());
    }

    #[test]
    fn test_terminal_and_infrastructure_classification() {
        assert!(!RelayError::validation("missing").is_retryable());
        assert!(!RelayError::IntegrationDisabled { id: 7 }.is_retryable());
        assert!(RelayError::Panic("boom".into()).is_retryable());

        assert!(RelayError::message_queue("xadd failed").is_infrastructure());
        assert!(RelayError::DatabaseOperation("tx".into()).is_infrastructure());
        assert!(!RelayError::Panic("boom".into()).is_infrastructure());
    }

    #[test]
    fn test_serde_error_conversion() {
        let err: RelayError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, RelayError::Serialization(_)));
    }
}
