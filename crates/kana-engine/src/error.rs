use kana_core::errors::GatewayError;
use kana_core::tools::ToolError;
use kana_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("{0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_sources() {
        let err: EngineError = GatewayError::NetworkError("reset".into()).into();
        assert!(matches!(err, EngineError::Gateway(_)));
        assert!(err.to_string().starts_with("gateway error:"));

        let err: EngineError = StoreError::NotFound("conversation x".into()).into();
        assert!(matches!(err, EngineError::Store(_)));
    }
}
