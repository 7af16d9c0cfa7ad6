//! LLM provider implementations

pub mod anthropic;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use crate::{Api, Error, Model, Result, SharedPolicy};

/// Get an API key from the provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided {
        return Ok(key.to_string());
    }

    std::env::var(env_var).map_err(|_| Error::InvalidApiKey)
}

/// HTTP client whose requests give up after the model's timeout
pub(crate) fn http_client(model: &Model) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(model.request_timeout_secs))
        .build()?;
    Ok(client)
}

/// Timeouts become [`Error::Timeout`]; every other transport failure stays `Http`.
pub(crate) fn transport_error(err: reqwest::Error, timeout_secs: u64) -> Error {
    if err.is_timeout() {
        Error::Timeout(timeout_secs)
    } else {
        Error::Http(err)
    }
}

/// Build the policy client that speaks the model's protocol
pub fn policy_for(model: &Model, api_key: Option<&str>) -> Result<SharedPolicy> {
    if model.base_url.is_empty() {
        return Err(Error::InvalidConfig(format!(
            "no base_url configured for model {}",
            model.id
        )));
    }
    match model.provider.api() {
        Api::AnthropicMessages => {
            let key = get_api_key(api_key, "ANTHROPIC_API_KEY")?;
            Ok(Arc::new(anthropic::AnthropicProvider::new(key, model.clone())?))
        }
        Api::OpenAIChat => {
            let key = match model.provider.api_key_env_var() {
                Some(var) => Some(get_api_key(api_key, var)?),
                None => api_key.map(str::to_string),
            };
            Ok(Arc::new(openai::OpenAIProvider::new(key, model.clone())?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Policy, PolicyRequest, Provider};

    #[test]
    fn test_provided_key_wins() {
        assert_eq!(get_api_key(Some("k"), "STEPWISE_UNSET_VAR").unwrap(), "k");
    }

    #[test]
    fn test_custom_without_base_url_is_rejected() {
        let model = Model::new(Provider::Custom, "m");
        assert!(matches!(
            policy_for(&model, None),
            Err(Error::InvalidConfig(_))
        ));
    }

    /// Accepts connections and never answers
    async fn silent_endpoint() -> (String, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn test_slow_endpoint_is_timeout() {
        let (base_url, server) = silent_endpoint().await;
        for provider in [Provider::Anthropic, Provider::Custom] {
            let mut model = Model::new(provider, "m");
            model.base_url = base_url.clone();
            model.request_timeout_secs = 1;
            let policy = policy_for(&model, Some("key")).unwrap();

            let err = policy
                .invoke(PolicyRequest::prompt("sys", "hi"))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Timeout(1)), "{provider:?}: {err}");
            assert!(err.is_retryable());
        }
        server.abort();
    }

    #[tokio::test]
    async fn test_refused_connection_stays_http() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut model = Model::new(Provider::Ollama, "llama3");
        model.base_url = format!("http://{addr}");
        let err = policy_for(&model, None)
            .unwrap()
            .invoke(PolicyRequest::prompt("sys", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http(_)), "{err}");
    }

    #[test]
    fn test_model_timeout_defaults_when_absent() {
        let model: Model = serde_json::from_value(serde_json::json!({
            "id": "m",
            "provider": "ollama",
            "base_url": "http://localhost:11434/v1",
            "max_tokens": 10
        }))
        .unwrap();
        assert_eq!(model.request_timeout_secs, crate::DEFAULT_REQUEST_TIMEOUT_SECS);
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let model = Model::new(Provider::Ollama, "llama3");
        assert!(policy_for(&model, None).is_ok());
    }
}
