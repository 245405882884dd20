//! Client provider: builds the one backend connection of the process and
//! hands it to views through an explicit [`AppContext`].

use detector_link::{Connection, EventHandlers};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::Result;

/// What every view receives from the provider.
#[derive(Clone)]
pub struct AppContext {
    connection: Arc<Connection>,
    config: Arc<AppConfig>,
}

impl AppContext {
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

/// Owns the process-wide [`Connection`].
///
/// Construction fails before any view exists when the configuration is
/// unusable. Every [`render`](Self::render) hands out the same connection.
pub struct ClientProvider {
    context: AppContext,
}

impl ClientProvider {
    /// Build from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::new(AppConfig::from_env()?)
    }

    /// Build from an injected variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::new(AppConfig::from_lookup(lookup)?)
    }

    /// Connect to `config.backend_url`. Must run inside a Tokio runtime.
    pub fn new(config: AppConfig) -> Result<Self> {
        let connection = Connection::builder()
            .base_url(config.backend_url.clone())
            .auth(config.auth.clone())
            .timeouts(config.timeouts.clone())
            .connection_options(config.connection.clone())
            .event_handlers(lifecycle_logging())
            .build()?;
        tracing::info!(backend = %connection.base_url(), "Backend connection created");

        Ok(Self {
            context: AppContext {
                connection: Arc::new(connection),
                config: Arc::new(config),
            },
        })
    }

    /// Render `view` with the shared context.
    pub fn render<R>(&self, view: impl FnOnce(&AppContext) -> R) -> R {
        view(&self.context)
    }

    pub fn context(&self) -> AppContext {
        self.context.clone()
    }

    /// Close the backend connection.
    pub async fn shutdown(&self) {
        self.context.connection.disconnect().await;
    }
}

fn lifecycle_logging() -> EventHandlers {
    EventHandlers::new()
        .on_connect(|| tracing::info!("Connected to backend"))
        .on_disconnect(|reason| tracing::warn!(%reason, "Disconnected from backend"))
        .on_error(|error| {
            if error.recoverable {
                tracing::warn!(%error, "Backend connection error");
            } else {
                tracing::error!(%error, "Backend connection failed permanently");
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BACKEND_URL_VAR;
    use crate::error::CLIError;

    #[tokio::test]
    async fn test_missing_url_fails_before_render() {
        let mut rendered = false;
        let result = ClientProvider::from_lookup(|_| None).map(|provider| {
            provider.render(|_| rendered = true);
        });
        assert!(matches!(result, Err(CLIError::ConfigurationError(_))));
        assert!(!rendered);
    }

    #[tokio::test]
    async fn test_renders_share_one_connection() {
        let provider = ClientProvider::from_lookup(|name| {
            (name == BACKEND_URL_VAR).then(|| "http://127.0.0.1:9".to_string())
        })
        .unwrap();

        let first = provider.render(|ctx| ctx.connection().clone());
        let second = provider.render(|ctx| ctx.connection().clone());
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, provider.context().connection()));
        assert_eq!(provider.context().config().backend_url, "http://127.0.0.1:9");
    }

    #[tokio::test]
    async fn test_invalid_url_is_configuration_error() {
        let result = ClientProvider::from_lookup(|name| {
            (name == BACKEND_URL_VAR).then(|| "not a url".to_string())
        });
        assert!(matches!(result, Err(CLIError::ConfigurationError(_))));
    }
}
