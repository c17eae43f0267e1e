//! Contract callback router.
//!
//! Handlers are registered explicitly at startup under `<prefix><ContractName><suffix>`
//! and resolved by that name at dispatch time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::domain::{CallbackError, CallbackHandler, CallbackPayload, DatabaseClient, HandlerError};

pub const DEFAULT_CALLBACK_SUFFIX: &str = "Callback";
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// Naming convention mapping a contract name to its handler name
#[derive(Debug, Clone)]
pub struct HandlerNaming {
    pub prefix: String,
    pub suffix: String,
}

impl Default for HandlerNaming {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            suffix: DEFAULT_CALLBACK_SUFFIX.to_string(),
        }
    }
}

impl HandlerNaming {
    #[must_use]
    pub fn handler_name(&self, contract_name: &str) -> String {
        format!("{}{}{}", self.prefix, contract_name, self.suffix)
    }
}

/// Startup-built table of business handlers
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    naming: HandlerNaming,
    handlers: HashMap<String, Arc<dyn CallbackHandler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new(naming: HandlerNaming) -> Self {
        Self {
            naming,
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for `contract_name` under the conventional name
    #[must_use]
    pub fn with_handler(mut self, contract_name: &str, handler: Arc<dyn CallbackHandler>) -> Self {
        self.register(contract_name, handler);
        self
    }

    pub fn register(&mut self, contract_name: &str, handler: Arc<dyn CallbackHandler>) {
        let name = self.naming.handler_name(contract_name);
        if self.handlers.insert(name.clone(), handler).is_some() {
            warn!(handler = %name, "Replacing registered handler");
        }
    }

    #[must_use]
    pub fn handler_name(&self, contract_name: &str) -> String {
        self.naming.handler_name(contract_name)
    }

    #[must_use]
    pub fn resolve(&self, contract_name: &str) -> Option<(String, Arc<dyn CallbackHandler>)> {
        let name = self.naming.handler_name(contract_name);
        self.handlers.get(&name).map(|h| (name, Arc::clone(h)))
    }

    /// Registered handler names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    /// Handler reported the sentinel; counts as success
    AlreadyProcessed,
    /// No handler for the contract; dropped with a warning
    Unmapped { handler_name: String },
    /// Recorded in the error sink
    Failed { handler_name: String, error: String },
}

impl RouteOutcome {
    /// The message is consumed without error
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, RouteOutcome::Delivered | RouteOutcome::AlreadyProcessed)
    }
}

pub struct CallbackRouter {
    registry: HandlerRegistry,
    error_sink: Arc<dyn DatabaseClient>,
    handler_timeout: Duration,
}

impl CallbackRouter {
    #[must_use]
    pub fn new(registry: HandlerRegistry, error_sink: Arc<dyn DatabaseClient>) -> Self {
        Self {
            registry,
            error_sink,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Run the handler in its own task so it can be cancelled on timeout
    /// and a panic stays contained.
    async fn invoke(
        &self,
        handler: Arc<dyn CallbackHandler>,
        payload: &CallbackPayload,
    ) -> Result<(), HandlerError> {
        let owned = payload.clone();
        let mut task = tokio::spawn(async move { handler.handle(&owned).await });

        match tokio::time::timeout(self.handler_timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(HandlerError::Failed(format!(
                "handler panicked: {}",
                join_error
            ))),
            Err(_) => {
                task.abort();
                Err(HandlerError::Failed(format!(
                    "handler timed out after {:?}",
                    self.handler_timeout
                )))
            }
        }
    }

    #[instrument(skip(self, payload), fields(tx = %payload.tx, chain = %payload.chain, contract = %payload.contract_name))]
    pub async fn route(&self, payload: &CallbackPayload) -> RouteOutcome {
        let Some((handler_name, handler)) = self.registry.resolve(&payload.contract_name) else {
            let handler_name = self.registry.handler_name(&payload.contract_name);
            warn!(handler = %handler_name, "No handler registered, dropping message");
            return RouteOutcome::Unmapped { handler_name };
        };

        match self.invoke(handler, payload).await {
            Ok(()) => {
                info!(handler = %handler_name, "Callback delivered");
                RouteOutcome::Delivered
            }
            Err(HandlerError::AlreadyProcessed) => {
                info!(handler = %handler_name, "Callback already processed");
                RouteOutcome::AlreadyProcessed
            }
            Err(HandlerError::Failed(message)) => {
                error!(handler = %handler_name, error = %message, "Callback failed");
                let record = CallbackError::new(payload, &handler_name, &message);
                if let Err(e) = self.error_sink.insert_callback_error(&record).await {
                    error!(handler = %handler_name, error = ?e, "Failed to record callback error");
                }
                RouteOutcome::Failed {
                    handler_name,
                    error: message,
                }
            }
        }
    }
}
