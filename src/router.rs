//! Message routing.
//!
//! The [`Router`] maps a message to one connected client: an explicit
//! `target_client_id` always wins; otherwise the method's routing rule, then
//! the default target type, selects a client type and the first connected
//! client of that type receives the message. Selection is deliberately
//! naive: no load balancing or health weighting.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::RoutingConfig;
use crate::models::client::ClientType;
use crate::models::message::Message;
use crate::registry::StateRegistry;
use crate::{AppError, Result};

const ERROR_CAPACITY: usize = 64;

/// Destination for routed messages.
pub trait MessageSink: Send + Sync {
    /// Hand one routed message to the wire.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the message cannot be queued.
    fn deliver(&self, message: Message) -> Result<()>;
}

/// A routing failure, raised alongside the `false` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingFailure {
    /// Message that could not be routed.
    pub message_id: String,
    /// Why routing failed.
    pub error: AppError,
}

/// Rule-driven router over the live registry.
pub struct Router {
    config: RoutingConfig,
    registry: Arc<StateRegistry>,
    sink: Arc<dyn MessageSink>,
    errors: broadcast::Sender<RoutingFailure>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Create a router delivering into `sink`.
    #[must_use]
    pub fn new(
        config: RoutingConfig,
        registry: Arc<StateRegistry>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        let (errors, _) = broadcast::channel(ERROR_CAPACITY);
        Self {
            config,
            registry,
            sink,
            errors,
        }
    }

    /// Subscribe to routing failures.
    #[must_use]
    pub fn subscribe_errors(&self) -> broadcast::Receiver<RoutingFailure> {
        self.errors.subscribe()
    }

    /// Client type for `message`: its method's rule, else the default type.
    #[must_use]
    pub fn determine_target_type(&self, message: &Message) -> Option<ClientType> {
        self.config
            .rules
            .get(&message.method)
            .map(|rule| rule.target_type)
            .or(self.config.default_target_type)
    }

    /// Route `message`, returning `true` on delivery.
    ///
    /// Failures are also raised on [`Self::subscribe_errors`].
    pub async fn route_message(&self, message: &Message) -> bool {
        self.try_route(message).await.is_ok()
    }

    /// Route `message`, returning the delivered copy.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Routing` when no target type can be determined or
    /// no client of that type is connected, or the sink's delivery error.
    /// Every failure is also raised on [`Self::subscribe_errors`].
    pub async fn try_route(&self, message: &Message) -> Result<Message> {
        let resolved = self.resolve(message).await;
        self.deliver(message, resolved)
    }

    /// Route `message` to the first connected client of `client_type`,
    /// bypassing the routing rules.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Routing` when no client of that type is connected,
    /// or the sink's delivery error. Every failure is also raised on
    /// [`Self::subscribe_errors`].
    pub async fn route_to_type(&self, message: &Message, client_type: ClientType) -> Result<Message> {
        let resolved = self.first_of_type(message, client_type).await;
        self.deliver(message, resolved)
    }

    fn deliver(&self, message: &Message, resolved: Result<Message>) -> Result<Message> {
        let result = resolved.and_then(|routed| {
            self.sink.deliver(routed.clone())?;
            Ok(routed)
        });

        match &result {
            Ok(routed) => debug!(
                message_id = %routed.id,
                method = %routed.method,
                target = routed.target_client_id.as_deref().unwrap_or_default(),
                "message routed"
            ),
            Err(err) => {
                warn!(message_id = %message.id, method = %message.method, %err, "routing failed");
                let _ = self.errors.send(RoutingFailure {
                    message_id: message.id.clone(),
                    error: err.clone(),
                });
            }
        }
        result
    }

    async fn resolve(&self, message: &Message) -> Result<Message> {
        if message.target_client_id.is_some() {
            return Ok(message.clone());
        }

        let target_type = self.determine_target_type(message).ok_or_else(|| {
            AppError::Routing(format!(
                "Unable to determine target type for method {}",
                message.method
            ))
        })?;
        self.first_of_type(message, target_type).await
    }

    async fn first_of_type(&self, message: &Message, target_type: ClientType) -> Result<Message> {
        let candidates = self
            .registry
            .get_connected_clients_by_type(target_type)
            .await;
        let target = candidates.first().ok_or_else(|| {
            AppError::Routing(format!(
                "No available clients of type {target_type} for method {}",
                message.method
            ))
        })?;

        Ok(message.clone().with_target(target.id.clone()))
    }
}
