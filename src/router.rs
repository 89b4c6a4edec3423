//! # Message Router
//!
//! Maps a message's `type` tag to a handler. Lookup is an exact string match;
//! anything unregistered goes to the fallback handler, which by default only
//! logs. Handlers destructure `content` into their own typed schema.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RequestError;
use crate::observer::SessionObserver;
use crate::protocol::messages::kinds;
use crate::protocol::Message;
use crate::session::Responder;

/// Something that can serve one message type.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: Message, responder: &mut Responder<'_>) -> Result<(), RequestError>;
}

/// Registry of handlers keyed by type tag, with one fallback entry.
pub struct MessageRouter {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    fallback: Arc<dyn MessageHandler>,
}

impl MessageRouter {
    pub fn new(fallback: Arc<dyn MessageHandler>) -> Self {
        Self {
            handlers: HashMap::new(),
            fallback,
        }
    }

    /// Router whose fallback is the logging `DefaultHandler`.
    pub fn with_default_fallback(observer: Arc<dyn SessionObserver>) -> Self {
        Self::new(Arc::new(DefaultHandler::new(observer)))
    }

    /// Register a handler, returning the one it replaces.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.insert(kind.into(), handler)
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    pub fn dispatch(&self, message: Message, responder: &mut Responder<'_>) -> Result<(), RequestError> {
        match self.handlers.get(&message.kind) {
            Some(handler) => handler.handle(message, responder),
            None => self.fallback.handle(message, responder),
        }
    }
}

/// Fallback for unregistered types.
///
/// `information` and `status` are housekeeping messages from the client and
/// are logged as such; anything else is reported as an unknown type. Neither
/// case produces a response.
pub struct DefaultHandler {
    observer: Arc<dyn SessionObserver>,
}

impl DefaultHandler {
    pub fn new(observer: Arc<dyn SessionObserver>) -> Self {
        Self { observer }
    }
}

impl MessageHandler for DefaultHandler {
    fn handle(&self, message: Message, responder: &mut Responder<'_>) -> Result<(), RequestError> {
        let connection = responder.connection_id();
        match message.kind.as_str() {
            kinds::INFORMATION | kinds::STATUS => {
                self.observer.housekeeping(connection, &message.kind, &message.content)
            }
            _ => self
                .observer
                .unknown_message(connection, &message.kind, &message.content),
        }
        Ok(())
    }
}
