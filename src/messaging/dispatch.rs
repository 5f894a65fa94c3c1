use std::sync::Arc;

use anyhow::bail;
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::endpoint::Endpoint;
use crate::messaging::message::{Message, MessageVariant, TypeTag};
use crate::messaging::registry::MessageRegistry;


pub type HandlerFn = Arc<dyn Fn(&dyn Endpoint, &dyn Message) + Send + Sync>;

enum Binding {
    Handler(HandlerFn),
    Ignore,
}

/// Routes received messages to per-variant handlers, keyed by type tag.
///
/// Handlers are invoked from an endpoint's receive loop, serially per endpoint - but different
///  endpoints dispatch concurrently, so a handler shared across endpoints must be thread-safe.
pub struct MessageDispatcher {
    registry: Arc<MessageRegistry>,
    bindings: FxHashMap<TypeTag, Binding>,
    default_handler: HandlerFn,
}

impl MessageDispatcher {
    pub fn builder(registry: Arc<MessageRegistry>) -> MessageDispatcherBuilder {
        MessageDispatcherBuilder {
            registry,
            bindings: Default::default(),
            default_handler: None,
        }
    }

    /// Dispatches one received message. `None` stands for a cancelled or undecodable read and
    ///  is ignored.
    pub fn handle(&self, endpoint: &dyn Endpoint, message: Option<Box<dyn Message>>) {
        let message = match message {
            Some(m) => m,
            None => return,
        };

        let tag = self.registry.tag_of(message.canonical_name());
        match self.bindings.get(&tag) {
            Some(Binding::Handler(handler)) => handler(endpoint, message.as_ref()),
            Some(Binding::Ignore) => {}
            None => (self.default_handler)(endpoint, message.as_ref()),
        }
    }
}


pub struct MessageDispatcherBuilder {
    registry: Arc<MessageRegistry>,
    bindings: FxHashMap<TypeTag, Binding>,
    default_handler: Option<HandlerFn>,
}

impl std::fmt::Debug for MessageDispatcherBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDispatcherBuilder")
            .field("bindings", &self.bindings.len())
            .field("default_handler", &self.default_handler.is_some())
            .finish()
    }
}

impl MessageDispatcherBuilder {
    /// Binds a handler for one message variant. The variant must already be registered, and a
    ///  tag can be bound at most once (including [MessageDispatcherBuilder::ignore] bindings).
    pub fn on<M: MessageVariant>(
        mut self,
        handler: impl Fn(&dyn Endpoint, &M) + Send + Sync + 'static,
    ) -> anyhow::Result<MessageDispatcherBuilder> {
        let tag = self.bindable_tag(M::NAME)?;
        let handler: HandlerFn = Arc::new(move |endpoint, message: &dyn Message| {
            match message.as_any().downcast_ref::<M>() {
                Some(m) => handler(endpoint, m),
                None => warn!("message {:?} dispatched under the wrong tag, dropping", message),
            }
        });
        self.bindings.insert(tag, Binding::Handler(handler));
        Ok(self)
    }

    /// Binds a variant to a no-op sink: received instances are consumed silently instead of
    ///  falling through to the default handler.
    pub fn ignore<M: MessageVariant>(mut self) -> anyhow::Result<MessageDispatcherBuilder> {
        let tag = self.bindable_tag(M::NAME)?;
        self.bindings.insert(tag, Binding::Ignore);
        Ok(self)
    }

    /// Replaces the default handler invoked for messages without a binding. The built-in
    ///  default logs a diagnostic.
    pub fn with_default(mut self, handler: impl Fn(&dyn Endpoint, &dyn Message) + Send + Sync + 'static) -> MessageDispatcherBuilder {
        self.default_handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> MessageDispatcher {
        MessageDispatcher {
            registry: self.registry,
            bindings: self.bindings,
            default_handler: self.default_handler.unwrap_or_else(|| {
                Arc::new(|_endpoint, message: &dyn Message| {
                    warn!("no handler registered for message {:?}", message);
                })
            }),
        }
    }

    fn bindable_tag(&self, name: &'static str) -> anyhow::Result<TypeTag> {
        let tag = self.registry.tag_of(name);
        if tag == TypeTag::UNKNOWN {
            bail!("cannot bind a handler for unregistered message type {}", name);
        }
        if self.bindings.contains_key(&tag) {
            bail!("duplicate handler for message type {}", name);
        }
        Ok(tag)
    }
}


#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use super::*;
    use crate::messaging::system_messages::InactivityCheck;
    use crate::test_util::{registry_with_test_messages, NullEndpoint, StringMessage};

    #[test]
    fn test_dispatches_to_bound_handler() {
        let registry = Arc::new(registry_with_test_messages());
        let seen: Arc<Mutex<Vec<String>>> = Default::default();

        let tracked = seen.clone();
        let dispatcher = MessageDispatcher::builder(registry)
            .on::<StringMessage>(move |_endpoint, msg| {
                tracked.lock().unwrap().push(msg.text.clone());
            })
            .unwrap()
            .build();

        let endpoint = NullEndpoint::new();
        dispatcher.handle(&endpoint, Some(Box::new(StringMessage { text: "a".to_string() })));
        dispatcher.handle(&endpoint, Some(Box::new(StringMessage { text: "b".to_string() })));

        assert_eq!(*seen.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_unbound_goes_to_default() {
        let registry = Arc::new(registry_with_test_messages());
        let defaulted: Arc<Mutex<usize>> = Default::default();

        let tracked = defaulted.clone();
        let dispatcher = MessageDispatcher::builder(registry)
            .with_default(move |_endpoint, _message| {
                *tracked.lock().unwrap() += 1;
            })
            .build();

        let endpoint = NullEndpoint::new();
        dispatcher.handle(&endpoint, Some(Box::new(InactivityCheck)));
        assert_eq!(*defaulted.lock().unwrap(), 1);
    }

    #[test]
    fn test_ignored_variant_is_swallowed() {
        let registry = Arc::new(registry_with_test_messages());
        let defaulted: Arc<Mutex<usize>> = Default::default();

        let tracked = defaulted.clone();
        let dispatcher = MessageDispatcher::builder(registry)
            .ignore::<InactivityCheck>()
            .unwrap()
            .with_default(move |_endpoint, _message| {
                *tracked.lock().unwrap() += 1;
            })
            .build();

        let endpoint = NullEndpoint::new();
        dispatcher.handle(&endpoint, Some(Box::new(InactivityCheck)));
        assert_eq!(*defaulted.lock().unwrap(), 0);
    }

    #[test]
    fn test_null_message_is_a_no_op() {
        let registry = Arc::new(registry_with_test_messages());
        let dispatcher = MessageDispatcher::builder(registry).build();
        let endpoint = NullEndpoint::new();
        dispatcher.handle(&endpoint, None);
    }

    #[test]
    fn test_duplicate_handler_fails() {
        let registry = Arc::new(registry_with_test_messages());
        let err = MessageDispatcher::builder(registry)
            .on::<StringMessage>(|_, _| {})
            .unwrap()
            .on::<StringMessage>(|_, _| {})
            .unwrap_err();
        assert!(err.to_string().contains("duplicate handler"));
    }

    #[test]
    fn test_handler_over_ignore_fails() {
        let registry = Arc::new(registry_with_test_messages());
        let err = MessageDispatcher::builder(registry)
            .ignore::<StringMessage>()
            .unwrap()
            .on::<StringMessage>(|_, _| {})
            .unwrap_err();
        assert!(err.to_string().contains("duplicate handler"));
    }

    #[test]
    fn test_unregistered_binding_fails() {
        let registry = Arc::new(MessageRegistry::new());
        assert!(MessageDispatcher::builder(registry).on::<StringMessage>(|_, _| {}).is_err());
    }
}
