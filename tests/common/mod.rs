//! Shared plumbing for the socket-level tests: a user-defined message type, collecting
//!  handlers, and polling helpers.

use std::any::Any;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::time;

use tbnf::endpoint::endpoint_config::EndpointConfig;
use tbnf::endpoint::endpoint_events::{EndpointEvent, EndpointEventListener};
use tbnf::messaging::dispatch::{MessageDispatcher, MessageDispatcherBuilder};
use tbnf::messaging::message::{Message, MessageDescriptor, MessageVariant, PermittedSender};
use tbnf::messaging::registry::MessageRegistry;
use tbnf::util::buf::{BufExt, BufMutExt};


#[derive(Clone, Eq, PartialEq, Debug)]
pub struct StringMessage {
    pub text: String,
}

impl StringMessage {
    pub fn new(text: &str) -> StringMessage {
        StringMessage { text: text.to_string() }
    }

    fn deser_boxed(buf: &mut &[u8]) -> anyhow::Result<Box<dyn Message>> {
        let text = buf.try_get_string()?;
        Ok(Box::new(StringMessage { text }))
    }
}

impl MessageVariant for StringMessage {
    const NAME: &'static str = "tbnf::test::StringMessage";

    fn descriptor() -> MessageDescriptor {
        MessageDescriptor {
            name: Self::NAME,
            permitted_sender: PermittedSender::ClientOrHost,
            deser: Self::deser_boxed,
        }
    }
}

impl Message for StringMessage {
    fn canonical_name(&self) -> &'static str {
        Self::NAME
    }

    fn ser(&self, buf: &mut BytesMut) {
        buf.put_string(&self.text);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}


pub fn test_registry() -> Arc<MessageRegistry> {
    let registry = MessageRegistry::new();
    registry.register([StringMessage::descriptor()]).unwrap();
    Arc::new(registry)
}

/// Short intervals so reconnect cycles and inactivity probes happen within test patience.
pub fn test_config() -> EndpointConfig {
    EndpointConfig {
        inactivity_check_interval: Duration::from_millis(500),
        connection_timeout: Duration::from_millis(300),
    }
}


/// A dispatcher that appends every received [StringMessage] to a shared list.
pub fn collecting_dispatcher(registry: Arc<MessageRegistry>) -> (Arc<MessageDispatcher>, Arc<Mutex<Vec<String>>>) {
    let collected: Arc<Mutex<Vec<String>>> = Default::default();
    let dispatcher = string_collector(MessageDispatcher::builder(registry), collected.clone()).build();
    (Arc::new(dispatcher), collected)
}

pub fn string_collector(builder: MessageDispatcherBuilder, collected: Arc<Mutex<Vec<String>>>) -> MessageDispatcherBuilder {
    builder
        .on::<StringMessage>(move |_endpoint, message| {
            collected.lock().unwrap().push(message.text.clone());
        })
        .unwrap()
}

/// A dispatcher that swallows everything silently.
pub fn silent_dispatcher(registry: Arc<MessageRegistry>) -> Arc<MessageDispatcher> {
    Arc::new(
        MessageDispatcher::builder(registry)
            .with_default(|_endpoint, _message| {})
            .build(),
    )
}


/// Counts lifecycle events per kind, for tests that need to observe a transition before
///  acting on it.
pub struct EventCounter {
    events: Mutex<Vec<EndpointEvent>>,
}

impl EventCounter {
    pub fn new() -> Arc<EventCounter> {
        Arc::new(EventCounter {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn disconnections(&self) -> usize {
        self.count(|e| matches!(e, EndpointEvent::Disconnection))
    }

    fn count(&self, predicate: impl Fn(&EndpointEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }
}

#[async_trait::async_trait]
impl EndpointEventListener for EventCounter {
    async fn on_endpoint_event(&self, event: EndpointEvent) {
        self.events.lock().unwrap().push(event);
    }
}


/// Polls `condition` every few milliseconds until it holds or `timeout` elapsed.
pub async fn await_until<F, Fut>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if time::Instant::now() >= deadline {
            return false;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn await_until_sync(condition: impl Fn() -> bool, timeout: Duration) -> bool {
    await_until(|| std::future::ready(condition()), timeout).await
}
