use std::any::Any;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::net::TcpStream;
use tokio::time;

use crate::endpoint::endpoint_events::{EndpointEvent, EndpointEventListener};
use crate::endpoint::{Endpoint, EndpointCore};
use crate::messaging::dispatch::MessageDispatcher;
use crate::messaging::message::{EndpointKind, Message, MessageDescriptor, MessageVariant, PermittedSender};
use crate::messaging::registry::MessageRegistry;
use crate::util::buf::{BufExt, BufMutExt};
use crate::util::cancellation::CancelToken;


/// The user-defined message the unit tests run through registry, codec and dispatch.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct StringMessage {
    pub text: String,
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

impl StringMessage {
    pub fn deser_boxed(buf: &mut &[u8]) -> anyhow::Result<Box<dyn Message>> {
        let text = buf.try_get_string()?;
        Ok(Box::new(StringMessage { text }))
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


pub fn registry_with_test_messages() -> MessageRegistry {
    let registry = MessageRegistry::new();
    registry.register([StringMessage::descriptor()]).unwrap();
    registry
}


/// An endpoint that is never connected to anything - dispatch tests need a `&dyn Endpoint` to
///  hand to handlers.
pub struct NullEndpoint {
    core: EndpointCore,
}

impl NullEndpoint {
    pub fn new() -> NullEndpoint {
        let registry = Arc::new(registry_with_test_messages());
        let dispatcher = Arc::new(MessageDispatcher::builder(registry.clone()).build());
        NullEndpoint {
            core: EndpointCore::new(registry, dispatcher, Default::default(), EndpointKind::Client),
        }
    }
}

impl Default for NullEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Endpoint for NullEndpoint {
    fn core(&self) -> &EndpointCore {
        &self.core
    }

    async fn handshake(&self, _stream: &mut TcpStream, _cancel: &mut CancelToken) -> bool {
        false
    }
}


/// Records every lifecycle event and lets tests wait for one to show up.
pub struct RecordingEventListener {
    events: Mutex<Vec<EndpointEvent>>,
}

impl RecordingEventListener {
    pub fn new() -> Arc<RecordingEventListener> {
        Arc::new(RecordingEventListener {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<EndpointEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count_matching(&self, predicate: impl Fn(&EndpointEvent) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }

    /// Polls until an event matching the predicate was recorded or the timeout elapsed.
    pub async fn await_event(&self, predicate: impl Fn(&EndpointEvent) -> bool, timeout: Duration) -> bool {
        let deadline = time::Instant::now() + timeout;
        loop {
            if self.count_matching(&predicate) > 0 {
                return true;
            }
            if time::Instant::now() >= deadline {
                return false;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait::async_trait]
impl EndpointEventListener for RecordingEventListener {
    async fn on_endpoint_event(&self, event: EndpointEvent) {
        self.events.lock().unwrap().push(event);
    }
}
