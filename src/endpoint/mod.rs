use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::select;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::endpoint::endpoint_config::EndpointConfig;
use crate::endpoint::endpoint_events::{EndpointEvent, EndpointEventListener, EndpointEventNotifier, RawMessageData};
use crate::messaging::codec;
use crate::messaging::codec::{ReadResult, MAX_FRAME_SIZE};
use crate::messaging::dispatch::MessageDispatcher;
use crate::messaging::message::{EndpointKind, Message, MessageVariant};
use crate::messaging::registry::MessageRegistry;
use crate::messaging::system_messages::InactivityCheck;
use crate::util::cancellation::{CancelToken, CancellationSource};
use crate::util::countdown_latch::CountdownLatch;
use crate::util::message_queue::MessageQueue;

pub mod authenticator;
pub mod client_endpoint;
pub mod endpoint_config;
pub mod endpoint_events;
pub mod remote_endpoint;


/// One side of a logical connection. An endpoint owns a *replaceable* socket: the stream of
///  application messages survives the death of an individual TCP connection, the endpoint just
///  keeps transmitting on whatever socket is current.
///
/// The two implementations differ only in how a socket comes into being (a
///  [client_endpoint::ClientEndpoint] dials, a [remote_endpoint::RemoteEndpoint] is handed
///  sockets by the authenticator) and in their half of the handshake.
#[async_trait::async_trait]
pub trait Endpoint: Send + Sync + 'static {
    fn core(&self) -> &EndpointCore;

    /// The variant-specific first frames on a fresh socket. `false` rejects the connection.
    async fn handshake(&self, stream: &mut TcpStream, cancel: &mut CancelToken) -> bool;

    /// Appends a message to the outbound queue. Non-blocking; the message is transmitted by
    ///  the send loop once a socket is available, surviving reconnects until then.
    fn enqueue(&self, message: Arc<dyn Message>) {
        self.core().enqueue(message);
    }

    /// The host-assigned identifier for this endpoint's identity, once the handshake (client)
    ///  or registration (host) established it.
    fn network_identifier(&self) -> Option<u8> {
        self.core().network_identifier()
    }

    /// Closes the current socket, provoking the usual disconnection path (and, for a client
    ///  endpoint, a reconnect cycle).
    fn force_disconnection(&self) {
        self.core().force_disconnection();
    }

    /// Terminates the endpoint: cancels everything, closes the socket. No lifecycle events are
    ///  emitted afterwards. This is the only termination path - there is no goodbye frame.
    fn dispose(&self) {
        self.core().dispose();
    }
}


/// State shared by both endpoint kinds: the queue/latch pair feeding the send loop, the current
///  connection, the activity clock driving inactivity probes, and the lifecycle notifier.
pub struct EndpointCore {
    pub(crate) registry: Arc<MessageRegistry>,
    pub(crate) dispatcher: Arc<MessageDispatcher>,
    pub(crate) config: EndpointConfig,
    kind: EndpointKind,
    queue: MessageQueue,
    latch: CountdownLatch,
    current: Mutex<Option<Connection>>,
    next_connection_id: AtomicU64,
    last_activity: Mutex<Instant>,
    network_identifier: OnceLock<u8>,
    cancel: CancellationSource,
    events: EndpointEventNotifier,
}

/// The current socket's scope. Dropping it cancels the socket's send and receive loops, which
///  in turn drop the stream halves and close the socket.
struct Connection {
    id: u64,
    _cancel: CancellationSource,
}

impl EndpointCore {
    pub(crate) fn new(
        registry: Arc<MessageRegistry>,
        dispatcher: Arc<MessageDispatcher>,
        config: EndpointConfig,
        kind: EndpointKind,
    ) -> EndpointCore {
        EndpointCore {
            registry,
            dispatcher,
            config,
            kind,
            queue: MessageQueue::new(),
            latch: CountdownLatch::new(),
            current: Mutex::new(None),
            next_connection_id: AtomicU64::new(0),
            last_activity: Mutex::new(Instant::now()),
            network_identifier: OnceLock::new(),
            cancel: CancellationSource::new(),
            events: EndpointEventNotifier::new(),
        }
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn network_identifier(&self) -> Option<u8> {
        self.network_identifier.get().copied()
    }

    /// Set-once: the host assigns it at registration, the client adopts it from the login
    ///  confirmation. Reconnects of the same identity must confirm the same value.
    pub(crate) fn adopt_network_identifier(&self, network_identifier: u8) {
        if self.network_identifier.set(network_identifier).is_err() {
            let previous = self.network_identifier();
            if previous != Some(network_identifier) {
                warn!("peer confirmed network identifier {} but {:?} was established earlier - keeping the established value",
                    network_identifier, previous);
            }
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.token()
    }

    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn pending_message_count(&self) -> usize {
        self.queue.len()
    }

    pub fn enqueue(&self, message: Arc<dyn Message>) {
        if !message.permitted_sender().allows(self.kind) {
            warn!("message {:?} is not meant to be sent by a {:?} endpoint", message, self.kind);
            debug_assert!(false, "message enqueued on the wrong side");
        }
        self.queue.enqueue(message);
        self.latch.increment();
    }

    pub async fn add_listener(&self, listener: Arc<dyn EndpointEventListener>) -> Uuid {
        self.events.add_listener(listener).await
    }

    pub async fn try_remove_listener(&self, listener_id: &Uuid) -> anyhow::Result<()> {
        self.events.try_remove_listener(listener_id).await
    }

    pub(crate) async fn emit(&self, event: EndpointEvent) {
        if self.cancel.is_cancelled() {
            return; // a disposed endpoint is silent
        }
        self.events.emit(event).await;
    }

    pub(crate) fn touch_last_activity(&self) {
        *self.last_activity.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn time_since_last_activity(&self) -> Duration {
        self.last_activity.lock().unwrap_or_else(|e| e.into_inner()).elapsed()
    }

    /// Closes the connection with the given id if it is still current. Loops call this on exit
    ///  so that the sibling loop on the same socket is cancelled promptly, without a newer
    ///  connection being torn down by a stale loop.
    fn close_connection(&self, connection_id: u64) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if current.as_ref().map(|c| c.id) == Some(connection_id) {
            *current = None;
        }
    }

    pub fn force_disconnection(&self) {
        let _ = self.current.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    pub fn dispose(&self) {
        self.cancel.cancel();
        let _ = self.current.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}


/// The common tail of every connection attempt: run the variant-specific handshake, then
///  install the socket as current (cancelling whatever was current before) and start the two
///  loops bound to its scope.
///
/// Returns whether the connection was installed.
pub(crate) async fn handle_new_connection(
    endpoint: Arc<dyn Endpoint>,
    mut stream: TcpStream,
    mut attempt_cancel: CancelToken,
) -> bool {
    let core = endpoint.core();

    if attempt_cancel.is_cancelled() || !endpoint.handshake(&mut stream, &mut attempt_cancel).await {
        debug!("handshake failed or was cancelled");
        core.emit(EndpointEvent::ConnectionFailure).await;
        return false;
    }

    core.touch_last_activity();
    core.emit(EndpointEvent::ConnectionSuccess).await;

    let connection_cancel = CancellationSource::linked(&core.cancel_token());
    let send_cancel = connection_cancel.token();
    let receive_cancel = connection_cancel.token();

    let connection_id = core.next_connection_id.fetch_add(1, Ordering::Relaxed);
    {
        let mut current = core.current.lock().unwrap_or_else(|e| e.into_inner());
        let _previous = current.replace(Connection {
            id: connection_id,
            _cancel: connection_cancel,
        });
        // dropping _previous cancels the previous socket's loops
    }

    let (read_half, write_half) = stream.into_split();
    tokio::spawn(send_loop(endpoint.clone(), write_half, send_cancel, connection_id));
    tokio::spawn(receive_loop(endpoint, read_half, receive_cancel, connection_id));
    true
}


/// Transmits queued messages in FIFO order, injecting an inactivity probe when the connection
///  was idle for longer than the configured interval.
///
/// Discipline: peek, send, and only then dequeue/decrement. A failed send leaves the head in
///  place for the next socket; only a successful send may decrement the latch (it never clamps
///  at zero, so an unmatched decrement would corrupt the signal).
async fn send_loop(
    endpoint: Arc<dyn Endpoint>,
    mut write_half: OwnedWriteHalf,
    mut cancel: CancelToken,
    connection_id: u64,
) {
    let core = endpoint.core();
    trace!("starting send loop");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let interval = core.config.inactivity_check_interval;
        let timeout = interval.saturating_sub(core.time_since_last_activity());
        let signalled = select! {
            _ = cancel.cancelled() => break,
            signalled = core.latch.wait_timeout(timeout) => signalled,
        };

        if signalled {
            let message = match core.queue.try_peek() {
                Some(message) => message,
                None => {
                    // a replaced socket's loop can drain the head between our wake-up and the
                    //  peek; treat it as spurious and re-wait
                    tokio::task::yield_now().await;
                    continue;
                }
            };

            let frame = match codec::pack(&core.registry, message.as_ref()) {
                Ok(frame) if frame.len() <= MAX_FRAME_SIZE => frame,
                Ok(frame) => {
                    warn!("dropping message {:?}: packaged size {} exceeds the frame maximum", message, frame.len());
                    core.queue.try_dequeue();
                    core.latch.decrement();
                    continue;
                }
                Err(e) => {
                    warn!("dropping unsendable message: {}", e);
                    core.queue.try_dequeue();
                    core.latch.decrement();
                    continue;
                }
            };

            if codec::write_frame(&mut write_half, &frame, &mut cancel).await {
                core.queue.try_dequeue();
                core.latch.decrement();
                core.touch_last_activity();
                core.emit(EndpointEvent::RawMessageSent(RawMessageData { type_tag: frame.type_tag() })).await;
            } else {
                if cancel.is_cancelled() {
                    break;
                }
                // head stays queued for the next socket
                debug!("send failed, leaving the message at the head of the queue");
                break;
            }
        } else if core.time_since_last_activity() > interval {
            if codec::write_message(&mut write_half, &core.registry, &InactivityCheck, &mut cancel).await {
                trace!("sent inactivity probe");
                core.touch_last_activity();
                let tag = core.registry.tag_of(InactivityCheck::NAME);
                core.emit(EndpointEvent::RawMessageSent(RawMessageData { type_tag: tag })).await;
            } else {
                if cancel.is_cancelled() {
                    break;
                }
                debug!("inactivity probe failed");
                break;
            }
        }
    }

    trace!("send loop terminated");
    core.close_connection(connection_id);
    core.emit(EndpointEvent::Disconnection).await;
}


/// Reads frames and hands them to the dispatcher. Handlers run on this task, so dispatch is
///  serial per endpoint. EOF closes the connection scope, which cancels the send loop and lets
///  it raise the disconnection event.
async fn receive_loop(
    endpoint: Arc<dyn Endpoint>,
    mut read_half: OwnedReadHalf,
    mut cancel: CancelToken,
    connection_id: u64,
) {
    let core = endpoint.core();
    trace!("starting receive loop");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match codec::read_message(&mut read_half, &core.registry, &mut cancel).await {
            ReadResult::Message(message) => {
                let tag = core.registry.tag_of(message.canonical_name());
                core.emit(EndpointEvent::RawMessageReceived(RawMessageData { type_tag: tag })).await;
                core.dispatcher.handle(endpoint.as_ref(), Some(message));
            }
            ReadResult::Unknown => {
                // the frame is consumed; hand the null through so a custom dispatcher can
                //  observe it, then keep reading
                core.dispatcher.handle(endpoint.as_ref(), None);
            }
            ReadResult::Closed => {
                core.dispatcher.handle(endpoint.as_ref(), None);
                break;
            }
        }
    }

    trace!("receive loop terminated");
    core.close_connection(connection_id);
}
