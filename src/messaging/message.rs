use std::any::Any;
use std::fmt::{Debug, Formatter};

use bytes::BytesMut;


/// A [TypeTag] is the first two bytes of every packaged frame and identifies the message
///  variant for deserialization and dispatch on the receiving side.
///
/// Tags are assigned by the [crate::messaging::registry::MessageRegistry] at registration time.
///  `0` is reserved for "unknown / unregistered".
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TypeTag(pub u16);

impl TypeTag {
    pub const UNKNOWN: TypeTag = TypeTag(0);
}

impl Debug for TypeTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04x}({})", self.0, self.0)
    }
}


/// Which side of a connection is a legitimate author of a message variant. This is a
///  development-time aid: enqueueing a message on the wrong side trips a debug assertion
///  and logs a warning, it is not a wire-level check.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PermittedSender {
    Client,
    Host,
    ClientOrHost,
}

impl PermittedSender {
    pub fn allows(&self, kind: EndpointKind) -> bool {
        match self {
            PermittedSender::Client => kind == EndpointKind::Client,
            PermittedSender::Host => kind == EndpointKind::Host,
            PermittedSender::ClientOrHost => true,
        }
    }
}

/// The side an endpoint plays: a client endpoint initiates connections, a host-side (remote)
///  endpoint is created by the authenticator.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum EndpointKind {
    Client,
    Host,
}


/// A message that can travel through an endpoint. Implementations serialize themselves into a
///  byte buffer; deserialization goes through the variant's [MessageDescriptor] so a fresh
///  instance can be built from a received frame.
pub trait Message: Send + Sync + Debug + 'static {
    /// The stable, process-independent name this variant is registered under. Registration
    ///  sorts by this name, so it must be identical on both peers.
    fn canonical_name(&self) -> &'static str;

    fn permitted_sender(&self) -> PermittedSender {
        PermittedSender::ClientOrHost
    }

    fn ser(&self, buf: &mut BytesMut);

    fn as_any(&self) -> &dyn Any;
}

/// Statically known message variants - everything except `dyn Message` trait objects. This is
///  what the dispatch builder keys on, tying a handler's parameter type to the variant's
///  registered name at compile time.
pub trait MessageVariant: Message + Sized {
    const NAME: &'static str;

    fn descriptor() -> MessageDescriptor;
}


pub type DeserFn = fn(&mut &[u8]) -> anyhow::Result<Box<dyn Message>>;

/// Registration unit for a message variant: its canonical name, its permitted author side, and
///  a deserializer that builds a fresh instance from a frame payload.
#[derive(Clone)]
pub struct MessageDescriptor {
    pub name: &'static str,
    pub permitted_sender: PermittedSender,
    pub deser: DeserFn,
}

impl Debug for MessageDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageDescriptor({})", self.name)
    }
}
