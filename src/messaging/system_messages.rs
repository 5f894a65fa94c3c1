use std::any::Any;

use anyhow::bail;
use bytes::{Buf, BufMut, BytesMut};

use crate::messaging::message::{Message, MessageDescriptor, MessageVariant, PermittedSender};
use crate::util::buf::BufExt;


/// The built-in message variants every registry starts out with.
pub fn descriptors() -> [MessageDescriptor; 3] {
    [
        Identification::descriptor(),
        LoginConfirmation::descriptor(),
        InactivityCheck::descriptor(),
    ]
}


/// First frame a client sends on a fresh socket: the 6-byte hardware address that identifies
///  the physical device. Platforms that report longer addresses transmit only the first 6 bytes.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct Identification {
    pub hardware_address: [u8; 6],
}

impl MessageVariant for Identification {
    const NAME: &'static str = "tbnf::system::Identification";

    fn descriptor() -> MessageDescriptor {
        MessageDescriptor {
            name: Self::NAME,
            permitted_sender: PermittedSender::Client,
            deser: Self::deser_boxed,
        }
    }
}

impl Identification {
    fn deser_boxed(buf: &mut &[u8]) -> anyhow::Result<Box<dyn Message>> {
        if buf.remaining() < 6 {
            bail!("buffer underflow");
        }
        let mut hardware_address = [0u8; 6];
        buf.copy_to_slice(&mut hardware_address);
        Ok(Box::new(Identification { hardware_address }))
    }
}

impl Message for Identification {
    fn canonical_name(&self) -> &'static str {
        Self::NAME
    }

    fn permitted_sender(&self) -> PermittedSender {
        PermittedSender::Client
    }

    fn ser(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.hardware_address);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}


/// The host's answer to an [Identification]: the network identifier it assigned to (or
///  previously stored for) this hardware address. Completes the handshake on the client side.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct LoginConfirmation {
    pub network_identifier: u8,
}

impl MessageVariant for LoginConfirmation {
    const NAME: &'static str = "tbnf::system::LoginConfirmation";

    fn descriptor() -> MessageDescriptor {
        MessageDescriptor {
            name: Self::NAME,
            permitted_sender: PermittedSender::Host,
            deser: Self::deser_boxed,
        }
    }
}

impl LoginConfirmation {
    fn deser_boxed(buf: &mut &[u8]) -> anyhow::Result<Box<dyn Message>> {
        let network_identifier = BufExt::try_get_u8(buf)?;
        Ok(Box::new(LoginConfirmation { network_identifier }))
    }
}

impl Message for LoginConfirmation {
    fn canonical_name(&self) -> &'static str {
        Self::NAME
    }

    fn permitted_sender(&self) -> PermittedSender {
        PermittedSender::Host
    }

    fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(self.network_identifier);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}


/// Zero-payload probe the send loop injects when a connection was idle for longer than the
///  configured inactivity check interval, so a dead peer is detected by the next write.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct InactivityCheck;

impl MessageVariant for InactivityCheck {
    const NAME: &'static str = "tbnf::system::InactivityCheck";

    fn descriptor() -> MessageDescriptor {
        MessageDescriptor {
            name: Self::NAME,
            permitted_sender: PermittedSender::ClientOrHost,
            deser: Self::deser_boxed,
        }
    }
}

impl InactivityCheck {
    fn deser_boxed(_buf: &mut &[u8]) -> anyhow::Result<Box<dyn Message>> {
        Ok(Box::new(InactivityCheck))
    }
}

impl Message for InactivityCheck {
    fn canonical_name(&self) -> &'static str {
        Self::NAME
    }

    fn ser(&self, _buf: &mut BytesMut) {
        // no payload
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
