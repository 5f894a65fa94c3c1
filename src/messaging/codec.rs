use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tracing::{debug, trace, warn};

use crate::messaging::message::{Message, MessageDescriptor, TypeTag};
use crate::messaging::registry::MessageRegistry;
use crate::util::cancellation::CancelToken;


/// Upper bound for a packaged frame (type tag + payload). This is what the u16 length prefix
///  can express; there is no fragmentation layer on top.
pub const MAX_FRAME_SIZE: usize = 65535;


/// An immutable packaged frame: `[type tag: u16 LE][payload bytes]`. This is the unit that gets
///  length-prefixed on the wire.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackagedMessage {
    bytes: Bytes,
}

impl PackagedMessage {
    pub fn type_tag(&self) -> TypeTag {
        let mut header = &self.bytes[..2];
        TypeTag(header.get_u16_le())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Frame size: type tag plus payload. At least 2, at most [MAX_FRAME_SIZE] for a frame
    ///  that is actually writable.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}


/// Serializes a message into a packaged frame. Fails if the variant was never registered -
///  an unregistered message has no tag the peer could dispatch on.
pub fn pack(registry: &MessageRegistry, message: &dyn Message) -> anyhow::Result<PackagedMessage> {
    let tag = registry.tag_of(message.canonical_name());
    if tag == TypeTag::UNKNOWN {
        bail!("message type {} is not registered", message.canonical_name());
    }

    let mut buf = BytesMut::new();
    buf.put_u16_le(tag.0);
    message.ser(&mut buf);
    Ok(PackagedMessage { bytes: buf.freeze() })
}

/// Deserializes a packaged frame as a specific variant. Fails with a tag mismatch if the frame
///  was packed from a different variant.
pub fn unpack(registry: &MessageRegistry, frame: &PackagedMessage, target: &MessageDescriptor) -> anyhow::Result<Box<dyn Message>> {
    let expected = registry.tag_of(target.name);
    if frame.type_tag() != expected {
        bail!("tag mismatch: frame carries {:?} but {} is registered as {:?}", frame.type_tag(), target.name, expected);
    }

    let mut payload = &frame.as_bytes()[2..];
    (target.deser)(&mut payload)
}

/// Rebuilds a message from a raw frame, dispatching on the frame's type tag. `None` for frames
///  that are too short, carry an unknown tag or fail to deserialize - the frame is consumed
///  either way.
pub fn build_message(registry: &MessageRegistry, frame: &[u8]) -> Option<Box<dyn Message>> {
    if frame.len() < 2 {
        warn!("received a frame shorter than a type tag, dropping");
        return None;
    }

    let tag = TypeTag(u16::from_le_bytes([frame[0], frame[1]]));
    let descriptor = match registry.descriptor_for(tag) {
        Some(d) => d,
        None => {
            debug!("received a frame with unknown type tag {:?}, dropping", tag);
            return None;
        }
    };

    let mut payload = &frame[2..];
    match (descriptor.deser)(&mut payload) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!("received an undecodable frame for {}: {}", descriptor.name, e);
            None
        }
    }
}


/// Writes an already-packaged frame, preceded by its u16 LE size. `false` on cancellation or
///  any I/O failure; a partially written frame is not reported as success.
pub async fn write_frame(stream: &mut (impl AsyncWrite + Unpin), frame: &PackagedMessage, cancel: &mut CancelToken) -> bool {
    if frame.len() > MAX_FRAME_SIZE {
        warn!("frame of {} bytes exceeds the maximum of {}, not writing", frame.len(), MAX_FRAME_SIZE);
        return false;
    }

    let mut buf = BytesMut::with_capacity(2 + frame.len());
    buf.put_u16_le(frame.len() as u16);
    buf.put_slice(frame.as_bytes());

    select! {
        _ = cancel.cancelled() => false,
        r = stream.write_all(&buf) => {
            match r {
                Ok(()) => true,
                Err(e) => {
                    debug!("error writing frame: {}", e);
                    false
                }
            }
        }
    }
}

/// Packs and writes a message. `false` if the message is unregistered, oversize, or the write
///  failed.
pub async fn write_message(stream: &mut (impl AsyncWrite + Unpin), registry: &MessageRegistry, message: &dyn Message, cancel: &mut CancelToken) -> bool {
    let frame = match pack(registry, message) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("not sending message: {}", e);
            return false;
        }
    };
    write_frame(stream, &frame, cancel).await
}


/// What a single read attempt on the wire produced.
pub enum ReadResult {
    /// a complete frame arrived and decoded to a registered variant
    Message(Box<dyn Message>),
    /// a complete frame arrived but did not decode (unknown tag, bad payload) - it is consumed,
    ///  the stream stays usable
    Unknown,
    /// EOF, I/O error or cancellation - the stream is done
    Closed,
}

/// Reads one length-prefixed frame and rebuilds the message. A stream closed mid-frame counts
///  as [ReadResult::Closed]; an intact frame that cannot be decoded as [ReadResult::Unknown].
pub async fn read_message(stream: &mut (impl AsyncRead + Unpin), registry: &MessageRegistry, cancel: &mut CancelToken) -> ReadResult {
    let mut len_buf = [0u8; 2];
    let read = select! {
        _ = cancel.cancelled() => None,
        r = stream.read_exact(&mut len_buf) => r.ok(),
    };
    if read.is_none() {
        trace!("stream closed or cancelled while reading a frame size");
        return ReadResult::Closed;
    }

    let size = u16::from_le_bytes(len_buf) as usize;
    let mut frame = vec![0u8; size];
    let read = select! {
        _ = cancel.cancelled() => None,
        r = stream.read_exact(&mut frame) => r.ok(),
    };
    if read.is_none() {
        debug!("stream closed mid-frame, dropping {} announced bytes", size);
        return ReadResult::Closed;
    }

    match build_message(registry, &frame) {
        Some(message) => ReadResult::Message(message),
        None => ReadResult::Unknown,
    }
}
