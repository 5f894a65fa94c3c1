use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use anyhow::bail;
use bytes::{Buf, BufMut, BytesMut};

use crate::discovery::MAX_DATAGRAM_SIZE;
use crate::util::buf::{BufExt, BufMutExt};


/// What a discoverable host advertises about itself: a human-readable name, the identifier of
///  the application (so discoverers can filter for compatible hosts), and opaque bytes the
///  application can use however it likes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EndpointDescriptor {
    pub name: String,
    pub game_identifier: String,
    pub additional_data: Vec<u8>,
}

/// A discovery answer: the descriptor plus the address of the host's TCP listener.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiscoveredHost {
    pub descriptor: EndpointDescriptor,
    pub address: SocketAddr,
}

impl EndpointDescriptor {
    /// Serializes the descriptor together with the host's listening address into a single
    ///  datagram payload:
    ///
    /// ```ascii
    /// 0: additional data length (u16 LE)
    /// 2: name (varint length + UTF-8)
    /// *: game identifier (varint length + UTF-8)
    /// *: additional data bytes
    /// *: address byte length (u8), followed by that many address bytes
    /// *: TCP port (i32 LE)
    /// ```
    pub fn ser(&self, address: SocketAddr, buf: &mut BytesMut) -> anyhow::Result<()> {
        if self.additional_data.len() > u16::MAX as usize {
            bail!("additional data of {} bytes does not fit the u16 length field", self.additional_data.len());
        }

        buf.put_u16_le(self.additional_data.len() as u16);
        buf.put_string(&self.name);
        buf.put_string(&self.game_identifier);
        buf.put_slice(&self.additional_data);
        match address.ip() {
            IpAddr::V4(ip) => {
                buf.put_u8(4);
                buf.put_slice(&ip.octets());
            }
            IpAddr::V6(ip) => {
                buf.put_u8(16);
                buf.put_slice(&ip.octets());
            }
        }
        buf.put_i32_le(address.port() as i32);

        if buf.len() > MAX_DATAGRAM_SIZE {
            bail!("descriptor of {} bytes does not fit a single datagram", buf.len());
        }
        Ok(())
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<DiscoveredHost> {
        let additional_data_len = BufExt::try_get_u16_le(buf)? as usize;
        let name = buf.try_get_string()?;
        let game_identifier = buf.try_get_string()?;
        let additional_data = buf.try_get_blob(additional_data_len)?;

        let ip = match BufExt::try_get_u8(buf)? {
            4 => {
                let mut octets = [0u8; 4];
                if buf.remaining() < 4 {
                    bail!("buffer underflow");
                }
                buf.copy_to_slice(&mut octets);
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            16 => {
                let mut octets = [0u8; 16];
                if buf.remaining() < 16 {
                    bail!("buffer underflow");
                }
                buf.copy_to_slice(&mut octets);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            n => bail!("invalid address byte length: {}", n),
        };

        let port = BufExt::try_get_i32_le(buf)?;
        if !(0..=u16::MAX as i32).contains(&port) {
            bail!("invalid TCP port: {}", port);
        }

        Ok(DiscoveredHost {
            descriptor: EndpointDescriptor {
                name,
                game_identifier,
                additional_data,
            },
            address: SocketAddr::new(ip, port as u16),
        })
    }
}


#[cfg(test)]
mod test {
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::v4("192.168.1.17:4711", EndpointDescriptor { name: "kitchen table".to_string(), game_identifier: "skirmish".to_string(), additional_data: vec![1, 2, 3] })]
    #[case::v6("[fe80::1]:80", EndpointDescriptor { name: "".to_string(), game_identifier: "g".to_string(), additional_data: vec![] })]
    fn test_round_trip(#[case] address: &str, #[case] descriptor: EndpointDescriptor) {
        let address = SocketAddr::from_str(address).unwrap();

        let mut buf = BytesMut::new();
        descriptor.ser(address, &mut buf).unwrap();

        let host = EndpointDescriptor::try_deser(&mut &buf[..]).unwrap();
        assert_eq!(host.descriptor, descriptor);
        assert_eq!(host.address, address);
    }

    #[test]
    fn test_wire_layout() {
        let descriptor = EndpointDescriptor {
            name: "n".to_string(),
            game_identifier: "g".to_string(),
            additional_data: vec![0xaa],
        };
        let address = SocketAddr::from_str("1.2.3.4:258").unwrap();

        let mut buf = BytesMut::new();
        descriptor.ser(address, &mut buf).unwrap();

        assert_eq!(
            &buf[..],
            &[
                1, 0,            // additional data length, u16 LE
                1, b'n',         // name
                1, b'g',         // game identifier
                0xaa,            // additional data
                4, 1, 2, 3, 4,   // address byte length + IP
                2, 1, 0, 0,      // port 258, i32 LE
            ]
        );
    }

    #[rstest]
    #[case::empty(b"" as &[u8])]
    #[case::truncated_strings(b"\0\0\x05ab" as &[u8])]
    #[case::bad_addr_len(b"\0\0\x01n\x01g\x07" as &[u8])]
    fn test_deser_errors(#[case] mut buf: &[u8]) {
        assert!(EndpointDescriptor::try_deser(&mut buf).is_err());
    }

    #[test]
    fn test_oversize_additional_data() {
        let descriptor = EndpointDescriptor {
            name: "n".to_string(),
            game_identifier: "g".to_string(),
            additional_data: vec![0; u16::MAX as usize + 1],
        };
        let address = SocketAddr::from_str("1.2.3.4:1").unwrap();
        assert!(descriptor.ser(address, &mut BytesMut::new()).is_err());
    }
}
