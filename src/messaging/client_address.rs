use std::fmt::{Debug, Formatter};

use anyhow::bail;


/// Identity of a client: the 6-byte hardware address of a physical device, plus a 16-bit
///  discriminator so several logical clients can share one device.
///
/// The host keys its client table by hardware address alone - the discriminator travels only
///  inside the identity for logging and diagnostics, it is not part of the wire identification.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct ClientAddress {
    pub hardware_address: [u8; 6],
    pub discriminator: u16,
}

impl Debug for ClientAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let a = &self.hardware_address;
        write!(f, "[{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}#{}]", a[0], a[1], a[2], a[3], a[4], a[5], self.discriminator)
    }
}

impl ClientAddress {
    pub fn new(hardware_address: [u8; 6], discriminator: u16) -> ClientAddress {
        ClientAddress {
            hardware_address,
            discriminator,
        }
    }

    /// Identity derived from the first non-loopback network interface. Only the first 6 bytes
    ///  of the reported address are used, matching what goes over the wire.
    pub fn from_local_interface(discriminator: u16) -> anyhow::Result<ClientAddress> {
        match mac_address::get_mac_address()? {
            Some(address) => Ok(ClientAddress {
                hardware_address: address.bytes(),
                discriminator,
            }),
            None => bail!("no network interface with a hardware address found"),
        }
    }
}
