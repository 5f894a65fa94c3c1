use anyhow::anyhow;
use bytes_varint::{VarIntSupport, VarIntSupportMut};


macro_rules! get_try_impl {
    ($try_getter: ident, $ty:ty, $getter: ident) => {
        fn $try_getter(&mut self) -> anyhow::Result<$ty> {
            if self.remaining() < size_of::<$ty>() {
                return Err(anyhow!("buffer underflow"));
            }
            Ok(self.$getter())
        }
    }
}

/// Checked read access on top of [bytes::Buf]. All multi-byte integers on the wire are
///  little-endian, and strings are UTF-8 with a 7-bit-group varint length prefix - this
///  convention is shared by the TCP frame payloads and the discovery datagrams.
pub trait BufExt: bytes::Buf + VarIntSupport {
    get_try_impl!(try_get_u8, u8, get_u8);
    get_try_impl!(try_get_u16_le, u16, get_u16_le);
    get_try_impl!(try_get_u32_le, u32, get_u32_le);
    get_try_impl!(try_get_u64_le, u64, get_u64_le);

    get_try_impl!(try_get_i32_le, i32, get_i32_le);
    get_try_impl!(try_get_i64_le, i64, get_i64_le);

    fn try_get_string(&mut self) -> anyhow::Result<String> {
        let len = self.try_get_usize_varint()?;
        if self.remaining() < len {
            return Err(anyhow!("buffer underflow"));
        }
        let mut buf = vec![0u8; len];
        self.copy_to_slice(&mut buf);
        Ok(String::from_utf8(buf)?)
    }

    fn try_get_blob(&mut self, len: usize) -> anyhow::Result<Vec<u8>> {
        if self.remaining() < len {
            return Err(anyhow!("buffer underflow"));
        }
        let mut buf = vec![0u8; len];
        self.copy_to_slice(&mut buf);
        Ok(buf)
    }
}
impl <T: bytes::Buf> BufExt for T {}

pub trait BufMutExt: bytes::BufMut + VarIntSupportMut {
    fn put_string(&mut self, s: &str) {
        self.put_usize_varint(s.len());
        self.put_slice(s.as_bytes());
    }
}
impl <T: bytes::BufMut> BufMutExt for T {}
