use anyhow::{bail, Result};
use bytes::{Buf, BufMut, Bytes};

/*
Encoded value layout.
-----------------------------------------------------------
| Meta (1B) | User meta (1B) | Expires at (8B) |   Value   |
-----------------------------------------------------------
The value runs to the end of the entry, its length is implied by the entry bounds.
*/

/// Fixed part of an encoded value.
pub const VALUE_OVERHEAD: usize = 1 + 1 + std::mem::size_of::<u64>(); // 10.

/// A value as it is stored inside a table block. The builder treats `meta`
/// and `user_meta` as opaque, they belong to the versioning layer above.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueStruct {
    pub meta: u8,
    pub user_meta: u8,
    pub expires_at: u64,
    pub value: Bytes,
}

impl ValueStruct {
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn encoded_size(&self) -> usize {
        VALUE_OVERHEAD + self.value.len()
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.meta);
        buf.put_u8(self.user_meta);
        buf.put_u64(self.expires_at);
        buf.put_slice(&self.value);
    }

    pub fn decode(mut raw: &[u8]) -> Result<Self> {
        if raw.remaining() < VALUE_OVERHEAD {
            bail!("encoded value is {} bytes, needs at least {}", raw.len(), VALUE_OVERHEAD);
        }

        let meta = raw.get_u8();
        let user_meta = raw.get_u8();
        let expires_at = raw.get_u64();

        Ok(Self {
            meta,
            user_meta,
            expires_at,
            value: Bytes::copy_from_slice(raw),
        })
    }
}
