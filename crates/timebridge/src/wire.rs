//! Wire timestamp convention.
//!
//! A payload is the big-endian encoding of the call arguments, optionally
//! followed by the sender's logical deadline:
//!
//! ```text
//! ┌──────────────────────────────┬──────────────────────────┐
//! │ arguments (WireCodec)        │ i64 BE ns since epoch    │  optional
//! └──────────────────────────────┴──────────────────────────┘
//!   args_len                       8
//! ```
//!
//! Presence is decided by length alone: a timestamp is present iff
//! `payload_len == args_len + 8`. Any other remainder is reported as absent.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use timebridge_reactor::LogicalTime;

use crate::{Stamped, TimestampContext, WireError};

/// Width of the timestamp trailer.
pub const TIMESTAMP_LEN: usize = std::mem::size_of::<i64>();

/// Longest sequence accepted for element types that encode to zero bytes.
pub const MAX_ZERO_SIZED_ELEMENTS: usize = 1 << 16;

/// Big-endian argument encoding.
///
/// Multi-argument calls use tuples, so every call signature has one
/// argument type.
pub trait WireCodec: Sized {
    fn encode(&self, buf: &mut BytesMut);

    fn decode(buf: &mut Bytes) -> Result<Self, WireError>;
}

fn ensure(buf: &Bytes, needed: usize) -> Result<(), WireError> {
    if buf.remaining() < needed {
        return Err(WireError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

macro_rules! impl_codec_primitive {
    ($($ty:ty => $put:ident, $get:ident;)*) => {
        $(
            impl WireCodec for $ty {
                fn encode(&self, buf: &mut BytesMut) {
                    buf.$put(*self);
                }

                fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
                    ensure(buf, std::mem::size_of::<$ty>())?;
                    Ok(buf.$get())
                }
            }
        )*
    };
}

impl_codec_primitive! {
    u8 => put_u8, get_u8;
    i8 => put_i8, get_i8;
    u16 => put_u16, get_u16;
    i16 => put_i16, get_i16;
    u32 => put_u32, get_u32;
    i32 => put_i32, get_i32;
    u64 => put_u64, get_u64;
    i64 => put_i64, get_i64;
    f32 => put_f32, get_f32;
    f64 => put_f64, get_f64;
}

impl WireCodec for () {
    fn encode(&self, _buf: &mut BytesMut) {}

    fn decode(_buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(())
    }
}

impl WireCodec for bool {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(u8::from(*self));
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        match u8::decode(buf)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(WireError::InvalidBool(other)),
        }
    }
}

fn put_len(buf: &mut BytesMut, len: usize) {
    buf.put_u32(u32::try_from(len).unwrap_or(u32::MAX));
}

impl WireCodec for String {
    fn encode(&self, buf: &mut BytesMut) {
        put_len(buf, self.len());
        buf.put_slice(self.as_bytes());
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let len = u32::decode(buf)? as usize;
        ensure(buf, len)?;
        let raw = buf.split_to(len);
        String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }
}

impl<T: WireCodec> WireCodec for Vec<T> {
    fn encode(&self, buf: &mut BytesMut) {
        put_len(buf, self.len());
        for item in self {
            item.encode(buf);
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let len = u32::decode(buf)? as usize;
        // Zero-sized elements consume no input, so only the prefix bounds the loop.
        if std::mem::size_of::<T>() == 0 && len > MAX_ZERO_SIZED_ELEMENTS {
            return Err(WireError::TooManyElements {
                len,
                max: MAX_ZERO_SIZED_ELEMENTS,
            });
        }
        let mut items = Vec::with_capacity(len.min(buf.remaining()));
        for _ in 0..len {
            items.push(T::decode(buf)?);
        }
        Ok(items)
    }
}

macro_rules! impl_codec_tuple {
    ($($name:ident $var:ident),+) => {
        impl<$($name: WireCodec),+> WireCodec for ($($name,)+) {
            fn encode(&self, buf: &mut BytesMut) {
                let ($($var,)+) = self;
                $($var.encode(buf);)+
            }

            fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
                Ok(($($name::decode(buf)?,)+))
            }
        }
    };
}

impl_codec_tuple!(A a);
impl_codec_tuple!(A a, B b);
impl_codec_tuple!(A a, B b, C c);
impl_codec_tuple!(A a, B b, C c, D d);

// ============================================================================
// Payloads
// ============================================================================

/// Encodes `args` and, if given, the timestamp trailer.
pub fn encode_payload<T: WireCodec>(args: &T, timestamp: Option<LogicalTime>) -> Bytes {
    let mut buf = BytesMut::new();
    args.encode(&mut buf);
    if let Some(timestamp) = timestamp {
        buf.put_i64(timestamp.as_nanos());
    }
    buf.freeze()
}

/// Decodes the arguments and the trailer, if one is present.
pub fn decode_payload<T: WireCodec>(payload: Bytes) -> Result<Stamped<T>, WireError> {
    let total = payload.len();
    let mut buf = payload;
    let value = T::decode(&mut buf)?;
    let args_len = total - buf.remaining();

    let timestamp = if buf.remaining() == TIMESTAMP_LEN {
        Some(LogicalTime::from_nanos(buf.get_i64()))
    } else {
        if buf.has_remaining() {
            tracing::debug!(
                payload_len = total,
                args_len,
                "trailing bytes do not form a timestamp"
            );
        }
        None
    };
    Ok(Stamped { value, timestamp })
}

/// Encoded length of `args`, without trailer.
pub fn message_size<T: WireCodec>(args: &T) -> usize {
    let mut buf = BytesMut::new();
    args.encode(&mut buf);
    buf.len()
}

/// Reads the trailer of a payload whose arguments take `args_len` bytes.
pub fn timestamp_from_payload(payload: &[u8], args_len: usize) -> Option<LogicalTime> {
    if payload.len() != args_len.checked_add(TIMESTAMP_LEN)? {
        return None;
    }
    let mut trailer = &payload[args_len..];
    Some(LogicalTime::from_nanos(trailer.get_i64()))
}

/// Encodes `args` with whatever timestamp is staged in the [`TimestampContext`].
pub fn marshal_with_context<T: WireCodec>(args: &T) -> Bytes {
    encode_payload(args, TimestampContext::retrieve())
}

/// Decodes `payload` and runs `f` with its trailer staged in the
/// [`TimestampContext`]. Nothing is staged when the trailer is absent.
pub fn unmarshal_staged<T: WireCodec, R>(payload: Bytes, f: impl FnOnce(T) -> R) -> Result<R, WireError> {
    let Stamped { value, timestamp } = decode_payload(payload)?;
    Ok(match timestamp {
        Some(timestamp) => TimestampContext::scoped(timestamp, || f(value)),
        None => f(value),
    })
}
