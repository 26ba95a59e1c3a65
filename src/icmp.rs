//! Read and write ICMP messages.
//!
//! Only the fields shared by every message plus the echo identifier and
//! sequence number are exposed, which is all a probe needs.
use crate::{checksum::Checksum, Error, Result};
use byteorder::{ByteOrder, NetworkEndian};
use std::io::Read;

/// An ICMP packet.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub struct Packet<B: AsRef<[u8]>> {
    buf: B,
}

impl<B: AsRef<[u8]>> Packet<B> {
    /// Create a new ICMP packet.
    ///
    /// # Errors
    ///
    /// Fails when the buffer is smaller than the ICMP header size.
    #[inline]
    #[must_use]
    pub fn new(buf: B) -> Result<Self> {
        if buf.as_ref().len() >= HEADER_LEN {
            Ok(Self { buf })
        } else {
            Err(Error::CannotParse("buffer too small"))
        }
    }

    /// Create a new ICMP packet without checking the buffer length.
    ///
    /// # Safety
    ///
    /// The buffer must be at least [`HEADER_LEN`] bytes long.
    #[inline]
    #[must_use]
    pub unsafe fn new_unchecked(buf: B) -> Self {
        Self { buf }
    }

    /// Create a new [`PacketBuilder`] that modifies a buffer of bytes in-place.
    ///
    /// # Errors
    ///
    /// See [`PacketBuilder::new`].
    pub fn builder<T>(buf: T) -> Result<PacketBuilder<T>>
    where
        T: AsRef<[u8]> + AsMut<[u8]>,
    {
        PacketBuilder::new(buf)
    }

    /// Extract the "type" header field.
    #[inline]
    #[must_use]
    pub fn typ(&self) -> u8 {
        let data = self.buf.as_ref();
        data[offsets::TYPE]
    }

    /// Extract the "code" header field.
    #[inline]
    #[must_use]
    pub fn code(&self) -> u8 {
        let data = self.buf.as_ref();
        data[offsets::CODE]
    }

    /// Extract the header checksum.
    #[inline]
    #[must_use]
    pub fn checksum(&self) -> u16 {
        let data = self.buf.as_ref();
        NetworkEndian::read_u16(&data[offsets::CHECKSUM])
    }

    /// Extract the echo identifier. Only meaningful for echo messages.
    #[inline]
    #[must_use]
    pub fn ident(&self) -> u16 {
        let data = self.buf.as_ref();
        NetworkEndian::read_u16(&data[offsets::IDENT])
    }

    /// Extract the echo sequence number. Only meaningful for echo messages.
    #[inline]
    #[must_use]
    pub fn sequence(&self) -> u16 {
        let data = self.buf.as_ref();
        NetworkEndian::read_u16(&data[offsets::SEQUENCE])
    }

    /// Get a reference to the payload bytes. For error messages like
    /// [`DEST_UNREACHABLE`] this is the offending IP header and the first
    /// bytes of its payload.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        let data = self.buf.as_ref();
        &data[offsets::PAYLOAD]
    }

    /// Whether the checksum covering the whole message is correct.
    #[inline]
    #[must_use]
    pub fn verify_checksum(&self) -> bool {
        Checksum::new().add(self.buf.as_ref()).finish() == 0
    }

    /// Get a reference to the underlying bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }
}

/// Builder for constructing ICMP [`Packet`] instances in-place.
pub struct PacketBuilder<B: AsRef<[u8]> + AsMut<[u8]>> {
    buf: B,
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> PacketBuilder<B> {
    /// Create a new [`PacketBuilder`] from an underlying byte buffer. The
    /// buffer should be exactly as long as the message, because the checksum
    /// covers all of it.
    ///
    /// # Errors
    ///
    /// Fails when the buffer is shorter than [`HEADER_LEN`] bytes long.
    #[inline]
    #[must_use]
    pub fn new(buf: B) -> Result<Self> {
        if buf.as_ref().len() >= HEADER_LEN {
            Ok(Self { buf })
        } else {
            Err(Error::CannotParse("buffer too small"))
        }
    }

    /// Set the "type" field.
    #[inline]
    #[must_use]
    pub fn typ(mut self, typ: u8) -> Self {
        self.buf.as_mut()[offsets::TYPE] = typ;
        self
    }

    /// Set the "code" field.
    #[inline]
    #[must_use]
    pub fn code(mut self, code: u8) -> Self {
        self.buf.as_mut()[offsets::CODE] = code;
        self
    }

    /// Set the echo identifier.
    #[inline]
    #[must_use]
    pub fn ident(mut self, ident: u16) -> Self {
        NetworkEndian::write_u16(&mut self.buf.as_mut()[offsets::IDENT], ident);
        self
    }

    /// Set the echo sequence number.
    #[inline]
    #[must_use]
    pub fn sequence(mut self, sequence: u16) -> Self {
        NetworkEndian::write_u16(&mut self.buf.as_mut()[offsets::SEQUENCE], sequence);
        self
    }

    /// Set the payload.
    ///
    /// # Errors
    ///
    /// Returns an error when [`Read`](std::io::Read) returns any error other
    /// than [`ErrorKind::Interrupted`](std::io::ErrorKind::Interrupted).
    #[inline]
    #[must_use]
    pub fn payload<R: Read>(mut self, payload: R) -> Result<Self> {
        crate::write_all_bytes(payload, &mut self.buf.as_mut()[offsets::PAYLOAD])?;
        Ok(self)
    }

    /// Compute the checksum over the whole buffer and write it to the checksum
    /// field.
    #[inline]
    #[must_use]
    pub fn gen_checksum(mut self) -> Self {
        let data = self.buf.as_mut();
        data[offsets::CHECKSUM].fill(0);
        let checksum = Checksum::new().add(data).finish();
        NetworkEndian::write_u16(&mut data[offsets::CHECKSUM], checksum);
        self
    }

    /// Get the built [`Packet`] instance.
    #[inline]
    #[must_use]
    pub fn build(self) -> Packet<B> {
        // Safe because of the preconditions asserted in [`PacketBuilder::new`]
        unsafe { Packet::new_unchecked(self.buf) }
    }
}

mod offsets {
    use std::ops::{Range, RangeFrom};
    pub(crate) const TYPE: usize = 0;
    pub(crate) const CODE: usize = 1;
    pub(crate) const CHECKSUM: Range<usize> = 2..4;
    pub(crate) const IDENT: Range<usize> = 4..6;
    pub(crate) const SEQUENCE: Range<usize> = 6..8;
    pub(crate) const PAYLOAD: RangeFrom<usize> = 8..;
}

/// Size of the ICMP header, including the rest-of-header word.
pub const HEADER_LEN: usize = 8;

pub const ECHO_REPLY: u8 = 0;
pub const DEST_UNREACHABLE: u8 = 3;
pub const ECHO_REQUEST: u8 = 8;
pub const TIME_EXCEEDED: u8 = 11;
