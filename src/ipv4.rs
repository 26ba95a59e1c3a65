//! Read and write IPv4 packets.
//!
//! ## Standards conformance
//!
//! This implementation follows the [RFC
//! 791](https://datatracker.ietf.org/doc/html/rfc791) format as refined by [RFC
//! 2474](https://datatracker.ietf.org/doc/html/rfc2474) and [RFC
//! 3168](https://datatracker.ietf.org/doc/html/rfc3168).
//!
//! Specifically, it re-interprets the original type-of-service field as the
//! modern DSCP and ECN replacements.
use crate::{bitset, checksum::Checksum, setbits, Error, Result};
use byteorder::{ByteOrder, NetworkEndian};
use std::{io::Read, net::Ipv4Addr};

/// An IPv4 packet.
///
/// This struct wraps a byte buffer directly. Nothing is parsed until the
/// field accessor methods are called, like [`Packet::dest`]. Header values
/// are passed as copies when they're small, but the payload is always
/// referred to by reference.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub struct Packet<B: AsRef<[u8]>> {
    buf: B,
}

impl<B: AsRef<[u8]>> Packet<B> {
    /// Create a new IPv4 packet.
    ///
    /// # Errors
    ///
    /// Fails when the buffer is shorter than the minimum header, or when the
    /// header length field points outside of the buffer.
    #[inline]
    #[must_use]
    pub fn new(buf: B) -> Result<Self> {
        let data = buf.as_ref();
        if data.len() < HEADER_LEN {
            return Err(Error::CannotParse("packet too small"));
        }
        let header_len = usize::from(data[offsets::VERSION_IHL] & 0xF) * 4;
        if header_len < HEADER_LEN || header_len > data.len() {
            return Err(Error::CannotParse("invalid header length"));
        }
        Ok(Self { buf })
    }

    /// Create a new IPv4 packet without checking the validity of the buffer.
    ///
    /// # Safety
    ///
    /// The buffer must be at least [`HEADER_LEN`] bytes long and the header
    /// length field must not point past its end.
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

    /// Extract the version.
    #[inline]
    #[must_use]
    pub fn version(&self) -> u8 {
        self.buf.as_ref()[offsets::VERSION_IHL] >> 4
    }

    /// Length of the header in bytes. This is different from the raw field
    /// contained in the IP packet, which reports the length in increments of
    /// [`u32`].
    #[inline]
    #[must_use]
    pub fn header_len(&self) -> usize {
        usize::from(self.buf.as_ref()[offsets::VERSION_IHL] & 0xF) * 4
    }

    /// Extract the differentiated service code point (DSCP).
    #[inline]
    #[must_use]
    pub fn dscp(&self) -> Dscp {
        Dscp {
            data: self.buf.as_ref()[offsets::DSCP_ECN] >> 2,
        }
    }

    /// Extract the explicit congestion notification field (ECN).
    #[inline]
    #[must_use]
    pub fn ecn(&self) -> Ecn {
        Ecn {
            data: self.buf.as_ref()[offsets::DSCP_ECN] & 0b11,
        }
    }

    /// Extract the total length.
    #[inline]
    #[must_use]
    pub fn len(&self) -> u16 {
        NetworkEndian::read_u16(&self.buf.as_ref()[offsets::LEN])
    }

    /// Extract the identification bits.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u16 {
        NetworkEndian::read_u16(&self.buf.as_ref()[offsets::ID])
    }

    /// Extract the flags.
    #[inline]
    #[must_use]
    pub fn flags(&self) -> Flags {
        Flags {
            data: self.buf.as_ref()[offsets::FLAGS_FRAGMENT.start] >> 5,
        }
    }

    /// Extract the fragment offset.
    #[inline]
    #[must_use]
    pub fn fragment_offset(&self) -> u16 {
        NetworkEndian::read_u16(&self.buf.as_ref()[offsets::FLAGS_FRAGMENT]) & 0x1FFF
    }

    /// Extract the time-to-live (TTL).
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> u8 {
        self.buf.as_ref()[offsets::TTL]
    }

    /// Extract the protocol.
    #[inline]
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.buf.as_ref()[offsets::PROTOCOL].into()
    }

    /// Extract the header checksum.
    #[inline]
    #[must_use]
    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buf.as_ref()[offsets::CHECKSUM])
    }

    /// Extract the source address.
    #[inline]
    #[must_use]
    pub fn source(&self) -> Ipv4Addr {
        Ipv4Addr::from(NetworkEndian::read_u32(&self.buf.as_ref()[offsets::SOURCE]))
    }

    /// Extract the destination address.
    #[inline]
    #[must_use]
    pub fn dest(&self) -> Ipv4Addr {
        Ipv4Addr::from(NetworkEndian::read_u32(&self.buf.as_ref()[offsets::DEST]))
    }

    /// Whether the packet has an options field or not
    #[inline]
    #[must_use]
    pub fn has_options(&self) -> bool {
        self.header_len() > HEADER_LEN
    }

    /// Extract the options. You'll have to parse them yourself.
    #[inline]
    #[must_use]
    pub fn options(&self) -> Option<&[u8]> {
        if !self.has_options() {
            return None;
        }
        Some(&self.buf.as_ref()[HEADER_LEN..self.header_end()])
    }

    /// Extract the payload. Trailing bytes past the total length field (for
    /// example Ethernet padding) are not included.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        let data = self.buf.as_ref();
        let start = self.header_end();
        let end = usize::from(self.len()).clamp(start, data.len());
        &data[start..end]
    }

    /// Whether the header checksum is correct.
    #[inline]
    #[must_use]
    pub fn verify_checksum(&self) -> bool {
        let header = &self.buf.as_ref()[..self.header_end()];
        Checksum::new().add(header).finish() == 0
    }

    // Header length bounded by the buffer, for packets from `new_unchecked`.
    fn header_end(&self) -> usize {
        self.header_len().min(self.buf.as_ref().len())
    }

    /// Get a reference to the underlying bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }
}

/// Builder for constructing [`Packet`] instances in-place.
pub struct PacketBuilder<B: AsRef<[u8]> + AsMut<[u8]>> {
    buf: B,
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> PacketBuilder<B> {
    /// Create a new [`PacketBuilder`] from an underlying byte buffer. This will
    /// modify the buffer in-place.
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

    /// Set the version.
    #[inline]
    #[must_use]
    pub fn version(mut self, version: u8) -> Self {
        let data = self.buf.as_mut();
        data[offsets::VERSION_IHL] = setbits(data[offsets::VERSION_IHL], version << 4, 0xF0);
        self
    }

    /// Set the header length, in bytes. The value is rounded down to a
    /// multiple of four.
    #[inline]
    #[must_use]
    pub fn header_len(mut self, len: u8) -> Self {
        let data = self.buf.as_mut();
        data[offsets::VERSION_IHL] = setbits(data[offsets::VERSION_IHL], len / 4, 0x0F);
        self
    }

    /// Set the DSCP field.
    #[inline]
    #[must_use]
    pub fn dscp(mut self, dscp: Dscp) -> Self {
        let data = self.buf.as_mut();
        data[offsets::DSCP_ECN] = setbits(data[offsets::DSCP_ECN], dscp.data << 2, 0xFC);
        self
    }

    /// Set the ECN field.
    #[inline]
    #[must_use]
    pub fn ecn(mut self, ecn: Ecn) -> Self {
        let data = self.buf.as_mut();
        data[offsets::DSCP_ECN] = setbits(data[offsets::DSCP_ECN], ecn.data, 0b11);
        self
    }

    /// Set the total length.
    #[inline]
    #[must_use]
    pub fn len(mut self, len: u16) -> Self {
        NetworkEndian::write_u16(&mut self.buf.as_mut()[offsets::LEN], len);
        self
    }

    /// Set the identification field.
    #[inline]
    #[must_use]
    pub fn id(mut self, id: u16) -> Self {
        NetworkEndian::write_u16(&mut self.buf.as_mut()[offsets::ID], id);
        self
    }

    /// Set the control flags.
    #[inline]
    #[must_use]
    pub fn flags(mut self, flags: Flags) -> Self {
        let data = self.buf.as_mut();
        let byte = offsets::FLAGS_FRAGMENT.start;
        data[byte] = setbits(data[byte], flags.data << 5, 0xE0);
        self
    }

    /// Set the fragment offset. Only the low 13 bits are used.
    #[inline]
    #[must_use]
    pub fn fragment_offset(mut self, offset: u16) -> Self {
        let data = &mut self.buf.as_mut()[offsets::FLAGS_FRAGMENT];
        let current = NetworkEndian::read_u16(data);
        NetworkEndian::write_u16(data, (current & !0x1FFF) | (offset & 0x1FFF));
        self
    }

    /// Set the time-to-live.
    #[inline]
    #[must_use]
    pub fn ttl(mut self, ttl: u8) -> Self {
        self.buf.as_mut()[offsets::TTL] = ttl;
        self
    }

    /// Set the protocol of the payload.
    #[inline]
    #[must_use]
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.buf.as_mut()[offsets::PROTOCOL] = protocol.into();
        self
    }

    /// Set the header checksum field.
    #[inline]
    #[must_use]
    pub fn checksum(mut self, checksum: u16) -> Self {
        NetworkEndian::write_u16(&mut self.buf.as_mut()[offsets::CHECKSUM], checksum);
        self
    }

    /// Set the source address.
    #[inline]
    #[must_use]
    pub fn source(mut self, source: Ipv4Addr) -> Self {
        self.buf.as_mut()[offsets::SOURCE].copy_from_slice(&source.octets());
        self
    }

    /// Set the destination address.
    #[inline]
    #[must_use]
    pub fn dest(mut self, dest: Ipv4Addr) -> Self {
        self.buf.as_mut()[offsets::DEST].copy_from_slice(&dest.octets());
        self
    }

    /// Copy the payload into the buffer, directly after the header. The header
    /// length must already be set.
    ///
    /// # Errors
    ///
    /// Fails when the header length points past the end of the buffer, or
    /// when [`Read`](std::io::Read) returns any error other than
    /// [`ErrorKind::Interrupted`](std::io::ErrorKind::Interrupted).
    #[inline]
    #[must_use]
    pub fn payload<R: Read>(mut self, payload: R) -> Result<Self> {
        let data = self.buf.as_mut();
        let start = usize::from(data[offsets::VERSION_IHL] & 0xF) * 4;
        if start < HEADER_LEN || start > data.len() {
            return Err(Error::NotEnoughSpace("header length is not set"));
        }
        crate::write_all_bytes(payload, &mut data[start..])?;
        Ok(self)
    }

    /// Compute the header checksum and write it to the checksum field.
    #[inline]
    #[must_use]
    pub fn gen_checksum(mut self) -> Self {
        let data = self.buf.as_mut();
        let header_len = (usize::from(data[offsets::VERSION_IHL] & 0xF) * 4)
            .clamp(HEADER_LEN, data.len());
        data[offsets::CHECKSUM].fill(0);
        let checksum = Checksum::new().add(&data[..header_len]).finish();
        NetworkEndian::write_u16(&mut data[offsets::CHECKSUM], checksum);
        self
    }

    /// Get the built [`Packet`] instance.
    #[inline]
    #[must_use]
    pub fn build(self) -> Packet<B> {
        // Safe because of the length asserted in [`PacketBuilder::new`]. The
        // readers bound the header length by the buffer length.
        unsafe { Packet::new_unchecked(self.buf) }
    }
}

/// Strongly-typed wrapper for the "differentiated service code point" (DSCP)
/// field in the IP packet.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct Dscp {
    data: u8,
}

impl Dscp {
    /// Create a new [`Dscp`] from an assured forwarding class and a drop
    /// preference.
    ///
    /// # Errors
    ///
    /// Fails when the class is above 7 or the drop preference above 3.
    #[inline]
    #[must_use]
    pub fn new(class: u8, drop: u8) -> Result<Self> {
        if class > 7 || drop > 3 {
            return Err(Error::CannotParse("dscp out of range"));
        }
        Ok(Self {
            data: (class << 3) | (drop << 1),
        })
    }

    /// Extract the assured forwarding class selector.
    #[inline]
    #[must_use]
    pub fn forwarding_class(&self) -> u8 {
        self.data >> 3
    }

    /// Extract the drop preference.
    #[inline]
    #[must_use]
    pub fn drop_preference(&self) -> u8 {
        (self.data >> 1) & 0b11
    }
}

/// Strongly typed wrapper for the explicit congestion notification (ECN)
/// field in the IP header.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct Ecn {
    data: u8,
}

impl Ecn {
    /// Create a new [`Ecn`] instance.
    #[inline]
    #[must_use]
    pub fn new(capable: bool, congested: bool) -> Self {
        Self {
            data: (u8::from(capable) << 1) | u8::from(congested),
        }
    }

    /// Whether the packet experienced significant congestion.
    #[inline]
    #[must_use]
    pub fn congested(&self) -> bool {
        bitset(self.data, 0)
    }

    /// Whether the transport supports ECN.
    #[inline]
    #[must_use]
    pub fn ecn_capable(&self) -> bool {
        bitset(self.data, 1)
    }
}

/// Strongly typed wrapper for the "flags" field on the IP packet.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct Flags {
    data: u8,
}

impl Flags {
    /// Create a new [`Flags`] instance.
    #[inline]
    #[must_use]
    pub fn new(do_not_fragment: bool, more_fragments: bool) -> Self {
        Self {
            data: (u8::from(do_not_fragment) << 1) | u8::from(more_fragments),
        }
    }

    /// True when the control flags indicates the packet should not be
    /// fragmented.
    #[inline]
    #[must_use]
    pub fn do_not_fragment(&self) -> bool {
        bitset(self.data, 1)
    }

    /// True when more fragments of this datagram follow.
    #[inline]
    #[must_use]
    pub fn more_fragments(&self) -> bool {
        bitset(self.data, 0)
    }
}

/// See the [IANA list of protocol
/// numbers](https://www.iana.org/assignments/protocol-numbers/protocol-numbers.xhtml).
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Protocol {
    Icmp,
    Tcp,
    Udp,
    Unknown(u8),
}

impl From<u8> for Protocol {
    fn from(value: u8) -> Self {
        match value {
            PROTOCOL_ICMP => Protocol::Icmp,
            PROTOCOL_TCP => Protocol::Tcp,
            PROTOCOL_UDP => Protocol::Udp,
            _ => Protocol::Unknown(value),
        }
    }
}

impl From<Protocol> for u8 {
    fn from(value: Protocol) -> Self {
        match value {
            Protocol::Icmp => PROTOCOL_ICMP,
            Protocol::Tcp => PROTOCOL_TCP,
            Protocol::Udp => PROTOCOL_UDP,
            Protocol::Unknown(protocol) => protocol,
        }
    }
}

/// Size of an IPv4 header without options.
pub const HEADER_LEN: usize = 20;

const PROTOCOL_ICMP: u8 = 1;
const PROTOCOL_TCP: u8 = 6;
const PROTOCOL_UDP: u8 = 17;

mod offsets {
    use std::ops::Range;
    pub(crate) const VERSION_IHL: usize = 0;
    pub(crate) const DSCP_ECN: usize = 1;
    pub(crate) const LEN: Range<usize> = 2..4;
    pub(crate) const ID: Range<usize> = 4..6;
    pub(crate) const FLAGS_FRAGMENT: Range<usize> = 6..8;
    pub(crate) const TTL: usize = 8;
    pub(crate) const PROTOCOL: usize = 9;
    pub(crate) const CHECKSUM: Range<usize> = 10..12;
    pub(crate) const SOURCE: Range<usize> = 12..16;
    pub(crate) const DEST: Range<usize> = 16..20;
}
