//! Read and write TCP segments.
//!
//! # Standards conformance
//!
//! Follows [RFC
//! 9293](https://www.rfc-editor.org/rfc/rfc9293.html#name-functional-specification).
use crate::{bitset, checksum::Checksum, ipv4::Protocol, Error, Result};
use byteorder::{ByteOrder, NetworkEndian};
use std::{io::Read, net::Ipv4Addr};

/// A TCP segment
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub struct Segment<B: AsRef<[u8]>> {
    buf: B,
}

impl<B: AsRef<[u8]>> Segment<B> {
    /// Create a new TCP segment.
    ///
    /// # Errors
    ///
    /// Fails when the buffer is smaller than the minimum TCP header size.
    #[inline]
    #[must_use]
    pub fn new(buf: B) -> Result<Self> {
        if buf.as_ref().len() >= HEADER_LEN {
            Ok(Self { buf })
        } else {
            Err(Error::CannotParse("buffer too small"))
        }
    }

    /// Create a new TCP segment without checking the buffer length.
    ///
    /// # Safety
    ///
    /// The buffer must be at least [`HEADER_LEN`] bytes long.
    #[inline]
    #[must_use]
    pub unsafe fn new_unchecked(buf: B) -> Self {
        Self { buf }
    }

    /// Create a new [`SegmentBuilder`] that modifies a buffer of bytes in-place.
    ///
    /// # Errors
    ///
    /// See [`SegmentBuilder::new`].
    pub fn builder<T>(buf: T) -> Result<SegmentBuilder<T>>
    where
        T: AsRef<[u8]> + AsMut<[u8]>,
    {
        SegmentBuilder::new(buf)
    }

    /// Extract the source port.
    #[inline]
    #[must_use]
    pub fn source(&self) -> u16 {
        let data = self.buf.as_ref();
        NetworkEndian::read_u16(&data[offsets::SOURCE])
    }

    /// Extract the destination port.
    #[inline]
    #[must_use]
    pub fn dest(&self) -> u16 {
        let data = self.buf.as_ref();
        NetworkEndian::read_u16(&data[offsets::DEST])
    }

    /// Extract the sequence number.
    #[inline]
    #[must_use]
    pub fn sequence(&self) -> u32 {
        let data = self.buf.as_ref();
        NetworkEndian::read_u32(&data[offsets::SEQUENCE])
    }

    /// Extract the acknowledgment number.
    #[inline]
    #[must_use]
    pub fn acked(&self) -> u32 {
        let data = self.buf.as_ref();
        NetworkEndian::read_u32(&data[offsets::ACKED])
    }

    /// Extract the data offset, in 32-bit words.
    #[inline]
    #[must_use]
    pub fn data_offset(&self) -> u8 {
        let data = self.buf.as_ref();
        data[offsets::DATA_OFFSET] >> 4
    }

    /// Extract the control bit flags.
    #[inline]
    #[must_use]
    pub fn flags(&self) -> Flags {
        let data = self.buf.as_ref();
        Flags::from(data[offsets::FLAGS])
    }

    /// Extract the window size.
    #[inline]
    #[must_use]
    pub fn window(&self) -> u16 {
        let data = self.buf.as_ref();
        NetworkEndian::read_u16(&data[offsets::WINDOW])
    }

    /// Extract the segment checksum.
    #[inline]
    #[must_use]
    pub fn checksum(&self) -> u16 {
        let data = self.buf.as_ref();
        NetworkEndian::read_u16(&data[offsets::CHECKSUM])
    }

    /// Extract the urgent pointer.
    #[inline]
    #[must_use]
    pub fn urgent(&self) -> u16 {
        let data = self.buf.as_ref();
        NetworkEndian::read_u16(&data[offsets::URGENT])
    }

    /// Get the payload. A data offset pointing outside the segment yields an
    /// empty payload.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        let data = self.buf.as_ref();
        let start = (usize::from(self.data_offset()) * 4).clamp(HEADER_LEN, data.len());
        &data[start..]
    }

    /// Whether the checksum is correct for a segment carried between `source`
    /// and `dest`.
    #[inline]
    #[must_use]
    pub fn verify_checksum(&self, source: Ipv4Addr, dest: Ipv4Addr) -> bool {
        let data = self.buf.as_ref();
        let Ok(len) = u16::try_from(data.len()) else {
            return false;
        };
        Checksum::new()
            .pseudo_header(source, dest, Protocol::Tcp.into(), len)
            .add(data)
            .finish()
            == 0
    }

    /// Get a reference to the underlying bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }
}

/// Builder for constructing [`Segment`] instances in-place.
pub struct SegmentBuilder<B: AsRef<[u8]> + AsMut<[u8]>> {
    buf: B,
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> SegmentBuilder<B> {
    /// Create a new [`SegmentBuilder`] from an underlying byte buffer. The
    /// buffer should be exactly as long as the segment, because the checksum
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

    /// Set the source port.
    #[inline]
    #[must_use]
    pub fn source(mut self, port: u16) -> Self {
        NetworkEndian::write_u16(&mut self.buf.as_mut()[offsets::SOURCE], port);
        self
    }

    /// Set the destination port.
    #[inline]
    #[must_use]
    pub fn dest(mut self, port: u16) -> Self {
        NetworkEndian::write_u16(&mut self.buf.as_mut()[offsets::DEST], port);
        self
    }

    /// Set the sequence number.
    #[inline]
    #[must_use]
    pub fn sequence(mut self, sequence: u32) -> Self {
        NetworkEndian::write_u32(&mut self.buf.as_mut()[offsets::SEQUENCE], sequence);
        self
    }

    /// Set the acknowledgment number.
    #[inline]
    #[must_use]
    pub fn acked(mut self, acked: u32) -> Self {
        NetworkEndian::write_u32(&mut self.buf.as_mut()[offsets::ACKED], acked);
        self
    }

    /// Set the data offset, in 32-bit words.
    #[inline]
    #[must_use]
    pub fn data_offset(mut self, words: u8) -> Self {
        self.buf.as_mut()[offsets::DATA_OFFSET] = words << 4;
        self
    }

    /// Set the control bit flags.
    #[inline]
    #[must_use]
    pub fn flags(mut self, flags: Flags) -> Self {
        self.buf.as_mut()[offsets::FLAGS] = flags.into();
        self
    }

    /// Set the window size.
    #[inline]
    #[must_use]
    pub fn window(mut self, window: u16) -> Self {
        NetworkEndian::write_u16(&mut self.buf.as_mut()[offsets::WINDOW], window);
        self
    }

    /// Set the checksum field.
    #[inline]
    #[must_use]
    pub fn checksum(mut self, checksum: u16) -> Self {
        NetworkEndian::write_u16(&mut self.buf.as_mut()[offsets::CHECKSUM], checksum);
        self
    }

    /// Set the urgent pointer.
    #[inline]
    #[must_use]
    pub fn urgent(mut self, urgent: u16) -> Self {
        NetworkEndian::write_u16(&mut self.buf.as_mut()[offsets::URGENT], urgent);
        self
    }

    /// Copy the payload into the buffer after the header. The data offset must
    /// already be set.
    ///
    /// # Errors
    ///
    /// Fails when the data offset points past the end of the buffer, or when
    /// [`Read`](std::io::Read) returns any error other than
    /// [`ErrorKind::Interrupted`](std::io::ErrorKind::Interrupted).
    #[inline]
    #[must_use]
    pub fn payload<R: Read>(mut self, payload: R) -> Result<Self> {
        let data = self.buf.as_mut();
        let start = usize::from(data[offsets::DATA_OFFSET] >> 4) * 4;
        if start < HEADER_LEN || start > data.len() {
            return Err(Error::NotEnoughSpace("data offset is not set"));
        }
        crate::write_all_bytes(payload, &mut data[start..])?;
        Ok(self)
    }

    /// Compute the checksum over the pseudo-header and the whole buffer, and
    /// write it to the checksum field.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn gen_checksum(mut self, source: Ipv4Addr, dest: Ipv4Addr) -> Self {
        let data = self.buf.as_mut();
        data[offsets::CHECKSUM].fill(0);
        let checksum = Checksum::new()
            .pseudo_header(source, dest, Protocol::Tcp.into(), data.len() as u16)
            .add(data)
            .finish();
        NetworkEndian::write_u16(&mut data[offsets::CHECKSUM], checksum);
        self
    }

    /// Get the built [`Segment`] instance.
    #[inline]
    #[must_use]
    pub fn build(self) -> Segment<B> {
        // Safe because of the preconditions asserted in [`SegmentBuilder::new`]
        unsafe { Segment::new_unchecked(self.buf) }
    }
}

mod offsets {
    use std::ops::Range;
    pub(crate) const SOURCE: Range<usize> = 0..2;
    pub(crate) const DEST: Range<usize> = 2..4;
    pub(crate) const SEQUENCE: Range<usize> = 4..8;
    pub(crate) const ACKED: Range<usize> = 8..12;
    pub(crate) const DATA_OFFSET: usize = 12;
    pub(crate) const FLAGS: usize = 13;
    pub(crate) const WINDOW: Range<usize> = 14..16;
    pub(crate) const CHECKSUM: Range<usize> = 16..18;
    pub(crate) const URGENT: Range<usize> = 18..20;
}

/// TCP control bit flags.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy, Hash)]
#[allow(clippy::struct_excessive_bools)]
pub struct Flags {
    cwr: bool,
    ece: bool,
    urg: bool,
    ack: bool,
    psh: bool,
    rst: bool,
    syn: bool,
    fin: bool,
}

impl Flags {
    /// Flags for the first segment of a handshake.
    #[inline]
    #[must_use]
    pub fn syn() -> Self {
        Self {
            syn: true,
            ..Self::default()
        }
    }

    /// Whether the congestion window is set.
    #[inline]
    #[must_use]
    pub fn congestion_window_reduced(&self) -> bool {
        self.cwr
    }

    // Whether the ECN echo flag is set.
    #[inline]
    #[must_use]
    pub fn ecn_echo(&self) -> bool {
        self.ece
    }

    // Whether the urgent significant flag is set.
    #[inline]
    #[must_use]
    pub fn urgent_significant(&self) -> bool {
        self.urg
    }

    // Whether the ack significant flag is set.
    #[inline]
    #[must_use]
    pub fn ack_significant(&self) -> bool {
        self.ack
    }

    // Whether the push flag is set.
    #[inline]
    #[must_use]
    pub fn push(&self) -> bool {
        self.psh
    }

    // Whether the reset connection flag is set.
    #[inline]
    #[must_use]
    pub fn reset_conn(&self) -> bool {
        self.rst
    }

    // Whether the synchronize sequence numbers flag is set.
    #[inline]
    #[must_use]
    pub fn synchronize(&self) -> bool {
        self.syn
    }

    // Whether the finish flag is set.
    #[inline]
    #[must_use]
    pub fn finished(&self) -> bool {
        self.fin
    }
}

impl From<u8> for Flags {
    fn from(value: u8) -> Self {
        Self {
            cwr: bitset(value, 7),
            ece: bitset(value, 6),
            urg: bitset(value, 5),
            ack: bitset(value, 4),
            psh: bitset(value, 3),
            rst: bitset(value, 2),
            syn: bitset(value, 1),
            fin: bitset(value, 0),
        }
    }
}

impl From<Flags> for u8 {
    fn from(flags: Flags) -> Self {
        [
            flags.cwr, flags.ece, flags.urg, flags.ack, flags.psh, flags.rst, flags.syn, flags.fin,
        ]
        .iter()
        .fold(0, |byte, &bit| (byte << 1) | u8::from(bit))
    }
}

/// Size of a TCP header without options.
pub const HEADER_LEN: usize = 20;

#[cfg(test)]
mod tests {
    use super::{Flags, Segment, HEADER_LEN};
    use std::error::Error;
    use std::io::Cursor;
    use std::net::Ipv4Addr;
    use std::result::Result;

    // SYN-ACK from 10.0.0.2:80 to 10.0.0.1:40000.
    const SYN_ACK: &[u8] = &[
        0x00, 0x50, 0x9c, 0x40, 0x00, 0x00, 0x03, 0xe8, 0x00, 0x00, 0x00, 0x65, 0x50, 0x12, 0xfa,
        0xf0, 0x00, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn new_returns_err_when_buffer_too_short() {
        let segment = Segment::new(&[0, 0, 0]);
        assert!(segment.is_err());
    }

    #[test]
    fn segment_has_expected_header_fields() -> Result<(), Box<dyn Error>> {
        let segment = Segment::new(SYN_ACK)?;
        assert_eq!(segment.source(), 80);
        assert_eq!(segment.dest(), 40000);
        assert_eq!(segment.sequence(), 1000);
        assert_eq!(segment.acked(), 101);
        assert_eq!(segment.data_offset(), 5);
        assert_eq!(segment.window(), 64240);
        assert_eq!(segment.urgent(), 0);
        assert!(segment.payload().is_empty());
        Ok(())
    }

    #[test]
    fn segment_has_expected_flags() -> Result<(), Box<dyn Error>> {
        let segment = Segment::new(SYN_ACK)?;

        assert_eq!(
            segment.flags(),
            Flags {
                cwr: false,
                ece: false,
                urg: false,
                ack: true,
                psh: false,
                rst: false,
                syn: true,
                fin: false,
            }
        );

        Ok(())
    }

    #[test]
    fn flags_convert_both_ways() {
        assert_eq!(u8::from(Flags::syn()), 0b0000_0010);
        assert_eq!(u8::from(Flags::from(0x12)), 0x12);
        assert!(Flags::from(0x14).reset_conn());
    }

    #[test]
    fn builder_writes_expected_fields() -> Result<(), Box<dyn Error>> {
        let mut buf = [0; HEADER_LEN + 3];
        let segment = Segment::<&[u8]>::builder(&mut buf)?
            .source(40000)
            .dest(443)
            .sequence(7)
            .acked(0)
            .data_offset(5)
            .flags(Flags::syn())
            .window(1024)
            .urgent(0)
            .payload(Cursor::new([9, 8, 7]))?
            .build();

        assert_eq!(segment.source(), 40000);
        assert_eq!(segment.dest(), 443);
        assert_eq!(segment.sequence(), 7);
        assert_eq!(segment.data_offset(), 5);
        assert!(segment.flags().synchronize());
        assert!(!segment.flags().ack_significant());
        assert_eq!(segment.window(), 1024);
        assert_eq!(segment.payload(), &[9, 8, 7]);
        Ok(())
    }

    #[test]
    fn payload_fails_without_data_offset() -> Result<(), Box<dyn Error>> {
        let mut buf = [0; HEADER_LEN + 3];
        let builder = Segment::<&[u8]>::builder(&mut buf)?;
        assert!(builder.payload(Cursor::new([1])).is_err());
        Ok(())
    }

    #[test]
    fn builder_generates_verifiable_checksum() -> Result<(), Box<dyn Error>> {
        let source = Ipv4Addr::new(10, 0, 0, 1);
        let dest = Ipv4Addr::new(10, 0, 0, 2);
        let mut buf = [0; HEADER_LEN + 1];
        let segment = Segment::<&[u8]>::builder(&mut buf)?
            .source(1234)
            .dest(80)
            .data_offset(5)
            .flags(Flags::syn())
            .payload(Cursor::new([0xAB]))?
            .gen_checksum(source, dest)
            .build();

        assert_ne!(segment.checksum(), 0);
        assert!(segment.verify_checksum(source, dest));
        assert!(!segment.verify_checksum(source, Ipv4Addr::new(10, 0, 0, 3)));
        Ok(())
    }
}
