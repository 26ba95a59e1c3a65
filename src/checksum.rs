use std::net::Ipv4Addr;

/// Internet checksum (RFC 1071) for IPv4 headers, ICMP messages, UDP
/// datagrams and TCP segments.
pub struct Checksum {
    sum: u32,
}

impl Checksum {
    #[must_use]
    pub fn new() -> Self {
        Self { sum: 0 }
    }

    /// Add the IPv4 pseudo-header that prefixes UDP and TCP checksums.
    #[must_use]
    pub fn pseudo_header(self, source: Ipv4Addr, dest: Ipv4Addr, protocol: u8, len: u16) -> Self {
        let [l0, l1] = len.to_be_bytes();
        self.add(&source.octets())
            .add(&dest.octets())
            .add(&[0, protocol, l0, l1])
    }

    /// Add a buffer to the running sum. Buffers with an odd length are padded
    /// with a trailing zero byte, so only the last buffer added may be odd.
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_lossless)]
    #[must_use]
    pub fn add(mut self, buf: &[u8]) -> Self {
        for chunk in buf.chunks_exact(2) {
            self.sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        }

        if buf.len() & 1 != 0 {
            self.sum += (buf[buf.len() - 1] as u32) << 8;
        }

        self
    }

    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn finish(self) -> u16 {
        let mut sum = self.sum;

        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }

        !sum as u16
    }
}

impl Default for Checksum {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Checksum;
    use std::net::Ipv4Addr;

    #[test]
    fn checksum_matches_rfc1071_example() {
        let sum = Checksum::new()
            .add(&[0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7])
            .finish();
        assert_eq!(sum, !0xddf2);
    }

    #[test]
    fn checksum_pads_odd_buffers() {
        let odd = Checksum::new().add(&[0x12, 0x34, 0x56]).finish();
        let even = Checksum::new().add(&[0x12, 0x34, 0x56, 0x00]).finish();
        assert_eq!(odd, even);
    }

    #[test]
    fn checksum_of_buffer_with_checksum_is_zero() {
        let mut buf = [0x45, 0x00, 0x00, 0x1c, 0x00, 0x00, 0x40, 0x00, 0x40, 0x01];
        let sum = Checksum::new().add(&buf).finish();
        let mut with_sum = buf.to_vec();
        with_sum.extend_from_slice(&sum.to_be_bytes());
        assert_eq!(Checksum::new().add(&with_sum).finish(), 0);
        buf[0] = 0;
        assert_ne!(Checksum::new().add(&buf).finish(), sum);
    }

    #[test]
    fn pseudo_header_covers_addresses_protocol_and_len() {
        let a = Ipv4Addr::new(10, 0, 0, 1);
        let b = Ipv4Addr::new(10, 0, 0, 2);
        let expected = Checksum::new()
            .add(&[10, 0, 0, 1, 10, 0, 0, 2, 0, 17, 0, 8])
            .finish();
        assert_eq!(Checksum::new().pseudo_header(a, b, 17, 8).finish(), expected);
    }
}
