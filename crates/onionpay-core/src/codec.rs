//! Fixed-format wire codec
//!
//! A [`Splice`] is a byte buffer plus a monotonically advancing cursor.
//! Every read and write checks the remaining length first, so a short
//! buffer surfaces as [`Error::TooShort`] rather than a panic.
//!
//! Wire format:
//! - integers: little-endian
//! - variable byte fields: u32 length prefix
//! - addresses: 1 byte family (4|6), 16 address bytes, u16 port

use crate::crypto::fill_noise;
use crate::error::{Error, Result};
use crate::types::*;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Cursor over a mutable byte buffer
pub struct Splice<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Splice<'a> {
    /// Start at the beginning of `buf`
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Start at `pos` inside `buf`
    pub fn at(buf: &'a mut [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    /// Current cursor position
    pub fn cursor(&self) -> usize {
        self.pos
    }

    /// Total buffer length
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Is the buffer empty
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes left after the cursor
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Fail with `TooShort` unless `n` bytes remain
    pub fn require(&self, n: usize, field: &'static str) -> Result<()> {
        if self.remaining() < n {
            return Err(Error::TooShort {
                available: self.remaining(),
                required: n,
                field,
            });
        }
        Ok(())
    }

    /// Mutable view of the bytes from `start` to the end of the buffer
    pub fn tail_mut(&mut self, start: usize) -> &mut [u8] {
        let start = start.min(self.buf.len());
        &mut self.buf[start..]
    }

    /// Mutable view of `start..end`
    pub fn range_mut(&mut self, start: usize, end: usize) -> Result<&mut [u8]> {
        if start > end || end > self.buf.len() {
            return Err(Error::TooShort {
                available: self.buf.len().saturating_sub(start),
                required: end.saturating_sub(start),
                field: "range",
            });
        }
        Ok(&mut self.buf[start..end])
    }

    /// Overwrite `start..end` with zeroes
    pub fn zero(&mut self, start: usize, end: usize) {
        let end = end.min(self.buf.len());
        if start < end {
            self.buf[start..end].fill(0);
        }
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&mut [u8]> {
        self.require(n, field)?;
        let start = self.pos;
        self.pos += n;
        Ok(&mut self.buf[start..start + n])
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Write a layer magic tag
    pub fn write_magic(&mut self, magic: &Magic) -> Result<()> {
        self.write_bytes(magic, "magic")
    }

    /// Write a single byte
    pub fn write_u8(&mut self, v: u8, field: &'static str) -> Result<()> {
        self.write_bytes(&[v], field)
    }

    /// Write a little-endian u16
    pub fn write_u16(&mut self, v: u16, field: &'static str) -> Result<()> {
        self.write_bytes(&v.to_le_bytes(), field)
    }

    /// Write a little-endian u32
    pub fn write_u32(&mut self, v: u32, field: &'static str) -> Result<()> {
        self.write_bytes(&v.to_le_bytes(), field)
    }

    /// Write a little-endian u64
    pub fn write_u64(&mut self, v: u64, field: &'static str) -> Result<()> {
        self.write_bytes(&v.to_le_bytes(), field)
    }

    /// Write fixed-size bytes
    pub fn write_bytes(&mut self, bytes: &[u8], field: &'static str) -> Result<()> {
        self.take(bytes.len(), field)?.copy_from_slice(bytes);
        Ok(())
    }

    /// Write a u32 length prefix followed by the bytes
    pub fn write_prefixed(&mut self, bytes: &[u8], field: &'static str) -> Result<()> {
        self.write_u32(bytes.len() as u32, field)?;
        self.write_bytes(bytes, field)
    }

    /// Write a socket address in its fixed 19-byte form
    pub fn write_addr(&mut self, addr: &SocketAddr, field: &'static str) -> Result<()> {
        let out = self.take(ADDR_LEN, field)?;
        out.fill(0);
        match addr.ip() {
            IpAddr::V4(ip) => {
                out[0] = 4;
                out[1..5].copy_from_slice(&ip.octets());
            }
            IpAddr::V6(ip) => {
                out[0] = 6;
                out[1..17].copy_from_slice(&ip.octets());
            }
        }
        out[17..19].copy_from_slice(&addr.port().to_le_bytes());
        Ok(())
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Read a layer magic tag
    pub fn read_magic(&mut self) -> Result<Magic> {
        self.read_array("magic")
    }

    /// Read a single byte
    pub fn read_u8(&mut self, field: &'static str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    /// Read a little-endian u16
    pub fn read_u16(&mut self, field: &'static str) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array(field)?))
    }

    /// Read a little-endian u32
    pub fn read_u32(&mut self, field: &'static str) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array(field)?))
    }

    /// Read a little-endian u64
    pub fn read_u64(&mut self, field: &'static str) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array(field)?))
    }

    /// Read a fixed-size array
    pub fn read_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    /// Read a u32 length prefix and that many bytes
    pub fn read_prefixed(&mut self, field: &'static str) -> Result<Vec<u8>> {
        let len = self.read_u32(field)? as usize;
        Ok(self.take(len, field)?.to_vec())
    }

    /// Read a socket address in its fixed 19-byte form
    pub fn read_addr(&mut self, field: &'static str) -> Result<SocketAddr> {
        let raw: [u8; ADDR_LEN] = self.read_array(field)?;
        let port = u16::from_le_bytes([raw[17], raw[18]]);
        let ip = match raw[0] {
            4 => IpAddr::V4(Ipv4Addr::new(raw[1], raw[2], raw[3], raw[4])),
            6 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&raw[1..17]);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            family => return Err(Error::InvalidAddress(family)),
        };
        Ok(SocketAddr::new(ip, port))
    }
}

/// Shift `buf[consumed..]` to the front and refill the vacated tail with
/// noise. The length of `buf` never changes, so an observer cannot infer
/// how many hops a message has left from its size.
pub fn budge_up(buf: &mut [u8], consumed: usize) {
    let consumed = consumed.min(buf.len());
    let len = buf.len();
    buf.copy_within(consumed.., 0);
    fill_noise(&mut buf[len - consumed..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_are_little_endian() {
        let mut buf = vec![0u8; 14];
        let mut s = Splice::new(&mut buf);
        s.write_u16(0x0102, "a").unwrap();
        s.write_u32(0x03040506, "b").unwrap();
        s.write_u64(0x0708, "c").unwrap();
        assert_eq!(s.remaining(), 0);

        assert_eq!(&buf[..2], &[0x02, 0x01]);
        assert_eq!(&buf[2..6], &[0x06, 0x05, 0x04, 0x03]);
        assert_eq!(&buf[6..8], &[0x08, 0x07]);

        let mut s = Splice::new(&mut buf);
        assert_eq!(s.read_u16("a").unwrap(), 0x0102);
        assert_eq!(s.read_u32("b").unwrap(), 0x03040506);
        assert_eq!(s.read_u64("c").unwrap(), 0x0708);
    }

    #[test]
    fn test_read_past_end_is_too_short() {
        let mut buf = vec![1u8, 2, 3];
        let mut s = Splice::new(&mut buf);
        assert_eq!(
            s.read_u64("amount"),
            Err(Error::TooShort {
                available: 3,
                required: 8,
                field: "amount"
            })
        );
        // cursor untouched by the failed read
        assert_eq!(s.cursor(), 0);
    }

    #[test]
    fn test_prefixed_length_is_checked() {
        let mut buf = vec![0u8; 8];
        buf[..4].copy_from_slice(&100u32.to_le_bytes());
        let mut s = Splice::new(&mut buf);
        assert!(matches!(
            s.read_prefixed("payload"),
            Err(Error::TooShort { available: 4, required: 100, .. })
        ));
    }

    #[test]
    fn test_addr_v4_and_v6() {
        let v4: SocketAddr = "10.1.2.3:3455".parse().unwrap();
        let v6: SocketAddr = "[2001:db8::1]:9000".parse().unwrap();
        let mut buf = vec![0u8; ADDR_LEN * 2];

        let mut s = Splice::new(&mut buf);
        s.write_addr(&v4, "v4").unwrap();
        s.write_addr(&v6, "v6").unwrap();

        assert_eq!(buf[0], 4);
        assert_eq!(&buf[1..5], &[10, 1, 2, 3]);
        assert_eq!(&buf[17..19], &3455u16.to_le_bytes());

        let mut s = Splice::new(&mut buf);
        assert_eq!(s.read_addr("v4").unwrap(), v4);
        assert_eq!(s.read_addr("v6").unwrap(), v6);
    }

    #[test]
    fn test_bad_address_family() {
        let mut buf = vec![9u8; ADDR_LEN];
        let mut s = Splice::new(&mut buf);
        assert_eq!(s.read_addr("addr"), Err(Error::InvalidAddress(9)));
    }

    #[test]
    fn test_budge_up_preserves_length_and_shifts() {
        let original: Vec<u8> = (0..100u8).collect();
        for k in [0usize, 1, 37, 99, 100] {
            let mut buf = original.clone();
            budge_up(&mut buf, k);
            assert_eq!(buf.len(), original.len());
            assert_eq!(&buf[..original.len() - k], &original[k..]);
        }
    }

    #[test]
    fn test_budge_up_pads_with_noise() {
        let mut buf = vec![0u8; 256];
        budge_up(&mut buf, 128);
        assert_ne!(&buf[128..], &[0u8; 128][..]);
    }
}
