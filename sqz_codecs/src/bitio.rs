use std::io::{Read, Write};

use anyhow::{anyhow, Context, Result};

/// Writes an MSB-first bit stream into a byte sink.
///
/// The first bit encoded becomes bit 7 of the first byte written. A partial
/// trailing byte is held back until [`finalize`](BitEncoder::finalize), which
/// left-shifts the accumulated bits into the high end of one final byte.
pub struct BitEncoder<W: Write> {
    sink: W,
    /// Pending bits, right-aligned.
    acc: u8,
    /// Free bit capacity left in `acc` (8 when empty).
    free: u32,
}

impl<W: Write> BitEncoder<W> {
    pub fn new(sink: W) -> Self {
        Self { sink, acc: 0, free: 8 }
    }

    /// Write the low `nbits` bits of `value`, most significant first.
    pub fn encode_bits(&mut self, value: u64, nbits: u32) -> Result<()> {
        debug_assert!(nbits <= 64);
        let mut n = nbits;

        // top up a partially filled pending byte first
        if self.free < 8 {
            let m = n.min(self.free);
            self.acc = (self.acc << m) | (shr(value, n - m) & mask8(m));
            self.free -= m;
            n -= m;
            if self.free == 0 {
                self.write_byte(self.acc)?;
                self.acc = 0;
                self.free = 8;
            }
        }

        // whole bytes
        while n >= 8 {
            self.write_byte(shr(value, n - 8))?;
            n -= 8;
        }

        // remainder stays pending
        if n > 0 {
            self.acc = (self.acc << n) | (value as u8 & mask8(n));
            self.free -= n;
        }
        Ok(())
    }

    /// Flush a partial trailing byte, padding the low bits with zeros.
    /// Returns the number of padding bits written (0..=7).
    pub fn finalize(&mut self) -> Result<u32> {
        if self.free == 8 {
            return Ok(0);
        }
        let padding = self.free;
        let byte = self.acc << self.free;
        self.write_byte(byte)?;
        self.acc = 0;
        self.free = 8;
        Ok(padding)
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.sink
            .write_all(&[byte])
            .context("stream write error")
    }
}

/// Reads an MSB-first bit stream from a byte source.
///
/// Mirrors [`BitEncoder`]: bits are consumed from bit 7 of each byte
/// downwards. The decoder keeps at most one partially consumed byte plus one
/// byte of lookahead, so [`align`](BitDecoder::align) and
/// [`is_exhausted`](BitDecoder::is_exhausted) let callers walk a
/// concatenation of independently byte-aligned blocks.
pub struct BitDecoder<R: Read> {
    source: R,
    /// Unconsumed bits of the current byte, right-aligned.
    acc: u8,
    /// Number of valid bits in `acc`.
    avail: u32,
    /// One byte of lookahead fetched by `is_exhausted`.
    peeked: Option<u8>,
}

impl<R: Read> BitDecoder<R> {
    pub fn new(source: R) -> Self {
        Self { source, acc: 0, avail: 0, peeked: None }
    }

    /// Read `nbits` bits, returned right-aligned. Fails with "stream
    /// exhausted" if the source yields fewer.
    pub fn decode_bits(&mut self, nbits: u32) -> Result<u64> {
        debug_assert!(nbits <= 64);
        let mut n = nbits;
        let mut out: u64 = 0;

        let m = n.min(self.avail);
        if m > 0 {
            self.avail -= m;
            out = u64::from((self.acc >> self.avail) & mask8(m));
            self.acc &= mask8(self.avail);
            n -= m;
        }

        while n >= 8 {
            let byte = self.read_byte()?;
            out = (out << 8) | u64::from(byte);
            n -= 8;
        }

        if n > 0 {
            let byte = self.read_byte()?;
            self.avail = 8 - n;
            out = (out << n) | u64::from(byte >> self.avail);
            self.acc = byte & mask8(self.avail);
        }
        Ok(out)
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        Ok(self.decode_bits(1)? != 0)
    }

    /// Discard any partially consumed byte so the next read starts at a byte
    /// boundary.
    pub fn align(&mut self) {
        self.acc = 0;
        self.avail = 0;
    }

    /// Whether any more bits can be read. May pull one byte of lookahead
    /// from the source.
    pub fn is_exhausted(&mut self) -> Result<bool> {
        if self.avail > 0 || self.peeked.is_some() {
            return Ok(false);
        }
        let mut buf = [0u8; 1];
        loop {
            match self.source.read(&mut buf) {
                Ok(0) => return Ok(true),
                Ok(_) => {
                    self.peeked = Some(buf[0]);
                    return Ok(false);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(anyhow!(e).context("stream read error")),
            }
        }
    }

    fn read_byte(&mut self) -> Result<u8> {
        if let Some(byte) = self.peeked.take() {
            return Ok(byte);
        }
        let mut buf = [0u8; 1];
        loop {
            match self.source.read(&mut buf) {
                Ok(0) => return Err(anyhow!("stream exhausted")),
                Ok(_) => return Ok(buf[0]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(anyhow!(e).context("stream read error")),
            }
        }
    }
}

#[inline]
fn mask8(nbits: u32) -> u8 {
    if nbits >= 8 {
        0xFF
    } else {
        (1u8 << nbits) - 1
    }
}

#[inline]
fn shr(value: u64, shift: u32) -> u8 {
    (value >> shift) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_msb_first() {
        let mut enc = BitEncoder::new(Vec::new());
        enc.encode_bits(0b101, 3).unwrap();
        enc.encode_bits(0b0, 1).unwrap();
        enc.encode_bits(0b1111, 4).unwrap();
        assert_eq!(enc.finalize().unwrap(), 0);
        assert_eq!(enc.into_inner(), vec![0b1010_1111]);
    }

    #[test]
    fn finalize_pads_low_bits() {
        let mut enc = BitEncoder::new(Vec::new());
        enc.encode_bits(0b110, 3).unwrap();
        assert_eq!(enc.finalize().unwrap(), 5);
        assert_eq!(enc.into_inner(), vec![0b1100_0000]);
    }

    #[test]
    fn wide_values_span_bytes() {
        let mut enc = BitEncoder::new(Vec::new());
        enc.encode_bits(0b1, 1).unwrap();
        enc.encode_bits(0xABCD, 16).unwrap();
        enc.finalize().unwrap();
        let bytes = enc.into_inner();

        let mut dec = BitDecoder::new(bytes.as_slice());
        assert_eq!(dec.decode_bits(1).unwrap(), 1);
        assert_eq!(dec.decode_bits(16).unwrap(), 0xABCD);
    }

    #[test]
    fn roundtrip_mixed_widths() {
        let values: &[(u64, u32)] = &[
            (0, 1),
            (1, 1),
            (5, 3),
            (255, 8),
            (1234, 11),
            (0x1FFF, 13),
            (0xFFFF_FFFF, 32),
            (0, 7),
        ];
        let mut enc = BitEncoder::new(Vec::new());
        for &(v, n) in values {
            enc.encode_bits(v, n).unwrap();
        }
        enc.finalize().unwrap();
        let bytes = enc.into_inner();

        let mut dec = BitDecoder::new(bytes.as_slice());
        for &(v, n) in values {
            assert_eq!(dec.decode_bits(n).unwrap(), v, "width {n}");
        }
    }

    #[test]
    fn decode_past_end_fails() {
        let bytes = [0xFFu8];
        let mut dec = BitDecoder::new(bytes.as_slice());
        assert_eq!(dec.decode_bits(8).unwrap(), 0xFF);
        assert!(dec.decode_bits(1).is_err());
    }

    #[test]
    fn align_skips_partial_byte() {
        let bytes = [0b0100_0000u8, 0b0010_0000];
        let mut dec = BitDecoder::new(bytes.as_slice());
        assert_eq!(dec.decode_bits(3).unwrap(), 0b010);
        dec.align();
        assert_eq!(dec.decode_bits(3).unwrap(), 0b001);
    }

    #[test]
    fn exhaustion_with_lookahead() {
        let bytes = [0xA5u8];
        let mut dec = BitDecoder::new(bytes.as_slice());
        assert!(!dec.is_exhausted().unwrap());
        assert_eq!(dec.decode_bits(8).unwrap(), 0xA5);
        assert!(dec.is_exhausted().unwrap());
    }
}
