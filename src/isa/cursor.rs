/// Positional bit cursors over a fixed-size instruction slot.
/// Fields are packed LSB-first at increasing bit positions with no tags or lengths.
use crate::error::{GemxError, Result};

pub struct BitWriter {
  buf: Vec<u8>,
  pos: usize,
}

impl BitWriter {
  pub fn new(slot_bytes: usize) -> Self {
    Self {
      buf: vec![0; slot_bytes],
      pos: 0,
    }
  }

  pub fn put(&mut self, value: u64, bits: usize) -> Result<()> {
    if self.pos + bits > self.buf.len() * 8 {
      return Err(GemxError::format(format!(
        "field of {} bits at bit {} overruns a {} byte slot",
        bits,
        self.pos,
        self.buf.len()
      )));
    }
    for i in 0..bits {
      if (value >> i) & 1 == 1 {
        let at = self.pos + i;
        self.buf[at / 8] |= 1 << (at % 8);
      }
    }
    self.pos += bits;
    Ok(())
  }

  pub fn put_bool(&mut self, value: bool) -> Result<()> {
    self.put(value as u64, 8)
  }

  pub fn put_u32(&mut self, value: u32) -> Result<()> {
    self.put(value as u64, 32)
  }

  pub fn put_i32(&mut self, value: i32) -> Result<()> {
    self.put(value as u32 as u64, 32)
  }

  pub fn put_i16(&mut self, value: i16) -> Result<()> {
    self.put(value as u16 as u64, 16)
  }

  pub fn put_u64(&mut self, value: u64) -> Result<()> {
    self.put(value, 64)
  }

  pub fn bit_pos(&self) -> usize {
    self.pos
  }

  pub fn finish(self) -> Vec<u8> {
    self.buf
  }
}

pub struct BitReader<'a> {
  buf: &'a [u8],
  pos: usize,
}

impl<'a> BitReader<'a> {
  pub fn new(buf: &'a [u8]) -> Self {
    Self { buf, pos: 0 }
  }

  pub fn take(&mut self, bits: usize) -> Result<u64> {
    if self.pos + bits > self.buf.len() * 8 {
      return Err(GemxError::format(format!(
        "field of {} bits at bit {} overruns a {} byte slot",
        bits,
        self.pos,
        self.buf.len()
      )));
    }
    let mut value = 0u64;
    for i in 0..bits {
      let at = self.pos + i;
      if (self.buf[at / 8] >> (at % 8)) & 1 == 1 {
        value |= 1 << i;
      }
    }
    self.pos += bits;
    Ok(value)
  }

  pub fn take_bool(&mut self) -> Result<bool> {
    Ok(self.take(8)? != 0)
  }

  pub fn take_u32(&mut self) -> Result<u32> {
    Ok(self.take(32)? as u32)
  }

  pub fn take_i32(&mut self) -> Result<i32> {
    Ok(self.take(32)? as u32 as i32)
  }

  pub fn take_i16(&mut self) -> Result<i16> {
    Ok(self.take(16)? as u16 as i16)
  }

  pub fn take_u64(&mut self) -> Result<u64> {
    self.take(64)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fields_pack_lsb_first() {
    let mut w = BitWriter::new(8);
    w.put_u32(0x0102_0304).unwrap();
    w.put_i16(-2).unwrap();
    w.put_bool(true).unwrap();
    assert_eq!(w.bit_pos(), 56);
    let bytes = w.finish();
    assert_eq!(bytes, vec![0x04, 0x03, 0x02, 0x01, 0xfe, 0xff, 0x01, 0x00]);

    let mut r = BitReader::new(&bytes);
    assert_eq!(r.take_u32().unwrap(), 0x0102_0304);
    assert_eq!(r.take_i16().unwrap(), -2);
    assert!(r.take_bool().unwrap());
  }

  #[test]
  fn test_overrun_is_format_error() {
    let mut w = BitWriter::new(4);
    w.put_u32(1).unwrap();
    assert!(matches!(w.put_bool(true), Err(GemxError::ProgramFormat { .. })));
    let bytes = [0u8; 4];
    let mut r = BitReader::new(&bytes);
    assert!(r.take_u64().is_err());
  }
}
