/// Element codecs, extended-width accumulation and the fused post-processing steps
use crate::config::ElementKind;
use crate::error::{GemxError, Result};
use std::fmt;
use std::ops::{Add, AddAssign};

/// A data-segment element together with its extended-width accumulator
pub trait Element: Copy + Default + PartialEq + fmt::Debug + 'static {
  type Acc: Copy + Default + PartialEq + PartialOrd + fmt::Debug + Add<Output = Self::Acc> + AddAssign;

  const BYTES: usize;
  const KIND: ElementKind;

  /// Decode from exactly `BYTES` little-endian bytes
  fn read_le(bytes: &[u8]) -> Self;
  fn write_le(self, out: &mut [u8]);

  fn widen(self) -> Self::Acc;
  fn narrow(acc: Self::Acc) -> Self;
  fn mul_wide(a: Self, b: Self) -> Self::Acc;

  /// `(acc * mult) >> shift` in the accumulator domain
  fn scale_shift(acc: Self::Acc, mult: i64, shift: u32) -> Self::Acc;
  fn acc_is_negative(acc: Self::Acc) -> bool;

  fn from_i64(value: i64) -> Self;
  fn to_f64(self) -> f64;
}

impl Element for i32 {
  type Acc = i64;

  const BYTES: usize = 4;
  const KIND: ElementKind = ElementKind::I32;

  fn read_le(bytes: &[u8]) -> Self {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    i32::from_le_bytes(raw)
  }

  fn write_le(self, out: &mut [u8]) {
    out[..4].copy_from_slice(&self.to_le_bytes());
  }

  fn widen(self) -> i64 {
    self as i64
  }

  fn narrow(acc: i64) -> Self {
    acc as i32
  }

  fn mul_wide(a: Self, b: Self) -> i64 {
    (a as i64) * (b as i64)
  }

  fn scale_shift(acc: i64, mult: i64, shift: u32) -> i64 {
    let product = acc.wrapping_mul(mult);
    product.checked_shr(shift).unwrap_or(if product < 0 { -1 } else { 0 })
  }

  fn acc_is_negative(acc: i64) -> bool {
    acc < 0
  }

  fn from_i64(value: i64) -> Self {
    value as i32
  }

  fn to_f64(self) -> f64 {
    self as f64
  }
}

impl Element for f32 {
  type Acc = f64;

  const BYTES: usize = 4;
  const KIND: ElementKind = ElementKind::F32;

  fn read_le(bytes: &[u8]) -> Self {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    f32::from_bits(u32::from_le_bytes(raw))
  }

  fn write_le(self, out: &mut [u8]) {
    out[..4].copy_from_slice(&self.to_bits().to_le_bytes());
  }

  fn widen(self) -> f64 {
    self as f64
  }

  fn narrow(acc: f64) -> Self {
    acc as f32
  }

  fn mul_wide(a: Self, b: Self) -> f64 {
    (a as f64) * (b as f64)
  }

  fn scale_shift(acc: f64, mult: i64, shift: u32) -> f64 {
    acc * mult as f64 / 2f64.powi(shift.min(1023) as i32)
  }

  fn acc_is_negative(acc: f64) -> bool {
    acc < 0.0
  }

  fn from_i64(value: i64) -> Self {
    value as f32
  }

  fn to_f64(self) -> f64 {
    self as f64
  }
}

/// Affine rescale parameters, packed as `(scale << 8) | shift`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostScale {
  pub scale: i32,
  pub shift: u32,
}

impl PostScale {
  pub const IDENTITY: PostScale = PostScale { scale: 1, shift: 0 };
  pub const SCALE_MIN: i32 = -(1 << 23);
  pub const SCALE_MAX: i32 = (1 << 23) - 1;
  pub const SHIFT_MAX: u32 = 0xff;

  pub fn new(scale: i32, shift: u32) -> Self {
    Self { scale, shift }
  }

  /// Rejects values the packed word cannot hold
  pub fn validate(&self) -> Result<()> {
    if !(Self::SCALE_MIN..=Self::SCALE_MAX).contains(&self.scale) {
      return Err(GemxError::dimension(format!(
        "rescale factor {} outside [{}, {}]",
        self.scale,
        Self::SCALE_MIN,
        Self::SCALE_MAX
      )));
    }
    if self.shift > Self::SHIFT_MAX {
      return Err(GemxError::dimension(format!("rescale shift {} exceeds {}", self.shift, Self::SHIFT_MAX)));
    }
    Ok(())
  }

  pub fn from_word(word: i32) -> Self {
    Self {
      scale: word >> 8,
      shift: (word & 0xff) as u32,
    }
  }

  pub fn to_word(self) -> i32 {
    self.scale.wrapping_shl(8) | (self.shift & 0xff) as i32
  }
}

impl Default for PostScale {
  fn default() -> Self {
    Self::IDENTITY
  }
}

/// Leaky activation parameters, packed as a 10-bit signed scale over a 6-bit shift
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Activation {
  pub alpha: i16,
  pub shift: u32,
}

impl Activation {
  /// alpha 0 clamps every negative value to zero
  pub const RELU: Activation = Activation { alpha: 0, shift: 0 };
  pub const ALPHA_MIN: i16 = -512;
  pub const ALPHA_MAX: i16 = 511;
  pub const SHIFT_MAX: u32 = 0x3f;

  pub fn new(alpha: i16, shift: u32) -> Self {
    Self { alpha, shift }
  }

  /// Rejects values the packed word cannot hold
  pub fn validate(&self) -> Result<()> {
    if !(Self::ALPHA_MIN..=Self::ALPHA_MAX).contains(&self.alpha) {
      return Err(GemxError::dimension(format!(
        "activation alpha {} outside [{}, {}]",
        self.alpha,
        Self::ALPHA_MIN,
        Self::ALPHA_MAX
      )));
    }
    if self.shift > Self::SHIFT_MAX {
      return Err(GemxError::dimension(format!("activation shift {} exceeds {}", self.shift, Self::SHIFT_MAX)));
    }
    Ok(())
  }

  pub fn from_word(word: i16) -> Self {
    Self {
      alpha: word >> 6,
      shift: (word & 0x3f) as u32,
    }
  }

  pub fn to_word(self) -> i16 {
    self.alpha.wrapping_shl(6) | (self.shift & 0x3f) as i16
  }
}

pub fn rescale<E: Element>(acc: E::Acc, post: PostScale) -> E::Acc {
  E::scale_shift(acc, post.scale as i64, post.shift)
}

pub fn activation<E: Element>(value: E::Acc, act: Activation) -> E::Acc {
  if E::acc_is_negative(value) {
    E::scale_shift(value, act.alpha as i64, act.shift)
  } else {
    value
  }
}

/// Bias, rescale and optional activation, in that order
pub fn post_process<E: Element>(acc: E::Acc, bias: Option<E>, post: PostScale, act: Option<Activation>) -> E {
  let mut value = acc;
  if let Some(x) = bias {
    value += x.widen();
  }
  value = rescale::<E>(value, post);
  if let Some(act) = act {
    value = activation::<E>(value, act);
  }
  E::narrow(value)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_rescale_identity() {
    for acc in [-5_000_000_000i64, -1, 0, 1, 123_456_789_012] {
      assert_eq!(rescale::<i32>(acc, PostScale::IDENTITY), acc);
    }
  }

  #[test]
  fn test_rescale_scale_and_shift() {
    assert_eq!(rescale::<i32>(100, PostScale::new(3, 2)), 75);
    assert_eq!(rescale::<i32>(-100, PostScale::new(3, 2)), -75);
    // shifting past the accumulator width saturates to the sign
    assert_eq!(rescale::<i32>(-100, PostScale::new(1, 200)), -1);
    assert_eq!(rescale::<i32>(100, PostScale::new(1, 200)), 0);
  }

  #[test]
  fn test_activation_boundary() {
    let act = Activation::new(3, 1);
    assert_eq!(activation::<i32>(0, act), 0);
    assert_eq!(activation::<i32>(10, act), 10);
    assert_eq!(activation::<i32>(-10, act), (-10 * 3) >> 1);
    assert_eq!(activation::<i32>(-10, Activation::RELU), 0);
  }

  #[test]
  fn test_parameter_words() {
    let post = PostScale::new(-7, 5);
    assert_eq!(PostScale::from_word(post.to_word()), post);
    let act = Activation::new(-300, 33);
    assert_eq!(Activation::from_word(act.to_word()), act);
    assert_eq!(Activation::from_word((5 << 6) | 2), Activation::new(5, 2));
  }

  #[test]
  fn test_parameter_ranges() {
    assert!(Activation::new(511, 63).validate().is_ok());
    assert!(Activation::new(-512, 0).validate().is_ok());
    for bad in [Activation::new(512, 0), Activation::new(-513, 0), Activation::new(0, 64)] {
      assert!(matches!(bad.validate(), Err(GemxError::DimensionConstraint { .. })));
    }
    assert!(PostScale::new((1 << 23) - 1, 255).validate().is_ok());
    assert!(PostScale::new(-(1 << 23), 0).validate().is_ok());
    for bad in [PostScale::new(1 << 23, 0), PostScale::new(-(1 << 23) - 1, 0), PostScale::new(1, 256)] {
      assert!(matches!(bad.validate(), Err(GemxError::DimensionConstraint { .. })));
    }
  }

  #[test]
  fn test_post_process_order() {
    // (acc + bias) * scale >> shift, then leaky
    let out = post_process::<i32>(-20, Some(4), PostScale::new(2, 1), Some(Activation::new(1, 2)));
    assert_eq!(out, -4);
  }

  #[test]
  fn test_float_codec() {
    let mut raw = [0u8; 4];
    1.5f32.write_le(&mut raw);
    assert_eq!(f32::read_le(&raw), 1.5);
    assert_eq!(rescale::<f32>(10.0, PostScale::new(3, 1)), 15.0);
  }
}
