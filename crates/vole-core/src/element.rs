use std::fmt;

// Element — Trait that connects Rust scalar types to the engine
//
// Storage, kernels, and tensors are generic over T: Element. The trait is
// the bridge between a concrete Rust numeric type and the generic code:
//
//   fn zeros<T: Element>(shape: impl Into<Shape>) -> Tensor<T> { ... }
//
// Arithmetic goes through the trait rather than std::ops bounds so that a
// single blanket definition (round-trip through f64) covers every type,
// with the hot float types overriding each method natively. Half-precision
// types come from the `half` crate and only ever see the f64 path.

/// Trait implemented by Rust types that can be stored in a tensor.
pub trait Element:
    Copy + PartialEq + PartialOrd + Send + Sync + 'static + num_traits::NumCast + fmt::Debug + fmt::Display
{
    /// The additive identity.
    const ZERO: Self;
    /// The multiplicative identity.
    const ONE: Self;
    /// Smallest representable value (reduce seed for max).
    const MIN: Self;
    /// Largest representable value (reduce seed for min).
    const MAX: Self;

    /// Convert this value to f64 (for generic numeric code).
    fn to_f64(self) -> f64;

    /// Create a value of this type from f64.
    fn from_f64(v: f64) -> Self;

    fn add(self, rhs: Self) -> Self {
        Self::from_f64(self.to_f64() + rhs.to_f64())
    }

    fn sub(self, rhs: Self) -> Self {
        Self::from_f64(self.to_f64() - rhs.to_f64())
    }

    fn mul(self, rhs: Self) -> Self {
        Self::from_f64(self.to_f64() * rhs.to_f64())
    }

    fn div(self, rhs: Self) -> Self {
        Self::from_f64(self.to_f64() / rhs.to_f64())
    }

    fn neg(self) -> Self {
        Self::from_f64(-self.to_f64())
    }

    fn exp(self) -> Self {
        Self::from_f64(self.to_f64().exp())
    }

    fn abs(self) -> Self {
        Self::from_f64(self.to_f64().abs())
    }
}

impl Element for f32 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const MIN: Self = f32::MIN;
    const MAX: Self = f32::MAX;

    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    fn add(self, rhs: Self) -> Self {
        self + rhs
    }
    fn sub(self, rhs: Self) -> Self {
        self - rhs
    }
    fn mul(self, rhs: Self) -> Self {
        self * rhs
    }
    fn div(self, rhs: Self) -> Self {
        self / rhs
    }
    fn neg(self) -> Self {
        -self
    }
    fn exp(self) -> Self {
        f32::exp(self)
    }
    fn abs(self) -> Self {
        f32::abs(self)
    }
}

impl Element for f64 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const MIN: Self = f64::MIN;
    const MAX: Self = f64::MAX;

    fn to_f64(self) -> f64 {
        self
    }
    fn from_f64(v: f64) -> Self {
        v
    }
    fn add(self, rhs: Self) -> Self {
        self + rhs
    }
    fn sub(self, rhs: Self) -> Self {
        self - rhs
    }
    fn mul(self, rhs: Self) -> Self {
        self * rhs
    }
    fn div(self, rhs: Self) -> Self {
        self / rhs
    }
    fn neg(self) -> Self {
        -self
    }
    fn exp(self) -> Self {
        f64::exp(self)
    }
    fn abs(self) -> Self {
        f64::abs(self)
    }
}

impl Element for half::f16 {
    const ZERO: Self = half::f16::ZERO;
    const ONE: Self = half::f16::ONE;
    const MIN: Self = half::f16::MIN;
    const MAX: Self = half::f16::MAX;

    fn to_f64(self) -> f64 {
        half::f16::to_f64(self)
    }
    fn from_f64(v: f64) -> Self {
        half::f16::from_f64(v)
    }
}

impl Element for half::bf16 {
    const ZERO: Self = half::bf16::ZERO;
    const ONE: Self = half::bf16::ONE;
    const MIN: Self = half::bf16::MIN;
    const MAX: Self = half::bf16::MAX;

    fn to_f64(self) -> f64 {
        half::bf16::to_f64(self)
    }
    fn from_f64(v: f64) -> Self {
        half::bf16::from_f64(v)
    }
}

impl Element for u8 {
    const ZERO: Self = 0;
    const ONE: Self = 1;
    const MIN: Self = u8::MIN;
    const MAX: Self = u8::MAX;

    fn to_f64(self) -> f64 {
        self as f64
    }
    // `as` saturates at the type bounds, which is exactly the clamping
    // behavior quantized arithmetic wants.
    fn from_f64(v: f64) -> Self {
        v as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_arithmetic_is_native() {
        assert_eq!(Element::add(2.0f32, 3.0), 5.0);
        assert_eq!(Element::mul(2.0f64, -4.0), -8.0);
        assert_eq!(Element::neg(1.5f32), -1.5);
    }

    #[test]
    fn u8_round_trip_saturates() {
        assert_eq!(<u8 as Element>::from_f64(-3.0), 0);
        assert_eq!(<u8 as Element>::from_f64(300.0), 255);
        assert_eq!(Element::add(200u8, 100), 255);
    }

    #[test]
    fn half_goes_through_f64() {
        let a = <half::f16 as Element>::from_f64(1.5);
        let b = <half::f16 as Element>::from_f64(0.25);
        assert_eq!(Element::add(a, b).to_f64(), 1.75);
    }
}
