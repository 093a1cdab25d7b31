// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Key semantics for Arrow native types
//!
//! Grouping keys compare by numeric value rather than by physical
//! representation: `Int32(1)`, `Int64(1)` and `Float64(1.0)` are the same key.
//! Floats follow `isequal` style rules: NaN equals NaN and sorts after every
//! number, and `-0.0` is a different key from `0.0`.

use std::cmp::Ordering;

use super::arrow_hash_kernels::{hash_float, hash_integer};

/// Floats beyond this magnitude are never treated as integers
const INTEGRAL_FLOAT_LIMIT: f64 = 1.0e38;

/// Element-level hash, equality and ordering for an Arrow native type
pub trait KeyNative: Copy + Send + Sync + 'static {
    fn key_hash(self) -> u64;

    fn key_eq(self, other: Self) -> bool;

    fn key_cmp(self, other: Self) -> Ordering;

    fn is_nan(self) -> bool {
        false
    }
}

macro_rules! impl_integer_key {
    ($($t:ty),*) => {
        $(
            impl KeyNative for $t {
                #[inline]
                fn key_hash(self) -> u64 {
                    hash_integer(self as i128)
                }

                #[inline]
                fn key_eq(self, other: Self) -> bool {
                    self == other
                }

                #[inline]
                fn key_cmp(self, other: Self) -> Ordering {
                    self.cmp(&other)
                }
            }
        )*
    };
}

impl_integer_key!(i8, i16, i32, i64, u8, u16, u32, u64);

impl KeyNative for f32 {
    #[inline]
    fn key_hash(self) -> u64 {
        hash_float(self as f64)
    }

    #[inline]
    fn key_eq(self, other: Self) -> bool {
        float_eq(self as f64, other as f64)
    }

    #[inline]
    fn key_cmp(self, other: Self) -> Ordering {
        float_cmp(self as f64, other as f64)
    }

    fn is_nan(self) -> bool {
        f32::is_nan(self)
    }
}

impl KeyNative for f64 {
    #[inline]
    fn key_hash(self) -> u64 {
        hash_float(self)
    }

    #[inline]
    fn key_eq(self, other: Self) -> bool {
        float_eq(self, other)
    }

    #[inline]
    fn key_cmp(self, other: Self) -> Ordering {
        float_cmp(self, other)
    }

    fn is_nan(self) -> bool {
        f64::is_nan(self)
    }
}

/// Key equality for floats: NaN equals NaN, `-0.0` differs from `0.0`
#[inline]
pub fn float_eq(a: f64, b: f64) -> bool {
    if a.is_nan() || b.is_nan() {
        return a.is_nan() && b.is_nan();
    }
    a.to_bits() == b.to_bits()
}

/// Total order for floats with every NaN after `+inf`
#[inline]
pub fn float_cmp(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.total_cmp(&b),
    }
}

/// The integer a float is key-equal to, if any
///
/// `-0.0` is not integral here, so it never matches integer zero.
#[inline]
pub fn float_as_integer(f: f64) -> Option<i128> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < INTEGRAL_FLOAT_LIMIT {
        if f == 0.0 && f.is_sign_negative() {
            return None;
        }
        Some(f as i128)
    } else {
        None
    }
}

/// Order an integer against a float under the key order
pub fn cmp_integer_float(i: i128, f: f64) -> Ordering {
    if f.is_nan() {
        return Ordering::Less;
    }
    if let Some(fi) = float_as_integer(f) {
        return i.cmp(&fi);
    }
    if f == 0.0 {
        // -0.0 sits just below integer zero
        return if i < 0 { Ordering::Less } else { Ordering::Greater };
    }
    if f >= INTEGRAL_FLOAT_LIMIT {
        return Ordering::Less;
    }
    if f <= -INTEGRAL_FLOAT_LIMIT {
        return Ordering::Greater;
    }
    let floor = f.floor() as i128;
    if i <= floor {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}
