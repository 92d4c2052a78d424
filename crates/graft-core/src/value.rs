// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Leaf values (dynamic state) and static attribute values (topology).
//!
//! The split matters: a [`Value`] is what the numerical engine traces and
//! replaces; it lives in a [`crate::FlatState`]. A [`Static`] is configuration
//! baked into the [`crate::GraphDef`]; changing it changes the descriptor and
//! therefore its digest.
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rng::RngKey;

/// Error returned when an array's shape disagrees with its element count.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("shape {shape:?} describes {expected} elements, found {found}")]
pub struct ShapeError {
    /// Requested shape.
    pub shape: Vec<usize>,
    /// Element count implied by `shape`.
    pub expected: usize,
    /// Element count supplied.
    pub found: usize,
}

/// Dense row-major `f32` array.
///
/// Element storage is reference counted: cloning an `Array` (and therefore a
/// [`Value`] or a [`crate::Variable`]) aliases the same buffer instead of
/// copying it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Array {
    shape: Vec<usize>,
    data: Arc<[f32]>,
}

impl Array {
    /// Builds an array from a shape and row-major data.
    ///
    /// # Errors
    /// Returns [`ShapeError`] when `data.len()` is not the product of `shape`.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, ShapeError> {
        let expected = shape.iter().product::<usize>();
        if expected != data.len() {
            return Err(ShapeError {
                shape,
                expected,
                found: data.len(),
            });
        }
        Ok(Self {
            shape,
            data: data.into(),
        })
    }

    /// One-dimensional array over `data`.
    #[must_use]
    pub fn from_slice(data: &[f32]) -> Self {
        Self {
            shape: vec![data.len()],
            data: data.into(),
        }
    }

    /// Array of `shape` with every element set to `fill`.
    #[must_use]
    pub fn full(shape: Vec<usize>, fill: f32) -> Self {
        let len = shape.iter().product::<usize>();
        Self {
            shape,
            data: vec![fill; len].into(),
        }
    }

    /// Array of `shape` filled with zeros.
    #[must_use]
    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::full(shape, 0.0)
    }

    /// Dimensions, outermost first.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Row-major elements.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` for zero-element arrays.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Elementwise map into a fresh buffer of the same shape.
    #[must_use]
    pub fn map(&self, f: impl FnMut(f32) -> f32) -> Self {
        Self {
            shape: self.shape.clone(),
            data: self.data.iter().copied().map(f).collect(),
        }
    }

    /// Returns `true` if both arrays alias the same element buffer.
    #[must_use]
    pub fn shares_buffer(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    fn same_bits(&self, other: &Self) -> bool {
        self.shape == other.shape
            && (self.shares_buffer(other)
                || self
                    .data
                    .iter()
                    .zip(other.data.iter())
                    .all(|(a, b)| a.to_bits() == b.to_bits()))
    }
}

/// Opaque leaf value carried by variables and raw leaf slots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Floating-point scalar.
    Scalar(f64),
    /// Signed integer scalar.
    Int(i64),
    /// Unsigned integer scalar (counters).
    UInt(u64),
    /// Boolean scalar.
    Bool(bool),
    /// Dense array.
    Array(Array),
    /// RNG key material.
    Key(RngKey),
    /// Opaque bytes owned by an external collaborator.
    Bytes(Bytes),
}

impl Value {
    /// Short name of the value's kind, for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Bool(_) => "bool",
            Self::Array(_) => "array",
            Self::Key(_) => "key",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Returns the scalar payload, widening integers.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Returns the unsigned payload.
    #[must_use]
    pub const fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the signed payload.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the array payload.
    #[must_use]
    pub const fn as_array(&self) -> Option<&Array> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Returns the RNG key payload.
    #[must_use]
    pub const fn as_key(&self) -> Option<RngKey> {
        match self {
            Self::Key(k) => Some(*k),
            _ => None,
        }
    }
    /// Equality with floats compared by bit pattern, so a NaN equals itself
    /// and `0.0` differs from `-0.0`.
    #[must_use]
    pub fn same_bits(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => a.to_bits() == b.to_bits(),
            (Self::Array(a), Self::Array(b)) => a.same_bits(b),
            _ => self == other,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Scalar(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Array> for Value {
    fn from(v: Array) -> Self {
        Self::Array(v)
    }
}

impl From<RngKey> for Value {
    fn from(v: RngKey) -> Self {
        Self::Key(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Self::Bytes(v)
    }
}

/// Static (non-leaf) attribute value embedded in a [`crate::GraphDef`].
///
/// Floats compare and hash by bit pattern so descriptors stay `Eq + Hash`;
/// `0.0` and `-0.0` are distinct statics, and a NaN equals itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Static {
    /// Absent value.
    None,
    /// Boolean flag.
    Bool(bool),
    /// Integer setting (feature counts, kernel sizes, ...).
    Int(i64),
    /// Floating-point setting (epsilons, momenta, ...).
    Float(f64),
    /// String setting (activation names, ...).
    Str(String),
    /// Ordered collection of statics.
    List(Vec<Static>),
}

impl Static {
    pub(crate) fn hash_into(&self, hasher: &mut blake3::Hasher) {
        match self {
            Self::None => {
                hasher.update(&[0]);
            }
            Self::Bool(b) => {
                hasher.update(&[1, u8::from(*b)]);
            }
            Self::Int(i) => {
                hasher.update(&[2]);
                hasher.update(&i.to_le_bytes());
            }
            Self::Float(f) => {
                hasher.update(&[3]);
                hasher.update(&f.to_bits().to_le_bytes());
            }
            Self::Str(s) => {
                hasher.update(&[4]);
                hasher.update(&(s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
            Self::List(items) => {
                hasher.update(&[5]);
                hasher.update(&(items.len() as u64).to_le_bytes());
                for item in items {
                    item.hash_into(hasher);
                }
            }
        }
    }
}

impl PartialEq for Static {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Static {}

impl core::hash::Hash for Static {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Self::None => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::Str(s) => s.hash(state),
            Self::List(items) => items.hash(state),
        }
    }
}

impl From<bool> for Static {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Static {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<usize> for Static {
    fn from(v: usize) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Static {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Static {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Static {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}
