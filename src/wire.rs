//! Fixed, little-endian wire types for transport exchanges.
//!
//! Typed payload buffers cross the communicator as plain byte slices; the
//! records here cover the engine's own setup traffic (counts and index
//! lists). All multi-byte integers are stored pre-LE with `.to_le()` and
//! decoded with `from_le()`.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

/// Decode a byte buffer into a vector of `T` without assuming the source was
/// aligned for `T`.
pub fn decode_vec<T: Pod>(bytes: &[u8]) -> Result<Vec<T>, String> {
    let unit = std::mem::size_of::<T>();
    if unit == 0 || bytes.len() % unit != 0 {
        return Err(format!(
            "byte length {} is not a multiple of unit size {unit}",
            bytes.len()
        ));
    }
    let mut out = vec![T::zeroed(); bytes.len() / unit];
    cast_slice_mut(&mut out).copy_from_slice(bytes);
    Ok(out)
}

/// A per-peer element count.
#[repr(transparent)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount {
    n_le: u64,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

/// A root or leaf index carried in setup index lists.
#[repr(transparent)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireIdx {
    id_le: u64,
}

impl WireIdx {
    pub fn of(id: usize) -> Self {
        Self {
            id_le: (id as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.id_le) as usize
    }
}

const_assert_eq!(std::mem::size_of::<WireCount>(), 8);
const_assert_eq!(std::mem::size_of::<WireIdx>(), 8);
