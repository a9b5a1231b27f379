//! Reduction operators applied when moved data lands in a destination buffer.
//!
//! An [`SfOp`] combines one incoming unit with the value already present.
//! `Replace` makes broadcast/reduce plain copies; `Add`/`Min`/`Max` fold
//! duplicate contributions. Combine order across contributors to the same
//! slot is unspecified, so non-commutative operators are not supported.

/// Pointwise combine of an incoming unit into a destination slot.
pub trait SfOp<T>: Copy {
    fn fuse(acc: &mut T, incoming: T);
}

/// Overwrite the destination with the incoming value.
#[derive(Copy, Clone, Debug, Default)]
pub struct Replace;

/// Accumulate by addition.
#[derive(Copy, Clone, Debug, Default)]
pub struct Add;

/// Keep the smaller value.
#[derive(Copy, Clone, Debug, Default)]
pub struct Min;

/// Keep the larger value.
#[derive(Copy, Clone, Debug, Default)]
pub struct Max;

impl<T: Copy> SfOp<T> for Replace {
    #[inline]
    fn fuse(acc: &mut T, incoming: T) {
        *acc = incoming;
    }
}

impl<T> SfOp<T> for Add
where
    T: std::ops::AddAssign + Copy,
{
    #[inline]
    fn fuse(acc: &mut T, incoming: T) {
        *acc += incoming;
    }
}

impl<T> SfOp<T> for Min
where
    T: PartialOrd + Copy,
{
    #[inline]
    fn fuse(acc: &mut T, incoming: T) {
        if incoming < *acc {
            *acc = incoming;
        }
    }
}

impl<T> SfOp<T> for Max
where
    T: PartialOrd + Copy,
{
    #[inline]
    fn fuse(acc: &mut T, incoming: T) {
        if incoming > *acc {
            *acc = incoming;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_overwrites() {
        let mut v = 7u64;
        Replace::fuse(&mut v, 3);
        assert_eq!(v, 3);
    }

    #[test]
    fn add_accumulates() {
        let mut v = 7i32;
        Add::fuse(&mut v, -3);
        assert_eq!(v, 4);
    }

    #[test]
    fn min_max_fold() {
        let mut lo = 5u32;
        let mut hi = 5u32;
        for x in [9u32, 2, 7] {
            Min::fuse(&mut lo, x);
            Max::fuse(&mut hi, x);
        }
        assert_eq!((lo, hi), (2, 9));
    }
}
