//! Lane-packed tensor container.
//!
//! A [`PackedTensor`] holds up to three logical dimensions (`w`, `h`, `c`)
//! and folds a lane pack factor `elempack` into the outermost one: `w` for
//! rank 1, `h` for rank 2, `c` for rank 3. Each stored element is then a
//! contiguous group of `elempack` scalars that belong to `elempack`
//! consecutive outer indices, and `w`/`h`/`c` count packs, not scalars.
//!
//! Rank-3 channels are `cstep` elements apart, where `cstep` rounds the
//! channel size up so that every channel starts on a 16-byte boundary.

use crate::error::{KernelError, Result};
use bytemuck::{Pod, Zeroable};

/// Pack factors accepted by the container.
pub const SUPPORTED_ELEMPACKS: [usize; 3] = [1, 4, 8];

const CHANNEL_ALIGN_BYTES: usize = 16;

/// N-dimensional (1–3) tensor with an optional lane pack on the outermost
/// dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedTensor<T: Pod> {
    data: Vec<T>,
    dims: usize,
    w: usize,
    h: usize,
    c: usize,
    elempack: usize,
    cstep: usize,
}

fn check_elempack(elempack: usize) -> Result<()> {
    if !SUPPORTED_ELEMPACKS.contains(&elempack) {
        return Err(KernelError::invalid(format!(
            "elempack {elempack} not supported (expected one of {SUPPORTED_ELEMPACKS:?})"
        ))
        .into());
    }
    Ok(())
}

fn try_zeroed<T: Pod>(len: usize) -> Result<Vec<T>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|e| KernelError::ResourceExhausted {
        requested_bytes: len.saturating_mul(std::mem::size_of::<T>()),
        reason: e.to_string(),
    })?;
    data.resize(len, T::zeroed());
    Ok(data)
}

impl<T: Pod> PackedTensor<T> {
    fn allocate(dims: usize, w: usize, h: usize, c: usize, elempack: usize) -> Result<Self> {
        check_elempack(elempack)?;
        let cstep = if dims == 3 {
            let elemsize = std::mem::size_of::<T>() * elempack;
            let bytes = w * h * elemsize;
            bytes.div_ceil(CHANNEL_ALIGN_BYTES) * CHANNEL_ALIGN_BYTES / elemsize.max(1)
        } else {
            w * h
        };
        let data = try_zeroed(cstep * c * elempack)?;
        Ok(Self { data, dims, w, h, c, elempack, cstep })
    }

    /// Zeroed rank-1 tensor of `w` packs.
    pub fn new_1d(w: usize, elempack: usize) -> Result<Self> {
        Self::allocate(1, w, 1, 1, elempack)
    }

    /// Zeroed rank-2 tensor of `h` packed rows of `w` elements.
    pub fn new_2d(w: usize, h: usize, elempack: usize) -> Result<Self> {
        Self::allocate(2, w, h, 1, elempack)
    }

    /// Zeroed rank-3 tensor of `c` packed channels of `h × w` elements.
    pub fn new_3d(w: usize, h: usize, c: usize, elempack: usize) -> Result<Self> {
        Self::allocate(3, w, h, c, elempack)
    }

    /// Rank-1 tensor over caller data laid out as `w` packs of `elempack`.
    pub fn from_vec_1d(data: Vec<T>, w: usize, elempack: usize) -> Result<Self> {
        check_elempack(elempack)?;
        check_len(data.len(), w * elempack)?;
        Ok(Self { data, dims: 1, w, h: 1, c: 1, elempack, cstep: w })
    }

    /// Rank-2 tensor over caller data laid out as `h` rows of `w` packs.
    pub fn from_vec_2d(data: Vec<T>, w: usize, h: usize, elempack: usize) -> Result<Self> {
        check_elempack(elempack)?;
        check_len(data.len(), w * h * elempack)?;
        Ok(Self { data, dims: 2, w, h, c: 1, elempack, cstep: w * h })
    }

    /// Rank-3 tensor from densely stored channels; padding is inserted so
    /// every channel starts on an aligned `cstep` boundary.
    pub fn from_vec_3d(data: Vec<T>, w: usize, h: usize, c: usize, elempack: usize) -> Result<Self> {
        check_len(data.len(), w * h * c * elempack)?;
        let mut out = Self::new_3d(w, h, c, elempack)?;
        let plane = w * h * elempack;
        if plane > 0 {
            for (q, src) in data.chunks_exact(plane).enumerate() {
                out.channel_mut(q)[..plane].copy_from_slice(src);
            }
        }
        Ok(out)
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn w(&self) -> usize {
        self.w
    }

    pub fn h(&self) -> usize {
        self.h
    }

    pub fn c(&self) -> usize {
        self.c
    }

    pub fn elempack(&self) -> usize {
        self.elempack
    }

    /// Elements (packs) between consecutive channels.
    pub fn cstep(&self) -> usize {
        self.cstep
    }

    /// Number of stored scalars including channel padding.
    pub fn total(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0 || self.c == 0
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Scalars of channel `q`, padding included.
    pub fn channel(&self, q: usize) -> &[T] {
        let stride = self.cstep * self.elempack;
        &self.data[q * stride..(q + 1) * stride]
    }

    pub fn channel_mut(&mut self, q: usize) -> &mut [T] {
        let stride = self.cstep * self.elempack;
        &mut self.data[q * stride..(q + 1) * stride]
    }

    /// Row `y` of a rank-2 tensor, or of channel 0 of a rank-3 tensor.
    pub fn row(&self, y: usize) -> &[T] {
        let stride = self.w * self.elempack;
        &self.data[y * stride..(y + 1) * stride]
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [T] {
        let stride = self.w * self.elempack;
        &mut self.data[y * stride..(y + 1) * stride]
    }

    /// Row `y` of channel `q`.
    pub fn channel_row(&self, q: usize, y: usize) -> &[T] {
        let stride = self.w * self.elempack;
        &self.channel(q)[y * stride..(y + 1) * stride]
    }

    /// The packed element at `(x, y, q)`, `elempack` scalars wide.
    pub fn at(&self, x: usize, y: usize, q: usize) -> &[T] {
        let off = (q * self.cstep + y * self.w + x) * self.elempack;
        &self.data[off..off + self.elempack]
    }

    /// Logical extents, outermost first, with the pack unfolded:
    /// `[w·p]`, `[h·p, w]` or `[c·p, h, w]`.
    pub fn logical_shape(&self) -> Vec<usize> {
        let p = self.elempack;
        match self.dims {
            1 => vec![self.w * p],
            2 => vec![self.h * p, self.w],
            _ => vec![self.c * p, self.h, self.w],
        }
    }

    fn logical_offset(&self, index: &[usize]) -> usize {
        let p = self.elempack;
        match self.dims {
            1 => index[0],
            2 => {
                let (outer, x) = (index[0], index[1]);
                ((outer / p) * self.w + x) * p + outer % p
            }
            _ => {
                let (outer, y, x) = (index[0], index[1], index[2]);
                ((outer / p) * self.cstep + y * self.w + x) * p + outer % p
            }
        }
    }

    /// Scalar at a logical index given outermost first, e.g. `[z, y, x]`.
    ///
    /// # Panics
    ///
    /// Panics if `index.len() != dims` or a coordinate is out of range.
    pub fn logical(&self, index: &[usize]) -> T {
        assert_eq!(index.len(), self.dims, "index rank mismatch");
        self.data[self.logical_offset(index)]
    }

    /// Overwrite the scalar at a logical index.
    pub fn set_logical(&mut self, index: &[usize], value: T) {
        assert_eq!(index.len(), self.dims, "index rank mismatch");
        let off = self.logical_offset(index);
        self.data[off] = value;
    }

    /// All scalars in logical row-major order (outermost first, pack
    /// unfolded, channel padding dropped).
    pub fn to_logical_vec(&self) -> Vec<T> {
        let shape = self.logical_shape();
        let mut out = Vec::with_capacity(shape.iter().product());
        match self.dims {
            1 => out.extend_from_slice(&self.data[..shape[0]]),
            2 => {
                for y in 0..shape[0] {
                    for x in 0..shape[1] {
                        out.push(self.logical(&[y, x]));
                    }
                }
            }
            _ => {
                for z in 0..shape[0] {
                    for y in 0..shape[1] {
                        for x in 0..shape[2] {
                            out.push(self.logical(&[z, y, x]));
                        }
                    }
                }
            }
        }
        out
    }

    /// Rebuild the tensor with a different pack factor on the outermost
    /// dimension. The logical values are unchanged.
    pub fn to_elempack(&self, elempack: usize) -> Result<Self> {
        check_elempack(elempack)?;
        let shape = self.logical_shape();
        if shape[0] % elempack != 0 {
            return Err(KernelError::invalid(format!(
                "outer extent {} is not divisible by elempack {elempack}",
                shape[0]
            ))
            .into());
        }
        let outer = shape[0] / elempack;
        let mut out = match self.dims {
            1 => Self::new_1d(outer, elempack)?,
            2 => Self::new_2d(self.w, outer, elempack)?,
            _ => Self::new_3d(self.w, self.h, outer, elempack)?,
        };
        match self.dims {
            1 => {
                for x in 0..shape[0] {
                    out.set_logical(&[x], self.logical(&[x]));
                }
            }
            2 => {
                for y in 0..shape[0] {
                    for x in 0..shape[1] {
                        out.set_logical(&[y, x], self.logical(&[y, x]));
                    }
                }
            }
            _ => {
                for z in 0..shape[0] {
                    for y in 0..shape[1] {
                        for x in 0..shape[2] {
                            out.set_logical(&[z, y, x], self.logical(&[z, y, x]));
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

impl<T: Pod> PackedTensor<T> {
    /// Fill every stored scalar, padding included, with `value`.
    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }
}

fn check_len(got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(KernelError::invalid(format!(
            "data length {got} does not match tensor shape (expected {expected})"
        ))
        .into());
    }
    Ok(())
}
