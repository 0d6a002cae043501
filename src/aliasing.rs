//! Planar views mapped directly onto the engine's input buffer.
//!
//! [`ChannelViews::wrap`] splits the input buffer into `batch * channels`
//! planes of `height * width` floats, sample-major, without copying. Writes
//! through a view land in the buffer the engine reads on its next forward
//! pass. Views are stamped with the buffer generation, which the extractor
//! bumps on every reshape attempt, failed ones included. The views' borrow
//! keeps the engine from reshaping while they are alive; the [`WrapToken`]
//! they leave behind is checked right before the forward pass, so a token
//! from before a reshape fails verification.

use crate::error::UsageError;
use ndarray::ArrayViewMut4;

/// One `(sample, channel)` plane of the input buffer.
#[derive(Debug)]
pub struct ChannelView<'a> {
    data: &'a mut [f32],
    height: usize,
    width: usize,
}

impl<'a> ChannelView<'a> {
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn as_ptr(&self) -> *const f32 {
        self.data.as_ptr()
    }

    /// Row-major plane storage.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut *self.data
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }
}

/// Identity of a set of views: their generation and the address of the first plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapToken {
    pub generation: u64,
    pub base: *const f32,
}

/// All planes of the input buffer, in buffer order.
#[derive(Debug)]
pub struct ChannelViews<'a> {
    views: Vec<ChannelView<'a>>,
    channels: usize,
    generation: u64,
}

impl<'a> ChannelViews<'a> {
    /// Wraps the input buffer for its current extent.
    pub fn wrap(input: ArrayViewMut4<'a, f32>, generation: u64) -> Result<Self, UsageError> {
        let (_, channels, height, width) = input.dim();
        let data = input.into_slice().ok_or(UsageError::AliasingBroken)?;
        let views = data
            .chunks_exact_mut((height * width).max(1))
            .map(|data| ChannelView { data, height, width })
            .collect();
        Ok(Self { views, channels, generation })
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of sample slots covered by the views.
    pub fn samples(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.views.len() / self.channels
        }
    }

    /// The `channels` views of sample slot `index`.
    pub fn sample_mut(&mut self, index: usize) -> &mut [ChannelView<'a>] {
        let start = index * self.channels;
        &mut self.views[start..start + self.channels]
    }

    pub fn token(&self) -> WrapToken {
        WrapToken {
            generation: self.generation,
            base: self.views.first().map_or(std::ptr::null(), |v| v.as_ptr()),
        }
    }
}

impl WrapToken {
    /// Checks the token against the current generation and input buffer base address.
    pub fn verify(&self, generation: u64, base: *const f32) -> Result<(), UsageError> {
        if self.generation != generation || self.base != base {
            return Err(UsageError::AliasingBroken);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array4};

    #[test]
    fn test_wrap_covers_buffer_in_order() {
        let mut buffer = Array4::<f32>::zeros((2, 3, 4, 5));
        let base = buffer.as_ptr();
        let mut views = ChannelViews::wrap(buffer.view_mut(), 1).unwrap();

        assert_eq!(views.len(), 6);
        assert_eq!(views.samples(), 2);
        assert_eq!(views.token().base, base);
        for (i, view) in views.sample_mut(1).iter_mut().enumerate() {
            assert_eq!((view.height(), view.width()), (4, 5));
            view.fill(i as f32 + 1.0);
        }

        assert!(buffer.slice(s![0, .., .., ..]).iter().all(|&v| v == 0.0));
        assert!(buffer.slice(s![1, 0, .., ..]).iter().all(|&v| v == 1.0));
        assert!(buffer.slice(s![1, 2, .., ..]).iter().all(|&v| v == 3.0));
    }

    #[test]
    fn test_plane_is_row_major() {
        let mut buffer = Array4::<f32>::zeros((1, 1, 2, 3));
        {
            let mut views = ChannelViews::wrap(buffer.view_mut(), 0).unwrap();
            views.sample_mut(0)[0]
                .as_mut_slice()
                .copy_from_slice(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        }
        assert_eq!(buffer[[0, 0, 1, 0]], 3.0);
        assert_eq!(buffer[[0, 0, 0, 2]], 2.0);
    }

    #[test]
    fn test_token_verification() {
        let mut buffer = Array4::<f32>::zeros((1, 3, 2, 2));
        let token = ChannelViews::wrap(buffer.view_mut(), 7).unwrap().token();

        assert!(token.verify(7, buffer.as_ptr()).is_ok());
        assert_eq!(token.verify(8, buffer.as_ptr()), Err(UsageError::AliasingBroken));

        let other = Array4::<f32>::zeros((1, 3, 2, 2));
        assert_eq!(token.verify(7, other.as_ptr()), Err(UsageError::AliasingBroken));
    }

    #[test]
    fn test_token_is_stale_after_reallocation() {
        let mut buffer = Array4::<f32>::zeros((1, 1, 7, 3));
        let token = ChannelViews::wrap(buffer.view_mut(), 2).unwrap().token();

        buffer = Array4::<f32>::zeros((1, 1, 20, 20));
        assert_eq!(token.verify(3, buffer.as_ptr()), Err(UsageError::AliasingBroken));
    }

    #[test]
    fn test_non_contiguous_buffer_is_rejected() {
        let mut buffer = Array4::<f32>::zeros((2, 3, 4, 4));
        let strided = buffer.slice_mut(s![.., .., ..;2, ..]);
        assert_eq!(
            ChannelViews::wrap(strided, 0).err(),
            Some(UsageError::AliasingBroken)
        );
    }
}
