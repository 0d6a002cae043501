//! Image to input-buffer preprocessing.
//!
//! Per sample: reconcile channels, resize (fixed networks only), convert to
//! `f32`, subtract the channel means and write each plane through its
//! [`ChannelView`]. The last step is what fills the engine's input buffer.

use crate::aliasing::{ChannelView, ChannelViews};
use crate::error::UsageError;
use crate::imaging::{ColorConversion, Image};
use crate::shape::SpatialMode;
use crate::types::ChannelOrder;
use ndarray::{Array3, Axis};
use tracing::trace;

#[derive(Debug, Clone)]
pub struct Preprocessor {
    channels: usize,
    means: Vec<f32>,
    order: ChannelOrder,
}

impl Preprocessor {
    pub fn new(channels: usize, means: Vec<f32>, order: ChannelOrder) -> Self {
        Self { channels, means, order }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn means(&self) -> &[f32] {
        &self.means
    }

    /// Writes one sample into the views of its slot.
    pub fn preprocess(
        &self,
        image: &Image,
        mode: &SpatialMode,
        views: &mut [ChannelView<'_>],
    ) -> Result<(), UsageError> {
        if image.is_empty() {
            views.iter_mut().for_each(|v| v.fill(0.0));
            return Ok(());
        }

        let mut sample = image;
        let converted;
        if let Some(conversion) = ColorConversion::between(image.channels(), self.channels) {
            converted = image.convert(conversion, self.order);
            sample = &converted;
        }

        let resized;
        if let SpatialMode::Fixed { height, width } = *mode {
            if sample.size() != (height, width) {
                resized = sample.resize(height, width)?;
                sample = &resized;
            }
        }

        let float = sample.to_f32();
        self.split_normalized(&float, views)
    }

    /// Mean subtraction fused with the planar split.
    fn split_normalized(
        &self,
        float: &Array3<f32>,
        views: &mut [ChannelView<'_>],
    ) -> Result<(), UsageError> {
        let (h, w, c) = float.dim();
        if let Some(view) = views.first() {
            if (view.height(), view.width()) != (h, w) {
                return Err(UsageError::ExtentMismatch {
                    expected: (view.height(), view.width()),
                    found: (h, w),
                });
            }
        }
        if c != views.len() {
            trace!("image has {} channels, input expects {}", c, views.len());
        }

        for (ch, view) in views.iter_mut().enumerate() {
            if ch >= c {
                view.fill(0.0);
                continue;
            }
            let mean = self.means.get(ch).copied().unwrap_or(0.0);
            let plane = float.index_axis(Axis(2), ch);
            for (dst, &src) in view.as_mut_slice().iter_mut().zip(plane.iter()) {
                *dst = src - mean;
            }
        }
        Ok(())
    }

    /// Preprocesses `images` into consecutive slots. Slots past the last image are zeroed.
    pub fn preprocess_batch(
        &self,
        images: &[Image],
        mode: &SpatialMode,
        views: &mut ChannelViews<'_>,
    ) -> Result<(), UsageError> {
        let capacity = views.samples();
        if images.len() > capacity {
            return Err(UsageError::BatchTooLarge { requested: images.len(), capacity });
        }
        for slot in 0..capacity {
            let slot_views = views.sample_mut(slot);
            match images.get(slot) {
                Some(image) => self.preprocess(image, mode, slot_views)?,
                None => slot_views.iter_mut().for_each(|v| v.fill(0.0)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array3, Array4};

    fn fixed(height: usize, width: usize) -> SpatialMode {
        SpatialMode::Fixed { height, width }
    }

    fn run(pre: &Preprocessor, images: &[Image], mode: SpatialMode, buffer: &mut Array4<f32>) -> Result<(), UsageError> {
        let mut views = ChannelViews::wrap(buffer.view_mut(), 0)?;
        pre.preprocess_batch(images, &mode, &mut views)
    }

    #[test]
    fn test_empty_image_zero_fills() {
        let pre = Preprocessor::new(3, vec![1.0, 2.0, 3.0], ChannelOrder::Bgr);
        let mut buffer = Array4::<f32>::from_elem((1, 3, 4, 5), 9.0);
        run(&pre, &[Image::empty()], fixed(4, 5), &mut buffer).unwrap();
        assert!(buffer.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_mean_subtraction_and_planar_split() {
        let pre = Preprocessor::new(3, vec![1.0, 2.0, 3.0], ChannelOrder::Bgr);
        // 1x2 image: pixel (10, 20, 30), pixel (40, 50, 60)
        let img = Image::from_u8(Array3::from_shape_vec((1, 2, 3), vec![10, 20, 30, 40, 50, 60]).unwrap());
        let mut buffer = Array4::<f32>::zeros((1, 3, 1, 2));
        run(&pre, &[img], fixed(1, 2), &mut buffer).unwrap();

        assert_eq!(buffer.slice(s![0, 0, 0, ..]).to_vec(), vec![9.0, 39.0]);
        assert_eq!(buffer.slice(s![0, 1, 0, ..]).to_vec(), vec![18.0, 48.0]);
        assert_eq!(buffer.slice(s![0, 2, 0, ..]).to_vec(), vec![27.0, 57.0]);
    }

    #[test]
    fn test_gray_image_on_color_network() {
        let pre = Preprocessor::new(3, vec![0.0, 1.0, 2.0], ChannelOrder::Bgr);
        let img = Image::from_u8(Array3::from_elem((2, 2, 1), 50));
        let mut buffer = Array4::<f32>::zeros((1, 3, 2, 2));
        run(&pre, &[img], fixed(2, 2), &mut buffer).unwrap();

        assert!(buffer.slice(s![0, 0, .., ..]).iter().all(|&v| v == 50.0));
        assert!(buffer.slice(s![0, 2, .., ..]).iter().all(|&v| v == 48.0));
    }

    #[test]
    fn test_color_alpha_image_on_gray_network() {
        let pre = Preprocessor::new(1, vec![0.0], ChannelOrder::Bgr);
        let img = Image::from_u8(Array3::from_shape_vec((1, 1, 4), vec![0, 0, 255, 17]).unwrap());
        let mut buffer = Array4::<f32>::zeros((1, 1, 1, 1));
        run(&pre, &[img], fixed(1, 1), &mut buffer).unwrap();
        assert_eq!(buffer[[0, 0, 0, 0]], 76.0);
    }

    #[test]
    fn test_fixed_mode_resizes() {
        let pre = Preprocessor::new(1, vec![4.0], ChannelOrder::Bgr);
        let img = Image::from_f32(Array3::from_elem((8, 8, 1), 12.0));
        let mut buffer = Array4::<f32>::zeros((1, 1, 3, 5));
        run(&pre, &[img], fixed(3, 5), &mut buffer).unwrap();
        assert!(buffer.iter().all(|&v| (v - 8.0).abs() < 1e-4));
    }

    #[test]
    fn test_variable_mode_extent_mismatch() {
        let pre = Preprocessor::new(1, vec![0.0], ChannelOrder::Bgr);
        let mode = SpatialMode::Variable { current_height: 4, current_width: 4, dense_output: false };
        let img = Image::from_u8(Array3::zeros((5, 4, 1)));
        let mut buffer = Array4::<f32>::zeros((1, 1, 4, 4));
        assert_eq!(
            run(&pre, &[img], mode, &mut buffer),
            Err(UsageError::ExtentMismatch { expected: (4, 4), found: (5, 4) })
        );
    }

    #[test]
    fn test_unused_slots_are_zeroed() {
        let pre = Preprocessor::new(1, vec![0.0], ChannelOrder::Bgr);
        let img = Image::from_u8(Array3::from_elem((2, 2, 1), 3));
        let mut buffer = Array4::<f32>::from_elem((3, 1, 2, 2), 7.0);
        run(&pre, &[img.clone(), img], fixed(2, 2), &mut buffer).unwrap();

        assert!(buffer.slice(s![0..2, .., .., ..]).iter().all(|&v| v == 3.0));
        assert!(buffer.slice(s![2, .., .., ..]).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_too_many_images() {
        let pre = Preprocessor::new(1, vec![0.0], ChannelOrder::Bgr);
        let mut buffer = Array4::<f32>::zeros((1, 1, 2, 2));
        let images = vec![Image::empty(), Image::empty()];
        assert_eq!(
            run(&pre, &images, fixed(2, 2), &mut buffer),
            Err(UsageError::BatchTooLarge { requested: 2, capacity: 1 })
        );
    }

    #[test]
    fn test_views_alias_buffer_for_all_channel_pairs() {
        for net_channels in [1, 3] {
            for image_channels in [1, 3, 4] {
                let pre = Preprocessor::new(net_channels, vec![0.5; net_channels], ChannelOrder::Bgr);
                let img = Image::from_u8(Array3::from_elem((6, 6, image_channels), 1));
                let mut buffer = Array4::<f32>::zeros((2, net_channels, 4, 4));
                let base = buffer.as_ptr();

                let mut views = ChannelViews::wrap(buffer.view_mut(), 0).unwrap();
                pre.preprocess_batch(&[img], &fixed(4, 4), &mut views).unwrap();
                assert_eq!(views.token().base, base);
                drop(views);

                assert!(buffer.slice(s![0, .., .., ..]).iter().all(|&v| (v - 0.5).abs() < 1e-4));
            }
        }
    }
}
