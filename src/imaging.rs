//! Interleaved (HWC) images as consumed by the preprocessing pipeline.
//!
//! Pixels are stored either as `u8` or `f32`. Channels follow the order the
//! network was trained with (see [`ChannelOrder`]); converting a decoded
//! [`DynamicImage`] puts the channels in that order once, up front.

use crate::error::UsageError;
use crate::types::ChannelOrder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageBuffer, Luma};
use ndarray::{Array2, Array3, Axis, ShapeError, Zip};
use std::borrow::Cow;

/// Pixel storage of an [`Image`].
#[derive(Debug, Clone, PartialEq)]
pub enum Pixels {
    U8(Array3<u8>),
    F32(Array3<f32>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pixels: Pixels,
}

impl Image {
    pub fn from_u8(pixels: Array3<u8>) -> Self {
        Self { pixels: Pixels::U8(pixels) }
    }

    pub fn from_f32(pixels: Array3<f32>) -> Self {
        Self { pixels: Pixels::F32(pixels) }
    }

    /// The placeholder image: zero elements. Preprocessing zero-fills its slot.
    pub fn empty() -> Self {
        Self::from_u8(Array3::zeros((0, 0, 1)))
    }

    /// Converts a decoded image, reordering channels to `order`.
    ///
    /// Gray images stay single-channel, images with alpha become 4 channels,
    /// everything else 3. Float images keep `f32` pixels.
    pub fn from_dynamic(img: &DynamicImage, order: ChannelOrder) -> Result<Self, ShapeError> {
        let (width, height) = (img.width() as usize, img.height() as usize);
        let color = img.color();
        let mut image = if color.channel_count() <= 2 && !color.has_alpha() {
            Self::from_u8(Array3::from_shape_vec((height, width, 1), img.to_luma8().into_raw())?)
        } else if matches!(img, DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_)) {
            if color.has_alpha() {
                Self::from_f32(Array3::from_shape_vec(
                    (height, width, 4),
                    img.to_rgba32f().into_raw(),
                )?)
            } else {
                Self::from_f32(Array3::from_shape_vec(
                    (height, width, 3),
                    img.to_rgb32f().into_raw(),
                )?)
            }
        } else if color.has_alpha() {
            Self::from_u8(Array3::from_shape_vec((height, width, 4), img.to_rgba8().into_raw())?)
        } else {
            Self::from_u8(Array3::from_shape_vec((height, width, 3), img.to_rgb8().into_raw())?)
        };
        if order == ChannelOrder::Bgr {
            image.swap_red_blue();
        }
        Ok(image)
    }

    pub fn pixels(&self) -> &Pixels {
        &self.pixels
    }

    fn dim(&self) -> (usize, usize, usize) {
        match &self.pixels {
            Pixels::U8(a) => a.dim(),
            Pixels::F32(a) => a.dim(),
        }
    }

    pub fn height(&self) -> usize {
        self.dim().0
    }

    pub fn width(&self) -> usize {
        self.dim().1
    }

    pub fn channels(&self) -> usize {
        self.dim().2
    }

    /// `(height, width)`
    pub fn size(&self) -> (usize, usize) {
        let (h, w, _) = self.dim();
        (h, w)
    }

    pub fn len(&self) -> usize {
        let (h, w, c) = self.dim();
        h * w * c
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn swap_red_blue(&mut self) {
        if self.channels() < 3 {
            return;
        }
        match &mut self.pixels {
            Pixels::U8(a) => swap_first_third(a),
            Pixels::F32(a) => swap_first_third(a),
        }
    }

    /// Applies one entry of the color conversion table.
    pub fn convert(&self, conversion: ColorConversion, order: ChannelOrder) -> Image {
        match &self.pixels {
            Pixels::U8(a) => Self::from_u8(conversion.apply(a, order)),
            Pixels::F32(a) => Self::from_f32(conversion.apply(a, order)),
        }
    }

    /// Bilinear resize to `height x width`.
    pub fn resize(&self, height: usize, width: usize) -> Result<Image, UsageError> {
        Ok(match &self.pixels {
            Pixels::U8(a) => Self::from_u8(resize_planes(a, height, width)?),
            Pixels::F32(a) => Self::from_f32(resize_bilinear(a, height, width)?),
        })
    }

    /// Float pixels; borrows when the image already holds `f32` data.
    pub fn to_f32(&self) -> Cow<'_, Array3<f32>> {
        match &self.pixels {
            Pixels::F32(a) => Cow::Borrowed(a),
            Pixels::U8(a) => Cow::Owned(a.mapv(f32::from)),
        }
    }
}

fn swap_first_third<T: Copy>(a: &mut Array3<T>) {
    for mut px in a.lanes_mut(Axis(2)) {
        px.swap(0, 2);
    }
}

/// Sample types the conversion table operates on.
pub trait Sample: Copy + Default + 'static {
    fn to_f32(self) -> f32;
    fn from_f32(v: f32) -> Self;
}

impl Sample for u8 {
    fn to_f32(self) -> f32 {
        f32::from(self)
    }

    fn from_f32(v: f32) -> Self {
        v.round().clamp(0.0, 255.0) as u8
    }
}

impl Sample for f32 {
    fn to_f32(self) -> f32 {
        self
    }

    fn from_f32(v: f32) -> Self {
        v
    }
}

/// Channel-count reconciliation between a source image and the network input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorConversion {
    ColorToGray,
    ColorAlphaToGray,
    DropAlpha,
    GrayToColor,
}

impl ColorConversion {
    /// Looks up the conversion for `source -> target` channels.
    ///
    /// `None` means the image is used as is: either the counts already match,
    /// or the pair is outside the table and passed through unchanged.
    pub fn between(source: usize, target: usize) -> Option<Self> {
        match (source, target) {
            (3, 1) => Some(Self::ColorToGray),
            (4, 1) => Some(Self::ColorAlphaToGray),
            (4, 3) => Some(Self::DropAlpha),
            (1, 3) => Some(Self::GrayToColor),
            _ => None,
        }
    }

    pub fn output_channels(self) -> usize {
        match self {
            Self::ColorToGray | Self::ColorAlphaToGray => 1,
            Self::DropAlpha | Self::GrayToColor => 3,
        }
    }

    pub fn apply<T: Sample>(self, src: &Array3<T>, order: ChannelOrder) -> Array3<T> {
        let (h, w, _) = src.dim();
        // BT.601 luma weights, listed for the first, second and third channel.
        let weights = match order {
            ChannelOrder::Bgr => [0.114, 0.587, 0.299],
            ChannelOrder::Rgb => [0.299, 0.587, 0.114],
        };
        let mut out = Array3::<T>::default((h, w, self.output_channels()));
        Zip::from(out.lanes_mut(Axis(2)))
            .and(src.lanes(Axis(2)))
            .for_each(|mut dst, px| match self {
                Self::ColorToGray | Self::ColorAlphaToGray => {
                    let gray = weights[0] * px[0].to_f32()
                        + weights[1] * px[1].to_f32()
                        + weights[2] * px[2].to_f32();
                    dst[0] = T::from_f32(gray);
                }
                Self::DropAlpha => {
                    for c in 0..3 {
                        dst[c] = px[c];
                    }
                }
                Self::GrayToColor => dst.fill(px[0]),
            });
        out
    }
}

/// Resizes every plane with the image crate's triangle filter.
fn resize_planes(src: &Array3<u8>, height: usize, width: usize) -> Result<Array3<u8>, UsageError> {
    let (h, w, channels) = check_resize(src.dim(), height, width)?;
    let mut out = Array3::<u8>::zeros((height, width, channels));
    for c in 0..channels {
        let raw: Vec<u8> = src.index_axis(Axis(2), c).iter().copied().collect();
        let plane = ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(w as u32, h as u32, raw).ok_or_else(|| {
            UsageError::InvalidImage { reason: format!("plane buffer does not match {h}x{w}") }
        })?;
        let resized = imageops::resize(&plane, width as u32, height as u32, FilterType::Triangle);
        let resized = Array2::from_shape_vec((height, width), resized.into_raw())
            .map_err(|e| UsageError::InvalidImage { reason: e.to_string() })?;
        out.index_axis_mut(Axis(2), c).assign(&resized);
    }
    Ok(out)
}

/// Bilinear resize with half-pixel centers. The image crate clamps float
/// samples to `[0, 1]`, which float inputs routinely exceed.
fn resize_bilinear(src: &Array3<f32>, height: usize, width: usize) -> Result<Array3<f32>, UsageError> {
    let (h, w, channels) = check_resize(src.dim(), height, width)?;
    let taps = |dst: usize, src_len: usize| -> Vec<(usize, usize, f32)> {
        let scale = src_len as f32 / dst as f32;
        (0..dst)
            .map(|i| {
                let pos = ((i as f32 + 0.5) * scale - 0.5).max(0.0);
                let i0 = (pos.floor() as usize).min(src_len - 1);
                let i1 = (i0 + 1).min(src_len - 1);
                (i0, i1, pos - i0 as f32)
            })
            .collect()
    };
    let rows = taps(height, h);
    let cols = taps(width, w);

    let mut out = Array3::<f32>::zeros((height, width, channels));
    for (y, &(y0, y1, fy)) in rows.iter().enumerate() {
        for (x, &(x0, x1, fx)) in cols.iter().enumerate() {
            for c in 0..channels {
                let top = src[[y0, x0, c]] * (1.0 - fx) + src[[y0, x1, c]] * fx;
                let bottom = src[[y1, x0, c]] * (1.0 - fx) + src[[y1, x1, c]] * fx;
                out[[y, x, c]] = top * (1.0 - fy) + bottom * fy;
            }
        }
    }
    Ok(out)
}

fn check_resize(
    (h, w, c): (usize, usize, usize),
    height: usize,
    width: usize,
) -> Result<(usize, usize, usize), UsageError> {
    if h == 0 || w == 0 || height == 0 || width == 0 {
        return Err(UsageError::InvalidImage {
            reason: format!("cannot resize {h}x{w} to {height}x{width}"),
        });
    }
    Ok((h, w, c))
}
