//! Renderer-native textures.
//!
//! [`Texture`] is what the materializer produces: a decoded RGBA surface plus the flags a
//! renderer needs to upload it. [`GpuTexture`] is the uploaded wgpu counterpart.

use image::RgbaImage;

/// How the renderer should interpret the stored pixel values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorSpace {
    /// Values are sRGB encoded and are linearised when sampled.
    Srgb,
    /// Values are used as stored, without any conversion on sampling.
    Linear,
}

/// A decoded texture that has not necessarily been uploaded yet.
#[derive(Clone, Debug)]
pub struct Texture {
    pub pixels: RgbaImage,
    pub color_space: ColorSpace,
    pub premultiply_alpha: bool,
    pub flip_y: bool,
    /// Set while the pixel data has not reached the GPU.
    pub needs_upload: bool,
}

impl Texture {
    /// Wraps an already display-ready surface: no color conversion, straight alpha, no flip.
    pub fn display_ready(pixels: RgbaImage) -> Self {
        Self {
            pixels,
            color_space: ColorSpace::Linear,
            premultiply_alpha: false,
            flip_y: false,
            needs_upload: true,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }
}

/// A GPU texture with a view and sampler.
#[derive(Clone, Debug)]
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
}

impl GpuTexture {
    /// Upload a decoded texture.
    ///
    /// # Arguments
    ///
    /// * `texture` is the decoded surface; its color space picks between `Rgba8Unorm`
    ///   (linear, no conversion) and `Rgba8UnormSrgb`
    /// * `label` is used as a debug label for the GPU resource
    pub fn from_texture(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        texture: &Texture,
        label: Option<&str>,
    ) -> Self {
        let (width, height) = texture.dimensions();
        let size = wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        };
        let format = match texture.color_space {
            ColorSpace::Linear => wgpu::TextureFormat::Rgba8Unorm,
            ColorSpace::Srgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        };
        let gpu_texture = device.create_texture(&wgpu::TextureDescriptor {
            label,
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        if width > 0 && height > 0 {
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    aspect: wgpu::TextureAspect::All,
                    texture: &gpu_texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                },
                &texture.pixels,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * width),
                    rows_per_image: Some(height),
                },
                size,
            );
        }

        let view = gpu_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = create_default_sampler(device);
        Self {
            texture: gpu_texture,
            view,
            sampler,
        }
    }
}

pub fn create_default_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        address_mode_u: wgpu::AddressMode::Repeat,
        address_mode_v: wgpu::AddressMode::Repeat,
        address_mode_w: wgpu::AddressMode::Repeat,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::MipmapFilterMode::Linear,
        ..Default::default()
    })
}
