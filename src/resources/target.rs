//! Render Targets
//!
//! A [`RenderTarget`] pairs one physical texture with a sampler and exposes
//! it through a stable [`TextureRef`]. Resizing swaps the physical texture
//! behind the reference, so uniforms that captured the target keep working
//! without being reassigned.
//!
//! The presentation target ([`Context::screen`]) is a special case: it
//! resolves to the swapchain image of the frame in progress and has no
//! CPU-readable backing store.

use serde::{Deserialize, Serialize};
use slotmap::Key;

use crate::context::{Context, ContextInner};
use crate::errors::{Result, ShadeError};
use crate::resources::readback::{
    MapWait, PixelData, decode_pixels, map_read, padded_bytes_per_row, readable_texel_size, strip_row_padding,
};
use crate::resources::sampler::{Filter, SamplerConfig, SamplerRef, Wrap};
use crate::resources::texture::{PhysicalTexture, TextureKey, TextureRef};
use crate::telemetry::{self, EventField, EventKind, EventPhase, TelemetryEvent};
use crate::uniforms::{TextureBinding, UniformValue};

// ─── Configuration ───────────────────────────────────────────────────────────

/// What a target may be used for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetUsage {
    /// Color attachment that can be sampled afterwards.
    #[default]
    Render,
    /// Compute write target (storage texture) that can be sampled afterwards.
    Storage,
    /// Both of the above.
    Both,
}

impl TargetUsage {
    #[must_use]
    pub fn flags(self) -> wgpu::TextureUsages {
        let common = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST;
        match self {
            Self::Render => common | wgpu::TextureUsages::RENDER_ATTACHMENT,
            Self::Storage => common | wgpu::TextureUsages::STORAGE_BINDING,
            Self::Both => {
                common | wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::STORAGE_BINDING
            }
        }
    }
}

/// Construction options for a [`RenderTarget`].
///
/// | Field    | Default        | Notes                                          |
/// |----------|----------------|------------------------------------------------|
/// | `format` | `Rgba8Unorm`   | float formats for simulation / HDR work        |
/// | `filter` | `Linear`       | unfilterable formats fall back to `Nearest`    |
/// | `wrap`   | `Clamp`        |                                                |
/// | `usage`  | `Render`       |                                                |
/// | `size`   | `None`         | `None` follows the context size on resize      |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub format: wgpu::TextureFormat,
    pub filter: Filter,
    pub wrap: Wrap,
    pub usage: TargetUsage,
    pub size: Option<[u32; 2]>,
    pub label: Option<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            format: wgpu::TextureFormat::Rgba8Unorm,
            filter: Filter::Linear,
            wrap: Wrap::Clamp,
            usage: TargetUsage::Render,
            size: None,
            label: None,
        }
    }
}

impl TargetConfig {
    /// Config for a fixed-size target.
    #[must_use]
    pub fn sized(width: u32, height: u32) -> Self {
        Self {
            size: Some([width, height]),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_format(mut self, format: wgpu::TextureFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_wrap(mut self, wrap: Wrap) -> Self {
        self.wrap = wrap;
        self
    }

    #[must_use]
    pub fn with_usage(mut self, usage: TargetUsage) -> Self {
        self.usage = usage;
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Checks the format against the usage and returns the filter the
    /// target's sampler will actually use.
    pub fn validate(&self, features: &wgpu::TextureFormatFeatures) -> Result<Filter> {
        let format = self.format;
        if format.is_depth_stencil_format() || format.is_compressed() {
            return Err(ShadeError::InvalidTargetConfig(format!(
                "{format:?} cannot back a render target; use a color format"
            )));
        }
        if let Some([w, h]) = self.size
            && (w == 0 || h == 0)
        {
            return Err(ShadeError::InvalidTargetConfig(format!(
                "target size {w}x{h} has a zero dimension"
            )));
        }

        let wanted = self.usage.flags();
        let missing = wanted - features.allowed_usages;
        if !missing.is_empty() {
            return Err(ShadeError::InvalidTargetConfig(format!(
                "{format:?} does not support {missing:?} (requested usage {:?})",
                self.usage
            )));
        }

        let filterable = features
            .flags
            .contains(wgpu::TextureFormatFeatureFlags::FILTERABLE);
        if self.filter == Filter::Linear && !filterable {
            log::warn!("{format:?} is not filterable on this device; target sampler falls back to nearest");
            return Ok(Filter::Nearest);
        }
        Ok(self.filter)
    }
}

// ─── Render Target ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetKind {
    Offscreen { texture: TextureRef, surface_sized: bool },
    Presentation,
}

/// View and format a render pass draws into.
pub(crate) struct Attachment {
    pub view: wgpu::TextureView,
    pub format: wgpu::TextureFormat,
}

/// Texture plus sampler addressed through a resize-stable handle.
///
/// Cheap to clone; clones share the underlying texture.
#[derive(Clone)]
pub struct RenderTarget {
    ctx: Context,
    kind: TargetKind,
    sampler: SamplerRef,
    usage: TargetUsage,
    label: Option<String>,
}

impl std::fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTarget")
            .field("kind", &self.kind)
            .field("usage", &self.usage)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl RenderTarget {
    /// Creates an offscreen target. Without an explicit size the target
    /// matches the context and follows it on resize.
    pub fn new(ctx: &Context, config: &TargetConfig) -> Result<Self> {
        let inner = ctx.inner();
        inner.ensure_alive()?;

        let filter = config.validate(&inner.format_features(config.format))?;
        let (width, height, surface_sized) = match config.size {
            Some([w, h]) => (w, h, false),
            None => {
                let (w, h) = ctx.size();
                (w, h, true)
            }
        };

        let usage = config.usage.flags();
        let physical = PhysicalTexture::create(
            &inner.device,
            config.label.as_deref(),
            width,
            height,
            config.format,
            usage,
        );
        let texture = inner.textures.write().insert(physical);
        if surface_sized {
            inner.surface_sized.lock().push(texture);
        }

        let sampler = inner
            .samplers
            .lock()
            .get_or_create(&inner.device, &SamplerConfig::from_filter_wrap(filter, config.wrap));

        log::debug!(
            "render target {:?} created ({width}x{height} {:?}, {:?})",
            config.label.as_deref().unwrap_or("unnamed"),
            config.format,
            config.usage
        );

        Ok(Self {
            ctx: ctx.clone(),
            kind: TargetKind::Offscreen {
                texture,
                surface_sized,
            },
            sampler,
            usage: config.usage,
            label: config.label.clone(),
        })
    }

    /// Offscreen target sized to the context that follows it on resize.
    pub fn surface_sized(ctx: &Context, config: &TargetConfig) -> Result<Self> {
        let config = TargetConfig {
            size: None,
            ..config.clone()
        };
        Self::new(ctx, &config)
    }

    pub(crate) fn presentation(ctx: &Context, sampler: SamplerRef) -> Self {
        Self {
            ctx: ctx.clone(),
            kind: TargetKind::Presentation,
            sampler,
            usage: TargetUsage::Render,
            label: Some("screen".to_owned()),
        }
    }

    #[must_use]
    pub fn is_presentation(&self) -> bool {
        self.kind == TargetKind::Presentation
    }

    /// Whether the target follows the context size.
    #[must_use]
    pub fn is_surface_sized(&self) -> bool {
        match self.kind {
            TargetKind::Offscreen { surface_sized, .. } => surface_sized,
            TargetKind::Presentation => true,
        }
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    #[must_use]
    pub fn usage(&self) -> TargetUsage {
        self.usage
    }

    /// Stable handle to the physical texture. For the presentation target
    /// this handle never resolves.
    #[must_use]
    pub fn texture(&self) -> TextureRef {
        match self.kind {
            TargetKind::Offscreen { texture, .. } => texture,
            TargetKind::Presentation => TextureRef(TextureKey::null()),
        }
    }

    #[must_use]
    pub fn sampler(&self) -> SamplerRef {
        self.sampler
    }

    /// Texture and sampler as one uniform payload.
    #[must_use]
    pub fn binding(&self) -> TextureBinding {
        TextureBinding {
            texture: self.texture(),
            sampler: Some(self.sampler),
        }
    }

    /// Current `(width, height)` in physical pixels.
    pub fn size(&self) -> Result<(u32, u32)> {
        let inner = self.ctx.inner();
        match self.kind {
            TargetKind::Offscreen { texture, .. } => {
                let textures = inner.textures.read();
                let physical = textures.get(texture).map_err(|_| ShadeError::Disposed("render target"))?;
                Ok((physical.width, physical.height))
            }
            TargetKind::Presentation => Ok(self.ctx.size()),
        }
    }

    /// Width in physical pixels, 0 once disposed.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.size().map_or(0, |(w, _)| w)
    }

    /// Height in physical pixels, 0 once disposed.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.size().map_or(0, |(_, h)| h)
    }

    pub fn format(&self) -> Result<wgpu::TextureFormat> {
        let inner = self.ctx.inner();
        match self.kind {
            TargetKind::Offscreen { texture, .. } => inner
                .textures
                .read()
                .get(texture)
                .map(|t| t.format)
                .map_err(|_| ShadeError::Disposed("render target")),
            TargetKind::Presentation => self.ctx.surface_format().ok_or(ShadeError::UnreadableTarget),
        }
    }

    /// Reallocates the physical texture at `width`×`height`. Every
    /// [`TextureRef`] to this target stays valid; contents are not preserved.
    pub fn resize(&self, width: u32, height: u32) -> Result<()> {
        let TargetKind::Offscreen { texture, .. } = self.kind else {
            return Err(ShadeError::InvalidTargetConfig(
                "the presentation target is resized through the context".to_owned(),
            ));
        };
        if width == 0 || height == 0 {
            return Err(ShadeError::InvalidTargetConfig(format!(
                "target size {width}x{height} has a zero dimension"
            )));
        }
        let inner = self.ctx.inner();
        inner.ensure_alive()?;
        resize_texture(inner, texture, width, height, self.label.as_deref())
    }

    /// Uploads tightly packed texel rows covering the whole target.
    pub fn write_pixels(&self, data: &[u8]) -> Result<()> {
        let TargetKind::Offscreen { texture, .. } = self.kind else {
            return Err(ShadeError::UnreadableTarget);
        };
        let inner = self.ctx.inner();
        inner.ensure_alive()?;

        let textures = inner.textures.read();
        let physical = textures.get(texture).map_err(|_| ShadeError::Disposed("render target"))?;
        let texel = physical.format.block_copy_size(None).ok_or_else(|| {
            ShadeError::InvalidTargetConfig(format!("{:?} has no fixed texel size", physical.format))
        })?;
        let expected = u64::from(physical.width) * u64::from(physical.height) * u64::from(texel);
        if data.len() as u64 != expected {
            return Err(ShadeError::StorageOverflow {
                len: data.len() as u64,
                capacity: expected,
            });
        }

        inner.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &physical.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(physical.width * texel),
                rows_per_image: Some(physical.height),
            },
            wgpu::Extent3d {
                width: physical.width,
                height: physical.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    /// Copies the target back to the host.
    ///
    /// 8-bit formats yield `w·h·4` bytes in RGBA order; float formats yield
    /// `w·h·4` `f32` values. The presentation target is never readable.
    ///
    /// The future polls the device without blocking, so awaiting it on the
    /// thread that drives frames does not stall it.
    pub async fn read_pixels(&self) -> Result<PixelData> {
        self.read_pixels_with(MapWait::Yield).await
    }

    /// Blocks until the copy has landed and returns the pixels.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn read_pixels_blocking(&self) -> Result<PixelData> {
        pollster::block_on(self.read_pixels_with(MapWait::Block))
    }

    async fn read_pixels_with(&self, wait: MapWait) -> Result<PixelData> {
        let TargetKind::Offscreen { texture, .. } = self.kind else {
            return Err(ShadeError::UnreadableTarget);
        };
        let inner = self.ctx.inner();
        inner.ensure_alive()?;

        let (staging, format, width, height, unpadded, padded) = {
            let textures = inner.textures.read();
            let physical = textures.get(texture).map_err(|_| ShadeError::Disposed("render target"))?;
            let texel = readable_texel_size(physical.format).ok_or_else(|| {
                ShadeError::Readback(format!("{:?} targets cannot be read back", physical.format))
            })?;
            let unpadded = physical.width * texel;
            let padded = padded_bytes_per_row(physical.width, texel);

            let staging = inner.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Target Readback"),
                size: u64::from(padded) * u64::from(physical.height),
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });

            let mut encoder = inner
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Target Readback Encoder"),
                });
            encoder.copy_texture_to_buffer(
                wgpu::TexelCopyTextureInfo {
                    texture: &physical.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyBufferInfo {
                    buffer: &staging,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(padded),
                        rows_per_image: Some(physical.height),
                    },
                },
                wgpu::Extent3d {
                    width: physical.width,
                    height: physical.height,
                    depth_or_array_layers: 1,
                },
            );
            inner.queue.submit(std::iter::once(encoder.finish()));
            (staging, physical.format, physical.width, physical.height, unpadded, padded)
        };

        let raw = map_read(&inner.device, &staging, wait).await?;
        let bytes = strip_row_padding(&raw, height, unpadded, padded);

        telemetry::emit(
            TelemetryEvent::new(EventKind::Readback, EventPhase::Instant)
                .with_label(self.label.as_deref())
                .with_field(EventField::Size(width, height))
                .with_field(EventField::Bytes(bytes.len() as u64)),
        );
        decode_pixels(format, bytes)
    }

    /// Releases the texture. Further use through any clone or captured
    /// [`TextureRef`] fails.
    pub fn dispose(&self) {
        let TargetKind::Offscreen { texture, .. } = self.kind else {
            return;
        };
        let inner = self.ctx.inner();
        if inner.textures.write().remove(texture) {
            inner.surface_sized.lock().retain(|t| *t != texture);
            log::debug!("render target {:?} disposed", self.label.as_deref().unwrap_or("unnamed"));
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        match self.kind {
            TargetKind::Offscreen { texture, .. } => self.ctx.inner().textures.read().get(texture).is_err(),
            TargetKind::Presentation => self.ctx.is_disposed(),
        }
    }

    /// View this target contributes as a color attachment.
    pub(crate) fn attachment(&self) -> Result<Attachment> {
        let inner = self.ctx.inner();
        match self.kind {
            TargetKind::Offscreen { texture, .. } => {
                let textures = inner.textures.read();
                let physical = textures.get(texture).map_err(|_| ShadeError::Disposed("render target"))?;
                if !physical.usage.contains(wgpu::TextureUsages::RENDER_ATTACHMENT) {
                    return Err(ShadeError::InvalidTargetConfig(format!(
                        "target {:?} was created with {:?} usage and cannot be drawn into",
                        self.label.as_deref().unwrap_or("unnamed"),
                        self.usage
                    )));
                }
                Ok(Attachment {
                    view: physical.view.clone(),
                    format: physical.format,
                })
            }
            TargetKind::Presentation => {
                if inner.surface.is_none() {
                    return Err(ShadeError::Surface(
                        "a headless context has no presentation surface".to_owned(),
                    ));
                }
                let frame = inner.frame.lock();
                let view = frame.view.clone().ok_or(ShadeError::NoFrameInProgress)?;
                Ok(Attachment {
                    view,
                    format: frame.format,
                })
            }
        }
    }
}

/// Swaps the physical texture behind `texture` for one at the new size.
pub(crate) fn resize_texture(
    inner: &ContextInner,
    texture: TextureRef,
    width: u32,
    height: u32,
    label: Option<&str>,
) -> Result<()> {
    let mut textures = inner.textures.write();
    let (format, usage) = {
        let current = textures.get(texture).map_err(|_| ShadeError::Disposed("render target"))?;
        if current.width == width && current.height == height {
            return Ok(());
        }
        (current.format, current.usage)
    };
    let physical = PhysicalTexture::create(&inner.device, label, width, height, format, usage);
    textures.replace(texture, physical)?;
    log::debug!("render target {:?} resized to {width}x{height}", label.unwrap_or("unnamed"));
    Ok(())
}

impl From<&RenderTarget> for UniformValue {
    fn from(target: &RenderTarget) -> Self {
        UniformValue::Texture(target.binding())
    }
}
