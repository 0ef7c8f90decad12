//! Shared Context
//!
//! A [`Context`] owns the device, queue and optional presentation surface,
//! together with every cache and arena the units and resources share:
//!
//! - texture and storage-buffer arenas (resize-stable handles)
//! - sampler, bind group layout, shader module and pipeline caches
//! - the [`GlobalsController`] and the frame state
//!
//! Cloning a context is cheap; all clones refer to the same GPU state.
//!
//! # Frame protocol
//!
//! ```rust,ignore
//! ctx.begin_frame()?;          // advances globals, acquires the surface texture
//! unit.draw(&ctx.screen())?;
//! ctx.end_frame()?;            // presents
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::binding::layout::LayoutCache;
use crate::errors::{Result, ShadeError};
use crate::globals::{GlobalsController, GlobalsState};
use crate::pipeline::cache::PipelineCache;
use crate::pipeline::shader::ShaderManager;
use crate::resources::ids::ResourceId;
use crate::resources::sampler::{SamplerCache, SamplerConfig, SamplerRef};
use crate::resources::storage::BufferArena;
use crate::resources::target::{RenderTarget, resize_texture};
use crate::resources::texture::{TextureArena, TextureRef};
use crate::settings::ContextSettings;
use crate::telemetry::{self, EventField, EventKind, EventPhase, TelemetryEvent};

/// Format of the presentation stand-in for headless contexts.
const HEADLESS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

pub(crate) struct SurfaceState {
    pub surface: wgpu::Surface<'static>,
    pub config: Mutex<wgpu::SurfaceConfiguration>,
}

pub(crate) struct FrameState {
    pub in_progress: bool,
    pub surface_texture: Option<wgpu::SurfaceTexture>,
    pub view: Option<wgpu::TextureView>,
    pub format: wgpu::TextureFormat,
}

#[derive(Debug, Clone, Copy)]
struct Viewport {
    css: (f32, f32),
    host_ratio: f32,
    physical: (u32, u32),
}

/// Shared state behind every [`Context`] clone.
pub(crate) struct ContextInner {
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub settings: ContextSettings,
    pub surface: Option<SurfaceState>,

    pub textures: RwLock<TextureArena>,
    pub buffers: RwLock<BufferArena>,
    pub samplers: Mutex<SamplerCache>,
    pub layouts: Mutex<LayoutCache>,
    pub shaders: Mutex<ShaderManager>,
    pub pipelines: Mutex<PipelineCache>,
    pub globals: Mutex<GlobalsController>,

    /// Placeholder bound at group indices a shader leaves unused.
    pub empty_layout: wgpu::BindGroupLayout,
    pub empty_layout_id: ResourceId,
    pub empty_bind_group: wgpu::BindGroup,

    pub frame: Mutex<FrameState>,
    viewport: Mutex<Viewport>,
    /// Targets that follow the context size.
    pub surface_sized: Mutex<Vec<TextureRef>>,
    disposed: AtomicBool,
}

impl ContextInner {
    #[inline]
    pub fn ensure_alive(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(ShadeError::Disposed("context"))
        } else {
            Ok(())
        }
    }

    /// Capabilities of `format` on this device.
    pub fn format_features(&self, format: wgpu::TextureFormat) -> wgpu::TextureFormatFeatures {
        let features = self.device.features();
        if features.contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES) {
            self.adapter.get_texture_format_features(format)
        } else {
            format.guaranteed_format_features(features)
        }
    }

    /// Layout and bind group occupying group 0 for a unit.
    pub fn group_zero(&self, binds_globals: bool) -> (wgpu::BindGroupLayout, ResourceId, wgpu::BindGroup) {
        if binds_globals {
            let globals = self.globals.lock();
            (globals.layout().clone(), globals.layout_id(), globals.bind_group().clone())
        } else {
            (
                self.empty_layout.clone(),
                self.empty_layout_id,
                self.empty_bind_group.clone(),
            )
        }
    }
}

/// Handle to the shared GPU runtime.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("size", &self.size())
            .field("presenting", &self.inner.surface.is_some())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl Context {
    // ─── Construction ────────────────────────────────────────────────────────

    /// Creates a context without a presentation surface. `width`×`height` is
    /// the logical size reported to globals and surface-sized targets.
    pub async fn headless(width: u32, height: u32, settings: ContextSettings) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: settings.power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| ShadeError::AdapterRequestFailed(e.to_string()))?;

        let (device, queue) = request_device(&adapter).await?;
        Ok(Self::assemble(
            adapter,
            device,
            queue,
            None,
            HEADLESS_FORMAT,
            (width as f32, height as f32),
            settings,
        ))
    }

    /// Blocking variant of [`headless`](Self::headless) for native hosts.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn headless_blocking(width: u32, height: u32, settings: ContextSettings) -> Result<Self> {
        pollster::block_on(Self::headless(width, height, settings))
    }

    /// Creates a context presenting to `window`. The size is in logical
    /// (CSS) pixels and is scaled by the configured pixel ratio.
    pub async fn with_window<W>(window: W, css_width: u32, css_height: u32, settings: ContextSettings) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        let instance = wgpu::Instance::default();
        let surface = instance.create_surface(window)?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: settings.power_preference,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| ShadeError::AdapterRequestFailed(e.to_string()))?;

        let (device, queue) = request_device(&adapter).await?;

        let (width, height) = settings
            .device_pixel_ratio
            .physical_size(1.0, css_width as f32, css_height as f32);
        let mut config = surface
            .get_default_config(&adapter, width, height)
            .ok_or_else(|| ShadeError::PlatformUnsupported("surface not supported by adapter".to_owned()))?;
        config.present_mode = if settings.vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };
        surface.configure(&device, &config);
        let format = config.format;

        let surface = SurfaceState {
            surface,
            config: Mutex::new(config),
        };
        Ok(Self::assemble(
            adapter,
            device,
            queue,
            Some(surface),
            format,
            (css_width as f32, css_height as f32),
            settings,
        ))
    }

    fn assemble(
        adapter: wgpu::Adapter,
        device: wgpu::Device,
        queue: wgpu::Queue,
        surface: Option<SurfaceState>,
        format: wgpu::TextureFormat,
        css: (f32, f32),
        settings: ContextSettings,
    ) -> Self {
        telemetry::bus().lock().reserve(settings.event_capacity);

        let mut layouts = LayoutCache::default();
        let (empty_layout, empty_layout_id) = layouts.get_or_create(&device, &[]);
        let empty_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Empty BindGroup"),
            layout: &empty_layout,
            entries: &[],
        });

        let (globals_layout, globals_layout_id) =
            layouts.get_or_create(&device, &GlobalsController::layout_entries());
        let mut globals = GlobalsController::new(&device, globals_layout, globals_layout_id);

        let physical = settings.device_pixel_ratio.physical_size(1.0, css.0, css.1);
        globals.set_resolution(physical.0, physical.1);
        globals.sync(&queue);

        log::info!(
            "context ready: {} ({:?}), {}x{} {:?}",
            adapter.get_info().name,
            adapter.get_info().backend,
            physical.0,
            physical.1,
            format
        );

        let inner = ContextInner {
            samplers: Mutex::new(SamplerCache::new(&device)),
            shaders: Mutex::new(ShaderManager::new(settings.debug)),
            adapter,
            device,
            queue,
            surface,
            textures: RwLock::new(TextureArena::default()),
            buffers: RwLock::new(BufferArena::default()),
            layouts: Mutex::new(layouts),
            pipelines: Mutex::new(PipelineCache::new()),
            globals: Mutex::new(globals),
            empty_layout,
            empty_layout_id,
            empty_bind_group,
            frame: Mutex::new(FrameState {
                in_progress: false,
                surface_texture: None,
                view: None,
                format,
            }),
            viewport: Mutex::new(Viewport {
                css,
                host_ratio: 1.0,
                physical,
            }),
            surface_sized: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
            settings,
        };

        Self { inner: Arc::new(inner) }
    }

    #[inline]
    pub(crate) fn inner(&self) -> &ContextInner {
        &self.inner
    }

    // ─── Frame Control ───────────────────────────────────────────────────────

    /// Starts a frame: advances globals by wall-clock time and, when
    /// presenting, acquires the next surface texture.
    pub fn begin_frame(&self) -> Result<()> {
        self.start_frame(None)
    }

    /// Like [`begin_frame`](Self::begin_frame) with a host-supplied delta in
    /// seconds (for hosts that own the refresh timing).
    pub fn begin_frame_with_delta(&self, delta_seconds: f32) -> Result<()> {
        self.start_frame(Some(delta_seconds))
    }

    fn start_frame(&self, delta: Option<f32>) -> Result<()> {
        let inner = self.inner();
        inner.ensure_alive()?;

        let mut frame = inner.frame.lock();
        if frame.in_progress {
            return Err(ShadeError::FrameInProgress);
        }

        if let Some(surface) = &inner.surface {
            let texture = acquire_surface_texture(&inner.device, surface)?;
            frame.view = Some(texture.texture.create_view(&wgpu::TextureViewDescriptor::default()));
            frame.surface_texture = Some(texture);
        }
        frame.in_progress = true;
        drop(frame);

        let mut globals = inner.globals.lock();
        match delta {
            Some(dt) => globals.advance_by(&inner.queue, dt),
            None => globals.advance(&inner.queue),
        }
        Ok(())
    }

    /// Ends the frame and presents the surface texture, if any.
    pub fn end_frame(&self) -> Result<()> {
        let inner = self.inner();
        let mut frame = inner.frame.lock();
        if !frame.in_progress {
            return Err(ShadeError::NoFrameInProgress);
        }
        frame.in_progress = false;
        frame.view = None;
        if let Some(texture) = frame.surface_texture.take() {
            texture.present();
        }
        Ok(())
    }

    #[must_use]
    pub fn frame_in_progress(&self) -> bool {
        self.inner().frame.lock().in_progress
    }

    // ─── Sizing ──────────────────────────────────────────────────────────────

    /// Applies a new logical (CSS) size: reconfigures the surface, updates
    /// the globals resolution and, with `auto_resize`, resizes every
    /// surface-sized target.
    pub fn resize(&self, css_width: f32, css_height: f32) -> Result<()> {
        let inner = self.inner();
        inner.ensure_alive()?;
        if inner.frame.lock().surface_texture.is_some() {
            return Err(ShadeError::FrameInProgress);
        }

        let (width, height) = {
            let mut viewport = inner.viewport.lock();
            viewport.css = (css_width, css_height);
            viewport.physical =
                inner
                    .settings
                    .device_pixel_ratio
                    .physical_size(viewport.host_ratio, css_width, css_height);
            viewport.physical
        };
        self.apply_physical_size(width, height)
    }

    /// Records the host's device pixel ratio and re-applies the current size.
    pub fn set_host_pixel_ratio(&self, ratio: f32) -> Result<()> {
        let css = {
            let mut viewport = self.inner().viewport.lock();
            viewport.host_ratio = ratio;
            viewport.css
        };
        self.resize(css.0, css.1)
    }

    fn apply_physical_size(&self, width: u32, height: u32) -> Result<()> {
        let inner = self.inner();

        if let Some(surface) = &inner.surface {
            let mut config = surface.config.lock();
            if config.width != width || config.height != height {
                config.width = width;
                config.height = height;
                surface.surface.configure(&inner.device, &config);
            }
        }

        {
            let mut globals = inner.globals.lock();
            globals.set_resolution(width, height);
            globals.sync(&inner.queue);
        }

        if inner.settings.auto_resize {
            let targets = inner.surface_sized.lock().clone();
            for texture in targets {
                resize_texture(inner, texture, width, height, Some("surface-sized target"))?;
            }
        }

        log::debug!("context resized to {width}x{height}");
        telemetry::emit(
            TelemetryEvent::new(EventKind::Resize, EventPhase::Instant).with_field(EventField::Size(width, height)),
        );
        Ok(())
    }

    /// Effective device pixel ratio.
    #[must_use]
    pub fn pixel_ratio(&self) -> f32 {
        let host = self.inner().viewport.lock().host_ratio;
        self.inner().settings.device_pixel_ratio.resolve(host)
    }

    /// Physical size in pixels.
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        self.inner().viewport.lock().physical
    }

    // ─── Accessors ───────────────────────────────────────────────────────────

    /// The presentation target. On a headless context drawing to it fails.
    #[must_use]
    pub fn screen(&self) -> RenderTarget {
        let sampler = self.inner().samplers.lock().default_linear();
        RenderTarget::presentation(self, sampler)
    }

    /// Whether a window surface is attached.
    #[must_use]
    pub fn is_presenting(&self) -> bool {
        self.inner().surface.is_some()
    }

    /// Format of the presentation surface, if any.
    #[must_use]
    pub fn surface_format(&self) -> Option<wgpu::TextureFormat> {
        self.inner().surface.as_ref().map(|s| s.config.lock().format)
    }

    #[must_use]
    pub fn settings(&self) -> &ContextSettings {
        &self.inner().settings
    }

    /// Snapshot of the frame clock.
    #[must_use]
    pub fn globals(&self) -> GlobalsState {
        self.inner().globals.lock().state()
    }

    pub fn set_time_scale(&self, scale: f32) {
        self.inner().globals.lock().set_time_scale(scale);
    }

    pub fn set_paused(&self, paused: bool) {
        self.inner().globals.lock().set_paused(paused);
    }

    /// Returns a cached sampler for `config`.
    pub fn create_sampler(&self, config: &SamplerConfig) -> Result<SamplerRef> {
        let inner = self.inner();
        inner.ensure_alive()?;
        Ok(inner.samplers.lock().get_or_create(&inner.device, config))
    }

    /// Pipelines compiled so far (cache misses).
    #[must_use]
    pub fn pipeline_compile_count(&self) -> u64 {
        self.inner().pipelines.lock().compile_count()
    }

    #[must_use]
    pub fn cached_pipeline_count(&self) -> usize {
        self.inner().pipelines.lock().len()
    }

    #[must_use]
    pub fn shader_module_count(&self) -> usize {
        self.inner().shaders.lock().module_count()
    }

    #[must_use]
    pub fn bind_group_layout_count(&self) -> usize {
        self.inner().layouts.lock().len()
    }

    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.inner().device
    }

    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.inner().queue
    }

    /// Releases every cached pipeline, layout, module and resource. Later
    /// operations on this context or anything created from it fail with
    /// `Disposed`.
    pub fn dispose(&self) {
        let inner = self.inner();
        if inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut frame = inner.frame.lock();
            frame.in_progress = false;
            frame.view = None;
            frame.surface_texture = None;
        }
        inner.pipelines.lock().clear();
        inner.shaders.lock().clear();
        inner.layouts.lock().clear();
        inner.textures.write().clear();
        inner.buffers.write().clear();
        inner.surface_sized.lock().clear();
        log::debug!("context disposed");
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner().disposed.load(Ordering::Acquire)
    }
}

async fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue)> {
    let optional = wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES | wgpu::Features::FLOAT32_FILTERABLE;
    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("myth-shade device"),
            required_features: adapter.features() & optional,
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        })
        .await?;
    Ok((device, queue))
}

/// Acquires the next surface texture, reconfiguring once on a lost or
/// outdated surface.
fn acquire_surface_texture(device: &wgpu::Device, surface: &SurfaceState) -> Result<wgpu::SurfaceTexture> {
    match surface.surface.get_current_texture() {
        wgpu::CurrentSurfaceTexture::Success(texture) | wgpu::CurrentSurfaceTexture::Suboptimal(texture) => {
            Ok(texture)
        }
        wgpu::CurrentSurfaceTexture::Lost | wgpu::CurrentSurfaceTexture::Outdated => {
            log::debug!("surface lost or outdated; reconfiguring");
            surface.surface.configure(device, &surface.config.lock());
            match surface.surface.get_current_texture() {
                wgpu::CurrentSurfaceTexture::Success(texture)
                | wgpu::CurrentSurfaceTexture::Suboptimal(texture) => Ok(texture),
                e => Err(ShadeError::Surface(format!("{e:?}"))),
            }
        }
        e => Err(ShadeError::Surface(format!("{e:?}"))),
    }
}
