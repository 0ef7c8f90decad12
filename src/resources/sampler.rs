//! Sampler configuration and the per-context sampler cache.
//!
//! `wgpu::SamplerDescriptor` is neither `Hash` nor `Eq`, so samplers are
//! deduplicated through [`SamplerKey`], a hashable mirror of the resolved
//! descriptor.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::resources::ids::{ResourceId, generate_resource_id};

/// Texel filter of a render target's own sampler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    #[default]
    Linear,
    Nearest,
}

/// Address mode of a render target's own sampler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wrap {
    #[default]
    Clamp,
    Repeat,
    Mirror,
}

impl From<Filter> for wgpu::FilterMode {
    fn from(filter: Filter) -> Self {
        match filter {
            Filter::Linear => wgpu::FilterMode::Linear,
            Filter::Nearest => wgpu::FilterMode::Nearest,
        }
    }
}

impl From<Wrap> for wgpu::AddressMode {
    fn from(wrap: Wrap) -> Self {
        match wrap {
            Wrap::Clamp => wgpu::AddressMode::ClampToEdge,
            Wrap::Repeat => wgpu::AddressMode::Repeat,
            Wrap::Mirror => wgpu::AddressMode::MirrorRepeat,
        }
    }
}

/// Sampler description; every field is optional and falls back to a
/// linear, clamp-to-edge default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub mag_filter: Option<wgpu::FilterMode>,
    pub min_filter: Option<wgpu::FilterMode>,
    pub mipmap_filter: Option<wgpu::MipmapFilterMode>,
    pub address_mode_u: Option<wgpu::AddressMode>,
    pub address_mode_v: Option<wgpu::AddressMode>,
    pub address_mode_w: Option<wgpu::AddressMode>,
    pub lod_min_clamp: Option<f32>,
    pub lod_max_clamp: Option<f32>,
    pub compare: Option<wgpu::CompareFunction>,
    pub max_anisotropy: Option<u16>,
}

impl SamplerConfig {
    #[must_use]
    pub fn linear() -> Self {
        Self::from_filter_wrap(Filter::Linear, Wrap::Clamp)
    }

    #[must_use]
    pub fn nearest() -> Self {
        Self::from_filter_wrap(Filter::Nearest, Wrap::Clamp)
    }

    /// The sampler a render target creates for its `filter`/`wrap` pair.
    #[must_use]
    pub fn from_filter_wrap(filter: Filter, wrap: Wrap) -> Self {
        let mode = filter.into();
        let address = wrap.into();
        Self {
            mag_filter: Some(mode),
            min_filter: Some(mode),
            address_mode_u: Some(address),
            address_mode_v: Some(address),
            address_mode_w: Some(address),
            ..Default::default()
        }
    }

    /// Fills in defaults and sanitises anisotropy.
    #[must_use]
    pub fn key(&self) -> SamplerKey {
        let mag_filter = self.mag_filter.unwrap_or(wgpu::FilterMode::Linear);
        let min_filter = self.min_filter.unwrap_or(wgpu::FilterMode::Linear);
        let mipmap_filter = self.mipmap_filter.unwrap_or(wgpu::MipmapFilterMode::Nearest);

        let all_linear = mag_filter == wgpu::FilterMode::Linear
            && min_filter == wgpu::FilterMode::Linear
            && mipmap_filter == wgpu::MipmapFilterMode::Linear;
        let requested = self.max_anisotropy.unwrap_or(1).clamp(1, 16);
        let anisotropy_clamp = if requested > 1 && !all_linear {
            log::warn!("max_anisotropy {requested} needs linear filtering on every axis; using 1");
            1
        } else {
            requested
        };

        SamplerKey {
            mag_filter,
            min_filter,
            mipmap_filter,
            address_mode_u: self.address_mode_u.unwrap_or(wgpu::AddressMode::ClampToEdge),
            address_mode_v: self.address_mode_v.unwrap_or(wgpu::AddressMode::ClampToEdge),
            address_mode_w: self.address_mode_w.unwrap_or(wgpu::AddressMode::ClampToEdge),
            lod_min_bits: self.lod_min_clamp.unwrap_or(0.0).to_bits(),
            lod_max_bits: self.lod_max_clamp.unwrap_or(32.0).to_bits(),
            compare: self.compare,
            anisotropy_clamp,
        }
    }
}

/// Hashable mirror of a fully resolved `wgpu::SamplerDescriptor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerKey {
    pub mag_filter: wgpu::FilterMode,
    pub min_filter: wgpu::FilterMode,
    pub mipmap_filter: wgpu::MipmapFilterMode,
    pub address_mode_u: wgpu::AddressMode,
    pub address_mode_v: wgpu::AddressMode,
    pub address_mode_w: wgpu::AddressMode,
    pub lod_min_bits: u32,
    pub lod_max_bits: u32,
    pub compare: Option<wgpu::CompareFunction>,
    pub anisotropy_clamp: u16,
}

impl SamplerKey {
    /// Whether any stage of the sampler interpolates.
    #[must_use]
    pub fn is_filtering(&self) -> bool {
        self.mag_filter == wgpu::FilterMode::Linear
            || self.min_filter == wgpu::FilterMode::Linear
            || self.mipmap_filter == wgpu::MipmapFilterMode::Linear
    }

    fn descriptor(&self) -> wgpu::SamplerDescriptor<'static> {
        wgpu::SamplerDescriptor {
            label: Some("Cached Sampler"),
            address_mode_u: self.address_mode_u,
            address_mode_v: self.address_mode_v,
            address_mode_w: self.address_mode_w,
            mag_filter: self.mag_filter,
            min_filter: self.min_filter,
            mipmap_filter: self.mipmap_filter,
            lod_min_clamp: f32::from_bits(self.lod_min_bits),
            lod_max_clamp: f32::from_bits(self.lod_max_bits),
            compare: self.compare,
            anisotropy_clamp: self.anisotropy_clamp,
            border_color: None,
        }
    }
}

// ─── Cache ───────────────────────────────────────────────────────────────────

/// Handle to a sampler owned by a context's cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerRef(pub(crate) u32);

pub(crate) struct SamplerEntry {
    pub sampler: wgpu::Sampler,
    pub resource_id: ResourceId,
    pub filtering: bool,
    pub comparison: bool,
}

pub(crate) struct SamplerCache {
    entries: Vec<SamplerEntry>,
    lookup: FxHashMap<SamplerKey, SamplerRef>,
    default_linear: SamplerRef,
    default_nearest: SamplerRef,
    default_comparison: SamplerRef,
}

impl SamplerCache {
    pub fn new(device: &wgpu::Device) -> Self {
        let mut cache = Self {
            entries: Vec::new(),
            lookup: FxHashMap::default(),
            default_linear: SamplerRef(0),
            default_nearest: SamplerRef(0),
            default_comparison: SamplerRef(0),
        };
        cache.default_linear = cache.get_or_create(device, &SamplerConfig::linear());
        cache.default_nearest = cache.get_or_create(device, &SamplerConfig::nearest());
        cache.default_comparison = cache.get_or_create(
            device,
            &SamplerConfig {
                compare: Some(wgpu::CompareFunction::LessEqual),
                ..SamplerConfig::linear()
            },
        );
        cache
    }

    pub fn get_or_create(&mut self, device: &wgpu::Device, config: &SamplerConfig) -> SamplerRef {
        let key = config.key();
        if let Some(&handle) = self.lookup.get(&key) {
            return handle;
        }

        let sampler = device.create_sampler(&key.descriptor());
        let handle = SamplerRef(self.entries.len() as u32);
        self.entries.push(SamplerEntry {
            sampler,
            resource_id: generate_resource_id(),
            filtering: key.is_filtering(),
            comparison: key.compare.is_some(),
        });
        self.lookup.insert(key, handle);
        log::debug!("sampler cache miss, {} samplers cached", self.entries.len());
        handle
    }

    pub fn get(&self, handle: SamplerRef) -> Option<&SamplerEntry> {
        self.entries.get(handle.0 as usize)
    }

    pub fn default_linear(&self) -> SamplerRef {
        self.default_linear
    }

    pub fn default_nearest(&self) -> SamplerRef {
        self.default_nearest
    }

    pub fn default_comparison(&self) -> SamplerRef {
        self.default_comparison
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
