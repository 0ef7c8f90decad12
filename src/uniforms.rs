//! Uniform Value Model
//!
//! Application code hands the runtime a map of named [`Uniform`] cells. Each
//! cell wraps one [`UniformValue`] and is shared between the application and
//! every unit that binds it: the application mutates the cell between frames
//! and units re-read it on each draw. Nothing is ever pushed to a unit.
//!
//! ```rust,ignore
//! let mut uniforms = Uniforms::new();
//! let tint = uniforms.insert("tint", [1.0, 0.2, 0.2, 1.0]);
//! uniforms.insert("source", &render_target);
//!
//! // later, between frames
//! tint.set([0.2, 1.0, 0.2, 1.0]);
//! ```

use std::borrow::Cow;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use rustc_hash::FxHashMap;

use crate::resources::{SamplerRef, StorageRef, TextureRef};

// ─── Payloads ────────────────────────────────────────────────────────────────

/// Homogeneous array payload uploaded verbatim into a uniform buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedArray {
    F32(Vec<f32>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    U8(Vec<u8>),
}

impl TypedArray {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::F32(v) => bytemuck::cast_slice(v),
            Self::I32(v) => bytemuck::cast_slice(v),
            Self::U32(v) => bytemuck::cast_slice(v),
            Self::U8(v) => v,
        }
    }

    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.as_bytes().len()
    }
}

/// A texture plus the sampler that should accompany it.
///
/// Render targets convert into this with their own sampler attached, which
/// lets a single uniform entry satisfy both a texture declaration and the
/// matching `<name>Sampler` declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureBinding {
    pub texture: TextureRef,
    pub sampler: Option<SamplerRef>,
}

/// Tagged payload held by a [`Uniform`] cell.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Scalar(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    /// Column-major 4x4 matrix.
    Matrix([f32; 16]),
    Array(TypedArray),
    Texture(TextureBinding),
    Sampler(SamplerRef),
    Storage(StorageRef),
}

impl UniformValue {
    /// Short human-readable name used in validation messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Vec2(_) | Self::Vec3(_) | Self::Vec4(_) => "vector",
            Self::Matrix(_) => "matrix",
            Self::Array(_) => "typed array",
            Self::Texture(_) => "texture",
            Self::Sampler(_) => "sampler",
            Self::Storage(_) => "storage buffer",
        }
    }

    /// Whether the payload is plain data destined for a uniform buffer.
    #[must_use]
    pub fn is_buffer_data(&self) -> bool {
        matches!(
            self,
            Self::Scalar(_)
                | Self::Vec2(_)
                | Self::Vec3(_)
                | Self::Vec4(_)
                | Self::Matrix(_)
                | Self::Array(_)
        )
    }

    /// Byte image for uniform-buffer payloads, `None` for resources.
    #[must_use]
    pub fn uniform_bytes(&self) -> Option<Cow<'_, [u8]>> {
        match self {
            Self::Scalar(v) => Some(Cow::Owned(v.to_ne_bytes().to_vec())),
            Self::Vec2(v) => Some(Cow::Borrowed(bytemuck::cast_slice(v))),
            Self::Vec3(v) => Some(Cow::Borrowed(bytemuck::cast_slice(v))),
            Self::Vec4(v) => Some(Cow::Borrowed(bytemuck::cast_slice(v))),
            Self::Matrix(m) => Some(Cow::Borrowed(bytemuck::cast_slice(m))),
            Self::Array(a) => Some(Cow::Borrowed(a.as_bytes())),
            Self::Texture(_) | Self::Sampler(_) | Self::Storage(_) => None,
        }
    }

    #[must_use]
    pub fn as_texture(&self) -> Option<TextureBinding> {
        match self {
            Self::Texture(t) => Some(*t),
            _ => None,
        }
    }

    /// Sampler carried by this value: either a bare sampler or the sampler
    /// attached to a texture binding.
    #[must_use]
    pub fn as_sampler(&self) -> Option<SamplerRef> {
        match self {
            Self::Sampler(s) => Some(*s),
            Self::Texture(t) => t.sampler,
            _ => None,
        }
    }

    #[must_use]
    pub fn as_storage(&self) -> Option<StorageRef> {
        match self {
            Self::Storage(s) => Some(*s),
            _ => None,
        }
    }
}

// ─── Conversions ─────────────────────────────────────────────────────────────

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        Self::Scalar(v)
    }
}

impl From<[f32; 2]> for UniformValue {
    fn from(v: [f32; 2]) -> Self {
        Self::Vec2(v)
    }
}

impl From<[f32; 3]> for UniformValue {
    fn from(v: [f32; 3]) -> Self {
        Self::Vec3(v)
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(v: [f32; 4]) -> Self {
        Self::Vec4(v)
    }
}

impl From<[f32; 16]> for UniformValue {
    fn from(v: [f32; 16]) -> Self {
        Self::Matrix(v)
    }
}

impl From<glam::Vec2> for UniformValue {
    fn from(v: glam::Vec2) -> Self {
        Self::Vec2(v.to_array())
    }
}

impl From<glam::Vec3> for UniformValue {
    fn from(v: glam::Vec3) -> Self {
        Self::Vec3(v.to_array())
    }
}

impl From<glam::Vec4> for UniformValue {
    fn from(v: glam::Vec4) -> Self {
        Self::Vec4(v.to_array())
    }
}

impl From<glam::Mat4> for UniformValue {
    fn from(m: glam::Mat4) -> Self {
        Self::Matrix(m.to_cols_array())
    }
}

impl From<Vec<f32>> for UniformValue {
    fn from(v: Vec<f32>) -> Self {
        Self::Array(TypedArray::F32(v))
    }
}

impl From<&[f32]> for UniformValue {
    fn from(v: &[f32]) -> Self {
        Self::Array(TypedArray::F32(v.to_vec()))
    }
}

impl From<Vec<i32>> for UniformValue {
    fn from(v: Vec<i32>) -> Self {
        Self::Array(TypedArray::I32(v))
    }
}

impl From<Vec<u32>> for UniformValue {
    fn from(v: Vec<u32>) -> Self {
        Self::Array(TypedArray::U32(v))
    }
}

impl From<Vec<u8>> for UniformValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Array(TypedArray::U8(v))
    }
}

impl From<TypedArray> for UniformValue {
    fn from(v: TypedArray) -> Self {
        Self::Array(v)
    }
}

impl From<TextureRef> for UniformValue {
    fn from(texture: TextureRef) -> Self {
        Self::Texture(TextureBinding {
            texture,
            sampler: None,
        })
    }
}

impl From<TextureBinding> for UniformValue {
    fn from(binding: TextureBinding) -> Self {
        Self::Texture(binding)
    }
}

impl From<SamplerRef> for UniformValue {
    fn from(sampler: SamplerRef) -> Self {
        Self::Sampler(sampler)
    }
}

impl From<StorageRef> for UniformValue {
    fn from(buffer: StorageRef) -> Self {
        Self::Storage(buffer)
    }
}

// ─── Cell ────────────────────────────────────────────────────────────────────

/// Shared mutable cell around a [`UniformValue`].
///
/// Cloning a `Uniform` clones the handle, not the value: both clones observe
/// the same payload. Identity is the cell, independent of what it holds.
#[derive(Debug, Clone)]
pub struct Uniform {
    cell: Arc<RwLock<UniformValue>>,
}

impl Uniform {
    pub fn new(value: impl Into<UniformValue>) -> Self {
        Self {
            cell: Arc::new(RwLock::new(value.into())),
        }
    }

    /// Replaces the payload. Units pick it up on their next draw.
    pub fn set(&self, value: impl Into<UniformValue>) {
        *self.cell.write() = value.into();
    }

    /// Snapshot of the current payload.
    #[must_use]
    pub fn value(&self) -> UniformValue {
        self.cell.read().clone()
    }

    /// Borrows the payload without cloning it.
    pub fn read(&self) -> RwLockReadGuard<'_, UniformValue> {
        self.cell.read()
    }

    /// Mutates the payload in place.
    pub fn update<R>(&self, f: impl FnOnce(&mut UniformValue) -> R) -> R {
        f(&mut self.cell.write())
    }

    /// Whether two handles refer to the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Uniform) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

// ─── Map ─────────────────────────────────────────────────────────────────────

/// Named uniform cells consumed by a draw or compute unit.
#[derive(Debug, Clone, Default)]
pub struct Uniforms {
    entries: FxHashMap<String, Uniform>,
}

impl Uniforms {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps `value` in a fresh cell, stores it under `name` and returns the
    /// cell so the caller can animate it.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<UniformValue>) -> Uniform {
        let uniform = Uniform::new(value);
        self.entries.insert(name.into(), uniform.clone());
        uniform
    }

    /// Stores an existing cell, sharing it with whoever else holds it.
    pub fn insert_cell(&mut self, name: impl Into<String>, uniform: Uniform) {
        self.entries.insert(name.into(), uniform);
    }

    /// Builder-style variant of [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<UniformValue>) -> Self {
        self.insert(name, value);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Uniform> {
        self.entries.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Uniform> {
        self.entries.remove(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Uniform)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_clones_share_payload() {
        let a = Uniform::new(1.0);
        let b = a.clone();
        b.set(2.5);
        assert_eq!(a.value(), UniformValue::Scalar(2.5));
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&Uniform::new(2.5)));
    }

    #[test]
    fn uniform_bytes_match_wgsl_sizes() {
        assert_eq!(UniformValue::from(1.0).uniform_bytes().unwrap().len(), 4);
        assert_eq!(UniformValue::from([0.0; 3]).uniform_bytes().unwrap().len(), 12);
        assert_eq!(UniformValue::from(glam::Mat4::IDENTITY).uniform_bytes().unwrap().len(), 64);
        assert_eq!(UniformValue::from(vec![1u32, 2, 3]).uniform_bytes().unwrap().len(), 12);
    }

    #[test]
    fn matrix_conversion_is_column_major() {
        let m = glam::Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
        let UniformValue::Matrix(cols) = UniformValue::from(m) else {
            panic!("expected matrix");
        };
        assert_eq!(&cols[12..15], &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn map_insert_returns_live_cell() {
        let mut uniforms = Uniforms::new();
        let speed = uniforms.insert("speed", 1.0);
        speed.set(4.0);
        assert_eq!(uniforms.get("speed").unwrap().value(), UniformValue::Scalar(4.0));
        assert_eq!(uniforms.len(), 1);
    }
}
