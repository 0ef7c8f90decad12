//! Binding Parser
//!
//! A textual scan of WGSL source that lists the resource declarations of
//! every user group. It runs before and independently of compilation, so it
//! only has to recognise the declaration forms, not understand the program.
//!
//! Recognised forms (attributes in any order, comments anywhere):
//!
//! | Declaration                                  | Kind                 |
//! |----------------------------------------------|----------------------|
//! | `var<uniform> name: T`                       | `Uniform`            |
//! | `var<storage> name: T`, `var<storage, read>` | `StorageReadOnly`    |
//! | `var<storage, read_write> name: T`           | `StorageReadWrite`   |
//! | `var name: texture_2d<f32>` (any `texture_*`) | `SampledTexture`    |
//! | `var name: texture_storage_2d<fmt, access>`  | `StorageTexture`     |
//! | `var name: sampler` / `sampler_comparison`   | `Sampler`            |
//!
//! Group 0 belongs to the runtime and is never reported. Indices may be
//! decimal or hex literals; a declaration whose indices are not literals is
//! kept aside as [`UnresolvedDeclaration`] so shader preparation can take
//! the numbers from the compiled module. Anything else carrying
//! `@group`/`@binding` is skipped with a warning.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Resource class of a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingKind {
    Uniform,
    StorageReadOnly,
    StorageReadWrite,
    SampledTexture,
    StorageTexture,
    Sampler,
}

impl BindingKind {
    /// Name used in diagnostics.
    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            Self::Uniform => "uniform buffer",
            Self::StorageReadOnly => "read-only storage buffer",
            Self::StorageReadWrite => "storage buffer",
            Self::SampledTexture => "sampled texture",
            Self::StorageTexture => "storage texture",
            Self::Sampler => "sampler",
        }
    }

    #[inline]
    #[must_use]
    pub fn is_storage_buffer(self) -> bool {
        matches!(self, Self::StorageReadOnly | Self::StorageReadWrite)
    }

    #[inline]
    #[must_use]
    pub fn is_texture(self) -> bool {
        matches!(self, Self::SampledTexture | Self::StorageTexture)
    }
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// One `@group(g) @binding(i) var ...` declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingDeclaration {
    pub group: u32,
    pub binding: u32,
    pub kind: BindingKind,
    pub name: String,
    /// Declared type with whitespace removed, e.g. `texture_2d<f32>`.
    pub ty: String,
}

/// A recognised declaration whose `@group`/`@binding` arguments could not
/// be read textually (constant expressions and the like).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedDeclaration {
    pub kind: BindingKind,
    pub name: String,
    pub ty: String,
    pub line: usize,
}

impl UnresolvedDeclaration {
    /// Completes the declaration with indices taken from elsewhere.
    #[must_use]
    pub fn resolve(self, group: u32, binding: u32) -> BindingDeclaration {
        BindingDeclaration {
            group,
            binding,
            kind: self.kind,
            name: self.name,
            ty: self.ty,
        }
    }
}

/// Result of scanning one shader.
#[derive(Debug, Clone, Default)]
pub struct BindingScan {
    /// Declarations of groups >= 1 in source order.
    pub declarations: Vec<BindingDeclaration>,
    /// Declarations waiting for their indices.
    pub unresolved: Vec<UnresolvedDeclaration>,
    /// Whether the source declares something in group 0 itself.
    pub declares_group_zero: bool,
    /// Skipped or deferred declarations, one message each.
    pub warnings: Vec<String>,
}

/// Scans `source` and logs a warning for every skipped declaration.
#[must_use]
pub fn parse_bindings(source: &str) -> Vec<BindingDeclaration> {
    scan_bindings(source).declarations
}

/// Scans `source`, returning declarations plus the diagnostics.
#[must_use]
pub fn scan_bindings(source: &str) -> BindingScan {
    let text = strip_comments(source);
    let bytes = text.as_bytes();
    let mut scan = BindingScan::default();

    let mut search = 0;
    while let Some(offset) = find_keyword(&text, "var", search) {
        search = offset + 3;

        let attributes = attributes_before(&text, offset);
        let group = attributes.iter().find(|a| a.name == "group");
        let binding = attributes.iter().find(|a| a.name == "binding");
        let (Some(group), Some(binding)) = (group, binding) else {
            continue;
        };

        let line = line_of(bytes, offset);
        let Some(var) = parse_var(&text[search..]) else {
            scan.warn(format!("line {line}: malformed resource declaration skipped"));
            continue;
        };

        let (Some(group), Some(binding)) = (
            group.arg.as_deref().and_then(parse_index),
            binding.arg.as_deref().and_then(parse_index),
        ) else {
            match classify(&var) {
                Ok(kind) => {
                    scan.warn(format!(
                        "line {line}: @group/@binding of `{}` are not integer literals; resolving them from the compiled module",
                        var.name
                    ));
                    scan.unresolved.push(UnresolvedDeclaration {
                        kind,
                        name: var.name,
                        ty: var.ty,
                        line,
                    });
                }
                Err(reason) => scan.warn(format!("line {line}: binding `{}` skipped: {reason}", var.name)),
            }
            continue;
        };

        if group == 0 {
            scan.declares_group_zero = true;
            continue;
        }

        let kind = match classify(&var) {
            Ok(kind) => kind,
            Err(reason) => {
                scan.warn(format!(
                    "line {line}: binding `{}` (group {group}, binding {binding}) skipped: {reason}",
                    var.name
                ));
                continue;
            }
        };

        if scan
            .declarations
            .iter()
            .any(|d| d.group == group && d.binding == binding)
        {
            scan.warn(format!(
                "line {line}: binding `{}` reuses group {group}, binding {binding}; skipped",
                var.name
            ));
            continue;
        }

        scan.declarations.push(BindingDeclaration {
            group,
            binding,
            kind,
            name: var.name,
            ty: var.ty,
        });
    }

    scan
}

impl BindingScan {
    fn warn(&mut self, message: String) {
        log::warn!("{message}");
        self.warnings.push(message);
    }
}

// ─── Declaration Parsing ─────────────────────────────────────────────────────

struct VarDecl {
    address_space: Option<String>,
    access: Option<String>,
    name: String,
    ty: String,
}

/// Parses the text following a `var` keyword: `<space, access> name: type;`.
fn parse_var(rest: &str) -> Option<VarDecl> {
    let mut rest = rest.trim_start();

    let (address_space, access) = if let Some(inner) = rest.strip_prefix('<') {
        let close = inner.find('>')?;
        let mut parts = inner[..close].split(',').map(str::trim);
        let space = parts.next().filter(|s| !s.is_empty()).map(str::to_owned);
        let access = parts.next().filter(|s| !s.is_empty()).map(str::to_owned);
        rest = inner[close + 1..].trim_start();
        (space, access)
    } else {
        (None, None)
    };

    let name_len = rest.bytes().take_while(|b| is_ident_byte(*b)).count();
    if name_len == 0 {
        return None;
    }
    let name = rest[..name_len].to_owned();
    rest = rest[name_len..].trim_start().strip_prefix(':')?;

    let end = rest.find([';', '='])?;
    let ty: String = rest[..end].chars().filter(|c| !c.is_whitespace()).collect();
    if ty.is_empty() {
        return None;
    }

    Some(VarDecl {
        address_space,
        access,
        name,
        ty,
    })
}

fn classify(var: &VarDecl) -> Result<BindingKind, String> {
    match var.address_space.as_deref() {
        Some("uniform") => Ok(BindingKind::Uniform),
        Some("storage") => match var.access.as_deref() {
            None | Some("read") => Ok(BindingKind::StorageReadOnly),
            Some("read_write") => Ok(BindingKind::StorageReadWrite),
            Some(other) => Err(format!("unsupported storage access mode `{other}`")),
        },
        Some(other) => Err(format!("address space `{other}` cannot be bound")),
        None => {
            let ty = var.ty.as_str();
            if ty.starts_with("texture_storage_") {
                Ok(BindingKind::StorageTexture)
            } else if ty == "texture_external" {
                Err("external textures are not supported".to_owned())
            } else if ty.starts_with("texture_") {
                Ok(BindingKind::SampledTexture)
            } else if ty == "sampler" || ty == "sampler_comparison" {
                Ok(BindingKind::Sampler)
            } else {
                Err(format!("unrecognised resource type `{ty}`"))
            }
        }
    }
}

/// Reads a decimal or `0x` hex integer literal with an optional `u`/`i`
/// suffix.
fn parse_index(arg: &str) -> Option<u32> {
    let arg = arg.trim();
    let digits = arg
        .strip_suffix('u')
        .or_else(|| arg.strip_suffix('i'))
        .unwrap_or(arg);
    match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => digits.parse().ok(),
    }
}

// ─── Lexical Helpers ─────────────────────────────────────────────────────────

/// An `@name` or `@name(arg)` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Attribute {
    pub name: String,
    pub arg: Option<String>,
}

/// Replaces `//` and (nested) `/* */` comments with spaces, keeping newlines
/// so byte offsets and line numbers still match the original.
#[must_use]
pub(crate) fn strip_comments(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();

        if depth > 0 {
            if b == b'/' && next == Some(b'*') {
                depth += 1;
                out.extend_from_slice(b"  ");
                i += 2;
            } else if b == b'*' && next == Some(b'/') {
                depth -= 1;
                out.extend_from_slice(b"  ");
                i += 2;
            } else {
                out.push(if b == b'\n' { b'\n' } else { b' ' });
                i += 1;
            }
            continue;
        }

        if b == b'/' && next == Some(b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                out.push(b' ');
                i += 1;
            }
        } else if b == b'/' && next == Some(b'*') {
            depth = 1;
            out.extend_from_slice(b"  ");
            i += 2;
        } else {
            out.push(b);
            i += 1;
        }
    }

    // Only ASCII bytes were replaced, so the buffer is still valid UTF-8.
    String::from_utf8(out).unwrap_or_default()
}

/// Finds the next whole-word occurrence of `keyword` at or after `from`.
pub(crate) fn find_keyword(text: &str, keyword: &str, from: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut from = from;
    while let Some(pos) = text.get(from..)?.find(keyword) {
        let start = from + pos;
        let end = start + keyword.len();
        let clean_start = start == 0 || !is_ident_byte(bytes[start - 1]);
        let clean_end = end >= bytes.len() || !is_ident_byte(bytes[end]);
        if clean_start && clean_end {
            return Some(start);
        }
        from = end;
    }
    None
}

/// Collects the attributes written directly before byte offset `pos`,
/// nearest first.
pub(crate) fn attributes_before(text: &str, pos: usize) -> Vec<Attribute> {
    let bytes = text.as_bytes();
    let mut attributes = Vec::new();
    let mut i = pos;

    loop {
        i = skip_whitespace_back(bytes, i);
        if i == 0 {
            break;
        }

        let mut arg = None;
        let mut j = i;
        if bytes[j - 1] == b')' {
            let mut depth = 0usize;
            let mut k = j;
            let open = loop {
                if k == 0 {
                    return attributes;
                }
                k -= 1;
                match bytes[k] {
                    b')' => depth += 1,
                    b'(' => {
                        depth -= 1;
                        if depth == 0 {
                            break k;
                        }
                    }
                    _ => {}
                }
            };
            arg = Some(text[open + 1..j - 1].trim().to_owned());
            j = skip_whitespace_back(bytes, open);
        }

        let ident_end = j;
        while j > 0 && is_ident_byte(bytes[j - 1]) {
            j -= 1;
        }
        if j == ident_end || j == 0 || bytes[j - 1] != b'@' {
            break;
        }

        attributes.push(Attribute {
            name: text[j..ident_end].to_owned(),
            arg,
        });
        i = j - 1;
    }

    attributes
}

fn skip_whitespace_back(bytes: &[u8], mut i: usize) -> usize {
    while i > 0 && bytes[i - 1].is_ascii_whitespace() {
        i -= 1;
    }
    i
}

fn line_of(bytes: &[u8], offset: usize) -> usize {
    bytes[..offset].iter().filter(|b| **b == b'\n').count() + 1
}

#[inline]
pub(crate) fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
