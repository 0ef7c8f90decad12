//! Ping-pong target pairs for feedback and iterative passes.

use crate::context::Context;
use crate::errors::Result;
use crate::resources::target::{RenderTarget, TargetConfig};

/// Two independent targets with a read/write role that [`swap`](Self::swap)
/// exchanges without touching GPU memory.
///
/// Resizing reallocates both targets and does not carry pixels forward.
#[derive(Debug, Clone)]
pub struct PingPong {
    targets: [RenderTarget; 2],
    read_index: usize,
}

impl PingPong {
    pub fn new(ctx: &Context, config: &TargetConfig) -> Result<Self> {
        let label = config.label.clone().unwrap_or_else(|| "ping-pong".to_owned());
        let a = RenderTarget::new(
            ctx,
            &TargetConfig {
                label: Some(format!("{label} [a]")),
                ..config.clone()
            },
        )?;
        let b = RenderTarget::new(
            ctx,
            &TargetConfig {
                label: Some(format!("{label} [b]")),
                ..config.clone()
            },
        )?;
        Ok(Self {
            targets: [a, b],
            read_index: 0,
        })
    }

    /// Target holding the previous iteration's result.
    #[inline]
    #[must_use]
    pub fn read(&self) -> &RenderTarget {
        &self.targets[self.read_index]
    }

    /// Target the current iteration writes into.
    #[inline]
    #[must_use]
    pub fn write(&self) -> &RenderTarget {
        &self.targets[1 - self.read_index]
    }

    #[inline]
    pub fn swap(&mut self) {
        self.read_index = 1 - self.read_index;
    }

    pub fn resize(&self, width: u32, height: u32) -> Result<()> {
        for target in &self.targets {
            target.resize(width, height)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.read().width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.read().height()
    }

    pub fn dispose(&self) {
        for target in &self.targets {
            target.dispose();
        }
    }
}
