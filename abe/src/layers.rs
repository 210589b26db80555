//! The editor's ordered stack of PFM layers.
//!
//! Layer 0 is the editable top layer. Each layer's open arguments, display
//! flag and per-layer cache live in one [`Layer`], so reordering the stack can
//! never leave them out of step.

use pfm_io::shared::MAX_ABE_PFMS;
use pfm_io::{AbeShareSegment, OpenArgs, ShareError, ShareState};

use crate::error::{AbeError, Result};

/// One layer of the stack.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer<C> {
    /// Where the layer lives and its grid.
    pub args: OpenArgs,
    /// Whether the layer is drawn.
    pub display: bool,
    /// Caller data kept with the layer.
    pub cache: C,
}

/// Ordered layers, top first.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerStack<C = ()> {
    layers: Vec<Layer<C>>,
}

impl<C> Default for LayerStack<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> LayerStack<C> {
    /// An empty stack.
    pub const fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Number of layers.
    #[inline]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the stack is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layer at `index`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Layer<C>> {
        self.layers.get(index)
    }

    /// Mutable layer at `index`.
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Layer<C>> {
        self.layers.get_mut(index)
    }

    /// The editable top layer.
    #[inline]
    pub fn top(&self) -> Option<&Layer<C>> {
        self.layers.first()
    }

    /// Iterate top to bottom.
    pub fn iter(&self) -> impl Iterator<Item = &Layer<C>> {
        self.layers.iter()
    }

    fn check(&self, index: usize) -> Result<()> {
        if index < self.layers.len() {
            Ok(())
        } else {
            Err(AbeError::NoSuchLayer {
                index,
                len: self.layers.len(),
            })
        }
    }

    /// Add a layer at the bottom. Returns its index.
    pub fn push(&mut self, args: OpenArgs, display: bool, cache: C) -> Result<usize> {
        if self.layers.len() >= MAX_ABE_PFMS {
            return Err(ShareError::CapacityExceeded {
                what: "layer list",
                max: MAX_ABE_PFMS,
                got: self.layers.len() + 1,
            }
            .into());
        }
        self.layers.push(Layer {
            args,
            display,
            cache,
        });
        Ok(self.layers.len() - 1)
    }

    /// Exchange two layers.
    pub fn swap(&mut self, a: usize, b: usize) -> Result<()> {
        self.check(a)?;
        self.check(b)?;
        self.layers.swap(a, b);
        Ok(())
    }

    /// Make `index` the top layer, shifting the layers above it down by one.
    pub fn move_to_top(&mut self, index: usize) -> Result<()> {
        self.check(index)?;
        self.layers[..=index].rotate_right(1);
        Ok(())
    }

    /// Make `index` the bottom layer, shifting the layers below it up by one.
    pub fn move_to_bottom(&mut self, index: usize) -> Result<()> {
        self.check(index)?;
        self.layers[index..].rotate_left(1);
        Ok(())
    }

    /// Take a layer out of the stack.
    pub fn remove(&mut self, index: usize) -> Result<Layer<C>> {
        self.check(index)?;
        Ok(self.layers.remove(index))
    }

    /// Show or hide a layer.
    pub fn set_display(&mut self, index: usize, shown: bool) -> Result<()> {
        self.check(index)?;
        self.layers[index].display = shown;
        Ok(())
    }

    /// Write the stack into the session segment.
    ///
    /// Every layer is encoded before the lock is taken; the lock brackets only
    /// the copy into the segment.
    pub fn publish(&self, segment: &AbeShareSegment) -> Result<()> {
        let encoded = self
            .layers
            .iter()
            .map(|l| Ok((l.args.to_shared()?, l.display)))
            .collect::<std::result::Result<Vec<_>, ShareError>>()?;
        segment.lock().set_layers(&encoded)?;
        log::debug!("{}: published {} layers", segment.key(), encoded.len());
        Ok(())
    }
}

impl<C: Default> LayerStack<C> {
    /// Rebuild the stack a session segment describes. Unreadable slots are
    /// skipped.
    pub fn from_snapshot(state: &ShareState) -> Self {
        let layers = state
            .open_args
            .iter()
            .zip(&state.display)
            .filter_map(|(shared, &display)| {
                OpenArgs::from_shared(shared).map(|args| Layer {
                    args,
                    display,
                    cache: C::default(),
                })
            })
            .collect();
        Self { layers }
    }
}
