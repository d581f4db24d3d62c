//! Engine capability surface.
//!
//! `RenderEngine` is what the proxy drives. Implementations are thread-affine:
//! they are built, used and dropped on one thread, and need not be `Send` or
//! `Sync`. Every method is called from the proxy's worker thread only, one call
//! at a time.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Width and height of a display, in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    #[allow(missing_docs)]
    pub width: i32,
    #[allow(missing_docs)]
    pub height: i32,
}

impl Size {
    /// Creates a size.
    #[must_use]
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned rectangle in display coordinates.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    /// Rectangle anchored at the origin covering `size`.
    #[must_use]
    pub const fn from_size(size: Size) -> Self {
        Self {
            left: 0,
            top: 0,
            right: size.width,
            bottom: size.height,
        }
    }
}

/// Handle to a graphics buffer allocated outside the engine.
///
/// Buffers are shared between the caller and queued work, so they travel as
/// `Arc<GraphicBuffer>`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphicBuffer {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub usage: u64,
}

/// A graphics buffer wrapped for use as a render target or layer source.
#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub struct ExternalTexture {
    pub buffer: Arc<GraphicBuffer>,
    pub readable: bool,
    pub writable: bool,
}

/// Output-wide parameters for one composition pass.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplaySettings {
    pub physical_display: Rect,
    pub clip: Rect,
    pub max_luminance: f32,
}

/// One layer to compose.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default)]
pub struct LayerSettings {
    pub geometry: Rect,
    pub alpha: f32,
    pub source: Option<Arc<ExternalTexture>>,
    pub background_blur_radius: u32,
}

/// Owned synchronization fence.
///
/// A fence is moved into the work item that consumes it, never copied.
#[derive(Debug, PartialEq, Eq)]
pub struct Fence(u64);

impl Fence {
    /// Wraps a fence handle.
    #[must_use]
    pub const fn new(handle: u64) -> Self {
        Self(handle)
    }

    /// The wrapped handle.
    #[must_use]
    pub const fn handle(&self) -> u64 {
        self.0
    }
}

/// Outcome of a draw submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawStatus {
    /// The layers were submitted.
    Ok,
    /// The inputs were rejected.
    BadValue,
    /// The engine could not complete the submission.
    Failed,
}

/// Result of [`RenderEngine::draw_layers`].
#[derive(Debug, PartialEq, Eq)]
pub struct DrawResult {
    /// Submission status.
    pub status: DrawStatus,
    /// Fence signalled when the GPU finishes, if the engine produced one.
    pub fence: Option<Fence>,
}

impl DrawResult {
    /// A successful submission without a completion fence.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            status: DrawStatus::Ok,
            fence: None,
        }
    }
}

/// Static engine properties, read once on the worker right after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Largest texture edge the engine accepts.
    pub max_texture_size: usize,
    /// Largest viewport edge the engine accepts.
    pub max_viewport_dims: usize,
    /// Whether a protected context can be entered at all.
    pub supports_protected_content: bool,
    /// Whether background blur is available.
    pub supports_background_blur: bool,
}

impl Capabilities {
    /// Snapshot the static properties of `engine`.
    pub fn probe<E: RenderEngine + ?Sized>(engine: &E) -> Self {
        Self {
            max_texture_size: engine.max_texture_size(),
            max_viewport_dims: engine.max_viewport_dims(),
            supports_protected_content: engine.supports_protected_content(),
            supports_background_blur: engine.supports_background_blur(),
        }
    }
}

/// The engine driven by a [`ThreadedEngine`](crate::ThreadedEngine).
///
/// Implementations may assume single-threaded, serialized access.
pub trait RenderEngine {
    /// Warm up shader and pipeline caches.
    fn prime_cache(&mut self);

    /// Append diagnostic state to `result`.
    fn dump(&mut self, result: &mut String);

    /// Allocate `names.len()` texture names into `names`.
    fn gen_textures(&mut self, names: &mut [u32]);

    /// Release previously generated texture names.
    fn delete_textures(&mut self, names: &[u32]);

    /// Import an external buffer so later draws can use it without a mapping stall.
    fn map_external_texture_buffer(&mut self, buffer: &Arc<GraphicBuffer>, is_renderable: bool);

    /// Drop the mapping created by [`map_external_texture_buffer`](Self::map_external_texture_buffer).
    fn unmap_external_texture_buffer(&mut self, buffer: &Arc<GraphicBuffer>);

    /// Largest texture edge the engine accepts.
    fn max_texture_size(&self) -> usize;

    /// Largest viewport edge the engine accepts.
    fn max_viewport_dims(&self) -> usize;

    /// Whether the engine currently renders in a protected context.
    fn is_protected(&self) -> bool;

    /// Whether the engine can enter a protected context.
    fn supports_protected_content(&self) -> bool;

    /// Switch into or out of the protected context. May silently fail; callers
    /// check [`is_protected`](Self::is_protected) afterwards.
    fn use_protected_context(&mut self, enabled: bool);

    /// Release per-frame resources once a frame is done.
    fn cleanup_post_render(&mut self);

    /// Whether [`cleanup_post_render`](Self::cleanup_post_render) would do nothing right now.
    fn can_skip_post_render_cleanup(&self) -> bool {
        false
    }

    /// Compose `layers` into `buffer`.
    fn draw_layers(
        &mut self,
        display: &DisplaySettings,
        layers: &[LayerSettings],
        buffer: &Arc<ExternalTexture>,
        use_framebuffer_cache: bool,
        buffer_fence: Option<Fence>,
    ) -> DrawResult;

    /// Drop cached framebuffers.
    fn clean_framebuffer_cache(&mut self) {}

    /// Priority of the underlying graphics context.
    fn context_priority(&self) -> i32;

    /// Whether background blur is available.
    fn supports_background_blur(&self) -> bool {
        false
    }

    /// The largest active display changed size.
    fn on_active_display_size_changed(&mut self, _size: Size) {}

    /// Toggle engine-internal tracing.
    fn set_enable_tracing(&mut self, _enabled: bool) {}
}

impl<T: RenderEngine + ?Sized> RenderEngine for Box<T> {
    fn prime_cache(&mut self) {
        (**self).prime_cache();
    }

    fn dump(&mut self, result: &mut String) {
        (**self).dump(result);
    }

    fn gen_textures(&mut self, names: &mut [u32]) {
        (**self).gen_textures(names);
    }

    fn delete_textures(&mut self, names: &[u32]) {
        (**self).delete_textures(names);
    }

    fn map_external_texture_buffer(&mut self, buffer: &Arc<GraphicBuffer>, is_renderable: bool) {
        (**self).map_external_texture_buffer(buffer, is_renderable);
    }

    fn unmap_external_texture_buffer(&mut self, buffer: &Arc<GraphicBuffer>) {
        (**self).unmap_external_texture_buffer(buffer);
    }

    fn max_texture_size(&self) -> usize {
        (**self).max_texture_size()
    }

    fn max_viewport_dims(&self) -> usize {
        (**self).max_viewport_dims()
    }

    fn is_protected(&self) -> bool {
        (**self).is_protected()
    }

    fn supports_protected_content(&self) -> bool {
        (**self).supports_protected_content()
    }

    fn use_protected_context(&mut self, enabled: bool) {
        (**self).use_protected_context(enabled);
    }

    fn cleanup_post_render(&mut self) {
        (**self).cleanup_post_render();
    }

    fn can_skip_post_render_cleanup(&self) -> bool {
        (**self).can_skip_post_render_cleanup()
    }

    fn draw_layers(
        &mut self,
        display: &DisplaySettings,
        layers: &[LayerSettings],
        buffer: &Arc<ExternalTexture>,
        use_framebuffer_cache: bool,
        buffer_fence: Option<Fence>,
    ) -> DrawResult {
        (**self).draw_layers(display, layers, buffer, use_framebuffer_cache, buffer_fence)
    }

    fn clean_framebuffer_cache(&mut self) {
        (**self).clean_framebuffer_cache();
    }

    fn context_priority(&self) -> i32 {
        (**self).context_priority()
    }

    fn supports_background_blur(&self) -> bool {
        (**self).supports_background_blur()
    }

    fn on_active_display_size_changed(&mut self, size: Size) {
        (**self).on_active_display_size_changed(size);
    }

    fn set_enable_tracing(&mut self, enabled: bool) {
        (**self).set_enable_tracing(enabled);
    }
}
