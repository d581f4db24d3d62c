#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use crossbeam_channel::Receiver;

use threaded_engine::{
    DisplaySettings, DrawResult, DrawStatus, ExternalTexture, Fence, GraphicBuffer, LayerSettings,
    RenderEngine, Size, ThreadedEngineConfig,
};

/// One observed engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    PrimeCache,
    GenTextures(usize),
    DeleteTextures(Vec<u32>),
    Map { buffer: u64, renderable: bool },
    Unmap(u64),
    UseProtected(bool),
    Cleanup,
    CleanFramebufferCache,
    Draw { layers: usize },
    DisplaySize(Size),
    Tracing(bool),
}

#[derive(Debug, Default)]
pub struct Recorder {
    pub calls: Vec<Call>,
    pub protected: bool,
    pub factory_done: bool,
    pub built_on: Option<ThreadId>,
    pub dropped_on: Option<ThreadId>,
    pub next_texture: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Shared(Arc<Mutex<Recorder>>);

impl Shared {
    pub fn lock(&self) -> MutexGuard<'_, Recorder> {
        self.0.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }
}

/// Engine stub that records every call it receives.
pub struct StubEngine {
    pub rec: Shared,
    pub supports_protected: bool,
    pub reject_protected: bool,
    pub skip_cleanup: bool,
    /// When set, `prime_cache` blocks until a message arrives.
    pub prime_gate: Option<Receiver<()>>,
}

impl StubEngine {
    pub fn new(rec: Shared) -> Self {
        {
            let mut guard = rec.lock();
            guard.factory_done = true;
            guard.built_on = Some(thread::current().id());
        }
        Self {
            rec,
            supports_protected: true,
            reject_protected: false,
            skip_cleanup: false,
            prime_gate: None,
        }
    }

    /// Adjust the stub before handing it to the proxy.
    pub fn with(mut self, adjust: impl FnOnce(&mut Self)) -> Self {
        adjust(&mut self);
        self
    }

    fn record(&self, call: Call) {
        self.rec.lock().calls.push(call);
    }
}

impl Drop for StubEngine {
    fn drop(&mut self) {
        self.rec.lock().dropped_on = Some(thread::current().id());
    }
}

impl RenderEngine for StubEngine {
    fn prime_cache(&mut self) {
        if let Some(gate) = &self.prime_gate {
            let _ = gate.recv();
        }
        self.record(Call::PrimeCache);
    }

    fn dump(&mut self, result: &mut String) {
        let count = self.rec.lock().calls.len();
        result.push_str(&format!("\nstub engine: {count} calls"));
    }

    fn gen_textures(&mut self, names: &mut [u32]) {
        let mut guard = self.rec.lock();
        for name in names.iter_mut() {
            guard.next_texture += 1;
            *name = guard.next_texture;
        }
        guard.calls.push(Call::GenTextures(names.len()));
    }

    fn delete_textures(&mut self, names: &[u32]) {
        self.record(Call::DeleteTextures(names.to_vec()));
    }

    fn map_external_texture_buffer(&mut self, buffer: &Arc<GraphicBuffer>, is_renderable: bool) {
        self.record(Call::Map {
            buffer: buffer.id,
            renderable: is_renderable,
        });
    }

    fn unmap_external_texture_buffer(&mut self, buffer: &Arc<GraphicBuffer>) {
        self.record(Call::Unmap(buffer.id));
    }

    fn max_texture_size(&self) -> usize {
        16384
    }

    fn max_viewport_dims(&self) -> usize {
        16384
    }

    fn is_protected(&self) -> bool {
        self.rec.lock().protected
    }

    fn supports_protected_content(&self) -> bool {
        self.supports_protected
    }

    fn use_protected_context(&mut self, enabled: bool) {
        let mut guard = self.rec.lock();
        guard.calls.push(Call::UseProtected(enabled));
        if !self.reject_protected {
            guard.protected = enabled;
        }
    }

    fn cleanup_post_render(&mut self) {
        self.record(Call::Cleanup);
    }

    fn can_skip_post_render_cleanup(&self) -> bool {
        self.skip_cleanup
    }

    fn draw_layers(
        &mut self,
        _display: &DisplaySettings,
        layers: &[LayerSettings],
        _buffer: &Arc<ExternalTexture>,
        _use_framebuffer_cache: bool,
        buffer_fence: Option<Fence>,
    ) -> DrawResult {
        self.record(Call::Draw { layers: layers.len() });
        DrawResult {
            status: DrawStatus::Ok,
            fence: buffer_fence,
        }
    }

    fn clean_framebuffer_cache(&mut self) {
        self.record(Call::CleanFramebufferCache);
    }

    fn context_priority(&self) -> i32 {
        2
    }

    fn supports_background_blur(&self) -> bool {
        true
    }

    fn on_active_display_size_changed(&mut self, size: Size) {
        self.record(Call::DisplaySize(size));
    }

    fn set_enable_tracing(&mut self, enabled: bool) {
        self.record(Call::Tracing(enabled));
    }
}

pub fn test_config() -> ThreadedEngineConfig {
    init_logging();
    ThreadedEngineConfig {
        thread_name: "re-test".to_string(),
        realtime: false,
        ..ThreadedEngineConfig::default()
    }
}

pub fn buffer(id: u64) -> Arc<GraphicBuffer> {
    Arc::new(GraphicBuffer {
        id,
        width: 1080,
        height: 2400,
        usage: 0,
    })
}

pub fn target(id: u64) -> Arc<ExternalTexture> {
    Arc::new(ExternalTexture {
        buffer: buffer(id),
        readable: true,
        writable: true,
    })
}

/// Route worker logs to the test harness output. Safe to call repeatedly.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
