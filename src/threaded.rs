//! Single-worker proxy around a thread-affine [`RenderEngine`].
//!
//! `ThreadedEngine` owns one dedicated thread. The engine is constructed on that
//! thread, used only from that thread, and dropped on that thread. Callers on any
//! other thread enqueue closures; the worker runs them strictly in FIFO order,
//! one at a time.
//!
//! Operations come in four shapes:
//!
//! - **Fire-and-forget**: enqueue and return (`map_external_texture_buffer`,
//!   `set_enable_tracing`, ...). Some return a [`Pending`] the caller may wait
//!   on later (`prime_cache`, `draw_layers`).
//! - **Blocking**: enqueue, then wait for the worker's reply (`gen_textures`,
//!   `dump`, `context_priority`, ...). The reply reflects every item enqueued
//!   before it.
//! - **Cached**: wait for initialization, then read a value captured at start-up
//!   without touching the queue (`max_texture_size`, `is_protected`, ...).
//! - **Guarded mutation**: `use_protected_context` checks the cached mirror first
//!   and skips the round trip when nothing would change.
//!
//! # Protected-context mirror
//!
//! `is_protected` reads a flag kept outside the queue. `use_protected_context`
//! sets it optimistically before the switch runs; the worker corrects it if the
//! engine refuses the switch. Between those two points readers can see the
//! requested mode rather than the engine's actual mode. This window is part of
//! the contract: do not turn `is_protected` into a queued call.
//!
//! # Teardown
//!
//! Dropping the proxy stops the queue, wakes the worker and joins it. Work still
//! queued at that moment is discarded without running; its reply channels close,
//! so anyone blocked on them gets [`ThreadedError::Disconnected`]. Calls made after
//! teardown began are rejected with [`ThreadedError::ShutDown`].
//!
//! If the last handle is dropped on the worker thread itself, the worker is
//! detached rather than joined; it still drops the engine when it leaves its loop.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use chrono::{DateTime, Utc};
use tracing::{debug, debug_span, error, info, info_span, warn};

use crate::config::ThreadedEngineConfig;
use crate::engine::{
    Capabilities, DisplaySettings, DrawResult, ExternalTexture, Fence, GraphicBuffer, LayerSettings,
    RenderEngine, Size,
};
use crate::error::{ThreadedError, ThreadedResult};
use crate::sched::{self, SchedPolicy, Tid};
use crate::status::{ProxyId, ProxyStatus, WorkerState, WorkerStats};
use crate::work::{reply_channel, Pending, Work, WorkQueue};

#[derive(Debug, Clone, Copy)]
struct Initialized {
    capabilities: Capabilities,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
enum InitState {
    Pending,
    Ready(Initialized),
    Failed,
}

/// Start-up barrier: callers wait here until the worker has built the engine.
#[derive(Debug)]
struct InitGate {
    state: Mutex<InitState>,
    changed: Condvar,
}

impl InitGate {
    fn new() -> Self {
        Self {
            state: Mutex::new(InitState::Pending),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: InitState) {
        *self.lock() = state;
        self.changed.notify_all();
    }

    fn wait(&self) -> Option<Initialized> {
        let mut state = self.lock();
        loop {
            match *state {
                InitState::Ready(init) => return Some(init),
                InitState::Failed => return None,
                InitState::Pending => {
                    state = self.changed.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    fn peek(&self) -> InitState {
        *self.lock()
    }
}

/// State the worker thread shares with the proxy handle.
struct WorkerShared<E> {
    id: ProxyId,
    config: ThreadedEngineConfig,
    queue: Arc<WorkQueue<E>>,
    init: Arc<InitGate>,
    is_protected: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
}

/// Proxy that serializes every call into a thread-affine engine onto one worker thread.
///
/// The proxy is `Send + Sync` even though `E` need not be: the engine never
/// leaves the worker thread. Share it between callers with `Arc`.
pub struct ThreadedEngine<E: RenderEngine + 'static> {
    id: ProxyId,
    config: ThreadedEngineConfig,
    queue: Arc<WorkQueue<E>>,
    init: Arc<InitGate>,
    is_protected: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
    worker: Option<JoinHandle<()>>,
}

impl<E: RenderEngine + 'static> ThreadedEngine<E> {
    /// Spawn the worker thread and start building the engine on it.
    ///
    /// Returns as soon as the thread exists; `factory` runs on the worker. Use
    /// [`wait_until_initialized`](Self::wait_until_initialized) to wait for it.
    ///
    /// # Errors
    /// `InvalidConfig` if `config` fails validation, `Spawn` if the OS refuses to
    /// create the thread.
    pub fn create<F>(factory: F, config: ThreadedEngineConfig) -> ThreadedResult<Self>
    where
        F: FnOnce() -> E + Send + 'static,
    {
        config.validate()?;

        let id = ProxyId::new();
        let queue = Arc::new(WorkQueue::new());
        let init = Arc::new(InitGate::new());
        let is_protected = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(WorkerStats::new());

        let shared = WorkerShared {
            id,
            config: config.clone(),
            queue: Arc::clone(&queue),
            init: Arc::clone(&init),
            is_protected: Arc::clone(&is_protected),
            stats: Arc::clone(&stats),
        };

        let worker = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || worker_main(shared, factory))
            .map_err(|source| ThreadedError::Spawn {
                thread_name: config.thread_name.clone(),
                source,
            })?;

        info!(proxy = %id, thread = %config.thread_name, "spawned engine worker");

        Ok(Self {
            id,
            config,
            queue,
            init,
            is_protected,
            stats,
            worker: Some(worker),
        })
    }

    /// Identity of this proxy.
    #[must_use]
    pub const fn id(&self) -> ProxyId {
        self.id
    }

    /// Configuration the worker was started with.
    #[must_use]
    pub const fn config(&self) -> &ThreadedEngineConfig {
        &self.config
    }

    /// `ThreadId` of the worker thread.
    #[must_use]
    pub fn worker_thread_id(&self) -> Option<ThreadId> {
        self.worker.as_ref().map(|handle| handle.thread().id())
    }

    /// Block until the worker has constructed the engine.
    ///
    /// # Errors
    /// `InitializationFailed` if the factory panicked, so the engine will never exist.
    pub fn wait_until_initialized(&self) -> ThreadedResult<()> {
        self.initialized().map(|_| ())
    }

    /// Whether the engine exists yet. Never blocks.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        matches!(self.init.peek(), InitState::Ready(_))
    }

    fn initialized(&self) -> ThreadedResult<Initialized> {
        self.init.wait().ok_or_else(|| ThreadedError::InitializationFailed {
            thread_name: self.config.thread_name.clone(),
        })
    }

    fn capabilities(&self) -> ThreadedResult<Capabilities> {
        self.initialized().map(|init| init.capabilities)
    }

    fn post(&self, operation: &'static str, f: impl FnOnce(&mut E) + Send + 'static) -> ThreadedResult<()> {
        self.queue.push(Work::new(operation, f))
    }

    fn call_async<T: Send + 'static>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut E) -> T + Send + 'static,
    ) -> ThreadedResult<Pending<T>> {
        let (reply, pending) = reply_channel(operation);
        self.queue.push(Work::new(operation, move |engine: &mut E| reply.send(f(engine))))?;
        Ok(pending)
    }

    fn call<T: Send + 'static>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut E) -> T + Send + 'static,
    ) -> ThreadedResult<T> {
        self.call_async(operation, f)?.wait()
    }

    /// Warm the engine's caches in the background.
    ///
    /// When the worker runs real-time, it drops to `SCHED_OTHER` for the duration
    /// so the long warm-up does not starve the rest of the system, then restores
    /// `SCHED_FIFO`.
    ///
    /// # Errors
    /// `ShutDown` if teardown has started.
    pub fn prime_cache(&self) -> ThreadedResult<Pending<()>> {
        let relax = self.config.realtime && self.config.relax_priority_for_prime_cache;
        let priority = self.config.fifo_priority;
        let (reply, pending) = reply_channel("prime_cache");
        self.queue.push(Work::new("prime_cache", move |engine: &mut E| {
            if relax {
                if let Err(err) = sched::set_current_thread_policy(SchedPolicy::Other) {
                    warn!(error = %err, "couldn't set SCHED_OTHER for prime_cache");
                }
            }

            engine.prime_cache();
            reply.send(());

            if relax {
                if let Err(err) = sched::set_current_thread_policy(SchedPolicy::Fifo { priority }) {
                    warn!(error = %err, "couldn't restore SCHED_FIFO after prime_cache");
                }
            }
        }))?;
        Ok(pending)
    }

    /// Ask the engine to describe its state, starting from `context`.
    ///
    /// # Errors
    /// `ShutDown` or `Disconnected` if the worker goes away first.
    pub fn dump(&self, context: &str) -> ThreadedResult<String> {
        let mut local = context.to_owned();
        self.call("dump", move |engine: &mut E| {
            engine.dump(&mut local);
            local
        })
    }

    /// Allocate `names.len()` texture names and write them into `names`.
    ///
    /// # Errors
    /// `ShutDown` or `Disconnected` if the worker goes away first.
    #[tracing::instrument(level = "trace", skip(self, names), fields(count = names.len()))]
    pub fn gen_textures(&self, names: &mut [u32]) -> ThreadedResult<()> {
        let count = names.len();
        let generated = self.call("gen_textures", move |engine: &mut E| {
            let mut generated = vec![0u32; count];
            engine.gen_textures(&mut generated);
            generated
        })?;
        names.copy_from_slice(&generated);
        Ok(())
    }

    /// Release texture names. Returns once the engine has released them.
    ///
    /// # Errors
    /// `ShutDown` or `Disconnected` if the worker goes away first.
    #[tracing::instrument(level = "trace", skip(self, names), fields(count = names.len()))]
    pub fn delete_textures(&self, names: &[u32]) -> ThreadedResult<()> {
        let names = names.to_vec();
        self.call("delete_textures", move |engine: &mut E| engine.delete_textures(&names))
    }

    /// Import `buffer` ahead of use. Does not wait.
    ///
    /// # Errors
    /// `ShutDown` if teardown has started.
    pub fn map_external_texture_buffer(&self, buffer: Arc<GraphicBuffer>, is_renderable: bool) -> ThreadedResult<()> {
        self.post("map_external_texture_buffer", move |engine: &mut E| {
            engine.map_external_texture_buffer(&buffer, is_renderable);
        })
    }

    /// Drop the mapping for `buffer`. Does not wait.
    ///
    /// # Errors
    /// `ShutDown` if teardown has started.
    pub fn unmap_external_texture_buffer(&self, buffer: Arc<GraphicBuffer>) -> ThreadedResult<()> {
        self.post("unmap_external_texture_buffer", move |engine: &mut E| {
            engine.unmap_external_texture_buffer(&buffer);
        })
    }

    /// Largest texture edge the engine accepts.
    ///
    /// # Errors
    /// `InitializationFailed` if the engine never came up.
    pub fn max_texture_size(&self) -> ThreadedResult<usize> {
        Ok(self.capabilities()?.max_texture_size)
    }

    /// Largest viewport edge the engine accepts.
    ///
    /// # Errors
    /// `InitializationFailed` if the engine never came up.
    pub fn max_viewport_dims(&self) -> ThreadedResult<usize> {
        Ok(self.capabilities()?.max_viewport_dims)
    }

    /// Cached protected-context mode. Never enqueues.
    ///
    /// May briefly report a mode requested through
    /// [`use_protected_context`](Self::use_protected_context) that the engine
    /// has not applied yet, or later rejected.
    ///
    /// # Errors
    /// `InitializationFailed` if the engine never came up.
    pub fn is_protected(&self) -> ThreadedResult<bool> {
        self.wait_until_initialized()?;
        Ok(self.is_protected.load(Ordering::Acquire))
    }

    /// Whether the engine can enter a protected context.
    ///
    /// # Errors
    /// `InitializationFailed` if the engine never came up.
    pub fn supports_protected_content(&self) -> ThreadedResult<bool> {
        Ok(self.capabilities()?.supports_protected_content)
    }

    /// Switch the engine into or out of its protected context.
    ///
    /// Skips the queue entirely when the cached mode already equals `enabled`, or
    /// when enabling is requested on an engine without protected-content support.
    /// Otherwise the cached mode flips immediately and the switch runs in queue
    /// order. If the engine rejects it, the worker logs an error and restores the
    /// cached mode to the engine's actual one; the rejection is not returned here.
    ///
    /// # Errors
    /// `InitializationFailed` if the engine never came up, `ShutDown` if teardown
    /// has started.
    pub fn use_protected_context(&self, enabled: bool) -> ThreadedResult<()> {
        if self.is_protected()? == enabled || (enabled && !self.supports_protected_content()?) {
            return Ok(());
        }

        let mirror = Arc::clone(&self.is_protected);
        let work = Work::new("use_protected_context", move |engine: &mut E| {
            engine.use_protected_context(enabled);
            let actual = engine.is_protected();
            if actual != enabled {
                error!(requested = enabled, actual, "failed to switch engine protected context");
                mirror.store(actual, Ordering::Release);
            }
        });
        self.queue
            .push_with(work, || self.is_protected.store(enabled, Ordering::Release))
    }

    /// Release per-frame resources, unless the engine says there is nothing to do.
    ///
    /// The check is a blocking round trip; the cleanup itself is not waited on.
    ///
    /// # Errors
    /// `ShutDown` or `Disconnected` if the worker goes away first.
    pub fn cleanup_post_render(&self) -> ThreadedResult<()> {
        if self.can_skip_post_render_cleanup()? {
            return Ok(());
        }
        self.post("cleanup_post_render", |engine: &mut E| engine.cleanup_post_render())
    }

    /// Ask the engine whether post-render cleanup would be a no-op.
    ///
    /// # Errors
    /// `ShutDown` or `Disconnected` if the worker goes away first.
    pub fn can_skip_post_render_cleanup(&self) -> ThreadedResult<bool> {
        self.call("can_skip_post_render_cleanup", |engine: &mut E| {
            engine.can_skip_post_render_cleanup()
        })
    }

    /// Compose `layers` into `buffer`. The result arrives through the returned handle.
    ///
    /// `buffer_fence` is moved into the work item and handed to the engine.
    ///
    /// # Errors
    /// `ShutDown` if teardown has started.
    pub fn draw_layers(
        &self,
        display: DisplaySettings,
        layers: Vec<LayerSettings>,
        buffer: Arc<ExternalTexture>,
        use_framebuffer_cache: bool,
        buffer_fence: Option<Fence>,
    ) -> ThreadedResult<Pending<DrawResult>> {
        self.call_async("draw_layers", move |engine: &mut E| {
            engine.draw_layers(&display, &layers, &buffer, use_framebuffer_cache, buffer_fence)
        })
    }

    /// Drop cached framebuffers. Does not wait.
    ///
    /// # Errors
    /// `ShutDown` if teardown has started.
    pub fn clean_framebuffer_cache(&self) -> ThreadedResult<()> {
        self.post("clean_framebuffer_cache", |engine: &mut E| engine.clean_framebuffer_cache())
    }

    /// Priority of the engine's graphics context.
    ///
    /// # Errors
    /// `ShutDown` or `Disconnected` if the worker goes away first.
    pub fn context_priority(&self) -> ThreadedResult<i32> {
        self.call("context_priority", |engine: &mut E| engine.context_priority())
    }

    /// Whether background blur is available.
    ///
    /// # Errors
    /// `InitializationFailed` if the engine never came up.
    pub fn supports_background_blur(&self) -> ThreadedResult<bool> {
        Ok(self.capabilities()?.supports_background_blur)
    }

    /// Tell the engine the largest active display changed size. Does not wait.
    ///
    /// # Errors
    /// `ShutDown` if teardown has started.
    pub fn on_active_display_size_changed(&self, size: Size) -> ThreadedResult<()> {
        self.post("on_active_display_size_changed", move |engine: &mut E| {
            engine.on_active_display_size_changed(size);
        })
    }

    /// OS thread id of the worker, measured on the worker. `None` where the
    /// platform has no such id.
    ///
    /// # Errors
    /// `ShutDown` or `Disconnected` if the worker goes away first.
    pub fn render_engine_tid(&self) -> ThreadedResult<Option<Tid>> {
        self.call("render_engine_tid", |_: &mut E| sched::current_tid())
    }

    /// Toggle engine-internal tracing. Does not wait.
    ///
    /// # Errors
    /// `ShutDown` if teardown has started.
    pub fn set_enable_tracing(&self, enabled: bool) -> ThreadedResult<()> {
        self.post("set_enable_tracing", move |engine: &mut E| engine.set_enable_tracing(enabled))
    }

    /// Snapshot of the worker's counters and lifecycle.
    #[must_use]
    pub fn status(&self) -> ProxyStatus {
        let initialized_at = match self.init.peek() {
            InitState::Ready(init) => Some(init.at),
            InitState::Pending | InitState::Failed => None,
        };
        ProxyStatus {
            id: self.id,
            thread_name: self.config.thread_name.clone(),
            state: self.stats.state(),
            queued: self.queue.len(),
            executed: self.stats.executed(),
            panicked: self.stats.panicked(),
            dropped: self.stats.dropped(),
            initialized_at,
        }
    }

    /// Stop the worker, wait for it to exit, and return its final status.
    ///
    /// Callers blocked on queued work that has not started get `Disconnected`;
    /// the returned `dropped` counts those items. Dropping the proxy tears down
    /// the same way but discards the status.
    pub fn shutdown(mut self) -> ProxyStatus {
        self.teardown();
        self.status()
    }

    fn teardown(&mut self) {
        self.queue.stop();

        let Some(handle) = self.worker.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            // Last handle released by a work item or by the engine itself. The
            // worker sees the stopped queue and exits once this call unwinds.
            warn!(proxy = %self.id, "proxy dropped on its own worker; detaching instead of joining");
            return;
        }
        if handle.join().is_err() {
            error!(proxy = %self.id, "engine worker panicked during teardown");
        }
        debug!(proxy = %self.id, "engine worker joined");
    }
}

impl<E: RenderEngine + 'static> Drop for ThreadedEngine<E> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn worker_main<E, F>(shared: WorkerShared<E>, factory: F)
where
    E: RenderEngine + 'static,
    F: FnOnce() -> E,
{
    let span = info_span!("engine_worker", proxy = %shared.id);
    let _entered = span.enter();

    if shared.config.realtime {
        let policy = SchedPolicy::Fifo {
            priority: shared.config.fifo_priority,
        };
        if let Err(err) = sched::set_current_thread_policy(policy) {
            warn!(
                error = %err,
                permission_denied = sched::is_permission_error(&err),
                "couldn't set SCHED_FIFO"
            );
        }
    }

    let mut engine = match panic::catch_unwind(AssertUnwindSafe(factory)) {
        Ok(engine) => engine,
        Err(_) => {
            error!("engine factory panicked; worker exiting");
            shared.queue.stop();
            shared.init.publish(InitState::Failed);
            shared.stats.record_dropped(shared.queue.take_remaining().len());
            shared.stats.set_state(WorkerState::Stopped);
            return;
        }
    };

    shared.is_protected.store(engine.is_protected(), Ordering::Release);
    shared.stats.set_state(WorkerState::Running);
    shared.init.publish(InitState::Ready(Initialized {
        capabilities: Capabilities::probe(&engine),
        at: Utc::now(),
    }));
    debug!("engine initialized");

    while let Some(work) = shared.queue.next() {
        let operation = work.operation();
        let _work_span = debug_span!("work", operation).entered();
        match panic::catch_unwind(AssertUnwindSafe(|| work.run(&mut engine))) {
            Ok(()) => shared.stats.record_executed(),
            Err(_) => {
                shared.stats.record_panicked();
                error!(operation, "work item panicked");
            }
        }
    }

    shared.stats.set_state(WorkerState::Draining);
    let remaining = shared.queue.take_remaining();
    if !remaining.is_empty() {
        debug!(count = remaining.len(), "discarding queued work at shutdown");
        shared.stats.record_dropped(remaining.len());
    }
    drop(remaining);

    // The engine's context is bound to this thread, so it must be released here.
    drop(engine);
    shared.stats.set_state(WorkerState::Stopped);
    debug!("engine worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct Counter {
        calls: Arc<AtomicUsize>,
        protected: bool,
        accept_protected: bool,
    }

    impl RenderEngine for Counter {
        fn prime_cache(&mut self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
        fn dump(&mut self, result: &mut String) {
            result.push_str(" counter");
        }
        fn gen_textures(&mut self, names: &mut [u32]) {
            for (i, name) in names.iter_mut().enumerate() {
                *name = u32::try_from(i).unwrap() + 1;
            }
        }
        fn delete_textures(&mut self, _names: &[u32]) {}
        fn map_external_texture_buffer(&mut self, _buffer: &Arc<GraphicBuffer>, _is_renderable: bool) {}
        fn unmap_external_texture_buffer(&mut self, _buffer: &Arc<GraphicBuffer>) {}
        fn max_texture_size(&self) -> usize {
            2048
        }
        fn max_viewport_dims(&self) -> usize {
            4096
        }
        fn is_protected(&self) -> bool {
            self.protected
        }
        fn supports_protected_content(&self) -> bool {
            true
        }
        fn use_protected_context(&mut self, enabled: bool) {
            if self.accept_protected {
                self.protected = enabled;
            }
        }
        fn cleanup_post_render(&mut self) {}
        fn draw_layers(
            &mut self,
            _display: &DisplaySettings,
            layers: &[LayerSettings],
            _buffer: &Arc<ExternalTexture>,
            _use_framebuffer_cache: bool,
            buffer_fence: Option<Fence>,
        ) -> DrawResult {
            self.calls.fetch_add(layers.len(), Ordering::SeqCst);
            DrawResult {
                status: crate::engine::DrawStatus::Ok,
                fence: buffer_fence,
            }
        }
        fn context_priority(&self) -> i32 {
            5
        }
    }

    fn quiet_config() -> ThreadedEngineConfig {
        ThreadedEngineConfig {
            thread_name: "re-unit".to_string(),
            realtime: false,
            ..ThreadedEngineConfig::default()
        }
    }

    #[test]
    fn create_rejects_invalid_config() {
        let config = ThreadedEngineConfig {
            fifo_priority: 0,
            ..quiet_config()
        };
        let err = ThreadedEngine::create(Counter::default, config).err().unwrap();
        assert!(matches!(err, ThreadedError::InvalidConfig { .. }));
    }

    #[test]
    fn cached_capabilities_after_init() {
        let proxy = ThreadedEngine::create(Counter::default, quiet_config()).unwrap();
        assert_eq!(proxy.max_texture_size().unwrap(), 2048);
        assert_eq!(proxy.max_viewport_dims().unwrap(), 4096);
        assert!(proxy.supports_protected_content().unwrap());
        assert!(!proxy.supports_background_blur().unwrap());
        assert!(proxy.is_initialized());
        assert!(proxy.status().initialized_at.is_some());
    }

    #[test]
    fn dump_appends_to_context() {
        let proxy = ThreadedEngine::create(Counter::default, quiet_config()).unwrap();
        assert_eq!(proxy.dump("state:").unwrap(), "state: counter");
    }

    #[test]
    fn gen_textures_fills_caller_buffer() {
        let proxy = ThreadedEngine::create(Counter::default, quiet_config()).unwrap();
        let mut names = [0u32; 3];
        proxy.gen_textures(&mut names).unwrap();
        assert_eq!(names, [1, 2, 3]);
    }

    #[test]
    fn draw_layers_returns_fence_through_pending() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine_calls = Arc::clone(&calls);
        let proxy = ThreadedEngine::create(
            move || Counter {
                calls: engine_calls,
                ..Counter::default()
            },
            quiet_config(),
        )
        .unwrap();

        let target = Arc::new(ExternalTexture {
            buffer: Arc::new(GraphicBuffer {
                id: 1,
                width: 64,
                height: 64,
                usage: 0,
            }),
            readable: true,
            writable: true,
        });
        let pending = proxy
            .draw_layers(
                DisplaySettings::default(),
                vec![LayerSettings::default(), LayerSettings::default()],
                target,
                false,
                Some(Fence::new(9)),
            )
            .unwrap();
        let result = pending.wait_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result.fence, Some(Fence::new(9)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rejected_protected_switch_is_reconciled() {
        let proxy = ThreadedEngine::create(Counter::default, quiet_config()).unwrap();

        proxy.use_protected_context(true).unwrap();
        // Barrier: the switch has run once this returns.
        assert_eq!(proxy.context_priority().unwrap(), 5);
        assert!(!proxy.is_protected().unwrap());
    }

    #[test]
    fn accepted_protected_switch_sticks() {
        let proxy = ThreadedEngine::create(
            || Counter {
                accept_protected: true,
                ..Counter::default()
            },
            quiet_config(),
        )
        .unwrap();

        proxy.use_protected_context(true).unwrap();
        assert!(proxy.is_protected().unwrap());
        proxy.context_priority().unwrap();
        assert!(proxy.is_protected().unwrap());
    }

    #[test]
    fn factory_panic_fails_initialization() {
        let proxy: ThreadedEngine<Counter> =
            ThreadedEngine::create(|| panic!("no context"), quiet_config()).unwrap();

        let err = proxy.wait_until_initialized().unwrap_err();
        assert!(matches!(err, ThreadedError::InitializationFailed { .. }));
        assert!(proxy.context_priority().unwrap_err().is_shut_down());
    }

    #[test]
    fn panicking_work_does_not_stop_worker() {
        let proxy = ThreadedEngine::create(Counter::default, quiet_config()).unwrap();
        let err = proxy
            .call("explode", |_: &mut Counter| -> u32 { panic!("boom") })
            .unwrap_err();
        assert!(err.is_disconnected());

        assert_eq!(proxy.context_priority().unwrap(), 5);
        let status = proxy.status();
        assert_eq!(status.panicked, 1);
        assert_eq!(status.state, WorkerState::Running);
    }

    #[test]
    fn worker_thread_carries_configured_name() {
        let proxy = ThreadedEngine::create(Counter::default, quiet_config()).unwrap();
        let name = proxy
            .call("thread_name", |_: &mut Counter| {
                thread::current().name().map(str::to_owned)
            })
            .unwrap();
        assert_eq!(name.as_deref(), Some("re-unit"));
        assert_eq!(proxy.worker_thread_id().unwrap(), {
            proxy.call("thread_id", |_: &mut Counter| thread::current().id()).unwrap()
        });
    }

    #[test]
    fn last_handle_released_on_worker_detaches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine_calls = Arc::clone(&calls);
        let proxy = Arc::new(
            ThreadedEngine::create(
                move || Counter {
                    calls: engine_calls,
                    ..Counter::default()
                },
                quiet_config(),
            )
            .unwrap(),
        );
        proxy.wait_until_initialized().unwrap();

        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        let held = Arc::clone(&proxy);
        proxy
            .post("release_proxy", move |_: &mut Counter| {
                gate_rx.recv().unwrap();
                drop(held);
                done_tx.send(()).unwrap();
            })
            .unwrap();

        // The queued item now holds the only handle.
        drop(proxy);
        gate_tx.send(()).unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // The detached worker still drops the engine on its way out.
        for _ in 0..500 {
            if Arc::strong_count(&calls) == 1 {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("detached worker never released the engine");
    }
}
