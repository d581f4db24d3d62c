//! # threaded-engine
//!
//! Drive a thread-affine rendering engine from many threads.
//!
//! Graphics contexts are usually bound to the thread that created them. This
//! crate wraps such an engine in [`ThreadedEngine`], which owns one dedicated
//! worker thread: the engine is built there, every call runs there in strict
//! FIFO order, and the engine is dropped there. Callers either fire and forget,
//! keep a [`Pending`] handle to wait on later, or block for the reply.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use threaded_engine::{ThreadedEngine, ThreadedEngineConfig};
//!
//! let proxy = ThreadedEngine::create(|| MyGlEngine::new(), ThreadedEngineConfig::default())?;
//!
//! let warmup = proxy.prime_cache()?;
//! let mut names = [0u32; 4];
//! proxy.gen_textures(&mut names)?;
//! warmup.wait()?;
//!
//! proxy.use_protected_context(true)?;
//! assert!(proxy.is_protected()?);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod error;
pub mod sched;
pub mod status;
pub mod threaded;
pub mod work;

pub use config::ThreadedEngineConfig;
pub use engine::{
    Capabilities, DisplaySettings, DrawResult, DrawStatus, ExternalTexture, Fence, GraphicBuffer,
    LayerSettings, Rect, RenderEngine, Size,
};
pub use error::{ThreadedError, ThreadedResult};
pub use sched::Tid;
pub use status::{ProxyId, ProxyStatus, WorkerState};
pub use threaded::ThreadedEngine;
pub use work::Pending;
