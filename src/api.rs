// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The public synchronous-style tag API: `create`/`destroy`,
//! `read`/`write`, `abort`, `status`, callback registration, and library
//! teardown. This is the facade a caller actually uses; everything else in
//! this crate exists to make these operations correct under concurrency.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing_appender::non_blocking::WorkerGuard;

use crate::{
    cfg::{attr, config::RuntimeConfig, logger},
    error::{PlcError, PlcResult},
    primitives::time::Deadline,
    registry::{TagId, TagRegistry},
    session::pool::SessionPool,
    tag::{Tag, events::TagEvent},
    tickler::Tickler,
};

/// The crate's version, for `check_lib_version`.
pub const LIB_VERSION: (u32, u32, u32) = (
    const_str_to_u32(env!("CARGO_PKG_VERSION_MAJOR")),
    const_str_to_u32(env!("CARGO_PKG_VERSION_MINOR")),
    const_str_to_u32(env!("CARGO_PKG_VERSION_PATCH")),
);

const fn const_str_to_u32(s: &str) -> u32 {
    let bytes = s.as_bytes();
    let mut out = 0u32;
    let mut i = 0;
    while i < bytes.len() {
        out = out * 10 + (bytes[i] - b'0') as u32;
        i += 1;
    }
    out
}

/// Confirms the running library satisfies a caller's minimum version
/// requirement.
pub fn check_lib_version(required_major: u32, required_minor: u32, required_patch: u32) -> PlcResult<()> {
    let (major, minor, patch) = LIB_VERSION;
    if major != required_major {
        return Err(PlcError::Unsupported);
    }
    if (minor, patch) < (required_minor, required_patch) {
        return Err(PlcError::Unsupported);
    }
    Ok(())
}

/// The process-wide runtime: the tag registry, the session pool tags share,
/// and the tickler driving them all forward.
pub struct PlcTagContext {
    registry: Arc<TagRegistry>,
    pool: Arc<SessionPool>,
    tickler: Option<Tickler>,
    _log_guard: Option<WorkerGuard>,
    /// Per-tag caller-facing mutexes for [`Self::lock`]/[`Self::unlock`],
    /// distinct from a tag's own internal state mutex.
    locks: DashMap<TagId, Arc<Semaphore>>,
    held_permits: DashMap<TagId, OwnedSemaphorePermit>,
}

impl PlcTagContext {
    /// Builds a runtime with default configuration and no logging sink
    /// installed (the caller may already have one).
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(cfg: RuntimeConfig) -> Self {
        let registry = Arc::new(TagRegistry::new(cfg.max_tags as usize));
        let pool = Arc::new(SessionPool::new(cfg.clone()));
        let tickler = Tickler::spawn(Arc::clone(&registry), cfg);
        Self {
            registry,
            pool,
            tickler: Some(tickler),
            _log_guard: None,
            locks: DashMap::new(),
            held_permits: DashMap::new(),
        }
    }

    /// Installs a process-wide logger.
    pub fn register_logger(&mut self, sink: logger::LogSink, filter: &str) -> anyhow::Result<()> {
        let guard = logger::init_logger(sink, filter)?;
        self._log_guard = Some(guard);
        Ok(())
    }

    pub fn unregister_logger(&mut self) {
        self._log_guard = None;
    }

    /// Parses a tag attribute string, creates the tag, attaches it to its
    /// session, and kicks off the first read if the PLC family requires one
    /// to learn the tag's size.
    pub async fn create(&self, attr_string: &str) -> PlcResult<TagId> {
        self.create_ex(attr_string, None).await
    }

    /// As [`Self::create`], but with an explicit timeout for the first
    /// read, rather than the context's default socket timeout.
    pub async fn create_ex(&self, attr_string: &str, timeout: Option<std::time::Duration>) -> PlcResult<TagId> {
        let attrs = attr::parse(attr_string)?;
        let tag = Tag::new(attrs);

        let use_connected_msg = tag
            .attrs
            .use_connected_msg
            .unwrap_or_else(|| tag.attrs.plc.default_use_connected_msg());

        let session = self
            .pool
            .get_or_connect(
                &tag.attrs.gateway,
                tag.attrs.port,
                &tag.attrs.path,
                tag.attrs.connection_group_id,
                use_connected_msg,
            )
            .await
            .map_err(|_| PlcError::BadConnection)?;
        tag.attach_session(session).await;

        let id = self.registry.register(tag.clone())?;

        if let Some(t) = timeout {
            let deadline = Deadline::after(t);
            tag.begin_read().await?;
            while deadline.has_time_remaining() {
                match tag.status().await {
                    Ok(()) => return Ok(id),
                    Err(PlcError::Pending) => {
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await
                    },
                    Err(e) => return Err(e),
                }
            }
            return Err(PlcError::Timeout);
        }

        Ok(id)
    }

    /// Starts a read and returns immediately; poll [`Self::status`] for
    /// completion.
    pub async fn read(&self, id: TagId) -> PlcResult<()> {
        let tag = self.registry.lookup(id).ok_or(PlcError::NotFound)?;
        tag.begin_read().await
    }

    /// Reads synchronously, driving the tag to completion within
    /// `timeout`.
    pub async fn read_blocking(&self, id: TagId, timeout: std::time::Duration) -> PlcResult<()> {
        self.read(id).await?;
        self.wait_until_idle(id, timeout).await
    }

    pub async fn write(&self, id: TagId) -> PlcResult<()> {
        let tag = self.registry.lookup(id).ok_or(PlcError::NotFound)?;
        tag.begin_write().await
    }

    pub async fn write_blocking(&self, id: TagId, timeout: std::time::Duration) -> PlcResult<()> {
        self.write(id).await?;
        self.wait_until_idle(id, timeout).await
    }

    async fn wait_until_idle(&self, id: TagId, timeout: std::time::Duration) -> PlcResult<()> {
        let tag = self.registry.lookup(id).ok_or(PlcError::NotFound)?;
        let deadline = Deadline::after(timeout);
        while deadline.has_time_remaining() {
            match tag.status().await {
                Ok(()) => return Ok(()),
                Err(PlcError::Pending) => {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await
                },
                Err(e) => return Err(e),
            }
        }
        Err(PlcError::Timeout)
    }

    pub async fn abort(&self, id: TagId) -> PlcResult<()> {
        let tag = self.registry.lookup(id).ok_or(PlcError::NotFound)?;
        tag.abort().await
    }

    pub async fn status(&self, id: TagId) -> PlcResult<()> {
        let tag = self.registry.lookup(id).ok_or(PlcError::NotFound)?;
        tag.status().await
    }

    /// Acquires the caller-facing per-tag mutex, blocking until it's free.
    /// Distinct from the tag's internal state mutex: this one exists purely
    /// so a caller can bracket several API calls (e.g. a read followed by a
    /// buffer inspection) as one atomic unit from another thread/task's
    /// point of view. Pair with [`Self::unlock`].
    pub async fn lock(&self, id: TagId) -> PlcResult<()> {
        if self.registry.lookup(id).is_none() {
            return Err(PlcError::NotFound);
        }
        let sem = self
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone();
        let permit = sem.acquire_owned().await.map_err(|_| PlcError::MutexLock)?;
        self.held_permits.insert(id, permit);
        Ok(())
    }

    /// Releases a lock taken with [`Self::lock`]. Fails with
    /// [`PlcError::NotAllowed`] if this caller doesn't hold it.
    pub fn unlock(&self, id: TagId) -> PlcResult<()> {
        self.held_permits.remove(&id).map(|_| ()).ok_or(PlcError::NotAllowed)
    }

    /// Writes a single bit inside an otherwise non-bit-sized tag via
    /// Read-Modify-Write.
    pub async fn write_bit(&self, id: TagId, bit: u8, value: bool) -> PlcResult<()> {
        let tag = self.registry.lookup(id).ok_or(PlcError::NotFound)?;
        tag.write_bit(bit, value).await
    }

    /// Registers a callback for `id`'s lifecycle events. Fails with
    /// [`PlcError::Duplicate`] if one is already registered; unregister the
    /// existing one first.
    pub async fn register_callback(
        &self,
        id: TagId,
        cb: impl Fn(TagEvent) + Send + Sync + 'static,
    ) -> PlcResult<()> {
        let tag = self.registry.lookup(id).ok_or(PlcError::NotFound)?;
        tag.register_callback(Box::new(cb)).await
    }

    /// As [`Self::register_callback`], but accepting a user-data token the
    /// caller's closure can capture itself under the native async/closure
    /// model rather than a raw `void *userdata` parameter, since callbacks
    /// here are already `'static` closures.
    pub async fn register_callback_ex<T: Send + Sync + 'static>(
        &self,
        id: TagId,
        userdata: T,
        cb: impl Fn(&T, TagEvent) + Send + Sync + 'static,
    ) -> PlcResult<()> {
        self.register_callback(id, move |ev| cb(&userdata, ev)).await
    }

    pub async fn unregister_callback(&self, id: TagId) -> PlcResult<()> {
        let tag = self.registry.lookup(id).ok_or(PlcError::NotFound)?;
        tag.unregister_callback().await;
        Ok(())
    }

    pub async fn destroy(&self, id: TagId) -> PlcResult<()> {
        let tag = self.registry.remove(id).ok_or(PlcError::NotFound)?;
        tag.destroy().await;
        self.held_permits.remove(&id);
        self.locks.remove(&id);
        Ok(())
    }

    pub async fn with_buffer<R>(&self, id: TagId, f: impl FnOnce(&crate::tag::buffer::TagBuffer) -> R) -> PlcResult<R> {
        let tag = self.registry.lookup(id).ok_or(PlcError::NotFound)?;
        Ok(tag.with_buffer(f).await)
    }

    pub async fn with_buffer_mut<R>(
        &self,
        id: TagId,
        f: impl FnOnce(&mut crate::tag::buffer::TagBuffer) -> R,
    ) -> PlcResult<R> {
        let tag = self.registry.lookup(id).ok_or(PlcError::NotFound)?;
        Ok(tag.with_buffer_mut(f).await)
    }

    /// Tears down every tag, closes every pooled session, and stops the
    /// tickler.
    pub async fn shutdown(mut self) {
        for id in self.registry.iterate_snapshot() {
            if let Some(tag) = self.registry.remove(id) {
                tag.destroy().await;
            }
        }
        self.pool.shutdown_all().await;
        self.held_permits.clear();
        self.locks.clear();
        if let Some(tickler) = self.tickler.take() {
            tickler.shutdown().await;
        }
    }
}

impl Default for PlcTagContext {
    fn default() -> Self {
        Self::new()
    }
}
