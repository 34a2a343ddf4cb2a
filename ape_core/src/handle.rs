use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::engine::{Engine, RawHandle};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleKind {
    Decoder,
    Encoder,
}

/// Single owner of one engine handle.
///
/// Every engine call goes through [`HandleSlot::call`], which holds the slot
/// lock for the duration of the call, so at most one call is in flight per
/// handle. The handle is destroyed exactly once: by [`HandleSlot::destroy`]
/// or, failing that, on drop. Afterward the slot is empty and any call is a
/// protocol violation.
pub(crate) struct HandleSlot {
    engine: Arc<dyn Engine>,
    kind: HandleKind,
    slot: Mutex<Option<RawHandle>>,
}

impl HandleSlot {
    pub(crate) fn decoder(engine: Arc<dyn Engine>, handle: RawHandle) -> Self {
        Self::new(engine, HandleKind::Decoder, handle)
    }

    pub(crate) fn encoder(engine: Arc<dyn Engine>, handle: RawHandle) -> Self {
        Self::new(engine, HandleKind::Encoder, handle)
    }

    fn new(engine: Arc<dyn Engine>, kind: HandleKind, handle: RawHandle) -> Self {
        debug!(
            "{} created {:?} handle {:#x}",
            engine.name(),
            kind,
            handle.get()
        );
        Self {
            engine,
            kind,
            slot: Mutex::new(Some(handle)),
        }
    }

    /// Run one engine call against the live handle.
    pub(crate) fn call<R>(&self, f: impl FnOnce(&dyn Engine, RawHandle) -> R) -> Result<R> {
        let guard = self.slot.lock();
        match *guard {
            Some(handle) => Ok(f(self.engine.as_ref(), handle)),
            None => Err(Error::protocol(format!(
                "{:?} handle used after it was destroyed",
                self.kind
            ))),
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Destroy the handle. Returns `false` if it was already gone.
    pub(crate) fn destroy(&self) -> bool {
        let mut guard = self.slot.lock();
        let Some(handle) = guard.take() else {
            return false;
        };
        match self.kind {
            HandleKind::Decoder => self.engine.decompress_destroy(handle),
            HandleKind::Encoder => self.engine.compress_destroy(handle),
        }
        debug!(
            "{} destroyed {:?} handle {:#x}",
            self.engine.name(),
            self.kind,
            handle.get()
        );
        true
    }
}

impl Drop for HandleSlot {
    fn drop(&mut self) {
        self.destroy();
    }
}
