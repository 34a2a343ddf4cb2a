use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};

use crate::engine::{Engine, LockedRegion};
use crate::error::{Error, Result};
use crate::format::{CompressionLevel, WaveFormat};
use crate::handle::HandleSlot;

/// Parameters for [`EncodeSession::create`].
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub format: WaveFormat,
    /// Upper bound on PCM bytes; `None` when unknown.
    pub max_audio_bytes: Option<u64>,
    pub level: CompressionLevel,
    /// WAV bytes preceding the PCM data; `None` lets the engine synthesise
    /// a header on decompression.
    pub header: Option<Vec<u8>>,
}

impl EncodeOptions {
    pub fn new(format: WaveFormat) -> Self {
        Self {
            format,
            max_audio_bytes: None,
            level: CompressionLevel::default(),
            header: None,
        }
    }

    pub fn with_level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_max_audio_bytes(mut self, max: u64) -> Self {
        self.max_audio_bytes = Some(max);
        self
    }

    pub fn with_header(mut self, header: Vec<u8>) -> Self {
        self.header = Some(header);
        self
    }
}

/// Where an encode session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeState {
    Active,
    /// `finish` succeeded; the output is durable.
    Finished,
    /// `abort` ran; the output is gone.
    Aborted,
}

/// Push-style encoder over one encoder handle.
///
/// # Write contract
/// Call [`write`](Self::write) (copy-in) or [`write_locked`](Self::write_locked)
/// (straight into the engine's buffer) any number of times, then end with
/// [`finish`](Self::finish) or [`abort`](Self::abort). A session dropped while
/// still active is aborted, so a half-written file is never left behind.
pub struct EncodeSession {
    slot: HandleSlot,
    format: WaveFormat,
    output: PathBuf,
    state: EncodeState,
    bytes_submitted: u64,
}

impl EncodeSession {
    /// Create an encoder and start writing `output`.
    ///
    /// If `compress_start` fails the freshly created handle is destroyed
    /// before the error is returned.
    pub fn create(
        engine: Arc<dyn Engine>,
        output: impl AsRef<Path>,
        options: &EncodeOptions,
    ) -> Result<Self> {
        options.format.validate()?;
        let output = output.as_ref();

        let handle = engine.compress_create().map_err(|code| Error::Init { code })?;
        let slot = HandleSlot::encoder(engine, handle);

        slot.call(|engine, h| {
            engine.compress_start(
                h,
                output,
                &options.format,
                options.max_audio_bytes,
                options.level,
                options.header.as_deref(),
            )
        })?
        .map_err(|code| Error::Init { code })?;

        debug!(
            "encoding {:?}: {}, level {}",
            output, options.format, options.level
        );

        Ok(Self {
            slot,
            format: options.format,
            output: output.to_path_buf(),
            state: EncodeState::Active,
            bytes_submitted: 0,
        })
    }

    #[inline]
    pub fn format(&self) -> WaveFormat {
        self.format
    }

    #[inline]
    pub fn state(&self) -> EncodeState {
        self.state
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// PCM bytes accepted by the engine so far.
    pub fn bytes_submitted(&self) -> u64 {
        self.bytes_submitted
    }

    /// Copy-in submission.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_active()?;
        if data.is_empty() {
            return Ok(());
        }
        self.slot
            .call(|engine, h| engine.compress_add_data(h, data))?
            .map_err(|code| Error::Write { code })?;
        self.bytes_submitted += data.len() as u64;
        Ok(())
    }

    /// Free space in the engine's input buffer.
    pub fn buffer_bytes_available(&self) -> Result<usize> {
        self.ensure_active()?;
        self.slot
            .call(|engine, h| engine.compress_buffer_bytes_available(h))?
            .map_err(|code| Error::Write { code })
    }

    /// Lock the engine's input buffer for direct writing.
    pub fn lock_buffer(&mut self) -> Result<BufferLease<'_>> {
        self.ensure_active()?;
        let region = self
            .slot
            .call(|engine, h| engine.compress_lock_buffer(h))?
            .map_err(|code| Error::Write { code })?;
        Ok(BufferLease {
            session: self,
            region,
            released: false,
        })
    }

    /// Submit `data` through locked-buffer leases, one lease per buffer
    /// window. The engine is asked to process whenever a window is filled.
    ///
    /// Returns the number of bytes consumed, which is short only if the
    /// engine keeps reporting a full buffer after processing.
    pub fn write_locked(&mut self, data: &[u8]) -> Result<usize> {
        let mut consumed = 0;
        let mut stalled = false;
        while consumed < data.len() {
            let mut lease = self.lock_buffer()?;
            let capacity = lease.capacity();
            if capacity == 0 {
                lease.commit(0, true)?;
                if stalled {
                    warn!("engine buffer stayed full after processing; {consumed} bytes accepted");
                    break;
                }
                stalled = true;
                continue;
            }
            stalled = false;

            let n = capacity.min(data.len() - consumed);
            lease.as_mut_slice()[..n].copy_from_slice(&data[consumed..consumed + n]);
            lease.commit(n, n == capacity)?;
            consumed += n;
        }
        Ok(consumed)
    }

    /// Flush and finalize the output, then destroy the handle.
    ///
    /// `terminating` is appended after the audio; its first
    /// `wav_terminating_bytes` bytes are restored after the PCM data of a
    /// decoded WAV, the rest (typically a tag) is not.
    pub fn finish(&mut self, terminating: &[u8], wav_terminating_bytes: usize) -> Result<()> {
        self.ensure_active()?;
        if wav_terminating_bytes > terminating.len() {
            return Err(Error::protocol(format!(
                "{} WAV terminating bytes declared but only {} supplied",
                wav_terminating_bytes,
                terminating.len()
            )));
        }
        self.slot
            .call(|engine, h| engine.compress_finish(h, terminating, wav_terminating_bytes))?
            .map_err(|code| Error::Finalize { code })?;
        self.state = EncodeState::Finished;
        self.slot.destroy();
        debug!(
            "finished {:?} after {} PCM bytes",
            self.output, self.bytes_submitted
        );
        Ok(())
    }

    /// Stop encoding, discard the partial output, and destroy the handle.
    /// A no-op on an already aborted session.
    pub fn abort(&mut self) -> Result<()> {
        match self.state {
            EncodeState::Aborted => return Ok(()),
            EncodeState::Finished => {
                return Err(Error::protocol("cannot abort a finished encode session"))
            }
            EncodeState::Active => {}
        }
        self.slot
            .call(|engine, h| engine.compress_kill(h))?
            .map_err(|code| Error::Finalize { code })?;
        self.state = EncodeState::Aborted;
        self.slot.destroy();
        debug!("aborted {:?}", self.output);
        Ok(())
    }

    /// End the session. An active session is aborted first. Calling again is
    /// a no-op.
    pub fn close(&mut self) -> Result<()> {
        let result = if self.state == EncodeState::Active && self.slot.is_live() {
            warn!(
                "encode session for {:?} closed without finish; aborting",
                self.output
            );
            self.abort()
        } else {
            Ok(())
        };
        self.slot.destroy();
        result
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            EncodeState::Active => Ok(()),
            state => Err(Error::protocol(format!(
                "encode session is already {state:?}"
            ))),
        }
    }
}

impl Drop for EncodeSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("abort of {:?} during drop failed: {}", self.output, e);
        }
    }
}

impl io::Write for EncodeSession {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_locked(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ── Buffer lease ───────────────────────────────────────────────────────────

/// Writable window into the engine's input buffer, valid until committed or
/// dropped.
///
/// The lease borrows the session mutably, so no other session call can run
/// while it is outstanding. Dropping it without [`commit`](Self::commit)
/// unlocks the buffer with zero bytes added.
pub struct BufferLease<'a> {
    session: &'a mut EncodeSession,
    region: LockedRegion,
    released: bool,
}

impl BufferLease<'_> {
    /// Bytes the engine will accept in this window.
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the buffer stays locked until `unlock`, which needs `self`
        // and therefore ends this borrow first.
        unsafe { self.region.as_mut_slice() }
    }

    /// Unlock, reporting `bytes_added` written at the start of the window.
    ///
    /// Reporting more than [`capacity`](Self::capacity) is a protocol
    /// violation: the buffer is unlocked with nothing added and the error is
    /// returned.
    pub fn commit(mut self, bytes_added: usize, process: bool) -> Result<()> {
        if bytes_added > self.capacity() {
            let capacity = self.capacity();
            if let Err(e) = self.unlock(0, false) {
                warn!("unlock after rejected lease commit failed: {}", e);
            }
            return Err(Error::protocol(format!(
                "lease commit reported {bytes_added} bytes but only {capacity} were leased"
            )));
        }
        self.unlock(bytes_added, process)
    }

    fn unlock(&mut self, bytes_added: usize, process: bool) -> Result<()> {
        self.released = true;
        self.session
            .slot
            .call(|engine, h| engine.compress_unlock_buffer(h, bytes_added, process))?
            .map_err(|code| Error::Write { code })?;
        self.session.bytes_submitted += bytes_added as u64;
        debug!("lease committed {} of {} bytes", bytes_added, self.capacity());
        Ok(())
    }
}

impl Drop for BufferLease<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.unlock(0, false) {
                warn!("unlock of abandoned lease failed: {}", e);
            }
        }
    }
}
