//! The result of an active open.
//!
//! An application that connects waits for the handshake to finish while the worker processes the
//! segments. The two meet in a `Completion` that lives next to the connection in its slot. It is
//! resolved at most once per arming, by the worker and with the connection locked. The waiter
//! only ever takes the short lock of the completion itself.
use spin::Mutex;

use crate::layer::{Error, Result};

/// A once-resolved connect result.
#[derive(Debug)]
pub struct Completion {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    generation: u32,
    armed: bool,
    result: Option<Result<()>>,
}

/// Waits for a connect to finish.
///
/// Returned by `Endpoint::connect`.
#[derive(Debug)]
pub struct ConnectWait<'a> {
    completion: &'a Completion,
    generation: u32,
}

impl Completion {
    /// A completion that is not armed.
    pub const fn new() -> Self {
        Completion {
            inner: Mutex::new(Inner {
                generation: 0,
                armed: false,
                result: None,
            }),
        }
    }

    /// Prepare for a new connect attempt of the connection with `generation`.
    pub(crate) fn arm(&self, generation: u32) {
        let mut inner = self.inner.lock();
        inner.generation = generation;
        inner.armed = true;
        inner.result = None;
    }

    /// Resolve the pending connect.
    ///
    /// Returns `false` if nothing waits for this generation or it was already resolved.
    pub(crate) fn resolve(&self, generation: u32, result: Result<()>) -> bool {
        let mut inner = self.inner.lock();
        if !inner.armed || inner.generation != generation || inner.result.is_some() {
            return false;
        }
        inner.result = Some(result);
        true
    }

    /// Whether a connect of `generation` is still waiting for its result.
    pub(crate) fn is_pending(&self, generation: u32) -> bool {
        let inner = self.inner.lock();
        inner.armed && inner.generation == generation && inner.result.is_none()
    }

    fn poll(&self, generation: u32) -> Option<Result<()>> {
        let inner = self.inner.lock();
        if inner.generation != generation {
            // The slot was recycled before the result was taken.
            return Some(Err(Error::Illegal));
        }
        inner.result
    }
}

impl Default for Completion {
    fn default() -> Self {
        Completion::new()
    }
}

impl<'a> ConnectWait<'a> {
    pub(crate) fn new(completion: &'a Completion, generation: u32) -> Self {
        ConnectWait { completion, generation }
    }

    /// The result if the handshake has finished.
    pub fn try_result(&self) -> Option<Result<()>> {
        self.completion.poll(self.generation)
    }

    /// Spin until the handshake has finished.
    ///
    /// This must not be called from the worker context that processes the connection's segments.
    pub fn wait(self) -> Result<()> {
        loop {
            if let Some(result) = self.try_result() {
                return result;
            }
            core::hint::spin_loop();
        }
    }
}
