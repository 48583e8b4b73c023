//! Hand-rolled test doubles shared by unit and integration tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use relayhub_core::{Error, Result};

use crate::surface::{
    BindingId, SignalCallback, SignalOutlet, Surface, SurfaceMessage, SurfaceSignal,
};

/// In-memory surface that records every delivered message.
///
/// Visibility flags track the signals raised through [`FakeSurface::raise`],
/// mirroring how a real window manager keeps window state and signal
/// emission consistent.
pub struct FakeSurface {
    id: String,
    visible: AtomicBool,
    minimized: AtomicBool,
    fail_sends: AtomicBool,
    outlet: SignalOutlet,
    sent: Mutex<Vec<SurfaceMessage>>,
}

impl FakeSurface {
    /// Visible, un-minimized surface
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            visible: AtomicBool::new(true),
            minimized: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            outlet: SignalOutlet::new(),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Surface that starts hidden
    pub fn hidden(id: impl Into<String>) -> Arc<Self> {
        let surface = Self::new(id);
        surface.visible.store(false, Ordering::SeqCst);
        surface
    }

    /// Make every subsequent `send` fail
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Raise a lifecycle signal, updating the visibility flags first so
    /// queries during dispatch observe the post-transition state.
    pub fn raise(&self, signal: SurfaceSignal) {
        match signal {
            SurfaceSignal::Shown => self.visible.store(true, Ordering::SeqCst),
            SurfaceSignal::Hidden => self.visible.store(false, Ordering::SeqCst),
            SurfaceSignal::Minimized => self.minimized.store(true, Ordering::SeqCst),
            SurfaceSignal::Restored => self.minimized.store(false, Ordering::SeqCst),
            _ => {}
        }
        self.outlet.raise(signal);
    }

    pub fn sent(&self) -> Vec<SurfaceMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn total_bindings(&self) -> usize {
        self.outlet.total_bindings()
    }
}

impl Surface for FakeSurface {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    fn is_minimized(&self) -> bool {
        self.minimized.load(Ordering::SeqCst)
    }

    fn send(&self, message: SurfaceMessage) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::surface_send(format!("{} is gone", self.id)));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn on(&self, signal: SurfaceSignal, callback: SignalCallback) -> BindingId {
        self.outlet.on(signal, callback)
    }

    fn off(&self, signal: SurfaceSignal, binding: BindingId) {
        self.outlet.off(signal, binding)
    }
}
