//! Outbound "re-examine this dogu" signals
//!
//! Steps never reconcile other dogus directly. They push a reference into this
//! queue and the controller feeds the queue back in as an extra trigger
//! stream, so every dogu still gets one pass at a time.

use kube::runtime::reflector::ObjectRef;
use tokio::sync::mpsc;
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::crd::Dogu;

/// Capacity of the signal queue
pub const SIGNAL_QUEUE_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub struct ReconcileSignals {
    tx: mpsc::Sender<ObjectRef<Dogu>>,
}

impl ReconcileSignals {
    /// Create the queue and its receiving end for the controller
    pub fn channel() -> (Self, mpsc::Receiver<ObjectRef<Dogu>>) {
        let (tx, rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
        (Self { tx }, rx)
    }

    /// Ask for another reconcile pass of the named dogu
    pub fn request(&self, name: &str, namespace: &str) -> Result<()> {
        let object = ObjectRef::<Dogu>::new(name).within(namespace);
        self.tx.try_send(object).map_err(|e| {
            Error::TransientError(format!("cannot enqueue reconcile of dogu {name}: {e}"))
        })?;
        debug!(dogu = name, "Requested reconcile of dependent dogu");
        Ok(())
    }
}
