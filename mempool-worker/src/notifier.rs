//! Fire-and-forget owner notifications. Ref/unref messages and advisory
//! read records are queued on an unbounded channel and dispatched by a
//! dedicated thread; a failed send is logged and dropped, never retried.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::warn;

use mempool_exports::PoolRpc;
use mempool_models::reference::DRef;
use mempool_models::worker::WorkerId;

/// A queued notification. Commands carry owned copies of the reference
/// identity, never borrows of caller state.
pub(crate) enum NotifierCommand {
    /// first local materialization of a remotely-owned ref
    Ref { target: WorkerId, dref: DRef },
    /// last local materialization dropped
    Unref { target: WorkerId, dref: DRef },
    /// a dref was created here by reading a file
    Read {
        target: WorkerId,
        file: PathBuf,
        dref: DRef,
    },
    /// stop the worker after draining what was queued before this command
    Stop,
}

pub(crate) struct NotifierWorker {
    receiver: Receiver<NotifierCommand>,
    rpc: Arc<dyn PoolRpc>,
}

impl NotifierWorker {
    /// Starts the notifier thread and returns the command sender and the
    /// handle to join on stop.
    pub(crate) fn spawn(rpc: Arc<dyn PoolRpc>) -> (Sender<NotifierCommand>, JoinHandle<()>) {
        let (tx, rx) = unbounded();
        let handle = std::thread::Builder::new()
            .name("pool-notifier".to_string())
            .spawn(move || {
                NotifierWorker { receiver: rx, rpc }.run();
            })
            .expect("could not spawn pool notifier thread");
        (tx, handle)
    }

    fn run(&mut self) {
        loop {
            match self.receiver.recv() {
                Ok(NotifierCommand::Stop) => break,
                Ok(command) => self.dispatch(command),
                // all senders dropped => quit
                Err(_) => break,
            }
        }
    }

    fn dispatch(&self, command: NotifierCommand) {
        match command {
            NotifierCommand::Ref { target, dref } => {
                if let Err(err) = self.rpc.ref_at_owner(target, dref) {
                    warn!(
                        "could not notify {} of new reference to {} (potential leak): {}",
                        target, dref, err
                    );
                }
            }
            NotifierCommand::Unref { target, dref } => {
                if let Err(err) = self.rpc.unref_at_owner(target, dref) {
                    warn!(
                        "could not notify {} of dropped reference to {} (potential leak): {}",
                        target, dref, err
                    );
                }
            }
            NotifierCommand::Read { target, file, dref } => {
                if let Err(err) = self.rpc.record_read(target, file, dref) {
                    warn!("could not record file read on {}: {}", target, err);
                }
            }
            NotifierCommand::Stop => {}
        }
    }
}
