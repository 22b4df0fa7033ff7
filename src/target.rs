//! The supervised entry point and the thread that runs it.

use crate::error::ReloaderError;
use crate::trigger::ReloadTrigger;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use tokio::sync::oneshot;

/// Exit status of a child whose entry point panicked.
pub const PANIC_EXIT_CODE: i32 = 101;

/// What the entry point receives when it is started.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub args: Vec<String>,
    pub kwargs: BTreeMap<String, String>,
    /// This generation's reload trigger.
    pub trigger: ReloadTrigger,
}

impl Invocation {
    /// Ask the control loop to restart the child.
    pub fn request_reload(&self) {
        self.trigger.set();
    }

    pub fn kwarg(&self, key: &str) -> Option<&str> {
        self.kwargs.get(key).map(String::as_str)
    }
}

/// The supervised program. Its return value is the child's exit status.
pub type EntryPoint = Box<dyn FnOnce(Invocation) -> i32 + Send + 'static>;

/// How the entry point ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Finished(i32),
    Panicked(String),
}

/// Receiving end of the entry point's outcome, written exactly once.
#[derive(Debug)]
pub struct TargetHandle {
    rx: oneshot::Receiver<Outcome>,
}

impl TargetHandle {
    /// Non-blocking poll for the outcome.
    pub fn try_outcome(&mut self) -> Option<Outcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Outcome::Panicked(
                "target thread ended without reporting an outcome".to_string(),
            )),
        }
    }
}

/// Run `entry` on its own OS thread.
///
/// The thread is detached: it is never joined or cancelled, and dies with
/// the process.
pub fn spawn_target(
    entry: EntryPoint,
    invocation: Invocation,
) -> Result<TargetHandle, ReloaderError> {
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("reloader-target".to_string())
        .spawn(move || {
            let run = AssertUnwindSafe(move || entry(invocation));
            let outcome = match std::panic::catch_unwind(run) {
                Ok(code) => Outcome::Finished(code),
                Err(payload) => Outcome::Panicked(panic_message(&*payload)),
            };
            let _ = tx.send(outcome);
        })
        .map_err(|e| ReloaderError::TargetThread { source: e })?;
    Ok(TargetHandle { rx })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
