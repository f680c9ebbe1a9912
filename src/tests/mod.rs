use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::{EventLoop, LoopHandle, LoopHost};

mod proxy;

/// Errors seen on a loop's error channel, as `(context, message)`.
pub(crate) type Reported = Arc<Mutex<Vec<(String, String)>>>;

pub(crate) fn capture_errors(handle: &LoopHandle) -> Reported {
    let reported: Reported = Arc::new(Mutex::new(Vec::new()));
    let sink = reported.clone();
    handle.set_error_hook(Arc::new(move |context: &str, err: &(dyn std::error::Error + 'static)| {
        sink.lock().push((context.to_string(), err.to_string()));
    }));
    reported
}

/// An event loop running on its own thread, stopped and joined on drop.
pub(crate) struct LoopThread {
    pub handle: LoopHandle,
    join: Option<JoinHandle<()>>,
}

impl LoopThread {
    pub fn spawn() -> Self {
        let (handle, join) = EventLoop::spawn("loop-under-test").unwrap();
        Self { handle, join: Some(join) }
    }

    /// Returns once everything queued before the call has been processed.
    pub fn flush(&self) {
        let (done_tx, done_rx) = flume::bounded(1);
        self.handle
            .schedule(Box::new(move || {
                let _ = done_tx.send(());
            }))
            .unwrap();
        done_rx.recv().unwrap();
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.handle.quit();
        if let Some(join) = self.join.take() {
            join.join().unwrap();
        }
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub(crate) fn current_thread_name() -> String {
    std::thread::current().name().unwrap_or("<unnamed>").to_string()
}
