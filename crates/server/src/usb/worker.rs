//! USB worker thread
//!
//! Dedicated thread that owns the hotplug registration and runs the
//! `libusb_handle_events()` loop. Hotplug callbacks fire on this thread and
//! publish straight into the host's event hub; the Tokio side only
//! ever talks to the thread to stop it.

use rusb::{Context, HotplugBuilder, Registration, UsbContext};
use std::io;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::manager::{HotplugCallback, UsbHost};

/// Commands accepted by the worker thread
#[derive(Debug)]
pub enum WorkerCommand {
    Shutdown,
}

/// USB worker thread
struct UsbWorkerThread {
    context: Context,
    _registration: Option<Registration<Context>>,
    commands: async_channel::Receiver<WorkerCommand>,
    poll_interval: Duration,
}

impl UsbWorkerThread {
    /// Register `callback` for hotplug events on `context`
    ///
    /// Hosts whose libusb lacks hotplug support still get a worker; they just
    /// never publish events.
    fn new(
        context: Context,
        callback: HotplugCallback,
        commands: async_channel::Receiver<WorkerCommand>,
        poll_interval: Duration,
    ) -> Result<Self, rusb::Error> {
        let registration = if rusb::has_hotplug() {
            let registration = HotplugBuilder::new()
                .enumerate(false)
                .register(&context, Box::new(callback))?;
            debug!("Hot-plug callbacks registered");
            Some(registration)
        } else {
            warn!("libusb has no hotplug support, device events disabled");
            None
        };

        Ok(Self {
            context,
            _registration: registration,
            commands,
            poll_interval,
        })
    }

    /// Run until a Shutdown command arrives or the command channel closes
    fn run(self) {
        info!("USB worker thread started");

        loop {
            match self.commands.try_recv() {
                Ok(WorkerCommand::Shutdown) | Err(async_channel::TryRecvError::Closed) => {
                    info!("USB worker shutting down");
                    break;
                }
                Err(async_channel::TryRecvError::Empty) => {}
            }

            match self.context.handle_events(Some(self.poll_interval)) {
                Ok(()) => {}
                Err(rusb::Error::Interrupted) => {
                    debug!("USB event handling interrupted");
                }
                Err(e) => {
                    warn!("Error handling USB events: {}", e);
                    std::thread::sleep(self.poll_interval);
                }
            }
        }

        info!("USB worker thread stopped");
    }
}

/// Owner side of a running worker thread
pub struct UsbWorkerHandle {
    commands: async_channel::Sender<WorkerCommand>,
    thread: JoinHandle<()>,
}

impl UsbWorkerHandle {
    /// Stop the thread and wait for it
    ///
    /// Returns within roughly one poll interval.
    pub fn shutdown(self) {
        let _ = self.commands.send_blocking(WorkerCommand::Shutdown);
        if self.thread.join().is_err() {
            warn!("USB worker thread panicked");
        }
    }
}

/// Spawn the USB worker thread for `host`
///
/// Waits until the thread has registered its hotplug callback, so events are
/// flowing by the time this returns.
pub fn spawn_usb_worker(host: &UsbHost, poll_interval: Duration) -> io::Result<UsbWorkerHandle> {
    let (commands, receiver) = async_channel::bounded(1);
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();
    let context = host.context().clone();
    let callback = host.hotplug_callback();

    let thread = std::thread::Builder::new()
        .name("usb-worker".to_string())
        .spawn(move || {
            match UsbWorkerThread::new(context, callback, receiver, poll_interval) {
                Ok(worker) => {
                    let _ = ready_tx.send(Ok(()));
                    worker.run();
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(UsbWorkerHandle { commands, thread }),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(io::Error::other(e))
        }
        Err(_) => Err(io::Error::other("USB worker thread exited during startup")),
    }
}
