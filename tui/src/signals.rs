//! OS signals as message producers. Nothing user-facing ever runs on a
//! signal handler: each watcher converts its signal into a typed event and
//! enqueues it like any other producer.

use tracing::debug;

use crate::event::Event;
use crate::event::ResizeEvent;
use crate::event::StopSignal;
use crate::runtime::Handle;
use crate::term;

#[cfg(unix)]
pub(crate) fn spawn_watchers<M: Send + 'static>(handle: &Handle<M>) {
    use tokio::signal::unix::SignalKind;
    use tokio::signal::unix::signal;

    let shared = handle.shared().clone();

    // SIGWINCH: re-query the size and enqueue a resize.
    {
        let handle = handle.clone();
        let root = shared.root.clone();
        shared.tracker.spawn(async move {
            let Ok(mut winch) = signal(SignalKind::window_change()) else {
                debug!("SIGWINCH watcher unavailable");
                return;
            };
            loop {
                tokio::select! {
                    _ = root.cancelled() => return,
                    received = winch.recv() => {
                        if received.is_none() {
                            return;
                        }
                        let (width, height) = term::size().unwrap_or((80, 24));
                        if handle
                            .send_event(Event::Resize(ResizeEvent { width, height }))
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            }
        });
    }

    // SIGINT and SIGTERM become stop events the model may veto.
    spawn_stop_watcher(handle, SignalKind::interrupt(), true);
    spawn_stop_watcher(handle, SignalKind::terminate(), false);
}

#[cfg(unix)]
fn spawn_stop_watcher<M: Send + 'static>(
    handle: &Handle<M>,
    kind: tokio::signal::unix::SignalKind,
    interrupt: bool,
) {
    use tokio::signal::unix::signal;

    let handle = handle.clone();
    let root = handle.shared().root.clone();
    handle.shared().tracker.clone().spawn(async move {
        let Ok(mut stream) = signal(kind) else {
            debug!("signal watcher unavailable: {kind:?}");
            return;
        };
        loop {
            tokio::select! {
                _ = root.cancelled() => return,
                received = stream.recv() => {
                    if received.is_none() {
                        return;
                    }
                    let event = if interrupt {
                        Event::SigInt(StopSignal::new())
                    } else {
                        Event::SigTerm(StopSignal::new())
                    };
                    if handle.send_event(event).is_err() {
                        return;
                    }
                }
            }
        }
    });
}

#[cfg(windows)]
pub(crate) fn spawn_watchers<M: Send + 'static>(handle: &Handle<M>) {
    use std::time::Duration;

    let shared = handle.shared().clone();

    // Windows has no SIGWINCH; poll the console size instead.
    {
        let handle = handle.clone();
        let root = shared.root.clone();
        shared.tracker.spawn(async move {
            let mut last = term::size().unwrap_or((80, 24));
            let mut ticker = tokio::time::interval(Duration::from_millis(250));
            loop {
                tokio::select! {
                    _ = root.cancelled() => return,
                    _ = ticker.tick() => {
                        let size = term::size().unwrap_or(last);
                        if size != last {
                            last = size;
                            let (width, height) = size;
                            if handle
                                .send_event(Event::Resize(ResizeEvent { width, height }))
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                }
            }
        });
    }

    // Ctrl+C / Ctrl+Break.
    {
        let handle = handle.clone();
        let root = shared.root.clone();
        shared.tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = root.cancelled() => return,
                    result = tokio::signal::ctrl_c() => {
                        if result.is_err() {
                            return;
                        }
                        if handle.send_event(Event::SigInt(StopSignal::new())).is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }
}
