// Poisoned mutex should fail the program
#![allow(clippy::unwrap_used)]

use std::any::Any;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;
use tracing::warn;

use crate::event::Event;
use crate::event::ResizeEvent;
use crate::event::StopSignal;
use crate::input::InputEvent;
use crate::model::Model;
use crate::render::Renderer;
use crate::term;
use crate::term::RestoreStack;

/// Runtime tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Maximum repaint rate; renders are coalesced to at most one per
    /// `1/framerate` seconds.
    pub framerate: u32,
    /// Enables mouse cell-motion + SGR reporting.
    pub mouse: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            framerate: 30,
            mouse: false,
        }
    }
}

/// Messages travelling from producers to the model task.
pub(crate) enum Control<M> {
    Event(Event<M>),
    Suspend,
    /// A `go` worker panicked; the payload is already in the capture slot.
    WorkerPanic,
}

pub(crate) struct Shared {
    pub(crate) root: CancellationToken,
    pub(crate) tracker: TaskTracker,
    size: Mutex<(u16, u16)>,
    closers: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    panic_slot: Mutex<Option<Box<dyn Any + Send>>>,
    suspend_pending: std::sync::atomic::AtomicBool,
}

impl Shared {
    pub(crate) fn new(size: (u16, u16)) -> Arc<Self> {
        Arc::new(Self {
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            size: Mutex::new(size),
            closers: Mutex::new(Vec::new()),
            panic_slot: Mutex::new(None),
            suspend_pending: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// First panic wins; later captures are dropped.
    fn capture_panic(&self, payload: Box<dyn Any + Send>) {
        let mut slot = self.panic_slot.lock().unwrap();
        if slot.is_none() {
            *slot = Some(payload);
        }
    }

    fn take_panic(&self) -> Option<Box<dyn Any + Send>> {
        self.panic_slot.lock().unwrap().take()
    }
}

/// Clonable handle through which the model (and its workers) talk back to
/// the runtime. All operations are non-blocking and safe to call after the
/// runtime has stopped; they become no-ops.
pub struct Handle<M> {
    tx: mpsc::UnboundedSender<Control<M>>,
    shared: Arc<Shared>,
}

impl<M> Clone for Handle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: Send + 'static> Handle<M> {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Control<M>>, shared: Arc<Shared>) -> Self {
        Self { tx, shared }
    }

    /// Enqueues a user message for `update`. Messages from one caller are
    /// delivered in the order they were sent.
    pub fn send(&self, msg: M) {
        let _ = self.tx.send(Control::Event(Event::User(msg)));
    }

    /// Requests an orderly shutdown. The model receives `SigTerm` and may
    /// veto it via the stop signal; repeated calls are no-ops once the
    /// runtime is stopping.
    pub fn quit(&self) {
        let _ = self.tx.send(Control::Event(Event::SigTerm(StopSignal::new())));
    }

    /// Like `quit`, but the runtime reports `Interrupted` to its caller.
    pub fn interrupt(&self) {
        let _ = self.tx.send(Control::Event(Event::SigInt(StopSignal::new())));
    }

    /// Suspends the process (Unix job control). Idempotent while a suspend
    /// is already pending; a no-op on Windows.
    pub fn suspend(&self) {
        use std::sync::atomic::Ordering;
        if !self.shared.suspend_pending.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(Control::Suspend);
        }
    }

    /// Current terminal size as of the last resize.
    pub fn size(&self) -> (u16, u16) {
        *self.shared.size.lock().unwrap()
    }

    /// Registers a closer invoked at teardown. Closers run in LIFO order,
    /// after all workers and timers have stopped.
    pub fn on_stop(&self, closer: impl FnOnce() + Send + 'static) {
        self.shared.closers.lock().unwrap().push(Box::new(closer));
    }

    /// Spawns a tracked worker. Its token is canceled when the worker
    /// returns or when the runtime stops, whichever comes first; teardown
    /// waits for the worker to finish. A panicking worker takes the runtime
    /// down with its original panic payload.
    pub fn go<F, Fut>(&self, f: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.shared.root.child_token();
        let shared = Arc::clone(&self.shared);
        let tx = self.tx.clone();
        self.shared.tracker.spawn(async move {
            let result = AssertUnwindSafe(f(token.clone())).catch_unwind().await;
            token.cancel();
            if let Err(payload) = result {
                warn!("worker panicked; shutting the runtime down");
                shared.capture_panic(payload);
                let _ = tx.send(Control::WorkerPanic);
            }
        });
    }

    /// Delivers `msg` once after `delay`, unless the runtime stops first.
    pub fn send_once_after(&self, delay: Duration, msg: M) {
        let handle = self.clone();
        self.shared.tracker.spawn(async move {
            tokio::select! {
                _ = handle.shared.root.cancelled() => {}
                _ = tokio::time::sleep(delay) => handle.send(msg),
            }
        });
    }

    /// Delivers `make()` every `period` until the runtime stops.
    pub fn send_periodically(&self, period: Duration, make: impl Fn() -> M + Send + 'static) {
        let handle = self.clone();
        self.shared.tracker.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick of a tokio interval is immediate; skip it so
            // the first message arrives one period from now.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = handle.shared.root.cancelled() => return,
                    _ = ticker.tick() => handle.send(make()),
                }
            }
        });
    }

    pub(crate) fn send_event(&self, event: Event<M>) -> Result<(), ()> {
        self.tx.send(Control::Event(event)).map_err(|_| ())
    }

    pub(crate) fn send_input(&self, input: InputEvent) -> Result<(), ()> {
        let event = match input {
            InputEvent::Key(key) => Event::Key(key),
            InputEvent::Mouse(mouse) => Event::Mouse(mouse),
        };
        self.send_event(event)
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

/// Why the event loop stopped.
pub(crate) enum LoopOutcome {
    Quit,
    Interrupted,
    Panicked,
}

/// The single-consumer model task. `restore` is `None` in headless tests,
/// where suspend degrades to a resume notification.
pub(crate) struct EventLoop<M: Model, W: Write> {
    pub(crate) model: M,
    pub(crate) handle: Handle<M::Msg>,
    pub(crate) out: W,
    pub(crate) renderer: Renderer,
    pub(crate) frame: Duration,
    pub(crate) mouse: bool,
    pub(crate) restore: Option<RestoreStack>,
}

impl<M: Model, W: Write> EventLoop<M, W> {
    pub(crate) async fn run(
        &mut self,
        rx: &mut mpsc::UnboundedReceiver<Control<M::Msg>>,
    ) -> LoopOutcome {
        let shared = Arc::clone(self.handle.shared());

        // Init, then the startup resize, before anything else can reach
        // update.
        if self.call_model(|model, handle| model.init(handle)).is_err() {
            return LoopOutcome::Panicked;
        }
        let (width, height) = self.handle.size();
        if self
            .dispatch(Event::Resize(ResizeEvent { width, height }))
            .is_err()
        {
            return LoopOutcome::Panicked;
        }
        let mut dirty = true;

        let mut ticker = tokio::time::interval(self.frame);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                control = rx.recv() => {
                    let Some(control) = control else {
                        // Every producer is gone; nothing further can happen.
                        return LoopOutcome::Quit;
                    };
                    match control {
                        Control::Event(event) => {
                            match self.handle_event(event) {
                                Ok(None) => dirty = true,
                                Ok(Some(outcome)) => return outcome,
                                Err(()) => return LoopOutcome::Panicked,
                            }
                        }
                        Control::Suspend => {
                            if self.do_suspend().is_err() {
                                return LoopOutcome::Panicked;
                            }
                            dirty = true;
                        }
                        Control::WorkerPanic => return LoopOutcome::Panicked,
                    }
                }
                _ = ticker.tick(), if dirty => {
                    let view = match std::panic::catch_unwind(AssertUnwindSafe(|| self.model.view())) {
                        Ok(view) => view,
                        Err(payload) => {
                            shared.capture_panic(payload);
                            return LoopOutcome::Panicked;
                        }
                    };
                    if let Err(err) = self.renderer.render(&mut self.out, &view) {
                        debug!("render failed: {err}");
                    }
                    dirty = false;
                }
            }
        }
    }

    /// Returns `Ok(Some(outcome))` when the event ends the runtime.
    fn handle_event(&mut self, event: Event<M::Msg>) -> Result<Option<LoopOutcome>, ()> {
        match event {
            Event::Resize(resize) => {
                *self.handle.shared().size.lock().unwrap() = (resize.width, resize.height);
                self.renderer.request_full_redraw();
                self.dispatch(Event::Resize(resize))?;
                Ok(None)
            }
            Event::SigInt(signal) => {
                self.dispatch(Event::SigInt(signal.clone()))?;
                if signal.is_canceled() {
                    Ok(None)
                } else {
                    Ok(Some(LoopOutcome::Interrupted))
                }
            }
            Event::SigTerm(signal) => {
                self.dispatch(Event::SigTerm(signal.clone()))?;
                if signal.is_canceled() {
                    Ok(None)
                } else {
                    Ok(Some(LoopOutcome::Quit))
                }
            }
            event => {
                self.dispatch(event)?;
                Ok(None)
            }
        }
    }

    fn do_suspend(&mut self) -> Result<(), ()> {
        self.handle
            .shared()
            .suspend_pending
            .store(false, std::sync::atomic::Ordering::SeqCst);
        if let Some(stack) = &mut self.restore {
            if let Err(err) = term::suspend(&mut self.out, stack, self.mouse) {
                debug!("suspend failed: {err}");
            }
            if let Ok(size) = term::size() {
                *self.handle.shared().size.lock().unwrap() = size;
            }
        }
        // The resume event is only delivered once the terminal has been
        // re-entered above.
        self.renderer.request_full_redraw();
        self.dispatch(Event::SigResume)
    }

    fn dispatch(&mut self, event: Event<M::Msg>) -> Result<(), ()> {
        self.call_model(|model, handle| model.update(handle, event))
    }

    fn call_model(&mut self, f: impl FnOnce(&mut M, &Handle<M::Msg>)) -> Result<(), ()> {
        let handle = self.handle.clone();
        let model = &mut self.model;
        match std::panic::catch_unwind(AssertUnwindSafe(|| f(model, &handle))) {
            Ok(()) => Ok(()),
            Err(payload) => {
                self.handle.shared().capture_panic(payload);
                Err(())
            }
        }
    }
}

/// Runs the full teardown protocol: cancel the root context, wait for every
/// worker and timer, run stop-closers in LIFO order.
pub(crate) async fn teardown(shared: &Arc<Shared>) {
    shared.root.cancel();
    shared.tracker.close();
    shared.tracker.wait().await;
    let closers = std::mem::take(&mut *shared.closers.lock().unwrap());
    for closer in closers.into_iter().rev() {
        closer();
    }
}

pub(crate) fn take_panic(shared: &Arc<Shared>) -> Option<Box<dyn Any + Send>> {
    shared.take_panic()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::event::Key;
    use crate::event::KeyEvent;

    /// Records everything it sees; optionally vetoes the first stop signal
    /// and panics on a magic message.
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
        veto_first_stop: bool,
        vetoed: bool,
    }

    impl Recorder {
        fn new(seen: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                seen,
                veto_first_stop: false,
                vetoed: false,
            }
        }
    }

    impl Model for Recorder {
        type Msg = String;

        fn update(&mut self, _handle: &Handle<String>, event: Event<String>) {
            let label = match &event {
                Event::Key(k) => format!("key:{:?}", k.key),
                Event::Mouse(_) => "mouse".to_string(),
                Event::Resize(r) => format!("resize:{}x{}", r.width, r.height),
                Event::SigInt(signal) => {
                    if self.veto_first_stop && !self.vetoed {
                        self.vetoed = true;
                        signal.cancel();
                    }
                    "sigint".to_string()
                }
                Event::SigTerm(_) => "sigterm".to_string(),
                Event::SigResume => "resume".to_string(),
                Event::User(msg) => {
                    if msg == "boom" {
                        panic!("model exploded");
                    }
                    format!("user:{msg}")
                }
            };
            self.seen.lock().unwrap().push(label);
        }

        fn view(&self) -> String {
            let seen = self.seen.lock().unwrap();
            format!("{} events", seen.len())
        }
    }

    type Harness = (
        Handle<String>,
        mpsc::UnboundedReceiver<Control<String>>,
        EventLoop<Recorder, Vec<u8>>,
    );

    fn harness(model: Recorder) -> Harness {
        let shared = Shared::new((80, 24));
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Handle::new(tx, shared);
        let event_loop = EventLoop {
            model,
            handle: handle.clone(),
            out: Vec::new(),
            renderer: Renderer::new(),
            frame: Duration::from_millis(10),
            mouse: false,
            restore: None,
        };
        (handle, rx, event_loop)
    }

    #[tokio::test]
    async fn startup_resize_precedes_all_other_updates() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (handle, mut rx, mut event_loop) = harness(Recorder::new(seen.clone()));

        handle.send("early".to_string());
        handle.quit();
        let outcome = event_loop.run(&mut rx).await;
        assert!(matches!(outcome, LoopOutcome::Quit));

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], "resize:80x24");
        assert_eq!(seen[1], "user:early");
        assert_eq!(seen[2], "sigterm");
    }

    #[tokio::test]
    async fn single_producer_messages_arrive_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (handle, mut rx, mut event_loop) = harness(Recorder::new(seen.clone()));

        for i in 0..100 {
            handle.send(format!("{i}"));
        }
        handle.quit();
        event_loop.run(&mut rx).await;

        let seen = seen.lock().unwrap();
        let users: Vec<&String> = seen.iter().filter(|s| s.starts_with("user:")).collect();
        assert_eq!(users.len(), 100);
        for (i, label) in users.iter().enumerate() {
            assert_eq!(**label, format!("user:{i}"));
        }
    }

    #[tokio::test]
    async fn interrupt_reports_interrupted_unless_canceled() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (handle, mut rx, mut event_loop) = harness(Recorder::new(seen.clone()));
        handle.interrupt();
        assert!(matches!(event_loop.run(&mut rx).await, LoopOutcome::Interrupted));

        // With a veto, the first interrupt is survivable.
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut model = Recorder::new(seen.clone());
        model.veto_first_stop = true;
        let (handle, mut rx, mut event_loop) = harness(model);
        handle.interrupt();
        handle.interrupt();
        assert!(matches!(event_loop.run(&mut rx).await, LoopOutcome::Interrupted));
        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.iter().filter(|s| *s == "sigint").count(),
            2,
            "both interrupts reach the model"
        );
    }

    #[tokio::test]
    async fn resize_events_update_the_size_cache_and_force_redraw() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (handle, mut rx, mut event_loop) = harness(Recorder::new(seen.clone()));

        handle
            .send_event(Event::Resize(ResizeEvent {
                width: 120,
                height: 40,
            }))
            .ok();
        handle.quit();
        event_loop.run(&mut rx).await;
        assert_eq!(handle.size(), (120, 40));
        assert!(seen.lock().unwrap().contains(&"resize:120x40".to_string()));
    }

    #[tokio::test]
    async fn key_events_reach_the_model() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (handle, mut rx, mut event_loop) = harness(Recorder::new(seen.clone()));

        handle
            .send_input(InputEvent::Key(KeyEvent::key(Key::Enter)))
            .ok();
        handle.quit();
        event_loop.run(&mut rx).await;
        assert!(seen.lock().unwrap().contains(&"key:Enter".to_string()));
    }

    #[tokio::test]
    async fn model_panic_is_captured_for_reraise() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (handle, mut rx, mut event_loop) = harness(Recorder::new(seen));

        handle.send("boom".to_string());
        assert!(matches!(event_loop.run(&mut rx).await, LoopOutcome::Panicked));

        let payload = take_panic(event_loop.handle.shared()).expect("panic captured");
        let message = payload.downcast_ref::<&str>().copied().unwrap_or_default();
        assert_eq!(message, "model exploded");
    }

    #[tokio::test]
    async fn worker_panic_takes_the_runtime_down() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (handle, mut rx, mut event_loop) = harness(Recorder::new(seen));

        handle.go(|_token| async move {
            panic!("worker exploded");
        });
        assert!(matches!(event_loop.run(&mut rx).await, LoopOutcome::Panicked));
        assert!(take_panic(event_loop.handle.shared()).is_some());
    }

    #[tokio::test]
    async fn workers_and_timers_are_awaited_and_closers_run_lifo() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (handle, mut rx, mut event_loop) = harness(Recorder::new(seen));

        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let order = order.clone();
            handle.on_stop(move || order.lock().unwrap().push(label));
        }

        let worker_done = Arc::new(AtomicUsize::new(0));
        {
            let worker_done = worker_done.clone();
            handle.go(move |token| async move {
                token.cancelled().await;
                worker_done.fetch_add(1, Ordering::SeqCst);
            });
        }

        handle.quit();
        event_loop.run(&mut rx).await;
        teardown(event_loop.handle.shared()).await;

        assert_eq!(worker_done.load(Ordering::SeqCst), 1, "worker was awaited");
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[tokio::test(start_paused = true)]
    async fn timers_deliver_messages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (handle, mut rx, mut event_loop) = harness(Recorder::new(seen.clone()));

        handle.send_once_after(Duration::from_millis(50), "timer".to_string());
        let handle2 = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle2.quit();
        });
        event_loop.run(&mut rx).await;
        assert!(seen.lock().unwrap().contains(&"user:timer".to_string()));
    }

    #[tokio::test]
    async fn suspend_without_terminal_still_delivers_resume() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (handle, mut rx, mut event_loop) = harness(Recorder::new(seen.clone()));

        handle.suspend();
        // A second suspend while one is pending coalesces into it.
        handle.suspend();
        handle.quit();
        event_loop.run(&mut rx).await;
        let seen = seen.lock().unwrap();
        assert_eq!(seen.iter().filter(|s| *s == "resume").count(), 1);
    }

    #[tokio::test]
    async fn frames_are_rendered_between_updates() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (handle, mut rx, mut event_loop) = harness(Recorder::new(seen));

        handle.send("one".to_string());
        let handle2 = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle2.quit();
        });
        event_loop.run(&mut rx).await;
        let painted = String::from_utf8_lossy(&event_loop.out).into_owned();
        assert!(painted.contains("events"), "got {painted:?}");
    }
}
