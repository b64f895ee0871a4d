//! Full-screen terminal runtime for the quill coding assistant.
//!
//! The caller supplies a [`Model`] (state + `init`/`update`/`view`); the
//! runtime owns the terminal lifecycle, decodes input, serializes every
//! message source into a single FIFO dispatched on one task, and repaints
//! by per-line diffing. Panics inside the model or its workers restore the
//! terminal before being re-raised to the caller of [`run_tui`].

// Forbid accidental stdout/stderr writes in the library: everything the
// runtime prints must go through the acquired terminal writer.
#![deny(clippy::print_stdout, clippy::print_stderr)]

mod event;
mod input;
mod model;
mod render;
mod runtime;
mod signals;
mod term;

use std::sync::Once;

use thiserror::Error;
use tracing::debug;

pub use event::Event;
pub use event::Key;
pub use event::KeyEvent;
pub use event::MouseAction;
pub use event::MouseButton;
pub use event::MouseEvent;
pub use event::ResizeEvent;
pub use event::StopSignal;
pub use model::Model;
pub use runtime::Handle;
pub use runtime::Options;

use crate::input::Decoder;
use crate::render::Renderer;
use crate::runtime::EventLoop;
use crate::runtime::LoopOutcome;
use crate::runtime::Shared;

#[derive(Debug, Error)]
pub enum TuiError {
    /// Neither stdin/stdout nor the controlling terminal is usable.
    #[error("no controlling terminal is available")]
    NoTty,
    /// The runtime was terminated via `interrupt` and the model did not
    /// cancel it.
    #[error("interrupted")]
    Interrupted,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Poll granularity of the input reader; also the window after which a lone
/// ESC byte resolves to the Escape key.
const INPUT_POLL_MS: i32 = 50;

static PANIC_HOOK: Once = Once::new();

/// Runs `model` until it quits, is interrupted, or panics.
///
/// Fails fast with [`TuiError::NoTty`] — making no terminal changes — when
/// no controlling terminal can be acquired. A panic anywhere in the model,
/// its view, or a worker restores the terminal first and is then re-raised
/// so crash reporting sees the original payload.
pub async fn run_tui<M: Model>(model: M, options: Options) -> Result<(), TuiError> {
    let io = term::acquire()?;

    // Restore cooked mode before the default hook prints a crash report.
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            term::emergency_restore();
            previous(info);
        }));
    });

    let term::TerminalIo { mut input, mut output } = io;
    let restore = term::enter(&mut output, options.mouse)?;

    let initial_size = term::size().unwrap_or((80, 24));
    let shared = Shared::new(initial_size);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let handle: Handle<M::Msg> = Handle::new(tx, shared.clone());

    // Input reader: a plain thread doing a blocking poll with a short
    // cancellation tick, feeding the decoder.
    let reader = {
        let handle = handle.clone();
        let root = shared.root.clone();
        std::thread::spawn(move || {
            let mut decoder = Decoder::new();
            let mut buf = [0u8; 1024];
            loop {
                if root.is_cancelled() {
                    break;
                }
                match input.read_timeout(&mut buf, INPUT_POLL_MS) {
                    Ok(0) => {
                        if let Some(event) = decoder.pump_escape()
                            && handle.send_input(event).is_err()
                        {
                            break;
                        }
                    }
                    Ok(n) => {
                        let mut closed = false;
                        for event in decoder.feed(&buf[..n]) {
                            if handle.send_input(event).is_err() {
                                closed = true;
                                break;
                            }
                        }
                        if closed {
                            break;
                        }
                    }
                    Err(err) => {
                        debug!("input reader stopped: {err}");
                        break;
                    }
                }
            }
        })
    };

    signals::spawn_watchers(&handle);

    let frame = std::time::Duration::from_secs_f64(1.0 / f64::from(options.framerate.max(1)));
    let mut event_loop = EventLoop {
        model,
        handle: handle.clone(),
        out: output,
        renderer: Renderer::new(),
        frame,
        mouse: options.mouse,
        restore: Some(restore),
    };

    let outcome = event_loop.run(&mut rx).await;

    runtime::teardown(&shared).await;
    if let Some(mut restore) = event_loop.restore.take() {
        term::exit(&mut event_loop.out, &mut restore);
    }
    drop(rx);
    let _ = reader.join();

    if let Some(payload) = runtime::take_panic(&shared) {
        std::panic::resume_unwind(payload);
    }

    match outcome {
        LoopOutcome::Quit => Ok(()),
        LoopOutcome::Interrupted => Err(TuiError::Interrupted),
        LoopOutcome::Panicked => {
            // The capture slot was empty (already taken); treat as quit.
            Ok(())
        }
    }
}
