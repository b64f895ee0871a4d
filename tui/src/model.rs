use crate::event::Event;
use crate::runtime::Handle;

/// The application supplied to [`crate::run_tui`]: state plus the triple of
/// callbacks the runtime drives.
///
/// All three callbacks run on a single dedicated task; no two of them ever
/// run concurrently, and messages are delivered to `update` strictly in the
/// order they were enqueued. Callbacks must not block: long work belongs in
/// a worker started with [`Handle::go`] that reports back via messages.
pub trait Model: Send + 'static {
    type Msg: Send + 'static;

    /// Called once before any update. The startup resize event follows
    /// immediately after.
    fn init(&mut self, handle: &Handle<Self::Msg>) {
        let _ = handle;
    }

    fn update(&mut self, handle: &Handle<Self::Msg>, event: Event<Self::Msg>);

    /// Returns the full screen contents; lines are diffed against the
    /// previous frame so returning an unchanged string costs nothing.
    fn view(&self) -> String;
}
