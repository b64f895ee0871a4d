//! Per-line diff renderer. Each frame the model's `view()` string is split
//! on newlines and compared against the previously painted lines; only the
//! rows that changed are repainted. When the visible width of a changed
//! line matches the old one it is overwritten in place, otherwise the row
//! is cleared first so no stale cells survive.

use std::io::Write;

use crossterm::cursor::MoveTo;
use crossterm::queue;
use crossterm::style::Print;
use crossterm::terminal::Clear;
use crossterm::terminal::ClearType;

use quill_common::visible_width;

#[derive(Debug, Default)]
pub struct Renderer {
    last_lines: Vec<String>,
    full_redraw_pending: bool,
}

impl Renderer {
    pub fn new() -> Self {
        Self {
            last_lines: Vec::new(),
            // The first frame always paints from a cleared screen.
            full_redraw_pending: true,
        }
    }

    /// Forces the next frame to clear the screen first. Set on startup,
    /// after resume-from-suspend, and after any resize.
    pub fn request_full_redraw(&mut self) {
        self.full_redraw_pending = true;
    }

    pub fn render(&mut self, w: &mut impl Write, view: &str) -> std::io::Result<()> {
        let new_lines: Vec<String> = view.split('\n').map(str::to_string).collect();

        if self.full_redraw_pending {
            self.full_redraw_pending = false;
            queue!(w, Clear(ClearType::All))?;
            for (i, line) in new_lines.iter().enumerate() {
                queue!(w, MoveTo(0, i as u16), Print(line))?;
            }
            self.last_lines = new_lines;
            return w.flush();
        }

        let rows = self.last_lines.len().max(new_lines.len());
        for i in 0..rows {
            let old = self.last_lines.get(i);
            let new = new_lines.get(i);
            match (old, new) {
                (Some(old), Some(new)) if old == new => {}
                (old, Some(new)) => {
                    queue!(w, MoveTo(0, i as u16))?;
                    let same_width =
                        old.is_some_and(|old| visible_width(old) == visible_width(new));
                    if !same_width {
                        queue!(w, Clear(ClearType::CurrentLine))?;
                    }
                    queue!(w, Print(new))?;
                }
                (Some(_), None) => {
                    // Line present previously and absent now.
                    queue!(w, MoveTo(0, i as u16), Clear(ClearType::CurrentLine))?;
                }
                (None, None) => {}
            }
        }

        self.last_lines = new_lines;
        w.flush()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use pretty_assertions::assert_eq;

    use super::*;

    const CLEAR_ALL: &str = "\u{1b}[2J";
    const CLEAR_LINE: &str = "\u{1b}[2K";

    fn render_to_string(renderer: &mut Renderer, view: &str) -> String {
        let mut out = Vec::new();
        renderer.render(&mut out, view).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn move_to(row: u16, col: u16) -> String {
        format!("\u{1b}[{row};{col}H")
    }

    #[test]
    fn first_frame_clears_and_paints_everything() {
        let mut renderer = Renderer::new();
        let out = render_to_string(&mut renderer, "a\nb");
        assert!(out.contains(CLEAR_ALL));
        assert!(out.contains("a"));
        assert!(out.contains("b"));
    }

    #[test]
    fn equal_width_change_overwrites_in_place() {
        let mut renderer = Renderer::new();
        render_to_string(&mut renderer, "a\nb");

        let out = render_to_string(&mut renderer, "a\nc");
        // Move to row 2 column 1, write the new line, no clears, and no
        // repaint of the unchanged first row.
        assert!(out.contains(&move_to(2, 1)), "got {out:?}");
        assert!(out.contains("c"));
        assert!(!out.contains(CLEAR_ALL));
        assert!(!out.contains(CLEAR_LINE));
        assert!(!out.contains(&move_to(1, 1)));
        assert!(!out.contains('a'));
    }

    #[test]
    fn width_change_clears_the_row_first() {
        let mut renderer = Renderer::new();
        render_to_string(&mut renderer, "short");

        let out = render_to_string(&mut renderer, "a much longer line");
        assert!(out.contains(CLEAR_LINE));
        assert!(out.contains("a much longer line"));
    }

    #[test]
    fn removed_trailing_lines_are_cleared() {
        let mut renderer = Renderer::new();
        render_to_string(&mut renderer, "a\nb\nc");

        let out = render_to_string(&mut renderer, "a");
        assert!(out.contains(&move_to(2, 1)));
        assert!(out.contains(&move_to(3, 1)));
        assert_eq!(out.matches(CLEAR_LINE).count(), 2);
    }

    #[test]
    fn identical_frames_write_nothing() {
        let mut renderer = Renderer::new();
        render_to_string(&mut renderer, "a\nb");
        let out = render_to_string(&mut renderer, "a\nb");
        assert_eq!(out, "");
    }

    #[test]
    fn requested_full_redraw_clears_once() {
        let mut renderer = Renderer::new();
        render_to_string(&mut renderer, "a");
        renderer.request_full_redraw();
        let out = render_to_string(&mut renderer, "a");
        assert!(out.contains(CLEAR_ALL));
        let out = render_to_string(&mut renderer, "a");
        assert!(!out.contains(CLEAR_ALL));
    }

    #[test]
    fn ansi_styling_does_not_defeat_width_compare() {
        let mut renderer = Renderer::new();
        render_to_string(&mut renderer, "plain");
        // Same visible width, different bytes: in-place overwrite.
        let out = render_to_string(&mut renderer, "\u{1b}[31mplain\u{1b}[0m");
        assert!(!out.contains(CLEAR_LINE));
        assert!(out.contains("plain"));
    }
}
