//! The screen collaborator: everything the core asks of a rendering host.
//!
//! The core never draws; it forwards windowing, cursor, style and colour
//! requests through this trait and asks once at start-up what the host
//! can actually do (the answers are reflected into the story header).
//! Implementations are expected to swallow their own I/O problems; a
//! broken terminal must not halt the virtual machine.

use log::debug;

/// Styles passed to `set_text_style`, combinable as a bitmask. Roman is
/// the absence of the others.
pub const STYLE_ROMAN: u16 = 0;
pub const STYLE_REVERSE_VIDEO: u16 = 1;
pub const STYLE_BOLD: u16 = 2;
pub const STYLE_ITALIC: u16 = 4;
pub const STYLE_FIXED_PITCH: u16 = 8;

/// The colour palette shared by `set_text_colors`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZColor {
    Current,
    Default,
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    Gray,
}

impl ZColor {
    pub fn from_code(code: u16) -> Option<ZColor> {
        Some(match code {
            0 => ZColor::Current,
            1 => ZColor::Default,
            2 => ZColor::Black,
            3 => ZColor::Red,
            4 => ZColor::Green,
            5 => ZColor::Yellow,
            6 => ZColor::Blue,
            7 => ZColor::Magenta,
            8 => ZColor::Cyan,
            9 => ZColor::White,
            10 => ZColor::Gray,
            _ => return None,
        })
    }
}

/// What a host can do, queried once and asserted into the header.
#[derive(Debug, Clone)]
pub struct ScreenCapabilities {
    pub has_colors: bool,
    pub has_bold: bool,
    pub has_italic: bool,
    pub has_reverse_video: bool,
    pub has_fixed_pitch: bool,
    pub has_split_window: bool,
    pub has_display_status_bar: bool,
    pub has_pictures: bool,
    pub has_sound: bool,
    pub has_timed_keyboard_input: bool,
    pub screen_lines: u8,
    pub screen_columns: u8,
}

impl Default for ScreenCapabilities {
    fn default() -> Self {
        ScreenCapabilities {
            has_colors: false,
            has_bold: false,
            has_italic: false,
            has_reverse_video: false,
            has_fixed_pitch: true,
            has_split_window: false,
            has_display_status_bar: true,
            has_pictures: false,
            has_sound: false,
            has_timed_keyboard_input: false,
            screen_lines: 24,
            screen_columns: 80,
        }
    }
}

pub trait Screen {
    /// Buffered text for the active window.
    fn print(&mut self, text: &str);

    fn split_window(&mut self, lines: u16);
    fn set_window(&mut self, window: u16);
    /// -1 erases the whole screen and unsplits; -2 erases without
    /// unsplitting; 0/1 erase one window.
    fn erase_window(&mut self, window: i16);
    fn erase_line(&mut self);

    fn set_cursor(&mut self, line: u16, column: u16, window: u16);
    fn get_cursor(&mut self, window: u16) -> (u16, u16);
    fn show_cursor(&mut self) {}
    fn hide_cursor(&mut self) {}

    fn set_text_style(&mut self, style: u16);
    fn set_text_colors(&mut self, window: u16, foreground: ZColor, background: ZColor);
    fn buffer_mode(&mut self, buffered: bool);

    /// Notification that the story selected or deselected an output or
    /// input stream (memory redirection is the core's business and never
    /// arrives here).
    fn output_stream(&mut self, stream: i16) {
        debug!("output stream {stream} selected");
    }
    fn input_stream(&mut self, stream: u16) {
        debug!("input stream {stream} selected");
    }

    /// V1-3 status line. `v1`/`v2` are score/moves, or hours/minutes when
    /// `time_mode` is set.
    fn update_status_bar(&mut self, location: &str, v1: i16, v2: u16, time_mode: bool);

    /// Echo of completed line input (hosts that echo as the user types
    /// may ignore this).
    fn echo_input(&mut self, text: &str) {
        self.print(text);
    }

    fn capabilities(&self) -> ScreenCapabilities;
}

/// Discards everything. Useful for headless execution and the parts of
/// the test suite that do not care about output.
#[derive(Default)]
pub struct NullScreen;

impl Screen for NullScreen {
    fn print(&mut self, _text: &str) {}
    fn split_window(&mut self, _lines: u16) {}
    fn set_window(&mut self, _window: u16) {}
    fn erase_window(&mut self, _window: i16) {}
    fn erase_line(&mut self) {}
    fn set_cursor(&mut self, _line: u16, _column: u16, _window: u16) {}
    fn get_cursor(&mut self, _window: u16) -> (u16, u16) {
        (1, 1)
    }
    fn set_text_style(&mut self, _style: u16) {}
    fn set_text_colors(&mut self, _window: u16, _fg: ZColor, _bg: ZColor) {}
    fn buffer_mode(&mut self, _buffered: bool) {}
    fn update_status_bar(&mut self, _location: &str, _v1: i16, _v2: u16, _time_mode: bool) {}
    fn capabilities(&self) -> ScreenCapabilities {
        ScreenCapabilities::default()
    }
}

/// Captures printed text and the call log, for assertions in tests.
/// Clones share state, so a test can keep a handle while the interpreter
/// owns the screen.
#[derive(Default)]
struct CaptureState {
    output: String,
    status_line: Option<(String, i16, u16, bool)>,
    calls: Vec<String>,
}

#[derive(Clone, Default)]
pub struct CaptureScreen {
    state: std::rc::Rc<std::cell::RefCell<CaptureState>>,
}

impl CaptureScreen {
    pub fn new() -> CaptureScreen {
        CaptureScreen::default()
    }

    pub fn output(&self) -> String {
        self.state.borrow().output.clone()
    }

    pub fn take_output(&self) -> String {
        std::mem::take(&mut self.state.borrow_mut().output)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub fn status_line(&self) -> Option<(String, i16, u16, bool)> {
        self.state.borrow().status_line.clone()
    }
}

impl Screen for CaptureScreen {
    fn print(&mut self, text: &str) {
        self.state.borrow_mut().output.push_str(text);
    }
    fn split_window(&mut self, lines: u16) {
        self.state.borrow_mut().calls.push(format!("split_window({lines})"));
    }
    fn set_window(&mut self, window: u16) {
        self.state.borrow_mut().calls.push(format!("set_window({window})"));
    }
    fn erase_window(&mut self, window: i16) {
        self.state.borrow_mut().calls.push(format!("erase_window({window})"));
    }
    fn erase_line(&mut self) {
        self.state.borrow_mut().calls.push("erase_line".into());
    }
    fn set_cursor(&mut self, line: u16, column: u16, window: u16) {
        self.state
            .borrow_mut()
            .calls
            .push(format!("set_cursor({line},{column},{window})"));
    }
    fn get_cursor(&mut self, _window: u16) -> (u16, u16) {
        (1, 1)
    }
    fn set_text_style(&mut self, style: u16) {
        self.state.borrow_mut().calls.push(format!("set_text_style({style})"));
    }
    fn set_text_colors(&mut self, window: u16, fg: ZColor, bg: ZColor) {
        self.state
            .borrow_mut()
            .calls
            .push(format!("set_text_colors({window},{fg:?},{bg:?})"));
    }
    fn buffer_mode(&mut self, buffered: bool) {
        self.state.borrow_mut().calls.push(format!("buffer_mode({buffered})"));
    }
    fn update_status_bar(&mut self, location: &str, v1: i16, v2: u16, time_mode: bool) {
        self.state.borrow_mut().status_line = Some((location.to_string(), v1, v2, time_mode));
    }
    fn capabilities(&self) -> ScreenCapabilities {
        ScreenCapabilities {
            has_split_window: true,
            has_timed_keyboard_input: true,
            ..ScreenCapabilities::default()
        }
    }
}

/// Plain stdout sink used by the bundled command-line driver. Windowing
/// and cursor control degrade to nothing; text and the status line go to
/// the terminal as-is.
#[derive(Default)]
pub struct StdoutScreen;

impl Screen for StdoutScreen {
    fn print(&mut self, text: &str) {
        use std::io::Write;
        print!("{text}");
        std::io::stdout().flush().ok();
    }
    fn split_window(&mut self, _lines: u16) {}
    fn set_window(&mut self, _window: u16) {}
    fn erase_window(&mut self, _window: i16) {}
    fn erase_line(&mut self) {}
    fn set_cursor(&mut self, _line: u16, _column: u16, _window: u16) {}
    fn get_cursor(&mut self, _window: u16) -> (u16, u16) {
        (1, 1)
    }
    fn set_text_style(&mut self, _style: u16) {}
    fn set_text_colors(&mut self, _window: u16, _fg: ZColor, _bg: ZColor) {}
    fn buffer_mode(&mut self, _buffered: bool) {}
    fn update_status_bar(&mut self, location: &str, v1: i16, v2: u16, time_mode: bool) {
        if time_mode {
            println!("[{location}  {v1:02}:{v2:02}]");
        } else {
            println!("[{location}  score {v1}, moves {v2}]");
        }
    }
    fn echo_input(&mut self, _text: &str) {
        // The terminal already echoed what the user typed.
    }
    fn capabilities(&self) -> ScreenCapabilities {
        ScreenCapabilities::default()
    }
}
