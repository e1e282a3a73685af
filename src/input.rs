//! Input suspension state.
//!
//! The read opcodes cannot complete inside the execution loop; they
//! record what they need here, the loop reports `AwaitingInput`, and the
//! host answers with `resume_with_input` / `resume_with_char`. For V4+
//! timed reads the host is expected to call `handle_timer_tick` every
//! `time` tenths of a second until the read completes or aborts.

/// A pending request for user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputRequest {
    /// `read`: a whole line into `text_buffer`, optionally tokenised into
    /// `parse_buffer`.
    Line {
        text_buffer: usize,
        /// 0 when the story asked for no tokenisation (V5+).
        parse_buffer: usize,
        /// Maximum letters the buffer can hold.
        max_length: usize,
        /// Text already in the buffer that input continues (V5+).
        preloaded: String,
        /// Tenths of a second between timer callbacks; 0 = untimed.
        time: u16,
        /// Packed address of the timer routine.
        routine: u16,
        /// Where the terminator is stored on completion (V5+).
        store_var: Option<u8>,
    },
    /// `read_char`: a single keypress.
    Char {
        time: u16,
        routine: u16,
        store_var: u8,
    },
}

impl InputRequest {
    pub fn is_line(&self) -> bool {
        matches!(self, InputRequest::Line { .. })
    }

    /// Timer parameters when this read is timed.
    pub fn timer(&self) -> Option<(u16, u16)> {
        match *self {
            InputRequest::Line { time, routine, .. } | InputRequest::Char { time, routine, .. }
                if time > 0 && routine != 0 =>
            {
                Some((time, routine))
            }
            _ => None,
        }
    }
}
