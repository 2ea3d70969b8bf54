//! Reads one logical SVF command at a time from a byte stream, following
//! `svf_getline` / `svf_read_command_from_file` / `svf_parse_cmd_string`
//! in `lib/svf.c`: strip `!` and `//` comments, fold continuation lines,
//! upper-case everything, and insert separating whitespace around `(`/`)`
//! so the argument splitter can rely on plain whitespace.

use std::io::Read;

use crate::error::SvfError;

pub struct Tokenizer<R> {
    reader: R,
    peeked: Option<u8>,
    pos: u64,
    line_no: u32,
}

impl<R: Read> Tokenizer<R> {
    pub fn new(reader: R) -> Self {
        Tokenizer { reader, peeked: None, pos: 0, line_no: 1 }
    }

    /// Byte offset of the next unread byte (accounting for any pending peek).
    pub fn position(&self) -> u64 {
        self.pos - self.peeked.is_some() as u64
    }

    pub fn line_no(&self) -> u32 {
        self.line_no
    }

    fn read_one(&mut self) -> Result<Option<u8>, SvfError> {
        let mut buf = [0u8; 1];
        match self.reader.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => {
                self.pos += 1;
                Ok(Some(buf[0]))
            }
            Err(e) => Err(SvfError::Transport(crate::error::JtagError::Io(e))),
        }
    }

    fn next_byte(&mut self) -> Result<Option<u8>, SvfError> {
        let b = match self.peeked.take() {
            Some(b) => Some(b),
            None => self.read_one()?,
        };
        if b == Some(b'\n') {
            self.line_no += 1;
        }
        Ok(b)
    }

    fn peek_byte(&mut self) -> Option<u8> {
        if self.peeked.is_none() {
            self.peeked = self.read_one().ok().flatten();
        }
        self.peeked
    }

    /// Returns the next logical command (without the trailing `;`) and the
    /// line it started on, or `None` at end of input with no partial
    /// command pending.
    pub fn next_command(&mut self) -> Result<Option<(String, u32)>, SvfError> {
        let mut out = String::new();
        let mut start_line = None;

        loop {
            let Some(b) = self.next_byte()? else {
                if out.trim().is_empty() {
                    return Ok(None);
                }
                return Err(SvfError::Parse {
                    line: start_line.unwrap_or(self.line_no),
                    message: "unexpected end of file before ';'".into(),
                });
            };

            match b {
                b';' => {
                    if out.trim().is_empty() {
                        continue;
                    }
                    return Ok(Some((out.trim().to_string(), start_line.unwrap_or(self.line_no))));
                }
                b'!' => {
                    self.skip_to_eol()?;
                }
                b'/' if self.peek_byte() == Some(b'/') => {
                    let _ = self.next_byte()?;
                    self.skip_to_eol()?;
                }
                b'(' => {
                    if start_line.is_none() {
                        start_line = Some(self.line_no);
                    }
                    out.push(' ');
                    out.push('(');
                }
                b')' => {
                    out.push(')');
                    out.push(' ');
                }
                b'\r' | b'\n' | b'\t' | b' ' => {
                    if !out.is_empty() && !out.ends_with(' ') {
                        out.push(' ');
                    }
                }
                _ => {
                    if start_line.is_none() {
                        start_line = Some(self.line_no);
                    }
                    out.push((b as char).to_ascii_uppercase());
                }
            }
        }
    }

    fn skip_to_eol(&mut self) -> Result<(), SvfError> {
        loop {
            match self.next_byte()? {
                None => return Ok(()),
                Some(b'\n') => return Ok(()),
                Some(_) => continue,
            }
        }
    }
}

impl<R: Read + std::io::Seek> Tokenizer<R> {
    /// Rewinds to a previously recorded `(position(), line_no())` pair, for
    /// LOOP/ENDLOOP retry (`SPEC_FULL.md` §4.D.8).
    pub fn seek_to(&mut self, pos: u64, line_no: u32) -> std::io::Result<()> {
        self.reader.seek(std::io::SeekFrom::Start(pos))?;
        self.pos = pos;
        self.peeked = None;
        self.line_no = line_no;
        Ok(())
    }
}

/// Splits a logical command into whitespace-separated tokens, treating a
/// `(...)` run as a single token regardless of internal whitespace.
pub fn split_args(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut cur = String::new();
    for ch in command.chars() {
        match ch {
            '(' => {
                depth += 1;
                cur.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                cur.push(ch);
            }
            c if c.is_whitespace() && depth == 0 => {
                if !cur.is_empty() {
                    tokens.push(std::mem::take(&mut cur));
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        tokens.push(cur);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bang_comments() {
        let mut t = Tokenizer::new("SIR 8 ! a comment\n(A5);".as_bytes());
        let (cmd, _) = t.next_command().unwrap().unwrap();
        assert_eq!(split_args(&cmd), vec!["SIR", "8", "(A5)"]);
    }

    #[test]
    fn strips_slash_comments() {
        let mut t = Tokenizer::new("TRST // remote reset\nOFF;".as_bytes());
        let (cmd, _) = t.next_command().unwrap().unwrap();
        assert_eq!(split_args(&cmd), vec!["TRST", "OFF"]);
    }

    #[test]
    fn folds_continuation_lines() {
        let mut t = Tokenizer::new("SDR 8\nTDI (5A)\nTDO (5A);".as_bytes());
        let (cmd, _) = t.next_command().unwrap().unwrap();
        assert_eq!(split_args(&cmd), vec!["SDR", "8", "TDI", "(5A)", "TDO", "(5A)"]);
    }

    #[test]
    fn uppercases_everything() {
        let mut t = Tokenizer::new("sir 8 (a5);".as_bytes());
        let (cmd, _) = t.next_command().unwrap().unwrap();
        assert_eq!(cmd, "SIR 8 (A5)");
    }

    #[test]
    fn reports_line_numbers_across_commands() {
        let mut t = Tokenizer::new("STATE IDLE;\nSTATE RESET;".as_bytes());
        let (_, l1) = t.next_command().unwrap().unwrap();
        let (_, l2) = t.next_command().unwrap().unwrap();
        assert_eq!(l1, 1);
        assert_eq!(l2, 2);
    }

    #[test]
    fn eof_with_no_pending_command_is_none() {
        let mut t = Tokenizer::new("".as_bytes());
        assert!(t.next_command().unwrap().is_none());
    }
}
