//! Manual line editing over a raw byte stream (§4.8, §9 "Interactive line
//! editing"). The bastion is driving a shell-protocol channel directly, not
//! a terminal device, so it re-implements just enough of a line discipline
//! to read one command at a time and, separately, one secret.
//!
//! Both readers are pure byte-in, byte-out state machines with no I/O of
//! their own, so they can be driven by a unit test one byte at a time
//! without a network in sight.

const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;
const ETX: u8 = 0x03; // ^C
const EOT: u8 = 0x04; // ^D
const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// What happened as a result of feeding one byte, and what (if anything)
/// should be echoed back to the client.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Feed {
    pub echo: Vec<u8>,
    pub outcome: Option<Outcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Line(String),
    Interrupted,
    Eof,
}

/// Reads one printable-echoed line at a time (the bastion's `bastion>`
/// prompt and command input).
#[derive(Debug, Default)]
pub struct LineReader {
    buffer: String,
}

impl LineReader {
    pub fn new() -> Self {
        LineReader::default()
    }

    pub fn feed(&mut self, byte: u8) -> Feed {
        match byte {
            ETX => {
                self.buffer.clear();
                Feed {
                    echo: b"^C\r\n".to_vec(),
                    outcome: Some(Outcome::Interrupted),
                }
            }
            EOT if self.buffer.is_empty() => Feed {
                echo: Vec::new(),
                outcome: Some(Outcome::Eof),
            },
            CR | LF => {
                let line = std::mem::take(&mut self.buffer);
                Feed {
                    echo: b"\r\n".to_vec(),
                    outcome: Some(Outcome::Line(line)),
                }
            }
            BACKSPACE | DELETE => {
                if self.buffer.pop().is_some() {
                    Feed {
                        echo: b"\x08 \x08".to_vec(),
                        outcome: None,
                    }
                } else {
                    Feed::default()
                }
            }
            0x20..=0x7e => {
                self.buffer.push(byte as char);
                Feed {
                    echo: vec![byte],
                    outcome: None,
                }
            }
            _ => Feed::default(),
        }
    }
}

/// Reads one secret with echo suppressed (§4.8 "Proxy handoff"). A literal
/// `\` followed by one of `! $ \`` " \` is an escape contributing only the
/// second byte; a `\` followed by anything else contributes the backslash
/// literally and the following byte is processed normally.
#[derive(Debug, Default)]
pub struct SecretReader {
    buffer: String,
    pending_backslash: bool,
}

fn is_escapable(byte: u8) -> bool {
    matches!(byte, b'!' | b'$' | b'`' | b'"' | b'\\')
}

impl SecretReader {
    pub fn new() -> Self {
        SecretReader::default()
    }

    pub fn feed(&mut self, byte: u8) -> Feed {
        if self.pending_backslash {
            self.pending_backslash = false;
            if is_escapable(byte) {
                self.buffer.push(byte as char);
                return Feed::default();
            }
            self.buffer.push('\\');
            return self.feed_plain(byte);
        }
        if byte == b'\\' {
            self.pending_backslash = true;
            return Feed::default();
        }
        self.feed_plain(byte)
    }

    fn feed_plain(&mut self, byte: u8) -> Feed {
        match byte {
            ETX => {
                self.buffer.clear();
                self.pending_backslash = false;
                Feed {
                    echo: b"^C\r\n".to_vec(),
                    outcome: Some(Outcome::Interrupted),
                }
            }
            EOT if self.buffer.is_empty() => Feed {
                echo: Vec::new(),
                outcome: Some(Outcome::Eof),
            },
            CR | LF => {
                let secret = std::mem::take(&mut self.buffer);
                Feed {
                    echo: b"\r\n".to_vec(),
                    outcome: Some(Outcome::Line(secret)),
                }
            }
            BACKSPACE | DELETE => {
                self.buffer.pop();
                Feed::default()
            }
            0x20..=0x7e => {
                self.buffer.push(byte as char);
                Feed::default()
            }
            _ => Feed::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_line(reader: &mut LineReader, text: &str) -> Option<Outcome> {
        let mut last = None;
        for byte in text.bytes() {
            let feed = reader.feed(byte);
            if feed.outcome.is_some() {
                last = feed.outcome;
            }
        }
        last
    }

    #[test]
    fn line_reader_echoes_printable_and_returns_on_cr() {
        let mut reader = LineReader::new();
        assert_eq!(
            reader.feed(b'l'),
            Feed {
                echo: vec![b'l'],
                outcome: None
            }
        );
        let outcome = feed_line(&mut reader, "s\r");
        assert_eq!(outcome, Some(Outcome::Line("ls".to_string())));
    }

    #[test]
    fn line_reader_backspace_erases_last_char() {
        let mut reader = LineReader::new();
        reader.feed(b'l');
        reader.feed(b'x');
        let feed = reader.feed(BACKSPACE);
        assert_eq!(feed.echo, b"\x08 \x08".to_vec());
        let outcome = feed_line(&mut reader, "s\r");
        assert_eq!(outcome, Some(Outcome::Line("ls".to_string())));
    }

    #[test]
    fn line_reader_ctrl_c_is_interrupted_and_clears_buffer() {
        let mut reader = LineReader::new();
        reader.feed(b's');
        reader.feed(b's');
        let feed = reader.feed(ETX);
        assert_eq!(feed.outcome, Some(Outcome::Interrupted));
        let outcome = feed_line(&mut reader, "ls\r");
        assert_eq!(outcome, Some(Outcome::Line("ls".to_string())));
    }

    #[test]
    fn line_reader_ctrl_d_on_empty_line_is_eof() {
        let mut reader = LineReader::new();
        assert_eq!(reader.feed(EOT).outcome, Some(Outcome::Eof));
    }

    #[test]
    fn line_reader_ctrl_d_mid_line_is_ignored() {
        let mut reader = LineReader::new();
        reader.feed(b'l');
        assert_eq!(reader.feed(EOT).outcome, None);
    }

    #[test]
    fn secret_reader_does_not_echo_printable_chars() {
        let mut reader = SecretReader::new();
        let feed = reader.feed(b'h');
        assert!(feed.echo.is_empty());
        assert_eq!(feed.outcome, None);
    }

    #[test]
    fn secret_reader_plain_secret() {
        let mut reader = SecretReader::new();
        let mut outcome = None;
        for byte in b"hunter2\r" {
            let feed = reader.feed(*byte);
            if feed.outcome.is_some() {
                outcome = feed.outcome;
            }
        }
        assert_eq!(outcome, Some(Outcome::Line("hunter2".to_string())));
    }

    #[test]
    fn secret_reader_escapes_shell_meta_characters() {
        // Types (literally, one byte at a time): a \$ b \` c \" d \\ e \! f
        // then a real CR. Each `\x` pair where x is one of the five escaped
        // characters contributes only `x`; the input has no bare backslash.
        let typed: &[u8] = &[
            b'a', b'\\', b'$', b'b', b'\\', b'`', b'c', b'\\', b'"', b'd', b'\\', b'\\', b'e',
            b'\\', b'!', b'f',
        ];
        let mut reader = SecretReader::new();
        let mut outcome = None;
        for byte in typed {
            let feed = reader.feed(*byte);
            if feed.outcome.is_some() {
                outcome = feed.outcome;
            }
        }
        let feed = reader.feed(CR);
        if feed.outcome.is_some() {
            outcome = feed.outcome;
        }
        assert_eq!(outcome, Some(Outcome::Line("a$b`c\"d\\e!f".to_string())));
    }

    #[test]
    fn secret_reader_backslash_before_non_escapable_is_literal() {
        let mut reader = SecretReader::new();
        let mut outcome = None;
        for byte in b"a\\xb\r" {
            let feed = reader.feed(*byte);
            if feed.outcome.is_some() {
                outcome = feed.outcome;
            }
        }
        assert_eq!(outcome, Some(Outcome::Line("a\\xb".to_string())));
    }

    #[test]
    fn secret_reader_backspace_erases_last_char_silently() {
        let mut reader = SecretReader::new();
        reader.feed(b'a');
        reader.feed(b'b');
        reader.feed(BACKSPACE);
        let mut outcome = None;
        for byte in b"c\r" {
            let feed = reader.feed(*byte);
            if feed.outcome.is_some() {
                outcome = feed.outcome;
            }
        }
        assert_eq!(outcome, Some(Outcome::Line("ac".to_string())));
    }
}
