//! Script ingestion: a peeking line scanner and the chunker that turns a
//! user script into an ordered sequence of [`Chunk`]s.
//!
//! The script grammar is line oriented. Blank lines and `// …` lines
//! separate blocks; a line starting with an HTTP method opens a request
//! block; `=> PAUSE <millis>` declares a delay; any other `=>` line is an
//! opaque directive kept for forward compatibility:
//!
//! ```text
//! GET /foo/bar
//! Header:Value
//! // this is a comment
//! POST /foo/bar/baz
//! Header:Value
//! Header-Two:Value
//! @path/to/body
//!
//! => PAUSE 12345
//! ```

use std::fmt;
use std::io::BufRead;

use crate::error::Error;
use crate::target::Method;

/// One element of a parsed script, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// The joined text of a contiguous request block.
    Request(String),
    /// A declared delay in milliseconds.
    Pause(u32),
    /// An unrecognized `=>` line, preserved verbatim.
    Directive(String),
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chunk::Request(text) => f.write_str(text),
            Chunk::Pause(millis) => write!(f, "=> PAUSE {millis}"),
            Chunk::Directive(line) => f.write_str(line),
        }
    }
}

/// A line iterator with one line of lookahead.
///
/// Between a `scan()` that returned true and the next `scan()`, `text()` is
/// stable; `peek()` is idempotent and returns `""` at end of input. At most
/// one line is buffered ahead. Read errors end the stream.
pub struct PeekingScanner<B> {
    src: B,
    current: String,
    peeked: Option<Option<String>>,
}

impl<B: BufRead> PeekingScanner<B> {
    pub fn new(src: B) -> Self {
        Self {
            src,
            current: String::new(),
            peeked: None,
        }
    }

    fn read_line(src: &mut B) -> Option<String> {
        let mut line = String::new();
        match src.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                if line.ends_with('\n') {
                    line.pop();
                    if line.ends_with('\r') {
                        line.pop();
                    }
                }
                Some(line)
            }
        }
    }

    /// Advance to the next line. Returns false at end of input.
    pub fn scan(&mut self) -> bool {
        let next = match self.peeked.take() {
            Some(buffered) => buffered,
            None => Self::read_line(&mut self.src),
        };
        match next {
            Some(line) => {
                self.current = line;
                true
            }
            None => false,
        }
    }

    /// The current line, without its terminator.
    pub fn text(&self) -> &str {
        &self.current
    }

    /// The next line without consuming it; `""` at end of input.
    pub fn peek(&mut self) -> &str {
        if self.peeked.is_none() {
            let line = Self::read_line(&mut self.src);
            self.peeked = Some(line);
        }
        match &self.peeked {
            Some(Some(line)) => line,
            _ => "",
        }
    }
}

fn is_comment(line: &str) -> bool {
    line.starts_with("//")
}

fn is_method(line: &str) -> bool {
    line.split_whitespace()
        .next()
        .is_some_and(|tok| tok.parse::<Method>().is_ok())
}

fn is_directive(line: &str) -> bool {
    line.starts_with("=>")
}

/// Eagerly chunk a whole script.
///
/// Parsing before execution means bad syntax surfaces before the first
/// request and the chunk count is known up front.
pub fn scan_chunks<B: BufRead>(scanner: &mut PeekingScanner<B>) -> Result<Vec<Chunk>, Error> {
    let mut chunks = Vec::new();
    while scanner.scan() {
        let line = scanner.text().trim();
        if line.is_empty() || is_comment(line) {
            continue;
        }
        let mut current = vec![line.to_owned()];
        loop {
            let next = scanner.peek().trim();
            if next.is_empty() || is_comment(next) {
                // gobble the separator and close the block
                scanner.scan();
                break;
            } else if is_method(next) || is_directive(next) {
                // leave the scanner positioned before the next block
                break;
            } else {
                scanner.scan();
                current.push(scanner.text().trim().to_owned());
            }
        }
        chunks.push(parse_chunk(current.join("\n"))?);
    }
    Ok(chunks)
}

fn parse_chunk(text: String) -> Result<Chunk, Error> {
    let Some(rest) = text.strip_prefix("=>") else {
        return Ok(Chunk::Request(text));
    };
    let mut tokens = rest.split_whitespace();
    if tokens.next() != Some("PAUSE") {
        return Ok(Chunk::Directive(text));
    }
    match (tokens.next(), tokens.next()) {
        (Some(millis), None) => millis
            .parse::<u32>()
            .map(Chunk::Pause)
            .map_err(|_| Error::BadPause(text)),
        _ => Err(Error::BadPause(text)),
    }
}
