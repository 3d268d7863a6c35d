use std::fmt;

use ninja_file::separator::newline_is_escaped;

use crate::ast::{Expr, Term};
use crate::error::LexError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Build,
    Rule,
    Pool,
    Default,
    Include,
    Subninja,
    Identifier(&'a [u8]),
    Equals,
    Colon,
    Pipe,
    Pipe2,
    Newline,
    Indent,
}

impl<'a> Token<'a> {
    /// The identifier bytes of this token. Keywords double as identifiers in
    /// binding positions (`pool = console` inside a build edge).
    pub fn value(&self) -> &'a [u8] {
        match self {
            Token::Identifier(v) => v,
            Token::Build => b"build",
            Token::Rule => b"rule",
            Token::Pool => b"pool",
            Token::Default => b"default",
            Token::Include => b"include",
            Token::Subninja => b"subninja",
            _ => panic!("token {} has no identifier value", self),
        }
    }

    pub fn is_identifier(&self) -> bool {
        matches!(
            self,
            Token::Identifier(_)
                | Token::Build
                | Token::Rule
                | Token::Pool
                | Token::Default
                | Token::Include
                | Token::Subninja
        )
    }
}

impl<'a> fmt::Display for Token<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Identifier(v) => write!(f, "identifier '{}'", String::from_utf8_lossy(v)),
            Token::Equals => write!(f, "'='"),
            Token::Colon => write!(f, "':'"),
            Token::Pipe => write!(f, "'|'"),
            Token::Pipe2 => write!(f, "'||'"),
            Token::Newline => write!(f, "newline"),
            Token::Indent => write!(f, "indent"),
            keyword => write!(f, "'{}'", String::from_utf8_lossy(keyword.value())),
        }
    }
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'-' || c == b'.'
}

// `$name` without braces uses the narrower charset; `.` needs `${}`.
fn is_simple_var_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'-'
}

/// Pull-based lexer over one fragment of a ninja file.
///
/// The lexer never evaluates variables; values and paths come out as [`Expr`]
/// part sequences. `base` is the fragment's absolute start offset, so every
/// token and error carries an offset into the original file even when the
/// fragment is a mid-file block.
///
/// Value reading is mode-aware like ninja's own lexer: structural tokens via
/// [`next_token`](Lexer::next_token), whitespace/colon/pipe-delimited paths
/// via [`read_path`](Lexer::read_path), end-of-line values via
/// [`read_value`](Lexer::read_value).
pub struct Lexer<'a> {
    data: &'a [u8],
    base: usize,
    pos: usize,
    line_start: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(data: &'a [u8], base: usize) -> Lexer<'a> {
        Lexer {
            data,
            base,
            pos: 0,
            line_start: true,
        }
    }

    /// Absolute offset of the next unread byte.
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<u8> {
        self.data.get(self.pos + n).copied()
    }

    fn skip_horizontal_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.pos += 1;
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            self.pos += 1;
            if c == b'\n' {
                self.line_start = true;
                break;
            }
        }
    }

    fn continuation_ahead(&self) -> bool {
        self.peek() == Some(b'$')
            && (self.peek_at(1) == Some(b'\n')
                || (self.peek_at(1) == Some(b'\r') && self.peek_at(2) == Some(b'\n')))
    }

    // Consumes `$`, the newline and the next line's indentation.
    fn consume_continuation(&mut self) {
        debug_assert!(self.continuation_ahead());
        self.pos += if self.peek_at(1) == Some(b'\r') { 3 } else { 2 };
        self.skip_horizontal_whitespace();
        self.line_start = false;
    }

    pub fn next_token(&mut self) -> Result<Option<(Token<'a>, usize)>, LexError> {
        loop {
            if self.line_start {
                let ws_start = self.pos;
                self.skip_horizontal_whitespace();
                self.line_start = false;
                if self.pos > ws_start {
                    match self.peek() {
                        None => return Ok(None),
                        // Whitespace-only lines carry no indent and no
                        // newline token.
                        Some(b'\n') => {
                            self.pos += 1;
                            self.line_start = true;
                            continue;
                        }
                        Some(b'\r') if self.peek_at(1) == Some(b'\n') => {
                            self.pos += 2;
                            self.line_start = true;
                            continue;
                        }
                        Some(b'#') => {
                            self.skip_comment();
                            continue;
                        }
                        Some(_) => return Ok(Some((Token::Indent, self.base + ws_start))),
                    }
                }
            }
            self.skip_horizontal_whitespace();
            let off = self.offset();
            let c = match self.peek() {
                None => return Ok(None),
                Some(c) => c,
            };
            match c {
                b'\n' => {
                    self.pos += 1;
                    self.line_start = true;
                    return Ok(Some((Token::Newline, off)));
                }
                b'\r' => {
                    if self.peek_at(1) == Some(b'\n') {
                        self.pos += 2;
                        self.line_start = true;
                        return Ok(Some((Token::Newline, off)));
                    }
                    return Err(LexError::new(off, "stray carriage return"));
                }
                b'#' => {
                    self.skip_comment();
                    continue;
                }
                b'=' => {
                    self.pos += 1;
                    return Ok(Some((Token::Equals, off)));
                }
                b':' => {
                    self.pos += 1;
                    return Ok(Some((Token::Colon, off)));
                }
                b'|' => {
                    self.pos += 1;
                    if self.peek() == Some(b'|') {
                        self.pos += 1;
                        return Ok(Some((Token::Pipe2, off)));
                    }
                    return Ok(Some((Token::Pipe, off)));
                }
                b'$' => {
                    if self.continuation_ahead() {
                        self.consume_continuation();
                        continue;
                    }
                    return Err(LexError::new(off, "unexpected '$' outside a value"));
                }
                c if is_ident_char(c) => {
                    let start = self.pos;
                    while self.peek().map_or(false, is_ident_char) {
                        self.pos += 1;
                    }
                    let ident = &self.data[start..self.pos];
                    let token = match ident {
                        b"build" => Token::Build,
                        b"rule" => Token::Rule,
                        b"pool" => Token::Pool,
                        b"default" => Token::Default,
                        b"include" => Token::Include,
                        b"subninja" => Token::Subninja,
                        _ => Token::Identifier(ident),
                    };
                    return Ok(Some((token, off)));
                }
                c => {
                    return Err(LexError::new(
                        off,
                        format!("unexpected character '{}'", c as char),
                    ));
                }
            }
        }
    }

    fn flush_literal(literal: &mut Vec<u8>, parts: &mut Vec<Term>) {
        if !literal.is_empty() {
            parts.push(Term::Literal(std::mem::take(literal)));
        }
    }

    // The '$' has been consumed; its offset is `offset() - 1`.
    fn read_escape(&mut self, literal: &mut Vec<u8>, parts: &mut Vec<Term>) -> Result<(), LexError> {
        let off = self.offset() - 1;
        match self.peek() {
            Some(c @ (b'$' | b' ' | b':')) => {
                literal.push(c);
                self.pos += 1;
                Ok(())
            }
            Some(b'\n') => {
                self.pos += 1;
                self.skip_horizontal_whitespace();
                Ok(())
            }
            Some(b'\r') if self.peek_at(1) == Some(b'\n') => {
                self.pos += 2;
                self.skip_horizontal_whitespace();
                Ok(())
            }
            Some(b'{') => {
                self.pos += 1;
                let start = self.pos;
                while self.peek().map_or(false, is_ident_char) {
                    self.pos += 1;
                }
                if self.pos == start {
                    return Err(LexError::new(off, "empty '${}' variable reference"));
                }
                if self.peek() != Some(b'}') {
                    return Err(LexError::new(off, "expected '}' to close '${'"));
                }
                let name = self.data[start..self.pos].to_vec();
                self.pos += 1;
                Self::flush_literal(literal, parts);
                parts.push(Term::Reference(name));
                Ok(())
            }
            Some(c) if is_simple_var_char(c) => {
                let start = self.pos;
                while self.peek().map_or(false, is_simple_var_char) {
                    self.pos += 1;
                }
                Self::flush_literal(literal, parts);
                parts.push(Term::Reference(self.data[start..self.pos].to_vec()));
                Ok(())
            }
            _ => Err(LexError::new(
                off,
                "bad $-escape (literal '$' must be written as '$$')",
            )),
        }
    }

    // Skips spaces, tabs and line continuations between paths.
    fn skip_path_separators(&mut self) {
        loop {
            self.skip_horizontal_whitespace();
            if self.continuation_ahead() {
                self.consume_continuation();
            } else {
                break;
            }
        }
    }

    /// Reads one path: delimited by whitespace, `:`, `|`, or end of line.
    /// Returns `None` when the next token is a delimiter instead of a path.
    pub fn read_path(&mut self) -> Result<Option<Expr>, LexError> {
        self.skip_path_separators();
        let mut parts = Vec::new();
        let mut literal = Vec::new();
        loop {
            match self.peek() {
                None
                | Some(b'\n')
                | Some(b'\r')
                | Some(b' ')
                | Some(b'\t')
                | Some(b':')
                | Some(b'|') => break,
                Some(b'$') => {
                    self.pos += 1;
                    self.read_escape(&mut literal, &mut parts)?;
                }
                Some(c) => {
                    literal.push(c);
                    self.pos += 1;
                }
            }
        }
        Self::flush_literal(&mut literal, &mut parts);
        if parts.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Expr::new(parts)))
        }
    }

    /// Reads a value to the end of the line (the newline itself stays
    /// unconsumed). Leading whitespace is stripped, everything else is
    /// literal except `$`-escapes; an empty value is legal.
    pub fn read_value(&mut self) -> Result<Expr, LexError> {
        self.skip_horizontal_whitespace();
        let mut parts = Vec::new();
        let mut literal = Vec::new();
        loop {
            match self.peek() {
                None | Some(b'\n') => break,
                Some(b'\r') if self.peek_at(1) == Some(b'\n') => break,
                Some(b'$') => {
                    self.pos += 1;
                    self.read_escape(&mut literal, &mut parts)?;
                }
                Some(c) => {
                    literal.push(c);
                    self.pos += 1;
                }
            }
        }
        Self::flush_literal(&mut literal, &mut parts);
        Ok(Expr::new(parts))
    }

    /// Skips to the end of the current `build` statement without parsing it:
    /// past escaped newlines and past indented binding lines. Returns the
    /// absolute end offset (one past the terminating newline).
    pub fn skip_build_statement(&mut self) -> usize {
        loop {
            while self.pos < self.data.len() && self.data[self.pos] != b'\n' {
                self.pos += 1;
            }
            if self.pos >= self.data.len() {
                break;
            }
            let nl = self.pos;
            self.pos += 1;
            if newline_is_escaped(self.data, nl) {
                continue;
            }
            match self.peek() {
                Some(b' ') | Some(b'\t') => continue,
                _ => break,
            }
        }
        self.line_start = true;
        self.offset()
    }
}
