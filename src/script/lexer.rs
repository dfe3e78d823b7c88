//! Tokenizer producing Python-style layout tokens (`Newline`, `Indent`, `Dedent`).

use super::parser::ParseError;

/// Token kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    /// Identifier or keyword.
    Name(String),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// String literal with escapes processed.
    Str(String),
    /// Bytes literal.
    Bytes(Vec<u8>),
    /// f-string body; escapes are processed by the parser per literal segment.
    FStr(String),
    /// Operator or delimiter.
    Op(&'static str),
    /// End of a logical line.
    Newline,
    /// Indentation increased.
    Indent,
    /// Indentation decreased.
    Dedent,
    /// End of input.
    Eof,
}

/// Token with position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Kind.
    pub tok: Tok,
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub col: usize,
}

// Longest operators first.
const OPERATORS: &[&str] = &[
    "**=", "//=", "...", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "->",
    ":=", "+", "-", "*", "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";",
    "@", "|", "&", "^", "~",
];

/// Tokenize a complete source text.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
    at_line_start: bool,
}

impl Lexer {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            depth: 0,
            indents: vec![0],
            tokens: Vec::new(),
            at_line_start: true,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.line, self.col)
    }

    fn push(&mut self, tok: Tok, line: usize, col: usize) {
        self.tokens.push(Token { tok, line, col });
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        loop {
            if self.at_line_start && self.depth == 0 {
                if !self.handle_indentation()? {
                    break;
                }
            }
            let Some(ch) = self.peek() else { break };
            let (line, col) = (self.line, self.col);
            match ch {
                ' ' | '\t' | '\x0c' | '\r' => {
                    self.bump();
                }
                '#' => self.skip_comment(),
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                '\\' if self.peek_at(1) == Some('\r') && self.peek_at(2) == Some('\n') => {
                    self.bump();
                    self.bump();
                    self.bump();
                }
                '\n' => {
                    self.bump();
                    if self.depth == 0 {
                        self.push(Tok::Newline, line, col);
                        self.at_line_start = true;
                    }
                }
                '0'..='9' => self.lex_number()?,
                '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.lex_number()?,
                '"' | '\'' => self.lex_string(String::new())?,
                c if is_ident_start(c) => {
                    let start = self.pos;
                    while self.peek().is_some_and(is_ident_char) {
                        self.bump();
                    }
                    let word: String = self.chars[start..self.pos].iter().collect();
                    let is_prefix = word.len() <= 2
                        && word
                            .chars()
                            .all(|c| matches!(c.to_ascii_lowercase(), 'r' | 'b' | 'f'));
                    if is_prefix && matches!(self.peek(), Some('"') | Some('\'')) {
                        self.lex_string_at(word.to_ascii_lowercase(), line, col)?;
                    } else {
                        self.push(Tok::Name(word), line, col);
                    }
                }
                _ => self.lex_operator()?,
            }
        }

        if !matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline)
        ) {
            self.push(Tok::Newline, self.line, self.col);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent, self.line, self.col);
        }
        self.push(Tok::Eof, self.line, self.col);
        Ok(self.tokens)
    }

    /// Measure indentation of the next non-blank line; returns `false` at EOF.
    fn handle_indentation(&mut self) -> Result<bool, ParseError> {
        loop {
            let mut width = 0usize;
            while let Some(ch) = self.peek() {
                match ch {
                    ' ' => width += 1,
                    '\t' => width = (width / 8 + 1) * 8,
                    '\x0c' | '\r' => {}
                    _ => break,
                }
                self.bump();
            }
            match self.peek() {
                None => return Ok(false),
                Some('\n') => {
                    self.bump();
                    continue;
                }
                Some('#') => {
                    self.skip_comment();
                    continue;
                }
                Some(_) => {}
            }
            self.at_line_start = false;
            let current = *self.indents.last().unwrap_or(&0);
            if width > current {
                self.indents.push(width);
                self.push(Tok::Indent, self.line, 1);
            } else if width < current {
                while width < *self.indents.last().unwrap_or(&0) {
                    self.indents.pop();
                    self.push(Tok::Dedent, self.line, 1);
                }
                if width != *self.indents.last().unwrap_or(&0) {
                    return Err(self.error("unindent does not match any outer indentation level"));
                }
            }
            return Ok(true);
        }
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn lex_number(&mut self) -> Result<(), ParseError> {
        let (line, col) = (self.line, self.col);
        let start = self.pos;

        if self.peek() == Some('0')
            && matches!(self.peek_at(1), Some('x' | 'X' | 'o' | 'O' | 'b' | 'B'))
        {
            self.bump();
            let radix = match self.bump().map(|c| c.to_ascii_lowercase()) {
                Some('x') => 16,
                Some('o') => 8,
                _ => 2,
            };
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
                self.bump();
            }
            let digits: String = self.chars[digits_start..self.pos]
                .iter()
                .filter(|c| **c != '_')
                .collect();
            let value = i64::from_str_radix(&digits, radix)
                .map_err(|_| ParseError::new("invalid integer literal", line, col))?;
            self.push(Tok::Int(value), line, col);
            return Ok(());
        }

        let mut is_float = false;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.bump();
        }
        if self.peek() == Some('.') && !self.peek_at(1).is_some_and(is_ident_start) {
            is_float = true;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign_offset = usize::from(matches!(self.peek_at(1), Some('+' | '-')));
            if self.peek_at(1 + sign_offset).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.bump();
                if sign_offset == 1 {
                    self.bump();
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }
        if self.peek().is_some_and(is_ident_start) {
            return Err(self.error("invalid decimal literal"));
        }

        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if is_float {
            let value = text
                .parse::<f64>()
                .map_err(|_| ParseError::new("invalid float literal", line, col))?;
            self.push(Tok::Float(value), line, col);
        } else {
            match text.parse::<i64>() {
                Ok(value) => self.push(Tok::Int(value), line, col),
                Err(_) => return Err(ParseError::new("integer literal too large", line, col)),
            }
        }
        Ok(())
    }

    fn lex_string(&mut self, prefix: String) -> Result<(), ParseError> {
        let (line, col) = (self.line, self.col);
        self.lex_string_at(prefix, line, col)
    }

    fn lex_string_at(&mut self, prefix: String, line: usize, col: usize) -> Result<(), ParseError> {
        let raw = prefix.contains('r');
        let is_bytes = prefix.contains('b');
        let is_fstring = prefix.contains('f');
        if is_bytes && is_fstring {
            return Err(ParseError::new("invalid string prefix", line, col));
        }

        let quote = self.bump().ok_or_else(|| self.error("unexpected end of input"))?;
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut body = String::new();
        loop {
            let Some(ch) = self.bump() else {
                return Err(ParseError::new("unterminated string literal", line, col));
            };
            if ch == quote {
                if !triple {
                    break;
                }
                if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                    self.bump();
                    self.bump();
                    break;
                }
                body.push(ch);
                continue;
            }
            if ch == '\n' && !triple {
                return Err(ParseError::new("unterminated string literal", line, col));
            }
            if ch == '\\' {
                let Some(next) = self.bump() else {
                    return Err(ParseError::new("unterminated string literal", line, col));
                };
                // Keep escapes verbatim; they are decoded below (or per segment for f-strings).
                body.push('\\');
                body.push(next);
                continue;
            }
            body.push(ch);
        }

        let tok = if is_fstring {
            if raw {
                Tok::FStr(body.replace('\\', "\\\\"))
            } else {
                Tok::FStr(body)
            }
        } else if is_bytes {
            let text = if raw {
                body
            } else {
                unescape(&body).map_err(|msg| ParseError::new(msg, line, col))?
            };
            let mut bytes = Vec::with_capacity(text.len());
            for ch in text.chars() {
                let code = ch as u32;
                if code > 0xff {
                    return Err(ParseError::new(
                        "bytes can only contain ASCII literal characters",
                        line,
                        col,
                    ));
                }
                bytes.push(code as u8);
            }
            Tok::Bytes(bytes)
        } else if raw {
            Tok::Str(body)
        } else {
            Tok::Str(unescape(&body).map_err(|msg| ParseError::new(msg, line, col))?)
        };
        self.push(tok, line, col);
        Ok(())
    }

    fn lex_operator(&mut self) -> Result<(), ParseError> {
        let (line, col) = (self.line, self.col);
        for op in OPERATORS {
            let len = op.chars().count();
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, c)| self.peek_at(i) == Some(c));
            if matches {
                for _ in 0..len {
                    self.bump();
                }
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.push(Tok::Op(op), line, col);
                return Ok(());
            }
        }
        let ch = self.peek().unwrap_or('?');
        Err(self.error(format!("invalid character '{ch}'")))
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_ident_char(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

/// Decode backslash escapes in a string literal body.
pub fn unescape(body: &str) -> Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            '\n' => {}
            'x' => out.push(hex_escape(&mut chars, 2)?),
            'u' => out.push(hex_escape(&mut chars, 4)?),
            'U' => out.push(hex_escape(&mut chars, 8)?),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

fn hex_escape(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    len: usize,
) -> Result<char, String> {
    let mut code = 0u32;
    for _ in 0..len {
        let digit = chars
            .next()
            .and_then(|c| c.to_digit(16))
            .ok_or_else(|| "truncated \\x/\\u escape".to_string())?;
        code = code * 16 + digit;
    }
    char::from_u32(code).ok_or_else(|| format!("invalid unicode escape {code:#x}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn emits_layout_tokens() {
        let toks = kinds("if x:\n    y = 1\nz\n");
        assert!(toks.contains(&Tok::Indent));
        assert!(toks.contains(&Tok::Dedent));
        assert_eq!(toks.last(), Some(&Tok::Eof));
    }

    #[test]
    fn brackets_join_lines() {
        let toks = kinds("x = [1,\n  2]\n");
        let newlines = toks.iter().filter(|t| **t == Tok::Newline).count();
        assert_eq!(newlines, 1);
    }

    #[test]
    fn string_prefixes_and_escapes() {
        assert_eq!(kinds("'a\\nb'")[0], Tok::Str("a\nb".into()));
        assert_eq!(kinds("r'a\\nb'")[0], Tok::Str("a\\nb".into()));
        assert_eq!(kinds("b'hi'")[0], Tok::Bytes(b"hi".to_vec()));
        assert_eq!(kinds("f'{x}'")[0], Tok::FStr("{x}".into()));
        assert_eq!(kinds("'''a\nb'''")[0], Tok::Str("a\nb".into()));
    }

    #[test]
    fn numbers() {
        assert_eq!(kinds("1_000")[0], Tok::Int(1000));
        assert_eq!(kinds("2.5e3")[0], Tok::Float(2500.0));
        assert_eq!(kinds("0x1f")[0], Tok::Int(31));
    }

    #[test]
    fn bad_dedent_reports_line() {
        let err = tokenize("if x:\n    a\n  b\n").unwrap_err();
        assert_eq!(err.line, 3);
    }
}
