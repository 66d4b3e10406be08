use std::str::Chars;

use itertools::{peek_nth, PeekNth};

use crate::frontend::{
    token::{Keyword, Tok},
    SourceFile, Span,
};

/// Whether the scanner reports comment tokens or swallows them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    #[default]
    Normal,
    /// Comments are produced as [`Tok::Comment`] tokens.
    KeepComments,
}

/// Hand-written scanner over one source file. The cursor interface is what
/// the parser consumes: [`Scanner::tok`] and [`Scanner::span`] describe the
/// current token, the `*_val` accessors carry decoded literal values, and
/// [`Scanner::next`] advances.
///
/// The scanner is `Clone` so the parser's backtracking harness can snapshot
/// token position, look-ahead and literal buffers in one move.
#[derive(Debug, Clone)]
pub struct Scanner<'s> {
    source: &'s SourceFile,
    chars: PeekNth<Chars<'s>>,
    /// File-relative byte offset of the next unread char.
    offset: u32,
    line: u32,
    mode: ScanMode,

    /// Current token.
    pub tok: Tok,
    /// Global span of the current token.
    pub span: Span,
    /// Line (0-based) on which the current token starts.
    pub tok_line: u32,

    int_val: u64,
    float_val: f64,
    byte_val: Vec<u8>,
    /// FNV-1a hash of the current `Name`/`NameAt` token's bytes.
    pub hash: u64,

    /// Scan errors not yet drained by the parser.
    pub errors: Vec<(Span, String)>,
}

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

impl<'s> Scanner<'s> {
    pub fn new(source: &'s SourceFile, mode: ScanMode) -> Self {
        let mut scanner = Self {
            source,
            chars: peek_nth(source.contents.chars()),
            offset: 0,
            line: 0,
            mode,
            tok: Tok::Eof,
            span: Span::new(source.base, source.base),
            tok_line: 0,
            int_val: 0,
            float_val: 0.0,
            byte_val: Vec::new(),
            hash: 0,
            errors: Vec::new(),
        };
        scanner.next();
        scanner
    }

    pub fn source(&self) -> &'s SourceFile {
        self.source
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    /// Source text of the current token.
    pub fn lexeme(&self) -> &'s str {
        self.source.value_of_span(self.span)
    }

    /// Decoded value of an integer or character literal, as scanned (always
    /// non-negative; signs are operators).
    pub fn int_val(&self) -> u64 {
        self.int_val
    }

    pub fn int32_val(&self) -> i32 {
        self.int_val as u32 as i32
    }

    pub fn int64_val(&self) -> i64 {
        self.int_val as i64
    }

    pub fn float_val(&self) -> f64 {
        self.float_val
    }

    /// Returns the decoded bytes of the current string literal and clears
    /// the scanner's buffer.
    pub fn take_byte_value(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.byte_val)
    }

    fn error(&mut self, start: u32, message: impl Into<String>) {
        let span = self.global_span(start);
        self.errors.push((span, message.into()));
    }

    fn global_span(&self, start: u32) -> Span {
        Span::new(self.source.base + start, self.source.base + self.offset)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn peek_nth(&mut self, n: usize) -> Option<char> {
        self.chars.peek_nth(n).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.offset += c.len_utf8() as u32;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    /// Consumes the next char when it equals `expected`.
    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    /// Advances the cursor to the next token.
    pub fn next(&mut self) {
        loop {
            self.skip_whitespace();
            let start = self.offset;
            self.tok_line = self.line;

            let Some(c) = self.peek() else {
                self.tok = Tok::Eof;
                self.span = self.global_span(start);
                return;
            };

            let tok = match c {
                '/' if self.peek_nth(1) == Some('/') || self.peek_nth(1) == Some('*') => {
                    self.read_comment();
                    if self.mode == ScanMode::KeepComments {
                        Tok::Comment
                    } else {
                        continue;
                    }
                }
                '0'..='9' => self.read_number(start),
                '"' => self.read_string(start),
                '\'' => self.read_char(start),
                '@' => {
                    self.bump();
                    self.read_word(start);
                    Tok::NameAt
                }
                c if c.is_ascii_alphabetic() || c == '_' => self.read_word(start),
                _ => self.read_punctuation(start),
            };

            self.tok = tok;
            self.span = self.global_span(start);
            return;
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_ascii_whitespace() {
                break;
            }
            self.bump();
        }
    }

    fn read_comment(&mut self) {
        self.bump(); // '/'
        if self.eat('/') {
            while let Some(c) = self.peek() {
                if c == '\n' {
                    break;
                }
                self.bump();
            }
        } else {
            let start = self.offset;
            self.bump(); // '*'
            loop {
                match self.bump() {
                    Some('*') if self.eat('/') => break,
                    Some(_) => {}
                    None => {
                        self.error(start, "unterminated block comment");
                        break;
                    }
                }
            }
        }
    }

    // Keyword or identifier; also computes the identifier fast-hash.
    fn read_word(&mut self, start: u32) -> Tok {
        let mut hash = FNV_OFFSET;

        while let Some(c) = self.peek() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                hash = (hash ^ b as u64).wrapping_mul(FNV_PRIME);
            }
            self.bump();
        }

        self.hash = hash;

        let span = self.global_span(start);
        let value = self.source.value_of_span(span);

        match value.parse::<Keyword>() {
            Ok(keyword) => Tok::Keyword(keyword),
            Err(_) => Tok::Name,
        }
    }

    fn read_number(&mut self, start: u32) -> Tok {
        if self.peek() == Some('0') {
            match self.peek_nth(1) {
                Some('b' | 'B') => return self.read_radix_int(start, 2, Tok::IntBin),
                Some('o' | 'O') => return self.read_radix_int(start, 8, Tok::IntOct),
                Some('x' | 'X') => return self.read_radix_int(start, 16, Tok::IntHex),
                _ => {}
            }
        }

        let mut is_float = false;

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.bump();
            } else if c == '.' && !is_float && self.peek_nth(1).is_some_and(|c| c.is_ascii_digit())
            {
                is_float = true;
                self.bump();
            } else if (c == 'e' || c == 'E')
                && self
                    .peek_nth(1)
                    .is_some_and(|c| c.is_ascii_digit() || c == '+' || c == '-')
            {
                is_float = true;
                self.bump(); // e
                self.bump(); // sign or first digit
            } else {
                break;
            }
        }

        let span = self.global_span(start);
        let text: String = self
            .source
            .value_of_span(span)
            .chars()
            .filter(|&c| c != '_')
            .collect();

        if is_float {
            match text.parse::<f64>() {
                Ok(v) => self.float_val = v,
                Err(_) => {
                    self.float_val = 0.0;
                    self.error(start, format!("invalid float literal {text}"));
                }
            }
            Tok::Float
        } else {
            match text.parse::<u64>() {
                Ok(v) => self.int_val = v,
                Err(_) => {
                    self.int_val = 0;
                    self.error(start, format!("integer literal {text} overflows 64 bits"));
                }
            }
            Tok::Int
        }
    }

    fn read_radix_int(&mut self, start: u32, radix: u32, tok: Tok) -> Tok {
        self.bump(); // '0'
        self.bump(); // radix letter

        let mut value: u64 = 0;
        let mut digits = 0;
        let mut overflow = false;

        while let Some(c) = self.peek() {
            if c == '_' {
                self.bump();
                continue;
            }
            let Some(d) = c.to_digit(radix) else {
                if c.is_ascii_alphanumeric() {
                    self.bump();
                    self.error(start, format!("invalid digit {c:?} in base-{radix} literal"));
                    continue;
                }
                break;
            };
            self.bump();
            digits += 1;
            value = match value
                .checked_mul(radix as u64)
                .and_then(|v| v.checked_add(d as u64))
            {
                Some(v) => v,
                None => {
                    overflow = true;
                    0
                }
            };
        }

        if digits == 0 {
            self.error(start, "integer literal has no digits");
        }
        if overflow {
            self.error(start, "integer literal overflows 64 bits");
        }

        self.int_val = value;
        tok
    }

    fn read_string(&mut self, start: u32) -> Tok {
        self.bump(); // opening quote
        self.byte_val.clear();

        loop {
            match self.peek() {
                None | Some('\n') => {
                    self.error(start, "unterminated string literal");
                    break;
                }
                Some('"') => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    if let Some(c) = self.read_escape(start) {
                        let mut buf = [0u8; 4];
                        self.byte_val
                            .extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                    }
                }
                Some(c) => {
                    self.bump();
                    let mut buf = [0u8; 4];
                    self.byte_val
                        .extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
            }
        }

        Tok::Str
    }

    fn read_char(&mut self, start: u32) -> Tok {
        self.bump(); // opening quote

        let value = match self.peek() {
            None | Some('\n') | Some('\'') => {
                self.error(start, "empty character literal");
                None
            }
            Some('\\') => {
                self.bump();
                self.read_escape(start)
            }
            Some(c) => {
                self.bump();
                Some(c)
            }
        };

        if !self.eat('\'') {
            self.error(start, "unterminated character literal");
        }

        self.int_val = value.map(|c| c as u32 as u64).unwrap_or(0);
        Tok::Char
    }

    fn read_escape(&mut self, start: u32) -> Option<char> {
        let c = match self.bump() {
            Some(c) => c,
            None => {
                self.error(start, "unterminated escape sequence");
                return None;
            }
        };

        match c {
            'n' => Some('\n'),
            't' => Some('\t'),
            'r' => Some('\r'),
            '0' => Some('\0'),
            '\\' => Some('\\'),
            '\'' => Some('\''),
            '"' => Some('"'),
            'x' => {
                let mut v = 0u32;
                for _ in 0..2 {
                    match self.peek().and_then(|c| c.to_digit(16)) {
                        Some(d) => {
                            self.bump();
                            v = v * 16 + d;
                        }
                        None => {
                            self.error(start, "invalid \\x escape");
                            return None;
                        }
                    }
                }
                char::from_u32(v)
            }
            'u' => {
                if !self.eat('{') {
                    self.error(start, "expected `{` after \\u");
                    return None;
                }
                let mut v = 0u32;
                let mut digits = 0;
                while let Some(d) = self.peek().and_then(|c| c.to_digit(16)) {
                    self.bump();
                    v = v.saturating_mul(16).saturating_add(d);
                    digits += 1;
                }
                if !self.eat('}') || digits == 0 {
                    self.error(start, "invalid \\u escape");
                    return None;
                }
                match char::from_u32(v) {
                    Some(c) => Some(c),
                    None => {
                        self.error(start, format!("\\u{{{v:x}}} is not a valid scalar value"));
                        None
                    }
                }
            }
            _ => {
                self.error(start, format!("unknown escape sequence \\{c}"));
                None
            }
        }
    }

    fn read_punctuation(&mut self, start: u32) -> Tok {
        let c = self.bump().expect("caller checked peek");

        match c {
            '(' => Tok::LParen,
            ')' => Tok::RParen,
            '[' => Tok::LBracket,
            ']' => Tok::RBracket,
            '{' => Tok::LBrace,
            '}' => Tok::RBrace,
            ';' => Tok::Semi,
            ',' => Tok::Comma,
            ':' => Tok::Colon,
            '?' => Tok::Question,
            '~' => Tok::Tilde,
            '.' => {
                if self.peek() == Some('.') && self.peek_nth(1) == Some('.') {
                    self.bump();
                    self.bump();
                    Tok::Ellipsis
                } else {
                    Tok::Dot
                }
            }
            '+' => {
                if self.eat('+') {
                    Tok::Inc
                } else if self.eat('=') {
                    Tok::PlusAssign
                } else {
                    Tok::Plus
                }
            }
            '-' => {
                if self.eat('-') {
                    Tok::Dec
                } else if self.eat('=') {
                    Tok::MinusAssign
                } else if self.eat('>') {
                    Tok::Arrow
                } else {
                    Tok::Minus
                }
            }
            '*' => {
                if self.eat('=') {
                    Tok::StarAssign
                } else {
                    Tok::Star
                }
            }
            '/' => {
                if self.eat('=') {
                    Tok::SlashAssign
                } else {
                    Tok::Slash
                }
            }
            '%' => {
                if self.eat('=') {
                    Tok::PercentAssign
                } else {
                    Tok::Percent
                }
            }
            '=' => {
                if self.eat('=') {
                    Tok::Eq
                } else {
                    Tok::Assign
                }
            }
            '!' => {
                if self.eat('=') {
                    Tok::Ne
                } else {
                    Tok::Not
                }
            }
            '<' => {
                if self.eat('<') {
                    if self.eat('=') {
                        Tok::ShlAssign
                    } else {
                        Tok::Shl
                    }
                } else if self.eat('=') {
                    Tok::Le
                } else {
                    Tok::Lt
                }
            }
            '>' => {
                if self.eat('>') {
                    if self.eat('=') {
                        Tok::ShrAssign
                    } else {
                        Tok::Shr
                    }
                } else if self.eat('=') {
                    Tok::Ge
                } else {
                    Tok::Gt
                }
            }
            '&' => {
                if self.eat('&') {
                    Tok::AndAnd
                } else if self.eat('^') {
                    if self.eat('=') {
                        Tok::AmpCaretAssign
                    } else {
                        Tok::AmpCaret
                    }
                } else if self.eat('=') {
                    Tok::AmpAssign
                } else {
                    Tok::Amp
                }
            }
            '|' => {
                if self.eat('|') {
                    Tok::OrOr
                } else if self.eat('=') {
                    Tok::PipeAssign
                } else {
                    Tok::Pipe
                }
            }
            '^' => {
                if self.eat('=') {
                    Tok::CaretAssign
                } else {
                    Tok::Caret
                }
            }
            _ => {
                self.error(start, format!("unexpected character {c:?}"));
                // Produce something harmless; the parser reports at token
                // granularity.
                Tok::Semi
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{FileSet, SourceFileOrigin};

    fn scan_kinds(src: &str) -> Vec<Tok> {
        let mut files = FileSet::new();
        let id = files.add(SourceFileOrigin::Memory, src.to_owned());
        let mut s = Scanner::new(files.get(id), ScanMode::Normal);
        let mut out = Vec::new();
        while s.tok != Tok::Eof {
            out.push(s.tok);
            s.next();
        }
        out
    }

    #[test]
    fn keywords_and_names() {
        assert_eq!(
            scan_kinds("fun foo @bar interface"),
            vec![
                Tok::Keyword(Keyword::Fun),
                Tok::Name,
                Tok::NameAt,
                Tok::Keyword(Keyword::Interface),
            ]
        );
    }

    #[test]
    fn numeric_literal_values() {
        let mut files = FileSet::new();
        let id = files.add(
            SourceFileOrigin::Memory,
            "123 0b101 0o17 0xFF 2.5 1e3 'A'".to_owned(),
        );
        let mut s = Scanner::new(files.get(id), ScanMode::Normal);

        assert_eq!((s.tok, s.int_val()), (Tok::Int, 123));
        s.next();
        assert_eq!((s.tok, s.int_val()), (Tok::IntBin, 5));
        s.next();
        assert_eq!((s.tok, s.int_val()), (Tok::IntOct, 15));
        s.next();
        assert_eq!((s.tok, s.int_val()), (Tok::IntHex, 255));
        s.next();
        assert_eq!(s.tok, Tok::Float);
        assert_eq!(s.float_val(), 2.5);
        s.next();
        assert_eq!(s.tok, Tok::Float);
        assert_eq!(s.float_val(), 1000.0);
        s.next();
        assert_eq!((s.tok, s.int_val()), (Tok::Char, 'A' as u64));
    }

    #[test]
    fn string_escapes() {
        let mut files = FileSet::new();
        let id = files.add(SourceFileOrigin::Memory, r#""a\n\x41\u{1F600}""#.to_owned());
        let mut s = Scanner::new(files.get(id), ScanMode::Normal);

        assert_eq!(s.tok, Tok::Str);
        assert_eq!(s.take_byte_value(), "a\nA\u{1F600}".as_bytes());
        assert!(s.take_byte_value().is_empty());
        assert!(s.errors.is_empty());
    }

    #[test]
    fn multi_char_operators() {
        assert_eq!(
            scan_kinds("a <<= b &^ c ... -> ++"),
            vec![
                Tok::Name,
                Tok::ShlAssign,
                Tok::Name,
                Tok::AmpCaret,
                Tok::Name,
                Tok::Ellipsis,
                Tok::Arrow,
                Tok::Inc,
            ]
        );
    }

    #[test]
    fn comment_modes() {
        assert_eq!(scan_kinds("a // hi\nb /* x */ c"), vec![Tok::Name; 3]);

        let mut files = FileSet::new();
        let id = files.add(SourceFileOrigin::Memory, "a // hi\nb".to_owned());
        let mut s = Scanner::new(files.get(id), ScanMode::KeepComments);
        let mut kinds = Vec::new();
        while s.tok != Tok::Eof {
            kinds.push(s.tok);
            s.next();
        }
        assert_eq!(kinds, vec![Tok::Name, Tok::Comment, Tok::Name]);
    }

    #[test]
    fn identifier_hash_is_stable() {
        let mut files = FileSet::new();
        let id = files.add(SourceFileOrigin::Memory, "foo bar foo".to_owned());
        let mut s = Scanner::new(files.get(id), ScanMode::Normal);
        let h1 = s.hash;
        s.next();
        let h2 = s.hash;
        s.next();
        assert_eq!(s.hash, h1);
        assert_ne!(h1, h2);
    }
}
