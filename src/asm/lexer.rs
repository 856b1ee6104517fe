//! Tokenizer for MTMC-16 assembly.
//!
//! The lexer never fails: anything it cannot make sense of becomes an
//! [`TokenKind::Error`] token, and the assembler reports it later. The
//! token stream always ends with [`TokenKind::Eof`].

use serde::{Serialize, Deserialize};
use std::fmt;

/// Default line comment leader.
pub const DEFAULT_COMMENT: &str = "#";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Colon,
    Comma,
    Dot,
    Minus,
    Plus,
    Slash,
    At,
    Star,
    QuestionMark,
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Identifier,
    /// An identifier directly followed by `:`. The text excludes the colon.
    Label,
    /// Text is the unescaped contents, without quotes.
    String,
    /// Text is the unescaped character, without quotes.
    Char,
    Integer,
    Decimal,
    Hex,
    Binary,
    Error,
    Eof,
}

/// A lexical token with its source span.
///
/// `start` and `end` are character offsets into the source; `line` is
/// 1-based and `line_offset` is the 0-based column of `start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub line_offset: usize,
}

impl Token {
    pub fn is_number(&self) -> bool {
        matches!(self.kind, TokenKind::Integer | TokenKind::Hex | TokenKind::Binary)
    }

    /// True when `next` begins exactly where this token ends.
    pub fn is_adjacent_to(&self, next: &Token) -> bool {
        self.end == next.start
    }

    /// Integer value of a numeric token.
    ///
    /// Decimal literals parse as signed; hex and binary literals are a
    /// 16-bit pattern in `0..=0xFFFF`. Returns `None` for anything else or
    /// for literals that do not fit.
    pub fn int_value(&self) -> Option<i32> {
        match self.kind {
            TokenKind::Integer => self.text.parse().ok(),
            TokenKind::Hex => {
                let digits = self.text.get(2..)?;
                u16::from_str_radix(digits, 16).ok().map(i32::from)
            }
            TokenKind::Binary => {
                let digits: String = self.text.get(2..)?.chars().filter(|&c| c != '_').collect();
                u16::from_str_radix(&digits, 2).ok().map(i32::from)
            }
            _ => None,
        }
    }

    /// Contents of a string, char or label token.
    pub fn string_value(&self) -> &str {
        &self.text
    }

    /// A token standing in for text the assembler synthesized, sharing
    /// this token's position.
    pub fn synthesized(&self, kind: TokenKind, text: &str) -> Token {
        Token { kind, text: text.to_string(), ..self.clone() }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::String => write!(f, "{:?}", self.text),
            TokenKind::Label => write!(f, "{}:", self.text),
            _ => f.write_str(&self.text),
        }
    }
}

/// Tokenize with the default `#` comment leader.
pub fn tokenize(source: &str) -> Vec<Token> {
    tokenize_with(source, DEFAULT_COMMENT)
}

/// Tokenize with a custom line comment leader.
pub fn tokenize_with(source: &str, comment_leader: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(source, comment_leader);
    lexer.scan();
    lexer.tokens
}

struct Lexer {
    chars: Vec<char>,
    comment: Vec<char>,
    pos: usize,
    line: u32,
    line_start: usize,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str, comment_leader: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            comment: comment_leader.chars().collect(),
            pos: 0,
            line: 1,
            line_start: 0,
            tokens: Vec::new(),
        }
    }

    fn scan(&mut self) {
        loop {
            self.skip_whitespace();
            if self.at_end() {
                break;
            }
            self.scan_token();
        }
        let pos = self.pos;
        self.push(TokenKind::Eof, String::new(), pos);
    }

    fn peek(&self) -> char {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> char {
        self.chars.get(self.pos + n).copied().unwrap_or('\0')
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn take(&mut self) -> char {
        let c = self.peek();
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.line_start = self.pos;
        }
        c
    }

    fn take_if(&mut self, c: char) -> bool {
        if !self.at_end() && self.peek() == c {
            self.take();
            true
        } else {
            false
        }
    }

    fn text_from(&self, start: usize) -> String {
        self.chars[start..self.pos].iter().collect()
    }

    fn push(&mut self, kind: TokenKind, text: String, start: usize) {
        // Tokens never span lines except unterminated strings, which
        // report the line they started on.
        let line = self.line_of(start);
        let line_offset = start - self.line_start_of(start);
        self.tokens.push(Token { kind, text, start, end: self.pos, line, line_offset });
    }

    fn line_of(&self, pos: usize) -> u32 {
        let newlines = self.chars[pos..self.pos].iter().filter(|&&c| c == '\n').count();
        self.line - newlines as u32
    }

    fn line_start_of(&self, pos: usize) -> usize {
        self.chars[..pos]
            .iter()
            .rposition(|&c| c == '\n')
            .map_or(0, |i| i + 1)
    }

    fn skip_whitespace(&mut self) {
        while !self.at_end() && self.peek().is_whitespace() {
            self.take();
        }
    }

    fn scan_token(&mut self) {
        if self.scan_line_comment()
            || self.scan_number()
            || self.scan_char()
            || self.scan_string()
            || self.scan_identifier()
        {
            return;
        }
        self.scan_syntax();
    }

    fn scan_line_comment(&mut self) -> bool {
        if self.comment.is_empty() {
            return false;
        }
        let matches = self
            .comment
            .iter()
            .enumerate()
            .all(|(i, &c)| self.peek_at(i) == c);
        if !matches {
            return false;
        }
        while !self.at_end() && self.peek() != '\n' {
            self.take();
        }
        true
    }

    fn scan_number(&mut self) -> bool {
        let c = self.peek();
        let negative = c == '-' && self.peek_at(1).is_ascii_digit();
        if !c.is_ascii_digit() && !negative {
            return false;
        }
        let start = self.pos;
        if negative {
            self.take();
        } else if c == '0' && self.peek_at(1) == 'x' {
            self.take();
            self.take();
            while self.peek().is_ascii_hexdigit() {
                self.take();
            }
            let text = self.text_from(start);
            self.push(TokenKind::Hex, text, start);
            return true;
        } else if c == '0' && self.peek_at(1) == 'b' {
            self.take();
            self.take();
            while matches!(self.peek(), '0' | '1' | '_') {
                self.take();
            }
            let text = self.text_from(start);
            self.push(TokenKind::Binary, text, start);
            return true;
        }

        while self.peek().is_ascii_digit() {
            self.take();
        }
        let kind = if self.peek() == '.' && self.peek_at(1).is_ascii_digit() {
            self.take();
            while self.peek().is_ascii_digit() {
                self.take();
            }
            TokenKind::Decimal
        } else {
            TokenKind::Integer
        };
        let text = self.text_from(start);
        self.push(kind, text, start);
        true
    }

    /// Consume one possibly escaped character of a string or char literal.
    fn take_escaped(&mut self, out: &mut String) {
        let c = self.take();
        if c != '\\' {
            out.push(c);
            return;
        }
        if self.at_end() {
            return;
        }
        match self.take() {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            other => out.push(other),
        }
    }

    fn scan_char(&mut self) -> bool {
        if self.peek() != '\'' {
            return false;
        }
        let start = self.pos;
        self.take();

        let mut value = String::new();
        if !self.at_end() && self.peek() != '\n' {
            self.take_escaped(&mut value);
        }
        if self.take_if('\'') && value.chars().count() == 1 {
            self.push(TokenKind::Char, value, start);
        } else {
            let text = self.text_from(start);
            self.push(TokenKind::Error, format!("<Unterminated char: {}>", text), start);
        }
        true
    }

    fn scan_string(&mut self) -> bool {
        if self.peek() != '"' {
            return false;
        }
        let start = self.pos;
        self.take();

        let mut value = String::new();
        loop {
            if self.at_end() {
                let text = self.text_from(start);
                self.push(TokenKind::Error, format!("<Unterminated string: {}>", text), start);
                return true;
            }
            if self.take_if('"') {
                break;
            }
            self.take_escaped(&mut value);
        }
        self.push(TokenKind::String, value, start);
        true
    }

    fn scan_identifier(&mut self) -> bool {
        let c = self.peek();
        if !(c.is_ascii_alphabetic() || c == '_') {
            return false;
        }
        let start = self.pos;
        while self.peek().is_ascii_alphanumeric() || self.peek() == '_' {
            self.take();
        }
        let name = self.text_from(start);
        if self.take_if(':') {
            self.push(TokenKind::Label, name, start);
        } else {
            self.push(TokenKind::Identifier, name, start);
        }
        true
    }

    fn scan_syntax(&mut self) {
        use TokenKind::*;

        let start = self.pos;
        let c = self.take();
        let kind = match c {
            '(' => LeftParen,
            ')' => RightParen,
            '{' => LeftBrace,
            '}' => RightBrace,
            '[' => LeftBracket,
            ']' => RightBracket,
            ':' => Colon,
            ',' => Comma,
            '.' => Dot,
            '-' => Minus,
            '+' => Plus,
            '/' => Slash,
            '@' => At,
            '*' => Star,
            '?' => QuestionMark,
            '!' => if self.take_if('=') { BangEqual } else { Bang },
            '=' => if self.take_if('=') { EqualEqual } else { Equal },
            '>' => if self.take_if('=') { GreaterEqual } else { Greater },
            '<' => if self.take_if('=') { LessEqual } else { Less },
            other => {
                self.push(Error, format!("<Unexpected Token: [{}]>", other), start);
                return;
            }
        };
        let text = self.text_from(start);
        self.push(kind, text, start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_empty_source_is_eof() {
        assert_eq!(kinds(""), vec![TokenKind::Eof]);
        assert_eq!(kinds("   # just a comment"), vec![TokenKind::Eof]);
    }

    #[test]
    fn test_numbers() {
        let tokens = tokenize("42 -7 0x1F 0b1010_0001 3.25 - 5");
        let got: Vec<_> = tokens.iter().map(|t| (t.kind, t.text.as_str())).collect();
        assert_eq!(
            got,
            vec![
                (TokenKind::Integer, "42"),
                (TokenKind::Integer, "-7"),
                (TokenKind::Hex, "0x1F"),
                (TokenKind::Binary, "0b1010_0001"),
                (TokenKind::Decimal, "3.25"),
                (TokenKind::Minus, "-"),
                (TokenKind::Integer, "5"),
                (TokenKind::Eof, ""),
            ]
        );
        assert_eq!(tokens[1].int_value(), Some(-7));
        assert_eq!(tokens[2].int_value(), Some(31));
        assert_eq!(tokens[3].int_value(), Some(0xA1));
        assert_eq!(tokens[4].int_value(), None);
    }

    #[test]
    fn test_hex_is_a_16_bit_pattern() {
        let tokens = tokenize("0xFFFF 0x10000");
        assert_eq!(tokens[0].int_value(), Some(0xFFFF));
        assert_eq!(tokens[1].int_value(), None);
    }

    #[test]
    fn test_labels_and_identifiers() {
        let tokens = tokenize("loop: add t0 t1");
        assert_eq!(tokens[0].kind, TokenKind::Label);
        assert_eq!(tokens[0].text, "loop");
        assert_eq!(tokens[0].end, 5);
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].text, "add");
        assert_eq!(tokens[1].line_offset, 6);
    }

    #[test]
    fn test_strings_and_chars() {
        let tokens = tokenize(r#""a\tb\n\"q\"" 'x' '\n'"#);
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].text, "a\tb\n\"q\"");
        assert_eq!(tokens[1].kind, TokenKind::Char);
        assert_eq!(tokens[1].text, "x");
        assert_eq!(tokens[2].text, "\n");
    }

    #[test]
    fn test_unterminated_string_is_error() {
        let tokens = tokenize("\"abc");
        assert_eq!(tokens[0].kind, TokenKind::Error);
        assert_eq!(tokens.last().map(|t| t.kind), Some(TokenKind::Eof));
    }

    #[test]
    fn test_unexpected_character() {
        let tokens = tokenize("mv ~ t0");
        assert_eq!(tokens[1].kind, TokenKind::Error);
        assert_eq!(tokens[1].text, "<Unexpected Token: [~]>");
        assert_eq!(tokens[2].kind, TokenKind::Identifier);
    }

    #[test]
    fn test_punctuation() {
        assert_eq!(
            kinds(". @ != == <= >= < > ! = ( ) [ ] { } ? , + * /"),
            vec![
                TokenKind::Dot, TokenKind::At, TokenKind::BangEqual, TokenKind::EqualEqual,
                TokenKind::LessEqual, TokenKind::GreaterEqual, TokenKind::Less, TokenKind::Greater,
                TokenKind::Bang, TokenKind::Equal, TokenKind::LeftParen, TokenKind::RightParen,
                TokenKind::LeftBracket, TokenKind::RightBracket, TokenKind::LeftBrace,
                TokenKind::RightBrace, TokenKind::QuestionMark, TokenKind::Comma, TokenKind::Plus,
                TokenKind::Star, TokenKind::Slash, TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_line_numbers() {
        let tokens = tokenize("a\n  b # c\n\nd");
        let lines: Vec<_> = tokens.iter().map(|t| (t.text.as_str(), t.line, t.line_offset)).collect();
        assert_eq!(lines, vec![("a", 1, 0), ("b", 2, 2), ("d", 4, 0), ("", 4, 1)]);
    }

    #[test]
    fn test_custom_comment_leader() {
        let tokens = tokenize_with("nop ; comment\n# not a comment", ";");
        assert_eq!(tokens[0].text, "nop");
        assert_eq!(tokens[1].kind, TokenKind::Error);
    }

    #[test]
    fn test_adjacency() {
        let tokens = tokenize(".data . text");
        assert!(tokens[0].is_adjacent_to(&tokens[1]));
        assert!(!tokens[2].is_adjacent_to(&tokens[3]));
    }
}
