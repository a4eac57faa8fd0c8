//! Hand-written lexer for the source language.
//
//  Lexical items:
//
//      Ident    ::= [A-Za-z_][A-Za-z0-9_]*     (keywords are split off afterwards)
//      Int      ::= [1-9][0-9]* | 0[0-7]* | 0x[0-9A-Fa-f]+   (fits in 32 bits)
//      Symbols  ::= ( ) { } , ; = == != > < >= <= + - * / %
//      Whitespace and comments (// until end-of-line) are discarded.

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use crate::error::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Eof,
    Ident,
    IntLiteral(u32),

    // keywords
    Void,
    Int,
    If,
    Else,
    While,
    For,
    Do,
    Return,
    Print,

    // punctuation
    OpenParen,
    CloseParen,
    OpenBrace,
    CloseBrace,
    Comma,
    Semicolon,

    // operators
    Assign,
    EqEq,
    NotEq,
    Gt,
    Lt,
    Ge,
    Le,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCategory {
    Keyword,
    Identifier,
    Literal,
    Operator,
    Punctuation,
    EndMarker,
}

const KEYWORDS: &[(&str, TokenKind)] = &[
    ("void", TokenKind::Void),
    ("int", TokenKind::Int),
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("while", TokenKind::While),
    ("for", TokenKind::For),
    ("do", TokenKind::Do),
    ("return", TokenKind::Return),
    ("print", TokenKind::Print),
];

impl TokenKind {
    pub fn category(self) -> TokenCategory {
        use TokenKind::*;
        match self {
            Eof => TokenCategory::EndMarker,
            Ident => TokenCategory::Identifier,
            IntLiteral(_) => TokenCategory::Literal,
            Void | Int | If | Else | While | For | Do | Return | Print => TokenCategory::Keyword,
            OpenParen | CloseParen | OpenBrace | CloseBrace | Comma | Semicolon => {
                TokenCategory::Punctuation
            }
            Assign | EqEq | NotEq | Gt | Lt | Ge | Le | Plus | Minus | Star | Slash | Percent => {
                TokenCategory::Operator
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw source text; empty for the end marker.
    pub text: String,
    pub line: usize,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Eof => f.write_str("end of input"),
            _ => write!(f, "'{}'", self.text),
        }
    }
}

#[derive(Clone)]
pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
    finished: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().peekable(),
            line: 1,
            finished: false,
        }
    }

    fn next_char(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn consume_while<F: Fn(char) -> bool>(&mut self, pred: F, buf: &mut String) {
        while let Some(c) = self.peek_char() {
            if pred(c) {
                buf.push(c);
                self.next_char();
            } else {
                break;
            }
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_char() {
                Some(c) if c.is_ascii_whitespace() => {
                    self.next_char();
                }
                Some('/') => {
                    // only a second '/' makes this a comment
                    let mut ahead = self.chars.clone();
                    ahead.next();
                    if ahead.peek() != Some(&'/') {
                        return;
                    }
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.next_char();
                    }
                }
                _ => return,
            }
        }
    }

    fn read_identifier(&mut self, first: char) -> (TokenKind, String) {
        let mut id = String::new();
        id.push(first);
        self.consume_while(|c| c.is_ascii_alphanumeric() || c == '_', &mut id);
        let kind = KEYWORDS
            .iter()
            .find(|(kw, _)| *kw == id)
            .map(|(_, kind)| *kind)
            .unwrap_or(TokenKind::Ident);
        (kind, id)
    }

    fn read_number(&mut self, first: char) -> Result<(TokenKind, String), CompileError> {
        let line = self.line;
        let mut text = String::new();
        text.push(first);

        let radix = if first == '0' && self.peek_char() == Some('x') {
            self.next_char();
            text.push('x');
            16
        } else if first == '0' {
            8
        } else {
            10
        };

        // Swallow the whole alphanumeric run so that e.g. `0x1g` or `12ab`
        // is rejected instead of splitting into two tokens.
        let mut digits = String::new();
        if radix != 16 {
            // the leading digit belongs to the value for decimal and octal
            digits.push(first);
        }
        while let Some(c) = self.peek_char() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            if !c.is_digit(radix) {
                let base = match radix {
                    8 => " (base 8!)",
                    16 => " (base 16!)",
                    _ => "",
                };
                return Err(CompileError::lex(
                    line,
                    format!("illegal character '{c}' in int literal{base}"),
                ));
            }
            digits.push(c);
            text.push(c);
            self.next_char();
        }

        if digits.is_empty() {
            return Err(CompileError::lex(line, format!("int literal '{text}' has no digits")));
        }

        let value = u32::from_str_radix(&digits, radix).map_err(|_| {
            CompileError::lex(line, format!("overflow in int literal '{text}'"))
        })?;
        Ok((TokenKind::IntLiteral(value), text))
    }

    fn read_symbol(&mut self, c: char) -> Result<(TokenKind, String), CompileError> {
        let followed_by_eq = |lexer: &mut Self| {
            if lexer.peek_char() == Some('=') {
                lexer.next_char();
                true
            } else {
                false
            }
        };

        let kind = match c {
            '(' => TokenKind::OpenParen,
            ')' => TokenKind::CloseParen,
            '{' => TokenKind::OpenBrace,
            '}' => TokenKind::CloseBrace,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '=' if followed_by_eq(self) => TokenKind::EqEq,
            '=' => TokenKind::Assign,
            '<' if followed_by_eq(self) => TokenKind::Le,
            '<' => TokenKind::Lt,
            '>' if followed_by_eq(self) => TokenKind::Ge,
            '>' => TokenKind::Gt,
            '!' if followed_by_eq(self) => TokenKind::NotEq,
            e => {
                return Err(CompileError::lex(
                    self.line,
                    format!("illegal character '{e}'"),
                ));
            }
        };

        let text = match kind {
            TokenKind::EqEq => "==".to_string(),
            TokenKind::Le => "<=".to_string(),
            TokenKind::Ge => ">=".to_string(),
            TokenKind::NotEq => "!=".to_string(),
            _ => c.to_string(),
        };
        Ok((kind, text))
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token, CompileError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        self.skip_trivia();
        let line = self.line;

        let ch = match self.next_char() {
            Some(c) => c,
            None => {
                self.finished = true;
                return Some(Ok(Token {
                    kind: TokenKind::Eof,
                    text: String::new(),
                    line,
                }));
            }
        };

        let res = match ch {
            c if c.is_ascii_digit() => self.read_number(c),
            c if c.is_ascii_alphabetic() || c == '_' => Ok(self.read_identifier(c)),
            c => self.read_symbol(c),
        };

        Some(match res {
            Ok((kind, text)) => Ok(Token { kind, text, line }),
            Err(e) => {
                self.finished = true;
                Err(e)
            }
        })
    }
}

/// Lex a whole source file. The result always ends with a single
/// [`TokenKind::Eof`] token.
pub fn tokenize(src: &str) -> Result<Vec<Token>, CompileError> {
    Lexer::new(src).collect()
}
