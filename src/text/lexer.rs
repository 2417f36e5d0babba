//! Tokenizer for textual IL

use crate::error::{Error, Result};

/// Token kinds of the IL grammar
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Bare word: mnemonics, labels, type names, file paths
    Ident(String),
    /// Integer literal
    Int(i64),
    /// Float literal (always carries a `.` or exponent in canonical form)
    Float(f64),
    /// Quoted string literal, unescaped
    Str(String),
    /// `%`
    Percent,
    /// `@`
    At,
    /// `,`
    Comma,
    /// `:`
    Colon,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `=`
    Equals,
    /// `->`
    Arrow,
    /// End of input
    Eof,
}

/// A token with its position in the input
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// What was lexed
    pub kind: TokenKind,
    /// 1-indexed line
    pub line: u32,
    /// 1-indexed column
    pub col: u32,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, '_' | '.' | '$' | '/' | '\\')
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$' | '/' | '\\')
}

/// Character-level scanner producing the token stream in one pass
pub struct Lexer<'a> {
    file: &'a str,
    source: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    /// Create a lexer; `file` is used only for error reporting
    pub fn new(file: &'a str, source: &str) -> Self {
        Lexer {
            file,
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let (line, col) = (self.line, self.col);
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    line,
                    col,
                });
                return Ok(tokens);
            };
            let kind = match c {
                '%' => self.punct(TokenKind::Percent),
                '@' => self.punct(TokenKind::At),
                ',' => self.punct(TokenKind::Comma),
                ':' => self.punct(TokenKind::Colon),
                '(' => self.punct(TokenKind::LParen),
                ')' => self.punct(TokenKind::RParen),
                '{' => self.punct(TokenKind::LBrace),
                '}' => self.punct(TokenKind::RBrace),
                '=' => self.punct(TokenKind::Equals),
                '"' => self.string(line, col)?,
                '-' => self.minus(line, col)?,
                c if c.is_ascii_digit() => self.number(false, line, col)?,
                c if is_ident_start(c) => self.ident(),
                other => {
                    return Err(Error::parse(
                        self.file,
                        line,
                        col,
                        format!("unexpected character {other:?}"),
                    ))
                }
            };
            tokens.push(Token { kind, line, col });
        }
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' | '\n' => {
                    self.advance();
                }
                ';' => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn punct(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    fn minus(&mut self, line: u32, col: u32) -> Result<TokenKind> {
        self.advance();
        match self.peek() {
            Some('>') => {
                self.advance();
                Ok(TokenKind::Arrow)
            }
            Some(c) if c.is_ascii_digit() => self.number(true, line, col),
            // `-inf` is the one word-shaped negative literal
            Some(c) if c.is_ascii_alphabetic() => {
                let mut word = String::from("-");
                while self.peek().is_some_and(is_ident_continue) {
                    word.push(self.advance().unwrap());
                }
                Ok(TokenKind::Ident(word))
            }
            _ => Err(Error::parse(self.file, line, col, "stray '-'")),
        }
    }

    fn number(&mut self, negative: bool, line: u32, col: u32) -> Result<TokenKind> {
        let mut text = String::new();
        if negative {
            text.push('-');
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => {
                    text.push(self.advance().unwrap());
                }
                '.' => {
                    // Only one dot, and only with a digit after it; anything
                    // else belongs to the next token.
                    if is_float
                        || !self
                            .source
                            .get(self.pos + 1)
                            .is_some_and(|c| c.is_ascii_digit())
                    {
                        break;
                    }
                    is_float = true;
                    text.push(self.advance().unwrap());
                }
                'e' | 'E' => {
                    is_float = true;
                    text.push(self.advance().unwrap());
                    if matches!(self.peek(), Some('+') | Some('-')) {
                        text.push(self.advance().unwrap());
                    }
                }
                _ => break,
            }
        }
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| Error::parse(self.file, line, col, format!("bad float {text:?}")))
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| Error::parse(self.file, line, col, format!("bad integer {text:?}")))
        }
    }

    fn ident(&mut self) -> TokenKind {
        let mut text = String::new();
        while self.peek().is_some_and(is_ident_continue) {
            text.push(self.advance().unwrap());
        }
        TokenKind::Ident(text)
    }

    fn string(&mut self, line: u32, col: u32) -> Result<TokenKind> {
        self.advance(); // opening quote
        let mut bytes: Vec<u8> = Vec::new();
        loop {
            let Some(c) = self.advance() else {
                return Err(Error::parse(self.file, line, col, "unterminated string"));
            };
            match c {
                '"' => break,
                '\\' => {
                    let Some(esc) = self.advance() else {
                        return Err(Error::parse(self.file, line, col, "unterminated escape"));
                    };
                    match esc {
                        '\\' => bytes.push(b'\\'),
                        '"' => bytes.push(b'"'),
                        h1 if h1.is_ascii_hexdigit() => {
                            let Some(h2) = self.advance().filter(|c| c.is_ascii_hexdigit()) else {
                                return Err(Error::parse(
                                    self.file,
                                    line,
                                    col,
                                    "hex escape needs two digits",
                                ));
                            };
                            let hi = h1.to_digit(16).unwrap() as u8;
                            let lo = h2.to_digit(16).unwrap() as u8;
                            bytes.push(hi << 4 | lo);
                        }
                        other => {
                            return Err(Error::parse(
                                self.file,
                                line,
                                col,
                                format!("unknown escape \\{other}"),
                            ))
                        }
                    }
                }
                c => {
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
        String::from_utf8(bytes)
            .map(TokenKind::Str)
            .map_err(|_| Error::parse(self.file, line, col, "string is not valid UTF-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new("<test>", src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_basic_tokens() {
        let toks = kinds("%t0 = add 1, -2");
        assert_eq!(
            toks,
            vec![
                TokenKind::Percent,
                TokenKind::Ident("t0".into()),
                TokenKind::Equals,
                TokenKind::Ident("add".into()),
                TokenKind::Int(1),
                TokenKind::Comma,
                TokenKind::Int(-2),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_floats_and_arrow() {
        let toks = kinds("-> 1.5 -2.25e3 -inf");
        assert_eq!(
            toks,
            vec![
                TokenKind::Arrow,
                TokenKind::Float(1.5),
                TokenKind::Float(-2250.0),
                TokenKind::Ident("-inf".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        let toks = kinds(r#""HI\0A" "q\"\\\7F""#);
        assert_eq!(
            toks,
            vec![
                TokenKind::Str("HI\n".into()),
                TokenKind::Str("q\"\\\x7f".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_skipped() {
        let toks = kinds("add ; trailing words\nret");
        assert_eq!(
            toks,
            vec![
                TokenKind::Ident("add".into()),
                TokenKind::Ident("ret".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_paths_lex_as_idents() {
        let toks = kinds("@src/foo.bas:12:4");
        assert_eq!(
            toks,
            vec![
                TokenKind::At,
                TokenKind::Ident("src/foo.bas".into()),
                TokenKind::Colon,
                TokenKind::Int(12),
                TokenKind::Colon,
                TokenKind::Int(4),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_label_with_trailing_number_and_dot() {
        // `x.1:` is a dotted name followed by a colon, not a float.
        let toks = kinds("%x.1 = add 1, 2");
        assert_eq!(toks[1], TokenKind::Ident("x.1".into()));
    }

    #[test]
    fn test_unexpected_character() {
        assert!(Lexer::new("<t>", "add #").tokenize().is_err());
    }
}
