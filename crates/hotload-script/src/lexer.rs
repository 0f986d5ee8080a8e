//! Tokenizer for unit script source.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

impl Pos {
    pub fn new(line: u32, col: u32) -> Self {
        Pos { line, col }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Str(String),
    // keywords
    Unit,
    Fn,
    Field,
    Let,
    If,
    Else,
    While,
    Return,
    New,
    SelfKw,
    True,
    False,
    Nil,
    Private,
    // punctuation
    LBrace,
    RBrace,
    LParen,
    RParen,
    Semi,
    Colon,
    Comma,
    Dot,
    Arrow,
    Assign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    AndAnd,
    OrOr,
    Eof,
}

impl Token {
    fn keyword(word: &str) -> Option<Token> {
        Some(match word {
            "unit" => Token::Unit,
            "fn" => Token::Fn,
            "field" => Token::Field,
            "let" => Token::Let,
            "if" => Token::If,
            "else" => Token::Else,
            "while" => Token::While,
            "return" => Token::Return,
            "new" => Token::New,
            "self" => Token::SelfKw,
            "true" => Token::True,
            "false" => Token::False,
            "nil" => Token::Nil,
            "private" => Token::Private,
            _ => return None,
        })
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Token::Ident(name) => return write!(f, "identifier '{}'", name),
            Token::Int(v) => return write!(f, "integer {}", v),
            Token::Str(_) => return write!(f, "string literal"),
            Token::Unit => "'unit'",
            Token::Fn => "'fn'",
            Token::Field => "'field'",
            Token::Let => "'let'",
            Token::If => "'if'",
            Token::Else => "'else'",
            Token::While => "'while'",
            Token::Return => "'return'",
            Token::New => "'new'",
            Token::SelfKw => "'self'",
            Token::True => "'true'",
            Token::False => "'false'",
            Token::Nil => "'nil'",
            Token::Private => "'private'",
            Token::LBrace => "'{'",
            Token::RBrace => "'}'",
            Token::LParen => "'('",
            Token::RParen => "')'",
            Token::Semi => "';'",
            Token::Colon => "':'",
            Token::Comma => "','",
            Token::Dot => "'.'",
            Token::Arrow => "'->'",
            Token::Assign => "'='",
            Token::EqEq => "'=='",
            Token::NotEq => "'!='",
            Token::Lt => "'<'",
            Token::Le => "'<='",
            Token::Gt => "'>'",
            Token::Ge => "'>='",
            Token::Plus => "'+'",
            Token::Minus => "'-'",
            Token::Star => "'*'",
            Token::Slash => "'/'",
            Token::Percent => "'%'",
            Token::Bang => "'!'",
            Token::AndAnd => "'&&'",
            Token::OrOr => "'||'",
            Token::Eof => "end of input",
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub token: Token,
    pub pos: Pos,
}

/// A lexical error. Lexing continues after one is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub pos: Pos,
    pub message: String,
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            chars: input.chars().peekable(),
            line: 1,
            col: 1,
        }
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn pos(&self) -> Pos {
        Pos::new(self.line, self.col)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') => {
                    let mut lookahead = self.chars.clone();
                    lookahead.next();
                    if lookahead.peek() != Some(&'/') {
                        return;
                    }
                    while let Some(c) = self.advance() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    /// Tokenize the whole input. The returned token list always ends in
    /// [`Token::Eof`].
    pub fn tokenize(mut self) -> (Vec<Spanned>, Vec<LexError>) {
        let mut tokens = Vec::new();
        let mut errors = Vec::new();
        loop {
            self.skip_trivia();
            let pos = self.pos();
            let Some(c) = self.advance() else {
                tokens.push(Spanned {
                    token: Token::Eof,
                    pos,
                });
                return (tokens, errors);
            };
            let token = match c {
                '{' => Token::LBrace,
                '}' => Token::RBrace,
                '(' => Token::LParen,
                ')' => Token::RParen,
                ';' => Token::Semi,
                ':' => Token::Colon,
                ',' => Token::Comma,
                '.' => Token::Dot,
                '+' => Token::Plus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '%' => Token::Percent,
                '-' => self.follow('>', Token::Arrow, Token::Minus),
                '=' => self.follow('=', Token::EqEq, Token::Assign),
                '!' => self.follow('=', Token::NotEq, Token::Bang),
                '<' => self.follow('=', Token::Le, Token::Lt),
                '>' => self.follow('=', Token::Ge, Token::Gt),
                '&' | '|' => {
                    if self.peek() == Some(c) {
                        self.advance();
                        if c == '&' {
                            Token::AndAnd
                        } else {
                            Token::OrOr
                        }
                    } else {
                        errors.push(LexError {
                            pos,
                            message: format!("unexpected character '{}' (did you mean '{}{}'?)", c, c, c),
                        });
                        continue;
                    }
                }
                '"' => match self.read_string() {
                    Ok(s) => Token::Str(s),
                    Err(message) => {
                        errors.push(LexError { pos, message });
                        continue;
                    }
                },
                c if c.is_ascii_digit() => match self.read_int(c) {
                    Ok(v) => Token::Int(v),
                    Err(message) => {
                        errors.push(LexError { pos, message });
                        continue;
                    }
                },
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let mut word = String::from(c);
                    while let Some(n) = self.peek() {
                        if n.is_ascii_alphanumeric() || n == '_' {
                            word.push(n);
                            self.advance();
                        } else {
                            break;
                        }
                    }
                    Token::keyword(&word).unwrap_or(Token::Ident(word))
                }
                other => {
                    errors.push(LexError {
                        pos,
                        message: format!("unexpected character '{}'", other),
                    });
                    continue;
                }
            };
            tokens.push(Spanned { token, pos });
        }
    }

    fn follow(&mut self, next: char, matched: Token, single: Token) -> Token {
        if self.peek() == Some(next) {
            self.advance();
            matched
        } else {
            single
        }
    }

    fn read_string(&mut self) -> Result<String, String> {
        let mut out = String::new();
        loop {
            match self.advance() {
                None | Some('\n') => return Err("unterminated string literal".to_string()),
                Some('"') => return Ok(out),
                Some('\\') => match self.advance() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some(other) => return Err(format!("unknown escape '\\{}'", other)),
                    None => return Err("unterminated string literal".to_string()),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn read_int(&mut self, first: char) -> Result<i64, String> {
        let mut digits = String::from(first);
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                if c != '_' {
                    digits.push(c);
                }
                self.advance();
            } else {
                break;
            }
        }
        digits
            .parse::<i64>()
            .map_err(|_| format!("integer literal {} out of range", digits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        let (tokens, errors) = Lexer::new(src).tokenize();
        assert!(errors.is_empty(), "{:?}", errors);
        tokens.into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_tokenize_function_header() {
        assert_eq!(
            kinds("fn greet(name: str) -> str {"),
            vec![
                Token::Fn,
                Token::Ident("greet".to_string()),
                Token::LParen,
                Token::Ident("name".to_string()),
                Token::Colon,
                Token::Ident("str".to_string()),
                Token::RParen,
                Token::Arrow,
                Token::Ident("str".to_string()),
                Token::LBrace,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_operators_and_comments() {
        assert_eq!(
            kinds("a <= b && c != d // trailing\n|| !e"),
            vec![
                Token::Ident("a".to_string()),
                Token::Le,
                Token::Ident("b".to_string()),
                Token::AndAnd,
                Token::Ident("c".to_string()),
                Token::NotEq,
                Token::Ident("d".to_string()),
                Token::OrOr,
                Token::Bang,
                Token::Ident("e".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes_and_ints() {
        assert_eq!(
            kinds(r#""a\"b\n" 1_000"#),
            vec![Token::Str("a\"b\n".to_string()), Token::Int(1000), Token::Eof]
        );
    }

    #[test]
    fn test_positions() {
        let (tokens, _) = Lexer::new("unit\n  A").tokenize();
        assert_eq!(tokens[0].pos, Pos::new(1, 1));
        assert_eq!(tokens[1].pos, Pos::new(2, 3));
    }

    #[test]
    fn test_errors_do_not_stop_lexing() {
        let (tokens, errors) = Lexer::new("a # b \"open").tokenize();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("unexpected character '#'"));
        assert!(errors[1].message.contains("unterminated"));
        assert_eq!(tokens.len(), 3); // a, b, eof
    }
}
