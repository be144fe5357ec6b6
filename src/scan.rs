use crate::{
    token::{self, Token},
    Position, ScanError,
};

/// Scanner groups the characters of a source text into tokens, one token per call to
/// [`Scanner::scan`].
#[derive(Debug)]
pub struct Scanner {
    src: String,
    // Byte offsets into `src`.
    start: usize,
    current: usize,
    start_pos: Position,
    pos: Position,
}

impl Scanner {
    /// Create a new scanner
    pub fn new(src: &str) -> Self {
        Self {
            src: src.to_string(),
            start: 0,
            current: 0,
            start_pos: Position::default(),
            pos: Position::default(),
        }
    }

    /// Consume and return the next token from source. Once the source is exhausted, every call
    /// returns an `Eof` token.
    pub fn scan(&mut self) -> Result<Token, ScanError> {
        self.skip_trivia();
        self.start = self.current;
        self.start_pos = self.pos;
        let c = match self.advance() {
            Some(c) => c,
            None => return Ok(self.token(token::Type::Eof)),
        };
        let typ = match c {
            '(' => token::Type::LParen,
            ')' => token::Type::RParen,
            '{' => token::Type::LBrace,
            '}' => token::Type::RBrace,
            ';' => token::Type::Semicolon,
            ',' => token::Type::Comma,
            '/' => token::Type::Slash,
            '*' => token::Type::Star,
            '%' => token::Type::Percent,
            '-' => self.pick('-', token::Type::MinusMinus, token::Type::Minus),
            '+' => self.pick('+', token::Type::PlusPlus, token::Type::Plus),
            '!' => self.pick('=', token::Type::BangEqual, token::Type::Bang),
            '=' => self.pick('=', token::Type::EqualEqual, token::Type::Equal),
            '<' => self.pick('=', token::Type::LessEqual, token::Type::Less),
            '>' => self.pick('=', token::Type::GreaterEqual, token::Type::Greater),
            '"' => self.string()?,
            c if c.is_ascii_digit() => self.number(),
            c if is_ident_start(c) => self.word(),
            c => return Err(ScanError::UnexpectedCharacter(self.start_pos, c)),
        };
        Ok(self.token(typ))
    }

    fn pick(&mut self, next: char, matched: token::Type, otherwise: token::Type) -> token::Type {
        if self.peek() == Some(next) {
            self.advance();
            matched
        } else {
            otherwise
        }
    }

    fn word(&mut self) -> token::Type {
        self.advance_while(|c| is_ident_start(c) || c.is_ascii_digit());
        keyword(&self.src[self.start..self.current]).unwrap_or(token::Type::Ident)
    }

    fn number(&mut self) -> token::Type {
        self.advance_while(|c| c.is_ascii_digit());
        let mut rest = self.src[self.current..].chars();
        if rest.next() == Some('.') && rest.next().map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
            self.advance_while(|c| c.is_ascii_digit());
        }
        token::Type::Number
    }

    fn string(&mut self) -> Result<token::Type, ScanError> {
        self.advance_while(|c| c != '"');
        match self.advance() {
            Some(_) => Ok(token::Type::String),
            None => Err(ScanError::UnterminatedString(self.start_pos)),
        }
    }

    fn token(&self, typ: token::Type) -> Token {
        Token {
            typ,
            lexeme: self.src[self.start..self.current].to_string(),
            pos: self.start_pos,
        }
    }

    /// Skip whitespaces and line comments.
    fn skip_trivia(&mut self) {
        loop {
            self.advance_while(char::is_whitespace);
            if !self.src[self.current..].starts_with("//") {
                return;
            }
            self.advance_while(|c| c != '\n');
        }
    }

    fn advance_while(&mut self, pred: impl Fn(char) -> bool) {
        while self.peek().map_or(false, &pred) {
            self.advance();
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.current..].chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.current += c.len_utf8();
        if c == '\n' {
            self.pos.next_line();
        } else {
            self.pos.next_column();
        }
        Some(c)
    }
}

fn keyword(word: &str) -> Option<token::Type> {
    let typ = match word {
        "and" => token::Type::And,
        "else" => token::Type::Else,
        "false" => token::Type::False,
        "for" => token::Type::For,
        "fun" => token::Type::Fun,
        "if" => token::Type::If,
        "null" => token::Type::Null,
        "or" => token::Type::Or,
        "return" => token::Type::Return,
        "true" => token::Type::True,
        "var" => token::Type::Var,
        "while" => token::Type::While,
        _ => return None,
    };
    Some(typ)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}
