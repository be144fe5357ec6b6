/// YAPL token. The value of a literal is not evaluated eagerly, the compiler reads it from the
/// lexeme.
#[derive(Debug, Clone)]
pub struct Token {
    /// Token type
    pub typ: Type,
    /// The string segment in source that represents this token. It is copied out of the source
    /// so that tokens don't borrow from it.
    pub lexeme: String,
    /// The position at which this token was found in source.
    pub pos: Position,
}

impl Default for Token {
    fn default() -> Self {
        Self {
            typ: Type::Eof,
            lexeme: String::new(),
            pos: Position::default(),
        }
    }
}

/// Token types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    /// Single character '('
    LParen,
    /// Single character ')'
    RParen,
    /// Single character '{'
    LBrace,
    /// Single character '}'
    RBrace,
    /// Single character ','
    Comma,
    /// Single character '-'
    Minus,
    /// Double character '--'
    MinusMinus,
    /// Single character '+'
    Plus,
    /// Double character '++'
    PlusPlus,
    /// Single character ';'
    Semicolon,
    /// Single character '/'
    Slash,
    /// Single character '*'
    Star,
    /// Single character '%'
    Percent,
    /// Single character '!'
    Bang,
    /// Double character '!='
    BangEqual,
    /// Single character '='
    Equal,
    /// Double character '=='
    EqualEqual,
    /// Single character '>'
    Greater,
    /// Double character '>='
    GreaterEqual,
    /// Single character '<'
    Less,
    /// Double character '<='
    LessEqual,
    /// Named entity
    Ident,
    /// String literal
    String,
    /// Number literal
    Number,
    /// Keyword 'and'
    And,
    /// Keyword 'else'
    Else,
    /// Boolean literal 'false'
    False,
    /// Keyword 'for'
    For,
    /// Keyword 'fun'
    Fun,
    /// Keyword 'if'
    If,
    /// Nothing literal 'null'
    Null,
    /// Keyword 'or'
    Or,
    /// Keyword 'return'
    Return,
    /// Boolean literal 'true'
    True,
    /// Keyword 'var'
    Var,
    /// Keyword 'while'
    While,
    /// End of input
    Eof,
}

/// Position of the token in source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Current line in source file
    pub line: usize,
    /// Current column in source file
    pub column: usize,
}

impl Default for Position {
    fn default() -> Self {
        Self { line: 1, column: 1 }
    }
}

impl Position {
    /// Increment the line count by one and reset the column count
    pub fn next_line(&mut self) {
        self.line += 1;
        self.column = 1;
    }

    /// Increment the column count by one
    pub fn next_column(&mut self) {
        self.column += 1;
    }
}
