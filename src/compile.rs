//! Single-pass compiler from source text to bytecode.
//!
//! The compiler parses with a Pratt parser and emits code as it goes; there is no syntax tree.
//! Each function being compiled gets its own [`FunctionCompiler`], the ones of enclosing
//! functions are kept on a stack so that captured variables can be resolved outwards.

use rustc_hash::FxHashMap;

use crate::{
    token::{self, Token},
    Chunk, CompileError, Heap, HeapError, InterpretError, ObjFunction, ObjRef, Object, OpCode,
    ParseErrorKind, Position, Scanner, Value, UINT8_COUNT,
};

/// Compile the given source code in to the top-level function of a program. The function and
/// every string constant are allocated on the given heap.
pub fn compile(src: &str, heap: &mut Heap) -> Result<ObjRef, InterpretError> {
    let mut parser = Parser::new(src, heap);
    parser.advance();
    while !parser.matches(token::Type::Eof) && parser.oom.is_none() {
        parser.declaration();
    }
    parser.finish()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn next(self) -> Self {
        match self {
            Self::None => Self::Assignment,
            Self::Assignment => Self::Or,
            Self::Or => Self::And,
            Self::And => Self::Equality,
            Self::Equality => Self::Comparison,
            Self::Comparison => Self::Term,
            Self::Term => Self::Factor,
            Self::Factor => Self::Unary,
            Self::Unary => Self::Call,
            Self::Call | Self::Primary => Self::Primary,
        }
    }

    fn of_infix(typ: token::Type) -> Self {
        match typ {
            token::Type::LParen => Self::Call,
            token::Type::Star | token::Type::Slash | token::Type::Percent => Self::Factor,
            token::Type::Plus | token::Type::Minus => Self::Term,
            token::Type::Greater
            | token::Type::GreaterEqual
            | token::Type::Less
            | token::Type::LessEqual => Self::Comparison,
            token::Type::BangEqual | token::Type::EqualEqual => Self::Equality,
            token::Type::And => Self::And,
            token::Type::Or => Self::Or,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
}

#[derive(Debug)]
struct Local {
    name: String,
    // `None` while the initializer is being compiled.
    depth: Option<usize>,
    is_captured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Upvalue {
    index: u8,
    is_local: bool,
}

#[derive(Debug)]
struct FunctionCompiler {
    function: ObjFunction,
    kind: FunctionKind,
    locals: Vec<Local>,
    upvalues: Vec<Upvalue>,
    scope_depth: usize,
    identifiers: FxHashMap<ObjRef, u8>,
}

impl FunctionCompiler {
    fn new(kind: FunctionKind, name: Option<ObjRef>) -> Self {
        Self {
            function: ObjFunction::new(name),
            kind,
            // Slot zero holds the callee.
            locals: vec![Local {
                name: String::new(),
                depth: Some(0),
                is_captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
            identifiers: FxHashMap::default(),
        }
    }
}

struct Parser<'h> {
    scanner: Scanner,
    heap: &'h mut Heap,
    current: Token,
    previous: Token,
    errors: Vec<CompileError>,
    panic_mode: bool,
    oom: Option<HeapError>,
    compiler: FunctionCompiler,
    enclosing: Vec<FunctionCompiler>,
}

impl<'h> Parser<'h> {
    fn new(src: &str, heap: &'h mut Heap) -> Self {
        Self {
            scanner: Scanner::new(src),
            heap,
            current: Token::default(),
            previous: Token::default(),
            errors: Vec::new(),
            panic_mode: false,
            oom: None,
            compiler: FunctionCompiler::new(FunctionKind::Script, None),
            enclosing: Vec::new(),
        }
    }

    fn finish(mut self) -> Result<ObjRef, InterpretError> {
        if let Some(err) = self.oom {
            return Err(err.into());
        }
        self.emit_return();
        if !self.errors.is_empty() {
            return Err(InterpretError::Compile(self.errors));
        }
        let function = std::mem::take(&mut self.compiler.function);
        tracing::debug!(bytes = function.chunk.len(), "compiled script");
        Ok(self.heap.allocate(Object::Function(function))?)
    }

    // Tokens

    fn advance(&mut self) {
        self.previous = std::mem::take(&mut self.current);
        loop {
            match self.scanner.scan() {
                Ok(token) => {
                    self.current = token;
                    break;
                }
                Err(err) => self.report(err.into()),
            }
        }
    }

    fn check(&self, typ: token::Type) -> bool {
        self.current.typ == typ
    }

    fn matches(&mut self, typ: token::Type) -> bool {
        if !self.check(typ) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, typ: token::Type, msg: &'static str) {
        if self.check(typ) {
            self.advance();
        } else {
            self.error_at_current(ParseErrorKind::Expected(msg));
        }
    }

    // Errors

    fn report(&mut self, err: CompileError) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.errors.push(err);
    }

    fn error_at(&mut self, pos: Position, lexeme: String, kind: ParseErrorKind) {
        self.report(CompileError::Parse { pos, lexeme, kind });
    }

    fn error(&mut self, kind: ParseErrorKind) {
        let lexeme = match self.previous.typ {
            token::Type::Eof => String::new(),
            _ => self.previous.lexeme.clone(),
        };
        self.error_at(self.previous.pos, lexeme, kind);
    }

    fn error_at_current(&mut self, kind: ParseErrorKind) {
        let lexeme = match self.current.typ {
            token::Type::Eof => String::new(),
            _ => self.current.lexeme.clone(),
        };
        self.error_at(self.current.pos, lexeme, kind);
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while !self.check(token::Type::Eof) {
            if self.previous.typ == token::Type::Semicolon {
                return;
            }
            match self.current.typ {
                token::Type::Fun
                | token::Type::Var
                | token::Type::For
                | token::Type::If
                | token::Type::While
                | token::Type::Return => return,
                _ => self.advance(),
            }
        }
    }

    // Emission

    fn chunk(&mut self) -> &mut Chunk {
        &mut self.compiler.function.chunk
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.pos.line;
        self.chunk().write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op.into());
    }

    fn emit_op_arg(&mut self, op: OpCode, arg: u8) {
        self.emit_op(op);
        self.emit_byte(arg);
    }

    fn emit_return(&mut self) {
        self.emit_op(OpCode::Null);
        self.emit_op(OpCode::Return);
    }

    fn emit_constant(&mut self, value: Value) {
        let line = self.previous.pos.line;
        if self.chunk().write_constant(value, line).is_err() {
            self.error(ParseErrorKind::TooManyConstants);
        }
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.chunk().len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.chunk().len() - offset - 2;
        match u16::try_from(jump) {
            Ok(jump) => {
                let [lo, hi] = jump.to_le_bytes();
                self.chunk().patch(offset, lo);
                self.chunk().patch(offset + 1, hi);
            }
            Err(_) => self.error(ParseErrorKind::JumpTooLarge),
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.chunk().len() - loop_start + 2;
        let [lo, hi] = u16::try_from(offset)
            .unwrap_or_else(|_| {
                self.error(ParseErrorKind::LoopTooLarge);
                0
            })
            .to_le_bytes();
        self.emit_byte(lo);
        self.emit_byte(hi);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let idx = self.chunk().add_constant(value);
        u8::try_from(idx).unwrap_or_else(|_| {
            self.error(ParseErrorKind::TooManyConstants);
            0
        })
    }

    fn intern(&mut self, s: &str) -> Option<ObjRef> {
        match self.heap.intern(s.as_bytes()) {
            Ok(obj) => Some(obj),
            Err(err) => {
                self.oom = Some(err);
                None
            }
        }
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let Some(name) = self.intern(name) else {
            return 0;
        };
        if let Some(&idx) = self.compiler.identifiers.get(&name) {
            return idx;
        }
        let idx = self.make_constant(Value::Obj(name));
        self.compiler.identifiers.insert(name, idx);
        idx
    }

    // Scopes and variables

    fn level(&self, level: usize) -> &FunctionCompiler {
        self.enclosing.get(level).unwrap_or(&self.compiler)
    }

    fn level_mut(&mut self, level: usize) -> &mut FunctionCompiler {
        match self.enclosing.get_mut(level) {
            Some(compiler) => compiler,
            None => &mut self.compiler,
        }
    }

    fn begin_scope(&mut self) {
        self.compiler.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.compiler.scope_depth -= 1;
        let depth = self.compiler.scope_depth;
        while let Some(captured) = self
            .compiler
            .locals
            .last()
            .filter(|local| local.depth.map_or(true, |d| d > depth))
            .map(|local| local.is_captured)
        {
            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
            self.compiler.locals.pop();
        }
    }

    fn add_local(&mut self, name: String) {
        if self.compiler.locals.len() == UINT8_COUNT {
            self.error(ParseErrorKind::TooManyLocals);
            return;
        }
        self.compiler.locals.push(Local {
            name,
            depth: None,
            is_captured: false,
        });
    }

    fn declare_variable(&mut self) {
        let depth = self.compiler.scope_depth;
        if depth == 0 {
            return;
        }
        let name = self.previous.lexeme.clone();
        let redeclared = self
            .compiler
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth.map_or(true, |d| d >= depth))
            .any(|local| local.name == name);
        if redeclared {
            self.error(ParseErrorKind::VariableRedeclaration);
        }
        self.add_local(name);
    }

    fn parse_variable(&mut self, msg: &'static str) -> u8 {
        self.consume(token::Type::Ident, msg);
        self.declare_variable();
        if self.compiler.scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme.clone();
        self.identifier_constant(&name)
    }

    fn mark_initialized(&mut self) {
        let depth = self.compiler.scope_depth;
        if depth == 0 {
            return;
        }
        if let Some(local) = self.compiler.locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.compiler.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_arg(OpCode::DefineGlobal, global);
    }

    fn resolve_local(&mut self, level: usize, name: &str) -> Option<u8> {
        let (slot, uninitialized) = self
            .level(level)
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, local)| local.name == name)
            .map(|(slot, local)| (slot, local.depth.is_none()))?;
        if uninitialized {
            self.error(ParseErrorKind::SelfReferencingInitializer);
        }
        Some(slot as u8)
    }

    fn resolve_upvalue(&mut self, level: usize, name: &str) -> Option<u8> {
        if level == 0 {
            return None;
        }
        let enclosing = level - 1;
        if let Some(local) = self.resolve_local(enclosing, name) {
            self.level_mut(enclosing).locals[local as usize].is_captured = true;
            return Some(self.add_upvalue(level, local, true));
        }
        let upvalue = self.resolve_upvalue(enclosing, name)?;
        Some(self.add_upvalue(level, upvalue, false))
    }

    fn add_upvalue(&mut self, level: usize, index: u8, is_local: bool) -> u8 {
        let upvalue = Upvalue { index, is_local };
        let compiler = self.level_mut(level);
        if let Some(existing) = compiler.upvalues.iter().position(|u| *u == upvalue) {
            return existing as u8;
        }
        if compiler.upvalues.len() == UINT8_COUNT {
            self.error(ParseErrorKind::TooManyUpvalues);
            return 0;
        }
        compiler.upvalues.push(upvalue);
        compiler.function.upvalue_count = compiler.upvalues.len();
        (compiler.upvalues.len() - 1) as u8
    }

    /// Pick the instructions accessing the named variable, innermost scope first.
    fn resolve_variable(&mut self, name: &str) -> (OpCode, OpCode, u8) {
        let level = self.enclosing.len();
        if let Some(slot) = self.resolve_local(level, name) {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(idx) = self.resolve_upvalue(level, name) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, idx)
        } else {
            let idx = self.identifier_constant(name);
            (OpCode::GetGlobal, OpCode::SetGlobal, idx)
        }
    }

    // Declarations and statements

    fn declaration(&mut self) {
        if self.matches(token::Type::Fun) {
            self.fun_declaration();
        } else if self.matches(token::Type::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.matches(token::Type::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Null);
        }
        self.consume(
            token::Type::Semicolon,
            "Expect ';' after variable declaration.",
        );
        self.define_variable(global);
    }

    fn function(&mut self, kind: FunctionKind) {
        let name = self.previous.lexeme.clone();
        let name = self.intern(&name);
        let compiler = FunctionCompiler::new(kind, name);
        self.enclosing
            .push(std::mem::replace(&mut self.compiler, compiler));
        self.begin_scope();

        self.consume(token::Type::LParen, "Expect '(' after function name.");
        if !self.check(token::Type::RParen) {
            loop {
                if self.compiler.function.arity == u8::MAX {
                    self.error_at_current(ParseErrorKind::TooManyParameters);
                } else {
                    self.compiler.function.arity += 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.matches(token::Type::Comma) {
                    break;
                }
            }
        }
        self.consume(token::Type::RParen, "Expect ')' after parameters.");
        self.consume(token::Type::LBrace, "Expect '{' before function body.");
        self.block();

        let (function, upvalues) = self.end_function();
        let function = match self.heap.allocate(Object::Function(function)) {
            Ok(function) => function,
            Err(err) => {
                self.oom = Some(err);
                return;
            }
        };
        let constant = self.make_constant(Value::Obj(function));
        self.emit_op_arg(OpCode::Closure, constant);
        for upvalue in upvalues {
            self.emit_byte(u8::from(upvalue.is_local));
            self.emit_byte(upvalue.index);
        }
    }

    fn end_function(&mut self) -> (ObjFunction, Vec<Upvalue>) {
        self.emit_return();
        let parent = self
            .enclosing
            .pop()
            .unwrap_or_else(|| FunctionCompiler::new(FunctionKind::Script, None));
        let finished = std::mem::replace(&mut self.compiler, parent);
        (finished.function, finished.upvalues)
    }

    fn statement(&mut self) {
        if self.matches(token::Type::If) {
            self.if_statement();
        } else if self.matches(token::Type::While) {
            self.while_statement();
        } else if self.matches(token::Type::For) {
            self.for_statement();
        } else if self.matches(token::Type::Return) {
            self.return_statement();
        } else if self.matches(token::Type::LBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(token::Type::RBrace) && !self.check(token::Type::Eof) {
            self.declaration();
        }
        self.consume(token::Type::RBrace, "Expect '}' after block.");
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(token::Type::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(token::Type::LParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(token::Type::RParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);
        if self.matches(token::Type::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk().len();
        self.consume(token::Type::LParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(token::Type::RParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(token::Type::LParen, "Expect '(' after 'for'.");
        if self.matches(token::Type::Semicolon) {
            // No initializer.
        } else if self.matches(token::Type::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk().len();
        let mut exit_jump = None;
        if !self.matches(token::Type::Semicolon) {
            self.expression();
            self.consume(token::Type::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.matches(token::Type::RParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk().len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(token::Type::RParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.compiler.kind == FunctionKind::Script {
            self.error(ParseErrorKind::TopLevelReturn);
        }
        if self.matches(token::Type::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.consume(token::Type::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    // Expressions

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !self.prefix(self.previous.typ, can_assign) {
            self.error(ParseErrorKind::Expected("Expect expression."));
            return;
        }

        while precedence <= Precedence::of_infix(self.current.typ) {
            self.advance();
            self.infix(self.previous.typ);
        }

        if can_assign && self.matches(token::Type::Equal) {
            self.error(ParseErrorKind::InvalidAssignTarget);
        }
    }

    fn prefix(&mut self, typ: token::Type, can_assign: bool) -> bool {
        match typ {
            token::Type::LParen => self.grouping(),
            token::Type::Minus | token::Type::Bang => self.unary(typ),
            token::Type::PlusPlus | token::Type::MinusMinus => self.step(typ),
            token::Type::Number => self.number(),
            token::Type::String => self.string(),
            token::Type::Ident => self.variable(can_assign),
            token::Type::True | token::Type::False | token::Type::Null => self.literal(typ),
            _ => return false,
        }
        true
    }

    fn infix(&mut self, typ: token::Type) {
        match typ {
            token::Type::LParen => self.call(),
            token::Type::And => self.and(),
            token::Type::Or => self.or(),
            _ => self.binary(typ),
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(token::Type::RParen, "Expect ')' after expression.");
    }

    fn unary(&mut self, typ: token::Type) {
        self.parse_precedence(Precedence::Unary);
        match typ {
            token::Type::Minus => self.emit_op(OpCode::Negate),
            token::Type::Bang => self.emit_op(OpCode::Not),
            _ => {}
        }
    }

    /// `++name` and `--name` update the variable and evaluate to its new value.
    fn step(&mut self, typ: token::Type) {
        self.consume(
            token::Type::Ident,
            "Expect variable name after increment operator.",
        );
        let name = self.previous.lexeme.clone();
        let (get, set, arg) = self.resolve_variable(&name);
        self.emit_op_arg(get, arg);
        match typ {
            token::Type::PlusPlus => self.emit_op(OpCode::Increment),
            _ => self.emit_op(OpCode::Decrement),
        }
        self.emit_op_arg(set, arg);
    }

    fn binary(&mut self, typ: token::Type) {
        self.parse_precedence(Precedence::of_infix(typ).next());
        match typ {
            token::Type::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            token::Type::EqualEqual => self.emit_op(OpCode::Equal),
            token::Type::Greater => self.emit_op(OpCode::Greater),
            token::Type::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            token::Type::Less => self.emit_op(OpCode::Less),
            token::Type::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            token::Type::Plus => self.emit_op(OpCode::Add),
            token::Type::Minus => self.emit_op(OpCode::Subtract),
            token::Type::Star => self.emit_op(OpCode::Multiply),
            token::Type::Slash => self.emit_op(OpCode::Divide),
            token::Type::Percent => self.emit_op(OpCode::Mod),
            _ => {}
        }
    }

    fn call(&mut self) {
        let argc = self.argument_list();
        self.emit_op_arg(OpCode::Call, argc);
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: u8 = 0;
        if !self.check(token::Type::RParen) {
            loop {
                self.expression();
                if argc == u8::MAX {
                    self.error(ParseErrorKind::TooManyArguments);
                } else {
                    argc += 1;
                }
                if !self.matches(token::Type::Comma) {
                    break;
                }
            }
        }
        self.consume(token::Type::RParen, "Expect ')' after arguments.");
        argc
    }

    fn and(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn number(&mut self) {
        match self.previous.lexeme.parse::<f64>() {
            Ok(n) => self.emit_constant(Value::Number(n)),
            Err(_) => self.error(ParseErrorKind::InvalidNumber),
        }
    }

    fn string(&mut self) {
        let lexeme = &self.previous.lexeme;
        let content = lexeme[1..lexeme.len() - 1].to_string();
        if let Some(s) = self.intern(&content) {
            self.emit_constant(Value::Obj(s));
        }
    }

    fn literal(&mut self, typ: token::Type) {
        match typ {
            token::Type::True => self.emit_op(OpCode::True),
            token::Type::False => self.emit_op(OpCode::False),
            _ => self.emit_op(OpCode::Null),
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.lexeme.clone();
        let (get, set, arg) = self.resolve_variable(&name);
        if can_assign && self.matches(token::Type::Equal) {
            self.expression();
            self.emit_op_arg(set, arg);
        } else {
            self.emit_op_arg(get, arg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_errors(src: &str) -> Vec<CompileError> {
        let mut heap = Heap::new();
        match compile(src, &mut heap) {
            Err(InterpretError::Compile(errors)) => errors,
            other => panic!("expected compile errors, got {:?}", other),
        }
    }

    fn kinds(src: &str) -> Vec<ParseErrorKind> {
        compile_errors(src)
            .into_iter()
            .filter_map(|err| match err {
                CompileError::Parse { kind, .. } => Some(kind),
                CompileError::Scan(_) => None,
            })
            .collect()
    }

    #[test]
    fn script_is_a_nameless_function() {
        let mut heap = Heap::new();
        let script = compile("1 + 2;", &mut heap).unwrap();
        let function = heap.as_function(script).unwrap();
        assert_eq!(function.name, None);
        assert_eq!(function.arity, 0);
        assert_eq!(
            function.chunk.code(),
            &[
                OpCode::Constant as u8,
                0,
                OpCode::Constant as u8,
                1,
                OpCode::Add as u8,
                OpCode::Pop as u8,
                OpCode::Null as u8,
                OpCode::Return as u8,
            ]
        );
    }

    #[test]
    fn negated_comparisons_are_lowered() {
        let mut heap = Heap::new();
        let script = compile("1 != 2; 1 <= 2;", &mut heap).unwrap();
        let code = heap.as_function(script).unwrap().chunk.code().to_vec();
        assert_eq!(
            &code[4..6],
            &[OpCode::Equal as u8, OpCode::Not as u8]
        );
        assert_eq!(
            &code[11..13],
            &[OpCode::Greater as u8, OpCode::Not as u8]
        );
    }

    #[test]
    fn identifier_constants_are_shared() {
        let mut heap = Heap::new();
        let script = compile("var a = 1; a = a + a;", &mut heap).unwrap();
        let chunk = &heap.as_function(script).unwrap().chunk;
        // "a" and 1.0
        assert_eq!(chunk.constants().len(), 2);
    }

    #[test]
    fn closures_describe_their_captures() {
        let mut heap = Heap::new();
        let src = "fun outer() { var x = 1; var y = 2; fun inner() { return y + x; } }";
        let script = compile(src, &mut heap).unwrap();
        let function_constant = |heap: &Heap, chunk: &Chunk| {
            chunk
                .constants()
                .iter()
                .filter_map(Value::as_obj)
                .find(|obj| heap.as_function(*obj).is_ok())
                .unwrap()
        };
        let outer = function_constant(&heap, &heap.as_function(script).unwrap().chunk);
        let outer = heap.as_function(outer).unwrap();
        let inner = function_constant(&heap, &outer.chunk);
        assert_eq!(heap.as_function(inner).unwrap().upvalue_count, 2);

        let code = outer.chunk.code();
        let at = code
            .iter()
            .position(|&b| b == OpCode::Closure as u8)
            .unwrap();
        // y lives in slot 2, x in slot 1; both are locals of `outer`.
        assert_eq!(&code[at + 2..at + 6], &[1, 2, 1, 1]);
    }

    #[test]
    fn captured_block_locals_are_closed_at_scope_end() {
        let mut heap = Heap::new();
        let src = "{ var x = 1; fun f() { return x; } }";
        let script = compile(src, &mut heap).unwrap();
        let code = heap.as_function(script).unwrap().chunk.code().to_vec();
        let tail = &code[code.len() - 4..];
        assert_eq!(
            tail,
            &[
                OpCode::Pop as u8,
                OpCode::CloseUpvalue as u8,
                OpCode::Null as u8,
                OpCode::Return as u8,
            ]
        );
    }

    #[test]
    fn rejects_invalid_programs() {
        assert_eq!(kinds("return 1;"), vec![ParseErrorKind::TopLevelReturn]);
        assert_eq!(
            kinds("{ var a = a; }"),
            vec![ParseErrorKind::SelfReferencingInitializer]
        );
        assert_eq!(
            kinds("{ var a; var a; }"),
            vec![ParseErrorKind::VariableRedeclaration]
        );
        assert_eq!(kinds("1 = 2;"), vec![ParseErrorKind::InvalidAssignTarget]);
        assert_eq!(
            kinds("var x"),
            vec![ParseErrorKind::Expected(
                "Expect ';' after variable declaration."
            )]
        );
    }

    #[test]
    fn reports_every_statement_error() {
        let errors = compile_errors("var = 1;\nputs(;\nvar x = 1;\n\"open");
        assert_eq!(errors.len(), 3);
        assert_eq!(
            errors[0].to_string(),
            "[line 1] Error at '=': Expect variable name."
        );
        assert_eq!(
            errors[1].to_string(),
            "[line 2] Error at ';': Expect expression."
        );
        assert_eq!(
            errors[2].to_string(),
            "[line 4] Error: Unterminated string."
        );
    }

    #[test]
    fn errors_at_end_of_input() {
        let errors = compile_errors("puts(1");
        assert_eq!(
            errors[0].to_string(),
            "[line 1] Error at end: Expect ')' after arguments."
        );
    }

    #[test]
    fn too_many_constants_for_a_global_name() {
        let src: String = (0..300).map(|i| format!("var v{i} = {i};\n")).collect();
        assert!(kinds(&src).contains(&ParseErrorKind::TooManyConstants));
    }
}
