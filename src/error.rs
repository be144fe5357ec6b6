use std::fmt;

use itertools::Itertools;

use crate::{ObjKind, Position};

/// Allocation failures. Running out of memory is fatal for the virtual machine; hosts that embed
/// it see this error surface as [`InterpretError::OutOfMemory`] and decide how to terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    /// The underlying allocator returned no memory.
    #[error("Out of memory.")]
    OutOfMemory,
}

/// Misuse of an object handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ObjectError {
    /// The handle points at an object of another kind.
    #[error("Expected {expected} but found {found}.")]
    WrongKind {
        /// The kind that the operation requires.
        expected: ObjKind,
        /// The kind that was found.
        found: ObjKind,
    },
    /// The value is not an object at all.
    #[error("Expected {expected} but found {found}.")]
    NotAnObject {
        /// The kind that the operation requires.
        expected: ObjKind,
        /// A short name for the value that was found.
        found: &'static str,
    },
    /// The handle does not point into the heap.
    #[error("Dangling object handle #{0}.")]
    Dangling(usize),
}

/// Constant pool errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    /// The constant pool can't be addressed by a 16-bit operand anymore.
    #[error("Too many constants in one chunk.")]
    TooManyConstants,
}

/// Virtual machine errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    /// Push on a full stack, or call with every frame in use
    #[error("Stack overflow.")]
    StackOverflow,
    /// Pop on an empty stack
    #[error("Stack underflow.")]
    StackUnderflow,
    /// Executed an instruction without an active call frame
    #[error("No active call frame.")]
    NoActiveFrame,
    /// The instruction pointer ran past the end of its chunk
    #[error("Instruction pointer ran past the end of the chunk.")]
    CodeOverrun,
    /// The byte does not encode any opcode, this is a compiler bug
    #[error("Unknown opcode {0}.")]
    InvalidOpcode(u8),
    /// The opcode exists but is never emitted by the compiler
    #[error("Reserved opcode {0} can't be executed.")]
    ReservedOpcode(&'static str),
    /// Operand refers past the end of the constant pool
    #[error("Constant #{0} does not exist.")]
    InvalidConstant(usize),
    /// Operand refers past the top of the stack
    #[error("Stack slot #{0} does not exist.")]
    InvalidSlot(usize),
    /// Operand refers past the end of the closure's upvalues
    #[error("Upvalue #{0} does not exist.")]
    InvalidUpvalue(usize),
    /// An upvalue in the open list has already been closed
    #[error("Upvalue in the open list is already closed.")]
    UpvalueAlreadyClosed,
    /// Wrong argument given to unary operators that only accept a number
    #[error("Operand must be a number.")]
    OperandMustBeNumber,
    /// Wrong arguments given to binary operators that only accept numbers
    #[error("Operands must be numbers.")]
    OperandsMustBeNumbers,
    /// Wrong arguments given to binary add operators that only accept two numbers
    /// or two strings
    #[error("Operands must be two numbers or two strings.")]
    InvalidAddOperands,
    /// Accessing an undefined variable
    #[error("Undefined variable '{0}'.")]
    UndefinedVariable(String),
    /// Defining a global variable twice
    #[error("Global variable '{0}' is already defined.")]
    GlobalRedefinition(String),
    /// Called a function with an incorrect number of arguments
    #[error("Expected {arity} arguments but got {argc}.")]
    BadArgumentsCount {
        /// The arity of the function.
        arity: u8,
        /// The number of arguments given.
        argc: u8,
    },
    /// Called a value that is neither a closure nor a native function
    #[error("Can only call functions and closures.")]
    NotCallable,
    /// A native function signalled failure
    #[error("Native function '{0}' failed.")]
    NativeFailed(String),
    /// Misused an object
    #[error(transparent)]
    Object(#[from] ObjectError),
    /// Failed to allocate
    #[error(transparent)]
    Heap(#[from] HeapError),
}

/// Error while scanning source code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// A string literal is unterminated
    UnterminatedString(Position),
    /// Invalid character
    UnexpectedCharacter(Position, char),
}

impl std::error::Error for ScanError {}
impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnterminatedString(pos) => {
                write!(f, "[line {}] Error: Unterminated string.", pos.line)
            }
            Self::UnexpectedCharacter(pos, c) => {
                write!(f, "[line {}] Error: Unexpected character '{}'.", pos.line, c)
            }
        }
    }
}

/// What went wrong while compiling a token
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseErrorKind {
    /// A one-byte operand can't address the constant
    #[error("Too many constants in one chunk.")]
    TooManyConstants,
    /// The number of local variables can not exceed the one-byte slot operand
    #[error("Too many local variables in function.")]
    TooManyLocals,
    /// The number of captured variables can not exceed the one-byte index operand
    #[error("Too many closure variables in function.")]
    TooManyUpvalues,
    /// More than 255 parameters
    #[error("Can't have more than 255 parameters.")]
    TooManyParameters,
    /// More than 255 arguments
    #[error("Can't have more than 255 arguments.")]
    TooManyArguments,
    /// Range to jump over exceeds u16
    #[error("Too much code to jump over.")]
    JumpTooLarge,
    /// Loop body exceeds u16::MAX bytes
    #[error("Loop body too large.")]
    LoopTooLarge,
    /// Can not use variable name in its initializer
    #[error("Can't read local variable in its own initializer.")]
    SelfReferencingInitializer,
    /// A name can only be declared as variable once in local scope
    #[error("Already a variable with this name in this scope.")]
    VariableRedeclaration,
    /// Can not assign a value to the LHS
    #[error("Invalid assignment target.")]
    InvalidAssignTarget,
    /// `return` outside of a function body
    #[error("Can't return from top-level code.")]
    TopLevelReturn,
    /// The number literal could not be read
    #[error("Invalid number literal.")]
    InvalidNumber,
    /// Current token is not supposed to be there
    #[error("{0}")]
    Expected(&'static str),
}

/// Error while compiling source code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The scanner rejected the source
    Scan(ScanError),
    /// The parser rejected a token
    Parse {
        /// Where the token starts
        pos: Position,
        /// The token's text, empty at the end of input
        lexeme: String,
        /// The reason
        kind: ParseErrorKind,
    },
}

impl From<ScanError> for CompileError {
    fn from(err: ScanError) -> Self {
        Self::Scan(err)
    }
}

impl std::error::Error for CompileError {}
impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scan(err) => write!(f, "{}", err),
            Self::Parse { pos, lexeme, kind } => {
                if lexeme.is_empty() {
                    write!(f, "[line {}] Error at end: {}", pos.line, kind)
                } else {
                    write!(f, "[line {}] Error at '{}': {}", pos.line, lexeme, kind)
                }
            }
        }
    }
}

/// One activation record in a runtime error trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// Source line of the instruction being executed in the frame
    pub line: usize,
    /// Name of the running function, `None` for the top-level script
    pub function: Option<String>,
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(name) => write!(f, "[line {}] in <fn {}>", self.line, name),
            None => write!(f, "[line {}] in <script>", self.line),
        }
    }
}

/// A runtime error together with the call frames that were active when it happened, innermost
/// first.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeFailure {
    /// What went wrong
    pub error: RuntimeError,
    /// Active frames, innermost first
    pub trace: Vec<TraceFrame>,
}

impl std::error::Error for RuntimeFailure {}
impl fmt::Display for RuntimeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut frames = self.trace.iter();
        match frames.next() {
            Some(innermost) => write!(f, "{}: {}", innermost, self.error)?,
            None => write!(f, "{}", self.error)?,
        }
        for frame in frames {
            write!(f, "\n{}", frame)?;
        }
        Ok(())
    }
}

/// Errors returned when interpreting a program
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InterpretError {
    /// The compiler rejected the source, nothing was executed
    #[error("{}", .0.iter().join("\n"))]
    Compile(Vec<CompileError>),
    /// Execution stopped on a runtime error
    #[error(transparent)]
    Runtime(RuntimeFailure),
    /// An allocation failed, this is fatal
    #[error("Fatal: {0}")]
    OutOfMemory(HeapError),
}

impl From<HeapError> for InterpretError {
    fn from(err: HeapError) -> Self {
        Self::OutOfMemory(err)
    }
}

impl InterpretError {
    /// The result code reported for this error.
    pub fn code(&self) -> ResultCode {
        match self {
            Self::Compile(_) => ResultCode::CompileError,
            Self::Runtime(_) | Self::OutOfMemory(_) => ResultCode::RuntimeError,
        }
    }
}

/// Coarse outcome of [`crate::Vm::interpret`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResultCode {
    /// The program ran to completion
    Ok = 0,
    /// The program did not compile
    CompileError,
    /// The program stopped on an error
    RuntimeError,
}

impl From<&Result<(), InterpretError>> for ResultCode {
    fn from(res: &Result<(), InterpretError>) -> Self {
        match res {
            Ok(()) => Self::Ok,
            Err(err) => err.code(),
        }
    }
}
