use num_enum::{IntoPrimitive, TryFromPrimitive};

/// OpCode is a number that specifies the type of the instruction. Operands, if any, follow the
/// opcode byte in the chunk; multi-byte operands are little-endian.
///
/// # Notes
///
/// There is no `NotEqual`, `LessEqual` or `GreaterEqual`. The compiler emits `a != b` as
/// `!(a == b)`, `a <= b` as `!(a > b)` and `a >= b` as `!(a < b)`. With a `NaN` operand the
/// lowered forms give `true` where [IEEE 754] comparisons would give `false`.
///
/// `And` and `Or` are reserved. Short-circuiting is compiled to jumps and executing either one is
/// a runtime error.
///
/// [IEEE 754]: https://en.wikipedia.org/wiki/IEEE_754
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum OpCode {
    /// Load a constant addressed by a one-byte index
    Constant,
    /// Load a constant addressed by a two-byte little-endian index
    Constant16,
    /// Load a `null` value
    Null,
    /// Load a `true` value
    True,
    /// Load a `false` value
    False,
    /// Replace the top of the stack with whether it is falsey
    Not,
    /// Negate a single number operand
    Negate,
    /// Check for equality between 2 operands.
    Equal,
    /// Compare if the first operand is greater than the second
    Greater,
    /// Compare if the first operand is less than the second
    Less,
    /// Add two number operands or concatenate two string operands
    Add,
    /// Subtract the second operand from the first, both operands must be numbers
    Subtract,
    /// Multiply two number operands
    Multiply,
    /// Divide the first operand by the second, both operands must be numbers
    Divide,
    /// Floating point remainder of the first operand divided by the second
    Mod,
    /// Reserved, `and` is compiled to conditional jumps
    And,
    /// Reserved, `or` is compiled to conditional jumps
    Or,
    /// Pop the top of the stack and define a global variable initialized with that value.
    DefineGlobal,
    /// Push the value of a global variable
    GetGlobal,
    /// Assign the top of the stack to an existing global variable
    SetGlobal,
    /// Push the value of a local slot
    GetLocal,
    /// Assign the top of the stack to a local slot
    SetLocal,
    /// Push the value of a captured variable
    GetUpvalue,
    /// Assign the top of the stack to a captured variable
    SetUpvalue,
    /// Close the upvalue pointing at the top of the stack, then pop it
    CloseUpvalue,
    /// Jump forward unconditionally
    Jump,
    /// Jump forward if the top of the stack is falsey, without popping it
    JumpIfFalse,
    /// Jump backward unconditionally
    Loop,
    /// Create a closure from a function constant and its capture descriptors
    Closure,
    /// Call the value below the arguments
    Call,
    /// Return from the current function
    Return,
    /// Add one to a number
    Increment,
    /// Subtract one from a number
    Decrement,
    /// Duplicate the top of the stack
    Dup,
    /// Pop the top of the stack
    Pop,
}

impl OpCode {
    /// The mnemonic used when disassembling.
    pub fn name(self) -> &'static str {
        match self {
            Self::Constant => "OP_CONSTANT",
            Self::Constant16 => "OP_CONSTANT_16",
            Self::Null => "OP_NULL",
            Self::True => "OP_TRUE",
            Self::False => "OP_FALSE",
            Self::Not => "OP_NOT",
            Self::Negate => "OP_NEGATE",
            Self::Equal => "OP_EQUAL",
            Self::Greater => "OP_GREATER",
            Self::Less => "OP_LESS",
            Self::Add => "OP_ADD",
            Self::Subtract => "OP_SUBTRACT",
            Self::Multiply => "OP_MULTIPLY",
            Self::Divide => "OP_DIVIDE",
            Self::Mod => "OP_MOD",
            Self::And => "OP_AND",
            Self::Or => "OP_OR",
            Self::DefineGlobal => "OP_DEFINE_GLOBAL",
            Self::GetGlobal => "OP_GET_GLOBAL",
            Self::SetGlobal => "OP_SET_GLOBAL",
            Self::GetLocal => "OP_GET_LOCAL",
            Self::SetLocal => "OP_SET_LOCAL",
            Self::GetUpvalue => "OP_GET_UPVALUE",
            Self::SetUpvalue => "OP_SET_UPVALUE",
            Self::CloseUpvalue => "OP_CLOSE_UPVALUE",
            Self::Jump => "OP_JUMP",
            Self::JumpIfFalse => "OP_JUMP_IF_FALSE",
            Self::Loop => "OP_LOOP",
            Self::Closure => "OP_CLOSURE",
            Self::Call => "OP_CALL",
            Self::Return => "OP_RETURN",
            Self::Increment => "OP_INCREMENT",
            Self::Decrement => "OP_DECREMENT",
            Self::Dup => "OP_DUP",
            Self::Pop => "OP_POP",
        }
    }
}
