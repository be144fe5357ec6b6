//! Implementation of the bytecode virtual machine.

use std::{
    fmt,
    io::{self, Write},
};

use itertools::Itertools;

use crate::{
    compile, native::NATIVES, Heap, HeapError, InterpretError, NativeContext, NativeFn,
    ObjClosure, ObjKind, ObjNative, ObjRef, ObjUpvalue, Object, OpCode, RuntimeError,
    RuntimeFailure, Table, TraceFrame, Value,
};

/// The max number of call frames that can be active at once.
pub const VM_FRAMES_MAX: usize = 64;

/// The max number of values on the virtual machine's stack.
pub const VM_STACK_MAX: usize = VM_FRAMES_MAX * UINT8_COUNT;

/// The number of values addressable by a one-byte operand.
pub const UINT8_COUNT: usize = u8::MAX as usize + 1;

#[derive(Debug, Clone, Copy)]
struct CallFrame {
    closure: ObjRef,
    function: ObjRef,
    ip: usize,
    slot: usize,
}

/// Runtime settings of a virtual machine.
#[derive(Debug, Clone, Default)]
pub struct VmOptions {
    /// Name of the source file being run, if it came from one.
    pub script_name: Option<String>,
}

/// A bytecode virtual machine for the YAPL programming language.
///
/// A virtual machine owns every object created while it runs. Globals and interned strings
/// persist across calls to [`Vm::interpret`], everything is released when it's dropped.
pub struct Vm {
    heap: Heap,
    globals: Table,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    // Sorted by stack slot, the last element has the highest slot.
    open_upvalues: Vec<ObjRef>,
    out: Box<dyn Write>,
    options: VmOptions,
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("options", &self.options)
            .field("objects", &self.heap.len())
            .field("globals", &self.globals.len())
            .field("stack", &self.stack.len())
            .field("frames", &self.frames.len())
            .field("open_upvalues", &self.open_upvalues.len())
            .finish()
    }
}

impl Vm {
    /// Create a virtual machine that writes program output to stdout.
    pub fn new() -> Result<Self, HeapError> {
        Self::with_output(Box::new(io::stdout()))
    }

    /// Create a virtual machine that writes program output to the given writer.
    pub fn with_output(out: Box<dyn Write>) -> Result<Self, HeapError> {
        Self::with_options(VmOptions::default(), out)
    }

    /// Create a virtual machine with the given settings.
    pub fn with_options(options: VmOptions, out: Box<dyn Write>) -> Result<Self, HeapError> {
        let mut vm = Self {
            heap: Heap::new(),
            globals: Table::new(),
            stack: Vec::with_capacity(VM_STACK_MAX),
            frames: Vec::with_capacity(VM_FRAMES_MAX),
            open_upvalues: Vec::new(),
            out,
            options,
        };
        for &(name, function) in NATIVES {
            vm.define_native(name, function)?;
        }
        Ok(vm)
    }

    /// Register a host function as a global.
    pub fn define_native(&mut self, name: &'static str, function: NativeFn) -> Result<(), HeapError> {
        let key = self.heap.intern(name.as_bytes())?;
        let hash = hash_of(&self.heap, key);
        let native = self
            .heap
            .allocate(Object::Native(ObjNative { name, function }))?;
        self.globals.set(key, hash, Value::Obj(native));
        tracing::debug!(name, "defined native");
        Ok(())
    }

    /// Compile and execute the given source code.
    pub fn interpret(&mut self, src: &str) -> Result<(), InterpretError> {
        tracing::debug!(script = ?self.options.script_name, "interpret");
        let function = compile(src, &mut self.heap)?;
        self.run_function(function).map(|_| ())
    }

    /// Execute a compiled top-level function and return the value it halted with.
    ///
    /// On a runtime error the stack and the call frames are reset, so the virtual machine can
    /// be reused afterwards.
    pub fn run_function(&mut self, function: ObjRef) -> Result<Value, InterpretError> {
        let result = self.call_script(function).and_then(|()| self.run());
        match result {
            Ok(value) => {
                tracing::debug!(objects = self.heap.len(), "halted");
                Ok(value)
            }
            Err(RuntimeError::Heap(err)) => {
                self.reset_stack();
                Err(InterpretError::OutOfMemory(err))
            }
            Err(error) => {
                let trace = self.stack_trace();
                self.reset_stack();
                tracing::debug!(%error, "runtime error");
                Err(InterpretError::Runtime(RuntimeFailure { error, trace }))
            }
        }
    }

    /// The settings this virtual machine was created with.
    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    /// The object heap.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The object heap, mutably.
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// The global variables.
    pub fn globals(&self) -> &Table {
        &self.globals
    }

    /// Read a global variable by name.
    pub fn global(&self, name: &str) -> Option<Value> {
        let key = self.heap.find_interned(name.as_bytes())?;
        self.globals.get(key, hash_of(&self.heap, key))
    }

    /// Number of values on the stack.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Number of active call frames.
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Stack slots of the open upvalues, in ascending order.
    pub fn open_upvalue_slots(&self) -> Vec<usize> {
        self.open_upvalues
            .iter()
            .filter_map(|&upvalue| match self.heap.as_upvalue(upvalue) {
                Ok(ObjUpvalue::Open(slot)) => Some(*slot),
                _ => None,
            })
            .collect()
    }

    /// Push a value on to the stack.
    pub fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= VM_STACK_MAX {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    /// Pop the value at the top of the stack.
    pub fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }

    /// Read the value that is `distance` slots below the top of the stack.
    pub fn peek(&self, distance: usize) -> Result<Value, RuntimeError> {
        self.stack
            .len()
            .checked_sub(distance + 1)
            .and_then(|idx| self.stack.get(idx))
            .copied()
            .ok_or(RuntimeError::StackUnderflow)
    }

    /// Drop every value and call frame. Variables captured by closures keep their current
    /// values.
    pub fn reset_stack(&mut self) {
        if let Err(err) = self.close_upvalues(0) {
            tracing::warn!(%err, "could not close upvalues");
        }
        self.open_upvalues.clear();
        self.stack.clear();
        self.frames.clear();
    }

    fn call_script(&mut self, function: ObjRef) -> Result<(), RuntimeError> {
        let closure = self
            .heap
            .allocate(Object::Closure(ObjClosure::new(function, Vec::new())))?;
        self.push(Value::Obj(closure))?;
        self.call(closure, function, 0)
    }

    fn stack_trace(&self) -> Vec<TraceFrame> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let function = self.heap.as_function(frame.function).ok();
                TraceFrame {
                    line: function.map_or(0, |f| f.chunk.get_line(frame.ip.saturating_sub(1))),
                    function: function
                        .and_then(|f| f.name)
                        .map(|name| self.heap.str_lossy(name)),
                }
            })
            .collect()
    }

    fn trace_instruction(&self) -> Result<(), RuntimeError> {
        let frame = self.frame()?;
        let chunk = &self.heap.as_function(frame.function)?.chunk;
        if frame.ip >= chunk.len() {
            return Ok(());
        }
        let stack = self
            .stack
            .iter()
            .map(|v| format!("[ {} ]", v.debug(&self.heap)))
            .join("");
        let mut instruction = Vec::new();
        if chunk
            .disassemble_instruction(frame.ip, &self.heap, &mut instruction)
            .is_ok()
        {
            let instruction = String::from_utf8_lossy(&instruction);
            tracing::trace!(%stack, "{}", instruction.trim_end());
        }
        Ok(())
    }
}

impl Vm {
    fn run(&mut self) -> Result<Value, RuntimeError> {
        loop {
            if tracing::enabled!(tracing::Level::TRACE) {
                self.trace_instruction()?;
            }
            let byte = self.read_byte()?;
            let op = OpCode::try_from(byte).map_err(|_| RuntimeError::InvalidOpcode(byte))?;
            match op {
                OpCode::Constant => {
                    let idx = self.read_byte()? as usize;
                    self.push(self.constant(idx)?)?;
                }
                OpCode::Constant16 => {
                    let idx = self.read_u16()? as usize;
                    self.push(self.constant(idx)?)?;
                }
                OpCode::Null => self.push(Value::Null)?,
                OpCode::True => self.push(Value::Bool(true))?,
                OpCode::False => self.push(Value::Bool(false))?,
                OpCode::Not => {
                    let value = self.pop()?;
                    self.push(Value::Bool(value.is_falsey(&self.heap)))?;
                }
                OpCode::Negate => self.unary_number(|n| -n)?,
                OpCode::Equal => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Bool(a == b))?;
                }
                OpCode::Greater => self.binary_number(|a, b| Value::Bool(a > b))?,
                OpCode::Less => self.binary_number(|a, b| Value::Bool(a < b))?,
                OpCode::Add => self.add()?,
                OpCode::Subtract => self.binary_number(|a, b| Value::Number(a - b))?,
                OpCode::Multiply => self.binary_number(|a, b| Value::Number(a * b))?,
                OpCode::Divide => self.binary_number(|a, b| Value::Number(a / b))?,
                OpCode::Mod => self.binary_number(|a, b| Value::Number(a % b))?,
                OpCode::And | OpCode::Or => return Err(RuntimeError::ReservedOpcode(op.name())),
                OpCode::DefineGlobal => self.define_global()?,
                OpCode::GetGlobal => self.get_global()?,
                OpCode::SetGlobal => self.set_global()?,
                OpCode::GetLocal => {
                    let slot = self.frame()?.slot + self.read_byte()? as usize;
                    let value = self
                        .stack
                        .get(slot)
                        .copied()
                        .ok_or(RuntimeError::InvalidSlot(slot))?;
                    self.push(value)?;
                }
                OpCode::SetLocal => {
                    let slot = self.frame()?.slot + self.read_byte()? as usize;
                    let value = self.peek(0)?;
                    *self
                        .stack
                        .get_mut(slot)
                        .ok_or(RuntimeError::InvalidSlot(slot))? = value;
                }
                OpCode::GetUpvalue => self.get_upvalue()?,
                OpCode::SetUpvalue => self.set_upvalue()?,
                OpCode::CloseUpvalue => {
                    let top = self
                        .stack
                        .len()
                        .checked_sub(1)
                        .ok_or(RuntimeError::StackUnderflow)?;
                    self.close_upvalues(top)?;
                    self.pop()?;
                }
                OpCode::Jump => {
                    let offset = self.read_u16()? as usize;
                    self.frame_mut()?.ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16()? as usize;
                    if self.peek(0)?.is_falsey(&self.heap) {
                        self.frame_mut()?.ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16()? as usize;
                    let frame = self.frame_mut()?;
                    frame.ip = frame
                        .ip
                        .checked_sub(offset)
                        .ok_or(RuntimeError::CodeOverrun)?;
                }
                OpCode::Closure => self.closure()?,
                OpCode::Call => {
                    let argc = self.read_byte()?;
                    self.call_value(argc)?;
                }
                OpCode::Return => {
                    if let Some(value) = self.ret()? {
                        return Ok(value);
                    }
                }
                OpCode::Increment => self.unary_number(|n| n + 1.0)?,
                OpCode::Decrement => self.unary_number(|n| n - 1.0)?,
                OpCode::Dup => self.push(self.peek(0)?)?,
                OpCode::Pop => {
                    self.pop()?;
                }
            }
        }
    }

    fn unary_number(&mut self, op: fn(f64) -> f64) -> Result<(), RuntimeError> {
        match self.peek(0)? {
            Value::Number(n) => {
                self.pop()?;
                self.push(Value::Number(op(n)))
            }
            _ => Err(RuntimeError::OperandMustBeNumber),
        }
    }

    fn binary_number(&mut self, op: fn(f64, f64) -> Value) -> Result<(), RuntimeError> {
        match (self.peek(1)?, self.peek(0)?) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop()?;
                self.pop()?;
                self.push(op(a, b))
            }
            _ => Err(RuntimeError::OperandsMustBeNumbers),
        }
    }

    fn add(&mut self) -> Result<(), RuntimeError> {
        match (self.peek(1)?, self.peek(0)?) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop()?;
                self.pop()?;
                self.push(Value::Number(a + b))
            }
            (Value::Obj(a), Value::Obj(b)) if self.heap.is_string(a) && self.heap.is_string(b) => {
                let joined = self.heap.concat(a, b)?;
                self.pop()?;
                self.pop()?;
                self.push(Value::Obj(joined))
            }
            _ => Err(RuntimeError::InvalidAddOperands),
        }
    }

    fn define_global(&mut self) -> Result<(), RuntimeError> {
        let (name, hash) = self.read_string()?;
        if self.globals.contains(name, hash) {
            return Err(RuntimeError::GlobalRedefinition(self.heap.str_lossy(name)));
        }
        let value = self.peek(0)?;
        self.globals.set(name, hash, value);
        self.pop()?;
        Ok(())
    }

    fn get_global(&mut self) -> Result<(), RuntimeError> {
        let (name, hash) = self.read_string()?;
        let value = self
            .globals
            .get(name, hash)
            .ok_or_else(|| RuntimeError::UndefinedVariable(self.heap.str_lossy(name)))?;
        self.push(value)
    }

    fn set_global(&mut self) -> Result<(), RuntimeError> {
        let (name, hash) = self.read_string()?;
        if !self.globals.contains(name, hash) {
            return Err(RuntimeError::UndefinedVariable(self.heap.str_lossy(name)));
        }
        let value = self.peek(0)?;
        self.globals.set(name, hash, value);
        Ok(())
    }

    fn upvalue(&self, idx: usize) -> Result<ObjRef, RuntimeError> {
        let closure = self.heap.as_closure(self.frame()?.closure)?;
        closure
            .upvalues
            .get(idx)
            .copied()
            .ok_or(RuntimeError::InvalidUpvalue(idx))
    }

    fn get_upvalue(&mut self) -> Result<(), RuntimeError> {
        let idx = self.read_byte()? as usize;
        let upvalue = self.upvalue(idx)?;
        let value = match *self.heap.as_upvalue(upvalue)? {
            ObjUpvalue::Open(slot) => self
                .stack
                .get(slot)
                .copied()
                .ok_or(RuntimeError::InvalidSlot(slot))?,
            ObjUpvalue::Closed(value) => value,
        };
        self.push(value)
    }

    fn set_upvalue(&mut self) -> Result<(), RuntimeError> {
        let idx = self.read_byte()? as usize;
        let upvalue = self.upvalue(idx)?;
        let value = self.peek(0)?;
        match self.heap.as_upvalue_mut(upvalue)? {
            ObjUpvalue::Open(slot) => {
                let slot = *slot;
                *self
                    .stack
                    .get_mut(slot)
                    .ok_or(RuntimeError::InvalidSlot(slot))? = value;
            }
            ObjUpvalue::Closed(closed) => *closed = value,
        }
        Ok(())
    }

    fn open_slot(&self, upvalue: ObjRef) -> Result<usize, RuntimeError> {
        match self.heap.as_upvalue(upvalue)? {
            ObjUpvalue::Open(slot) => Ok(*slot),
            ObjUpvalue::Closed(_) => Err(RuntimeError::UpvalueAlreadyClosed),
        }
    }

    /// Return the open upvalue for the stack slot, creating it if no closure has captured the
    /// slot yet.
    fn capture_upvalue(&mut self, slot: usize) -> Result<ObjRef, RuntimeError> {
        if slot >= self.stack.len() {
            return Err(RuntimeError::InvalidSlot(slot));
        }
        let mut insert_at = self.open_upvalues.len();
        for (i, &upvalue) in self.open_upvalues.iter().enumerate().rev() {
            let open = self.open_slot(upvalue)?;
            if open == slot {
                return Ok(upvalue);
            }
            if open < slot {
                break;
            }
            insert_at = i;
        }
        let upvalue = self
            .heap
            .allocate(Object::Upvalue(ObjUpvalue::Open(slot)))?;
        self.open_upvalues.insert(insert_at, upvalue);
        Ok(upvalue)
    }

    /// Close every open upvalue whose slot is at or above `down_to`.
    fn close_upvalues(&mut self, down_to: usize) -> Result<(), RuntimeError> {
        while let Some(&upvalue) = self.open_upvalues.last() {
            let slot = self.open_slot(upvalue)?;
            if slot < down_to {
                break;
            }
            let value = self
                .stack
                .get(slot)
                .copied()
                .ok_or(RuntimeError::InvalidSlot(slot))?;
            *self.heap.as_upvalue_mut(upvalue)? = ObjUpvalue::Closed(value);
            self.open_upvalues.pop();
        }
        Ok(())
    }

    fn closure(&mut self) -> Result<(), RuntimeError> {
        let idx = self.read_byte()? as usize;
        let function = self.constant(idx)?.expect_obj(ObjKind::Function)?;
        let upvalue_count = self.heap.as_function(function)?.upvalue_count;
        let frame = *self.frame()?;

        let mut upvalues = Vec::with_capacity(upvalue_count);
        for _ in 0..upvalue_count {
            let is_local = self.read_byte()? == 1;
            let index = self.read_byte()? as usize;
            let upvalue = if is_local {
                self.capture_upvalue(frame.slot + index)?
            } else {
                self.heap
                    .as_closure(frame.closure)?
                    .upvalues
                    .get(index)
                    .copied()
                    .ok_or(RuntimeError::InvalidUpvalue(index))?
            };
            upvalues.push(upvalue);
        }

        let closure = self
            .heap
            .allocate(Object::Closure(ObjClosure::new(function, upvalues)))?;
        self.push(Value::Obj(closure))
    }

    fn call_value(&mut self, argc: u8) -> Result<(), RuntimeError> {
        let Value::Obj(callee) = self.peek(argc as usize)? else {
            return Err(RuntimeError::NotCallable);
        };
        match self.heap.get(callee)? {
            Object::Closure(closure) => {
                let function = closure.function;
                self.call(callee, function, argc)
            }
            Object::Native(native) => {
                let native = *native;
                self.call_native(native, argc)
            }
            _ => Err(RuntimeError::NotCallable),
        }
    }

    fn call(&mut self, closure: ObjRef, function: ObjRef, argc: u8) -> Result<(), RuntimeError> {
        let arity = self.heap.as_function(function)?.arity;
        if argc != arity {
            return Err(RuntimeError::BadArgumentsCount { arity, argc });
        }
        if self.frames.len() == VM_FRAMES_MAX {
            return Err(RuntimeError::StackOverflow);
        }
        let slot = self
            .stack
            .len()
            .checked_sub(argc as usize + 1)
            .ok_or(RuntimeError::StackUnderflow)?;
        self.frames.push(CallFrame {
            closure,
            function,
            ip: 0,
            slot,
        });
        Ok(())
    }

    fn call_native(&mut self, native: ObjNative, argc: u8) -> Result<(), RuntimeError> {
        let args = self
            .stack
            .len()
            .checked_sub(argc as usize)
            .ok_or(RuntimeError::StackUnderflow)?;
        let mut ctx = NativeContext {
            heap: &mut self.heap,
            out: &mut *self.out,
        };
        let result = (native.function)(&mut ctx, &self.stack[args..]);
        if let Value::Error = result {
            return Err(RuntimeError::NativeFailed(native.name.to_string()));
        }
        // Arguments and the callee.
        self.stack.truncate(args - 1);
        self.push(result)
    }

    /// Return from the current frame. Gives back the result when the outermost frame returns.
    fn ret(&mut self) -> Result<Option<Value>, RuntimeError> {
        let result = self.pop()?;
        let frame = self.frames.pop().ok_or(RuntimeError::NoActiveFrame)?;
        self.close_upvalues(frame.slot)?;
        self.stack.truncate(frame.slot);
        if self.frames.is_empty() {
            return Ok(Some(result));
        }
        self.push(result)?;
        Ok(None)
    }

    fn frame(&self) -> Result<&CallFrame, RuntimeError> {
        self.frames.last().ok_or(RuntimeError::NoActiveFrame)
    }

    fn frame_mut(&mut self) -> Result<&mut CallFrame, RuntimeError> {
        self.frames.last_mut().ok_or(RuntimeError::NoActiveFrame)
    }

    /// Read the next byte in the stream of bytecode instructions.
    fn read_byte(&mut self) -> Result<u8, RuntimeError> {
        let frame = self.frames.last_mut().ok_or(RuntimeError::NoActiveFrame)?;
        let chunk = &self.heap.as_function(frame.function)?.chunk;
        let byte = *chunk
            .code()
            .get(frame.ip)
            .ok_or(RuntimeError::CodeOverrun)?;
        frame.ip += 1;
        Ok(byte)
    }

    /// Read the next 2 bytes in the stream of bytecode instructions as a little-endian number.
    fn read_u16(&mut self) -> Result<u16, RuntimeError> {
        let lo = self.read_byte()?;
        let hi = self.read_byte()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn constant(&self, idx: usize) -> Result<Value, RuntimeError> {
        let function = self.heap.as_function(self.frame()?.function)?;
        function
            .chunk
            .constant(idx)
            .copied()
            .ok_or(RuntimeError::InvalidConstant(idx))
    }

    fn read_string(&mut self) -> Result<(ObjRef, u32), RuntimeError> {
        let idx = self.read_byte()? as usize;
        let name = self.constant(idx)?.expect_obj(ObjKind::String)?;
        let hash = self.heap.as_string(name)?.hash();
        Ok((name, hash))
    }
}

fn hash_of(heap: &Heap, key: ObjRef) -> u32 {
    heap.as_string(key).map(|s| s.hash()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Chunk, ObjFunction};

    fn vm() -> Vm {
        Vm::with_output(Box::new(io::sink())).unwrap()
    }

    /// Allocate a top-level function whose chunk is filled in by the closure.
    fn script(vm: &mut Vm, build: impl FnOnce(&mut Heap, &mut Chunk)) -> ObjRef {
        let mut function = ObjFunction::new(None);
        build(vm.heap_mut(), &mut function.chunk);
        vm.heap_mut()
            .allocate(Object::Function(function))
            .unwrap()
    }

    fn run_error(vm: &mut Vm, function: ObjRef) -> RuntimeError {
        match vm.run_function(function) {
            Err(InterpretError::Runtime(failure)) => failure.error,
            other => panic!("expected a runtime error, got {:?}", other),
        }
    }

    #[test]
    fn natives_are_registered_as_globals() {
        let vm = vm();
        for name in ["clock", "print", "puts"] {
            let native = vm.global(name).and_then(|v| v.as_obj()).unwrap();
            assert_eq!(vm.heap().as_native(native).unwrap().name, name);
        }
        assert_eq!(vm.global("missing"), None);
    }

    #[test]
    fn returns_the_halting_value() {
        let mut vm = vm();
        let f = script(&mut vm, |_, chunk| {
            chunk.write_constant(Value::Number(5.0), 1).unwrap();
            chunk.write_op(OpCode::Increment, 1);
            chunk.write_op(OpCode::Dup, 1);
            chunk.write_op(OpCode::Add, 1);
            chunk.write_op(OpCode::Return, 1);
        });
        assert_eq!(vm.run_function(f), Ok(Value::Number(12.0)));
        assert_eq!(vm.stack_depth(), 0);
        assert_eq!(vm.frame_depth(), 0);
    }

    #[test]
    fn close_upvalue_closes_exactly_the_top_slot() {
        let mut vm = vm();
        let mut inner = ObjFunction::new(None);
        inner.upvalue_count = 1;
        inner.chunk.write_op(OpCode::GetUpvalue, 1);
        inner.chunk.write(0, 1);
        inner.chunk.write_op(OpCode::Return, 1);
        let inner = vm.heap_mut().allocate(Object::Function(inner)).unwrap();
        let f_name = vm.heap_mut().intern(b"f").unwrap();
        let g_name = vm.heap_mut().intern(b"g").unwrap();

        let main = script(&mut vm, |_, chunk| {
            chunk.write_constant(Value::Number(7.0), 1).unwrap();
            let inner = chunk.add_constant(Value::Obj(inner)) as u8;
            let f = chunk.add_constant(Value::Obj(f_name)) as u8;
            let g = chunk.add_constant(Value::Obj(g_name)) as u8;
            for name in [f, g] {
                chunk.write_op(OpCode::Closure, 1);
                chunk.write(inner, 1);
                chunk.write(1, 1);
                chunk.write(1, 1);
                chunk.write_op(OpCode::DefineGlobal, 1);
                chunk.write(name, 1);
            }
            chunk.write_op(OpCode::CloseUpvalue, 2);
            chunk.write_op(OpCode::Null, 2);
            chunk.write_op(OpCode::Return, 2);
        });
        assert_eq!(vm.run_function(main), Ok(Value::Null));
        assert!(vm.open_upvalue_slots().is_empty());

        let upvalue_of = |vm: &Vm, name: &str| {
            let closure = vm.global(name).and_then(|v| v.as_obj()).unwrap();
            vm.heap().as_closure(closure).unwrap().upvalues[0]
        };
        let f = upvalue_of(&vm, "f");
        let g = upvalue_of(&vm, "g");
        assert_eq!(f, g);
        assert_eq!(
            vm.heap().as_upvalue(f).unwrap(),
            &ObjUpvalue::Closed(Value::Number(7.0))
        );
    }

    #[test]
    fn inner_return_closes_only_the_upvalues_of_its_frame() {
        let mut vm = vm();
        let mut leaf = ObjFunction::new(None);
        leaf.upvalue_count = 1;
        leaf.chunk.write_op(OpCode::GetUpvalue, 1);
        leaf.chunk.write(0, 1);
        leaf.chunk.write_op(OpCode::Return, 1);
        let leaf = vm.heap_mut().allocate(Object::Function(leaf)).unwrap();

        // Captures its own slot 1, then returns.
        let mut inner = ObjFunction::new(None);
        inner.chunk.write_constant(Value::Number(5.0), 2).unwrap();
        let leaf_idx = inner.chunk.add_constant(Value::Obj(leaf)) as u8;
        inner.chunk.write_op(OpCode::Closure, 2);
        inner.chunk.write(leaf_idx, 2);
        inner.chunk.write(1, 2);
        inner.chunk.write(1, 2);
        inner.chunk.write_op(OpCode::Pop, 2);
        inner.chunk.write_op(OpCode::Null, 2);
        inner.chunk.write_op(OpCode::Return, 2);
        let inner = vm.heap_mut().allocate(Object::Function(inner)).unwrap();

        let main = script(&mut vm, |_, chunk| {
            chunk.write_constant(Value::Number(1.0), 1).unwrap();
            let leaf_idx = chunk.add_constant(Value::Obj(leaf)) as u8;
            let inner_idx = chunk.add_constant(Value::Obj(inner)) as u8;
            chunk.write_op(OpCode::Closure, 1);
            chunk.write(leaf_idx, 1);
            chunk.write(1, 1);
            chunk.write(1, 1);
            chunk.write_op(OpCode::Closure, 1);
            chunk.write(inner_idx, 1);
            chunk.write_op(OpCode::Call, 1);
            chunk.write(0, 1);
            // Stops the script before its own return.
            chunk.write_op(OpCode::And, 1);
        });

        vm.call_script(main).unwrap();
        assert_eq!(vm.run(), Err(RuntimeError::ReservedOpcode("OP_AND")));
        assert_eq!(vm.frame_depth(), 1);
        assert_eq!(vm.open_upvalue_slots(), vec![1]);
        let closed: Vec<_> = vm
            .heap()
            .iter()
            .filter_map(|(_, object)| match object {
                Object::Upvalue(ObjUpvalue::Closed(value)) => Some(*value),
                _ => None,
            })
            .collect();
        assert_eq!(closed, vec![Value::Number(5.0)]);
    }

    #[test]
    fn capture_keeps_open_upvalues_sorted() {
        let mut vm = vm();
        for _ in 0..4 {
            vm.push(Value::Null).unwrap();
        }
        let a = vm.capture_upvalue(2).unwrap();
        vm.capture_upvalue(0).unwrap();
        vm.capture_upvalue(3).unwrap();
        assert_eq!(vm.capture_upvalue(2).unwrap(), a);
        assert_eq!(vm.open_upvalue_slots(), vec![0, 2, 3]);

        vm.close_upvalues(2).unwrap();
        assert_eq!(vm.open_upvalue_slots(), vec![0]);
        assert!(matches!(
            vm.capture_upvalue(9),
            Err(RuntimeError::InvalidSlot(9))
        ));
    }

    #[test]
    fn reserved_and_unknown_opcodes_fail() {
        let mut vm = vm();
        let f = script(&mut vm, |_, chunk| {
            chunk.write_op(OpCode::True, 1);
            chunk.write_op(OpCode::True, 1);
            chunk.write_op(OpCode::And, 1);
        });
        assert_eq!(run_error(&mut vm, f), RuntimeError::ReservedOpcode("OP_AND"));

        let f = script(&mut vm, |_, chunk| chunk.write(0xff, 1));
        assert_eq!(run_error(&mut vm, f), RuntimeError::InvalidOpcode(0xff));

        let f = script(&mut vm, |_, chunk| chunk.write_op(OpCode::Null, 1));
        assert_eq!(run_error(&mut vm, f), RuntimeError::CodeOverrun);
    }

    #[test]
    fn stack_is_bounded() {
        let mut vm = vm();
        assert_eq!(vm.pop(), Err(RuntimeError::StackUnderflow));
        for _ in 0..VM_STACK_MAX {
            vm.push(Value::Null).unwrap();
        }
        assert_eq!(vm.push(Value::Null), Err(RuntimeError::StackOverflow));
        assert_eq!(vm.stack_depth(), VM_STACK_MAX);
        vm.reset_stack();
        assert_eq!(vm.stack_depth(), 0);
    }

    #[test]
    fn native_failure_is_a_runtime_error() {
        let mut vm = vm();
        let puts = vm.heap_mut().intern(b"puts").unwrap();
        let f = script(&mut vm, |_, chunk| {
            let name = chunk.add_constant(Value::Obj(puts)) as u8;
            chunk.write_op(OpCode::GetGlobal, 1);
            chunk.write(name, 1);
            chunk.write_op(OpCode::Call, 1);
            chunk.write(0, 1);
        });
        assert_eq!(
            run_error(&mut vm, f),
            RuntimeError::NativeFailed("puts".to_string())
        );
        assert_eq!(vm.stack_depth(), 0);
    }
}
