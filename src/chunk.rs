//! This module deals with chunks of bytecodes.

use std::io::{self, Write};

use crate::{ChunkError, Heap, ObjRef, OpCode, Value};

/// The first instruction offset that was emitted for a source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineStart {
    /// Offset of the first byte of the run
    pub offset: usize,
    /// Source line of every byte in the run
    pub line: usize,
}

/// Chunk is a sequence of instructions and data that will be written to by the compiler
/// and later run by the virtual-machine.
///
/// # Examples
///
/// ```
/// use yapl::{Chunk, OpCode, Value};
///
/// let mut chunk = Chunk::default();
/// let const_id = chunk.write_constant(Value::Number(1.0), 1).unwrap();
/// assert_eq!(chunk.constant(const_id), Some(&Value::Number(1.0)));
///
/// chunk.write_op(OpCode::Return, 2);
/// assert_eq!(chunk.code(), &[OpCode::Constant as u8, 0, OpCode::Return as u8]);
/// assert_eq!(chunk.get_line(1), 1);
/// assert_eq!(chunk.get_line(2), 2);
/// ```
#[derive(Default, Debug, Clone)]
pub struct Chunk {
    code: Vec<u8>,
    lines: Vec<LineStart>,
    constants: Vec<Value>,
}

impl Chunk {
    /// Append a byte that was produced from the given source line.
    pub fn write(&mut self, byte: u8, line: usize) {
        let offset = self.code.len();
        self.code.push(byte);
        match self.lines.last() {
            Some(last) if last.line == line => {}
            _ => self.lines.push(LineStart { offset, line }),
        }
    }

    /// Append an opcode byte.
    pub fn write_op(&mut self, op: OpCode, line: usize) {
        self.write(op.into(), line);
    }

    /// Add a constant value to the pool and return its index.
    pub fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    /// Add a constant and emit the instruction loading it, using the short form when the index
    /// fits in a byte.
    pub fn write_constant(&mut self, value: Value, line: usize) -> Result<usize, ChunkError> {
        if self.constants.len() > u16::MAX as usize {
            return Err(ChunkError::TooManyConstants);
        }
        let index = self.add_constant(value);
        match u8::try_from(index) {
            Ok(byte) => {
                self.write_op(OpCode::Constant, line);
                self.write(byte, line);
            }
            Err(_) => {
                let [lo, hi] = (index as u16).to_le_bytes();
                self.write_op(OpCode::Constant16, line);
                self.write(lo, line);
                self.write(hi, line);
            }
        }
        Ok(index)
    }

    /// Overwrite an already emitted byte, used to back-patch jump offsets.
    pub fn patch(&mut self, offset: usize, byte: u8) {
        if let Some(b) = self.code.get_mut(offset) {
            *b = byte;
        }
    }

    /// Source line of the instruction byte at the offset.
    ///
    /// Line runs are sorted by offset, so this is a binary search for the last run starting at
    /// or before the offset.
    pub fn get_line(&self, offset: usize) -> usize {
        let runs = self.lines.partition_point(|run| run.offset <= offset);
        runs.checked_sub(1)
            .map(|idx| self.lines[idx].line)
            .unwrap_or(0)
    }

    /// The bytecode.
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Number of bytes of bytecode.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Return true if no byte has been written.
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// The run-length encoded line map.
    pub fn lines(&self) -> &[LineStart] {
        &self.lines
    }

    /// The constant pool.
    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    /// Read the constant at the given index
    pub fn constant(&self, idx: usize) -> Option<&Value> {
        self.constants.get(idx)
    }

    /// Go through the instructions in the chunk and display them in human-readable format.
    pub fn disassemble<W: Write>(&self, name: &str, heap: &Heap, mut w: W) -> io::Result<()> {
        writeln!(w, "== {} ==", name)?;
        let mut offset = 0;
        while offset < self.code.len() {
            offset = self.disassemble_instruction(offset, heap, &mut w)?;
        }
        Ok(())
    }

    /// Display an instruction in human readable format and return the offset of the next one.
    pub fn disassemble_instruction<W: Write>(
        &self,
        offset: usize,
        heap: &Heap,
        mut w: W,
    ) -> io::Result<usize> {
        let byte = match self.code.get(offset) {
            Some(&byte) => byte,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("offset {} is past the end of the chunk", offset),
                ))
            }
        };
        write!(w, "{:04} ", offset)?;
        if offset > 0 && self.get_line(offset) == self.get_line(offset - 1) {
            write!(w, "   | ")?;
        } else {
            write!(w, "{:4} ", self.get_line(offset))?;
        }

        let op = match OpCode::try_from(byte) {
            Ok(op) => op,
            Err(_) => {
                writeln!(w, "Unknown opcode {}", byte)?;
                return Ok(offset + 1);
            }
        };
        let name = op.name();
        match op {
            OpCode::Constant | OpCode::DefineGlobal | OpCode::GetGlobal | OpCode::SetGlobal => {
                let idx = self.byte_at(offset + 1) as usize;
                self.constant_instruction(name, idx, heap, &mut w)?;
                Ok(offset + 2)
            }
            OpCode::Constant16 => {
                let idx = self.short_at(offset + 1) as usize;
                self.constant_instruction(name, idx, heap, &mut w)?;
                Ok(offset + 3)
            }
            OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::GetUpvalue
            | OpCode::SetUpvalue
            | OpCode::Call => {
                writeln!(w, "{:-16} {:4}", name, self.byte_at(offset + 1))?;
                Ok(offset + 2)
            }
            OpCode::Jump | OpCode::JumpIfFalse => {
                let jump = self.short_at(offset + 1) as usize;
                writeln!(w, "{:-16} {:4} -> {}", name, offset, offset + 3 + jump)?;
                Ok(offset + 3)
            }
            OpCode::Loop => {
                let jump = self.short_at(offset + 1) as usize;
                let target = (offset + 3).saturating_sub(jump);
                writeln!(w, "{:-16} {:4} -> {}", name, offset, target)?;
                Ok(offset + 3)
            }
            OpCode::Closure => self.closure_instruction(offset, heap, &mut w),
            _ => {
                writeln!(w, "{}", name)?;
                Ok(offset + 1)
            }
        }
    }

    fn constant_instruction<W: Write>(
        &self,
        name: &str,
        idx: usize,
        heap: &Heap,
        mut w: W,
    ) -> io::Result<()> {
        match self.constant(idx) {
            Some(val) => writeln!(w, "{:-16} {:4} {}", name, idx, val.debug(heap)),
            None => writeln!(w, "{:-16} {:4} <missing>", name, idx),
        }
    }

    fn closure_instruction<W: Write>(
        &self,
        offset: usize,
        heap: &Heap,
        mut w: W,
    ) -> io::Result<usize> {
        let idx = self.byte_at(offset + 1) as usize;
        self.constant_instruction(OpCode::Closure.name(), idx, heap, &mut w)?;

        let upvalue_count = self
            .constant(idx)
            .and_then(Value::as_obj)
            .and_then(|f| heap.as_function(f).ok())
            .map(|f| f.upvalue_count)
            .unwrap_or(0);
        let mut next = offset + 2;
        for _ in 0..upvalue_count {
            let kind = if self.byte_at(next) == 1 {
                "local"
            } else {
                "upvalue"
            };
            writeln!(
                w,
                "{:04}    |                     {} {}",
                next,
                kind,
                self.byte_at(next + 1)
            )?;
            next += 2;
        }
        Ok(next)
    }

    fn byte_at(&self, offset: usize) -> u8 {
        self.code.get(offset).copied().unwrap_or(0)
    }

    fn short_at(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.byte_at(offset), self.byte_at(offset + 1)])
    }
}

/// Disassemble a compiled function and, recursively, every function in its constant pool.
pub fn disassemble_program<W: Write>(heap: &Heap, function: ObjRef, mut w: W) -> io::Result<()> {
    let mut pending = vec![function];
    while let Some(next) = pending.pop() {
        let fun = match heap.as_function(next) {
            Ok(fun) => fun,
            Err(_) => continue,
        };
        let name = match fun.name {
            Some(name) => heap.str_lossy(name),
            None => "<script>".to_string(),
        };
        fun.chunk.disassemble(&name, heap, &mut w)?;
        let nested = fun
            .chunk
            .constants()
            .iter()
            .filter_map(Value::as_obj)
            .filter(|obj| heap.as_function(*obj).is_ok());
        // Reversed so that functions come out in the order they were declared.
        pending.extend(nested.collect::<Vec<_>>().into_iter().rev());
    }
    Ok(())
}
