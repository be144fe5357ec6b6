//! Host functions callable from scripts.

use std::{fmt, io::Write};

use crate::{Heap, Value};

/// What a native function gets to see of the virtual machine while it runs.
pub struct NativeContext<'a> {
    /// The heap, for reading and creating objects
    pub heap: &'a mut Heap,
    /// Where program output goes
    pub out: &'a mut dyn Write,
}

impl fmt::Debug for NativeContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeContext")
            .field("objects", &self.heap.len())
            .finish_non_exhaustive()
    }
}

/// Signature of native functions. Failure is signalled by returning [`Value::Error`], never by
/// panicking.
pub type NativeFn = fn(&mut NativeContext<'_>, &[Value]) -> Value;

/// Natives registered as globals by every new virtual machine.
pub(crate) const NATIVES: &[(&str, NativeFn)] = &[("clock", clock), ("print", print), ("puts", puts)];

/// CPU seconds used by the process since it started.
fn clock(_ctx: &mut NativeContext<'_>, _args: &[Value]) -> Value {
    match process_cpu_time() {
        Some(secs) => Value::Number(secs),
        None => Value::Error,
    }
}

#[cfg(unix)]
fn process_cpu_time() -> Option<f64> {
    // SAFETY: `timespec` is plain data and all-zero is a valid value for it.
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    // SAFETY: `ts` is a valid, writable `timespec` for the duration of the call.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_PROCESS_CPUTIME_ID, &mut ts) };
    (rc == 0).then(|| ts.tv_sec as f64 + ts.tv_nsec as f64 / 1e9)
}

#[cfg(not(unix))]
fn process_cpu_time() -> Option<f64> {
    None
}

/// Write a value without a trailing newline.
fn print(ctx: &mut NativeContext<'_>, args: &[Value]) -> Value {
    write_value(ctx, args, "")
}

/// Write a value followed by a newline.
fn puts(ctx: &mut NativeContext<'_>, args: &[Value]) -> Value {
    write_value(ctx, args, "\n")
}

fn write_value(ctx: &mut NativeContext<'_>, args: &[Value], end: &str) -> Value {
    let [value] = args else {
        return Value::Error;
    };
    let written = write!(ctx.out, "{}{}", value.display(ctx.heap), end).and_then(|_| ctx.out.flush());
    match written {
        Ok(()) => Value::Null,
        Err(_) => Value::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(function: NativeFn, heap: &mut Heap, args: &[Value]) -> (Value, String) {
        let mut out = Vec::new();
        let value = function(
            &mut NativeContext {
                heap,
                out: &mut out,
            },
            args,
        );
        (value, String::from_utf8(out).unwrap())
    }

    #[test]
    fn print_and_puts_write_the_textual_form() {
        let mut heap = Heap::new();
        let s = Value::Obj(heap.intern(b"text").unwrap());

        assert_eq!(call(print, &mut heap, &[s]), (Value::Null, "text".to_string()));
        assert_eq!(
            call(puts, &mut heap, &[Value::Number(2.5)]),
            (Value::Null, "2.5\n".to_string())
        );
    }

    #[test]
    fn wrong_arity_signals_failure() {
        let mut heap = Heap::new();
        assert_eq!(call(puts, &mut heap, &[]).0, Value::Error);
        assert_eq!(
            call(print, &mut heap, &[Value::Null, Value::Null]).0,
            Value::Error
        );
    }

    #[cfg(unix)]
    #[test]
    fn clock_counts_cpu_time_used_before_the_call() {
        let mut heap = Heap::new();
        let busy_until = std::time::Instant::now() + std::time::Duration::from_millis(200);
        let mut spins = 0u64;
        while std::time::Instant::now() < busy_until {
            spins = std::hint::black_box(spins.wrapping_add(1));
        }

        let (Value::Number(first), _) = call(clock, &mut heap, &[]) else {
            panic!("clock must return a number");
        };
        assert!(first >= 0.1, "clock() = {first}");

        let (Value::Number(second), _) = call(clock, &mut heap, &[]) else {
            panic!("clock must return a number");
        };
        assert!(second >= first);
    }

    #[test]
    fn context_debug_skips_the_writer() {
        let mut heap = Heap::new();
        let mut out = Vec::new();
        let ctx = NativeContext {
            heap: &mut heap,
            out: &mut out,
        };
        assert_eq!(format!("{:?}", ctx), "NativeContext { objects: 0, .. }");
    }
}
