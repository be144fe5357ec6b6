#![allow(dead_code)]

use std::{
    cell::RefCell,
    io::{self, Write},
    rc::Rc,
};

use yapl::{InterpretError, Vm};

/// An in-memory writer whose content stays readable after it's been handed to a VM.
#[derive(Debug, Clone, Default)]
pub struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Create a VM writing to a buffer that the test can read.
pub fn vm() -> (Vm, SharedBuf) {
    let out = SharedBuf::default();
    let vm = Vm::with_output(Box::new(out.clone())).unwrap();
    (vm, out)
}

/// Run the source on a fresh VM and return the result with everything the program wrote.
pub fn run(src: &str) -> (Result<(), InterpretError>, String) {
    let (mut vm, out) = vm();
    let result = vm.interpret(src);
    (result, out.contents())
}

/// Run the source and return what it wrote, failing the test on any error.
pub fn output(src: &str) -> String {
    let (result, out) = run(src);
    if let Err(err) = result {
        panic!("{}", err);
    }
    out
}

/// Run the source and return the rendered runtime error.
pub fn runtime_error(src: &str) -> String {
    match run(src).0 {
        Err(err @ InterpretError::Runtime(_)) => err.to_string(),
        other => panic!("expected a runtime error, got {:?}", other),
    }
}
