//! The embedding API.
//!
//! [`Engine`] is the thin façade an embedder drives: compile source or
//! trees to [`CompiledCode`], execute with arguments and a context, read
//! and write globals, convert host values, and run a program with the
//! top-level exit-status contract.

use std::cell::RefCell;
use std::rc::Rc;

use camel_asm::CallContext;
use camel_value::{
    scalar_ref, Array, ArrayRef, CodeValue, CompiledCode, FileHandle, HostFn, IoRef,
    Scalar, ScalarRef, Slot,
};

use crate::ast::{Node, SourceParser};
use crate::backtrace::Backtrace;
use crate::error::{CompileError, VmError};
use crate::interpreter::Interpreter;
use crate::state::ProgramState;
use crate::VmParameters;

/// Process exit status of a top-level run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Ran to completion.
    Success,
    /// An uncaught `die` (or runtime error) ended the program.
    UncaughtDie,
    /// The program never compiled.
    CompileFailure,
}

impl ExitStatus {
    /// The conventional process exit code.
    pub const fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::UncaughtDie => 1,
            Self::CompileFailure => 2,
        }
    }
}

/// Embedder façade over one interpreter instance.
pub struct Engine {
    interp: Interpreter,
}

impl Engine {
    /// Engine with default limits.
    pub fn new() -> Self {
        Self::with_params(VmParameters::default())
    }

    /// Engine with explicit limits.
    pub fn with_params(params: VmParameters) -> Self {
        Self {
            interp: Interpreter::new(params),
        }
    }

    /// Installs the parser collaborator (required for source-level entry
    /// points and `eval STRING`).
    pub fn set_parser(&mut self, parser: Rc<dyn SourceParser>) {
        self.interp.set_parser(parser);
    }

    /// Captures standard output into an in-memory handle and returns it.
    pub fn capture_stdout(&mut self) -> IoRef {
        let handle = FileHandle::memory(Vec::new());
        self.interp.set_stdout(Rc::clone(&handle));
        handle
    }

    /// Captures standard error into an in-memory handle and returns it.
    pub fn capture_stderr(&mut self) -> IoRef {
        let handle = FileHandle::memory(Vec::new());
        self.interp.set_stderr(Rc::clone(&handle));
        handle
    }

    /// Direct access to the interpreter.
    pub fn interpreter(&mut self) -> &mut Interpreter {
        &mut self.interp
    }

    /* COMPILATION */

    /// Compiles source text through the installed parser.
    pub fn compile_source(
        &mut self,
        source: &str,
        file: &str,
    ) -> Result<Rc<CompiledCode>, CompileError> {
        let parser = self.interp.parser.clone().ok_or(CompileError::NoParser)?;
        let tree = parser.parse(source, file, 1)?;
        self.compile_tree(&tree)
    }

    /// Compiles an already-parsed tree.
    pub fn compile_tree(&mut self, tree: &Node) -> Result<Rc<CompiledCode>, CompileError> {
        self.interp.compiler.compile_program(tree, "main")
    }

    /* EXECUTION */

    /// Executes a compiled body with arguments in the given context.
    pub fn execute(
        &mut self,
        code: Rc<CompiledCode>,
        args: Vec<Scalar>,
        ctx: CallContext,
    ) -> Result<Slot, VmError> {
        let callee = CodeValue::from_code(code);
        let args: ArrayRef = Rc::new(RefCell::new(Array::from_scalars(args)));
        self.interp.call_code(&callee, args, ctx)
    }

    /// Runs a program body under the top-level driver contract: an
    /// uncaught exception is formatted to standard error and reported as
    /// a non-zero status.
    pub fn run_main(&mut self, code: Rc<CompiledCode>) -> (ExitStatus, ProgramState) {
        match self.execute(code, Vec::new(), CallContext::Void) {
            Ok(slot) => (ExitStatus::Success, ProgramState::Completed(slot)),
            Err(err) => {
                let text = err.message();
                let rendered = if err.trace.len() > 1 {
                    Backtrace::from_error(&err).render(&text)
                } else {
                    text.to_string()
                };
                let _ = self.interp.stderr.borrow_mut().write(&rendered);
                (ExitStatus::UncaughtDie, ProgramState::Died(err))
            }
        }
    }

    /// Parses, compiles, and runs source text, mapping compile failures
    /// to their own exit status.
    pub fn run_source(&mut self, source: &str, file: &str) -> ExitStatus {
        match self.compile_source(source, file) {
            Ok(code) => self.run_main(code).0,
            Err(err) => {
                let _ = self
                    .interp
                    .stderr
                    .borrow_mut()
                    .write(&format!("{err}\n"));
                ExitStatus::CompileFailure
            }
        }
    }

    /* GLOBALS */

    /// Handle of a package scalar, autovivified.
    pub fn global_scalar(&mut self, name: &str) -> ScalarRef {
        self.interp.stash.scalar_slot(name)
    }

    /// Sets a package scalar.
    pub fn set_global_scalar(&mut self, name: &str, value: Scalar) -> Result<(), VmError> {
        self.interp
            .stash
            .set_scalar(name, &value)
            .map_err(VmError::from)
    }

    /// Registers a named sub backed by compiled bytecode.
    pub fn register_sub(&mut self, name: &str, code: Rc<CompiledCode>) {
        self.interp.stash.set_code(name, CodeValue::from_code(code));
    }

    /// Registers a host-native sub under a fully-qualified name; it is
    /// then callable from bytecode like any other sub.
    pub fn register_host_sub(&mut self, name: &str, f: HostFn) {
        self.interp.stash.set_code(name, CodeValue::from_host(f));
    }

    /// Calls a registered sub by fully-qualified name.
    pub fn call_sub(
        &mut self,
        name: &str,
        args: Vec<Scalar>,
        ctx: CallContext,
    ) -> Result<Slot, VmError> {
        let code = self.interp.stash.code_slot(name).ok_or_else(|| {
            VmError::new(
                camel_asm::ErrorKind::Die,
                format!("Undefined subroutine &{name} called\n"),
            )
        })?;
        let args: ArrayRef = Rc::new(RefCell::new(Array::from_scalars(args)));
        self.interp.call_code(&code, args, ctx)
    }

    /// The `$@` variable's current string form.
    pub fn errsv(&mut self) -> Rc<str> {
        self.interp.stash.scalar_slot("main::@").borrow().get_string()
    }

    /// Marks a scalar read-only (the `Internals::SvREADONLY` surface).
    pub fn lock_readonly(handle: &ScalarRef) {
        handle.borrow_mut().lock_readonly();
    }

    /* VALUE CONVERSION */

    /// Host value → scalar. The `From` impls on [`Scalar`] cover the
    /// primitives; this is the generic entry.
    pub fn to_scalar(value: impl Into<Scalar>) -> Scalar {
        value.into()
    }

    /// Scalar → host integer view.
    pub fn to_int(value: &Scalar) -> i64 {
        value.get_int()
    }

    /// Scalar → host float view.
    pub fn to_double(value: &Scalar) -> f64 {
        value.get_double()
    }

    /// Scalar → host string view.
    pub fn to_string_value(value: &Scalar) -> String {
        value.get_string().to_string()
    }

    /// Drains a captured in-memory stream to a host string.
    pub fn drain_capture(handle: &IoRef) -> String {
        let bytes = handle.borrow().memory_contents().unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Wraps a plain Rust closure as a host sub.
    pub fn host_fn(
        f: impl Fn(&ArrayRef, CallContext) -> Result<Slot, camel_value::HostError> + 'static,
    ) -> HostFn {
        Rc::new(f)
    }

    /// Convenience: a host sub returning one scalar.
    pub fn host_scalar_fn(f: impl Fn(Vec<Scalar>) -> Scalar + 'static) -> HostFn {
        Rc::new(move |args: &ArrayRef, _ctx| {
            let values = args
                .borrow()
                .iter()
                .map(|h| h.borrow().clone())
                .collect::<Vec<_>>();
            Ok(Slot::Scalar(scalar_ref(f(values))))
        })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
