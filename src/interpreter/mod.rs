//! The interpreter context and embedding surface.
//!
//! A [`PawScriptContext`] owns the scope chain, the type arena, the error
//! queue and the retained token buffers. It is single-threaded and
//! synchronous; everything runs to completion before returning to the
//! embedder. The context is handed out boxed because generated trampolines
//! embed its address.

mod expression;
mod operators;
mod statement;
mod typeparse;
pub mod value;

use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::debug;

use crate::error::{ErrorKind, ErrorQueue, Exec, Interrupt, PawError};
use crate::ffi::trampoline::FunctionHeader;
use crate::lexer::{lex, Token, TokenKind};
use crate::memory::NativeBridge;
use crate::scope::{ScopeStack, VarargsPack};
use crate::types::{TypeArena, TypeId, TypeKind};
use value::Value;

pub type TokenList = Rc<Vec<Token>>;

/// Statement-level control flow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Running,
    Return,
    Break,
    Continue,
}

/// Policy for `extern` symbol resolution.
///
/// `Blacklist` allows any resolved symbol that was not explicitly
/// registered; `Whitelist` allows only registered symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolVisibility {
    Blacklist,
    Whitelist,
}

/// Token range of a script-defined function body, kept alive by the context.
pub struct FunctionBody {
    pub tokens: TokenList,
    pub start: usize,
    pub len: usize,
}

/// Capability used by `include` to turn a path into source text.
pub trait SourceResolver {
    /// Resolve `path` relative to the including file and read it. Returns
    /// the resolved name (for diagnostics) and the source text.
    fn load(&self, base: Option<&str>, path: &str) -> std::io::Result<(String, String)>;
}

/// Default resolver: path adjacent to the including file, falling back to
/// the raw path when no adjacent file exists.
pub struct FsResolver;

impl SourceResolver for FsResolver {
    fn load(&self, base: Option<&str>, path: &str) -> std::io::Result<(String, String)> {
        let adjacent = Path::new(base.unwrap_or("./"))
            .parent()
            .unwrap_or(Path::new("."))
            .join(path);
        let resolved: PathBuf = if adjacent.exists() {
            adjacent
        } else {
            PathBuf::from(path)
        };
        let source = std::fs::read_to_string(&resolved)?;
        Ok((resolved.to_string_lossy().into_owned(), source))
    }
}

/// Name the driver reads the value of a top-level `return` from.
pub const RESULT_NAME: &str = "@RESULT@";

pub struct PawScriptContext {
    pub(crate) arena: TypeArena,
    pub(crate) scopes: ScopeStack,
    pub(crate) bridge: NativeBridge,
    pub(crate) errors: ErrorQueue,
    pub(crate) state: ExecState,
    pub(crate) state_slot: u64,
    pub(crate) state_ty: Option<TypeId>,
    pub(crate) dry_run: bool,
    pub(crate) visibility: SymbolVisibility,
    pub(crate) registered_symbols: Vec<usize>,
    pub(crate) retained_tokens: Vec<TokenList>,
    pub(crate) functions: Vec<Box<FunctionBody>>,
    pub(crate) resolver: Box<dyn SourceResolver>,
    pub(crate) infoof_ty: Option<TypeId>,
}

impl PawScriptContext {
    /// Create a context with a root scope and the builtin constants.
    ///
    /// The context is boxed so its address stays stable for the lifetime of
    /// any trampoline generated from it.
    pub fn new() -> Box<Self> {
        let mut context = Box::new(PawScriptContext {
            arena: TypeArena::new(),
            scopes: ScopeStack::new(),
            bridge: NativeBridge::new(),
            errors: ErrorQueue::default(),
            state: ExecState::Running,
            state_slot: 0,
            state_ty: None,
            dry_run: false,
            visibility: SymbolVisibility::Blacklist,
            registered_symbols: Vec::new(),
            retained_tokens: Vec::new(),
            functions: Vec::new(),
            resolver: Box::new(FsResolver),
            infoof_ty: None,
        });
        context.install_builtins();
        context
    }

    fn install_builtins(&mut self) {
        let platform = if cfg!(target_os = "linux") {
            0
        } else if cfg!(target_os = "windows") {
            1
        } else if cfg!(target_os = "macos") {
            2
        } else if cfg!(target_os = "freebsd") {
            3
        } else if cfg!(target_os = "openbsd") {
            4
        } else {
            5
        };
        self.add_builtin("__builtin_PLATFORM", platform);
        self.add_builtin("__builtin_SIGABRT", libc::SIGABRT as u64);
        self.add_builtin("__builtin_SIGFPE", libc::SIGFPE as u64);
        self.add_builtin("__builtin_SIGILL", libc::SIGILL as u64);
        self.add_builtin("__builtin_SIGINT", libc::SIGINT as u64);
        self.add_builtin("__builtin_SIGSEGV", libc::SIGSEGV as u64);
        self.add_builtin("__builtin_SIGTERM", libc::SIGTERM as u64);
        // SAFETY: fdopen on the standard descriptors at context creation
        let (stdin, stdout, stderr) = unsafe {
            (
                libc::fdopen(0, c"r".as_ptr()),
                libc::fdopen(1, c"w".as_ptr()),
                libc::fdopen(2, c"w".as_ptr()),
            )
        };
        self.add_builtin("__builtin_stdin", stdin as u64);
        self.add_builtin("__builtin_stdout", stdout as u64);
        self.add_builtin("__builtin_stderr", stderr as u64);
        self.add_builtin("__builtin_EOF", -1i64 as u64);
        self.add_builtin("__builtin_SEEK_SET", libc::SEEK_SET as u64);
        self.add_builtin("__builtin_SEEK_CUR", libc::SEEK_CUR as u64);
        self.add_builtin("__builtin_SEEK_END", libc::SEEK_END as u64);
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        self.add_builtin("__builtin_errno", errno as u64);
    }

    fn add_builtin(&mut self, name: &str, value: u64) {
        let ty = self.arena.int_ty(8, true);
        let ty = self.arena.copy(ty);
        self.arena.get_mut(ty).is_const = true;
        if let Some(at) = self
            .scopes
            .declare_variable(&mut self.arena, &self.bridge, name, ty, None)
        {
            let addr = self.scopes.variable(at).addr;
            // SAFETY: freshly allocated 8-byte builtin storage
            unsafe {
                std::ptr::copy_nonoverlapping(value.to_le_bytes().as_ptr(), addr, 8);
            }
        }
    }

    /// Replace the `include` resolver (tests use in-memory source graphs).
    pub fn set_resolver(&mut self, resolver: Box<dyn SourceResolver>) {
        self.resolver = resolver;
    }

    /// Lex and evaluate a source string.
    pub fn run(&mut self, code: &str) -> Result<(), PawError> {
        self.dry_run = false;
        self.set_state(ExecState::Running, None);
        self.run_unit(code, None);
        self.bind_result();
        match self.errors.next() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Read and run a file, attaching its name to diagnostics.
    pub fn run_file(&mut self, path: &str) -> Result<(), PawError> {
        self.dry_run = false;
        self.set_state(ExecState::Running, None);
        self.run_file_inner(path, None);
        self.bind_result();
        match self.errors.next() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub(crate) fn run_file_inner(&mut self, path: &str, from: Option<&Token>) -> bool {
        let loaded = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(error) => {
                self.errors.push(PawError::at(
                    ErrorKind::Io,
                    from.and_then(|t| t.file.as_ref()),
                    from.map(|t| t.row).unwrap_or(0),
                    from.map(|t| t.col).unwrap_or(0),
                    format!("Cannot open file '{path}' for reading: {error}"),
                ));
                return false;
            }
        };
        self.run_unit(&loaded, Some(Rc::from(path)))
    }

    pub(crate) fn run_unit(&mut self, code: &str, file: Option<Rc<str>>) -> bool {
        debug!("lexing {}", file.as_deref().unwrap_or("<memory>"));
        let Some(tokens) = lex(&mut self.errors, code, file) else {
            return false;
        };
        let tokens: TokenList = Rc::new(tokens);
        self.retained_tokens.push(tokens.clone());
        let limit = tokens.len() - 1;
        self.evaluate_range(&tokens, 0, limit).is_ok()
    }

    /// Statement loop over a token range. `end` is the index one past the
    /// last token that belongs to the range.
    pub(crate) fn evaluate_range(&mut self, ts: &TokenList, lo: usize, end: usize) -> Exec<()> {
        let mut i = lo;
        while i + 1 < end {
            self.eval_statement(ts, end, &mut i)?;
            if self.state != ExecState::Running {
                break;
            }
        }
        Ok(())
    }

    /// After a top-level `return`, bind the returned value to
    /// [`RESULT_NAME`] in the root scope for the driver to read.
    fn bind_result(&mut self) {
        if self.state != ExecState::Return {
            return;
        }
        let Some(ty) = self.state_ty else {
            self.set_state(ExecState::Running, None);
            return;
        };
        let slot = self.state_slot;
        if let Some(at) = self.scopes.find_variable(RESULT_NAME) {
            let addr = self.scopes.variable(at).addr;
            self.scopes.free_allocation(&self.bridge, addr, true);
            let scope = self.scopes.scope_mut(at.0);
            scope.variables.remove(at.1);
        }
        if let Some(at) =
            self.scopes
                .declare_variable(&mut self.arena, &self.bridge, RESULT_NAME, ty, None)
        {
            let variable = self.scopes.variable(at);
            let size = self.arena.size_of(variable.ty).min(8);
            // SAFETY: fresh storage of the declared type's size
            unsafe {
                std::ptr::copy_nonoverlapping(slot.to_le_bytes().as_ptr(), variable.addr, size);
            }
        }
        self.set_state(ExecState::Running, None);
    }

    pub fn any_errors(&self) -> bool {
        self.errors.any()
    }

    pub fn next_error(&mut self) -> Option<PawError> {
        self.errors.next()
    }

    /// Copy the bytes of a named variable into `out`. Fails if the variable
    /// is missing or `out` is too small.
    pub fn get(&self, name: &str, out: &mut [u8]) -> bool {
        let Some(at) = self.scopes.find_variable(name) else {
            return false;
        };
        let variable = self.scopes.variable(at);
        let size = self.arena.size_of(variable.ty);
        if out.len() < size {
            return false;
        }
        // SAFETY: variable storage is at least size bytes
        unsafe {
            std::ptr::copy_nonoverlapping(variable.addr, out.as_mut_ptr(), size);
        }
        true
    }

    /// Overwrite a named variable's bytes and mark it native. Fails for
    /// const or missing variables.
    pub fn set(&mut self, name: &str, data: &[u8]) -> bool {
        let Some(at) = self.scopes.find_variable(name) else {
            return false;
        };
        let variable = self.scopes.variable(at);
        let ty = variable.ty;
        let addr = variable.addr;
        if self.arena.get(ty).is_const {
            return false;
        }
        let size = self.arena.size_of(ty).min(data.len());
        // SAFETY: variable storage is at least the type's size
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), addr, size);
        }
        self.arena.make_native(ty, true);
        true
    }

    /// Point a function-typed variable at a host function. The variable
    /// becomes callable from script under its declared signature.
    pub fn set_function(&mut self, name: &str, func: *const u8) -> bool {
        let Some(at) = self.scopes.find_variable(name) else {
            return false;
        };
        let variable = self.scopes.variable(at);
        let ty = variable.ty;
        let addr = variable.addr;
        if self.arena.get(ty).is_const
            || !matches!(self.arena.get(ty).kind, TypeKind::Function { .. })
        {
            return false;
        }
        // SAFETY: function variables own an 8-byte slot
        unsafe {
            std::ptr::copy_nonoverlapping((func as u64).to_le_bytes().as_ptr(), addr, 8);
        }
        self.arena.make_native(ty, true);
        true
    }

    /// Deep copy of a variable's canonical type.
    pub fn get_type(&mut self, name: &str) -> Option<TypeId> {
        let at = self.scopes.find_variable(name)?;
        let ty = self.scopes.variable(at).ty;
        let copy = self.arena.copy(ty);
        Some(self.arena.make_original(copy))
    }

    pub fn types(&self) -> &TypeArena {
        &self.arena
    }

    pub fn symbol_visibility(&mut self, visibility: SymbolVisibility) {
        self.visibility = visibility;
    }

    /// Register an address for the symbol visibility policy.
    pub fn register_symbol(&mut self, address: *const u8) {
        self.registered_symbols.push(address as usize);
    }

    pub(crate) fn is_symbol_allowed(&self, address: *const u8) -> bool {
        let registered = self.registered_symbols.contains(&(address as usize));
        registered == (self.visibility == SymbolVisibility::Whitelist)
    }

    /// Render a named variable for the driver (`paws` prints results).
    pub fn render_variable(&self, name: &str) -> Option<String> {
        let at = self.scopes.find_variable(name)?;
        let variable = self.scopes.variable(at);
        let value = Value::lvalue(variable.ty, variable.addr);
        Some(self.render_value(&value))
    }

    pub(crate) fn render_value(&self, value: &Value) -> String {
        let node = self.arena.get(value.ty);
        match node.kind {
            TypeKind::Void => "void".into(),
            TypeKind::Int(_) => {
                let raw = value.as_integer(&self.arena).unwrap_or(0);
                if node.is_unsigned {
                    format!("{raw}")
                } else {
                    format!("{}", raw as i64)
                }
            }
            TypeKind::Float(_) => format!("{}", value.as_f64(&self.arena)),
            TypeKind::Pointer(_) | TypeKind::Function { .. } => {
                format!("0x{:x}", value.raw_u64(&self.arena))
            }
            TypeKind::Struct(_) => "<struct>".into(),
            TypeKind::Varargs => "...".into(),
        }
    }

    // ---- shared evaluator plumbing ----

    pub(crate) fn set_state(&mut self, state: ExecState, value: Option<&Value>) {
        self.state_slot = 0;
        self.state_ty = None;
        self.state = state;
        if let Some(value) = value {
            let bytes = value.read_bytes(&self.arena);
            let mut slot = [0u8; 8];
            let len = bytes.len().min(8);
            slot[..len].copy_from_slice(&bytes[..len]);
            self.state_slot = u64::from_le_bytes(slot);
            self.state_ty = Some(value.ty);
        }
    }

    /// Queue a diagnostic at a token and unwind the current statement.
    pub(crate) fn err<T>(
        &mut self,
        kind: ErrorKind,
        token: &Token,
        message: impl Into<String>,
    ) -> Exec<T> {
        self.errors.push(PawError::new(kind, token, message));
        Err(Interrupt)
    }

    /// Whether the pointer stored in `value` may be dereferenced: native
    /// pointers always, script pointers only while their allocation lives.
    pub(crate) fn can_dereference(&self, value: &Value) -> bool {
        let addr = value.raw_u64(&self.arena) as *mut u8;
        if addr.is_null() {
            return false;
        }
        let node = self.arena.get(value.ty);
        if node.is_native {
            return true;
        }
        let size = match node.kind {
            TypeKind::Function { .. } => {
                if self.scopes.find_allocation(addr, 1).is_some() {
                    std::mem::size_of::<FunctionHeader>()
                } else {
                    std::mem::size_of::<*const u8>()
                }
            }
            TypeKind::Pointer(base) => self.arena.size_of(base),
            _ => return false,
        };
        self.scopes.find_allocation(addr, size.max(1)).is_some()
    }

    /// Register a script function body and return its header address.
    pub(crate) fn create_function(
        &mut self,
        ty: TypeId,
        ts: &TokenList,
        start: usize,
        len: usize,
    ) -> Option<*mut u8> {
        let body = Box::new(FunctionBody {
            tokens: ts.clone(),
            start,
            len,
        });
        let body_ptr: *const FunctionBody = &*body;
        self.functions.push(body);
        crate::ffi::trampoline::install_function(self, ty, body_ptr)
    }

    /// Drop-in for declared variables holding a varargs pack.
    pub(crate) fn attach_varargs(&mut self, at: (usize, usize), pack: Box<VarargsPack>) {
        let variable = self.scopes.variable_mut(at);
        variable.pack = Some(pack);
        let pack_ref: &VarargsPack = variable.pack.as_deref().expect("pack just attached");
        variable.addr = pack_ref as *const VarargsPack as *mut u8;
    }
}

impl Drop for PawScriptContext {
    fn drop(&mut self) {
        self.scopes.teardown(&self.bridge);
    }
}

/// Read a token; the index may sit on the trailing end-of-file sentinel.
pub(crate) fn tok(ts: &TokenList, i: usize) -> &Token {
    &ts[i.min(ts.len() - 1)]
}

impl PawScriptContext {
    /// Advance the cursor, erroring when it would pass `end`.
    pub(crate) fn next<'a>(
        &mut self,
        ts: &'a TokenList,
        end: usize,
        i: &mut usize,
    ) -> Exec<&'a Token> {
        *i += 1;
        if *i > end {
            let at = tok(ts, *i - 1).clone();
            return self.err(ErrorKind::Parse, &at, "Unexpected end of expression");
        }
        Ok(tok(ts, *i))
    }

    /// Skip tokens until `kind` at depth zero, tracking bracket balance.
    pub(crate) fn scan_until(
        &mut self,
        ts: &TokenList,
        end: usize,
        i: &mut usize,
        kind: TokenKind,
    ) -> Exec<()> {
        let mut token = self.next(ts, end, i)?;
        let mut stack: Vec<u8> = Vec::new();
        while *i < end {
            if stack.is_empty() && token.kind == kind {
                self.next(ts, end, i)?;
                return Ok(());
            }
            match token.kind {
                TokenKind::ParenOpen => stack.push(b'('),
                TokenKind::BracketOpen => stack.push(b'['),
                TokenKind::BraceOpen => stack.push(b'{'),
                TokenKind::ParenClose => {
                    if stack.pop() != Some(b'(') {
                        let at = token.clone();
                        return self.err(ErrorKind::Parse, &at, "Unexpected ')'");
                    }
                }
                TokenKind::BracketClose => {
                    if stack.pop() != Some(b'[') {
                        let at = token.clone();
                        return self.err(ErrorKind::Parse, &at, "Unexpected ']'");
                    }
                }
                TokenKind::BraceClose => {
                    if stack.pop() != Some(b'{') {
                        let at = token.clone();
                        return self.err(ErrorKind::Parse, &at, "Unexpected '}'");
                    }
                }
                _ => {}
            }
            token = self.next(ts, end, i)?;
        }
        let at = tok(ts, *i).clone();
        self.err(ErrorKind::Parse, &at, "Unexpected end of expression")
    }
}
