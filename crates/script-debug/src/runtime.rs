//! Interpreter-facing hook interface.
//! - NativeHandle: opaque execution-context identity
//! - HookEvent: line/call/return notifications
//! - HookContext: frame, scope and variable access while inside a hook

use crate::error::HookError;

/// Opaque identity of an interpreter execution context.
///
/// Derived from the context address; never dereferenced by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(u64);

impl NativeHandle {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize as u64)
    }

    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Event that triggered a hook callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    /// About to execute the given 1-based line.
    Line(u32),
    Call,
    Return,
}

/// Stack frame as reported by the interpreter; frame 0 is the innermost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub name: String,
    /// Chunk name of the frame's function; `None` for native frames.
    pub chunk: Option<Vec<u8>>,
    /// 1-based line, 0 when unknown.
    pub line: u32,
    /// 1-based column, 0 when unknown.
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeInfo {
    pub name: String,
    pub variables_reference: u32,
    pub expensive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableInfo {
    pub name: String,
    pub value: String,
    pub type_name: Option<String>,
    /// Non-zero when the value has children.
    pub variables_reference: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluateResult {
    pub value: String,
    pub type_name: Option<String>,
    pub variables_reference: u32,
}

/// Interpreter access granted for the duration of one hook callback.
///
/// Variables references handed out by the interpreter are only valid until
/// the stopped thread resumes.
pub trait HookContext {
    /// Chunk name of the function at the current line (`@path` for files).
    fn chunk(&self) -> &[u8];

    /// Source text of a chunk that was not loaded from a file.
    fn chunk_code(&self, _chunk: &[u8]) -> Option<Vec<u8>> {
        None
    }

    /// Current call depth; the outermost function is depth 0.
    fn depth(&self) -> u32;

    fn stack_frames(&mut self) -> Vec<FrameInfo>;

    fn scopes(&mut self, frame: u32) -> Result<Vec<ScopeInfo>, HookError>;

    fn variables(&mut self, reference: u32) -> Result<Vec<VariableInfo>, HookError>;

    fn set_variable(
        &mut self,
        _reference: u32,
        _name: &str,
        _value: &str,
    ) -> Result<VariableInfo, HookError> {
        Err(HookError::Unsupported("setVariable"))
    }

    fn evaluate(&mut self, expression: &str, frame: Option<u32>)
        -> Result<EvaluateResult, HookError>;

    /// Truthiness of a breakpoint condition in the innermost frame.
    fn evaluate_condition(&mut self, expression: &str) -> Result<bool, HookError> {
        let result = self.evaluate(expression, Some(0))?;
        Ok(!matches!(result.value.as_str(), "nil" | "false"))
    }
}
