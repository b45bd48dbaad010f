use super::value::{Metadata, Value};
use regex::Regex;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::panic::PanicHookInfo;
use std::sync::{Arc, LazyLock};

static FRAME_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\d+:\s+(?P<function>.+?)\s*$").expect("valid frame regex")
});

static LOCATION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+at\s+(?P<file>.+?):(?P<line>\d+)(?::\d+)?\s*$").expect("valid location regex")
});

static HASH_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"::h[0-9a-f]{16}$").expect("valid hash regex"));

// Frames belonging to the runtime or to fault capture itself.
const RUNTIME_FRAME_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "<std::",
    "<core::",
    "<alloc::",
    "backtrace::",
    "rust_begin_unwind",
    "__rust",
    "__libc",
    "_start",
    "error_tracker::domain::fault",
    "error_tracker::client::hooks",
    "<error_tracker::client::hooks",
];

/// One frame of a call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Fully-qualified function path.
    pub function: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl StackFrame {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            file: None,
            line: None,
        }
    }

    pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }
}

/// An exception-like fault: type name, message, optional stack, code and cause.
#[derive(Debug, Clone, Default)]
pub struct StructuredFault {
    pub name: String,
    pub message: Option<String>,
    pub stack: Option<String>,
    pub frames: Vec<StackFrame>,
    pub code: Option<String>,
    pub cause: Option<Arc<StructuredFault>>,
    /// Additional fields carried by the fault, beyond name/message/stack.
    pub fields: Metadata,
}

impl StructuredFault {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Captures a Rust error: its type name, `Display` text, and the
    /// `source()` chain as nested causes.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: StdError + 'static,
    {
        let mut fault = Self::from_dyn(err);
        fault.name = short_type_name(std::any::type_name::<E>());
        fault
    }

    /// Like [`from_error`](Self::from_error) for type-erased errors; the
    /// name is recovered from the error's `Debug` form.
    pub fn from_dyn(err: &(dyn StdError + 'static)) -> Self {
        let mut fault = Self::new(debug_type_name(err), err.to_string());
        fault.code = io_error_code(err);
        fault.cause = err.source().map(|source| Arc::new(Self::from_dyn(source)));
        fault
    }

    /// Captures a panic as seen by a panic hook.
    pub fn from_panic(info: &PanicHookInfo<'_>, backtrace: &Backtrace) -> Self {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "Box<dyn Any>".to_string());

        let mut fault = Self::new("Panic", message).with_backtrace(backtrace);
        if let Some(location) = info.location() {
            fault.fields.insert(
                "location".to_string(),
                Value::from(format!(
                    "{}:{}:{}",
                    location.file(),
                    location.line(),
                    location.column()
                )),
            );
        }
        fault
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Sets the textual stack; frames are parsed from it unless already set.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        let stack = stack.into();
        if self.frames.is_empty() {
            self.frames = parse_backtrace(&stack);
        }
        self.stack = Some(stack);
        self
    }

    pub fn with_frames(mut self, frames: Vec<StackFrame>) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_cause(mut self, cause: StructuredFault) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Records a captured backtrace as both the textual stack and its frames.
    pub fn with_backtrace(mut self, backtrace: &Backtrace) -> Self {
        if backtrace.status() == BacktraceStatus::Captured {
            let text = backtrace.to_string();
            self.frames = parse_backtrace(&text);
            self.stack = Some(text);
        }
        self
    }

    /// Message if present and non-blank.
    pub fn message(&self) -> Option<&str> {
        self.message
            .as_deref()
            .filter(|message| !message.trim().is_empty())
    }
}

/// A fault reported by application code.
#[derive(Debug, Clone)]
pub enum Fault {
    Structured(StructuredFault),
    /// Arbitrary key/value map, optionally carrying `name`, `message`,
    /// `stack` and `code` entries.
    Raw(Metadata),
}

impl Fault {
    pub fn from_error<E>(err: &E) -> Self
    where
        E: StdError + 'static,
    {
        Fault::Structured(StructuredFault::from_error(err))
    }

    /// Raw fault carrying only a message.
    pub fn message_only(message: impl Into<String>) -> Self {
        let mut map = Metadata::new();
        map.insert("message".to_string(), Value::String(message.into()));
        Fault::Raw(map)
    }

    /// The fault's message if it carries a non-blank one.
    pub fn message(&self) -> Option<&str> {
        match self {
            Fault::Structured(fault) => fault.message(),
            Fault::Raw(map) => map
                .get("message")
                .and_then(Value::as_str)
                .filter(|message| !message.trim().is_empty()),
        }
    }
}

impl From<StructuredFault> for Fault {
    fn from(fault: StructuredFault) -> Self {
        Fault::Structured(fault)
    }
}

impl From<Metadata> for Fault {
    fn from(map: Metadata) -> Self {
        Fault::Raw(map)
    }
}

impl From<std::io::Error> for Fault {
    fn from(err: std::io::Error) -> Self {
        Fault::from_error(&err)
    }
}

impl From<Box<dyn StdError + Send + Sync>> for Fault {
    fn from(err: Box<dyn StdError + Send + Sync>) -> Self {
        Fault::Structured(StructuredFault::from_dyn(&*err))
    }
}

/// Parses the `Display` form of a [`Backtrace`] into application frames.
pub fn parse_backtrace(text: &str) -> Vec<StackFrame> {
    let mut frames: Vec<StackFrame> = Vec::new();
    let mut keep_last = false;

    for line in text.lines() {
        if let Some(caps) = FRAME_LINE.captures(line) {
            let function = HASH_SUFFIX.replace(&caps["function"], "").into_owned();
            keep_last = !is_runtime_frame(&function);
            if keep_last {
                frames.push(StackFrame::new(function));
            }
        } else if let Some(caps) = LOCATION_LINE.captures(line) {
            if keep_last && let Some(frame) = frames.last_mut() && frame.file.is_none() {
                frame.file = Some(caps["file"].to_string());
                frame.line = caps["line"].parse().ok();
            }
        }
    }

    frames
}

fn is_runtime_frame(function: &str) -> bool {
    RUNTIME_FRAME_PREFIXES
        .iter()
        .any(|prefix| function.starts_with(prefix))
}

/// `my_crate::db::QueryError<T>` -> `QueryError`
fn short_type_name(type_name: &str) -> String {
    let without_generics = type_name.split('<').next().unwrap_or(type_name);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
        .to_string()
}

// Concrete types are erased behind `dyn Error`; the Debug form of most
// errors starts with the type (or variant) name.
fn debug_type_name(err: &(dyn StdError + 'static)) -> String {
    let debug = format!("{err:?}");
    let name: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() || name.chars().next().is_some_and(|c| !c.is_alphabetic()) {
        "Error".to_string()
    } else {
        name
    }
}

fn io_error_code(err: &(dyn StdError + 'static)) -> Option<String> {
    err.downcast_ref::<std::io::Error>()
        .and_then(std::io::Error::raw_os_error)
        .filter(|code| *code != 0)
        .map(|code| code.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct QueryError {
        source: std::io::Error,
    }

    impl fmt::Display for QueryError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "query failed")
        }
    }

    impl StdError for QueryError {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.source)
        }
    }

    const SAMPLE_BACKTRACE: &str = "   0: std::backtrace_rs::backtrace::libunwind::trace
             at /rustc/abc/library/std/src/../../backtrace/src/backtrace/libunwind.rs:116:5
   1: std::backtrace::Backtrace::create
             at /rustc/abc/library/std/src/backtrace.rs:331:13
   2: billing::invoice::render::h0123456789abcdef
             at ./src/invoice.rs:42:9
   3: billing::main
             at ./src/main.rs:7:5
   4: core::ops::function::FnOnce::call_once
             at /rustc/abc/library/core/src/ops/function.rs:250:5";

    #[test]
    fn captures_type_name_message_and_cause_chain() {
        let err = QueryError {
            source: std::io::Error::from_raw_os_error(111),
        };

        let fault = StructuredFault::from_error(&err);

        assert_eq!(fault.name, "QueryError");
        assert_eq!(fault.message(), Some("query failed"));
        let cause = fault.cause.expect("cause captured");
        assert_eq!(cause.name, "Os");
        assert_eq!(cause.code.as_deref(), Some("111"));
    }

    #[test]
    fn boxed_errors_fall_back_to_debug_names() {
        let boxed: Box<dyn StdError + Send + Sync> = "plain".parse::<u8>().unwrap_err().into();

        let fault = Fault::from(boxed);

        let Fault::Structured(fault) = fault else {
            panic!("expected structured fault");
        };
        assert_eq!(fault.name, "ParseIntError");
    }

    #[test]
    fn parses_application_frames_only() {
        let frames = parse_backtrace(SAMPLE_BACKTRACE);

        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[0],
            StackFrame::new("billing::invoice::render").at("./src/invoice.rs", 42)
        );
        assert_eq!(frames[1].function, "billing::main");
    }

    #[test]
    fn textual_stack_yields_frames_unless_given() {
        let fault = StructuredFault::new("InvoiceError", "bad total").with_stack(SAMPLE_BACKTRACE);
        assert_eq!(fault.frames.len(), 2);
        assert_eq!(fault.frames[0].function, "billing::invoice::render");
        assert_eq!(fault.stack.as_deref(), Some(SAMPLE_BACKTRACE));

        let explicit = StructuredFault::new("InvoiceError", "bad total")
            .with_frames(vec![StackFrame::new("billing::retry")])
            .with_stack(SAMPLE_BACKTRACE);
        assert_eq!(explicit.frames, vec![StackFrame::new("billing::retry")]);
    }

    #[test]
    fn raw_fault_message_ignores_non_strings() {
        let mut map = Metadata::new();
        map.insert("message".to_string(), Value::Integer(5));
        assert_eq!(Fault::Raw(map).message(), None);
        assert_eq!(Fault::message_only("boom").message(), Some("boom"));
    }
}
