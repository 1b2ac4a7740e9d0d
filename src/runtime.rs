//! Handle runtime linked into every compiled program.
//!
//! Generated code only ever sees `i64` values. Arrays and strings live in a
//! per-thread handle table and are referred to by their handle; handle `0`
//! is never allocated. Every entry point is total: an invalid handle, a
//! value of the wrong kind or an out-of-range index logs a warning and
//! yields 0.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

use cranelift_jit::JITBuilder;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Object {
    Array(Vec<i64>),
    Text(String),
}

#[derive(Default)]
struct HandleTable {
    objects: Vec<Object>,
}

impl HandleTable {
    fn allocate(&mut self, object: Object) -> i64 {
        self.objects.push(object);
        self.objects.len() as i64
    }

    fn slot(handle: i64) -> Option<usize> {
        usize::try_from(handle).ok()?.checked_sub(1)
    }

    fn get(&self, handle: i64) -> Option<&Object> {
        self.objects.get(Self::slot(handle)?)
    }

    fn get_mut(&mut self, handle: i64) -> Option<&mut Object> {
        let slot = Self::slot(handle)?;
        self.objects.get_mut(slot)
    }

    fn array_mut(&mut self, handle: i64, operation: &str) -> Option<&mut Vec<i64>> {
        match self.get_mut(handle) {
            Some(Object::Array(items)) => Some(items),
            Some(Object::Text(_)) => {
                log::warn!("{operation}: handle {handle} is a string, not an array");
                None
            }
            None => {
                log::warn!("{operation}: invalid handle {handle}");
                None
            }
        }
    }

    fn render(&self, handle: i64) -> Option<String> {
        match self.get(handle)? {
            Object::Text(text) => Some(text.clone()),
            Object::Array(items) => {
                let items: Vec<String> = items.iter().map(i64::to_string).collect();
                Some(format!("[{}]", items.join(", ")))
            }
        }
    }
}

enum Console {
    Stdio,
    Captured {
        output: String,
        input: VecDeque<String>,
    },
}

impl Console {
    fn write(&mut self, text: &str) {
        match self {
            Console::Stdio => {
                let mut stdout = io::stdout().lock();
                if let Err(err) = stdout.write_all(text.as_bytes()).and_then(|_| stdout.flush()) {
                    log::warn!("failed to write to stdout: {err}");
                }
            }
            Console::Captured { output, .. } => output.push_str(text),
        }
    }

    /// Next input line without its line terminator; end of input reads as
    /// an empty line.
    fn read_line(&mut self) -> String {
        match self {
            Console::Stdio => {
                let mut line = String::new();
                if let Err(err) = io::stdin().lock().read_line(&mut line) {
                    log::warn!("failed to read from stdin: {err}");
                }
                let trimmed = line.trim_end_matches(['\n', '\r']).len();
                line.truncate(trimmed);
                line
            }
            Console::Captured { input, .. } => input.pop_front().unwrap_or_default(),
        }
    }
}

struct RuntimeState {
    handles: HandleTable,
    console: Console,
}

thread_local! {
    static STATE: RefCell<RuntimeState> = RefCell::new(RuntimeState {
        handles: HandleTable::default(),
        console: Console::Stdio,
    });
}

fn with_state<R>(f: impl FnOnce(&mut RuntimeState) -> R) -> R {
    STATE.with(|state| f(&mut state.borrow_mut()))
}

/// Runs `run` with console I/O redirected to an in-memory buffer, feeding
/// `input` line by line to `input()`. Returns the result and everything the
/// program printed.
pub fn capture_io<R>(input: &str, run: impl FnOnce() -> R) -> (R, String) {
    let captured = Console::Captured {
        output: String::new(),
        input: input.lines().map(str::to_string).collect(),
    };
    let previous = with_state(|state| std::mem::replace(&mut state.console, captured));
    let guard = ConsoleGuard {
        previous: Some(previous),
    };
    let result = run();
    (result, guard.finish())
}

struct ConsoleGuard {
    previous: Option<Console>,
}

impl ConsoleGuard {
    fn finish(mut self) -> String {
        let Some(previous) = self.previous.take() else {
            return String::new();
        };
        match with_state(|state| std::mem::replace(&mut state.console, previous)) {
            Console::Captured { output, .. } => output,
            Console::Stdio => String::new(),
        }
    }
}

impl Drop for ConsoleGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            STATE.with(|state| {
                if let Ok(mut state) = state.try_borrow_mut() {
                    state.console = previous;
                }
            });
        }
    }
}

/// Contents of an array handle, for host code inspecting program results.
pub fn read_array(handle: i64) -> Option<Vec<i64>> {
    with_state(|state| match state.handles.get(handle) {
        Some(Object::Array(items)) => Some(items.clone()),
        _ => None,
    })
}

/// Contents of a string handle.
pub fn read_text(handle: i64) -> Option<String> {
    with_state(|state| match state.handles.get(handle) {
        Some(Object::Text(text)) => Some(text.clone()),
        _ => None,
    })
}

pub extern "C" fn rt_new_array() -> i64 {
    with_state(|state| state.handles.allocate(Object::Array(Vec::new())))
}

/// # Safety
///
/// `ptr` must point to `len` readable bytes.
pub unsafe extern "C" fn rt_new_string(ptr: *const u8, len: i64) -> i64 {
    let text = match usize::try_from(len) {
        Ok(len) if !ptr.is_null() => {
            let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
            String::from_utf8_lossy(bytes).into_owned()
        }
        _ => String::new(),
    };
    with_state(|state| state.handles.allocate(Object::Text(text)))
}

pub extern "C" fn rt_push(handle: i64, value: i64) -> i64 {
    with_state(|state| {
        if let Some(items) = state.handles.array_mut(handle, "push") {
            items.push(value);
        }
    });
    0
}

pub extern "C" fn rt_pop(handle: i64) -> i64 {
    with_state(|state| {
        state
            .handles
            .array_mut(handle, "pop")
            .and_then(Vec::pop)
            .unwrap_or(0)
    })
}

pub extern "C" fn rt_length(handle: i64) -> i64 {
    with_state(|state| match state.handles.get(handle) {
        Some(Object::Array(items)) => items.len() as i64,
        Some(Object::Text(text)) => text.chars().count() as i64,
        None => {
            log::warn!("length: invalid handle {handle}");
            0
        }
    })
}

pub extern "C" fn rt_clear(handle: i64) -> i64 {
    with_state(|state| {
        if let Some(items) = state.handles.array_mut(handle, "clear") {
            items.clear();
        }
    });
    0
}

pub extern "C" fn rt_contains(handle: i64, value: i64) -> i64 {
    with_state(|state| {
        let found = state
            .handles
            .array_mut(handle, "contains")
            .is_some_and(|items| items.contains(&value));
        i64::from(found)
    })
}

pub extern "C" fn rt_sort(handle: i64) -> i64 {
    with_state(|state| {
        if let Some(items) = state.handles.array_mut(handle, "sort") {
            items.sort_unstable();
        }
    });
    handle
}

pub extern "C" fn rt_sum(handle: i64) -> i64 {
    with_state(|state| {
        state
            .handles
            .array_mut(handle, "sum")
            .map_or(0, |items| items.iter().fold(0i64, |acc, v| acc.wrapping_add(*v)))
    })
}

pub extern "C" fn rt_get(handle: i64, index: i64) -> i64 {
    with_state(|state| {
        let items = state.handles.array_mut(handle, "get")?;
        let value = usize::try_from(index)
            .ok()
            .and_then(|index| items.get(index).copied());
        if value.is_none() {
            log::warn!("get: index {index} out of range for length {}", items.len());
        }
        value
    })
    .unwrap_or(0)
}

pub extern "C" fn rt_set(handle: i64, index: i64, value: i64) -> i64 {
    with_state(|state| {
        let Some(items) = state.handles.array_mut(handle, "set") else {
            return;
        };
        let len = items.len();
        match usize::try_from(index).ok().and_then(|index| items.get_mut(index)) {
            Some(slot) => *slot = value,
            None => log::warn!("set: index {index} out of range for length {len}"),
        }
    });
    0
}

pub extern "C" fn rt_is_prime(n: i64) -> i64 {
    i64::from(is_prime(n))
}

fn is_prime(n: i64) -> bool {
    if n < 2 {
        return false;
    }
    let mut divisor = 2;
    while divisor <= n / divisor {
        if n % divisor == 0 {
            return false;
        }
        divisor += 1;
    }
    true
}

pub extern "C" fn rt_print_int(value: i64) -> i64 {
    with_state(|state| state.console.write(&format!("{value}\n")));
    0
}

pub extern "C" fn rt_print_str(handle: i64) -> i64 {
    with_state(|state| {
        let text = state.handles.render(handle).unwrap_or_else(|| {
            log::warn!("print: invalid handle {handle}");
            String::new()
        });
        state.console.write(&text);
        state.console.write("\n");
    });
    0
}

/// Prints the prompt (handle 0 means none) and reads one line.
pub extern "C" fn rt_input(prompt: i64) -> i64 {
    with_state(|state| {
        if prompt != 0 {
            match state.handles.render(prompt) {
                Some(text) => state.console.write(&text),
                None => log::warn!("input: invalid prompt handle {prompt}"),
            }
        }
        let line = state.console.read_line();
        state.handles.allocate(Object::Text(line))
    })
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RuntimeFunctionId {
    NewArray,
    NewString,
    Push,
    Pop,
    Length,
    Clear,
    Contains,
    Sort,
    Sum,
    Get,
    Set,
    IsPrime,
    PrintInt,
    PrintStr,
    Input,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RuntimeAbiType {
    Ptr,
    I64,
}

/// Import declaration for one runtime entry point. Every entry point
/// returns a single `i64`.
#[derive(Clone, Copy, Debug)]
pub struct RuntimeFunctionSpec {
    pub id: RuntimeFunctionId,
    pub symbol: &'static str,
    pub function: *const u8,
    pub param_types: &'static [RuntimeAbiType],
}

pub fn runtime_function_specs() -> [RuntimeFunctionSpec; 15] {
    use RuntimeAbiType::{I64, Ptr};

    [
        RuntimeFunctionSpec {
            id: RuntimeFunctionId::NewArray,
            symbol: "rt_new_array",
            function: rt_new_array as *const u8,
            param_types: &[],
        },
        RuntimeFunctionSpec {
            id: RuntimeFunctionId::NewString,
            symbol: "rt_new_string",
            function: rt_new_string as *const u8,
            param_types: &[Ptr, I64],
        },
        RuntimeFunctionSpec {
            id: RuntimeFunctionId::Push,
            symbol: "rt_push",
            function: rt_push as *const u8,
            param_types: &[I64, I64],
        },
        RuntimeFunctionSpec {
            id: RuntimeFunctionId::Pop,
            symbol: "rt_pop",
            function: rt_pop as *const u8,
            param_types: &[I64],
        },
        RuntimeFunctionSpec {
            id: RuntimeFunctionId::Length,
            symbol: "rt_length",
            function: rt_length as *const u8,
            param_types: &[I64],
        },
        RuntimeFunctionSpec {
            id: RuntimeFunctionId::Clear,
            symbol: "rt_clear",
            function: rt_clear as *const u8,
            param_types: &[I64],
        },
        RuntimeFunctionSpec {
            id: RuntimeFunctionId::Contains,
            symbol: "rt_contains",
            function: rt_contains as *const u8,
            param_types: &[I64, I64],
        },
        RuntimeFunctionSpec {
            id: RuntimeFunctionId::Sort,
            symbol: "rt_sort",
            function: rt_sort as *const u8,
            param_types: &[I64],
        },
        RuntimeFunctionSpec {
            id: RuntimeFunctionId::Sum,
            symbol: "rt_sum",
            function: rt_sum as *const u8,
            param_types: &[I64],
        },
        RuntimeFunctionSpec {
            id: RuntimeFunctionId::Get,
            symbol: "rt_get",
            function: rt_get as *const u8,
            param_types: &[I64, I64],
        },
        RuntimeFunctionSpec {
            id: RuntimeFunctionId::Set,
            symbol: "rt_set",
            function: rt_set as *const u8,
            param_types: &[I64, I64, I64],
        },
        RuntimeFunctionSpec {
            id: RuntimeFunctionId::IsPrime,
            symbol: "rt_is_prime",
            function: rt_is_prime as *const u8,
            param_types: &[I64],
        },
        RuntimeFunctionSpec {
            id: RuntimeFunctionId::PrintInt,
            symbol: "rt_print_int",
            function: rt_print_int as *const u8,
            param_types: &[I64],
        },
        RuntimeFunctionSpec {
            id: RuntimeFunctionId::PrintStr,
            symbol: "rt_print_str",
            function: rt_print_str as *const u8,
            param_types: &[I64],
        },
        RuntimeFunctionSpec {
            id: RuntimeFunctionId::Input,
            symbol: "rt_input",
            function: rt_input as *const u8,
            param_types: &[I64],
        },
    ]
}

/// Registers runtime entry points with Cranelift's JIT linker.
pub fn register_runtime_symbols(builder: &mut JITBuilder) {
    for spec in runtime_function_specs() {
        builder.symbol(spec.symbol, spec.function);
    }
}
