//! Host runtime for compiled Tern modules.
//!
//! Provides the linear memory and the `builtins` imports, runs the
//! exported `main` under wasmi and captures what the program prints.

use thiserror::Error;
use tern_core::builtins::{
    Builtin, DIVISION_BY_ZERO, IMPORT_NAMESPACE, conversion_failure, parse_int,
};
use tern_core::codegen_wasm::{HEAP_BASE_EXPORT, MAIN_EXPORT};
use tern_core::interpreter::DEFAULT_DEPTH_LIMIT;
use wasmi::{Caller, Config, Engine, Linker, Memory, MemoryType, Module, Store, TrapCode};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("wasm runtime error: {0}")]
    Wasm(#[from] wasmi::Error),
    #[error("module does not export `{0}`")]
    MissingExport(&'static str),
    #[error("trap: {0}")]
    Trap(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    /// Size of the linear memory; allocation past it traps.
    pub memory_pages: u32,
    /// Fuel budget for `main`, `None` for unlimited.
    pub fuel: Option<u64>,
    /// Nested calls allowed before the run ends in `StackOverflow`.
    pub max_recursion_depth: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            memory_pages: 256,
            fuel: Some(500_000_000),
            max_recursion_depth: DEFAULT_DEPTH_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Returned(i32),
    Panicked(String),
    OutOfFuel,
    StackOverflow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub stdout: String,
    pub outcome: RunOutcome,
}

#[derive(Debug, Default)]
struct HostState {
    memory: Option<Memory>,
    heap_next: u32,
    stdout: String,
    panic: Option<String>,
}

fn memory(caller: &Caller<'_, HostState>) -> Result<Memory, wasmi::Error> {
    caller
        .data()
        .memory
        .ok_or_else(|| wasmi::Error::new("linear memory is not set up"))
}

fn read_word(data: &[u8], address: usize) -> Option<u32> {
    let bytes = data.get(address..address + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Bytes of the string whose header starts at `address`.
fn read_string(caller: &Caller<'_, HostState>, address: i32) -> Result<String, wasmi::Error> {
    let memory = memory(caller)?;
    let data = memory.data(caller);
    let start = address as u32 as usize;
    let length = read_word(data, start + 4)
        .ok_or_else(|| wasmi::Error::new(format!("string header at {start} is out of bounds")))?;
    let bytes = data
        .get(start + 8..start + 8 + length as usize)
        .ok_or_else(|| wasmi::Error::new(format!("string at {start} is out of bounds")))?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn allocate(caller: &mut Caller<'_, HostState>, bytes: u32) -> Result<u32, wasmi::Error> {
    let memory = memory(caller)?;
    let limit = memory.data(&*caller).len() as u64;
    let state = caller.data_mut();
    let address = state.heap_next;
    let end = u64::from(address) + u64::from(bytes.next_multiple_of(8));
    if end > limit {
        return Err(wasmi::Error::new("out of memory"));
    }
    state.heap_next = end as u32;
    Ok(address)
}

fn write_string(caller: &mut Caller<'_, HostState>, text: &str) -> Result<i32, wasmi::Error> {
    let address = allocate(caller, 8 + text.len() as u32)?;
    let memory = memory(caller)?;
    let data = memory.data_mut(&mut *caller);
    let start = address as usize;
    data[start..start + 4].copy_from_slice(&0u32.to_le_bytes());
    data[start + 4..start + 8].copy_from_slice(&(text.len() as u32).to_le_bytes());
    data[start + 8..start + 8 + text.len()].copy_from_slice(text.as_bytes());
    Ok(address as i32)
}

fn fail(caller: &mut Caller<'_, HostState>, message: String) -> wasmi::Error {
    let error = wasmi::Error::new(message.clone());
    caller.data_mut().panic = Some(message);
    error
}

fn link_builtins(linker: &mut Linker<HostState>) -> Result<(), HostError> {
    for builtin in Builtin::ALL {
        let name = builtin.name();
        match builtin {
            Builtin::Malloc => {
                linker.func_wrap(
                    IMPORT_NAMESPACE,
                    name,
                    |mut caller: Caller<'_, HostState>, bytes: i32| -> Result<i32, wasmi::Error> {
                        Ok(allocate(&mut caller, bytes as u32)? as i32)
                    },
                )
                .map_err(wasmi::Error::from)?;
            }
            Builtin::Println => {
                linker.func_wrap(
                    IMPORT_NAMESPACE,
                    name,
                    |mut caller: Caller<'_, HostState>, text: i32| -> Result<i32, wasmi::Error> {
                        let line = read_string(&caller, text)?;
                        let stdout = &mut caller.data_mut().stdout;
                        stdout.push_str(&line);
                        stdout.push('\n');
                        Ok(0)
                    },
                )
                .map_err(wasmi::Error::from)?;
            }
            Builtin::Panic => {
                linker.func_wrap(
                    IMPORT_NAMESPACE,
                    name,
                    |mut caller: Caller<'_, HostState>, text: i32| -> Result<i32, wasmi::Error> {
                        let message = read_string(&caller, text)?;
                        Err(fail(&mut caller, message))
                    },
                )
                .map_err(wasmi::Error::from)?;
            }
            Builtin::StringConcat => {
                linker.func_wrap(
                    IMPORT_NAMESPACE,
                    name,
                    |mut caller: Caller<'_, HostState>, a: i32, b: i32| -> Result<i32, wasmi::Error> {
                        let joined = read_string(&caller, a)? + &read_string(&caller, b)?;
                        write_string(&mut caller, &joined)
                    },
                )
                .map_err(wasmi::Error::from)?;
            }
            Builtin::IntToString => {
                linker.func_wrap(
                    IMPORT_NAMESPACE,
                    name,
                    |mut caller: Caller<'_, HostState>, value: i32| -> Result<i32, wasmi::Error> {
                        write_string(&mut caller, &value.to_string())
                    },
                )
                .map_err(wasmi::Error::from)?;
            }
            Builtin::StringToInt => {
                linker.func_wrap(
                    IMPORT_NAMESPACE,
                    name,
                    |mut caller: Caller<'_, HostState>, text: i32| -> Result<i32, wasmi::Error> {
                        let text = read_string(&caller, text)?;
                        match parse_int(&text) {
                            Some(value) => Ok(value),
                            None => Err(fail(&mut caller, conversion_failure(&text))),
                        }
                    },
                )
                .map_err(wasmi::Error::from)?;
            }
        }
    }
    Ok(())
}

pub fn run_wasm(bytes: &[u8]) -> Result<RunOutput, HostError> {
    run_wasm_with(bytes, HostConfig::default())
}

pub fn run_wasm_with(bytes: &[u8], config: HostConfig) -> Result<RunOutput, HostError> {
    let mut engine_config = Config::default();
    engine_config
        .consume_fuel(config.fuel.is_some())
        .set_max_recursion_depth(config.max_recursion_depth);
    let engine = Engine::new(&engine_config);
    let module = Module::new(&engine, bytes)?;
    let mut store = Store::new(&engine, HostState::default());
    if let Some(fuel) = config.fuel {
        store.set_fuel(fuel)?;
    }

    let memory = Memory::new(&mut store, MemoryType::new(config.memory_pages, None))?;
    store.data_mut().memory = Some(memory);
    let mut linker = Linker::new(&engine);
    linker
        .define("env", "memory", memory)
        .map_err(wasmi::Error::from)?;
    link_builtins(&mut linker)?;

    let instance = linker.instantiate_and_start(&mut store, &module)?;
    let heap_base = instance
        .get_typed_func::<(), i32>(&store, HEAP_BASE_EXPORT)
        .map_err(|_| HostError::MissingExport(HEAP_BASE_EXPORT))?
        .call(&mut store, ())?;
    store.data_mut().heap_next = heap_base as u32;
    let main = instance
        .get_typed_func::<(), i32>(&store, MAIN_EXPORT)
        .map_err(|_| HostError::MissingExport(MAIN_EXPORT))?;
    tracing::debug!(
        heap_base,
        pages = config.memory_pages,
        depth = config.max_recursion_depth,
        "running main"
    );

    let result = main.call(&mut store, ());
    let state = store.data_mut();
    let outcome = match result {
        Ok(value) => RunOutcome::Returned(value),
        Err(error) => match state.panic.take() {
            Some(message) => RunOutcome::Panicked(message),
            None => match error.as_trap_code() {
                Some(TrapCode::OutOfFuel) => RunOutcome::OutOfFuel,
                Some(TrapCode::StackOverflow) => RunOutcome::StackOverflow,
                Some(TrapCode::IntegerDivisionByZero) => {
                    RunOutcome::Panicked(DIVISION_BY_ZERO.to_string())
                }
                _ => return Err(HostError::Trap(error.to_string())),
            },
        },
    };
    Ok(RunOutput {
        stdout: std::mem::take(&mut state.stdout),
        outcome,
    })
}
