//! Runtime adapter implementations.

pub mod interpreter;

pub use interpreter::InterpreterRuntime;
