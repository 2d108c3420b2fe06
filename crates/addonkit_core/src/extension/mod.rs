//! Extension runtime.
//!
//! Packages flow through `repository` (scan), `validator` (static checks),
//! `loader` (catalog resolution) and `runtime` (lifecycle and dispatch).
//! Extension code runs in-process; isolation is limited to permission gates
//! and a panic boundary around every call.

mod boundary;
pub mod builtin;
pub mod dispatch;
pub mod error;
pub mod loader;
pub mod manifest;
pub mod package;
pub mod permission;
pub mod protocol;
pub mod repository;
pub mod runtime;
pub mod validator;
