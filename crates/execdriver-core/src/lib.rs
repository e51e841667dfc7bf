//! # execdriver-core
//!
//! Low-level Linux primitives used directly by the native exec driver.
//!
//! This crate provides safe wrappers over:
//! - **Consoles**: pseudo-terminal allocation, ownership, and resize.
//! - **Reaping**: subreaper declaration, EINTR-safe `waitpid`, exit-code translation.
//! - **procfs**: process start times and host memory size.
//! - **Namespaces and capabilities**: the declarative sets handed to the
//!   container primitive library.
//! - **Cgroups**: manager detection.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! `// SAFETY:` documentation.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod capability;
pub mod cgroup;
pub mod console;
pub mod namespace;
pub mod procfs;
pub mod reaper;
