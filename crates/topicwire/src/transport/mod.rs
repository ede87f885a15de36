// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP plumbing: socket options, the blocking read loop, and the buffered
//! outbound writer.
//!
//! Each connection has two paths:
//!
//! ```text
//!   socket --read--> [reader thread] --ProtocolParser--> handler callbacks
//!   enqueue() -----> [Outbound] --writer fiber--> socket
//! ```
//!
//! The reader never writes; every write goes through the connection's single
//! writer fiber.

pub mod reader;
pub mod socket;
pub mod writer;

pub use reader::{run_read_loop, ReadExit, ReadLoopHandler};
pub use writer::Outbound;
