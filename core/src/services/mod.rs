//! Host services plugin processes can call over the stdio protocol.

pub mod log;
