//! The `TestEnv` contract: an isolated place a suite's commands run, plus
//! backends for it.

mod cmd;
mod container;
mod env;
mod error;
mod fake;
mod unsupported;

pub use cmd::CmdResult;
pub use container::ContainerEnv;
pub use env::TestEnv;
pub use error::{Result, TestEnvError};
pub use fake::FakeEnv;
pub use unsupported::UnsupportedEnv;
