// apps/cml_cli/src/commands/mod.rs

//! 子命令

pub mod assemble;
pub mod info;
pub mod once;
pub mod run;
pub mod validate;
