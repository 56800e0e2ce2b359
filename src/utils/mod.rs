pub mod console;
pub mod download;
pub mod interrupt;
pub mod process;
pub mod types;

pub use process::{run_attached, run_command, shell_quote, CommandOutput, SpawnError};
pub use types::{DatabaseFile, Device, FridaProcess, Package, WifiNetwork};
