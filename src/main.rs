mod adb;
mod config;
mod ptools;
mod shell;
mod utils;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use adb::{Adb, AdbError};
use config::Config;
use shell::Shell;
use utils::console::{self, LineSource};
use utils::interrupt;

#[derive(Parser, Debug)]
#[command(name = "ptools")]
#[command(about = "Interactive adb shell with package, Wi-Fi, database and frida helpers")]
#[command(version)]
struct Args {
    /// adb binary, looked up on PATH when not a path
    #[arg(long, env = "PTOOLS_ADB", default_value = "adb")]
    adb: PathBuf,

    /// frida CLI used for pinning and run
    #[arg(long, env = "PTOOLS_FRIDA", default_value = "frida")]
    frida: PathBuf,

    /// pip used to manage frida-tools
    #[arg(long, env = "PTOOLS_PIP", default_value = "pip")]
    pip: PathBuf,

    /// frida-server release to install (default: local frida version)
    #[arg(long, env = "PTOOLS_FRIDA_VERSION")]
    frida_version: Option<String>,

    /// Downloads, extracted server and generated scripts
    #[arg(long, env = "PTOOLS_SCRATCH", default_value = "tmp")]
    scratch_dir: PathBuf,

    /// Device to use instead of asking
    #[arg(short, long, env = "ANDROID_SERIAL")]
    serial: Option<String>,
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Config {
            adb: args.adb.clone().into_os_string(),
            frida: args.frida.clone().into_os_string(),
            pip: args.pip.clone().into_os_string(),
            frida_version: args.frida_version.clone(),
            scratch_dir: args.scratch_dir.clone(),
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if matches!(err.downcast_ref::<AdbError>(), Some(AdbError::NoDevice)) => {
            console::print_warning(err);
            ExitCode::SUCCESS
        }
        Err(err) if console::is_interrupt(&err) => {
            println!();
            ExitCode::SUCCESS
        }
        Err(err) => {
            console::print_error(format!("{:#}", err));
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let config = Config::from(args);
    let adb = Adb::locate(&config.adb)?;
    interrupt::install()?;

    let Some(device) = adb::choose_device(&adb, args.serial.as_deref())? else {
        return Err(anyhow::anyhow!("The selected device is invalid"));
    };
    log::info!("using device {} (sdk {}, {})", device.name, device.sdk_version, device.cpu_abi);

    Shell::new(&adb, &config, device).run()?;
    finish(&adb, &mut console::Stdin)
}

/// Closes the session and offers to stop the adb server.
fn finish(adb: &Adb, input: &mut impl LineSource) -> Result<()> {
    console::print_success("Shell stopped");

    if console::prompt_bool_from(input, "Stop ADB?", false)? {
        adb.kill_server()?;
        console::print_success("ADB stopped");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn finish_kills_the_server_only_when_asked() {
        // a missing binary shows whether kill-server was attempted
        let adb = Adb::new("/nonexistent/adb");

        assert!(finish(&adb, &mut Cursor::new("\n")).is_ok());
        assert!(finish(&adb, &mut Cursor::new("no\n")).is_ok());
        assert!(finish(&adb, &mut Cursor::new("")).is_ok());

        let err = finish(&adb, &mut Cursor::new("yes\n")).unwrap_err();
        assert!(matches!(err.downcast_ref::<AdbError>(), Some(AdbError::Spawn(_))));
    }

    #[cfg(unix)]
    #[test]
    fn finish_runs_kill_server() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("killed");
        let adb = utils::process::fake_binary(
            dir.path(),
            "adb",
            &format!(r#"[ "$1" = kill-server ] && touch '{}'"#, marker.display()),
        );

        finish(&Adb::new(adb), &mut Cursor::new("y\n")).unwrap();
        assert!(marker.exists());
    }
}
