use std::ffi::OsString;
use std::path::PathBuf;

pub const DEFAULT_FRIDA_VERSION: &str = "15.2.2";
pub const FRIDA_RELEASES: &str = "https://github.com/frida/frida/releases/download";

/// Host-side settings shared by the shell and its extensions.
#[derive(Debug, Clone)]
pub struct Config {
    pub adb: OsString,
    pub frida: OsString,
    pub pip: OsString,
    /// Pinned server release; when unset the local frida version is used.
    pub frida_version: Option<String>,
    pub scratch_dir: PathBuf,
}

impl Config {
    pub fn scripts_dir(&self) -> PathBuf {
        self.scratch_dir.join("scripts")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            adb: "adb".into(),
            frida: "frida".into(),
            pip: "pip".into(),
            frida_version: None,
            scratch_dir: PathBuf::from("tmp"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_live_under_scratch_dir() {
        let config = Config {
            scratch_dir: PathBuf::from("/tmp/ptools"),
            ..Config::default()
        };
        assert_eq!(config.scripts_dir(), PathBuf::from("/tmp/ptools/scripts"));
        assert_eq!(Config::default().adb, OsString::from("adb"));
    }
}
