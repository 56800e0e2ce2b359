/// An attached device as reported by `adb devices` and `getprop`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub sdk_version: String,
    pub cpu_abi: String,
}

/// One line of `pm list packages -f`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub install_mode: String,
    pub name: String,
    pub package_id: String,
}

impl Package {
    pub fn matches(&self, filter: &str) -> bool {
        self.name.contains(filter) || self.package_id.contains(filter)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiNetwork {
    pub ssid: String,
    pub security_mode: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseFile {
    pub size: u64,
    pub timestamp: String,
    pub filename: String,
}

/// A frida process found in the device process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FridaProcess {
    pub owner_user: String,
    pub pid: u32,
    pub process_name: String,
}
