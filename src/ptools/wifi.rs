use anyhow::Result;
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::collections::HashMap;

use crate::adb::Adb;
use crate::utils::{console, shell_quote, WifiNetwork};

/// Directories holding the Wi-Fi store, oldest layout first.
const WIFI_DIRS: &[&str] = &["/data/misc/wifi", "/data/misc/apexdata/com.android.wifi"];
const CONFIG_STORE: &str = "WifiConfigStore.xml";
const SUPPLICANT: &str = "wpa_supplicant.conf";
/// wpa_supplicant's `key_mgmt` when a block leaves it out.
const DEFAULT_KEY_MGMT: &str = "WPA_PSK IEEE8021X";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WifiStore {
    /// `WifiConfigStore.xml`, Android 8 and later.
    ConfigStore(String),
    /// `wpa_supplicant.conf`, older releases.
    Supplicant(String),
}

/// Finds the store file from `ls -la` listings keyed by directory.
pub fn locate_store(listings: &[(&str, String)]) -> Option<WifiStore> {
    let contains = |listing: &str, file: &str| {
        listing
            .lines()
            .any(|line| line.split_whitespace().last() == Some(file))
    };

    listings
        .iter()
        .find(|(_, listing)| contains(listing.as_str(), CONFIG_STORE))
        .map(|(dir, _)| WifiStore::ConfigStore(format!("{}/{}", dir, CONFIG_STORE)))
        .or_else(|| {
            listings
                .iter()
                .find(|(_, listing)| contains(listing.as_str(), SUPPLICANT))
                .map(|(dir, _)| WifiStore::Supplicant(format!("{}/{}", dir, SUPPLICANT)))
        })
}

pub fn show_networks(adb: &Adb, serial: &str) -> Result<()> {
    let mut listings = Vec::new();
    for dir in WIFI_DIRS {
        let output = adb.su(serial, &format!("ls -la {}", shell_quote(dir)))?;
        listings.push((*dir, output.stdout));
    }

    let networks = match locate_store(&listings) {
        Some(WifiStore::ConfigStore(path)) => {
            let xml = adb.su(serial, &format!("cat {}", shell_quote(&path)))?;
            parse_config_store(&xml.stdout)
        }
        Some(WifiStore::Supplicant(path)) => {
            let conf = adb.su(serial, &format!("cat {}", shell_quote(&path)))?;
            parse_supplicant(&conf.stdout)
        }
        None => {
            console::print_error("Android version not supported");
            Vec::new()
        }
    };

    if networks.is_empty() {
        console::print_warning("No wifi network found");
        return Ok(());
    }

    console::print_info("Wi-Fi network:");
    println!("{:<24} {:<14} {:<30}", "SSID", "Security", "Password");
    for network in &networks {
        println!(
            "{:<24} {:<14} {:<30}",
            network.ssid,
            network.security_mode,
            network.password.as_deref().unwrap_or("NONE")
        );
    }
    Ok(())
}

/// Parses the `<Network>` entries of `WifiConfigStore.xml`.
pub fn parse_config_store(xml: &str) -> Vec<WifiNetwork> {
    let network_re = Regex::new(r"(?s)<Network>(.*?)</Network>").expect("valid network regex");
    let config_re = Regex::new(r"(?s)<WifiConfiguration>(.*?)</WifiConfiguration>")
        .expect("valid configuration regex");
    let string_re =
        Regex::new(r#"(?s)<string name="([^"]+)">(.*?)</string>"#).expect("valid string regex");

    network_re
        .captures_iter(xml)
        .filter_map(|network| {
            let block = network.get(1)?.as_str();
            let config = config_re
                .captures(block)
                .and_then(|caps| caps.get(1))
                .map_or(block, |m| m.as_str());

            let mut fields = HashMap::new();
            for caps in string_re.captures_iter(config) {
                fields
                    .entry(caps[1].to_string())
                    .or_insert_with(|| unescape_xml(&caps[2]));
            }

            let Some(raw_ssid) = fields.get("SSID") else {
                log::trace!("network without SSID skipped");
                return None;
            };
            let password = fields.get("PreSharedKey").map(|psk| strip_quotes(psk).to_string());
            // ConfigKey is the quoted SSID followed by the security type
            let security_mode = match fields.get("ConfigKey") {
                Some(key) => key.replacen(raw_ssid.as_str(), "", 1),
                None if password.is_some() => "WPA_PSK".to_string(),
                None => "NONE".to_string(),
            };

            Some(WifiNetwork {
                ssid: strip_quotes(raw_ssid).to_string(),
                security_mode,
                password,
            })
        })
        .collect()
}

/// Parses the `network={...}` blocks of `wpa_supplicant.conf`.
pub fn parse_supplicant(conf: &str) -> Vec<WifiNetwork> {
    let mut networks = Vec::new();
    let mut block: Option<HashMap<String, String>> = None;

    for line in conf.lines().map(str::trim) {
        if line == "network={" {
            block = Some(HashMap::new());
            continue;
        }
        let Some(fields) = block.as_mut() else {
            continue;
        };
        if line == "}" {
            if let Some(fields) = block.take() {
                networks.extend(supplicant_network(&fields));
            }
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = percent_decode_str(value.trim()).decode_utf8_lossy();
            fields.insert(key.trim().to_string(), value.to_string());
        }
    }

    networks
}

fn supplicant_network(fields: &HashMap<String, String>) -> Option<WifiNetwork> {
    let ssid = fields.get("ssid")?;
    let ssid = if is_quoted(ssid) {
        strip_quotes(ssid).to_string()
    } else {
        decode_hex(ssid).unwrap_or_else(|| ssid.clone())
    };

    let security_mode = fields
        .get("key_mgmt")
        .map(|mode| mode.replace('-', "_"))
        .unwrap_or_else(|| DEFAULT_KEY_MGMT.to_string());

    let password = fields
        .get("psk")
        .or_else(|| fields.get("wep_key0"))
        .map(|secret| strip_quotes(secret).to_string());

    Some(WifiNetwork {
        ssid,
        security_mode,
        password,
    })
}

fn is_quoted(value: &str) -> bool {
    value.len() >= 2 && value.starts_with('"') && value.ends_with('"')
}

fn strip_quotes(value: &str) -> &str {
    if is_quoted(value) {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn decode_hex(value: &str) -> Option<String> {
    if value.is_empty() || value.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..value.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(value.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

fn unescape_xml(value: &str) -> String {
    let re = Regex::new(r"&(#x[0-9a-fA-F]+|#[0-9]+|[a-z]+);").expect("valid entity regex");
    re.replace_all(value, |caps: &regex::Captures| {
        let entity = &caps[1];
        let decoded = match entity {
            "quot" => Some('"'),
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .map(|hex| u32::from_str_radix(hex, 16))
                .or_else(|| entity.strip_prefix('#').map(|dec| dec.parse::<u32>()))
                .and_then(|code| code.ok())
                .and_then(char::from_u32),
        };
        decoded.map_or_else(|| caps[0].to_string(), String::from)
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn home() -> WifiNetwork {
        WifiNetwork {
            ssid: "home".to_string(),
            security_mode: "WPA_PSK".to_string(),
            password: Some("secret".to_string()),
        }
    }

    #[test]
    fn config_store_record() {
        let xml = r#"<?xml version='1.0' encoding='utf-8' standalone='yes' ?>
<WifiConfigStoreData>
<int name="Version" value="3" />
<NetworkList>
<Network>
<WifiConfiguration>
<string name="ConfigKey">&quot;home&quot;WPA_PSK</string>
<string name="SSID">&quot;home&quot;</string>
<null name="BSSID" />
<string name="PreSharedKey">&quot;secret&quot;</string>
</WifiConfiguration>
<NetworkStatus>
<string name="SelectionStatus">NETWORK_SELECTION_ENABLED</string>
</NetworkStatus>
</Network>
<Network>
<WifiConfiguration>
<string name="ConfigKey">&quot;Cafe &amp; Co&quot;NONE</string>
<string name="SSID">&quot;Cafe &amp; Co&quot;</string>
<null name="PreSharedKey" />
</WifiConfiguration>
</Network>
</NetworkList>
</WifiConfigStoreData>"#;

        let networks = parse_config_store(xml);
        assert_eq!(
            networks,
            vec![
                home(),
                WifiNetwork {
                    ssid: "Cafe & Co".to_string(),
                    security_mode: "NONE".to_string(),
                    password: None,
                },
            ]
        );
    }

    #[test]
    fn supplicant_record() {
        let conf = "ctrl_interface=/data/misc/wifi/sockets\n\
                    update_config=1\n\
                    \n\
                    network={\n\
                    \tssid=\"home\"\n\
                    \tpsk=\"secret\"\n\
                    \tkey_mgmt=WPA-PSK\n\
                    \tpriority=1\n\
                    \tid_str=\"%7B%22creatorUid%22%3A%221000%22%7D\"\n\
                    }\n\
                    \n\
                    network={\n\
                    \tssid=6f6666696365\n\
                    \tkey_mgmt=NONE\n\
                    }\n";

        let networks = parse_supplicant(conf);
        assert_eq!(
            networks,
            vec![
                home(),
                WifiNetwork {
                    ssid: "office".to_string(),
                    security_mode: "NONE".to_string(),
                    password: None,
                },
            ]
        );
    }

    #[test]
    fn supplicant_values_are_percent_decoded() {
        let conf = "network={\n  ssid=\"my%20net\"\n  psk=\"p%40ss\"\n}\n";
        let networks = parse_supplicant(conf);
        assert_eq!(networks.len(), 1);
        assert_eq!(networks[0].ssid, "my net");
        assert_eq!(networks[0].password.as_deref(), Some("p@ss"));
        assert_eq!(networks[0].security_mode, DEFAULT_KEY_MGMT);
    }

    #[test]
    fn locate_prefers_config_store() {
        let legacy = "-rw-rw---- 1 wifi wifi 1024 2016-01-01 10:00 wpa_supplicant.conf\n".to_string();
        let apex = "-rw------- 1 system system 2048 2022-01-01 10:00 WifiConfigStore.xml\n".to_string();

        assert_eq!(
            locate_store(&[("/data/misc/wifi", legacy.clone()), ("/data/misc/apexdata/com.android.wifi", apex)]),
            Some(WifiStore::ConfigStore(
                "/data/misc/apexdata/com.android.wifi/WifiConfigStore.xml".to_string()
            ))
        );
        assert_eq!(
            locate_store(&[("/data/misc/wifi", legacy)]),
            Some(WifiStore::Supplicant("/data/misc/wifi/wpa_supplicant.conf".to_string()))
        );
        assert_eq!(
            locate_store(&[("/data/misc/wifi", "ls: No such file or directory".to_string())]),
            None
        );
    }

    #[test]
    fn xml_entities() {
        assert_eq!(unescape_xml("&quot;a&amp;b&quot; &#65;&#x42; &bogus;"), "\"a&b\" AB &bogus;");
    }
}
