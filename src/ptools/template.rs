use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};

use crate::utils::console;

const NATIVE_TEMPLATE: &str = include_str!("../../scripts/native_hook.js");
const JAVA_TEMPLATE: &str = include_str!("../../scripts/java_hook.js");

/// Shorthand accepted at the argument-type prompt.
const JAVA_TYPES: &[(&str, &str)] = &[
    ("string", "java.lang.String"),
    ("int", "int"),
    ("long", "long"),
    ("short", "short"),
    ("byte", "byte"),
    ("char", "char"),
    ("float", "float"),
    ("double", "double"),
    ("boolean", "boolean"),
    ("bool", "boolean"),
    ("byte[]", "[B"),
    ("int[]", "[I"),
    ("string[]", "[Ljava.lang.String;"),
    ("object", "java.lang.Object"),
    ("context", "android.content.Context"),
];

/// A hook the user asked `create` to generate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hook {
    Native {
        library: String,
        export: String,
        arg_count: usize,
    },
    Java {
        class: String,
        method: String,
        arg_types: Vec<String>,
    },
}

impl Hook {
    pub fn kind(&self) -> &'static str {
        match self {
            Hook::Native { .. } => "native",
            Hook::Java { .. } => "java",
        }
    }

    pub fn render(&self) -> String {
        match self {
            Hook::Native {
                library,
                export,
                arg_count,
            } => fill(
                NATIVE_TEMPLATE,
                &[
                    ("LIBRARY", escape_js(library)),
                    ("EXPORT", escape_js(export)),
                    ("ARG_COUNT", arg_count.to_string()),
                ],
            ),
            Hook::Java {
                class,
                method,
                arg_types,
            } => {
                let args: Vec<String> = (0..arg_types.len()).map(|i| format!("arg{}", i)).collect();
                let types = arg_types
                    .iter()
                    .map(|ty| format!("'{}'", escape_js(ty)))
                    .collect::<Vec<_>>()
                    .join(", ");
                let log_args = args
                    .iter()
                    .enumerate()
                    .map(|(i, arg)| format!("            console.log(\"  --> [{}] \" + {});", i, arg))
                    .collect::<Vec<_>>()
                    .join("\n");
                let call_args: String = args.iter().map(|arg| format!(", {}", arg)).collect();

                fill(
                    JAVA_TEMPLATE,
                    &[
                        ("CLASS", escape_js(class)),
                        ("METHOD", escape_js(method)),
                        ("ARG_TYPES", types),
                        ("ARGS", args.join(", ")),
                        ("LOG_ARGS", log_args),
                        ("CALL_ARGS", call_args),
                    ],
                )
            }
        }
    }
}

/// Replaces `{{NAME}}` placeholders in one pass, so a value is never
/// scanned again. Unknown names are kept as written.
fn fill(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let value = after.find("}}").and_then(|end| {
            let name = &after[..end];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (value, end))
        });
        match value {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Escapes a value for a quoted JavaScript string literal.
fn escape_js(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\'' => escaped.push_str("\\'"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Maps a shorthand type name to the name frida's `overload` expects.
/// Anything else is taken as a fully qualified class name.
pub fn normalize_type(token: &str) -> String {
    let token = token.trim();
    let lower = token.to_lowercase();
    JAVA_TYPES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| token.to_string())
}

pub fn output_name(kind: &str, now: &DateTime<Local>) -> String {
    format!("{}_{}.js", kind, now.format("%Y%m%d_%H%M%S"))
}

pub fn write_script(dir: &Path, hook: &Hook, now: &DateTime<Local>) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(output_name(hook.kind(), now));
    fs::write(&path, hook.render())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Asks for the hook parameters on stdin.
pub fn collect() -> Result<Hook> {
    let kind = console::prompt("Hook type? (native/java)", Some("java"))?;
    match kind.to_lowercase().as_str() {
        "native" => {
            let library = console::prompt("Native library name?", None)?;
            let export = console::prompt("Native function name?", None)?;
            let arg_count = console::prompt_usize("Number of arguments?", Some(0))?;
            Ok(Hook::Native {
                library,
                export,
                arg_count,
            })
        }
        "java" => {
            let class = console::prompt("Class name?", None)?;
            let method = console::prompt("Function name?", None)?;
            let arg_count = console::prompt_usize("Number of arguments?", Some(0))?;
            let mut arg_types = Vec::with_capacity(arg_count);
            for i in 0..arg_count {
                let ty = console::prompt(&format!("Type of argument {}?", i), Some("string"))?;
                arg_types.push(normalize_type(&ty));
            }
            Ok(Hook::Java {
                class,
                method,
                arg_types,
            })
        }
        _ => Err(anyhow::anyhow!("The answer is invalid.")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn normalizes_known_types_and_keeps_class_names() {
        assert_eq!(normalize_type("String"), "java.lang.String");
        assert_eq!(normalize_type("bool"), "boolean");
        assert_eq!(normalize_type(" byte[] "), "[B");
        assert_eq!(normalize_type("Context"), "android.content.Context");
        assert_eq!(normalize_type("com.example.Token"), "com.example.Token");
    }

    #[test]
    fn native_hook_fills_every_placeholder() {
        let script = Hook::Native {
            library: "libnative.so".to_string(),
            export: "Java_com_example_check".to_string(),
            arg_count: 3,
        }
        .render();
        assert!(script.contains("indexOf(\"libnative.so\")"));
        assert!(script.contains("indexOf(\"Java_com_example_check\")"));
        assert!(script.contains("i < 3;"));
        assert!(!script.contains("{{"));
    }

    #[test]
    fn java_hook_lists_overload_and_arguments() {
        let script = Hook::Java {
            class: "LoginManager".to_string(),
            method: "checkPassword".to_string(),
            arg_types: vec!["java.lang.String".to_string(), "int".to_string()],
        }
        .render();
        assert!(script.contains("[\"checkPassword\"].overload('java.lang.String', 'int')"));
        assert!(script.contains("function (arg0, arg1)"));
        assert!(script.contains("console.log(\"  --> [1] \" + arg1);"));
        assert!(script.contains("method.call(this, arg0, arg1)"));
        assert!(!script.contains("{{"));
    }

    #[test]
    fn java_hook_without_arguments() {
        let script = Hook::Java {
            class: "Session".to_string(),
            method: "isRooted".to_string(),
            arg_types: Vec::new(),
        }
        .render();
        assert!(script.contains(r#"["isRooted"].overload()"#));
        assert!(script.contains("method.call(this)"));
    }

    #[test]
    fn names_are_escaped_and_substituted_once() {
        let script = Hook::Native {
            library: r#"lib"odd\.so"#.to_string(),
            export: "{{ARG_COUNT}}".to_string(),
            arg_count: 2,
        }
        .render();
        assert!(script.contains(r#"indexOf("lib\"odd\\.so")"#));
        assert!(script.contains(r#"indexOf("{{ARG_COUNT}}")"#));
        assert!(script.contains("i < 2;"));

        let script = Hook::Java {
            class: "{{METHOD}}".to_string(),
            method: "it's".to_string(),
            arg_types: vec!["com.example.O'Neil".to_string()],
        }
        .render();
        assert!(script.contains(r#"enumerateMethods("*{{METHOD}}*!it\'s")"#));
        assert!(script.contains(r#"["it\'s"].overload('com.example.O\'Neil')"#));
    }

    #[test]
    fn fill_keeps_unknown_placeholders() {
        let values = [("A", "1".to_string())];
        assert_eq!(fill("{{A}}-{{B}}-{{A", &values), "1-{{B}}-{{A");
        assert_eq!(escape_js("a\\b\"c"), r#"a\\b\"c"#);
    }

    #[test]
    fn writes_timestamped_script() {
        let dir = tempfile::tempdir().unwrap();
        let now = Local.with_ymd_and_hms(2022, 11, 18, 9, 5, 7).unwrap();
        let hook = Hook::Native {
            library: "libc.so".to_string(),
            export: "open".to_string(),
            arg_count: 1,
        };

        let path = write_script(&dir.path().join("scripts"), &hook, &now).unwrap();
        assert_eq!(path.file_name().unwrap(), "native_20221118_090507.js");
        assert_eq!(fs::read_to_string(&path).unwrap(), hook.render());
    }
}
