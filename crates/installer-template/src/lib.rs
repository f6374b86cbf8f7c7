//! Input Validator & Template Renderer (spec §2 component E, §4.4).
//!
//! Two independent jobs share a crate because they sit on the same data
//! path: validated/coerced `InputBinding` values feed the `{var}` template
//! renderer used by `config_templates` and install command strings.

use std::collections::HashMap;
use std::path::Path;

use installer_core::types::{InputSpec, InputType, InputValidation, SystemProfile};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("input {input_id}: expected {expected}, got {actual}")]
    TypeMismatch {
        input_id: String,
        expected: &'static str,
        actual: String,
    },
    #[error("input {input_id}: value {value} is below minimum {min}")]
    BelowMin { input_id: String, value: f64, min: f64 },
    #[error("input {input_id}: value {value} is above maximum {max}")]
    AboveMax { input_id: String, value: f64, max: f64 },
    #[error("input {input_id}: value {value} is not an integer")]
    NotInteger { input_id: String, value: f64 },
    #[error("input {input_id}: value {value:?} does not match pattern {pattern}")]
    RegexMismatch {
        input_id: String,
        value: String,
        pattern: String,
    },
    #[error("input {input_id}: path {value} must be absolute")]
    NotAbsolute { input_id: String, value: String },
    #[error("input {input_id}: path {value} does not exist")]
    DoesNotExist { input_id: String, value: String },
    #[error("input {input_id}: {value} is not one of the allowed options {options:?}")]
    NotInOptions {
        input_id: String,
        value: String,
        options: Vec<String>,
    },
    #[error("input {input_id}: required and has no default")]
    MissingRequired { input_id: String },
}

/// Validates and type-coerces a raw JSON answer against an `InputSpec`
/// (spec §4.4). Falls back to the spec's declared default when the caller
/// supplied no value.
pub fn validate_input(spec: &InputSpec, raw: Option<&Value>) -> Result<Value, ValidationError> {
    let value = raw.or(spec.default.as_ref()).ok_or_else(|| ValidationError::MissingRequired {
        input_id: spec.id.clone(),
    })?;

    let coerced = match spec.kind {
        InputType::Boolean => Value::Bool(coerce_bool(&spec.id, value)?),
        InputType::Number => Value::from(coerce_number(&spec.id, value)?),
        InputType::Select | InputType::Text | InputType::Path => {
            Value::String(coerce_string(&spec.id, value)?)
        }
    };

    if let Some(validation) = &spec.validation {
        apply_validation(&spec.id, spec.kind, &coerced, validation)?;
    }
    Ok(coerced)
}

fn coerce_bool(input_id: &str, value: &Value) -> Result<bool, ValidationError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "true" => Ok(true),
        Value::String(s) if s == "false" => Ok(false),
        other => Err(ValidationError::TypeMismatch {
            input_id: input_id.to_string(),
            expected: "boolean",
            actual: other.to_string(),
        }),
    }
}

fn coerce_number(input_id: &str, value: &Value) -> Result<f64, ValidationError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| ValidationError::TypeMismatch {
            input_id: input_id.to_string(),
            expected: "number",
            actual: value.to_string(),
        }),
        Value::String(s) => s.parse::<f64>().map_err(|_| ValidationError::TypeMismatch {
            input_id: input_id.to_string(),
            expected: "number",
            actual: s.clone(),
        }),
        other => Err(ValidationError::TypeMismatch {
            input_id: input_id.to_string(),
            expected: "number",
            actual: other.to_string(),
        }),
    }
}

fn coerce_string(input_id: &str, value: &Value) -> Result<String, ValidationError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(ValidationError::TypeMismatch {
            input_id: input_id.to_string(),
            expected: "string",
            actual: other.to_string(),
        }),
    }
}

fn apply_validation(
    input_id: &str,
    kind: InputType,
    value: &Value,
    validation: &InputValidation,
) -> Result<(), ValidationError> {
    if kind == InputType::Number {
        let n = value.as_f64().unwrap_or(0.0);
        if let Some(min) = validation.min {
            if n < min {
                return Err(ValidationError::BelowMin {
                    input_id: input_id.to_string(),
                    value: n,
                    min,
                });
            }
        }
        if let Some(max) = validation.max {
            if n > max {
                return Err(ValidationError::AboveMax {
                    input_id: input_id.to_string(),
                    value: n,
                    max,
                });
            }
        }
        if validation.integer && n.fract() != 0.0 {
            return Err(ValidationError::NotInteger {
                input_id: input_id.to_string(),
                value: n,
            });
        }
    }

    if let Some(s) = value.as_str() {
        if let Some(pattern) = &validation.regex {
            let re = Regex::new(pattern).map_err(|_| ValidationError::RegexMismatch {
                input_id: input_id.to_string(),
                value: s.to_string(),
                pattern: pattern.clone(),
            })?;
            if !re.is_match(s) {
                return Err(ValidationError::RegexMismatch {
                    input_id: input_id.to_string(),
                    value: s.to_string(),
                    pattern: pattern.clone(),
                });
            }
        }
        if kind == InputType::Path {
            if validation.must_be_absolute && !Path::new(s).is_absolute() {
                return Err(ValidationError::NotAbsolute {
                    input_id: input_id.to_string(),
                    value: s.to_string(),
                });
            }
            if validation.must_exist && !Path::new(s).exists() {
                return Err(ValidationError::DoesNotExist {
                    input_id: input_id.to_string(),
                    value: s.to_string(),
                });
            }
        }
        if kind == InputType::Select && !validation.options.is_empty() && !validation.options.iter().any(|o| o == s)
        {
            return Err(ValidationError::NotInOptions {
                input_id: input_id.to_string(),
                value: s.to_string(),
                options: validation.options.clone(),
            });
        }
    }

    Ok(())
}

/// Single-pass `{var}` substitution over a template string. `{{` and `}}`
/// escape to literal braces; any `{name}` whose name isn't in `vars` is
/// collected and reported together via `TemplateError::Unresolved` rather
/// than failing on the first miss (spec §4.4).
pub fn render(template: &str, vars: &HashMap<String, String>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut unresolved = Vec::new();
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                out.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                out.push('}');
                i += 2;
            }
            '{' => {
                if let Some(close) = chars[i..].iter().position(|c| *c == '}') {
                    let name: String = chars[i + 1..i + close].iter().collect();
                    match vars.get(&name) {
                        Some(value) => out.push_str(value),
                        None => unresolved.push(name),
                    }
                    i += close + 1;
                } else {
                    out.push('{');
                    i += 1;
                }
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    if unresolved.is_empty() {
        Ok(out)
    } else {
        Err(TemplateError::Unresolved { vars: unresolved })
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TemplateError {
    #[error("unresolved template variable(s): {vars:?}")]
    Unresolved { vars: Vec<String> },
}

/// Built-in variables always available to templates, in addition to
/// whatever the caller's `InputBinding` supplies (spec §4.4): `{user}`,
/// `{home}`, `{arch}`, `{distro}`, `{family}`, `{nproc}`, `{cpu_count}`,
/// `{pip_index}` (from the selected choice, when one applies), `{version}`.
pub fn builtin_vars(
    tool_id: &str,
    profile: &SystemProfile,
    home_dir: &str,
    pip_index: Option<&str>,
    version: Option<&str>,
) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("tool_id".to_string(), tool_id.to_string());
    vars.insert("arch".to_string(), profile.arch.clone());
    vars.insert("os".to_string(), profile.system.clone());
    vars.insert("home".to_string(), home_dir.to_string());
    vars.insert("user".to_string(), std::env::var("USER").unwrap_or_else(|_| "root".to_string()));
    vars.insert("distro".to_string(), profile.distro.id.clone());
    vars.insert("family".to_string(), profile.distro.family.clone());

    let nproc = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    vars.insert("nproc".to_string(), nproc.to_string());
    let cpu_count = profile.hardware.as_ref().map(|h| h.cpu_cores as usize).filter(|c| *c > 0).unwrap_or(nproc);
    vars.insert("cpu_count".to_string(), cpu_count.to_string());

    if let Some(idx) = pip_index {
        vars.insert("pip_index".to_string(), idx.to_string());
    }
    if let Some(v) = version {
        vars.insert("version".to_string(), v.to_string());
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(kind: InputType, validation: Option<InputValidation>) -> InputSpec {
        InputSpec {
            id: "port".into(),
            kind,
            label: "Port".into(),
            default: None,
            validation,
        }
    }

    #[test]
    fn coerces_string_number_to_f64() {
        let s = spec(InputType::Number, None);
        let v = validate_input(&s, Some(&json!("8080"))).unwrap();
        assert_eq!(v, json!(8080.0));
    }

    #[test]
    fn enforces_min_max() {
        let s = spec(
            InputType::Number,
            Some(InputValidation {
                min: Some(1024.0),
                max: Some(65535.0),
                ..Default::default()
            }),
        );
        assert!(validate_input(&s, Some(&json!(80))).is_err());
        assert!(validate_input(&s, Some(&json!(8080))).is_ok());
    }

    #[test]
    fn falls_back_to_default_when_missing() {
        let mut s = spec(InputType::Number, None);
        s.default = Some(json!(8080));
        assert_eq!(validate_input(&s, None).unwrap(), json!(8080.0));
    }

    #[test]
    fn missing_required_without_default_errors() {
        let s = spec(InputType::Number, None);
        assert!(matches!(
            validate_input(&s, None),
            Err(ValidationError::MissingRequired { .. })
        ));
    }

    #[test]
    fn path_must_be_absolute() {
        let s = spec(
            InputType::Path,
            Some(InputValidation {
                must_be_absolute: true,
                ..Default::default()
            }),
        );
        assert!(validate_input(&s, Some(&json!("relative/path"))).is_err());
        assert!(validate_input(&s, Some(&json!("/abs/path"))).is_ok());
    }

    #[test]
    fn render_substitutes_single_pass() {
        let mut vars = HashMap::new();
        vars.insert("name".to_string(), "docker".to_string());
        let out = render("install {name} now", &vars).unwrap();
        assert_eq!(out, "install docker now");
    }

    #[test]
    fn render_escapes_double_braces() {
        let vars = HashMap::new();
        let out = render("{{literal}}", &vars).unwrap();
        assert_eq!(out, "{literal}");
    }

    #[test]
    fn render_collects_all_unresolved_vars() {
        let vars = HashMap::new();
        let err = render("{a} and {b}", &vars).unwrap_err();
        assert_eq!(
            err,
            TemplateError::Unresolved {
                vars: vec!["a".to_string(), "b".to_string()]
            }
        );
    }

    fn profile() -> SystemProfile {
        SystemProfile {
            system: "linux".into(),
            arch: "x86_64".into(),
            distro: installer_core::types::Distro {
                id: "ubuntu".into(),
                family: "debian".into(),
                version: "22.04".into(),
                version_tuple: vec![22, 4],
                codename: None,
            },
            package_manager: Default::default(),
            capabilities: Default::default(),
            libc: None,
            libraries: vec![],
            hardware: None,
            gpu: None,
            kernel: None,
            build_toolchain: None,
            init_system: None,
            network: None,
            python: None,
        }
    }

    #[test]
    fn builtin_vars_covers_the_full_spec_set() {
        let vars = builtin_vars("docker", &profile(), "/home/alice", Some("https://pypi.org"), Some("24.0"));
        for key in ["user", "home", "arch", "distro", "family", "nproc", "cpu_count", "pip_index", "version"] {
            assert!(vars.contains_key(key), "missing builtin var {key}");
        }
        assert_eq!(vars["distro"], "ubuntu");
        assert_eq!(vars["family"], "debian");
        assert_eq!(vars["pip_index"], "https://pypi.org");
        assert_eq!(vars["version"], "24.0");
    }

    #[test]
    fn builtin_vars_omits_pip_index_and_version_when_absent() {
        let vars = builtin_vars("docker", &profile(), "/home/alice", None, None);
        assert!(!vars.contains_key("pip_index"));
        assert!(!vars.contains_key("version"));
    }

    #[test]
    fn render_does_not_recurse_into_substituted_values() {
        let mut vars = HashMap::new();
        vars.insert("a".to_string(), "{b}".to_string());
        let out = render("{a}", &vars).unwrap();
        assert_eq!(out, "{b}");
    }
}
