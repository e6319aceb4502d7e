// Parameter groups

use crate::error::ConfigError;
use log::info;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Key that names a file of further `key=value` lines in [`ParameterGroup::from_args`].
pub const PARAM_FILE_KEY: &str = "param_file";

/// Types that can be read out of a [`ParameterGroup`].
pub trait ParamType: Sized {
    fn parse_param(raw: &str) -> Result<Self, String>;
}

macro_rules! param_type_from_str {
    ($($t:ty),*) => {
        $(
            impl ParamType for $t {
                fn parse_param(raw: &str) -> Result<Self, String> {
                    raw.trim().parse::<$t>().map_err(|e| e.to_string())
                }
            }
        )*
    };
}

param_type_from_str!(i32, i64, usize, f64);

impl ParamType for bool {
    fn parse_param(raw: &str) -> Result<Self, String> {
        match raw.trim() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            other => Err(format!("'{}' is not a boolean", other)),
        }
    }
}

impl ParamType for String {
    fn parse_param(raw: &str) -> Result<Self, String> {
        Ok(raw.to_string())
    }
}

/// Immutable set of named parameters with usage tracking.
///
/// Values are stored as strings and parsed on lookup. Each lookup marks the
/// key as used, so that leftover parameters can be reported once a run has
/// consumed what it needs. Adding parameters goes through
/// [`ParameterGroup::with_default`], which returns a new group.
#[derive(Debug, Clone, Default)]
pub struct ParameterGroup {
    values: BTreeMap<String, String>,
    used: RefCell<BTreeSet<String>>,
}

impl ParameterGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            used: RefCell::new(BTreeSet::new()),
        }
    }

    /// Parse command-line style `key=value` tokens.
    ///
    /// A `param_file=<path>` token pulls in the `key=value` lines of that
    /// file; values given directly on the command line win over file values.
    pub fn from_args<I, S>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut values = BTreeMap::new();
        let mut from_file = BTreeMap::new();
        for arg in args {
            let (key, value) = split_pair(arg.as_ref())?;
            if key == PARAM_FILE_KEY {
                from_file.extend(read_param_file(Path::new(&value))?);
            } else {
                values.insert(key, value);
            }
        }
        for (key, value) in from_file {
            values.entry(key).or_insert(value);
        }
        Ok(Self {
            values,
            used: RefCell::new(BTreeSet::new()),
        })
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Raw string value without marking it as used.
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Look up a required parameter.
    pub fn get<T: ParamType>(&self, key: &str) -> Result<T, ConfigError> {
        let raw = self
            .values
            .get(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))?;
        self.used.borrow_mut().insert(key.to_string());
        T::parse_param(raw).map_err(|reason| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
            reason,
        })
    }

    /// Look up an optional parameter, falling back to `default` when absent.
    /// A present but unparsable value is still an error.
    pub fn get_default<T: ParamType>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        if self.has(key) {
            self.get(key)
        } else {
            Ok(default)
        }
    }

    /// New group with `key=value` added unless `key` is already present.
    pub fn with_default(&self, key: &str, value: impl ToString) -> Self {
        let mut next = self.clone();
        next.values
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
        next
    }

    /// Supplied parameters that no lookup has touched, in key order.
    pub fn unused(&self) -> Vec<String> {
        let used = self.used.borrow();
        self.values
            .keys()
            .filter(|k| !used.contains(*k))
            .cloned()
            .collect()
    }

    pub fn report_unused(&self) {
        info!("====================   Unused parameters:   ====================");
        for key in self.unused() {
            info!("{} = {}", key, self.values[&key]);
        }
        info!("================================================================");
    }
}

fn split_pair(token: &str) -> Result<(String, String), ConfigError> {
    match token.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(ConfigError::Malformed(token.to_string())),
    }
}

fn read_param_file(path: &Path) -> Result<BTreeMap<String, String>, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(split_pair)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_lookup_and_defaults() {
        let params = ParameterGroup::from_pairs([
            ("boundary_condition_type", "2"),
            ("2d_hack", "1"),
            ("residual_tolerance", "1e-6"),
        ]);
        assert_eq!(params.get::<i32>("boundary_condition_type").unwrap(), 2);
        assert!(params.get::<bool>("2d_hack").unwrap());
        assert_eq!(params.get_default("residual_tolerance", 1e-8).unwrap(), 1e-6);
        assert_eq!(params.get_default("viscosity", 1.0).unwrap(), 1.0);
    }

    #[test]
    fn missing_and_invalid_values_are_errors() {
        let params = ParameterGroup::from_pairs([("nx", "three")]);
        assert!(matches!(
            params.get::<usize>("ny"),
            Err(ConfigError::Missing(ref k)) if k == "ny"
        ));
        assert!(matches!(
            params.get_default::<usize>("nx", 1),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn with_default_does_not_overwrite_or_mutate_original() {
        let params = ParameterGroup::from_pairs([("periodic_extension", "false")]);
        let extended = params
            .with_default("periodic_extension", true)
            .with_default("use_unique_boundary_ids", true);

        assert_eq!(extended.raw("periodic_extension"), Some("false"));
        assert_eq!(extended.raw("use_unique_boundary_ids"), Some("true"));
        assert!(!params.has("use_unique_boundary_ids"));
    }

    #[test]
    fn unused_lists_untouched_keys() {
        let params = ParameterGroup::from_pairs([("a", "1"), ("b", "2"), ("c", "3")]);
        let _ = params.get::<i32>("b");
        assert_eq!(params.unused(), vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn from_args_parses_pairs() {
        let params = ParameterGroup::from_args(["nx=4", " ny = 2 "]).unwrap();
        assert_eq!(params.get::<usize>("nx").unwrap(), 4);
        assert_eq!(params.get::<usize>("ny").unwrap(), 2);
        assert!(matches!(
            ParameterGroup::from_args(["nx"]),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn command_line_wins_over_param_file() {
        let path = std::env::temp_dir().join("permupscale_params_test.txt");
        fs::write(&path, "# comment\nnx=8\nny=3\n\n").unwrap();
        let file_arg = format!("{}={}", PARAM_FILE_KEY, path.display());
        let params = ParameterGroup::from_args(["nx=2".to_string(), file_arg]).unwrap();
        assert_eq!(params.get::<usize>("nx").unwrap(), 2);
        assert_eq!(params.get::<usize>("ny").unwrap(), 3);
        let _ = fs::remove_file(path);
    }
}
