use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },
}

/// Typed access to environment-style settings. The lookup is injectable so
/// configs can be built from a map in tests.
pub struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    pub fn new(lookup: F) -> Self {
        Self { lookup }
    }

    /// Blank values count as unset.
    pub fn optional(&self, var: &'static str) -> Option<String> {
        (self.lookup)(var).filter(|v| !v.trim().is_empty())
    }

    pub fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.optional(var).ok_or(ConfigError::Missing(var))
    }

    pub fn parsed_or<T: FromStr>(&self, var: &'static str, default: T) -> Result<T, ConfigError> {
        match self.optional(var) {
            None => Ok(default),
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { var, value }),
        }
    }
}

fn process_var(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

impl Env<fn(&str) -> Option<String>> {
    pub fn process() -> Self {
        Self::new(process_var)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> Env<impl Fn(&str) -> Option<String>> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Env::new(move |k| map.get(k).cloned())
    }

    #[test]
    fn required_reports_missing_and_blank() {
        let env = env(&[("BLANK", "  "), ("SET", "x")]);
        assert_eq!(env.required("SET").unwrap(), "x");
        assert_eq!(env.required("BLANK"), Err(ConfigError::Missing("BLANK")));
        assert_eq!(env.required("NOPE"), Err(ConfigError::Missing("NOPE")));
    }

    #[test]
    fn parsed_or_falls_back_and_validates() {
        let env = env(&[("WORKERS", "8"), ("BAD", "eight")]);
        assert_eq!(env.parsed_or("WORKERS", 4usize), Ok(8));
        assert_eq!(env.parsed_or("MISSING", 4usize), Ok(4));
        assert_eq!(
            env.parsed_or("BAD", 4usize),
            Err(ConfigError::Invalid {
                var: "BAD",
                value: "eight".to_string()
            })
        );
    }
}
