//! Config file loading: `${VAR}` substitution from the environment, then
//! TOML parsing.

use {once_cell::sync::Lazy, regex::Regex};

use crate::{
    error::{Error, Result},
    schema::RawConfig,
};

static ENV_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env reference regex")
});

/// Replace every `${VAR}` with the value `lookup` returns for it.
/// Secrets stay out of the config file this way.
pub fn substitute_env_with(
    source: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String> {
    let mut out = String::with_capacity(source.len());
    let mut last = 0;
    for captures in ENV_REFERENCE.captures_iter(source) {
        #[allow(clippy::expect_used)]
        let whole = captures.get(0).expect("capture 0 always present");
        let name = &captures[1];
        let value = lookup(name).ok_or_else(|| Error::MissingEnvVar(name.to_string()))?;
        out.push_str(&source[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&source[last..]);
    Ok(out)
}

pub fn parse(source: &str) -> Result<RawConfig> {
    Ok(toml::from_str(source)?)
}
