//! Secret reference resolver.
//!
//! The staff token in `config.toml` (or `--token`) can reference a secret
//! stored outside the file:
//!
//! - `pass::path/in/store`: runs `pass show path/in/store`, returns first line
//! - `env::VAR_NAME`: reads `$VAR_NAME` from the environment
//! - anything else: returned as-is (plain text)

/// Resolves a value that may contain a secret reference prefix.
pub fn resolve(value: &str) -> Result<String, String> {
    if let Some(path) = value.strip_prefix("pass::") {
        resolve_pass(path)
    } else if let Some(var) = value.strip_prefix("env::") {
        resolve_env(var)
    } else {
        Ok(value.to_string())
    }
}

/// Runs `pass show <path>` and returns the first line of stdout.
fn resolve_pass(path: &str) -> Result<String, String> {
    let output = std::process::Command::new("pass")
        .arg("show")
        .arg(path)
        .output()
        .map_err(|e| format!("failed to run `pass show {}`: {}", path, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "`pass show {}` failed (exit {}): {}",
            path,
            output.status,
            stderr.trim()
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .ok_or_else(|| format!("`pass show {}` produced no output", path))
}

/// Reads an environment variable.
fn resolve_env(var: &str) -> Result<String, String> {
    match std::env::var(var) {
        Ok(value) => Ok(value),
        Err(std::env::VarError::NotPresent) => {
            Err(format!("environment variable `{}` is not set", var))
        }
        Err(std::env::VarError::NotUnicode(_)) => {
            Err(format!("environment variable `{}` is not valid UTF-8", var))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passthrough() {
        assert_eq!(resolve("hello").unwrap(), "hello");
        assert_eq!(resolve("").unwrap(), "");
        assert_eq!(resolve("staff-42").unwrap(), "staff-42");
    }

    #[test]
    fn env_prefix_resolves() {
        unsafe {
            std::env::set_var("_EXAMFLOW_TEST_SECRET", "bearer-token-value");
        }
        assert_eq!(
            resolve("env::_EXAMFLOW_TEST_SECRET").unwrap(),
            "bearer-token-value"
        );
        unsafe {
            std::env::remove_var("_EXAMFLOW_TEST_SECRET");
        }
    }

    #[test]
    fn env_prefix_missing_var_errors() {
        let result = resolve("env::_EXAMFLOW_UNSET_VAR_7781");
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("not set"));
    }

    #[test]
    fn prefix_must_be_exact() {
        assert_eq!(resolve("env:SHOUT").unwrap(), "env:SHOUT");
        assert_eq!(resolve("PASS::x").unwrap(), "PASS::x");
    }

    #[test]
    fn pass_prefix_missing_entry_errors() {
        let result = resolve("pass::nonexistent/entry/that/should/not/exist/12345");
        assert!(result.is_err());
    }
}
