use crate::error::PlanError;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Variables available to `${VAR}` references in a plan: the process
/// environment plus anything loaded from `.env` files.
#[derive(Debug, Clone, Default)]
pub struct EnvManager {
    vars: HashMap<String, String>,
}

impl EnvManager {
    pub fn new() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Load variables from a .env file. Later definitions win.
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), PlanError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PlanError::EnvFile(format!("failed to read {}: {}", path.display(), e))
        })?;

        self.parse_env_content(&content)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Replaces every `${NAME}` with its value. `$$` escapes a literal `$`.
    pub fn expand(&self, text: &str) -> Result<String, PlanError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        let mut offset = 0;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if tail.starts_with("$$") {
                out.push('$');
                rest = &tail[2..];
                offset += pos + 2;
                continue;
            }

            if let Some(body) = tail.strip_prefix("${") {
                let end = body
                    .find('}')
                    .ok_or(PlanError::UnterminatedVariable(offset + pos))?;
                let name = &body[..end];
                let value = self
                    .get(name)
                    .ok_or_else(|| PlanError::UndefinedVariable(name.to_string()))?;
                out.push_str(value);
                rest = &body[end + 1..];
                offset += pos + 3 + end;
                continue;
            }

            out.push('$');
            rest = &tail[1..];
            offset += pos + 1;
        }

        out.push_str(rest);
        Ok(out)
    }

    fn parse_env_content(&mut self, content: &str) -> Result<(), PlanError> {
        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(PlanError::EnvFile(format!(
                    "malformed line {} (expected KEY=VALUE)",
                    line_num + 1
                )));
            };

            let key = key.trim();
            if key.is_empty() {
                return Err(PlanError::EnvFile(format!(
                    "empty key at line {}",
                    line_num + 1
                )));
            }

            self.vars
                .insert(key.to_string(), Self::unquote_value(value));
        }

        Ok(())
    }

    fn unquote_value(value: &str) -> String {
        let value = value.trim();

        for quote in ['"', '\''] {
            if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
                return value[1..value.len() - 1].to_string();
            }
        }

        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_env() {
        let mut env = EnvManager::empty();
        let content = r#"
# Comment
KEY1=value1
KEY2 = "quoted value"
KEY3='single'
        "#;

        env.parse_env_content(content).unwrap();
        assert_eq!(env.get("KEY1"), Some("value1"));
        assert_eq!(env.get("KEY2"), Some("quoted value"));
        assert_eq!(env.get("KEY3"), Some("single"));
    }

    #[test]
    fn test_malformed_line() {
        let mut env = EnvManager::empty();
        let err = env.parse_env_content("NOT_A_PAIR").unwrap_err();
        assert!(matches!(err, PlanError::EnvFile(_)));
    }

    #[test]
    fn test_expand() {
        let mut env = EnvManager::empty();
        env.set("HOST", "shop.test");
        env.set("TOKEN", "abc");

        let out = env
            .expand("url = \"https://${HOST}/api\"\nauth = \"${TOKEN}\" cost = \"$$5 $x\"")
            .unwrap();
        assert_eq!(
            out,
            "url = \"https://shop.test/api\"\nauth = \"abc\" cost = \"$5 $x\""
        );
    }

    #[test]
    fn test_expand_undefined() {
        let env = EnvManager::empty();
        let err = env.expand("a = \"${MISSING}\"").unwrap_err();
        assert!(matches!(err, PlanError::UndefinedVariable(ref v) if v == "MISSING"));
    }

    #[test]
    fn test_expand_unterminated() {
        let env = EnvManager::empty();
        let err = env.expand("abc ${OOPS").unwrap_err();
        assert!(matches!(err, PlanError::UnterminatedVariable(4)));
    }
}
