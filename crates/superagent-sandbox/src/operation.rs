//! What the executor runs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::SandboxConfig;
use crate::error::SandboxError;

/// Script language accepted by [`Operation::Script`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Bash,
    Sh,
}

impl Language {
    pub fn file_name(&self) -> &'static str {
        match self {
            Language::Python => "main.py",
            Language::Bash | Language::Sh => "main.sh",
        }
    }

    pub(crate) fn interpreter<'a>(&self, config: &'a SandboxConfig) -> &'a str {
        match self {
            Language::Python => &config.python,
            Language::Bash => &config.shell,
            Language::Sh => "sh",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Language::Python => "python",
            Language::Bash => "bash",
            Language::Sh => "sh",
        })
    }
}

impl FromStr for Language {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Language::Python),
            "bash" => Ok(Language::Bash),
            "sh" | "shell" => Ok(Language::Sh),
            other => Err(SandboxError::InvalidOperation(format!(
                "unsupported language '{other}' (expected python, bash, or sh)"
            ))),
        }
    }
}

/// One unit of work for the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Run a program directly with arguments.
    Command {
        program: String,
        args: Vec<String>,
        stdin: Option<String>,
        env: Vec<(String, String)>,
    },
    /// Write source into the scratch directory and run it with the language's interpreter.
    Script {
        language: Language,
        source: String,
        stdin: Option<String>,
    },
}

impl Operation {
    pub fn command<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Operation::Command {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            env: Vec::new(),
        }
    }

    pub fn script(language: Language, source: impl Into<String>) -> Self {
        Operation::Script {
            language,
            source: source.into(),
            stdin: None,
        }
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        match &mut self {
            Operation::Command { stdin, .. } | Operation::Script { stdin, .. } => {
                *stdin = Some(input.into());
            }
        }
        self
    }

    /// Add an environment variable. Ignored for scripts.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Operation::Command { env, .. } = &mut self {
            env.push((key.into(), value.into()));
        }
        self
    }

    pub fn stdin(&self) -> Option<&str> {
        match self {
            Operation::Command { stdin, .. } | Operation::Script { stdin, .. } => stdin.as_deref(),
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> String {
        match self {
            Operation::Command { program, .. } => program.clone(),
            Operation::Script { language, .. } => format!("{language} script"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_parse() {
        assert_eq!("Python".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("py".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("shell".parse::<Language>().unwrap(), Language::Sh);
        assert!("ruby".parse::<Language>().is_err());
    }

    #[test]
    fn test_language_serde() {
        let lang: Language = serde_json::from_str("\"bash\"").unwrap();
        assert_eq!(lang, Language::Bash);
    }

    #[test]
    fn test_builders() {
        let op = Operation::command("cat", Vec::<String>::new())
            .with_stdin("hi")
            .with_env("A", "1");
        assert_eq!(op.stdin(), Some("hi"));
        match op {
            Operation::Command { env, .. } => assert_eq!(env, vec![("A".into(), "1".into())]),
            _ => panic!("expected command"),
        }

        let script = Operation::script(Language::Python, "print(1)");
        assert_eq!(script.label(), "python script");
        assert_eq!(script.stdin(), None);
    }
}
