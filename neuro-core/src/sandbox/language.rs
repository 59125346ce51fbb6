use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::CoreError;

static JAVA_PUBLIC_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"public\s+(?:final\s+|abstract\s+)*class\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap()
});

/// Languages the sandbox knows how to build and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
    Python,
    JavaScript,
    Java,
    Rust,
    Go,
}

impl Language {
    pub const ALL: [Language; 7] = [
        Language::C,
        Language::Cpp,
        Language::Python,
        Language::JavaScript,
        Language::Java,
        Language::Rust,
        Language::Go,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Java => "java",
            Language::Rust => "rust",
            Language::Go => "go",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Python => "py",
            Language::JavaScript => "js",
            Language::Java => "java",
            Language::Rust => "rs",
            Language::Go => "go",
        }
    }

    /// Whether a build step precedes the run step.
    pub fn is_compiled(&self) -> bool {
        !matches!(self, Language::Python | Language::JavaScript)
    }

    /// Executable that must be on PATH for the first step.
    pub fn toolchain(&self) -> &'static str {
        match self {
            Language::C => "gcc",
            Language::Cpp => "g++",
            Language::Python => "python3",
            Language::JavaScript => "node",
            Language::Java => "javac",
            Language::Rust => "rustc",
            Language::Go => "go",
        }
    }

    /// Name of the scratch source file. Java requires it to match the public class.
    pub fn source_file_name(&self, source: &str) -> String {
        match self {
            Language::Java => format!("{}.java", java_class_name(source)),
            other => format!("main.{}", other.file_extension()),
        }
    }

    /// Argument vectors to run, in order, for a source file in `workdir`.
    pub fn command_plan(&self, source: &str, src: &Path, workdir: &Path) -> Vec<CommandSpec> {
        let bin = workdir.join("program");
        match self {
            Language::C => vec![
                CommandSpec::new("gcc", [os("-Wall"), os("-o"), bin.clone().into(), src.into()]),
                CommandSpec::new(bin, Vec::<OsString>::new()),
            ],
            Language::Cpp => vec![
                CommandSpec::new(
                    "g++",
                    [
                        os("-Wall"),
                        os("-std=c++17"),
                        os("-o"),
                        bin.clone().into(),
                        src.into(),
                    ],
                ),
                CommandSpec::new(bin, Vec::<OsString>::new()),
            ],
            Language::Rust => vec![
                CommandSpec::new("rustc", [os("-o"), bin.clone().into(), src.into()]),
                CommandSpec::new(bin, Vec::<OsString>::new()),
            ],
            Language::Go => vec![
                CommandSpec::new("go", [os("build"), os("-o"), bin.clone().into(), src.into()]),
                CommandSpec::new(bin, Vec::<OsString>::new()),
            ],
            Language::Java => {
                let classes = workdir.join("classes");
                vec![
                    CommandSpec::new("javac", [os("-d"), classes.clone().into(), src.into()]),
                    CommandSpec::new(
                        "java",
                        [os("-cp"), classes.into(), os(&java_class_name(source))],
                    ),
                ]
            }
            Language::Python => vec![CommandSpec::new("python3", [src])],
            Language::JavaScript => vec![CommandSpec::new("node", [src])],
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = CoreError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "c" => Ok(Language::C),
            "cpp" | "c++" | "cxx" => Ok(Language::Cpp),
            "python" | "python3" | "py" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            "java" => Ok(Language::Java),
            "rust" | "rs" => Ok(Language::Rust),
            "go" | "golang" => Ok(Language::Go),
            _ => Err(CoreError::UnsupportedLanguage(tag.to_string())),
        }
    }
}

/// One process to spawn: a program and its argument vector. No shell is involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl CommandSpec {
    pub fn new<P, I, A>(program: P, args: I) -> Self
    where
        P: Into<OsString>,
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

fn os(s: &str) -> OsString {
    OsString::from(s)
}

fn java_class_name(source: &str) -> String {
    JAVA_PUBLIC_CLASS
        .captures(source)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "Main".to_string())
}
