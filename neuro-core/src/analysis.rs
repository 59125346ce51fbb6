//! Lightweight source heuristics used by the code-oriented task handlers.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::sandbox::Language;

pub const MEMORY_LEAK_WARNING: &str =
    "WARNING: Potential memory leak: memory is allocated but never freed.";
pub const BUFFER_OVERFLOW_WARNING: &str = "WARNING: Potential buffer overflow: unbounded string \
     copy detected; prefer strncpy, strncat or snprintf.";
pub const DYNAMIC_EVAL_WARNING: &str =
    "WARNING: Use of eval() or exec() detected: arbitrary code execution risk.";

static ALLOC_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:malloc|calloc|realloc)\s*\(").unwrap());
static FREE_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bfree\s*\(").unwrap());
static UNBOUNDED_COPY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:strcpy|strcat|sprintf)\s*\(").unwrap());
static BOUNDED_COPY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:strncpy|strncat|snprintf)\s*\(").unwrap());
static DYNAMIC_EVAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:eval|exec)\s*\(").unwrap());
static C_ENTRY_POINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:int|void)\s+main\s*\(").unwrap());
static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```[A-Za-z0-9_+#-]*[^\S\n]*\n?([\s\S]*?)```").unwrap());

static PROMPT_JS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:javascript|js|node(?:\.js)?|typescript)\b").unwrap());
static PROMPT_CPP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)c\+\+|\bcpp\b").unwrap());
static PROMPT_JAVA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bjava\b").unwrap());
static PROMPT_PYTHON: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bpython\b").unwrap());
static PROMPT_RUST: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\brust\b").unwrap());
static PROMPT_GO: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(?:golang|go)\b").unwrap());

/// Target language named in a natural-language request. Defaults to C.
pub fn detect_language_from_prompt(prompt: &str) -> Language {
    if PROMPT_PYTHON.is_match(prompt) {
        Language::Python
    } else if PROMPT_JS.is_match(prompt) {
        Language::JavaScript
    } else if PROMPT_CPP.is_match(prompt) {
        Language::Cpp
    } else if PROMPT_JAVA.is_match(prompt) {
        Language::Java
    } else if PROMPT_RUST.is_match(prompt) {
        Language::Rust
    } else if PROMPT_GO.is_match(prompt) {
        Language::Go
    } else {
        Language::C
    }
}

/// Best guess at the language of a source snippet. Defaults to C.
pub fn detect_language_from_code(code: &str) -> Language {
    if let Some(first) = code.trim_start().lines().next() {
        if first.starts_with("#!") {
            if first.contains("python") {
                return Language::Python;
            }
            if first.contains("node") {
                return Language::JavaScript;
            }
        }
    }

    if code.contains("fn main") || code.contains("let mut ") || code.contains("println!") {
        Language::Rust
    } else if code.contains("package main") || code.contains("func main") {
        Language::Go
    } else if code.contains("public class") || code.contains("System.out") {
        Language::Java
    } else if code.contains("#include <iostream>") || code.contains("std::") {
        Language::Cpp
    } else if code.contains("#include") || C_ENTRY_POINT.is_match(code) {
        Language::C
    } else if code.contains("def ") || code.contains("import ") || code.contains("print(") {
        Language::Python
    } else if code.contains("function ")
        || code.contains("const ")
        || code.contains("let ")
        || code.contains("console.log")
    {
        Language::JavaScript
    } else {
        Language::C
    }
}

/// Pattern-based findings reported ahead of the model's own analysis.
pub fn static_warnings(code: &str, language: Language) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    match language {
        Language::C | Language::Cpp => {
            if ALLOC_CALL.is_match(code) && !FREE_CALL.is_match(code) {
                warnings.push(MEMORY_LEAK_WARNING);
            }
            // Silent once any bounded variant appears.
            if UNBOUNDED_COPY.is_match(code) && !BOUNDED_COPY.is_match(code) {
                warnings.push(BUFFER_OVERFLOW_WARNING);
            }
        }
        Language::Python => {
            if DYNAMIC_EVAL.is_match(code) {
                warnings.push(DYNAMIC_EVAL_WARNING);
            }
        }
        _ => {}
    }
    warnings
}

/// Body of the first fenced block. An unterminated fence (generation stopped on the closing
/// marker) yields everything after the opening line; text without a fence is returned trimmed.
pub fn extract_code_block(text: &str) -> String {
    if let Some(body) = CODE_FENCE.captures(text).and_then(|c| c.get(1)) {
        return body.as_str().trim_end().to_string();
    }
    if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
        return body.trim_end().to_string();
    }
    text.trim().to_string()
}
