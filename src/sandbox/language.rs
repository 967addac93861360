//! Language profile registry.
//!
//! Maps a language identifier to the file name the submission is stored
//! under, the container image it runs in, and the shell command that
//! compiles and/or runs it.

use std::fmt;

use serde::Serialize;

/// Placeholder for a writable scratch directory in command templates.
///
/// Inside a container this is the `/tmp` tmpfs; in the fallback executor it
/// is a per-call directory next to the source file.
pub const BUILD_DIR_PLACEHOLDER: &str = "{build}";

/// A supported submission language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Java,
    Cpp,
    C,
    JavaScript,
    Go,
    Ruby,
    Bash,
}

impl Language {
    pub const ALL: [Language; 8] = [
        Language::Python,
        Language::Java,
        Language::Cpp,
        Language::C,
        Language::JavaScript,
        Language::Go,
        Language::Ruby,
        Language::Bash,
    ];

    /// Resolve a user-supplied language name.
    ///
    /// Unknown and empty names resolve to [`Language::Python`].
    pub fn resolve(name: &str) -> Language {
        match Self::parse(name) {
            Some(language) => language,
            None => Language::Python,
        }
    }

    /// Strict lookup used where the caller wants to know about the default.
    pub fn parse(name: &str) -> Option<Language> {
        let language = match name.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Language::Python,
            "java" => Language::Java,
            "cpp" | "c++" | "cxx" => Language::Cpp,
            "c" => Language::C,
            "javascript" | "js" | "node" | "nodejs" => Language::JavaScript,
            "go" | "golang" => Language::Go,
            "ruby" | "rb" => Language::Ruby,
            "bash" | "sh" => Language::Bash,
            _ => return None,
        };
        Some(language)
    }

    /// Canonical name, also the key for image overrides in the config file.
    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::C => "c",
            Language::JavaScript => "javascript",
            Language::Go => "go",
            Language::Ruby => "ruby",
            Language::Bash => "bash",
        }
    }

    pub fn profile(&self) -> LanguageProfile {
        let (source_filename, image, run_command_template) = match self {
            Language::Python => ("main.py", "python:3.11-slim", "python3 -u main.py"),
            Language::Java => (
                "Main.java",
                "eclipse-temurin:17-jdk",
                "javac -d {build} Main.java && java -cp {build} Main",
            ),
            Language::Cpp => (
                "main.cpp",
                "gcc:13",
                "g++ -O2 -std=c++17 -o {build}/main main.cpp && {build}/main",
            ),
            Language::C => (
                "main.c",
                "gcc:13",
                "gcc -O2 -std=c11 -o {build}/main main.c -lm && {build}/main",
            ),
            Language::JavaScript => ("main.js", "node:20-slim", "node main.js"),
            Language::Go => (
                "main.go",
                "golang:1.22-alpine",
                "GOCACHE={build}/cache GOPATH={build}/go go build -o {build}/main main.go && {build}/main",
            ),
            Language::Ruby => ("main.rb", "ruby:3.3-slim", "ruby main.rb"),
            Language::Bash => ("main.sh", "bash:5", "bash main.sh"),
        };

        LanguageProfile {
            language: *self,
            source_filename,
            image,
            run_command_template,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// File name and run command convention for one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageProfile {
    pub language: Language,
    pub source_filename: &'static str,
    /// Default container image; the Docker runtime may override it.
    pub image: &'static str,
    /// Shell command run from the directory holding the source file.
    pub run_command_template: &'static str,
}

impl LanguageProfile {
    /// Render the command with `{build}` pointing at `build_dir`.
    pub fn run_command(&self, build_dir: &str) -> String {
        self.run_command_template
            .replace(BUILD_DIR_PLACEHOLDER, build_dir)
    }
}

/// Resolve a language name to its profile. Never fails.
pub fn resolve(language: &str) -> LanguageProfile {
    Language::resolve(language).profile()
}
