//! Configuration loading: a UCL-like sectioned file plus the proxy
//! environment variables.
//!
//! The file is a sequence of named sections holding key/value pairs:
//!
//! ```text
//! "defaults" : {
//!     "host" : "git.example.org",
//!     "port" : 443,
//!     "work_directory" : "/var/db/treeup",
//! }
//!
//! "ports" : {
//!     "branch"            : "main",
//!     "repository_path"   : "/ports.git",
//!     "target_directory"  : "/usr/ports",
//!     "ignores"           : [ "distfiles", "packages" ],
//! }
//! ```
//!
//! `defaults` applies first, then the section named on the command line.
//! Separators (`:`, `=`, `,`, `;`) are interchangeable and values may be
//! quoted or bare; `#` starts a comment.

use std::path::{Path, PathBuf};

use treeup_transport::{ProxyConfig, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot load {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path}:{line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error(
        "cannot find [{section}] in the configuration file; these are the \
         configured sections:\n{available}"
    )]
    UnknownSection { section: String, available: String },

    #[error("no {key} found in [{section}]")]
    MissingKey {
        key: &'static str,
        section: String,
    },

    #[error("bad value '{value}' for {key}")]
    BadValue { key: String, value: String },

    #[error(transparent)]
    Proxy(#[from] TransportError),
}

/// The resolved options for one section.
#[derive(Debug, Clone)]
pub struct Config {
    pub branch: String,
    pub display_depth: u32,
    pub host: String,
    pub ignores: Vec<PathBuf>,
    pub low_memory: bool,
    pub port: u16,
    pub proxy: Option<ProxyConfig>,
    pub repository_path: String,
    pub target_directory: PathBuf,
    pub verbosity: u8,
    pub work_directory: PathBuf,
}

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Array(Vec<String>),
}

#[derive(Debug, Default)]
struct RawSection {
    pairs: Vec<(String, Value)>,
}

impl Config {
    /// Load `section` from the file at `path`, overlaying it on the
    /// `defaults` section and the proxy environment.
    pub fn load(path: &Path, section: &str) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let sections = parse_sections(&text, path)?;

        if !sections.iter().any(|(name, _)| name == section) {
            let available = sections
                .iter()
                .filter(|(name, _)| name != "defaults")
                .map(|(name, _)| format!("\t * {name}"))
                .collect::<Vec<_>>()
                .join("\n");
            return Err(ConfigError::UnknownSection {
                section: section.to_string(),
                available,
            });
        }

        let mut builder = Builder::default();
        for (name, raw) in &sections {
            if name == "defaults" || name == section {
                builder.apply(raw)?;
            }
        }
        builder.finish(section)
    }
}

#[derive(Debug, Default)]
struct Builder {
    branch: Option<String>,
    display_depth: Option<u32>,
    host: Option<String>,
    ignores: Vec<String>,
    low_memory: bool,
    port: Option<u16>,
    proxy_host: Option<String>,
    proxy_port: Option<u16>,
    proxy_username: Option<String>,
    proxy_password: Option<String>,
    repository_path: Option<String>,
    target_directory: Option<String>,
    verbosity: Option<u8>,
    work_directory: Option<String>,
}

impl Builder {
    fn apply(&mut self, section: &RawSection) -> Result<(), ConfigError> {
        for (key, value) in &section.pairs {
            match (key.as_str(), value) {
                ("branch", Value::Text(v)) => self.branch = Some(v.clone()),
                ("display_depth", Value::Text(v)) => {
                    self.display_depth = Some(parse_number(key, v)?)
                }
                ("host", Value::Text(v)) => self.host = Some(v.clone()),
                ("ignore" | "ignores", Value::Array(list)) => {
                    self.ignores.extend(list.iter().cloned())
                }
                ("ignore" | "ignores", Value::Text(v)) => self.ignores.push(v.clone()),
                ("low_memory", Value::Text(v)) => self.low_memory = parse_bool(key, v)?,
                ("port", Value::Text(v)) => self.port = Some(parse_number(key, v)?),
                ("proxy_host", Value::Text(v)) => self.proxy_host = Some(v.clone()),
                ("proxy_port", Value::Text(v)) => self.proxy_port = Some(parse_number(key, v)?),
                ("proxy_username", Value::Text(v)) => self.proxy_username = Some(v.clone()),
                ("proxy_password", Value::Text(v)) => self.proxy_password = Some(v.clone()),
                ("repository" | "repository_path", Value::Text(v)) => {
                    self.repository_path = Some(v.clone())
                }
                ("target" | "target_directory", Value::Text(v)) => {
                    self.target_directory = Some(v.clone())
                }
                ("verbosity", Value::Text(v)) => self.verbosity = Some(parse_number(key, v)?),
                ("work_directory", Value::Text(v)) => self.work_directory = Some(v.clone()),
                // Unknown keys and mistyped values are ignored, like any
                // other unrecognized option.
                _ => {}
            }
        }
        Ok(())
    }

    fn finish(self, section: &str) -> Result<Config, ConfigError> {
        let missing = |key: &'static str| ConfigError::MissingKey {
            key,
            section: section.to_string(),
        };

        let branch = self.branch.ok_or_else(|| missing("branch"))?;
        let host = self.host.ok_or_else(|| missing("host"))?;
        let port = self.port.ok_or_else(|| missing("port"))?;
        let repository = self.repository_path.ok_or_else(|| missing("repository"))?;
        let target = self.target_directory.ok_or_else(|| missing("target path"))?;
        let work = self.work_directory.ok_or_else(|| missing("work directory"))?;

        // Normalizations: repository paths are absolute on the server,
        // the target never keeps a trailing slash.
        let repository_path = if repository.starts_with('/') {
            repository
        } else {
            format!("/{repository}")
        };
        let target_directory = PathBuf::from(target.trim_end_matches('/'));

        // Relative ignore entries are anchored at the target.
        let ignores = self
            .ignores
            .iter()
            .map(|entry| {
                if entry.starts_with('/') {
                    PathBuf::from(entry)
                } else {
                    target_directory.join(entry)
                }
            })
            .collect();

        // File-configured proxy first, then the environment on top.
        let mut proxy = self.proxy_host.map(|host| ProxyConfig {
            host,
            port: self.proxy_port.unwrap_or(0),
            username: self.proxy_username,
            password: self.proxy_password,
        });
        for variable in ["HTTP_PROXY", "HTTPS_PROXY"] {
            if let Ok(value) = std::env::var(variable) {
                if let Some(from_env) = ProxyConfig::from_env_value(&value)? {
                    let (username, password) = match from_env.username {
                        Some(_) => (from_env.username, from_env.password),
                        None => match &proxy {
                            Some(p) => (p.username.clone(), p.password.clone()),
                            None => (None, None),
                        },
                    };
                    proxy = Some(ProxyConfig {
                        host: from_env.host,
                        port: from_env.port,
                        username,
                        password,
                    });
                }
            }
        }

        Ok(Config {
            branch,
            display_depth: self.display_depth.unwrap_or(0),
            host,
            ignores,
            low_memory: self.low_memory,
            port,
            proxy,
            repository_path,
            target_directory,
            verbosity: self.verbosity.unwrap_or(1),
            work_directory: PathBuf::from(work),
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::BadValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::BadValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Percent-encode every non-alphanumeric byte, for use as a filename.
pub fn encode_section(section: &str) -> String {
    let mut out = String::with_capacity(section.len());
    for &b in section.as_bytes() {
        if b.is_ascii_alphanumeric() {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:X}"));
        }
    }
    out
}

// --- file parsing ---------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Token {
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Text(String),
}

fn parse_sections(
    text: &str,
    path: &Path,
) -> Result<Vec<(String, RawSection)>, ConfigError> {
    let tokens = tokenize(text, path)?;
    let mut sections = Vec::new();
    let mut cursor = tokens.into_iter().peekable();

    let parse_err = |line: usize, reason: &str| ConfigError::Parse {
        path: path.to_path_buf(),
        line,
        reason: reason.to_string(),
    };

    while let Some((line, token)) = cursor.next() {
        let Token::Text(name) = token else {
            return Err(parse_err(line, "expected a section name"));
        };
        match cursor.next() {
            Some((_, Token::LBrace)) => {}
            other => {
                let line = other.map(|(l, _)| l).unwrap_or(line);
                return Err(parse_err(line, "expected '{' after section name"));
            }
        }

        let mut section = RawSection::default();
        loop {
            match cursor.next() {
                Some((_, Token::RBrace)) => break,
                Some((line, Token::Text(key))) => {
                    let value = match cursor.next() {
                        Some((_, Token::Text(value))) => Value::Text(value),
                        Some((line, Token::LBracket)) => {
                            let mut items = Vec::new();
                            loop {
                                match cursor.next() {
                                    Some((_, Token::RBracket)) => break,
                                    Some((_, Token::Text(item))) => items.push(item),
                                    _ => {
                                        return Err(parse_err(line, "unterminated array"));
                                    }
                                }
                            }
                            Value::Array(items)
                        }
                        _ => return Err(parse_err(line, "expected a value")),
                    };
                    section.pairs.push((key, value));
                }
                Some((line, _)) => return Err(parse_err(line, "expected a key")),
                None => return Err(parse_err(line, "unterminated section")),
            }
        }
        sections.push((name, section));
    }

    Ok(sections)
}

fn tokenize(text: &str, path: &Path) -> Result<Vec<(usize, Token)>, ConfigError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1usize;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            // Separators are interchangeable and optional.
            ':' | '=' | ',' | ';' => {
                chars.next();
            }
            '#' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '{' => {
                tokens.push((line, Token::LBrace));
                chars.next();
            }
            '}' => {
                tokens.push((line, Token::RBrace));
                chars.next();
            }
            '[' => {
                tokens.push((line, Token::LBracket));
                chars.next();
            }
            ']' => {
                tokens.push((line, Token::RBracket));
                chars.next();
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => text.push(escaped),
                            None => {
                                return Err(ConfigError::Parse {
                                    path: path.to_path_buf(),
                                    line,
                                    reason: "unterminated string".into(),
                                })
                            }
                        },
                        Some('\n') => {
                            return Err(ConfigError::Parse {
                                path: path.to_path_buf(),
                                line,
                                reason: "unterminated string".into(),
                            })
                        }
                        Some(c) => text.push(c),
                        None => {
                            return Err(ConfigError::Parse {
                                path: path.to_path_buf(),
                                line,
                                reason: "unterminated string".into(),
                            })
                        }
                    }
                }
                tokens.push((line, Token::Text(text)));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || "{}[]:=,;#\"".contains(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push((line, Token::Text(word)));
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("treeup.conf");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    const SAMPLE: &str = r#"
# Global options.
"defaults" : {
    "host"           : "git.example.org",
    "port"           : 443,
    "verbosity"      : 1,
    "work_directory" : "/var/db/treeup",
}

"ports" : {
    "branch"           : "quarterly",
    "repository_path"  : "/ports.git",
    "target_directory" : "/usr/ports/",
    "display_depth"    : "2",
    "low_memory"       : true,
    "ignores" : [
        "distfiles",
        "/usr/ports/packages",
    ],
}
"#;

    #[test]
    fn loads_section_over_defaults() {
        let (_dir, path) = write_config(SAMPLE);
        let config = Config::load(&path, "ports").unwrap();

        assert_eq!(config.host, "git.example.org");
        assert_eq!(config.port, 443);
        assert_eq!(config.branch, "quarterly");
        assert_eq!(config.repository_path, "/ports.git");
        assert_eq!(config.target_directory, PathBuf::from("/usr/ports"));
        assert_eq!(config.display_depth, 2);
        assert!(config.low_memory);
        assert_eq!(
            config.ignores,
            vec![
                PathBuf::from("/usr/ports/distfiles"),
                PathBuf::from("/usr/ports/packages"),
            ]
        );
    }

    #[test]
    fn bare_words_and_equals_are_accepted() {
        let (_dir, path) = write_config(
            "defaults { host = git.example.org; port = 443; work_directory = /db }\n\
             src { branch = main, repository = src.git, target = /usr/src }\n",
        );
        let config = Config::load(&path, "src").unwrap();
        assert_eq!(config.branch, "main");
        // A bare repository name gains its leading slash.
        assert_eq!(config.repository_path, "/src.git");
        assert_eq!(config.target_directory, PathBuf::from("/usr/src"));
    }

    #[test]
    fn unknown_section_lists_configured_ones() {
        let (_dir, path) = write_config(SAMPLE);
        match Config::load(&path, "nonesuch").unwrap_err() {
            ConfigError::UnknownSection { available, .. } => {
                assert!(available.contains("ports"));
                assert!(!available.contains("defaults"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_required_key_names_it() {
        let (_dir, path) = write_config(
            "src { host = h, port = 443, repository = /r, target = /t, work_directory = /w }\n",
        );
        match Config::load(&path, "src").unwrap_err() {
            ConfigError::MissingKey { key: "branch", .. } => {}
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn section_encoding_for_filenames() {
        assert_eq!(encode_section("ports"), "ports");
        assert_eq!(encode_section("release/14.1"), "release%2F14%2E1");
    }

    #[test]
    fn proxy_environment_overrides_file() {
        let (_dir, path) = write_config(
            "src { branch = main, host = h, port = 443, repository = /r, \
             target = /t, work_directory = /w, proxy_host = filehost, \
             proxy_port = 1080 }\n",
        );
        // Environment access is process-global; run the variants in one
        // test to avoid interference.
        std::env::set_var("HTTP_PROXY", "http://alice:pw@envhost:3128");
        let config = Config::load(&path, "src").unwrap();
        std::env::remove_var("HTTP_PROXY");

        let proxy = config.proxy.unwrap();
        assert_eq!(proxy.host, "envhost");
        assert_eq!(proxy.port, 3128);
        assert_eq!(proxy.username.as_deref(), Some("alice"));

        let config = Config::load(&path, "src").unwrap();
        let proxy = config.proxy.unwrap();
        assert_eq!(proxy.host, "filehost");
        assert_eq!(proxy.port, 1080);
    }
}
