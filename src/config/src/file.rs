// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::ConfigError;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const MAX_INCLUDE_DEPTH: usize = 5;

/// One configuration line: a key and its parameter vector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigEntry {
    pub key: String,
    pub params: Vec<String>,
}

/// An ordered multi-map of configuration entries.
#[derive(Clone, Debug, Default)]
pub struct ConfigFile {
    entries: Vec<ConfigEntry>,
}

enum State {
    Start,
    Comment,
    Key,
    Args,
    ArgsEscape,
    Token,
    TokenEscape,
    QuotedString,
    QuotedEscape,
}

impl ConfigFile {
    /// Load and parse a configuration file, splicing `include` directives
    /// relative to the including file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("loading configuration {:?}", path);

        let mut entries = Vec::new();
        read_into(path, 0, &mut entries)?;
        Ok(Self { entries })
    }

    /// Parse configuration text. `include` directives are resolved relative
    /// to the current directory.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let mut entries = Vec::new();
        parse_into(input, Path::new("."), 0, &mut entries)?;
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    /// All entries for `key`, in file order.
    pub fn entries_for<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a ConfigEntry> {
        self.entries.iter().filter(move |e| e.key == key)
    }

    /// The first parameter of the first entry for `key`, if any.
    pub fn value<'a>(&'a self, key: &'a str) -> Option<&'a str> {
        self.entries_for(key)
            .find(|e| !e.params.is_empty())
            .map(|e| e.params[0].as_str())
    }

    /// Parse the first value for `key` into `T`, falling back to `default`
    /// when the key is absent.
    pub fn parsed_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.value(key) {
            Some(v) => v.parse().map_err(|_| ConfigError::BadValue {
                key: key.to_owned(),
                value: v.to_owned(),
            }),
            None => Ok(default),
        }
    }

    /// Boolean lookup accepting `0/1`, `true/false`, `yes/no`.
    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.value(key) {
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => Ok(true),
                "0" | "false" | "no" => Ok(false),
                _ => Err(ConfigError::BadValue {
                    key: key.to_owned(),
                    value: v.to_owned(),
                }),
            },
            None => Ok(default),
        }
    }
}

fn read_into(path: &Path, depth: usize, entries: &mut Vec<ConfigEntry>) -> Result<(), ConfigError> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(ConfigError::IncludeDepth(MAX_INCLUDE_DEPTH));
    }

    let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    parse_into(&input, base, depth, entries)
}

fn parse_into(
    input: &str,
    base: &Path,
    depth: usize,
    entries: &mut Vec<ConfigEntry>,
) -> Result<(), ConfigError> {
    let mut state = State::Start;
    let mut line = 1usize;
    let mut key = String::new();
    let mut token = String::new();
    let mut params: Vec<String> = Vec::new();

    // a trailing newline simplifies end-of-entry handling
    for ch in input.chars().chain(std::iter::once('\n')) {
        state = match state {
            State::Start => match ch {
                '#' => State::Comment,
                c if c.is_whitespace() => State::Start,
                c => {
                    key.push(c);
                    State::Key
                }
            },

            State::Comment => {
                if ch == '\n' {
                    State::Start
                } else {
                    State::Comment
                }
            }

            State::Key => match ch {
                '\n' => {
                    finish_entry(&mut key, &mut params, base, depth, entries, line)?;
                    State::Start
                }
                '#' => {
                    finish_entry(&mut key, &mut params, base, depth, entries, line)?;
                    State::Comment
                }
                c if c.is_whitespace() => State::Args,
                c => {
                    key.push(c);
                    State::Key
                }
            },

            State::Args => match ch {
                '\n' => {
                    finish_entry(&mut key, &mut params, base, depth, entries, line)?;
                    State::Start
                }
                '#' => {
                    finish_entry(&mut key, &mut params, base, depth, entries, line)?;
                    State::Comment
                }
                '\\' => State::ArgsEscape,
                '"' => State::QuotedString,
                c if c.is_whitespace() => State::Args,
                c => {
                    token.push(c);
                    State::Token
                }
            },

            // a backslash before a newline continues the entry on the next
            // line; before anything else it starts a token with that char
            State::ArgsEscape => match ch {
                '\n' => State::Args,
                c => {
                    token.push(c);
                    State::Token
                }
            },

            State::Token => match ch {
                '\n' => {
                    params.push(std::mem::take(&mut token));
                    finish_entry(&mut key, &mut params, base, depth, entries, line)?;
                    State::Start
                }
                '#' => {
                    params.push(std::mem::take(&mut token));
                    finish_entry(&mut key, &mut params, base, depth, entries, line)?;
                    State::Comment
                }
                '\\' => State::TokenEscape,
                c if c.is_whitespace() => {
                    params.push(std::mem::take(&mut token));
                    State::Args
                }
                c => {
                    token.push(c);
                    State::Token
                }
            },

            State::TokenEscape => {
                token.push(ch);
                State::Token
            }

            State::QuotedString => match ch {
                '"' => {
                    params.push(std::mem::take(&mut token));
                    State::Args
                }
                '\\' => State::QuotedEscape,
                '\n' => {
                    return Err(ConfigError::Parse {
                        line,
                        reason: "unterminated quoted string",
                    })
                }
                c => {
                    token.push(c);
                    State::QuotedString
                }
            },

            State::QuotedEscape => {
                token.push(ch);
                State::QuotedString
            }
        };

        if ch == '\n' {
            line += 1;
        }
    }

    match state {
        State::Start | State::Comment => Ok(()),
        _ => Err(ConfigError::Parse {
            line,
            reason: "truncated entry at end of input",
        }),
    }
}

fn finish_entry(
    key: &mut String,
    params: &mut Vec<String>,
    base: &Path,
    depth: usize,
    entries: &mut Vec<ConfigEntry>,
    line: usize,
) -> Result<(), ConfigError> {
    let key = std::mem::take(key);
    let params = std::mem::take(params);

    if key == "include" {
        if params.len() != 1 {
            return Err(ConfigError::Parse {
                line,
                reason: "include takes exactly one file",
            });
        }
        let mut target = PathBuf::from(&params[0]);
        if target.is_relative() {
            target = base.join(target);
        }
        return read_into(&target, depth + 1, entries);
    }

    entries.push(ConfigEntry { key, params });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keys_and_params() {
        let config = ConfigFile::parse("MinThreads 5\nListen 127.0.0.1 8000\n").unwrap();

        assert_eq!(config.entries().len(), 2);
        assert_eq!(config.value("MinThreads"), Some("5"));

        let listen: Vec<_> = config.entries_for("Listen").collect();
        assert_eq!(listen[0].params, vec!["127.0.0.1", "8000"]);
    }

    #[test]
    fn repeated_keys_preserve_order() {
        let config = ConfigFile::parse(
            "MapUrl ^/a$ first\n\
             MapUrl ^/b$ second\n\
             MapUrl ^/c$ third\n",
        )
        .unwrap();

        let components: Vec<_> = config
            .entries_for("MapUrl")
            .map(|e| e.params[1].as_str())
            .collect();
        assert_eq!(components, vec!["first", "second", "third"]);
    }

    #[test]
    fn comments_and_blank_lines_skipped() {
        let config = ConfigFile::parse(
            "# a comment\n\
             \n\
             MinThreads 5 # trailing comment\n\
             MaxThreads 10\n",
        )
        .unwrap();

        assert_eq!(config.value("MinThreads"), Some("5"));
        assert_eq!(config.value("MaxThreads"), Some("10"));
        assert_eq!(config.entries().len(), 2);
    }

    #[test]
    fn quoted_params_keep_whitespace() {
        let config =
            ConfigFile::parse("DefaultContentType \"text/html; charset=UTF-8\"\n").unwrap();
        assert_eq!(
            config.value("DefaultContentType"),
            Some("text/html; charset=UTF-8")
        );
    }

    #[test]
    fn escaped_characters() {
        let config = ConfigFile::parse("SetEnv PATH /usr/lo\\ cal\nKey \"a \\\"b\\\"\"\n").unwrap();

        let entry = config.entries_for("SetEnv").next().unwrap();
        assert_eq!(entry.params, vec!["PATH", "/usr/lo cal"]);

        assert_eq!(config.value("Key"), Some("a \"b\""));
    }

    #[test]
    fn continuation_line() {
        let config = ConfigFile::parse("MapUrl ^/x$ \\\n  component\n").unwrap();
        let entry = config.entries_for("MapUrl").next().unwrap();
        assert_eq!(entry.params, vec!["^/x$", "component"]);
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        assert!(matches!(
            ConfigFile::parse("Key \"oops\n"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_value_falls_back() {
        let config = ConfigFile::parse("").unwrap();
        assert_eq!(config.parsed_or("QueueSize", 1000usize).unwrap(), 1000);
        assert!(config.bool_or("EnableCompression", true).unwrap());
    }

    #[test]
    fn bad_numeric_value_is_an_error() {
        let config = ConfigFile::parse("QueueSize lots\n").unwrap();
        assert!(matches!(
            config.parsed_or("QueueSize", 0usize),
            Err(ConfigError::BadValue { .. })
        ));
    }

    #[test]
    fn include_splices_entries() {
        let dir = std::env::temp_dir().join(format!("tern-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("extra.conf"), "MaxThreads 20\n").unwrap();
        std::fs::write(dir.join("main.conf"), "MinThreads 2\ninclude extra.conf\n").unwrap();

        let config = ConfigFile::load(dir.join("main.conf")).unwrap();
        assert_eq!(config.value("MinThreads"), Some("2"));
        assert_eq!(config.value("MaxThreads"), Some("20"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
