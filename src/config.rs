//! Configuration parsing for govreg-dns

use crate::submission::BatchPolicy;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub struct Directive {
    pub name: String,
    pub args: Vec<String>,
    pub block: Vec<Directive>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// JSON snapshot backing the in-memory store; `None` keeps data in memory only.
    pub snapshot: Option<PathBuf>,
    pub batch_policy: BatchPolicy,
    pub cache_capacity: u64,
    pub cache_ttl: Duration,
    pub log_dir: PathBuf,
    pub log_keep: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            snapshot: Some(PathBuf::from("data/registry.json")),
            batch_policy: BatchPolicy::Atomic,
            cache_capacity: 10_000,
            cache_ttl: Duration::from_secs(300),
            log_dir: PathBuf::from("logs"),
            log_keep: 30,
        }
    }
}

#[derive(Debug, PartialEq)]
enum Token { Text(String), OpenBrace, CloseBrace, Newline }

impl Config {
    /// Load configuration from a file path. A missing file yields the defaults.
    pub fn load(path: &str) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).with_context(|| format!("invalid config file '{}'", path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(anyhow::anyhow!("Failed to read config file '{}': {}", path, e)),
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let tokens = Self::lex(content);
        let (sections, next_i) = Self::parse_block(&tokens, 0)?;
        if next_i < tokens.len() || Self::unbalanced(&tokens) {
            anyhow::bail!("unbalanced braces in config");
        }

        let mut cfg = Config::default();
        for section in &sections {
            match section.name.as_str() {
                "storage" => cfg.apply_storage(section)?,
                "submission" => cfg.apply_submission(section)?,
                "cache" => cfg.apply_cache(section)?,
                "log" => cfg.apply_log(section)?,
                other => anyhow::bail!("unknown config section '{}'", other),
            }
        }
        Ok(cfg)
    }

    fn apply_storage(&mut self, section: &Directive) -> Result<()> {
        for d in &section.block {
            match d.name.as_str() {
                "snapshot" => {
                    let arg = first_arg(d)?;
                    self.snapshot = match arg {
                        "none" | "memory" => None,
                        path => Some(PathBuf::from(path)),
                    };
                }
                other => anyhow::bail!("unknown directive '{}' in storage block", other),
            }
        }
        Ok(())
    }

    fn apply_submission(&mut self, section: &Directive) -> Result<()> {
        for d in &section.block {
            match d.name.as_str() {
                "batch_policy" => self.batch_policy = first_arg(d)?.parse()?,
                other => anyhow::bail!("unknown directive '{}' in submission block", other),
            }
        }
        Ok(())
    }

    fn apply_cache(&mut self, section: &Directive) -> Result<()> {
        for d in &section.block {
            match d.name.as_str() {
                "capacity" => {
                    self.cache_capacity = first_arg(d)?
                        .parse()
                        .with_context(|| "cache capacity must be a positive integer")?;
                }
                "ttl" => self.cache_ttl = parse_duration(first_arg(d)?)?,
                other => anyhow::bail!("unknown directive '{}' in cache block", other),
            }
        }
        Ok(())
    }

    fn apply_log(&mut self, section: &Directive) -> Result<()> {
        for d in &section.block {
            match d.name.as_str() {
                "dir" => self.log_dir = PathBuf::from(first_arg(d)?),
                "keep" => {
                    self.log_keep = first_arg(d)?
                        .parse()
                        .with_context(|| "log keep must be a number of days")?;
                }
                other => anyhow::bail!("unknown directive '{}' in log block", other),
            }
        }
        Ok(())
    }

    fn unbalanced(tokens: &[Token]) -> bool {
        let open = tokens.iter().filter(|t| **t == Token::OpenBrace).count();
        let close = tokens.iter().filter(|t| **t == Token::CloseBrace).count();
        open != close
    }

    fn lex(input: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut chars = input.chars().peekable();
        while let Some(&c) = chars.peek() {
            if c == '\n' { tokens.push(Token::Newline); chars.next(); }
            else if c.is_whitespace() { chars.next(); }
            else if c == '#' { while let Some(&c) = chars.peek() { if c == '\n' { break; } chars.next(); } }
            else if c == '{' { tokens.push(Token::OpenBrace); chars.next(); }
            else if c == '}' { tokens.push(Token::CloseBrace); chars.next(); }
            else if c == '"' {
                chars.next();
                let mut s = String::new();
                while let Some(&c) = chars.peek() { if c == '"' { chars.next(); break; } s.push(c); chars.next(); }
                tokens.push(Token::Text(s));
            } else {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '#' || c == '{' || c == '}' || c == '"' { break; }
                    s.push(c); chars.next();
                }
                tokens.push(Token::Text(s));
            }
        }
        tokens
    }

    /// Parse a sequence of directives starting at position i, up to the
    /// matching close brace or the end of input.
    fn parse_block(tokens: &[Token], mut i: usize) -> Result<(Vec<Directive>, usize)> {
        let mut directives = Vec::new();
        while i < tokens.len() {
            match &tokens[i] {
                Token::Newline => { i += 1; }
                Token::CloseBrace => { i += 1; return Ok((directives, i)); }
                Token::OpenBrace => anyhow::bail!("block without a directive name"),
                Token::Text(name) => {
                    let name = name.clone(); i += 1;
                    let mut args = Vec::new();
                    let mut block = Vec::new();
                    while i < tokens.len() {
                        match &tokens[i] {
                            Token::Text(arg) => { args.push(arg.clone()); i += 1; }
                            Token::OpenBrace => {
                                i += 1;
                                let (sub_block, next_i) = Self::parse_block(tokens, i)?;
                                block = sub_block; i = next_i; break;
                            }
                            Token::Newline | Token::CloseBrace => { break; }
                        }
                    }
                    directives.push(Directive { name, args, block });
                }
            }
        }
        Ok((directives, i))
    }
}

fn first_arg(d: &Directive) -> Result<&str> {
    d.args
        .first()
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("directive '{}' needs an argument", d.name))
}

fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Some(stripped) = s.strip_suffix("ms") { Ok(Duration::from_millis(stripped.parse()?)) }
    else if let Some(stripped) = s.strip_suffix('s') { Ok(Duration::from_secs(stripped.parse()?)) }
    else if let Some(stripped) = s.strip_suffix('m') { Ok(Duration::from_secs(stripped.parse::<u64>()? * 60)) }
    else if let Some(stripped) = s.strip_suffix('h') { Ok(Duration::from_secs(stripped.parse::<u64>()? * 3600)) }
    else { anyhow::bail!("invalid duration '{}'", s) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config() {
        let cfg = Config::parse(
            r#"
            # registry settings
            storage {
                snapshot "/var/lib/govreg/registry.json"
            }
            submission {
                batch_policy per_record
            }
            cache {
                capacity 500
                ttl 2m
            }
            log {
                dir /var/log/govreg
                keep 7
            }
            "#,
        )
        .unwrap();

        assert_eq!(cfg.snapshot, Some(PathBuf::from("/var/lib/govreg/registry.json")));
        assert_eq!(cfg.batch_policy, BatchPolicy::PerRecord);
        assert_eq!(cfg.cache_capacity, 500);
        assert_eq!(cfg.cache_ttl, Duration::from_secs(120));
        assert_eq!(cfg.log_dir, PathBuf::from("/var/log/govreg"));
        assert_eq!(cfg.log_keep, 7);
    }

    #[test]
    fn empty_config_is_default() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
        assert_eq!(Config::parse("# nothing here\n").unwrap(), Config::default());
    }

    #[test]
    fn snapshot_can_be_disabled() {
        let cfg = Config::parse("storage {\n snapshot none\n}").unwrap();
        assert_eq!(cfg.snapshot, None);
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!(Config::parse("forward {\n}").is_err());
        assert!(Config::parse("cache {\n size 5\n}").is_err());
        assert!(Config::parse("submission {\n batch_policy maybe\n}").is_err());
        assert!(Config::parse("cache {\n ttl\n}").is_err());
    }

    #[test]
    fn stray_close_brace_is_rejected() {
        assert!(Config::parse("cache {\n capacity 5\n}\n}").is_err());
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("10").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.conf");
        assert_eq!(Config::load(path.to_str().unwrap()).unwrap(), Config::default());
    }
}
