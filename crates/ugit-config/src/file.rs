//! Single INI file: parse, lookup, mutate, serialize.

use bstr::{BStr, BString, ByteSlice};

use crate::ConfigError;

/// One `key = value` assignment with its canonical lookup key.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    /// `section.key` or `section.subsection.key`; section and variable
    /// lowercased, subsection verbatim.
    key: String,
    value: BString,
}

/// A parsed configuration file. Assignment order is preserved; later
/// assignments of the same key shadow earlier ones on single-value lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    entries: Vec<Entry>,
}

impl ConfigFile {
    pub fn parse(data: &[u8]) -> Result<Self, ConfigError> {
        let mut entries = Vec::new();
        let mut section: Option<String> = None;

        for (line_no, raw_line) in data.lines().enumerate() {
            let line = strip_comment(raw_line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if line.starts_with(b"[") {
                section = Some(parse_section_header(line, line_no + 1)?);
                continue;
            }

            let section = section.as_ref().ok_or(ConfigError::Parse {
                line: line_no + 1,
                reason: "assignment before any section header".into(),
            })?;

            let (name, value) = match line.find_byte(b'=') {
                Some(eq) => {
                    let name = line[..eq].trim();
                    let value = parse_value(line[eq + 1..].trim());
                    (name, value)
                }
                // A bare name means boolean true.
                None => (line, BString::from("true")),
            };

            let name = std::str::from_utf8(name)
                .map_err(|_| ConfigError::Parse {
                    line: line_no + 1,
                    reason: "non-UTF8 variable name".into(),
                })?
                .to_ascii_lowercase();
            if name.is_empty() {
                return Err(ConfigError::Parse {
                    line: line_no + 1,
                    reason: "empty variable name".into(),
                });
            }

            entries.push(Entry {
                key: format!("{section}.{name}"),
                value,
            });
        }

        Ok(Self { entries })
    }

    /// Last value assigned to `key` in this file.
    pub fn get(&self, key: &str) -> Option<&BStr> {
        let canonical = canonicalize(key);
        self.entries
            .iter()
            .rev()
            .find(|e| e.key == canonical)
            .map(|e| e.value.as_bstr())
    }

    /// All values for `key`, in file order.
    pub fn get_all(&self, key: &str) -> Vec<&BStr> {
        let canonical = canonicalize(key);
        self.entries
            .iter()
            .filter(|e| e.key == canonical)
            .map(|e| e.value.as_bstr())
            .collect()
    }

    /// Replace (or append) the single value of `key`.
    pub fn set(&mut self, key: &str, value: impl Into<BString>) {
        let canonical = canonicalize(key);
        let value = value.into();
        match self.entries.iter_mut().rev().find(|e| e.key == canonical) {
            Some(entry) => entry.value = value,
            None => self.entries.push(Entry {
                key: canonical,
                value,
            }),
        }
    }

    /// Remove every assignment of `key`; reports whether any existed.
    pub fn unset(&mut self, key: &str) -> bool {
        let canonical = canonicalize(key);
        let before = self.entries.len();
        self.entries.retain(|e| e.key != canonical);
        self.entries.len() != before
    }

    /// Render back to INI, grouping consecutive same-section entries.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut current_section: Option<String> = None;

        for entry in &self.entries {
            let (section, name) = split_key(&entry.key);
            if current_section.as_deref() != Some(section.as_str()) {
                write_section_header(&mut out, &section);
                current_section = Some(section);
            }
            out.push(b'\t');
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b" = ");
            out.extend_from_slice(&serialize_value(entry.value.as_bstr()));
            out.push(b'\n');
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `section.sub.key` → canonical form (section/key lowercased).
fn canonicalize(key: &str) -> String {
    let parts: Vec<&str> = key.splitn(2, '.').collect();
    match parts.as_slice() {
        [section, rest] => match rest.rfind('.') {
            Some(pos) => format!(
                "{}.{}.{}",
                section.to_ascii_lowercase(),
                &rest[..pos],
                rest[pos + 1..].to_ascii_lowercase()
            ),
            None => format!(
                "{}.{}",
                section.to_ascii_lowercase(),
                rest.to_ascii_lowercase()
            ),
        },
        _ => key.to_ascii_lowercase(),
    }
}

fn split_key(canonical: &str) -> (String, String) {
    let last_dot = canonical.rfind('.').expect("canonical key has a dot");
    (
        canonical[..last_dot].to_string(),
        canonical[last_dot + 1..].to_string(),
    )
}

fn parse_section_header(line: &[u8], line_no: usize) -> Result<String, ConfigError> {
    let bad = |reason: &str| ConfigError::Parse {
        line: line_no,
        reason: reason.to_string(),
    };
    let end = line.find_byte(b']').ok_or_else(|| bad("unterminated section header"))?;
    let inner = &line[1..end];

    // `[remote "origin"]` → remote.origin
    if let Some(quote) = inner.find_byte(b'"') {
        let name = inner[..quote].trim();
        let sub_end = inner[quote + 1..]
            .find_byte(b'"')
            .ok_or_else(|| bad("unterminated subsection quote"))?;
        let sub = &inner[quote + 1..quote + 1 + sub_end];
        let name = std::str::from_utf8(name).map_err(|_| bad("non-UTF8 section"))?;
        let sub = std::str::from_utf8(sub).map_err(|_| bad("non-UTF8 subsection"))?;
        return Ok(format!("{}.{}", name.to_ascii_lowercase(), sub));
    }

    let name = std::str::from_utf8(inner.trim()).map_err(|_| bad("non-UTF8 section"))?;
    if name.is_empty() {
        return Err(bad("empty section name"));
    }
    Ok(name.to_ascii_lowercase())
}

fn strip_comment(line: &[u8]) -> &[u8] {
    let mut in_quote = false;
    for (i, &b) in line.iter().enumerate() {
        match b {
            b'"' => in_quote = !in_quote,
            b'#' | b';' if !in_quote => return &line[..i],
            _ => {}
        }
    }
    line
}

fn parse_value(raw: &[u8]) -> BString {
    let mut out = Vec::with_capacity(raw.len());
    let mut in_quote = false;
    let mut chars = raw.iter().copied().peekable();
    while let Some(b) = chars.next() {
        match b {
            b'"' => in_quote = !in_quote,
            b'\\' => match chars.next() {
                Some(b'n') => out.push(b'\n'),
                Some(b't') => out.push(b'\t'),
                Some(other) => out.push(other),
                None => {}
            },
            _ => out.push(b),
        }
    }
    let _ = in_quote;
    BString::from(out)
}

fn serialize_value(value: &BStr) -> Vec<u8> {
    let needs_quoting = value.starts_with(b" ")
        || value.ends_with(b" ")
        || value.contains(&b'#')
        || value.contains(&b';');
    let mut out = Vec::with_capacity(value.len() + 2);
    if needs_quoting {
        out.push(b'"');
    }
    for &b in value.iter() {
        match b {
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\t' => out.extend_from_slice(b"\\t"),
            b'"' | b'\\' => {
                out.push(b'\\');
                out.push(b);
            }
            _ => out.push(b),
        }
    }
    if needs_quoting {
        out.push(b'"');
    }
    out
}

fn write_section_header(out: &mut Vec<u8>, section: &str) {
    match section.split_once('.') {
        Some((name, sub)) => {
            out.extend_from_slice(format!("[{name} \"{sub}\"]\n").as_bytes());
        }
        None => {
            out.extend_from_slice(format!("[{section}]\n").as_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic_sections() {
        let file = ConfigFile::parse(
            b"[core]\n\trepositoryformatversion = 0\n\tbare = false\n[user]\n\tname = Alice\n",
        )
        .unwrap();
        assert_eq!(file.get("core.bare").unwrap(), "false");
        assert_eq!(file.get("user.name").unwrap(), "Alice");
        assert_eq!(file.get("core.missing"), None);
    }

    #[test]
    fn section_and_variable_case_insensitive() {
        let file = ConfigFile::parse(b"[Core]\n\tBare = true\n").unwrap();
        assert_eq!(file.get("core.bare").unwrap(), "true");
        assert_eq!(file.get("CORE.BARE").unwrap(), "true");
    }

    #[test]
    fn subsection_case_sensitive() {
        let file =
            ConfigFile::parse(b"[remote \"Origin\"]\n\turl = https://x\n").unwrap();
        assert!(file.get("remote.Origin.url").is_some());
        assert!(file.get("remote.origin.url").is_none());
    }

    #[test]
    fn comments_stripped_outside_quotes() {
        let file = ConfigFile::parse(
            b"[alias] # trailing\n\tst = status ; another\n\tmsg = \"has # hash\"\n",
        )
        .unwrap();
        assert_eq!(file.get("alias.st").unwrap(), "status");
        assert_eq!(file.get("alias.msg").unwrap(), "has # hash");
    }

    #[test]
    fn bare_name_is_true() {
        let file = ConfigFile::parse(b"[core]\n\tbare\n").unwrap();
        assert_eq!(file.get("core.bare").unwrap(), "true");
    }

    #[test]
    fn escapes_roundtrip() {
        let mut file = ConfigFile::default();
        file.set("core.editor", "vim \"with quotes\"\tand tab");
        let reparsed = ConfigFile::parse(&file.serialize()).unwrap();
        assert_eq!(reparsed.get("core.editor"), file.get("core.editor"));
    }

    #[test]
    fn last_assignment_wins_but_all_preserved() {
        let file = ConfigFile::parse(
            b"[remote \"o\"]\n\tfetch = a\n\tfetch = b\n",
        )
        .unwrap();
        assert_eq!(file.get("remote.o.fetch").unwrap(), "b");
        assert_eq!(file.get_all("remote.o.fetch").len(), 2);
    }

    #[test]
    fn set_and_unset() {
        let mut file = ConfigFile::default();
        file.set("user.name", "Alice");
        file.set("user.name", "Bob");
        assert_eq!(file.get_all("user.name").len(), 1);
        assert_eq!(file.get("user.name").unwrap(), "Bob");
        assert!(file.unset("user.name"));
        assert!(!file.unset("user.name"));
        assert!(file.is_empty());
    }

    #[test]
    fn serialize_groups_sections() {
        let mut file = ConfigFile::default();
        file.set("core.bare", "false");
        file.set("core.filemode", "true");
        file.set("remote.origin.url", "https://example.com");
        let text = String::from_utf8(file.serialize()).unwrap();
        assert_eq!(
            text,
            "[core]\n\tbare = false\n\tfilemode = true\n[remote \"origin\"]\n\turl = https://example.com\n"
        );
        let reparsed = ConfigFile::parse(text.as_bytes()).unwrap();
        assert_eq!(reparsed, file);
    }

    #[test]
    fn assignment_outside_section_rejected() {
        assert!(matches!(
            ConfigFile::parse(b"key = value\n"),
            Err(ConfigError::Parse { line: 1, .. })
        ));
    }
}
