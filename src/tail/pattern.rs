use super::TailError;
use regex::Regex;
use std::path::Path;

/// Simple file-name glob: `*` matches any run of characters, `?` exactly one.
#[derive(Debug, Clone)]
pub struct FilePattern {
    glob: String,
    regex: Option<Regex>,
}

impl FilePattern {
    pub fn new(glob: &str) -> Result<Self, TailError> {
        let glob = glob.trim();
        if glob.is_empty() || glob == "*" {
            return Ok(Self {
                glob: glob.to_string(),
                regex: None,
            });
        }

        let mut translated = String::with_capacity(glob.len() + 8);
        translated.push('^');
        for ch in glob.chars() {
            match ch {
                '*' => translated.push_str(".*"),
                '?' => translated.push('.'),
                other => translated.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        translated.push('$');

        let regex = Regex::new(&translated).map_err(|source| TailError::Pattern {
            pattern: glob.to_string(),
            source,
        })?;

        Ok(Self {
            glob: glob.to_string(),
            regex: Some(regex),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }

    pub fn matches_name(&self, file_name: &str) -> bool {
        self.regex
            .as_ref()
            .map_or(true, |regex| regex.is_match(file_name))
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.matches_name(name))
    }
}
