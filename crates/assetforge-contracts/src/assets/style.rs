use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const SECTION_PATTERN: &str = r"(?s)### (PREAMBLE|STYLE_KEYWORDS|NEGATIVE_PROMPT)\s*```\s*(.*?)```";

/// Locked prompt fragments shared by every generation. Empty means absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleFragments {
    #[serde(default)]
    pub preamble: String,
    #[serde(default)]
    pub style_keywords: String,
    #[serde(default)]
    pub negative_prompt: String,
}

impl StyleFragments {
    /// Reads the style reference document. A missing document yields empty fragments.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Takes the first fenced block after each `### SECTION` heading.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let pattern = Regex::new(SECTION_PATTERN)?;
        let mut fragments = Self::default();
        let mut seen = [false; 3];

        for captures in pattern.captures_iter(content) {
            let (Some(section), Some(body)) = (captures.get(1), captures.get(2)) else {
                continue;
            };
            let (slot, field) = match section.as_str() {
                "PREAMBLE" => (0, &mut fragments.preamble),
                "STYLE_KEYWORDS" => (1, &mut fragments.style_keywords),
                _ => (2, &mut fragments.negative_prompt),
            };
            if seen[slot] {
                continue;
            }
            seen[slot] = true;
            *field = body.as_str().trim().to_string();
        }
        Ok(fragments)
    }

    pub fn is_empty(&self) -> bool {
        self.preamble.is_empty() && self.style_keywords.is_empty() && self.negative_prompt.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: &str = "# Style Reference

Some prose about the look.

### PREAMBLE
```
Hand-painted fantasy game art.
```

### STYLE_KEYWORDS
```
painterly, warm rim light, bold shapes
```

### NEGATIVE_PROMPT
```
Avoid: text, watermarks, photorealism.
```

### PREAMBLE
```
ignored duplicate
```
";

    #[test]
    fn parse_extracts_each_section_once() -> anyhow::Result<()> {
        let fragments = StyleFragments::parse(REFERENCE)?;
        assert_eq!(fragments.preamble, "Hand-painted fantasy game art.");
        assert_eq!(fragments.style_keywords, "painterly, warm rim light, bold shapes");
        assert_eq!(
            fragments.negative_prompt,
            "Avoid: text, watermarks, photorealism."
        );
        Ok(())
    }

    #[test]
    fn missing_sections_stay_empty() -> anyhow::Result<()> {
        let fragments = StyleFragments::parse("### STYLE_KEYWORDS\n```\nflat colors\n```\n")?;
        assert_eq!(fragments.preamble, "");
        assert_eq!(fragments.style_keywords, "flat colors");
        assert_eq!(fragments.negative_prompt, "");
        Ok(())
    }

    #[test]
    fn missing_document_yields_empty_fragments() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let fragments = StyleFragments::load(&temp.path().join("style-reference.md"))?;
        assert!(fragments.is_empty());
        Ok(())
    }
}
