//! Section-oriented `[Name]` / `Key: value` grammar shared by descriptors and
//! directory headers.

use crate::error::DescriptorError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

impl Section {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.entries.iter().filter(|(k, _)| k == key).map(|(_, v)| v.as_str()).collect()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.into();
        } else {
            self.entries.push((key.to_string(), value.into()));
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub sections: Vec<Section>,
}

impl Document {
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.name == name)
    }

    pub fn push_section(&mut self, section: Section) {
        self.sections.push(section);
    }

    /// Parse `Key: value` lines grouped under `[Section]` headers. Blank
    /// lines are ignored; every non-blank line outside a section, or a line
    /// without a colon, is a grammar error.
    pub fn parse(text: &str) -> Result<Self, DescriptorError> {
        let mut doc = Document::default();
        let mut current: Option<Section> = None;

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                if let Some(section) = current.take() {
                    doc.sections.push(section);
                }
                let name = line[1..line.len() - 1].to_string();
                current = Some(Section { name, entries: Vec::new() });
                continue;
            }
            let Some(section) = current.as_mut() else {
                return Err(DescriptorError::Malformed(format!(
                    "entry outside any section: {line}"
                )));
            };
            let Some((key, value)) = line.split_once(':') else {
                return Err(DescriptorError::Malformed(format!("no ':' in entry: {line}")));
            };
            section.entries.push((key.trim().to_string(), value.trim().to_string()));
        }
        if let Some(section) = current.take() {
            doc.sections.push(section);
        }
        Ok(doc)
    }

    /// Strip sections whose declared `Version` field is not in `known`.
    /// Matches the prevalidate pass: unknown-version sections are dropped,
    /// not rejected, to preserve forward compatibility.
    pub fn prevalidate(&mut self, known_versions: &[(&str, &str)]) {
        self.sections.retain(|section| {
            let Some(version) = section.get("Version") else {
                return true;
            };
            match known_versions.iter().find(|(name, _)| *name == section.name) {
                Some((_, expected)) => version == *expected,
                None => true,
            }
        });
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push('[');
            out.push_str(&section.name);
            out.push_str("]\n");
            for (key, value) in &section.entries {
                out.push_str(key);
                out.push_str(": ");
                out.push_str(value);
                out.push('\n');
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections_and_entries() {
        let text = "[Server]\nNickname: test\nPublished: 2004-01-01\n\n[Incoming/MMTP]\nVersion: 0.1\n";
        let doc = Document::parse(text).unwrap();
        assert_eq!(doc.sections.len(), 2);
        assert_eq!(doc.section("Server").unwrap().get("Nickname"), Some("test"));
        assert_eq!(doc.section("Incoming/MMTP").unwrap().get("Version"), Some("0.1"));
    }

    #[test]
    fn rejects_entry_outside_section() {
        let text = "Nickname: test\n";
        assert!(Document::parse(text).is_err());
    }

    #[test]
    fn prevalidate_drops_unknown_section_version() {
        let text = "[Server]\nVersion: 0.2\n\n[Incoming/MMTP]\nVersion: 9.9\n";
        let mut doc = Document::parse(text).unwrap();
        doc.prevalidate(&[("Server", "0.2"), ("Incoming/MMTP", "0.1")]);
        assert_eq!(doc.sections.len(), 1);
        assert_eq!(doc.sections[0].name, "Server");
    }
}
