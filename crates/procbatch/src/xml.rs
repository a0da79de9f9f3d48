//! XML view over a command's result

use procbatch_core::{BatchError, Result};
use quick_xml::Reader;
use quick_xml::events::Event;

/// XML produced by a command.
///
/// Text assembled from a text-like column is a fragment: it may carry several
/// top-level elements and no declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlDocument {
    text: String,
    fragment: bool,
}

impl XmlDocument {
    pub fn document(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            fragment: false,
        }
    }

    pub fn fragment(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            fragment: true,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn is_fragment(&self) -> bool {
        self.fragment
    }

    /// Pull parser over the text, whitespace-only text nodes skipped
    pub fn reader(&self) -> Reader<&[u8]> {
        let mut reader = Reader::from_str(&self.text);
        reader.config_mut().trim_text(true);
        reader
    }

    /// Names of the top-level elements, in document order
    pub fn top_level_elements(&self) -> Result<Vec<String>> {
        let mut reader = self.reader();
        let mut names = Vec::new();
        let mut depth = 0usize;
        loop {
            let event = reader
                .read_event()
                .map_err(|e| BatchError::Xml(format!("at {}: {}", reader.buffer_position(), e)))?;
            match event {
                Event::Start(e) => {
                    if depth == 0 {
                        names.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                    }
                    depth += 1;
                }
                Event::Empty(e) => {
                    if depth == 0 {
                        names.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                    }
                }
                Event::End(_) => depth = depth.saturating_sub(1),
                Event::Eof => break,
                _ => {}
            }
        }
        if depth != 0 {
            return Err(BatchError::Xml("unexpected end of document".into()));
        }
        Ok(names)
    }
}

impl std::fmt::Display for XmlDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}
