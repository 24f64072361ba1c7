/// Outbound composition buffer shared by typed input and voice capture
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Composer {
    text: String,
}

impl Composer {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    /// Drain the buffer
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }

    /// Append a dictated segment, separated from existing text by one space
    pub fn append_segment(&mut self, segment: &str) {
        let segment = segment.trim();
        if segment.is_empty() {
            return;
        }
        if !self.text.is_empty() && !self.text.ends_with(char::is_whitespace) {
            self.text.push(' ');
        }
        self.text.push_str(segment);
    }
}
