//! Fire-and-forget speech output

use tracing::debug;

/// Platform text-to-speech capability
pub trait SpeechSynthesizer: Send {
    fn speak(&self, text: &str);
}

/// Default synthesizer: records the request in the log and stays silent
#[derive(Debug, Default)]
pub struct LogSynthesizer;

impl SpeechSynthesizer for LogSynthesizer {
    fn speak(&self, text: &str) {
        debug!(
            component = "speech",
            event = "speech.skipped",
            chars = text.len(),
            "No speech output available"
        );
    }
}

/// Strip markdown markup so it is not read aloud
pub fn speakable_text(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !matches!(c, '*' | '#' | '_' | '`' | '>'))
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}
