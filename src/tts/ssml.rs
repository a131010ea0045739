//! SSML document construction.

use crate::tts::synthesizer::Voice;

/// Escapes the five XML special characters.
pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Wraps `text` in a single-voice SSML document.
pub fn build(text: &str, voice: &Voice) -> String {
    let locale = escape_xml(&voice.locale);
    format!(
        "<speak version='1.0' xml:lang='{locale}'><voice xml:lang='{locale}' xml:gender='{gender}' name='{name}'>{text}</voice></speak>",
        gender = voice.gender,
        name = escape_xml(&voice.name),
        text = escape_xml(text),
    )
}
