//! Streaming tokenizer over an SFZ text buffer (§4.10).
//!
//! Recognizes `<header>` tokens, `key=value` pairs (values may contain
//! embedded spaces, terminated only by the next `key=` token or header),
//! and `//` line comments.

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseEvent {
    Header(String),
    KeyValue(String, String),
}

pub struct SfzTokenizer;

impl SfzTokenizer {
    /// Tokenize a whole SFZ buffer into a flat event stream. Line comments
    /// (`// ...`) are stripped before word-splitting.
    pub fn tokenize(input: &str) -> Vec<ParseEvent> {
        let stripped: String = input
            .lines()
            .map(strip_line_comment)
            .collect::<Vec<_>>()
            .join("\n");

        let words: Vec<&str> = stripped.split_whitespace().collect();
        let mut events = Vec::new();
        let mut i = 0;
        while i < words.len() {
            let word = words[i];
            if word.starts_with('<') {
                let header = word.trim_start_matches('<').trim_end_matches('>');
                events.push(ParseEvent::Header(header.to_string()));
                i += 1;
                continue;
            }
            if let Some(eq) = word.find('=') {
                let key = word[..eq].to_string();
                let mut value = word[eq + 1..].to_string();
                i += 1;
                // A new `key=` or header terminates the value; until then,
                // trailing bare words extend it (e.g. sample paths with spaces).
                while i < words.len() && !words[i].starts_with('<') && !words[i].contains('=') {
                    value.push(' ');
                    value.push_str(words[i]);
                    i += 1;
                }
                events.push(ParseEvent::KeyValue(key, value.trim().to_string()));
                continue;
            }
            // Orphan word with neither '=' nor a header marker: malformed
            // input, skipped rather than failing the whole parse (§7 treats
            // only unknown *headers* as fatal).
            i += 1;
        }
        events
    }
}

fn strip_line_comment(line: &str) -> &str {
    match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_header_and_pairs() {
        let events = SfzTokenizer::tokenize("<region> sample=one.wav lokey=60 hikey=60");
        assert_eq!(
            events,
            vec![
                ParseEvent::Header("region".into()),
                ParseEvent::KeyValue("sample".into(), "one.wav".into()),
                ParseEvent::KeyValue("lokey".into(), "60".into()),
                ParseEvent::KeyValue("hikey".into(), "60".into()),
            ]
        );
    }

    #[test]
    fn value_with_spaces_is_captured_until_next_key() {
        let events = SfzTokenizer::tokenize("<region> sample=my samples/kick drum.wav lokey=36");
        assert_eq!(
            events,
            vec![
                ParseEvent::Header("region".into()),
                ParseEvent::KeyValue("sample".into(), "my samples/kick drum.wav".into()),
                ParseEvent::KeyValue("lokey".into(), "36".into()),
            ]
        );
    }

    #[test]
    fn strips_line_comments() {
        let events = SfzTokenizer::tokenize("<region> // a comment\nlokey=10 // trailing\nhikey=20");
        assert_eq!(
            events,
            vec![
                ParseEvent::Header("region".into()),
                ParseEvent::KeyValue("lokey".into(), "10".into()),
                ParseEvent::KeyValue("hikey".into(), "20".into()),
            ]
        );
    }
}
