//! Control markers embedded in mentor replies.
//!
//! The mentor model multiplexes a few signals into its free-text reply as
//! inline tags. Grammar:
//!
//! ```text
//! marker := "<" NAME ( "=" VALUE )? ">"
//! NAME   := [A-Z] [A-Z_]*
//! VALUE  := [^<>]*
//! ```
//!
//! Every well-formed marker is removed from the display text, known or
//! not. Anything that does not match the grammar (`<br>`, `a < b`, a tag
//! that never closes) is left in place.

use serde::Serialize;

/// One marker as written in the reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Marker {
    pub name: String,
    pub value: Option<String>,
}

/// Signals recognized from a reply's markers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplySignals {
    /// `CONCEPT_TYPE=..` or `MATERIAL_TYPE=..`: the mentor is explaining a concept
    pub concept_type: Option<String>,
    /// `FINAL_SOLUTION=YES`
    pub final_solution: bool,
    /// `IMPLEMENTATION_START`
    pub implementation_started: bool,
    /// `ACTIVE_RECALL_MODE`
    pub active_recall: bool,
    /// `EXP_ADD=<digits>`; 0 when absent
    pub exp_reward: u32,
}

/// A parsed mentor reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MentorReply {
    /// Reply text with every marker removed
    pub display_text: String,
    pub signals: ReplySignals,
    /// Markers in order of appearance
    pub markers: Vec<Marker>,
}

impl MentorReply {
    pub fn has_markers(&self) -> bool {
        !self.markers.is_empty()
    }
}

/// Split a raw mentor reply into display text, markers and signals.
pub fn parse_reply(raw: &str) -> MentorReply {
    let mut display = String::with_capacity(raw.len());
    let mut markers = Vec::new();
    let mut copied = 0;
    let mut pos = 0;

    while let Some(offset) = raw[pos..].find('<') {
        let open = pos + offset;
        match scan_marker(raw, open) {
            Some((marker, end)) => {
                display.push_str(&raw[copied..open]);
                markers.push(marker);
                copied = end;
                pos = end;
            }
            None => pos = open + 1,
        }
    }
    display.push_str(&raw[copied..]);

    let signals = signals_from(&markers);
    MentorReply {
        display_text: display.trim().to_string(),
        signals,
        markers,
    }
}

/// Match one marker starting at `open` (a `<`). Returns the marker and the
/// index just past its closing `>`.
fn scan_marker(raw: &str, open: usize) -> Option<(Marker, usize)> {
    let bytes = raw.as_bytes();
    let name_start = open + 1;
    if !bytes.get(name_start)?.is_ascii_uppercase() {
        return None;
    }
    let mut i = name_start + 1;
    while bytes
        .get(i)
        .is_some_and(|b| b.is_ascii_uppercase() || *b == b'_')
    {
        i += 1;
    }
    let name_end = i;

    let value = match bytes.get(i)? {
        b'>' => None,
        b'=' => {
            let value_start = i + 1;
            let mut j = value_start;
            loop {
                match bytes.get(j)? {
                    b'>' => break,
                    b'<' => return None,
                    _ => j += 1,
                }
            }
            i = j;
            Some((value_start, j))
        }
        _ => return None,
    };

    // Delimiters are ASCII, so every index here is a char boundary
    let marker = Marker {
        name: raw[name_start..name_end].to_string(),
        value: value.map(|(start, end)| raw[start..end].to_string()),
    };
    Some((marker, i + 1))
}

fn signals_from(markers: &[Marker]) -> ReplySignals {
    let mut signals = ReplySignals::default();
    let mut exp_seen = false;

    for marker in markers {
        let value = marker.value.as_deref();
        match marker.name.as_str() {
            "CONCEPT_TYPE" | "MATERIAL_TYPE" => {
                if signals.concept_type.is_none() {
                    signals.concept_type = value.map(|v| v.trim().to_string());
                }
            }
            "FINAL_SOLUTION" => {
                signals.final_solution |= value.is_some_and(|v| v.trim() == "YES");
            }
            "IMPLEMENTATION_START" => signals.implementation_started = true,
            "ACTIVE_RECALL_MODE" => signals.active_recall = true,
            "EXP_ADD" if !exp_seen => {
                let reward = value
                    .map(str::trim)
                    .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
                    .and_then(|v| v.parse::<u32>().ok());
                if let Some(reward) = reward {
                    signals.exp_reward = reward;
                    exp_seen = true;
                }
            }
            _ => {}
        }
    }
    signals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_known_markers_and_reads_signals() {
        let reply = parse_reply(
            "<CONCEPT_TYPE=recursion> A base case stops the recursion. \
             <FINAL_SOLUTION=YES><EXP_ADD=25>",
        );
        assert_eq!(reply.display_text, "A base case stops the recursion.");
        assert_eq!(reply.signals.concept_type.as_deref(), Some("recursion"));
        assert!(reply.signals.final_solution);
        assert_eq!(reply.signals.exp_reward, 25);
        assert!(!reply.signals.implementation_started);
        assert_eq!(reply.markers.len(), 3);
    }

    #[test]
    fn bare_markers_have_no_value() {
        let reply = parse_reply("Let's build it. <IMPLEMENTATION_START> <ACTIVE_RECALL_MODE>");
        assert!(reply.signals.implementation_started);
        assert!(reply.signals.active_recall);
        assert_eq!(
            reply.markers[0],
            Marker {
                name: "IMPLEMENTATION_START".to_string(),
                value: None
            }
        );
        assert_eq!(reply.display_text, "Let's build it.");
    }

    #[test]
    fn text_outside_the_grammar_is_untouched() {
        let raw = "if a < b and b > c then <br> use Vec<u8> or <Incomplete";
        let reply = parse_reply(raw);
        assert_eq!(reply.display_text, raw);
        assert!(!reply.has_markers());
        assert_eq!(reply.signals, ReplySignals::default());
    }

    #[test]
    fn unknown_markers_are_listed_and_stripped() {
        let reply = parse_reply("Nice work <MOOD=happy>!");
        assert_eq!(reply.display_text, "Nice work !");
        assert_eq!(reply.markers[0].name, "MOOD");
        assert_eq!(reply.signals, ReplySignals::default());
    }

    #[test]
    fn non_numeric_exp_is_ignored() {
        let reply = parse_reply("<EXP_ADD=lots> <EXP_ADD=-3> <EXP_ADD=7> <EXP_ADD=9>");
        assert_eq!(reply.signals.exp_reward, 7);
        assert_eq!(reply.display_text, "");
    }

    #[test]
    fn final_solution_requires_yes() {
        assert!(!parse_reply("<FINAL_SOLUTION=NO>").signals.final_solution);
        assert!(!parse_reply("<FINAL_SOLUTION>").signals.final_solution);
    }

    #[test]
    fn nested_open_bracket_breaks_a_marker() {
        let reply = parse_reply("<CONCEPT_TYPE=a<b> tail");
        assert_eq!(reply.display_text, "<CONCEPT_TYPE=a<b> tail");
        assert_eq!(reply.markers.len(), 0);
    }

    #[test]
    fn handles_multibyte_text_around_markers() {
        let reply = parse_reply("재귀란 <CONCEPT_TYPE=개념> 함수가 자기 자신을 호출하는 것");
        assert_eq!(reply.signals.concept_type.as_deref(), Some("개념"));
        assert_eq!(reply.display_text, "재귀란  함수가 자기 자신을 호출하는 것");
    }
}
