/// Characters that must never appear in a published label. Both are MQTT
/// wildcards and would turn the topic into a filter.
const FORBIDDEN_KEY_CHARS: [char; 2] = ['#', '*'];

/// A single VE.Direct text-protocol block.
///
/// Fields keep the order in which the device sent them. A label that shows up
/// twice within one block replaces the earlier value but keeps its position.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    fields: Vec<(String, String)>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: String, value: String) {
        match self.fields.iter_mut().find(|(l, _)| *l == label) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((label, value)),
        }
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(l, v)| (l.as_str(), v.as_str()))
    }

    /// Fields that may be published: non-empty labels without wildcard characters.
    pub fn publishable_fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter()
            .filter(|(label, _)| !label.is_empty() && !is_forbidden_key(label))
    }
}

/// Decode a raw serial line. Invalid UTF-8 is dropped rather than replaced,
/// surrounding whitespace (including the `\r\n` framing) is trimmed.
pub fn decode_line(raw: &[u8]) -> String {
    let mut decoded = String::with_capacity(raw.len());
    for chunk in raw.utf8_chunks() {
        decoded.push_str(chunk.valid());
    }
    decoded.trim().to_string()
}

/// Split a `LABEL\tVALUE` line on its first tab.
pub fn parse_kv(line: &str) -> Option<(String, String)> {
    let (label, value) = line.split_once('\t')?;
    Some((label.trim().to_string(), value.trim().to_string()))
}

pub fn is_forbidden_key(label: &str) -> bool {
    label.contains(FORBIDDEN_KEY_CHARS)
}

/// `HSDS` is the last field MPPT chargers send before the checksum, so either
/// of them closes a block.
pub fn is_frame_terminator(label: &str) -> bool {
    label == "HSDS" || label.eq_ignore_ascii_case("checksum")
}
