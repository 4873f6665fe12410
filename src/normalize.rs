//! Canonical comparison forms for identifiers, names and passwords typed by
//! people into forms and spreadsheets.

/// Strip every whitespace character and lowercase what remains.
pub fn canonical(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Like [`canonical`], additionally folding the digit `0` onto the letter `o`
/// so "STU001" and "STUoo1" resolve to the same student.
pub fn canonical_id(raw: &str) -> String {
    canonical(raw)
        .chars()
        .map(|c| if c == '0' { 'o' } else { c })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Identifier,
    Name,
    Secret,
}

impl KeyKind {
    pub fn canonicalize(self, raw: &str) -> String {
        match self {
            KeyKind::Identifier => canonical_id(raw),
            KeyKind::Name | KeyKind::Secret => canonical(raw),
        }
    }
}

/// Whether `supplied` names the same key as `stored`.
///
/// A value that canonicalizes to nothing never matches, including against
/// another empty value.
pub fn keys_match(kind: KeyKind, stored: &str, supplied: &str) -> bool {
    let stored = kind.canonicalize(stored);
    if stored.is_empty() {
        return false;
    }
    stored == kind.canonicalize(supplied)
}
