//! Sentinel scanning inside character data.
//!
//! Character data is split around the four two-byte markers that delimit
//! template script regions. The scanner is purely lexical; pairing and
//! nesting rules are enforced by the compiler's state machine, which
//! carries its state across node boundaries.

/// One of the four two-byte markers embeddable in character data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    /// `[[`, starts a code block.
    StartCode,
    /// `]]`, ends a code block.
    EndCode,
    /// `[#`, starts a print block.
    StartPrint,
    /// `#]`, ends a print block.
    EndPrint,
}

impl Sentinel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Sentinel::StartCode => "[[",
            Sentinel::EndCode => "]]",
            Sentinel::StartPrint => "[#",
            Sentinel::EndPrint => "#]",
        }
    }

    fn at(window: &[u8]) -> Option<Sentinel> {
        match window {
            b"[[" => Some(Sentinel::StartCode),
            b"]]" => Some(Sentinel::EndCode),
            b"[#" => Some(Sentinel::StartPrint),
            b"#]" => Some(Sentinel::EndPrint),
            _ => None,
        }
    }
}

/// A scanned piece of character data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Piece<'a> {
    Marker(Sentinel),
    /// Literal bytes between markers; may be empty at the edges.
    Fragment(&'a str),
}

/// Splits `data` around the sentinels. The result always contains at least
/// one fragment; fragments adjacent to markers may be empty.
pub fn scan(data: &str) -> Vec<Piece<'_>> {
    let bytes = data.as_bytes();
    let mut pieces = Vec::new();
    let mut last = 0;
    let mut idx = 0;

    while idx + 1 < bytes.len() {
        match Sentinel::at(&bytes[idx..idx + 2]) {
            Some(marker) => {
                // Sentinels are ASCII, so these offsets always sit on
                // character boundaries.
                pieces.push(Piece::Fragment(&data[last..idx]));
                pieces.push(Piece::Marker(marker));
                idx += 2;
                last = idx;
            }
            None => idx += 1,
        }
    }

    pieces.push(Piece::Fragment(&data[last..]));
    pieces
}

#[cfg(test)]
mod tests {
    use super::Piece::{Fragment, Marker};
    use super::Sentinel::{EndCode, EndPrint, StartCode, StartPrint};
    use super::*;

    #[test]
    fn splits_mixed_blocks() {
        assert_eq!(
            scan("abcd[[ efg ]]hi[# jk #]lmn"),
            vec![
                Fragment("abcd"),
                Marker(StartCode),
                Fragment(" efg "),
                Marker(EndCode),
                Fragment("hi"),
                Marker(StartPrint),
                Fragment(" jk "),
                Marker(EndPrint),
                Fragment("lmn"),
            ]
        );
    }

    #[test]
    fn empty_input_yields_one_empty_fragment() {
        assert_eq!(scan(""), vec![Fragment("")]);
    }

    #[test]
    fn plain_text_yields_one_fragment() {
        assert_eq!(scan("hello"), vec![Fragment("hello")]);
    }

    #[test]
    fn markers_at_the_edges_leave_empty_fragments() {
        assert_eq!(
            scan("[[ for i=1,3 do ]]X[# i #]Y[[ end ]]"),
            vec![
                Fragment(""),
                Marker(StartCode),
                Fragment(" for i=1,3 do "),
                Marker(EndCode),
                Fragment("X"),
                Marker(StartPrint),
                Fragment(" i "),
                Marker(EndPrint),
                Fragment("Y"),
                Marker(StartCode),
                Fragment(" end "),
                Marker(EndCode),
                Fragment(""),
            ]
        );
    }

    #[test]
    fn overlapping_brackets_match_leftmost_first() {
        assert_eq!(
            scan("[[["),
            vec![Fragment(""), Marker(StartCode), Fragment("[")]
        );
    }

    #[test]
    fn multibyte_text_around_markers() {
        assert_eq!(
            scan("grüße[[ ü ]]"),
            vec![
                Fragment("grüße"),
                Marker(StartCode),
                Fragment(" ü "),
                Marker(EndCode),
                Fragment(""),
            ]
        );
    }
}
