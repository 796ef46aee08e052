use std::fmt;

use thiserror::Error;

/// File extensions recognized by the chunk-file naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    /// `.MYD` — table data.
    Data,
    /// `.MYI` — table index.
    Index,
    /// `.frm` — table schema.
    Schema,
}

impl Extension {
    fn as_suffix(self) -> &'static str {
        match self {
            Extension::Data => "MYD",
            Extension::Index => "MYI",
            Extension::Schema => "frm",
        }
    }

    fn parse(suffix: &str) -> Option<Self> {
        match suffix {
            "MYD" => Some(Extension::Data),
            "MYI" => Some(Extension::Index),
            "frm" => Some(Extension::Schema),
            _ => None,
        }
    }
}

const OVERLAP_SUFFIX: &str = "FullOverlap";

/// A parsed `<baseTable>[FullOverlap]_<chunk>.<MYD|MYI|frm>` chunk file name
/// (spec.md §3's `FileInfo::baseTable`/`isOverlap`/`isData`/`isIndex`
/// derivation), together with [`ChunkFileName::format`] to go the other
/// way.
///
/// Parsing and formatting are exact inverses of each other (spec.md §8's
/// "Parse round-trip" invariant): for every name constructed from
/// `(base_table, chunk, is_overlap, extension)`, re-parsing the formatted
/// name yields the same quadruple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFileName {
    pub base_table: String,
    pub chunk: u32,
    pub is_overlap: bool,
    pub extension: Extension,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilenameError {
    #[error("file name {0:?} has no recognized extension")]
    NoExtension(String),
    #[error("file name {0:?} has no chunk suffix")]
    NoChunkSuffix(String),
    #[error("file name {0:?} has a non-numeric chunk suffix")]
    InvalidChunkNumber(String),
    #[error("file name {0:?} has an empty base table")]
    EmptyBaseTable(String),
}

impl ChunkFileName {
    /// Parses a short on-disk file name such as `Object_23.MYD` or
    /// `ObjectFullOverlap_23.MYI`.
    pub fn parse(name: &str) -> Result<Self, FilenameError> {
        let (stem, ext_suffix) = name
            .rsplit_once('.')
            .ok_or_else(|| FilenameError::NoExtension(name.to_string()))?;
        let extension =
            Extension::parse(ext_suffix).ok_or_else(|| FilenameError::NoExtension(name.to_string()))?;

        let (base_with_overlap, chunk_str) = stem
            .rsplit_once('_')
            .ok_or_else(|| FilenameError::NoChunkSuffix(name.to_string()))?;
        let chunk: u32 = chunk_str
            .parse()
            .map_err(|_| FilenameError::InvalidChunkNumber(name.to_string()))?;

        let (base_table, is_overlap) = match base_with_overlap.strip_suffix(OVERLAP_SUFFIX) {
            Some(base) => (base, true),
            None => (base_with_overlap, false),
        };
        if base_table.is_empty() {
            return Err(FilenameError::EmptyBaseTable(name.to_string()));
        }

        Ok(Self {
            base_table: base_table.to_string(),
            chunk,
            is_overlap,
            extension,
        })
    }

    /// Formats this quadruple back into the on-disk name spec'd for its
    /// fields.
    pub fn format(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ChunkFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}_{}.{}",
            self.base_table,
            if self.is_overlap { OVERLAP_SUFFIX } else { "" },
            self.chunk,
            self.extension.as_suffix()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Object_23.MYD", "Object", 23, false, Extension::Data)]
    #[test_case("Object_23.MYI", "Object", 23, false, Extension::Index)]
    #[test_case("Object_23.frm", "Object", 23, false, Extension::Schema)]
    #[test_case("ObjectFullOverlap_23.MYD", "Object", 23, true, Extension::Data)]
    fn parses_known_names(
        name: &str,
        base_table: &str,
        chunk: u32,
        is_overlap: bool,
        extension: Extension,
    ) {
        let parsed = ChunkFileName::parse(name).unwrap();
        assert_eq!(parsed.base_table, base_table);
        assert_eq!(parsed.chunk, chunk);
        assert_eq!(parsed.is_overlap, is_overlap);
        assert_eq!(parsed.extension, extension);
    }

    #[test]
    fn rejects_missing_chunk_suffix() {
        assert!(matches!(
            ChunkFileName::parse("Object.MYD"),
            Err(FilenameError::NoChunkSuffix(_))
        ));
    }

    #[test]
    fn rejects_unknown_extension() {
        assert!(matches!(
            ChunkFileName::parse("Object_23.txt"),
            Err(FilenameError::NoExtension(_))
        ));
    }

    proptest::proptest! {
        #[test]
        fn parse_format_round_trip(
            base_table in "[A-Za-z][A-Za-z0-9]{0,15}",
            chunk in 0u32..1_000_000,
            is_overlap in proptest::bool::ANY,
            ext_idx in 0u8..3,
        ) {
            let extension = match ext_idx {
                0 => Extension::Data,
                1 => Extension::Index,
                _ => Extension::Schema,
            };
            let original = ChunkFileName { base_table, chunk, is_overlap, extension };
            let formatted = original.format();
            let reparsed = ChunkFileName::parse(&formatted).unwrap();
            prop_assert_eq!(reparsed, original);
        }
    }
}
