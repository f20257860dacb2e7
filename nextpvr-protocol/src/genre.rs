//! Genre text to DVB code translation.
//!
//! The backend labels programmes with free-form genre text.  A mapping
//! table translates known labels into combined DVB content codes, where
//! the high nibble is the genre type and the low nibble the subtype.
//! Labels with no mapping fall back to passing the text through to the
//! host.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::ProtocolError;

/// Combined code meaning "no genre information".
pub const GENRE_UNDEFINED: i32 = 0;

/// Subtype value telling the host to present the description text
/// instead of a DVB code.
pub const GENRE_USE_STRING: i32 = 128;

/// Separator used when several genre labels are folded into one string.
pub const GENRE_SEPARATOR: &str = ",";

/// Genre fields of one programme, resolved in place by [`GenreMapper::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenreBlock {
    pub genre_type: i32,
    pub genre_subtype: i32,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Translations {
    #[serde(rename = "genre", default)]
    genres: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
struct Translation {
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@type", default)]
    genre_type: i32,
    #[serde(rename = "@subtype", default)]
    subtype: i32,
}

/// Translation table from genre text to combined DVB codes.
#[derive(Debug, Default)]
pub struct GenreMapper {
    map: HashMap<String, i32>,
}

impl GenreMapper {
    /// Parses a `<translations><genre name=".." type=".." subtype=".."/>`
    /// document.  Entries with an empty name are skipped.
    pub fn from_xml(xml: &str) -> Result<GenreMapper, ProtocolError> {
        let table: Translations = quick_xml::de::from_str(xml)?;
        let mut map = HashMap::with_capacity(table.genres.len());
        for entry in table.genres {
            if !entry.name.is_empty() {
                map.insert(entry.name, entry.genre_type | entry.subtype);
            }
        }
        Ok(GenreMapper { map })
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Combined DVB code for a label, [`GENRE_UNDEFINED`] when unknown.
    pub fn lookup(&self, genre_text: &str) -> i32 {
        self.map.get(genre_text).copied().unwrap_or(GENRE_UNDEFINED)
    }

    /// Genre type nibble for a label.
    pub fn genre_type(&self, genre_text: &str) -> i32 {
        self.lookup(genre_text) & 0xF0
    }

    /// Genre subtype nibble for a label.
    pub fn genre_subtype(&self, genre_text: &str) -> i32 {
        self.lookup(genre_text) & 0x0F
    }

    /// Folds a programme's genre labels into `block`.
    ///
    /// With DVB mapping enabled and exactly two labels sharing a genre
    /// type, the second label refines the subtype.  Whenever no subtype
    /// can be derived the labels are passed through as description text
    /// with [`GENRE_USE_STRING`].  Returns false when there are no labels
    /// to fold.
    pub fn apply(&self, block: &mut GenreBlock, genres: &[&str], use_dvb: bool) -> bool {
        if genres.is_empty() {
            return false;
        }
        let joined = genres.join(GENRE_SEPARATOR);
        if genres.len() > 1 {
            if use_dvb && genres.len() == 2 {
                if block.genre_type == GENRE_UNDEFINED {
                    block.genre_type = self.genre_type(genres[0]);
                }
                if genres[0] == "Show / Game show" {
                    block.genre_type = 48;
                }
                if block.genre_type == self.genre_type(genres[0])
                    && block.genre_type == self.genre_type(genres[1])
                {
                    block.genre_subtype = self.genre_subtype(genres[1]);
                }
            }
            if block.genre_subtype == GENRE_UNDEFINED {
                block.genre_subtype = GENRE_USE_STRING;
                block.description = Some(joined);
            }
        } else if !use_dvb && block.genre_subtype != GENRE_UNDEFINED {
            block.genre_subtype = GENRE_USE_STRING;
            block.description = Some(joined);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"<translations>
        <genre name="Movie" type="16" subtype="0"/>
        <genre name="Drama" type="16" subtype="8"/>
        <genre name="News" type="32" subtype="0"/>
        <genre name="Quiz" type="48" subtype="3"/>
        <genre name="" type="64" subtype="1"/>
      </translations>"#;

    fn mapper() -> GenreMapper {
        GenreMapper::from_xml(TABLE).unwrap()
    }

    #[test]
    fn test_from_xml_skips_unnamed_entries() {
        let mapper = mapper();
        assert_eq!(mapper.len(), 4);
    }

    #[test]
    fn test_lookup_combines_type_and_subtype() {
        let mapper = mapper();
        assert_eq!(mapper.lookup("Drama"), 24);
        assert_eq!(mapper.genre_type("Drama"), 16);
        assert_eq!(mapper.genre_subtype("Drama"), 8);
        assert_eq!(mapper.lookup("Unknown"), GENRE_UNDEFINED);
    }

    #[test]
    fn test_apply_two_labels_sharing_type_refines_subtype() {
        let mapper = mapper();
        let mut block = GenreBlock::default();
        assert!(mapper.apply(&mut block, &["Movie", "Drama"], true));
        assert_eq!(block.genre_type, 16);
        assert_eq!(block.genre_subtype, 8);
        assert_eq!(block.description, None);
    }

    #[test]
    fn test_apply_mismatched_types_falls_back_to_text() {
        let mapper = mapper();
        let mut block = GenreBlock::default();
        mapper.apply(&mut block, &["Movie", "News"], true);
        assert_eq!(block.genre_type, 16);
        assert_eq!(block.genre_subtype, GENRE_USE_STRING);
        assert_eq!(block.description, Some("Movie,News".to_string()));
    }

    #[test]
    fn test_apply_game_show_override() {
        let mapper = mapper();
        let mut block = GenreBlock::default();
        mapper.apply(&mut block, &["Show / Game show", "Quiz"], true);
        assert_eq!(block.genre_type, 48);
        // The override does not match the table, so the text wins.
        assert_eq!(block.genre_subtype, GENRE_USE_STRING);
        assert_eq!(
            block.description,
            Some("Show / Game show,Quiz".to_string())
        );
    }

    #[test]
    fn test_apply_single_label_without_dvb_mapping() {
        let mapper = mapper();
        let mut block = GenreBlock {
            genre_type: 16,
            genre_subtype: 8,
            description: None,
        };
        mapper.apply(&mut block, &["Tele-novela"], false);
        assert_eq!(block.genre_subtype, GENRE_USE_STRING);
        assert_eq!(block.description, Some("Tele-novela".to_string()));
    }

    #[test]
    fn test_apply_single_label_with_dvb_mapping_keeps_block() {
        let mapper = mapper();
        let mut block = GenreBlock {
            genre_type: 16,
            genre_subtype: 8,
            description: None,
        };
        mapper.apply(&mut block, &["Drama"], true);
        assert_eq!(block.genre_type, 16);
        assert_eq!(block.genre_subtype, 8);
        assert_eq!(block.description, None);
    }

    #[test]
    fn test_apply_empty_list() {
        let mapper = mapper();
        let mut block = GenreBlock::default();
        assert!(!mapper.apply(&mut block, &[], true));
        assert_eq!(block, GenreBlock::default());
    }
}
