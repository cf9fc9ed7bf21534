//! # Chain Records
//!
//! Decodes the field map of a chain node refresh into one of the known record
//! shapes. The shape is chosen from which forward-pointer field is present:
//!
//! | Shape | Links | Next | Previous |
//! |---|---|---|---|
//! | short link | `LINK_1..LINK_14` | `NEXT_LR` | `PREV_LR` |
//! | long link | `LONGLINK1..LONGLINK14` | `LONGNEXTLR` | `LONGPREVLR` |
//! | alternate link | `BR_LINK1..BR_LINK14` | `BR_NEXTLR` | `BR_PREVLR` |
//!
//! Anything else decodes to [`ChainRecord::Invalid`].

use serde::Serialize;
use serde_json::{Map, Value};

/// Link slots per record, for every shape.
pub const LINK_SLOTS: usize = 14;

/// Record shape tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChainShape {
    ShortLink,
    LongLink,
    AlternateLink,
}

impl ChainShape {
    const ALL: [ChainShape; 3] = [ChainShape::ShortLink, ChainShape::LongLink, ChainShape::AlternateLink];

    fn next_field(self) -> &'static str {
        match self {
            ChainShape::ShortLink => "NEXT_LR",
            ChainShape::LongLink => "LONGNEXTLR",
            ChainShape::AlternateLink => "BR_NEXTLR",
        }
    }

    fn prev_field(self) -> &'static str {
        match self {
            ChainShape::ShortLink => "PREV_LR",
            ChainShape::LongLink => "LONGPREVLR",
            ChainShape::AlternateLink => "BR_PREVLR",
        }
    }

    fn link_field(self, slot: usize) -> String {
        match self {
            ChainShape::ShortLink => format!("LINK_{}", slot),
            ChainShape::LongLink => format!("LONGLINK{}", slot),
            ChainShape::AlternateLink => format!("BR_LINK{}", slot),
        }
    }
}

/// Attributes shared by every record shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChainAttributes {
    pub display_name: String,
    pub rdn_display: Option<i64>,
    pub ref_count: i64,
    pub record_type: i64,
    pub pref_display: Option<i64>,
    pub pref_link: String,
    pub stream_id: i64,
    pub constituents: Vec<String>,
}

/// A decoded node of a known shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkRecord {
    pub attributes: ChainAttributes,
    pub next: String,
    pub prev: String,
}

/// # Chain Record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ChainRecord {
    ShortLink(LinkRecord),
    LongLink(LinkRecord),
    AlternateLink(LinkRecord),
    /// The field set matches no chain shape.
    Invalid,
}

impl ChainRecord {
    /// Decodes a refresh field map. `stream_id` is the envelope `ID`.
    pub fn decode(fields: &Map<String, Value>, stream_id: i64) -> Self {
        let Some(shape) = ChainShape::ALL
            .into_iter()
            .find(|shape| fields.contains_key(shape.next_field()))
        else {
            return ChainRecord::Invalid;
        };

        let constituents = (1..=LINK_SLOTS)
            .map(|slot| text_field(fields, &shape.link_field(slot)))
            .filter(|link| !link.is_empty())
            .collect();

        let record = LinkRecord {
            attributes: ChainAttributes {
                display_name: text_field(fields, "DSPLY_NAME"),
                rdn_display: int_field(fields, "RDNDISPLAY"),
                ref_count: int_field(fields, "REF_COUNT").unwrap_or_default(),
                record_type: int_field(fields, "RECORDTYPE")
                    .or_else(|| int_field(fields, "RECORD_TYPE"))
                    .unwrap_or_default(),
                pref_display: int_field(fields, "PREF_DISP"),
                pref_link: text_field(fields, "PREF_LINK"),
                stream_id,
                constituents,
            },
            next: text_field(fields, shape.next_field()),
            prev: text_field(fields, shape.prev_field()),
        };

        match shape {
            ChainShape::ShortLink => ChainRecord::ShortLink(record),
            ChainShape::LongLink => ChainRecord::LongLink(record),
            ChainShape::AlternateLink => ChainRecord::AlternateLink(record),
        }
    }

    /// Shape tag, `None` for `Invalid`.
    pub fn shape(&self) -> Option<ChainShape> {
        match self {
            ChainRecord::ShortLink(_) => Some(ChainShape::ShortLink),
            ChainRecord::LongLink(_) => Some(ChainShape::LongLink),
            ChainRecord::AlternateLink(_) => Some(ChainShape::AlternateLink),
            ChainRecord::Invalid => None,
        }
    }

    /// The record payload, `None` for `Invalid`.
    pub fn link(&self) -> Option<&LinkRecord> {
        match self {
            ChainRecord::ShortLink(r) | ChainRecord::LongLink(r) | ChainRecord::AlternateLink(r) => Some(r),
            ChainRecord::Invalid => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.link().is_some()
    }

    /// Forward pointer, empty on the last node.
    pub fn next(&self) -> &str {
        self.link().map(|r| r.next.as_str()).unwrap_or_default()
    }

    /// Backward pointer, empty on the first node.
    pub fn prev(&self) -> &str {
        self.link().map(|r| r.prev.as_str()).unwrap_or_default()
    }

    pub fn is_first(&self) -> bool {
        self.is_valid() && self.prev().is_empty()
    }

    pub fn is_last(&self) -> bool {
        self.is_valid() && self.next().is_empty()
    }

    /// Leaf names in slot order.
    pub fn constituents(&self) -> &[String] {
        self.link().map(|r| r.attributes.constituents.as_slice()).unwrap_or_default()
    }

    pub fn display_name(&self) -> &str {
        self.link().map(|r| r.attributes.display_name.as_str()).unwrap_or_default()
    }
}

/// Reads a text field; `null`, numbers and missing fields are handled leniently.
fn text_field(fields: &Map<String, Value>, name: &str) -> String {
    match fields.get(name) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn int_field(fields: &Map<String, Value>, name: &str) -> Option<i64> {
    match fields.get(name) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Whether a constituent name is itself a chain (`index#base`).
pub fn is_chain_name(name: &str) -> bool {
    match name.split_once('#') {
        Some((index, base)) => {
            !index.is_empty() && !base.is_empty() && index.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_decode_short_link() {
        let f = fields(json!({
            "DSPLY_NAME": "DJ INDU AVERAGE",
            "REF_COUNT": 3,
            "RECORDTYPE": 120,
            "PREF_DISP": 0,
            "LINK_1": "AAPL.OQ",
            "LINK_2": "AMGN.OQ",
            "LINK_3": "AXP.N",
            "LINK_4": "",
            "LINK_5": null,
            "NEXT_LR": "1#.DJI",
            "PREV_LR": null
        }));
        let record = ChainRecord::decode(&f, 5);
        assert_eq!(record.shape(), Some(ChainShape::ShortLink));
        assert_eq!(record.constituents(), ["AAPL.OQ", "AMGN.OQ", "AXP.N"]);
        assert_eq!(record.next(), "1#.DJI");
        assert!(record.is_first());
        assert!(!record.is_last());
        let link = record.link().unwrap();
        assert_eq!(link.attributes.ref_count, 3);
        assert_eq!(link.attributes.record_type, 120);
        assert_eq!(link.attributes.stream_id, 5);
        assert_eq!(record.display_name(), "DJ INDU AVERAGE");
    }

    #[test]
    fn test_decode_long_and_alternate_link() {
        let long = ChainRecord::decode(
            &fields(json!({"LONGLINK1": "EURAB6E10Y=", "LONGNEXTLR": "", "LONGPREVLR": "0#EURAB6E="})),
            7,
        );
        assert_eq!(long.shape(), Some(ChainShape::LongLink));
        assert!(long.is_last());
        assert!(!long.is_first());
        assert_eq!(long.prev(), "0#EURAB6E=");

        let alt = ChainRecord::decode(
            &fields(json!({"BR_LINK1": "X.BR", "BR_NEXTLR": "", "BR_PREVLR": "", "RECORD_TYPE": "120"})),
            8,
        );
        assert_eq!(alt.shape(), Some(ChainShape::AlternateLink));
        assert!(alt.is_first() && alt.is_last());
        assert_eq!(alt.link().unwrap().attributes.record_type, 120);
    }

    #[test]
    fn test_decode_unknown_fields_is_invalid() {
        let record = ChainRecord::decode(&fields(json!({"BID": 1.5, "ASK": 1.6, "DSPLY_NAME": "IBM"})), 5);
        assert_eq!(record, ChainRecord::Invalid);
        assert!(!record.is_first());
        assert!(!record.is_last());
        assert!(record.constituents().is_empty());
    }

    #[test]
    fn test_is_chain_name() {
        assert!(is_chain_name("0#.DJI"));
        assert!(is_chain_name("1F#UNIVERSE.PK"));
        assert!(!is_chain_name("AAPL.OQ"));
        assert!(!is_chain_name("#X"));
        assert!(!is_chain_name("0#"));
        assert!(!is_chain_name(".A#B"));
    }
}
