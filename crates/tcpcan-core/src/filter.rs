//! Identifier filter descriptors
//!
//! Filters are declared where the bridge is configured and applied on the
//! CAN side of the link. The TCP bus endpoint never filters decoded frames.

use serde::{Deserialize, Serialize};

use crate::codec::FrameFlags;
use crate::error::CodecError;
use crate::message::CanMessage;

/// A user-facing filter entry
///
/// When `extended` is set the filter only matches one identifier width:
/// `Some(true)` for 29-bit frames, `Some(false)` for 11-bit frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CanFilter {
    pub can_id: u32,
    pub can_mask: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended: Option<bool>,
}

/// A filter in the form the CAN side evaluates it
///
/// Both fields use the wire layout, with the extended flag in bit 31.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedFilter {
    pub can_id: u32,
    pub can_mask: u32,
}

impl CanFilter {
    /// Filter that accepts every frame
    pub const MATCH_ALL: Self = Self {
        can_id: 0,
        can_mask: 0,
        extended: None,
    };

    pub fn new(can_id: u32, can_mask: u32) -> Self {
        Self {
            can_id,
            can_mask,
            extended: None,
        }
    }

    pub fn extended(mut self, extended: bool) -> Self {
        self.extended = Some(extended);
        self
    }

    pub fn pack(&self) -> PackedFilter {
        let mut can_id = self.can_id;
        let mut can_mask = self.can_mask;
        if let Some(extended) = self.extended {
            can_mask |= FrameFlags::EXTENDED.bits();
            if extended {
                can_id |= FrameFlags::EXTENDED.bits();
            }
        }
        PackedFilter { can_id, can_mask }
    }
}

impl std::str::FromStr for CanFilter {
    type Err = CodecError;

    /// Parse `ID:MASK[:ext|std]`, numbers in hex with optional `0x`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(':');
        let can_id = parts
            .next()
            .ok_or_else(|| CodecError::InvalidId(s.to_string()))
            .and_then(parse_hex)?;
        let can_mask = match parts.next() {
            Some(mask) => parse_hex(mask)?,
            None => FrameFlags::EXTENDED_ID_MASK,
        };
        let extended = match parts.next() {
            None => None,
            Some("ext") => Some(true),
            Some("std") => Some(false),
            Some(_) => return Err(CodecError::InvalidId(s.to_string())),
        };
        if parts.next().is_some() {
            return Err(CodecError::InvalidId(s.to_string()));
        }
        Ok(Self {
            can_id,
            can_mask,
            extended,
        })
    }
}

fn parse_hex(s: &str) -> Result<u32, CodecError> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).map_err(|_| CodecError::InvalidId(s.to_string()))
}

impl PackedFilter {
    pub fn matches(&self, msg: &CanMessage) -> bool {
        let raw = FrameFlags::pack(
            msg.arbitration_id,
            if msg.is_extended_id {
                FrameFlags::EXTENDED
            } else {
                FrameFlags::empty()
            },
        );
        raw & self.can_mask == self.can_id & self.can_mask
    }
}

/// Pack a filter list, defaulting to match-all when empty
pub fn pack_filters(filters: &[CanFilter]) -> Vec<PackedFilter> {
    if filters.is_empty() {
        return vec![CanFilter::MATCH_ALL.pack()];
    }
    filters.iter().map(CanFilter::pack).collect()
}

/// True when any filter in the list accepts the message
pub fn any_match(filters: &[PackedFilter], msg: &CanMessage) -> bool {
    filters.iter().any(|f| f.matches(msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list_matches_all() {
        let filters = pack_filters(&[]);
        assert_eq!(filters, vec![PackedFilter { can_id: 0, can_mask: 0 }]);

        let std_msg = CanMessage::new(0x123, &[]).unwrap();
        let ext_msg = CanMessage::new_extended(0x1234567, &[]).unwrap();
        assert!(any_match(&filters, &std_msg));
        assert!(any_match(&filters, &ext_msg));
    }

    #[test]
    fn test_extended_flag_packing() {
        let packed = CanFilter::new(0x18DA00F1, 0x1FFFFFFF).extended(true).pack();
        assert_eq!(packed.can_id, 0x98DA00F1);
        assert_eq!(packed.can_mask, 0x9FFFFFFF);

        let packed = CanFilter::new(0x7E8, 0x7FF).extended(false).pack();
        assert_eq!(packed.can_id, 0x7E8);
        assert_eq!(packed.can_mask, 0x8000_07FF);
    }

    #[test]
    fn test_width_restricted_match() {
        let std_only = [CanFilter::new(0x123, 0x7FF).extended(false).pack()];
        let std_msg = CanMessage::new(0x123, &[]).unwrap();
        let ext_msg = CanMessage::new_extended(0x123, &[]).unwrap();

        assert!(any_match(&std_only, &std_msg));
        assert!(!any_match(&std_only, &ext_msg));
    }

    #[test]
    fn test_unrestricted_matches_both_widths() {
        let either = [CanFilter::new(0x123, 0x7FF).pack()];
        assert!(any_match(&either, &CanMessage::new(0x123, &[]).unwrap()));
        assert!(any_match(
            &either,
            &CanMessage::new_extended(0x123, &[]).unwrap()
        ));
        assert!(!any_match(&either, &CanMessage::new(0x124, &[]).unwrap()));
    }

    #[test]
    fn test_parse() {
        let f: CanFilter = "0x7E8:0x7FF:std".parse().unwrap();
        assert_eq!(f, CanFilter::new(0x7E8, 0x7FF).extended(false));

        let f: CanFilter = "18DAF100".parse().unwrap();
        assert_eq!(f, CanFilter::new(0x18DAF100, 0x1FFFFFFF));

        assert!("0x100:0x7FF:both".parse::<CanFilter>().is_err());
        assert!("zz".parse::<CanFilter>().is_err());
    }

    #[test]
    fn test_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            filters: Vec<CanFilter>,
        }
        let w: Wrapper = toml::from_str(
            r#"
            filters = [
                { can_id = 0x100, can_mask = 0x700 },
                { can_id = 0x18DA00F1, can_mask = 0x1FFFFFFF, extended = true },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(w.filters.len(), 2);
        assert_eq!(w.filters[0].extended, None);
        assert_eq!(w.filters[1].extended, Some(true));
    }
}
