//! Recipient addressing.
//!
//! An [`Address`] is the serialized identifier of a conversation peer: either a
//! phone number (E.164) or an encoded [`GroupId`]. Send jobs use the address
//! string as their lane key, so two sends to the same peer never overlap.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const GROUP_PREFIX: &str = "__textsecure_group__!";

/// Raw identifier of a group conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(Vec<u8>);

impl GroupId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encoded form: `__textsecure_group__!` followed by lowercase hex.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(GROUP_PREFIX.len() + self.0.len() * 2);
        out.push_str(GROUP_PREFIX);
        for byte in &self.0 {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    pub fn decode(encoded: &str) -> Result<Self, CoreError> {
        let hex = encoded
            .strip_prefix(GROUP_PREFIX)
            .ok_or_else(|| CoreError::invalid_id(format!("GroupId: missing prefix in {encoded}")))?;

        if hex.len() % 2 != 0 {
            return Err(CoreError::invalid_id("GroupId: odd hex length"));
        }

        let bytes = (0..hex.len())
            .step_by(2)
            .map(|i| {
                hex.get(i..i + 2)
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                    .ok_or_else(|| CoreError::invalid_id(format!("GroupId: bad hex at {i}")))
            })
            .collect::<Result<Vec<u8>, _>>()?;

        Ok(Self(bytes))
    }

    pub fn is_encoded(value: &str) -> bool {
        value.starts_with(GROUP_PREFIX)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Serialized recipient identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(value: impl Into<String>) -> Result<Self, CoreError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(CoreError::validation("address must not be empty"));
        }
        Ok(Self(value))
    }

    pub fn group(group_id: &GroupId) -> Self {
        Self(group_id.encode())
    }

    pub fn is_group(&self) -> bool {
        GroupId::is_encoded(&self.0)
    }

    pub fn group_id(&self) -> Option<GroupId> {
        if self.is_group() {
            GroupId::decode(&self.0).ok()
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn group_address_is_recognised() {
        let group = GroupId::new(vec![0xde, 0xad, 0x01]);
        let address = Address::group(&group);

        assert!(address.is_group());
        assert_eq!(address.as_str(), "__textsecure_group__!dead01");
        assert_eq!(address.group_id(), Some(group));
    }

    #[test]
    fn phone_address_is_not_a_group() {
        let address = Address::new("+15550001111").unwrap();
        assert!(!address.is_group());
        assert_eq!(address.group_id(), None);
    }

    #[test]
    fn empty_address_is_rejected() {
        assert!(matches!(Address::new("  "), Err(CoreError::Validation(_))));
    }

    #[test]
    fn decode_rejects_malformed_hex() {
        assert!(GroupId::decode("__textsecure_group__!abc").is_err());
        assert!(GroupId::decode("__textsecure_group__!zz").is_err());
        assert!(GroupId::decode("abcd").is_err());
    }

    proptest! {
        #[test]
        fn group_id_decodes_what_it_encodes(bytes in proptest::collection::vec(any::<u8>(), 0..32)) {
            let id = GroupId::new(bytes);
            prop_assert_eq!(GroupId::decode(&id.encode()).unwrap(), id);
        }
    }
}
