//! Component, control and port addresses
//!
//! Textual form: `/root/child/grandchild` names a component, `.id` appends a
//! control id and `!id` a port id. Addresses are immutable values ordered by
//! path depth first, then lexically by segment.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::error::AddressError;

/// Check a component or capability id against `[A-Za-z][A-Za-z0-9_-]*`.
pub fn is_valid_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

/// Capability ids also admit a leading `_` for system endpoints.
pub fn is_valid_capability_id(id: &str) -> bool {
    match id.strip_prefix('_') {
        Some(rest) => is_valid_id(rest),
        None => is_valid_id(id),
    }
}

/// Address of a runtime unit
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ComponentAddress {
    segments: Arc<[String]>,
}

impl ComponentAddress {
    /// Address of a root unit
    pub fn root(id: &str) -> Result<Self, AddressError> {
        if !is_valid_id(id) {
            return Err(AddressError::InvalidId(id.to_string()));
        }
        Ok(Self {
            segments: Arc::from(vec![id.to_string()]),
        })
    }

    /// Address of a direct child of this unit
    pub fn child(&self, id: &str) -> Result<Self, AddressError> {
        if !is_valid_id(id) {
            return Err(AddressError::InvalidId(id.to_string()));
        }
        let mut segments = self.segments.to_vec();
        segments.push(id.to_string());
        Ok(Self {
            segments: Arc::from(segments),
        })
    }

    /// Parent address, `None` for a root
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(Self {
            segments: Arc::from(&self.segments[..self.segments.len() - 1]),
        })
    }

    /// Last path segment
    pub fn id(&self) -> &str {
        &self.segments[self.segments.len() - 1]
    }

    /// First path segment
    pub fn root_id(&self) -> &str {
        &self.segments[0]
    }

    /// Number of path segments
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Path segments, root first
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Whether `other` lies strictly below this address
    pub fn is_ancestor_of(&self, other: &ComponentAddress) -> bool {
        other.segments.len() > self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// Control address on this unit
    pub fn control(&self, id: &str) -> Result<ControlAddress, AddressError> {
        if !is_valid_capability_id(id) {
            return Err(AddressError::InvalidId(id.to_string()));
        }
        Ok(ControlAddress {
            component: self.clone(),
            id: Arc::from(id),
        })
    }

    /// Port address on this unit
    pub fn port(&self, id: &str) -> Result<PortAddress, AddressError> {
        if !is_valid_id(id) {
            return Err(AddressError::InvalidId(id.to_string()));
        }
        Ok(PortAddress {
            component: self.clone(),
            id: Arc::from(id),
        })
    }

    /// Parse `/a/b/c`
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        if text.is_empty() {
            return Err(AddressError::Empty);
        }
        let Some(path) = text.strip_prefix('/') else {
            return Err(AddressError::MissingLeadingSlash(text.to_string()));
        };
        let mut segments = Vec::new();
        for segment in path.split('/') {
            if !is_valid_id(segment) {
                return Err(AddressError::InvalidId(segment.to_string()));
            }
            segments.push(segment.to_string());
        }
        Ok(Self {
            segments: Arc::from(segments),
        })
    }
}

impl Ord for ComponentAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments
            .len()
            .cmp(&other.segments.len())
            .then_with(|| self.segments.iter().cmp(other.segments.iter()))
    }
}

impl PartialOrd for ComponentAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ComponentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in self.segments.iter() {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ComponentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentAddress({})", self)
    }
}

impl FromStr for ComponentAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ComponentAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ComponentAddress> for String {
    fn from(value: ComponentAddress) -> Self {
        value.to_string()
    }
}

/// Address of a control (message endpoint) on a unit
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ControlAddress {
    component: ComponentAddress,
    id: Arc<str>,
}

impl ControlAddress {
    /// Owning unit address
    pub fn component(&self) -> &ComponentAddress {
        &self.component
    }

    /// Control id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Parse `/a/b.control`
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        let (path, id) = split_capability(text, '.')?;
        ComponentAddress::parse(path)?.control(id)
    }
}

impl fmt::Display for ControlAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.id)
    }
}

impl fmt::Debug for ControlAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ControlAddress({})", self)
    }
}

impl FromStr for ControlAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ControlAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ControlAddress> for String {
    fn from(value: ControlAddress) -> Self {
        value.to_string()
    }
}

/// Address of a port on a unit
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortAddress {
    component: ComponentAddress,
    id: Arc<str>,
}

impl PortAddress {
    /// Owning unit address
    pub fn component(&self) -> &ComponentAddress {
        &self.component
    }

    /// Port id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Parse `/a/b!port`
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        let (path, id) = split_capability(text, '!')?;
        ComponentAddress::parse(path)?.port(id)
    }
}

impl fmt::Display for PortAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.component, self.id)
    }
}

impl fmt::Debug for PortAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PortAddress({})", self)
    }
}

impl TryFrom<String> for PortAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PortAddress> for String {
    fn from(value: PortAddress) -> Self {
        value.to_string()
    }
}

/// Any address kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Address {
    /// A unit
    Component(ComponentAddress),
    /// A control on a unit
    Control(ControlAddress),
    /// A port on a unit
    Port(PortAddress),
}

impl Address {
    /// Parse any address form, picking the kind from the last segment's suffix
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        let last = text.rsplit('/').next().unwrap_or_default();
        if last.contains('.') {
            ControlAddress::parse(text).map(Address::Control)
        } else if last.contains('!') {
            PortAddress::parse(text).map(Address::Port)
        } else {
            ComponentAddress::parse(text).map(Address::Component)
        }
    }

    /// Owning unit address
    pub fn component(&self) -> &ComponentAddress {
        match self {
            Address::Component(address) => address,
            Address::Control(address) => address.component(),
            Address::Port(address) => address.component(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Component(address) => address.fmt(f),
            Address::Control(address) => address.fmt(f),
            Address::Port(address) => address.fmt(f),
        }
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}

fn split_capability(text: &str, separator: char) -> Result<(&str, &str), AddressError> {
    let slash = text
        .rfind('/')
        .ok_or_else(|| AddressError::MissingLeadingSlash(text.to_string()))?;
    let index = text[slash..]
        .find(separator)
        .map(|offset| slash + offset)
        .ok_or_else(|| AddressError::Malformed(text.to_string()))?;
    Ok((&text[..index], &text[index + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_control_address() {
        let address = ControlAddress::parse("/root/child/grandchild.value").unwrap();
        assert_eq!(address.component().depth(), 3);
        assert_eq!(address.component().id(), "grandchild");
        assert_eq!(address.id(), "value");
        assert_eq!(address.to_string(), "/root/child/grandchild.value");
    }

    #[test]
    fn test_system_capability_ids() {
        let root = ComponentAddress::root("root").unwrap();
        assert!(root.control("_host").is_ok());
        assert!(root.port("_host").is_err());
        assert!(ComponentAddress::parse("/root/_hidden").is_err());
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!(ComponentAddress::parse(""), Err(AddressError::Empty));
        assert!(matches!(
            ComponentAddress::parse("root"),
            Err(AddressError::MissingLeadingSlash(_))
        ));
        assert!(ComponentAddress::parse("/root//child").is_err());
        assert!(ComponentAddress::parse("/1root").is_err());
        assert!(ControlAddress::parse("/root/child").is_err());
        assert!(ControlAddress::parse("/root.").is_err());
    }

    #[test]
    fn test_address_kind_detection() {
        assert!(matches!(Address::parse("/a/b"), Ok(Address::Component(_))));
        assert!(matches!(Address::parse("/a/b.c"), Ok(Address::Control(_))));
        assert!(matches!(Address::parse("/a/b!out"), Ok(Address::Port(_))));
    }

    #[test]
    fn test_ancestry() {
        let root = ComponentAddress::parse("/root").unwrap();
        let child = root.child("a").unwrap();
        let grandchild = child.child("b").unwrap();
        assert!(root.is_ancestor_of(&grandchild));
        assert!(!grandchild.is_ancestor_of(&root));
        assert!(!child.is_ancestor_of(&child));
        assert_eq!(grandchild.parent(), Some(child));
        assert_eq!(root.parent(), None);
    }

    #[test]
    fn test_depth_then_lexical_ordering() {
        let mut addresses: Vec<ComponentAddress> = ["/z", "/a/b", "/a", "/a/a", "/b/a/c"]
            .iter()
            .map(|text| ComponentAddress::parse(text).unwrap())
            .collect();
        addresses.sort();
        let sorted: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
        assert_eq!(sorted, vec!["/a", "/z", "/a/a", "/a/b", "/b/a/c"]);
    }

    fn id_strategy() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9_-]{0,8}"
    }

    proptest! {
        #[test]
        fn prop_control_address_display_parses_back(
            path in proptest::collection::vec(id_strategy(), 1..5),
            control in id_strategy(),
        ) {
            let text = format!("/{}.{}", path.join("/"), control);
            let parsed = ControlAddress::parse(&text).unwrap();
            prop_assert_eq!(parsed.to_string(), text);
            prop_assert_eq!(parsed.component().depth(), path.len());
        }

        #[test]
        fn prop_shallower_addresses_sort_first(
            a in proptest::collection::vec(id_strategy(), 1..4),
            b in proptest::collection::vec(id_strategy(), 1..4),
        ) {
            let left = ComponentAddress::parse(&format!("/{}", a.join("/"))).unwrap();
            let right = ComponentAddress::parse(&format!("/{}", b.join("/"))).unwrap();
            if left.depth() < right.depth() {
                prop_assert!(left < right);
            } else if left.depth() == right.depth() {
                prop_assert_eq!(left.cmp(&right), a.cmp(&b));
            }
        }
    }
}
