//! Membership snapshots and the documents they are read from.
//!
//! A membership document is either an Endpoints-shaped object
//!
//! ```json
//! {"metadata": {"namespace": "cattle-system", "name": "cattle"},
//!  "subsets": [{"addresses": [{"ip": "10.42.0.7"}, {"ip": "10.42.1.3"}]}]}
//! ```
//!
//! or a bare JSON array of address strings. Only ready `addresses` are
//! members; `notReadyAddresses` are ignored.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::MembershipError;

/// Point-in-time list of addresses that should be connected, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipSnapshot {
    addresses: Vec<String>,
}

impl MembershipSnapshot {
    pub const fn new(addresses: Vec<String>) -> Self {
        Self { addresses }
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for MembershipSnapshot {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ObjectMeta {
    namespace: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EndpointAddress {
    ip: String,
}

#[derive(Debug, Default, Deserialize)]
struct EndpointSubset {
    #[serde(default)]
    addresses: Option<Vec<EndpointAddress>>,
}

/// Endpoints-shaped membership document.
#[derive(Debug, Default, Deserialize)]
pub struct EndpointsDocument {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    subsets: Option<Vec<EndpointSubset>>,
}

impl EndpointsDocument {
    /// Flatten subsets into one snapshot, in subset then address order.
    pub fn to_snapshot(&self) -> MembershipSnapshot {
        self.subsets
            .iter()
            .flatten()
            .flat_map(|subset| subset.addresses.iter().flatten())
            .map(|addr| addr.ip.clone())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MembershipDocument {
    Addresses(Vec<String>),
    Endpoints(EndpointsDocument),
}

/// Restricts accepted documents to one service (`namespace/name`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFilter {
    pub namespace: String,
    pub name: String,
}

impl ServiceFilter {
    /// Documents that do not name a service are accepted.
    fn accepts(&self, meta: &ObjectMeta) -> bool {
        match (&meta.namespace, &meta.name) {
            (None, None) => true,
            (ns, name) => {
                ns.as_deref() == Some(self.namespace.as_str())
                    && name.as_deref() == Some(self.name.as_str())
            }
        }
    }
}

impl FromStr for ServiceFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => Ok(Self {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            _ => Err(format!("expected 'namespace/name', got '{s}'")),
        }
    }
}

impl fmt::Display for ServiceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Parse a membership document.
///
/// Returns `Ok(None)` when the document belongs to a service other than the
/// one selected by `filter`.
pub fn parse_document(
    content: &str,
    filter: Option<&ServiceFilter>,
) -> Result<Option<MembershipSnapshot>, MembershipError> {
    match serde_json::from_str::<MembershipDocument>(content)? {
        MembershipDocument::Addresses(addresses) => Ok(Some(MembershipSnapshot::new(addresses))),
        MembershipDocument::Endpoints(doc) => {
            if filter.is_some_and(|f| !f.accepts(&doc.metadata)) {
                return Ok(None);
            }
            Ok(Some(doc.to_snapshot()))
        }
    }
}

/// Read and parse a membership document from disk.
pub fn load_document(
    path: &Path,
    filter: Option<&ServiceFilter>,
) -> Result<Option<MembershipSnapshot>, MembershipError> {
    let content = std::fs::read_to_string(path).map_err(|source| MembershipError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_document(&content, filter)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn cattle() -> ServiceFilter {
        "cattle-system/cattle".parse().unwrap()
    }

    #[test]
    fn endpoints_flatten_in_subset_order() {
        let doc = r#"{
            "subsets": [
                {"addresses": [{"ip": "192.0.0.1"}, {"ip": "2001:db8::1"}]},
                {"addresses": [{"ip": "10.0.0.1"}], "notReadyAddresses": [{"ip": "10.0.0.9"}]}
            ]
        }"#;
        let snapshot = parse_document(doc, None).unwrap().unwrap();
        assert_eq!(snapshot.addresses(), ["192.0.0.1", "2001:db8::1", "10.0.0.1"]);
    }

    #[test]
    fn empty_endpoints_is_empty_snapshot() {
        for doc in ["{}", r#"{"subsets": null}"#, r#"{"subsets": [{}]}"#, "[]"] {
            let snapshot = parse_document(doc, None).unwrap().unwrap();
            assert!(snapshot.is_empty(), "{doc}");
        }
    }

    #[test]
    fn bare_address_list_is_accepted() {
        let snapshot = parse_document(r#"["10.0.0.1", "192.0."]"#, None)
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.addresses(), ["10.0.0.1", "192.0."]);
    }

    #[test]
    fn filter_drops_other_services() {
        let doc = r#"{"metadata": {"namespace": "default", "name": "kubernetes"},
                      "subsets": [{"addresses": [{"ip": "10.0.0.1"}]}]}"#;
        assert!(parse_document(doc, Some(&cattle())).unwrap().is_none());
        assert!(parse_document(doc, None).unwrap().is_some());
    }

    #[test]
    fn filter_accepts_matching_and_anonymous_documents() {
        let named = r#"{"metadata": {"namespace": "cattle-system", "name": "cattle"},
                        "subsets": [{"addresses": [{"ip": "10.0.0.1"}]}]}"#;
        let anonymous = r#"{"subsets": [{"addresses": [{"ip": "10.0.0.1"}]}]}"#;
        assert_eq!(parse_document(named, Some(&cattle())).unwrap().unwrap().len(), 1);
        assert_eq!(parse_document(anonymous, Some(&cattle())).unwrap().unwrap().len(), 1);
    }

    #[test]
    fn malformed_document_is_parse_error() {
        assert!(matches!(
            parse_document("{\"subsets\": 3}", None),
            Err(MembershipError::Parse(_))
        ));
        assert!(parse_document("not json", None).is_err());
    }

    #[test]
    fn service_filter_parsing() {
        assert_eq!(cattle().to_string(), "cattle-system/cattle");
        assert!("cattle".parse::<ServiceFilter>().is_err());
        assert!("/cattle".parse::<ServiceFilter>().is_err());
        assert!("cattle-system/".parse::<ServiceFilter>().is_err());
    }

    #[test]
    fn load_document_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_document(&dir.path().join("endpoints.json"), None),
            Err(MembershipError::Read { .. })
        ));
    }
}
