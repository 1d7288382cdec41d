use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Shared collections tracked by every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Customers,
    Projects,
    Materials,
    Quotes,
    Invoices,
}

impl Collection {
    /// Every tracked collection, in export order.
    pub const ALL: [Collection; 5] = [
        Collection::Customers,
        Collection::Projects,
        Collection::Materials,
        Collection::Quotes,
        Collection::Invoices,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Customers => "customers",
            Collection::Projects => "projects",
            Collection::Materials => "materials",
            Collection::Quotes => "quotes",
            Collection::Invoices => "invoices",
        }
    }

    /// Returns the filename used by the local store for this collection.
    pub fn filename(&self) -> &'static str {
        match self {
            Collection::Customers => "customers.json",
            Collection::Projects => "projects.json",
            Collection::Materials => "materials.json",
            Collection::Quotes => "quotes.json",
            Collection::Invoices => "invoices.json",
        }
    }

    /// Parse from a collection name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "customers" => Some(Collection::Customers),
            "projects" => Some(Collection::Projects),
            "materials" => Some(Collection::Materials),
            "quotes" => Some(Collection::Quotes),
            "invoices" => Some(Collection::Invoices),
            _ => None,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::parse(s).ok_or_else(|| {
            format!(
                "Unknown collection '{}'. Valid options: customers, projects, materials, quotes, invoices",
                s
            )
        })
    }
}

/// Role a node plays on the LAN. Written into snapshots as `_source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeMode {
    Master,
    #[default]
    Client,
}

impl NodeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeMode::Master => "master",
            NodeMode::Client => "client",
        }
    }
}

impl fmt::Display for NodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "master" => Ok(NodeMode::Master),
            "client" => Ok(NodeMode::Client),
            _ => Err(format!(
                "Invalid mode '{}'. Valid options: master, client",
                s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_parse() {
        assert_eq!(Collection::parse("customers"), Some(Collection::Customers));
        assert_eq!(Collection::parse("QUOTES"), Some(Collection::Quotes));
        assert_eq!(Collection::parse("Invoices"), Some(Collection::Invoices));
        assert_eq!(Collection::parse("users"), None);
        assert_eq!(Collection::parse(""), None);
    }

    #[test]
    fn test_collection_from_str_error_lists_options() {
        let err = Collection::from_str("widgets").unwrap_err();
        assert!(err.contains("widgets"));
        assert!(err.contains("materials"));
    }

    #[test]
    fn test_collection_filename_matches_name() {
        for collection in Collection::ALL {
            assert_eq!(
                collection.filename(),
                format!("{}.json", collection.name())
            );
        }
    }

    #[test]
    fn test_collection_serializes_lowercase() {
        let json = serde_json::to_string(&Collection::Projects).unwrap();
        assert_eq!(json, "\"projects\"");
    }

    #[test]
    fn test_node_mode_from_str() {
        assert_eq!(NodeMode::from_str("master").unwrap(), NodeMode::Master);
        assert_eq!(NodeMode::from_str("CLIENT").unwrap(), NodeMode::Client);
        assert!(NodeMode::from_str("leader").is_err());
        assert_eq!(NodeMode::default(), NodeMode::Client);
    }
}
