//! Edge-node limit table rows.
//!
//! This is the shape exchanged with an edge node's control endpoint:
//! `GET /?list` returns an array of these, `POST /` takes one.

use serde::{Deserialize, Serialize};

use crate::{QuotaValues, TypesError};

/// A bucket's limits as applied on one edge node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LimitEntry {
    /// Bucket name
    #[serde(rename = "LimitBucketName")]
    pub bucket_name: String,
    /// Rate ceiling on this node
    #[serde(rename = "LimitBucketRate", default)]
    pub rate: u64,
    /// Per-connection rate ceiling
    #[serde(rename = "LimitConnRate", default)]
    pub per_conn_rate: u64,
    /// Connection ceiling on this node
    #[serde(rename = "LimitBucketConn", default)]
    pub conn: u64,
    /// QPS ceiling on this node
    #[serde(rename = "LimitBucketQPS", default)]
    pub qps: u64,
}

impl LimitEntry {
    /// Build an entry from a bucket name and its ceilings.
    pub fn new(bucket_name: impl Into<String>, values: QuotaValues) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            rate: values.rate,
            per_conn_rate: values.per_conn_rate,
            conn: values.conn,
            qps: values.qps,
        }
    }

    /// The entry's ceilings.
    pub fn values(&self) -> QuotaValues {
        QuotaValues::new(self.rate, self.conn, self.qps, self.per_conn_rate)
    }

    /// Decode a full limit table as returned by `GET /?list`.
    ///
    /// An empty body or a JSON `null` is an empty table.
    pub fn table_from_json(bytes: &[u8]) -> Result<Vec<Self>, TypesError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        let table: Option<Vec<Self>> = serde_json::from_slice(bytes)?;
        Ok(table.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_list_response() {
        let body = br#"[
            {"LimitBucketName":"images","LimitBucketRate":500,"LimitConnRate":0,"LimitBucketConn":5,"LimitBucketQPS":50},
            {"LimitBucketName":"video","LimitBucketRate":10}
        ]"#;
        let table = LimitEntry::table_from_json(body).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].values(), QuotaValues::new(500, 5, 50, 0));
        assert_eq!(table[1].conn, 0);
    }

    #[test]
    fn empty_body_is_empty_table() {
        assert!(LimitEntry::table_from_json(b"").unwrap().is_empty());
        assert!(LimitEntry::table_from_json(b" \n").unwrap().is_empty());
        assert!(LimitEntry::table_from_json(b"null").unwrap().is_empty());
    }

    #[test]
    fn object_body_is_an_error() {
        assert!(LimitEntry::table_from_json(b"{\"oops\":1}").is_err());
    }

    #[test]
    fn serializes_with_edge_field_names() {
        let entry = LimitEntry::new("images", QuotaValues::new(500, 5, 50, 0));
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"LimitBucketName\":\"images\""));
        assert!(json.contains("\"LimitBucketQPS\":50"));
    }
}
