use osmpbf::{DenseNodeInfo, Info};
use std::str::FromStr;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Element metadata, only decoded for the pass that writes extracts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metadata {
    pub version: Option<i32>,
    pub changeset: Option<i64>,
    pub timestamp: Option<String>,
    pub uid: Option<i32>,
    pub user: Option<String>,
    pub visible: bool,
}

pub fn metadata_from_info(info: &Info) -> Metadata {
    Metadata {
        version: info.version(),
        changeset: info.changeset(),
        timestamp: info.milli_timestamp().and_then(format_timestamp_millis),
        uid: info.uid(),
        user: info
            .user()
            .and_then(|user| user.ok())
            .map(|s| s.to_string()),
        visible: info.visible(),
    }
}

pub fn metadata_from_dense_info(info: &DenseNodeInfo) -> Metadata {
    Metadata {
        version: Some(info.version()),
        changeset: Some(info.changeset()),
        timestamp: format_timestamp_millis(info.milli_timestamp()),
        uid: Some(info.uid()),
        user: info.user().ok().map(|s| s.to_string()),
        visible: info.visible(),
    }
}

pub fn format_timestamp_millis(millis: i64) -> Option<String> {
    let nanos = i128::from(millis) * 1_000_000;
    let dt = OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()?;
    dt.format(&Rfc3339).ok()
}

/// Metadata attributes that can be stripped from written elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaAttribute {
    Version,
    Changeset,
    Timestamp,
    Uid,
    User,
}

impl FromStr for MetaAttribute {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "version" => Ok(MetaAttribute::Version),
            "changeset" => Ok(MetaAttribute::Changeset),
            "timestamp" => Ok(MetaAttribute::Timestamp),
            "uid" => Ok(MetaAttribute::Uid),
            "user" => Ok(MetaAttribute::User),
            _ => Err(format!("invalid attribute to clean: {value}")),
        }
    }
}

impl Metadata {
    pub fn cleaned(&self, attributes: &[MetaAttribute]) -> Metadata {
        let mut meta = self.clone();
        for attribute in attributes {
            match attribute {
                MetaAttribute::Version => meta.version = None,
                MetaAttribute::Changeset => meta.changeset = None,
                MetaAttribute::Timestamp => meta.timestamp = None,
                MetaAttribute::Uid => meta.uid = None,
                MetaAttribute::User => meta.user = None,
            }
        }
        meta
    }
}
