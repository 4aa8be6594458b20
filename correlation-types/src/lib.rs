//! Plain data types shared by the correlation core and its consumers.
//!
//! Nothing in here talks to a database; rows are produced by the store
//! implementations in `common-properties` and handed around by value.

use serde::{Deserialize, Serialize};

pub const FILES_TYPE_ID: i32 = 0;
pub const DOMAIN_TYPE_ID: i32 = 1;
pub const EMAIL_TYPE_ID: i32 = 2;
pub const PHONE_TYPE_ID: i32 = 3;
pub const USBID_TYPE_ID: i32 = 4;
pub const SSID_TYPE_ID: i32 = 5;
pub const MAC_TYPE_ID: i32 = 6;
pub const IMEI_TYPE_ID: i32 = 7;
pub const IMSI_TYPE_ID: i32 = 8;
pub const ICCID_TYPE_ID: i32 = 9;

/// A correlation attribute type registered in the central repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationType {
    pub id: i32,
    pub display_name: String,
    /// Prefix of the per-type instance table (`<db_table_name>_instances`).
    pub db_table_name: String,
    pub supported: bool,
    pub enabled: bool,
}

impl CorrelationType {
    pub fn new(id: i32, display_name: &str, db_table_name: &str) -> Self {
        Self {
            id,
            display_name: display_name.to_string(),
            db_table_name: db_table_name.to_string(),
            supported: true,
            enabled: true,
        }
    }

    pub fn files() -> Self {
        Self::new(FILES_TYPE_ID, "Files", "file")
    }

    /// File hashes take a dedicated query path against the case database.
    pub fn is_file_type(&self) -> bool {
        self.id == FILES_TYPE_ID
    }

    pub fn instance_table(&self) -> String {
        format!("{}_instances", self.db_table_name)
    }

    /// The types every central repository is created with.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::files(),
            Self::new(DOMAIN_TYPE_ID, "Domains", "domain"),
            Self::new(EMAIL_TYPE_ID, "Email Addresses", "email_address"),
            Self::new(PHONE_TYPE_ID, "Phone Numbers", "phone_number"),
            Self::new(USBID_TYPE_ID, "USB Devices", "usb_devices"),
            Self::new(SSID_TYPE_ID, "Wireless Networks", "wireless_networks"),
            Self::new(MAC_TYPE_ID, "MAC Addresses", "mac_address"),
            Self::new(IMEI_TYPE_ID, "IMEI Number", "imei_number"),
            Self::new(IMSI_TYPE_ID, "IMSI Number", "imsi_number"),
            Self::new(ICCID_TYPE_ID, "ICCID Number", "iccid_number"),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationCase {
    pub id: i64,
    /// Case identity shared with the case database.
    pub case_uuid: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationDataSource {
    pub id: i64,
    pub case_id: i64,
    pub device_id: String,
    pub name: String,
    /// Object id of the data source inside its own case database.
    pub data_source_obj_id: Option<i64>,
}

impl CorrelationDataSource {
    /// Label used to tell apart data sources that share a display name.
    pub fn labelled_name(&self) -> String {
        match self.data_source_obj_id {
            Some(obj_id) => format!("{}:{}", self.name, obj_id),
            None => format!("{}:{}", self.name, self.id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum KnownStatus {
    #[default]
    Unknown,
    Known,
    Bad,
}

impl KnownStatus {
    pub fn from_db(value: Option<i32>) -> Self {
        match value {
            Some(1) => KnownStatus::Known,
            Some(2) => KnownStatus::Bad,
            _ => KnownStatus::Unknown,
        }
    }

    pub fn as_db(self) -> i32 {
        match self {
            KnownStatus::Unknown => 0,
            KnownStatus::Known => 1,
            KnownStatus::Bad => 2,
        }
    }
}

/// One row of a central repository instance table, joined with its case and
/// data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationRow {
    pub id: i64,
    pub correlation_type_id: i32,
    pub value: String,
    pub case: CorrelationCase,
    pub data_source: CorrelationDataSource,
    pub file_path: String,
    pub known_status: KnownStatus,
    pub file_obj_id: Option<i64>,
}

impl CorrelationRow {
    pub fn file_name(&self) -> &str {
        match self.file_path.rfind(['/', '\\']) {
            Some(idx) => &self.file_path[idx + 1..],
            None => &self.file_path,
        }
    }

    /// Directory portion of `file_path`, including the trailing separator.
    pub fn parent_path(&self) -> &str {
        match self.file_path.rfind(['/', '\\']) {
            Some(idx) => &self.file_path[..=idx],
            None => "",
        }
    }
}
