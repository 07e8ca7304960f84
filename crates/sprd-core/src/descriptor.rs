//! Pre-parsed firmware descriptor.
//!
//! Firmware packages usually embed an XML description of the loaders and
//! download files. Parsing that XML is out of scope here; an external
//! parser produces this object and callers consume it through explicit
//! presence checks. Absent fields fall back to the chip database.

/// One loader reference (FDL1 or FDL2) from the descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderInfo {
    pub file_name: String,
    pub address: u32,
}

/// One downloadable file listed by the descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorFile {
    pub id: String,
    pub name: String,
    pub file_name: String,
    pub kind: String,
    pub address: u32,
    pub size: u64,
    pub selected: bool,
}

/// One partition row from a descriptor carrying a partition layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorPartition {
    pub name: String,
    pub size: u64,
    pub offset: u64,
    pub kind: String,
}

/// Firmware descriptor as produced by an external parser.
#[derive(Debug, Clone, Default)]
pub struct FirmwareDescriptor {
    pub product_name: Option<String>,
    pub version: Option<String>,
    pub fdl1: Option<LoaderInfo>,
    pub fdl2: Option<LoaderInfo>,
    pub files: Vec<DescriptorFile>,
    pub partitions: Vec<DescriptorPartition>,
}

impl FirmwareDescriptor {
    /// Files marked for download, in descriptor order.
    pub fn selected_files(&self) -> impl Iterator<Item = &DescriptorFile> {
        self.files.iter().filter(|f| f.selected)
    }

    pub fn find_partition(&self, name: &str) -> Option<&DescriptorPartition> {
        self.partitions
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }
}
