//! Reading installed DAZ user files.
//!
//! `.duf` and `.dsf` files are DSON (JSON) documents, stored either as
//! plain text or gzip-compressed. The compression is sniffed from the
//! first two bytes rather than trusted from the extension.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Extensions of DAZ user files whose contents are read after install.
pub const USER_FILE_EXTENSIONS: &[&str] = &["duf", "dsf"];

pub fn is_user_file(extension: &str) -> bool {
    USER_FILE_EXTENSIONS
        .iter()
        .any(|e| e.eq_ignore_ascii_case(extension))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
}

/// The `asset_info` block at the top of every DSON document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub contributor: Option<Contributor>,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
}

#[derive(Deserialize)]
struct DsonHeader {
    asset_info: Option<AssetInfo>,
}

/// Open a user file for reading, decompressing it if it is gzipped.
pub fn open_text(path: &Path) -> Result<Box<dyn Read>> {
    let mut file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let mut magic = [0u8; 2];
    let gzipped = match file.read_exact(&mut magic) {
        Ok(()) => magic == GZIP_MAGIC,
        // Shorter than two bytes: can't be gzip
        Err(_) => false,
    };
    file.seek(SeekFrom::Start(0))?;

    if gzipped {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Whole contents of a user file as text.
pub fn read_text(path: &Path) -> Result<String> {
    let mut text = String::new();
    open_text(path)?
        .read_to_string(&mut text)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(text)
}

/// Parse the `asset_info` block. `Ok(None)` if the document has none.
pub fn read_asset_info(path: &Path) -> Result<Option<AssetInfo>> {
    let text = read_text(path)?;
    let header: DsonHeader = serde_json::from_str(text.trim_start_matches('\u{feff}'))
        .with_context(|| format!("{} is not a DSON document", path.display()))?;
    Ok(header.asset_info)
}
