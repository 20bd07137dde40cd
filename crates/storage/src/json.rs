//! JSON values stored in a [`Config`] blob

use crate::config::Config;
use reliant_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serialize `value` as JSON and replace the blob with it.
pub fn write_json<T: Serialize + ?Sized>(config: &Config, value: &T) -> Result<()> {
    let data = serde_json::to_vec(value)
        .map_err(|e| Error::InvalidArgs(format!("cannot encode config as json: {}", e)))?;
    config.write_file(&data)
}

/// Read the blob and decode it as JSON.
pub fn read_json<T: DeserializeOwned>(config: &Config) -> Result<T> {
    let data = config.read_file()?;
    serde_json::from_slice(&data)
        .map_err(|e| Error::BadData(format!("config blob is not valid json: {}", e)))
}
