//! Engine configuration
//!
//! The core only sees opaque adapter configuration: which spreadsheet, which
//! Drive folder, which token. `.env` loading belongs to the binary.

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub spreadsheet_id: String,
    pub drive_folder_id: String,
    pub api_token: String,
    pub port: u16,
}

fn required(var: &str) -> Result<String, ConfigError> {
    std::env::var(var).map_err(|_| ConfigError::MissingVar(var.to_string()))
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidVar {
                var: "PORT".to_string(),
                value: raw,
            })?,
            Err(_) => 3000,
        };
        Ok(Self {
            spreadsheet_id: required("SPREADSHEET_ID")?,
            drive_folder_id: required("DRIVE_FOLDER_ID")?,
            api_token: required("SHEETS_API_TOKEN")?,
            port,
        })
    }
}
