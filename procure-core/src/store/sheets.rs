//! Google Sheets values-API adapter
//!
//! Thin REST client over the v4 values endpoints. All reads/writes go through
//! A1 ranges; sheet growth uses the spreadsheet batchUpdate endpoint, which
//! needs the numeric sheet id, cached per title after the first properties
//! fetch.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreError;

use super::{CellWrite, GridAxis, GridCapacity, GridRange, TabularStore};

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

#[derive(Debug, Clone, Copy)]
struct SheetProps {
    sheet_id: i64,
    rows: usize,
    cols: usize,
}

/// [`TabularStore`] backed by the Google Sheets REST API.
pub struct SheetsStore {
    client: reqwest::Client,
    spreadsheet_id: String,
    token: String,
    props_cache: RwLock<HashMap<String, SheetProps>>,
}

impl SheetsStore {
    pub fn new(client: reqwest::Client, spreadsheet_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            spreadsheet_id: spreadsheet_id.into(),
            token: token.into(),
            props_cache: RwLock::new(HashMap::new()),
        }
    }

    fn values_url(&self, suffix: &str) -> String {
        format!("{}/{}/values/{}", SHEETS_API_BASE, self.spreadsheet_id, suffix)
    }

    async fn check(&self, resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        Err(StoreError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn sheet_props(&self, sheet: &str) -> Result<SheetProps, StoreError> {
        if let Some(props) = self.props_cache.read().await.get(sheet) {
            return Ok(*props);
        }

        #[derive(Deserialize)]
        struct GridProperties {
            #[serde(rename = "rowCount")]
            row_count: usize,
            #[serde(rename = "columnCount")]
            column_count: usize,
        }
        #[derive(Deserialize)]
        struct Properties {
            #[serde(rename = "sheetId")]
            sheet_id: i64,
            title: String,
            #[serde(rename = "gridProperties")]
            grid_properties: GridProperties,
        }
        #[derive(Deserialize)]
        struct Sheet {
            properties: Properties,
        }
        #[derive(Deserialize)]
        struct Spreadsheet {
            sheets: Vec<Sheet>,
        }

        let url = format!(
            "{}/{}?fields=sheets(properties(sheetId,title,gridProperties(rowCount,columnCount)))",
            SHEETS_API_BASE, self.spreadsheet_id
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let spreadsheet: Spreadsheet = self.check(resp).await?.json().await?;

        let mut cache = self.props_cache.write().await;
        for s in spreadsheet.sheets {
            cache.insert(
                s.properties.title.clone(),
                SheetProps {
                    sheet_id: s.properties.sheet_id,
                    rows: s.properties.grid_properties.row_count,
                    cols: s.properties.grid_properties.column_count,
                },
            );
        }
        cache
            .get(sheet)
            .copied()
            .ok_or_else(|| StoreError::UnknownSheet(sheet.to_string()))
    }
}

#[async_trait]
impl TabularStore for SheetsStore {
    async fn get_range(&self, sheet: &str, range: GridRange) -> Result<Vec<Vec<String>>, StoreError> {
        #[derive(Deserialize)]
        struct ValueRange {
            #[serde(default)]
            values: Vec<Vec<serde_json::Value>>,
        }

        let a1 = range.to_a1(sheet);
        debug!(range = %a1, "sheets get_range");
        let resp = self
            .client
            .get(self.values_url(&a1))
            .query(&[("majorDimension", "ROWS")])
            .bearer_auth(&self.token)
            .send()
            .await?;
        let body: ValueRange = self.check(resp).await?.json().await?;

        // The API returns untyped values; everything downstream works on the
        // displayed string form.
        let rows = body
            .values
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|v| match v {
                        serde_json::Value::String(s) => s,
                        serde_json::Value::Null => String::new(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .collect();
        Ok(rows)
    }

    async fn batch_write(&self, sheet: &str, writes: &[CellWrite]) -> Result<(), StoreError> {
        if writes.is_empty() {
            return Ok(());
        }
        let data: Vec<serde_json::Value> = writes
            .iter()
            .map(|w| {
                let range = GridRange::single_row(w.row, w.col, w.col).to_a1(sheet);
                json!({ "range": range, "values": [[w.value]] })
            })
            .collect();
        let body = json!({
            "valueInputOption": "USER_ENTERED",
            "data": data,
        });

        let url = format!(
            "{}/{}/values:batchUpdate",
            SHEETS_API_BASE, self.spreadsheet_id
        );
        debug!(sheet, cells = writes.len(), "sheets batch_write");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        self.check(resp).await?;
        Ok(())
    }

    async fn append_row(&self, sheet: &str, values: &[String]) -> Result<(), StoreError> {
        let url = format!("{}:append", self.values_url(&format!("'{}'!A1", sheet)));
        let body = json!({ "values": [values] });
        debug!(sheet, "sheets append_row");
        let resp = self
            .client
            .post(&url)
            .query(&[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        self.check(resp).await?;
        Ok(())
    }

    async fn capacity(&self, sheet: &str) -> Result<GridCapacity, StoreError> {
        let props = self.sheet_props(sheet).await?;
        Ok(GridCapacity {
            rows: props.rows,
            cols: props.cols,
        })
    }

    async fn grow(&self, sheet: &str, axis: GridAxis, amount: usize) -> Result<(), StoreError> {
        let props = self.sheet_props(sheet).await?;
        let dimension = match axis {
            GridAxis::Rows => "ROWS",
            GridAxis::Columns => "COLUMNS",
        };
        let body = json!({
            "requests": [{
                "appendDimension": {
                    "sheetId": props.sheet_id,
                    "dimension": dimension,
                    "length": amount,
                }
            }]
        });
        let url = format!("{}/{}:batchUpdate", SHEETS_API_BASE, self.spreadsheet_id);
        debug!(sheet, dimension, amount, "sheets grow");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        self.check(resp).await?;

        // Keep the cache consistent with the grown sheet.
        let mut cache = self.props_cache.write().await;
        if let Some(p) = cache.get_mut(sheet) {
            match axis {
                GridAxis::Rows => p.rows += amount,
                GridAxis::Columns => p.cols += amount,
            }
        }
        Ok(())
    }
}
