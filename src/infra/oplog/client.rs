use anyhow::Result;
use buslight_monitor::oplog::OperationLogRecord;
use chrono::NaiveDate;
use std::time::Duration;

/// HTTP client for the operations service's log export endpoint.
///
/// Queries `GET {base_url}/v1/operation-logs?dates=d1,d2,...` with a bearer
/// token and returns one record per (bus, date) the service knows about.
pub struct OperationLogClient {
    base_url: String,
    api_token: String,
}

impl OperationLogClient {
    pub fn new(base_url: String, api_token: String) -> Self {
        Self { base_url, api_token }
    }

    pub async fn fetch_operation_logs(
        &self,
        dates: &[NaiveDate],
    ) -> Result<Vec<OperationLogRecord>> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let date_list = dates
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}/v1/operation-logs?dates={}", self.base_url, date_list);

        let response = client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send operation log request: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Operation log API returned status {}: {}",
                status,
                body
            ));
        }

        // Parse as generic JSON to extract only the fields we need
        let json: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse operation log response: {}", e))?;

        let records = json
            .into_iter()
            .filter_map(|item| {
                let bus_number = item["bus_number"].as_str()?.to_string();
                let operation_date =
                    NaiveDate::parse_from_str(item["operation_date"].as_str()?, "%Y-%m-%d").ok()?;
                let is_morning_operating = item["is_morning_operating"].as_i64().unwrap_or(0) as u8;
                let is_lunch_operating = item["is_lunch_operating"].as_i64().unwrap_or(0) as u8;
                let is_dinner_operating = item["is_dinner_operating"].as_i64().unwrap_or(0) as u8;

                Some(OperationLogRecord {
                    bus_number,
                    operation_date,
                    is_morning_operating,
                    is_lunch_operating,
                    is_dinner_operating,
                })
            })
            .collect();

        Ok(records)
    }
}
