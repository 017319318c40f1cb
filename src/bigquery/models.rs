// ABOUTME: BigQuery v2 REST resources used by the target driver
// ABOUTME: Serialized in the API's camelCase JSON form

use serde::{Deserialize, Serialize};

use crate::sync::schema::TargetSchema;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetReference {
    pub project_id: String,
    pub dataset_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub dataset_reference: DatasetReference,
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReference {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub mode: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSchema {
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Clustering {
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub table_reference: TableReference,
    pub schema: TableSchema,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clustering: Option<Clustering>,
}

impl Table {
    pub fn from_schema(reference: TableReference, schema: &TargetSchema) -> Self {
        Self {
            table_reference: reference,
            schema: TableSchema {
                fields: schema
                    .fields
                    .iter()
                    .map(|f| FieldSchema {
                        name: f.name.clone(),
                        field_type: f.field_type.as_str().to_string(),
                        mode: f.mode.as_str().to_string(),
                    })
                    .collect(),
            },
            clustering: if schema.clustering.is_empty() {
                None
            } else {
                Some(Clustering {
                    fields: schema.clustering.clone(),
                })
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    pub project_id: String,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadConfiguration {
    pub destination_table: TableReference,
    pub source_format: String,
    pub write_disposition: String,
    pub create_disposition: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobConfiguration {
    pub load: LoadConfiguration,
}

/// Job resource sent as the metadata part of a load upload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadJob {
    pub job_reference: JobReference,
    pub configuration: JobConfiguration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query: String,
    pub use_legacy_sql: bool,
    pub location: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub job_reference: Option<JobReference>,
    #[serde(default)]
    pub job_complete: bool,
    pub num_dml_affected_rows: Option<String>,
    #[serde(default)]
    pub errors: Vec<ErrorProto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorProto {
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl std::fmt::Display for ErrorProto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}",
            self.reason.as_deref().unwrap_or("error"),
            self.message.as_deref().unwrap_or("no message")
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub state: String,
    pub error_result: Option<ErrorProto>,
    #[serde(default)]
    pub errors: Vec<ErrorProto>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadStatistics {
    pub output_rows: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatistics {
    pub num_dml_affected_rows: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobStatistics {
    pub load: Option<LoadStatistics>,
    pub query: Option<QueryStatistics>,
}

/// Job resource as returned by `jobs.get` and `jobs.insert`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_reference: JobReference,
    pub status: JobStatus,
    #[serde(default)]
    pub statistics: JobStatistics,
}

impl Job {
    pub fn is_done(&self) -> bool {
        self.status.state == "DONE"
    }

    /// Rows affected by a load or DML job, when reported.
    pub fn affected_rows(&self) -> Option<u64> {
        self.statistics
            .load
            .as_ref()
            .and_then(|l| l.output_rows.as_deref())
            .or_else(|| {
                self.statistics
                    .query
                    .as_ref()
                    .and_then(|q| q.num_dml_affected_rows.as_deref())
            })
            .and_then(|n| n.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::schema::map_schema;
    use crate::types::ColumnDescriptor;

    #[test]
    fn test_table_resource_shape() {
        let schema = map_schema(
            &[
                ColumnDescriptor::new("id", "int", false),
                ColumnDescriptor::new("placed_at", "datetime2", true),
            ],
            &["id".to_string()],
        );
        let table = Table::from_schema(
            TableReference {
                project_id: "p".to_string(),
                dataset_id: "d".to_string(),
                table_id: "orders".to_string(),
            },
            &schema,
        );
        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json["tableReference"]["tableId"], "orders");
        assert_eq!(json["schema"]["fields"][0]["type"], "INTEGER");
        assert_eq!(json["schema"]["fields"][0]["mode"], "REQUIRED");
        assert_eq!(json["schema"]["fields"][1]["type"], "DATETIME");
        assert_eq!(json["clustering"]["fields"][0], "id");
    }

    #[test]
    fn test_job_parsing() {
        let raw = r#"{
            "jobReference": {"projectId": "p", "jobId": "j1", "location": "US"},
            "status": {"state": "DONE", "errorResult": {"reason": "invalid", "message": "bad row"}},
            "statistics": {"load": {"outputRows": "1500"}}
        }"#;
        let job: Job = serde_json::from_str(raw).unwrap();
        assert!(job.is_done());
        assert_eq!(job.affected_rows(), Some(1500));
        assert_eq!(job.status.error_result.unwrap().to_string(), "invalid: bad row");
    }
}
