//! Model-level resource calls that start or finish long-running operations.
//!
//! Upload and download of the files themselves happen outside this client; these
//! calls only hand out and consume the pre-signed URLs.

use std::fmt;

use log::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::ApiClient;
use crate::error::Error;
use crate::operation::{Operation, OperationBody};

/// A model inside a project; the unit the API scopes sessions and operations to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTarget {
    pub project_id: String,
    pub model_id: String,
}

impl ModelTarget {
    pub fn new(project_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            model_id: model_id.into(),
        }
    }

    /// Path of a model-scoped endpoint.
    pub fn path(&self, suffix: &str) -> String {
        format!(
            "projects/{}/models/{}/{}",
            self.project_id,
            self.model_id,
            suffix.trim_start_matches('/')
        )
    }
}

impl fmt::Display for ModelTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.model_id)
    }
}

/// Product filter as accepted by query and quantity endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductFilter {
    pub property: String,
    pub value: Value,
    pub operator: String,
}

#[derive(Debug, Serialize)]
struct QuantitiesRequest<'a> {
    calculators: &'a [String],
    filters: &'a [ProductFilter],
}

/// Body for importing an uploaded file as a new model.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateModelRequest {
    pub model_name: String,
    pub upload_url: String,
    pub upload_file_name: String,
    pub discipline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_role: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlResponse {
    upload_url: Option<String>,
}

impl ApiClient {
    /// Pre-signed URL to PUT a model file to before importing it.
    pub async fn upload_url(&self) -> Result<String, Error> {
        let response: UploadUrlResponse = self.get("upload-url").await?;
        response
            .upload_url
            .ok_or_else(|| crate::error::missing_field("uploadUrl"))
    }

    /// Start importing an uploaded file as a model of `project_id`.
    pub async fn create_model(
        &self,
        project_id: &str,
        request: &CreateModelRequest,
    ) -> Result<Operation, Error> {
        info!(
            "Importing {} into project {project_id} as {}",
            request.upload_file_name, request.model_name
        );
        self.post::<_, OperationBody>(&format!("projects/{project_id}/models"), request)
            .await?
            .require("operation")?
            .into_operation()
    }

    pub async fn start_export_ifc(&self, target: &ModelTarget) -> Result<Operation, Error> {
        info!("Starting IFC export of {target}");
        self.post_empty::<OperationBody>(&target.path("export-ifc"))
            .await?
            .require("operation")?
            .into_operation()
    }

    /// Download location of a finished IFC export.
    pub async fn export_ifc_result_url(
        &self,
        target: &ModelTarget,
        operation_id: &str,
    ) -> Result<String, Error> {
        self.location(&target.path(&format!("export-ifc/{operation_id}/result")))
            .await
    }

    pub async fn calculate_quantities(
        &self,
        target: &ModelTarget,
        calculators: &[String],
        filters: &[ProductFilter],
    ) -> Result<Operation, Error> {
        info!("Calculating {} quantities on {target}", calculators.join(", "));
        let request = QuantitiesRequest {
            calculators,
            filters,
        };
        self.post::<_, OperationBody>(&target.path("quantities"), &request)
            .await?
            .require("operation")?
            .into_operation()
    }

    /// Download location of a finished quantity calculation.
    pub async fn quantities_result_url(
        &self,
        target: &ModelTarget,
        operation_id: &str,
    ) -> Result<String, Error> {
        self.location(&target.path(&format!("quantities/{operation_id}/result")))
            .await
    }
}
