use super::HostError;
use crate::catalog::ScriptDescriptor;
use crate::collab::{
    CollaboratorError, ExecutionResult, HostValidator, ScriptArgument, ScriptExecutor,
};
use crate::working_set::ElementId;
use serde::{Deserialize, Serialize};
use serde_json::json;

const DEFAULT_HOST_BASE: &str = "http://127.0.0.1:50051";

/// Host validation (`POST /elements/exists`) and execution (`POST /scripts/run`)
/// over plain JSON.
#[derive(Debug, Clone)]
pub struct HttpHost {
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct ExistsResponse {
    #[serde(default, alias = "existingIds")]
    existing_ids: Vec<ElementId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunRequest<'a> {
    script_name: &'a str,
    tool_id: &'a str,
    absolute_path: String,
    #[serde(rename = "type")]
    kind: &'a str,
    parameters: &'a [ScriptArgument],
}

impl HttpHost {
    pub fn new(api_base: &str) -> Self {
        let api_base = Some(api_base.trim())
            .filter(|base| !base.is_empty())
            .unwrap_or(DEFAULT_HOST_BASE)
            .to_string();
        Self { api_base }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), path)
    }

    fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, HostError> {
        let url = self.endpoint(path);
        let response = ureq::post(&url)
            .send_json(body)
            .map_err(|err| HostError::Request {
                url: url.clone(),
                reason: err.to_string(),
            })?;
        response
            .into_json::<T>()
            .map_err(|err| HostError::Response {
                url,
                reason: err.to_string(),
            })
    }

    pub fn existing_elements(&self, ids: &[ElementId]) -> Result<Vec<ElementId>, HostError> {
        let response: ExistsResponse =
            self.post_json("elements/exists", json!({ "elementIds": ids }))?;
        Ok(response.existing_ids)
    }

    pub fn run_script(
        &self,
        descriptor: &ScriptDescriptor,
        arguments: &[ScriptArgument],
    ) -> Result<ExecutionResult, HostError> {
        let request = RunRequest {
            script_name: &descriptor.name,
            tool_id: descriptor.tool_id.as_str(),
            absolute_path: descriptor.absolute_path.display().to_string(),
            kind: descriptor.kind.as_str(),
            parameters: arguments,
        };
        let body = serde_json::to_value(&request).map_err(|err| HostError::Request {
            url: self.endpoint("scripts/run"),
            reason: err.to_string(),
        })?;
        self.post_json("scripts/run", body)
    }
}

impl HostValidator for HttpHost {
    fn still_exist(&self, ids: &[i64]) -> Result<Vec<i64>, CollaboratorError> {
        self.existing_elements(ids)
            .map_err(|err| CollaboratorError::failed("host validation", err.to_string()))
    }
}

impl ScriptExecutor for HttpHost {
    fn run(
        &self,
        descriptor: &ScriptDescriptor,
        arguments: &[ScriptArgument],
    ) -> Result<ExecutionResult, CollaboratorError> {
        self.run_script(descriptor, arguments)
            .map_err(|err| CollaboratorError::failed("executor", err.to_string()))
    }
}
