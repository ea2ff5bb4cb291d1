//! Typed control-plane endpoints

use crate::control::resilient::{Delivered, ResilientClient};
use crate::control::transport::ApiRequest;
use crate::control::ControlError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, info};

/// Remote publish flag values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    /// Privately reachable for testing
    Test,
    /// Publicly listed
    Live,
}

impl PublishState {
    pub fn code(&self) -> u8 {
        match self {
            PublishState::Test => 3,
            PublishState::Live => 2,
        }
    }
}

/// Endpoint and auth headers for a provisioned instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Outcome of a create-or-update call
#[derive(Debug, Clone)]
pub struct TemplateUpsert {
    pub template_id: String,
    pub created: bool,
    /// Route prefix the template ended up with
    pub route_prefix: Option<String>,
    pub delivered: Delivered,
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Control-plane API bound to one operator account
pub struct ControlPlane {
    client: ResilientClient,
    user_id: String,
}

impl ControlPlane {
    pub fn new(client: ResilientClient, user_id: impl Into<String>) -> Self {
        Self {
            client,
            user_id: user_id.into(),
        }
    }

    pub fn client(&self) -> &ResilientClient {
        &self.client
    }

    pub async fn authenticate(&self) -> Result<String, ControlError> {
        self.client.authenticate().await
    }

    /// Provision a service instance for a template
    pub async fn create_instance(&self, template_id: &str) -> Result<Value, ControlError> {
        let delivered = self
            .client
            .send(ApiRequest::post(
                "/api/Service/create_mcp_server",
                json!({
                    "template_id": template_id,
                    "publish_type": 1,
                    "uid": self.user_id,
                }),
            ))
            .await?;
        info!("Provisioned instance for template {}", template_id);
        Ok(delivered.response.payload().clone())
    }

    pub async fn set_publish_state(
        &self,
        template_id: &str,
        state: PublishState,
    ) -> Result<(), ControlError> {
        self.client
            .send(ApiRequest::put(format!(
                "/api/Template/publish_mcp_template/{}/{}",
                template_id,
                state.code()
            )))
            .await?;
        debug!("Template {} publish state set to {:?}", template_id, state);
        Ok(())
    }

    pub async fn resolve_instance_id(&self, template_id: &str) -> Result<String, ControlError> {
        let delivered = self
            .client
            .send(ApiRequest::get(format!(
                "/api/Service/get_mcp_main_server_id/{}",
                template_id
            )))
            .await?;
        id_string(delivered.response.payload()).ok_or_else(|| {
            ControlError::UnexpectedBody(format!(
                "no instance id for template {}: {}",
                template_id,
                delivered.response.payload()
            ))
        })
    }

    /// The connection entry the control plane lists first for an instance.
    /// Entries keep the order the server sent them in, not key order.
    pub async fn resolve_connection(
        &self,
        instance_id: &str,
    ) -> Result<ConnectionDescriptor, ControlError> {
        let delivered = self
            .client
            .send(ApiRequest::get(format!(
                "/api/Service/generate_mcp_server/{}",
                instance_id
            )))
            .await?;

        let payload = delivered.response.payload();
        let entry = payload
            .as_object()
            .and_then(|servers| servers.values().next())
            .ok_or_else(|| {
                ControlError::UnexpectedBody(format!("no connection for instance {}", instance_id))
            })?;
        serde_json::from_value(entry.clone())
            .map_err(|e| ControlError::UnexpectedBody(format!("bad connection descriptor: {}", e)))
    }

    /// Create a template; `route_prefix` collisions and rejected payloads are retried
    pub async fn create_template(&self, payload: Value) -> Result<Delivered, ControlError> {
        self.client
            .send(
                ApiRequest::post("/api/Template/create_mcp_template", payload)
                    .with_collision_field("route_prefix")
                    .repairable(),
            )
            .await
    }

    /// Templates owned by this account that were created from the given sources
    pub async fn query_templates(&self, source_ids: &[String]) -> Result<Vec<Value>, ControlError> {
        let delivered = self
            .client
            .send(ApiRequest::post(
                "/api/Template/query_mcp_template_auth",
                json!({
                    "page_index": 1,
                    "page_size": 100,
                    "template_source_ids": source_ids,
                }),
            ))
            .await?;

        let payload = delivered.response.payload();
        let list = payload
            .get("list")
            .or_else(|| payload.get("data"))
            .unwrap_or(payload);
        Ok(list.as_array().cloned().unwrap_or_default())
    }

    pub async fn update_template(
        &self,
        template_id: &str,
        payload: Value,
    ) -> Result<Delivered, ControlError> {
        let mut payload = payload;
        if let Value::Object(map) = &mut payload {
            map.insert("template_id".into(), Value::String(template_id.to_string()));
        }
        self.client
            .send(ApiRequest::post("/api/Template/update_mcp_template", payload).repairable())
            .await
    }

    /// Update the template created from `source_id` if one exists, otherwise create it
    pub async fn create_or_update_template(
        &self,
        source_id: &str,
        payload: Value,
    ) -> Result<TemplateUpsert, ControlError> {
        let existing = self.query_templates(&[source_id.to_string()]).await?;
        let existing_id = existing.iter().find_map(|t| {
            t.get("template_id")
                .or_else(|| t.get("id"))
                .and_then(id_string)
        });

        match existing_id {
            Some(template_id) => {
                info!("Updating existing template {}", template_id);
                let delivered = self.update_template(&template_id, payload).await?;
                Ok(TemplateUpsert {
                    route_prefix: delivered.request.body.as_ref().and_then(|b| {
                        b.get("route_prefix").and_then(|r| r.as_str()).map(String::from)
                    }),
                    template_id,
                    created: false,
                    delivered,
                })
            }
            None => {
                let delivered = self.create_template(payload).await?;
                let body = delivered.response.payload();
                let template_id = id_string(body)
                    .or_else(|| body.get("template_id").and_then(id_string))
                    .or_else(|| body.get("id").and_then(id_string))
                    .ok_or_else(|| {
                        ControlError::UnexpectedBody(format!("create returned no template id: {}", body))
                    })?;
                info!("Created template {}", template_id);
                Ok(TemplateUpsert {
                    route_prefix: delivered.identifier().map(String::from),
                    template_id,
                    created: true,
                    delivered,
                })
            }
        }
    }
}
