//! HTTP/JSON destination client.
//!
//! | Operation           | Request                                   |
//! |---------------------|-------------------------------------------|
//! | `create_person`     | `POST /persons`                           |
//! | `delete_person`     | `DELETE /persons/{sync_key}`              |
//! | `update_attribute`  | `PATCH /persons/{sync_key}` `{"field": v}`|
//! | `read_group`        | `GET /groups/{name}` (404 → absent)       |
//! | `create_group`      | `POST /groups`                            |
//! | `create_membership` | `POST /memberships`                       |
//! | `delete_membership` | `DELETE /memberships/{id}`                |
//! | `list_memberships`  | `GET /persons/{sync_key}/memberships`     |
//!
//! Every request carries HTTP Basic credentials. Path segments are
//! percent-encoded.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;

use roster_core::{
    DestinationConfig, DirectoryClient, Group, Membership, NewGroup, NewPerson, PersonAttribute,
    RemoteError, SyncKey,
};

use crate::error::DirectoryError;

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
struct NewMembership<'a> {
    group_id: &'a str,
    sync_key: &'a SyncKey,
    role: &'a str,
}

/// Blocking client over a shared `ureq` agent. Safe to share between
/// worker threads.
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    agent: ureq::Agent,
    base_url: String,
    authorization: String,
}

impl HttpDirectory {
    pub fn new(endpoint: &str, username: &str, password: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        let credentials = STANDARD.encode(format!("{username}:{password}"));
        Self {
            agent,
            base_url: endpoint.trim_end_matches('/').to_string(),
            authorization: format!("Basic {credentials}"),
        }
    }

    /// Build a client from an institution's destination settings.
    ///
    /// The password is read from the environment variable named by
    /// `password_env`; without one the password is empty.
    pub fn from_config(config: &DestinationConfig) -> Result<Self, DirectoryError> {
        let password = match &config.password_env {
            Some(var) => std::env::var(var)
                .map_err(|_| DirectoryError::MissingPassword { var: var.clone() })?,
            None => String::new(),
        };
        Ok(Self::new(
            &config.endpoint,
            &config.username,
            &password,
            Duration::from_secs(config.timeout_secs),
        ))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        for segment in segments {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        tracing::debug!("{method} {url}");
        self.agent
            .request(method, url)
            .set("Authorization", &self.authorization)
            .set("Accept", "application/json")
    }

    fn send_json(
        &self,
        operation: &'static str,
        method: &str,
        url: &str,
        body: impl Serialize,
    ) -> Result<(), DirectoryError> {
        self.request(method, url)
            .send_json(body)
            .map(|_| ())
            .map_err(|err| map_ureq_error(operation, err))
    }

    fn send_empty(
        &self,
        operation: &'static str,
        method: &str,
        url: &str,
    ) -> Result<(), DirectoryError> {
        self.request(method, url)
            .call()
            .map(|_| ())
            .map_err(|err| map_ureq_error(operation, err))
    }
}

fn map_ureq_error(operation: &'static str, err: ureq::Error) -> DirectoryError {
    match err {
        ureq::Error::Status(status, response) => {
            let mut body = response.into_string().unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            DirectoryError::Status {
                operation,
                status,
                body: body.trim().to_string(),
            }
        }
        ureq::Error::Transport(transport) => DirectoryError::Transport {
            operation,
            message: transport.to_string(),
        },
    }
}

impl DirectoryClient for HttpDirectory {
    fn create_person(&self, person: &NewPerson) -> Result<(), RemoteError> {
        let url = self.url(&["persons"]);
        Ok(self.send_json("create_person", "POST", &url, person)?)
    }

    fn delete_person(&self, sync_key: &SyncKey) -> Result<(), RemoteError> {
        let url = self.url(&["persons", sync_key.as_str()]);
        Ok(self.send_empty("delete_person", "DELETE", &url)?)
    }

    fn update_attribute(
        &self,
        sync_key: &SyncKey,
        attribute: PersonAttribute,
        value: &str,
    ) -> Result<(), RemoteError> {
        let url = self.url(&["persons", sync_key.as_str()]);
        let mut body = serde_json::Map::new();
        body.insert(attribute.as_str().to_string(), value.into());
        Ok(self.send_json(
            "update_attribute",
            "PATCH",
            &url,
            serde_json::Value::Object(body),
        )?)
    }

    fn read_group(&self, name: &str) -> Result<Option<Group>, RemoteError> {
        let url = self.url(&["groups", name]);
        match self.request("GET", &url).call() {
            Ok(response) => response
                .into_json::<Group>()
                .map(Some)
                .map_err(|source| {
                    DirectoryError::Decode {
                        operation: "read_group",
                        source,
                    }
                    .into()
                }),
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(err) => Err(map_ureq_error("read_group", err).into()),
        }
    }

    fn create_group(&self, group: &NewGroup) -> Result<(), RemoteError> {
        let url = self.url(&["groups"]);
        Ok(self.send_json("create_group", "POST", &url, group)?)
    }

    fn create_membership(
        &self,
        group_id: &str,
        sync_key: &SyncKey,
        role: &str,
    ) -> Result<(), RemoteError> {
        let url = self.url(&["memberships"]);
        let body = NewMembership {
            group_id,
            sync_key,
            role,
        };
        Ok(self.send_json("create_membership", "POST", &url, &body)?)
    }

    fn delete_membership(&self, membership_id: &str) -> Result<(), RemoteError> {
        let url = self.url(&["memberships", membership_id]);
        Ok(self.send_empty("delete_membership", "DELETE", &url)?)
    }

    fn list_memberships(&self, sync_key: &SyncKey) -> Result<Vec<Membership>, RemoteError> {
        let url = self.url(&["persons", sync_key.as_str(), "memberships"]);
        let response = self
            .request("GET", &url)
            .call()
            .map_err(|err| map_ureq_error("list_memberships", err))?;
        response
            .into_json::<Vec<Membership>>()
            .map_err(|source| {
                DirectoryError::Decode {
                    operation: "list_memberships",
                    source,
                }
                .into()
            })
    }
}
